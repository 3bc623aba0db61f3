//! Peer table: tracks LAN devices seen via presence datagrams.
//!
//! Keyed on device id, not IP: a device may roam between addresses.
//! A peer is online while datagrams keep arriving within the timeout; it is
//! flipped offline once (edge-triggered) and purged after twice the timeout.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use hostshare_core::wire::{PresenceMessage, PEER_TIMEOUT_MS};

/// A remote device inferred from its presence datagrams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub device_id: String,
    pub device_name: String,
    pub user_name: String,
    /// Source address of the last datagram.
    pub ip: IpAddr,
    /// HTTP port of the peer's ShareService.
    pub port: u16,
    /// Epoch millis of the last datagram received.
    pub last_seen: u64,
    pub is_online: bool,
    pub shared_count: u64,
    pub version: String,
}

impl Peer {
    pub fn from_presence(msg: &PresenceMessage, ip: IpAddr, now: u64) -> Self {
        Self {
            device_id: msg.device_id.clone(),
            device_name: msg.device_name.clone(),
            user_name: msg.user_name.clone(),
            ip,
            port: msg.port,
            last_seen: now,
            is_online: true,
            shared_count: msg.shared_count(),
            version: msg.version.clone(),
        }
    }
}

/// Peers whose state changed during one sweep.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub went_offline: Vec<Peer>,
    pub removed: Vec<Peer>,
}

/// The peer table, shared between the listener, the sweeper, and readers.
#[derive(Clone)]
pub struct PeerTable {
    peers: Arc<DashMap<String, Peer>>,
    timeout_ms: u64,
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new(PEER_TIMEOUT_MS)
    }
}

impl PeerTable {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
            timeout_ms,
        }
    }

    /// Upsert a freshly-heard peer.
    ///
    /// Returns true if the peer is new or was offline, i.e. it was just
    /// discovered.
    pub fn observe(&self, peer: Peer) -> bool {
        use dashmap::mapref::entry::Entry;

        match self.peers.entry(peer.device_id.clone()) {
            Entry::Occupied(mut entry) => {
                let was_offline = !entry.get().is_online;
                entry.insert(peer);
                was_offline
            }
            Entry::Vacant(entry) => {
                entry.insert(peer);
                true
            }
        }
    }

    /// Expire stale peers as of `now`.
    pub fn sweep(&self, now: u64) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        let timeout = self.timeout_ms;

        self.peers.retain(|_, peer| {
            let silent = now.saturating_sub(peer.last_seen);
            if silent <= timeout {
                return true;
            }
            if peer.is_online {
                peer.is_online = false;
                outcome.went_offline.push(peer.clone());
            }
            if silent > timeout * 2 {
                outcome.removed.push(peer.clone());
                return false;
            }
            true
        });

        outcome
    }

    /// Online peers, most recently seen first.
    pub fn online(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self
            .peers
            .iter()
            .filter(|e| e.value().is_online)
            .map(|e| e.value().clone())
            .collect();
        peers.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        peers
    }

    /// Every tracked peer including offline ones pending removal, most recent first.
    pub fn all(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.iter().map(|e| e.value().clone()).collect();
        peers.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        peers
    }

    pub fn get(&self, device_id: &str) -> Option<Peer> {
        self.peers.get(device_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn online_count(&self) -> usize {
        self.peers.iter().filter(|e| e.value().is_online).count()
    }

    pub fn clear(&self) {
        self.peers.clear();
    }
}
