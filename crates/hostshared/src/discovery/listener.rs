//! Presence listener and peer expiry.
//!
//! Valid datagrams from other devices are upserted into the peer table.
//! A separate sweep task flips silent peers offline and purges dead ones.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::net::UdpSocket;

use hostshare_core::wire::SWEEP_INTERVAL_MS;
use hostshare_core::{now_ms, PresenceMessage};
use hostshare_services::{DiscoveryEvent, EventBus, Peer, PeerTable};

use super::broadcast::LocalAddrs;

/// Largest datagram we accept. Presence messages are a few hundred bytes.
const MAX_DATAGRAM: usize = 4096;

/// Validates inbound datagrams and records the peers they describe.
#[derive(Clone)]
pub struct Receiver {
    pub local_device_id: String,
    pub local_addrs: LocalAddrs,
    pub peers: PeerTable,
    pub events: EventBus<DiscoveryEvent>,
}

impl Receiver {
    /// Handle one datagram received from `src` at `now`.
    ///
    /// Returns the recorded peer, or `None` if the datagram was dropped.
    pub fn handle_datagram(&self, bytes: &[u8], src: SocketAddr, now: u64) -> Option<Peer> {
        let msg = match PresenceMessage::decode(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::trace!(src = %src, error = %e, "dropping datagram");
                return None;
            }
        };

        if msg.device_id == self.local_device_id {
            tracing::trace!("ignoring own presence");
            return None;
        }
        if self.is_local(src.ip()) {
            tracing::trace!(src = %src, "ignoring presence from local interface");
            return None;
        }

        let peer = Peer::from_presence(&msg, src.ip(), now);
        if self.peers.observe(peer.clone()) {
            tracing::info!(
                device_id = %peer.device_id,
                device_name = %peer.device_name,
                addr = %peer.ip,
                port = peer.port,
                "peer discovered"
            );
            self.events.emit(DiscoveryEvent::PeerDiscovered(peer.clone()));
        }
        Some(peer)
    }

    fn is_local(&self, ip: IpAddr) -> bool {
        let IpAddr::V4(v4) = ip else {
            return false;
        };
        self.local_addrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&v4)
    }
}

/// Receive presence datagrams until cancelled.
///
/// Runs forever. Cancel by aborting the task handle.
pub async fn listener_loop(socket: Arc<UdpSocket>, receiver: Receiver) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    tracing::info!("presence listener starting");

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "recv_from failed");
                continue;
            }
        };
        receiver.handle_datagram(&buf[..len], src, now_ms());
    }
}

/// Run one expiry pass at `now`, emitting offline transitions.
pub fn sweep_once(peers: &PeerTable, events: &EventBus<DiscoveryEvent>, now: u64) {
    let outcome = peers.sweep(now);
    for peer in outcome.went_offline {
        tracing::info!(device_id = %peer.device_id, device_name = %peer.device_name, "peer offline");
        events.emit(DiscoveryEvent::PeerOffline(peer));
    }
    if !outcome.removed.is_empty() {
        tracing::debug!(removed = outcome.removed.len(), "purged silent peers");
    }
}

/// Expire stale peers every SWEEP_INTERVAL_MS.
///
/// Runs forever. Cancel by aborting the task handle.
pub async fn sweep_loop(peers: PeerTable, events: EventBus<DiscoveryEvent>) {
    let mut interval = tokio::time::interval(Duration::from_millis(SWEEP_INTERVAL_MS));

    loop {
        interval.tick().await;
        sweep_once(&peers, &events, now_ms());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::RwLock;

    use hostshare_core::DeviceInfo;

    fn receiver() -> Receiver {
        Receiver {
            local_device_id: DeviceInfo::from_parts("laptop", "alice").device_id,
            local_addrs: Arc::new(RwLock::new(vec![Ipv4Addr::new(192, 168, 1, 10)])),
            peers: PeerTable::default(),
            events: EventBus::new(),
        }
    }

    fn presence(device: &DeviceInfo) -> Vec<u8> {
        PresenceMessage::new(device, 8890, 2, 1).encode().unwrap()
    }

    fn from(last: u8) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::new(192, 168, 1, last), 8888))
    }

    #[tokio::test]
    async fn new_device_is_discovered_once() {
        let rx = receiver();
        let mut events = rx.events.subscribe();
        let desk = DeviceInfo::from_parts("desk", "bob");

        let peer = rx.handle_datagram(&presence(&desk), from(20), 1_000).unwrap();
        assert!(peer.is_online);
        assert_eq!(peer.last_seen, 1_000);
        assert_eq!(peer.shared_count, 2);
        assert_eq!(peer.port, 8890);

        rx.handle_datagram(&presence(&desk), from(20), 2_000).unwrap();

        assert!(matches!(events.try_recv(), Ok(DiscoveryEvent::PeerDiscovered(p)) if p.device_name == "desk"));
        assert!(events.try_recv().is_err());
        assert_eq!(rx.peers.get(&desk.device_id).unwrap().last_seen, 2_000);
    }

    #[test]
    fn own_device_id_is_ignored() {
        let rx = receiver();
        let me = DeviceInfo::from_parts("laptop", "alice");
        assert!(rx.handle_datagram(&presence(&me), from(20), 1).is_none());
        assert!(rx.peers.is_empty());
    }

    #[test]
    fn local_interface_source_is_ignored() {
        let rx = receiver();
        let desk = DeviceInfo::from_parts("desk", "bob");
        assert!(rx.handle_datagram(&presence(&desk), from(10), 1).is_none());
        assert!(rx.peers.is_empty());
    }

    #[test]
    fn malformed_datagrams_are_dropped() {
        let rx = receiver();
        assert!(rx.handle_datagram(b"{\"type\":\"nope\"}", from(20), 1).is_none());
        assert!(rx.handle_datagram(&[0xff, 0x00, 0x13], from(20), 1).is_none());
        assert!(rx.peers.is_empty());
    }

    #[tokio::test]
    async fn sweep_emits_offline_once_and_rediscovers() {
        let rx = receiver();
        let mut events = rx.events.subscribe();
        let desk = DeviceInfo::from_parts("desk", "bob");
        rx.handle_datagram(&presence(&desk), from(20), 0);
        let _ = events.try_recv();

        sweep_once(&rx.peers, &rx.events, 16_000);
        sweep_once(&rx.peers, &rx.events, 20_000);
        assert!(matches!(events.try_recv(), Ok(DiscoveryEvent::PeerOffline(_))));
        assert!(events.try_recv().is_err());

        rx.handle_datagram(&presence(&desk), from(21), 21_000);
        assert!(matches!(events.try_recv(), Ok(DiscoveryEvent::PeerDiscovered(p)) if p.ip == from(21).ip()));
    }
}
