//! Presence broadcast.
//!
//! Sends one PresenceMessage per tick to the directed broadcast address of
//! every non-loopback IPv4 interface so peers on the same /24 hear us.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{self, MissedTickBehavior};

use hostshare_core::wire::BROADCAST_INTERVAL_MS;
use hostshare_core::{now_ms, DeviceInfo, PresenceMessage};

/// This host's IPv4 addresses, refreshed on every broadcast tick and read by
/// the listener to drop our own datagrams.
pub type LocalAddrs = Arc<RwLock<Vec<Ipv4Addr>>>;

/// Non-loopback IPv4 addresses of every interface, sorted and deduplicated.
pub fn local_ipv4_addrs() -> Vec<Ipv4Addr> {
    let ifaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifaces) => ifaces,
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate network interfaces");
            return Vec::new();
        }
    };

    let mut addrs: Vec<Ipv4Addr> = ifaces
        .into_iter()
        .filter_map(|(_, ip)| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
            _ => None,
        })
        .collect();
    addrs.sort();
    addrs.dedup();
    addrs
}

/// Directed broadcast address, assuming a /24 network.
///
/// The interface netmask is not consulted, so hosts on wider subnets only
/// reach peers sharing their first three octets.
pub fn broadcast_address(ip: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = ip.octets();
    Ipv4Addr::new(a, b, c, 255)
}

/// Everything needed to build and send one presence round.
#[derive(Clone)]
pub struct Announcer {
    pub socket: Arc<UdpSocket>,
    pub device: DeviceInfo,
    /// HTTP port advertised to peers.
    pub share_port: u16,
    /// Destination UDP port (the discovery port).
    pub broadcast_port: u16,
    pub shared_count: Arc<AtomicUsize>,
    pub local_addrs: LocalAddrs,
}

impl Announcer {
    /// Send one presence datagram per interface. Returns how many were sent.
    pub async fn announce(&self) -> usize {
        let addrs = local_ipv4_addrs();
        *self
            .local_addrs
            .write()
            .unwrap_or_else(PoisonError::into_inner) = addrs.clone();

        let targets: Vec<SocketAddr> = addrs
            .into_iter()
            .map(|ip| SocketAddr::from((broadcast_address(ip), self.broadcast_port)))
            .collect();
        self.send_presence(&targets).await
    }

    /// Encode the current presence (live shared count included) and send it
    /// to each of `targets`.
    pub async fn send_presence(&self, targets: &[SocketAddr]) -> usize {
        let msg = PresenceMessage::new(
            &self.device,
            self.share_port,
            self.shared_count.load(Ordering::Relaxed),
            now_ms(),
        );
        let bytes = match msg.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode presence message");
                return 0;
            }
        };

        let mut sent = 0;
        for dest in targets {
            match self.socket.send_to(&bytes, dest).await {
                Ok(n) => {
                    sent += 1;
                    tracing::trace!(bytes = n, dest = %dest, "presence sent");
                }
                Err(e) => tracing::warn!(error = %e, dest = %dest, "presence send failed"),
            }
        }
        sent
    }
}

/// Announce immediately, then every BROADCAST_INTERVAL_MS.
///
/// Runs forever. Cancel by aborting the task handle.
pub async fn broadcast_loop(announcer: Announcer) {
    let mut interval = time::interval(Duration::from_millis(BROADCAST_INTERVAL_MS));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        port = announcer.broadcast_port,
        share_port = announcer.share_port,
        interval_ms = BROADCAST_INTERVAL_MS,
        "presence broadcast starting"
    );

    loop {
        interval.tick().await;
        announcer.announce().await;
    }
}
