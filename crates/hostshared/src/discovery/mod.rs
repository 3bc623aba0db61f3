//! DiscoveryService: UDP presence broadcast, listener, and peer expiry.
//!
//! One broadcast-enabled socket bound to the discovery port carries both
//! directions. `start` spawns three tasks (listener, broadcaster, sweeper);
//! `stop` aborts them, closes the socket and forgets every peer.

pub mod broadcast;
pub mod listener;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use hostshare_core::wire::PEER_TIMEOUT_MS;
use hostshare_core::{DeviceInfo, StartupError};
use hostshare_services::{DiscoveryEvent, EventBus, Peer, PeerTable};

use broadcast::{Announcer, LocalAddrs};
use listener::Receiver;

/// Snapshot for status reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryStatus {
    pub is_enabled: bool,
    pub broadcast_port: u16,
    pub peer_count: usize,
    pub online_peer_count: usize,
    pub local_ips: Vec<Ipv4Addr>,
}

struct Running {
    announcer: Announcer,
    tasks: Vec<JoinHandle<()>>,
}

pub struct DiscoveryService {
    device: DeviceInfo,
    broadcast_port: u16,
    peers: PeerTable,
    events: EventBus<DiscoveryEvent>,
    shared_count: Arc<AtomicUsize>,
    local_addrs: LocalAddrs,
    running: Mutex<Option<Running>>,
}

/// Broadcast-enabled IPv4 UDP socket bound to `0.0.0.0:port`.
///
/// SO_REUSEADDR is left off so a second instance fails to bind instead of
/// silently splitting the traffic.
fn make_discovery_socket(port: u16) -> std::io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

impl DiscoveryService {
    pub fn new(device: DeviceInfo, broadcast_port: u16) -> Self {
        Self {
            device,
            broadcast_port,
            peers: PeerTable::new(PEER_TIMEOUT_MS),
            events: EventBus::new(),
            shared_count: Arc::new(AtomicUsize::new(0)),
            local_addrs: Arc::new(RwLock::new(Vec::new())),
            running: Mutex::new(None),
        }
    }

    /// Receive peer-discovered / peer-offline events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// Bind the discovery port and start announcing `share_port`.
    ///
    /// The first presence round goes out immediately. Calling `start` while
    /// running is a no-op.
    pub async fn start(&self, share_port: u16) -> Result<(), StartupError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::debug!("discovery already running");
            return Ok(());
        }

        let port = self.broadcast_port;
        let socket = make_discovery_socket(port)
            .and_then(UdpSocket::from_std)
            .map_err(|source| StartupError::DiscoveryBind { port, source })?;
        let socket = Arc::new(socket);

        let announcer = Announcer {
            socket: socket.clone(),
            device: self.device.clone(),
            share_port,
            broadcast_port: port,
            shared_count: self.shared_count.clone(),
            local_addrs: self.local_addrs.clone(),
        };
        *self
            .local_addrs
            .write()
            .unwrap_or_else(PoisonError::into_inner) = broadcast::local_ipv4_addrs();

        let receiver = Receiver {
            local_device_id: self.device.device_id.clone(),
            local_addrs: self.local_addrs.clone(),
            peers: self.peers.clone(),
            events: self.events.clone(),
        };

        let tasks = vec![
            tokio::spawn(listener::listener_loop(socket, receiver)),
            tokio::spawn(broadcast::broadcast_loop(announcer.clone())),
            tokio::spawn(listener::sweep_loop(self.peers.clone(), self.events.clone())),
        ];

        tracing::info!(port, share_port, device_id = %self.device.device_id, "discovery started");
        *running = Some(Running { announcer, tasks });
        Ok(())
    }

    /// Cancel the periodic tasks, close the socket, clear the peer table.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        for task in &running.tasks {
            task.abort();
        }
        for task in running.tasks {
            let _ = task.await;
        }
        // Last socket reference goes with the announcer.
        drop(running.announcer);
        self.peers.clear();
        tracing::info!(port = self.broadcast_port, "discovery stopped");
    }

    /// Send one presence round now. Returns datagrams sent; 0 when stopped.
    pub async fn broadcast(&self) -> usize {
        let announcer = match self.running.lock().await.as_ref() {
            Some(running) => running.announcer.clone(),
            None => {
                tracing::debug!("discovery not running, skipping broadcast");
                return 0;
            }
        };
        announcer.announce().await
    }

    pub async fn refresh(&self) -> usize {
        self.broadcast().await
    }

    /// Advertised in the next presence message.
    pub fn set_shared_count(&self, count: usize) {
        self.shared_count.store(count, Ordering::Relaxed);
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Online peers, most recently seen first.
    pub fn discovered_peers(&self) -> Vec<Peer> {
        self.peers.online()
    }

    /// Every tracked peer, including offline ones awaiting purge.
    pub fn all_peers(&self) -> Vec<Peer> {
        self.peers.all()
    }

    pub fn broadcast_port(&self) -> u16 {
        self.broadcast_port
    }

    pub async fn status(&self) -> DiscoveryStatus {
        DiscoveryStatus {
            is_enabled: self.is_running().await,
            broadcast_port: self.broadcast_port,
            peer_count: self.peers.len(),
            online_peer_count: self.peers.online_count(),
            local_ips: self
                .local_addrs
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}
