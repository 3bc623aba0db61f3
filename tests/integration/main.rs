//! hostshare integration test harness.
//!
//! Each test builds two or more NetworkManagers in one process, all on
//! loopback. Every manager gets its own config file, ssh config, discovery
//! port and an OS-assigned HTTP port, so tests run in parallel without
//! touching the real ~/.ssh.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};

use hostshare_core::{DeviceInfo, HostRecord, HostStore, NetworkConfig, PortRange};
use hostshare_services::{NetworkEvent, Peer, SshConfigStore};
use hostshared::NetworkManager;

mod discovery;
mod sharing;

// ── Harness ───────────────────────────────────────────────────────────────────

static NEXT: AtomicU16 = AtomicU16::new(0);

/// One simulated device.
pub struct Node {
    pub manager: NetworkManager,
    pub store: SshConfigStore,
    pub dir: PathBuf,
}

impl Drop for Node {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// A UDP port nothing is bound to right now.
pub fn free_udp_port() -> Result<u16> {
    let probe = std::net::UdpSocket::bind("0.0.0.0:0").context("probe bind")?;
    Ok(probe.local_addr()?.port())
}

/// Build a device named `name` with an initialized manager.
///
/// `hosts` are written to its ssh config up front.
pub async fn node(name: &str, enabled: bool, hosts: &[HostRecord]) -> Result<Node> {
    let n = NEXT.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "hostshare-it-{}-{}-{}",
        std::process::id(),
        name,
        n
    ));
    let _ = std::fs::remove_dir_all(&dir);

    let config_path = dir.join("share.json");
    let device = DeviceInfo::from_parts(name, "tester");
    let mut config = NetworkConfig::for_device(&device);
    config.enabled = enabled;
    config.network.broadcast_port = free_udp_port()?;
    // Port 0: OS-assigned, so parallel tests never collide.
    config.network.http_port_range = PortRange::new(0, 0);
    config.save(&config_path).context("write test config")?;

    let store = SshConfigStore::new(dir.join("ssh_config"));
    for host in hosts {
        store.save_host(host)?;
    }

    let manager = NetworkManager::new(device, &config_path)?;
    manager.initialize().await?;
    Ok(Node {
        manager,
        store,
        dir,
    })
}

/// How another device would see `node` after hearing its presence.
pub async fn peer_of(node: &Node) -> Result<Peer> {
    let status = node.manager.network_status().await;
    let port = status
        .share_service
        .port
        .context("share service is not running")?;
    let device = node.manager.device();
    Ok(Peer {
        device_id: device.device_id.clone(),
        device_name: device.device_name.clone(),
        user_name: device.user_name.clone(),
        ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port,
        last_seen: hostshare_core::now_ms(),
        is_online: true,
        shared_count: status.share_service.shared_count as u64,
        version: "1.0".to_string(),
    })
}

pub fn host(alias: &str, host_name: &str) -> HostRecord {
    let mut record = HostRecord::new(alias);
    record.host_name = Some(host_name.to_string());
    record.user = Some("deploy".to_string());
    record.port = Some("22".to_string());
    record
}

/// Wait for the first event matching `pred`, skipping others.
pub async fn wait_for_event<F>(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<NetworkEvent>,
    mut pred: F,
) -> Result<NetworkEvent>
where
    F: FnMut(&NetworkEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = rx.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .context("timed out waiting for event")?
    .context("event stream closed")
}
