//! NetworkManager: owns the persisted sharing config and drives the share
//! and discovery services from it.
//!
//! Services running implies `enabled = true` in the config. Sharing a node
//! while the services are down performs a full `enable_sharing` first, so the
//! global flag flips too. Disabling keeps every per-node flag so a later
//! enable can restore them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::PoisonError;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use hostshare_api::{ShareService, ShareStatus};
use hostshare_core::{
    now_ms, ConfigError, DeviceInfo, HostRecord, HostStore, HostStoreError, NetworkConfig,
    SharedHostRecord, SharedNodeConfig, StartupError,
};
use hostshare_services::{EventBus, NetworkEvent, Peer};

use crate::discovery::{DiscoveryService, DiscoveryStatus};
use crate::remote::{RemoteClient, RemoteError};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    HostStore(#[from] HostStoreError),
}

/// A persisted per-node entry with sharing enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedNodeEntry {
    pub id: String,
    pub enabled: bool,
    pub shared_at: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub is_initialized: bool,
    pub sharing_enabled: bool,
    pub share_service: ShareStatus,
    pub discovery_service: DiscoveryStatus,
    pub device_info: DeviceInfo,
}

pub struct NetworkManager {
    device: DeviceInfo,
    config_path: PathBuf,
    config: Mutex<NetworkConfig>,
    share: ShareService,
    discovery: DiscoveryService,
    events: EventBus<NetworkEvent>,
    remote: RemoteClient,
    initialized: AtomicBool,
    /// Serializes service start/stop.
    lifecycle: Mutex<()>,
    /// Serializes sharing operations (enable, disable, share, unshare,
    /// restore) so none observes another half-done.
    ops: Mutex<()>,
    relay: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl NetworkManager {
    /// Load (or create) the config at `config_path` and build both services
    /// from its network settings. Nothing is bound until `initialize`.
    pub fn new(device: DeviceInfo, config_path: impl Into<PathBuf>) -> Result<Self, ManagerError> {
        let config_path = config_path.into();
        let mut config = NetworkConfig::load_or_create(&config_path, &device);
        config.device_id = device.device_id.clone();
        config.device_name = device.device_name.clone();
        config.user_name = device.user_name.clone();

        let share = ShareService::new(device.clone(), config.network.http_port_range);
        let discovery = DiscoveryService::new(device.clone(), config.network.broadcast_port);

        Ok(Self {
            device,
            config_path,
            config: Mutex::new(config),
            share,
            discovery,
            events: EventBus::new(),
            remote: RemoteClient::new()?,
            initialized: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            ops: Mutex::new(()),
            relay: std::sync::Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<NetworkEvent> {
        self.events.subscribe()
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Start relaying discovery events and, if sharing is enabled, start the
    /// services. A second call is a no-op. On failure the manager stays
    /// uninitialized and the services stay down.
    pub async fn initialize(&self) -> Result<(), ManagerError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            tracing::debug!("network manager already initialized");
            return Ok(());
        }
        self.start_relay();

        let enabled = self.config.lock().await.enabled;
        if enabled {
            if let Err(e) = self.start_services().await {
                self.initialized.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        tracing::info!(
            device_id = %self.device.device_id,
            sharing_enabled = enabled,
            "network manager initialized"
        );
        Ok(())
    }

    fn start_relay(&self) {
        let mut relay = self.relay.lock().unwrap_or_else(PoisonError::into_inner);
        if relay.is_some() {
            return;
        }
        let mut rx = self.discovery.subscribe();
        let events = self.events.clone();
        *relay = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                events.emit(NetworkEvent::from(event));
            }
        }));
    }

    // ── Service lifecycle ─────────────────────────────────────────────────────

    pub async fn services_running(&self) -> bool {
        self.share.is_running() && self.discovery.is_running().await
    }

    /// Share service first (discovery announces its port), then discovery.
    /// If discovery fails the share service is stopped again.
    pub async fn start_services(&self) -> Result<(), ManagerError> {
        let _guard = self.lifecycle.lock().await;
        if self.services_running().await {
            return Ok(());
        }

        let port = self.share.start(None).await?;
        if let Err(e) = self.discovery.start(port).await {
            tracing::warn!(error = %e, "discovery failed to start, stopping share service");
            self.share.stop().await;
            return Err(e.into());
        }
        self.discovery.set_shared_count(self.share.shared_count());

        tracing::info!(port, "network services started");
        self.events.emit(NetworkEvent::ServicesStarted);
        Ok(())
    }

    pub async fn stop_services(&self) {
        let _guard = self.lifecycle.lock().await;
        if !self.share.is_running() && !self.discovery.is_running().await {
            return;
        }
        self.discovery.stop().await;
        self.share.stop().await;

        tracing::info!("network services stopped");
        self.events.emit(NetworkEvent::ServicesStopped);
    }

    // ── Config ────────────────────────────────────────────────────────────────

    /// Apply `change` to a copy of the config, persist it, then commit.
    /// A failed save leaves the in-memory config untouched.
    async fn update_config<F>(&self, change: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut NetworkConfig),
    {
        let mut config = self.config.lock().await;
        let mut next = config.clone();
        change(&mut next);
        next.save(&self.config_path)?;
        *config = next;
        Ok(())
    }

    pub async fn config(&self) -> NetworkConfig {
        self.config.lock().await.clone()
    }

    pub async fn is_sharing_enabled(&self) -> bool {
        self.config.lock().await.enabled
    }

    /// Persist `enabled = true`, bring the services up, then emit
    /// `sharing-enabled` so listeners re-populate previously shared nodes.
    pub async fn enable_sharing(&self) -> Result<(), ManagerError> {
        let _op = self.ops.lock().await;
        self.enable_locked().await
    }

    async fn enable_locked(&self) -> Result<(), ManagerError> {
        self.update_config(|config| config.enabled = true).await?;
        self.start_services().await?;

        tracing::info!("network sharing enabled");
        self.events.emit(NetworkEvent::SharingEnabled);
        Ok(())
    }

    /// Persist `enabled = false` and stop the services. Per-node flags are kept.
    pub async fn disable_sharing(&self) -> Result<(), ManagerError> {
        let _op = self.ops.lock().await;
        self.update_config(|config| config.enabled = false).await?;
        self.stop_services().await;

        tracing::info!("network sharing disabled, per-node flags preserved");
        Ok(())
    }

    // ── Nodes ─────────────────────────────────────────────────────────────────

    pub async fn share_node(
        &self,
        node_id: &str,
        data: &HostRecord,
    ) -> Result<SharedHostRecord, ManagerError> {
        let _op = self.ops.lock().await;
        if !self.services_running().await {
            tracing::info!(node_id, "services down, enabling sharing before share");
            self.enable_locked().await?;
        }

        self.update_config(|config| {
            config.shared_nodes.insert(
                node_id.to_string(),
                SharedNodeConfig {
                    enabled: true,
                    shared_at: now_ms(),
                },
            );
        })
        .await?;

        let shared = self.share.share_node(node_id, data);
        self.discovery.set_shared_count(self.share.shared_count());
        self.events.emit(NetworkEvent::NodeShared {
            node_id: node_id.to_string(),
            node_data: data.clone(),
        });
        Ok(shared)
    }

    /// Clear the node's persisted flag and drop it from the live set.
    /// Returns whether it was live.
    pub async fn unshare_node(&self, node_id: &str) -> Result<bool, ManagerError> {
        let _op = self.ops.lock().await;
        let persisted = self
            .config
            .lock()
            .await
            .shared_nodes
            .contains_key(node_id);
        if persisted {
            self.update_config(|config| {
                if let Some(node) = config.shared_nodes.get_mut(node_id) {
                    node.enabled = false;
                }
            })
            .await?;
        }

        let existed = self.share.unshare_node(node_id);
        self.discovery.set_shared_count(self.share.shared_count());
        self.events.emit(NetworkEvent::NodeUnshared {
            node_id: node_id.to_string(),
        });
        Ok(existed)
    }

    /// Re-register every persisted enabled node found in `hosts` by exact
    /// alias match. Missing hosts are skipped. Returns how many were restored;
    /// always 0 while the services are down.
    pub async fn restore_shared_nodes(&self, hosts: &[HostRecord]) -> usize {
        let _op = self.ops.lock().await;
        if !self.services_running().await {
            tracing::debug!("services down, nothing to restore into");
            return 0;
        }

        let enabled: Vec<String> = self
            .config
            .lock()
            .await
            .enabled_nodes()
            .map(|(id, _)| id.clone())
            .collect();

        let mut restored = 0;
        for node_id in enabled {
            match hosts.iter().find(|h| h.host == node_id) {
                Some(host) => {
                    self.share.share_node(&node_id, host);
                    restored += 1;
                }
                None => tracing::warn!(node_id = %node_id, "shared node not found in host list, skipping"),
            }
        }
        self.discovery.set_shared_count(self.share.shared_count());

        tracing::info!(restored, "restored shared nodes");
        restored
    }

    /// Persisted flag only, independent of the global toggle.
    pub async fn is_node_shared(&self, node_id: &str) -> bool {
        self.config
            .lock()
            .await
            .shared_nodes
            .get(node_id)
            .is_some_and(|node| node.enabled)
    }

    /// Persisted entries with sharing enabled, ordered by id.
    pub async fn get_shared_nodes_config(&self) -> Vec<SharedNodeEntry> {
        self.config
            .lock()
            .await
            .enabled_nodes()
            .map(|(id, node)| SharedNodeEntry {
                id: id.clone(),
                enabled: node.enabled,
                shared_at: node.shared_at,
            })
            .collect()
    }

    /// Records currently served.
    pub fn get_shared_nodes(&self) -> Vec<SharedHostRecord> {
        self.share.shared_nodes()
    }

    // ── Peers ─────────────────────────────────────────────────────────────────

    pub fn get_discovered_peers(&self) -> Vec<Peer> {
        self.discovery.discovered_peers()
    }

    pub fn get_all_peers(&self) -> Vec<Peer> {
        self.discovery.all_peers()
    }

    pub async fn refresh_discovery(&self) -> usize {
        self.discovery.refresh().await
    }

    // ── Remote ────────────────────────────────────────────────────────────────

    pub async fn fetch_remote_nodes(&self, peer: &Peer) -> Result<Vec<SharedHostRecord>, ManagerError> {
        let nodes = self.remote.fetch_nodes(peer).await.inspect_err(|e| {
            tracing::warn!(addr = %peer.ip, port = peer.port, error = %e, "fetch from peer failed");
        })?;
        Ok(nodes)
    }

    /// Fetch `node_id` from `peer` and save it to `store` under a free alias.
    ///
    /// The identity-file path belongs to the remote machine and is not
    /// imported. Nothing is written unless the fetch succeeds and the record
    /// passes [`SharedHostRecord::validate`].
    pub async fn import_remote_node(
        &self,
        peer: &Peer,
        node_id: &str,
        store: &dyn HostStore,
    ) -> Result<HostRecord, ManagerError> {
        let remote = self.remote.fetch_node(peer, node_id).await.inspect_err(|e| {
            tracing::warn!(addr = %peer.ip, node_id, error = %e, "import fetch failed");
        })?;
        if let Err(reason) = remote.validate() {
            tracing::warn!(addr = %peer.ip, node_id, error = %reason, "rejecting imported record");
            return Err(RemoteError::InvalidRecord {
                node_id: node_id.to_string(),
                reason,
            }
            .into());
        }

        let taken: Vec<String> = store.list_hosts()?.into_iter().map(|h| h.host).collect();
        let mut imported = HostRecord::new(unique_alias(&remote.host, &taken));
        imported.host_name = remote.host_name.clone();
        imported.user = remote.user.clone();
        imported.port = remote.port.clone();
        imported.remark = Some(import_remark(remote.remark.as_deref(), &peer.device_name));

        store.save_host(&imported)?;

        tracing::info!(
            node_id,
            alias = %imported.host,
            source = %peer.device_name,
            "imported remote node"
        );
        self.events.emit(NetworkEvent::NodeImported {
            original_node: remote,
            imported_node: imported.clone(),
            source: peer.clone(),
        });
        Ok(imported)
    }

    // ── Status / teardown ─────────────────────────────────────────────────────

    pub async fn network_status(&self) -> NetworkStatus {
        NetworkStatus {
            is_initialized: self.initialized.load(Ordering::SeqCst),
            sharing_enabled: self.is_sharing_enabled().await,
            share_service: self.share.device_info(),
            discovery_service: self.discovery.status().await,
            device_info: self.device.clone(),
        }
    }

    /// Stop services and the event relay, and close subscriber streams.
    pub async fn cleanup(&self) {
        let _op = self.ops.lock().await;
        self.stop_services().await;
        if let Some(relay) = self.relay.lock().unwrap_or_else(PoisonError::into_inner).take() {
            relay.abort();
        }
        self.events.close();
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!("network manager cleaned up");
    }
}

/// `base`, or `base-1`, `base-2`, … whichever is first not in `taken`.
pub fn unique_alias(base: &str, taken: &[String]) -> String {
    let mut candidate = base.to_string();
    let mut counter = 1;
    while taken.iter().any(|t| *t == candidate) {
        candidate = format!("{base}-{counter}");
        counter += 1;
    }
    candidate
}

fn import_remark(remark: Option<&str>, source: &str) -> String {
    match remark.filter(|r| !r.is_empty()) {
        Some(remark) => format!("{remark} (from {source})"),
        None => format!("from {source}"),
    }
}
