//! hostshared: LAN SSH host sharing daemon.

use std::sync::Arc;

use anyhow::{Context, Result};

use hostshare_core::{DeviceInfo, HostStore, NetworkConfig};
use hostshare_services::{NetworkEvent, SshConfigStore};
use hostshared::NetworkManager;

/// Re-register persisted shared nodes from the local ssh config.
async fn restore(manager: &NetworkManager, store: &SshConfigStore) {
    match store.list_hosts() {
        Ok(hosts) => {
            manager.restore_shared_nodes(&hosts).await;
        }
        Err(e) => tracing::warn!(error = %e, "failed to read host store, nothing restored"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let device = DeviceInfo::detect();
    let config_path = NetworkConfig::file_path();
    tracing::info!(
        device_id = %device.device_id,
        device_name = %device.device_name,
        config = %config_path.display(),
        "hostshared starting"
    );

    let store = Arc::new(SshConfigStore::new(
        std::env::var("HOSTSHARE_SSH_CONFIG")
            .map(Into::into)
            .unwrap_or_else(|_| SshConfigStore::default_path()),
    ));
    tracing::info!(path = %store.path().display(), "using ssh config");

    let manager = Arc::new(
        NetworkManager::new(device, config_path).context("failed to build network manager")?,
    );
    let mut events = manager.subscribe();

    if let Err(e) = manager.initialize().await {
        tracing::error!(error = %e, "network services failed to start, sharing disabled");
    } else if manager.is_sharing_enabled().await {
        restore(&manager, &store).await;
    }

    // Event loop: log everything, restore on sharing-enabled.
    let event_loop = {
        let manager = manager.clone();
        let store = store.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(event = event.name(), payload = %json, "network event"),
                    Err(_) => tracing::info!(event = event.name(), "network event"),
                }
                if matches!(event, NetworkEvent::SharingEnabled) {
                    restore(&manager, &store).await;
                }
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    manager.cleanup().await;
    let _ = event_loop.await;
    tracing::info!("hostshared stopped");
    Ok(())
}
