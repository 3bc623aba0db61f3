//! hostshared: LAN discovery, remote fetch/import, and the orchestrator
//! that ties them to the share service and the persisted config.

pub mod discovery;
pub mod manager;
pub mod remote;

pub use discovery::{DiscoveryService, DiscoveryStatus};
pub use manager::{ManagerError, NetworkManager, NetworkStatus};
pub use remote::{RemoteClient, RemoteError};
