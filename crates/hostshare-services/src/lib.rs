//! hostshare-services: component-owned in-memory state (the peer table,
//! the live shared-node set, the event bus, and the file-backed host store).

pub mod events;
pub mod host_store;
pub mod peer;
pub mod shared;

pub use events::{DiscoveryEvent, EventBus, NetworkEvent};
pub use host_store::SshConfigStore;
pub use peer::{Peer, PeerTable, SweepOutcome};
pub use shared::SharedNodeStore;
