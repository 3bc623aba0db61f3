//! hostshare-core: shared types, wire format, and configuration.
//! All other hostshare crates depend on this one.

pub mod config;
pub mod device;
pub mod error;
pub mod host;
pub mod wire;

pub use config::{
    write_atomic, ConfigError, NetworkConfig, NetworkSettings, PortRange, SharedNodeConfig,
};
pub use device::DeviceInfo;
pub use error::{HostStoreError, RecordError, StartupError};
pub use host::{HostRecord, HostStore, SharedHostRecord, SHARED_FIELDS};
pub use wire::{now_ms, Envelope, EnvelopeError, PresenceMessage, ValidationError};
