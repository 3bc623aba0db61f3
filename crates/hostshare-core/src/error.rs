//! Error types shared across hostshare crates.

use std::path::PathBuf;

/// A service could not come up. The service stays disabled.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to bind discovery socket on port {port}: {source}")]
    DiscoveryBind {
        port: u16,
        source: std::io::Error,
    },
    #[error("no available port in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
    #[error("failed to bind HTTP listener on port {port}: {source}")]
    HttpBind {
        port: u16,
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum HostStoreError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("refusing to write host entry: {0}")]
    InvalidEntry(#[from] RecordError),
    #[error("host store error: {0}")]
    Other(String),
}

/// A host record that cannot be written as an ssh config block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("host alias is empty")]
    EmptyAlias,
    #[error("host alias {0:?} contains whitespace")]
    AliasWhitespace(String),
    #[error("{field} contains a line break")]
    LineBreak { field: &'static str },
    #[error("{field} value {value:?} contains whitespace")]
    ValueWhitespace { field: &'static str, value: String },
}
