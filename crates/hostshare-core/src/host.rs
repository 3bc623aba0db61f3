//! Host records: SSH `Host` blocks as exchanged with the host-record store,
//! and the filtered projection that is served to LAN peers.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::device::DeviceInfo;
use crate::error::{HostStoreError, RecordError};

/// Fields a shared record may carry. Everything else is dropped on share.
///
/// `IdentityFile` is a local private-key path; it is disclosed to peers.
pub const SHARED_FIELDS: [&str; 6] = ["Host", "HostName", "User", "Port", "IdentityFile", "Remark"];

/// One `Host` entry as the host-record store sees it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Host alias. Unique within a store.
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "HostName", default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(rename = "User", default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(
        rename = "Port",
        default,
        deserialize_with = "de_port",
        skip_serializing_if = "Option::is_none"
    )]
    pub port: Option<String>,
    #[serde(rename = "IdentityFile", default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    #[serde(rename = "Remark", default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    /// Other directives and bookkeeping keys (`ProxyJump`, `originalHost`, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl HostRecord {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Check that every managed field can be written as a single ssh config
    /// directive without spilling into new lines or blocks.
    pub fn validate(&self) -> Result<(), RecordError> {
        check_entry(
            &self.host,
            &self.host_name,
            &self.user,
            &self.port,
            &self.identity_file,
            &self.remark,
        )
    }
}

/// A host record as published by a ShareService: allow-listed fields plus
/// sharing metadata. Rebuilt whole on every share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedHostRecord {
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "HostName", default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(rename = "User", default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(
        rename = "Port",
        default,
        deserialize_with = "de_port",
        skip_serializing_if = "Option::is_none"
    )]
    pub port: Option<String>,
    #[serde(rename = "IdentityFile", default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    #[serde(rename = "Remark", default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    pub id: String,
    #[serde(rename = "sharedAt")]
    pub shared_at: u64,
    pub owner: DeviceInfo,
}

impl SharedHostRecord {
    /// Project `record` through the allow-list and stamp sharing metadata.
    pub fn project(
        id: impl Into<String>,
        record: &HostRecord,
        owner: &DeviceInfo,
        shared_at: u64,
    ) -> Self {
        Self {
            host: record.host.clone(),
            host_name: record.host_name.clone(),
            user: record.user.clone(),
            port: record.port.clone(),
            identity_file: record.identity_file.clone(),
            remark: record.remark.clone(),
            id: id.into(),
            shared_at,
            owner: owner.clone(),
        }
    }

    /// Same rules as [`HostRecord::validate`]; applied to records received
    /// from peers before any of their text reaches a local store.
    pub fn validate(&self) -> Result<(), RecordError> {
        check_entry(
            &self.host,
            &self.host_name,
            &self.user,
            &self.port,
            &self.identity_file,
            &self.remark,
        )
    }
}

fn check_entry(
    alias: &str,
    host_name: &Option<String>,
    user: &Option<String>,
    port: &Option<String>,
    identity_file: &Option<String>,
    remark: &Option<String>,
) -> Result<(), RecordError> {
    if alias.trim().is_empty() {
        return Err(RecordError::EmptyAlias);
    }
    if alias.contains(char::is_whitespace) {
        return Err(RecordError::AliasWhitespace(alias.to_string()));
    }

    let fields = [
        ("HostName", host_name, true),
        ("User", user, true),
        ("Port", port, true),
        ("IdentityFile", identity_file, false),
        ("Remark", remark, false),
    ];
    for (field, value, single_token) in fields {
        let Some(value) = value.as_deref() else {
            continue;
        };
        if value.contains(['\n', '\r']) {
            return Err(RecordError::LineBreak { field });
        }
        if single_token && value.trim().contains(char::is_whitespace) {
            return Err(RecordError::ValueWhitespace {
                field,
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

/// The external host-record store (e.g. `~/.ssh/config`).
pub trait HostStore: Send + Sync {
    fn list_hosts(&self) -> Result<Vec<HostRecord>, HostStoreError>;

    /// Insert `host`, or update the entry with the same alias.
    fn save_host(&self, host: &HostRecord) -> Result<(), HostStoreError>;
}

/// SSH config values are strings, but JSON producers often send `Port` as a
/// number. Accept both.
fn de_port<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u64),
        Text(String),
    }

    Ok(match Option::<PortRepr>::deserialize(deserializer)? {
        Some(PortRepr::Number(n)) => Some(n.to_string()),
        Some(PortRepr::Text(s)) => Some(s),
        None => None,
    })
}
