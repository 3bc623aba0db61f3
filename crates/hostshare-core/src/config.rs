//! Persisted sharing configuration.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HOSTSHARE_CONFIG (explicit override)
//!   2. ~/.ssh/.ssh-config-share.json
//!
//! The file is the single source of truth for which nodes are configured to
//! be shared, independent of whether the network services are running.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::DeviceInfo;
use crate::wire::{DISCOVERY_PORT, HTTP_PORT_RANGE_END, HTTP_PORT_RANGE_START, PROTOCOL_VERSION};

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Global LAN sharing toggle.
    pub enabled: bool,
    pub device_id: String,
    pub device_name: String,
    pub user_name: String,
    /// Host alias → per-node sharing flag. Survives global disable.
    pub shared_nodes: BTreeMap<String, SharedNodeConfig>,
    pub network: NetworkSettings,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SharedNodeConfig {
    pub enabled: bool,
    /// Epoch millis of the last share.
    pub shared_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkSettings {
    pub broadcast_port: u16,
    pub http_port_range: PortRange,
}

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn ports(&self) -> std::ops::RangeInclusive<u16> {
        self.start..=self.end
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_id: String::new(),
            device_name: String::new(),
            user_name: String::new(),
            shared_nodes: BTreeMap::new(),
            network: NetworkSettings::default(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            broadcast_port: DISCOVERY_PORT,
            http_port_range: PortRange::default(),
        }
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: HTTP_PORT_RANGE_START,
            end: HTTP_PORT_RANGE_END,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Write `contents` to `<path>.tmp`, then rename over `path`, so readers
/// see either the old file or the new one and never a truncated mix.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp);
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, serde_json::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(serde_json::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl NetworkConfig {
    /// Default document stamped with this device's identity.
    pub fn for_device(device: &DeviceInfo) -> Self {
        Self {
            device_id: device.device_id.clone(),
            device_name: device.device_name.clone(),
            user_name: device.user_name.clone(),
            ..Self::default()
        }
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HOSTSHARE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".ssh").join(".ssh-config-share.json"))
    }

    /// Read and parse `path`. Missing keys take their defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Load `path`, never failing.
    ///
    /// A missing file is synthesized from defaults and written back. Any other
    /// read or parse failure falls back to defaults without touching the file.
    pub fn load_or_create(path: &Path, device: &DeviceInfo) -> Self {
        let mut config = match Self::load_from(path) {
            Ok(config) => config,
            Err(ConfigError::ReadFailed(_, e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::for_device(device);
                match config.save(path) {
                    Ok(()) => tracing::info!(path = %path.display(), "wrote default sharing config"),
                    Err(e) => tracing::warn!(error = %e, "failed to write default sharing config"),
                }
                config
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load sharing config, using defaults");
                Self::for_device(device)
            }
        };
        config.apply_env_overrides();
        config
    }

    /// Atomically replace `path` with this document.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = serde_json::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;

        write_atomic(path, text.as_bytes())
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply HOSTSHARE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HOSTSHARE_ENABLED") {
            self.enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("HOSTSHARE_NETWORK__BROADCAST_PORT") {
            if let Ok(p) = v.parse() {
                self.network.broadcast_port = p;
            }
        }
    }

    /// Persisted entries with `enabled = true`, ordered by alias.
    pub fn enabled_nodes(&self) -> impl Iterator<Item = (&String, &SharedNodeConfig)> {
        self.shared_nodes.iter().filter(|(_, node)| node.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("hostshare-config-test-{}-{}", std::process::id(), name))
            .join("share.json")
    }

    fn device() -> DeviceInfo {
        DeviceInfo::from_parts("laptop", "alice")
    }

    #[test]
    fn default_config_has_expected_network() {
        let config = NetworkConfig::default();
        assert!(!config.enabled);
        assert!(config.shared_nodes.is_empty());
        assert_eq!(config.network.broadcast_port, 8888);
        assert_eq!(config.network.http_port_range, PortRange::new(8889, 8999));
        assert_eq!(config.version, "1.0");
    }

    #[test]
    fn serializes_camel_case_document() {
        let mut config = NetworkConfig::for_device(&device());
        config.shared_nodes.insert(
            "web1".into(),
            SharedNodeConfig {
                enabled: true,
                shared_at: 10,
            },
        );
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["deviceName"], "laptop");
        assert_eq!(value["sharedNodes"]["web1"]["enabled"], true);
        assert_eq!(value["sharedNodes"]["web1"]["sharedAt"], 10);
        assert_eq!(value["network"]["broadcastPort"], 8888);
        assert_eq!(value["network"]["httpPortRange"]["start"], 8889);
    }

    #[test]
    fn load_or_create_writes_default_when_missing() {
        let path = temp_path("missing");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());

        let config = NetworkConfig::load_or_create(&path, &device());
        assert!(path.exists());
        assert_eq!(config.device_id, device().device_id);

        let reloaded = NetworkConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.device_name, "laptop");

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn partial_document_is_repaired_on_load() {
        let path = temp_path("partial");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"deviceId": "x"}"#).unwrap();

        let config = NetworkConfig::load_from(&path).unwrap();
        assert!(!config.enabled);
        assert!(config.shared_nodes.is_empty());
        assert_eq!(config.network, NetworkSettings::default());
        assert_eq!(config.version, "1.0");

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_document_falls_back_without_overwrite() {
        let path = temp_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let config = NetworkConfig::load_or_create(&path, &device());
        assert_eq!(config.device_id, device().device_id);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn save_then_load_preserves_shared_nodes() {
        let path = temp_path("roundtrip");
        let mut config = NetworkConfig::for_device(&device());
        config.enabled = true;
        config.shared_nodes.insert(
            "db".into(),
            SharedNodeConfig {
                enabled: false,
                shared_at: 7,
            },
        );
        config.save(&path).unwrap();

        let reloaded = NetworkConfig::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
        assert_eq!(reloaded.enabled_nodes().count(), 0);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn save_fails_when_parent_is_a_file() {
        let blocker = temp_path("blocker");
        std::fs::create_dir_all(blocker.parent().unwrap()).unwrap();
        std::fs::write(&blocker, "file").unwrap();

        let err = NetworkConfig::default().save(&blocker.join("share.json"));
        assert!(matches!(err, Err(ConfigError::WriteFailed(..))));

        let _ = std::fs::remove_dir_all(blocker.parent().unwrap());
    }
}
