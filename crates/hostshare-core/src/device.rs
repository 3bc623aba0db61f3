//! Device identity: the (device_id, device_name, user_name) triple that
//! identifies this machine to peers on the LAN.

use serde::{Deserialize, Serialize};

/// Identity of the local device. Computed once at process start and passed
/// by value into every component that announces or serves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// 16 lowercase hex chars, stable for a given hostname + username.
    pub device_id: String,
    pub device_name: String,
    pub user_name: String,
}

impl DeviceInfo {
    /// Detect identity from the OS hostname and the login user.
    pub fn detect() -> Self {
        let device_name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        let user_name = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        Self::from_parts(device_name, user_name)
    }

    pub fn from_parts(device_name: impl Into<String>, user_name: impl Into<String>) -> Self {
        let device_name = device_name.into();
        let user_name = user_name.into();
        Self {
            device_id: device_id(&device_name, &user_name),
            device_name,
            user_name,
        }
    }
}

/// Derive the device id: first 8 bytes of BLAKE3(hostname || username), hex.
pub fn device_id(hostname: &str, username: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(hostname.as_bytes());
    hasher.update(username.as_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..8])
}
