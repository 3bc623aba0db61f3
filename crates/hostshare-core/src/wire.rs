//! hostshare wire format: presence datagrams and HTTP response envelopes.
//!
//! Presence datagrams are UTF-8 JSON, one per broadcast tick per interface:
//!
//! ```text
//! {"type":"ssh-config-discovery","version":"1.0","deviceId":"…","deviceName":"…",
//!  "userName":"…","port":8889,"timestamp":1700000000000,"sharedCount":2}
//! ```
//!
//! Every HTTP response body is an [`Envelope`].

use serde::{Deserialize, Serialize};

use crate::device::DeviceInfo;
use crate::host::SharedHostRecord;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Protocol tag carried in every presence datagram.
pub const PROTOCOL_TYPE: &str = "ssh-config-discovery";

/// Single supported schema version.
pub const PROTOCOL_VERSION: &str = "1.0";

/// UDP port presence datagrams are sent to and received on.
pub const DISCOVERY_PORT: u16 = 8888;

/// Inclusive range the ShareService scans for a free HTTP port.
pub const HTTP_PORT_RANGE_START: u16 = 8889;
pub const HTTP_PORT_RANGE_END: u16 = 8999;

pub const BROADCAST_INTERVAL_MS: u64 = 5_000;

/// Silence after which a peer is marked offline. Twice this purges it.
pub const PEER_TIMEOUT_MS: u64 = 15_000;

pub const SWEEP_INTERVAL_MS: u64 = 5_000;

/// Upper bound on any outbound fetch/import request.
pub const REMOTE_TIMEOUT_SECS: u64 = 5;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Presence ──────────────────────────────────────────────────────────────────

/// Periodic UDP announcement of device identity and sharing port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub version: String,
    pub device_id: String,
    pub device_name: String,
    pub user_name: String,
    /// HTTP port of the sender's ShareService.
    pub port: u16,
    pub timestamp: u64,
    #[serde(default)]
    pub shared_count: Option<u64>,
}

/// Why an inbound datagram was rejected. Never surfaced past the listener.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed presence datagram: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unexpected protocol tag {0:?}")]
    WrongProtocol(String),
    #[error("missing required field {0}")]
    MissingField(&'static str),
}

impl PresenceMessage {
    pub fn new(device: &DeviceInfo, port: u16, shared_count: usize, timestamp: u64) -> Self {
        Self {
            kind: PROTOCOL_TYPE.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            device_id: device.device_id.clone(),
            device_name: device.device_name.clone(),
            user_name: device.user_name.clone(),
            port,
            timestamp,
            shared_count: Some(shared_count as u64),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse and validate a datagram. Identity fields must be non-empty.
    pub fn decode(bytes: &[u8]) -> Result<Self, ValidationError> {
        let msg: PresenceMessage = serde_json::from_slice(bytes)?;
        if msg.kind != PROTOCOL_TYPE {
            return Err(ValidationError::WrongProtocol(msg.kind));
        }
        if msg.device_id.is_empty() {
            return Err(ValidationError::MissingField("deviceId"));
        }
        if msg.device_name.is_empty() {
            return Err(ValidationError::MissingField("deviceName"));
        }
        if msg.user_name.is_empty() {
            return Err(ValidationError::MissingField("userName"));
        }
        Ok(msg)
    }

    pub fn shared_count(&self) -> u64 {
        self.shared_count.unwrap_or(0)
    }
}

// ── HTTP envelope ─────────────────────────────────────────────────────────────

/// `{success, data}` on success, `{success:false, error:{code, message}}` otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    // No `default` here: it would add a `T: Default` bound to Deserialize.
    // A missing Option field already decodes as None.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub code: u16,
    pub message: String,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(code: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(EnvelopeError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Unwrap the payload, or the remote's error (`"Unknown error"` if it sent none).
    pub fn into_result(self) -> Result<T, EnvelopeError> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(self.error.unwrap_or_else(|| EnvelopeError {
                code: 0,
                message: "Unknown error".to_string(),
            })),
        }
    }
}

/// Payload of `GET /api/nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesPayload {
    #[serde(default)]
    pub nodes: Vec<SharedHostRecord>,
    pub owner: DeviceInfo,
    pub timestamp: u64,
}

/// Payload of `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthPayload {
    pub status: String,
    pub timestamp: u64,
    pub device: DeviceInfo,
    pub shared_count: usize,
}
