//! Payload bodies carried inside an [`Envelope`](super::Envelope).
//!
//! Field names are camelCase on the wire to match the Swift and Kotlin
//! clients.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::checksum::content_checksum;

/// Client platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Apple iOS / iPadOS.
    #[serde(alias = "iOS")]
    Ios,
    /// Android.
    #[serde(alias = "Android")]
    Android,
}

impl Platform {
    /// Every supported platform.
    pub const ALL: [Self; 2] = [Self::Ios, Self::Android];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A feature a client or the server declares support for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    /// Capability name, e.g. `fileWatching`.
    pub name: String,
    /// Capability version.
    #[serde(default = "default_capability_version")]
    pub version: String,
    /// Whether the capability is switched on.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Capability {
    /// Enabled capability at version `1.0`.
    pub fn enabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_capability_version(),
            enabled: true,
        }
    }
}

fn default_capability_version() -> String {
    "1.0".into()
}

fn default_true() -> bool {
    true
}

/// Screen dimensions reported by the device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenMetrics {
    /// Width in points.
    pub width: f64,
    /// Height in points.
    pub height: f64,
    /// Pixel density multiplier.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

/// Device description sent at registration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Hardware model, e.g. `iPhone15,2`.
    #[serde(default)]
    pub model: String,
    /// OS version string.
    #[serde(default)]
    pub os_version: String,
    /// Screen metrics, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<ScreenMetrics>,
}

/// Kind of file-system change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// File appeared.
    Created,
    /// File content changed.
    Modified,
    /// File removed.
    Deleted,
    /// File moved or renamed.
    Renamed,
}

/// What a client should do with a `stateSync` payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateOperation {
    /// Keep the current state across the reload.
    Preserve,
    /// Restore previously preserved state.
    Restore,
    /// Drop stored state.
    Clear,
    /// Replace state with the carried data.
    Sync,
}

/// Aggregate connection health published to clients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Fleet is healthy.
    Connected,
    /// Part of the fleet is unresponsive.
    Reconnecting,
    /// Most of the fleet is unresponsive.
    Error,
    /// No clients, or monitoring is stopped.
    #[default]
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        })
    }
}

/// Category of an `error` payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    /// The client sent something the protocol does not allow.
    Protocol,
    /// Registration was refused.
    Registration,
    /// Transport-level failure.
    Connection,
    /// Failure inside the server.
    Server,
}

/// `fileChanged`: a watched source file changed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangedPayload {
    /// Full path of the changed file.
    pub file_path: String,
    /// Final path component.
    pub file_name: String,
    /// File content after the change (empty for deletions).
    #[serde(default)]
    pub file_content: String,
    /// Change kind.
    pub change_type: ChangeType,
    /// Content checksum, see [`content_checksum`].
    #[serde(default)]
    pub checksum: String,
}

impl FileChangedPayload {
    /// Build a payload, deriving the file name and checksum from the inputs.
    pub fn new(file_path: impl Into<String>, file_content: String, change_type: ChangeType) -> Self {
        let file_path = file_path.into();
        let file_name = Path::new(&file_path)
            .file_name()
            .map_or_else(|| file_path.clone(), |n| n.to_string_lossy().into_owned());
        let checksum = content_checksum(file_content.as_bytes());
        Self {
            file_path,
            file_name,
            file_content,
            change_type,
            checksum,
        }
    }
}

/// `stateSync`: application state to preserve, restore or replace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSyncPayload {
    /// Arbitrary state keyed by name.
    #[serde(default)]
    pub state_data: Map<String, Value>,
    /// File the state belongs to.
    pub file_name: String,
    /// Requested operation.
    pub operation: StateOperation,
}

/// `clientRegister`: first message a client must send.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegisterPayload {
    /// Client platform.
    pub platform: Platform,
    /// Human-readable client name.
    #[serde(default)]
    pub client_name: String,
    /// Declared capabilities.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Device description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
}

/// `ping`: liveness probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingPayload {
    /// Sender-scoped monotonically increasing sequence number.
    pub sequence: u64,
}

/// `pong`: answer to a `ping`, echoing its sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    /// Sequence of the ping being answered.
    pub sequence: u64,
    /// Responder's clock at reply time.
    #[serde(default = "Utc::now")]
    pub server_timestamp: DateTime<Utc>,
}

/// `error`: a failure reported to the peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Stable machine-readable code, e.g. `NOT_REGISTERED`.
    pub error_code: String,
    /// Human-readable description.
    pub error_message: String,
    /// Error category.
    pub error_type: ErrorType,
    /// Whether the peer may retry.
    pub recoverable: bool,
    /// Extra key/value context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<BTreeMap<String, String>>,
}

/// `connectionStatus`: aggregate health of the client fleet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatusPayload {
    /// Derived status.
    pub status: ConnectionStatus,
    /// Connected client count.
    pub client_count: usize,
    /// Load estimate in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_load: Option<f64>,
}

/// Settings the server recommends to a newly registered client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedSettings {
    /// How often the server pings.
    pub heartbeat_interval_ms: u64,
    /// Silence after which the server evicts a client.
    pub heartbeat_timeout_ms: u64,
    /// File-change debounce window.
    pub debounce_ms: u64,
    /// Largest accepted frame.
    pub max_message_size: usize,
}

/// `capabilityNegotiation`: registration acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityNegotiationPayload {
    /// Capabilities both sides will use.
    pub supported_capabilities: Vec<Capability>,
    /// Client tuning hints.
    pub recommended_settings: RecommendedSettings,
}

/// `connectionClose`: orderly goodbye from either side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionClosePayload {
    /// Optional reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn platform_accepts_wire_and_display_spellings() {
        let p: Platform = serde_json::from_value(json!("ios")).unwrap();
        assert_eq!(p, Platform::Ios);
        let p: Platform = serde_json::from_value(json!("iOS")).unwrap();
        assert_eq!(p, Platform::Ios);
        assert_eq!(serde_json::to_value(Platform::Android).unwrap(), json!("android"));
    }

    #[test]
    fn file_changed_derives_name_and_checksum() {
        let p = FileChangedPayload::new("/src/Views/Home.swift", "body".into(), ChangeType::Modified);
        assert_eq!(p.file_name, "Home.swift");
        assert_eq!(p.checksum, content_checksum(b"body"));
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["filePath"], "/src/Views/Home.swift");
        assert_eq!(v["changeType"], "modified");
    }

    #[test]
    fn capability_defaults_when_fields_missing() {
        let c: Capability = serde_json::from_value(json!({"name": "stateSync"})).unwrap();
        assert_eq!(c, Capability::enabled("stateSync"));
    }

    #[test]
    fn register_payload_tolerates_missing_optional_fields() {
        let p: ClientRegisterPayload =
            serde_json::from_value(json!({"platform": "android"})).unwrap();
        assert_eq!(p.platform, Platform::Android);
        assert!(p.capabilities.is_empty());
        assert!(p.device_info.is_none());
    }

    #[test]
    fn status_payload_omits_absent_load() {
        let p = ConnectionStatusPayload {
            status: ConnectionStatus::Reconnecting,
            client_count: 3,
            server_load: None,
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v, json!({"status": "reconnecting", "clientCount": 3}));
    }
}
