//! Settings type definitions.
//!
//! All types use camelCase field names in JSON and `#[serde(default)]`, so a
//! partial file only needs the keys it changes.

use hotreload_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090, "maxClients": 20 },
///   "watcher": { "paths": ["./Sources"] }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HotReloadSettings {
    /// Listener, session and delivery settings.
    pub server: ServerSettings,
    /// Health-ratio thresholds.
    pub health: HealthSettings,
    /// File watching.
    pub watcher: WatcherSettings,
    /// Logging output.
    pub logging: LoggingSettings,
}

impl HotReloadSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.max_clients == 0 {
            return Err(SettingsError::InvalidValue("server.maxClients must be > 0".into()));
        }
        if s.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be > 0".into(),
            ));
        }
        if s.heartbeat_timeout_ms < s.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutMs ({}) must be >= heartbeatIntervalMs ({})",
                s.heartbeat_timeout_ms, s.heartbeat_interval_ms
            )));
        }
        let h = &self.health;
        if !(0.0..=1.0).contains(&h.degraded_ratio)
            || !(0.0..=1.0).contains(&h.healthy_ratio)
            || h.degraded_ratio > h.healthy_ratio
        {
            return Err(SettingsError::InvalidValue(format!(
                "health ratios must satisfy 0 <= degradedRatio ({}) <= healthyRatio ({}) <= 1",
                h.degraded_ratio, h.healthy_ratio
            )));
        }
        Ok(())
    }
}

/// Listener, session and delivery settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Name reported by `/health`.
    pub service_name: String,
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Maximum registered sessions.
    pub max_clients: usize,
    /// Ping period; also the health-check period.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a session is evicted.
    pub heartbeat_timeout_ms: u64,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// Delay between sends in throttled broadcasts.
    pub throttle_delay_ms: u64,
    /// Extra attempts for a failed direct send.
    pub retry_attempts: u32,
    /// Delay between direct-send retries.
    pub retry_delay_ms: u64,
    /// Outbound queue depth per connection.
    pub send_queue_capacity: usize,
    /// Capabilities offered during negotiation.
    pub capabilities: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            service_name: "axiom-hotreload".into(),
            host: "127.0.0.1".into(),
            port: 8080,
            max_clients: 50,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            max_message_size: 10 * 1024 * 1024, // 10 MB
            throttle_delay_ms: 10,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            send_queue_capacity: 256,
            capabilities: vec![
                "fileWatching".into(),
                "stateSync".into(),
                "statePreservation".into(),
                "errorReporting".into(),
                "connectionStatus".into(),
            ],
        }
    }
}

/// Thresholds on `healthy / total` used to derive the fleet status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthSettings {
    /// At or above: `connected`.
    pub healthy_ratio: f64,
    /// At or above (and below `healthy_ratio`): `reconnecting`; below: `error`.
    pub degraded_ratio: f64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            healthy_ratio: 0.9,
            degraded_ratio: 0.5,
        }
    }
}

/// File watching.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatcherSettings {
    /// Directories watched recursively.
    pub paths: Vec<String>,
    /// File extensions of interest (empty = all).
    pub extensions: Vec<String>,
    /// Per-file debounce window.
    pub debounce_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            extensions: vec!["swift".into(), "kt".into(), "json".into()],
            debounce_ms: 500,
        }
    }
}

/// Logging output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}
