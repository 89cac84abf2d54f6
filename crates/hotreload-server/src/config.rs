//! Server configuration.

use std::time::Duration;

use hotreload_core::protocol::{Capability, RecommendedSettings};
use hotreload_settings::HotReloadSettings;

/// Ratio thresholds used to derive the aggregate connection status.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HealthThresholds {
    /// `healthy / total` at or above this is `connected`.
    pub healthy: f64,
    /// At or above this (and below `healthy`) is `reconnecting`.
    pub degraded: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            healthy: 0.9,
            degraded: 0.5,
        }
    }
}

/// Runtime configuration for [`ConnectionServer`](crate::ConnectionServer)
/// and the components it owns.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Name reported by `/health`.
    pub service_name: String,
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum registered sessions.
    pub max_clients: usize,
    /// Ping period; also the health-check period.
    pub heartbeat_interval: Duration,
    /// Silence after which a session is evicted.
    pub heartbeat_timeout: Duration,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Pause between sends in throttled broadcasts.
    pub throttle_delay: Duration,
    /// Extra attempts for a failed direct send.
    pub retry_attempts: u32,
    /// Pause between direct-send attempts.
    pub retry_delay: Duration,
    /// Outbound queue depth per connection.
    pub send_queue_capacity: usize,
    /// Capabilities the server offers during negotiation.
    pub capabilities: Vec<String>,
    /// Status derivation thresholds.
    pub thresholds: HealthThresholds,
    /// File-change debounce window, advertised to clients.
    pub debounce: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&HotReloadSettings::default())
    }
}

impl From<&HotReloadSettings> for ServerConfig {
    fn from(settings: &HotReloadSettings) -> Self {
        let s = &settings.server;
        Self {
            service_name: s.service_name.clone(),
            host: s.host.clone(),
            port: s.port,
            max_clients: s.max_clients,
            heartbeat_interval: Duration::from_millis(s.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(s.heartbeat_timeout_ms),
            max_message_size: s.max_message_size,
            throttle_delay: Duration::from_millis(s.throttle_delay_ms),
            retry_attempts: s.retry_attempts,
            retry_delay: Duration::from_millis(s.retry_delay_ms),
            send_queue_capacity: s.send_queue_capacity.max(1),
            capabilities: s.capabilities.clone(),
            thresholds: HealthThresholds {
                healthy: settings.health.healthy_ratio,
                degraded: settings.health.degraded_ratio,
            },
            debounce: Duration::from_millis(settings.watcher.debounce_ms),
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Capabilities to acknowledge to a client that declared `requested`.
    ///
    /// A client that declares nothing gets everything the server offers;
    /// otherwise only the intersection with the client's enabled set.
    pub fn negotiate(&self, requested: &[Capability]) -> Vec<Capability> {
        self.capabilities
            .iter()
            .filter(|name| {
                requested.is_empty() || requested.iter().any(|c| c.enabled && &c.name == *name)
            })
            .map(|name| Capability::enabled(name.as_str()))
            .collect()
    }

    /// Tuning hints sent in the registration acknowledgement.
    pub fn recommended_settings(&self) -> RecommendedSettings {
        RecommendedSettings {
            heartbeat_interval_ms: duration_ms(self.heartbeat_interval),
            heartbeat_timeout_ms: duration_ms(self.heartbeat_timeout),
            debounce_ms: duration_ms(self.debounce),
            max_message_size: self.max_message_size,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
