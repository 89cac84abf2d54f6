//! Shared state handed to every connection task.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::events::EventHub;
use crate::monitor::HealthMonitor;
use crate::websocket::broadcast::Broadcaster;
use crate::websocket::registry::SessionRegistry;

/// Components shared by the listener, the connection tasks and the embedding
/// process.
pub struct ServerContext {
    /// Effective configuration.
    pub config: Arc<ServerConfig>,
    /// Registered sessions.
    pub registry: Arc<SessionRegistry>,
    /// Outbound fan-out.
    pub broadcaster: Arc<Broadcaster>,
    /// Heartbeat sweep and aggregate status.
    pub monitor: Arc<HealthMonitor>,
    /// Lifecycle notifications.
    pub events: EventHub,
}

impl ServerContext {
    /// Wire up the components for `config`.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let config = Arc::new(config);
        let events = EventHub::default();
        let registry = Arc::new(SessionRegistry::with_limit(config.max_clients));
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&registry),
            events.clone(),
            &config,
        ));
        let monitor = Arc::new(HealthMonitor::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&broadcaster),
            events.clone(),
        ));
        Arc::new(Self {
            config,
            registry,
            broadcaster,
            monitor,
            events,
        })
    }
}
