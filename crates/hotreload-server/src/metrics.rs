//! Metric names recorded through the `metrics` facade.
//!
//! The crate only records; installing a recorder/exporter is the embedding
//! process's concern.

/// Upgraded WebSocket connections (counter).
pub const CONNECTIONS_TOTAL: &str = "hotreload_connections_total";
/// Open WebSocket connections, registered or not (gauge).
pub const CONNECTIONS_ACTIVE: &str = "hotreload_connections_active";
/// Connection lifetime in seconds (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "hotreload_connection_duration_seconds";
/// Registered sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "hotreload_sessions_active";
/// Refused registrations (counter, labels: reason).
pub const REGISTRATIONS_REJECTED_TOTAL: &str = "hotreload_registrations_rejected_total";
/// Protocol errors sent back to clients (counter, labels: code).
pub const PROTOCOL_ERRORS_TOTAL: &str = "hotreload_protocol_errors_total";
/// Broadcast calls (counter, labels: priority).
pub const BROADCASTS_TOTAL: &str = "hotreload_broadcasts_total";
/// Per-session delivery failures (counter).
pub const DELIVERY_FAILURES_TOTAL: &str = "hotreload_delivery_failures_total";
/// Sessions evicted by the heartbeat sweep (counter).
pub const HEARTBEAT_EVICTIONS_TOTAL: &str = "hotreload_heartbeat_evictions_total";
/// Ping → pong round trip in seconds (histogram).
pub const HEARTBEAT_LATENCY_SECONDS: &str = "hotreload_heartbeat_latency_seconds";
/// Health checks run (counter, labels: status).
pub const HEALTH_CHECKS_TOTAL: &str = "hotreload_health_checks_total";
/// File-system events absorbed by debouncing (counter).
pub const FILE_CHANGES_COALESCED_TOTAL: &str = "hotreload_file_changes_coalesced_total";
/// `fileChanged` broadcasts published (counter).
pub const FILE_CHANGES_PUBLISHED_TOTAL: &str = "hotreload_file_changes_published_total";
