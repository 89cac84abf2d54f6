//! # hotreload-server
//!
//! Connection and broadcast core of the hot-reload server.
//!
//! - [`ConnectionServer`](server::ConnectionServer): axum listener, `/health`,
//!   WebSocket upgrade and the per-connection registration handshake
//! - [`SessionRegistry`](websocket::registry::SessionRegistry): the single
//!   authority for who is connected, with a per-platform index
//! - [`Broadcaster`](websocket::broadcast::Broadcaster): filtered fan-out,
//!   realtime (concurrent) or throttled (sequential)
//! - [`HealthMonitor`](monitor::HealthMonitor): periodic heartbeat sweep and
//!   aggregate `connectionStatus`
//! - [`ChangeCoalescer`](coalescer::ChangeCoalescer),
//!   [`FileWatcher`](watcher::FileWatcher) and
//!   [`ChangeRelay`](relay::ChangeRelay): file system → `fileChanged`
//! - [`EventHub`](events::EventHub): fire-and-forget notifications to the
//!   embedding process

#![deny(unsafe_code)]

pub mod coalescer;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod health;
pub mod metrics;
pub mod monitor;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod watcher;
pub mod websocket;

pub use config::{HealthThresholds, ServerConfig};
pub use errors::{Result, ServerError};
pub use events::{EventHub, ServerEvent};
pub use server::ConnectionServer;
