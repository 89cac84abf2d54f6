//! WebSocket sessions, registry, broadcast, and per-connection handling.

pub mod broadcast;
pub mod connection;
pub mod filter;
pub mod handler;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
