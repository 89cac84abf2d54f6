//! # hotreload-core
//!
//! Shared vocabulary for the hot-reload connection core:
//!
//! - **Branded IDs**: [`SessionId`], [`MessageId`] as newtypes for type safety
//! - **Protocol**: [`Envelope`] and the typed [`Payload`] union exchanged with
//!   mobile clients over the WebSocket
//! - **Checksum**: stable content digest attached to `fileChanged` payloads
//! - **Logging**: `tracing` subscriber bootstrap shared by the daemon and tests

#![deny(unsafe_code)]

pub mod checksum;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;

pub use checksum::content_checksum;
pub use errors::ProtocolError;
pub use ids::{MessageId, SessionId};
pub use protocol::{Envelope, Payload, PROTOCOL_VERSION};
