//! Wire protocol exchanged with mobile clients.
//!
//! Every frame is one JSON [`Envelope`]:
//!
//! ```text
//! { "type": "fileChanged", "timestamp": "2026-…Z", "messageId": "…",
//!   "clientId": "…"?, "platform": "ios"?, "version": "1.0.0",
//!   "payload": { … } }
//! ```
//!
//! `type` selects the [`Payload`] variant. Types the server does not model are
//! kept as [`Payload::Other`] so they can be forwarded untouched.

mod envelope;
pub mod payloads;

pub use envelope::{Envelope, Payload};
pub use payloads::{
    Capability, CapabilityNegotiationPayload, ChangeType, ClientRegisterPayload,
    ConnectionClosePayload, ConnectionStatus, ConnectionStatusPayload, DeviceInfo, ErrorPayload,
    ErrorType, FileChangedPayload, PingPayload, Platform, PongPayload, RecommendedSettings,
    ScreenMetrics, StateOperation, StateSyncPayload,
};

/// Protocol version stamped on every outbound envelope.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Wire `type` tags.
pub mod message_types {
    /// A watched file changed.
    pub const FILE_CHANGED: &str = "fileChanged";
    /// Application state sync.
    pub const STATE_SYNC: &str = "stateSync";
    /// Client registration.
    pub const CLIENT_REGISTER: &str = "clientRegister";
    /// Liveness probe.
    pub const PING: &str = "ping";
    /// Liveness answer.
    pub const PONG: &str = "pong";
    /// Error report.
    pub const ERROR: &str = "error";
    /// Aggregate connection status.
    pub const CONNECTION_STATUS: &str = "connectionStatus";
    /// Registration acknowledgement.
    pub const CAPABILITY_NEGOTIATION: &str = "capabilityNegotiation";
    /// Orderly goodbye.
    pub const CONNECTION_CLOSE: &str = "connectionClose";
}
