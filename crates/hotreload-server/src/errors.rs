//! Server error taxonomy.
//!
//! Lifecycle and registry errors are returned to the caller. Protocol errors
//! are additionally sent back to the offending connection as an `error`
//! envelope, see [`ServerError::to_payload`].

use std::collections::BTreeMap;

use hotreload_core::protocol::{ErrorPayload, ErrorType};
use hotreload_core::{ProtocolError, SessionId};
use thiserror::Error;

/// Errors produced by the connection core.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start()` called while not stopped.
    #[error("server is already running")]
    AlreadyRunning,
    /// Operation requires a running server.
    #[error("server is not running")]
    NotRunning,
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A session with this id is already registered.
    #[error("session '{0}' is already registered")]
    DuplicateSession(SessionId),
    /// The registry holds its configured maximum.
    #[error("server is at capacity ({limit} clients)")]
    CapacityReached {
        /// Configured maximum.
        limit: usize,
    },
    /// No session with this id.
    #[error("session '{0}' not found")]
    SessionNotFound(SessionId),
    /// The session exists but has been disconnected.
    #[error("session '{0}' is inactive")]
    SessionInactive(SessionId),
    /// Writing to the session's transport failed.
    #[error("send to session '{session_id}' failed: {reason}")]
    SendFailed {
        /// Target session.
        session_id: SessionId,
        /// Transport-level cause.
        reason: String,
    },
    /// An inbound frame could not be decoded or is not allowed here.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    /// A non-registration message arrived before registration.
    #[error("client must register before sending '{0}'")]
    NotRegistered(String),
    /// Registration was refused.
    #[error("registration failed: {0}")]
    RegistrationFailed(String),
    /// The session missed its heartbeat deadline.
    #[error("session '{0}' timed out")]
    ClientTimeout(SessionId),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        Self::InvalidMessage(err.to_string())
    }
}

impl ServerError {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::NotRunning => "NOT_RUNNING",
            Self::BindFailed { .. } => "BIND_FAILED",
            Self::DuplicateSession(_) => "DUPLICATE_SESSION",
            Self::CapacityReached { .. } => "CAPACITY_REACHED",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionInactive(_) => "SESSION_INACTIVE",
            Self::SendFailed { .. } => "SEND_FAILED",
            Self::InvalidMessage(_) => "INVALID_MESSAGE",
            Self::NotRegistered(_) => "NOT_REGISTERED",
            Self::RegistrationFailed(_) => "REGISTRATION_FAILED",
            Self::ClientTimeout(_) => "CLIENT_TIMEOUT",
        }
    }

    /// Wire error category.
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::AlreadyRunning | Self::NotRunning | Self::BindFailed { .. } => ErrorType::Server,
            Self::DuplicateSession(_) | Self::CapacityReached { .. } | Self::RegistrationFailed(_) => {
                ErrorType::Registration
            }
            Self::SessionNotFound(_)
            | Self::SessionInactive(_)
            | Self::SendFailed { .. }
            | Self::ClientTimeout(_) => ErrorType::Connection,
            Self::InvalidMessage(_) | Self::NotRegistered(_) => ErrorType::Protocol,
        }
    }

    /// Whether the peer may retry the failed operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CapacityReached { .. }
                | Self::SendFailed { .. }
                | Self::InvalidMessage(_)
                | Self::NotRegistered(_)
                | Self::ClientTimeout(_)
        )
    }

    /// Build the `error` payload sent to a client.
    pub fn to_payload(&self) -> ErrorPayload {
        let context = match self {
            Self::NotRegistered(message_type) => {
                Some(BTreeMap::from([("messageType".to_owned(), message_type.clone())]))
            }
            Self::DuplicateSession(id)
            | Self::SessionNotFound(id)
            | Self::SessionInactive(id)
            | Self::ClientTimeout(id)
            | Self::SendFailed { session_id: id, .. } => {
                Some(BTreeMap::from([("sessionId".to_owned(), id.to_string())]))
            }
            _ => None,
        };
        ErrorPayload {
            error_code: self.code().to_owned(),
            error_message: self.to_string(),
            error_type: self.error_type(),
            recoverable: self.is_recoverable(),
            context,
        }
    }
}
