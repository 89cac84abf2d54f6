//! Protocol decode errors.

use thiserror::Error;

/// Failure to turn an inbound frame into an [`Envelope`](crate::Envelope).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON or lacks envelope fields.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The envelope's `type` is known but its `payload` does not match.
    #[error("invalid payload for message type '{message_type}': {source}")]
    InvalidPayload {
        /// The envelope's type tag.
        message_type: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// The frame exceeds the configured maximum size.
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },
}
