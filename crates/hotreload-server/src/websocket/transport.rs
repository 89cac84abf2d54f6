//! Outbound half of a client connection.
//!
//! Sessions write through the [`Transport`] trait so the registry and
//! broadcaster can be exercised without sockets. [`ChannelTransport`] is the
//! production implementation: a bounded queue drained by the socket writer
//! task in [`connection`](super::connection).

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Why a frame could not be queued.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is closed or closing.
    #[error("connection closed")]
    Closed,
    /// The outbound queue is full (client not reading).
    #[error("send queue full")]
    Full,
    /// Any other transport-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Ordered, reliable, message-framed outbound channel to one client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue one text frame.
    async fn send(&self, frame: Arc<str>) -> Result<(), TransportError>;

    /// Close the channel. Frames already queued are still flushed.
    async fn close(&self, reason: &str);

    /// Whether the channel is closed or closing.
    fn is_closed(&self) -> bool;
}

/// Bounded-queue transport.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Arc<str>>,
    closed: CancellationToken,
    close_reason: Mutex<Option<String>>,
}

impl ChannelTransport {
    /// Create a transport and the receiver its writer task drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let transport = Self {
            tx,
            closed: CancellationToken::new(),
            close_reason: Mutex::new(None),
        };
        (transport, rx)
    }

    /// Resolves once [`Transport::close`] has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Reason passed to the first `close` call.
    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().clone()
    }

    fn mark_closed(&self, reason: &str) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason.to_owned());
            }
        }
        self.closed.cancel();
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, frame: Arc<str>) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Full,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    async fn close(&self, reason: &str) {
        self.mark_closed(reason);
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}
