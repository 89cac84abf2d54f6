//! Notifications from the connection core to its embedding process.
//!
//! [`EventHub`] wraps a `tokio::sync::broadcast` channel. Emitting never
//! blocks and never fails: with no subscriber the event is dropped, and a
//! subscriber that falls behind sees `RecvError::Lagged` rather than slowing
//! the emitter down.

use std::sync::Arc;

use hotreload_core::protocol::{ConnectionStatus, Platform};
use hotreload_core::{Envelope, SessionId};
use tokio::sync::broadcast;

/// Default channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Something the owner of the server may want to react to.
#[derive(Clone, Debug)]
pub enum ServerEvent {
    /// A client completed registration.
    ClientConnected {
        /// New session.
        session_id: SessionId,
        /// Declared platform.
        platform: Platform,
        /// Declared client name.
        client_name: String,
    },
    /// A registered client went away.
    ClientDisconnected {
        /// Departed session.
        session_id: SessionId,
        /// Why it left.
        reason: String,
    },
    /// A registered client sent a domain message.
    MessageReceived {
        /// Sender.
        session_id: SessionId,
        /// The message as received.
        envelope: Arc<Envelope>,
    },
    /// A broadcast or direct send to one session failed.
    DeliveryFailed {
        /// Target.
        session_id: SessionId,
        /// Cause.
        reason: String,
    },
    /// The aggregate connection status changed.
    StatusChanged {
        /// Previous status.
        previous: ConnectionStatus,
        /// New status.
        current: ConnectionStatus,
        /// Registered sessions at the time of the change.
        client_count: usize,
    },
}

impl ServerEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientConnected { .. } => "client_connected",
            Self::ClientDisconnected { .. } => "client_disconnected",
            Self::MessageReceived { .. } => "message_received",
            Self::DeliveryFailed { .. } => "delivery_failed",
            Self::StatusChanged { .. } => "status_changed",
        }
    }
}

/// Fire-and-forget fan-out of [`ServerEvent`]s.
#[derive(Clone, Debug)]
pub struct EventHub {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventHub {
    /// Create a hub buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event.
    pub fn emit(&self, event: ServerEvent) {
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
