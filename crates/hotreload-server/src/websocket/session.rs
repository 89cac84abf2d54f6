//! One registered client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hotreload_core::protocol::{
    Capability, ClientRegisterPayload, DeviceInfo, PingPayload, Platform,
};
use hotreload_core::{Envelope, Payload, SessionId};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::transport::Transport;
use crate::errors::{Result, ServerError};

/// Server-side handle for one registered client.
///
/// `id` and the registration data never change. `is_active` goes from true
/// to false exactly once, on the first [`disconnect`](Self::disconnect).
pub struct Session {
    id: SessionId,
    platform: Platform,
    client_name: String,
    capabilities: Vec<Capability>,
    device_info: Option<DeviceInfo>,
    transport: Arc<dyn Transport>,
    connected_at: DateTime<Utc>,
    active: AtomicBool,
    last_heartbeat: Mutex<Instant>,
    sequence: AtomicU64,
    /// Sequence and send time of the newest unanswered ping.
    pending_ping: Mutex<Option<(u64, Instant)>>,
    latency: Mutex<Option<Duration>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("platform", &self.platform)
            .field("client_name", &self.client_name)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session from a successful registration.
    pub fn new(
        id: SessionId,
        registration: ClientRegisterPayload,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            id,
            platform: registration.platform,
            client_name: registration.client_name,
            capabilities: registration.capabilities,
            device_info: registration.device_info,
            transport,
            connected_at: Utc::now(),
            active: AtomicBool::new(true),
            last_heartbeat: Mutex::new(Instant::now()),
            sequence: AtomicU64::new(0),
            pending_ping: Mutex::new(None),
            latency: Mutex::new(None),
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Declared platform.
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Declared client name.
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Declared capabilities.
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Whether the client declared `name` and left it enabled.
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.enabled && c.name == name)
    }

    /// Declared device info.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    /// Registration time.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// `false` once disconnected or once the transport has closed.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.transport.is_closed()
    }

    /// Serialize and send an envelope.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let frame = envelope.to_json().map_err(|e| ServerError::SendFailed {
            session_id: self.id.clone(),
            reason: format!("serialize {}: {e}", envelope.message_type()),
        })?;
        self.send_frame(frame.into()).await
    }

    /// Send an already serialized frame.
    ///
    /// Fails fast without touching the transport once the session is inactive.
    pub async fn send_frame(&self, frame: Arc<str>) -> Result<()> {
        if !self.active.load(Ordering::Acquire) {
            return Err(self.send_failed("session disconnected"));
        }
        self.transport
            .send(frame)
            .await
            .map_err(|e| self.send_failed(&e.to_string()))
    }

    /// Send a `ping` with the next sequence number.
    ///
    /// Returns whether the ping was queued. Failures are logged only; a dead
    /// client is detected by the missing pong.
    pub async fn send_heartbeat(&self) -> bool {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let ping = Envelope::new(Payload::Ping(PingPayload { sequence }))
            .with_client_id(self.id.as_str());
        match self.send(&ping).await {
            Ok(()) => {
                *self.pending_ping.lock() = Some((sequence, Instant::now()));
                true
            }
            Err(e) => {
                warn!(session_id = %self.id, sequence, error = %e, "heartbeat send failed");
                false
            }
        }
    }

    /// Record liveness evidence from the client.
    pub fn mark_alive(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    /// Record a pong. Returns the round trip when it answers the newest ping.
    pub fn record_pong(&self, sequence: u64) -> Option<Duration> {
        self.mark_alive();
        let mut pending = self.pending_ping.lock();
        match *pending {
            Some((expected, sent_at)) if expected == sequence => {
                *pending = None;
                let rtt = sent_at.elapsed();
                *self.latency.lock() = Some(rtt);
                debug!(session_id = %self.id, sequence, rtt_ms = rtt.as_millis(), "pong");
                Some(rtt)
            }
            _ => None,
        }
    }

    /// Time since the last pong (or registration).
    pub fn time_since_last_heartbeat(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }

    /// Last measured ping round trip.
    pub fn latency(&self) -> Option<Duration> {
        *self.latency.lock()
    }

    /// Deactivate and close the transport. Only the first call has an effect;
    /// returns whether this call was it.
    pub async fn disconnect(&self, reason: &str) -> bool {
        if self.active.swap(false, Ordering::AcqRel) {
            debug!(session_id = %self.id, reason, "session disconnected");
            self.transport.close(reason).await;
            true
        } else {
            false
        }
    }

    /// Serializable snapshot.
    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id.clone(),
            platform: self.platform,
            client_name: self.client_name.clone(),
            capabilities: self.capabilities.clone(),
            device_info: self.device_info.clone(),
            connected_at: self.connected_at,
            seconds_since_heartbeat: self.time_since_last_heartbeat().as_secs_f64(),
            latency_ms: self.latency().map(|d| d.as_secs_f64() * 1000.0),
            active: self.is_active(),
        }
    }

    fn send_failed(&self, reason: &str) -> ServerError {
        ServerError::SendFailed {
            session_id: self.id.clone(),
            reason: reason.to_owned(),
        }
    }
}

/// Point-in-time view of a session, as returned by
/// [`ConnectionServer::connected_clients`](crate::ConnectionServer::connected_clients).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Session id.
    pub id: SessionId,
    /// Platform.
    pub platform: Platform,
    /// Client name.
    pub client_name: String,
    /// Declared capabilities.
    pub capabilities: Vec<Capability>,
    /// Device info.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    /// Registration time.
    pub connected_at: DateTime<Utc>,
    /// Seconds since the last heartbeat evidence.
    pub seconds_since_heartbeat: f64,
    /// Last ping round trip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    /// Whether the session is active.
    pub active: bool,
}
