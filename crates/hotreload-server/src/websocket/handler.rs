//! Inbound frame dispatch for one connection.
//!
//! A connection starts anonymous. The first accepted frame must be a
//! `clientRegister`; anything else gets a `NOT_REGISTERED` error and the
//! connection stays open and anonymous. After registration, ping/pong and
//! `connectionClose` are handled here and every other message is handed to
//! the owner through the [`EventHub`](crate::events::EventHub).

use std::sync::Arc;

use chrono::Utc;
use hotreload_core::protocol::{
    CapabilityNegotiationPayload, ClientRegisterPayload, ConnectionClosePayload, PingPayload,
    PongPayload,
};
use hotreload_core::{Envelope, Payload, SessionId};
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use super::session::Session;
use super::transport::Transport;
use crate::context::ServerContext;
use crate::errors::ServerError;
use crate::events::ServerEvent;
use crate::metrics::{HEARTBEAT_LATENCY_SECONDS, PROTOCOL_ERRORS_TOTAL, REGISTRATIONS_REJECTED_TOTAL};

/// What the read loop should do after a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading.
    Continue,
    /// Stop reading and tear the connection down.
    Close,
}

/// Per-connection protocol state.
pub struct ConnectionHandler {
    ctx: Arc<ServerContext>,
    transport: Arc<dyn Transport>,
    session: Option<Arc<Session>>,
}

impl ConnectionHandler {
    /// Anonymous handler writing through `transport`.
    pub fn new(ctx: Arc<ServerContext>, transport: Arc<dyn Transport>) -> Self {
        Self {
            ctx,
            transport,
            session: None,
        }
    }

    /// The registered session, once the handshake has completed.
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Decode and dispatch one text frame.
    pub async fn handle_frame(&mut self, frame: &str) -> Flow {
        let envelope = match Envelope::from_json_limited(frame, self.ctx.config.max_message_size) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "rejecting undecodable frame");
                self.reply_error(&ServerError::from(e)).await;
                return Flow::Continue;
            }
        };
        match self.session.clone() {
            None => self.handle_anonymous(envelope).await,
            Some(session) => self.handle_registered(&session, envelope).await,
        }
    }

    async fn handle_anonymous(&mut self, envelope: Envelope) -> Flow {
        match envelope.payload {
            Payload::ClientRegister(registration) => {
                self.register(envelope.client_id, registration).await
            }
            other => {
                let err = ServerError::NotRegistered(other.message_type().to_owned());
                self.reply_error(&err).await;
                Flow::Continue
            }
        }
    }

    async fn register(&mut self, client_id: Option<String>, registration: ClientRegisterPayload) -> Flow {
        let id = client_id
            .filter(|id| !id.trim().is_empty())
            .map_or_else(SessionId::new, SessionId::from);
        let session = Arc::new(Session::new(
            id.clone(),
            registration,
            Arc::clone(&self.transport),
        ));

        if let Err(e) = self.ctx.registry.add_session(Arc::clone(&session)) {
            counter!(REGISTRATIONS_REJECTED_TOTAL, "code" => e.code()).increment(1);
            warn!(session_id = %id, error = %e, "registration rejected");
            let err = ServerError::RegistrationFailed(e.to_string());
            self.reply_error(&err).await;
            self.transport.close(&err.to_string()).await;
            return Flow::Close;
        }
        let _ = tracing::Span::current().record("session_id", id.as_str());

        let ack = Envelope::new(Payload::CapabilityNegotiation(CapabilityNegotiationPayload {
            supported_capabilities: self.ctx.config.negotiate(session.capabilities()),
            recommended_settings: self.ctx.config.recommended_settings(),
        }))
        .with_client_id(id.as_str());
        if let Err(e) = session.send(&ack).await {
            warn!(session_id = %id, error = %e, "failed to acknowledge registration");
        }

        info!(
            session_id = %id,
            platform = %session.platform(),
            client_name = session.client_name(),
            "client registered"
        );
        self.ctx.events.emit(ServerEvent::ClientConnected {
            session_id: id,
            platform: session.platform(),
            client_name: session.client_name().to_owned(),
        });
        self.session = Some(session);
        Flow::Continue
    }

    async fn handle_registered(&mut self, session: &Arc<Session>, envelope: Envelope) -> Flow {
        match envelope.payload {
            Payload::Ping(PingPayload { sequence }) => {
                session.mark_alive();
                let pong = Envelope::new(Payload::Pong(PongPayload {
                    sequence,
                    server_timestamp: Utc::now(),
                }))
                .with_client_id(session.id().as_str());
                if let Err(e) = session.send(&pong).await {
                    debug!(session_id = %session.id(), error = %e, "pong send failed");
                }
                Flow::Continue
            }
            Payload::Pong(PongPayload { sequence, .. }) => {
                if let Some(rtt) = session.record_pong(sequence) {
                    histogram!(HEARTBEAT_LATENCY_SECONDS).record(rtt.as_secs_f64());
                }
                Flow::Continue
            }
            Payload::ConnectionClose(ConnectionClosePayload { reason }) => {
                let reason = reason.unwrap_or_else(|| "client closed connection".to_owned());
                self.finish(&reason).await;
                Flow::Close
            }
            Payload::ClientRegister(_) => {
                let err = ServerError::InvalidMessage(format!(
                    "session '{}' is already registered",
                    session.id()
                ));
                self.reply_error(&err).await;
                Flow::Continue
            }
            _ => {
                debug!(
                    session_id = %session.id(),
                    message_type = envelope.message_type(),
                    "forwarding message"
                );
                self.ctx.events.emit(ServerEvent::MessageReceived {
                    session_id: session.id().clone(),
                    envelope: Arc::new(envelope),
                });
                Flow::Continue
            }
        }
    }

    /// Tear down the registered session, if any.
    ///
    /// Only the handler that still owns the registry entry announces the
    /// disconnect; a session already evicted by the health monitor was
    /// announced there.
    pub async fn finish(&mut self, reason: &str) {
        let Some(session) = self.session.take() else {
            return;
        };
        let removed = self.ctx.registry.remove_if_same(&session);
        let _ = session.disconnect(reason).await;
        if removed {
            info!(session_id = %session.id(), reason, "client disconnected");
            self.ctx.events.emit(ServerEvent::ClientDisconnected {
                session_id: session.id().clone(),
                reason: reason.to_owned(),
            });
        }
    }

    /// Send an `error` envelope on this connection.
    pub async fn reply_error(&self, err: &ServerError) {
        counter!(PROTOCOL_ERRORS_TOTAL, "code" => err.code()).increment(1);
        let mut envelope = Envelope::new(Payload::Error(err.to_payload()));
        if let Some(session) = &self.session {
            envelope = envelope.with_client_id(session.id().as_str());
        }
        match envelope.to_json() {
            Ok(json) => {
                if let Err(e) = self.transport.send(json.into()).await {
                    debug!(code = err.code(), error = %e, "error reply not delivered");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize error reply"),
        }
    }
}
