//! Filtered fan-out to registered sessions.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use hotreload_core::protocol::{
    ConnectionStatus, ConnectionStatusPayload, ErrorPayload, FileChangedPayload, StateSyncPayload,
};
use hotreload_core::{Envelope, Payload, SessionId};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::filter::BroadcastFilter;
use super::registry::SessionRegistry;
use super::session::Session;
use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::events::{EventHub, ServerEvent};
use crate::metrics::{BROADCASTS_TOTAL, DELIVERY_FAILURES_TOTAL};

/// Delivery mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Send to every target concurrently.
    Realtime,
    /// Send sequentially with the throttle delay between sends.
    #[default]
    Normal,
    /// Same delivery as `Normal`; for background traffic.
    Low,
}

impl Priority {
    /// Label value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

/// One failed delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Target session.
    pub session_id: SessionId,
    /// Cause.
    pub reason: String,
}

/// Outcome of one broadcast.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions selected by the filter.
    pub targeted: usize,
    /// Successful sends.
    pub delivered: usize,
    /// Failed sends.
    pub failures: Vec<DeliveryFailure>,
}

impl BroadcastReport {
    /// Failed send count.
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Fans envelopes out to sessions selected from a [`SessionRegistry`].
///
/// A broadcast never fails as a whole: per-target errors are counted in the
/// [`BroadcastReport`] and emitted as [`ServerEvent::DeliveryFailed`].
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
    events: EventHub,
    throttle_delay: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Arc<SessionRegistry>, events: EventHub, config: &ServerConfig) -> Self {
        Self {
            registry,
            events,
            throttle_delay: config.throttle_delay,
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay,
        }
    }

    /// Send `envelope` to every session matching `filter`.
    pub async fn broadcast(
        &self,
        envelope: &Envelope,
        filter: &BroadcastFilter,
        priority: Priority,
    ) -> BroadcastReport {
        let targets = self.registry.select_targets(filter);
        let message_type = envelope.message_type();
        counter!(BROADCASTS_TOTAL, "priority" => priority.as_str()).increment(1);

        let frame: Arc<str> = match envelope.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(message_type, error = %e, "failed to serialize broadcast");
                return self.fail_all(&targets, &format!("serialize: {e}"));
            }
        };

        let results: Vec<(SessionId, Result<()>)> = match priority {
            Priority::Realtime => {
                join_all(targets.iter().map(|s| {
                    let frame = frame.clone();
                    async move { (s.id().clone(), s.send_frame(frame).await) }
                }))
                .await
            }
            Priority::Normal | Priority::Low => {
                let mut results = Vec::with_capacity(targets.len());
                for (i, session) in targets.iter().enumerate() {
                    if i > 0 && !self.throttle_delay.is_zero() {
                        tokio::time::sleep(self.throttle_delay).await;
                    }
                    results.push((session.id().clone(), session.send_frame(frame.clone()).await));
                }
                results
            }
        };

        let mut report = BroadcastReport {
            targeted: targets.len(),
            ..BroadcastReport::default()
        };
        for (session_id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => self.record_failure(&mut report, session_id, &e),
            }
        }
        debug!(
            message_type,
            priority = priority.as_str(),
            targeted = report.targeted,
            delivered = report.delivered,
            failed = report.failed(),
            "broadcast complete"
        );
        report
    }

    /// Send `envelope` to one session.
    ///
    /// Unknown or inactive sessions fail immediately. Transport failures are
    /// retried `retry_attempts` times, `retry_delay` apart, except at
    /// [`Priority::Realtime`] where a late retry would deliver stale data.
    pub async fn send_to(
        &self,
        envelope: &Envelope,
        session_id: &str,
        priority: Priority,
    ) -> Result<()> {
        let session = self
            .registry
            .get_session(session_id)
            .ok_or_else(|| ServerError::SessionNotFound(SessionId::from(session_id)))?;
        if !session.is_active() {
            return Err(ServerError::SessionInactive(session.id().clone()));
        }

        let attempts = match priority {
            Priority::Realtime => 1,
            Priority::Normal | Priority::Low => self.retry_attempts.saturating_add(1),
        };
        let mut attempt = 1;
        loop {
            match session.send(envelope).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts && session.is_active() => {
                    debug!(session_id, attempt, error = %e, "direct send failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    counter!(DELIVERY_FAILURES_TOTAL).increment(1);
                    self.events.emit(ServerEvent::DeliveryFailed {
                        session_id: session.id().clone(),
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
    }

    /// Broadcast a `fileChanged`.
    pub async fn file_changed(
        &self,
        payload: FileChangedPayload,
        filter: &BroadcastFilter,
        priority: Priority,
    ) -> BroadcastReport {
        let env = Envelope::new(Payload::FileChanged(payload));
        self.broadcast(&env, filter, priority).await
    }

    /// Broadcast a `stateSync`.
    pub async fn state_sync(
        &self,
        payload: StateSyncPayload,
        filter: &BroadcastFilter,
        priority: Priority,
    ) -> BroadcastReport {
        let env = Envelope::new(Payload::StateSync(payload));
        self.broadcast(&env, filter, priority).await
    }

    /// Broadcast an `error`.
    pub async fn error(&self, payload: ErrorPayload, filter: &BroadcastFilter) -> BroadcastReport {
        let env = Envelope::new(Payload::Error(payload));
        self.broadcast(&env, filter, Priority::Realtime).await
    }

    /// Broadcast a `connectionStatus` to everyone.
    pub async fn connection_status(
        &self,
        status: ConnectionStatus,
        client_count: usize,
        server_load: Option<f64>,
    ) -> BroadcastReport {
        let env = Envelope::new(Payload::ConnectionStatus(ConnectionStatusPayload {
            status,
            client_count,
            server_load,
        }));
        self.broadcast(&env, &BroadcastFilter::All, Priority::Realtime)
            .await
    }

    fn fail_all(&self, targets: &[Arc<Session>], reason: &str) -> BroadcastReport {
        let mut report = BroadcastReport {
            targeted: targets.len(),
            ..BroadcastReport::default()
        };
        for s in targets {
            let err = ServerError::SendFailed {
                session_id: s.id().clone(),
                reason: reason.to_owned(),
            };
            self.record_failure(&mut report, s.id().clone(), &err);
        }
        report
    }

    fn record_failure(&self, report: &mut BroadcastReport, session_id: SessionId, err: &ServerError) {
        counter!(DELIVERY_FAILURES_TOTAL).increment(1);
        let reason = err.to_string();
        debug!(session_id = %session_id, %reason, "delivery failed");
        self.events.emit(ServerEvent::DeliveryFailed {
            session_id: session_id.clone(),
            reason: reason.clone(),
        });
        report.failures.push(DeliveryFailure { session_id, reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::testing::{channel_session, failing_session};
    use assert_matches::assert_matches;
    use hotreload_core::protocol::{ChangeType, Platform};

    fn broadcaster(registry: Arc<SessionRegistry>, events: EventHub) -> Broadcaster {
        let config = ServerConfig {
            throttle_delay: Duration::from_millis(10),
            retry_attempts: 2,
            retry_delay: Duration::from_millis(100),
            ..ServerConfig::default()
        };
        Broadcaster::new(registry, events, &config)
    }

    fn file_changed() -> Envelope {
        Envelope::new(Payload::FileChanged(FileChangedPayload::new(
            "/src/App.swift",
            "struct App {}".into(),
            ChangeType::Modified,
        )))
    }

    #[tokio::test]
    async fn partial_failure_is_counted_not_raised() {
        let registry = Arc::new(SessionRegistry::new());
        let mut receivers = Vec::new();
        for i in 0..5 {
            let (s, rx) = channel_session(&format!("ok-{i}"), Platform::Ios);
            receivers.push(rx);
            registry.add_session(s).unwrap();
        }
        for i in 0..3 {
            registry
                .add_session(failing_session(&format!("bad-{i}"), Platform::Ios))
                .unwrap();
        }
        let hub = EventHub::default();
        let mut events = hub.subscribe();
        let b = broadcaster(registry, hub);

        for priority in [Priority::Realtime, Priority::Normal] {
            let report = b.broadcast(&file_changed(), &BroadcastFilter::All, priority).await;
            assert_eq!(report.targeted, 8);
            assert_eq!(report.delivered, 5);
            assert_eq!(report.failed(), 3);
            assert!(report.failures.iter().all(|f| f.session_id.starts_with("bad-")));
        }

        let mut failures = 0;
        while let Ok(ev) = events.try_recv() {
            assert_matches!(ev, ServerEvent::DeliveryFailed { .. });
            failures += 1;
        }
        assert_eq!(failures, 6);
        for rx in &mut receivers {
            assert!(rx.try_recv().is_ok());
        }
    }

    #[tokio::test]
    async fn platform_filter_limits_delivery() {
        let registry = Arc::new(SessionRegistry::new());
        let (ios, mut ios_rx) = channel_session("ios", Platform::Ios);
        let (android, mut android_rx) = channel_session("android", Platform::Android);
        registry.add_session(ios).unwrap();
        registry.add_session(android).unwrap();
        let b = broadcaster(registry, EventHub::default());

        let report = b
            .broadcast(&file_changed(), &BroadcastFilter::Platform(Platform::Ios), Priority::Realtime)
            .await;
        assert_eq!(report.delivered, 1);
        assert!(ios_rx.try_recv().is_ok());
        assert!(android_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_broadcast_spaces_sends() {
        let registry = Arc::new(SessionRegistry::new());
        let mut receivers = Vec::new();
        for i in 0..4 {
            let (s, rx) = channel_session(&i.to_string(), Platform::Android);
            receivers.push(rx);
            registry.add_session(s).unwrap();
        }
        let b = broadcaster(registry, EventHub::default());

        let started = tokio::time::Instant::now();
        let _ = b.broadcast(&file_changed(), &BroadcastFilter::All, Priority::Low).await;
        assert_eq!(started.elapsed(), Duration::from_millis(30));

        let started = tokio::time::Instant::now();
        let _ = b.broadcast(&file_changed(), &BroadcastFilter::All, Priority::Realtime).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn empty_target_set_is_not_an_error() {
        let b = broadcaster(Arc::new(SessionRegistry::new()), EventHub::default());
        let report = b
            .connection_status(ConnectionStatus::Disconnected, 0, Some(0.0))
            .await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn send_to_unknown_and_inactive() {
        let registry = Arc::new(SessionRegistry::new());
        let (s, _rx) = channel_session("s", Platform::Ios);
        registry.add_session(s.clone()).unwrap();
        let b = broadcaster(registry, EventHub::default());

        assert_matches!(
            b.send_to(&file_changed(), "nope", Priority::Normal).await,
            Err(ServerError::SessionNotFound(_))
        );
        assert!(b.send_to(&file_changed(), "s", Priority::Normal).await.is_ok());

        let _ = s.disconnect("gone").await;
        assert_matches!(
            b.send_to(&file_changed(), "s", Priority::Normal).await,
            Err(ServerError::SessionInactive(_))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_to_retries_before_failing() {
        let registry = Arc::new(SessionRegistry::new());
        registry.add_session(failing_session("f", Platform::Ios)).unwrap();
        let hub = EventHub::default();
        let mut events = hub.subscribe();
        let b = broadcaster(registry, hub);

        let started = tokio::time::Instant::now();
        let result = b.send_to(&file_changed(), "f", Priority::Normal).await;
        assert_matches!(result, Err(ServerError::SendFailed { .. }));
        // 3 attempts, 2 pauses
        assert_eq!(started.elapsed(), Duration::from_millis(200));
        assert_matches!(events.try_recv(), Ok(ServerEvent::DeliveryFailed { .. }));

        let started = tokio::time::Instant::now();
        let _ = b.send_to(&file_changed(), "f", Priority::Realtime).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn convenience_builders_set_message_type() {
        let registry = Arc::new(SessionRegistry::new());
        let (s, mut rx) = channel_session("s", Platform::Ios);
        registry.add_session(s).unwrap();
        let b = broadcaster(registry, EventHub::default());

        let _ = b
            .state_sync(
                StateSyncPayload {
                    state_data: serde_json::Map::new(),
                    file_name: "App.swift".into(),
                    operation: hotreload_core::protocol::StateOperation::Preserve,
                },
                &BroadcastFilter::All,
                Priority::Realtime,
            )
            .await;
        let _ = b
            .error(
                ServerError::InvalidMessage("x".into()).to_payload(),
                &BroadcastFilter::All,
            )
            .await;
        let _ = b.connection_status(ConnectionStatus::Connected, 1, Some(0.02)).await;

        let types: Vec<String> = (0..3)
            .map(|_| {
                let frame = rx.try_recv().unwrap();
                Envelope::from_json(&frame).unwrap().message_type().to_owned()
            })
            .collect();
        assert_eq!(types, vec!["stateSync", "error", "connectionStatus"]);
    }
}
