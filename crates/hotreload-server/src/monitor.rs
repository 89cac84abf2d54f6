//! Periodic heartbeat sweep and aggregate connection status.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hotreload_core::SessionId;
use hotreload_core::protocol::{ConnectionStatus, Platform};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{HealthThresholds, ServerConfig};
use crate::errors::{Result, ServerError};
use crate::events::{EventHub, ServerEvent};
use crate::metrics::HEALTH_CHECKS_TOTAL;
use crate::websocket::broadcast::Broadcaster;
use crate::websocket::registry::{SessionRegistry, SweepOutcome};
use crate::websocket::session::Session;

/// Derive the fleet status from the sessions a sweep left registered.
///
/// `total == 0` is `disconnected`; otherwise the ratio `healthy / total` is
/// compared against the thresholds. Evicted sessions are not part of `total`.
pub fn derive_status(healthy: usize, total: usize, thresholds: HealthThresholds) -> ConnectionStatus {
    if total == 0 {
        return ConnectionStatus::Disconnected;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = healthy as f64 / total as f64;
    if ratio >= thresholds.healthy {
        ConnectionStatus::Connected
    } else if ratio >= thresholds.degraded {
        ConnectionStatus::Reconnecting
    } else {
        ConnectionStatus::Error
    }
}

/// Counts for one platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformCounts {
    /// Still registered after the sweep.
    pub total: usize,
    /// Pinged successfully.
    pub healthy: usize,
    /// Kept, but the ping could not be sent.
    pub unhealthy: usize,
    /// Removed by the sweep.
    pub evicted: usize,
}

/// Read model recomputed by every health check.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetrics {
    /// Sessions still registered after the sweep.
    pub total: usize,
    /// Pinged successfully.
    pub healthy: usize,
    /// Kept, but the ping could not be sent.
    pub unhealthy: usize,
    /// Removed by the sweep.
    pub evicted: usize,
    /// Per-platform split.
    pub by_platform: BTreeMap<Platform, PlatformCounts>,
    /// Mean of the last measured ping round trips.
    pub average_latency_ms: Option<f64>,
    /// Seconds since the monitor started.
    pub uptime_secs: u64,
    /// When the check ran.
    pub last_check: DateTime<Utc>,
}

/// Outcome of one health check.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Status derived from this check.
    pub status: ConnectionStatus,
    /// Counts.
    pub metrics: ConnectionMetrics,
    /// Sessions removed by this check.
    pub evicted: Vec<SessionId>,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs the heartbeat sweep on a timer and publishes `connectionStatus`
/// whenever the derived status changes.
pub struct HealthMonitor {
    registry: Arc<SessionRegistry>,
    broadcaster: Arc<Broadcaster>,
    events: EventHub,
    interval: Duration,
    timeout: Duration,
    thresholds: HealthThresholds,
    max_clients: usize,
    status: watch::Sender<ConnectionStatus>,
    started_at: Mutex<Option<Instant>>,
    last_report: Mutex<Option<HealthReport>>,
    running: Mutex<Option<Running>>,
}

impl HealthMonitor {
    /// Create a stopped monitor.
    pub fn new(
        config: &ServerConfig,
        registry: Arc<SessionRegistry>,
        broadcaster: Arc<Broadcaster>,
        events: EventHub,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            registry,
            broadcaster,
            events,
            interval: config.heartbeat_interval,
            timeout: config.heartbeat_timeout,
            thresholds: config.thresholds,
            max_clients: config.max_clients.max(1),
            status,
            started_at: Mutex::new(None),
            last_report: Mutex::new(None),
            running: Mutex::new(None),
        }
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Report from the most recent check.
    pub fn last_report(&self) -> Option<HealthReport> {
        self.last_report.lock().clone()
    }

    /// Whether the timer is running.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Start the periodic check. Returns `false` if already running.
    ///
    /// Status is set to `connected` immediately and corrected by the first
    /// check one interval later.
    pub async fn start(self: &Arc<Self>) -> bool {
        {
            let mut running = self.running.lock();
            if running.is_some() {
                return false;
            }
            let cancel = CancellationToken::new();
            let monitor = Arc::clone(self);
            let token = cancel.clone();
            let task = tokio::spawn(async move { monitor.run(token).await });
            *running = Some(Running { cancel, task });
        }
        *self.started_at.lock() = Some(Instant::now());
        info!(interval = ?self.interval, timeout = ?self.timeout, "health monitor started");
        self.update_status(ConnectionStatus::Connected).await;
        true
    }

    /// Stop the periodic check and wait for it to finish. Returns `false` if
    /// it was not running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().take() else {
            return false;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "health monitor task failed");
            }
        }
        *self.started_at.lock() = None;
        self.update_status(ConnectionStatus::Disconnected).await;
        info!("health monitor stopped");
        true
    }

    #[instrument(skip_all, name = "health_monitor")]
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = self.run_check().await;
                }
            }
        }
    }

    /// Run one sweep now, update the status and return the report.
    pub async fn run_check(&self) -> HealthReport {
        let outcome = self.registry.heartbeat_sweep(self.timeout).await;
        let report = self.build_report(&outcome);
        counter!(HEALTH_CHECKS_TOTAL, "status" => report.status.to_string()).increment(1);
        debug!(
            status = %report.status,
            total = report.metrics.total,
            healthy = report.metrics.healthy,
            evicted = report.evicted.len(),
            "health check"
        );
        for session in &outcome.evicted {
            self.events.emit(ServerEvent::ClientDisconnected {
                session_id: session.id().clone(),
                reason: ServerError::ClientTimeout(session.id().clone()).to_string(),
            });
        }
        *self.last_report.lock() = Some(report.clone());
        self.update_status(report.status).await;
        report
    }

    /// Evict one session now.
    pub async fn force_reconnect_client(&self, id: &str, reason: &str) -> Result<()> {
        let session = self
            .registry
            .remove_session(&SessionId::from(id))
            .ok_or_else(|| ServerError::SessionNotFound(SessionId::from(id)))?;
        let _ = session.disconnect(reason).await;
        info!(session_id = id, reason, "forced reconnect");
        self.events.emit(ServerEvent::ClientDisconnected {
            session_id: session.id().clone(),
            reason: reason.to_owned(),
        });
        let count = self.registry.session_count();
        if count == 0 {
            self.update_status(ConnectionStatus::Disconnected).await;
        } else {
            let _ = self
                .broadcaster
                .connection_status(self.status(), count, Some(self.load(count)))
                .await;
        }
        Ok(())
    }

    /// Evict every session now. Returns how many were removed.
    pub async fn force_reconnect_all(&self, reason: &str) -> usize {
        let removed = self.registry.disconnect_all(reason).await;
        for session in &removed {
            self.events.emit(ServerEvent::ClientDisconnected {
                session_id: session.id().clone(),
                reason: reason.to_owned(),
            });
        }
        info!(count = removed.len(), reason, "forced reconnect of all sessions");
        self.update_status(ConnectionStatus::Disconnected).await;
        removed.len()
    }

    fn build_report(&self, outcome: &SweepOutcome) -> HealthReport {
        let mut by_platform: BTreeMap<Platform, PlatformCounts> = BTreeMap::new();
        let mut tally = |sessions: &[Arc<Session>], bucket: fn(&mut PlatformCounts)| {
            for s in sessions {
                bucket(by_platform.entry(s.platform()).or_default());
            }
        };
        tally(&outcome.responsive, |c| {
            c.total += 1;
            c.healthy += 1;
        });
        tally(&outcome.unresponsive, |c| {
            c.total += 1;
            c.unhealthy += 1;
        });
        tally(&outcome.evicted, |c| c.evicted += 1);

        let latencies: Vec<Duration> = outcome
            .responsive
            .iter()
            .chain(&outcome.unresponsive)
            .filter_map(|s| s.latency())
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let average_latency_ms = (!latencies.is_empty()).then(|| {
            latencies.iter().map(|d| d.as_secs_f64() * 1000.0).sum::<f64>()
                / latencies.len() as f64
        });

        let healthy = outcome.responsive.len();
        let total = outcome.remaining();
        let uptime_secs = self
            .started_at
            .lock()
            .map_or(0, |t| t.elapsed().as_secs());

        HealthReport {
            status: derive_status(healthy, total, self.thresholds),
            metrics: ConnectionMetrics {
                total,
                healthy,
                unhealthy: outcome.unresponsive.len(),
                evicted: outcome.evicted.len(),
                by_platform,
                average_latency_ms,
                uptime_secs,
                last_check: Utc::now(),
            },
            evicted: outcome.evicted.iter().map(|s| s.id().clone()).collect(),
        }
    }

    fn load(&self, count: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let load = count as f64 / self.max_clients as f64;
        load.clamp(0.0, 1.0)
    }

    /// Publish `next` if it differs from the current status.
    async fn update_status(&self, next: ConnectionStatus) {
        let previous = self.status.send_replace(next);
        if previous == next {
            return;
        }
        let client_count = self.registry.session_count();
        info!(%previous, current = %next, client_count, "connection status changed");
        self.events.emit(ServerEvent::StatusChanged {
            previous,
            current: next,
            client_count,
        });
        let _ = self
            .broadcaster
            .connection_status(next, client_count, Some(self.load(client_count)))
            .await;
    }
}
