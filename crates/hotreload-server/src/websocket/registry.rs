//! Registered sessions: the single authority for who is connected.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use hotreload_core::SessionId;
use hotreload_core::protocol::Platform;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use tracing::{debug, info};

use super::filter::BroadcastFilter;
use super::session::Session;
use crate::errors::{Result, ServerError};
use crate::metrics::{HEARTBEAT_EVICTIONS_TOTAL, SESSIONS_ACTIVE};

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Arc<Session>>,
    by_platform: HashMap<Platform, HashSet<SessionId>>,
}

impl Inner {
    fn insert(&mut self, session: Arc<Session>) {
        let _ = self
            .by_platform
            .entry(session.platform())
            .or_default()
            .insert(session.id().clone());
        let _ = self.sessions.insert(session.id().clone(), session);
    }

    fn remove(&mut self, id: &SessionId) -> Option<Arc<Session>> {
        let session = self.sessions.remove(id)?;
        if let Some(ids) = self.by_platform.get_mut(&session.platform()) {
            let _ = ids.remove(id);
            if ids.is_empty() {
                let _ = self.by_platform.remove(&session.platform());
            }
        }
        Some(session)
    }
}

/// Result of one [`SessionRegistry::heartbeat_sweep`].
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Removed: inactive, or silent past the timeout.
    pub evicted: Vec<Arc<Session>>,
    /// Kept and pinged successfully.
    pub responsive: Vec<Arc<Session>>,
    /// Kept, but the ping could not be sent.
    pub unresponsive: Vec<Arc<Session>>,
}

impl SweepOutcome {
    /// Sessions still registered after the sweep.
    pub fn remaining(&self) -> usize {
        self.responsive.len() + self.unresponsive.len()
    }
}

/// Concurrency-safe map of session id → [`Session`] with a per-platform
/// index kept in step on every insert and remove.
///
/// The lock is never held across an `.await`: reads clone `Arc`s out and
/// mutations that need I/O (disconnect, ping) happen after release.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    limit: Option<usize>,
}

impl SessionRegistry {
    /// Unbounded registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry refusing sessions beyond `limit`.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: RwLock::default(),
            limit: Some(limit),
        }
    }

    /// Register a session.
    pub fn add_session(&self, session: Arc<Session>) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.sessions.contains_key(session.id()) {
            return Err(ServerError::DuplicateSession(session.id().clone()));
        }
        if let Some(limit) = self.limit {
            if inner.sessions.len() >= limit {
                return Err(ServerError::CapacityReached { limit });
            }
        }
        debug!(session_id = %session.id(), platform = %session.platform(), "session added");
        inner.insert(session);
        gauge!(SESSIONS_ACTIVE).set(as_gauge(inner.sessions.len()));
        Ok(())
    }

    /// Remove a session by id; `None` if absent.
    pub fn remove_session(&self, id: &SessionId) -> Option<Arc<Session>> {
        let mut inner = self.inner.write();
        let removed = inner.remove(id);
        if removed.is_some() {
            gauge!(SESSIONS_ACTIVE).set(as_gauge(inner.sessions.len()));
        }
        removed
    }

    /// Remove `session` only if the entry under its id is this very session.
    pub fn remove_if_same(&self, session: &Arc<Session>) -> bool {
        let mut inner = self.inner.write();
        let same = inner
            .sessions
            .get(session.id())
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if same {
            let _ = inner.remove(session.id());
            gauge!(SESSIONS_ACTIVE).set(as_gauge(inner.sessions.len()));
        }
        same
    }

    /// Look up a session.
    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.read().sessions.get(id).cloned()
    }

    /// Snapshot of every session.
    pub fn all_sessions(&self) -> Vec<Arc<Session>> {
        self.inner.read().sessions.values().cloned().collect()
    }

    /// Registered session count.
    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Registered session count for one platform, from the index.
    pub fn session_count_for(&self, platform: Platform) -> usize {
        self.inner
            .read()
            .by_platform
            .get(&platform)
            .map_or(0, HashSet::len)
    }

    /// Sessions matching `filter`, evaluated on a snapshot.
    ///
    /// Platform and id filters are answered from the indexes; other filters
    /// run outside the lock so predicates may be arbitrarily slow.
    pub fn select_targets(&self, filter: &BroadcastFilter) -> Vec<Arc<Session>> {
        let snapshot: Vec<Arc<Session>> = {
            let inner = self.inner.read();
            match filter {
                BroadcastFilter::Platform(p) => inner
                    .by_platform
                    .get(p)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| inner.sessions.get(id).cloned())
                    .collect(),
                BroadcastFilter::Ids(ids) => ids
                    .iter()
                    .filter_map(|id| inner.sessions.get(id).cloned())
                    .collect(),
                _ => inner.sessions.values().cloned().collect(),
            }
        };
        snapshot.into_iter().filter(|s| filter.matches(s)).collect()
    }

    /// Disconnect every session concurrently and clear the registry.
    /// Returns the sessions that were removed.
    pub async fn disconnect_all(&self, reason: &str) -> Vec<Arc<Session>> {
        let drained: Vec<Arc<Session>> = {
            let mut inner = self.inner.write();
            inner.by_platform.clear();
            inner.sessions.drain().map(|(_, s)| s).collect()
        };
        gauge!(SESSIONS_ACTIVE).set(0.0);
        let count = drained.len();
        let _ = join_all(drained.iter().map(|s| s.disconnect(reason))).await;
        if count > 0 {
            info!(count, reason, "disconnected all sessions");
        }
        drained
    }

    /// Evict inactive or stale sessions, then ping the rest.
    ///
    /// Eviction happens under one write lock before any ping is sent, so a
    /// session selected for removal never receives a ping from this sweep.
    pub async fn heartbeat_sweep(&self, timeout: Duration) -> SweepOutcome {
        let (evicted, survivors) = {
            let mut inner = self.inner.write();
            let stale: Vec<SessionId> = inner
                .sessions
                .values()
                .filter(|s| !s.is_active() || s.time_since_last_heartbeat() > timeout)
                .map(|s| s.id().clone())
                .collect();
            let evicted: Vec<Arc<Session>> =
                stale.iter().filter_map(|id| inner.remove(id)).collect();
            let survivors: Vec<Arc<Session>> = inner.sessions.values().cloned().collect();
            gauge!(SESSIONS_ACTIVE).set(as_gauge(inner.sessions.len()));
            (evicted, survivors)
        };

        for session in &evicted {
            let err = ServerError::ClientTimeout(session.id().clone());
            info!(
                session_id = %session.id(),
                platform = %session.platform(),
                silent_ms = session.time_since_last_heartbeat().as_millis(),
                "{err}, evicting"
            );
        }
        if !evicted.is_empty() {
            counter!(HEARTBEAT_EVICTIONS_TOTAL).increment(evicted.len() as u64);
        }
        let _ = join_all(evicted.iter().map(|s| s.disconnect("heartbeat timeout"))).await;

        let results = join_all(survivors.iter().map(|s| s.send_heartbeat())).await;
        let mut outcome = SweepOutcome {
            evicted,
            ..SweepOutcome::default()
        };
        for (session, sent) in survivors.into_iter().zip(results) {
            if sent {
                outcome.responsive.push(session);
            } else {
                outcome.unresponsive.push(session);
            }
        }
        outcome
    }

    /// Whether the platform index agrees with the primary map.
    pub fn is_consistent(&self) -> bool {
        let inner = self.inner.read();
        let indexed: usize = inner.by_platform.values().map(HashSet::len).sum();
        indexed == inner.sessions.len()
            && inner.by_platform.iter().all(|(platform, ids)| {
                ids.iter().all(|id| {
                    inner
                        .sessions
                        .get(id)
                        .is_some_and(|s| s.platform() == *platform)
                })
            })
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_gauge(n: usize) -> f64 {
    n as f64
}
