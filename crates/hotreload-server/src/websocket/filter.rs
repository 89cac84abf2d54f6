//! Broadcast target selection.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use hotreload_core::SessionId;
use hotreload_core::protocol::Platform;

use super::session::Session;

type SessionPredicate = dyn Fn(&Session) -> bool + Send + Sync;

/// Which sessions a broadcast reaches.
#[derive(Clone, Default)]
pub enum BroadcastFilter {
    /// Every registered session.
    #[default]
    All,
    /// Sessions of one platform.
    Platform(Platform),
    /// Sessions with one of these ids.
    Ids(HashSet<SessionId>),
    /// Sessions that declared this capability enabled.
    Capability(String),
    /// Sessions whose device model contains this text (case-insensitive).
    DeviceModel(String),
    /// Arbitrary predicate.
    Predicate(Arc<SessionPredicate>),
}

impl BroadcastFilter {
    /// Filter on an explicit id set.
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SessionId>,
    {
        Self::Ids(ids.into_iter().map(Into::into).collect())
    }

    /// Filter with a closure.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Whether `session` is selected.
    pub fn matches(&self, session: &Session) -> bool {
        match self {
            Self::All => true,
            Self::Platform(p) => session.platform() == *p,
            Self::Ids(ids) => ids.contains(session.id()),
            Self::Capability(name) => session.has_capability(name),
            Self::DeviceModel(needle) => session.device_info().is_some_and(|d| {
                d.model
                    .to_lowercase()
                    .contains(&needle.to_lowercase())
            }),
            Self::Predicate(f) => f(session),
        }
    }
}

impl fmt::Debug for BroadcastFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Platform(p) => f.debug_tuple("Platform").field(p).finish(),
            Self::Ids(ids) => f.debug_tuple("Ids").field(&ids.len()).finish(),
            Self::Capability(c) => f.debug_tuple("Capability").field(c).finish(),
            Self::DeviceModel(m) => f.debug_tuple("DeviceModel").field(m).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
