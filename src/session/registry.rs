//! Process-wide registry of live debug sessions.
//!
//! Only one session is expected to be active at a time. Starting a new one
//! purges stale entries left behind by sessions that never tore down.
//! Other components (the inspector UI helper) read the active session's
//! runtime endpoint from here.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::session::state::SessionKind;

/// Registry record for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredSession {
    /// Session identifier.
    pub id: String,
    /// Configuration name supplied by the client.
    pub name: Option<String>,
    /// Launch or attach.
    pub kind: SessionKind,
    /// Runtime service endpoint once announced.
    pub service_uri: Option<String>,
    /// When the session registered.
    pub started_at: DateTime<Utc>,
}

impl RegisteredSession {
    /// New record with no endpoint yet.
    #[must_use]
    pub fn new(id: impl Into<String>, name: Option<String>, kind: SessionKind) -> Self {
        Self {
            id: id.into(),
            name,
            kind,
            service_uri: None,
            started_at: Utc::now(),
        }
    }
}

/// Shared session registry; clones refer to the same entries.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    entries: Arc<Mutex<Vec<RegisteredSession>>>,
}

impl SessionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut Vec<RegisteredSession>) -> T) -> T {
        let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Remove every entry, returning how many were purged.
    pub fn clear(&self) -> usize {
        self.with_entries(|entries| {
            let purged = entries.len();
            entries.clear();
            purged
        })
    }

    /// Add `session`, replacing any entry with the same id.
    pub fn register(&self, session: RegisteredSession) {
        debug!(session_id = %session.id, "registering session");
        self.with_entries(|entries| {
            entries.retain(|existing| existing.id != session.id);
            entries.push(session);
        });
    }

    /// Remove the entry for `id`. Returns whether one existed.
    pub fn remove(&self, id: &str) -> bool {
        self.with_entries(|entries| {
            let before = entries.len();
            entries.retain(|existing| existing.id != id);
            before != entries.len()
        })
    }

    /// Record the runtime endpoint of `id`.
    pub fn update_service_uri(&self, id: &str, uri: &str) {
        self.with_entries(|entries| {
            if let Some(entry) = entries.iter_mut().find(|existing| existing.id == id) {
                entry.service_uri = Some(uri.to_owned());
            }
        });
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.with_entries(|entries| entries.iter().any(|existing| existing.id == id))
    }

    /// Most recently registered session.
    #[must_use]
    pub fn active(&self) -> Option<RegisteredSession> {
        self.with_entries(|entries| entries.last().cloned())
    }

    /// Runtime endpoint of the most recent session that has one.
    #[must_use]
    pub fn active_service_uri(&self) -> Option<String> {
        self.with_entries(|entries| {
            entries
                .iter()
                .rev()
                .find_map(|entry| entry.service_uri.clone())
        })
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with_entries(|entries| entries.len())
    }

    /// Whether no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
