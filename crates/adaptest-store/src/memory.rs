//! In-process session store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use adaptest_core::error::CatError;
use adaptest_core::traits::{SessionStore, StoredSession};

#[derive(Debug, Clone)]
struct Entry {
    stored: StoredSession,
    saved_at: DateTime<Utc>,
}

/// Session store backed by a map, with an optional time-to-live.
///
/// Expired sessions read as absent and are pruned on the next save. Versions
/// come from one store-wide counter, so a session re-created after expiry
/// never reuses a version a stale writer may still hold.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: RwLock<Inner>,
    ttl: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, Entry>,
    last_version: u64,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions not saved within `ttl` are treated as missing.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Entries held, including expired ones not yet pruned.
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }

    fn is_expired(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| now - entry.saved_at > ttl)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, session_id: &str) -> Result<Option<StoredSession>, CatError> {
        let inner = self.inner.read().await;
        let now = Utc::now();
        Ok(inner.sessions.get(session_id).and_then(|entry| {
            if self.is_expired(entry, now) {
                tracing::debug!(session = %session_id, "session expired");
                None
            } else {
                Some(entry.stored.clone())
            }
        }))
    }

    async fn save(
        &self,
        session_id: &str,
        blob: Value,
        expected_version: Option<u64>,
    ) -> Result<u64, CatError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        if self.ttl.is_some() {
            let before = inner.sessions.len();
            inner
                .sessions
                .retain(|_, entry| !self.is_expired(entry, now));
            let pruned = before - inner.sessions.len();
            if pruned > 0 {
                tracing::debug!(pruned, "expired sessions pruned");
            }
        }

        let found = inner
            .sessions
            .get(session_id)
            .map(|entry| entry.stored.version);
        if found != expected_version {
            return Err(CatError::VersionConflict {
                session_id: session_id.to_string(),
                expected: expected_version,
                found,
            });
        }

        inner.last_version += 1;
        let version = inner.last_version;
        inner.sessions.insert(
            session_id.to_string(),
            Entry {
                stored: StoredSession { version, blob },
                saved_at: now,
            },
        );
        Ok(version)
    }

    async fn delete(&self, session_id: &str) -> Result<bool, CatError> {
        Ok(self.inner.write().await.sessions.remove(session_id).is_some())
    }
}
