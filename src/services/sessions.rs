//! Table of in-progress resumable uploads keyed by session id.

use crate::{
    models::session::ResumableSession,
    services::{
        preconditions::Preconditions,
        version_store::{NewObject, StorageError, StorageResult},
    },
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Exclusive access to one session for the duration of a request.
pub type SessionGuard = OwnedMutexGuard<ResumableSession>;

#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<ResumableSession>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: Duration::seconds(ttl_secs.min(i64::MAX as u64 / 1000) as i64),
        }
    }

    /// Register a new empty session and return its id.
    pub fn create(&self, bucket: &str, object: NewObject, preconditions: Preconditions) -> String {
        let id = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let session = ResumableSession {
            id: id.clone(),
            bucket: bucket.to_string(),
            name: object.name,
            content_type: object.content_type.unwrap_or_default(),
            metadata: object.metadata,
            preconditions,
            received_bytes: 0,
            buffer: Vec::new(),
            created_at: now,
            last_activity: now,
        };
        self.sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        debug!("opened resumable session {}", id);
        id
    }

    /// Take exclusive ownership of a session.
    ///
    /// A session already being worked on by another request is a Conflict;
    /// requests are never queued behind each other.
    pub fn acquire(&self, id: &str) -> StorageResult<SessionGuard> {
        let session = self
            .sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::SessionNotFound(id.to_string()))?;

        let mut guard = session.try_lock_owned().map_err(|_| {
            StorageError::Conflict(format!(
                "upload session `{}` is busy with another request",
                id
            ))
        })?;

        let now = Utc::now();
        if self.is_expired(&guard, now) {
            drop(guard);
            self.sessions.remove(id);
            return Err(StorageError::SessionNotFound(id.to_string()));
        }
        guard.last_activity = now;
        Ok(guard)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    fn is_expired(&self, session: &ResumableSession, now: DateTime<Utc>) -> bool {
        session.last_activity + self.ttl < now
    }

    /// Drop sessions idle for longer than the TTL. Busy sessions are kept.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| match session.try_lock() {
            Ok(session) => !self.is_expired(&session, now),
            Err(_) => true,
        });
        before.saturating_sub(self.sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_exclusive() {
        let store = SessionStore::new(3600);
        let id = store.create("b", NewObject::named("a.bin"), Preconditions::default());

        let first = store.acquire(&id).unwrap();
        assert_eq!(first.name, "a.bin");
        assert!(matches!(store.acquire(&id), Err(StorageError::Conflict(_))));

        drop(first);
        assert!(store.acquire(&id).is_ok());
    }

    #[test]
    fn unknown_session_is_not_found() {
        let store = SessionStore::new(3600);
        assert!(matches!(
            store.acquire("missing"),
            Err(StorageError::SessionNotFound(_))
        ));
    }

    #[test]
    fn purge_drops_idle_sessions_only() {
        let store = SessionStore::new(60);
        let idle = store.create("b", NewObject::named("idle"), Preconditions::default());
        let busy = store.create("b", NewObject::named("busy"), Preconditions::default());

        let _held = store.acquire(&busy).unwrap();
        let later = Utc::now() + Duration::seconds(120);
        assert_eq!(store.purge_expired(later), 1);
        assert_eq!(store.len(), 1);
        assert!(matches!(
            store.acquire(&idle),
            Err(StorageError::SessionNotFound(_))
        ));
    }

    #[test]
    fn expired_session_is_rejected_on_acquire() {
        let store = SessionStore::new(1);
        let id = store.create("b", NewObject::named("a"), Preconditions::default());
        {
            let mut guard = store.acquire(&id).unwrap();
            guard.last_activity = Utc::now() - Duration::seconds(5);
        }
        assert!(store.acquire(&id).is_err());
        assert_eq!(store.len(), 0);
    }
}
