//! In-memory session store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{PlacechatError, Result};
use crate::session::{ChatSession, SessionHandle, SessionStore};

pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

struct Slot {
    handle: SessionHandle,
    last_access: Instant,
}

impl Slot {
    /// A running turn holds a clone of the handle.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.handle) > 1
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access)
    }
}

/// Process-local session store.
///
/// Each session sits behind its own mutex so a long-running turn only blocks
/// other turns on the same id. Sessions idle longer than the TTL are dropped by
/// [`SessionStore::evict_idle`]; when the store is full, creating a session
/// evicts the least recently used one that has no turn in flight.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Slot>>,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_SESSION_IDLE_TTL, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_limits(idle_ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    fn remove_idle(&self, sessions: &mut HashMap<String, Slot>, now: Instant) -> usize {
        let before = sessions.len();
        sessions.retain(|_, slot| slot.in_use() || slot.idle_for(now) <= self.idle_ttl);
        before - sessions.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_or_create(&self, id: &str, app_name: &str, user_id: &str) -> Result<SessionHandle> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        if let Some(slot) = sessions.get_mut(id) {
            slot.last_access = now;
            return Ok(slot.handle.clone());
        }

        if sessions.len() >= self.max_sessions {
            let evicted = self.remove_idle(&mut sessions, now);
            debug!(evicted, "Store full, evicted idle sessions");
        }
        if sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .filter(|(_, slot)| !slot.in_use())
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    sessions.remove(&key);
                    debug!(session_id = %key, "Evicted least recently used session");
                }
                None => {
                    return Err(PlacechatError::Session(format!(
                        "all {} sessions are busy",
                        self.max_sessions
                    )));
                }
            }
        }

        debug!(session_id = %id, %user_id, "Created session");
        let handle = Arc::new(Mutex::new(ChatSession::new(id, app_name, user_id)));
        sessions.insert(
            id.to_string(),
            Slot {
                handle: handle.clone(),
                last_access: now,
            },
        );
        Ok(handle)
    }

    async fn evict_idle(&self) -> Result<usize> {
        let mut sessions = self.sessions.write().await;
        let evicted = self.remove_idle(&mut sessions, Instant::now());
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        Ok(evicted)
    }

    async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TranscriptEntry;
    use crate::types::ContentBlock;

    #[tokio::test]
    async fn test_get_or_create_returns_same_handle() {
        let store = MemorySessionStore::new();
        let a = store.get_or_create("s1", "app", "u1").await.unwrap();
        let b = store.get_or_create("s1", "app", "u1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_transcript_survives_between_turns() {
        let store = MemorySessionStore::new();
        {
            let handle = store.get_or_create("s1", "app", "u1").await.unwrap();
            let mut session = handle.lock().await;
            session.append(TranscriptEntry::User {
                content: vec![ContentBlock::text("hello")],
                timestamp: chrono::Utc::now(),
            });
        }

        let handle = store.get_or_create("s1", "other", "u2").await.unwrap();
        let session = handle.lock().await;
        assert_eq!(session.transcript.len(), 1);
        assert_eq!(session.user_id, "u1");
    }

    #[tokio::test]
    async fn test_evict_idle_skips_sessions_in_use() {
        let store = MemorySessionStore::with_limits(Duration::from_millis(20), 100);
        let busy = store.get_or_create("busy", "app", "u1").await.unwrap();
        drop(store.get_or_create("idle", "app", "u1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.evict_idle().await.unwrap(), 1);
        assert_eq!(store.count().await, 1);

        // The surviving session is the one whose handle is still held.
        let again = store.get_or_create("busy", "app", "u1").await.unwrap();
        assert!(Arc::ptr_eq(&busy, &again));
    }

    #[tokio::test]
    async fn test_recent_sessions_are_not_idle() {
        let store = MemorySessionStore::with_limits(Duration::from_secs(60), 100);
        drop(store.get_or_create("s1", "app", "u1").await.unwrap());
        assert_eq!(store.evict_idle().await.unwrap(), 0);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let store = MemorySessionStore::with_limits(Duration::from_secs(60), 2);
        drop(store.get_or_create("a", "app", "u1").await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(store.get_or_create("b", "app", "u1").await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        // Touch "a" so "b" becomes the oldest.
        let a = store.get_or_create("a", "app", "u1").await.unwrap();
        a.lock().await.append(TranscriptEntry::User {
            content: vec![ContentBlock::text("keep me")],
            timestamp: chrono::Utc::now(),
        });
        drop(a);

        drop(store.get_or_create("c", "app", "u1").await.unwrap());
        assert_eq!(store.count().await, 2);

        let a = store.get_or_create("a", "app", "u1").await.unwrap();
        assert_eq!(a.lock().await.transcript.len(), 1);
    }

    #[tokio::test]
    async fn test_full_store_of_busy_sessions_refuses() {
        let store = MemorySessionStore::with_limits(Duration::from_secs(60), 1);
        let _held = store.get_or_create("a", "app", "u1").await.unwrap();
        let err = store.get_or_create("b", "app", "u1").await.unwrap_err();
        assert!(err.to_string().contains("busy"));
    }
}
