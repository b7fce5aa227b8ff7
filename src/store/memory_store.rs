use async_trait::async_trait;
use cached::{Cached, TimedSizedCache};
use tokio::sync::Mutex;

use super::SessionStore;
use crate::models::QualificationSession;

/// Sessions held in process memory; lost on restart.
///
/// Entries expire `ttl_secs` after they are stored, and once `capacity`
/// sessions are held the least recently used one is dropped.
pub struct InMemorySessionStore {
    sessions: Mutex<TimedSizedCache<String, QualificationSession>>,
}

impl InMemorySessionStore {
    pub fn new(capacity: usize, ttl_secs: u64) -> Self {
        Self {
            sessions: Mutex::new(TimedSizedCache::with_size_and_lifespan(
                capacity.max(1),
                ttl_secs,
            )),
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.cache_size()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn get_name(&self) -> &str {
        "in-memory"
    }

    async fn put_session(&self, session: QualificationSession) -> Result<(), String> {
        self.sessions
            .lock()
            .await
            .cache_set(session.session_token.clone(), session);
        Ok(())
    }

    async fn get_session(&self, session_token: &str) -> Result<Option<QualificationSession>, String> {
        Ok(self
            .sessions
            .lock()
            .await
            .cache_get(session_token)
            .cloned())
    }

    async fn delete_session(&self, session_token: &str) -> Result<bool, String> {
        Ok(self
            .sessions
            .lock()
            .await
            .cache_remove(session_token)
            .is_some())
    }
}
