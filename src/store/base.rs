use std::sync::Arc;

use async_trait::async_trait;

use super::memory_store::InMemorySessionStore;
use crate::config::StorageSettings;
use crate::models::QualificationSession;

/// The SessionStore trait abstracts qualification session storage (put, get, delete).
///
/// The bundled implementation is process-local. Running several instances
/// behind a load balancer needs a shared implementation, otherwise a session
/// qualified on one instance is unknown to the others.
#[async_trait]
pub trait SessionStore: Send + Sync {
    fn get_name(&self) -> &str;
    async fn put_session(&self, session: QualificationSession) -> Result<(), String>;
    async fn get_session(&self, session_token: &str) -> Result<Option<QualificationSession>, String>;
    /// Returns whether a session was removed.
    async fn delete_session(&self, session_token: &str) -> Result<bool, String>;
}

/// The default store for a single-process deployment.
pub fn create_session_store(settings: &StorageSettings) -> Arc<dyn SessionStore> {
    Arc::new(InMemorySessionStore::new(
        settings.max_sessions,
        settings.session_ttl_secs,
    ))
}
