//! Shared application state.
//!
//! Every component is built once from the loaded configuration and the
//! storage environment snapshot, then shared by reference across handlers.

use std::sync::Arc;

use crate::auth::TokenAuthority;
use crate::config::{ConfigV1, StorageEnv};
use crate::enforcer::StorageEnforcer;
use crate::metrics::Metrics;
use crate::errors::StorageError;
use crate::models::ProviderKind;
use crate::providers::create_provider;
use crate::provisioner::StorageProvisioner;
use crate::qualifier::StorageQualifier;
use crate::storage::{HttpConnector, StoreConnector, UnifiedStorageClient};
use crate::store::{create_session_store, SessionStore};

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration loaded at startup.
    pub config: Arc<ConfigV1>,
    /// The application's own storage (profiles).
    pub storage: Arc<UnifiedStorageClient>,
    pub provisioner: Arc<StorageProvisioner>,
    pub qualifier: Arc<StorageQualifier>,
    pub tokens: Arc<TokenAuthority>,
    pub enforcer: Arc<StorageEnforcer>,
    pub metrics: Metrics,
}

impl AppState {
    /// Production wiring: user buckets are reached over HTTP.
    pub fn new(config: Arc<ConfigV1>, env: &StorageEnv) -> Result<Self, StorageError> {
        let connector: Arc<dyn StoreConnector> = Arc::new(HttpConnector::new(&config.http));
        let sessions = create_session_store(&config.storage);
        Self::with_connector(config, env, connector, sessions)
    }

    /// Wiring with a custom transport for user buckets and a custom session store.
    pub fn with_connector(
        config: Arc<ConfigV1>,
        env: &StorageEnv,
        connector: Arc<dyn StoreConnector>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, StorageError> {
        let storage = Arc::new(UnifiedStorageClient::new(env, &config.storage, &config.http)?);
        Ok(Self::assemble(config, env, connector, sessions, storage))
    }

    /// Like [`AppState::with_connector`] with an already built storage client.
    pub fn assemble(
        config: Arc<ConfigV1>,
        env: &StorageEnv,
        connector: Arc<dyn StoreConnector>,
        sessions: Arc<dyn SessionStore>,
        storage: Arc<UnifiedStorageClient>,
    ) -> Self {
        // users may qualify with either cloud regardless of provisioning order
        let qualification_providers = [ProviderKind::R2, ProviderKind::Gcs]
            .into_iter()
            .map(|kind| create_provider(kind, &config.provisioning, env, &config.http))
            .collect();

        AppState {
            storage,
            provisioner: Arc::new(StorageProvisioner::new(&config.provisioning, env, &config.http)),
            qualifier: Arc::new(StorageQualifier::new(
                qualification_providers,
                connector.clone(),
                sessions,
                config.storage.default_qualification_bucket.clone(),
            )),
            tokens: Arc::new(TokenAuthority::new(connector, config.storage.token_prefix.clone())),
            enforcer: Arc::new(StorageEnforcer::new(env)),
            metrics: Metrics::new(),
            config,
        }
    }
}
