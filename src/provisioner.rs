//! Per-user storage provisioning across the configured providers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::{HttpConfig, ProvisioningConfig, StorageEnv};
use crate::errors::StorageError;
use crate::models::{ProviderKind, StorageConfig};
use crate::providers::{bucket_name_for, create_provider, SharedBucketProvider, StorageProvider};

pub struct StorageProvisioner {
    /// Tried in order by [`StorageProvisioner::auto_provision_storage`].
    strategies: Vec<Arc<dyn StorageProvider>>,
    shared: SharedBucketProvider,
    bucket_prefix: String,
}

impl StorageProvisioner {
    pub fn new(config: &ProvisioningConfig, env: &StorageEnv, http: &HttpConfig) -> Self {
        let mut seen = HashSet::new();
        let strategies = config
            .order
            .iter()
            // the shared bucket is opt-in via provision_fallback only
            .filter(|kind| **kind != ProviderKind::LocalShared && seen.insert(**kind))
            .map(|kind| create_provider(*kind, config, env, http))
            .collect();
        let mut provisioner = Self::with_strategies(strategies, SharedBucketProvider::new(config, env));
        provisioner.bucket_prefix = config.bucket_prefix.clone();
        provisioner
    }

    pub fn with_strategies(strategies: Vec<Arc<dyn StorageProvider>>, shared: SharedBucketProvider) -> Self {
        Self {
            strategies,
            shared,
            bucket_prefix: ProvisioningConfig::default().bucket_prefix,
        }
    }

    fn strategy(&self, kind: ProviderKind) -> Result<&Arc<dyn StorageProvider>, StorageError> {
        self.strategies
            .iter()
            .find(|s| s.kind() == kind)
            .ok_or_else(|| StorageError::NotConfigured(format!("{} provisioning is disabled", kind)))
    }

    /// Provisions with one specific provider, reporting why it failed.
    pub async fn provision_with(&self, kind: ProviderKind, user_id: &str) -> Result<StorageConfig, StorageError> {
        let strategy = self.strategy(kind)?;
        let start = Instant::now();
        let result = strategy.provision(user_id).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(config) => info!(
                event_name = "provisioning.attempt",
                event_domain = "provisioning",
                provider_name = strategy.get_name(),
                user_id,
                bucket = config.bucket_name.as_str(),
                bucket_scoped = config.is_bucket_scoped(),
                elapsed_ms,
                "Provisioned storage"
            ),
            Err(e) => warn!(
                event_name = "provisioning.attempt",
                event_domain = "provisioning",
                provider_name = strategy.get_name(),
                user_id,
                error_kind = e.kind(),
                elapsed_ms,
                "Provisioning failed: {}",
                e
            ),
        }
        result
    }

    /// Dedicated R2 bucket with a bucket-scoped token, or `None`.
    pub async fn provision_user_storage(&self, user_id: &str) -> Option<StorageConfig> {
        self.provision_with(ProviderKind::R2, user_id).await.ok()
    }

    /// Dedicated GCS bucket reached with the service account, or `None`.
    pub async fn provision_user_storage_gcs(&self, user_id: &str) -> Option<StorageConfig> {
        self.provision_with(ProviderKind::Gcs, user_id).await.ok()
    }

    /// A prefix in the shared application bucket. Always succeeds.
    pub fn provision_fallback(&self, user_id: &str) -> StorageConfig {
        self.shared.fallback_config(user_id)
    }

    /// First provider in priority order that succeeds.
    ///
    /// Never falls back to the shared bucket: a user must have dedicated
    /// storage to be qualified. A malformed user id fails with `InvalidInput`
    /// before any provider is called, and `AlreadyExists` from any provider
    /// ends the search. Otherwise fails with `NotConfigured` when no provider
    /// is configured, or a `Provider` error naming every failure.
    pub async fn auto_provision_storage(&self, user_id: &str) -> Result<StorageConfig, StorageError> {
        bucket_name_for(&self.bucket_prefix, user_id)?;

        let mut failures = Vec::with_capacity(self.strategies.len());
        let mut all_unconfigured = true;

        for strategy in &self.strategies {
            match self.provision_with(strategy.kind(), user_id).await {
                Ok(config) => return Ok(config),
                Err(e @ StorageError::AlreadyExists(_)) => return Err(e),
                Err(e) => {
                    all_unconfigured &= matches!(e, StorageError::NotConfigured(_));
                    failures.push(format!("{}: {}", strategy.kind(), e));
                }
            }
        }

        warn!(
            event_name = "provisioning.exhausted",
            event_domain = "provisioning",
            user_id,
            attempts = failures.len(),
            "No provider could provision dedicated storage"
        );
        let summary = if failures.is_empty() {
            "no provisioning providers enabled".to_string()
        } else {
            failures.join("; ")
        };
        if all_unconfigured {
            Err(StorageError::NotConfigured(summary))
        } else {
            Err(StorageError::Provider(summary))
        }
    }
}
