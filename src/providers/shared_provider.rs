//! The application's own R2 bucket, split into per-user prefixes.
//!
//! Isolation is logical only: the credential reaches every user's prefix.
//! Never part of automatic provisioning.

use tracing::warn;

use super::base::{QualifyCredentials, StorageProvider};
use crate::config::{
    ProvisioningConfig, StorageEnv, R2_ACCESS_KEY_ID, R2_ACCOUNT_ID, R2_BUCKET_NAME,
    R2_SECRET_ACCESS_KEY,
};
use crate::errors::StorageError;
use crate::models::{ProviderKind, StorageConfig};

pub struct SharedBucketProvider {
    name: String,
    bucket: String,
    endpoint_url: String,
    account_id: Option<String>,
    access_key_id: String,
    secret_access_key: String,
}

impl SharedBucketProvider {
    pub fn new(config: &ProvisioningConfig, env: &StorageEnv) -> Self {
        Self {
            name: "shared-bucket".to_string(),
            bucket: env
                .get(R2_BUCKET_NAME)
                .unwrap_or(&config.shared_bucket)
                .to_string(),
            endpoint_url: env.r2_endpoint().unwrap_or_default(),
            account_id: env.get(R2_ACCOUNT_ID).map(str::to_string),
            access_key_id: env.get(R2_ACCESS_KEY_ID).unwrap_or_default().to_string(),
            secret_access_key: env.get(R2_SECRET_ACCESS_KEY).unwrap_or_default().to_string(),
        }
    }

    /// Always returns a config; with no R2 credentials in the environment the
    /// config is unusable until they are supplied.
    pub fn fallback_config(&self, user_id: &str) -> StorageConfig {
        if self.access_key_id.is_empty() || self.endpoint_url.is_empty() {
            warn!(
                event_name = "provisioning.shared.incomplete",
                event_domain = "provisioning",
                bucket = self.bucket.as_str(),
                "Shared bucket credentials are not configured"
            );
        }
        let mut config = StorageConfig::with_access_key(
            ProviderKind::LocalShared,
            self.bucket.as_str(),
            self.endpoint_url.as_str(),
            self.access_key_id.as_str(),
            self.secret_access_key.as_str(),
        );
        config.account_id = self.account_id.clone();
        config.prefix = Some(format!("users/{}/", user_id));
        config.shared = true;
        config
    }
}

#[async_trait::async_trait]
impl StorageProvider for SharedBucketProvider {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::LocalShared
    }

    async fn provision(&self, user_id: &str) -> Result<StorageConfig, StorageError> {
        Ok(self.fallback_config(user_id))
    }

    fn qualification_target(
        &self,
        credentials: &QualifyCredentials,
        _default_bucket: &str,
    ) -> Result<StorageConfig, StorageError> {
        Err(StorageError::InvalidInput(format!(
            "{} credentials cannot qualify against the shared bucket",
            credentials.kind()
        )))
    }
}
