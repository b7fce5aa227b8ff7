use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::gcs_provider::GcsProvider;
use super::r2_provider::R2Provider;
use super::shared_provider::SharedBucketProvider;
use crate::config::{HttpConfig, ProvisioningConfig, StorageEnv};
use crate::errors::StorageError;
use crate::models::{ProviderKind, ServiceAccountKey, StorageConfig};

/// Bucket names are 3 to 63 characters with both providers.
const MIN_BUCKET_NAME_LEN: usize = 3;
const MAX_BUCKET_NAME_LEN: usize = 63;

/// Credentials a user presents to get qualified.
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "provider")]
pub enum QualifyCredentials {
    #[serde(rename = "r2")]
    R2 {
        account_id: String,
        access_key: String,
        secret_key: String,
        #[serde(default)]
        bucket_name: Option<String>,
        /// Overrides the account-derived endpoint.
        #[serde(default)]
        endpoint_url: Option<String>,
    },
    #[serde(rename = "gcs", alias = "google")]
    Gcs {
        credentials_json: ServiceAccountKey,
        #[serde(default)]
        bucket_name: Option<String>,
    },
}

impl QualifyCredentials {
    pub fn kind(&self) -> ProviderKind {
        match self {
            QualifyCredentials::R2 { .. } => ProviderKind::R2,
            QualifyCredentials::Gcs { .. } => ProviderKind::Gcs,
        }
    }
}

impl std::fmt::Debug for QualifyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualifyCredentials::R2 {
                account_id,
                access_key,
                bucket_name,
                ..
            } => f
                .debug_struct("R2")
                .field("account_id", account_id)
                .field("access_key", access_key)
                .field("secret_key", &"<redacted>")
                .field("bucket_name", bucket_name)
                .finish(),
            QualifyCredentials::Gcs {
                credentials_json,
                bucket_name,
            } => f
                .debug_struct("Gcs")
                .field("credentials_json", credentials_json)
                .field("bucket_name", bucket_name)
                .finish(),
        }
    }
}

/// One storage backend users can be provisioned on or qualify against.
#[async_trait::async_trait]
pub trait StorageProvider: Send + Sync {
    /// A descriptive name for logs.
    fn get_name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Creates (or reuses) dedicated storage for `user_id`. Single attempt.
    async fn provision(&self, user_id: &str) -> Result<StorageConfig, StorageError>;

    /// The bucket and credentials a qualification probe should target.
    fn qualification_target(
        &self,
        credentials: &QualifyCredentials,
        default_bucket: &str,
    ) -> Result<StorageConfig, StorageError>;
}

/// The strategies in `config.order`, each built from the environment.
/// A kind listed twice is only tried at its first position.
pub fn create_providers(
    config: &ProvisioningConfig,
    env: &StorageEnv,
    http: &HttpConfig,
) -> Vec<Arc<dyn StorageProvider>> {
    let mut seen = HashSet::new();
    config
        .order
        .iter()
        .filter(|kind| seen.insert(**kind))
        .map(|kind| create_provider(*kind, config, env, http))
        .collect()
}

pub fn create_provider(
    kind: ProviderKind,
    config: &ProvisioningConfig,
    env: &StorageEnv,
    http: &HttpConfig,
) -> Arc<dyn StorageProvider> {
    match kind {
        ProviderKind::R2 => Arc::new(R2Provider::new(config, env, http)),
        ProviderKind::Gcs => Arc::new(GcsProvider::new(config, env, http)),
        ProviderKind::LocalShared => Arc::new(SharedBucketProvider::new(config, env)),
    }
}

/// `<prefix><user_id>`, provided `user_id` is already a valid bucket-name
/// fragment.
///
/// Only lowercase ASCII letters, digits and single inner dashes are accepted,
/// and the result must fit in 63 characters. Nothing is rewritten, so two
/// distinct user ids never map to the same bucket.
pub fn bucket_name_for(prefix: &str, user_id: &str) -> Result<String, StorageError> {
    let charset_ok = user_id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let shape_ok = !user_id.is_empty()
        && !user_id.starts_with('-')
        && !user_id.ends_with('-')
        && !user_id.contains("--");
    if !charset_ok || !shape_ok {
        return Err(StorageError::InvalidInput(format!(
            "user id '{}' must be lowercase letters, digits and single inner dashes",
            user_id
        )));
    }

    let name = format!("{}{}", prefix, user_id);
    if name.len() < MIN_BUCKET_NAME_LEN || name.len() > MAX_BUCKET_NAME_LEN {
        return Err(StorageError::InvalidInput(format!(
            "bucket name for user '{}' must be {} to {} characters",
            user_id, MIN_BUCKET_NAME_LEN, MAX_BUCKET_NAME_LEN
        )));
    }
    Ok(name)
}
