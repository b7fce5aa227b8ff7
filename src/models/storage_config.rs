use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The storage backends a user's data can live on.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    #[serde(rename = "r2")]
    R2,
    #[serde(rename = "gcs", alias = "google")]
    Gcs,
    #[serde(rename = "local-shared")]
    LocalShared,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::R2 => "r2",
            ProviderKind::Gcs => "gcs",
            ProviderKind::LocalShared => "local-shared",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Google service account key, as found in the JSON file referenced by
/// `GOOGLE_APPLICATION_CREDENTIALS`. Unknown fields are ignored.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Google's OAuth2 token endpoint.
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish()
    }
}

/// How a [`StorageConfig`] authenticates against its provider.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StorageCredentials {
    /// S3-compatible HMAC key pair.
    AccessKey {
        access_key_id: String,
        secret_access_key: String,
    },
    /// A service account identity. Grants whatever the account is allowed
    /// project-wide; it is never limited to one bucket.
    ServiceAccount(ServiceAccountKey),
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageCredentials::AccessKey { access_key_id, .. } => f
                .debug_struct("AccessKey")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"<redacted>")
                .finish(),
            StorageCredentials::ServiceAccount(key) => {
                f.debug_tuple("ServiceAccount").field(key).finish()
            }
        }
    }
}

/// Everything needed to reach one bucket on behalf of one user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub provider: ProviderKind,
    pub bucket_name: String,
    pub credentials: StorageCredentials,
    pub endpoint_url: String,
    #[serde(default)]
    pub account_id: Option<String>,
    /// Key namespace inside a bucket shared by several users.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub shared: bool,
}

impl StorageConfig {
    /// Builds an S3-compatible config with an access key pair.
    pub fn with_access_key(
        provider: ProviderKind,
        bucket_name: impl Into<String>,
        endpoint_url: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            bucket_name: bucket_name.into(),
            credentials: StorageCredentials::AccessKey {
                access_key_id: access_key_id.into(),
                secret_access_key: secret_access_key.into(),
            },
            endpoint_url: endpoint_url.into(),
            account_id: None,
            prefix: None,
            shared: false,
        }
    }

    /// Resolves `key` inside this config's namespace.
    pub fn object_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) if !prefix.is_empty() => {
                format!("{}/{}", prefix.trim_end_matches('/'), key)
            }
            _ => key.to_string(),
        }
    }

    /// True when the credentials can only touch this one bucket.
    ///
    /// Service accounts and shared buckets never qualify: the former carry
    /// project-wide privilege, the latter expose every user's prefix.
    pub fn is_bucket_scoped(&self) -> bool {
        !self.shared && matches!(self.credentials, StorageCredentials::AccessKey { .. })
    }

    /// A view of this config that is safe to return over HTTP.
    pub fn summary(&self) -> StorageSummary {
        let access_key_id = match &self.credentials {
            StorageCredentials::AccessKey { access_key_id, .. } => Some(access_key_id.clone()),
            StorageCredentials::ServiceAccount(_) => None,
        };
        let service_account = match &self.credentials {
            StorageCredentials::ServiceAccount(key) => Some(key.client_email.clone()),
            StorageCredentials::AccessKey { .. } => None,
        };
        StorageSummary {
            provider: self.provider,
            bucket_name: self.bucket_name.clone(),
            endpoint_url: self.endpoint_url.clone(),
            access_key_id,
            service_account,
            prefix: self.prefix.clone(),
            shared: self.shared,
            bucket_scoped: self.is_bucket_scoped(),
        }
    }
}

/// Secret-free projection of a [`StorageConfig`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StorageSummary {
    pub provider: ProviderKind,
    pub bucket_name: String,
    pub endpoint_url: String,
    pub access_key_id: Option<String>,
    pub service_account: Option<String>,
    pub prefix: Option<String>,
    pub shared: bool,
    pub bucket_scoped: bool,
}
