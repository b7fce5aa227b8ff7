use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::auth_token::sha256_hex;
use super::storage_config::{ProviderKind, StorageConfig};

/// Stable id of the profile namespace owned by a bucket binding: the first
/// 16 hex chars of SHA-256 over provider, endpoint, bucket and prefix.
pub fn profile_id_for(storage: &StorageConfig) -> String {
    let identity = format!(
        "{}|{}|{}|{}",
        storage.provider.as_str(),
        storage.endpoint_url,
        storage.bucket_name,
        storage.prefix.as_deref().unwrap_or("")
    );
    let mut digest = sha256_hex(&identity);
    digest.truncate(16);
    digest
}

/// Server-side state of a session that passed the storage round-trip probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualificationSession {
    pub qualified: bool,
    pub provider: ProviderKind,
    pub bucket_name: String,
    pub session_token: String,
    /// The only profile namespace this session may touch.
    pub profile_id: String,
    /// The credentials that passed the probe.
    pub storage: StorageConfig,
    pub qualified_at: String,
}

impl QualificationSession {
    pub fn new(storage: StorageConfig, session_token: String) -> Self {
        QualificationSession {
            qualified: true,
            provider: storage.provider,
            bucket_name: storage.bucket_name.clone(),
            session_token,
            profile_id: profile_id_for(&storage),
            storage,
            qualified_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            qualified: self.qualified,
            provider: Some(self.provider),
            bucket: Some(self.bucket_name.clone()),
            profile_id: Some(self.profile_id.clone()),
        }
    }
}

/// What `/storage/status` reports about a session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub qualified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
}

impl SessionSummary {
    pub fn unqualified() -> Self {
        SessionSummary {
            qualified: false,
            provider: None,
            bucket: None,
            profile_id: None,
        }
    }
}
