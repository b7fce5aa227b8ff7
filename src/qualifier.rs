//! Storage qualification: a live write/read/delete probe against a bucket,
//! after which the caller holds a session token bound to that bucket.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::errors::StorageError;
use crate::models::{ProviderKind, QualificationSession, StorageConfig};
use crate::providers::{QualifyCredentials, StorageProvider};
use crate::storage::StoreConnector;
use crate::store::SessionStore;

const PROBE_KEY_PREFIX: &str = "_semptify_qual_test_";
const QUALIFIED_MESSAGE: &str = "Storage verified - you are qualified!";

/// What a qualification attempt returns to the caller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct QualificationOutcome {
    pub qualified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Namespace for `/profiles/{profile_id}/files` under this session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    /// A fixed classification of the failure; provider details stay in the logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}

impl QualificationOutcome {
    fn qualified(session: &QualificationSession) -> Self {
        Self {
            qualified: true,
            provider: Some(session.provider),
            bucket: Some(session.bucket_name.clone()),
            session_token: Some(session.session_token.clone()),
            profile_id: Some(session.profile_id.clone()),
            error: None,
            message: QUALIFIED_MESSAGE.to_string(),
        }
    }

    fn rejected(kind: ProviderKind, error: &StorageError) -> Self {
        Self {
            qualified: false,
            provider: None,
            bucket: None,
            session_token: None,
            profile_id: None,
            error: Some(error.public_reason().to_string()),
            message: failure_message(kind).to_string(),
        }
    }
}

fn failure_message(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::R2 => "Could not verify R2 storage access",
        ProviderKind::Gcs => "Could not verify Google Cloud Storage access",
        ProviderKind::LocalShared => "Could not verify storage access",
    }
}

/// 32 random bytes, URL-safe base64 without padding.
pub fn new_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn probe_key() -> String {
    let mut suffix = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("{}{}.txt", PROBE_KEY_PREFIX, hex::encode(suffix))
}

pub struct StorageQualifier {
    providers: Vec<Arc<dyn StorageProvider>>,
    connector: Arc<dyn StoreConnector>,
    sessions: Arc<dyn SessionStore>,
    default_bucket: String,
}

impl StorageQualifier {
    pub fn new(
        providers: Vec<Arc<dyn StorageProvider>>,
        connector: Arc<dyn StoreConnector>,
        sessions: Arc<dyn SessionStore>,
        default_bucket: impl Into<String>,
    ) -> Self {
        Self {
            providers,
            connector,
            sessions,
            default_bucket: default_bucket.into(),
        }
    }

    /// Probes the bucket named by `credentials` and, on success, opens a session.
    pub async fn qualify_storage(&self, credentials: &QualifyCredentials) -> QualificationOutcome {
        let kind = credentials.kind();
        match self.try_qualify(credentials).await {
            Ok(session) => {
                info!(
                    event_name = "qualification.succeeded",
                    event_domain = "qualification",
                    provider_name = kind.as_str(),
                    bucket = session.bucket_name.as_str(),
                    "Storage qualified"
                );
                QualificationOutcome::qualified(&session)
            }
            Err(e) => {
                warn!(
                    event_name = "qualification.failed",
                    event_domain = "qualification",
                    provider_name = kind.as_str(),
                    error_kind = e.kind(),
                    "Storage qualification failed: {}",
                    e
                );
                QualificationOutcome::rejected(kind, &e)
            }
        }
    }

    /// Same as [`StorageQualifier::qualify_storage`] with the failure reason.
    pub async fn try_qualify(&self, credentials: &QualifyCredentials) -> Result<QualificationSession, StorageError> {
        let kind = credentials.kind();
        let provider = self
            .providers
            .iter()
            .find(|p| p.kind() == kind)
            .ok_or_else(|| StorageError::NotConfigured(format!("no {} provider available", kind)))?;
        let target = provider.qualification_target(credentials, &self.default_bucket)?;
        self.qualify_config(target).await
    }

    /// Probes an already resolved config, e.g. one just provisioned, and opens a session.
    pub async fn qualify_config(&self, target: StorageConfig) -> Result<QualificationSession, StorageError> {
        self.probe(&target).await?;

        let session = QualificationSession::new(target, new_session_token());
        self.sessions
            .put_session(session.clone())
            .await
            .map_err(|e| StorageError::Provider(format!("session store '{}': {}", self.sessions.get_name(), e)))?;
        Ok(session)
    }

    /// One write, one read checked byte for byte, one delete. Stops at the
    /// first failure, except that a mismatched read still removes the object.
    pub async fn probe(&self, target: &StorageConfig) -> Result<(), StorageError> {
        let store = self.connector.connect(target)?;
        let key = target.object_key(&probe_key());
        let content = format!(
            "Semptify qualification test at {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
        )
        .into_bytes();

        debug!(bucket = target.bucket_name.as_str(), key = key.as_str(), "Writing qualification probe");
        store.put_object(&key, content.clone(), Some("text/plain")).await?;

        let read_back = store.get_object(&key).await?;
        if read_back != content {
            error!(
                event_name = "qualification.mismatch",
                event_domain = "qualification",
                bucket = target.bucket_name.as_str(),
                written = content.len(),
                read = read_back.len(),
                "Qualification probe read back different bytes"
            );
            if let Err(e) = store.delete_object(&key).await {
                warn!(bucket = target.bucket_name.as_str(), "Could not remove mismatched qualification object: {}", e);
            }
            return Err(StorageError::Integrity(
                "probe object read back with different content".into(),
            ));
        }

        store.delete_object(&key).await
    }

    /// The session bound to `session_token`, if any.
    pub async fn check_qualification(&self, session_token: &str) -> Option<QualificationSession> {
        match self.sessions.get_session(session_token).await {
            Ok(session) => session.filter(|s| s.qualified),
            Err(e) => {
                error!("Session lookup failed: {}", e);
                None
            }
        }
    }

    /// Forgets the session; returns whether one existed.
    pub async fn logout(&self, session_token: &str) -> bool {
        match self.sessions.delete_session(session_token).await {
            Ok(removed) => removed,
            Err(e) => {
                error!("Session removal failed: {}", e);
                false
            }
        }
    }
}
