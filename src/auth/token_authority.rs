//! Proof-of-control tokens.
//!
//! A user proves who they are by showing that a token they hold is the one
//! stored at a fixed key inside a bucket they control.

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::errors::StorageError;
use crate::models::{sha256_hex, AuthToken, StorageConfig};
use crate::storage::StoreConnector;

/// Where the token record lives inside a bucket (below the prefix when shared).
pub const AUTH_TOKEN_KEY: &str = ".semptify/auth_token.json";

/// Uppercase alphanumerics without the look-alikes 0, O, 1 and I.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const GROUPS: usize = 3;
const GROUP_LEN: usize = 4;

/// `PREFIX-XXXX-XXXX-XXXX` from the thread-local CSPRNG.
pub fn generate_token(prefix: &str) -> String {
    generate_token_with(&mut rand::thread_rng(), prefix)
}

/// Same as [`generate_token`] with a caller-supplied random source.
pub fn generate_token_with<R: Rng + ?Sized>(rng: &mut R, prefix: &str) -> String {
    let mut token = String::with_capacity(prefix.len() + GROUPS * (GROUP_LEN + 1));
    token.push_str(prefix);
    for _ in 0..GROUPS {
        token.push('-');
        for _ in 0..GROUP_LEN {
            let idx = rng.gen_range(0..TOKEN_ALPHABET.len());
            token.push(TOKEN_ALPHABET[idx] as char);
        }
    }
    token
}

/// One-way lookup key for a token, so the plaintext never has to be kept server side.
pub fn hash_token_for_index(token: &str) -> String {
    sha256_hex(token)
}

/// Mints tokens and reads/writes the token record in user buckets.
pub struct TokenAuthority {
    connector: Arc<dyn StoreConnector>,
    prefix: String,
}

impl TokenAuthority {
    pub fn new(connector: Arc<dyn StoreConnector>, prefix: impl Into<String>) -> Self {
        Self {
            connector,
            prefix: prefix.into(),
        }
    }

    /// A fresh token with the configured prefix.
    pub fn generate(&self) -> String {
        generate_token(&self.prefix)
    }

    /// Stores the token record for `user_id`, replacing any earlier one.
    /// There is no conflict detection; the last writer wins.
    pub async fn write_token_to_bucket(&self, config: &StorageConfig, token: &str, user_id: &str) -> bool {
        match self.write_token(config, token, user_id).await {
            Ok(()) => {
                info!(
                    event_name = "auth.token.written",
                    event_domain = "auth",
                    user_id,
                    bucket = config.bucket_name.as_str(),
                    provider_name = config.provider.as_str(),
                    "Wrote proof-of-control token"
                );
                true
            }
            Err(e) => {
                warn!(
                    event_name = "auth.token.write_failed",
                    event_domain = "auth",
                    user_id,
                    bucket = config.bucket_name.as_str(),
                    error_kind = e.kind(),
                    "Failed to write token to bucket: {}",
                    e
                );
                false
            }
        }
    }

    async fn write_token(&self, config: &StorageConfig, token: &str, user_id: &str) -> Result<(), StorageError> {
        let record = AuthToken::new(token, user_id);
        let body = serde_json::to_vec_pretty(&record)
            .map_err(|e| StorageError::InvalidInput(format!("cannot serialize token record: {}", e)))?;
        let store = self.connector.connect(config)?;
        store
            .put_object(&config.object_key(AUTH_TOKEN_KEY), body, Some("application/json"))
            .await
    }

    /// The stored record when it matches `provided`, otherwise `None`.
    ///
    /// Missing, unreadable and tampered records all look the same here;
    /// use [`TokenAuthority::verify_token`] to tell them apart.
    pub async fn verify_token_from_bucket(&self, config: &StorageConfig, provided: &str) -> Option<AuthToken> {
        self.verify_token(config, provided).await.ok()
    }

    /// Like [`TokenAuthority::verify_token_from_bucket`], with the reason on failure:
    /// `NotFound` when no record exists, `Provider` when the bucket could not be
    /// read, `Integrity` when the record does not match.
    pub async fn verify_token(&self, config: &StorageConfig, provided: &str) -> Result<AuthToken, StorageError> {
        let bucket = config.bucket_name.as_str();
        let store = self.connector.connect(config)?;
        let raw = match store.get_object(&config.object_key(AUTH_TOKEN_KEY)).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(bucket, "Token record unavailable: {}", e);
                return Err(e);
            }
        };

        let record: AuthToken = serde_json::from_slice(&raw).map_err(|e| {
            warn!(
                event_name = "auth.token.integrity",
                event_domain = "auth",
                bucket,
                "Token record is not valid JSON: {}",
                e
            );
            StorageError::Integrity("token record is not valid JSON".into())
        })?;

        if !record.matches(provided) {
            warn!(
                event_name = "auth.token.integrity",
                event_domain = "auth",
                bucket,
                user_id = record.user_id.as_str(),
                digest_consistent = record.is_consistent(),
                "Provided token does not match bucket record"
            );
            return Err(StorageError::Integrity("token mismatch".into()));
        }
        Ok(record)
    }
}
