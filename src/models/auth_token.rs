use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex encoded SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// The proof-of-control record stored inside a user's bucket.
///
/// Field names are the on-bucket wire format and must not change.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token: String,
    pub user_id: String,
    /// ISO-8601, UTC.
    pub created_at: String,
    pub sha256: String,
}

impl AuthToken {
    /// Creates a record for `token`, stamped now.
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        let token = token.into();
        let sha256 = sha256_hex(&token);
        AuthToken {
            token,
            user_id: user_id.into(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            sha256,
        }
    }

    /// The stored digest equals the digest of the stored token.
    pub fn is_consistent(&self) -> bool {
        self.sha256 == sha256_hex(&self.token)
    }

    /// Both the token field and the digest field agree with `provided`.
    pub fn matches(&self, provided: &str) -> bool {
        self.token == provided && self.sha256 == sha256_hex(provided)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("created_at", &self.created_at)
            .field("sha256", &self.sha256)
            .finish()
    }
}
