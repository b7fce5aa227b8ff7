//! Environment-driven storage configuration.
//!
//! Variable names are a compatibility contract with existing deployments and
//! must not change.

use std::collections::BTreeMap;

use figment::providers::Env;

pub const R2_ACCOUNT_ID: &str = "R2_ACCOUNT_ID";
pub const R2_ACCESS_KEY_ID: &str = "R2_ACCESS_KEY_ID";
pub const R2_SECRET_ACCESS_KEY: &str = "R2_SECRET_ACCESS_KEY";
pub const R2_BUCKET_NAME: &str = "R2_BUCKET_NAME";
pub const R2_ENDPOINT_URL: &str = "R2_ENDPOINT_URL";
pub const R2_ENDPOINT: &str = "R2_ENDPOINT";
pub const R2_ONLY: &str = "R2_ONLY";
pub const GOOGLE_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const GCS_BUCKET_NAME: &str = "GCS_BUCKET_NAME";
pub const CF_ACCOUNT_ID: &str = "CF_ACCOUNT_ID";
pub const CF_API_TOKEN: &str = "CF_API_TOKEN";
pub const PERSISTENCE_OVERRIDE: &str = "PERSISTENCE_OVERRIDE";
pub const PERSISTENT_DISK_PATH: &str = "PERSISTENT_DISK_PATH";
pub const RENDER: &str = "RENDER";
pub const RENDER_SERVICE_ID: &str = "RENDER_SERVICE_ID";
pub const RENDER_SERVICE_NAME: &str = "RENDER_SERVICE_NAME";
pub const PRODUCTION: &str = "PRODUCTION";

/// Env hints that name a storage backend other than R2.
pub const CONFLICTING_PROVIDER_HINTS: &[&str] = &[
    "GOOGLE_DRIVE_TOKEN",
    "DROPBOX_ACCESS_TOKEN",
    "AWS_ACCESS_KEY_ID",
    "AZURE_STORAGE_KEY",
    GCS_BUCKET_NAME,
];

/// Variables that together configure the R2 tier.
pub const R2_REQUIRED_VARS: &[&str] = &[
    R2_ACCOUNT_ID,
    R2_ACCESS_KEY_ID,
    R2_SECRET_ACCESS_KEY,
    R2_BUCKET_NAME,
];

/// Variables that together configure the GCS tier.
pub const GCS_REQUIRED_VARS: &[&str] = &[GOOGLE_APPLICATION_CREDENTIALS, GCS_BUCKET_NAME];

/// Variables signalling a hosted deployment.
pub const PRODUCTION_HINTS: &[&str] = &[RENDER, RENDER_SERVICE_ID, RENDER_SERVICE_NAME];

const KNOWN_VARS: &[&str] = &[
    R2_ACCOUNT_ID,
    R2_ACCESS_KEY_ID,
    R2_SECRET_ACCESS_KEY,
    R2_BUCKET_NAME,
    R2_ENDPOINT_URL,
    R2_ENDPOINT,
    R2_ONLY,
    GOOGLE_APPLICATION_CREDENTIALS,
    GCS_BUCKET_NAME,
    CF_ACCOUNT_ID,
    CF_API_TOKEN,
    PERSISTENCE_OVERRIDE,
    PERSISTENT_DISK_PATH,
    RENDER,
    RENDER_SERVICE_ID,
    RENDER_SERVICE_NAME,
    PRODUCTION,
    "GOOGLE_DRIVE_TOKEN",
    "DROPBOX_ACCESS_TOKEN",
    "AWS_ACCESS_KEY_ID",
    "AZURE_STORAGE_KEY",
];

/// A snapshot of the storage-related environment.
///
/// Empty values count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageEnv {
    vars: BTreeMap<String, String>,
}

impl StorageEnv {
    /// Captures the current process environment.
    pub fn from_env() -> Self {
        let env = Env::raw().only(KNOWN_VARS);
        Self::from_pairs(
            env.iter()
                .map(|(key, value)| (key.as_str().to_ascii_uppercase(), value)),
        )
    }

    /// Builds a snapshot from explicit pairs; used by tests and embedders.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// True for `1`, `true` and `yes` (case-insensitive).
    pub fn flag(&self, key: &str) -> bool {
        matches!(
            self.get(key).map(|v| v.trim().to_ascii_lowercase()).as_deref(),
            Some("1") | Some("true") | Some("yes")
        )
    }

    /// The subset of `keys` that are unset.
    pub fn missing(&self, keys: &[&str]) -> Vec<String> {
        keys.iter()
            .filter(|k| !self.is_set(k))
            .map(|k| k.to_string())
            .collect()
    }

    /// R2 endpoint, preferring `R2_ENDPOINT_URL`, then `R2_ENDPOINT`, then the
    /// account-derived default.
    pub fn r2_endpoint(&self) -> Option<String> {
        self.get(R2_ENDPOINT_URL)
            .or_else(|| self.get(R2_ENDPOINT))
            .map(str::to_string)
            .or_else(|| self.get(R2_ACCOUNT_ID).map(r2_endpoint_for_account))
    }

    /// First conflicting provider hint present, if any.
    pub fn conflicting_provider(&self) -> Option<&'static str> {
        CONFLICTING_PROVIDER_HINTS
            .iter()
            .copied()
            .find(|k| self.is_set(k))
    }

    /// Whether the process looks like a hosted production deployment.
    pub fn looks_like_production(&self) -> bool {
        PRODUCTION_HINTS.iter().any(|k| self.is_set(k)) || self.flag(PRODUCTION)
    }
}

pub fn r2_endpoint_for_account(account_id: &str) -> String {
    format!("https://{}.r2.cloudflarestorage.com", account_id)
}
