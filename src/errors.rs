//! Error taxonomy for the storage identity layer.
//!
//! Provider calls return [`StorageError`] so callers can assert on the reason
//! a call failed. The public operations that promise a plain `bool` or
//! `Option` collapse these at their boundary.

use thiserror::Error;

/// Every failure the storage layer can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Required configuration (env vars, credentials) is absent.
    #[error("storage not configured: {0}")]
    NotConfigured(String),

    /// Two storage backends are configured while exclusivity is enforced.
    #[error("conflicting storage configuration: {0}")]
    ConflictingConfig(String),

    /// A remote API call failed (network, auth, unexpected status).
    #[error("provider error: {0}")]
    Provider(String),

    /// The requested object or bucket does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored data does not match what it claims to be.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// The caller supplied something we refuse to act on.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Provisioning found the target bucket already taken.
    #[error("already exists: {0}")]
    AlreadyExists(String),
}

impl StorageError {
    /// A short classification that is safe to hand back to an HTTP client.
    /// The detailed message may contain endpoints or key ids and stays in logs.
    pub fn public_reason(&self) -> &'static str {
        match self {
            StorageError::NotConfigured(_) => "storage provider is not configured",
            StorageError::ConflictingConfig(_) => "conflicting storage configuration",
            StorageError::Provider(_) => "storage provider rejected the request",
            StorageError::NotFound(_) => "bucket or object not found",
            StorageError::Integrity(_) => "storage round-trip verification failed",
            StorageError::InvalidInput(_) => "invalid storage credentials",
            StorageError::AlreadyExists(_) => "storage for this user already exists",
        }
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::NotConfigured(_) => "not_configured",
            StorageError::ConflictingConfig(_) => "conflicting_config",
            StorageError::Provider(_) => "provider",
            StorageError::NotFound(_) => "not_found",
            StorageError::Integrity(_) => "integrity",
            StorageError::InvalidInput(_) => "invalid_input",
            StorageError::AlreadyExists(_) => "already_exists",
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        // without_url keeps presigned paths and bucket names out of the message
        StorageError::Provider(e.without_url().to_string())
    }
}

/// Raised by the startup gate when strict enforcement finds no persistent storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("persistent storage not configured; missing: {}", missing_vars.join(", "))]
pub struct EnforcementFailure {
    pub missing_vars: Vec<String>,
}
