use serde::{Deserialize, Serialize};

/// Snapshot of whether persistent storage is configured for this process.
/// Recomputed on every query; nothing here is persisted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EnforcementStatus {
    pub configured: bool,
    /// Name of the satisfied tier, or `"None"`.
    pub provider: String,
    pub missing_vars: Vec<String>,
    pub override_active: bool,
    pub strict: bool,
    /// `ready` or `blocked`.
    pub status: String,
    pub message: String,
}
