//! Startup gate: is there persistent storage for this process?

use std::path::Path;
use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::config::{
    StorageEnv, GCS_REQUIRED_VARS, PERSISTENCE_OVERRIDE, PERSISTENT_DISK_PATH, R2_REQUIRED_VARS,
};
use crate::errors::EnforcementFailure;
use crate::models::EnforcementStatus;

pub const TIER_OVERRIDE: &str = "Override (DEV)";
pub const TIER_R2: &str = "Cloudflare R2";
pub const TIER_GCS: &str = "Google Cloud Storage";
pub const TIER_DISK: &str = "Render Persistent Disk";
pub const TIER_NONE: &str = "None";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementState {
    Unchecked,
    Configured,
    /// Running without persistent storage; data is lost on restart.
    EphemeralWarned,
    FatalHalted,
}

pub struct StorageEnforcer {
    env: StorageEnv,
    state: Mutex<EnforcementState>,
}

impl StorageEnforcer {
    pub fn new(env: &StorageEnv) -> Self {
        Self {
            env: env.clone(),
            state: Mutex::new(EnforcementState::Unchecked),
        }
    }

    pub fn state(&self) -> EnforcementState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn transition(&self, next: EnforcementState) -> EnforcementState {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = next;
        next
    }

    /// `(configured, tier name, missing variables)`; the first satisfied tier wins.
    pub fn check_storage_configured(&self) -> (bool, String, Vec<String>) {
        if self.env.flag(PERSISTENCE_OVERRIDE) {
            return (true, TIER_OVERRIDE.to_string(), Vec::new());
        }

        let r2_missing = self.env.missing(R2_REQUIRED_VARS);
        if r2_missing.is_empty() {
            return (true, TIER_R2.to_string(), Vec::new());
        }

        let gcs_missing = self.env.missing(GCS_REQUIRED_VARS);
        if gcs_missing.is_empty() {
            return (true, TIER_GCS.to_string(), Vec::new());
        }

        match self.env.get(PERSISTENT_DISK_PATH) {
            Some(path) if Path::new(path).exists() => {
                return (true, TIER_DISK.to_string(), Vec::new());
            }
            Some(path) => {
                warn!("{} is set to '{}' but the path does not exist", PERSISTENT_DISK_PATH, path);
            }
            None => {}
        }

        let mut missing = r2_missing;
        missing.extend(gcs_missing);
        if !self.env.is_set(PERSISTENT_DISK_PATH) {
            missing.push(PERSISTENT_DISK_PATH.to_string());
        }
        (false, TIER_NONE.to_string(), missing)
    }

    /// Runs the gate once. `strict` defaults to whether this looks like a
    /// hosted production deployment.
    ///
    /// Unconfigured and strict is the only failure; the caller must exit
    /// before serving anything.
    pub fn enforce_storage_requirement(&self, strict: Option<bool>) -> Result<EnforcementState, EnforcementFailure> {
        let strict = strict.unwrap_or_else(|| self.env.looks_like_production());
        let (configured, provider, missing) = self.check_storage_configured();

        if configured {
            info!(
                event_name = "storage.enforcement",
                event_domain = "startup",
                provider_name = provider.as_str(),
                strict,
                "Persistent storage configured: {}",
                provider
            );
            return Ok(self.transition(EnforcementState::Configured));
        }

        if !strict {
            warn!(
                event_name = "storage.enforcement",
                event_domain = "startup",
                strict,
                missing_vars = missing.join(",").as_str(),
                "PERSISTENT STORAGE NOT CONFIGURED: running in ephemeral mode, all data will be lost on restart"
            );
            return Ok(self.transition(EnforcementState::EphemeralWarned));
        }

        self.transition(EnforcementState::FatalHalted);
        error!(
            event_name = "storage.enforcement",
            event_domain = "startup",
            strict,
            missing_vars = missing.join(",").as_str(),
            "PERSISTENT STORAGE NOT CONFIGURED: configure Cloudflare R2 (R2_ACCOUNT_ID, R2_ACCESS_KEY_ID, \
             R2_SECRET_ACCESS_KEY, R2_BUCKET_NAME), Google Cloud Storage (GOOGLE_APPLICATION_CREDENTIALS, \
             GCS_BUCKET_NAME) or a persistent disk (PERSISTENT_DISK_PATH); startup blocked"
        );
        Err(EnforcementFailure { missing_vars: missing })
    }

    /// Fresh snapshot for readiness probes.
    pub fn get_storage_status(&self) -> EnforcementStatus {
        let (configured, provider, missing_vars) = self.check_storage_configured();
        let message = if configured {
            format!("Using {}", provider)
        } else {
            "No persistent storage configured".to_string()
        };
        EnforcementStatus {
            configured,
            provider,
            missing_vars,
            override_active: self.env.flag(PERSISTENCE_OVERRIDE),
            strict: self.env.looks_like_production(),
            status: if configured { "ready" } else { "blocked" }.to_string(),
            message,
        }
    }
}
