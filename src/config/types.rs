use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use super::logging::LoggingConfig;
use crate::models::ProviderKind;

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0.
///
/// Provider credentials are not part of this file; they come from the
/// process environment (see [`super::StorageEnv`]).
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ConfigV1 {
    pub bind_address: String,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
}

/// Load config from a YAML file named "config.yaml" in the current directory.
///
/// Exits the process if the file is unreadable or invalid.
pub fn load_config() -> ConfigV1 {
    match load_config_from("./config.yaml") {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    }
}

/// Load config from `path`, with `SEMPTIFY_` prefixed env vars layered on top
/// (nested keys separated by `__`, e.g. `SEMPTIFY_HTTP__TIMEOUT_IN_MS`).
pub fn load_config_from(path: impl AsRef<Path>) -> Result<ConfigV1, figment::Error> {
    let figment = Figment::new()
        .merge(Yaml::file(path.as_ref()))
        .merge(Env::prefixed("SEMPTIFY_").split("__"));
    match figment.extract::<Config>()? {
        Config::ConfigV1(c) => Ok(c),
    }
    // handle configuration migration between versions here when necessary
}

/// Print the JSON schema for the configuration to stdout.
pub fn print_schema() {
    let schema = schema_for!(Config);
    match serde_json::to_string_pretty(&schema) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to render schema: {}", e),
    }
}

/// Outbound HTTP behaviour shared by every provider client.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct HttpConfig {
    /// Per-request timeout for every remote call.
    #[serde(default = "default_timeout_in_ms")]
    pub timeout_in_ms: u64,
    /// Extra attempts for idempotent object reads. Zero keeps single-attempt semantics.
    #[serde(default)]
    pub read_retries: u32,
    /// Base delay for read retry backoff; doubles per attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_timeout_in_ms() -> u64 {
    10_000
}

fn default_retry_backoff_ms() -> u64 {
    200
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_in_ms: default_timeout_in_ms(),
            read_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Settings for the application-wide storage client and the qualification flow.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct StorageSettings {
    /// Local directory used when no remote client is available.
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    /// Key prefix for profile data inside the application bucket.
    #[serde(default = "default_remote_root")]
    pub remote_root: String,
    /// Bucket used by the unified client when `R2_BUCKET_NAME` is unset.
    #[serde(default = "default_app_bucket")]
    pub default_app_bucket: String,
    /// Bucket probed during qualification when the caller names none.
    #[serde(default = "default_qualification_bucket")]
    pub default_qualification_bucket: String,
    /// Leading group of generated proof-of-control tokens.
    #[serde(default = "default_token_prefix")]
    pub token_prefix: String,
    /// Seconds a qualification session stays valid after it is opened.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Sessions kept in memory; the oldest is evicted beyond this.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_local_root() -> PathBuf {
    PathBuf::from("data/profiles")
}

fn default_remote_root() -> String {
    "data/profiles".to_string()
}

fn default_app_bucket() -> String {
    "Semptify".to_string()
}

fn default_qualification_bucket() -> String {
    "semptify-user-data".to_string()
}

fn default_token_prefix() -> String {
    "SMPT".to_string()
}

fn default_session_ttl_secs() -> u64 {
    86_400
}

fn default_max_sessions() -> usize {
    10_000
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            local_root: default_local_root(),
            remote_root: default_remote_root(),
            default_app_bucket: default_app_bucket(),
            default_qualification_bucket: default_qualification_bucket(),
            token_prefix: default_token_prefix(),
            session_ttl_secs: default_session_ttl_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Settings for per-user bucket provisioning.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ProvisioningConfig {
    /// Strategies tried by auto-provisioning, in priority order.
    #[serde(default = "default_provider_order")]
    pub order: Vec<ProviderKind>,
    #[serde(default = "default_bucket_prefix")]
    pub bucket_prefix: String,
    #[serde(default)]
    pub cloudflare: CloudflareConfig,
    #[serde(default)]
    pub gcs: GcsConfig,
    /// Shared bucket used by the logical-isolation fallback.
    #[serde(default = "default_shared_bucket")]
    pub shared_bucket: String,
    /// Bearer key required by `POST /storage/provision`. Unset disables the route.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Endpoints a caller may name instead of the provider default during
    /// qualification. Empty means only provider defaults are reachable.
    #[serde(default)]
    pub allowed_endpoints: Vec<String>,
}

fn default_provider_order() -> Vec<ProviderKind> {
    vec![ProviderKind::R2, ProviderKind::Gcs]
}

fn default_bucket_prefix() -> String {
    "semptify-user-".to_string()
}

fn default_shared_bucket() -> String {
    "semptify-storage".to_string()
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            order: default_provider_order(),
            bucket_prefix: default_bucket_prefix(),
            cloudflare: CloudflareConfig::default(),
            gcs: GcsConfig::default(),
            shared_bucket: default_shared_bucket(),
            api_key: None,
            allowed_endpoints: Vec::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct CloudflareConfig {
    #[serde(default = "default_cloudflare_api_base")]
    pub api_base: String,
    /// Permission group granting R2 object read/write.
    #[serde(default = "default_permission_group_id")]
    pub permission_group_id: String,
}

fn default_cloudflare_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_permission_group_id() -> String {
    "f267e341f3dd4697bd3b9f71dd96247f".to_string()
}

impl Default for CloudflareConfig {
    fn default() -> Self {
        Self {
            api_base: default_cloudflare_api_base(),
            permission_group_id: default_permission_group_id(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct GcsConfig {
    #[serde(default = "default_gcs_api_base")]
    pub api_base: String,
    #[serde(default = "default_gcs_location")]
    pub location: String,
    #[serde(default = "default_gcs_storage_class")]
    pub storage_class: String,
}

fn default_gcs_api_base() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_gcs_location() -> String {
    "US-CENTRAL1".to_string()
}

fn default_gcs_storage_class() -> String {
    "STANDARD".to_string()
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            api_base: default_gcs_api_base(),
            location: default_gcs_location(),
            storage_class: default_gcs_storage_class(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
version: "1.0.0"
bind_address: 127.0.0.1:8080
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.yaml", MINIMAL)?;
            let cfg = load_config_from("config.yaml")?;
            assert_eq!(cfg.bind_address, "127.0.0.1:8080");
            assert_eq!(cfg.http.timeout_in_ms, 10_000);
            assert_eq!(cfg.http.read_retries, 0);
            assert_eq!(cfg.storage.token_prefix, "SMPT");
            assert_eq!(
                cfg.provisioning.order,
                vec![ProviderKind::R2, ProviderKind::Gcs]
            );
            assert_eq!(cfg.logging.level, "info");
            assert_eq!(cfg.storage.session_ttl_secs, 86_400);
            assert_eq!(cfg.storage.max_sessions, 10_000);
            assert!(cfg.provisioning.api_key.is_none());
            assert!(cfg.provisioning.allowed_endpoints.is_empty());
            Ok(())
        });
    }

    #[test]
    fn prefixed_env_overrides_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.yaml", MINIMAL)?;
            jail.set_env("SEMPTIFY_HTTP__TIMEOUT_IN_MS", "2500");
            let cfg = load_config_from("config.yaml")?;
            assert_eq!(cfg.http.timeout_in_ms, 2500);
            Ok(())
        });
    }

    #[test]
    fn provisioning_key_comes_from_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.yaml", MINIMAL)?;
            jail.set_env("SEMPTIFY_PROVISIONING__API_KEY", "admin-secret");
            let cfg = load_config_from("config.yaml")?;
            assert_eq!(cfg.provisioning.api_key.as_deref(), Some("admin-secret"));
            Ok(())
        });
    }

    #[test]
    fn unknown_version_is_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.yaml", "version: \"9.9.9\"\nbind_address: x\n")?;
            assert!(load_config_from("config.yaml").is_err());
            Ok(())
        });
    }
}
