//! Application-wide storage client.
//!
//! One S3-compatible backend (R2) configured from the environment, with the
//! local filesystem as fallback when R2 is not configured. With `R2_ONLY=1`
//! the fallback is disabled and any second provider in the environment is a
//! fatal configuration error.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::base::ObjectStore;
use super::opendal_store::OpendalStore;
use crate::config::{
    HttpConfig, StorageEnv, StorageSettings, R2_ACCESS_KEY_ID, R2_BUCKET_NAME, R2_ONLY,
    R2_SECRET_ACCESS_KEY,
};
use crate::errors::StorageError;

const PROFILE_INDEX_FILES: &[&str] = &["profiles.json", "active_profile.json"];
const FALLBACK_LOG_WINDOW: Duration = Duration::from_secs(60);

enum Backend {
    Remote(Arc<dyn ObjectStore>),
    Local,
}

pub struct UnifiedStorageClient {
    env: StorageEnv,
    settings: StorageSettings,
    http: HttpConfig,
    exclusive: bool,
    remote: OnceCell<Option<Arc<dyn ObjectStore>>>,
    local: OpendalStore,
    throttle: crate::utils::log_throttle::LogThrottle,
}

impl UnifiedStorageClient {
    /// Opens the local fallback; the remote client is built on first use.
    pub fn new(env: &StorageEnv, settings: &StorageSettings, http: &HttpConfig) -> Result<Self, StorageError> {
        Ok(Self {
            env: env.clone(),
            settings: settings.clone(),
            http: http.clone(),
            exclusive: env.flag(R2_ONLY),
            remote: OnceCell::new(),
            local: OpendalStore::fs(&settings.local_root)?,
            throttle: crate::utils::log_throttle::LogThrottle::new(FALLBACK_LOG_WINDOW),
        })
    }

    /// Uses `remote` instead of building one from the environment.
    pub fn with_remote(
        remote: Arc<dyn ObjectStore>,
        settings: &StorageSettings,
        exclusive: bool,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            env: StorageEnv::default(),
            settings: settings.clone(),
            http: HttpConfig::default(),
            exclusive,
            remote: OnceCell::new_with(Some(Some(remote))),
            local: OpendalStore::fs(&settings.local_root)?,
            throttle: crate::utils::log_throttle::LogThrottle::new(FALLBACK_LOG_WINDOW),
        })
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// The shared remote client, built once.
    ///
    /// `Ok(None)` means no remote is configured and callers should use the
    /// local fallback. Errors only occur in exclusive mode.
    pub async fn get_client(&self) -> Result<Option<Arc<dyn ObjectStore>>, StorageError> {
        self.remote
            .get_or_try_init(|| async { self.build_client() })
            .await
            .cloned()
    }

    fn build_client(&self) -> Result<Option<Arc<dyn ObjectStore>>, StorageError> {
        if self.exclusive {
            if let Some(hint) = self.env.conflicting_provider() {
                return Err(StorageError::ConflictingConfig(format!(
                    "R2_ONLY mode active; conflicting provider env detected: {}",
                    hint
                )));
            }
        }

        let endpoint = self.env.r2_endpoint();
        let access_key = self.env.get(R2_ACCESS_KEY_ID);
        let secret_key = self.env.get(R2_SECRET_ACCESS_KEY);
        let (endpoint, access_key, secret_key) = match (endpoint, access_key, secret_key) {
            (Some(e), Some(a), Some(s)) => (e, a, s),
            _ if self.exclusive => {
                return Err(StorageError::NotConfigured(
                    "R2_ONLY enforced but R2 credentials incomplete".into(),
                ))
            }
            _ => {
                debug!("R2 credentials incomplete; no remote storage client");
                return Ok(None);
            }
        };

        let bucket = self
            .env
            .get(R2_BUCKET_NAME)
            .unwrap_or(&self.settings.default_app_bucket);
        let store = OpendalStore::s3(&endpoint, bucket, access_key, secret_key, &self.http)?;
        info!(
            event_name = "storage.client.created",
            event_domain = "storage",
            bucket,
            exclusive = self.exclusive,
            "Created R2 storage client"
        );
        Ok(Some(Arc::new(store)))
    }

    /// The integrity check run once at startup: with exclusivity on, a
    /// usable R2 client must exist.
    pub async fn ensure_exclusive(&self) -> Result<(), StorageError> {
        if !self.exclusive {
            return Ok(());
        }
        match self.get_client().await? {
            Some(_) => Ok(()),
            None => Err(StorageError::NotConfigured(
                "R2_ONLY=1 but R2 client unavailable".into(),
            )),
        }
    }

    pub async fn is_remote_available(&self) -> bool {
        matches!(self.get_client().await, Ok(Some(_)))
    }

    async fn backend(&self) -> Option<Backend> {
        match self.get_client().await {
            Ok(Some(client)) => Some(Backend::Remote(client)),
            Ok(None) if self.exclusive => None,
            Ok(None) => {
                if let Some(suppressed) = self.throttle.should_emit("storage.local_fallback") {
                    warn!(
                        event_name = "storage.local_fallback",
                        event_domain = "storage",
                        suppressed_count = suppressed,
                        local_root = %self.settings.local_root.display(),
                        "Remote storage not configured, using local filesystem"
                    );
                }
                Some(Backend::Local)
            }
            Err(e) => {
                error!("Storage client unavailable: {}", e);
                None
            }
        }
    }

    fn remote_prefix(&self, profile_id: &str) -> String {
        format!("{}/{}/", self.settings.remote_root.trim_end_matches('/'), profile_id)
    }

    /// Validates the pair and returns `(remote_key, local_key)`.
    fn keys_for(&self, profile_id: &str, filename: &str) -> Result<(String, String), StorageError> {
        validate_segment("profile id", profile_id)?;
        validate_segment("filename", filename)?;
        Ok((
            format!("{}{}", self.remote_prefix(profile_id), filename),
            format!("{}/{}", profile_id, filename),
        ))
    }

    pub async fn upload_bytes(&self, profile_id: &str, filename: &str, data: &[u8]) -> bool {
        let (remote_key, local_key) = match self.keys_for(profile_id, filename) {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Rejected upload: {}", e);
                return false;
            }
        };
        let result = match self.backend().await {
            Some(Backend::Remote(client)) => client.put_object(&remote_key, data.to_vec(), None).await,
            Some(Backend::Local) => self.local.put_object(&local_key, data.to_vec(), None).await,
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Upload failed for profile '{}' file '{}': {}", profile_id, filename, e);
                false
            }
        }
    }

    pub async fn download_bytes(&self, profile_id: &str, filename: &str) -> Option<Vec<u8>> {
        let (remote_key, local_key) = match self.keys_for(profile_id, filename) {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Rejected download: {}", e);
                return None;
            }
        };
        let result = match self.backend().await? {
            Backend::Remote(client) => client.get_object(&remote_key).await,
            Backend::Local => self.local.get_object(&local_key).await,
        };
        match result {
            Ok(bytes) => Some(bytes),
            Err(StorageError::NotFound(_)) => None,
            Err(e) => {
                error!("Download failed for profile '{}' file '{}': {}", profile_id, filename, e);
                None
            }
        }
    }

    /// File names (without the profile prefix) stored for `profile_id`.
    pub async fn list_profile_files(&self, profile_id: &str) -> Vec<String> {
        if let Err(e) = validate_segment("profile id", profile_id) {
            warn!("Rejected listing: {}", e);
            return Vec::new();
        }
        let (prefix, result) = match self.backend().await {
            Some(Backend::Remote(client)) => {
                let prefix = self.remote_prefix(profile_id);
                let result = client.list_objects(&prefix).await;
                (prefix, result)
            }
            Some(Backend::Local) => {
                let prefix = format!("{}/", profile_id);
                let result = self.local.list_objects(&prefix).await;
                (prefix, result)
            }
            None => return Vec::new(),
        };
        match result {
            Ok(keys) => keys
                .into_iter()
                .filter(|k| !k.ends_with('/'))
                .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
                .filter(|k| !k.is_empty())
                .collect(),
            Err(e) => {
                error!("Listing failed for profile '{}': {}", profile_id, e);
                Vec::new()
            }
        }
    }

    pub async fn delete_file(&self, profile_id: &str, filename: &str) -> bool {
        let (remote_key, local_key) = match self.keys_for(profile_id, filename) {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Rejected delete: {}", e);
                return false;
            }
        };
        let result = match self.backend().await {
            Some(Backend::Remote(client)) => client.delete_object(&remote_key).await,
            Some(Backend::Local) => self.local.delete_object(&local_key).await,
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Delete failed for profile '{}' file '{}': {}", profile_id, filename, e);
                false
            }
        }
    }

    pub async fn save_json<T: Serialize + ?Sized>(&self, profile_id: &str, filename: &str, value: &T) -> bool {
        match serde_json::to_vec_pretty(value) {
            Ok(bytes) => self.upload_bytes(profile_id, filename, &bytes).await,
            Err(e) => {
                error!("Failed to serialize '{}' for profile '{}': {}", filename, profile_id, e);
                false
            }
        }
    }

    /// `None` when the file is missing, unreadable or not valid JSON for `T`.
    pub async fn load_json<T: DeserializeOwned>(&self, profile_id: &str, filename: &str) -> Option<T> {
        let raw = self.download_bytes(profile_id, filename).await?;
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Stored '{}' for profile '{}' is not valid JSON: {}", filename, profile_id, e);
                None
            }
        }
    }

    /// Pushes the local profile index files to the remote root.
    /// Returns false when there is no remote or any upload fails.
    pub async fn sync_profiles_to_remote(&self) -> bool {
        let client = match self.get_client().await {
            Ok(Some(client)) => client,
            _ => {
                warn!("Remote storage not configured, profiles stay local only");
                return false;
            }
        };
        let root = self.settings.remote_root.trim_end_matches('/');
        for file in PROFILE_INDEX_FILES {
            let bytes = match self.local.get_object(file).await {
                Ok(bytes) => bytes,
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => {
                    error!("Profile sync failed reading '{}': {}", file, e);
                    return false;
                }
            };
            let key = format!("{}/{}", root, file);
            if let Err(e) = client.put_object(&key, bytes, Some("application/json")).await {
                error!("Profile sync failed uploading '{}': {}", file, e);
                return false;
            }
        }
        info!("Synced profile index files to remote storage");
        true
    }

    /// Pulls the profile index files from the remote root into the local root.
    /// Files absent remotely keep their local defaults.
    pub async fn restore_profiles_from_remote(&self) -> bool {
        let client = match self.get_client().await {
            Ok(Some(client)) => client,
            _ => return false,
        };
        let root = self.settings.remote_root.trim_end_matches('/');
        for file in PROFILE_INDEX_FILES {
            let key = format!("{}/{}", root, file);
            match client.get_object(&key).await {
                Ok(bytes) => {
                    if let Err(e) = self.local.put_object(file, bytes, None).await {
                        error!("Profile restore failed writing '{}': {}", file, e);
                        return false;
                    }
                }
                Err(StorageError::NotFound(_)) => {
                    info!("No '{}' in remote storage, keeping local defaults", file);
                }
                Err(e) => {
                    error!("Profile restore failed downloading '{}': {}", file, e);
                    return false;
                }
            }
        }
        info!("Restored profile index files from remote storage");
        true
    }
}

fn validate_segment(what: &str, value: &str) -> Result<(), StorageError> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
        || value.chars().any(char::is_control);
    if bad {
        Err(StorageError::InvalidInput(format!("invalid {} '{}'", what, value)))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CONFLICTING_PROVIDER_HINTS, R2_ACCOUNT_ID, R2_ENDPOINT_URL};

    fn settings(root: &std::path::Path) -> StorageSettings {
        StorageSettings {
            local_root: root.to_path_buf(),
            ..StorageSettings::default()
        }
    }

    fn r2_env(extra: &[(&str, &str)]) -> StorageEnv {
        let mut pairs = vec![
            (R2_ENDPOINT_URL, "http://127.0.0.1:9"),
            (R2_ACCESS_KEY_ID, "AKID"),
            (R2_SECRET_ACCESS_KEY, "SECRET"),
            (R2_BUCKET_NAME, "app"),
        ];
        pairs.extend_from_slice(extra);
        StorageEnv::from_pairs(pairs)
    }

    #[tokio::test]
    async fn without_credentials_falls_back_to_local_disk() {
        let dir = tempfile::tempdir().unwrap();
        let client = UnifiedStorageClient::new(
            &StorageEnv::default(),
            &settings(dir.path()),
            &HttpConfig::default(),
        )
        .unwrap();
        assert!(client.get_client().await.unwrap().is_none());
        client.ensure_exclusive().await.unwrap();

        assert!(client.save_json("p1", "case.json", &serde_json::json!({"rent": 900})).await);
        assert!(dir.path().join("p1").join("case.json").exists());
        let loaded: serde_json::Value = client.load_json("p1", "case.json").await.unwrap();
        assert_eq!(loaded["rent"], 900);
        assert_eq!(client.list_profile_files("p1").await, vec!["case.json"]);
        assert!(client.download_bytes("p1", "missing.bin").await.is_none());
        assert!(client.delete_file("p1", "case.json").await);
        assert!(client.list_profile_files("p1").await.is_empty());
    }

    #[tokio::test]
    async fn exclusive_mode_without_credentials_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let env = StorageEnv::from_pairs([(R2_ONLY, "1")]);
        let client = UnifiedStorageClient::new(&env, &settings(dir.path()), &HttpConfig::default()).unwrap();

        assert!(matches!(
            client.ensure_exclusive().await,
            Err(StorageError::NotConfigured(_))
        ));
        assert!(!client.upload_bytes("p1", "a.txt", b"data").await);
        assert!(client.download_bytes("p1", "a.txt").await.is_none());
        assert!(client.list_profile_files("p1").await.is_empty());
        // nothing may leak to the local fallback
        assert!(!dir.path().join("p1").exists());
    }

    #[tokio::test]
    async fn exclusive_mode_rejects_conflicting_provider() {
        let dir = tempfile::tempdir().unwrap();
        for hint in CONFLICTING_PROVIDER_HINTS {
            let env = r2_env(&[(R2_ONLY, "1"), (hint, "set")]);
            let client = UnifiedStorageClient::new(&env, &settings(dir.path()), &HttpConfig::default()).unwrap();
            match client.get_client().await {
                Err(StorageError::ConflictingConfig(msg)) => assert!(msg.contains(hint)),
                Err(other) => panic!("unexpected error for {}: {:?}", hint, other),
                Ok(_) => panic!("client built despite conflicting {}", hint),
            }
            assert!(client.ensure_exclusive().await.is_err());
        }
    }

    #[tokio::test]
    async fn conflicting_hint_is_tolerated_without_exclusivity() {
        let dir = tempfile::tempdir().unwrap();
        let env = r2_env(&[("AWS_ACCESS_KEY_ID", "other")]);
        let client = UnifiedStorageClient::new(&env, &settings(dir.path()), &HttpConfig::default()).unwrap();
        assert!(client.get_client().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_first_use_builds_one_client() {
        let dir = tempfile::tempdir().unwrap();
        let env = r2_env(&[(R2_ACCOUNT_ID, "acct")]);
        let client = Arc::new(
            UnifiedStorageClient::new(&env, &settings(dir.path()), &HttpConfig::default()).unwrap(),
        );

        let mut handles = Vec::new();
        for _ in 0..16 {
            let client = client.clone();
            handles.push(tokio::spawn(async move { client.get_client().await }));
        }
        let mut built = Vec::new();
        for handle in handles {
            built.push(handle.await.unwrap().unwrap().unwrap());
        }
        assert!(built.iter().all(|c| Arc::ptr_eq(c, &built[0])));
        assert_eq!(built[0].get_name(), "s3:app");
    }

    #[tokio::test]
    async fn remote_keys_live_under_profile_root() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        let remote: Arc<dyn ObjectStore> = Arc::new(OpendalStore::fs(remote_dir.path()).unwrap());
        let client = UnifiedStorageClient::with_remote(remote, &settings(local_dir.path()), true).unwrap();

        assert!(client.upload_bytes("p7", "lease.pdf", b"%PDF").await);
        assert!(remote_dir
            .path()
            .join("data/profiles/p7/lease.pdf")
            .exists());
        assert_eq!(client.list_profile_files("p7").await, vec!["lease.pdf"]);
        assert_eq!(
            client.download_bytes("p7", "lease.pdf").await.unwrap(),
            b"%PDF".to_vec()
        );
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let client = UnifiedStorageClient::new(
            &StorageEnv::default(),
            &settings(dir.path()),
            &HttpConfig::default(),
        )
        .unwrap();
        assert!(!client.upload_bytes("..", "x", b"1").await);
        assert!(!client.upload_bytes("p1", "../x", b"1").await);
        assert!(client.list_profile_files("a/b").await.is_empty());
    }

    #[tokio::test]
    async fn profile_index_sync_and_restore() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        std::fs::write(local_dir.path().join("profiles.json"), b"[\"p1\"]").unwrap();

        let remote: Arc<dyn ObjectStore> = Arc::new(OpendalStore::fs(remote_dir.path()).unwrap());
        let client = UnifiedStorageClient::with_remote(remote.clone(), &settings(local_dir.path()), false).unwrap();
        assert!(client.sync_profiles_to_remote().await);
        assert!(remote_dir.path().join("data/profiles/profiles.json").exists());

        let fresh_dir = tempfile::tempdir().unwrap();
        let restored = UnifiedStorageClient::with_remote(remote, &settings(fresh_dir.path()), false).unwrap();
        assert!(restored.restore_profiles_from_remote().await);
        assert_eq!(
            std::fs::read(fresh_dir.path().join("profiles.json")).unwrap(),
            b"[\"p1\"]".to_vec()
        );
        assert!(!fresh_dir.path().join("active_profile.json").exists());
    }

    #[tokio::test]
    async fn sync_without_remote_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let client = UnifiedStorageClient::new(
            &StorageEnv::default(),
            &settings(dir.path()),
            &HttpConfig::default(),
        )
        .unwrap();
        assert!(!client.sync_profiles_to_remote().await);
        assert!(!client.restore_profiles_from_remote().await);
    }
}
