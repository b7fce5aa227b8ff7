use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::opendal_store::OpendalStore;
use crate::config::HttpConfig;
use crate::errors::StorageError;
use crate::models::{StorageConfig, StorageCredentials};

/// The ObjectStore trait abstracts one bucket (put, get, delete, list).
///
/// Keys are plain object keys; namespacing is the caller's job.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// A descriptive name for logs, e.g. `s3:semptify-user-42`.
    fn get_name(&self) -> &str;

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Returns [`StorageError::NotFound`] when the key does not exist.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;

    /// Keys starting with `prefix`, returned in full.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Opens the backend matching the credentials in `config`.
pub fn connect(config: &StorageConfig, http: &HttpConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    if config.bucket_name.trim().is_empty() {
        return Err(StorageError::InvalidInput("bucket name is empty".into()));
    }
    match &config.credentials {
        StorageCredentials::AccessKey {
            access_key_id,
            secret_access_key,
        } => {
            debug!(
                provider = config.provider.as_str(),
                bucket = config.bucket_name.as_str(),
                "opening S3-compatible store"
            );
            let store = OpendalStore::s3(
                &config.endpoint_url,
                &config.bucket_name,
                access_key_id,
                secret_access_key,
                http,
            )?;
            Ok(Arc::new(store))
        }
        StorageCredentials::ServiceAccount(key) => {
            debug!(
                provider = config.provider.as_str(),
                bucket = config.bucket_name.as_str(),
                service_account = key.client_email.as_str(),
                "opening GCS store"
            );
            let store = OpendalStore::gcs(&config.endpoint_url, &config.bucket_name, key, http)?;
            Ok(Arc::new(store))
        }
    }
}

/// Opens an [`ObjectStore`] for a [`StorageConfig`].
///
/// Components that act on caller-supplied credentials go through this seam
/// so an embedding can substitute its own transport.
pub trait StoreConnector: Send + Sync {
    fn connect(&self, config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StorageError>;
}

/// Connects over HTTP using [`connect`].
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    http: HttpConfig,
}

impl HttpConnector {
    pub fn new(http: &HttpConfig) -> Self {
        Self { http: http.clone() }
    }
}

impl StoreConnector for HttpConnector {
    fn connect(&self, config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
        connect(config, &self.http)
    }
}

/// An HTTP client with the configured per-request timeout.
pub fn http_client(http: &HttpConfig) -> Result<reqwest::Client, StorageError> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(http.timeout_in_ms))
        .build()
        .map_err(|e| StorageError::Provider(format!("Failed to build HTTP client: {}", e)))
}

/// Runs an idempotent read, retrying provider failures up to
/// `http.read_retries` times with exponential backoff.
pub async fn retry_read<T, F, Fut>(http: &HttpConfig, what: &str, mut op: F) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Err(StorageError::Provider(msg)) if attempt < http.read_retries => {
                let delay = http.retry_backoff_ms.saturating_mul(1u64 << attempt.min(10));
                warn!(
                    event_name = "storage.read.retry",
                    event_domain = "storage",
                    attempt = attempt + 1,
                    delay_ms = delay,
                    "{} failed, retrying: {}",
                    what,
                    msg
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
