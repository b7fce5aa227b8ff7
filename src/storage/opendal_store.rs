//! Object stores backed by Apache OpenDAL operators.
//!
//! One [`OpendalStore`] wraps one bucket (or one local directory). The
//! service behind it is chosen at construction: `S3` for R2, `Gcs` for
//! Google Cloud Storage, `Fs` for the local fallback and `Memory` for
//! development and tests.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use opendal::layers::TimeoutLayer;
use opendal::{services, ErrorKind, Operator};
use reqwest::Url;
use serde_json::json;

use super::base::{retry_read, ObjectStore};
use crate::config::HttpConfig;
use crate::errors::StorageError;
use crate::models::ServiceAccountKey;

/// R2 ignores the region but SigV4 needs one.
const R2_REGION: &str = "auto";

pub struct OpendalStore {
    name: String,
    op: Operator,
    http: HttpConfig,
}

fn config_error(what: &str, e: opendal::Error) -> StorageError {
    StorageError::InvalidInput(format!("{}: {}", what, e))
}

fn check_endpoint(endpoint: &str) -> Result<(), StorageError> {
    match Url::parse(endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => Ok(()),
        _ => Err(StorageError::InvalidInput(format!("invalid endpoint '{}'", endpoint))),
    }
}

/// Rejects keys that are empty, absolute or that step outside the root.
fn check_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|part| part == "." || part == "..")
        || key.contains('\\');
    if bad {
        Err(StorageError::InvalidInput(format!("invalid object key '{}'", key)))
    } else {
        Ok(())
    }
}

fn map_error(key: &str, e: opendal::Error) -> StorageError {
    match e.kind() {
        ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
        ErrorKind::ConfigInvalid => StorageError::InvalidInput(e.to_string()),
        _ => StorageError::Provider(e.to_string()),
    }
}

impl OpendalStore {
    fn from_operator(name: String, op: Operator, http: &HttpConfig) -> Self {
        Self {
            name,
            op,
            http: http.clone(),
        }
    }

    fn with_timeout(op: Operator, http: &HttpConfig) -> Operator {
        op.layer(TimeoutLayer::new().with_timeout(Duration::from_millis(http.timeout_in_ms)))
    }

    /// An S3-compatible bucket (R2), path-style, signed with a static key pair.
    pub fn s3(
        endpoint: &str,
        bucket: &str,
        access_key_id: &str,
        secret_access_key: &str,
        http: &HttpConfig,
    ) -> Result<Self, StorageError> {
        check_endpoint(endpoint)?;
        if bucket.trim().is_empty() {
            return Err(StorageError::InvalidInput("bucket name is empty".into()));
        }
        if access_key_id.is_empty() || secret_access_key.is_empty() {
            return Err(StorageError::InvalidInput("S3 access key pair is incomplete".into()));
        }
        let builder = services::S3::default()
            .root("/")
            .bucket(bucket)
            .endpoint(endpoint)
            .region(R2_REGION)
            .access_key_id(access_key_id)
            .secret_access_key(secret_access_key)
            .disable_config_load()
            .disable_ec2_metadata();
        let op = Operator::new(builder)
            .map_err(|e| config_error("S3 operator", e))?
            .finish();
        Ok(Self::from_operator(
            format!("s3:{}", bucket),
            Self::with_timeout(op, http),
            http,
        ))
    }

    /// A GCS bucket reached with a service account key.
    pub fn gcs(
        endpoint: &str,
        bucket: &str,
        key: &ServiceAccountKey,
        http: &HttpConfig,
    ) -> Result<Self, StorageError> {
        check_endpoint(endpoint)?;
        if bucket.trim().is_empty() {
            return Err(StorageError::InvalidInput("bucket name is empty".into()));
        }
        let credential = json!({
            "type": "service_account",
            "client_email": key.client_email,
            "private_key": key.private_key,
            "token_uri": key.token_uri,
            "project_id": key.project_id,
        });
        let builder = services::Gcs::default()
            .root("/")
            .bucket(bucket)
            .endpoint(endpoint)
            .credential(&STANDARD.encode(credential.to_string()))
            .disable_config_load()
            .disable_vm_metadata();
        let op = Operator::new(builder)
            .map_err(|e| config_error("GCS operator", e))?
            .finish();
        Ok(Self::from_operator(
            format!("gcs:{}", bucket),
            Self::with_timeout(op, http),
            http,
        ))
    }

    /// A directory on the local filesystem.
    pub fn fs(root: &Path) -> Result<Self, StorageError> {
        let builder = services::Fs::default().root(&root.to_string_lossy());
        let op = Operator::new(builder)
            .map_err(|e| config_error("filesystem operator", e))?
            .finish();
        Ok(Self::from_operator(
            format!("local:{}", root.display()),
            op,
            &HttpConfig::default(),
        ))
    }

    /// A process-local bucket.
    pub fn memory(bucket: &str) -> Result<Self, StorageError> {
        let op = Operator::new(services::Memory::default())
            .map_err(|e| config_error("memory operator", e))?
            .finish();
        Ok(Self::from_operator(
            format!("memory:{}", bucket),
            op,
            &HttpConfig::default(),
        ))
    }

    async fn read_once(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.op
            .read(key)
            .await
            .map(|buffer| buffer.to_vec())
            .map_err(|e| map_error(key, e))
    }
}

#[async_trait]
impl ObjectStore for OpendalStore {
    fn get_name(&self) -> &str {
        &self.name
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        check_key(key)?;
        let mut write = self.op.write_with(key, body);
        if let Some(content_type) = content_type {
            if self.op.info().full_capability().write_with_content_type {
                write = write.content_type(content_type);
            }
        }
        write.await.map_err(|e| map_error(key, e))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        check_key(key)?;
        retry_read(&self.http, "object read", || self.read_once(key)).await
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        check_key(key)?;
        self.op.delete(key).await.map_err(|e| map_error(key, e))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // list the enclosing directory, then narrow to the exact prefix
        let dir = match prefix.rfind('/') {
            Some(i) => &prefix[..=i],
            None => "/",
        };
        if dir != "/" {
            check_key(dir)?;
        }
        let entries = match self.op.list_with(dir).recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_error(dir, e)),
        };
        let mut keys: Vec<String> = entries
            .iter()
            .map(|entry| entry.path().trim_start_matches('/').to_string())
            .filter(|path| !path.is_empty() && !path.ends_with('/') && path.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn memory_round_trip_and_prefix_listing() {
        let store = OpendalStore::memory("b").unwrap();
        store.put_object("p/a.txt", b"a".to_vec(), Some("text/plain")).await.unwrap();
        store.put_object("p/sub/b.txt", b"b".to_vec(), None).await.unwrap();
        store.put_object("q/c.txt", b"c".to_vec(), None).await.unwrap();

        assert_eq!(store.get_object("p/a.txt").await.unwrap(), b"a".to_vec());
        assert_eq!(store.list_objects("p/").await.unwrap(), vec!["p/a.txt", "p/sub/b.txt"]);
        assert_eq!(store.list_objects("p/a").await.unwrap(), vec!["p/a.txt"]);
        assert_eq!(store.list_objects("").await.unwrap().len(), 3);

        store.delete_object("p/a.txt").await.unwrap();
        assert!(matches!(
            store.get_object("p/a.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn filesystem_store_writes_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = OpendalStore::fs(dir.path()).unwrap();
        store.put_object("p1/notes.txt", b"hi".to_vec(), Some("text/plain")).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("p1/notes.txt")).unwrap(), b"hi".to_vec());
        assert_eq!(store.list_objects("p1/").await.unwrap(), vec!["p1/notes.txt"]);
        assert!(store.list_objects("nobody/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keys_escaping_the_root_are_rejected() {
        let store = OpendalStore::memory("b").unwrap();
        for key in ["", "/abs", "../up", "a/../../b", "a\\b"] {
            assert!(matches!(
                store.put_object(key, b"x".to_vec(), None).await,
                Err(StorageError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn s3_store_validates_inputs() {
        let http = HttpConfig::default();
        assert!(OpendalStore::s3("not a url", "b", "a", "s", &http).is_err());
        assert!(OpendalStore::s3("https://example.com", "b", "", "s", &http).is_err());
        assert!(OpendalStore::s3("https://example.com", " ", "a", "s", &http).is_err());
        let store = OpendalStore::s3("https://acct.r2.cloudflarestorage.com", "app", "a", "s", &http).unwrap();
        assert_eq!(store.get_name(), "s3:app");
    }

    #[tokio::test]
    async fn s3_writes_are_signed_and_rejections_surface() {
        let mut server = Server::new_async().await;
        let put = server
            .mock("PUT", "/bucket/dir/file.json")
            .match_header("authorization", Matcher::Regex("^AWS4-HMAC-SHA256 Credential=AKID/".into()))
            .with_status(403)
            .with_body("<Error><Code>AccessDenied</Code><Message>denied</Message></Error>")
            .expect(1)
            .create_async()
            .await;

        let store = OpendalStore::s3(&server.url(), "bucket", "AKID", "SECRET", &HttpConfig::default()).unwrap();
        let err = store
            .put_object("dir/file.json", b"{}".to_vec(), Some("application/json"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Provider(_)));
        put.assert_async().await;
    }
}
