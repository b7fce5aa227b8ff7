//! Google Cloud Storage: one bucket per user, reached with the deployment's
//! service account. There is no per-bucket credential, so every config this
//! provider returns carries project-wide privilege.

use std::path::PathBuf;

use tracing::{info, warn};

use super::base::{bucket_name_for, QualifyCredentials, StorageProvider};
use crate::config::{
    GcsConfig, HttpConfig, ProvisioningConfig, StorageEnv, GOOGLE_APPLICATION_CREDENTIALS,
};
use crate::errors::StorageError;
use crate::models::{
    ProviderKind, ServiceAccountKey, StorageConfig, StorageCredentials, GOOGLE_TOKEN_URI,
};
use crate::storage::GcsBucketAdmin;

pub struct GcsProvider {
    name: String,
    gcs: GcsConfig,
    bucket_prefix: String,
    credentials_path: Option<PathBuf>,
    http: HttpConfig,
}

impl GcsProvider {
    pub fn new(config: &ProvisioningConfig, env: &StorageEnv, http: &HttpConfig) -> Self {
        Self {
            name: "google-cloud-storage".to_string(),
            gcs: config.gcs.clone(),
            bucket_prefix: config.bucket_prefix.clone(),
            credentials_path: env.get(GOOGLE_APPLICATION_CREDENTIALS).map(PathBuf::from),
            http: http.clone(),
        }
    }

    async fn service_account(&self) -> Result<ServiceAccountKey, StorageError> {
        let path = self.credentials_path.as_ref().ok_or_else(|| {
            StorageError::NotConfigured(format!(
                "{} is required for GCS provisioning",
                GOOGLE_APPLICATION_CREDENTIALS
            ))
        })?;
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            StorageError::NotConfigured(format!(
                "cannot read service account file {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            StorageError::NotConfigured(format!("invalid service account file: {}", e))
        })
    }

    fn config_for(&self, bucket: String, key: ServiceAccountKey) -> StorageConfig {
        StorageConfig {
            provider: ProviderKind::Gcs,
            bucket_name: bucket,
            account_id: key.project_id.clone(),
            credentials: StorageCredentials::ServiceAccount(key),
            endpoint_url: self.gcs.api_base.clone(),
            prefix: None,
            shared: false,
        }
    }
}

#[async_trait::async_trait]
impl StorageProvider for GcsProvider {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gcs
    }

    async fn provision(&self, user_id: &str) -> Result<StorageConfig, StorageError> {
        let key = self.service_account().await?;
        let project = key.project_id.clone().ok_or_else(|| {
            StorageError::NotConfigured("service account file has no project_id".into())
        })?;
        let bucket = bucket_name_for(&self.bucket_prefix, user_id)?;
        let admin = GcsBucketAdmin::new(&self.gcs.api_base, key.clone(), &self.http)?;

        if admin.bucket_exists(&bucket).await? {
            return Err(StorageError::AlreadyExists(bucket));
        }
        admin
            .create_bucket(&project, &bucket, &self.gcs.location, &self.gcs.storage_class)
            .await?;
        info!(
            event_name = "provisioning.gcs.bucket",
            event_domain = "provisioning",
            provider_name = self.name.as_str(),
            bucket = bucket.as_str(),
            location = self.gcs.location.as_str(),
            storage_class = self.gcs.storage_class.as_str(),
            "Created GCS bucket"
        );

        warn!(
            event_name = "provisioning.gcs.unscoped",
            event_domain = "provisioning",
            bucket = bucket.as_str(),
            service_account = key.client_email.as_str(),
            "GCS storage uses the service account identity; access is not limited to this bucket"
        );
        Ok(self.config_for(bucket, key))
    }

    fn qualification_target(
        &self,
        credentials: &QualifyCredentials,
        default_bucket: &str,
    ) -> Result<StorageConfig, StorageError> {
        match credentials {
            QualifyCredentials::Gcs {
                credentials_json,
                bucket_name,
            } => {
                if credentials_json.client_email.is_empty() || credentials_json.private_key.is_empty() {
                    return Err(StorageError::InvalidInput(
                        "service account is missing client_email or private_key".into(),
                    ));
                }
                let bucket = bucket_name.as_deref().unwrap_or(default_bucket).to_string();
                // the assertion is only ever sent to Google
                let mut key = credentials_json.clone();
                key.token_uri = GOOGLE_TOKEN_URI.to_string();
                Ok(self.config_for(bucket, key))
            }
            other => Err(StorageError::InvalidInput(format!(
                "{} cannot qualify {} credentials",
                self.name,
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::gcs::tests::{mock_token, test_key};
    use mockito::{Matcher, Server};
    use std::io::Write;

    fn provider(api_base: &str, key_path: Option<&std::path::Path>) -> GcsProvider {
        let mut config = ProvisioningConfig::default();
        config.gcs.api_base = api_base.to_string();
        let env = match key_path {
            Some(path) => StorageEnv::from_pairs([(
                GOOGLE_APPLICATION_CREDENTIALS,
                path.display().to_string(),
            )]),
            None => StorageEnv::default(),
        };
        GcsProvider::new(&config, &env, &HttpConfig::default())
    }

    fn key_file(token_uri: String) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let key = test_key(token_uri);
        file.write_all(serde_json::to_string(&key).unwrap().as_bytes())
            .unwrap();
        file
    }

    #[tokio::test]
    async fn missing_credentials_is_not_configured() {
        let p = provider("http://127.0.0.1:9", None);
        assert!(matches!(
            p.provision("42").await,
            Err(StorageError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn creates_bucket_only_when_absent() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let lookup = server
            .mock("GET", "/storage/v1/b/semptify-user-42")
            .match_header("authorization", "Bearer ya29.test")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/storage/v1/b")
            .match_query(Matcher::UrlEncoded("project".into(), "test-project".into()))
            .match_body(Matcher::Json(serde_json::json!({
                "name": "semptify-user-42",
                "location": "US-CENTRAL1",
                "storageClass": "STANDARD"
            })))
            .with_status(200)
            .with_body(r#"{"name": "semptify-user-42"}"#)
            .expect(1)
            .create_async()
            .await;

        let file = key_file(format!("{}/token", server.url()));
        let p = provider(&server.url(), Some(file.path()));
        let config = p.provision("42").await.unwrap();
        lookup.assert_async().await;
        create.assert_async().await;

        assert_eq!(config.provider, ProviderKind::Gcs);
        assert_eq!(config.bucket_name, "semptify-user-42");
        assert_eq!(config.account_id.as_deref(), Some("test-project"));
        assert!(!config.is_bucket_scoped());
    }

    #[tokio::test]
    async fn existing_bucket_is_refused() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server).await;
        server
            .mock("GET", "/storage/v1/b/semptify-user-42")
            .with_status(200)
            .with_body(r#"{"name": "semptify-user-42"}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/storage/v1/b")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let file = key_file(format!("{}/token", server.url()));
        let p = provider(&server.url(), Some(file.path()));
        assert!(matches!(
            p.provision("42").await,
            Err(StorageError::AlreadyExists(_))
        ));
        create.assert_async().await;
    }

    #[tokio::test]
    async fn creation_race_is_already_exists() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server).await;
        server
            .mock("GET", "/storage/v1/b/semptify-user-42")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("POST", "/storage/v1/b")
            .match_query(Matcher::Any)
            .with_status(409)
            .create_async()
            .await;

        let file = key_file(format!("{}/token", server.url()));
        let p = provider(&server.url(), Some(file.path()));
        assert!(matches!(
            p.provision("42").await,
            Err(StorageError::AlreadyExists(_))
        ));
    }

    #[test]
    fn caller_token_uri_is_replaced_with_google() {
        let p = provider("https://storage.googleapis.com", None);
        let creds = QualifyCredentials::Gcs {
            credentials_json: test_key("http://169.254.169.254/latest/meta-data".to_string()),
            bucket_name: Some("mine".into()),
        };
        let target = p.qualification_target(&creds, "semptify-user-data").unwrap();
        match target.credentials {
            StorageCredentials::ServiceAccount(key) => assert_eq!(key.token_uri, GOOGLE_TOKEN_URI),
            other => panic!("unexpected credentials {:?}", other),
        }
        assert_eq!(target.bucket_name, "mine");
    }

    #[tokio::test]
    async fn lookup_failure_is_provider_error() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server).await;
        server
            .mock("GET", "/storage/v1/b/semptify-user-42")
            .with_status(403)
            .create_async()
            .await;

        let file = key_file(format!("{}/token", server.url()));
        let p = provider(&server.url(), Some(file.path()));
        assert!(matches!(
            p.provision("42").await,
            Err(StorageError::Provider(_))
        ));
    }

    #[test]
    fn qualification_rejects_r2_credentials() {
        let p = provider("https://storage.googleapis.com", None);
        let creds = QualifyCredentials::R2 {
            account_id: "acct".into(),
            access_key: "a".into(),
            secret_key: "s".into(),
            bucket_name: None,
            endpoint_url: None,
        };
        assert!(matches!(
            p.qualification_target(&creds, "semptify-user-data"),
            Err(StorageError::InvalidInput(_))
        ));
    }
}
