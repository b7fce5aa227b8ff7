//! Google Cloud Storage bucket administration over the JSON API,
//! authenticated as a service account. Object traffic goes through
//! [`OpendalStore::gcs`](super::opendal_store::OpendalStore::gcs).

#[allow(unused_imports)]
use cached::proc_macro::cached;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{StatusCode, Url};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use super::base::http_client;
use crate::config::HttpConfig;
use crate::errors::StorageError;
use crate::models::ServiceAccountKey;

const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.full_control";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Signs the RS256 JWT assertion that is exchanged for an access token.
pub fn sign_assertion(key: &ServiceAccountKey) -> Result<String, String> {
    let now = Utc::now().timestamp();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: STORAGE_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + 3600,
    };
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| format!("Invalid service account private key: {}", e))?;
    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| format!("Failed to sign service account assertion: {}", e))
}

/// Exchanges a signed assertion for an OAuth2 access token.
/// Tokens live for an hour; results are cached for 50 minutes per account.
#[cfg_attr(
    not(test),
    cached(
        time = 3000,
        result = true,
        sync_writes = true,
        key = "String",
        convert = r#"{ format!("{}|{}", sa.client_email, sa.token_uri) }"#
    )
)]
async fn fetch_access_token(sa: ServiceAccountKey, timeout_in_ms: u64) -> Result<String, String> {
    let assertion = sign_assertion(&sa)?;
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(timeout_in_ms))
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

    debug!(
        "Requesting access token for service account '{}'",
        sa.client_email
    );
    let response = client
        .post(&sa.token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await
        .map_err(|e| format!("Error sending token request: {}", e.without_url()))?;

    if !response.status().is_success() {
        return Err(format!(
            "Token endpoint returned status {}",
            response.status()
        ));
    }
    let body: Value = response
        .json()
        .await
        .map_err(|e| format!("Error parsing token response: {}", e))?;
    body.get("access_token")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| "Token response had no access_token".to_string())
}

/// Access token for `key`, as a storage error on failure.
pub async fn access_token(key: &ServiceAccountKey, http: &HttpConfig) -> Result<String, StorageError> {
    fetch_access_token(key.clone(), http.timeout_in_ms)
        .await
        .map_err(StorageError::Provider)
}

/// `api_base` with `segments` appended, each percent-encoded as one segment.
pub fn api_url(api_base: &str, segments: &[&str]) -> Result<Url, StorageError> {
    let mut url = Url::parse(api_base)
        .map_err(|e| StorageError::InvalidInput(format!("invalid GCS API base: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| StorageError::InvalidInput("GCS API base cannot be a base URL".into()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Bucket-level operations used by provisioning.
pub struct GcsBucketAdmin {
    client: reqwest::Client,
    api_base: String,
    key: ServiceAccountKey,
    http: HttpConfig,
}

impl GcsBucketAdmin {
    pub fn new(api_base: &str, key: ServiceAccountKey, http: &HttpConfig) -> Result<Self, StorageError> {
        api_url(api_base, &[])?;
        Ok(Self {
            client: http_client(http)?,
            api_base: api_base.to_string(),
            key,
            http: http.clone(),
        })
    }

    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        let url = api_url(&self.api_base, &["storage", "v1", "b", bucket])?;
        let token = access_token(&self.key, &self.http).await?;
        let response = self.client.get(url).bearer_auth(token).send().await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(StorageError::Provider(format!("GCS bucket lookup returned {}", s))),
        }
    }

    /// Creates `bucket`. A 409 means the name is taken, by us or anyone else.
    pub async fn create_bucket(
        &self,
        project: &str,
        bucket: &str,
        location: &str,
        storage_class: &str,
    ) -> Result<(), StorageError> {
        let mut url = api_url(&self.api_base, &["storage", "v1", "b"])?;
        url.query_pairs_mut().append_pair("project", project);
        let token = access_token(&self.key, &self.http).await?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({
                "name": bucket,
                "location": location,
                "storageClass": storage_class,
            }))
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(StorageError::AlreadyExists(bucket.to_string())),
            s => Err(StorageError::Provider(format!("GCS bucket creation returned {}", s))),
        }
    }
}
