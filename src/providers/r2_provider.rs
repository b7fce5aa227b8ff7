//! Cloudflare R2: one bucket plus one bucket-scoped API token per user.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::base::{bucket_name_for, QualifyCredentials, StorageProvider};
use crate::config::{
    r2_endpoint_for_account, CloudflareConfig, HttpConfig, ProvisioningConfig, StorageEnv,
    CF_ACCOUNT_ID, CF_API_TOKEN,
};
use crate::errors::StorageError;
use crate::models::{sha256_hex, ProviderKind, StorageConfig};
use crate::storage::base::http_client;

#[derive(Deserialize)]
struct CloudflareEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    errors: Vec<CloudflareMessage>,
}

#[derive(Deserialize)]
struct CloudflareMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

fn describe_failure(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<CloudflareEnvelope>(body) {
        Ok(envelope) if !envelope.errors.is_empty() => {
            let errors: Vec<String> = envelope
                .errors
                .iter()
                .map(|e| format!("{} {}", e.code, e.message))
                .collect();
            format!("Cloudflare API returned {}: {}", status, errors.join("; "))
        }
        _ => format!("Cloudflare API returned {}", status),
    }
}

pub struct R2Provider {
    name: String,
    cloudflare: CloudflareConfig,
    bucket_prefix: String,
    account_id: Option<String>,
    api_token: Option<String>,
    allowed_endpoints: Vec<String>,
    http: HttpConfig,
}

/// Cloudflare account ids are 32 hex chars; anything alphanumeric up to 64
/// is accepted so the derived endpoint host stays a single label.
fn valid_account_id(account_id: &str) -> bool {
    (1..=64).contains(&account_id.len()) && account_id.chars().all(|c| c.is_ascii_alphanumeric())
}

impl R2Provider {
    pub fn new(config: &ProvisioningConfig, env: &StorageEnv, http: &HttpConfig) -> Self {
        Self {
            name: "cloudflare-r2".to_string(),
            cloudflare: config.cloudflare.clone(),
            bucket_prefix: config.bucket_prefix.clone(),
            account_id: env.get(CF_ACCOUNT_ID).map(str::to_string),
            api_token: env.get(CF_API_TOKEN).map(str::to_string),
            allowed_endpoints: config
                .allowed_endpoints
                .iter()
                .map(|e| e.trim_end_matches('/').to_string())
                .collect(),
            http: http.clone(),
        }
    }

    fn credentials(&self) -> Result<(&str, &str), StorageError> {
        match (self.account_id.as_deref(), self.api_token.as_deref()) {
            (Some(account), Some(token)) => Ok((account, token)),
            _ => Err(StorageError::NotConfigured(format!(
                "{} and {} are required for R2 provisioning",
                CF_ACCOUNT_ID, CF_API_TOKEN
            ))),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.cloudflare.api_base.trim_end_matches('/'), path)
    }

    /// Creates `bucket`; a 409 means someone already owns the name.
    async fn create_bucket(
        &self,
        client: &reqwest::Client,
        account: &str,
        api_token: &str,
        bucket: &str,
    ) -> Result<(), StorageError> {
        let response = client
            .post(self.api_url(&format!("/accounts/{}/r2/buckets", account)))
            .bearer_auth(api_token)
            .json(&json!({ "name": bucket }))
            .send()
            .await?;
        let status = response.status();
        match status {
            StatusCode::OK => Ok(()),
            StatusCode::CONFLICT => Err(StorageError::AlreadyExists(bucket.to_string())),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(StorageError::Provider(describe_failure(status, &body)))
            }
        }
    }

    /// Issues an API token limited to `bucket`; returns `(token id, token value)`.
    async fn create_scoped_token(
        &self,
        client: &reqwest::Client,
        account: &str,
        api_token: &str,
        bucket: &str,
        user_id: &str,
    ) -> Result<(String, String), StorageError> {
        let mut resources = serde_json::Map::new();
        resources.insert(format!("{}/*/{}", account, bucket), json!("*"));
        let payload = json!({
            "name": format!("{}-token", bucket),
            "policies": [{
                "effect": "allow",
                "resources": resources,
                "permission_groups": [{ "id": self.cloudflare.permission_group_id }],
            }],
        });
        let response = client
            .post(self.api_url("/user/tokens"))
            .bearer_auth(api_token)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(StorageError::Provider(describe_failure(status, &body)));
        }

        let envelope: CloudflareEnvelope = serde_json::from_str(&body)
            .map_err(|e| StorageError::Provider(format!("unreadable token response: {}", e)))?;
        let result = envelope.result.unwrap_or(Value::Null);
        let id = result.get("id").and_then(Value::as_str);
        let value = result.get("value").and_then(Value::as_str);
        match (id, value) {
            (Some(id), Some(value)) if !id.is_empty() && !value.is_empty() => {
                debug!(user_id, bucket, token_id = id, "Issued bucket-scoped token");
                Ok((id.to_string(), value.to_string()))
            }
            _ => Err(StorageError::Provider(
                "token response is missing id or value".into(),
            )),
        }
    }

    async fn delete_bucket(
        &self,
        client: &reqwest::Client,
        account: &str,
        api_token: &str,
        bucket: &str,
    ) -> Result<(), StorageError> {
        let response = client
            .delete(self.api_url(&format!("/accounts/{}/r2/buckets/{}", account, bucket)))
            .bearer_auth(api_token)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(StorageError::Provider(describe_failure(status, &body)))
        }
    }
}

#[async_trait::async_trait]
impl StorageProvider for R2Provider {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::R2
    }

    async fn provision(&self, user_id: &str) -> Result<StorageConfig, StorageError> {
        let (account, api_token) = self.credentials()?;
        let bucket = bucket_name_for(&self.bucket_prefix, user_id)?;
        let client = http_client(&self.http)?;

        // no token is minted for a bucket this call did not create
        self.create_bucket(&client, account, api_token, &bucket).await?;
        info!(
            event_name = "provisioning.r2.bucket",
            event_domain = "provisioning",
            provider_name = self.name.as_str(),
            bucket = bucket.as_str(),
            "R2 bucket created"
        );

        let (token_id, token_value) = match self
            .create_scoped_token(&client, account, api_token, &bucket, user_id)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                match self.delete_bucket(&client, account, api_token, &bucket).await {
                    Ok(()) => warn!(
                        event_name = "provisioning.r2.rollback",
                        event_domain = "provisioning",
                        bucket = bucket.as_str(),
                        "Deleted bucket after token issuance failed"
                    ),
                    Err(rollback) => error!(
                        event_name = "provisioning.r2.rollback_failed",
                        event_domain = "provisioning",
                        bucket = bucket.as_str(),
                        "Bucket left orphaned, manual cleanup needed: {}",
                        rollback
                    ),
                }
                return Err(e);
            }
        };

        // R2's S3 secret is the SHA-256 of the API token value
        let mut config = StorageConfig::with_access_key(
            ProviderKind::R2,
            bucket,
            r2_endpoint_for_account(account),
            token_id,
            sha256_hex(&token_value),
        );
        config.account_id = Some(account.to_string());
        Ok(config)
    }

    fn qualification_target(
        &self,
        credentials: &QualifyCredentials,
        default_bucket: &str,
    ) -> Result<StorageConfig, StorageError> {
        match credentials {
            QualifyCredentials::R2 {
                account_id,
                access_key,
                secret_key,
                bucket_name,
                endpoint_url,
            } => {
                let endpoint = match endpoint_url {
                    Some(url) => {
                        let url = url.trim_end_matches('/');
                        if !self.allowed_endpoints.iter().any(|allowed| allowed == url) {
                            return Err(StorageError::InvalidInput(format!(
                                "endpoint '{}' is not an allowed R2 endpoint",
                                url
                            )));
                        }
                        if !account_id.is_empty() && !valid_account_id(account_id) {
                            return Err(StorageError::InvalidInput("malformed account_id".into()));
                        }
                        url.to_string()
                    }
                    None if valid_account_id(account_id) => r2_endpoint_for_account(account_id),
                    None => {
                        return Err(StorageError::InvalidInput(
                            "account_id must be 1 to 64 letters or digits".into(),
                        ))
                    }
                };
                let mut config = StorageConfig::with_access_key(
                    ProviderKind::R2,
                    bucket_name.as_deref().unwrap_or(default_bucket),
                    endpoint,
                    access_key.as_str(),
                    secret_key.as_str(),
                );
                config.account_id = Some(account_id.clone());
                Ok(config)
            }
            other => Err(StorageError::InvalidInput(format!(
                "{} cannot qualify {} credentials",
                self.name,
                other.kind()
            ))),
        }
    }
}
