//! Provisioning and proof-of-control endpoints.

use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::auth::hash_token_for_index;
use crate::errors::StorageError;
use crate::metrics::MetricsRecorder;
use crate::models::{sha256_hex, StorageSummary};
use crate::state::AppState;
use crate::utils::http_helpers::{HTTPError, SessionToken};

/// Registers provisioning routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/storage/provision", post(provision))
        .route("/storage/verify", post(verify))
}

#[derive(Deserialize)]
struct ProvisionRequest {
    user_id: String,
}

#[derive(Serialize)]
struct ProvisionResponse {
    user_id: String,
    storage: StorageSummary,
    token: String,
    index_key: String,
    session_token: String,
    profile_id: String,
}

#[derive(Deserialize)]
struct VerifyRequest {
    token: String,
}

#[derive(Serialize)]
struct VerifyResponse {
    user_id: String,
    created_at: String,
    index_key: String,
}

fn error_status(e: &StorageError) -> StatusCode {
    match e {
        StorageError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        StorageError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::Integrity(_) => StatusCode::FORBIDDEN,
        StorageError::AlreadyExists(_) => StatusCode::CONFLICT,
        StorageError::ConflictingConfig(_) | StorageError::Provider(_) => StatusCode::BAD_GATEWAY,
    }
}

fn http_error(e: &StorageError) -> HTTPError {
    HTTPError::new(error_status(e), e.public_reason())
}

/// Provisioning creates cloud resources, so it is an operator action gated
/// by `provisioning.api_key`. Keys are compared as SHA-256 digests.
fn require_provisioning_key(state: &AppState, bearer: Option<SessionToken>) -> Result<(), HTTPError> {
    let expected = match state.config.provisioning.api_key.as_deref() {
        Some(key) if !key.is_empty() => key,
        _ => {
            return Err(HTTPError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "provisioning is disabled",
            ))
        }
    };
    match bearer {
        Some(SessionToken(presented)) if sha256_hex(&presented) == sha256_hex(expected) => Ok(()),
        _ => Err(HTTPError::new(
            StatusCode::UNAUTHORIZED,
            "a valid provisioning key is required",
        )),
    }
}

/// Provisions dedicated storage, plants a proof-of-control token in it and
/// opens a session bound to it.
async fn provision(
    State(state): State<AppState>,
    bearer: Option<SessionToken>,
    body: Result<Json<ProvisionRequest>, JsonRejection>,
) -> Result<Json<ProvisionResponse>, HTTPError> {
    if let Err(rejection) = require_provisioning_key(&state, bearer) {
        warn!(
            event_name = "provisioning.unauthorized",
            event_domain = "provisioning",
            status = rejection.status().as_u16(),
            "Rejected provisioning request"
        );
        return Err(rejection);
    }
    let Json(request) = body.map_err(|_| HTTPError::new(StatusCode::BAD_REQUEST, "user_id is required"))?;
    let user_id = request.user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(HTTPError::new(StatusCode::BAD_REQUEST, "user_id is required"));
    }

    let start = Instant::now();
    let result = provision_and_bind(&state, &user_id).await;
    let outcome = if result.is_ok() { "provisioned" } else { "failed" };
    state
        .metrics
        .record_provision_duration(outcome, start.elapsed().as_secs_f64());
    let provider = match &result {
        Ok(response) => response.storage.provider.as_str(),
        Err(_) => "none",
    };
    state.metrics.record_provision_attempt(provider, outcome);

    result.map(Json).map_err(|e| http_error(&e))
}

async fn provision_and_bind(state: &AppState, user_id: &str) -> Result<ProvisionResponse, StorageError> {
    let config = state.provisioner.auto_provision_storage(user_id).await?;

    let token = state.tokens.generate();
    if !state.tokens.write_token_to_bucket(&config, &token, user_id).await {
        return Err(StorageError::Provider(format!(
            "could not write proof-of-control token to '{}'",
            config.bucket_name
        )));
    }

    let summary = config.summary();
    let session = state.qualifier.qualify_config(config).await.map_err(|e| {
        error!(user_id, "Provisioned storage failed qualification: {}", e);
        e
    })?;
    info!(
        event_name = "provisioning.bound",
        event_domain = "provisioning",
        user_id,
        bucket = summary.bucket_name.as_str(),
        "Provisioned storage bound to a new session"
    );

    Ok(ProvisionResponse {
        user_id: user_id.to_string(),
        index_key: hash_token_for_index(&token),
        storage: summary,
        token,
        session_token: session.session_token,
        profile_id: session.profile_id,
    })
}

/// Checks a proof-of-control token against the session's bucket.
async fn verify(
    State(state): State<AppState>,
    SessionToken(session_token): SessionToken,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, HTTPError> {
    let session = state
        .qualifier
        .check_qualification(&session_token)
        .await
        .ok_or_else(|| HTTPError::new(StatusCode::UNAUTHORIZED, "Session is not qualified"))?;
    let Json(request) = body.map_err(|_| HTTPError::new(StatusCode::BAD_REQUEST, "token is required"))?;

    match state.tokens.verify_token(&session.storage, request.token.trim()).await {
        Ok(record) => {
            state.metrics.record_token_verification("verified");
            Ok(Json(VerifyResponse {
                index_key: hash_token_for_index(&record.token),
                user_id: record.user_id,
                created_at: record.created_at,
            }))
        }
        Err(e) => {
            state.metrics.record_token_verification(e.kind());
            Err(http_error(&e))
        }
    }
}
