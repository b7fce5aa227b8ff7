//! Storage qualification endpoints.

use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::debug;

use crate::metrics::MetricsRecorder;
use crate::models::SessionSummary;
use crate::providers::QualifyCredentials;
use crate::state::AppState;
use crate::utils::http_helpers::{HTTPError, SessionToken};

/// Registers qualification routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/storage/qualify", post(qualify))
        .route("/storage/status", get(status))
        .route("/storage/logout", post(logout))
}

/// Runs the write/read/delete probe with caller-supplied credentials.
/// 200 with a session token when qualified, 400 otherwise.
async fn qualify(
    State(state): State<AppState>,
    body: Result<Json<QualifyCredentials>, JsonRejection>,
) -> Result<impl IntoResponse, HTTPError> {
    let Json(credentials) = body.map_err(|e| {
        debug!("Rejected qualification request: {}", e);
        HTTPError::new(StatusCode::BAD_REQUEST, "Invalid provider or credentials")
    })?;

    let provider = credentials.kind();
    let start = Instant::now();
    let outcome = state.qualifier.qualify_storage(&credentials).await;
    state
        .metrics
        .record_qualification_duration(provider.as_str(), start.elapsed().as_secs_f64());

    let (status, result) = if outcome.qualified {
        (StatusCode::OK, "qualified")
    } else {
        (StatusCode::BAD_REQUEST, "rejected")
    };
    state
        .metrics
        .record_qualification_attempt(provider.as_str(), result);
    Ok((status, Json(outcome)))
}

/// Reports the session's provider and bucket, or 401.
async fn status(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> Result<Json<SessionSummary>, (StatusCode, Json<SessionSummary>)> {
    match state.qualifier.check_qualification(&token).await {
        Some(session) => Ok(Json(session.summary())),
        None => Err((StatusCode::UNAUTHORIZED, Json(SessionSummary::unqualified()))),
    }
}

async fn logout(State(state): State<AppState>, SessionToken(token): SessionToken) -> impl IntoResponse {
    state.qualifier.logout(&token).await;
    Json(json!({ "message": "Session cleared" }))
}
