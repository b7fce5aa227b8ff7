//! Profile file endpoints backed by the application storage client.
//!
//! Every route needs a qualified session, and a session may only touch the
//! profile id it was issued with. The client falls back to local
//! disk unless exclusive remote mode is on, in which case an unreachable
//! remote surfaces as a failed operation.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::warn;

use crate::state::AppState;
use crate::utils::http_helpers::{HTTPError, SessionToken};

/// Registers profile file routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/profiles/:profile_id/files", get(list_files))
        .route(
            "/profiles/:profile_id/files/:filename",
            get(download).put(upload).delete(remove),
        )
}

async fn require_owner(state: &AppState, token: &str, profile_id: &str) -> Result<(), HTTPError> {
    let session = state
        .qualifier
        .check_qualification(token)
        .await
        .ok_or_else(|| HTTPError::new(StatusCode::UNAUTHORIZED, "Session is not qualified"))?;
    if session.profile_id != profile_id {
        warn!(
            event_name = "profiles.forbidden",
            event_domain = "profiles",
            bucket = session.bucket_name.as_str(),
            "Session tried to reach another profile"
        );
        return Err(HTTPError::new(
            StatusCode::FORBIDDEN,
            "Session may not access this profile",
        ));
    }
    Ok(())
}

async fn list_files(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path(profile_id): Path<String>,
) -> Result<impl IntoResponse, HTTPError> {
    require_owner(&state, &token, &profile_id).await?;
    let files = state.storage.list_profile_files(&profile_id).await;
    Ok(Json(json!({ "profile_id": profile_id, "files": files })))
}

async fn download(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path((profile_id, filename)): Path<(String, String)>,
) -> Result<impl IntoResponse, HTTPError> {
    require_owner(&state, &token, &profile_id).await?;
    state
        .storage
        .download_bytes(&profile_id, &filename)
        .await
        .ok_or_else(|| HTTPError::new(StatusCode::NOT_FOUND, "File not found"))
}

async fn upload(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path((profile_id, filename)): Path<(String, String)>,
    body: Bytes,
) -> Result<impl IntoResponse, HTTPError> {
    require_owner(&state, &token, &profile_id).await?;
    if state.storage.upload_bytes(&profile_id, &filename, &body).await {
        Ok((StatusCode::CREATED, Json(json!({ "stored": filename }))))
    } else {
        Err(HTTPError::new(StatusCode::BAD_GATEWAY, "Could not store file"))
    }
}

async fn remove(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path((profile_id, filename)): Path<(String, String)>,
) -> Result<impl IntoResponse, HTTPError> {
    require_owner(&state, &token, &profile_id).await?;
    if state.storage.delete_file(&profile_id, &filename).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HTTPError::new(StatusCode::BAD_GATEWAY, "Could not delete file"))
    }
}
