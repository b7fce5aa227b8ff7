//! Application startup and server initialization.

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{ConfigV1, StorageEnv};
use crate::routes;
use crate::state::AppState;

/// Builds the application state and serves HTTP until the listener fails.
///
/// # Errors
///
/// Returns an error when the local fallback root cannot be opened, when exclusive remote storage is enforced but cannot be
/// reached, when the bind address is unusable, or when serving fails.
pub async fn run(config: Arc<ConfigV1>, env: StorageEnv) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::new(config.clone(), &env)?;

    state.storage.ensure_exclusive().await?;
    if state.storage.is_remote_available().await && !state.storage.restore_profiles_from_remote().await {
        warn!("Could not restore profile index from remote storage");
    }

    let app = routes::create_router(state);

    info!("Starting server on {}", config.bind_address);
    let listener = TcpListener::bind(&config.bind_address)
        .await
        .map_err(|e| format!("could not bind to {}: {}", config.bind_address, e))?;

    axum::serve(listener, app).await?;

    Ok(())
}
