#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use semptify_storage::config::{Config, ConfigV1, StorageEnv};
use semptify_storage::routes::create_router;
use semptify_storage::state::AppState;
use semptify_storage::storage::{HttpConnector, MemoryConnector};
use semptify_storage::store::create_session_store;
use serde_json::Value;
use tempfile::TempDir;

pub const TEST_CONFIG: &str = r#"
version: "1.0.0"
bind_address: 127.0.0.1:8081
logging:
  level: "debug"
  format: "console"
http:
  timeout_in_ms: 2000
storage:
  default_qualification_bucket: "semptify-user-data"
provisioning:
  api_key: "test-provisioning-key"
"#;

/// The bearer key `/storage/provision` accepts under [`TEST_CONFIG`].
pub const PROVISIONING_KEY: &str = "test-provisioning-key";

/// Parses [`TEST_CONFIG`], pointing local profile storage at `local_root`
/// and Cloudflare calls at `api_base`.
pub fn load_test_config(local_root: &TempDir, api_base: &str) -> ConfigV1 {
    let config: Config = Figment::new()
        .merge(Yaml::string(TEST_CONFIG))
        .extract()
        .expect("Failed to parse test config YAML");

    let Config::ConfigV1(mut cfg) = config;
    cfg.storage.local_root = local_root.path().to_path_buf();
    cfg.provisioning.cloudflare.api_base = api_base.to_string();
    cfg
}

/// An app whose user buckets live in memory.
pub fn build_app(config: ConfigV1, env: &StorageEnv) -> (Router, Arc<MemoryConnector>) {
    let connector = Arc::new(MemoryConnector::new());
    let sessions = create_session_store(&config.storage);
    let state = AppState::with_connector(Arc::new(config), env, connector.clone(), sessions)
        .expect("Failed to build app state");
    (create_router(state), connector)
}

/// An app that reaches user buckets over real HTTP.
pub fn build_http_app(config: ConfigV1, env: &StorageEnv) -> Router {
    let connector = Arc::new(HttpConnector::new(&config.http));
    let sessions = create_session_store(&config.storage);
    let state = AppState::with_connector(Arc::new(config), env, connector, sessions)
        .expect("Failed to build app state");
    create_router(state)
}

pub fn json_request(path: &str, method: Method, body: &Value, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("Content-Type", "application/json");
    if let Some(token) = session {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("failed to build request")
}

pub fn request_with_bearer(path: &str, token: &str, method: Method, body: Body) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("Authorization", format!("Bearer {}", token))
        .body(body)
        .expect("failed to build request")
}

pub fn plain_request(path: &str, method: Method) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .body(Body::empty())
        .expect("failed to build request")
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable")
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("body should be JSON")
}
