mod common;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use semptify_storage::config::{StorageEnv, CF_ACCOUNT_ID, CF_API_TOKEN, PERSISTENCE_OVERRIDE};
use mockito::Matcher;
use serde_json::json;
use tower::ServiceExt;

use common::{
    body_bytes, body_json, build_app, build_http_app, json_request, load_test_config, plain_request,
    request_with_bearer, PROVISIONING_KEY,
};

fn r2_credentials(bucket: &str) -> serde_json::Value {
    json!({
        "provider": "r2",
        "account_id": "acct",
        "access_key": "AKID",
        "secret_key": "SECRET",
        "bucket_name": bucket,
    })
}

/// Qualifies against `bucket`; returns the session token and its profile id.
async fn qualify(app: &axum::Router, bucket: &str) -> (String, String) {
    let response = app
        .clone()
        .oneshot(json_request(
            "/storage/qualify",
            Method::POST,
            &r2_credentials(bucket),
            None,
        ))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let session = body["session_token"]
        .as_str()
        .expect("qualified response carries a session token")
        .to_string();
    let profile_id = body["profile_id"]
        .as_str()
        .expect("qualified response carries a profile id")
        .to_string();
    (session, profile_id)
}

fn provision_request(user_id: &str, key: Option<&str>) -> axum::http::Request<Body> {
    json_request("/storage/provision", Method::POST, &json!({ "user_id": user_id }), key)
}

#[tokio::test]
async fn integration_qualify_status_logout_flow() {
    let dir = tempfile::tempdir().unwrap();
    let (app, connector) = build_app(load_test_config(&dir, "http://unused"), &StorageEnv::default());

    let (session, profile_id) = qualify(&app, "my-bucket").await;
    // the qualification object is cleaned up
    assert!(connector.object_keys("my-bucket").await.is_empty());

    let response = app
        .clone()
        .oneshot(request_with_bearer("/storage/status", &session, Method::GET, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["qualified"], true);
    assert_eq!(body["provider"], "r2");
    assert_eq!(body["bucket"], "my-bucket");
    assert_eq!(body["profile_id"], profile_id.as_str());

    let response = app
        .clone()
        .oneshot(request_with_bearer("/storage/logout", &session, Method::POST, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"], "Session cleared");

    let response = app
        .clone()
        .oneshot(request_with_bearer("/storage/status", &session, Method::GET, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["qualified"], false);
}

#[tokio::test]
async fn integration_qualify_rejects_unknown_provider() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = build_app(load_test_config(&dir, "http://unused"), &StorageEnv::default());

    let response = app
        .oneshot(json_request(
            "/storage/qualify",
            Method::POST,
            &json!({ "provider": "dropbox", "token": "x" }),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn integration_qualify_failure_does_not_leak_details() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = build_app(load_test_config(&dir, "http://unused"), &StorageEnv::default());

    let response = app
        .oneshot(json_request(
            "/storage/qualify",
            Method::POST,
            &json!({
                "provider": "r2",
                "account_id": "",
                "access_key": "AKID",
                "secret_key": "SECRET",
            }),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["qualified"], false);
    assert_eq!(body["message"], "Could not verify R2 storage access");
    assert!(!body.to_string().contains("SECRET"));
}

#[tokio::test]
async fn integration_status_requires_bearer() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = build_app(load_test_config(&dir, "http://unused"), &StorageEnv::default());

    let response = app
        .oneshot(plain_request("/storage/status", Method::GET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn integration_provision_requires_operator_key() {
    let dir = tempfile::tempdir().unwrap();
    let env = StorageEnv::from_pairs([(CF_ACCOUNT_ID, "acct"), (CF_API_TOKEN, "cf-admin")]);
    let mut server = mockito::Server::new_async().await;
    let create = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let (app, _) = build_app(load_test_config(&dir, &server.url()), &env);

    for key in [None, Some("wrong-key")] {
        let response = app.clone().oneshot(provision_request("42", key)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    create.assert_async().await;

    let mut config = load_test_config(&dir, &server.url());
    config.provisioning.api_key = None;
    let (app, _) = build_app(config, &env);
    let response = app
        .oneshot(provision_request("42", Some(PROVISIONING_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"], "provisioning is disabled");
}

#[tokio::test]
async fn integration_provision_unconfigured_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = build_app(load_test_config(&dir, "http://unused"), &StorageEnv::default());

    let response = app
        .oneshot(provision_request("42", Some(PROVISIONING_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body_json(response).await["error"],
        "storage provider is not configured"
    );
}

#[tokio::test]
async fn integration_provision_rejects_malformed_user_id() {
    let dir = tempfile::tempdir().unwrap();
    let env = StorageEnv::from_pairs([(CF_ACCOUNT_ID, "acct"), (CF_API_TOKEN, "cf-admin")]);
    let (app, _) = build_app(load_test_config(&dir, "http://unused"), &env);

    let response = app
        .oneshot(provision_request("Jane.Doe", Some(PROVISIONING_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn integration_provision_then_verify_token() {
    let mut server = mockito::Server::new_async().await;
    let create = server
        .mock("POST", "/accounts/acct/r2/buckets")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": true, "result": {"name": "semptify-user-42"}}"#)
        .expect(1)
        .create_async()
        .await;
    let token = server
        .mock("POST", "/user/tokens")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": true, "result": {"id": "tok-id", "value": "tok-value"}}"#)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let env = StorageEnv::from_pairs([(CF_ACCOUNT_ID, "acct"), (CF_API_TOKEN, "cf-admin")]);
    let (app, connector) = build_app(load_test_config(&dir, &server.url()), &env);

    let response = app
        .clone()
        .oneshot(provision_request("42", Some(PROVISIONING_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    create.assert_async().await;

    assert_eq!(body["storage"]["bucket_name"], "semptify-user-42");
    assert_eq!(body["storage"]["access_key_id"], "tok-id");
    assert!(body["profile_id"].as_str().is_some());
    assert!(!body.to_string().contains("tok-value"));
    // only the proof-of-control token is left behind
    assert_eq!(connector.object_keys("semptify-user-42").await.len(), 1);

    let session = body["session_token"].as_str().unwrap().to_string();
    let planted = body["token"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            "/storage/verify",
            Method::POST,
            &json!({ "token": planted }),
            Some(&session),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let verified = body_json(response).await;
    assert_eq!(verified["user_id"], "42");
    assert_eq!(verified["index_key"], body["index_key"]);

    let response = app
        .clone()
        .oneshot(json_request(
            "/storage/verify",
            Method::POST,
            &json!({ "token": "SMPT-AAAA-AAAA-AAAA" }),
            Some(&session),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // a second provision for the same user finds the bucket taken
    create.remove_async().await;
    let taken = server
        .mock("POST", "/accounts/acct/r2/buckets")
        .with_status(409)
        .with_body(r#"{"success": false, "errors": [{"code": 10004, "message": "bucket exists"}]}"#)
        .expect(1)
        .create_async()
        .await;
    let response = app
        .clone()
        .oneshot(provision_request("42", Some(PROVISIONING_KEY)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let conflict = body_json(response).await;
    assert!(conflict.get("token").is_none());
    taken.assert_async().await;
    // no second token was minted
    token.assert_async().await;

    // the original binding is untouched
    assert_eq!(connector.object_keys("semptify-user-42").await.len(), 1);
    let response = app
        .oneshot(json_request(
            "/storage/verify",
            Method::POST,
            &json!({ "token": body["token"] }),
            Some(&session),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn integration_ready_reflects_enforcement() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = build_app(load_test_config(&dir, "http://unused"), &StorageEnv::default());
    let response = app
        .oneshot(plain_request("/ready", Method::GET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "blocked");

    let env = StorageEnv::from_pairs([(PERSISTENCE_OVERRIDE, "true")]);
    let (app, _) = build_app(load_test_config(&dir, "http://unused"), &env);
    let response = app
        .oneshot(plain_request("/ready", Method::GET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["provider"], "Override (DEV)");
}

#[tokio::test]
async fn integration_health_and_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = build_app(load_test_config(&dir, "http://unused"), &StorageEnv::default());

    let response = app
        .clone()
        .oneshot(plain_request("/health", Method::GET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"OK".to_vec());

    qualify(&app, "my-bucket").await;
    let response = app
        .oneshot(plain_request("/metrics", Method::GET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains(r#"storage_qualification_attempts_total{provider="r2",result="qualified"} 1"#));
}

#[tokio::test]
async fn integration_profile_files_round_trip_locally() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = build_app(load_test_config(&dir, "http://unused"), &StorageEnv::default());

    let response = app
        .clone()
        .oneshot(plain_request("/profiles/p1/files", Method::GET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (session, profile_id) = qualify(&app, "my-bucket").await;
    let file_path = format!("/profiles/{}/files/notes.txt", profile_id);
    let list_path = format!("/profiles/{}/files", profile_id);

    let response = app
        .clone()
        .oneshot(request_with_bearer(&file_path, &session, Method::PUT, Body::from("hello")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(dir.path().join(&profile_id).join("notes.txt").exists());

    let response = app
        .clone()
        .oneshot(request_with_bearer(&list_path, &session, Method::GET, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["files"], json!(["notes.txt"]));

    let response = app
        .clone()
        .oneshot(request_with_bearer(&file_path, &session, Method::GET, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"hello".to_vec());

    let response = app
        .clone()
        .oneshot(request_with_bearer(&file_path, &session, Method::DELETE, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(request_with_bearer(&file_path, &session, Method::GET, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn integration_sessions_cannot_reach_other_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = build_app(load_test_config(&dir, "http://unused"), &StorageEnv::default());

    let (owner, owner_profile) = qualify(&app, "owner-bucket").await;
    let (intruder, intruder_profile) = qualify(&app, "other-bucket").await;
    assert_ne!(owner_profile, intruder_profile);

    let owner_file = format!("/profiles/{}/files/lease.pdf", owner_profile);
    let response = app
        .clone()
        .oneshot(request_with_bearer(&owner_file, &owner, Method::PUT, Body::from("%PDF")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    for method in [Method::GET, Method::PUT, Method::DELETE] {
        let response = app
            .clone()
            .oneshot(request_with_bearer(&owner_file, &intruder, method, Body::from("x")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
    let response = app
        .clone()
        .oneshot(request_with_bearer(
            &format!("/profiles/{}/files", owner_profile),
            &intruder,
            Method::GET,
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // the owner's file survived
    let response = app
        .oneshot(request_with_bearer(&owner_file, &owner, Method::GET, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"%PDF".to_vec());
}

#[tokio::test]
async fn integration_qualify_refuses_unlisted_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let any = server.mock("PUT", Matcher::Any).expect(0).create_async().await;

    let dir = tempfile::tempdir().unwrap();
    let app = build_http_app(load_test_config(&dir, "http://unused"), &StorageEnv::default());
    let mut credentials = r2_credentials("my-bucket");
    credentials["endpoint_url"] = json!(server.url());

    let response = app
        .oneshot(json_request("/storage/qualify", Method::POST, &credentials, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["qualified"], false);
    any.assert_async().await;
}

#[tokio::test]
async fn integration_qualify_stops_after_failed_write() {
    let mut server = mockito::Server::new_async().await;
    let put = server
        .mock("PUT", Matcher::Regex(r"^/my-bucket/_semptify_qual_test_[0-9a-f]{16}\.txt$".to_string()))
        .match_header(
            "authorization",
            Matcher::Regex("^AWS4-HMAC-SHA256 Credential=AKID/".to_string()),
        )
        .with_status(403)
        .with_body("<Error><Code>AccessDenied</Code><Message>denied</Message></Error>")
        .expect(1)
        .create_async()
        .await;
    let get = server.mock("GET", Matcher::Any).expect(0).create_async().await;
    let delete = server.mock("DELETE", Matcher::Any).expect(0).create_async().await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = load_test_config(&dir, "http://unused");
    config.provisioning.allowed_endpoints = vec![server.url()];
    let app = build_http_app(config, &StorageEnv::default());
    let mut credentials = r2_credentials("my-bucket");
    credentials["endpoint_url"] = json!(server.url());

    let response = app
        .oneshot(json_request("/storage/qualify", Method::POST, &credentials, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!body_json(response).await.to_string().contains("denied"));

    put.assert_async().await;
    get.assert_async().await;
    delete.assert_async().await;
}
