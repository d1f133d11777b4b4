// crates/inference-dam-api/tests/api.rs
// ============================================================================
// Module: API Tests
// Description: Router-level tests for the broker's HTTP contract.
// Purpose: Validate wire shapes, status codes, and end-to-end dispatch.
// Dependencies: inference-dam-api, inference-dam-core, tower, tokio
// ============================================================================

//! ## Overview
//! Drives the full router with `oneshot` requests against the in-memory
//! store and a counting provider stub: namespace CRUD with conflict and
//! cascade semantics, submission and dispatch round trips, pagination
//! cursors, and the protected default namespace.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use inference_dam_api::AppState;
use inference_dam_api::build_router;
use inference_dam_api::ensure_default_namespace;
use inference_dam_core::InMemoryStore;
use inference_dam_core::JsonObject;
use inference_dam_core::Store;
use inference_dam_dispatcher::Dispatcher;
use inference_dam_dispatcher::DispatcherConfig;
use inference_dam_dispatcher::MISSING_ENDPOINT_ERROR;
use inference_dam_dispatcher::ProviderClient;
use inference_dam_dispatcher::ProviderError;
use serde_json::Value;
use serde_json::json;
use tower::ServiceExt;

// ============================================================================
// SECTION: Provider Stub
// ============================================================================

/// Provider stub returning a canned completion and counting calls.
struct StubClient {
    calls: Mutex<Vec<BTreeMap<String, String>>>,
}

impl StubClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn seen_headers(&self) -> Vec<BTreeMap<String, String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderClient for StubClient {
    async fn send_request(
        &self,
        _url: &str,
        _api_key: &str,
        headers: &BTreeMap<String, String>,
        _payload: &JsonObject,
    ) -> Result<JsonObject, ProviderError> {
        self.calls.lock().unwrap().push(headers.clone());
        match json!({"choices": [{"message": {"role": "assistant", "content": "ok"}}]}) {
            Value::Object(object) => Ok(object),
            _ => unreachable!(),
        }
    }
}

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Router plus the shared collaborators behind it.
struct Harness {
    app: Router,
    dispatcher: Dispatcher,
    client: Arc<StubClient>,
}

async fn harness() -> Harness {
    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    ensure_default_namespace(store.as_ref()).await.unwrap();
    let client = StubClient::new();
    let dispatcher = Dispatcher::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&client) as Arc<dyn ProviderClient>,
        DispatcherConfig {
            requests_per_second: 10_000.0,
            ..DispatcherConfig::default()
        },
    );
    let app = build_router(AppState {
        store,
        dispatcher: dispatcher.clone(),
    });
    Harness {
        app,
        dispatcher,
        client,
    }
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn create_namespace(app: &Router, body: Value) -> StatusCode {
    app.clone().oneshot(json_request("POST", "/namespaces", body)).await.unwrap().status()
}

/// Submits a chat completion and returns the assigned id.
async fn submit(app: &Router, namespace: &str, content: &str) -> String {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("X-Namespace", namespace)
        .body(Body::from(
            json!({
                "model": "gpt-4",
                "messages": [{"role": "user", "content": content}],
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = read_json(response).await;
    assert_eq!(body["status"], json!("queued"));
    let id = body["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("req_"));
    id
}

async fn stats_for(app: &Router, namespace: &str) -> Value {
    let response =
        app.clone().oneshot(get_request(&format!("/namespaces/{namespace}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    read_json(response).await["stats"].clone()
}

// ============================================================================
// SECTION: Namespace Tests
// ============================================================================

#[tokio::test]
async fn health_is_ok() {
    let harness = harness().await;
    let response = harness.app.clone().oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn create_namespace_then_duplicate_conflicts() {
    let harness = harness().await;
    let status = create_namespace(&harness.app, json!({"name": "x"})).await;
    assert_eq!(status, StatusCode::CREATED);
    let status = create_namespace(&harness.app, json!({"name": "x"})).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn create_namespace_requires_name() {
    let harness = harness().await;
    let status = create_namespace(&harness.app, json!({"description": "anonymous"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn namespace_view_omits_api_key() {
    let harness = harness().await;
    let response = harness
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/namespaces",
            json!({
                "name": "ns1",
                "provider": {"api_endpoint": "http://up", "api_key": "secret", "model": "m"},
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["provider"]["api_endpoint"], json!("http://up"));
    assert_eq!(body["provider"]["model"], json!("m"));
    assert!(body["provider"].get("api_key").is_none());
}

#[tokio::test]
async fn get_namespace_includes_stats_and_404s() {
    let harness = harness().await;
    let stats = stats_for(&harness.app, "default").await;
    assert_eq!(stats["total"], json!(0));
    let response = harness.app.clone().oneshot(get_request("/namespaces/ghost")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn patch_updates_description() {
    let harness = harness().await;
    create_namespace(&harness.app, json!({"name": "ns1", "description": "old"})).await;
    let response = harness
        .app
        .clone()
        .oneshot(json_request("PATCH", "/namespaces/ns1", json!({"description": "new"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["description"], json!("new"));

    let response = harness
        .app
        .clone()
        .oneshot(json_request("PATCH", "/namespaces/ghost", json!({"description": "x"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn default_namespace_is_undeletable() {
    let harness = harness().await;
    let request =
        Request::builder().method("DELETE").uri("/namespaces/default").body(Body::empty()).unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = harness.app.clone().oneshot(get_request("/namespaces/default")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn delete_namespace_cascades() {
    let harness = harness().await;
    create_namespace(&harness.app, json!({"name": "y"})).await;
    for index in 0..5 {
        submit(&harness.app, "y", &format!("message {index}")).await;
    }

    let request =
        Request::builder().method("DELETE").uri("/namespaces/y").body(Body::empty()).unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["deleted_requests"], json!(5));

    let response = harness.app.clone().oneshot(get_request("/namespaces/y")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response =
        harness.app.clone().oneshot(get_request("/requests?namespace=y")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["requests"], json!([]));
    assert_eq!(body["total"], json!(0));
}

// ============================================================================
// SECTION: Submission and Dispatch Tests
// ============================================================================

#[tokio::test]
async fn submit_dispatch_and_observe() {
    let harness = harness().await;
    create_namespace(
        &harness.app,
        json!({"name": "ns1", "provider": {"api_endpoint": "http://up", "api_key": "k"}}),
    )
    .await;

    let mut ids = Vec::new();
    for content in ["A", "B", "C"] {
        ids.push(submit(&harness.app, "ns1", content).await);
    }

    let stats = stats_for(&harness.app, "ns1").await;
    assert_eq!(stats, json!({"total": 3, "queued": 3, "processing": 0, "completed": 0, "failed": 0}));

    let response = harness
        .app
        .clone()
        .oneshot(json_request("POST", "/dispatch", json!({"namespace": "ns1"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = read_json(response).await;
    assert_eq!(body["status"], json!("dispatching"));
    assert_eq!(body["queued_count"], json!(3));
    assert!(body["dispatch_id"].as_str().unwrap().starts_with("disp_"));

    harness.dispatcher.wait().await;

    let stats = stats_for(&harness.app, "ns1").await;
    assert_eq!(stats, json!({"total": 3, "queued": 0, "processing": 0, "completed": 3, "failed": 0}));
    assert_eq!(harness.client.call_count(), 3);

    for id in ids {
        let response =
            harness.app.clone().oneshot(get_request(&format!("/requests/{id}"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["status"], json!("completed"));
        assert!(body["response_payload"].is_object());
        assert!(body["dispatched_at"].is_string());
        assert!(body["completed_at"].is_string());
    }
}

#[tokio::test]
async fn missing_config_fails_without_provider_call() {
    let harness = harness().await;
    create_namespace(&harness.app, json!({"name": "ns2"})).await;
    let id = submit(&harness.app, "ns2", "hello").await;

    let response = harness
        .app
        .clone()
        .oneshot(json_request("POST", "/dispatch", json!({"namespace": "ns2"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    harness.dispatcher.wait().await;

    let response =
        harness.app.clone().oneshot(get_request(&format!("/requests/{id}"))).await.unwrap();
    let body = read_json(response).await;
    assert_eq!(body["status"], json!("failed"));
    assert_eq!(body["error"], json!(MISSING_ENDPOINT_ERROR));
    assert!(body.get("response_payload").is_none());
    assert_eq!(harness.client.call_count(), 0);
}

#[tokio::test]
async fn authorization_passes_through_to_provider() {
    let harness = harness().await;
    create_namespace(
        &harness.app,
        json!({"name": "ns1", "provider": {"api_endpoint": "http://up", "api_key": "k"}}),
    )
    .await;
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("X-Namespace", "ns1")
        .header("Authorization", "Bearer client-token")
        .body(Body::from(json!({"model": "gpt-4", "messages": []}).to_string()))
        .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    harness
        .app
        .clone()
        .oneshot(json_request("POST", "/dispatch", json!({"namespace": "ns1"})))
        .await
        .unwrap();
    harness.dispatcher.wait().await;

    let seen = harness.client.seen_headers();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("authorization").map(String::as_str), Some("Bearer client-token"));
}

#[tokio::test]
async fn dispatch_with_no_requests_reports_no_requests() {
    let harness = harness().await;
    let response = harness
        .app
        .clone()
        .oneshot(json_request("POST", "/dispatch", json!({"namespace": "default"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], json!("no_requests"));
    assert_eq!(body["queued_count"], json!(0));
}

#[tokio::test]
async fn dispatch_unknown_namespace_404s() {
    let harness = harness().await;
    let response = harness
        .app
        .clone()
        .oneshot(json_request("POST", "/dispatch", json!({"namespace": "ghost"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn submission_to_unknown_namespace_404s() {
    let harness = harness().await;
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("X-Namespace", "ghost")
        .body(Body::from(json!({"model": "gpt-4"}).to_string()))
        .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// SECTION: Listing Tests
// ============================================================================

#[tokio::test]
async fn list_requires_namespace_and_valid_filters() {
    let harness = harness().await;
    let response = harness.app.clone().oneshot(get_request("/requests")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = harness
        .app
        .clone()
        .oneshot(get_request("/requests?namespace=default&status=cancelled"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = harness
        .app
        .clone()
        .oneshot(get_request("/requests?namespace=default&cursor=not-a-time"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_paginates_with_cursor() {
    let harness = harness().await;
    for index in 0..3 {
        submit(&harness.app, "default", &format!("message {index}")).await;
    }

    let response = harness
        .app
        .clone()
        .oneshot(get_request("/requests?namespace=default&limit=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["requests"].as_array().unwrap().len(), 2);
    assert_eq!(body["total"], json!(3));
    assert_eq!(body["limit"], json!(2));
    let cursor = body["next_cursor"].as_str().expect("full page carries a cursor").to_string();

    let response = harness
        .app
        .clone()
        .oneshot(get_request(&format!("/requests?namespace=default&limit=2&cursor={cursor}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    let second_page = body["requests"].as_array().unwrap();
    assert_eq!(second_page.len(), 1);

    let response =
        harness.app.clone().oneshot(get_request("/requests/ghost")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
