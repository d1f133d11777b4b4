// crates/inference-dam-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Store contract tests against the SQLite backend.
// Purpose: Validate durability, transactional counters, and batched ingest.
// Dependencies: inference-dam-store-sqlite, inference-dam-core, tempfile
// ============================================================================

//! ## Overview
//! Conformance tests for the SQLite-backed store: round-trips with timestamp
//! precision, persistence across reopen, counter/scan agreement through
//! status transitions, cascade deletes in one transaction, and the batched
//! ingest writer's drain-on-close behavior.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use inference_dam_core::JsonObject;
use inference_dam_core::NamespaceRecord;
use inference_dam_core::RequestFilter;
use inference_dam_core::RequestRecord;
use inference_dam_core::RequestStatus;
use inference_dam_core::Store;
use inference_dam_core::StoreError;
use inference_dam_store_sqlite::SqliteStore;
use inference_dam_store_sqlite::SqliteStoreConfig;
use serde_json::json;
use tempfile::TempDir;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn ts(seconds: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(seconds).unwrap()
}

fn payload(content: &str) -> JsonObject {
    let value = json!({
        "model": "gpt-4",
        "messages": [{"role": "user", "content": content}],
    });
    match value {
        serde_json::Value::Object(object) => object,
        _ => unreachable!(),
    }
}

fn request(id: &str, namespace: &str, created_seconds: i64) -> RequestRecord {
    RequestRecord::queued(id, namespace, payload(id), ts(created_seconds))
}

fn store_at(path: &std::path::Path) -> SqliteStore {
    SqliteStore::new(SqliteStoreConfig::new(path)).expect("store init")
}

async fn store_with_namespace(path: &std::path::Path, name: &str) -> SqliteStore {
    let store = store_at(path);
    store.create_namespace(&NamespaceRecord::new(name, "", ts(0))).await.unwrap();
    store
}

// ============================================================================
// SECTION: Namespace Tests
// ============================================================================

#[tokio::test]
async fn namespace_roundtrip_with_provider_fields() {
    let temp = TempDir::new().unwrap();
    let store = store_at(&temp.path().join("dam.db"));

    let mut record = NamespaceRecord::new("ns", "described", ts(7));
    record.provider_endpoint = Some("http://up".to_string());
    record.provider_api_key = Some("secret".to_string());
    record.provider_model = Some("pinned".to_string());
    record.provider_headers.insert("X-Team".to_string(), "ml".to_string());
    store.create_namespace(&record).await.unwrap();

    let loaded = store.get_namespace("ns").await.unwrap().unwrap();
    assert_eq!(loaded, record);
    assert!(store.get_namespace("missing").await.unwrap().is_none());

    let err = store.create_namespace(&record).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
}

#[tokio::test]
async fn namespaces_persist_across_instances() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dam.db");
    {
        let store = store_at(&path);
        store.create_namespace(&NamespaceRecord::new("ns", "kept", ts(3))).await.unwrap();
        store.create_request(&request("req-1", "ns", 4)).await.unwrap();
        store.close().await.unwrap();
    }
    let store = store_at(&path);
    let loaded = store.get_namespace("ns").await.unwrap().unwrap();
    assert_eq!(loaded.description, "kept");
    let reloaded = store.get_request("req-1").await.unwrap().unwrap();
    assert_eq!(reloaded.created_at, ts(4));
    let stats = store.namespace_stats("ns").await.unwrap();
    assert_eq!(stats.queued, 1);
}

#[tokio::test]
async fn update_preserves_created_at() {
    let temp = TempDir::new().unwrap();
    let store = store_with_namespace(&temp.path().join("dam.db"), "ns").await;

    let mut updated = NamespaceRecord::new("ns", "patched", ts(30));
    updated.provider_endpoint = Some("http://next".to_string());
    store.update_namespace("ns", &updated).await.unwrap();

    let loaded = store.get_namespace("ns").await.unwrap().unwrap();
    assert_eq!(loaded.description, "patched");
    assert_eq!(loaded.created_at, ts(0));
    assert_eq!(loaded.updated_at, ts(30));

    let err = store
        .update_namespace("ghost", &NamespaceRecord::new("ghost", "", ts(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn delete_namespace_cascades_atomically() {
    let temp = TempDir::new().unwrap();
    let store = store_with_namespace(&temp.path().join("dam.db"), "ns").await;
    for index in 0..5 {
        store.create_request(&request(&format!("req-{index}"), "ns", index)).await.unwrap();
    }
    store.update_request_status("req-0", RequestStatus::Processing, ts(9)).await.unwrap();

    let deleted = store.delete_namespace("ns").await.unwrap();
    assert_eq!(deleted, 5);
    assert!(store.get_namespace("ns").await.unwrap().is_none());
    assert!(store.get_request("req-0").await.unwrap().is_none());
    let page = store.list_requests(&RequestFilter::namespace("ns")).await.unwrap();
    assert!(page.records.is_empty());
    assert_eq!(page.total, 0);

    let err = store.delete_namespace("ns").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

// ============================================================================
// SECTION: Request Tests
// ============================================================================

#[tokio::test]
async fn request_roundtrip_preserves_headers_and_overrides() {
    let temp = TempDir::new().unwrap();
    let store = store_with_namespace(&temp.path().join("dam.db"), "ns").await;

    let mut record = request("req-1", "ns", 11);
    record.passthrough_headers.insert("authorization".to_string(), "Bearer t".to_string());
    record.header_endpoint = Some("http://fallback".to_string());
    record.header_api_key = Some("fallback-key".to_string());
    store.create_request(&record).await.unwrap();

    let loaded = store.get_request("req-1").await.unwrap().unwrap();
    assert_eq!(loaded, record);

    let err = store.create_request(&record).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
}

#[tokio::test]
async fn counters_agree_with_scans_through_transitions() {
    let temp = TempDir::new().unwrap();
    let store = store_with_namespace(&temp.path().join("dam.db"), "ns").await;
    for index in 0..4 {
        store.create_request(&request(&format!("req-{index}"), "ns", index)).await.unwrap();
    }
    store.update_request_status("req-0", RequestStatus::Processing, ts(20)).await.unwrap();
    store.update_request_status("req-1", RequestStatus::Processing, ts(21)).await.unwrap();
    store.update_request_response("req-0", payload("done")).await.unwrap();
    store.update_request_error("req-2", "boom").await.unwrap();

    let stats = store.namespace_stats("ns").await.unwrap();
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.processing, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total, 4);

    for status in RequestStatus::ALL {
        let mut filter = RequestFilter::namespace("ns");
        filter.status = Some(status);
        let page = store.list_requests(&filter).await.unwrap();
        assert_eq!(page.records.len() as u64, stats.for_status(status));
    }
}

#[tokio::test]
async fn terminal_updates_set_payload_fields() {
    let temp = TempDir::new().unwrap();
    let store = store_with_namespace(&temp.path().join("dam.db"), "ns").await;
    store.create_request(&request("req-ok", "ns", 1)).await.unwrap();
    store.create_request(&request("req-bad", "ns", 2)).await.unwrap();

    store.update_request_status("req-ok", RequestStatus::Processing, ts(5)).await.unwrap();
    store.update_request_response("req-ok", payload("answer")).await.unwrap();
    store.update_request_error("req-bad", "no key").await.unwrap();

    let completed = store.get_request("req-ok").await.unwrap().unwrap();
    assert_eq!(completed.status, RequestStatus::Completed);
    assert_eq!(completed.dispatched_at, Some(ts(5)));
    assert!(completed.response_payload.is_some());
    assert!(completed.error.is_none());
    assert!(completed.completed_at.is_some());

    let failed = store.get_request("req-bad").await.unwrap().unwrap();
    assert_eq!(failed.status, RequestStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("no key"));
    assert!(failed.response_payload.is_none());
}

#[tokio::test]
async fn same_status_update_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let store = store_with_namespace(&temp.path().join("dam.db"), "ns").await;
    store.create_request(&request("req-1", "ns", 1)).await.unwrap();
    store.update_request_status("req-1", RequestStatus::Processing, ts(40)).await.unwrap();
    store.update_request_status("req-1", RequestStatus::Processing, ts(90)).await.unwrap();

    let loaded = store.get_request("req-1").await.unwrap().unwrap();
    assert_eq!(loaded.dispatched_at, Some(ts(40)));
    let stats = store.namespace_stats("ns").await.unwrap();
    assert_eq!(stats.processing, 1);
    assert_eq!(stats.total, 1);
}

#[tokio::test]
async fn queued_requests_are_oldest_first() {
    let temp = TempDir::new().unwrap();
    let store = store_with_namespace(&temp.path().join("dam.db"), "ns").await;
    store.create_request(&request("req-c", "ns", 30)).await.unwrap();
    store.create_request(&request("req-a", "ns", 10)).await.unwrap();
    store.create_request(&request("req-b", "ns", 20)).await.unwrap();
    store.update_request_status("req-a", RequestStatus::Processing, ts(50)).await.unwrap();

    let queued = store.queued_requests("ns").await.unwrap();
    let ids: Vec<&str> = queued.iter().map(|record| record.id.as_str()).collect();
    assert_eq!(ids, vec!["req-b", "req-c"]);
}

#[tokio::test]
async fn list_is_newest_first_with_strict_cursor() {
    let temp = TempDir::new().unwrap();
    let store = store_with_namespace(&temp.path().join("dam.db"), "ns").await;
    for index in 1..=5 {
        store.create_request(&request(&format!("req-{index}"), "ns", index * 10)).await.unwrap();
    }

    let mut filter = RequestFilter::namespace("ns");
    filter.limit = 3;
    let page = store.list_requests(&filter).await.unwrap();
    let ids: Vec<&str> = page.records.iter().map(|record| record.id.as_str()).collect();
    assert_eq!(ids, vec!["req-5", "req-4", "req-3"]);
    assert_eq!(page.total, 5);

    filter.cursor = Some(ts(30));
    filter.limit = 0;
    let page = store.list_requests(&filter).await.unwrap();
    let ids: Vec<&str> = page.records.iter().map(|record| record.id.as_str()).collect();
    assert_eq!(ids, vec!["req-2", "req-1"]);
}

// ============================================================================
// SECTION: Batched Ingest Tests
// ============================================================================

#[tokio::test]
async fn batched_writes_flush_on_close() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dam.db");
    {
        let mut config = SqliteStoreConfig::new(&path);
        config.batched_writes = true;
        let store = SqliteStore::new(config).expect("store init");
        store.create_namespace(&NamespaceRecord::new("ns", "", ts(0))).await.unwrap();
        for index in 0..5 {
            store.create_request(&request(&format!("req-{index}"), "ns", index)).await.unwrap();
        }
        // Close drains the channel before returning.
        store.close().await.unwrap();
    }
    let store = store_at(&path);
    let stats = store.namespace_stats("ns").await.unwrap();
    assert_eq!(stats.queued, 5);
    assert_eq!(stats.total, 5);
    for index in 0..5 {
        assert!(store.get_request(&format!("req-{index}")).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn batched_duplicate_rows_are_skipped() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dam.db");
    {
        let mut config = SqliteStoreConfig::new(&path);
        config.batched_writes = true;
        let store = SqliteStore::new(config).expect("store init");
        store.create_namespace(&NamespaceRecord::new("ns", "", ts(0))).await.unwrap();
        // Both submissions are accepted; the flusher drops the second row
        // without incrementing the counter.
        store.create_request(&request("req-1", "ns", 1)).await.unwrap();
        store.create_request(&request("req-1", "ns", 2)).await.unwrap();
        store.close().await.unwrap();
    }
    let store = store_at(&path);
    let stats = store.namespace_stats("ns").await.unwrap();
    assert_eq!(stats.queued, 1);
    let loaded = store.get_request("req-1").await.unwrap().unwrap();
    assert_eq!(loaded.created_at, ts(1));
}

#[tokio::test]
async fn writes_after_close_fail() {
    let temp = TempDir::new().unwrap();
    let mut config = SqliteStoreConfig::new(temp.path().join("dam.db"));
    config.batched_writes = true;
    let store = SqliteStore::new(config).expect("store init");
    store.create_namespace(&NamespaceRecord::new("ns", "", ts(0))).await.unwrap();
    store.close().await.unwrap();
    let err = store.create_request(&request("req-1", "ns", 1)).await.unwrap_err();
    assert!(matches!(err, StoreError::Transient(_)));
}
