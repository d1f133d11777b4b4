// crates/inference-dam-core/src/memory.rs
// ============================================================================
// Module: In-Memory Store
// Description: Reference Store backed by ordered in-process maps.
// Purpose: Provide a conformant store for tests and embedded use.
// Dependencies: crate::store, crate::types
// ============================================================================

//! ## Overview
//! [`InMemoryStore`] keeps the ordered-KV layout of the durable backends in
//! process memory: a namespace table, a request table, an ordered status
//! index keyed `(namespace, status, created_at, id)`, and a counter map
//! keyed `(namespace, status)`. Every mutation updates all affected
//! structures under one lock, so the atomicity contract holds trivially.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::store::Store;
use crate::store::StoreError;
use crate::types::JsonObject;
use crate::types::NamespaceRecord;
use crate::types::NamespaceStats;
use crate::types::RequestFilter;
use crate::types::RequestPage;
use crate::types::RequestRecord;
use crate::types::RequestStatus;

// ============================================================================
// SECTION: State
// ============================================================================

/// Ordering index key: `(namespace, status, created_at nanos, id)`.
type IndexKey = (String, RequestStatus, i128, String);

/// Mutable store state guarded by the store mutex.
#[derive(Default)]
struct MemoryInner {
    /// Namespace table, ordered by name.
    namespaces: BTreeMap<String, NamespaceRecord>,
    /// Request table keyed by id.
    requests: HashMap<String, RequestRecord>,
    /// Ordered status index for listings and queue scans.
    status_index: BTreeSet<IndexKey>,
    /// Per-`(namespace, status)` record counts.
    counters: BTreeMap<(String, RequestStatus), u64>,
}

impl MemoryInner {
    fn index_key(record: &RequestRecord) -> IndexKey {
        (
            record.namespace.clone(),
            record.status,
            record.created_at.unix_timestamp_nanos(),
            record.id.clone(),
        )
    }

    fn bump_counter(&mut self, namespace: &str, status: RequestStatus, delta: i64) {
        let entry = self.counters.entry((namespace.to_string(), status)).or_insert(0);
        if delta >= 0 {
            *entry = entry.saturating_add(delta.unsigned_abs());
        } else {
            *entry = entry.saturating_sub(delta.unsigned_abs());
        }
    }

    fn counter(&self, namespace: &str, status: RequestStatus) -> u64 {
        self.counters.get(&(namespace.to_string(), status)).copied().unwrap_or(0)
    }

    /// Moves a request to a new status, relocating the index entry and
    /// adjusting counters. The caller has verified the id exists.
    fn transition(
        &mut self,
        id: &str,
        status: RequestStatus,
        apply: impl FnOnce(&mut RequestRecord),
    ) {
        let Some(record) = self.requests.get_mut(id) else {
            return;
        };
        let old_key = Self::index_key(record);
        let old_status = record.status;
        record.status = status;
        apply(record);
        let new_key = Self::index_key(record);
        let namespace = record.namespace.clone();
        self.status_index.remove(&old_key);
        self.status_index.insert(new_key);
        self.bump_counter(&namespace, old_status, -1);
        self.bump_counter(&namespace, status, 1);
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// In-process store following the ordered-KV layout.
#[derive(Default)]
pub struct InMemoryStore {
    /// Shared state guarded by a single mutex; all operations are O(log n).
    inner: Mutex<MemoryInner>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Transient("store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_namespace(&self, record: &NamespaceRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.namespaces.contains_key(&record.name) {
            return Err(StoreError::AlreadyExists(format!("namespace {}", record.name)));
        }
        inner.namespaces.insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.namespaces.get(name).cloned())
    }

    async fn update_namespace(
        &self,
        name: &str,
        record: &NamespaceRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let Some(existing) = inner.namespaces.get(name) else {
            return Err(StoreError::NotFound(format!("namespace {name}")));
        };
        let created_at = existing.created_at;
        let mut updated = record.clone();
        updated.name = name.to_string();
        updated.created_at = created_at;
        inner.namespaces.insert(name.to_string(), updated);
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        if inner.namespaces.remove(name).is_none() {
            return Err(StoreError::NotFound(format!("namespace {name}")));
        }
        let lower: IndexKey =
            (name.to_string(), RequestStatus::Queued, i128::MIN, String::new());
        let keys: Vec<IndexKey> = inner
            .status_index
            .range(lower..)
            .take_while(|key| key.0 == name)
            .cloned()
            .collect();
        for key in &keys {
            inner.status_index.remove(key);
            inner.requests.remove(&key.3);
        }
        inner.counters.retain(|(namespace, _), _| namespace.as_str() != name);
        Ok(keys.len() as u64)
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.namespaces.values().cloned().collect())
    }

    async fn namespace_stats(&self, name: &str) -> Result<NamespaceStats, StoreError> {
        let inner = self.lock()?;
        let mut stats = NamespaceStats::default();
        for status in RequestStatus::ALL {
            let count = inner.counter(name, status);
            match status {
                RequestStatus::Queued => stats.queued = count,
                RequestStatus::Processing => stats.processing = count,
                RequestStatus::Completed => stats.completed = count,
                RequestStatus::Failed => stats.failed = count,
            }
            stats.total += count;
        }
        Ok(stats)
    }

    async fn create_request(&self, record: &RequestRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.requests.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(format!("request {}", record.id)));
        }
        let key = MemoryInner::index_key(record);
        let namespace = record.namespace.clone();
        let status = record.status;
        inner.requests.insert(record.id.clone(), record.clone());
        inner.status_index.insert(key);
        inner.bump_counter(&namespace, status, 1);
        Ok(())
    }

    async fn get_request(&self, id: &str) -> Result<Option<RequestRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.requests.get(id).cloned())
    }

    async fn list_requests(&self, filter: &RequestFilter) -> Result<RequestPage, StoreError> {
        if filter.namespace.is_empty() {
            return Err(StoreError::InvalidArgument("namespace is required".to_string()));
        }
        let inner = self.lock()?;
        let statuses: Vec<RequestStatus> = match filter.status {
            Some(status) => vec![status],
            None => RequestStatus::ALL.to_vec(),
        };
        let cursor_nanos = filter.cursor.map(OffsetDateTime::unix_timestamp_nanos);

        let mut entries: Vec<(i128, String)> = Vec::new();
        let mut total = 0_u64;
        for status in &statuses {
            total += inner.counter(&filter.namespace, *status);
            let lower: IndexKey =
                (filter.namespace.clone(), *status, i128::MIN, String::new());
            for key in inner
                .status_index
                .range(lower..)
                .take_while(|key| key.0 == filter.namespace && key.1 == *status)
            {
                if cursor_nanos.is_some_and(|cursor| key.2 >= cursor) {
                    continue;
                }
                entries.push((key.2, key.3.clone()));
            }
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        entries.truncate(filter.effective_limit());

        let records = entries
            .into_iter()
            .filter_map(|(_, id)| inner.requests.get(&id).cloned())
            .collect();
        Ok(RequestPage {
            records,
            total,
        })
    }

    async fn update_request_status(
        &self,
        id: &str,
        status: RequestStatus,
        dispatched_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let Some(current) = inner.requests.get(id) else {
            return Err(StoreError::NotFound(format!("request {id}")));
        };
        if current.status == status {
            return Ok(());
        }
        inner.transition(id, status, |record| {
            if status == RequestStatus::Processing && record.dispatched_at.is_none() {
                record.dispatched_at = Some(dispatched_at);
            }
        });
        Ok(())
    }

    async fn update_request_response(
        &self,
        id: &str,
        response: JsonObject,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.requests.contains_key(id) {
            return Err(StoreError::NotFound(format!("request {id}")));
        }
        let completed_at = OffsetDateTime::now_utc();
        inner.transition(id, RequestStatus::Completed, |record| {
            record.response_payload = Some(response);
            record.error = None;
            record.completed_at = Some(completed_at);
        });
        Ok(())
    }

    async fn update_request_error(&self, id: &str, message: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.requests.contains_key(id) {
            return Err(StoreError::NotFound(format!("request {id}")));
        }
        let completed_at = OffsetDateTime::now_utc();
        inner.transition(id, RequestStatus::Failed, |record| {
            record.error = Some(message.to_string());
            record.response_payload = None;
            record.completed_at = Some(completed_at);
        });
        Ok(())
    }

    async fn queued_requests(&self, namespace: &str) -> Result<Vec<RequestRecord>, StoreError> {
        let inner = self.lock()?;
        let lower: IndexKey =
            (namespace.to_string(), RequestStatus::Queued, i128::MIN, String::new());
        let records = inner
            .status_index
            .range(lower..)
            .take_while(|key| key.0 == namespace && key.1 == RequestStatus::Queued)
            .filter_map(|key| inner.requests.get(&key.3).cloned())
            .collect();
        Ok(records)
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
