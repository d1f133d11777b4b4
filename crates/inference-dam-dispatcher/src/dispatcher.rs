// crates/inference-dam-dispatcher/src/dispatcher.rs
// ============================================================================
// Module: Dispatch Engine
// Description: Single-flight, rate-limited drain of queued requests.
// Purpose: Run provider calls with bounded concurrency and record outcomes.
// Dependencies: inference-dam-core, tokio, tracing
// ============================================================================

//! ## Overview
//! `Dispatch` runs are fire-and-forget tasks, one per trigger. Per namespace
//! at most one run is active at a time; overlapping triggers collapse into
//! the running one. Within a run, requests start oldest-first, each worker
//! first waiting on the namespace token bucket and then on a semaphore slot.
//! A request failure never aborts its siblings. `processing` is never rolled
//! back to `queued`; a request whose `queued -> processing` transition failed
//! stays queued and is retried by the next trigger.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use inference_dam_core::JsonObject;
use inference_dam_core::NamespaceRecord;
use inference_dam_core::RequestRecord;
use inference_dam_core::RequestStatus;
use inference_dam_core::Store;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::client::HttpProviderClient;
use crate::client::ProviderClient;
use crate::client::ProviderError;
use crate::limiter::TokenBucket;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Error recorded when no provider endpoint is configured or supplied.
pub const MISSING_ENDPOINT_ERROR: &str = "Missing required configuration: API endpoint";
/// Error recorded when no provider API key is configured or supplied.
pub const MISSING_API_KEY_ERROR: &str = "Missing required configuration: API key";
/// Prefix for terminal errors produced by a failed provider call.
pub const PROVIDER_FAILURE_PREFIX: &str = "Provider request failed: ";
/// Path appended to the resolved endpoint for every provider call.
pub const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";
/// Payload key overridden when the namespace pins a model.
const MODEL_KEY: &str = "model";

// ============================================================================
// SECTION: Config
// ============================================================================

/// Dispatcher limits.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum concurrent provider calls per dispatch run.
    pub max_workers: usize,
    /// Deadline applied to each provider call.
    pub request_timeout: Duration,
    /// Sustained per-namespace dispatch rate (burst 1).
    pub requests_per_second: f64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            request_timeout: Duration::from_secs(300),
            requests_per_second: 10.0,
        }
    }
}

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// Dispatch engine shared between the API layer and its spawned runs.
#[derive(Clone)]
pub struct Dispatcher {
    /// Shared state; clones are cheap handles.
    inner: Arc<DispatcherInner>,
}

/// State shared by every dispatch run.
struct DispatcherInner {
    /// Durable request store.
    store: Arc<dyn Store>,
    /// Outbound provider client.
    client: Arc<dyn ProviderClient>,
    /// Dispatcher limits.
    config: DispatcherConfig,
    /// Namespaces with an active dispatch run.
    active: Mutex<HashSet<String>>,
    /// Per-namespace rate limiters, retained for the dispatcher's lifetime.
    limiters: Mutex<HashMap<String, Arc<TokenBucket>>>,
    /// Count of in-flight dispatch tasks, observed by [`Dispatcher::wait`].
    tasks: watch::Sender<usize>,
    /// Shutdown flag cancelling pending work in every run.
    shutdown: watch::Sender<bool>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given store and provider client.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn ProviderClient>,
        config: DispatcherConfig,
    ) -> Self {
        let (tasks, _) = watch::channel(0_usize);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(DispatcherInner {
                store,
                client,
                config,
                active: Mutex::new(HashSet::new()),
                limiters: Mutex::new(HashMap::new()),
                tasks,
                shutdown,
            }),
        }
    }

    /// Creates a dispatcher with the HTTP provider client, applying the
    /// configured request timeout to every call.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the HTTP client cannot be built.
    pub fn with_http_client(
        store: Arc<dyn Store>,
        config: DispatcherConfig,
    ) -> Result<Self, ProviderError> {
        let client = Arc::new(HttpProviderClient::new(config.request_timeout)?);
        Ok(Self::new(store, client, config))
    }

    /// Starts a dispatch run for the namespace and returns immediately. The
    /// call is a no-op when a run for the namespace is already active.
    pub fn dispatch(&self, namespace: &str, dispatch_id: &str) {
        let inner = Arc::clone(&self.inner);
        let namespace = namespace.to_string();
        let dispatch_id = dispatch_id.to_string();
        inner.tasks.send_modify(|count| *count += 1);
        tokio::spawn(async move {
            let _task = TaskGuard {
                tasks: inner.tasks.clone(),
            };
            run_dispatch(&inner, &namespace, &dispatch_id).await;
        });
    }

    /// Blocks until every in-flight dispatch task has returned.
    pub async fn wait(&self) {
        let mut tasks = self.inner.tasks.subscribe();
        let _ = tasks.wait_for(|count| *count == 0).await;
    }

    /// Cancels pending work in every run. Workers blocked on the limiter or
    /// the semaphore return without calling the provider; in-flight provider
    /// calls run to completion or their own timeout.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_modify(|flag| *flag = true);
    }
}

impl DispatcherInner {
    /// Returns the namespace's limiter, creating it on first use.
    fn limiter_for(&self, namespace: &str) -> Arc<TokenBucket> {
        let mut limiters = match self.limiters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(limiters.entry(namespace.to_string()).or_insert_with(|| {
            Arc::new(TokenBucket::new(self.config.requests_per_second, 1.0))
        }))
    }
}

// ============================================================================
// SECTION: Guards
// ============================================================================

/// Decrements the in-flight task count when a dispatch task exits.
struct TaskGuard {
    /// Task counter shared with [`Dispatcher::wait`].
    tasks: watch::Sender<usize>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.tasks.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Removes the namespace from the active set when a run exits, including on
/// early returns and panics.
struct FlightGuard {
    /// Shared dispatcher state.
    inner: Arc<DispatcherInner>,
    /// Namespace owned by this run.
    namespace: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut active = match self.inner.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.remove(&self.namespace);
    }
}

// ============================================================================
// SECTION: Dispatch Run
// ============================================================================

/// Executes one dispatch run for a namespace.
async fn run_dispatch(inner: &Arc<DispatcherInner>, namespace: &str, dispatch_id: &str) {
    {
        let mut active = match inner.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !active.insert(namespace.to_string()) {
            tracing::info!(dispatch_id, namespace, "dispatch already in progress");
            return;
        }
    }
    let _flight = FlightGuard {
        inner: Arc::clone(inner),
        namespace: namespace.to_string(),
    };

    let record = match inner.store.get_namespace(namespace).await {
        Ok(Some(record)) => Arc::new(record),
        Ok(None) => {
            tracing::warn!(dispatch_id, namespace, "dispatch skipped: namespace missing");
            return;
        }
        Err(err) => {
            tracing::warn!(dispatch_id, namespace, error = %err, "failed to load namespace");
            return;
        }
    };

    let queued = match inner.store.queued_requests(namespace).await {
        Ok(queued) => queued,
        Err(err) => {
            tracing::warn!(dispatch_id, namespace, error = %err, "failed to load queued requests");
            return;
        }
    };
    if queued.is_empty() {
        tracing::debug!(dispatch_id, namespace, "no queued requests");
        return;
    }
    tracing::info!(dispatch_id, namespace, count = queued.len(), "dispatch started");

    let limiter = inner.limiter_for(namespace);
    let semaphore = Arc::new(Semaphore::new(inner.config.max_workers));
    let mut workers = JoinSet::new();
    for request in queued {
        let inner = Arc::clone(inner);
        let record = Arc::clone(&record);
        let limiter = Arc::clone(&limiter);
        let semaphore = Arc::clone(&semaphore);
        let dispatch_id = dispatch_id.to_string();
        let mut cancel = inner.shutdown.subscribe();
        workers.spawn(async move {
            tokio::select! {
                () = cancelled(&mut cancel) => return,
                () = limiter.acquire() => {}
            }
            let permit = tokio::select! {
                () = cancelled(&mut cancel) => return,
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    }
                }
            };
            process_request(&inner, &record, &request, &dispatch_id).await;
            drop(permit);
        });
    }
    while workers.join_next().await.is_some() {}
    tracing::info!(dispatch_id, namespace, "dispatch finished");
}

/// Resolves to `()` once the shutdown flag is raised.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|flag| *flag).await;
}

/// Processes a single queued request through the provider.
async fn process_request(
    inner: &DispatcherInner,
    namespace: &NamespaceRecord,
    request: &RequestRecord,
    dispatch_id: &str,
) {
    let endpoint = namespace
        .provider_endpoint
        .clone()
        .or_else(|| request.header_endpoint.clone())
        .unwrap_or_default();
    let api_key = namespace
        .provider_api_key
        .clone()
        .or_else(|| request.header_api_key.clone())
        .unwrap_or_default();

    if endpoint.is_empty() {
        record_failure(inner, &request.id, MISSING_ENDPOINT_ERROR, dispatch_id).await;
        return;
    }
    if api_key.is_empty() {
        record_failure(inner, &request.id, MISSING_API_KEY_ERROR, dispatch_id).await;
        return;
    }

    // A failed transition leaves the request queued for the next trigger.
    if let Err(err) = inner
        .store
        .update_request_status(&request.id, RequestStatus::Processing, OffsetDateTime::now_utc())
        .await
    {
        tracing::warn!(dispatch_id, request = %request.id, error = %err, "failed to mark processing");
        return;
    }

    let headers = merged_headers(namespace, &request.passthrough_headers);
    let payload = effective_payload(&request.request_payload, namespace.provider_model.as_deref());
    let url = format!("{endpoint}{CHAT_COMPLETIONS_PATH}");

    match inner.client.send_request(&url, &api_key, &headers, &payload).await {
        Ok(response) => {
            if let Err(err) = inner.store.update_request_response(&request.id, response).await {
                tracing::error!(dispatch_id, request = %request.id, error = %err, "failed to record response");
            } else {
                tracing::debug!(dispatch_id, request = %request.id, "request completed");
            }
        }
        Err(err) => {
            let message = format!("{PROVIDER_FAILURE_PREFIX}{err}");
            record_failure(inner, &request.id, &message, dispatch_id).await;
        }
    }
}

/// Records a terminal failure, logging when the store write itself fails.
async fn record_failure(inner: &DispatcherInner, id: &str, message: &str, dispatch_id: &str) {
    tracing::warn!(dispatch_id, request = %id, message, "request failed");
    if let Err(err) = inner.store.update_request_error(id, message).await {
        tracing::error!(dispatch_id, request = %id, error = %err, "failed to record error");
    }
}

// ============================================================================
// SECTION: Payload Helpers
// ============================================================================

/// Merges passthrough headers with namespace provider headers; the namespace
/// wins on conflicts.
fn merged_headers(
    namespace: &NamespaceRecord,
    passthrough: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = passthrough.clone();
    for (name, value) in &namespace.provider_headers {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

/// Clones the submitted payload, overriding the model key when the namespace
/// pins one. The stored payload is never mutated.
fn effective_payload(payload: &JsonObject, model: Option<&str>) -> JsonObject {
    let mut effective = payload.clone();
    if let Some(model) = model {
        effective.insert(MODEL_KEY.to_string(), Value::String(model.to_string()));
    }
    effective
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace_with(headers: &[(&str, &str)], model: Option<&str>) -> NamespaceRecord {
        let mut record =
            NamespaceRecord::new("ns", "", OffsetDateTime::from_unix_timestamp(0).unwrap());
        record.provider_headers = headers
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect();
        record.provider_model = model.map(str::to_string);
        record
    }

    #[test]
    fn namespace_headers_override_passthrough() {
        let namespace = namespace_with(&[("X-Team", "ns")], None);
        let passthrough: BTreeMap<String, String> = [
            ("X-Team".to_string(), "client".to_string()),
            ("X-Extra".to_string(), "1".to_string()),
        ]
        .into_iter()
        .collect();
        let merged = merged_headers(&namespace, &passthrough);
        assert_eq!(merged.get("X-Team").map(String::as_str), Some("ns"));
        assert_eq!(merged.get("X-Extra").map(String::as_str), Some("1"));
    }

    #[test]
    fn model_override_leaves_original_payload_untouched() {
        let mut payload = JsonObject::new();
        payload.insert("model".to_string(), Value::String("gpt-4".to_string()));
        let effective = effective_payload(&payload, Some("pinned"));
        assert_eq!(effective.get("model"), Some(&Value::String("pinned".to_string())));
        assert_eq!(payload.get("model"), Some(&Value::String("gpt-4".to_string())));
    }

    #[test]
    fn no_model_override_copies_payload() {
        let mut payload = JsonObject::new();
        payload.insert("model".to_string(), Value::String("gpt-4".to_string()));
        let effective = effective_payload(&payload, None);
        assert_eq!(effective, payload);
    }
}
