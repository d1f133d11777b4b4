// crates/inference-dam-api/src/types.rs
// ============================================================================
// Module: API Wire Types
// Description: Request and response bodies for the broker's HTTP contract.
// Purpose: Shape JSON payloads and convert persisted records onto the wire.
// Dependencies: inference-dam-core, serde, time
// ============================================================================

//! ## Overview
//! Wire shapes follow the data model: request views expose
//! `request_payload` / `response_payload`, stats expose `total`, timestamps
//! serialize as RFC 3339 strings. Namespace views never echo the stored
//! provider API key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use inference_dam_core::JsonObject;
use inference_dam_core::NamespaceRecord;
use inference_dam_core::NamespaceStats;
use inference_dam_core::RequestRecord;
use inference_dam_core::RequestStatus;
use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Error Body
// ============================================================================

/// JSON error body returned by every failing route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
}

// ============================================================================
// SECTION: Namespace Wire Types
// ============================================================================

/// Provider configuration accepted on namespace create and update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Upstream base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,
    /// Upstream API key. Accepted on writes, never echoed on reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model override for dispatched payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Headers merged over passthrough headers at dispatch time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

/// Body for `POST /namespaces`.
#[derive(Debug, Deserialize)]
pub struct CreateNamespaceRequest {
    /// Namespace name; required and unique.
    #[serde(default)]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Optional provider configuration.
    pub provider: Option<ProviderSettings>,
}

/// Body for `PATCH /namespaces/{name}`.
#[derive(Debug, Deserialize)]
pub struct UpdateNamespaceRequest {
    /// Replacement description when present.
    pub description: Option<String>,
    /// Replacement provider configuration when present.
    pub provider: Option<ProviderSettings>,
}

/// Namespace representation on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct NamespaceView {
    /// Namespace name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Provider configuration without the API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderSettings>,
    /// Request counts, included on single-namespace reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<NamespaceStats>,
    /// Creation instant, RFC 3339.
    pub created_at: String,
    /// Last-update instant, RFC 3339.
    pub updated_at: String,
}

/// Body for `DELETE /namespaces/{name}` responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteNamespaceResponse {
    /// Human-readable confirmation.
    pub message: String,
    /// Number of requests removed with the namespace.
    pub deleted_requests: u64,
}

// ============================================================================
// SECTION: Request Wire Types
// ============================================================================

/// Body for `POST /v1/chat/completions` responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueuedResponse {
    /// Assigned request identifier.
    pub id: String,
    /// Namespace the request was queued in.
    pub namespace: String,
    /// Always `queued` at submission.
    pub status: RequestStatus,
    /// Submission instant, RFC 3339.
    pub created_at: String,
}

/// Request representation on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestView {
    /// Request identifier.
    pub id: String,
    /// Owning namespace.
    pub namespace: String,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Submitted payload.
    pub request_payload: JsonObject,
    /// Provider response, present for completed requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_payload: Option<JsonObject>,
    /// Failure message, present for failed requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Submission instant, RFC 3339.
    pub created_at: String,
    /// First dispatch instant, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<String>,
    /// Terminal transition instant, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Query parameters for `GET /requests`.
#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    /// Namespace to list; required.
    pub namespace: Option<String>,
    /// Optional status filter label.
    pub status: Option<String>,
    /// RFC 3339 cursor from the previous page.
    pub cursor: Option<String>,
    /// Requested page size.
    pub limit: Option<usize>,
}

/// Body for `GET /requests` responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListRequestsResponse {
    /// One page of requests, newest first.
    pub requests: Vec<RequestView>,
    /// Total matching records at call time; advisory under concurrency.
    pub total: u64,
    /// Effective page size.
    pub limit: usize,
    /// Cursor for the next page, present when the page was full.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// ============================================================================
// SECTION: Dispatch Wire Types
// ============================================================================

/// Body for `POST /dispatch`.
#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    /// Namespace to drain.
    #[serde(default)]
    pub namespace: String,
}

/// Body for `POST /dispatch` responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchResponse {
    /// Assigned dispatch identifier.
    pub dispatch_id: String,
    /// Namespace being drained.
    pub namespace: String,
    /// Queued requests observed at trigger time.
    pub queued_count: u64,
    /// `dispatching` or `no_requests`.
    pub status: String,
}

/// Body for `GET /health` responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok` while the server is up.
    pub status: String,
}

// ============================================================================
// SECTION: Conversions
// ============================================================================

/// Formats an instant as RFC 3339 for the wire.
pub(crate) fn rfc3339(instant: OffsetDateTime) -> String {
    instant.format(&Rfc3339).unwrap_or_default()
}

/// Applies accepted provider settings onto a namespace record.
pub(crate) fn apply_provider(record: &mut NamespaceRecord, provider: &ProviderSettings) {
    record.provider_endpoint = provider.api_endpoint.clone();
    record.provider_api_key = provider.api_key.clone();
    record.provider_model = provider.model.clone();
    record.provider_headers = provider.headers.clone().unwrap_or_default();
}

/// Converts a namespace record onto the wire, omitting the API key.
pub(crate) fn namespace_view(
    record: &NamespaceRecord,
    stats: Option<NamespaceStats>,
) -> NamespaceView {
    let has_provider = record.provider_endpoint.is_some()
        || record.provider_model.is_some()
        || !record.provider_headers.is_empty();
    let provider = has_provider.then(|| ProviderSettings {
        api_endpoint: record.provider_endpoint.clone(),
        api_key: None,
        model: record.provider_model.clone(),
        headers: (!record.provider_headers.is_empty())
            .then(|| record.provider_headers.clone()),
    });
    NamespaceView {
        name: record.name.clone(),
        description: record.description.clone(),
        provider,
        stats,
        created_at: rfc3339(record.created_at),
        updated_at: rfc3339(record.updated_at),
    }
}

/// Converts a request record onto the wire.
pub(crate) fn request_view(record: &RequestRecord) -> RequestView {
    RequestView {
        id: record.id.clone(),
        namespace: record.namespace.clone(),
        status: record.status,
        request_payload: record.request_payload.clone(),
        response_payload: record.response_payload.clone(),
        error: record.error.clone(),
        created_at: rfc3339(record.created_at),
        dispatched_at: record.dispatched_at.map(rfc3339),
        completed_at: record.completed_at.map(rfc3339),
    }
}
