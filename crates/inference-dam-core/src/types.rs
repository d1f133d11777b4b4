// crates/inference-dam-core/src/types.rs
// ============================================================================
// Module: Inference Dam Domain Types
// Description: Namespace and request records with their status lifecycle.
// Purpose: Provide the shared data model for stores, dispatcher, and API.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! The broker persists two record kinds: namespaces (a logical partition
//! carrying provider configuration) and requests (one queued chat-completion
//! submission each). Requests move through a small status lifecycle:
//! `queued -> processing -> {completed | failed}`, with `queued -> failed`
//! permitted for pre-dispatch configuration errors. Terminal states are
//! absorbing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Name of the namespace that always exists and cannot be deleted.
pub const DEFAULT_NAMESPACE: &str = "default";
/// Default page size for request listings.
pub const DEFAULT_LIST_LIMIT: usize = 100;
/// Hard ceiling for request listing page sizes.
pub const MAX_LIST_LIMIT: usize = 1_000;

/// JSON object payload as stored for requests and responses.
pub type JsonObject = serde_json::Map<String, Value>;

// ============================================================================
// SECTION: Request Status
// ============================================================================

/// Lifecycle status of a queued inference request.
///
/// # Invariants
/// - Legal transitions: `queued -> processing -> {completed | failed}` and
///   `queued -> failed`.
/// - `completed` and `failed` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Accepted and durably stored, awaiting dispatch.
    Queued,
    /// Handed to a dispatch worker; a provider call may be in flight.
    Processing,
    /// Provider call succeeded; a response payload is recorded.
    Completed,
    /// Terminal failure; an error message is recorded.
    Failed,
}

impl RequestStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Queued, Self::Processing, Self::Completed, Self::Failed];

    /// Returns the stable wire label for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a wire label into a status.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns true when no further transitions are allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// Persisted namespace record.
///
/// # Invariants
/// - `name` is the primary key and is never mutated after creation.
/// - `created_at` is set at insert and preserved by updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRecord {
    /// Unique namespace name.
    pub name: String,
    /// Free-form description, possibly empty.
    pub description: String,
    /// Upstream provider base URL, when configured.
    pub provider_endpoint: Option<String>,
    /// Upstream provider API key, when configured.
    pub provider_api_key: Option<String>,
    /// Model override applied to every dispatched payload, when configured.
    pub provider_model: Option<String>,
    /// Headers merged over per-request passthrough headers at dispatch time.
    pub provider_headers: BTreeMap<String, String>,
    /// Creation instant.
    pub created_at: OffsetDateTime,
    /// Last-update instant, set by the caller on every update.
    pub updated_at: OffsetDateTime,
}

impl NamespaceRecord {
    /// Creates a namespace record with no provider configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            provider_endpoint: None,
            provider_api_key: None,
            provider_model: None,
            provider_headers: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persisted request record.
///
/// # Invariants
/// - `id` is globally unique and opaque.
/// - `created_at` is set at insert and never mutated; it is the ordering and
///   index key for all listings.
/// - `dispatched_at` is set on the first transition to `processing`.
/// - `completed_at` is set on the terminal transition.
/// - `response_payload` is present exactly when `status == completed`;
///   `error` is present exactly when `status == failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// Caller-supplied unique request identifier.
    pub id: String,
    /// Owning namespace name.
    pub namespace: String,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Submitted chat-completion payload.
    pub request_payload: JsonObject,
    /// Client headers forwarded to the provider at dispatch time.
    pub passthrough_headers: BTreeMap<String, String>,
    /// Per-request endpoint fallback captured from submission headers.
    pub header_endpoint: Option<String>,
    /// Per-request API key fallback captured from submission headers.
    pub header_api_key: Option<String>,
    /// Provider response payload, present for completed requests.
    pub response_payload: Option<JsonObject>,
    /// Failure message, present for failed requests.
    pub error: Option<String>,
    /// Submission instant.
    pub created_at: OffsetDateTime,
    /// Instant of the first transition to `processing`.
    pub dispatched_at: Option<OffsetDateTime>,
    /// Instant of the terminal transition.
    pub completed_at: Option<OffsetDateTime>,
}

impl RequestRecord {
    /// Creates a queued request record with the given payload.
    #[must_use]
    pub fn queued(
        id: impl Into<String>,
        namespace: impl Into<String>,
        request_payload: JsonObject,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            namespace: namespace.into(),
            status: RequestStatus::Queued,
            request_payload,
            passthrough_headers: BTreeMap::new(),
            header_endpoint: None,
            header_api_key: None,
            response_payload: None,
            error: None,
            created_at,
            dispatched_at: None,
            completed_at: None,
        }
    }
}

// ============================================================================
// SECTION: Stats and Filters
// ============================================================================

/// Per-namespace request counts, answered from counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceStats {
    /// Total requests in the namespace.
    pub total: u64,
    /// Requests awaiting dispatch.
    pub queued: u64,
    /// Requests currently being dispatched.
    pub processing: u64,
    /// Requests with a recorded provider response.
    pub completed: u64,
    /// Requests with a recorded failure.
    pub failed: u64,
}

impl NamespaceStats {
    /// Returns the count bucket for the given status.
    #[must_use]
    pub const fn for_status(&self, status: RequestStatus) -> u64 {
        match status {
            RequestStatus::Queued => self.queued,
            RequestStatus::Processing => self.processing,
            RequestStatus::Completed => self.completed,
            RequestStatus::Failed => self.failed,
        }
    }
}

/// Filter for request listings.
///
/// # Invariants
/// - `namespace` is required.
/// - `cursor` is the `created_at` of the last record of the previous page;
///   the next page contains records with strictly smaller `created_at`.
#[derive(Debug, Clone)]
pub struct RequestFilter {
    /// Namespace to list.
    pub namespace: String,
    /// Optional status restriction.
    pub status: Option<RequestStatus>,
    /// Exclusive upper bound on `created_at`.
    pub cursor: Option<OffsetDateTime>,
    /// Requested page size; `0` means the default.
    pub limit: usize,
}

impl RequestFilter {
    /// Creates a filter over every request of a namespace.
    #[must_use]
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            status: None,
            cursor: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }

    /// Returns the effective page size with defaults and the ceiling applied.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            self.limit.min(MAX_LIST_LIMIT)
        }
    }
}

/// One page of a request listing.
#[derive(Debug, Clone)]
pub struct RequestPage {
    /// Records ordered by `created_at` descending, id tiebreak.
    pub records: Vec<RequestRecord>,
    /// Total records matching the namespace and status filter at call time.
    /// Read from counters; advisory under concurrent insertion.
    pub total: u64,
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_round_trip() {
        for status in RequestStatus::ALL {
            assert_eq!(RequestStatus::from_label(status.as_str()), Some(status));
        }
        assert_eq!(RequestStatus::from_label("cancelled"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RequestStatus::Queued.is_terminal());
        assert!(!RequestStatus::Processing.is_terminal());
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
    }

    #[test]
    fn effective_limit_applies_default_and_ceiling() {
        let mut filter = RequestFilter::namespace("ns");
        filter.limit = 0;
        assert_eq!(filter.effective_limit(), DEFAULT_LIST_LIMIT);
        filter.limit = 7;
        assert_eq!(filter.effective_limit(), 7);
        filter.limit = MAX_LIST_LIMIT + 1;
        assert_eq!(filter.effective_limit(), MAX_LIST_LIMIT);
    }
}
