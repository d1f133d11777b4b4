// crates/inference-dam-core/src/store.rs
// ============================================================================
// Module: Store Contract
// Description: Persistence contract for namespaces and requests.
// Purpose: Define the operations and error taxonomy backends must honor.
// Dependencies: async-trait, thiserror, time
// ============================================================================

//! ## Overview
//! [`Store`] is the single durable resource of the broker. Implementations
//! must make every request mutation atomic across three effects: the primary
//! record, the `(namespace, status, created_at)` ordering index, and the
//! per-`(namespace, status)` counters that answer [`Store::namespace_stats`]
//! in O(#statuses). Cancellation maps onto futures: callers drop a pending
//! operation to abandon it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::types::JsonObject;
use crate::types::NamespaceRecord;
use crate::types::NamespaceStats;
use crate::types::RequestFilter;
use crate::types::RequestPage;
use crate::types::RequestRecord;
use crate::types::RequestStatus;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Store operation errors.
///
/// # Invariants
/// - Only `Transient` is retryable; the other kinds are definitive.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A referenced namespace or request does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A namespace name or request id collided with an existing record.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The caller supplied an invalid filter or record.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Storage I/O failure; callers may retry at their discretion.
    #[error("storage failure: {0}")]
    Transient(String),
}

impl StoreError {
    /// Returns true when the operation may be retried safely.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

// ============================================================================
// SECTION: Store Trait
// ============================================================================

/// Durable persistence for namespaces and requests.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persists a new namespace.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when the name collides.
    async fn create_namespace(&self, record: &NamespaceRecord) -> Result<(), StoreError>;

    /// Fetches a namespace by name. Absence is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transient`] on storage failure.
    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceRecord>, StoreError>;

    /// Replaces the mutable fields of a namespace. `created_at` is preserved;
    /// `updated_at` is taken from the caller-supplied record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the namespace is absent.
    async fn update_namespace(
        &self,
        name: &str,
        record: &NamespaceRecord,
    ) -> Result<(), StoreError>;

    /// Atomically removes a namespace, all of its requests, their index
    /// entries, and its counters. Returns the number of deleted requests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the namespace is absent.
    async fn delete_namespace(&self, name: &str) -> Result<u64, StoreError>;

    /// Lists every namespace, ordered by name ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transient`] on storage failure.
    async fn list_namespaces(&self) -> Result<Vec<NamespaceRecord>, StoreError>;

    /// Returns per-status request counts from counters, never by scanning.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transient`] on storage failure.
    async fn namespace_stats(&self, name: &str) -> Result<NamespaceStats, StoreError>;

    /// Persists a new request with the caller-supplied `created_at`. The
    /// primary record, index entry, and counter increment commit together.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] on a duplicate id.
    async fn create_request(&self, record: &RequestRecord) -> Result<(), StoreError>;

    /// Fetches a request by id. Absence is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transient`] on storage failure.
    async fn get_request(&self, id: &str) -> Result<Option<RequestRecord>, StoreError>;

    /// Lists requests newest-first with cursor pagination. The page's `total`
    /// is a counter read taken at call time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when the filter namespace is
    /// empty.
    async fn list_requests(&self, filter: &RequestFilter) -> Result<RequestPage, StoreError>;

    /// Atomically moves a request to `status`, relocating its index entry and
    /// adjusting both counters. Sets `dispatched_at` to the provided instant
    /// on the first transition to `processing`. Calling with the current
    /// status is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the id is absent.
    async fn update_request_status(
        &self,
        id: &str,
        status: RequestStatus,
        dispatched_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Records a provider response: terminal `completed` status, response
    /// payload, and `completed_at`, atomically with index and counters.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the id is absent.
    async fn update_request_response(
        &self,
        id: &str,
        response: JsonObject,
    ) -> Result<(), StoreError>;

    /// Records a failure: terminal `failed` status, error message, and
    /// `completed_at`, atomically with index and counters.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the id is absent.
    async fn update_request_error(&self, id: &str, message: &str) -> Result<(), StoreError>;

    /// Returns a snapshot of the namespace's queued requests, oldest first.
    /// Insertions after the call are not observed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transient`] on storage failure.
    async fn queued_requests(&self, namespace: &str) -> Result<Vec<RequestRecord>, StoreError>;

    /// Flushes buffered writes and releases resources. Writes after close
    /// fail with [`StoreError::Transient`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transient`] when the flush fails.
    async fn close(&self) -> Result<(), StoreError>;
}
