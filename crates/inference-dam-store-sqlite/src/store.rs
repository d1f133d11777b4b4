// crates/inference-dam-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Request Store
// Description: Durable Store backed by SQLite WAL.
// Purpose: Persist namespaces and requests with transactional counters.
// Dependencies: inference-dam-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Relational layout: `namespaces` and `requests` tables with JSON text
//! columns, a composite `(namespace, status, created_at)` index for queue
//! scans, and a `request_counts` table maintained in the same transaction as
//! every request mutation so stats are a counter read. Timestamps are stored
//! as unix nanoseconds; `created_at` is immutable and is the ordering key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use inference_dam_core::JsonObject;
use inference_dam_core::NamespaceRecord;
use inference_dam_core::NamespaceStats;
use inference_dam_core::RequestFilter;
use inference_dam_core::RequestPage;
use inference_dam_core::RequestRecord;
use inference_dam_core::RequestStatus;
use inference_dam_core::Store;
use inference_dam_core::StoreError;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::Transaction;
use rusqlite::params;
use rusqlite::types::Value as SqlValue;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::batch::BatchWriter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Columns selected for request rows, in [`row_to_request`] order.
const REQUEST_COLUMNS: &str = "id, namespace, status, request_payload, passthrough_headers, \
                               header_endpoint, header_api_key, response_payload, error, \
                               created_at, dispatched_at, completed_at";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` request store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Buffer `create_request` writes and commit them in batches. Trades
    /// read-your-writes on the ingest path for throughput.
    #[serde(default)]
    pub batched_writes: bool,
}

impl SqliteStoreConfig {
    /// Creates a configuration with defaults for the given database path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
            batched_writes: false,
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Stored data failed to decode.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Primary key collision.
    #[error("duplicate record: {0}")]
    Duplicate(String),
    /// Referenced record is absent.
    #[error("missing record: {0}")]
    Missing(String),
    /// The store was closed and rejects further writes.
    #[error("sqlite store is closed")]
    Closed,
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Duplicate(message) => Self::AlreadyExists(message),
            SqliteStoreError::Missing(message) => Self::NotFound(message),
            SqliteStoreError::Io(_)
            | SqliteStoreError::Db(_)
            | SqliteStoreError::Corrupt(_)
            | SqliteStoreError::VersionMismatch(_)
            | SqliteStoreError::Closed => Self::Transient(error.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed request store with WAL support.
#[derive(Clone)]
pub struct SqliteStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
    /// Batched ingest writer, present when `batched_writes` is enabled.
    batch: Option<Arc<BatchWriter>>,
}

impl SqliteStore {
    /// Opens an `SQLite`-backed request store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        ensure_parent_dir(&config.path)?;
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let mut connection = Connection::open_with_flags(&config.path, flags)
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        apply_pragmas(&connection, &config)?;
        initialize_schema(&mut connection)?;
        let connection = Arc::new(Mutex::new(connection));
        let batch = config
            .batched_writes
            .then(|| Arc::new(BatchWriter::spawn(Arc::clone(&connection))));
        Ok(Self {
            connection,
            batch,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }

    fn create_namespace_inner(&self, record: &NamespaceRecord) -> Result<(), SqliteStoreError> {
        let headers = encode_headers(&record.provider_headers)?;
        let guard = self.lock()?;
        let result = guard.execute(
            "INSERT INTO namespaces (name, description, provider_endpoint, provider_api_key, \
             provider_model, provider_headers, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, \
             ?5, ?6, ?7, ?8)",
            params![
                record.name,
                record.description,
                record.provider_endpoint,
                record.provider_api_key,
                record.provider_model,
                headers,
                to_nanos(record.created_at)?,
                to_nanos(record.updated_at)?,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_constraint_violation(&err) => {
                Err(SqliteStoreError::Duplicate(format!("namespace {}", record.name)))
            }
            Err(err) => Err(SqliteStoreError::Db(err.to_string())),
        }
    }

    fn get_namespace_inner(&self, name: &str) -> Result<Option<NamespaceRecord>, SqliteStoreError> {
        let guard = self.lock()?;
        guard
            .query_row(
                "SELECT name, description, provider_endpoint, provider_api_key, provider_model, \
                 provider_headers, created_at, updated_at FROM namespaces WHERE name = ?1",
                params![name],
                row_to_namespace,
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?
            .transpose()
    }

    fn update_namespace_inner(
        &self,
        name: &str,
        record: &NamespaceRecord,
    ) -> Result<(), SqliteStoreError> {
        let headers = encode_headers(&record.provider_headers)?;
        let guard = self.lock()?;
        let updated = guard
            .execute(
                "UPDATE namespaces SET description = ?2, provider_endpoint = ?3, \
                 provider_api_key = ?4, provider_model = ?5, provider_headers = ?6, updated_at = \
                 ?7 WHERE name = ?1",
                params![
                    name,
                    record.description,
                    record.provider_endpoint,
                    record.provider_api_key,
                    record.provider_model,
                    headers,
                    to_nanos(record.updated_at)?,
                ],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        if updated == 0 {
            return Err(SqliteStoreError::Missing(format!("namespace {name}")));
        }
        Ok(())
    }

    fn delete_namespace_inner(&self, name: &str) -> Result<u64, SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM namespaces WHERE name = ?1", params![name], |row| row.get(0))
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        if exists.is_none() {
            return Err(SqliteStoreError::Missing(format!("namespace {name}")));
        }
        let deleted = tx
            .execute("DELETE FROM requests WHERE namespace = ?1", params![name])
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        tx.execute("DELETE FROM request_counts WHERE namespace = ?1", params![name])
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        tx.execute("DELETE FROM namespaces WHERE name = ?1", params![name])
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(deleted as u64)
    }

    fn list_namespaces_inner(&self) -> Result<Vec<NamespaceRecord>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT name, description, provider_endpoint, provider_api_key, provider_model, \
                 provider_headers, created_at, updated_at FROM namespaces ORDER BY name ASC",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = statement
            .query_map(params![], row_to_namespace)
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|err| SqliteStoreError::Db(err.to_string()))??);
        }
        Ok(records)
    }

    fn namespace_stats_inner(&self, name: &str) -> Result<NamespaceStats, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare("SELECT status, count FROM request_counts WHERE namespace = ?1")
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = statement
            .query_map(params![name], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count))
            })
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut stats = NamespaceStats::default();
        for row in rows {
            let (status, count) = row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let count = u64::try_from(count.max(0)).unwrap_or(0);
            match RequestStatus::from_label(&status) {
                Some(RequestStatus::Queued) => stats.queued = count,
                Some(RequestStatus::Processing) => stats.processing = count,
                Some(RequestStatus::Completed) => stats.completed = count,
                Some(RequestStatus::Failed) => stats.failed = count,
                None => {
                    return Err(SqliteStoreError::Corrupt(format!("unknown status: {status}")));
                }
            }
            stats.total += count;
        }
        Ok(stats)
    }

    fn create_request_inner(&self, record: &RequestRecord) -> Result<(), SqliteStoreError> {
        if let Some(batch) = &self.batch {
            return batch.submit(record.clone());
        }
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        insert_request_tx(&tx, record)?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))
    }

    fn get_request_inner(&self, id: &str) -> Result<Option<RequestRecord>, SqliteStoreError> {
        let guard = self.lock()?;
        guard
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1"),
                params![id],
                row_to_request,
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?
            .transpose()
    }

    fn list_requests_inner(&self, filter: &RequestFilter) -> Result<RequestPage, SqliteStoreError> {
        let guard = self.lock()?;

        let mut sql = format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE namespace = ?");
        let mut values: Vec<SqlValue> = vec![SqlValue::Text(filter.namespace.clone())];
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            values.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(cursor) = filter.cursor {
            sql.push_str(" AND created_at < ?");
            values.push(SqlValue::Integer(to_nanos(cursor)?));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");
        values.push(SqlValue::Integer(filter.effective_limit() as i64));

        let mut statement =
            guard.prepare(&sql).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = statement
            .query_map(rusqlite::params_from_iter(values), row_to_request)
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|err| SqliteStoreError::Db(err.to_string()))??);
        }

        let total: i64 = match filter.status {
            Some(status) => guard
                .query_row(
                    "SELECT count FROM request_counts WHERE namespace = ?1 AND status = ?2",
                    params![filter.namespace, status.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?
                .unwrap_or(0),
            None => guard
                .query_row(
                    "SELECT COALESCE(SUM(count), 0) FROM request_counts WHERE namespace = ?1",
                    params![filter.namespace],
                    |row| row.get(0),
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?,
        };

        Ok(RequestPage {
            records,
            total: u64::try_from(total.max(0)).unwrap_or(0),
        })
    }

    fn update_request_status_inner(
        &self,
        id: &str,
        status: RequestStatus,
        dispatched_at: OffsetDateTime,
    ) -> Result<(), SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let current = tx
            .query_row(
                "SELECT namespace, status, dispatched_at FROM requests WHERE id = ?1",
                params![id],
                |row| {
                    let namespace: String = row.get(0)?;
                    let status: String = row.get(1)?;
                    let dispatched_at: Option<i64> = row.get(2)?;
                    Ok((namespace, status, dispatched_at))
                },
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let Some((namespace, old_label, old_dispatched)) = current else {
            return Err(SqliteStoreError::Missing(format!("request {id}")));
        };
        let old_status = RequestStatus::from_label(&old_label)
            .ok_or_else(|| SqliteStoreError::Corrupt(format!("unknown status: {old_label}")))?;
        if old_status == status {
            return Ok(());
        }
        let dispatched = if status == RequestStatus::Processing && old_dispatched.is_none() {
            Some(to_nanos(dispatched_at)?)
        } else {
            old_dispatched
        };
        tx.execute(
            "UPDATE requests SET status = ?2, dispatched_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), dispatched],
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        decrement_count_tx(&tx, &namespace, old_status)?;
        increment_count_tx(&tx, &namespace, status)?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))
    }

    fn finalize_request_inner(
        &self,
        id: &str,
        status: RequestStatus,
        response: Option<&JsonObject>,
        error: Option<&str>,
    ) -> Result<(), SqliteStoreError> {
        let response_json = response.map(encode_object).transpose()?;
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let current = tx
            .query_row(
                "SELECT namespace, status FROM requests WHERE id = ?1",
                params![id],
                |row| {
                    let namespace: String = row.get(0)?;
                    let status: String = row.get(1)?;
                    Ok((namespace, status))
                },
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let Some((namespace, old_label)) = current else {
            return Err(SqliteStoreError::Missing(format!("request {id}")));
        };
        let old_status = RequestStatus::from_label(&old_label)
            .ok_or_else(|| SqliteStoreError::Corrupt(format!("unknown status: {old_label}")))?;
        tx.execute(
            "UPDATE requests SET status = ?2, response_payload = ?3, error = ?4, completed_at = \
             ?5 WHERE id = ?1",
            params![
                id,
                status.as_str(),
                response_json,
                error,
                to_nanos(OffsetDateTime::now_utc())?,
            ],
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        decrement_count_tx(&tx, &namespace, old_status)?;
        increment_count_tx(&tx, &namespace, status)?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))
    }

    fn queued_requests_inner(&self, namespace: &str) -> Result<Vec<RequestRecord>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(&format!(
                "SELECT {REQUEST_COLUMNS} FROM requests WHERE namespace = ?1 AND status = ?2 \
                 ORDER BY created_at ASC, id ASC"
            ))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = statement
            .query_map(params![namespace, RequestStatus::Queued.as_str()], row_to_request)
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|err| SqliteStoreError::Db(err.to_string()))??);
        }
        Ok(records)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_namespace(&self, record: &NamespaceRecord) -> Result<(), StoreError> {
        self.create_namespace_inner(record).map_err(StoreError::from)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceRecord>, StoreError> {
        self.get_namespace_inner(name).map_err(StoreError::from)
    }

    async fn update_namespace(
        &self,
        name: &str,
        record: &NamespaceRecord,
    ) -> Result<(), StoreError> {
        self.update_namespace_inner(name, record).map_err(StoreError::from)
    }

    async fn delete_namespace(&self, name: &str) -> Result<u64, StoreError> {
        self.delete_namespace_inner(name).map_err(StoreError::from)
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceRecord>, StoreError> {
        self.list_namespaces_inner().map_err(StoreError::from)
    }

    async fn namespace_stats(&self, name: &str) -> Result<NamespaceStats, StoreError> {
        self.namespace_stats_inner(name).map_err(StoreError::from)
    }

    async fn create_request(&self, record: &RequestRecord) -> Result<(), StoreError> {
        self.create_request_inner(record).map_err(StoreError::from)
    }

    async fn get_request(&self, id: &str) -> Result<Option<RequestRecord>, StoreError> {
        self.get_request_inner(id).map_err(StoreError::from)
    }

    async fn list_requests(&self, filter: &RequestFilter) -> Result<RequestPage, StoreError> {
        if filter.namespace.is_empty() {
            return Err(StoreError::InvalidArgument("namespace is required".to_string()));
        }
        self.list_requests_inner(filter).map_err(StoreError::from)
    }

    async fn update_request_status(
        &self,
        id: &str,
        status: RequestStatus,
        dispatched_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        self.update_request_status_inner(id, status, dispatched_at).map_err(StoreError::from)
    }

    async fn update_request_response(
        &self,
        id: &str,
        response: JsonObject,
    ) -> Result<(), StoreError> {
        self.finalize_request_inner(id, RequestStatus::Completed, Some(&response), None)
            .map_err(StoreError::from)
    }

    async fn update_request_error(&self, id: &str, message: &str) -> Result<(), StoreError> {
        self.finalize_request_inner(id, RequestStatus::Failed, None, Some(message))
            .map_err(StoreError::from)
    }

    async fn queued_requests(&self, namespace: &str) -> Result<Vec<RequestRecord>, StoreError> {
        self.queued_requests_inner(namespace).map_err(StoreError::from)
    }

    async fn close(&self) -> Result<(), StoreError> {
        if let Some(batch) = &self.batch {
            batch.close();
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Shared SQL Helpers
// ============================================================================

/// Inserts a request row and increments its `(namespace, status)` counter.
/// Used by the synchronous ingest path and the batch flusher alike so both
/// commit the same per-request mutations.
pub(crate) fn insert_request_tx(
    tx: &Transaction<'_>,
    record: &RequestRecord,
) -> Result<(), SqliteStoreError> {
    let payload = encode_object(&record.request_payload)?;
    let passthrough = if record.passthrough_headers.is_empty() {
        None
    } else {
        Some(encode_headers(&record.passthrough_headers)?)
    };
    let response = record.response_payload.as_ref().map(encode_object).transpose()?;
    let result = tx.execute(
        "INSERT INTO requests (id, namespace, status, request_payload, passthrough_headers, \
         header_endpoint, header_api_key, response_payload, error, created_at, dispatched_at, \
         completed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.id,
            record.namespace,
            record.status.as_str(),
            payload,
            passthrough,
            record.header_endpoint,
            record.header_api_key,
            response,
            record.error,
            to_nanos(record.created_at)?,
            record.dispatched_at.map(to_nanos).transpose()?,
            record.completed_at.map(to_nanos).transpose()?,
        ],
    );
    match result {
        Ok(_) => {}
        Err(err) if is_constraint_violation(&err) => {
            return Err(SqliteStoreError::Duplicate(format!("request {}", record.id)));
        }
        Err(err) => return Err(SqliteStoreError::Db(err.to_string())),
    }
    increment_count_tx(tx, &record.namespace, record.status)
}

/// Increments a `(namespace, status)` counter, creating it at one if absent.
pub(crate) fn increment_count_tx(
    tx: &Transaction<'_>,
    namespace: &str,
    status: RequestStatus,
) -> Result<(), SqliteStoreError> {
    tx.execute(
        "INSERT INTO request_counts (namespace, status, count) VALUES (?1, ?2, 1) ON \
         CONFLICT(namespace, status) DO UPDATE SET count = count + 1",
        params![namespace, status.as_str()],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Decrements a `(namespace, status)` counter, never below zero.
fn decrement_count_tx(
    tx: &Transaction<'_>,
    namespace: &str,
    status: RequestStatus,
) -> Result<(), SqliteStoreError> {
    tx.execute(
        "UPDATE request_counts SET count = count - 1 WHERE namespace = ?1 AND status = ?2 AND \
         count > 0",
        params![namespace, status.as_str()],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Maps a namespace row into a record. Decode failures surface as an inner
/// error so rusqlite's row error does not swallow them.
fn row_to_namespace(row: &Row<'_>) -> rusqlite::Result<Result<NamespaceRecord, SqliteStoreError>> {
    let name: String = row.get(0)?;
    let description: String = row.get(1)?;
    let provider_endpoint: Option<String> = row.get(2)?;
    let provider_api_key: Option<String> = row.get(3)?;
    let provider_model: Option<String> = row.get(4)?;
    let headers: String = row.get(5)?;
    let created_at: i64 = row.get(6)?;
    let updated_at: i64 = row.get(7)?;
    Ok(decode_namespace(
        name,
        description,
        provider_endpoint,
        provider_api_key,
        provider_model,
        headers,
        created_at,
        updated_at,
    ))
}

#[allow(clippy::too_many_arguments, reason = "mirrors the namespace column list")]
fn decode_namespace(
    name: String,
    description: String,
    provider_endpoint: Option<String>,
    provider_api_key: Option<String>,
    provider_model: Option<String>,
    headers: String,
    created_at: i64,
    updated_at: i64,
) -> Result<NamespaceRecord, SqliteStoreError> {
    Ok(NamespaceRecord {
        name,
        description,
        provider_endpoint,
        provider_api_key,
        provider_model,
        provider_headers: decode_headers(&headers)?,
        created_at: from_nanos(created_at)?,
        updated_at: from_nanos(updated_at)?,
    })
}

/// Maps a request row ([`REQUEST_COLUMNS`] order) into a record.
fn row_to_request(row: &Row<'_>) -> rusqlite::Result<Result<RequestRecord, SqliteStoreError>> {
    let id: String = row.get(0)?;
    let namespace: String = row.get(1)?;
    let status: String = row.get(2)?;
    let request_payload: String = row.get(3)?;
    let passthrough_headers: Option<String> = row.get(4)?;
    let header_endpoint: Option<String> = row.get(5)?;
    let header_api_key: Option<String> = row.get(6)?;
    let response_payload: Option<String> = row.get(7)?;
    let error: Option<String> = row.get(8)?;
    let created_at: i64 = row.get(9)?;
    let dispatched_at: Option<i64> = row.get(10)?;
    let completed_at: Option<i64> = row.get(11)?;
    Ok(decode_request(RawRequestRow {
        id,
        namespace,
        status,
        request_payload,
        passthrough_headers,
        header_endpoint,
        header_api_key,
        response_payload,
        error,
        created_at,
        dispatched_at,
        completed_at,
    }))
}

/// Raw request row values before JSON and timestamp decoding.
struct RawRequestRow {
    id: String,
    namespace: String,
    status: String,
    request_payload: String,
    passthrough_headers: Option<String>,
    header_endpoint: Option<String>,
    header_api_key: Option<String>,
    response_payload: Option<String>,
    error: Option<String>,
    created_at: i64,
    dispatched_at: Option<i64>,
    completed_at: Option<i64>,
}

fn decode_request(raw: RawRequestRow) -> Result<RequestRecord, SqliteStoreError> {
    let status = RequestStatus::from_label(&raw.status)
        .ok_or_else(|| SqliteStoreError::Corrupt(format!("unknown status: {}", raw.status)))?;
    Ok(RequestRecord {
        id: raw.id,
        namespace: raw.namespace,
        status,
        request_payload: decode_object(&raw.request_payload)?,
        passthrough_headers: match raw.passthrough_headers {
            Some(headers) => decode_headers(&headers)?,
            None => BTreeMap::new(),
        },
        header_endpoint: raw.header_endpoint,
        header_api_key: raw.header_api_key,
        response_payload: raw.response_payload.as_deref().map(decode_object).transpose()?,
        error: raw.error,
        created_at: from_nanos(raw.created_at)?,
        dispatched_at: raw.dispatched_at.map(from_nanos).transpose()?,
        completed_at: raw.completed_at.map(from_nanos).transpose()?,
    })
}

// ============================================================================
// SECTION: Encoding Helpers
// ============================================================================

/// Encodes a header map as JSON text.
fn encode_headers(headers: &BTreeMap<String, String>) -> Result<String, SqliteStoreError> {
    serde_json::to_string(headers).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

/// Decodes a JSON header map.
fn decode_headers(text: &str) -> Result<BTreeMap<String, String>, SqliteStoreError> {
    serde_json::from_str(text).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

/// Encodes a JSON object payload as text.
fn encode_object(object: &JsonObject) -> Result<String, SqliteStoreError> {
    serde_json::to_string(object).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

/// Decodes a JSON object payload.
fn decode_object(text: &str) -> Result<JsonObject, SqliteStoreError> {
    serde_json::from_str(text).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

/// Converts an instant to stored unix nanoseconds.
pub(crate) fn to_nanos(instant: OffsetDateTime) -> Result<i64, SqliteStoreError> {
    i64::try_from(instant.unix_timestamp_nanos())
        .map_err(|_| SqliteStoreError::Corrupt("timestamp out of range".to_string()))
}

/// Converts stored unix nanoseconds back to an instant.
fn from_nanos(nanos: i64) -> Result<OffsetDateTime, SqliteStoreError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|_| SqliteStoreError::Corrupt("timestamp out of range".to_string()))
}

/// Returns true when the error is a primary key or unique constraint hit.
fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
    )
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// DDL for a fresh database. `created_at` is the ordering column and feeds
/// the composite status index; `request_counts` backs constant-time stats.
const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS namespaces (
    name TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    provider_endpoint TEXT,
    provider_api_key TEXT,
    provider_model TEXT,
    provider_headers TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS requests (
    id TEXT PRIMARY KEY,
    namespace TEXT NOT NULL,
    status TEXT NOT NULL,
    request_payload TEXT NOT NULL,
    passthrough_headers TEXT,
    header_endpoint TEXT,
    header_api_key TEXT,
    response_payload TEXT,
    error TEXT,
    created_at INTEGER NOT NULL,
    dispatched_at INTEGER,
    completed_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_requests_namespace_status_created
    ON requests (namespace, status, created_at);
CREATE INDEX IF NOT EXISTS idx_requests_created
    ON requests (created_at);
CREATE TABLE IF NOT EXISTS request_counts (
    namespace TEXT NOT NULL,
    status TEXT NOT NULL,
    count INTEGER NOT NULL,
    PRIMARY KEY (namespace, status)
);";

/// Applies connection pragmas in a single batch. The durability knobs come
/// from the store configuration; `busy_timeout` is set as a pragma so the
/// whole setup is one statement list.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    let pragmas = format!(
        "PRAGMA foreign_keys = ON;\n\
         PRAGMA journal_mode = {journal};\n\
         PRAGMA synchronous = {sync};\n\
         PRAGMA busy_timeout = {busy};",
        journal = config.journal_mode.pragma_value(),
        sync = config.sync_mode.pragma_value(),
        busy = config.busy_timeout_ms,
    );
    connection.execute_batch(&pragmas).map_err(|err| SqliteStoreError::Db(err.to_string()))
}

/// Creates the schema on first open; any other recorded version is rejected
/// so a newer database is never half-read by an older binary.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let recorded: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    if let Some(version) = recorded {
        if version != SCHEMA_VERSION {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "found schema version {version}, expected {SCHEMA_VERSION}"
            )));
        }
        return tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()));
    }
    tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch(SCHEMA_SQL).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))
}
