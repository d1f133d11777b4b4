// crates/inference-dam-store-sqlite/src/batch.rs
// ============================================================================
// Module: Batched Ingest Writer
// Description: Background flusher committing create_request rows in batches.
// Purpose: Absorb submission bursts without a transaction per request.
// Dependencies: crate::store, rusqlite
// ============================================================================

//! ## Overview
//! The batch writer receives queued request records over a channel and
//! commits them in a single transaction per batch, flushing when the batch
//! reaches [`MAX_BATCH_ROWS`] or [`FLUSH_INTERVAL`] elapses, whichever comes
//! first. Each buffered record still commits its row and counter increment
//! together, so the per-request atomicity contract holds. Closing the writer
//! drains the channel and joins the flusher before returning.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use inference_dam_core::RequestRecord;
use rusqlite::Connection;

use crate::store::SqliteStoreError;
use crate::store::insert_request_tx;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Flush once this many rows are buffered.
const MAX_BATCH_ROWS: usize = 1_000;
/// Flush at least this often while rows are pending.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// SECTION: Batch Writer
// ============================================================================

/// Channel-fed writer that commits queued request inserts in batches.
pub(crate) struct BatchWriter {
    /// Submission side of the channel; `None` once closed.
    sender: Mutex<Option<mpsc::Sender<RequestRecord>>>,
    /// Flusher thread handle, joined on close.
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl BatchWriter {
    /// Starts the flusher thread over the shared connection.
    pub(crate) fn spawn(connection: Arc<Mutex<Connection>>) -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = std::thread::spawn(move || flush_loop(&connection, &receiver));
        Self {
            sender: Mutex::new(Some(sender)),
            flusher: Mutex::new(Some(handle)),
        }
    }

    /// Queues a record for the next batch commit.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Closed`] after [`BatchWriter::close`].
    pub(crate) fn submit(&self, record: RequestRecord) -> Result<(), SqliteStoreError> {
        let guard = self.sender.lock().map_err(|_| SqliteStoreError::Closed)?;
        match guard.as_ref() {
            Some(sender) => sender.send(record).map_err(|_| SqliteStoreError::Closed),
            None => Err(SqliteStoreError::Closed),
        }
    }

    /// Stops accepting records, flushes everything buffered, and joins the
    /// flusher. Safe to call more than once.
    pub(crate) fn close(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
        let handle = match self.flusher.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("batch flusher panicked");
            }
        }
    }
}

// ============================================================================
// SECTION: Flusher
// ============================================================================

/// Receives records until the channel disconnects, flushing by size or timer.
fn flush_loop(connection: &Arc<Mutex<Connection>>, receiver: &mpsc::Receiver<RequestRecord>) {
    let mut pending: Vec<RequestRecord> = Vec::new();
    let mut deadline = Instant::now() + FLUSH_INTERVAL;
    loop {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match receiver.recv_timeout(timeout) {
            Ok(record) => {
                pending.push(record);
                if pending.len() >= MAX_BATCH_ROWS {
                    flush_batch(connection, &mut pending);
                    deadline = Instant::now() + FLUSH_INTERVAL;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                flush_batch(connection, &mut pending);
                deadline = Instant::now() + FLUSH_INTERVAL;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                flush_batch(connection, &mut pending);
                return;
            }
        }
    }
}

/// Commits the pending rows in one transaction. Individual bad rows are
/// logged and skipped so one poisoned record cannot wedge the queue.
fn flush_batch(connection: &Arc<Mutex<Connection>>, pending: &mut Vec<RequestRecord>) {
    if pending.is_empty() {
        return;
    }
    let Ok(mut guard) = connection.lock() else {
        tracing::error!("batch flush skipped: connection mutex poisoned");
        pending.clear();
        return;
    };
    let tx = match guard.transaction() {
        Ok(tx) => tx,
        Err(err) => {
            tracing::error!(error = %err, "batch flush failed to open transaction");
            pending.clear();
            return;
        }
    };
    for record in pending.drain(..) {
        match insert_request_tx(&tx, &record) {
            Ok(()) => {}
            Err(SqliteStoreError::Duplicate(message)) => {
                tracing::warn!(%message, "batched insert skipped duplicate");
            }
            Err(err) => {
                tracing::error!(error = %err, request = %record.id, "batched insert failed");
            }
        }
    }
    if let Err(err) = tx.commit() {
        tracing::error!(error = %err, "batch flush commit failed");
    }
}
