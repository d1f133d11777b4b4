// crates/inference-dam-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Request Store
// Description: Durable Store backend using SQLite WAL.
// Purpose: Provide production-grade persistence for broker state.
// Dependencies: inference-dam-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides the SQLite-backed [`inference_dam_core::Store`]
//! implementation: a relational layout with a composite
//! `(namespace, status, created_at)` index for queue scans, a counter table
//! maintained transactionally for constant-time stats, and an optional
//! batched ingest writer for high-throughput submission bursts.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod batch;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteJournalMode;
pub use store::SqliteStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteSyncMode;
