// crates/inference-dam-api/src/lib.rs
// ============================================================================
// Module: Inference Dam API
// Description: HTTP control surface for the request broker.
// Purpose: Expose namespace CRUD, submission, listing, and dispatch routes.
// Dependencies: inference-dam-core, inference-dam-dispatcher, axum
// ============================================================================

//! ## Overview
//! This crate wires the broker's HTTP contract: clients submit chat-completion
//! requests that are durably queued, operators trigger dispatch runs, and both
//! inspect namespaces and requests. Handlers translate store error kinds onto
//! HTTP status codes and never leak storage internals in 5xx bodies.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod app;
pub mod config;
pub mod error;
mod handlers;
mod headers;
pub mod types;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use app::AppState;
pub use app::build_router;
pub use app::ensure_default_namespace;
pub use config::ConfigError;
pub use config::DEFAULT_PORT;
pub use config::DEFAULT_STORAGE_PATH;
pub use config::ServerConfig;
