// crates/inference-dam-dispatcher/src/lib.rs
// ============================================================================
// Module: Inference Dam Dispatcher
// Description: Dispatch engine draining queued requests per namespace.
// Purpose: Expose the dispatcher, rate limiter, and provider client seam.
// Dependencies: inference-dam-core, tokio, reqwest
// ============================================================================

//! ## Overview
//! The dispatcher drains a namespace's queued requests on operator trigger:
//! single-flight per namespace, a semaphore-bounded worker pool, and a
//! per-namespace token bucket. Each worker resolves provider configuration,
//! marks the request `processing`, calls the provider through the
//! [`ProviderClient`] seam, and records the terminal state back to the store.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod client;
pub mod dispatcher;
pub mod limiter;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use client::HttpProviderClient;
pub use client::ProviderClient;
pub use client::ProviderError;
pub use dispatcher::CHAT_COMPLETIONS_PATH;
pub use dispatcher::Dispatcher;
pub use dispatcher::DispatcherConfig;
pub use dispatcher::MISSING_API_KEY_ERROR;
pub use dispatcher::MISSING_ENDPOINT_ERROR;
pub use dispatcher::PROVIDER_FAILURE_PREFIX;
pub use limiter::TokenBucket;
