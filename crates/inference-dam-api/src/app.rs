// crates/inference-dam-api/src/app.rs
// ============================================================================
// Module: Application Wiring
// Description: Router composition and shared handler state.
// Purpose: Keep route setup and bootstrap in one place, out of main.
// Dependencies: axum, tower-http, inference-dam-core, inference-dam-dispatcher
// ============================================================================

//! ## Overview
//! [`build_router`] composes every route with permissive CORS (the dashboard
//! is served from another origin), request tracing, and the body size limit.
//! [`ensure_default_namespace`] runs at startup, before the server accepts
//! traffic, so header-less submissions always have a home.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::routing::post;
use inference_dam_core::DEFAULT_NAMESPACE;
use inference_dam_core::NamespaceRecord;
use inference_dam_core::Store;
use inference_dam_core::StoreError;
use inference_dam_dispatcher::Dispatcher;
use time::OffsetDateTime;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::MAX_BODY_BYTES;
use crate::handlers;

// ============================================================================
// SECTION: State
// ============================================================================

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Durable request store.
    pub store: Arc<dyn Store>,
    /// Dispatch engine handle.
    pub dispatcher: Dispatcher,
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the broker router with middleware applied.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route(
            "/namespaces",
            post(handlers::create_namespace).get(handlers::list_namespaces),
        )
        .route(
            "/namespaces/:name",
            get(handlers::get_namespace)
                .patch(handlers::update_namespace)
                .delete(handlers::delete_namespace),
        )
        .route("/requests", get(handlers::list_requests))
        .route("/requests/:id", get(handlers::get_request))
        .route("/dispatch", post(handlers::trigger_dispatch))
        .route("/v1/chat/completions", post(handlers::queue_chat_completion))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

// ============================================================================
// SECTION: Bootstrap
// ============================================================================

/// Creates the `default` namespace when it does not exist yet.
///
/// # Errors
///
/// Returns [`StoreError`] when the lookup or creation fails.
pub async fn ensure_default_namespace(store: &dyn Store) -> Result<(), StoreError> {
    if store.get_namespace(DEFAULT_NAMESPACE).await?.is_some() {
        return Ok(());
    }
    let record = NamespaceRecord::new(
        DEFAULT_NAMESPACE,
        "Default namespace",
        OffsetDateTime::now_utc(),
    );
    match store.create_namespace(&record).await {
        // A concurrent bootstrap may have won the race.
        Ok(()) | Err(StoreError::AlreadyExists(_)) => Ok(()),
        Err(err) => Err(err),
    }
}
