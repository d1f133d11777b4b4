// crates/inference-dam-api/src/handlers.rs
// ============================================================================
// Module: Route Handlers
// Description: Handlers for namespace, request, and dispatch routes.
// Purpose: Translate wire requests into store and dispatcher calls.
// Dependencies: inference-dam-core, axum, uuid
// ============================================================================

//! ## Overview
//! Handlers hold no state beyond [`AppState`]. Mutating routes write through
//! the store; `POST /dispatch` additionally fires a dispatch run and answers
//! before it finishes. Identifier minting happens here: `req_` and `disp_`
//! prefixed UUIDs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use inference_dam_core::NamespaceRecord;
use inference_dam_core::RequestFilter;
use inference_dam_core::RequestRecord;
use inference_dam_core::RequestStatus;
use inference_dam_core::Store;
use inference_dam_core::StoreError;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::error::bad_request;
use crate::error::conflict;
use crate::error::forbidden;
use crate::error::internal;
use crate::error::not_found;
use crate::headers::extract_submission_headers;
use crate::types::CreateNamespaceRequest;
use crate::types::DeleteNamespaceResponse;
use crate::types::DispatchRequest;
use crate::types::DispatchResponse;
use crate::types::HealthResponse;
use crate::types::ListRequestsQuery;
use crate::types::ListRequestsResponse;
use crate::types::NamespaceView;
use crate::types::QueuedResponse;
use crate::types::RequestView;
use crate::types::UpdateNamespaceRequest;
use crate::types::apply_provider;
use crate::types::namespace_view;
use crate::types::request_view;
use crate::types::rfc3339;

// ============================================================================
// SECTION: Namespace Handlers
// ============================================================================

/// `POST /namespaces`
pub(crate) async fn create_namespace(
    State(state): State<AppState>,
    Json(body): Json<CreateNamespaceRequest>,
) -> Result<(StatusCode, Json<NamespaceView>), ApiError> {
    if body.name.is_empty() {
        return Err(bad_request("Name is required"));
    }
    let mut record = NamespaceRecord::new(&body.name, &body.description, OffsetDateTime::now_utc());
    if let Some(provider) = &body.provider {
        apply_provider(&mut record, provider);
    }
    match state.store.create_namespace(&record).await {
        Ok(()) => Ok((StatusCode::CREATED, Json(namespace_view(&record, None)))),
        Err(StoreError::AlreadyExists(_)) => Err(conflict("Namespace already exists")),
        Err(err) => Err(internal("Failed to create namespace", &err)),
    }
}

/// `GET /namespaces`
pub(crate) async fn list_namespaces(
    State(state): State<AppState>,
) -> Result<Json<Vec<NamespaceView>>, ApiError> {
    let records = state
        .store
        .list_namespaces()
        .await
        .map_err(|err| internal("Failed to list namespaces", &err))?;
    Ok(Json(records.iter().map(|record| namespace_view(record, None)).collect()))
}

/// `GET /namespaces/{name}`
pub(crate) async fn get_namespace(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<NamespaceView>, ApiError> {
    let record = state
        .store
        .get_namespace(&name)
        .await
        .map_err(|err| internal("Failed to get namespace", &err))?
        .ok_or_else(|| not_found("Namespace not found"))?;
    let stats = state
        .store
        .namespace_stats(&name)
        .await
        .map_err(|err| internal("Failed to get namespace stats", &err))?;
    Ok(Json(namespace_view(&record, Some(stats))))
}

/// `PATCH /namespaces/{name}`
pub(crate) async fn update_namespace(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<UpdateNamespaceRequest>,
) -> Result<Json<NamespaceView>, ApiError> {
    let mut record = state
        .store
        .get_namespace(&name)
        .await
        .map_err(|err| internal("Failed to get namespace", &err))?
        .ok_or_else(|| not_found("Namespace not found"))?;
    if let Some(description) = &body.description {
        record.description = description.clone();
    }
    if let Some(provider) = &body.provider {
        apply_provider(&mut record, provider);
    }
    record.updated_at = OffsetDateTime::now_utc();
    match state.store.update_namespace(&name, &record).await {
        Ok(()) => Ok(Json(namespace_view(&record, None))),
        Err(StoreError::NotFound(_)) => Err(not_found("Namespace not found")),
        Err(err) => Err(internal("Failed to update namespace", &err)),
    }
}

/// `DELETE /namespaces/{name}`
pub(crate) async fn delete_namespace(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeleteNamespaceResponse>, ApiError> {
    if name == inference_dam_core::DEFAULT_NAMESPACE {
        return Err(forbidden("Cannot delete default namespace"));
    }
    match state.store.delete_namespace(&name).await {
        Ok(deleted_requests) => Ok(Json(DeleteNamespaceResponse {
            message: format!("Namespace '{name}' deleted successfully"),
            deleted_requests,
        })),
        Err(StoreError::NotFound(_)) => Err(not_found("Namespace not found")),
        Err(err) => Err(internal("Failed to delete namespace", &err)),
    }
}

// ============================================================================
// SECTION: Submission Handlers
// ============================================================================

/// `POST /v1/chat/completions`
pub(crate) async fn queue_chat_completion(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<QueuedResponse>), ApiError> {
    let Value::Object(payload) = body else {
        return Err(bad_request("Request body must be a JSON object"));
    };
    let submission = extract_submission_headers(&headers);
    let namespace = state
        .store
        .get_namespace(&submission.namespace)
        .await
        .map_err(|err| internal("Failed to get namespace", &err))?;
    if namespace.is_none() {
        return Err(not_found(&format!("Namespace not found: {}", submission.namespace)));
    }

    let now = OffsetDateTime::now_utc();
    let mut record = RequestRecord::queued(new_request_id(), &submission.namespace, payload, now);
    record.passthrough_headers = submission.passthrough;
    record.header_endpoint = submission.endpoint;
    record.header_api_key = submission.api_key;

    state
        .store
        .create_request(&record)
        .await
        .map_err(|err| internal("Failed to queue request", &err))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedResponse {
            id: record.id,
            namespace: record.namespace,
            status: RequestStatus::Queued,
            created_at: rfc3339(now),
        }),
    ))
}

/// `GET /requests/{id}`
pub(crate) async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RequestView>, ApiError> {
    let record = state
        .store
        .get_request(&id)
        .await
        .map_err(|err| internal("Failed to get request", &err))?
        .ok_or_else(|| not_found("Request not found"))?;
    Ok(Json(request_view(&record)))
}

/// `GET /requests`
pub(crate) async fn list_requests(
    State(state): State<AppState>,
    Query(query): Query<ListRequestsQuery>,
) -> Result<Json<ListRequestsResponse>, ApiError> {
    let namespace = match query.namespace {
        Some(namespace) if !namespace.is_empty() => namespace,
        _ => return Err(bad_request("Namespace is required")),
    };
    let status = match &query.status {
        Some(label) => Some(
            RequestStatus::from_label(label).ok_or_else(|| bad_request("Invalid status filter"))?,
        ),
        None => None,
    };
    let cursor = match &query.cursor {
        Some(cursor) => Some(
            OffsetDateTime::parse(cursor, &Rfc3339)
                .map_err(|_| bad_request("Invalid cursor format"))?,
        ),
        None => None,
    };
    let filter = RequestFilter {
        namespace,
        status,
        cursor,
        limit: query.limit.unwrap_or(0),
    };
    let limit = filter.effective_limit();
    let page = state
        .store
        .list_requests(&filter)
        .await
        .map_err(|err| match err {
            StoreError::InvalidArgument(_) => bad_request("Namespace is required"),
            err => internal("Failed to list requests", &err),
        })?;

    let next_cursor = (page.records.len() == limit)
        .then(|| page.records.last().map(|record| rfc3339(record.created_at)))
        .flatten();
    Ok(Json(ListRequestsResponse {
        requests: page.records.iter().map(request_view).collect(),
        total: page.total,
        limit,
        next_cursor,
    }))
}

// ============================================================================
// SECTION: Dispatch Handlers
// ============================================================================

/// `POST /dispatch`
pub(crate) async fn trigger_dispatch(
    State(state): State<AppState>,
    Json(body): Json<DispatchRequest>,
) -> Result<(StatusCode, Json<DispatchResponse>), ApiError> {
    if body.namespace.is_empty() {
        return Err(bad_request("Namespace is required"));
    }
    let namespace = state
        .store
        .get_namespace(&body.namespace)
        .await
        .map_err(|err| internal("Failed to get namespace", &err))?;
    if namespace.is_none() {
        return Err(not_found("Namespace not found"));
    }
    let queued = state
        .store
        .queued_requests(&body.namespace)
        .await
        .map_err(|err| internal("Failed to get queued requests", &err))?;

    let dispatch_id = new_dispatch_id();
    if queued.is_empty() {
        return Ok((
            StatusCode::OK,
            Json(DispatchResponse {
                dispatch_id,
                namespace: body.namespace,
                queued_count: 0,
                status: "no_requests".to_string(),
            }),
        ));
    }

    state.dispatcher.dispatch(&body.namespace, &dispatch_id);
    Ok((
        StatusCode::ACCEPTED,
        Json(DispatchResponse {
            dispatch_id,
            namespace: body.namespace,
            queued_count: queued.len() as u64,
            status: "dispatching".to_string(),
        }),
    ))
}

/// `GET /health`
pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

// ============================================================================
// SECTION: Identifiers
// ============================================================================

/// Mints a request identifier.
fn new_request_id() -> String {
    format!("req_{}", Uuid::new_v4())
}

/// Mints a dispatch identifier.
fn new_dispatch_id() -> String {
    format!("disp_{}", Uuid::new_v4())
}
