// crates/inference-dam-api/src/error.rs
// ============================================================================
// Module: API Errors
// Description: HTTP error responses with consistent shapes.
// Purpose: Centralize error construction and store-error translation.
// Dependencies: axum, inference-dam-core
// ============================================================================

//! ## Overview
//! Every failing handler returns an [`ApiError`]: a status code plus a JSON
//! body of the form `{"error": "..."}`. Store error kinds map onto statuses
//! (not-found 404, already-exists 409, invalid-argument 400, transient 500);
//! 5xx bodies carry only the caller-supplied context string while the
//! underlying error goes to the log.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use inference_dam_core::StoreError;

use crate::types::ErrorResponse;

// ============================================================================
// SECTION: Error Type
// ============================================================================

/// HTTP error response.
#[derive(Debug)]
pub struct ApiError {
    /// Response status code.
    pub status: StatusCode,
    /// JSON error body.
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ============================================================================
// SECTION: Constructors
// ============================================================================

/// 400 with the given message.
pub fn bad_request(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        body: ErrorResponse {
            error: message.to_string(),
        },
    }
}

/// 404 with the given message.
pub fn not_found(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        body: ErrorResponse {
            error: message.to_string(),
        },
    }
}

/// 409 with the given message.
pub fn conflict(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::CONFLICT,
        body: ErrorResponse {
            error: message.to_string(),
        },
    }
}

/// 403 with the given message.
pub fn forbidden(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::FORBIDDEN,
        body: ErrorResponse {
            error: message.to_string(),
        },
    }
}

/// 500 with an opaque message; the underlying error goes to the log.
pub fn internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = %err, "storage error");
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            error: message.to_string(),
        },
    }
}
