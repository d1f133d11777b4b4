// crates/inference-dam-dispatcher/src/client.rs
// ============================================================================
// Module: Provider Client
// Description: Outbound chat-completion call contract and HTTP implementation.
// Purpose: Perform one provider request with timeout and JSON decoding.
// Dependencies: async-trait, reqwest, serde_json
// ============================================================================

//! ## Overview
//! [`ProviderClient`] is the seam between the dispatcher and the upstream
//! provider: one call, one JSON object in, one JSON object out. The HTTP
//! implementation posts the payload with a bearer token and the caller's
//! merged headers, applies the configured per-call timeout, and fails on any
//! non-2xx status or non-object body. Tests substitute a recording stub.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use inference_dam_core::JsonObject;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum bytes of an error response body kept for the failure message.
const MAX_ERROR_BODY_BYTES: usize = 256;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Provider call errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The HTTP client could not be constructed or the request was invalid.
    #[error("request build failed: {0}")]
    Build(String),
    /// Connection, TLS, or timeout failure before a response arrived.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The provider answered with a non-2xx status.
    #[error("provider returned status {status}: {body}")]
    Status {
        /// HTTP status code returned by the provider.
        status: u16,
        /// Truncated response body for diagnostics.
        body: String,
    },
    /// The response body was not a JSON object.
    #[error("response decode failed: {0}")]
    Decode(String),
}

// ============================================================================
// SECTION: Contract
// ============================================================================

/// One-shot chat-completion call against an upstream provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Posts `payload` to `url` with bearer `api_key` and the given headers,
    /// returning the decoded JSON object response.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport failure, non-2xx status, or a
    /// non-object response body.
    async fn send_request(
        &self,
        url: &str,
        api_key: &str,
        headers: &BTreeMap<String, String>,
        payload: &JsonObject,
    ) -> Result<JsonObject, ProviderError>;
}

// ============================================================================
// SECTION: HTTP Implementation
// ============================================================================

/// Provider client backed by a pooled `reqwest` client.
pub struct HttpProviderClient {
    /// HTTP client carrying the per-call timeout.
    client: reqwest::Client,
}

impl HttpProviderClient {
    /// Creates a client whose every call is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Build`] when the HTTP client cannot be
    /// constructed.
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProviderError::Build(err.to_string()))?;
        Ok(Self {
            client,
        })
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn send_request(
        &self,
        url: &str,
        api_key: &str,
        headers: &BTreeMap<String, String>,
        payload: &JsonObject,
    ) -> Result<JsonObject, ProviderError> {
        let mut request = self.client.post(url).json(payload);
        for (name, value) in headers {
            // A passthrough Authorization header would otherwise ride along
            // as a second credential line; the configured key is the only
            // one allowed on the wire.
            if name.eq_ignore_ascii_case("authorization") {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }
        request = request.bearer_auth(api_key);

        let response = request
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        let value: Value =
            response.json().await.map_err(|err| ProviderError::Decode(err.to_string()))?;
        match value {
            Value::Object(object) => Ok(object),
            other => Err(ProviderError::Decode(format!(
                "response body is not a JSON object: {}",
                json_kind(&other)
            ))),
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Truncates an error body to the diagnostic limit on a char boundary.
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_BYTES {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// Returns a short label for a JSON value kind.
const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
