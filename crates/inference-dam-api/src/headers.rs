// crates/inference-dam-api/src/headers.rs
// ============================================================================
// Module: Submission Headers
// Description: Header extraction for chat-completion submissions.
// Purpose: Split routing headers, provider overrides, and passthrough.
// Dependencies: axum, inference-dam-core
// ============================================================================

//! ## Overview
//! Submissions carry three header classes: routing (`X-Namespace`), provider
//! overrides (`X-Provider-Endpoint`, `X-Provider-Key`), and passthrough
//! headers forwarded to the provider at dispatch time. Hop-by-hop and framing
//! headers are stripped, other `X-…` headers are consumed as broker-internal,
//! and `Authorization` always passes through. Header names are matched on
//! their lowercase form.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use inference_dam_core::DEFAULT_NAMESPACE;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header selecting the namespace; defaults to `default`.
pub(crate) const NAMESPACE_HEADER: &str = "x-namespace";
/// Header supplying a per-request endpoint fallback.
const ENDPOINT_HEADER: &str = "x-provider-endpoint";
/// Header supplying a per-request API key fallback.
const API_KEY_HEADER: &str = "x-provider-key";
/// Header that always passes through to the provider.
const AUTHORIZATION_HEADER: &str = "authorization";
/// Framing and hop-by-hop headers that never pass through.
const STRIPPED_HEADERS: [&str; 5] =
    ["host", "content-length", "content-type", "user-agent", "connection"];

// ============================================================================
// SECTION: Extraction
// ============================================================================

/// Headers extracted from one submission.
#[derive(Debug, Default)]
pub(crate) struct SubmissionHeaders {
    /// Target namespace name.
    pub namespace: String,
    /// Per-request endpoint fallback.
    pub endpoint: Option<String>,
    /// Per-request API key fallback.
    pub api_key: Option<String>,
    /// Headers forwarded to the provider at dispatch time.
    pub passthrough: BTreeMap<String, String>,
}

/// Splits submission headers into routing, overrides, and passthrough.
/// Values that are not valid UTF-8 are dropped.
pub(crate) fn extract_submission_headers(headers: &HeaderMap) -> SubmissionHeaders {
    let mut extracted = SubmissionHeaders {
        namespace: DEFAULT_NAMESPACE.to_string(),
        ..SubmissionHeaders::default()
    };
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let name = name.as_str();
        match name {
            NAMESPACE_HEADER => {
                if !value.is_empty() {
                    extracted.namespace = value.to_string();
                }
            }
            ENDPOINT_HEADER => extracted.endpoint = Some(value.to_string()),
            API_KEY_HEADER => extracted.api_key = Some(value.to_string()),
            AUTHORIZATION_HEADER => {
                extracted.passthrough.insert(name.to_string(), value.to_string());
            }
            _ => {
                if name.starts_with("x-") || name.starts_with("accept") {
                    continue;
                }
                if STRIPPED_HEADERS.contains(&name) {
                    continue;
                }
                extracted.passthrough.insert(name.to_string(), value.to_string());
            }
        }
    }
    extracted
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn header_map(entries: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in entries {
            headers.append(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn namespace_defaults_when_absent() {
        let extracted = extract_submission_headers(&header_map(&[]));
        assert_eq!(extracted.namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn overrides_are_captured_not_passed_through() {
        let extracted = extract_submission_headers(&header_map(&[
            ("X-Namespace", "ns1"),
            ("X-Provider-Endpoint", "http://up"),
            ("X-Provider-Key", "k"),
        ]));
        assert_eq!(extracted.namespace, "ns1");
        assert_eq!(extracted.endpoint.as_deref(), Some("http://up"));
        assert_eq!(extracted.api_key.as_deref(), Some("k"));
        assert!(extracted.passthrough.is_empty());
    }

    #[test]
    fn framing_and_x_headers_are_stripped() {
        let extracted = extract_submission_headers(&header_map(&[
            ("Host", "broker"),
            ("Content-Type", "application/json"),
            ("Content-Length", "42"),
            ("User-Agent", "curl"),
            ("Accept", "*/*"),
            ("Accept-Encoding", "gzip"),
            ("Connection", "keep-alive"),
            ("X-Trace-Id", "abc"),
        ]));
        assert!(extracted.passthrough.is_empty());
    }

    #[test]
    fn authorization_and_custom_headers_pass_through() {
        let extracted = extract_submission_headers(&header_map(&[
            ("Authorization", "Bearer client"),
            ("OpenAI-Beta", "assistants"),
        ]));
        assert_eq!(
            extracted.passthrough.get("authorization").map(String::as_str),
            Some("Bearer client")
        );
        assert_eq!(
            extracted.passthrough.get("openai-beta").map(String::as_str),
            Some("assistants")
        );
    }
}
