//! Provider probes: one verification call per credential.
//!
//! Each provider family speaks a different protocol (bearer-auth model
//! listing, a minimal chat completion, a query-string key). A probe
//! performs exactly one outbound request and reports what happened as a
//! typed `Result<ProbeReply, ProbeError>`; the reduction to the uniform
//! `ProbeOutcome` happens in one place, `ProbeOutcome::from_result`.

use async_trait::async_trait;
use http::StatusCode;
use serde::Serialize;
use std::error::Error as _;
use std::fmt;
use std::time::Duration;

pub mod gemini;
pub mod groq;
pub mod openai;

/// Longest upstream error message carried into a result.
const MAX_UPSTREAM_MESSAGE: usize = 300;

// ── Service Routing ─────────────────────────────────────────────────

/// The closed set of providers a stored credential can be tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    OpenAi,
    Groq,
    Gemini,
    /// Anything we have no probe for.
    Unsupported,
}

impl Service {
    /// Map a record's declared service name, case-insensitively.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Service::OpenAi,
            "groq" => Service::Groq,
            "gemini" | "google" => Service::Gemini,
            _ => Service::Unsupported,
        }
    }
}

/// Base URLs for every provider; overridden in config and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub openai: String,
    pub groq: String,
    pub gemini: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            openai: openai::DEFAULT_BASE_URL.to_string(),
            groq: groq::DEFAULT_BASE_URL.to_string(),
            gemini: gemini::DEFAULT_BASE_URL.to_string(),
        }
    }
}

// ── Probe Types ─────────────────────────────────────────────────────

/// What the provider said, if it said anything at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReply {
    pub status: StatusCode,
    /// `error.message` from the upstream body, for non-2xx replies.
    pub upstream_message: Option<String>,
}

/// Why a probe produced no upstream reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// Connection or body read failures.
    #[error("{0}")]
    Transport(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    /// The probe task died before reporting (panic or runtime shutdown).
    #[error("probe aborted: {0}")]
    Aborted(String),
}

/// Uniform, provider-independent result of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub provider_label: String,
}

impl ProbeOutcome {
    pub fn from_result(provider_label: &str, result: Result<ProbeReply, ProbeError>) -> Self {
        match result {
            Ok(reply) => {
                let ok = reply.status.is_success();
                let error_message = if ok {
                    None
                } else {
                    Some(reply.upstream_message.unwrap_or_else(|| {
                        format!("Upstream rejected the key ({})", reply.status)
                    }))
                };
                Self {
                    ok,
                    status_code: Some(reply.status.as_u16()),
                    error_message,
                    provider_label: provider_label.to_string(),
                }
            }
            Err(e) => Self {
                ok: false,
                status_code: None,
                error_message: Some(e.to_string()),
                provider_label: provider_label.to_string(),
            },
        }
    }

    /// Result for a service with no probe; no network call is made.
    pub fn unsupported(service: &str) -> Self {
        Self {
            ok: false,
            status_code: None,
            error_message: Some("Unsupported service".to_string()),
            provider_label: service.to_string(),
        }
    }
}

// ── Probe Trait ─────────────────────────────────────────────────────

/// One provider family's verification call.
///
/// Implementations must make exactly one request per call, must not
/// retry, and must never log or retain the secret.
#[async_trait]
pub trait ProviderProbe: Send + Sync {
    /// Human-readable provider name carried into every outcome.
    fn label(&self) -> &str;

    async fn probe(&self, secret: &str) -> Result<ProbeReply, ProbeError>;
}

impl fmt::Debug for dyn ProviderProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderProbe({})", self.label())
    }
}

// ── Shared HTTP Plumbing ────────────────────────────────────────────

/// Send a prepared request and reduce it to a `ProbeReply`.
pub(crate) async fn send(request: reqwest::RequestBuilder) -> Result<ProbeReply, ProbeError> {
    let resp = request.send().await.map_err(transport_error)?;
    let status = resp.status();
    if status.is_success() {
        return Ok(ProbeReply { status, upstream_message: None });
    }

    let body = resp.text().await.unwrap_or_default();
    Ok(ProbeReply { status, upstream_message: upstream_message(&body) })
}

/// Describe a transport failure. The URL is stripped first: for
/// query-string auth it contains the secret.
fn transport_error(e: reqwest::Error) -> ProbeError {
    let e = e.without_url();
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    ProbeError::Transport(msg)
}

/// Pull `error.message` out of an OpenAI/Groq/Gemini error body.
fn upstream_message(body: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    let msg = parsed["error"]["message"].as_str()?.trim();
    if msg.is_empty() {
        return None;
    }
    Some(msg.chars().take(MAX_UPSTREAM_MESSAGE).collect())
}

// ── Test Fakes ──────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_from_name_is_case_insensitive() {
        for name in ["OpenAI", "openai", "OPENAI", " openai "] {
            assert_eq!(Service::from_name(name), Service::OpenAi);
        }
        assert_eq!(Service::from_name("Groq"), Service::Groq);
        assert_eq!(Service::from_name("gemini"), Service::Gemini);
        assert_eq!(Service::from_name("Google"), Service::Gemini);
    }

    #[test]
    fn test_unknown_service_is_unsupported() {
        assert_eq!(Service::from_name("Unsupported"), Service::Unsupported);
        assert_eq!(Service::from_name("anthropic"), Service::Unsupported);
        assert_eq!(Service::from_name(""), Service::Unsupported);
    }

    #[test]
    fn test_outcome_from_success() {
        let outcome = ProbeOutcome::from_result(
            "OpenAI",
            Ok(ProbeReply { status: StatusCode::OK, upstream_message: None }),
        );
        assert!(outcome.ok);
        assert_eq!(outcome.status_code, Some(200));
        assert_eq!(outcome.error_message, None);
        assert_eq!(outcome.provider_label, "OpenAI");
    }

    #[test]
    fn test_outcome_from_rejection_keeps_status() {
        let outcome = ProbeOutcome::from_result(
            "Groq",
            Ok(ProbeReply {
                status: StatusCode::UNAUTHORIZED,
                upstream_message: Some("Invalid API Key".into()),
            }),
        );
        assert!(!outcome.ok);
        assert_eq!(outcome.status_code, Some(401));
        assert_eq!(outcome.error_message.as_deref(), Some("Invalid API Key"));
    }

    #[test]
    fn test_outcome_from_rejection_without_body() {
        let outcome = ProbeOutcome::from_result(
            "Gemini",
            Ok(ProbeReply { status: StatusCode::FORBIDDEN, upstream_message: None }),
        );
        assert!(!outcome.ok);
        assert_eq!(outcome.status_code, Some(403));
        assert!(outcome.error_message.unwrap().contains("403"));
    }

    #[test]
    fn test_outcome_from_transport_error_has_no_status() {
        let outcome = ProbeOutcome::from_result(
            "OpenAI",
            Err(ProbeError::Transport("connection refused".into())),
        );
        assert!(!outcome.ok);
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.error_message.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_outcome_from_timeout() {
        let outcome =
            ProbeOutcome::from_result("Groq", Err(ProbeError::Timeout(Duration::from_secs(10))));
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.error_message.as_deref(), Some("probe timed out after 10s"));
    }

    #[test]
    fn test_sub_second_timeout_keeps_precision() {
        let err = ProbeError::Timeout(Duration::from_millis(500));
        assert_eq!(err.to_string(), "probe timed out after 500ms");
        let err = ProbeError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "probe timed out after 1.5s");
    }

    #[test]
    fn test_unsupported_outcome() {
        let outcome = ProbeOutcome::unsupported("unknownsvc");
        assert!(!outcome.ok);
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.error_message.as_deref(), Some("Unsupported service"));
        assert_eq!(outcome.provider_label, "unknownsvc");
    }

    #[test]
    fn test_upstream_message_parsing() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert_eq!(upstream_message(body).as_deref(), Some("Incorrect API key provided"));
        assert_eq!(upstream_message("<html>bad gateway</html>"), None);
        assert_eq!(upstream_message(r#"{"error":{"message":"  "}}"#), None);

        let long = format!(r#"{{"error":{{"message":"{}"}}}}"#, "x".repeat(1000));
        assert_eq!(upstream_message(&long).unwrap().len(), MAX_UPSTREAM_MESSAGE);
    }

    #[test]
    fn test_outcome_serializes_camel_case() {
        let outcome = ProbeOutcome::from_result(
            "OpenAI",
            Ok(ProbeReply { status: StatusCode::OK, upstream_message: None }),
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["providerLabel"], "OpenAI");
        assert!(json.get("errorMessage").is_none());
    }
}
