//! Groq probe: a minimal chat completion, so the check covers the full
//! auth + inference path rather than just model listing.

use async_trait::async_trait;

use super::{send, ProbeError, ProbeReply, ProviderProbe};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com";

const PROBE_MODEL: &str = "llama-3.1-8b-instant";
const PROBE_MAX_TOKENS: u32 = 5;

pub struct GroqProbe {
    client: reqwest::Client,
    base_url: String,
}

impl GroqProbe {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }
}

#[async_trait]
impl ProviderProbe for GroqProbe {
    fn label(&self) -> &str {
        "Groq"
    }

    async fn probe(&self, secret: &str) -> Result<ProbeReply, ProbeError> {
        let url = format!("{}/openai/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": PROBE_MODEL,
            "messages": [{"role": "user", "content": "ping"}],
            "max_tokens": PROBE_MAX_TOKENS,
        });
        send(self.client.post(url).bearer_auth(secret.trim()).json(&body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_probe_sends_minimal_completion_with_trimmed_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/v1/chat/completions"))
            .and(header("authorization", "Bearer gsk_live"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama-3.1-8b-instant",
                "max_tokens": 5,
                "messages": [{"role": "user", "content": "ping"}],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "pong"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let probe = GroqProbe::new(reqwest::Client::new(), server.uri());
        let reply = probe.probe("  gsk_live\n").await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rate_limited_key_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"message": "Rate limit reached", "type": "tokens"}
            })))
            .mount(&server)
            .await;

        let probe = GroqProbe::new(reqwest::Client::new(), server.uri());
        let reply = probe.probe("gsk_busy").await.unwrap();
        assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(reply.upstream_message.as_deref(), Some("Rate limit reached"));
    }
}
