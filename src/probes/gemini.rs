//! Google Gemini probe: model listing on the generativelanguage REST
//! API. The key travels as a query parameter, not a header.

use async_trait::async_trait;

use super::{send, ProbeError, ProbeReply, ProviderProbe};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiProbe {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiProbe {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }
}

#[async_trait]
impl ProviderProbe for GeminiProbe {
    fn label(&self) -> &str {
        "Gemini"
    }

    async fn probe(&self, secret: &str) -> Result<ProbeReply, ProbeError> {
        let url = format!("{}/v1beta/models", self.base_url.trim_end_matches('/'));
        send(self.client.get(url).query(&[("key", secret)])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_key_passed_as_query_param() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/models"))
            .and(query_param("key", "AIza-good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "models/gemini-2.0-flash"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let probe = GeminiProbe::new(reqwest::Client::new(), server.uri());
        let reply = probe.probe("AIza-good").await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);

        // No auth header is sent
        let received = server.received_requests().await.unwrap();
        assert!(received[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_invalid_key_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/models"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"code": 400, "message": "API key not valid. Please pass a valid API key.", "status": "INVALID_ARGUMENT"}
            })))
            .mount(&server)
            .await;

        let probe = GeminiProbe::new(reqwest::Client::new(), server.uri());
        let reply = probe.probe("AIza-bad").await.unwrap();
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert!(reply.upstream_message.unwrap().starts_with("API key not valid"));
    }

    #[tokio::test]
    async fn test_transport_error_does_not_leak_key() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let probe = GeminiProbe::new(reqwest::Client::new(), format!("http://{}", addr));
        let err = probe.probe("AIza-super-secret").await.unwrap_err();
        assert!(matches!(err, ProbeError::Transport(_)));
        assert!(!err.to_string().contains("AIza-super-secret"));
    }
}
