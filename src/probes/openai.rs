//! OpenAI probe: authenticated read-only model listing.

use async_trait::async_trait;

use super::{send, ProbeError, ProbeReply, ProviderProbe};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiProbe {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiProbe {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }
}

#[async_trait]
impl ProviderProbe for OpenAiProbe {
    fn label(&self) -> &str {
        "OpenAI"
    }

    async fn probe(&self, secret: &str) -> Result<ProbeReply, ProbeError> {
        let url = format!("{}/v1/models", self.base_url.trim_end_matches('/'));
        send(self.client.get(url).bearer_auth(secret)).await
    }
}
