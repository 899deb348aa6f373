use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::provider::{ChatProvider, ChatRequest};

/// OpenAI chat-completions client. The fallback path when no Anthropic key
/// is configured.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com".into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn complete(&self, request: ChatRequest) -> Result<String, ProviderError> {
        // System instruction travels as the leading message here, not as a
        // separate field.
        let mut messages: Vec<Value> = Vec::with_capacity(request.messages.len() + 1);
        if let Some(ref system) = request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        for message in &request.messages {
            messages.push(serde_json::to_value(message).unwrap_or_default());
        }

        let body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if status != 200 {
            return Err(ProviderError::Api { status, body: text });
        }

        let parsed: Value =
            serde_json::from_str(&text).map_err(|e| ProviderError::Parse(e.to_string()))?;

        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Parse("no message content in response".into()))
    }

    fn name(&self) -> &str {
        "openai"
    }
}
