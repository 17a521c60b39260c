use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::http::HttpTransport;
use super::{
    parse_structured_content, ChatClient, ChatCompletion, ChatMessage, CompletionRequest,
    OutputSchema, StructuredCompletion, TokenUsage,
};
use crate::{Error, Result};

const PROVIDER: &str = "openai";

/// Client for OpenAI-compatible chat completion APIs.
///
/// `base_url` includes the API version segment, e.g.
/// `https://api.openai.com/v1` or Ollama's `http://localhost:11434/v1`.
#[derive(Debug)]
pub struct OpenAiClient {
    transport: HttpTransport,
    auth_header: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let transport = HttpTransport::new(PROVIDER, timeout, max_retries)?;
        Ok(Self::with_transport(transport, base_url, api_key))
    }

    pub fn with_transport(
        transport: HttpTransport,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            auth_header: format!("Bearer {}", api_key.into()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(
        &self,
        request: &CompletionRequest,
        schema: Option<&OutputSchema>,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(schema) = schema {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "strict": schema.strict,
                    "schema": schema.schema,
                }
            });
        }

        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<(OpenAiMessage, Option<TokenUsage>)> {
        let url = self.chat_completions_url();
        let headers = [("Authorization", self.auth_header.as_str())];
        let json = self.transport.post_json(&url, &headers, body).await?;

        let response: OpenAiResponse = serde_json::from_value(json).map_err(|e| {
            Error::upstream(PROVIDER, format!("Failed to parse response: {e}"))
        })?;
        let usage = response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens));
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::upstream(PROVIDER, "No choices in response"))?;

        Ok((choice.message, usage))
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<ChatCompletion> {
        let body = self.build_request(&request, None);
        let (message, usage) = self.send(&body).await?;

        Ok(ChatCompletion {
            message: ChatMessage::assistant(message.content.unwrap_or_default()),
            usage,
        })
    }

    async fn complete_structured(
        &self,
        request: CompletionRequest,
        schema: &OutputSchema,
    ) -> Result<StructuredCompletion> {
        let body = self.build_request(&request, Some(schema));
        let (message, usage) = self.send(&body).await?;

        if let Some(refusal) = message.refusal {
            tracing::warn!(provider = PROVIDER, %refusal, "structured completion refused");
        }
        let parsed = message.content.as_deref().and_then(parse_structured_content);

        Ok(StructuredCompletion { parsed, usage })
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}
