use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::http::HttpTransport;
use super::{
    parse_structured_content, ChatClient, ChatCompletion, ChatMessage, CompletionRequest,
    OutputSchema, StructuredCompletion, TokenUsage,
};
use crate::{Error, Result};

const PROVIDER: &str = "ollama";

/// Client for Ollama's native `/api/chat` endpoint.
#[derive(Debug)]
pub struct OllamaClient {
    transport: HttpTransport,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, max_retries: u32) -> Result<Self> {
        let transport = HttpTransport::new(PROVIDER, timeout, max_retries)?;
        Ok(Self::with_transport(transport, base_url))
    }

    pub fn with_transport(transport: HttpTransport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn build_request(
        &self,
        request: &CompletionRequest,
        schema: Option<&OutputSchema>,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "options": {"temperature": request.temperature},
        });

        if let Some(schema) = schema {
            body["format"] = schema.schema.clone();
        }

        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<(String, Option<TokenUsage>)> {
        let json = self.transport.post_json(&self.chat_url(), &[], body).await?;
        let response: OllamaResponse = serde_json::from_value(json).map_err(|e| {
            Error::upstream(PROVIDER, format!("Failed to parse response: {e}"))
        })?;

        let usage = match (response.prompt_eval_count, response.eval_count) {
            (None, None) => None,
            (prompt, completion) => Some(TokenUsage::new(
                prompt.unwrap_or_default(),
                completion.unwrap_or_default(),
            )),
        };

        Ok((response.message.content, usage))
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn complete(&self, request: CompletionRequest) -> Result<ChatCompletion> {
        let body = self.build_request(&request, None);
        let (content, usage) = self.send(&body).await?;

        Ok(ChatCompletion {
            message: ChatMessage::assistant(content),
            usage,
        })
    }

    async fn complete_structured(
        &self,
        request: CompletionRequest,
        schema: &OutputSchema,
    ) -> Result<StructuredCompletion> {
        let body = self.build_request(&request, Some(schema));
        let (content, usage) = self.send(&body).await?;

        Ok(StructuredCompletion {
            parsed: parse_structured_content(&content),
            usage,
        })
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    prompt_eval_count: Option<usize>,
    eval_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OllamaClient {
        let transport = HttpTransport::new(PROVIDER, Duration::from_secs(5), 1)
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        OllamaClient::with_transport(transport, server.uri())
    }

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "model": "gemma3:12b",
            "created_at": "2025-01-01T00:00:00Z",
            "message": {"role": "assistant", "content": content},
            "done": true,
            "prompt_eval_count": 30,
            "eval_count": 12
        })
    }

    #[tokio::test]
    async fn test_complete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "model": "gemma3:12b",
                "stream": false,
                "options": {"temperature": 0.0},
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("hello there")))
            .expect(1)
            .mount(&server)
            .await;

        let completion = client(&server)
            .complete(CompletionRequest::new("gemma3:12b", vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(completion.message.content(), "hello there");
        assert_eq!(completion.usage, Some(TokenUsage::new(30, 12)));
    }

    #[tokio::test]
    async fn test_structured_uses_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"format": {"type": "object"}})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_body(r#"{"is_compliant": false, "reasoning": "rude"}"#)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let schema = OutputSchema {
            name: "GuardrailVerdict".to_string(),
            schema: serde_json::json!({"type": "object"}),
            strict: true,
        };
        let completion = client(&server)
            .complete_structured(
                CompletionRequest::new("gemma3:12b", vec![ChatMessage::user("hi")]),
                &schema,
            )
            .await
            .unwrap();
        assert_eq!(
            completion.parsed,
            Some(serde_json::json!({"is_compliant": false, "reasoning": "rude"}))
        );
    }
}
