//! Chat client abstraction and provider implementations.
//!
//! A [`ChatClient`] sends an ordered list of [`ChatMessage`]s to a language
//! model and returns one assistant message, or, in structured mode, a JSON
//! value shaped by an [`OutputSchema`]. Clients are shared between
//! concurrent runs behind an `Arc`.

mod factory;
mod http;
mod message;
mod ollama;
mod openai;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;

use crate::{Error, Result};

pub use factory::ChatClientFactory;
pub use http::HttpTransport;
pub use message::{ChatMessage, Role};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

/// A chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Token counts reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl TokenUsage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A free-text completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// A schema-constrained completion.
///
/// `parsed` is `None` when the provider produced nothing that could be read
/// as JSON (a refusal, an empty answer, malformed text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredCompletion {
    pub parsed: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// JSON schema a structured completion must conform to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

impl OutputSchema {
    /// Derive the schema of `T`.
    pub fn from_type<T: JsonSchema>() -> Self {
        let root = schemars::schema_for!(T);
        let mut schema = serde_json::to_value(&root).unwrap_or_default();

        // Providers reject or ignore the meta field.
        if let Value::Object(ref mut map) = schema {
            map.remove("$schema");
        }

        Self {
            name: <T as JsonSchema>::schema_name().into_owned(),
            schema,
            strict: true,
        }
    }
}

/// Request/response interface to a language model.
#[async_trait]
pub trait ChatClient: Send + Sync + Debug {
    /// Send the conversation and return the assistant's reply.
    async fn complete(&self, request: CompletionRequest) -> Result<ChatCompletion>;

    /// Send the conversation and return a value shaped by `schema`.
    async fn complete_structured(
        &self,
        request: CompletionRequest,
        schema: &OutputSchema,
    ) -> Result<StructuredCompletion>;

    /// Provider name, used in logs and span attributes.
    fn provider_name(&self) -> &'static str;
}

/// Run a structured completion and deserialize it into `T`.
///
/// Fails with [`Error::Parse`] when the provider returned no structured value
/// or one that does not match `T`.
pub async fn complete_as<T>(
    client: &dyn ChatClient,
    request: CompletionRequest,
) -> Result<(T, Option<TokenUsage>)>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = OutputSchema::from_type::<T>();
    let completion = client.complete_structured(request, &schema).await?;

    let value = completion
        .parsed
        .ok_or_else(|| Error::Parse(format!("{} returned no structured output", client.provider_name())))?;
    let parsed = serde_json::from_value(value)
        .map_err(|e| Error::Parse(format!("output does not match {}: {e}", schema.name)))?;

    Ok((parsed, completion.usage))
}

/// Read a structured answer out of message text.
///
/// Some models wrap JSON in a markdown fence even in JSON mode.
pub(crate) fn parse_structured_content(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(unfenced).ok()
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// A chat client answering from a script.
    ///
    /// Free-text replies are fixed, or echo the last message when no reply is
    /// configured. The guardrail verdict is compliant unless scripted
    /// otherwise. Every request is recorded.
    #[derive(Debug, Default)]
    pub struct ScriptedChatClient {
        reply: Option<String>,
        verdict: Option<Value>,
        completion_error: Option<String>,
        structured_error: Option<String>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedChatClient {
        pub fn new() -> Self {
            Self::default().with_verdict(true, "scripted")
        }

        pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
            self.reply = Some(reply.into());
            self
        }

        pub fn with_verdict(mut self, is_compliant: bool, reasoning: &str) -> Self {
            self.verdict = Some(serde_json::json!({
                "is_compliant": is_compliant,
                "reasoning": reasoning,
            }));
            self
        }

        pub fn with_raw_verdict(mut self, verdict: Option<Value>) -> Self {
            self.verdict = verdict;
            self
        }

        pub fn with_completion_error(mut self, message: impl Into<String>) -> Self {
            self.completion_error = Some(message.into());
            self
        }

        pub fn with_structured_error(mut self, message: impl Into<String>) -> Self {
            self.structured_error = Some(message.into());
            self
        }

        pub fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChatClient {
        async fn complete(&self, request: CompletionRequest) -> Result<ChatCompletion> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(ref message) = self.completion_error {
                return Err(Error::upstream("scripted", message.clone()));
            }

            let content = match &self.reply {
                Some(reply) => reply.clone(),
                None => format!(
                    "echo: {}",
                    request.messages.last().map(|m| m.content()).unwrap_or_default()
                ),
            };
            Ok(ChatCompletion {
                message: ChatMessage::assistant(content),
                usage: Some(TokenUsage::new(12, 8)),
            })
        }

        async fn complete_structured(
            &self,
            request: CompletionRequest,
            _schema: &OutputSchema,
        ) -> Result<StructuredCompletion> {
            self.requests.lock().unwrap().push(request);
            if let Some(ref message) = self.structured_error {
                return Err(Error::upstream("scripted", message.clone()));
            }

            Ok(StructuredCompletion {
                parsed: self.verdict.clone(),
                usage: Some(TokenUsage::new(20, 10)),
            })
        }

        fn provider_name(&self) -> &'static str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::ScriptedChatClient;
    use super::*;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Verdict {
        ok: bool,
    }

    #[test]
    fn test_output_schema_from_type() {
        let schema = OutputSchema::from_type::<Verdict>();
        assert_eq!(schema.name, "Verdict");
        assert!(schema.strict);
        assert!(schema.schema.get("$schema").is_none());
        assert_eq!(schema.schema["properties"]["ok"]["type"], "boolean");
    }

    #[test]
    fn test_parse_structured_content() {
        assert_eq!(
            parse_structured_content(r#"{"ok": true}"#),
            Some(serde_json::json!({"ok": true}))
        );
        assert_eq!(
            parse_structured_content("```json\n{\"ok\": false}\n```"),
            Some(serde_json::json!({"ok": false}))
        );
        assert_eq!(parse_structured_content("I cannot help with that."), None);
    }

    #[tokio::test]
    async fn test_complete_as_missing_output_is_parse_failure() {
        let client = ScriptedChatClient::new().with_raw_verdict(None);
        let err = complete_as::<Verdict>(&client, CompletionRequest::new("m", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn test_complete_as_mismatched_output_is_parse_failure() {
        let client =
            ScriptedChatClient::new().with_raw_verdict(Some(serde_json::json!({"ok": "maybe"})));
        let err = complete_as::<Verdict>(&client, CompletionRequest::new("m", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn test_complete_as_success() {
        let client =
            ScriptedChatClient::new().with_raw_verdict(Some(serde_json::json!({"ok": true})));
        let (verdict, usage) = complete_as::<Verdict>(&client, CompletionRequest::new("m", vec![]))
            .await
            .unwrap();
        assert!(verdict.ok);
        assert_eq!(usage.unwrap().total(), 30);
    }
}
