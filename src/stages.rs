//! The three steps of the chat workflow.
//!
//! Each stage is a plain [`Step`]; the engine wraps them in spans and moves
//! their outputs into the [`WorkflowState`](crate::WorkflowState).

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::chat::{complete_as, ChatClient, ChatMessage, CompletionRequest, TokenUsage};
use crate::guardrail::{GuardrailVerdict, ASSISTANT_SYSTEM_PROMPT};
use crate::span::{SpanKind, SpanStatus};
use crate::step::Step;
use crate::{Error, ExecutionContext, Result};

/// Input that makes intake fail on purpose, compared case-insensitively.
pub const FAULT_INJECTION_TRIGGER: &str = "exception";

/// Name of the span around every chat client call.
pub const LLM_SPAN_NAME: &str = "ChatCompletion";

/// Turns the raw question into a user message.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntakeStep;

#[async_trait]
impl Step for IntakeStep {
    type Input = String;
    type Output = ChatMessage;

    async fn run(&self, ctx: &ExecutionContext, question: String) -> Result<ChatMessage> {
        if question.eq_ignore_ascii_case(FAULT_INJECTION_TRIGGER) {
            return Err(Error::SimulatedFailure);
        }
        example_traced_operation(ctx);
        Ok(ChatMessage::user(question))
    }

    fn name(&self) -> &str {
        "intake"
    }
}

/// Result of [`example_traced_operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleResult {
    pub input: u32,
    pub result: u32,
}

/// Hand-instrumented demo operation: increments a random number inside its
/// own span.
pub fn example_traced_operation(ctx: &ExecutionContext) -> ExampleResult {
    let mut span = ctx.start_span("example_traced_operation", SpanKind::Internal);
    let value: u32 = rand::thread_rng().gen_range(1..=100);
    span.set_attribute("example.input_value", value);
    span.set_attribute(
        "example.description",
        "simple increment random number operation",
    );
    let result = value + 1;
    span.set_attribute("example.result", result);
    span.set_status(SpanStatus::Ok);
    span.end();

    ExampleResult {
        input: value,
        result,
    }
}

/// Run one chat call inside an `LLM` span.
///
/// The span records the model, temperature and messages up front, then the
/// output and token counts. Usage is added to the run's metrics.
async fn traced_completion<T, F, Fut>(
    ctx: &ExecutionContext,
    request: CompletionRequest,
    call: F,
) -> Result<T>
where
    T: Serialize,
    F: FnOnce(CompletionRequest) -> Fut,
    Fut: Future<Output = Result<(T, Option<TokenUsage>)>>,
{
    let mut span = ctx.start_span(LLM_SPAN_NAME, SpanKind::Llm);
    span.set_attribute("llm.model_name", request.model.clone());
    span.set_attribute("llm.temperature", request.temperature);
    span.set_input(&request.messages);

    let result = call(request).await;

    match &result {
        Ok((output, usage)) => {
            ctx.record_usage(usage.as_ref());
            if let Some(usage) = usage {
                span.set_attribute("llm.token_count.prompt", usage.prompt_tokens);
                span.set_attribute("llm.token_count.completion", usage.completion_tokens);
                span.set_attribute("llm.token_count.total", usage.total());
            }
            span.set_output(output);
            span.set_status(SpanStatus::Ok);
        }
        Err(e) => {
            span.record_error(e);
            span.set_status(SpanStatus::Error(e.to_string()));
        }
    }
    span.end();

    result.map(|(output, _)| output)
}

/// Asks the chat client to answer the user message.
#[derive(Debug, Clone)]
pub struct GenerationStep {
    client: Arc<dyn ChatClient>,
    model: String,
}

impl GenerationStep {
    pub fn new(client: Arc<dyn ChatClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Step for GenerationStep {
    type Input = ChatMessage;
    type Output = ChatMessage;

    async fn run(&self, ctx: &ExecutionContext, user_message: ChatMessage) -> Result<ChatMessage> {
        let request = CompletionRequest::new(
            &self.model,
            vec![ChatMessage::system(ASSISTANT_SYSTEM_PROMPT), user_message],
        )
        .with_temperature(0.0);
        let client = &*self.client;

        traced_completion(ctx, request, |request| async move {
            let completion = client.complete(request).await?;
            Ok::<_, Error>((completion.message, completion.usage))
        })
        .await
    }

    fn name(&self) -> &str {
        "generation"
    }
}

/// A question and the answer it received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: ChatMessage,
    pub assistant: ChatMessage,
}

/// The guardrail's verdict and the reply it selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailDecision {
    pub verdict: GuardrailVerdict,
    pub response: String,
}

/// Validates an answer against the non-toxicity policy.
#[derive(Debug, Clone)]
pub struct GuardrailStep {
    client: Arc<dyn ChatClient>,
    model: String,
}

impl GuardrailStep {
    pub fn new(client: Arc<dyn ChatClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Step for GuardrailStep {
    type Input = Exchange;
    type Output = GuardrailDecision;

    async fn run(&self, ctx: &ExecutionContext, exchange: Exchange) -> Result<GuardrailDecision> {
        let request = CompletionRequest::new(
            &self.model,
            vec![exchange.user.clone(), exchange.assistant.clone()],
        )
        .with_temperature(0.0);
        let client = &*self.client;

        let verdict = traced_completion(ctx, request, |request| {
            complete_as::<GuardrailVerdict>(client, request)
        })
        .await?;

        let response = verdict.resolve(exchange.assistant.content()).to_string();
        Ok(GuardrailDecision { verdict, response })
    }

    fn name(&self) -> &str {
        "guardrail"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::mock::ScriptedChatClient;
    use crate::chat::Role;
    use crate::guardrail::GUARDRAIL_FAILURE_MESSAGE;

    #[tokio::test]
    async fn test_intake_builds_user_message() {
        let ctx = ExecutionContext::new();
        let message = IntakeStep.run(&ctx, "Is water wet?".to_string()).await.unwrap();

        assert_eq!(message, ChatMessage::user("Is water wet?"));
        let spans = ctx.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "example_traced_operation");
        let input = spans[0].attribute("example.input_value").unwrap().as_u64().unwrap();
        let result = spans[0].attribute("example.result").unwrap().as_u64().unwrap();
        assert!((1..=100).contains(&input));
        assert_eq!(result, input + 1);
    }

    #[tokio::test]
    async fn test_intake_fault_injection_ignores_case() {
        for trigger in ["exception", "Exception", "EXCEPTION", "eXcEpTiOn"] {
            let ctx = ExecutionContext::new();
            let err = IntakeStep.run(&ctx, trigger.to_string()).await.unwrap_err();
            assert!(matches!(err, Error::SimulatedFailure));
            assert!(ctx.spans().is_empty());
        }

        let ctx = ExecutionContext::new();
        assert!(IntakeStep.run(&ctx, "exceptions".to_string()).await.is_ok());
    }

    #[tokio::test]
    async fn test_generation_prepends_system_prompt() {
        let client = Arc::new(ScriptedChatClient::new().with_reply("42"));
        let step = GenerationStep::new(client.clone(), "gemma3:12b");
        let ctx = ExecutionContext::new();

        let reply = step.run(&ctx, ChatMessage::user("meaning of life?")).await.unwrap();
        assert_eq!(reply, ChatMessage::assistant("42"));

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "gemma3:12b");
        assert_eq!(requests[0].temperature, 0.0);
        assert_eq!(
            requests[0].messages,
            vec![
                ChatMessage::system(ASSISTANT_SYSTEM_PROMPT),
                ChatMessage::user("meaning of life?")
            ]
        );

        let spans = ctx.spans();
        assert_eq!(spans[0].name, LLM_SPAN_NAME);
        assert_eq!(spans[0].kind, SpanKind::Llm);
        assert_eq!(spans[0].attribute_str("llm.model_name"), Some("gemma3:12b"));
        assert_eq!(spans[0].attribute("llm.token_count.total"), Some(&serde_json::Value::from(20)));
        assert_eq!(spans[0].attribute_str("output.value"), Some(r#"{"role":"assistant","content":"42"}"#));
        assert_eq!(ctx.snapshot().total_tokens(), 20);
    }

    #[tokio::test]
    async fn test_generation_propagates_upstream_failure() {
        let client = Arc::new(ScriptedChatClient::new().with_completion_error("connection reset"));
        let step = GenerationStep::new(client, "m");
        let ctx = ExecutionContext::new();

        let err = step.run(&ctx, ChatMessage::user("hi")).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
        assert!(ctx.spans()[0].status.is_error());
    }

    #[tokio::test]
    async fn test_guardrail_sends_both_messages() {
        let client = Arc::new(ScriptedChatClient::new().with_verdict(false, "mean"));
        let step = GuardrailStep::new(client.clone(), "m");
        let ctx = ExecutionContext::new();
        let exchange = Exchange {
            user: ChatMessage::user("q"),
            assistant: ChatMessage::assistant("a dumb question"),
        };

        let decision = step.run(&ctx, exchange).await.unwrap();
        assert!(!decision.verdict.is_compliant);
        assert_eq!(decision.verdict.reasoning, "mean");
        assert_eq!(decision.response, GUARDRAIL_FAILURE_MESSAGE);

        let request = &client.requests()[0];
        let roles: Vec<Role> = request.messages.iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(request.temperature, 0.0);
    }

    #[tokio::test]
    async fn test_guardrail_without_verdict_is_parse_failure() {
        let client = Arc::new(ScriptedChatClient::new().with_raw_verdict(None));
        let step = GuardrailStep::new(client, "m");
        let ctx = ExecutionContext::new();
        let exchange = Exchange {
            user: ChatMessage::user("q"),
            assistant: ChatMessage::assistant("a"),
        };

        let err = step.run(&ctx, exchange).await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}
