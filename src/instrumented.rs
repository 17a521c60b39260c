//! Span wrapping for steps and arbitrary async operations.

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;

use crate::span::{SpanKind, SpanStatus};
use crate::{ExecutionContext, Result, step::Step};

/// Run `f` inside a span named `name`.
///
/// The span is opened under the context's current span and records `input`
/// before `f` runs. `f` receives a context whose current span is the new
/// one, so anything it traces nests below it. On success the output is
/// recorded and the status set to `OK`; on failure the error is recorded and
/// the status set to `ERROR` with the error message. The span is closed in
/// both cases and the result passed through untouched.
///
/// # Example
///
/// ```rust
/// use guardrail_workflow::{traced, ExecutionContext, SpanKind};
///
/// # tokio_test::block_on(async {
/// let ctx = ExecutionContext::new();
/// let out = traced(&ctx, "double", SpanKind::Internal, 21, |_ctx, x: i32| async move {
///     Ok::<i32, guardrail_workflow::Error>(x * 2)
/// })
/// .await
/// .unwrap();
///
/// assert_eq!(out, 42);
/// assert_eq!(ctx.spans()[0].attribute_str("output.value"), Some("42"));
/// # });
/// ```
pub async fn traced<I, O, F, Fut>(
    ctx: &ExecutionContext,
    name: &str,
    kind: SpanKind,
    input: I,
    f: F,
) -> Result<O>
where
    I: Serialize,
    O: Serialize,
    F: FnOnce(ExecutionContext, I) -> Fut,
    Fut: Future<Output = Result<O>>,
{
    let mut span = ctx.start_span(name, kind);
    span.set_input(&input);
    let inner_ctx = ctx.with_parent(span.id());

    let result = f(inner_ctx, input).await;

    match &result {
        Ok(output) => {
            span.set_output(output);
            span.set_status(SpanStatus::Ok);
        }
        Err(e) => {
            span.record_error(e);
            span.set_status(SpanStatus::Error(e.to_string()));
        }
    }
    span.end();

    result
}

/// Wraps any step in a span, and records its completion or failure.
///
/// # Example
///
/// ```rust
/// use guardrail_workflow::{LambdaStep, InstrumentedStep, Step, ExecutionContext};
///
/// # tokio_test::block_on(async {
/// let step = LambdaStep::new(|x: i32| async move { Ok::<i32, guardrail_workflow::Error>(x + 1) });
/// let instrumented = InstrumentedStep::new(step, "Increment");
///
/// let ctx = ExecutionContext::new();
/// let result = instrumented.run(&ctx, 5i32).await.unwrap();
/// assert_eq!(result, 6);
///
/// assert_eq!(ctx.spans().len(), 1);
/// assert_eq!(ctx.snapshot().steps_completed, 1);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct InstrumentedStep<S> {
    inner: S,
    name: String,
    kind: SpanKind,
}

impl<S: Step> InstrumentedStep<S> {
    /// Wrap `inner` with a `CHAIN` span labelled `name`.
    pub fn new(inner: S, name: impl Into<String>) -> Self {
        Self {
            inner,
            name: name.into(),
            kind: SpanKind::Chain,
        }
    }

    /// Use a different span kind.
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }
}

#[async_trait]
impl<S> Step for InstrumentedStep<S>
where
    S: Step,
    S::Input: Serialize + 'static,
    S::Output: Serialize + 'static,
{
    type Input = S::Input;
    type Output = S::Output;

    async fn run(&self, ctx: &ExecutionContext, input: S::Input) -> Result<S::Output> {
        let inner = &self.inner;
        let result = traced(ctx, &self.name, self.kind, input, |ctx, input| async move {
            inner.run(&ctx, input).await
        })
        .await;

        match &result {
            Ok(_) => ctx.record_step(),
            Err(e) => {
                tracing::warn!(step = %self.name, error = %e, "step failed");
                ctx.record_failure(format!("{}: {}", self.name, e));
            }
        }

        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, LambdaStep};

    #[tokio::test]
    async fn test_failure_sets_error_status() {
        let step = InstrumentedStep::new(
            LambdaStep::new(|_: String| async move { Err::<String, Error>(Error::SimulatedFailure) }),
            "Fails",
        );
        let ctx = ExecutionContext::new();

        let err = step.run(&ctx, "input".to_string()).await.unwrap_err();
        assert!(matches!(err, Error::SimulatedFailure));

        let span = &ctx.spans()[0];
        assert_eq!(span.name, "Fails");
        assert_eq!(
            span.status,
            SpanStatus::Error("Simulated exception for testing purposes".to_string())
        );
        assert_eq!(span.attribute_str("input.value"), Some("input"));
        assert!(span.attribute("output.value").is_none());

        let metrics = ctx.snapshot();
        assert_eq!(metrics.steps_completed, 0);
        assert_eq!(
            metrics.failures,
            vec!["Fails: Simulated exception for testing purposes".to_string()]
        );
    }

    #[tokio::test]
    async fn test_nested_spans_are_children() {
        let ctx = ExecutionContext::new();
        traced(&ctx, "outer", SpanKind::Chain, (), |ctx, _| async move {
            traced(&ctx, "inner", SpanKind::Internal, (), |_, _| async move {
                Ok::<(), Error>(())
            })
            .await
        })
        .await
        .unwrap();

        let spans = ctx.spans();
        assert_eq!(spans.len(), 2);
        // Inner spans end first.
        assert_eq!(spans[0].name, "inner");
        assert_eq!(spans[0].parent_id, Some(spans[1].span_id));
        assert!(spans[1].is_root());
    }
}
