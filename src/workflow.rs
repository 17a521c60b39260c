//! The workflow engine: runs intake, generation and guardrail for one question.
//!
//! Every run gets a fresh [`ExecutionContext`] and [`WorkflowState`], a root
//! span named after the workflow and one child span per stage. Two drivers
//! exist. The sequential driver calls the stages in order; the event-driven
//! driver pops [`WorkflowEvent`]s off a queue and dispatches each to the stage
//! that consumes it. Both share the same stage transitions, so they return the
//! same replies and produce the same span tree.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::chat::ChatClient;
use crate::events::{TraceEntry, WorkflowEvent};
use crate::guardrail::FALLBACK_MESSAGE;
use crate::instrumented::InstrumentedStep;
use crate::span::{NoopSink, SpanKind, SpanRecord, SpanStatus, TraceSink};
use crate::stages::{Exchange, GenerationStep, GuardrailStep, IntakeStep};
use crate::state::{Stage, Transition, WorkflowState};
use crate::step::{BoxedStepExt, Step};
use crate::{Error, ExecutionContext, Result, WorkflowMetrics};

/// Which flavour of the workflow to run.
///
/// Parsed case-insensitively, from the CLI and from query strings alike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Dummy,
    Custom,
    Llama,
}

/// How a variant moves from one stage to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    /// Direct calls, in stage order.
    Sequential,
    /// Events pushed to a queue and consumed by the matching stage.
    EventDriven,
}

impl Variant {
    /// Name used as the prefix of every span of the run.
    pub fn workflow_name(&self) -> &'static str {
        match self {
            Variant::Dummy => "DummyWorkflow",
            Variant::Custom => "MyWorkflow",
            Variant::Llama => "LlamaWorkflow",
        }
    }

    pub fn driver(&self) -> Driver {
        match self {
            Variant::Dummy | Variant::Custom => Driver::Sequential,
            Variant::Llama => Driver::EventDriven,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Dummy => "dummy",
            Variant::Custom => "custom",
            Variant::Llama => "llama",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dummy" => Ok(Variant::Dummy),
            "custom" => Ok(Variant::Custom),
            "llama" => Ok(Variant::Llama),
            other => Err(Error::Config(format!(
                "unknown workflow variant '{other}', expected dummy, custom or llama"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for Variant {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The guardrail produced the reply: the answer or the refusal.
    Completed(String),
    /// A recovering stage failed and the fallback reply was used.
    Failed(String),
}

impl RunOutcome {
    pub fn text(&self) -> &str {
        match self {
            RunOutcome::Completed(text) | RunOutcome::Failed(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            RunOutcome::Completed(text) | RunOutcome::Failed(text) => text,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }
}

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// State as left by the last stage that succeeded.
    pub state: WorkflowState,
    pub metrics: WorkflowMetrics,
    /// Finished spans in the order they ended; the root span is last.
    pub spans: Vec<SpanRecord>,
    /// Events dispatched by the event-driven driver; empty for sequential runs.
    pub events: Vec<TraceEntry>,
}

/// Runs the three-stage chat workflow.
///
/// The engine is cheap to share: it holds the chat client handle and the
/// stage steps, and keeps no per-run data. Concurrent runs each get their
/// own state and span tree.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use guardrail_workflow::chat::OllamaClient;
/// use guardrail_workflow::workflow::{Variant, WorkflowEngine};
///
/// # tokio_test::block_on(async {
/// let client = OllamaClient::new("http://localhost:11434", std::time::Duration::from_secs(30), 1).unwrap();
/// let engine = WorkflowEngine::new(Arc::new(client), "gemma3:12b").with_variant(Variant::Llama);
///
/// let reply = engine.run("What is the capital of France?").await.unwrap();
/// println!("{reply}");
/// # });
/// ```
#[derive(Debug)]
pub struct WorkflowEngine {
    variant: Variant,
    client: Arc<dyn ChatClient>,
    model: String,
    sink: Arc<dyn TraceSink>,
    stages: Stages,
}

#[derive(Debug)]
struct Stages {
    intake: InstrumentedStep<IntakeStep>,
    generation: InstrumentedStep<GenerationStep>,
    guardrail: InstrumentedStep<GuardrailStep>,
}

impl Stages {
    fn new(variant: Variant, client: &Arc<dyn ChatClient>, model: &str) -> Self {
        let name = |stage: Stage| format!("{}.{}", variant.workflow_name(), stage.span_suffix());
        Self {
            intake: IntakeStep.instrumented(name(Stage::Intake), SpanKind::Chain),
            generation: GenerationStep::new(client.clone(), model)
                .instrumented(name(Stage::Generation), SpanKind::Chain),
            guardrail: GuardrailStep::new(client.clone(), model)
                .instrumented(name(Stage::Guardrail), SpanKind::Chain),
        }
    }
}

impl WorkflowEngine {
    /// An engine running the default variant, discarding its spans.
    pub fn new(client: Arc<dyn ChatClient>, model: impl Into<String>) -> Self {
        let model = model.into();
        let variant = Variant::default();
        Self {
            stages: Stages::new(variant, &client, &model),
            variant,
            client,
            model,
            sink: Arc::new(NoopSink),
        }
    }

    #[must_use]
    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.stages = Stages::new(variant, &self.client, &self.model);
        self.variant = variant;
        self
    }

    /// Export every finished span to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Answer `question`, returning only the reply text.
    ///
    /// Intake failures yield the fallback reply. Generation and guardrail
    /// failures are returned as errors.
    pub async fn run(&self, question: &str) -> Result<String> {
        Ok(self.run_with_report(question).await?.outcome.into_text())
    }

    /// Answer `question`, returning the reply along with the run's state,
    /// metrics, spans and events.
    pub async fn run_with_report(&self, question: &str) -> Result<RunReport> {
        let name = self.variant.workflow_name();
        let ctx = ExecutionContext::with_sink(self.sink.clone());
        tracing::info!(workflow = name, "run started");

        let mut root = ctx.start_span(format!("{name}.run"), SpanKind::Chain);
        root.set_input(question);
        let run_ctx = ctx.with_parent(root.id());

        let result = match self.variant.driver() {
            Driver::Sequential => self.run_sequential(&run_ctx, question).await,
            Driver::EventDriven => self.run_event_driven(&run_ctx, question).await,
        };

        match &result {
            Ok((outcome, _)) => {
                root.set_output(outcome.text());
                root.set_status(SpanStatus::Ok);
            }
            Err(e) => {
                root.record_error(e);
                root.set_status(SpanStatus::Error(e.to_string()));
            }
        }
        root.end();

        let (outcome, state) = result.inspect_err(|e| {
            tracing::error!(workflow = name, error = %e, "run failed");
        })?;
        let metrics = ctx.snapshot();
        tracing::info!(
            workflow = name,
            failed = outcome.is_failed(),
            llm_calls = metrics.llm_calls,
            total_tokens = metrics.total_tokens(),
            "run finished"
        );

        Ok(RunReport {
            outcome,
            state,
            metrics,
            spans: ctx.spans(),
            events: ctx.trace_snapshot(),
        })
    }

    async fn run_sequential(
        &self,
        ctx: &ExecutionContext,
        question: &str,
    ) -> Result<(RunOutcome, WorkflowState)> {
        let mut state = WorkflowState::new();
        let mut stage = Stage::Intake;

        loop {
            match self.advance(ctx, stage, question, &state).await {
                Ok(Transition::Continue(next_state)) => {
                    state = next_state;
                    stage = stage.next().ok_or_else(|| {
                        Error::Execution(format!("{stage} stage continued past the last stage"))
                    })?;
                }
                Ok(Transition::Complete { state, output }) => {
                    return Ok((RunOutcome::Completed(output), state));
                }
                Err(e) if stage.recovers_failures() => {
                    tracing::warn!(%stage, error = %e, "stage failed, replying with fallback");
                    return Ok((RunOutcome::Failed(FALLBACK_MESSAGE.to_string()), state));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_event_driven(
        &self,
        ctx: &ExecutionContext,
        question: &str,
    ) -> Result<(RunOutcome, WorkflowState)> {
        let mut queue = VecDeque::from([WorkflowEvent::Start {
            user_question: question.to_string(),
        }]);
        let mut state = WorkflowState::new();
        let mut failed = false;

        while let Some(event) = queue.pop_front() {
            ctx.emit(event.clone());

            let stage = match event.stage() {
                Some(stage) => stage,
                None => {
                    let result = match event {
                        WorkflowEvent::Stop { result } => result,
                        other => {
                            return Err(Error::Execution(format!(
                                "no stage consumes the {} event",
                                other.label()
                            )))
                        }
                    };
                    let outcome = if failed {
                        RunOutcome::Failed(result)
                    } else {
                        RunOutcome::Completed(result)
                    };
                    return Ok((outcome, state));
                }
            };
            let input = match &event {
                WorkflowEvent::Start { user_question } => user_question.as_str(),
                _ => question,
            };

            match self.advance(ctx, stage, input, &state).await {
                Ok(Transition::Continue(next_state)) => {
                    state = next_state;
                    let next = stage
                        .next()
                        .and_then(WorkflowEvent::entering)
                        .ok_or_else(|| {
                            Error::Execution(format!("{stage} stage continued past the last stage"))
                        })?;
                    queue.push_back(next);
                }
                Ok(Transition::Complete {
                    state: final_state,
                    output,
                }) => {
                    state = final_state;
                    queue.push_back(WorkflowEvent::Stop { result: output });
                }
                Err(e) if stage.recovers_failures() => {
                    tracing::warn!(%stage, error = %e, "stage failed, replying with fallback");
                    failed = true;
                    queue.push_back(WorkflowEvent::Stop {
                        result: FALLBACK_MESSAGE.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Execution(
            "event queue drained before a stop event".to_string(),
        ))
    }

    /// Run one stage against a snapshot of the state.
    async fn advance(
        &self,
        ctx: &ExecutionContext,
        stage: Stage,
        question: &str,
        state: &WorkflowState,
    ) -> Result<Transition> {
        match stage {
            Stage::Intake => {
                let user = self.stages.intake.run(ctx, question.to_string()).await?;
                Ok(Transition::Continue(state.clone().with_user_message(user)))
            }
            Stage::Generation => {
                let user = state.user_message()?.clone();
                let assistant = self.stages.generation.run(ctx, user).await?;
                Ok(Transition::Continue(
                    state.clone().with_assistant_message(assistant),
                ))
            }
            Stage::Guardrail => {
                let exchange = Exchange {
                    user: state.user_message()?.clone(),
                    assistant: state.assistant_message()?.clone(),
                };
                let decision = self.stages.guardrail.run(ctx, exchange).await?;
                Ok(Transition::Complete {
                    state: state.clone().with_guardrail_verdict(decision.verdict),
                    output: decision.response,
                })
            }
        }
    }
}
