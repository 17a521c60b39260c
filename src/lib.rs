//! # guardrail-workflow
//!
//! A traced, three-stage LLM chat workflow: intake, answer generation and a
//! compliance guardrail, served over HTTP.
//!
//! ## Core Concepts
//!
//! - **Step**: The async trait every stage implements
//! - **ExecutionContext**: Per-run metrics, event log and span buffer
//! - **traced / InstrumentedStep**: Span wrapping for any operation or step
//! - **WorkflowState**: Data carried between stages
//! - **WorkflowEngine**: Runs the stages and decides the reply
//! - **ChatClient**: OpenAI-compatible and Ollama chat backends
//! - **TraceSink**: Where finished spans go (memory, OTLP, nowhere)
//!
//! ## Example: Tracing a Pipeline
//!
//! ```rust
//! use guardrail_workflow::{BoxedStepExt, ExecutionContext, LambdaStep, SpanKind, Step};
//!
//! # tokio_test::block_on(async {
//! let step = LambdaStep::new(|x: i32| async move { Ok::<i32, guardrail_workflow::Error>(x * 2) })
//!     .instrumented("Double", SpanKind::Chain);
//!
//! let ctx = ExecutionContext::new();
//! let result = step.run(&ctx, 5).await.unwrap();
//!
//! assert_eq!(result, 10);
//! assert_eq!(ctx.snapshot().steps_completed, 1);
//! assert_eq!(ctx.spans()[0].name, "Double");
//! # });
//! ```

pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod guardrail;
pub mod instrumented;
pub mod metrics;
pub mod server;
pub mod span;
pub mod stages;
pub mod state;
pub mod step;
pub mod telemetry;
pub mod workflow;

pub use chat::{ChatClient, ChatClientFactory, ChatMessage, Role};
pub use config::Settings;
pub use context::ExecutionContext;
pub use error::{Error, Result};
pub use events::{TraceEntry, WorkflowEvent};
pub use guardrail::GuardrailVerdict;
pub use instrumented::{traced, InstrumentedStep};
pub use metrics::WorkflowMetrics;
pub use span::{InMemorySink, NoopSink, SpanKind, SpanRecord, SpanStatus, TraceSink};
pub use state::{Stage, Transition, WorkflowState};
pub use step::{BoxedStepExt, LambdaStep, Step};
pub use workflow::{RunOutcome, RunReport, Variant, WorkflowEngine};
