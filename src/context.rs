//! Execution context for workflow runs.
//!
//! This module provides the `ExecutionContext` which is passed to every step
//! in a workflow. It collects metrics, the event log and the finished spans
//! of one run, and knows which span new spans should be parented to.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::chat::TokenUsage;
use crate::events::{TraceEntry, WorkflowEvent};
use crate::metrics::WorkflowMetrics;
use crate::span::{NoopSink, SpanHandle, SpanKind, SpanRecord, SpanRef, TraceSink};

/// Context passed to every step in the workflow.
///
/// Clones share the same metrics, event log and span buffer, so a context
/// can be handed to nested steps freely. A context is created per run and
/// never shared between runs.
///
/// # Example
///
/// ```rust
/// use guardrail_workflow::{ExecutionContext, SpanKind, WorkflowEvent};
///
/// let ctx = ExecutionContext::new();
/// ctx.emit(WorkflowEvent::Assistant);
///
/// let span = ctx.start_span("lookup", SpanKind::Internal);
/// span.end();
///
/// assert_eq!(ctx.trace_snapshot().len(), 1);
/// assert_eq!(ctx.spans().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Shared metrics accumulator.
    pub metrics: Arc<Mutex<WorkflowMetrics>>,
    /// Shared log of dispatched workflow events.
    pub traces: Arc<Mutex<Vec<TraceEntry>>>,
    spans: Arc<Mutex<Vec<SpanRecord>>>,
    sink: Arc<dyn TraceSink>,
    parent: Option<SpanRef>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ExecutionContext {
    /// Create a new execution context whose spans go nowhere.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(Arc::new(NoopSink))
    }

    /// Create a new execution context exporting finished spans to `sink`.
    #[must_use]
    pub fn with_sink(sink: Arc<dyn TraceSink>) -> Self {
        Self {
            metrics: Arc::new(Mutex::new(WorkflowMetrics::default())),
            traces: Arc::new(Mutex::new(Vec::new())),
            spans: Arc::new(Mutex::new(Vec::new())),
            sink,
            parent: None,
        }
    }

    /// A context sharing all buffers whose new spans are children of `parent`.
    #[must_use]
    pub fn with_parent(&self, parent: SpanRef) -> Self {
        Self {
            parent: Some(parent),
            ..self.clone()
        }
    }

    /// The span new spans are parented to, if any.
    pub fn current_span(&self) -> Option<SpanRef> {
        self.parent
    }

    /// Open a span under the current parent.
    pub fn start_span(&self, name: impl Into<String>, kind: SpanKind) -> SpanHandle {
        SpanHandle::start(self.clone(), name, kind, self.parent)
    }

    pub(crate) fn finish_span(&self, record: SpanRecord) {
        self.sink.export(&record);
        lock(&self.spans).push(record);
    }

    /// Finished spans of this run, in the order they ended.
    #[must_use]
    pub fn spans(&self) -> Vec<SpanRecord> {
        lock(&self.spans).clone()
    }

    /// Record token usage reported by a chat completion.
    pub fn record_usage(&self, usage: Option<&TokenUsage>) {
        lock(&self.metrics).record_completion(usage);
    }

    /// Increment the steps completed counter.
    pub fn record_step(&self) {
        lock(&self.metrics).record_step();
    }

    /// Record a failure message.
    pub fn record_failure(&self, error: impl Into<String>) {
        lock(&self.metrics).record_failure(error);
    }

    /// Get a snapshot of the current metrics.
    #[must_use]
    pub fn snapshot(&self) -> WorkflowMetrics {
        lock(&self.metrics).clone()
    }

    /// Append a workflow event to the event log.
    ///
    /// Events are timestamped automatically when emitted.
    pub fn emit(&self, event: WorkflowEvent) {
        tracing::debug!(event = event.label(), "workflow event");
        lock(&self.traces).push(TraceEntry::new(event));
    }

    /// Get a snapshot of the event log.
    #[must_use]
    pub fn trace_snapshot(&self) -> Vec<TraceEntry> {
        lock(&self.traces).clone()
    }
}
