//! Trace spans recorded around every workflow step.
//!
//! A [`SpanHandle`] is opened through an [`ExecutionContext`], collects
//! attributes and a status while the step runs, and is turned into an
//! immutable [`SpanRecord`] when it ends. Finished records are kept on the
//! context and handed to the context's [`TraceSink`], which decides where
//! they go (an OTLP collector, memory, nowhere).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::ExecutionContext;

/// Attribute carrying the semantic role of a span.
pub const SPAN_KIND_KEY: &str = "openinference.span.kind";
/// Attribute carrying the serialized step input.
pub const INPUT_VALUE_KEY: &str = "input.value";
/// Attribute carrying the serialized step output.
pub const OUTPUT_VALUE_KEY: &str = "output.value";
/// Attribute carrying the message of the error that failed the span.
pub const EXCEPTION_MESSAGE_KEY: &str = "exception.message";

/// Semantic role of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanKind {
    /// A logical step of a workflow.
    Chain,
    /// A call to a language model.
    Llm,
    /// Anything else.
    Internal,
}

impl SpanKind {
    /// The OpenInference name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Chain => "CHAIN",
            SpanKind::Llm => "LLM",
            SpanKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a span.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "code", content = "message")]
pub enum SpanStatus {
    /// No status was set before the span ended.
    #[default]
    Unset,
    /// The operation succeeded.
    Ok,
    /// The operation failed with the given message.
    Error(String),
}

impl SpanStatus {
    /// Whether the status is [`SpanStatus::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, SpanStatus::Ok)
    }

    /// Whether the status is [`SpanStatus::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error(_))
    }
}

/// Identifies a span within its trace, used to parent new spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanRef {
    /// Trace shared by every span of one workflow run.
    pub trace_id: Uuid,
    /// Identifier of the span itself.
    pub span_id: Uuid,
}

/// A finished span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Trace this span belongs to.
    pub trace_id: Uuid,
    /// Identifier of this span.
    pub span_id: Uuid,
    /// Parent span, `None` for the root of a trace.
    pub parent_id: Option<Uuid>,
    /// Operation name.
    pub name: String,
    /// Semantic role.
    pub kind: SpanKind,
    /// Key/value attributes.
    pub attributes: BTreeMap<String, Value>,
    /// Messages of errors recorded on the span, in order.
    pub errors: Vec<String>,
    /// Terminal status.
    pub status: SpanStatus,
    /// When the span was opened.
    pub start_time: SystemTime,
    /// When the span was closed.
    pub end_time: SystemTime,
}

impl SpanRecord {
    /// Look up an attribute.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Look up a string attribute.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attribute(key).and_then(Value::as_str)
    }

    /// Whether this span is a root span.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Elapsed time between start and end.
    pub fn duration(&self) -> Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or_default()
    }
}

/// Destination for finished spans.
///
/// Implementations must be cheap to call: `export` runs inline when a span
/// ends, on whatever task ended it.
pub trait TraceSink: Send + Sync + fmt::Debug {
    /// Receive a finished span.
    fn export(&self, span: &SpanRecord);
}

/// A sink that drops every span.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TraceSink for NoopSink {
    fn export(&self, _span: &SpanRecord) {}
}

/// A sink that keeps every span in memory.
///
/// Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct InMemorySink {
    spans: Arc<Mutex<Vec<SpanRecord>>>,
}

impl InMemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All spans exported so far, in the order they ended.
    pub fn spans(&self) -> Vec<SpanRecord> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TraceSink for InMemorySink {
    fn export(&self, span: &SpanRecord) {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(span.clone());
    }
}

/// An open span.
///
/// The span is closed by [`SpanHandle::end`] or, failing that, when the
/// handle is dropped, so a step that panics or whose future is cancelled
/// still produces a record.
pub struct SpanHandle {
    id: SpanRef,
    record: Option<SpanRecord>,
    ctx: ExecutionContext,
}

impl SpanHandle {
    pub(crate) fn start(
        ctx: ExecutionContext,
        name: impl Into<String>,
        kind: SpanKind,
        parent: Option<SpanRef>,
    ) -> Self {
        let (trace_id, parent_id) = match parent {
            Some(parent) => (parent.trace_id, Some(parent.span_id)),
            None => (Uuid::new_v4(), None),
        };
        let mut attributes = BTreeMap::new();
        attributes.insert(SPAN_KIND_KEY.to_string(), Value::from(kind.as_str()));

        let record = SpanRecord {
            trace_id,
            span_id: Uuid::new_v4(),
            parent_id,
            name: name.into(),
            kind,
            attributes,
            errors: Vec::new(),
            status: SpanStatus::Unset,
            start_time: SystemTime::now(),
            end_time: SystemTime::UNIX_EPOCH,
        };
        tracing::trace!(span_name = %record.name, kind = %kind, "span started");

        Self {
            id: SpanRef {
                trace_id,
                span_id: record.span_id,
            },
            record: Some(record),
            ctx,
        }
    }

    /// Reference used to parent spans opened inside this one.
    pub fn id(&self) -> SpanRef {
        self.id
    }

    /// Set an attribute, replacing any previous value under `key`.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Some(record) = self.record.as_mut() {
            record.attributes.insert(key.into(), value.into());
        }
    }

    /// Record the step input under `input.value`.
    pub fn set_input<T: Serialize + ?Sized>(&mut self, input: &T) {
        self.set_attribute(INPUT_VALUE_KEY, render_value(input));
    }

    /// Record the step output under `output.value`.
    pub fn set_output<T: Serialize + ?Sized>(&mut self, output: &T) {
        self.set_attribute(OUTPUT_VALUE_KEY, render_value(output));
    }

    /// Set the terminal status.
    pub fn set_status(&mut self, status: SpanStatus) {
        if let Some(record) = self.record.as_mut() {
            record.status = status;
        }
    }

    /// Record an error on the span. The status is left untouched.
    pub fn record_error(&mut self, err: &(dyn std::error::Error + 'static)) {
        let message = err.to_string();
        self.set_attribute(EXCEPTION_MESSAGE_KEY, message.clone());
        if let Some(record) = self.record.as_mut() {
            record.errors.push(message);
        }
    }

    /// Close the span and hand it to the context.
    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(mut record) = self.record.take() {
            record.end_time = SystemTime::now();
            tracing::trace!(
                span_name = %record.name,
                status = ?record.status,
                duration_ms = record.duration().as_millis() as u64,
                "span ended"
            );
            self.ctx.finish_span(record);
        }
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanHandle")
            .field("id", &self.id)
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Strings are stored verbatim, everything else as compact JSON text in
/// declared field order.
fn render_value<T: Serialize + ?Sized>(value: &T) -> String {
    if let Ok(Value::String(s)) = serde_json::to_value(value) {
        return s;
    }
    serde_json::to_string(value).unwrap_or_else(|_| "<serialization_error>".to_string())
}
