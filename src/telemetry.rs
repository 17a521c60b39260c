//! Logging setup and OpenTelemetry span export.
//!
//! Workflow spans are recorded as [`SpanRecord`]s first. [`OtelSink`] replays
//! each finished record into an OpenTelemetry tracer, keeping its ids,
//! parent, timestamps, attributes and status, and the configured OTLP
//! exporter ships it to the collector.

use opentelemetry::trace::{
    Span as _, SpanContext, SpanId, SpanKind as OtelSpanKind, Status, TraceContextExt,
    TraceFlags, TraceId, TraceState, Tracer as _, TracerProvider as _,
};
use opentelemetry::{Context, KeyValue, Value as OtelValue};
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::export::trace::SpanExporter;
use opentelemetry_sdk::trace::{Tracer, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing_subscriber::{
    fmt::{self as tracing_fmt, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use uuid::Uuid;

use crate::config::{ExportProtocol, LogFormat, LoggingSettings, TelemetrySettings};
use crate::span::{SpanRecord, SpanStatus, TraceSink};
use crate::{Error, Result};

/// Name of the OpenTelemetry tracer workflow spans are replayed through.
pub const TRACER_NAME: &str = "guardrail-workflow";

/// Resource attribute Phoenix groups traces by.
pub const PROJECT_NAME_KEY: &str = "openinference.project.name";

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more
/// than once leaves the first subscriber in place.
pub fn init_logging(config: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
    };

    if installed.is_ok() {
        tracing::info!("Logging initialized with level: {}", config.level);
    }
}

/// Exports workflow spans over OTLP.
pub struct OtelSink {
    provider: TracerProvider,
    tracer: Tracer,
}

impl OtelSink {
    /// Build the OTLP exporter and tracer provider described by `config`.
    pub fn new(config: &TelemetrySettings) -> Result<Self> {
        let exporter = match config.protocol {
            ExportProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(&config.collector_endpoint)
                .build(),
            ExportProtocol::HttpProtobuf => opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpBinary)
                .with_endpoint(&config.collector_endpoint)
                .build(),
        }
        .map_err(|e| Error::Config(format!("failed to build OTLP exporter: {e}")))?;

        tracing::info!(
            endpoint = %config.collector_endpoint,
            protocol = ?config.protocol,
            batch = config.batch,
            "exporting spans over OTLP"
        );
        Ok(Self::with_exporter(exporter, config.batch, resource(config)))
    }

    /// Use an already built exporter.
    pub fn with_exporter<E>(exporter: E, batch: bool, resource: Resource) -> Self
    where
        E: SpanExporter + 'static,
    {
        let builder = TracerProvider::builder().with_resource(resource);
        let provider = if batch {
            builder.with_batch_exporter(exporter, runtime::Tokio).build()
        } else {
            builder.with_simple_exporter(exporter).build()
        };
        let tracer = provider.tracer(TRACER_NAME);
        Self { provider, tracer }
    }

    /// Flush buffered spans and stop the exporter.
    pub fn shutdown(&self) {
        match self.provider.shutdown() {
            Ok(()) => tracing::info!("Tracing shutdown complete"),
            Err(e) => tracing::warn!(error = %e, "failed to flush spans on shutdown"),
        }
    }
}

impl fmt::Debug for OtelSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtelSink").finish_non_exhaustive()
    }
}

impl TraceSink for OtelSink {
    fn export(&self, record: &SpanRecord) {
        let trace_id = TraceId::from_bytes(*record.trace_id.as_bytes());
        let parent_cx = match record.parent_id {
            Some(parent_id) => Context::new().with_remote_span_context(SpanContext::new(
                trace_id,
                span_id(&parent_id),
                TraceFlags::SAMPLED,
                true,
                TraceState::default(),
            )),
            None => Context::new(),
        };

        let mut span = self
            .tracer
            .span_builder(record.name.clone())
            .with_kind(OtelSpanKind::Internal)
            .with_trace_id(trace_id)
            .with_span_id(span_id(&record.span_id))
            .with_start_time(record.start_time)
            .with_attributes(attributes(record))
            .start_with_context(&self.tracer, &parent_cx);

        for message in &record.errors {
            span.add_event(
                "exception",
                vec![KeyValue::new("exception.message", message.clone())],
            );
        }
        span.set_status(status(&record.status));
        span.end_with_timestamp(record.end_time);
    }
}

/// Build the sink for `config`, or `None` when export is disabled or the
/// exporter cannot be built.
pub fn init_sink(config: &TelemetrySettings) -> Option<Arc<OtelSink>> {
    if !config.enabled {
        tracing::info!("span export disabled");
        return None;
    }
    match OtelSink::new(config) {
        Ok(sink) => Some(Arc::new(sink)),
        Err(e) => {
            tracing::warn!("Failed to initialize OpenTelemetry: {}. Span export disabled.", e);
            None
        }
    }
}

fn resource(config: &TelemetrySettings) -> Resource {
    Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new(PROJECT_NAME_KEY, config.service_name.clone()),
    ])
}

fn span_id(id: &Uuid) -> SpanId {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&id.as_bytes()[..8]);
    SpanId::from_bytes(bytes)
}

fn attributes(record: &SpanRecord) -> Vec<KeyValue> {
    record
        .attributes
        .iter()
        .map(|(key, value)| KeyValue::new(key.clone(), otel_value(value)))
        .collect()
}

fn otel_value(value: &Value) -> OtelValue {
    match value {
        Value::String(s) => OtelValue::from(s.clone()),
        Value::Bool(b) => OtelValue::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => OtelValue::from(i),
            None => OtelValue::from(n.as_f64().unwrap_or_default()),
        },
        other => OtelValue::from(other.to_string()),
    }
}

fn status(status: &SpanStatus) -> Status {
    match status {
        SpanStatus::Unset => Status::Unset,
        SpanStatus::Ok => Status::Ok,
        SpanStatus::Error(message) => Status::error(message.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SpanKind;
    use crate::ExecutionContext;
    use opentelemetry_sdk::testing::trace::InMemorySpanExporter;

    #[test]
    fn test_value_conversion() {
        assert_eq!(otel_value(&Value::from("a")), OtelValue::from("a".to_string()));
        assert_eq!(otel_value(&Value::from(42)), OtelValue::from(42i64));
        assert_eq!(otel_value(&Value::from(0.5)), OtelValue::from(0.5));
        assert_eq!(otel_value(&Value::from(true)), OtelValue::from(true));
        assert_eq!(
            otel_value(&serde_json::json!({"a": 1})),
            OtelValue::from("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn test_status_conversion() {
        assert_eq!(status(&SpanStatus::Ok), Status::Ok);
        assert_eq!(status(&SpanStatus::Unset), Status::Unset);
        assert_eq!(
            status(&SpanStatus::Error("boom".to_string())),
            Status::error("boom")
        );
    }

    #[test]
    fn test_disabled_export_builds_no_sink() {
        let config = TelemetrySettings {
            enabled: false,
            ..TelemetrySettings::default()
        };
        assert!(init_sink(&config).is_none());
    }

    #[test]
    fn test_replayed_spans_keep_tree_and_status() {
        let exporter = InMemorySpanExporter::default();
        let sink = Arc::new(OtelSink::with_exporter(
            exporter.clone(),
            false,
            resource(&TelemetrySettings::default()),
        ));
        let ctx = ExecutionContext::with_sink(sink);

        let mut root = ctx.start_span("Workflow.run", SpanKind::Chain);
        root.set_input("hello");
        let mut child = ctx
            .with_parent(root.id())
            .start_span("Workflow.start", SpanKind::Chain);
        child.record_error(&Error::SimulatedFailure);
        child.set_status(SpanStatus::Error("Simulated exception for testing purposes".to_string()));
        child.end();
        root.set_status(SpanStatus::Ok);
        root.end();

        let records = ctx.spans();
        let exported = exporter.get_finished_spans().unwrap();
        assert_eq!(exported.len(), 2);

        let (child_data, root_data) = (&exported[0], &exported[1]);
        assert_eq!(root_data.name, "Workflow.run");
        assert_eq!(
            root_data.span_context.trace_id(),
            TraceId::from_bytes(*records[1].trace_id.as_bytes())
        );
        assert_eq!(child_data.span_context.trace_id(), root_data.span_context.trace_id());
        assert_eq!(child_data.parent_span_id, root_data.span_context.span_id());
        assert_eq!(root_data.parent_span_id, SpanId::INVALID);
        assert_eq!(root_data.status, Status::Ok);
        assert_eq!(
            child_data.status,
            Status::error("Simulated exception for testing purposes")
        );
        assert_eq!(child_data.events.events.len(), 1);
        assert!(root_data
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == "input.value" && kv.value == OtelValue::from("hello".to_string())));
        assert!(root_data
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == "openinference.span.kind"));
        assert_eq!(root_data.start_time, records[1].start_time);
    }
}
