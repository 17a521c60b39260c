//! Events driving the step-graph form of the workflow.
//!
//! In the event-driven driver every stage consumes one event and produces the
//! next one. Dispatched events are also appended, timestamped, to the run's
//! event log.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::state::Stage;

/// Events exchanged between the stages of a workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WorkflowEvent {
    /// A run was requested for the given question.
    Start {
        /// Raw question text as received.
        user_question: String,
    },
    /// The user message is in the state; an answer is needed.
    Assistant,
    /// An answer is in the state; it needs validating.
    Guardrail,
    /// The run finished with the given reply.
    Stop {
        /// Final text returned to the caller.
        result: String,
    },
}

impl WorkflowEvent {
    /// The stage that consumes this event, `None` for [`WorkflowEvent::Stop`].
    pub fn stage(&self) -> Option<Stage> {
        match self {
            WorkflowEvent::Start { .. } => Some(Stage::Intake),
            WorkflowEvent::Assistant => Some(Stage::Generation),
            WorkflowEvent::Guardrail => Some(Stage::Guardrail),
            WorkflowEvent::Stop { .. } => None,
        }
    }

    /// The event a stage emits when it hands over to `next`.
    pub fn entering(next: Stage) -> Option<Self> {
        match next {
            Stage::Intake => None,
            Stage::Generation => Some(WorkflowEvent::Assistant),
            Stage::Guardrail => Some(WorkflowEvent::Guardrail),
        }
    }

    /// Short name used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowEvent::Start { .. } => "start",
            WorkflowEvent::Assistant => "assistant",
            WorkflowEvent::Guardrail => "guardrail",
            WorkflowEvent::Stop { .. } => "stop",
        }
    }
}

/// A timestamped entry of the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Unix epoch timestamp in milliseconds when this event was dispatched.
    pub timestamp: u128,
    /// The workflow event that was dispatched.
    #[serde(flatten)]
    pub event: WorkflowEvent,
}

impl TraceEntry {
    /// Create a new trace entry with the current timestamp.
    #[must_use]
    pub fn new(event: WorkflowEvent) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self { timestamp, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_entry_serialization() {
        let entry = TraceEntry::new(WorkflowEvent::Start {
            user_question: "why is the sky blue?".to_string(),
        });

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"type\":\"Start\""));
        assert!(json.contains("\"user_question\":\"why is the sky blue?\""));
        assert!(json.contains("\"timestamp\":"));
    }

    #[test]
    fn test_events_follow_stage_order() {
        let start = WorkflowEvent::Start {
            user_question: "hi".to_string(),
        };
        assert_eq!(start.stage(), Some(Stage::Intake));

        let next = WorkflowEvent::entering(Stage::Intake.next().unwrap()).unwrap();
        assert_eq!(next, WorkflowEvent::Assistant);
        assert_eq!(next.stage(), Some(Stage::Generation));

        let last = WorkflowEvent::entering(Stage::Generation.next().unwrap()).unwrap();
        assert_eq!(last.stage(), Some(Stage::Guardrail));
        assert!(Stage::Guardrail.next().is_none());
        assert!(WorkflowEvent::Stop { result: String::new() }.stage().is_none());
    }
}
