//! Per-run workflow state and the stage sequence that fills it.
//!
//! Every stage receives the current state by value and hands back a
//! [`Transition`]: either the updated state, or the terminal reply together
//! with the final state. The driver commits a state by moving it into the
//! next stage, so nothing inside one run needs locking.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chat::ChatMessage;
use crate::guardrail::GuardrailVerdict;
use crate::{Error, Result};

/// The stages of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Turn the raw question into a user message.
    Intake,
    /// Ask the chat client for an answer.
    Generation,
    /// Validate the answer and pick the reply.
    Guardrail,
}

impl Stage {
    /// All stages in execution order.
    pub const ORDER: [Stage; 3] = [Stage::Intake, Stage::Generation, Stage::Guardrail];

    /// The stage that runs after this one.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Intake => Some(Stage::Generation),
            Stage::Generation => Some(Stage::Guardrail),
            Stage::Guardrail => None,
        }
    }

    /// Whether a failure in this stage ends the run with the fallback reply
    /// instead of propagating.
    ///
    /// Only intake recovers. Generation and guardrail failures surface to
    /// the caller.
    pub fn recovers_failures(&self) -> bool {
        matches!(self, Stage::Intake)
    }

    /// Suffix of the stage's span name.
    pub fn span_suffix(&self) -> &'static str {
        match self {
            Stage::Intake => "start",
            Stage::Generation => "assistant",
            Stage::Guardrail => "guardrail",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Intake => "intake",
            Stage::Generation => "generation",
            Stage::Guardrail => "guardrail",
        };
        f.write_str(name)
    }
}

/// Data carried between the stages of one run.
///
/// Each field is produced by exactly one stage. Reading a field before its
/// stage has run is an [`Error::Execution`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    user_message: Option<ChatMessage>,
    assistant_message: Option<ChatMessage>,
    guardrail_verdict: Option<GuardrailVerdict>,
}

impl WorkflowState {
    /// A fresh, empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The user message, set by intake.
    pub fn user_message(&self) -> Result<&ChatMessage> {
        self.user_message
            .as_ref()
            .ok_or_else(|| not_yet("user_message", Stage::Intake))
    }

    /// The assistant message, set by generation.
    pub fn assistant_message(&self) -> Result<&ChatMessage> {
        self.assistant_message
            .as_ref()
            .ok_or_else(|| not_yet("assistant_message", Stage::Generation))
    }

    /// The guardrail verdict, set by the guardrail stage.
    pub fn guardrail_verdict(&self) -> Result<&GuardrailVerdict> {
        self.guardrail_verdict
            .as_ref()
            .ok_or_else(|| not_yet("guardrail_verdict", Stage::Guardrail))
    }

    /// The state with the user message recorded.
    #[must_use]
    pub fn with_user_message(self, message: ChatMessage) -> Self {
        Self {
            user_message: Some(message),
            ..self
        }
    }

    /// The state with the assistant message recorded.
    #[must_use]
    pub fn with_assistant_message(self, message: ChatMessage) -> Self {
        Self {
            assistant_message: Some(message),
            ..self
        }
    }

    /// The state with the guardrail verdict recorded.
    #[must_use]
    pub fn with_guardrail_verdict(self, verdict: GuardrailVerdict) -> Self {
        Self {
            guardrail_verdict: Some(verdict),
            ..self
        }
    }
}

fn not_yet(field: &str, stage: Stage) -> Error {
    Error::Execution(format!("{field} read before the {stage} stage ran"))
}

/// Result of running one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Continue with the next stage using this state.
    Continue(WorkflowState),
    /// Stop the run with `output` as the reply.
    Complete {
        /// Final state of the run.
        state: WorkflowState,
        /// Reply for the caller.
        output: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let mut walked = vec![Stage::Intake];
        while let Some(next) = walked.last().unwrap().next() {
            walked.push(next);
        }
        assert_eq!(walked, Stage::ORDER.to_vec());
    }

    #[test]
    fn test_only_intake_recovers() {
        assert!(Stage::Intake.recovers_failures());
        assert!(!Stage::Generation.recovers_failures());
        assert!(!Stage::Guardrail.recovers_failures());
    }

    #[test]
    fn test_reading_before_production_fails() {
        let state = WorkflowState::new();
        let err = state.assistant_message().unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
        assert!(err.to_string().contains("generation"));

        let state = state.with_user_message(ChatMessage::user("hi"));
        assert_eq!(state.user_message().unwrap().content(), "hi");
        assert!(state.guardrail_verdict().is_err());
    }
}
