//! Per-run counters: chat calls, token usage, completed stages, failures.

use serde::{Deserialize, Serialize};

use crate::chat::TokenUsage;

/// Counters collected while one workflow run executes.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub prompt_token_count: usize,
    pub completion_token_count: usize,
    pub total_token_count: usize,
    /// Chat client calls, including those that reported no usage.
    pub llm_calls: usize,
    /// Instrumented steps that returned successfully.
    pub steps_completed: usize,
    /// `"<step>: <error>"` for every step that failed, in order.
    pub failures: Vec<String>,
}

impl WorkflowMetrics {
    /// Count one chat call and add the tokens it reported, if any.
    pub fn record_completion(&mut self, usage: Option<&TokenUsage>) {
        self.llm_calls += 1;
        if let Some(usage) = usage {
            self.prompt_token_count += usage.prompt_tokens;
            self.completion_token_count += usage.completion_tokens;
            self.total_token_count += usage.total();
        }
    }

    pub fn record_step(&mut self) {
        self.steps_completed += 1;
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.failures.push(error.into());
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_token_count
    }
}
