//! Error types for workflow execution.

use thiserror::Error;

/// The main error type for workflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Deliberate fault injected by the intake step.
    #[error("Simulated exception for testing purposes")]
    SimulatedFailure,

    /// The chat provider could not be reached or answered with an error.
    #[error("Upstream call to {provider} failed: {message}")]
    Upstream {
        /// Provider that was being called (`openai`, `ollama`, ...).
        provider: String,
        /// Transport or provider error message.
        message: String,
    },

    /// A structured response was missing or did not match its schema.
    #[error("Failed to parse the guardrail response: {0}")]
    Parse(String),

    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An error occurred during execution, such as reading state out of order.
    #[error("Execution error: {0}")]
    Execution(String),
}

impl Error {
    /// Build an [`Error::Upstream`] for the given provider.
    pub fn upstream(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Upstream {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether the error came from the chat provider or its response.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::Upstream { .. } | Error::Parse(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// A specialized `Result` type for workflow operations.
pub type Result<T> = std::result::Result<T, Error>;
