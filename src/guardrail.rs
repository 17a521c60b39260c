//! Guardrail schema and the fixed texts of the workflow.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// System prompt prepended to every question.
pub const ASSISTANT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant but sarcastic when the question is dumb.";

/// Reply returned instead of an answer the guardrail rejected.
pub const GUARDRAIL_FAILURE_MESSAGE: &str =
    "I'm sorry, I cannot assist with that request because my response was flagged as inappropriate.";

/// Reply returned when a run fails in a stage that recovers its failures.
pub const FALLBACK_MESSAGE: &str = "An error occurred while processing your request.";

/// Non-toxic output validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GuardrailVerdict {
    /// Indicates if the assistant's message is compliant with non-toxicity standards
    pub is_compliant: bool,
    /// Reasoning behind the compliance decision
    pub reasoning: String,
}

impl GuardrailVerdict {
    /// The reply to send: the answer itself when compliant, the refusal otherwise.
    pub fn resolve<'a>(&self, assistant_content: &'a str) -> &'a str {
        if self.is_compliant {
            assistant_content
        } else {
            GUARDRAIL_FAILURE_MESSAGE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::OutputSchema;

    #[test]
    fn test_resolve() {
        let ok = GuardrailVerdict {
            is_compliant: true,
            reasoning: "fine".to_string(),
        };
        let rejected = GuardrailVerdict {
            is_compliant: false,
            reasoning: "insulting".to_string(),
        };

        assert_eq!(ok.resolve("  Paris.\n"), "  Paris.\n");
        assert_eq!(rejected.resolve("Paris."), GUARDRAIL_FAILURE_MESSAGE);
    }

    #[test]
    fn test_schema_carries_descriptions() {
        let schema = OutputSchema::from_type::<GuardrailVerdict>();
        let props = &schema.schema["properties"];

        assert_eq!(schema.name, "GuardrailVerdict");
        assert_eq!(props["is_compliant"]["type"], "boolean");
        assert_eq!(props["reasoning"]["type"], "string");
        assert_eq!(
            props["is_compliant"]["description"],
            "Indicates if the assistant's message is compliant with non-toxicity standards"
        );
        assert_eq!(schema.schema["additionalProperties"], false);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let parsed: Result<GuardrailVerdict, _> = serde_json::from_value(serde_json::json!({
            "is_compliant": true,
            "reasoning": "",
            "score": 3
        }));
        assert!(parsed.is_err());
    }
}
