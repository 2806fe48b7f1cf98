//! Step-level error taxonomy for the execution engine.
//!
//! Every variant carries the originating step id so a run-level failure can
//! be traced without re-running the workflow. Propagation rules:
//! - `Transform` and unrecoverable `Provider` errors follow the owning
//!   step's `on_error` policy.
//! - `Validation` is only raised after the configured retry budget is
//!   exhausted.
//! - `ConditionEvaluation` is governed solely by `on_condition_error`.
//! - `ItemProcessing` is contained within the collection operator and
//!   never aborts sibling elements unless the policy is `stop`.

use cascade_types::llm::LlmError;
use cascade_types::result::ItemError;

use super::template::TemplateError;
use super::transform::TransformError;

/// Errors produced while executing a single workflow step.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Unresolvable reference or render failure in a dynamic field.
    #[error("template error in step '{step_id}': {source}")]
    Template {
        step_id: String,
        #[source]
        source: TemplateError,
    },

    /// Transport/timeout/provider-side failure after transport retries.
    #[error("provider error in step '{step_id}': {source}")]
    Provider {
        step_id: String,
        #[source]
        source: LlmError,
    },

    /// Schema/validator mismatch after exhausting the validation budget.
    #[error("validation failed in step '{step_id}' after {attempts} attempt(s): {}", errors.join("; "))]
    Validation {
        step_id: String,
        attempts: u32,
        errors: Vec<String>,
    },

    /// Malformed input to a deterministic text operation.
    #[error("transform error in step '{step_id}': {source}")]
    Transform {
        step_id: String,
        #[source]
        source: TransformError,
    },

    /// A predicate failed to evaluate.
    #[error("condition evaluation failed in step '{step_id}': {message}")]
    ConditionEvaluation { step_id: String, message: String },

    /// Element-level failure(s) inside a collection operation.
    #[error("collection step '{step_id}' failed: {} item error(s)", errors.len())]
    ItemProcessing {
        step_id: String,
        errors: Vec<ItemError>,
    },

    /// The run was cancelled while this step was pending or in flight.
    #[error("step '{step_id}' cancelled")]
    Cancelled { step_id: String },
}

impl StepError {
    /// The id of the step this error originated in.
    pub fn step_id(&self) -> &str {
        match self {
            StepError::Template { step_id, .. }
            | StepError::Provider { step_id, .. }
            | StepError::Validation { step_id, .. }
            | StepError::Transform { step_id, .. }
            | StepError::ConditionEvaluation { step_id, .. }
            | StepError::ItemProcessing { step_id, .. }
            | StepError::Cancelled { step_id } => step_id,
        }
    }

    /// Short machine-readable kind, used in recorded error results.
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::Template { .. } => "template",
            StepError::Provider { .. } => "provider",
            StepError::Validation { .. } => "validation",
            StepError::Transform { .. } => "transform",
            StepError::ConditionEvaluation { .. } => "condition_evaluation",
            StepError::ItemProcessing { .. } => "item_processing",
            StepError::Cancelled { .. } => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_error_exposes_origin() {
        let err = StepError::ConditionEvaluation {
            step_id: "route".to_string(),
            message: "unknown variable".to_string(),
        };
        assert_eq!(err.step_id(), "route");
        assert_eq!(err.kind(), "condition_evaluation");
        assert!(err.to_string().contains("route"));
    }

    #[test]
    fn item_processing_reports_count() {
        let err = StepError::ItemProcessing {
            step_id: "fanout".to_string(),
            errors: vec![
                ItemError {
                    index: 2,
                    message: "boom".to_string(),
                },
                ItemError {
                    index: 5,
                    message: "boom".to_string(),
                },
            ],
        };
        assert!(err.to_string().contains("2 item error(s)"));
    }
}
