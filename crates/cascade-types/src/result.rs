//! Step result types for Cascade workflow operations.
//!
//! A `StepResult` is produced once by its executor and then owned by the
//! execution context for the remainder of the run, read-only thereafter.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The result of a single executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepResult {
    /// Plain text, e.g. a provider response.
    Text { text: String },
    /// Structured value (parsed JSON, array, object).
    Value { value: Value },
    /// Result of a collection operation.
    Collection(CollectionResult),
    /// Result of a conditional step.
    Conditional(ConditionalResult),
    /// A recorded failure (written when `on_error: continue`).
    Error { message: String },
}

impl StepResult {
    /// The value a template reference `steps.<id>.output` resolves to.
    ///
    /// For collections and conditionals this is their `output` field; the
    /// full structure stays reachable under `steps.<id>.result`.
    pub fn primary_value(&self) -> Value {
        match self {
            StepResult::Text { text } => Value::String(text.clone()),
            StepResult::Value { value } => value.clone(),
            StepResult::Collection(c) => c.output.clone(),
            StepResult::Conditional(c) => c.output.clone(),
            StepResult::Error { message } => json!({ "error": message }),
        }
    }

    /// The full result structure for context storage and reporting.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<Value> for StepResult {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => StepResult::Text { text },
            other => StepResult::Value { value: other },
        }
    }
}

/// One element-level failure inside a collection operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemError {
    /// Original input index of the failing element.
    pub index: usize,
    pub message: String,
}

/// Timing and accounting for a collection operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub duration_ms: u64,
    pub batch_count: usize,
    /// Total element re-attempts under the `retry` policy.
    pub items_retried: u32,
    /// `errors / input_count`; 0.0 when the input is empty.
    pub error_rate: f64,
}

/// Result of a collection (map/filter/reduce) operation.
///
/// Invariant: for map, `output[i]` corresponds to `input[i]` regardless of
/// completion order; skipped elements leave a `null` slot and an entry in
/// `errors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionResult {
    pub output: Value,
    pub operation: String,
    pub input_count: usize,
    pub output_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ItemError>,
    pub processing_stats: ProcessingStats,
}

impl CollectionResult {
    /// `errors / input_count`, defined as 0.0 for empty input.
    pub fn error_rate(error_count: usize, input_count: usize) -> f64 {
        if input_count == 0 {
            0.0
        } else {
            error_count as f64 / input_count as f64
        }
    }
}

/// Result of a conditional step.
///
/// Invariant: at most one branch executes per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalResult {
    /// The executed branch's last step result, or null.
    pub output: Value,
    /// The winning predicate's value; null when evaluation failed or no
    /// branch matched.
    pub condition_result: Option<bool>,
    /// Name of the executed branch, or null when none executed.
    pub executed_branch: Option<String>,
    /// Predicate evaluation failure message, if any.
    pub evaluation_error: Option<String>,
}
