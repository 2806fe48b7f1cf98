//! Workflow domain types for Cascade.
//!
//! Defines the canonical intermediate representation for workflows. YAML
//! files and programmatic construction both converge on
//! `WorkflowDefinition`; every step is a closed, internally tagged variant
//! so the engine dispatches by type rather than inspecting ad hoc keys at
//! run time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::validation::ValidationConfig;

// ---------------------------------------------------------------------------
// Workflow Definition (canonical IR)
// ---------------------------------------------------------------------------

/// The canonical workflow definition.
///
/// Immutable once loaded; structural validation runs at load time so the
/// engine can assume a well-formed definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Human-readable workflow name. Must start with a letter and contain
    /// only ASCII letters, digits, hyphens, and underscores.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Definition version string.
    #[serde(default = "default_version")]
    pub version: String,
    /// Declared caller inputs; used to check and default the `--input` JSON.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_parameters: Vec<InputParameter>,
    /// Ordered list of steps. A step never begins before its predecessor's
    /// result is committed to the context.
    pub steps: Vec<Step>,
    /// Optional final output rendering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputFormat>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// A declared input parameter for a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Default value used when the caller omits this parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_true() -> bool {
    true
}

/// Declared type of an input parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
}

/// How the final workflow output is rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFormat {
    #[serde(default)]
    pub format: OutputKind,
    /// Template rendered against the finished context; when absent, the
    /// last step's result is the run output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// Output encoding for the final result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    #[default]
    Text,
    Json,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single step in a workflow sequence.
///
/// The variant-specific fields sit alongside `id`/`on_error` in the YAML:
/// ```yaml
/// - id: summarize
///   type: ai_call
///   prompt: "Summarize: {{ steps.gather.output }}"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step ID, unique within its enclosing sequence.
    pub id: String,
    /// What to do when this step fails.
    #[serde(default)]
    pub on_error: ErrorPolicy,
    #[serde(flatten)]
    pub config: StepConfig,
}

/// Step-level error policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Abort the entire run.
    #[default]
    Stop,
    /// Record the error as the step's result and proceed.
    Continue,
    /// Abort only the current sequence, keeping committed results.
    SkipRemaining,
}

/// Step-specific configuration, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    /// Call the generative-text provider with a rendered prompt.
    AiCall(AiCallStep),
    /// Deterministic text/array/JSON transform.
    TextProcess(TextProcessStep),
    /// map/filter/reduce over an array input.
    Collection(CollectionStep),
    /// Predicate-selected branch execution.
    Conditional(ConditionalStep),
}

// ---------------------------------------------------------------------------
// AI call step
// ---------------------------------------------------------------------------

/// Generative provider call step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiCallStep {
    /// Prompt template rendered against the execution context.
    pub prompt: String,
    /// Override the run's default model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature (0.0 - 2.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Budget for re-requesting continuations of truncated responses.
    /// Falls back to the run config default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_auto_retry_attempts: Option<u32>,
    /// Schema validation and bounded retry of the provider output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationConfig>,
}

// ---------------------------------------------------------------------------
// Text process step
// ---------------------------------------------------------------------------

/// Deterministic text transform step. Pure: no I/O, no retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextProcessStep {
    /// Input template rendered against the execution context.
    pub input: String,
    #[serde(flatten)]
    pub method: TransformMethod,
}

/// Transform configuration, tagged by `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TransformMethod {
    /// Split a string by a separator.
    Split {
        separator: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_splits: Option<usize>,
    },
    /// Extract text bounded by begin/end markers.
    ExtractBetweenMarker {
        begin: String,
        end: String,
        /// Extract every occurrence instead of just the first.
        #[serde(default)]
        extract_all: bool,
    },
    /// Extract text by regex pattern.
    RegexExtract {
        pattern: String,
        /// Capture group to extract (index or name). Whole match when unset.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<GroupRef>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        flags: Vec<RegexFlag>,
        #[serde(default)]
        output_format: ExtractFormat,
    },
    /// Select element(s) from an array by index, slice, or predicate.
    SelectItem {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<i64>,
        /// Slice notation, e.g. "1:3", ":2", "1:".
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slice: Option<String>,
        /// Predicate expression over `item`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
    },
    /// Parse input as JSON with optional schema check.
    ParseJson {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<Value>,
        /// Fail the step on schema mismatch instead of reporting metadata.
        #[serde(default)]
        strict_validation: bool,
    },
    /// Substring / regex replacement.
    Replace { replacements: Vec<Replacement> },
}

/// Reference to a regex capture group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupRef {
    Index(usize),
    Name(String),
}

/// Regex compilation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegexFlag {
    IgnoreCase,
    Multiline,
    DotAll,
}

/// Whether regex extraction yields one string or all matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractFormat {
    #[default]
    String,
    Array,
}

/// A single replacement rule: literal `from` or regex `pattern`, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replacement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub to: String,
}

// ---------------------------------------------------------------------------
// Collection step
// ---------------------------------------------------------------------------

/// Collection operation over an array-shaped input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionStep {
    /// Template resolving to the input array.
    pub input: String,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub error_handling: CollectionErrorHandling,
    #[serde(flatten)]
    pub operation: CollectionOp,
}

/// Operation kind, tagged by `operation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum CollectionOp {
    /// Transform every element through a nested step sequence.
    Map { steps: Vec<Step> },
    /// Keep elements whose predicate (or nested sequence result) is true.
    Filter {
        /// Predicate expression over `item`. Optional when `steps` is set.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        steps: Vec<Step>,
    },
    /// Sequentially fold elements into an accumulator.
    Reduce {
        steps: Vec<Step>,
        #[serde(default)]
        initial_value: Value,
        #[serde(default = "default_accumulator_var")]
        accumulator_var: String,
        #[serde(default = "default_item_var")]
        item_var: String,
    },
}

fn default_accumulator_var() -> String {
    "acc".to_string()
}

fn default_item_var() -> String {
    "item".to_string()
}

impl CollectionOp {
    /// Operation name as it appears in definitions and results.
    pub fn name(&self) -> &'static str {
        match self {
            CollectionOp::Map { .. } => "map",
            CollectionOp::Filter { .. } => "filter",
            CollectionOp::Reduce { .. } => "reduce",
        }
    }
}

/// Bounded-parallelism settings for map/filter. `reduce` ignores these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Maximum concurrently executing element-pipelines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
    /// Elements per batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Delay inserted between the start of successive batches.
    #[serde(default)]
    pub delay_between_batches: u64,
}

/// Error handling for collection operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionErrorHandling {
    #[serde(default)]
    pub on_item_failure: ItemFailurePolicy,
    #[serde(default)]
    pub on_condition_error: ConditionErrorAction,
    /// Retries per element before falling back to skip/stop semantics.
    #[serde(default = "default_max_retries_per_item")]
    pub max_retries_per_item: u32,
}

impl Default for CollectionErrorHandling {
    fn default() -> Self {
        Self {
            on_item_failure: ItemFailurePolicy::default(),
            on_condition_error: ConditionErrorAction::default(),
            max_retries_per_item: default_max_retries_per_item(),
        }
    }
}

fn default_max_retries_per_item() -> u32 {
    2
}

/// Action when an individual element's pipeline fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemFailurePolicy {
    /// Omit the element's slot and record an error entry.
    #[default]
    Skip,
    /// Cancel all in-flight and not-yet-started element-pipelines.
    Stop,
    /// Re-attempt the failing element before falling back to skip/stop.
    Retry,
}

/// Action when a filter predicate fails to evaluate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionErrorAction {
    /// Exclude the element.
    #[default]
    SkipItem,
    /// Abort the whole operation.
    Stop,
    /// Treat the predicate as false without aborting.
    DefaultFalse,
}

// ---------------------------------------------------------------------------
// Conditional step
// ---------------------------------------------------------------------------

/// Conditional execution: simple if/else or an ordered multi-branch list.
/// Exactly one of the two forms must be used; at most one branch executes
/// per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalStep {
    /// Simple-form predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_true: Option<Vec<Step>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_false: Option<Vec<Step>>,
    /// Multi-branch form: predicates evaluated in order, first true wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<ConditionalBranch>>,
    /// Governs predicate evaluation failures; never the step's `on_error`.
    #[serde(default)]
    pub on_condition_error: ConditionErrorPolicy,
}

/// One branch of a multi-branch conditional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalBranch {
    /// Branch name, reported as `executed_branch`.
    pub name: String,
    /// Predicate expression. Empty only for the default branch.
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub default: bool,
    pub steps: Vec<Step>,
}

/// Action when a conditional predicate fails to evaluate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionErrorPolicy {
    /// Abort (default).
    #[default]
    Stop,
    /// Treat the failing predicate as false and move on.
    Continue,
    /// Abort only this conditional step's own evaluation.
    SkipRemaining,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
