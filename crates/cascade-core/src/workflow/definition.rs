//! Workflow definition parsing, validation, and filesystem loading.
//!
//! Converts YAML files into the canonical `WorkflowDefinition` IR and
//! validates structural constraints (unique IDs across all nested
//! sequences, name format, per-variant field rules) once at load time, so
//! the engine dispatches by variant without re-checking shapes at run
//! time. Also hosts the provider-free template checks behind `validate`.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;

use cascade_types::validation::MAX_VALIDATION_RETRIES;
use cascade_types::workflow::{
    CollectionOp, ConditionalStep, Step, StepConfig, TransformMethod, WorkflowDefinition,
};

use super::template::TemplateEngine;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading a workflow definition.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A dynamic field failed the template syntax check.
    #[error("template check failed in step '{step_id}': {message}")]
    TemplateCheck { step_id: String, message: String },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
///
/// Runs `validate_definition` after deserialization, so the returned value
/// is guaranteed to be structurally valid.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Load a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name format (starts with a letter; ASCII letters, digits, hyphens,
///   underscores only)
/// - At least one step; step IDs unique across all nested sequences
/// - Per-variant field rules (selector exclusivity, regex compilation,
///   conditional shape, validation retry bounds, concurrency minimums)
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    validate_name(&def.name)?;

    if def.steps.is_empty() {
        return Err(WorkflowError::Validation(
            "workflow must have at least one step".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    validate_sequence(&def.steps, &mut seen_ids)?;

    Ok(())
}

fn validate_name(name: &str) -> Result<(), WorkflowError> {
    if name.is_empty() {
        return Err(WorkflowError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }
    if !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return Err(WorkflowError::Validation(format!(
            "workflow name '{name}' must start with a letter"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(WorkflowError::Validation(format!(
            "workflow name '{name}' contains invalid characters \
             (only ASCII letters, digits, hyphens, and underscores allowed)"
        )));
    }
    Ok(())
}

/// Validate one sequence and recurse into nested ones. `seen_ids` spans
/// the whole definition: re-using an id anywhere is a load-time error.
fn validate_sequence<'a>(
    steps: &'a [Step],
    seen_ids: &mut HashSet<&'a str>,
) -> Result<(), WorkflowError> {
    for step in steps {
        if step.id.is_empty() {
            return Err(WorkflowError::Validation(
                "step ID must not be empty".to_string(),
            ));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(WorkflowError::Validation(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
        validate_step_config(step, seen_ids)?;
    }
    Ok(())
}

fn validate_step_config<'a>(
    step: &'a Step,
    seen_ids: &mut HashSet<&'a str>,
) -> Result<(), WorkflowError> {
    match &step.config {
        StepConfig::AiCall(ai) => {
            if let Some(t) = ai.temperature {
                if !(0.0..=2.0).contains(&t) {
                    return Err(WorkflowError::Validation(format!(
                        "step '{}': temperature {t} outside 0.0-2.0",
                        step.id
                    )));
                }
            }
            if let Some(validation) = &ai.validation {
                if validation.max_retries > MAX_VALIDATION_RETRIES {
                    return Err(WorkflowError::Validation(format!(
                        "step '{}': validation max_retries {} exceeds maximum {}",
                        step.id, validation.max_retries, MAX_VALIDATION_RETRIES
                    )));
                }
                if let Some(pattern) = &validation.extract_json_pattern {
                    check_regex(&step.id, pattern)?;
                }
            }
        }
        StepConfig::TextProcess(tp) => validate_transform(&step.id, &tp.method)?,
        StepConfig::Collection(c) => {
            if c.concurrency.max_parallel == Some(0) {
                return Err(WorkflowError::Validation(format!(
                    "step '{}': max_parallel must be >= 1",
                    step.id
                )));
            }
            if c.concurrency.batch_size == Some(0) {
                return Err(WorkflowError::Validation(format!(
                    "step '{}': batch_size must be >= 1",
                    step.id
                )));
            }
            match &c.operation {
                CollectionOp::Map { steps } => {
                    if steps.is_empty() {
                        return Err(WorkflowError::Validation(format!(
                            "step '{}': map requires a non-empty 'steps' sequence",
                            step.id
                        )));
                    }
                    validate_sequence(steps, seen_ids)?;
                }
                CollectionOp::Filter { condition, steps } => {
                    if condition.is_none() && steps.is_empty() {
                        return Err(WorkflowError::Validation(format!(
                            "step '{}': filter requires 'condition' or 'steps'",
                            step.id
                        )));
                    }
                    validate_sequence(steps, seen_ids)?;
                }
                CollectionOp::Reduce { steps, .. } => {
                    if steps.is_empty() {
                        return Err(WorkflowError::Validation(format!(
                            "step '{}': reduce requires a non-empty 'steps' sequence",
                            step.id
                        )));
                    }
                    validate_sequence(steps, seen_ids)?;
                }
            }
        }
        StepConfig::Conditional(c) => validate_conditional(&step.id, c, seen_ids)?,
    }
    Ok(())
}

fn validate_transform(step_id: &str, method: &TransformMethod) -> Result<(), WorkflowError> {
    match method {
        TransformMethod::Split { separator, .. } => {
            if separator.is_empty() {
                return Err(WorkflowError::Validation(format!(
                    "step '{step_id}': split separator must not be empty"
                )));
            }
        }
        TransformMethod::RegexExtract { pattern, .. } => check_regex(step_id, pattern)?,
        TransformMethod::SelectItem {
            index,
            slice,
            condition,
        } => {
            let selectors = [index.is_some(), slice.is_some(), condition.is_some()]
                .iter()
                .filter(|s| **s)
                .count();
            if selectors != 1 {
                return Err(WorkflowError::Validation(format!(
                    "step '{step_id}': exactly one of 'index', 'slice', or 'condition' \
                     must be specified"
                )));
            }
        }
        TransformMethod::Replace { replacements } => {
            for rule in replacements {
                match (&rule.from, &rule.pattern) {
                    (Some(_), None) => {}
                    (None, Some(pattern)) => check_regex(step_id, pattern)?,
                    _ => {
                        return Err(WorkflowError::Validation(format!(
                            "step '{step_id}': each replacement needs exactly one of \
                             'from' or 'pattern'"
                        )));
                    }
                }
            }
        }
        TransformMethod::ExtractBetweenMarker { begin, end, .. } => {
            if begin.is_empty() || end.is_empty() {
                return Err(WorkflowError::Validation(format!(
                    "step '{step_id}': extraction markers must not be empty"
                )));
            }
        }
        TransformMethod::ParseJson { .. } => {}
    }
    Ok(())
}

fn validate_conditional<'a>(
    step_id: &str,
    c: &'a ConditionalStep,
    seen_ids: &mut HashSet<&'a str>,
) -> Result<(), WorkflowError> {
    let has_simple = c.condition.is_some();
    let has_multi = c.conditions.is_some();

    if has_simple && has_multi {
        return Err(WorkflowError::Validation(format!(
            "step '{step_id}': cannot use both 'condition' and 'conditions'"
        )));
    }
    if !has_simple && !has_multi {
        return Err(WorkflowError::Validation(format!(
            "step '{step_id}': either 'condition' or 'conditions' must be provided"
        )));
    }

    if has_simple {
        if c.if_true.is_none() {
            return Err(WorkflowError::Validation(format!(
                "step '{step_id}': 'if_true' must be provided with 'condition'"
            )));
        }
        for steps in [c.if_true.as_deref(), c.if_false.as_deref()].into_iter().flatten() {
            validate_sequence(steps, seen_ids)?;
        }
        return Ok(());
    }

    let branches = c.conditions.as_deref().unwrap_or_default();
    if branches.is_empty() {
        return Err(WorkflowError::Validation(format!(
            "step '{step_id}': 'conditions' must not be empty"
        )));
    }

    let mut names = HashSet::new();
    let mut defaults = 0;
    for branch in branches {
        if !names.insert(branch.name.as_str()) {
            return Err(WorkflowError::Validation(format!(
                "step '{step_id}': duplicate branch name '{}'",
                branch.name
            )));
        }
        if branch.default {
            defaults += 1;
        } else if branch.condition.trim().is_empty() {
            return Err(WorkflowError::Validation(format!(
                "step '{step_id}': branch '{}' needs a non-empty condition",
                branch.name
            )));
        }
        validate_sequence(&branch.steps, seen_ids)?;
    }
    if defaults > 1 {
        return Err(WorkflowError::Validation(format!(
            "step '{step_id}': only one default branch is allowed"
        )));
    }

    Ok(())
}

fn check_regex(step_id: &str, pattern: &str) -> Result<(), WorkflowError> {
    Regex::new(pattern).map_err(|e| {
        WorkflowError::Validation(format!(
            "step '{step_id}': invalid regex pattern '{pattern}': {e}"
        ))
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Template checks (used by `validate`, no provider involved)
// ---------------------------------------------------------------------------

/// Check every dynamic field in the definition for template syntax errors:
/// balanced delimiters and non-empty expressions. Unresolved references
/// are not errors here since no input exists yet.
pub fn check_templates(
    def: &WorkflowDefinition,
    engine: &dyn TemplateEngine,
) -> Result<(), WorkflowError> {
    check_sequence_templates(&def.steps, engine)?;
    if let Some(output) = &def.output {
        if let Some(template) = &output.template {
            engine
                .check_syntax(template)
                .map_err(|e| WorkflowError::TemplateCheck {
                    step_id: "output".to_string(),
                    message: e.to_string(),
                })?;
        }
    }
    Ok(())
}

fn check_sequence_templates(
    steps: &[Step],
    engine: &dyn TemplateEngine,
) -> Result<(), WorkflowError> {
    for step in steps {
        let check = |template: &str| -> Result<(), WorkflowError> {
            engine
                .check_syntax(template)
                .map_err(|e| WorkflowError::TemplateCheck {
                    step_id: step.id.clone(),
                    message: e.to_string(),
                })
        };
        match &step.config {
            StepConfig::AiCall(ai) => check(&ai.prompt)?,
            StepConfig::TextProcess(tp) => check(&tp.input)?,
            StepConfig::Collection(c) => {
                check(&c.input)?;
                match &c.operation {
                    CollectionOp::Map { steps } => check_sequence_templates(steps, engine)?,
                    CollectionOp::Filter { steps, .. } => {
                        check_sequence_templates(steps, engine)?
                    }
                    CollectionOp::Reduce { steps, .. } => {
                        check_sequence_templates(steps, engine)?
                    }
                }
            }
            StepConfig::Conditional(c) => {
                for steps in [c.if_true.as_deref(), c.if_false.as_deref()]
                    .into_iter()
                    .flatten()
                {
                    check_sequence_templates(steps, engine)?;
                }
                for branch in c.conditions.as_deref().unwrap_or_default() {
                    check_sequence_templates(&branch.steps, engine)?;
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
