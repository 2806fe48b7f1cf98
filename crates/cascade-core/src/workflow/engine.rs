//! Sequential workflow execution engine.
//!
//! Walks the ordered step list, resolving each step's dynamic fields
//! against the current context, dispatching to the step-specific executor,
//! and committing the result to `steps[id]` before moving on. Nested
//! sequences (collection element-pipelines, conditional branches) recurse
//! through the same algorithm with an extended context.
//!
//! Terminal states are `Completed(output)` or `Failed(error, partial
//! steps)`; the run is single-pass with no intermediate paused state.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cascade_types::config::RunConfig;
use cascade_types::llm::UsageSummary;
use cascade_types::result::StepResult;
use cascade_types::workflow::{
    ErrorPolicy, OutputKind, ParameterType, Step, StepConfig, WorkflowDefinition,
};

use crate::llm::BoxProvider;

use super::collection::run_collection;
use super::conditional::run_conditional;
use super::context::ExecutionContext;
use super::error::StepError;
use super::generative::GenerativeExecutor;
use super::template::{JexlTemplateEngine, TemplateEngine};
use super::transform;

// ---------------------------------------------------------------------------
// Run outcome types
// ---------------------------------------------------------------------------

/// A completed run.
#[derive(Debug)]
pub struct RunResult {
    pub run_id: Uuid,
    pub workflow_name: String,
    /// Final output: the rendered output template when the workflow
    /// declares one, else the last step's result.
    pub output: Value,
    /// Full results of every committed step, keyed by id.
    pub steps: HashMap<String, Value>,
    /// Aggregated provider usage across the whole run.
    pub usage: UsageSummary,
}

/// A failed run, carrying everything committed before the failure.
#[derive(Debug, thiserror::Error)]
pub enum RunFailure {
    /// Caller-supplied input did not satisfy the declared parameters.
    #[error("input error: {0}")]
    Input(String),

    /// A step failed with `on_error: stop` (or the output failed to render).
    #[error("{error}")]
    Step {
        error: StepError,
        partial_steps: HashMap<String, Value>,
        usage: UsageSummary,
    },
}

/// Result of executing one (possibly nested) step sequence.
pub(crate) struct SequenceOutcome {
    /// The last committed step result in this sequence.
    pub last: Option<StepResult>,
    /// True when `skip_remaining` ended the sequence early.
    #[allow(dead_code)]
    pub skipped_remaining: bool,
}

impl SequenceOutcome {
    /// The sequence's final value (null when no step ran).
    pub fn last_value(&self) -> Value {
        self.last
            .as_ref()
            .map(|r| r.primary_value())
            .unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// The execution engine. Holds the provider, the injected template
/// capability, and the immutable run configuration; per-run state lives in
/// the `ExecutionContext` and is never shared across runs.
pub struct WorkflowEngine {
    provider: BoxProvider,
    template: Arc<dyn TemplateEngine>,
    config: RunConfig,
}

impl WorkflowEngine {
    /// Create an engine with the default JEXL template dialect.
    pub fn new(provider: BoxProvider, config: RunConfig) -> Self {
        Self {
            provider,
            template: Arc::new(JexlTemplateEngine::new()),
            config,
        }
    }

    /// Swap in a different template/expression implementation.
    pub fn with_template_engine(mut self, template: Arc<dyn TemplateEngine>) -> Self {
        self.template = template;
        self
    }

    pub(crate) fn template(&self) -> &dyn TemplateEngine {
        self.template.as_ref()
    }

    pub(crate) fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute a workflow with caller-supplied input bindings.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        input: Map<String, Value>,
    ) -> Result<RunResult, RunFailure> {
        let input = apply_input_parameters(definition, input).map_err(RunFailure::Input)?;

        let run_id = Uuid::now_v7();
        let mut ctx = ExecutionContext::new(&definition.name, run_id, input);
        let cancel = CancellationToken::new();

        tracing::info!(
            run_id = %run_id,
            workflow = definition.name.as_str(),
            steps = definition.steps.len(),
            "starting workflow run"
        );

        let outcome = match self
            .execute_sequence(&definition.steps, &mut ctx, &cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(run_id = %run_id, error = %error, "workflow run failed");
                return Err(RunFailure::Step {
                    error,
                    partial_steps: ctx.step_values(),
                    usage: ctx.usage_summary(),
                });
            }
        };

        let output = match self.render_output(definition, &ctx, &outcome) {
            Ok(output) => output,
            Err(error) => {
                return Err(RunFailure::Step {
                    error,
                    partial_steps: ctx.step_values(),
                    usage: ctx.usage_summary(),
                });
            }
        };

        tracing::info!(run_id = %run_id, "workflow run completed");

        Ok(RunResult {
            run_id,
            workflow_name: definition.name.clone(),
            output,
            steps: ctx.step_values(),
            usage: ctx.usage_summary(),
        })
    }

    /// Execute one step sequence in order, committing each result before
    /// the next step starts and applying per-step `on_error` policy.
    ///
    /// Boxed because collection and conditional steps recurse through it.
    pub(crate) fn execute_sequence<'a>(
        &'a self,
        steps: &'a [Step],
        ctx: &'a mut ExecutionContext,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<SequenceOutcome, StepError>> + Send + 'a>> {
        Box::pin(async move {
            let mut last: Option<StepResult> = None;
            for step in steps {
                if cancel.is_cancelled() {
                    return Err(StepError::Cancelled {
                        step_id: step.id.clone(),
                    });
                }

                match self.execute_step(step, ctx, cancel).await {
                    Ok(result) => {
                        ctx.set_step_output(&step.id, result.clone());
                        last = Some(result);
                    }
                    Err(error) => match step.on_error {
                        ErrorPolicy::Stop => return Err(error),
                        ErrorPolicy::Continue => {
                            tracing::warn!(
                                step_id = step.id.as_str(),
                                error = %error,
                                "step failed, continuing per policy"
                            );
                            let recorded = StepResult::Error {
                                message: format!("[{}] {error}", error.kind()),
                            };
                            ctx.set_step_output(&step.id, recorded.clone());
                            last = Some(recorded);
                        }
                        ErrorPolicy::SkipRemaining => {
                            tracing::warn!(
                                step_id = step.id.as_str(),
                                error = %error,
                                "step failed, skipping remaining steps in sequence"
                            );
                            let recorded = StepResult::Error {
                                message: format!("[{}] {error}", error.kind()),
                            };
                            ctx.set_step_output(&step.id, recorded.clone());
                            return Ok(SequenceOutcome {
                                last: Some(recorded),
                                skipped_remaining: true,
                            });
                        }
                    },
                }
            }
            Ok(SequenceOutcome {
                last,
                skipped_remaining: false,
            })
        })
    }

    async fn execute_step(
        &self,
        step: &Step,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<StepResult, StepError> {
        tracing::debug!(step_id = step.id.as_str(), "executing step");
        match &step.config {
            StepConfig::AiCall(ai) => {
                let prompt = self
                    .template
                    .render(&ai.prompt, &ctx.to_expression_context())
                    .map_err(|e| StepError::Template {
                        step_id: step.id.clone(),
                        source: e,
                    })?;
                GenerativeExecutor::new(&self.provider, &self.config)
                    .execute(&step.id, ai, prompt, ctx)
                    .await
            }
            StepConfig::TextProcess(tp) => {
                let input = self
                    .template
                    .resolve(&tp.input, &ctx.to_expression_context())
                    .map_err(|e| StepError::Template {
                        step_id: step.id.clone(),
                        source: e,
                    })?;
                let value = transform::apply(&tp.method, input, self.template.as_ref())
                    .map_err(|e| StepError::Transform {
                        step_id: step.id.clone(),
                        source: e,
                    })?;
                Ok(StepResult::from(value))
            }
            StepConfig::Collection(c) => run_collection(self, &step.id, c, ctx, cancel)
                .await
                .map(StepResult::Collection),
            StepConfig::Conditional(c) => run_conditional(self, &step.id, c, ctx, cancel)
                .await
                .map(StepResult::Conditional),
        }
    }

    fn render_output(
        &self,
        definition: &WorkflowDefinition,
        ctx: &ExecutionContext,
        outcome: &SequenceOutcome,
    ) -> Result<Value, StepError> {
        if let Some(output) = &definition.output {
            if let Some(template) = &output.template {
                let rendered = self
                    .template
                    .render(template, &ctx.to_expression_context())
                    .map_err(|e| StepError::Template {
                        step_id: "output".to_string(),
                        source: e,
                    })?;
                return Ok(match output.format {
                    OutputKind::Json => serde_json::from_str(&rendered)
                        .unwrap_or(Value::String(rendered)),
                    OutputKind::Text => Value::String(rendered),
                });
            }
        }
        Ok(outcome.last_value())
    }
}

// ---------------------------------------------------------------------------
// Input parameter handling
// ---------------------------------------------------------------------------

/// Check required parameters, apply declared defaults, and loosely type
/// check caller-supplied inputs.
fn apply_input_parameters(
    definition: &WorkflowDefinition,
    mut input: Map<String, Value>,
) -> Result<Map<String, Value>, String> {
    for param in &definition.input_parameters {
        match input.get(&param.name) {
            Some(value) => {
                if !parameter_type_matches(value, param.param_type) {
                    return Err(format!(
                        "input parameter '{}' has the wrong type (expected {:?})",
                        param.name, param.param_type
                    ));
                }
            }
            None => {
                if let Some(default) = &param.default {
                    input.insert(param.name.clone(), default.clone());
                } else if param.required {
                    return Err(format!(
                        "missing required input parameter '{}'",
                        param.name
                    ));
                }
            }
        }
    }
    Ok(input)
}

fn parameter_type_matches(value: &Value, param_type: ParameterType) -> bool {
    match param_type {
        ParameterType::String => value.is_string(),
        ParameterType::Integer => value.is_i64() || value.is_u64(),
        ParameterType::Float => value.is_number(),
        ParameterType::Boolean => value.is_boolean(),
        ParameterType::Array => value.is_array(),
        ParameterType::Object => value.is_object(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    use serde_json::json;

    use cascade_types::llm::FinishReason;

    use crate::llm::testing::{EchoProvider, ScriptedProvider, failing_turn, ok, turn};
    use crate::workflow::definition::parse_workflow_yaml;

    fn engine_with(provider: BoxProvider) -> WorkflowEngine {
        WorkflowEngine::new(provider, RunConfig::default())
    }

    fn input(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    // -------------------------------------------------------------------
    // Sequential execution and context threading
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_transform_pipeline_threads_results() {
        let yaml = r#"
name: pipeline
steps:
  - id: split
    type: text_process
    method: split
    input: "{{ input.text }}"
    separator: ","
  - id: pick
    type: text_process
    method: select_item
    input: "{{ steps.split.output }}"
    index: 1
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let engine = engine_with(BoxProvider::new(EchoProvider::instant()));

        let result = engine
            .execute(&def, input(&[("text", json!("a,b,c"))]))
            .await
            .unwrap();
        assert_eq!(result.output, json!("b"));
        assert_eq!(result.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_transform_only_pipeline_is_idempotent() {
        let yaml = r#"
name: deterministic
steps:
  - id: replace
    type: text_process
    method: replace
    input: "{{ input.text }}"
    replacements:
      - from: "cat"
        to: "dog"
  - id: extract
    type: text_process
    method: regex_extract
    input: "{{ steps.replace.output }}"
    pattern: "\\w+"
    output_format: array
output:
  format: text
  template: "{{ steps.extract.output }}"
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let engine = engine_with(BoxProvider::new(EchoProvider::instant()));

        let first = engine
            .execute(&def, input(&[("text", json!("the cat sat"))]))
            .await
            .unwrap()
            .output;
        let second = engine
            .execute(&def, input(&[("text", json!("the cat sat"))]))
            .await
            .unwrap()
            .output;
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first, json!("[\"the\",\"dog\",\"sat\"]"));
    }

    // -------------------------------------------------------------------
    // on_error policies
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_on_error_stop_fails_run_with_partials() {
        let yaml = r#"
name: stops
steps:
  - id: first
    type: text_process
    method: split
    input: "{{ input.text }}"
    separator: ","
  - id: boom
    type: text_process
    method: parse_json
    input: "{{ input.text }}"
  - id: never
    type: text_process
    method: split
    input: "{{ input.text }}"
    separator: ","
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let engine = engine_with(BoxProvider::new(EchoProvider::instant()));

        let failure = engine
            .execute(&def, input(&[("text", json!("not json"))]))
            .await
            .unwrap_err();
        match failure {
            RunFailure::Step {
                error,
                partial_steps,
                ..
            } => {
                assert_eq!(error.step_id(), "boom");
                assert!(partial_steps.contains_key("first"));
                assert!(!partial_steps.contains_key("never"));
            }
            other => panic!("expected step failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_on_error_continue_records_error_and_proceeds() {
        let yaml = r#"
name: continues
steps:
  - id: boom
    type: text_process
    method: parse_json
    input: "{{ input.text }}"
    on_error: continue
  - id: after
    type: text_process
    method: split
    input: "{{ input.text }}"
    separator: " "
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let engine = engine_with(BoxProvider::new(EchoProvider::instant()));

        let result = engine
            .execute(&def, input(&[("text", json!("not json"))]))
            .await
            .unwrap();
        assert_eq!(result.steps["boom"]["kind"], json!("error"));
        assert_eq!(result.output, json!(["not", "json"]));
    }

    #[tokio::test]
    async fn test_on_error_skip_remaining_ends_sequence() {
        let yaml = r#"
name: skips
steps:
  - id: boom
    type: text_process
    method: parse_json
    input: "{{ input.text }}"
    on_error: skip_remaining
  - id: never
    type: text_process
    method: split
    input: "{{ input.text }}"
    separator: " "
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let engine = engine_with(BoxProvider::new(EchoProvider::instant()));

        let result = engine
            .execute(&def, input(&[("text", json!("not json"))]))
            .await
            .unwrap();
        assert!(result.steps.contains_key("boom"));
        assert!(!result.steps.contains_key("never"));
    }

    // -------------------------------------------------------------------
    // Collection: order preservation under concurrency
    // -------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_map_output_order_is_input_order_despite_completion_order() {
        let yaml = r#"
name: fanout
steps:
  - id: expand
    type: collection
    operation: map
    input: "{{ input.items }}"
    concurrency:
      max_parallel: 4
      batch_size: 4
    steps:
      - id: echo
        type: ai_call
        prompt: "{{ item }}"
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        // Call i sleeps delays[i]: earlier elements complete last.
        let provider = StdArc::new(EchoProvider::new(&[400, 300, 200, 100]));
        let engine = engine_with(BoxProvider::new(StdArc::clone(&provider)));

        let result = engine
            .execute(&def, input(&[("items", json!(["a", "b", "c", "d"]))]))
            .await
            .unwrap();
        assert_eq!(
            result.output,
            json!(["echo:a", "echo:b", "echo:c", "echo:d"])
        );
        assert_eq!(provider.call_count(), 4);
        // Usage from every parallel pipeline landed in the run summary.
        assert_eq!(result.usage.total_api_calls, 4);
    }

    // -------------------------------------------------------------------
    // Collection: reduce over empty input
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_reduce_empty_input_returns_initial_without_calls() {
        let yaml = r#"
name: fold
steps:
  - id: total
    type: collection
    operation: reduce
    input: "{{ input.items }}"
    initial_value: "seed"
    steps:
      - id: merge
        type: ai_call
        prompt: "{{ acc }} + {{ item }}"
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let provider = StdArc::new(EchoProvider::instant());
        let engine = engine_with(BoxProvider::new(StdArc::clone(&provider)));

        let result = engine
            .execute(&def, input(&[("items", json!([]))]))
            .await
            .unwrap();
        assert_eq!(result.output, json!("seed"));
        assert_eq!(provider.call_count(), 0);

        // Open-question decision: zero entries means zero error rate.
        assert_eq!(
            result.steps["total"]["processing_stats"]["error_rate"],
            json!(0.0)
        );
    }

    #[tokio::test]
    async fn test_reduce_folds_in_input_order() {
        let yaml = r#"
name: fold
steps:
  - id: total
    type: collection
    operation: reduce
    input: "{{ input.items }}"
    initial_value: "seed"
    steps:
      - id: merge
        type: ai_call
        prompt: "{{ acc }}+{{ item }}"
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let engine = engine_with(BoxProvider::new(EchoProvider::instant()));

        let result = engine
            .execute(&def, input(&[("items", json!(["x", "y"]))]))
            .await
            .unwrap();
        // Second fold sees the first fold's echo as its accumulator.
        assert_eq!(result.output, json!("echo:echo:seed+x+y"));
    }

    // -------------------------------------------------------------------
    // Collection: failure policies
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_map_stop_policy_never_starts_later_elements() {
        let yaml = r#"
name: fanout
steps:
  - id: expand
    type: collection
    operation: map
    input: "{{ input.items }}"
    concurrency:
      max_parallel: 1
      batch_size: 1
    error_handling:
      on_item_failure: stop
    steps:
      - id: gen
        type: ai_call
        prompt: "{{ item }}"
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        // Elements 0 and 1 succeed, element 2 fails; 3..10 must never run.
        let provider = StdArc::new(ScriptedProvider::new(vec![
            turn(ok("one", FinishReason::Stop)),
            turn(ok("two", FinishReason::Stop)),
            failing_turn(cascade_types::llm::LlmError::AuthenticationFailed),
        ]));
        let engine = engine_with(BoxProvider::new(StdArc::clone(&provider)));

        let items: Vec<Value> = (0..10).map(|i| json!(format!("item-{i}"))).collect();
        let failure = engine
            .execute(&def, input(&[("items", json!(items))]))
            .await
            .unwrap_err();
        match failure {
            RunFailure::Step { error, .. } => {
                assert!(matches!(error, StepError::ItemProcessing { .. }), "got: {error}");
            }
            other => panic!("expected step failure, got {other:?}"),
        }
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_map_skip_policy_leaves_null_slot_and_error_entry() {
        let yaml = r#"
name: fanout
steps:
  - id: expand
    type: collection
    operation: map
    input: "{{ input.items }}"
    concurrency:
      max_parallel: 1
      batch_size: 1
    error_handling:
      on_item_failure: skip
    steps:
      - id: gen
        type: ai_call
        prompt: "{{ item }}"
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let provider = StdArc::new(ScriptedProvider::new(vec![
            turn(ok("one", FinishReason::Stop)),
            failing_turn(cascade_types::llm::LlmError::AuthenticationFailed),
            turn(ok("three", FinishReason::Stop)),
        ]));
        let engine = engine_with(BoxProvider::new(StdArc::clone(&provider)));

        let result = engine
            .execute(&def, input(&[("items", json!(["a", "b", "c"]))]))
            .await
            .unwrap();
        let collection = &result.steps["expand"];
        assert_eq!(collection["output"], json!(["one", null, "three"]));
        assert_eq!(collection["errors"][0]["index"], json!(1));
        assert_eq!(collection["output_count"], json!(2));
    }

    #[tokio::test]
    async fn test_map_retry_policy_reattempts_failing_element() {
        let yaml = r#"
name: fanout
steps:
  - id: expand
    type: collection
    operation: map
    input: "{{ input.items }}"
    concurrency:
      max_parallel: 1
      batch_size: 1
    error_handling:
      on_item_failure: retry
      max_retries_per_item: 1
    steps:
      - id: gen
        type: ai_call
        prompt: "{{ item }}"
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        // First attempt fails, the retry succeeds.
        let provider = StdArc::new(ScriptedProvider::new(vec![
            failing_turn(cascade_types::llm::LlmError::AuthenticationFailed),
            turn(ok("recovered", FinishReason::Stop)),
        ]));
        let engine = engine_with(BoxProvider::new(StdArc::clone(&provider)));

        let result = engine
            .execute(&def, input(&[("items", json!(["a"]))]))
            .await
            .unwrap();
        let collection = &result.steps["expand"];
        assert_eq!(collection["output"], json!(["recovered"]));
        assert_eq!(collection["processing_stats"]["items_retried"], json!(1));
    }

    // -------------------------------------------------------------------
    // Collection: filter
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_filter_keeps_matching_elements_in_order() {
        let yaml = r#"
name: sift
steps:
  - id: keep-long
    type: collection
    operation: filter
    input: "{{ input.items }}"
    condition: "item|length > 3"
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let engine = engine_with(BoxProvider::new(EchoProvider::instant()));

        let result = engine
            .execute(
                &def,
                input(&[("items", json!(["ab", "abcd", "a", "abcde"]))]),
            )
            .await
            .unwrap();
        assert_eq!(result.output, json!(["abcd", "abcde"]));
    }

    #[tokio::test]
    async fn test_filter_default_false_never_raises() {
        let yaml = r#"
name: sift
steps:
  - id: keep
    type: collection
    operation: filter
    input: "{{ input.items }}"
    condition: "item.score > 1"
    error_handling:
      on_condition_error: default_false
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let engine = engine_with(BoxProvider::new(EchoProvider::instant()));

        // Second element makes the predicate fail (no .score on a string).
        let result = engine
            .execute(
                &def,
                input(&[(
                    "items",
                    json!([{ "score": 5 }, "not an object", { "score": 0 }]),
                )]),
            )
            .await
            .unwrap();
        assert_eq!(result.output, json!([{ "score": 5 }]));
        let collection = &result.steps["keep"];
        assert_eq!(collection["errors"], json!(null));
    }

    // -------------------------------------------------------------------
    // Conditional
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_conditional_default_branch_executes_once() {
        let yaml = r#"
name: route
steps:
  - id: choose
    type: conditional
    conditions:
      - name: first
        condition: "input.n > 100"
        steps:
          - id: a
            type: ai_call
            prompt: "first"
      - name: second
        condition: "input.n > 50"
        steps:
          - id: b
            type: ai_call
            prompt: "second"
      - name: fallback
        default: true
        steps:
          - id: c
            type: ai_call
            prompt: "fallback"
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let provider = StdArc::new(EchoProvider::instant());
        let engine = engine_with(BoxProvider::new(StdArc::clone(&provider)));

        let result = engine
            .execute(&def, input(&[("n", json!(1))]))
            .await
            .unwrap();
        let conditional = &result.steps["choose"];
        assert_eq!(conditional["executed_branch"], json!("fallback"));
        assert_eq!(conditional["output"], json!("echo:fallback"));
        // Exactly one branch ran: one provider call.
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_conditional_if_false_branch() {
        let yaml = r#"
name: route
steps:
  - id: choose
    type: conditional
    condition: "input.flag"
    if_true:
      - id: yes-path
        type: ai_call
        prompt: "yes"
    if_false:
      - id: no-path
        type: ai_call
        prompt: "no"
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let engine = engine_with(BoxProvider::new(EchoProvider::instant()));

        let result = engine
            .execute(&def, input(&[("flag", json!(false))]))
            .await
            .unwrap();
        let conditional = &result.steps["choose"];
        assert_eq!(conditional["executed_branch"], json!("if_false"));
        assert_eq!(conditional["condition_result"], json!(false));
        // Branch step output is visible in the enclosing context.
        assert_eq!(result.steps["no-path"]["text"], json!("echo:no"));
    }

    // -------------------------------------------------------------------
    // Input parameters
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_missing_required_input_fails() {
        let yaml = r#"
name: needs-input
input_parameters:
  - name: text
    type: string
steps:
  - id: split
    type: text_process
    method: split
    input: "{{ input.text }}"
    separator: ","
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let engine = engine_with(BoxProvider::new(EchoProvider::instant()));

        let failure = engine.execute(&def, Map::new()).await.unwrap_err();
        assert!(matches!(failure, RunFailure::Input(_)), "got: {failure}");
    }

    #[tokio::test]
    async fn test_optional_input_default_applied() {
        let yaml = r#"
name: defaulted
input_parameters:
  - name: text
    type: string
    required: false
    default: "x,y"
steps:
  - id: split
    type: text_process
    method: split
    input: "{{ input.text }}"
    separator: ","
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let engine = engine_with(BoxProvider::new(EchoProvider::instant()));

        let result = engine.execute(&def, Map::new()).await.unwrap();
        assert_eq!(result.output, json!(["x", "y"]));
    }
}
