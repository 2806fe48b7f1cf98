//! Collection operator: map/filter/reduce over an array input.
//!
//! map and filter fan element-pipelines out over a bounded worker pool:
//! elements are partitioned into `batch_size` groups, at most
//! `max_parallel` pipelines run concurrently, and a configurable delay
//! staggers batch starts (rate limiting, not a correctness requirement).
//! Completion order is unconstrained, but `output[index]` placement is
//! always by original index -- results travel back as `(index, value)`
//! pairs, so slot writes are disjoint and need no coordination.
//!
//! Cancellation is cooperative: `on_item_failure: stop` cancels a shared
//! token, in-flight pipelines are abandoned, and unstarted ones never run.
//! reduce is strictly sequential.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use cascade_types::result::{CollectionResult, ItemError, ProcessingStats};
use cascade_types::workflow::{
    CollectionErrorHandling, CollectionOp, CollectionStep, ConditionErrorAction,
    ItemFailurePolicy, Step,
};

use super::context::ExecutionContext;
use super::engine::WorkflowEngine;
use super::error::StepError;
use super::template::{TemplateError, value_to_bool};
use super::transform::TransformError;

/// Resolved fan-out parameters for one collection step.
struct FanOut {
    max_parallel: usize,
    batch_size: usize,
    delay: Duration,
}

impl FanOut {
    fn resolve(engine: &WorkflowEngine, step: &CollectionStep) -> Self {
        let config = engine.config();
        Self {
            max_parallel: step
                .concurrency
                .max_parallel
                .unwrap_or(config.default_max_parallel)
                .max(1),
            batch_size: step
                .concurrency
                .batch_size
                .unwrap_or(config.default_batch_size)
                .max(1),
            delay: Duration::from_millis(step.concurrency.delay_between_batches),
        }
    }

    fn batch_count(&self, items: usize) -> usize {
        items.div_ceil(self.batch_size)
    }
}

/// Run a collection step against the current context.
pub(crate) async fn run_collection(
    engine: &WorkflowEngine,
    step_id: &str,
    step: &CollectionStep,
    ctx: &ExecutionContext,
    cancel: &CancellationToken,
) -> Result<CollectionResult, StepError> {
    let start = Instant::now();
    let items = resolve_input(engine, step_id, step, ctx)?;
    let input_count = items.len();
    let fan_out = FanOut::resolve(engine, step);

    let (output, errors, items_retried, batch_count) = match &step.operation {
        CollectionOp::Map { steps } => {
            let (output, errors, retried) =
                run_map(engine, step_id, steps, &items, step, &fan_out, ctx, cancel).await?;
            (output, errors, retried, fan_out.batch_count(input_count))
        }
        CollectionOp::Filter { condition, steps } => {
            let (output, errors, retried) = run_filter(
                engine,
                step_id,
                condition.as_deref(),
                steps,
                &items,
                step,
                &fan_out,
                ctx,
                cancel,
            )
            .await?;
            (output, errors, retried, fan_out.batch_count(input_count))
        }
        CollectionOp::Reduce {
            steps,
            initial_value,
            accumulator_var,
            item_var,
        } => {
            let (output, errors, retried) = run_reduce(
                engine,
                step_id,
                steps,
                initial_value,
                accumulator_var,
                item_var,
                &items,
                &step.error_handling,
                ctx,
                cancel,
            )
            .await?;
            (output, errors, retried, usize::from(input_count > 0))
        }
    };

    let output_count = match &output {
        Value::Array(values) => values.iter().filter(|v| !v.is_null()).count(),
        _ => 1,
    };

    let stats = ProcessingStats {
        duration_ms: start.elapsed().as_millis() as u64,
        batch_count,
        items_retried,
        error_rate: CollectionResult::error_rate(errors.len(), input_count),
    };

    tracing::debug!(
        step_id,
        operation = step.operation.name(),
        input_count,
        output_count,
        errors = errors.len(),
        "collection operation finished"
    );

    Ok(CollectionResult {
        output,
        operation: step.operation.name().to_string(),
        input_count,
        output_count,
        errors,
        processing_stats: stats,
    })
}

fn resolve_input(
    engine: &WorkflowEngine,
    step_id: &str,
    step: &CollectionStep,
    ctx: &ExecutionContext,
) -> Result<Vec<Value>, StepError> {
    let resolved = engine
        .template()
        .resolve(&step.input, &ctx.to_expression_context())
        .map_err(|e: TemplateError| StepError::Template {
            step_id: step_id.to_string(),
            source: e,
        })?;
    match resolved {
        Value::Array(items) => Ok(items),
        other => Err(StepError::Transform {
            step_id: step_id.to_string(),
            source: TransformError::InvalidInput(format!(
                "collection input must be an array, got {other}"
            )),
        }),
    }
}

// ---------------------------------------------------------------------------
// Element pipelines
// ---------------------------------------------------------------------------

struct ElementOutcome {
    index: usize,
    retries: u32,
    result: Result<Value, String>,
}

/// Run one element's pipeline with batching delay, pool admission, and
/// per-item retry. Each invocation gets its own extended context copy.
#[allow(clippy::too_many_arguments)]
async fn run_element(
    engine: &WorkflowEngine,
    steps: &[Step],
    item: &Value,
    item_var: &str,
    index: usize,
    batch_idx: usize,
    fan_out_delay: Duration,
    semaphore: Arc<Semaphore>,
    token: CancellationToken,
    base_ctx: &ExecutionContext,
    extra_attempts: u32,
) -> ElementOutcome {
    if batch_idx > 0 && !fan_out_delay.is_zero() {
        tokio::time::sleep(fan_out_delay * batch_idx as u32).await;
    }
    let _permit = match semaphore.acquire().await {
        Ok(permit) => permit,
        Err(_) => {
            return ElementOutcome {
                index,
                retries: 0,
                result: Err("worker pool closed".to_string()),
            };
        }
    };
    if token.is_cancelled() {
        return ElementOutcome {
            index,
            retries: 0,
            result: Err("cancelled".to_string()),
        };
    }

    let mut retries = 0u32;
    loop {
        let mut child = base_ctx.child_with_vars([(item_var.to_string(), item.clone())]);
        match engine.execute_sequence(steps, &mut child, &token).await {
            Ok(outcome) => {
                return ElementOutcome {
                    index,
                    retries,
                    result: Ok(outcome.last_value()),
                };
            }
            Err(error) => {
                if retries < extra_attempts && !token.is_cancelled() {
                    retries += 1;
                    tracing::debug!(index, retries, error = %error, "retrying element pipeline");
                    continue;
                }
                return ElementOutcome {
                    index,
                    retries,
                    result: Err(error.to_string()),
                };
            }
        }
    }
}

// ---------------------------------------------------------------------------
// map
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn run_map(
    engine: &WorkflowEngine,
    step_id: &str,
    steps: &[Step],
    items: &[Value],
    step: &CollectionStep,
    fan_out: &FanOut,
    ctx: &ExecutionContext,
    cancel: &CancellationToken,
) -> Result<(Value, Vec<ItemError>, u32), StepError> {
    let policy = step.error_handling.on_item_failure;
    let extra_attempts = match policy {
        ItemFailurePolicy::Retry => step.error_handling.max_retries_per_item,
        _ => 0,
    };
    let token = cancel.child_token();
    let semaphore = Arc::new(Semaphore::new(fan_out.max_parallel));

    let mut pipelines = FuturesUnordered::new();
    for (index, item) in items.iter().enumerate() {
        pipelines.push(run_element(
            engine,
            steps,
            item,
            "item",
            index,
            index / fan_out.batch_size,
            fan_out.delay,
            Arc::clone(&semaphore),
            token.clone(),
            ctx,
            extra_attempts,
        ));
    }

    let mut outputs = vec![Value::Null; items.len()];
    let mut errors = Vec::new();
    let mut items_retried = 0u32;

    while let Some(outcome) = pipelines.next().await {
        items_retried += outcome.retries;
        match outcome.result {
            // Slot placement is by original index, never completion order.
            Ok(value) => outputs[outcome.index] = value,
            Err(message) => {
                if policy == ItemFailurePolicy::Stop {
                    // Abandon in-flight pipelines; unstarted ones never run.
                    token.cancel();
                    return Err(StepError::ItemProcessing {
                        step_id: step_id.to_string(),
                        errors: vec![ItemError {
                            index: outcome.index,
                            message,
                        }],
                    });
                }
                errors.push(ItemError {
                    index: outcome.index,
                    message,
                });
            }
        }
    }

    errors.sort_by_key(|e| e.index);
    Ok((Value::Array(outputs), errors, items_retried))
}

// ---------------------------------------------------------------------------
// filter
// ---------------------------------------------------------------------------

/// Evaluate one element's predicate: either the condition expression over
/// `item`, or the nested sequence's final result coerced to boolean.
async fn evaluate_filter_element(
    engine: &WorkflowEngine,
    condition: Option<&str>,
    steps: &[Step],
    item: &Value,
    base_ctx: &ExecutionContext,
    token: &CancellationToken,
) -> Result<bool, String> {
    let mut child = base_ctx.child_with_vars([("item".to_string(), item.clone())]);
    if !steps.is_empty() {
        let outcome = engine
            .execute_sequence(steps, &mut child, token)
            .await
            .map_err(|e| e.to_string())?;
        return Ok(value_to_bool(&outcome.last_value()));
    }
    let condition = condition.ok_or("filter requires 'condition' or 'steps'")?;
    let value = engine
        .template()
        .evaluate(condition, &child.to_expression_context())
        .map_err(|e| e.to_string())?;
    Ok(value_to_bool(&value))
}

#[allow(clippy::too_many_arguments)]
async fn run_filter(
    engine: &WorkflowEngine,
    step_id: &str,
    condition: Option<&str>,
    steps: &[Step],
    items: &[Value],
    step: &CollectionStep,
    fan_out: &FanOut,
    ctx: &ExecutionContext,
    cancel: &CancellationToken,
) -> Result<(Value, Vec<ItemError>, u32), StepError> {
    let policy = step.error_handling.on_condition_error;
    let token = cancel.child_token();
    let semaphore = Arc::new(Semaphore::new(fan_out.max_parallel));

    let mut pipelines = FuturesUnordered::new();
    for (index, item) in items.iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let token = token.clone();
        let batch_idx = index / fan_out.batch_size;
        let delay = fan_out.delay;
        pipelines.push(async move {
            if batch_idx > 0 && !delay.is_zero() {
                tokio::time::sleep(delay * batch_idx as u32).await;
            }
            let _permit = semaphore.acquire().await;
            if token.is_cancelled() {
                return (index, Err("cancelled".to_string()));
            }
            (
                index,
                evaluate_filter_element(engine, condition, steps, item, ctx, &token).await,
            )
        });
    }

    let mut keep = vec![false; items.len()];
    let mut errors = Vec::new();

    while let Some((index, result)) = pipelines.next().await {
        match result {
            Ok(kept) => keep[index] = kept,
            Err(message) => match policy {
                ConditionErrorAction::Stop => {
                    token.cancel();
                    return Err(StepError::ConditionEvaluation {
                        step_id: step_id.to_string(),
                        message: format!("item {index}: {message}"),
                    });
                }
                ConditionErrorAction::SkipItem => {
                    errors.push(ItemError { index, message });
                }
                // Exclusion without an error entry.
                ConditionErrorAction::DefaultFalse => {}
            },
        }
    }

    let output: Vec<Value> = items
        .iter()
        .enumerate()
        .filter(|(i, _)| keep[*i])
        .map(|(_, item)| item.clone())
        .collect();
    errors.sort_by_key(|e| e.index);
    Ok((json!(output), errors, 0))
}

// ---------------------------------------------------------------------------
// reduce
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn run_reduce(
    engine: &WorkflowEngine,
    step_id: &str,
    steps: &[Step],
    initial_value: &Value,
    accumulator_var: &str,
    item_var: &str,
    items: &[Value],
    error_handling: &CollectionErrorHandling,
    ctx: &ExecutionContext,
    cancel: &CancellationToken,
) -> Result<(Value, Vec<ItemError>, u32), StepError> {
    let mut accumulator = initial_value.clone();
    let mut errors = Vec::new();
    let mut items_retried = 0u32;
    let extra_attempts = match error_handling.on_item_failure {
        ItemFailurePolicy::Retry => error_handling.max_retries_per_item,
        _ => 0,
    };

    // Sequential by contract: each element sees the previous accumulator.
    for (index, item) in items.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(StepError::Cancelled {
                step_id: step_id.to_string(),
            });
        }

        let mut attempt = 0u32;
        loop {
            let mut child = ctx.child_with_vars([
                (accumulator_var.to_string(), accumulator.clone()),
                (item_var.to_string(), item.clone()),
            ]);
            match engine.execute_sequence(steps, &mut child, cancel).await {
                Ok(outcome) => {
                    accumulator = outcome.last_value();
                    break;
                }
                Err(error) => {
                    if attempt < extra_attempts {
                        attempt += 1;
                        items_retried += 1;
                        continue;
                    }
                    match error_handling.on_item_failure {
                        ItemFailurePolicy::Stop => {
                            return Err(StepError::ItemProcessing {
                                step_id: step_id.to_string(),
                                errors: vec![ItemError {
                                    index,
                                    message: error.to_string(),
                                }],
                            });
                        }
                        // Element skipped, accumulator unchanged.
                        ItemFailurePolicy::Skip | ItemFailurePolicy::Retry => {
                            errors.push(ItemError {
                                index,
                                message: error.to_string(),
                            });
                            break;
                        }
                    }
                }
            }
        }
    }

    Ok((accumulator, errors, items_retried))
}
