//! Conditional operator: predicate-selected branch execution.
//!
//! Supports a simple `condition`/`if_true`/`if_false` form and an ordered
//! multi-branch form with an optional default entry. At most one branch
//! executes per invocation. Predicate evaluation failures are governed
//! solely by `on_condition_error`, never by the step's own `on_error`.

use cascade_types::result::ConditionalResult;
use cascade_types::workflow::{ConditionErrorPolicy, ConditionalStep, Step};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::context::ExecutionContext;
use super::engine::WorkflowEngine;
use super::error::StepError;
use super::template::value_to_bool;

/// Run a conditional step. Branch steps execute against the parent
/// context, so their outputs stay visible to subsequent steps.
pub(crate) async fn run_conditional(
    engine: &WorkflowEngine,
    step_id: &str,
    step: &ConditionalStep,
    ctx: &mut ExecutionContext,
    cancel: &CancellationToken,
) -> Result<ConditionalResult, StepError> {
    if let Some(condition) = &step.condition {
        run_simple(engine, step_id, step, condition, ctx, cancel).await
    } else {
        run_multi_branch(engine, step_id, step, ctx, cancel).await
    }
}

/// What a failed predicate evaluation resolved to.
enum EvaluationFailure {
    /// Treat the predicate as false and move on.
    TreatAsFalse(String),
    /// Abort this conditional step's own evaluation only.
    SkipStep(String),
}

fn evaluate_predicate(
    engine: &WorkflowEngine,
    step_id: &str,
    condition: &str,
    policy: ConditionErrorPolicy,
    ctx: &ExecutionContext,
) -> Result<Result<bool, EvaluationFailure>, StepError> {
    match engine
        .template()
        .evaluate(condition, &ctx.to_expression_context())
    {
        Ok(value) => Ok(Ok(value_to_bool(&value))),
        Err(e) => match policy {
            ConditionErrorPolicy::Stop => Err(StepError::ConditionEvaluation {
                step_id: step_id.to_string(),
                message: e.to_string(),
            }),
            ConditionErrorPolicy::Continue => {
                tracing::warn!(step_id, condition, error = %e, "predicate failed, treating as false");
                Ok(Err(EvaluationFailure::TreatAsFalse(e.to_string())))
            }
            ConditionErrorPolicy::SkipRemaining => {
                tracing::warn!(step_id, condition, error = %e, "predicate failed, skipping conditional");
                Ok(Err(EvaluationFailure::SkipStep(e.to_string())))
            }
        },
    }
}

async fn run_simple(
    engine: &WorkflowEngine,
    step_id: &str,
    step: &ConditionalStep,
    condition: &str,
    ctx: &mut ExecutionContext,
    cancel: &CancellationToken,
) -> Result<ConditionalResult, StepError> {
    let (condition_result, evaluation_error) = match evaluate_predicate(
        engine,
        step_id,
        condition,
        step.on_condition_error,
        ctx,
    )? {
        Ok(result) => (result, None),
        Err(EvaluationFailure::TreatAsFalse(message)) => (false, Some(message)),
        Err(EvaluationFailure::SkipStep(message)) => {
            return Ok(ConditionalResult {
                output: Value::Null,
                condition_result: None,
                executed_branch: None,
                evaluation_error: Some(message),
            });
        }
    };

    let branch: Option<(&str, &Vec<Step>)> = if condition_result {
        step.if_true.as_ref().map(|steps| ("if_true", steps))
    } else {
        step.if_false.as_ref().map(|steps| ("if_false", steps))
    };

    let (executed_branch, output) = match branch {
        Some((name, steps)) if !steps.is_empty() => {
            let outcome = engine.execute_sequence(steps, ctx, cancel).await?;
            (Some(name.to_string()), outcome.last_value())
        }
        _ => (None, Value::Null),
    };

    tracing::debug!(
        step_id,
        condition_result,
        executed_branch = executed_branch.as_deref().unwrap_or("none"),
        "conditional branch selected"
    );

    Ok(ConditionalResult {
        output,
        condition_result: Some(condition_result),
        executed_branch,
        evaluation_error,
    })
}

async fn run_multi_branch(
    engine: &WorkflowEngine,
    step_id: &str,
    step: &ConditionalStep,
    ctx: &mut ExecutionContext,
    cancel: &CancellationToken,
) -> Result<ConditionalResult, StepError> {
    let branches = step.conditions.as_deref().unwrap_or_default();
    let mut evaluation_error = None;

    for branch in branches {
        if branch.default {
            let outcome = engine.execute_sequence(&branch.steps, ctx, cancel).await?;
            tracing::debug!(step_id, branch = branch.name.as_str(), "default branch executed");
            return Ok(ConditionalResult {
                output: outcome.last_value(),
                condition_result: Some(true),
                executed_branch: Some(branch.name.clone()),
                evaluation_error,
            });
        }

        match evaluate_predicate(
            engine,
            step_id,
            &branch.condition,
            step.on_condition_error,
            ctx,
        )? {
            Ok(true) => {
                let outcome = engine.execute_sequence(&branch.steps, ctx, cancel).await?;
                tracing::debug!(step_id, branch = branch.name.as_str(), "branch executed");
                return Ok(ConditionalResult {
                    output: outcome.last_value(),
                    condition_result: Some(true),
                    executed_branch: Some(branch.name.clone()),
                    evaluation_error,
                });
            }
            Ok(false) => continue,
            Err(EvaluationFailure::TreatAsFalse(message)) => {
                evaluation_error = Some(message);
                continue;
            }
            Err(EvaluationFailure::SkipStep(message)) => {
                return Ok(ConditionalResult {
                    output: Value::Null,
                    condition_result: None,
                    executed_branch: None,
                    evaluation_error: Some(message),
                });
            }
        }
    }

    // No branch matched and no default exists: nothing executes.
    Ok(ConditionalResult {
        output: Value::Null,
        condition_result: None,
        executed_branch: None,
        evaluation_error,
    })
}
