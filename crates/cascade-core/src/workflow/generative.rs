//! Generative-call executor.
//!
//! Drives a provider call from a rendered prompt: transport retry with
//! exponential backoff and a per-call timeout, auto-continuation of
//! truncated responses, and schema validation with bounded, cost-aware
//! retries. Text is concatenated and usage accumulated across all calls
//! into one step result.

use std::time::Duration;

use serde_json::json;

use cascade_types::config::RunConfig;
use cascade_types::llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, Message,
};
use cascade_types::result::StepResult;
use cascade_types::workflow::AiCallStep;

use crate::llm::BoxProvider;

use super::context::ExecutionContext;
use super::error::StepError;
use super::validation::OutputValidator;

/// Instruction appended as a user turn when re-requesting a truncated
/// response.
const CONTINUATION_PROMPT: &str = "Continue exactly from where you left off. \
    Do not repeat previous content; conclude naturally when your thought is complete.";

/// Executes `ai_call` steps against the configured provider.
pub(crate) struct GenerativeExecutor<'e> {
    provider: &'e BoxProvider,
    config: &'e RunConfig,
}

impl<'e> GenerativeExecutor<'e> {
    pub fn new(provider: &'e BoxProvider, config: &'e RunConfig) -> Self {
        Self { provider, config }
    }

    /// Run the step with an already-rendered prompt.
    pub async fn execute(
        &self,
        step_id: &str,
        step: &AiCallStep,
        rendered_prompt: String,
        ctx: &ExecutionContext,
    ) -> Result<StepResult, StepError> {
        let Some(validation) = &step.validation else {
            let text = self
                .complete_joined(step_id, step, &rendered_prompt, ctx)
                .await?;
            return Ok(StepResult::Text { text });
        };

        // Augment the prompt before the first call so every attempt carries
        // the JSON instruction.
        let base_prompt = if validation.force_json_output {
            format!("{rendered_prompt}\n\n{}", validation.json_instruction)
        } else {
            rendered_prompt
        };

        let validator = OutputValidator::new(validation);
        let mut current_prompt = base_prompt.clone();
        let mut last_outcome = None;

        let attempts = validation.max_retries + 1;
        for attempt in 1..=attempts {
            let text = self
                .complete_joined(step_id, step, &current_prompt, ctx)
                .await?;

            let mut outcome = validator.validate(&text);
            if !outcome.is_valid {
                // Pattern extraction gets a chance before the attempt is
                // declared failed.
                if let Some(recovered) = validator.recover(&text) {
                    if recovered.is_valid {
                        outcome = recovered;
                    }
                }
            }

            if outcome.is_valid {
                let value = outcome.value.unwrap_or_default();
                return Ok(StepResult::Value { value });
            }

            tracing::debug!(
                step_id,
                attempt,
                errors = ?outcome.errors,
                "provider output failed validation"
            );

            if attempt < attempts {
                let feedback = validator.retry_feedback(&outcome);
                current_prompt = format!("{base_prompt}\n\n{feedback}");
            }
            last_outcome = Some(outcome);
        }

        let outcome = last_outcome.unwrap_or_else(|| validator.validate(""));
        if validation.allow_partial_success {
            tracing::warn!(
                step_id,
                attempts,
                "validation retries exhausted, returning partial result"
            );
            return Ok(StepResult::Value {
                value: json!({
                    "data": outcome.value,
                    "validation_passed": false,
                    "errors": outcome.errors,
                }),
            });
        }

        Err(StepError::Validation {
            step_id: step_id.to_string(),
            attempts,
            errors: outcome.errors,
        })
    }

    /// One logical completion: invoke the provider, and while the response
    /// is truncated and continuation budget remains, append the partial
    /// text as an assistant turn plus a continuation request and re-invoke.
    /// Returns the concatenated text.
    async fn complete_joined(
        &self,
        step_id: &str,
        step: &AiCallStep,
        prompt: &str,
        ctx: &ExecutionContext,
    ) -> Result<String, StepError> {
        let model = step
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        let budget = step
            .max_auto_retry_attempts
            .unwrap_or(self.config.default_max_auto_retry_attempts);

        let mut messages = vec![Message::user(prompt)];
        let mut accumulated = String::new();

        for continuation in 0..=budget {
            let request = CompletionRequest {
                model: model.clone(),
                messages: messages.clone(),
                temperature: step.temperature,
                max_tokens: step.max_tokens,
            };

            let response = self.call_with_retry(step_id, &request).await?;
            ctx.add_usage(step_id, &response.usage, 1);
            accumulated.push_str(&response.text);

            match response.finish_reason {
                FinishReason::Stop => break,
                FinishReason::Length if continuation < budget => {
                    tracing::debug!(
                        step_id,
                        continuation = continuation + 1,
                        budget,
                        "response truncated, requesting continuation"
                    );
                    messages = vec![
                        Message::user(prompt),
                        Message::assistant(accumulated.clone()),
                        Message::user(CONTINUATION_PROMPT),
                    ];
                }
                FinishReason::Length => {
                    tracing::warn!(
                        step_id,
                        budget,
                        "auto-continuation budget exhausted, keeping partial text"
                    );
                    break;
                }
                // Non-recoverable terminations end the loop regardless of
                // remaining budget.
                FinishReason::ContentFilter | FinishReason::Other => {
                    tracing::warn!(
                        step_id,
                        finish_reason = %response.finish_reason,
                        "non-recoverable finish reason, stopping"
                    );
                    break;
                }
            }
        }

        Ok(accumulated)
    }

    /// Invoke the provider with a per-call timeout; transient failures
    /// (timeouts, transport errors, rate limits) retry with exponential
    /// backoff up to the configured budget.
    async fn call_with_retry(
        &self,
        step_id: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, StepError> {
        let timeout = Duration::from_secs(self.config.timeout_per_call_secs);
        let mut attempt = 0u32;
        loop {
            let error = match tokio::time::timeout(timeout, self.provider.complete(request)).await
            {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => e,
                Err(_) => LlmError::Timeout {
                    secs: self.config.timeout_per_call_secs,
                },
            };

            if error.is_retryable() && attempt < self.config.max_transport_retries {
                let backoff = Duration::from_millis(500 * 2u64.pow(attempt));
                tracing::warn!(
                    step_id,
                    attempt,
                    error = %error,
                    backoff_ms = backoff.as_millis() as u64,
                    "provider call failed, backing off"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
                continue;
            }

            return Err(StepError::Provider {
                step_id: step_id.to_string(),
                source: error,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use uuid::Uuid;

    use cascade_types::validation::ValidationConfig;

    use crate::llm::testing::{ScriptedProvider, failing_turn, ok, turn};

    fn test_ctx() -> ExecutionContext {
        ExecutionContext::new("test-workflow", Uuid::now_v7(), Map::new())
    }

    fn ai_step(max_auto_retry_attempts: Option<u32>) -> AiCallStep {
        AiCallStep {
            prompt: "unused (pre-rendered)".to_string(),
            model: None,
            temperature: None,
            max_tokens: None,
            max_auto_retry_attempts,
            validation: None,
        }
    }

    fn validated_step(config: serde_json::Value) -> AiCallStep {
        let validation: ValidationConfig = serde_json::from_value(config).unwrap();
        AiCallStep {
            validation: Some(validation),
            ..ai_step(None)
        }
    }

    // -------------------------------------------------------------------
    // Auto-continuation
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_auto_continuation_joins_three_calls() {
        let provider = BoxProvider::new(ScriptedProvider::new(vec![
            turn(ok("part one ", FinishReason::Length)),
            turn(ok("part two ", FinishReason::Length)),
            turn(ok("the end", FinishReason::Stop)),
        ]));
        let config = RunConfig::default();
        let ctx = test_ctx();
        let executor = GenerativeExecutor::new(&provider, &config);

        let result = executor
            .execute("gen", &ai_step(Some(2)), "write".to_string(), &ctx)
            .await
            .unwrap();

        match result {
            StepResult::Text { text } => assert_eq!(text, "part one part two the end"),
            other => panic!("expected text, got {other:?}"),
        }

        // Usage accumulated across exactly 3 calls.
        let summary = ctx.usage_summary();
        assert_eq!(summary.total_api_calls, 3);
        assert_eq!(summary.total_tokens, 45);
    }

    #[tokio::test]
    async fn test_auto_continuation_budget_exhausted_keeps_partial() {
        let provider = BoxProvider::new(ScriptedProvider::new(vec![
            turn(ok("partial", FinishReason::Length)),
        ]));
        let config = RunConfig::default();
        let ctx = test_ctx();
        let executor = GenerativeExecutor::new(&provider, &config);

        let result = executor
            .execute("gen", &ai_step(Some(0)), "write".to_string(), &ctx)
            .await
            .unwrap();
        match result {
            StepResult::Text { text } => assert_eq!(text, "partial"),
            other => panic!("expected text, got {other:?}"),
        }
        assert_eq!(ctx.usage_summary().total_api_calls, 1);
    }

    #[tokio::test]
    async fn test_content_filter_ends_loop_despite_budget() {
        let scripted = ScriptedProvider::new(vec![turn(ok(
            "filtered partial",
            FinishReason::ContentFilter,
        ))]);
        let provider = BoxProvider::new(scripted);
        let config = RunConfig::default();
        let ctx = test_ctx();
        let executor = GenerativeExecutor::new(&provider, &config);

        let result = executor
            .execute("gen", &ai_step(Some(5)), "write".to_string(), &ctx)
            .await
            .unwrap();
        match result {
            StepResult::Text { text } => assert_eq!(text, "filtered partial"),
            other => panic!("expected text, got {other:?}"),
        }
        // No further attempts were made.
        assert_eq!(ctx.usage_summary().total_api_calls, 1);
    }

    // -------------------------------------------------------------------
    // Validation retry
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_validation_retry_succeeds_on_second_call() {
        let provider = BoxProvider::new(ScriptedProvider::new(vec![
            turn(ok("not json", FinishReason::Stop)),
            turn(ok("{\"a\": 1}", FinishReason::Stop)),
        ]));
        let config = RunConfig::default();
        let ctx = test_ctx();
        let executor = GenerativeExecutor::new(&provider, &config);

        let step = validated_step(json!({ "max_retries": 1 }));
        let result = executor
            .execute("gen", &step, "produce json".to_string(), &ctx)
            .await
            .unwrap();
        match result {
            StepResult::Value { value } => assert_eq!(value, json!({"a": 1})),
            other => panic!("expected value, got {other:?}"),
        }
        assert_eq!(ctx.usage_summary().total_api_calls, 2);
    }

    #[tokio::test]
    async fn test_validation_zero_retries_fails_after_one_call() {
        let provider = BoxProvider::new(ScriptedProvider::new(vec![
            turn(ok("not json", FinishReason::Stop)),
        ]));
        let config = RunConfig::default();
        let ctx = test_ctx();
        let executor = GenerativeExecutor::new(&provider, &config);

        let step = validated_step(json!({ "max_retries": 0 }));
        let err = executor
            .execute("gen", &step, "produce json".to_string(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Validation { attempts: 1, .. }), "got: {err}");
        assert_eq!(ctx.usage_summary().total_api_calls, 1);
    }

    #[tokio::test]
    async fn test_validation_partial_success_returns_flagged_value() {
        let provider = BoxProvider::new(ScriptedProvider::new(vec![
            turn(ok("{\"a\": \"wrong type\"}", FinishReason::Stop)),
        ]));
        let config = RunConfig::default();
        let ctx = test_ctx();
        let executor = GenerativeExecutor::new(&provider, &config);

        let step = validated_step(json!({
            "max_retries": 0,
            "allow_partial_success": true,
            "schema": { "type": "object", "properties": { "a": { "type": "integer" } } },
        }));
        let result = executor
            .execute("gen", &step, "produce json".to_string(), &ctx)
            .await
            .unwrap();
        match result {
            StepResult::Value { value } => {
                assert_eq!(value["validation_passed"], json!(false));
                assert_eq!(value["data"]["a"], json!("wrong type"));
            }
            other => panic!("expected value, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_validation_recovers_json_via_pattern() {
        let provider = BoxProvider::new(ScriptedProvider::new(vec![turn(ok(
            "Sure! ```json\n{\"a\": 1}\n``` hope that helps",
            FinishReason::Stop,
        ))]));
        let config = RunConfig::default();
        let ctx = test_ctx();
        let executor = GenerativeExecutor::new(&provider, &config);

        let step = validated_step(json!({
            "max_retries": 0,
            "extract_json_pattern": "```json\\s*([\\s\\S]*?)```",
        }));
        let result = executor
            .execute("gen", &step, "produce json".to_string(), &ctx)
            .await
            .unwrap();
        match result {
            StepResult::Value { value } => assert_eq!(value, json!({"a": 1})),
            other => panic!("expected value, got {other:?}"),
        }
    }

    // -------------------------------------------------------------------
    // Transport retry
    // -------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_retries_then_succeeds() {
        let provider = BoxProvider::new(ScriptedProvider::new(vec![
            failing_turn(LlmError::Transport("connection reset".to_string())),
            turn(ok("recovered", FinishReason::Stop)),
        ]));
        let config = RunConfig::default();
        let ctx = test_ctx();
        let executor = GenerativeExecutor::new(&provider, &config);

        let result = executor
            .execute("gen", &ai_step(None), "hi".to_string(), &ctx)
            .await
            .unwrap();
        match result {
            StepResult::Text { text } => assert_eq!(text, "recovered"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let scripted = ScriptedProvider::new(vec![
            failing_turn(LlmError::AuthenticationFailed),
            turn(ok("should not be reached", FinishReason::Stop)),
        ]);
        let provider = BoxProvider::new(scripted);
        let config = RunConfig::default();
        let ctx = test_ctx();
        let executor = GenerativeExecutor::new(&provider, &config);

        let err = executor
            .execute("gen", &ai_step(None), "hi".to_string(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Provider { .. }));
        assert_eq!(ctx.usage_summary().total_api_calls, 0);
    }
}
