//! Output validation configuration for generative calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Validation bounds on a provider's free-form output, attached to an
/// `ai_call` step. Consumed once per call, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Inline JSON Schema the parsed output must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    /// Validation retries, 0-10. 0 means "validate once, never retry".
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Correction preamble prepended to the schema feedback on retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_prompt: Option<String>,
    /// When retries are exhausted, return the best-effort parsed value
    /// flagged invalid rather than failing the step.
    #[serde(default)]
    pub allow_partial_success: bool,
    /// Regex used to recover a JSON payload from surrounding prose before
    /// giving up on a validation attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_json_pattern: Option<String>,
    /// Augment the rendered prompt with an explicit JSON instruction.
    #[serde(default)]
    pub force_json_output: bool,
    /// The instruction appended when `force_json_output` is set.
    #[serde(default = "default_json_instruction")]
    pub json_instruction: String,
}

/// Upper bound on `max_retries`, enforced at load time.
pub const MAX_VALIDATION_RETRIES: u32 = 10;

fn default_max_retries() -> u32 {
    3
}

fn default_json_instruction() -> String {
    "Respond with valid JSON only.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config: ValidationConfig = serde_json::from_value(json!({})).unwrap();
        assert!(config.schema.is_none());
        assert_eq!(config.max_retries, 3);
        assert!(!config.allow_partial_success);
        assert!(!config.force_json_output);
        assert_eq!(config.json_instruction, "Respond with valid JSON only.");
    }

    #[test]
    fn test_full_config_yaml() {
        let yaml = r#"
schema:
  type: object
  required: [title]
max_retries: 2
retry_prompt: "Your previous answer was invalid."
allow_partial_success: true
extract_json_pattern: "```json\\s*(\\{.*?\\})\\s*```"
force_json_output: true
"#;
        let config: ValidationConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.max_retries, 2);
        assert!(config.allow_partial_success);
        assert!(config.force_json_output);
        assert!(config.schema.unwrap().get("required").is_some());
    }
}
