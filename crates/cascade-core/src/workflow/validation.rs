//! Provider-output validation: JSON parsing, schema checking, recovery,
//! and retry-prompt construction.
//!
//! The schema checker covers the JSON Schema subset the validation/retry
//! loop needs for actionable feedback: `type`, `properties`, `required`,
//! `items`, `enum`, `minimum`/`maximum`, `minLength`/`maxLength`. Errors
//! are structured strings suitable for feeding back to the provider.

use regex::Regex;
use serde_json::Value;

use cascade_types::validation::ValidationConfig;

/// Result of one validation attempt.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    /// The parsed (and schema-checked) value when validation succeeded,
    /// or the best-effort parse otherwise.
    pub value: Option<Value>,
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    fn valid(value: Value) -> Self {
        Self {
            is_valid: true,
            value: Some(value),
            errors: Vec::new(),
        }
    }

    fn invalid(value: Option<Value>, errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            value,
            errors,
        }
    }
}

/// Validates provider output against a [`ValidationConfig`].
pub struct OutputValidator<'a> {
    config: &'a ValidationConfig,
}

impl<'a> OutputValidator<'a> {
    pub fn new(config: &'a ValidationConfig) -> Self {
        Self { config }
    }

    /// Validate raw provider text: parse as JSON, then check the schema
    /// when one is configured.
    pub fn validate(&self, output: &str) -> ValidationOutcome {
        let parsed: Value = match serde_json::from_str(output.trim()) {
            Ok(v) => v,
            Err(e) => {
                return ValidationOutcome::invalid(
                    None,
                    vec![format!("invalid JSON: {e}")],
                );
            }
        };

        match &self.config.schema {
            Some(schema) => {
                let mut errors = Vec::new();
                check_schema(&parsed, schema, "$", &mut errors);
                if errors.is_empty() {
                    ValidationOutcome::valid(parsed)
                } else {
                    ValidationOutcome::invalid(Some(parsed), errors)
                }
            }
            None => ValidationOutcome::valid(parsed),
        }
    }

    /// Attempt pattern extraction on a failed output and re-validate the
    /// extracted substring. Returns None when no pattern is configured,
    /// the pattern is invalid, or nothing matches.
    pub fn recover(&self, output: &str) -> Option<ValidationOutcome> {
        let pattern = self.config.extract_json_pattern.as_deref()?;
        let re = Regex::new(pattern).ok()?;
        let captures = re.captures(output)?;
        let extracted = captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str())?;
        Some(self.validate(extracted))
    }

    /// Build the correction prompt for a retry attempt: configured (or
    /// default) preamble, the validation errors, and the schema when set.
    pub fn retry_feedback(&self, outcome: &ValidationOutcome) -> String {
        let preamble = self
            .config
            .retry_prompt
            .as_deref()
            .unwrap_or("The previous response was invalid. Conform to the expected schema.");

        let mut feedback = format!("{preamble}\nValidation errors: {}", outcome.errors.join("; "));
        if let Some(schema) = &self.config.schema {
            let schema_text =
                serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
            feedback.push_str(&format!(
                "\nRespond with valid JSON matching this schema:\n{schema_text}"
            ));
        }
        feedback
    }
}

/// Recursively check `value` against a JSON Schema subset, appending
/// human-readable errors with JSONPath-ish locations.
pub fn check_schema(value: &Value, schema: &Value, path: &str, errors: &mut Vec<String>) {
    let Some(schema_obj) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema_obj.get("type").and_then(Value::as_str) {
        if !type_matches(value, expected) {
            errors.push(format!(
                "{path}: expected type '{expected}', got '{}'",
                type_name(value)
            ));
            return;
        }
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            errors.push(format!("{path}: value not in enum"));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema_obj.get("minimum").and_then(Value::as_f64) {
            if n < min {
                errors.push(format!("{path}: {n} is below minimum {min}"));
            }
        }
        if let Some(max) = schema_obj.get("maximum").and_then(Value::as_f64) {
            if n > max {
                errors.push(format!("{path}: {n} is above maximum {max}"));
            }
        }
    }

    if let Some(s) = value.as_str() {
        if let Some(min) = schema_obj.get("minLength").and_then(Value::as_u64) {
            if (s.chars().count() as u64) < min {
                errors.push(format!("{path}: string shorter than minLength {min}"));
            }
        }
        if let Some(max) = schema_obj.get("maxLength").and_then(Value::as_u64) {
            if (s.chars().count() as u64) > max {
                errors.push(format!("{path}: string longer than maxLength {max}"));
            }
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(name) {
                    errors.push(format!("{path}: missing required property '{name}'"));
                }
            }
        }
        if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
            for (name, prop_schema) in properties {
                if let Some(prop_value) = obj.get(name) {
                    check_schema(prop_value, prop_schema, &format!("{path}.{name}"), errors);
                }
            }
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(item_schema) = schema_obj.get("items") {
            for (i, item) in items.iter().enumerate() {
                check_schema(item, item_schema, &format!("{path}[{i}]"), errors);
            }
        }
    }
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
