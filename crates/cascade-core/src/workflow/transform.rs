//! Deterministic text transform executor.
//!
//! Pure function `(method, input) -> result`: no I/O, no retries. Malformed
//! input (invalid regex, out-of-range index) fails the step with a
//! descriptive error and no partial output.

use regex::RegexBuilder;
use serde_json::{Value, json};

use cascade_types::workflow::{
    ExtractFormat, GroupRef, RegexFlag, Replacement, TransformMethod,
};

use super::template::{TemplateEngine, value_to_bool};
use super::validation::check_schema;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from deterministic text operations.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid regex pattern '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("unknown capture group: {0}")]
    UnknownGroup(String),

    #[error("index {index} out of range for array of length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("invalid slice '{0}'")]
    InvalidSlice(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("predicate evaluation failed: {0}")]
    Predicate(String),

    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("schema validation failed: {}", errors.join("; "))]
    SchemaValidation { errors: Vec<String> },

    #[error("invalid replacement rule: {0}")]
    InvalidReplacement(String),
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Apply a transform method to a resolved input value.
///
/// `template` is used only for `select_item` predicate evaluation; every
/// other method is self-contained.
pub fn apply(
    method: &TransformMethod,
    input: Value,
    template: &dyn TemplateEngine,
) -> Result<Value, TransformError> {
    match method {
        TransformMethod::Split {
            separator,
            max_splits,
        } => {
            let text = as_str(&input)?;
            Ok(split(text, separator, *max_splits))
        }
        TransformMethod::ExtractBetweenMarker {
            begin,
            end,
            extract_all,
        } => {
            let text = as_str(&input)?;
            Ok(extract_between_markers(text, begin, end, *extract_all))
        }
        TransformMethod::RegexExtract {
            pattern,
            group,
            flags,
            output_format,
        } => {
            let text = as_str(&input)?;
            regex_extract(text, pattern, group.as_ref(), flags, *output_format)
        }
        TransformMethod::SelectItem {
            index,
            slice,
            condition,
        } => select_item(
            input,
            *index,
            slice.as_deref(),
            condition.as_deref(),
            template,
        ),
        TransformMethod::ParseJson {
            schema,
            strict_validation,
        } => {
            let text = as_str(&input)?;
            parse_json(text, schema.as_ref(), *strict_validation)
        }
        TransformMethod::Replace { replacements } => {
            let text = as_str(&input)?;
            replace(text, replacements)
        }
    }
}

fn as_str(input: &Value) -> Result<&str, TransformError> {
    input.as_str().ok_or_else(|| {
        TransformError::InvalidInput(format!(
            "expected a string, got {}",
            match input {
                Value::Array(_) => "an array",
                Value::Object(_) => "an object",
                Value::Number(_) => "a number",
                Value::Bool(_) => "a boolean",
                Value::Null => "null",
                Value::String(_) => unreachable!(),
            }
        ))
    })
}

// ---------------------------------------------------------------------------
// split
// ---------------------------------------------------------------------------

fn split(text: &str, separator: &str, max_splits: Option<usize>) -> Value {
    let parts: Vec<&str> = match max_splits {
        // N splits produce at most N+1 parts, remainder kept intact.
        Some(n) => text.splitn(n + 1, separator).collect(),
        None => text.split(separator).collect(),
    };
    json!(parts)
}

// ---------------------------------------------------------------------------
// extract_between_marker
// ---------------------------------------------------------------------------

fn extract_between_markers(text: &str, begin: &str, end: &str, extract_all: bool) -> Value {
    if extract_all {
        let mut results = Vec::new();
        let mut remaining = text;
        loop {
            let Some(begin_idx) = remaining.find(begin) else {
                break;
            };
            let after_begin = &remaining[begin_idx + begin.len()..];
            let Some(end_idx) = after_begin.find(end) else {
                break;
            };
            results.push(after_begin[..end_idx].to_string());
            remaining = &after_begin[end_idx + end.len()..];
        }
        json!(results)
    } else {
        let extracted = text
            .find(begin)
            .map(|begin_idx| &text[begin_idx + begin.len()..])
            .and_then(|after| after.find(end).map(|end_idx| &after[..end_idx]))
            .unwrap_or("");
        json!(extracted)
    }
}

// ---------------------------------------------------------------------------
// regex_extract
// ---------------------------------------------------------------------------

fn regex_extract(
    text: &str,
    pattern: &str,
    group: Option<&GroupRef>,
    flags: &[RegexFlag],
    output_format: ExtractFormat,
) -> Result<Value, TransformError> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags {
        match flag {
            RegexFlag::IgnoreCase => builder.case_insensitive(true),
            RegexFlag::Multiline => builder.multi_line(true),
            RegexFlag::DotAll => builder.dot_matches_new_line(true),
        };
    }
    let re = builder.build().map_err(|e| TransformError::InvalidRegex {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    let mut matches = Vec::new();
    for captures in re.captures_iter(text) {
        let matched = match group {
            None => captures.get(0),
            Some(GroupRef::Index(i)) => {
                if *i >= re.captures_len() {
                    return Err(TransformError::UnknownGroup(i.to_string()));
                }
                captures.get(*i)
            }
            Some(GroupRef::Name(name)) => {
                if !re.capture_names().flatten().any(|n| n == name) {
                    return Err(TransformError::UnknownGroup(name.clone()));
                }
                captures.name(name)
            }
        };
        if let Some(m) = matched {
            matches.push(m.as_str().to_string());
        }
    }

    Ok(match output_format {
        ExtractFormat::String => json!(matches.first().cloned().unwrap_or_default()),
        ExtractFormat::Array => json!(matches),
    })
}

// ---------------------------------------------------------------------------
// select_item
// ---------------------------------------------------------------------------

fn select_item(
    input: Value,
    index: Option<i64>,
    slice: Option<&str>,
    condition: Option<&str>,
    template: &dyn TemplateEngine,
) -> Result<Value, TransformError> {
    let data = coerce_to_array(input)?;

    let selectors = [index.is_some(), slice.is_some(), condition.is_some()]
        .iter()
        .filter(|s| **s)
        .count();
    if selectors != 1 {
        return Err(TransformError::InvalidSelector(
            "exactly one of 'index', 'slice', or 'condition' must be specified".to_string(),
        ));
    }

    if let Some(index) = index {
        let len = data.len();
        let resolved = if index < 0 {
            index + len as i64
        } else {
            index
        };
        if resolved < 0 || resolved as usize >= len {
            return Err(TransformError::IndexOutOfRange { index, len });
        }
        return Ok(data[resolved as usize].clone());
    }

    if let Some(slice) = slice {
        return select_by_slice(&data, slice);
    }

    let condition = condition.unwrap_or_default();
    let mut kept = Vec::new();
    for item in &data {
        let ctx = json!({ "item": item });
        let result = template
            .evaluate(condition, &ctx)
            .map_err(|e| TransformError::Predicate(e.to_string()))?;
        if value_to_bool(&result) {
            kept.push(item.clone());
        }
    }
    Ok(json!(kept))
}

fn coerce_to_array(input: Value) -> Result<Vec<Value>, TransformError> {
    match input {
        Value::Array(items) => Ok(items),
        // A string may be a JSON array or comma-separated values.
        Value::String(s) => match serde_json::from_str::<Value>(s.trim()) {
            Ok(Value::Array(items)) => Ok(items),
            _ => Ok(s.split(',').map(|part| json!(part.trim())).collect()),
        },
        other => Err(TransformError::InvalidInput(format!(
            "expected an array, got {other}"
        ))),
    }
}

fn select_by_slice(data: &[Value], slice: &str) -> Result<Value, TransformError> {
    let parts: Vec<&str> = slice.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(TransformError::InvalidSlice(slice.to_string()));
    }

    let parse_bound = |part: &str| -> Result<Option<i64>, TransformError> {
        if part.is_empty() {
            Ok(None)
        } else {
            part.parse::<i64>()
                .map(Some)
                .map_err(|_| TransformError::InvalidSlice(slice.to_string()))
        }
    };

    let len = data.len() as i64;
    let clamp = |bound: Option<i64>, default: i64| -> i64 {
        match bound {
            None => default,
            Some(v) if v < 0 => (v + len).clamp(0, len),
            Some(v) => v.clamp(0, len),
        }
    };

    let start = clamp(parse_bound(parts[0])?, 0);
    let end = clamp(parse_bound(parts[1])?, len);
    let step = match parts.get(2) {
        Some(part) => parse_bound(part)?.unwrap_or(1),
        None => 1,
    };
    if step < 1 {
        return Err(TransformError::InvalidSlice(slice.to_string()));
    }

    let mut out = Vec::new();
    let mut i = start;
    while i < end {
        out.push(data[i as usize].clone());
        i += step;
    }
    Ok(json!(out))
}

// ---------------------------------------------------------------------------
// parse_json
// ---------------------------------------------------------------------------

fn parse_json(
    text: &str,
    schema: Option<&Value>,
    strict_validation: bool,
) -> Result<Value, TransformError> {
    let data: Value = serde_json::from_str(text.trim())
        .map_err(|e| TransformError::Json(e.to_string()))?;

    let mut errors = Vec::new();
    if let Some(schema) = schema {
        check_schema(&data, schema, "$", &mut errors);
    }
    let schema_valid = errors.is_empty();
    if strict_validation && !schema_valid {
        return Err(TransformError::SchemaValidation { errors });
    }

    // Report validity metadata rather than throwing on minor mismatches.
    Ok(json!({
        "data": data,
        "valid": schema_valid,
        "schema_valid": schema_valid,
        "errors": errors,
    }))
}

// ---------------------------------------------------------------------------
// replace
// ---------------------------------------------------------------------------

fn replace(text: &str, replacements: &[Replacement]) -> Result<Value, TransformError> {
    let mut result = text.to_string();
    for rule in replacements {
        match (&rule.from, &rule.pattern) {
            (Some(from), None) => {
                result = result.replace(from, &rule.to);
            }
            (None, Some(pattern)) => {
                let re = RegexBuilder::new(pattern).build().map_err(|e| {
                    TransformError::InvalidRegex {
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    }
                })?;
                result = re.replace_all(&result, rule.to.as_str()).into_owned();
            }
            _ => {
                return Err(TransformError::InvalidReplacement(
                    "exactly one of 'from' or 'pattern' must be set".to_string(),
                ));
            }
        }
    }
    Ok(json!(result))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
