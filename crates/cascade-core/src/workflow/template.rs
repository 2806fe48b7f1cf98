//! Template rendering and expression evaluation.
//!
//! The engine consumes templating through the narrow [`TemplateEngine`]
//! trait -- `render` for `{{ ... }}` interpolation and `evaluate` for bare
//! predicate expressions -- so its correctness never depends on the
//! expression dialect, only on the error-signaling contract: a reference
//! to an absent name fails with a distinguishable error instead of
//! silently producing empty output.
//!
//! The default implementation wraps `jexl_eval::Evaluator` with a standard
//! transform set. Payloads are always passed as context objects, NEVER
//! interpolated into expression strings.

use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised by template rendering and expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// A referenced name does not exist in the context.
    #[error("unresolved reference: '{reference}'")]
    UnresolvedReference { reference: String },

    /// The expression failed to parse or evaluate.
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    /// Malformed template text (unbalanced or empty delimiters).
    #[error("template syntax error: {0}")]
    Syntax(String),
}

// ---------------------------------------------------------------------------
// TemplateEngine trait
// ---------------------------------------------------------------------------

/// Injected templating/expression capability.
pub trait TemplateEngine: Send + Sync {
    /// Render `{{ expression }}` placeholders in `template` against a JSON
    /// context object. Fails on syntax errors and unresolved references.
    fn render(&self, template: &str, context: &Value) -> Result<String, TemplateError>;

    /// Evaluate a bare expression to a JSON value. Absent property access
    /// yields `null` (useful in predicates); parse failures error.
    fn evaluate(&self, expression: &str, context: &Value) -> Result<Value, TemplateError>;

    /// Resolve a template to a value: a template that is one single
    /// `{{ expression }}` yields the referenced value itself (arrays stay
    /// arrays), anything else renders to a string.
    fn resolve(&self, template: &str, context: &Value) -> Result<Value, TemplateError> {
        let trimmed = template.trim();
        if let Some(inner) = single_expression(trimmed) {
            let value = self.evaluate(inner, context)?;
            if value.is_null() {
                return Err(TemplateError::UnresolvedReference {
                    reference: inner.to_string(),
                });
            }
            Ok(value)
        } else {
            Ok(Value::String(self.render(template, context)?))
        }
    }

    /// Check template syntax without a context: balanced delimiters and
    /// non-empty expressions. Used by `validate` before any input exists.
    fn check_syntax(&self, template: &str) -> Result<(), TemplateError> {
        for segment in split_template(template)? {
            if let Segment::Expression(expr) = segment {
                if expr.trim().is_empty() {
                    return Err(TemplateError::Syntax(
                        "empty expression between '{{' and '}}'".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Template scanning
// ---------------------------------------------------------------------------

enum Segment<'a> {
    Literal(&'a str),
    Expression(&'a str),
}

/// Split a template into literal and `{{ expression }}` segments.
fn split_template(template: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let (literal, tail) = rest.split_at(start);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        let tail = &tail[2..];
        let Some(end) = tail.find("}}") else {
            return Err(TemplateError::Syntax(
                "unterminated '{{' delimiter".to_string(),
            ));
        };
        segments.push(Segment::Expression(&tail[..end]));
        rest = &tail[end + 2..];
    }
    if rest.contains("}}") {
        return Err(TemplateError::Syntax(
            "unmatched '}}' delimiter".to_string(),
        ));
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}

/// If the whole template is exactly one `{{ expression }}`, return it.
fn single_expression(template: &str) -> Option<&str> {
    let inner = template.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Convert a JSON value to a display string for interpolation.
/// Strings are bare; everything else is compact JSON.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
pub fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// JexlTemplateEngine
// ---------------------------------------------------------------------------

/// JEXL expression evaluator with standard transforms pre-registered.
pub struct JexlTemplateEngine {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl JexlTemplateEngine {
    /// Create a new engine with all standard transforms registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            // String transforms
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("split", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = s.split(delimiter).collect();
                Ok(json!(parts))
            })
            // Boolean transforms
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!value_to_bool(&val)))
            })
            // String search transforms
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            // Length transform (works on strings, arrays, and objects)
            .with_transform("length", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                let len = match &val {
                    Value::String(s) => s.len(),
                    Value::Array(a) => a.len(),
                    Value::Object(o) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }
}

impl Default for JexlTemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine for JexlTemplateEngine {
    fn render(&self, template: &str, context: &Value) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        for segment in split_template(template)? {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expression(expr) => {
                    let expr = expr.trim();
                    if expr.is_empty() {
                        return Err(TemplateError::Syntax(
                            "empty expression between '{{' and '}}'".to_string(),
                        ));
                    }
                    let value = self.evaluate(expr, context)?;
                    // JEXL resolves absent names to null; rendering null
                    // would silently produce garbage output, so treat it as
                    // an unresolved reference.
                    if value.is_null() {
                        return Err(TemplateError::UnresolvedReference {
                            reference: expr.to_string(),
                        });
                    }
                    out.push_str(&value_to_string(&value));
                }
            }
        }
        Ok(out)
    }

    fn evaluate(&self, expression: &str, context: &Value) -> Result<Value, TemplateError> {
        if !context.is_object() {
            return Err(TemplateError::EvalFailed(
                "context must be a JSON object".to_string(),
            ));
        }
        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| TemplateError::EvalFailed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> JexlTemplateEngine {
        JexlTemplateEngine::new()
    }

    // -------------------------------------------------------------------
    // Rendering
    // -------------------------------------------------------------------

    #[test]
    fn test_render_interpolates_values() {
        let ctx = json!({ "input": { "name": "Alice" } });
        let out = engine()
            .render("Hello {{ input.name }}!", &ctx)
            .unwrap();
        assert_eq!(out, "Hello Alice!");
    }

    #[test]
    fn test_render_multiple_placeholders() {
        let ctx = json!({ "steps": { "a": { "output": "one" }, "b": { "output": "two" } } });
        let out = engine()
            .render("{{ steps.a.output }} and {{ steps.b.output }}", &ctx)
            .unwrap();
        assert_eq!(out, "one and two");
    }

    #[test]
    fn test_render_non_string_values_as_json() {
        let ctx = json!({ "items": ["a", "b"] });
        let out = engine().render("got {{ items }}", &ctx).unwrap();
        assert_eq!(out, "got [\"a\",\"b\"]");
    }

    #[test]
    fn test_render_unresolved_reference_fails() {
        let ctx = json!({ "input": {} });
        let err = engine()
            .render("Hello {{ input.missing }}", &ctx)
            .unwrap_err();
        assert!(matches!(err, TemplateError::UnresolvedReference { .. }), "got: {err}");
    }

    #[test]
    fn test_render_unterminated_delimiter_fails() {
        let ctx = json!({});
        let err = engine().render("Hello {{ input.name", &ctx).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax(_)), "got: {err}");
    }

    #[test]
    fn test_render_plain_text_untouched() {
        let ctx = json!({});
        let out = engine().render("no placeholders here", &ctx).unwrap();
        assert_eq!(out, "no placeholders here");
    }

    // -------------------------------------------------------------------
    // resolve: single-expression templates keep their shape
    // -------------------------------------------------------------------

    #[test]
    fn test_resolve_single_expression_keeps_array() {
        let ctx = json!({ "steps": { "split": { "output": [1, 2, 3] } } });
        let value = engine()
            .resolve("{{ steps.split.output }}", &ctx)
            .unwrap();
        assert_eq!(value, json!([1, 2, 3]));
    }

    #[test]
    fn test_resolve_mixed_template_is_string() {
        let ctx = json!({ "input": { "n": 5 } });
        let value = engine().resolve("count: {{ input.n }}", &ctx).unwrap();
        assert_eq!(value, json!("count: 5"));
    }

    #[test]
    fn test_resolve_missing_reference_fails() {
        // Depending on the dialect this surfaces as an unresolved
        // reference (null result) or an evaluation error; both reject.
        let ctx = json!({ "steps": {} });
        assert!(engine().resolve("{{ steps.nope.output }}", &ctx).is_err());
    }

    // -------------------------------------------------------------------
    // Expressions
    // -------------------------------------------------------------------

    #[test]
    fn test_evaluate_boolean_operators() {
        let ctx = json!({ "item": { "score": 7.0, "kind": "post" } });
        let eval = engine();
        assert_eq!(
            eval.evaluate("item.score > 5 && item.kind == 'post'", &ctx)
                .unwrap(),
            json!(true)
        );
        assert_eq!(
            eval.evaluate("item.score > 10 || item.kind == 'page'", &ctx)
                .unwrap(),
            json!(false)
        );
    }

    #[test]
    fn test_evaluate_transforms() {
        let eval = engine();
        let ctx = json!({ "name": "  Hello World  " });
        assert_eq!(
            eval.evaluate("name|trim|lower", &ctx).unwrap(),
            json!("hello world")
        );

        let ctx = json!({ "items": ["a", "b", "c"] });
        assert_eq!(eval.evaluate("items|length", &ctx).unwrap(), json!(3.0));

        let ctx = json!({ "msg": "critical error" });
        assert_eq!(
            eval.evaluate("msg|contains('error')", &ctx).unwrap(),
            json!(true)
        );
        assert_eq!(
            eval.evaluate("msg|startsWith('critical')", &ctx).unwrap(),
            json!(true)
        );
        assert_eq!(
            eval.evaluate("msg|endsWith('.txt')", &ctx).unwrap(),
            json!(false)
        );
    }

    #[test]
    fn test_evaluate_ternary() {
        let ctx = json!({ "count": 10.0 });
        assert_eq!(
            engine()
                .evaluate("(count > 5) ? 'high' : 'low'", &ctx)
                .unwrap(),
            json!("high")
        );
    }

    #[test]
    fn test_evaluate_missing_property_is_null() {
        let ctx = json!({ "event": {} });
        let value = engine().evaluate("event.nonexistent", &ctx).unwrap();
        assert_eq!(value, json!(null));
    }

    #[test]
    fn test_evaluate_requires_object_context() {
        let ctx = json!("not an object");
        assert!(engine().evaluate("true", &ctx).is_err());
    }

    // -------------------------------------------------------------------
    // Truthiness
    // -------------------------------------------------------------------

    #[test]
    fn test_value_to_bool_coercion() {
        assert!(value_to_bool(&json!(true)));
        assert!(!value_to_bool(&json!(false)));
        assert!(!value_to_bool(&json!(null)));
        assert!(!value_to_bool(&json!(0.0)));
        assert!(value_to_bool(&json!(42)));
        assert!(!value_to_bool(&json!("")));
        assert!(value_to_bool(&json!("x")));
        assert!(value_to_bool(&json!([])));
        assert!(value_to_bool(&json!({})));
    }

    // -------------------------------------------------------------------
    // Syntax checks
    // -------------------------------------------------------------------

    #[test]
    fn test_check_syntax_accepts_wellformed() {
        let eval = engine();
        assert!(eval.check_syntax("Hello {{ input.name }}").is_ok());
        assert!(eval.check_syntax("no placeholders").is_ok());
    }

    #[test]
    fn test_check_syntax_rejects_malformed() {
        let eval = engine();
        assert!(eval.check_syntax("Hello {{ input.name").is_err());
        assert!(eval.check_syntax("Hello {{ }}").is_err());
        assert!(eval.check_syntax("dangling }}").is_err());
    }
}
