//! Execution context: the run's accumulated name -> value bindings.
//!
//! `ExecutionContext` maps `input.*` (caller-supplied, immutable for the
//! run), `steps.*` (one entry per completed step id), and scoped loop
//! variables injected only for the lifetime of a nested sub-pipeline.
//! Nested pipelines receive their own extended copy (`child_with_vars`),
//! so mutation in one parallel branch is invisible to siblings -- no lock
//! is needed for map/filter concurrency.
//!
//! Provider usage is the one shared channel: all clones report into a
//! single `UsageSummary` so the run total includes parallel pipelines.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};
use uuid::Uuid;

use cascade_types::llm::{Usage, UsageSummary};
use cascade_types::result::StepResult;

/// Runtime execution context for one workflow run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    workflow_name: String,
    run_id: Uuid,
    input: Map<String, Value>,
    step_outputs: HashMap<String, StepResult>,
    scoped: HashMap<String, Value>,
    usage: Arc<Mutex<UsageSummary>>,
}

impl ExecutionContext {
    /// Create the root context for a run.
    pub fn new(workflow_name: impl Into<String>, run_id: Uuid, input: Map<String, Value>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            run_id,
            input,
            step_outputs: HashMap::new(),
            scoped: HashMap::new(),
            usage: Arc::new(Mutex::new(UsageSummary::default())),
        }
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Commit a completed step's result. Later steps see it immediately.
    pub fn set_step_output(&mut self, step_id: &str, result: StepResult) {
        self.step_outputs.insert(step_id.to_string(), result);
    }

    pub fn get_step_output(&self, step_id: &str) -> Option<&StepResult> {
        self.step_outputs.get(step_id)
    }

    /// Results committed so far, as JSON values keyed by step id.
    pub fn step_values(&self) -> HashMap<String, Value> {
        self.step_outputs
            .iter()
            .map(|(id, result)| (id.clone(), result.to_value()))
            .collect()
    }

    /// Extended copy for a nested sub-pipeline invocation. The child sees
    /// everything the parent does plus `vars` at expression top level; the
    /// parent never sees the child's writes.
    pub fn child_with_vars(&self, vars: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut child = self.clone();
        child.scoped.extend(vars);
        child
    }

    /// Record provider usage attributed to `step_id`, shared run-wide.
    pub fn add_usage(&self, step_id: &str, usage: &Usage, calls: u32) {
        if let Ok(mut summary) = self.usage.lock() {
            summary.add_step_usage(step_id, usage, calls);
        }
    }

    /// Snapshot of the run's aggregated usage.
    pub fn usage_summary(&self) -> UsageSummary {
        self.usage
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Build the JSON object that templates and predicates evaluate against.
    ///
    /// Shape:
    /// ```json
    /// {
    ///   "input": { ... },
    ///   "steps": { "<id>": { "output": <primary>, "result": <full> } },
    ///   "workflow": { "name": "...", "run_id": "..." },
    ///   "<scoped var>": <value>, ...
    /// }
    /// ```
    pub fn to_expression_context(&self) -> Value {
        let mut steps = Map::new();
        for (id, result) in &self.step_outputs {
            steps.insert(
                id.clone(),
                json!({
                    "output": result.primary_value(),
                    "result": result.to_value(),
                }),
            );
        }

        let mut root = Map::new();
        root.insert("input".to_string(), Value::Object(self.input.clone()));
        root.insert("steps".to_string(), Value::Object(steps));
        root.insert(
            "workflow".to_string(),
            json!({
                "name": self.workflow_name,
                "run_id": self.run_id.to_string(),
            }),
        );
        // Scoped loop variables shadow nothing above: reserved roots win.
        for (name, value) in &self.scoped {
            if !root.contains_key(name) {
                root.insert(name.clone(), value.clone());
            }
        }
        Value::Object(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_context() -> ExecutionContext {
        let mut input = Map::new();
        input.insert("topic".to_string(), json!("rust"));
        ExecutionContext::new("test-workflow", Uuid::now_v7(), input)
    }

    #[test]
    fn test_set_and_get_step_output() {
        let mut ctx = test_context();
        ctx.set_step_output(
            "gather",
            StepResult::Text {
                text: "articles".to_string(),
            },
        );
        assert!(ctx.get_step_output("gather").is_some());
        assert!(ctx.get_step_output("missing").is_none());
    }

    #[test]
    fn test_expression_context_shape() {
        let mut ctx = test_context();
        ctx.set_step_output(
            "gather",
            StepResult::Text {
                text: "articles".to_string(),
            },
        );
        let expr = ctx.to_expression_context();
        assert_eq!(expr["input"]["topic"], json!("rust"));
        assert_eq!(expr["steps"]["gather"]["output"], json!("articles"));
        assert_eq!(expr["steps"]["gather"]["result"]["kind"], json!("text"));
        assert_eq!(expr["workflow"]["name"], json!("test-workflow"));
    }

    #[test]
    fn test_child_sees_scoped_vars_parent_does_not() {
        let ctx = test_context();
        let child = ctx.child_with_vars([("item".to_string(), json!("first"))]);

        assert_eq!(child.to_expression_context()["item"], json!("first"));
        assert!(ctx.to_expression_context().get("item").is_none());
    }

    #[test]
    fn test_sibling_children_are_isolated() {
        let ctx = test_context();
        let mut a = ctx.child_with_vars([("item".to_string(), json!(1))]);
        let b = ctx.child_with_vars([("item".to_string(), json!(2))]);

        a.set_step_output(
            "inner",
            StepResult::Text {
                text: "from a".to_string(),
            },
        );
        assert!(b.get_step_output("inner").is_none());
        assert_eq!(b.to_expression_context()["item"], json!(2));
    }

    #[test]
    fn test_scoped_vars_cannot_shadow_reserved_roots() {
        let ctx = test_context();
        let child = ctx.child_with_vars([("steps".to_string(), json!("bogus"))]);
        let expr = child.to_expression_context();
        assert!(expr["steps"].is_object());
    }

    #[test]
    fn test_usage_shared_across_clones() {
        let ctx = test_context();
        let child = ctx.child_with_vars([("item".to_string(), json!(1))]);

        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cost_usd: None,
        };
        child.add_usage("inner", &usage, 2);

        let summary = ctx.usage_summary();
        assert_eq!(summary.total_api_calls, 2);
        assert_eq!(summary.total_tokens, 15);
    }
}
