//! JEXL condition evaluation for step skipping.
//!
//! Wraps `jexl_eval::Evaluator` with a small set of standard transforms.
//! A step's `condition` is evaluated immediately before dispatch against
//! the accumulated execution context; any falsy result skips the step.
//! Evaluation errors (including references to outputs that never
//! materialized) are treated as falsy, not as failures -- a missing
//! upstream output in a condition must not halt the workflow.
//!
//! **Security note:** context data is always passed as a JSON object,
//! NEVER interpolated into expression strings.

use serde_json::{json, Value};

use super::template::ExecutionContext;

/// Condition evaluator with standard transforms pre-registered.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ConditionEvaluator {
    /// Create a new evaluator.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.len(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Decide whether a step should run.
    ///
    /// Returns `false` for any falsy result (empty string, `false`, zero,
    /// null) and for evaluation errors.
    pub fn should_run(&self, expression: &str, ctx: &ExecutionContext) -> bool {
        let context = ctx.to_expression_context();
        match self.evaluator.eval_in_context(expression, &context) {
            Ok(value) => is_truthy(&value),
            Err(e) => {
                tracing::debug!(
                    expression,
                    error = %e,
                    "condition evaluation failed, treating as falsy"
                );
                false
            }
        }
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// JavaScript-like truthiness over JSON values.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
