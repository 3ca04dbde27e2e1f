//! Execution context and template resolution.
//!
//! `ExecutionContext` is the data surface that flows through one run:
//! outputs of completed steps plus runtime variables supplied at execute
//! time. Step arguments and prompts may embed placeholders of the form
//! `{{steps.<id>.output.<dotted.path>}}` or `{{variables.<key>}}`; they
//! resolve as plain string interpolation -- a restricted grammar with
//! dotted path lookup only, no code execution.

use std::collections::HashMap;

use serde_json::{json, Value};
use thiserror::Error;

/// A template reference that could not be resolved.
///
/// Reported as the referencing step's failure and never retried: the
/// context a retry would resolve against is already fixed.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The referenced step has not completed (or does not exist).
    #[error("no output for step '{0}'")]
    UnknownStep(String),

    /// The referenced step completed but the dotted path is absent.
    #[error("step '{step}' output has no value at path '{path}'")]
    MissingPath { step: String, path: String },

    /// No runtime variable with this key was supplied.
    #[error("unknown variable: '{0}'")]
    UnknownVariable(String),

    /// The placeholder does not match the supported grammar.
    #[error("unsupported placeholder: '{0}'")]
    UnsupportedPlaceholder(String),
}

/// Accumulated data surface for one execution.
///
/// The scheduler owns the canonical copy and hands each dispatch a
/// snapshot clone; by the time a step dispatches, every output it can
/// legally reference is already present (its dependencies are terminal).
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    step_outputs: HashMap<String, Value>,
    variables: HashMap<String, Value>,
}

impl ExecutionContext {
    /// Create a context seeded with the runtime variables for this run.
    pub fn new(variables: HashMap<String, Value>) -> Self {
        Self {
            step_outputs: HashMap::new(),
            variables,
        }
    }

    /// Record the output of a completed step.
    pub fn set_step_output(&mut self, step_id: &str, output: Value) {
        self.step_outputs.insert(step_id.to_string(), output);
    }

    /// Get the output of a completed step.
    pub fn step_output(&self, step_id: &str) -> Option<&Value> {
        self.step_outputs.get(step_id)
    }

    /// Resolve every placeholder in a template string.
    ///
    /// Text outside `{{...}}` markers passes through untouched; an
    /// unterminated `{{` is treated as literal text.
    pub fn resolve_str(&self, template: &str) -> Result<String, TemplateError> {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                result.push_str(&rest[start..]);
                return Ok(result);
            };
            let replacement = self.resolve_placeholder(after[..end].trim())?;
            result.push_str(&replacement);
            rest = &after[end + 2..];
        }

        result.push_str(rest);
        Ok(result)
    }

    /// Resolve placeholders in a nested argument value.
    ///
    /// Structure is preserved; only string leaves are substituted (as
    /// strings -- a placeholder inside a string never changes its type).
    pub fn resolve_value(&self, value: &Value) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => Ok(Value::String(self.resolve_str(s)?)),
            Value::Array(items) => {
                let resolved: Result<Vec<_>, _> =
                    items.iter().map(|v| self.resolve_value(v)).collect();
                Ok(Value::Array(resolved?))
            }
            Value::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    resolved.insert(k.clone(), self.resolve_value(v)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// Build the JSON object that condition expressions evaluate against.
    ///
    /// Shape:
    /// ```json
    /// {
    ///   "steps": { "<step_id>": { "output": <value> }, ... },
    ///   "variables": { ... }
    /// }
    /// ```
    pub fn to_expression_context(&self) -> Value {
        let mut steps = serde_json::Map::new();
        for (id, output) in &self.step_outputs {
            steps.insert(id.clone(), json!({ "output": output }));
        }
        json!({
            "steps": steps,
            "variables": self.variables,
        })
    }

    /// Resolve one placeholder body (text between the braces, trimmed).
    fn resolve_placeholder(&self, expr: &str) -> Result<String, TemplateError> {
        if let Some(rest) = expr.strip_prefix("steps.") {
            let Some(pos) = rest.find(".output") else {
                return Err(TemplateError::UnsupportedPlaceholder(expr.to_string()));
            };
            let step_id = &rest[..pos];
            let path = &rest[pos + ".output".len()..];
            if !path.is_empty() && !path.starts_with('.') {
                return Err(TemplateError::UnsupportedPlaceholder(expr.to_string()));
            }

            let output = self
                .step_outputs
                .get(step_id)
                .ok_or_else(|| TemplateError::UnknownStep(step_id.to_string()))?;

            let mut current = output;
            for segment in path.trim_start_matches('.').split('.') {
                if segment.is_empty() {
                    continue;
                }
                current = lookup_segment(current, segment).ok_or_else(|| {
                    TemplateError::MissingPath {
                        step: step_id.to_string(),
                        path: path.trim_start_matches('.').to_string(),
                    }
                })?;
            }
            return Ok(value_to_string(current));
        }

        if let Some(key) = expr.strip_prefix("variables.") {
            let value = self
                .variables
                .get(key)
                .ok_or_else(|| TemplateError::UnknownVariable(key.to_string()))?;
            return Ok(value_to_string(value));
        }

        Err(TemplateError::UnsupportedPlaceholder(expr.to_string()))
    }
}

/// Descend one path segment: object key, or index into an array.
fn lookup_segment<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Convert a JSON value to its interpolated string form.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Objects and arrays interpolate as compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
