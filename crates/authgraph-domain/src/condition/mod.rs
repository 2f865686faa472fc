//! Tuple condition evaluation.
//!
//! Conditions are boolean CEL expressions named by the authorization model
//! and referenced by tuples. The check path treats evaluation as an opaque
//! `eval(condition, tuple context, request context) -> bool | error` seam;
//! this module implements that seam with `cel-interpreter` and a compiled
//! program cache.

use std::collections::HashMap;
use std::panic;
use std::sync::Arc;

use cel_interpreter::objects::Key;
use cel_interpreter::{Context, Program, Value};
use dashmap::DashMap;

use crate::error::{DomainError, DomainResult};
use crate::model::ConditionDefinition;

/// Evaluates tuple conditions, caching compiled expressions by source text.
///
/// Thread-safe; one evaluator is shared by all checks.
#[derive(Default)]
pub struct ConditionEvaluator {
    programs: DashMap<String, Arc<Program>>,
}

impl ConditionEvaluator {
    /// Creates an evaluator with an empty program cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates `condition` against the merged context.
    ///
    /// Tuple condition context takes precedence over request context:
    /// parameters bound at write time cannot be weakened by the caller.
    ///
    /// # Errors
    /// Returns `DomainError::ConditionEvaluationFailed` when the expression
    /// does not compile, references missing variables, or does not produce a
    /// boolean.
    pub fn evaluate(
        &self,
        condition: &ConditionDefinition,
        tuple_context: Option<&HashMap<String, serde_json::Value>>,
        request_context: &HashMap<String, serde_json::Value>,
    ) -> DomainResult<bool> {
        let program = self.compiled(condition)?;

        let mut merged = request_context.clone();
        if let Some(tuple_context) = tuple_context {
            merged.extend(tuple_context.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let merged: HashMap<Key, Value> = merged
            .iter()
            .map(|(k, v)| (Key::String(k.clone().into()), json_to_cel_value(v)))
            .collect();

        let mut cel_context = Context::default();
        cel_context
            .add_variable("context", Value::Map(merged.into()))
            .map_err(|e| evaluation_failed(&condition.name, e.to_string()))?;

        match program.execute(&cel_context) {
            Ok(Value::Bool(result)) => Ok(result),
            Ok(other) => Err(evaluation_failed(
                &condition.name,
                format!("expression produced a non-boolean value: {other:?}"),
            )),
            Err(e) => Err(evaluation_failed(&condition.name, e.to_string())),
        }
    }

    fn compiled(&self, condition: &ConditionDefinition) -> DomainResult<Arc<Program>> {
        if let Some(program) = self.programs.get(&condition.expression) {
            return Ok(Arc::clone(program.value()));
        }

        // The underlying parser may panic on some malformed input; surface a
        // clean error instead.
        let compiled = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            Program::compile(&condition.expression)
        }));
        let program = match compiled {
            Ok(Ok(program)) => Arc::new(program),
            Ok(Err(e)) => return Err(evaluation_failed(&condition.name, e.to_string())),
            Err(_) => {
                return Err(evaluation_failed(
                    &condition.name,
                    "parser encountered an internal error".to_string(),
                ))
            }
        };

        self.programs
            .insert(condition.expression.clone(), Arc::clone(&program));
        Ok(program)
    }
}

impl std::fmt::Debug for ConditionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionEvaluator")
            .field("cached_programs", &self.programs.len())
            .finish()
    }
}

fn evaluation_failed(name: &str, reason: String) -> DomainError {
    DomainError::ConditionEvaluationFailed {
        name: name.to_string(),
        reason,
    }
}

/// Converts a JSON value into a CEL value.
///
/// Numbers are tried as i64, then u64, then f64, so large integers keep
/// their precision instead of degrading through floating point.
fn json_to_cel_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone().into()),
        serde_json::Value::Array(items) => Value::List(
            items
                .iter()
                .map(json_to_cel_value)
                .collect::<Vec<_>>()
                .into(),
        ),
        serde_json::Value::Object(fields) => {
            let map: HashMap<Key, Value> = fields
                .iter()
                .map(|(k, v)| (Key::String(k.clone().into()), json_to_cel_value(v)))
                .collect();
            Value::Map(map.into())
        }
    }
}
