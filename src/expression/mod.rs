//! Boolean expression evaluation
//!
//! Entity matching delegates to a [`BooleanExpressionEvaluator`]. Any
//! sandboxed, side-effect-free engine fits, as long as it tells malformed
//! expressions ([`ExpressionError::Syntax`]) apart from runtime failures
//! ([`ExpressionError::Evaluation`]), since the two are logged differently.
//!
//! [`SimpleEvaluator`] is the built-in engine used by the daemon.

pub mod simple;

use serde_json::Value;

pub use crate::error::ExpressionError;
pub use simple::SimpleEvaluator;

/// Named values an expression can reference
#[derive(Debug, Clone, Default)]
pub struct Bindings<'a> {
    vars: Vec<(&'a str, &'a Value)>,
}

impl<'a> Bindings<'a> {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    /// Bind `value` to `name`, shadowing any earlier binding of the same name
    pub fn with(mut self, name: &'a str, value: &'a Value) -> Self {
        self.vars.push((name, value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }
}

/// Evaluates an expression against bindings and reduces it to a boolean
pub trait BooleanExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, bindings: &Bindings<'_>) -> Result<bool, ExpressionError>;
}

impl<F> BooleanExpressionEvaluator for F
where
    F: Fn(&str, &Bindings<'_>) -> Result<bool, ExpressionError> + Send + Sync,
{
    fn evaluate(&self, expression: &str, bindings: &Bindings<'_>) -> Result<bool, ExpressionError> {
        self(expression, bindings)
    }
}

/// Truthiness of a JSON value: null, false, 0, "" and empty collections are false
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
