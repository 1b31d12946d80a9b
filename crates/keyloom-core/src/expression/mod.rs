//! Compilers from structured conditions, key queries and update maps into the
//! store's native expression syntax.
//!
//! Every compiler produces a [`CompiledExpression`]: an expression string
//! with `#name` / `:value` placeholders, plus the bindings for them. Each
//! compiler uses its own placeholder prefix, so the outputs for one request
//! (condition + update, or key condition + filter) never collide.

pub mod condition;
pub mod path;
pub mod query;
pub mod update;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Value;

pub use condition::{Condition, ConditionOp, RawExpression, compile_condition};
pub use path::{PathSegment, parse_path};
pub use query::{KeyPredicate, KeyQuery, compile_key_condition, compile_key_condition_on};
pub use update::{CompiledUpdate, UpdateValue, UpdateValues, compile_update};

/// A native expression with its placeholder bindings.
///
/// `expression: None` means "no expression" (an always-true condition or
/// no filter).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledExpression {
    pub expression: Option<String>,
    pub names: BTreeMap<String, String>,
    pub values: BTreeMap<String, Value>,
}

impl CompiledExpression {
    /// An expression that constrains nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: Some(expression.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.expression.is_none()
    }

    /// Bind a `#name` placeholder.
    pub fn name(mut self, placeholder: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.names.insert(placeholder.into(), attribute.into());
        self
    }

    /// Bind a `:value` placeholder.
    pub fn value(mut self, placeholder: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(placeholder.into(), value.into());
        self
    }

    /// Conjoin two expressions, parenthesizing each side.
    pub fn and(self, other: CompiledExpression) -> CompiledExpression {
        let expression = match (self.expression, other.expression) {
            (Some(a), Some(b)) => Some(format!("({a}) AND ({b})")),
            (a, b) => a.or(b),
        };
        let mut names = self.names;
        names.extend(other.names);
        let mut values = self.values;
        values.extend(other.values);
        CompiledExpression {
            expression,
            names,
            values,
        }
    }
}
