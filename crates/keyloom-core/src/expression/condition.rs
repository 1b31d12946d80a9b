//! Condition compiler: operator maps to native condition/filter expressions.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::error::{QueryError, UpdateError};
use crate::types::Value;

use super::CompiledExpression;

/// A native expression fragment injected verbatim into a compiled condition.
///
/// Escape hatch for predicates the operator set cannot express. The
/// fragment's own placeholders must not collide with the `#exp`/`:exp`
/// prefix used by the compiler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawExpression {
    pub expression: String,
    pub names: BTreeMap<String, String>,
    pub values: BTreeMap<String, Value>,
}

impl RawExpression {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            ..Self::default()
        }
    }

    pub fn name(mut self, placeholder: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.names.insert(placeholder.into(), attribute.into());
        self
    }

    pub fn value(mut self, placeholder: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(placeholder.into(), value.into());
        self
    }
}

/// A per-field condition operator.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionOp {
    /// Plain literal or `$eq`.
    Eq(Value),
    Ne(Value),
    Exists(bool),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    BeginsWith(Value),
    BetweenIncl(Value, Value),
    In(Vec<Value>),
    Contains(Value),
    Raw(RawExpression),
}

macro_rules! literal_condition {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ConditionOp {
            fn from(value: $ty) -> Self {
                ConditionOp::Eq(Value::from(value))
            }
        })*
    };
}

literal_condition!(&str, String, bool, f64, i64, i32, u32, u64);

impl From<Value> for ConditionOp {
    fn from(value: Value) -> Self {
        ConditionOp::Eq(value)
    }
}

/// An ordered map of field name to condition operator.
///
/// Fields compile in insertion order; inserting an existing field replaces
/// its operator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    entries: Vec<(String, ConditionOp)>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, field: impl Into<String>, op: impl Into<ConditionOp>) -> Self {
        self.insert(field, op);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, op: impl Into<ConditionOp>) {
        let field = field.into();
        let op = op.into();
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some(entry) => entry.1 = op,
            None => self.entries.push((field, op)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&ConditionOp> {
        self.entries
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, op)| op)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConditionOp)> {
        self.entries.iter().map(|(f, op)| (f.as_str(), op))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union another condition into this one, field by field.
    ///
    /// A field present in both must carry an identical operator, otherwise
    /// the merge fails with `ConflictingUpdate` and `self` is left untouched.
    pub fn merge(&mut self, other: &Condition) -> Result<(), UpdateError> {
        for (field, op) in other.iter() {
            if let Some(existing) = self.get(field)
                && existing != op
            {
                return Err(UpdateError::ConflictingUpdate(field.to_string()));
            }
        }
        for (field, op) in other.iter() {
            if self.get(field).is_none() {
                self.entries.push((field.to_string(), op.clone()));
            }
        }
        Ok(())
    }

    /// Parse a JSON operator map such as
    /// `{"age": {"$gte": 18}, "name": "Alice", "email": {"$exists": true}}`.
    ///
    /// An object whose keys start with `$` is an operator; it must have
    /// exactly one key naming a known operator with a well-formed argument.
    /// Any other value is a literal equality match.
    pub fn from_json(json: &Json) -> Result<Self, QueryError> {
        let map = json.as_object().ok_or_else(|| QueryError::UnknownCondition {
            field: String::new(),
            value: json.to_string(),
        })?;
        let mut condition = Condition::new();
        for (field, value) in map {
            condition.insert(field.as_str(), parse_operator(field, value)?);
        }
        Ok(condition)
    }
}

fn parse_operator(field: &str, json: &Json) -> Result<ConditionOp, QueryError> {
    let unknown = || QueryError::UnknownCondition {
        field: field.to_string(),
        value: json.to_string(),
    };

    let Some(map) = json.as_object() else {
        return Ok(ConditionOp::Eq(Value::from(json.clone())));
    };
    if !map.keys().any(|k| k.starts_with('$')) {
        return Ok(ConditionOp::Eq(Value::from(json.clone())));
    }
    if map.len() != 1 {
        return Err(unknown());
    }
    let Some((op, arg)) = map.iter().next() else {
        return Err(unknown());
    };
    let arg_value = || Value::from(arg.clone());

    match op.as_str() {
        "$eq" => Ok(ConditionOp::Eq(arg_value())),
        "$ne" => Ok(ConditionOp::Ne(arg_value())),
        "$exists" => arg.as_bool().map(ConditionOp::Exists).ok_or_else(unknown),
        "$gt" => Ok(ConditionOp::Gt(arg_value())),
        "$gte" => Ok(ConditionOp::Gte(arg_value())),
        "$lt" => Ok(ConditionOp::Lt(arg_value())),
        "$lte" => Ok(ConditionOp::Lte(arg_value())),
        "$beginsWith" => Ok(ConditionOp::BeginsWith(arg_value())),
        "$contains" => Ok(ConditionOp::Contains(arg_value())),
        "$betweenIncl" => match arg.as_array().map(Vec::as_slice) {
            Some([lo, hi]) => Ok(ConditionOp::BetweenIncl(
                Value::from(lo.clone()),
                Value::from(hi.clone()),
            )),
            _ => Err(unknown()),
        },
        "$in" => arg
            .as_array()
            .map(|items| ConditionOp::In(items.iter().cloned().map(Value::from).collect()))
            .ok_or_else(unknown),
        "$raw" => parse_raw(arg).ok_or_else(unknown).map(ConditionOp::Raw),
        _ => Err(unknown()),
    }
}

fn parse_raw(arg: &Json) -> Option<RawExpression> {
    let map = arg.as_object()?;
    let mut raw = RawExpression::new(map.get("expression")?.as_str()?);
    if let Some(names) = map.get("names") {
        for (placeholder, attribute) in names.as_object()? {
            raw.names
                .insert(placeholder.clone(), attribute.as_str()?.to_string());
        }
    }
    if let Some(values) = map.get("values") {
        for (placeholder, value) in values.as_object()? {
            raw.values
                .insert(placeholder.clone(), Value::from(value.clone()));
        }
    }
    Some(raw)
}

/// Compile a condition into a native expression.
///
/// Field `i` binds `#exp{i}` to its name and `:exp{i}` (or `:exp{i}_lo`,
/// `:exp{i}_hi`, `:exp{i}_{n}` for multi-valued operators) to its values.
/// Each field's clause is parenthesized and clauses are joined with `AND`.
/// `$raw` fragments are inserted verbatim with their own bindings. An absent
/// or empty condition compiles to an empty (always-true) expression.
pub fn compile_condition(condition: Option<&Condition>) -> CompiledExpression {
    let Some(condition) = condition else {
        return CompiledExpression::empty();
    };

    let mut clauses = Vec::with_capacity(condition.len());
    let mut compiled = CompiledExpression::empty();

    for (i, (field, op)) in condition.iter().enumerate() {
        let name = format!("#exp{i}");
        let value = format!(":exp{i}");

        if !matches!(op, ConditionOp::Raw(_)) {
            compiled.names.insert(name.clone(), field.to_string());
        }
        let clause = match op {
            ConditionOp::Eq(v) => binary(&mut compiled, &name, "=", value, v),
            ConditionOp::Ne(v) => binary(&mut compiled, &name, "<>", value, v),
            ConditionOp::Gt(v) => binary(&mut compiled, &name, ">", value, v),
            ConditionOp::Gte(v) => binary(&mut compiled, &name, ">=", value, v),
            ConditionOp::Lt(v) => binary(&mut compiled, &name, "<", value, v),
            ConditionOp::Lte(v) => binary(&mut compiled, &name, "<=", value, v),
            ConditionOp::Exists(true) => format!("attribute_exists({name})"),
            ConditionOp::Exists(false) => format!("attribute_not_exists({name})"),
            ConditionOp::BeginsWith(v) => {
                compiled.values.insert(value.clone(), v.clone());
                format!("begins_with({name}, {value})")
            }
            ConditionOp::Contains(v) => {
                compiled.values.insert(value.clone(), v.clone());
                format!("contains({name}, {value})")
            }
            ConditionOp::BetweenIncl(lo, hi) => {
                let lo_ref = format!("{value}_lo");
                let hi_ref = format!("{value}_hi");
                compiled.values.insert(lo_ref.clone(), lo.clone());
                compiled.values.insert(hi_ref.clone(), hi.clone());
                format!("{name} BETWEEN {lo_ref} AND {hi_ref}")
            }
            ConditionOp::In(items) if items.is_empty() => {
                // Nothing is a member of the empty set.
                format!("attribute_exists({name}) AND attribute_not_exists({name})")
            }
            ConditionOp::In(items) => {
                let refs: Vec<String> = items
                    .iter()
                    .enumerate()
                    .map(|(n, item)| {
                        let r = format!("{value}_{n}");
                        compiled.values.insert(r.clone(), item.clone());
                        r
                    })
                    .collect();
                format!("{name} IN ({})", refs.join(", "))
            }
            ConditionOp::Raw(raw) => {
                compiled.names.extend(raw.names.clone());
                compiled.values.extend(raw.values.clone());
                raw.expression.clone()
            }
        };
        clauses.push(format!("({clause})"));
    }

    if !clauses.is_empty() {
        compiled.expression = Some(clauses.join(" AND "));
    }
    compiled
}

fn binary(
    compiled: &mut CompiledExpression,
    name: &str,
    operator: &str,
    value_ref: String,
    value: &Value,
) -> String {
    let clause = format!("{name} {operator} {value_ref}");
    compiled.values.insert(value_ref, value.clone());
    clause
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // Compilation
    // -----------------------------------------------------------------------

    #[test]
    fn test_empty_condition() {
        assert!(compile_condition(None).is_empty());
        assert!(compile_condition(Some(&Condition::new())).is_empty());
    }

    #[test]
    fn test_literal_equality() {
        let c = Condition::new().with("name", "Alice");
        let compiled = compile_condition(Some(&c));
        assert_eq!(compiled.expression.as_deref(), Some("(#exp0 = :exp0)"));
        assert_eq!(compiled.names["#exp0"], "name");
        assert_eq!(compiled.values[":exp0"], Value::from("Alice"));
    }

    #[test]
    fn test_multiple_fields_joined_with_and() {
        let c = Condition::new()
            .with("age", ConditionOp::Gte(Value::from(18)))
            .with("email", ConditionOp::Exists(true))
            .with("status", ConditionOp::Ne(Value::from("banned")));
        let compiled = compile_condition(Some(&c));
        assert_eq!(
            compiled.expression.as_deref(),
            Some("(#exp0 >= :exp0) AND (attribute_exists(#exp1)) AND (#exp2 <> :exp2)")
        );
        assert_eq!(compiled.names.len(), 3);
        assert_eq!(compiled.values.len(), 2);
    }

    #[test]
    fn test_operator_forms() {
        let cases = vec![
            (ConditionOp::Gt(Value::from(1)), "(#exp0 > :exp0)"),
            (ConditionOp::Lt(Value::from(1)), "(#exp0 < :exp0)"),
            (ConditionOp::Lte(Value::from(1)), "(#exp0 <= :exp0)"),
            (ConditionOp::Exists(false), "(attribute_not_exists(#exp0))"),
            (
                ConditionOp::BeginsWith(Value::from("ab")),
                "(begins_with(#exp0, :exp0))",
            ),
            (
                ConditionOp::Contains(Value::from("x")),
                "(contains(#exp0, :exp0))",
            ),
            (
                ConditionOp::BetweenIncl(Value::from(1), Value::from(5)),
                "(#exp0 BETWEEN :exp0_lo AND :exp0_hi)",
            ),
            (
                ConditionOp::In(vec![Value::from(1), Value::from(2)]),
                "(#exp0 IN (:exp0_0, :exp0_1))",
            ),
        ];
        for (op, expected) in cases {
            let c = Condition::new().with("f", op.clone());
            let compiled = compile_condition(Some(&c));
            assert_eq!(compiled.expression.as_deref(), Some(expected), "{op:?}");
        }
    }

    #[test]
    fn test_raw_fragment() {
        let raw = RawExpression::new("size(#tags) > :n")
            .name("#tags", "tags")
            .value(":n", 2);
        let c = Condition::new()
            .with("id", 1)
            .with("tags", ConditionOp::Raw(raw));
        let compiled = compile_condition(Some(&c));
        assert_eq!(
            compiled.expression.as_deref(),
            Some("(#exp0 = :exp0) AND (size(#tags) > :n)")
        );
        // The raw field gets no positional name binding of its own.
        assert!(!compiled.names.contains_key("#exp1"));
        assert_eq!(compiled.names["#tags"], "tags");
        assert_eq!(compiled.values[":n"], Value::from(2));
    }

    // -----------------------------------------------------------------------
    // JSON operator maps
    // -----------------------------------------------------------------------

    #[test]
    fn test_from_json() {
        let c = Condition::from_json(&json!({
            "name": "Alice",
            "age": {"$betweenIncl": [18, 65]},
            "tags": {"$in": ["a", "b"]},
            "email": {"$exists": false},
            "address": {"city": "Portland"}
        }))
        .unwrap();
        assert_eq!(c.get("name"), Some(&ConditionOp::Eq(Value::from("Alice"))));
        assert_eq!(
            c.get("age"),
            Some(&ConditionOp::BetweenIncl(Value::from(18), Value::from(65)))
        );
        assert_eq!(c.get("email"), Some(&ConditionOp::Exists(false)));
        // Objects without operator keys are literal map values.
        assert!(matches!(c.get("address"), Some(ConditionOp::Eq(Value::Map(_)))));
    }

    #[test]
    fn test_from_json_raw() {
        let c = Condition::from_json(&json!({
            "x": {"$raw": {"expression": "#x > :x", "names": {"#x": "x"}, "values": {":x": 1}}}
        }))
        .unwrap();
        let Some(ConditionOp::Raw(raw)) = c.get("x") else {
            panic!("expected raw condition");
        };
        assert_eq!(raw.expression, "#x > :x");
        assert_eq!(raw.values[":x"], Value::from(1));
    }

    #[test]
    fn test_unknown_operator() {
        for bad in [
            json!({"age": {"$near": 5}}),
            json!({"age": {"$gt": 1, "$lt": 5}}),
            json!({"age": {"$exists": "yes"}}),
            json!({"age": {"$betweenIncl": [1]}}),
            json!({"age": {"$in": 3}}),
            json!({"age": {"$raw": {"names": {}}}}),
        ] {
            let err = Condition::from_json(&bad).unwrap_err();
            assert!(
                matches!(err, QueryError::UnknownCondition { ref field, .. } if field == "age"),
                "{bad}"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Merge
    // -----------------------------------------------------------------------

    #[test]
    fn test_merge_union() {
        let mut a = Condition::new().with("x", 1);
        let b = Condition::new().with("x", 1).with("y", ConditionOp::Exists(true));
        a.merge(&b).unwrap();
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_merge_conflict_leaves_target_untouched() {
        let mut a = Condition::new().with("x", 1);
        let b = Condition::new().with("y", 2).with("x", 3);
        let err = a.merge(&b).unwrap_err();
        assert!(matches!(err, UpdateError::ConflictingUpdate(ref f) if f == "x"));
        assert_eq!(a, Condition::new().with("x", 1));
    }
}
