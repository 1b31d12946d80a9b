//! Evaluation of parsed conditions against stored items.

use std::cmp::Ordering;

use crate::expression::PathSegment;
use crate::types::{Item, Value};

use super::parser::{Comparator, CondExpr, Operand};

/// Evaluate a condition against an item. A missing item is an empty one.
pub(crate) fn evaluate(condition: &CondExpr, item: &Item) -> bool {
    match condition {
        CondExpr::Compare(comparator, left, right) => {
            let (Some(l), Some(r)) = (resolve(left, item), resolve(right, item)) else {
                // Missing operands are unequal to everything.
                return *comparator == Comparator::Ne;
            };
            match comparator {
                Comparator::Eq => values_equal(&l, &r),
                Comparator::Ne => !values_equal(&l, &r),
                Comparator::Lt => compare_values(&l, &r) == Some(Ordering::Less),
                Comparator::Le => matches!(
                    compare_values(&l, &r),
                    Some(Ordering::Less | Ordering::Equal)
                ),
                Comparator::Gt => compare_values(&l, &r) == Some(Ordering::Greater),
                Comparator::Ge => matches!(
                    compare_values(&l, &r),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
            }
        }
        CondExpr::Between(subject, lo, hi) => {
            let (Some(v), Some(lo), Some(hi)) =
                (resolve(subject, item), resolve(lo, item), resolve(hi, item))
            else {
                return false;
            };
            let ge_low = matches!(
                compare_values(&v, &lo),
                Some(Ordering::Greater | Ordering::Equal)
            );
            let le_high = matches!(
                compare_values(&v, &hi),
                Some(Ordering::Less | Ordering::Equal)
            );
            ge_low && le_high
        }
        CondExpr::In(subject, candidates) => {
            let Some(v) = resolve(subject, item) else {
                return false;
            };
            candidates
                .iter()
                .filter_map(|c| resolve(c, item))
                .any(|c| values_equal(&v, &c))
        }
        CondExpr::BeginsWith(subject, prefix) => {
            match (resolve(subject, item), resolve(prefix, item)) {
                (Some(Value::String(s)), Some(Value::String(p))) => s.starts_with(p.as_str()),
                _ => false,
            }
        }
        CondExpr::Contains(subject, needle) => {
            match (resolve(subject, item), resolve(needle, item)) {
                (Some(Value::String(s)), Some(Value::String(n))) => s.contains(n.as_str()),
                (Some(Value::StringSet(set)), Some(Value::String(n))) => set.contains(&n),
                (Some(Value::NumberSet(set)), Some(Value::Number(n))) => set.contains(&n),
                (Some(Value::List(items)), Some(n)) => items.iter().any(|v| values_equal(v, &n)),
                _ => false,
            }
        }
        CondExpr::Exists(path) => resolve_path(item, path).is_some(),
        CondExpr::NotExists(path) => resolve_path(item, path).is_none(),
        CondExpr::And(a, b) => evaluate(a, item) && evaluate(b, item),
        CondExpr::Or(a, b) => evaluate(a, item) || evaluate(b, item),
        CondExpr::Not(inner) => !evaluate(inner, item),
    }
}

/// Evaluate an optional condition; `None` always holds.
pub(crate) fn holds(condition: Option<&CondExpr>, item: &Item) -> bool {
    condition.is_none_or(|c| evaluate(c, item))
}

fn resolve(operand: &Operand, item: &Item) -> Option<Value> {
    match operand {
        Operand::Value(v) => Some(v.clone()),
        Operand::Path(path) => resolve_path(item, path).cloned(),
        Operand::Size(inner) => {
            let size = match resolve(inner, item)? {
                Value::String(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Map(map) => map.len(),
                Value::StringSet(set) => set.len(),
                Value::NumberSet(set) => set.len(),
                _ => return None,
            };
            Some(Value::Number(size as f64))
        }
    }
}

/// Resolve a path on an item. Present-but-null attributes resolve to
/// `Some(Value::Null)`.
pub(crate) fn resolve_path<'a>(item: &'a Item, path: &[PathSegment]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let PathSegment::Attribute(name) = first else {
        return None;
    };
    let mut current = item.get(name)?;
    for segment in rest {
        current = match (segment, current) {
            (PathSegment::Attribute(name), Value::Map(map)) => map.get(name)?,
            (PathSegment::Index(i), Value::List(items)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Equality across all value types; numbers compare numerically.
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a == b,
        _ => left == right,
    }
}

/// Ordering for the comparable scalar types. Mismatched types have none.
pub(crate) fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        _ => None,
    }
}
