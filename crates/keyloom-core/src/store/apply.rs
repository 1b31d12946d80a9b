//! Application of parsed update expressions to stored items.

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::expression::PathSegment;
use crate::types::{Item, PARTITION_KEY_ATTR, SORT_KEY_ATTR, Value, normalize_number_set};

use super::eval::resolve_path;
use super::parser::{Operand, SetValue, UpdateExpr};

/// Reject updates that touch the key attributes of the item.
pub(crate) fn validate_no_key_updates(update: &UpdateExpr) -> Result<(), StoreError> {
    for path in update.paths() {
        if let Some(PathSegment::Attribute(name)) = path.first()
            && (name == PARTITION_KEY_ATTR || name == SORT_KEY_ATTR)
        {
            return Err(StoreError::Validation(format!(
                "cannot update attribute {name}; it is part of the key"
            )));
        }
    }
    Ok(())
}

/// Apply an update to an item in place.
///
/// `SET` operands are evaluated against the item as it was before the
/// update. On error the item may be partially modified; callers apply to a
/// copy.
pub(crate) fn apply_update(item: &mut Item, update: &UpdateExpr) -> Result<(), StoreError> {
    let original = item.clone();

    let assignments = update
        .set
        .iter()
        .map(|(path, value)| Ok((path, evaluate_set_value(value, &original)?)))
        .collect::<Result<Vec<_>, StoreError>>()?;
    for (path, value) in assignments {
        set_path(item, path, value)?;
    }

    for path in &update.remove {
        remove_path(item, path);
    }
    for (path, value) in &update.add {
        apply_add(item, path, value)?;
    }
    for (path, value) in &update.delete {
        apply_delete(item, path, value)?;
    }
    Ok(())
}

fn type_mismatch(path: &[PathSegment], message: impl Into<String>) -> StoreError {
    StoreError::Validation(format!(
        "{}: {}",
        crate::expression::path::format_path(path),
        message.into()
    ))
}

fn evaluate_set_value(value: &SetValue, original: &Item) -> Result<Value, StoreError> {
    match value {
        SetValue::Operand(Operand::Value(v)) => Ok(v.clone()),
        SetValue::Operand(Operand::Path(path)) => resolve_path(original, path)
            .cloned()
            .ok_or_else(|| type_mismatch(path, "attribute referenced in SET does not exist")),
        SetValue::Operand(Operand::Size(_)) => Err(StoreError::Validation(
            "size() cannot be used in an update expression".to_string(),
        )),
        SetValue::IfNotExists(path, fallback) => match resolve_path(original, path) {
            Some(existing) => Ok(existing.clone()),
            None => evaluate_set_value(fallback, original),
        },
        SetValue::ListAppend(first, second) => {
            match (
                evaluate_set_value(first, original)?,
                evaluate_set_value(second, original)?,
            ) {
                (Value::List(mut a), Value::List(b)) => {
                    a.extend(b);
                    Ok(Value::List(a))
                }
                (a, b) => Err(StoreError::Validation(format!(
                    "list_append requires two lists, got {} and {}",
                    a.kind(),
                    b.kind()
                ))),
            }
        }
        SetValue::Plus(a, b) | SetValue::Minus(a, b) => {
            let plus = matches!(value, SetValue::Plus(..));
            match (
                evaluate_set_value(a, original)?,
                evaluate_set_value(b, original)?,
            ) {
                (Value::Number(a), Value::Number(b)) => {
                    Ok(Value::Number(if plus { a + b } else { a - b }))
                }
                (a, b) => Err(StoreError::Validation(format!(
                    "arithmetic requires two numbers, got {} and {}",
                    a.kind(),
                    b.kind()
                ))),
            }
        }
    }
}

/// Set the value at a path, creating intermediate maps for missing
/// attribute segments. An index past the end of a list appends.
fn set_path(item: &mut Item, path: &[PathSegment], value: Value) -> Result<(), StoreError> {
    let Some((PathSegment::Attribute(first), rest)) = path.split_first() else {
        return Err(type_mismatch(path, "path must start with an attribute name"));
    };
    if rest.is_empty() {
        item.insert(first.clone(), value);
        return Ok(());
    }
    let entry = item
        .entry(first.clone())
        .or_insert_with(|| Value::Map(BTreeMap::new()));
    set_in_value(entry, rest, value).map_err(|message| type_mismatch(path, message))
}

fn set_in_value(target: &mut Value, path: &[PathSegment], value: Value) -> Result<(), String> {
    let Some((segment, rest)) = path.split_first() else {
        *target = value;
        return Ok(());
    };
    match (segment, target) {
        (PathSegment::Attribute(name), Value::Map(map)) => {
            if rest.is_empty() {
                map.insert(name.clone(), value);
                return Ok(());
            }
            let child = map
                .entry(name.clone())
                .or_insert_with(|| Value::Map(BTreeMap::new()));
            set_in_value(child, rest, value)
        }
        (PathSegment::Index(i), Value::List(items)) => {
            if *i < items.len() {
                set_in_value(&mut items[*i], rest, value)
            } else if rest.is_empty() {
                items.push(value);
                Ok(())
            } else {
                Err(format!("list index {i} is out of range"))
            }
        }
        (segment, other) => Err(format!("cannot apply {segment} to a {}", other.kind())),
    }
}

fn get_path_mut<'a>(item: &'a mut Item, path: &[PathSegment]) -> Option<&'a mut Value> {
    let (PathSegment::Attribute(first), rest) = path.split_first()? else {
        return None;
    };
    let mut current = item.get_mut(first)?;
    for segment in rest {
        current = match (segment, current) {
            (PathSegment::Attribute(name), Value::Map(map)) => map.get_mut(name)?,
            (PathSegment::Index(i), Value::List(items)) => items.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Remove the value at a path. Missing paths are a silent no-op.
fn remove_path(item: &mut Item, path: &[PathSegment]) {
    let Some((last, parent)) = path.split_last() else {
        return;
    };
    if parent.is_empty() {
        if let PathSegment::Attribute(name) = last {
            item.remove(name);
        }
        return;
    }
    match (last, get_path_mut(item, parent)) {
        (PathSegment::Attribute(name), Some(Value::Map(map))) => {
            map.remove(name);
        }
        (PathSegment::Index(i), Some(Value::List(items))) if *i < items.len() => {
            items.remove(*i);
        }
        _ => {}
    }
}

/// `ADD`: numeric increment or set union. A missing attribute is
/// initialized to the operand.
fn apply_add(item: &mut Item, path: &[PathSegment], value: &Value) -> Result<(), StoreError> {
    let Some(existing) = get_path_mut(item, path) else {
        if !matches!(
            value,
            Value::Number(_) | Value::StringSet(_) | Value::NumberSet(_)
        ) {
            return Err(type_mismatch(
                path,
                format!("ADD requires a number or a set, got {}", value.kind()),
            ));
        }
        return set_path(item, path, value.clone());
    };
    match (existing, value) {
        (Value::Number(a), Value::Number(b)) => *a += b,
        (Value::StringSet(a), Value::StringSet(b)) => a.extend(b.iter().cloned()),
        (Value::NumberSet(a), Value::NumberSet(b)) => {
            a.extend(b.iter().copied());
            normalize_number_set(a);
        }
        (existing, value) => {
            return Err(type_mismatch(
                path,
                format!(
                    "ADD cannot combine existing {} with {}",
                    existing.kind(),
                    value.kind()
                ),
            ));
        }
    }
    Ok(())
}

/// `DELETE`: set difference. An emptied set is removed; a missing
/// attribute is a no-op.
fn apply_delete(item: &mut Item, path: &[PathSegment], value: &Value) -> Result<(), StoreError> {
    if !matches!(value, Value::StringSet(_) | Value::NumberSet(_)) {
        return Err(type_mismatch(
            path,
            format!("DELETE requires a set, got {}", value.kind()),
        ));
    }
    let Some(existing) = get_path_mut(item, path) else {
        return Ok(());
    };
    let now_empty = match (existing, value) {
        (Value::StringSet(a), Value::StringSet(b)) => {
            a.retain(|s| !b.contains(s));
            a.is_empty()
        }
        (Value::NumberSet(a), Value::NumberSet(b)) => {
            a.retain(|n| !b.contains(n));
            a.is_empty()
        }
        (existing, value) => {
            return Err(type_mismatch(
                path,
                format!(
                    "DELETE cannot remove {} from {}",
                    value.kind(),
                    existing.kind()
                ),
            ));
        }
    };
    if now_empty {
        remove_path(item, path);
    }
    Ok(())
}
