//! Update-expression compiler and the per-field update operators.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::error::UpdateError;
use crate::types::Value;

use super::CompiledExpression;
use super::path::{PathSegment, parse_path};

/// A per-field update operator.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateValue {
    /// Plain value: `SET field = value`.
    Literal(Value),
    /// `$inc`: add to the current number, treating a missing field as 0.
    Inc(f64),
    /// `$setIfNotExists`: set only when the field is absent.
    SetIfNotExists(Value),
    /// `$remove`.
    Remove,
    /// `$addItemsToSet`: a set, or a list of all strings or all numbers.
    AddItemsToSet(Value),
    /// `$removeItemsFromSet`: same accepted shapes as `AddItemsToSet`.
    RemoveItemsFromSet(Value),
    /// `$appendItemsToList`: append, creating the list when absent.
    AppendItemsToList(Vec<Value>),
    /// Skipped by the compiler and yields to anything it is merged with.
    Noop,
}

macro_rules! literal_update {
    ($($ty:ty),*) => {
        $(impl From<$ty> for UpdateValue {
            fn from(value: $ty) -> Self {
                UpdateValue::Literal(Value::from(value))
            }
        })*
    };
}

literal_update!(&str, String, bool, f64, i64, i32, u32, u64);

impl From<Value> for UpdateValue {
    fn from(value: Value) -> Self {
        UpdateValue::Literal(value)
    }
}

impl From<Option<Value>> for UpdateValue {
    fn from(value: Option<Value>) -> Self {
        value.map_or(UpdateValue::Noop, UpdateValue::Literal)
    }
}

impl UpdateValue {
    /// Combine two operators targeting the same field.
    ///
    /// `Noop` yields to the other side and two increments sum. Otherwise the
    /// operators must be identical.
    fn merge(&self, other: &UpdateValue, field: &str) -> Result<UpdateValue, UpdateError> {
        match (self, other) {
            (UpdateValue::Noop, v) | (v, UpdateValue::Noop) => Ok(v.clone()),
            (UpdateValue::Inc(a), UpdateValue::Inc(b)) => Ok(UpdateValue::Inc(a + b)),
            (a, b) if a == b => Ok(a.clone()),
            _ => Err(UpdateError::ConflictingUpdate(field.to_string())),
        }
    }
}

/// Ordered field-path to operator map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateValues {
    entries: Vec<(String, UpdateValue)>,
}

impl UpdateValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, field: impl Into<String>, value: impl Into<UpdateValue>) -> Self {
        self.set(field, value);
        self
    }

    /// Insert or replace the operator for a field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<UpdateValue>) {
        let field = field.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field, value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&UpdateValue> {
        self.entries
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, field: &str) -> Option<UpdateValue> {
        let pos = self.entries.iter().position(|(f, _)| f == field)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UpdateValue)> {
        self.entries.iter().map(|(f, v)| (f.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge another set of updates into this one.
    ///
    /// Fails with `ConflictingUpdate` on the first field whose operators
    /// cannot be combined; `self` is unchanged in that case.
    pub fn merge(&mut self, other: &UpdateValues) -> Result<(), UpdateError> {
        let mut merged = self.clone();
        for (field, value) in other.iter() {
            let combined = match merged.get(field) {
                Some(existing) => existing.merge(value, field)?,
                None => value.clone(),
            };
            merged.set(field, combined);
        }
        *self = merged;
        Ok(())
    }

    /// Parse a JSON update map such as
    /// `{"name": "B", "count": {"$inc": 1}, "tags": {"$addItemsToSet": ["x"]}}`.
    pub fn from_json(json: &Json) -> Result<Self, UpdateError> {
        let map = json.as_object().ok_or_else(|| UpdateError::UnknownUpdateOperator {
            field: String::new(),
            value: json.to_string(),
        })?;
        let mut values = UpdateValues::new();
        for (field, value) in map {
            values.set(field.as_str(), parse_operator(field, value)?);
        }
        Ok(values)
    }
}

impl FromIterator<(String, UpdateValue)> for UpdateValues {
    fn from_iter<I: IntoIterator<Item = (String, UpdateValue)>>(iter: I) -> Self {
        let mut values = UpdateValues::new();
        for (field, value) in iter {
            values.set(field, value);
        }
        values
    }
}

fn parse_operator(field: &str, json: &Json) -> Result<UpdateValue, UpdateError> {
    let unknown = || UpdateError::UnknownUpdateOperator {
        field: field.to_string(),
        value: json.to_string(),
    };

    let Some(map) = json.as_object() else {
        return Ok(UpdateValue::Literal(Value::from(json.clone())));
    };
    if !map.keys().any(|k| k.starts_with('$')) {
        return Ok(UpdateValue::Literal(Value::from(json.clone())));
    }
    let mut ops = map.iter();
    let (Some((op, arg)), None) = (ops.next(), ops.next()) else {
        return Err(unknown());
    };

    match op.as_str() {
        "$inc" => arg.as_f64().map(UpdateValue::Inc).ok_or_else(unknown),
        "$setIfNotExists" => Ok(UpdateValue::SetIfNotExists(Value::from(arg.clone()))),
        "$remove" => match arg {
            Json::Bool(true) => Ok(UpdateValue::Remove),
            _ => Err(unknown()),
        },
        "$addItemsToSet" => Ok(UpdateValue::AddItemsToSet(Value::from(arg.clone()))),
        "$removeItemsFromSet" => Ok(UpdateValue::RemoveItemsFromSet(Value::from(arg.clone()))),
        "$appendItemsToList" => arg
            .as_array()
            .map(|items| {
                UpdateValue::AppendItemsToList(items.iter().cloned().map(Value::from).collect())
            })
            .ok_or_else(unknown),
        _ => Err(unknown()),
    }
}

/// A compiled update: clause bodies per action plus placeholder bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledUpdate {
    pub set: Vec<String>,
    pub add: Vec<String>,
    pub remove: Vec<String>,
    pub delete: Vec<String>,
    pub names: BTreeMap<String, String>,
    pub values: BTreeMap<String, Value>,
}

impl CompiledUpdate {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.add.is_empty() && self.remove.is_empty() && self.delete.is_empty()
    }

    /// Render as `SET … ADD … REMOVE … DELETE …`, omitting empty clauses.
    pub fn expression(&self) -> Option<String> {
        let clauses: Vec<String> = [
            ("SET", &self.set),
            ("ADD", &self.add),
            ("REMOVE", &self.remove),
            ("DELETE", &self.delete),
        ]
        .into_iter()
        .filter(|(_, actions)| !actions.is_empty())
        .map(|(keyword, actions)| format!("{keyword} {}", actions.join(", ")))
        .collect();
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" "))
        }
    }

    pub fn into_expression(self) -> CompiledExpression {
        CompiledExpression {
            expression: self.expression(),
            names: self.names,
            values: self.values,
        }
    }
}

/// Compile update operators into an update expression.
///
/// Field `i`'s path segments bind to `#u{i}_{j}` and its operand to `:u{i}`.
pub fn compile_update(updates: &UpdateValues) -> Result<CompiledUpdate, UpdateError> {
    let mut compiled = CompiledUpdate::default();

    for (i, (field, update)) in updates.iter().enumerate() {
        if matches!(update, UpdateValue::Noop) {
            continue;
        }
        let path = bind_path(&mut compiled, i, &parse_path(field)?);
        let operand = format!(":u{i}");

        match update {
            UpdateValue::Literal(value) => {
                compiled.values.insert(operand.clone(), value.clone());
                compiled.set.push(format!("{path} = {operand}"));
            }
            UpdateValue::Inc(delta) => {
                compiled.values.insert(":zero".to_string(), Value::Number(0.0));
                compiled.values.insert(operand.clone(), Value::Number(*delta));
                compiled
                    .set
                    .push(format!("{path} = if_not_exists({path}, :zero) + {operand}"));
            }
            UpdateValue::SetIfNotExists(value) => {
                compiled.values.insert(operand.clone(), value.clone());
                compiled
                    .set
                    .push(format!("{path} = if_not_exists({path}, {operand})"));
            }
            UpdateValue::AppendItemsToList(items) => {
                compiled
                    .values
                    .insert(":empty_list".to_string(), Value::List(Vec::new()));
                compiled
                    .values
                    .insert(operand.clone(), Value::List(items.clone()));
                compiled.set.push(format!(
                    "{path} = list_append(if_not_exists({path}, :empty_list), {operand})"
                ));
            }
            UpdateValue::Remove => compiled.remove.push(path),
            UpdateValue::AddItemsToSet(items) | UpdateValue::RemoveItemsFromSet(items) => {
                let set = items
                    .clone()
                    .into_set()
                    .ok_or_else(|| UpdateError::UnknownUpdateOperator {
                        field: field.to_string(),
                        value: items.to_string(),
                    })?;
                compiled.values.insert(operand.clone(), set);
                let clause = format!("{path} {operand}");
                if matches!(update, UpdateValue::AddItemsToSet(_)) {
                    compiled.add.push(clause);
                } else {
                    compiled.delete.push(clause);
                }
            }
            UpdateValue::Noop => {}
        }
    }
    Ok(compiled)
}

fn bind_path(compiled: &mut CompiledUpdate, field_index: usize, path: &[PathSegment]) -> String {
    let mut out = String::new();
    for (j, segment) in path.iter().enumerate() {
        match segment {
            PathSegment::Attribute(name) => {
                let placeholder = format!("#u{field_index}_{j}");
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(&placeholder);
                compiled.names.insert(placeholder, name.clone());
            }
            PathSegment::Index(n) => out.push_str(&format!("[{n}]")),
        }
    }
    out
}
