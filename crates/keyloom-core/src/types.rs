//! Core types: attribute values, items, physical keys, and metadata attribute names.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stored attribute holding the collection-prefixed partition key string.
pub const PARTITION_KEY_ATTR: &str = "_PK";

/// Stored attribute holding the collection-prefixed sort key string.
pub const SORT_KEY_ATTR: &str = "_SK";

/// Name of the collection that owns an item.
pub const COLLECTION_ATTR: &str = "_c";

/// Write counter, incremented on every update. Used as an optimistic-lock token.
pub const WRITE_COUNT_ATTR: &str = "_wc";

/// Optional schema version maintained by schema-upgrade extensions.
pub const VERSION_ATTR: &str = "_v";

/// Expiry attribute (Unix epoch seconds) maintained by TTL extensions.
pub const TTL_ATTR: &str = "_ttl";

/// A stored record: attribute name to value.
pub type Item = BTreeMap<String, Value>;

/// An attribute value as understood by the backing store.
///
/// Sets are native store types; numbers are finite `f64`s. A `NumberSet` is
/// kept sorted and free of duplicates by its constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    StringSet(BTreeSet<String>),
    NumberSet(Vec<f64>),
}

impl Value {
    /// Build a string set from any iterator of strings.
    pub fn string_set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::StringSet(items.into_iter().map(Into::into).collect())
    }

    /// Build a number set, sorting and removing duplicates.
    pub fn number_set<I>(items: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut numbers: Vec<f64> = items.into_iter().collect();
        normalize_number_set(&mut numbers);
        Value::NumberSet(numbers)
    }

    /// Human-readable type name (for error messages).
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::StringSet(_) => "string set",
            Value::NumberSet(_) => "number set",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Coerce a value into a native set.
    ///
    /// Sets pass through unchanged. A list made only of strings becomes a
    /// string set; a list made only of numbers becomes a number set. An empty
    /// list or a mixed list has no set form.
    pub fn into_set(self) -> Option<Value> {
        match self {
            Value::StringSet(_) | Value::NumberSet(_) => Some(self),
            Value::List(items) if !items.is_empty() => {
                if items.iter().all(|v| matches!(v, Value::String(_))) {
                    Some(Value::string_set(
                        items.into_iter().filter_map(|v| match v {
                            Value::String(s) => Some(s),
                            _ => None,
                        }),
                    ))
                } else if items.iter().all(|v| matches!(v, Value::Number(_))) {
                    Some(Value::number_set(items.iter().filter_map(Value::as_f64)))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

/// Sort a number set and drop duplicates.
pub(crate) fn normalize_number_set(numbers: &mut Vec<f64>) {
    numbers.sort_by(f64::total_cmp);
    numbers.dedup();
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::StringSet(set) => write!(f, "<<{set:?}>>"),
            Value::NumberSet(set) => write!(f, "<<{set:?}>>"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Item> for Value {
    fn from(map: Item) -> Self {
        Value::Map(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Convert a JSON object into an [`Item`]. Non-object JSON yields an empty item.
pub fn item_from_json(json: serde_json::Value) -> Item {
    match Value::from(json) {
        Value::Map(map) => map,
        _ => Item::new(),
    }
}

/// The physical key of a stored item: partition key string and sort key string.
///
/// Ordering is `(pk, sk)`, matching the store's physical layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    pub pk: String,
    pub sk: String,
}

impl Key {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    /// Read the `_PK`/`_SK` attributes of a stored item.
    pub fn from_item(item: &Item) -> Option<Self> {
        let pk = item.get(PARTITION_KEY_ATTR)?.as_str()?;
        let sk = item.get(SORT_KEY_ATTR)?.as_str()?;
        Some(Self::new(pk, sk))
    }

    /// The key as a stored-attribute map (`{_PK, _SK}`).
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(PARTITION_KEY_ATTR.to_string(), Value::from(self.pk.as_str()));
        item.insert(SORT_KEY_ATTR.to_string(), Value::from(self.sk.as_str()));
        item
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.pk, self.sk)
    }
}

/// Whether an attribute is layer-managed metadata rather than entity data.
///
/// Covers the fixed metadata attributes plus secondary-index projections,
/// which are named `_{indexId}PK` / `_{indexId}SK` by convention.
pub fn is_metadata_attribute(name: &str) -> bool {
    match name {
        PARTITION_KEY_ATTR | SORT_KEY_ATTR | COLLECTION_ATTR | WRITE_COUNT_ATTR | VERSION_ATTR
        | TTL_ATTR => true,
        _ => name.starts_with('_') && (name.ends_with("PK") || name.ends_with("SK")),
    }
}

/// Remove all metadata attributes from an item, leaving the entity fields.
pub fn strip_metadata(mut item: Item) -> Item {
    item.retain(|name, _| !is_metadata_attribute(name));
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_from_json() {
        let v = Value::from(json!({"a": 1, "b": [true, null, "x"]}));
        let map = v.as_map().unwrap();
        assert_eq!(map["a"], Value::Number(1.0));
        assert_eq!(
            map["b"],
            Value::List(vec![Value::Bool(true), Value::Null, Value::from("x")])
        );
    }

    #[test]
    fn test_number_set_sorted_and_deduplicated() {
        let set = Value::number_set([3.0, 1.0, 3.0, 2.0]);
        assert_eq!(set, Value::NumberSet(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_into_set() {
        let strings = Value::from(json!(["b", "a", "b"])).into_set().unwrap();
        assert_eq!(strings, Value::string_set(["a", "b"]));

        let numbers = Value::from(json!([2, 1])).into_set().unwrap();
        assert_eq!(numbers, Value::NumberSet(vec![1.0, 2.0]));

        assert!(Value::from(json!(["a", 1])).into_set().is_none());
        assert!(Value::List(vec![]).into_set().is_none());
        assert!(Value::from("a").into_set().is_none());
    }

    #[test]
    fn test_key_item_roundtrip() {
        let key = Key::new("users#1#", "users#");
        let item = key.to_item();
        assert_eq!(Key::from_item(&item), Some(key));
    }

    #[test]
    fn test_strip_metadata() {
        let item = item_from_json(json!({
            "_PK": "users#1#",
            "_SK": "users#",
            "_c": "users",
            "_wc": 3,
            "_v": 2,
            "_ttl": 100,
            "_byEmailPK": "x",
            "_byEmailSK": "y",
            "id": 1,
            "name": "A",
            "_note": "kept"
        }));
        let stripped = strip_metadata(item);
        let names: Vec<&str> = stripped.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["_note", "id", "name"]);
    }
}
