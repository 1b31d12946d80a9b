//! Key-condition compiler.
//!
//! The physical sort key is one concatenated string, so a query can only
//! express a single contiguous probe on it: an exact prefix built from
//! leading sort fields, optionally ended by one range operator.

use serde_json::Value as Json;

use crate::encoding::{FIELD_SEPARATOR, build_collection_key, encode_sortable};
use crate::error::{Error, QueryError};
use crate::types::{PARTITION_KEY_ATTR, SORT_KEY_ATTR, Value};

use super::CompiledExpression;

/// Upper bound for "everything under this prefix" ranges.
const PREFIX_CEILING: char = '\u{10FFFF}';

/// Sorts immediately after [`FIELD_SEPARATOR`], so `prefix + enc + AFTER_FIELD`
/// is above every key whose next field equals `enc`.
const AFTER_FIELD: char = '$';

/// A predicate on one key field.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPredicate {
    /// Literal value. The only form allowed on partition fields.
    Eq(Value),
    BeginsWith(Value),
    BetweenIncl(Value, Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
}

macro_rules! literal_predicate {
    ($($ty:ty),*) => {
        $(impl From<$ty> for KeyPredicate {
            fn from(value: $ty) -> Self {
                KeyPredicate::Eq(Value::from(value))
            }
        })*
    };
}

literal_predicate!(&str, String, bool, f64, i64, i32, u32, u64);

impl From<Value> for KeyPredicate {
    fn from(value: Value) -> Self {
        KeyPredicate::Eq(value)
    }
}

/// Ordered field-to-predicate map describing a key query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyQuery {
    entries: Vec<(String, KeyPredicate)>,
}

impl KeyQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, predicate: impl Into<KeyPredicate>) -> Self {
        let field = field.into();
        let predicate = predicate.into();
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some(entry) => entry.1 = predicate,
            None => self.entries.push((field, predicate)),
        }
        self
    }

    pub fn get(&self, field: &str) -> Option<&KeyPredicate> {
        self.entries
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, p)| p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KeyPredicate)> {
        self.entries.iter().map(|(f, p)| (f.as_str(), p))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse `{"org": "acme", "createdAt": {"$gte": 1700000000}}`.
    pub fn from_json(json: &Json) -> Result<Self, QueryError> {
        let map = json.as_object().ok_or_else(|| QueryError::UnknownCondition {
            field: String::new(),
            value: json.to_string(),
        })?;
        let mut query = KeyQuery::new();
        for (field, value) in map {
            query = query.with(field.as_str(), parse_predicate(field, value)?);
        }
        Ok(query)
    }
}

fn parse_predicate(field: &str, json: &Json) -> Result<KeyPredicate, QueryError> {
    let unknown = || QueryError::UnknownCondition {
        field: field.to_string(),
        value: json.to_string(),
    };
    let Some(map) = json.as_object() else {
        return Ok(KeyPredicate::Eq(Value::from(json.clone())));
    };
    let mut ops = map.iter();
    let (Some((op, arg)), None) = (ops.next(), ops.next()) else {
        return Err(unknown());
    };
    let arg_value = || Value::from(arg.clone());
    match op.as_str() {
        "$beginsWith" => Ok(KeyPredicate::BeginsWith(arg_value())),
        "$gt" => Ok(KeyPredicate::Gt(arg_value())),
        "$gte" => Ok(KeyPredicate::Gte(arg_value())),
        "$lt" => Ok(KeyPredicate::Lt(arg_value())),
        "$lte" => Ok(KeyPredicate::Lte(arg_value())),
        "$betweenIncl" => match arg.as_array().map(Vec::as_slice) {
            Some([lo, hi]) => Ok(KeyPredicate::BetweenIncl(
                Value::from(lo.clone()),
                Value::from(hi.clone()),
            )),
            _ => Err(unknown()),
        },
        _ => Err(unknown()),
    }
}

/// Compile a key query against the primary key attributes (`_PK`, `_SK`).
///
/// See [`compile_key_condition_on`].
pub fn compile_key_condition(
    collection: &str,
    partition_fields: &[String],
    sort_fields: &[String],
    query: &KeyQuery,
) -> Result<CompiledExpression, Error> {
    compile_key_condition_on(
        PARTITION_KEY_ATTR,
        SORT_KEY_ATTR,
        collection,
        partition_fields,
        sort_fields,
        query,
    )
}

/// Compile a key query against an arbitrary pair of key attributes, such as
/// a secondary index's `_{id}PK` / `_{id}SK`.
///
/// Every partition field needs a literal. Sort fields are consumed in
/// declared order, each literal extending the sort-key prefix; the first
/// operator ends the walk. Any later sort field, or one following an
/// omitted field, fails with `InvalidKeyProgression`.
pub fn compile_key_condition_on(
    pk_attr: &str,
    sk_attr: &str,
    collection: &str,
    partition_fields: &[String],
    sort_fields: &[String],
    query: &KeyQuery,
) -> Result<CompiledExpression, Error> {
    for (field, _) in query.iter() {
        if !partition_fields.iter().any(|f| f == field) && !sort_fields.iter().any(|f| f == field) {
            return Err(QueryError::UnknownKeyField(field.to_string()).into());
        }
    }

    let mut pk = String::new();
    for field in partition_fields {
        match query.get(field) {
            Some(KeyPredicate::Eq(value)) => {
                pk.push_str(&encode_sortable(value)?);
                pk.push(FIELD_SEPARATOR);
            }
            _ => return Err(QueryError::InvalidPartitionValue(field.clone()).into()),
        }
    }
    let pk = build_collection_key(collection, &pk);

    let mut prefix = build_collection_key(collection, "");
    let mut range: Option<&KeyPredicate> = None;
    // Set once a field is skipped or a range operator has been seen.
    let mut closed = false;

    for field in sort_fields {
        let Some(predicate) = query.get(field) else {
            closed = true;
            continue;
        };
        if closed {
            return Err(QueryError::InvalidKeyProgression(field.clone()).into());
        }
        match predicate {
            KeyPredicate::Eq(value) => {
                prefix.push_str(&encode_sortable(value)?);
                prefix.push(FIELD_SEPARATOR);
            }
            _ => {
                range = Some(predicate);
                closed = true;
            }
        }
    }

    let compiled = CompiledExpression::empty()
        .name("#PK", pk_attr)
        .name("#SK", sk_attr)
        .value(":pk", pk);

    let bounded = |compiled: CompiledExpression, lo: String, hi: String| {
        let mut compiled = compiled.value(":sk_lo", lo).value(":sk_hi", hi);
        compiled.expression = Some("#PK = :pk AND #SK BETWEEN :sk_lo AND :sk_hi".to_string());
        compiled
    };
    let ceiling = format!("{prefix}{PREFIX_CEILING}");

    let compiled = match range {
        None => prefixed(compiled, prefix),
        Some(KeyPredicate::BeginsWith(value)) => {
            let encoded = encode_sortable(value)?;
            prefixed(compiled, format!("{prefix}{encoded}"))
        }
        Some(KeyPredicate::Gt(value)) => {
            let encoded = encode_sortable(value)?;
            bounded(compiled, format!("{prefix}{encoded}{AFTER_FIELD}"), ceiling)
        }
        Some(KeyPredicate::Gte(value)) => {
            let encoded = encode_sortable(value)?;
            bounded(compiled, format!("{prefix}{encoded}"), ceiling)
        }
        Some(KeyPredicate::Lt(value)) => {
            let encoded = encode_sortable(value)?;
            bounded(compiled, prefix.clone(), format!("{prefix}{encoded}"))
        }
        Some(KeyPredicate::Lte(value)) => {
            let encoded = encode_sortable(value)?;
            bounded(
                compiled,
                prefix.clone(),
                format!("{prefix}{encoded}{AFTER_FIELD}"),
            )
        }
        Some(KeyPredicate::BetweenIncl(lo, hi)) => {
            let lo = encode_sortable(lo)?;
            let hi = encode_sortable(hi)?;
            bounded(
                compiled,
                format!("{prefix}{lo}"),
                format!("{prefix}{hi}{AFTER_FIELD}"),
            )
        }
        // Literals never end the walk.
        Some(KeyPredicate::Eq(_)) => prefixed(compiled, prefix),
    };
    Ok(compiled)
}

fn prefixed(compiled: CompiledExpression, prefix: String) -> CompiledExpression {
    let mut compiled = compiled.value(":sk", prefix);
    compiled.expression = Some("#PK = :pk AND begins_with(#SK, :sk)".to_string());
    compiled
}
