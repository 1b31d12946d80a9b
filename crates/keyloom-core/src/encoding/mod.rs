//! Sortable string encoding of key values and composite key construction.

pub mod key;
pub mod number;
pub mod string;

use crate::error::EncodingError;
use crate::types::Value;

pub use key::{FIELD_SEPARATOR, build_collection_key, build_key_string};

/// Encoding of `null`. Sorts before every other encoded value of a field.
pub const NULL_SENTINEL: &str = "\u{0}";

/// Encode a single value as a string whose byte order follows the value's
/// natural order within its type.
///
/// Strings are case-folded, numbers are fixed-width base 36, booleans are
/// `"0"`/`"1"`. Lists, maps and sets have no sortable form.
pub fn encode_sortable(value: &Value) -> Result<String, EncodingError> {
    match value {
        Value::Null => Ok(NULL_SENTINEL.to_string()),
        Value::Bool(true) => Ok("1".to_string()),
        Value::Bool(false) => Ok("0".to_string()),
        Value::Number(n) => number::encode_number(*n),
        Value::String(s) => Ok(string::encode_string(s)),
        Value::List(_) | Value::Map(_) | Value::StringSet(_) | Value::NumberSet(_) => {
            Err(EncodingError::UnsupportedType(value.kind()))
        }
    }
}
