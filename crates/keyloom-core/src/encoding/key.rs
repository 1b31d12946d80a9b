use crate::error::EncodingError;
use crate::types::Item;

use super::encode_sortable;

/// Separator between encoded fields inside a key string.
pub const FIELD_SEPARATOR: char = '#';

/// Build the key string for an entity from an ordered list of field names.
///
/// Each field's value is encoded with [`encode_sortable`] and followed by
/// `#`, so `["a", "b"]` over `{a: "x", b: 2}` yields
/// `"x#0000000002.000000#"`. An empty field list yields `""`.
///
/// A field that is absent from the entity fails with `MissingKeyValue`;
/// an explicit `null` is a valid key value.
pub fn build_key_string<S: AsRef<str>>(fields: &[S], entity: &Item) -> Result<String, EncodingError> {
    let mut out = String::new();
    for field in fields {
        let field = field.as_ref();
        let value = entity
            .get(field)
            .ok_or_else(|| EncodingError::MissingKeyValue(field.to_string()))?;
        out.push_str(&encode_sortable(value)?);
        out.push(FIELD_SEPARATOR);
    }
    Ok(out)
}

/// Prefix a key string with its collection namespace: `"{collection}#{key}"`.
pub fn build_collection_key(collection: &str, key_string: &str) -> String {
    let mut out = String::with_capacity(collection.len() + 1 + key_string.len());
    out.push_str(collection);
    out.push(FIELD_SEPARATOR);
    out.push_str(key_string);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::item_from_json;
    use serde_json::json;

    #[test]
    fn test_build_key_string() {
        let entity = item_from_json(json!({"org": "Acme", "id": 2, "name": "ignored"}));
        let key = build_key_string(&["org", "id"], &entity).unwrap();
        assert_eq!(key, "acme#0000000002.000000#");
    }

    #[test]
    fn test_empty_field_list() {
        let entity = item_from_json(json!({"id": 1}));
        let empty: [&str; 0] = [];
        assert_eq!(build_key_string(&empty, &entity).unwrap(), "");
    }

    #[test]
    fn test_missing_field() {
        let entity = item_from_json(json!({"id": 1}));
        let err = build_key_string(&["id", "other"], &entity).unwrap_err();
        assert!(matches!(err, EncodingError::MissingKeyValue(ref f) if f == "other"));
    }

    #[test]
    fn test_null_field_is_valid() {
        let entity = item_from_json(json!({"id": null}));
        assert_eq!(build_key_string(&["id"], &entity).unwrap(), "\u{0}#");
    }

    #[test]
    fn test_separator_in_values_does_not_collide() {
        let a = item_from_json(json!({"x": "a#b", "y": "c"}));
        let b = item_from_json(json!({"x": "a", "y": "b#c"}));
        let c = item_from_json(json!({"x": "a\\", "y": "b#c"}));
        let ka = build_key_string(&["x", "y"], &a).unwrap();
        let kb = build_key_string(&["x", "y"], &b).unwrap();
        let kc = build_key_string(&["x", "y"], &c).unwrap();
        assert_ne!(ka, kb);
        assert_ne!(kb, kc);
        assert_ne!(ka, kc);
    }

    #[test]
    fn test_equal_fields_give_equal_keys() {
        let a = item_from_json(json!({"id": 7, "name": "A"}));
        let b = item_from_json(json!({"id": 7.0, "name": "B"}));
        assert_eq!(
            build_key_string(&["id"], &a).unwrap(),
            build_key_string(&["id"], &b).unwrap()
        );
    }

    #[test]
    fn test_build_collection_key() {
        assert_eq!(build_collection_key("users", "1#"), "users#1#");
        assert_eq!(build_collection_key("users", ""), "users#");
    }
}
