//! Helpers over [`serde_json::Value`].
//!
//! Memory keys are matched case-insensitively everywhere, so lookups go
//! through [`ValueExt::get_ci`] rather than `Value::get`.

use serde_json::{Map, Value};

/// Returns `true` if two object keys name the same member.
pub fn keys_match(a: &str, b: &str) -> bool {
    a == b || a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}

/// Finds the stored spelling of `key` in `map`, ignoring case.
///
/// An exact match wins over a case-insensitive one.
pub fn find_key<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    if let Some((stored, _)) = map.get_key_value(key) {
        return Some(stored.as_str());
    }
    map.keys()
        .find(|stored| keys_match(stored, key))
        .map(String::as_str)
}

/// Inserts `value` under `key`, reusing the existing spelling if one matches.
pub fn insert_ci(map: &mut Map<String, Value>, key: &str, value: Value) {
    let stored = find_key(map, key).map(str::to_owned);
    map.insert(stored.unwrap_or_else(|| key.to_owned()), value);
}

/// Removes `key` from `map`, ignoring case.
pub fn remove_ci(map: &mut Map<String, Value>, key: &str) -> Option<Value> {
    let stored = find_key(map, key)?.to_owned();
    map.remove(&stored)
}

/// Extension methods on JSON values used throughout the engine.
pub trait ValueExt {
    /// Case-insensitive member lookup.
    fn get_ci(&self, key: &str) -> Option<&Value>;

    /// Case-insensitive mutable member lookup.
    fn get_ci_mut(&mut self, key: &str) -> Option<&mut Value>;

    /// Truthiness used by conditions: only `null` and `false` are false.
    fn is_truthy(&self) -> bool;

    /// Renders the value for display in generated text.
    ///
    /// Strings are emitted without quotes and `null` becomes empty.
    fn to_display_string(&self) -> String;
}

impl ValueExt for Value {
    fn get_ci(&self, key: &str) -> Option<&Value> {
        let map = self.as_object()?;
        let stored = find_key(map, key)?;
        map.get(stored)
    }

    fn get_ci_mut(&mut self, key: &str) -> Option<&mut Value> {
        let map = self.as_object_mut()?;
        let stored = find_key(map, key)?.to_owned();
        map.get_mut(&stored)
    }

    fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            other => other.to_string(),
        }
    }
}

/// Replaces `value` with an empty object unless it already is one.
pub(crate) fn object_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced by an object"),
    }
}

/// Replaces `value` with an empty array unless it already is one.
pub(crate) fn array_mut(value: &mut Value) -> &mut Vec<Value> {
    if !value.is_array() {
        *value = Value::Array(Vec::new());
    }
    match value {
        Value::Array(items) => items,
        _ => unreachable!("value was just replaced by an array"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_ci_prefers_exact_match() {
        let value = json!({ "Name": "upper", "name": "lower" });
        assert_eq!(value.get_ci("name"), Some(&json!("lower")));
        assert_eq!(value.get_ci("NAME"), Some(&json!("upper")));
    }

    #[test]
    fn test_insert_ci_keeps_existing_spelling() {
        let mut map = Map::new();
        map.insert("UserName".into(), json!("a"));
        insert_ci(&mut map, "username", json!("b"));
        assert_eq!(map.len(), 1);
        assert_eq!(map["UserName"], json!("b"));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!json!(false).is_truthy());
        assert!(json!(0).is_truthy());
        assert!(json!("").is_truthy());
        assert!(json!([]).is_truthy());
    }

    #[test]
    fn test_display_string() {
        assert_eq!(json!("hi").to_display_string(), "hi");
        assert_eq!(Value::Null.to_display_string(), "");
        assert_eq!(json!(3).to_display_string(), "3");
        assert_eq!(json!([1, 2]).to_display_string(), "[1,2]");
    }
}
