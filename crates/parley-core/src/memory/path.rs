//! Path parsing and navigation over JSON values.
//!
//! A path is a dotted list of member names with optional bracket segments:
//! `todos[0].title`, `entities['due date']`. Member names match
//! case-insensitively; numeric member names also index into arrays.

use serde_json::Value;

use crate::error::{MemoryError, MemoryResult};
use crate::value::{ValueExt, array_mut, find_key, insert_ci, object_mut, remove_ci};

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object member (or array index written as a plain number).
    Key(String),
    /// Array index from a `[n]` segment.
    Index(usize),
}

impl PathSegment {
    /// Returns the member name if this is a key segment.
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Self::Key(key) => Some(key),
            Self::Index(_) => None,
        }
    }
}

/// Parses `path` into segments.
///
/// The empty path is valid and addresses the root value.
pub fn parse_path(path: &str) -> MemoryResult<Vec<PathSegment>> {
    let invalid = |reason: &str| MemoryError::invalid_path(path, reason);
    let mut segments = Vec::new();
    if path.is_empty() {
        return Ok(segments);
    }

    let mut current = String::new();
    let mut after_bracket = false;
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current)));
                } else if !after_bracket {
                    return Err(invalid("empty segment"));
                }
                after_bracket = false;
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current)));
                } else if segments.is_empty() {
                    return Err(invalid("path cannot start with a bracket"));
                }

                let mut inner = String::new();
                let mut quote: Option<char> = None;
                let mut closed = false;
                for c in chars.by_ref() {
                    match quote {
                        None if c == ']' => {
                            closed = true;
                            break;
                        }
                        None if c == '\'' || c == '"' => quote = Some(c),
                        Some(q) if c == q => quote = None,
                        _ => {}
                    }
                    inner.push(c);
                }
                if !closed {
                    return Err(invalid("unclosed '['"));
                }
                segments.push(bracket_segment(inner.trim()).ok_or_else(|| {
                    invalid("brackets must hold an index or a quoted member name")
                })?);
                after_bracket = true;
            }
            c if c.is_whitespace() => return Err(invalid("whitespace in path")),
            _ => {
                if after_bracket {
                    return Err(invalid("expected '.' or '[' after ']'"));
                }
                current.push(c);
            }
        }
    }

    if !current.is_empty() {
        segments.push(PathSegment::Key(current));
    } else if !after_bracket {
        return Err(invalid("empty segment"));
    }
    Ok(segments)
}

fn bracket_segment(inner: &str) -> Option<PathSegment> {
    for quote in ['\'', '"'] {
        if inner.len() >= 2 && inner.starts_with(quote) && inner.ends_with(quote) {
            return Some(PathSegment::Key(inner[1..inner.len() - 1].to_owned()));
        }
    }
    inner.parse().ok().map(PathSegment::Index)
}

fn array_index(items: &[Value], segment: &PathSegment) -> Option<usize> {
    let index = match segment {
        PathSegment::Index(index) => *index,
        PathSegment::Key(key) => key.parse().ok()?,
    };
    (index < items.len()).then_some(index)
}

/// Reads the value at `segments`, or `None` if any segment is missing.
pub fn get<'v>(root: &'v Value, segments: &[PathSegment]) -> Option<&'v Value> {
    segments.iter().try_fold(root, |value, segment| match value {
        Value::Array(items) => items.get(array_index(items, segment)?),
        Value::Object(_) => value.get_ci(segment.as_key()?),
        _ => None,
    })
}

/// Mutable counterpart of [`get`].
pub fn get_mut<'v>(root: &'v mut Value, segments: &[PathSegment]) -> Option<&'v mut Value> {
    segments
        .iter()
        .try_fold(root, |value, segment| match value {
            Value::Array(items) => {
                let index = array_index(items, segment)?;
                items.get_mut(index)
            }
            Value::Object(_) => value.get_ci_mut(segment.as_key()?),
            _ => None,
        })
}

/// Writes `value` at `segments`, creating intermediate containers.
///
/// Intermediates that exist but are not containers are replaced.
pub fn set(root: &mut Value, segments: &[PathSegment], value: Value) {
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        let Some(next) = segments.get(i + 1) else {
            assign(current, segment, value);
            return;
        };
        current = child_or_insert(current, segment, matches!(next, PathSegment::Index(_)));
    }
    *current = value;
}

fn assign(target: &mut Value, segment: &PathSegment, value: Value) {
    match segment {
        PathSegment::Key(key) => {
            if let Value::Array(items) = target
                && let Some(index) = array_index(items, segment)
            {
                items[index] = value;
                return;
            }
            insert_ci(object_mut(target), key, value);
        }
        PathSegment::Index(index) => {
            let items = array_mut(target);
            if items.len() <= *index {
                items.resize(index + 1, Value::Null);
            }
            items[*index] = value;
        }
    }
}

fn child_or_insert<'v>(value: &'v mut Value, segment: &PathSegment, next_is_index: bool) -> &'v mut Value {
    let empty = || {
        if next_is_index {
            Value::Array(Vec::new())
        } else {
            Value::Object(Default::default())
        }
    };

    let child = match segment {
        PathSegment::Key(key) => {
            let existing = match &*value {
                Value::Array(items) => array_index(items, segment),
                _ => None,
            };
            match existing {
                Some(index) => &mut array_mut(value)[index],
                None => {
                    let map = object_mut(value);
                    let stored = find_key(map, key)
                        .map(str::to_owned)
                        .unwrap_or_else(|| key.clone());
                    map.entry(stored).or_insert_with(empty)
                }
            }
        }
        PathSegment::Index(index) => {
            let items = array_mut(value);
            if items.len() <= *index {
                items.resize(index + 1, Value::Null);
            }
            &mut items[*index]
        }
    };
    if !child.is_object() && !child.is_array() {
        *child = empty();
    }
    child
}

/// Removes the value at `segments`, returning it if it existed.
pub fn remove(root: &mut Value, segments: &[PathSegment]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    match get_mut(root, parents)? {
        Value::Array(items) => {
            let index = array_index(items, last)?;
            Some(items.remove(index))
        }
        Value::Object(map) => remove_ci(map, last.as_key()?),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(s: &str) -> PathSegment {
        PathSegment::Key(s.into())
    }

    #[test]
    fn test_parse_dotted_and_bracketed() {
        assert_eq!(parse_path("a.b").unwrap(), vec![key("a"), key("b")]);
        assert_eq!(
            parse_path("todos[0].title").unwrap(),
            vec![key("todos"), PathSegment::Index(0), key("title")]
        );
        assert_eq!(
            parse_path("entities['due date'][1]").unwrap(),
            vec![key("entities"), key("due date"), PathSegment::Index(1)]
        );
        assert!(parse_path("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        for bad in ["a..b", "a.", ".a", "a[0", "a[x]", "a[0]b", "[0]", "a b"] {
            assert!(parse_path(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_get_is_case_insensitive_and_indexes_arrays() {
        let value = json!({ "User": { "Todos": ["a", "b"] } });
        let segments = parse_path("user.todos[1]").unwrap();
        assert_eq!(get(&value, &segments), Some(&json!("b")));
        let segments = parse_path("user.todos.0").unwrap();
        assert_eq!(get(&value, &segments), Some(&json!("a")));
        let segments = parse_path("user.missing.deeper").unwrap();
        assert_eq!(get(&value, &segments), None);
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut value = json!({});
        set(&mut value, &parse_path("a.b.c").unwrap(), json!(1));
        set(&mut value, &parse_path("list[2]").unwrap(), json!("x"));
        assert_eq!(value, json!({ "a": { "b": { "c": 1 } }, "list": [null, null, "x"] }));
    }

    #[test]
    fn test_set_keeps_existing_casing() {
        let mut value = json!({ "Profile": { "Name": "old" } });
        set(&mut value, &parse_path("profile.name").unwrap(), json!("new"));
        assert_eq!(value, json!({ "Profile": { "Name": "new" } }));
    }

    #[test]
    fn test_set_replaces_scalar_intermediate() {
        let mut value = json!({ "name": "bob" });
        set(&mut value, &parse_path("name.first").unwrap(), json!("bob"));
        assert_eq!(value, json!({ "name": { "first": "bob" } }));
    }

    #[test]
    fn test_remove() {
        let mut value = json!({ "a": { "B": 1, "c": 2 }, "list": [1, 2, 3] });
        assert_eq!(remove(&mut value, &parse_path("a.b").unwrap()), Some(json!(1)));
        assert_eq!(remove(&mut value, &parse_path("list[0]").unwrap()), Some(json!(1)));
        assert_eq!(remove(&mut value, &parse_path("a.zzz").unwrap()), None);
        assert_eq!(value, json!({ "a": { "c": 2 }, "list": [2, 3] }));
    }
}
