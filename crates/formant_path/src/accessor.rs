//! Value-tree access at a path
//!
//! Reads and writes `serde_json::Value` trees addressed by `FormPath`.
//! Writes auto-vivify intermediate containers: key segments create objects,
//! index segments create arrays padded with `null`.

use crate::path::{FormPath, PathSegment};
use serde_json::Value;

/// Read the value at `path`, if the whole chain exists.
pub fn get_in<'a>(root: &'a Value, path: &FormPath) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        current = match segment {
            PathSegment::Key(key) => current.as_object()?.get(key)?,
            PathSegment::Index(index) => current.as_array()?.get(*index)?,
            // Wildcards address node sets, not single values
            PathSegment::Wildcard => return None,
        };
    }
    Some(current)
}

/// Whether a value exists at `path`.
pub fn exist_in(root: &Value, path: &FormPath) -> bool {
    get_in(root, path).is_some()
}

/// Write `value` at `path`, creating intermediate containers as needed.
pub fn set_in(root: &mut Value, path: &FormPath, value: Value) {
    let mut current = root;
    let segments = path.segments();
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        match segment {
            PathSegment::Key(key) => {
                if !current.is_object() {
                    *current = Value::Object(Default::default());
                }
                let map = current.as_object_mut().unwrap();
                if last {
                    map.insert(key.clone(), value);
                    return;
                }
                current = map.entry(key.clone()).or_insert(Value::Null);
            }
            PathSegment::Index(index) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                let array = current.as_array_mut().unwrap();
                if array.len() <= *index {
                    array.resize(*index + 1, Value::Null);
                }
                if last {
                    array[*index] = value;
                    return;
                }
                current = &mut array[*index];
            }
            PathSegment::Wildcard => return,
        }
    }
    // Empty path replaces the root
    *current = value;
}

/// Remove the value at `path`. Object keys are deleted; array slots are
/// nulled so sibling indices keep their positions.
pub fn remove_in(root: &mut Value, path: &FormPath) {
    let Some(last) = path.last() else {
        *root = Value::Null;
        return;
    };
    let Some(parent_path) = path.parent() else {
        return;
    };
    let Some(parent) = get_in_mut(root, &parent_path) else {
        return;
    };
    match last {
        PathSegment::Key(key) => {
            if let Some(map) = parent.as_object_mut() {
                map.remove(key);
            }
        }
        PathSegment::Index(index) => {
            if let Some(array) = parent.as_array_mut() {
                if *index < array.len() {
                    array[*index] = Value::Null;
                }
            }
        }
        PathSegment::Wildcard => {}
    }
}

fn get_in_mut<'a>(root: &'a mut Value, path: &FormPath) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path.segments() {
        current = match segment {
            PathSegment::Key(key) => current.as_object_mut()?.get_mut(key)?,
            PathSegment::Index(index) => current.as_array_mut()?.get_mut(*index)?,
            PathSegment::Wildcard => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_in_nested() {
        let root = json!({"a": {"b": [10, 20]}});
        assert_eq!(get_in(&root, &FormPath::parse("a.b.1")), Some(&json!(20)));
        assert_eq!(get_in(&root, &FormPath::parse("a.c")), None);
        assert_eq!(get_in(&root, &FormPath::parse("")), Some(&root));
    }

    #[test]
    fn test_set_in_auto_vivifies() {
        let mut root = Value::Null;
        set_in(&mut root, &FormPath::parse("users[1].name"), json!("ada"));
        assert_eq!(root, json!({"users": [null, {"name": "ada"}]}));
    }

    #[test]
    fn test_set_in_overwrites_scalar_with_container() {
        let mut root = json!({"a": 1});
        set_in(&mut root, &FormPath::parse("a.b"), json!(2));
        assert_eq!(root, json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_remove_in_object_key_and_array_slot() {
        let mut root = json!({"a": {"b": 1}, "list": [1, 2, 3]});
        remove_in(&mut root, &FormPath::parse("a.b"));
        remove_in(&mut root, &FormPath::parse("list.1"));
        // Array slot is nulled, not spliced, so indices stay stable
        assert_eq!(root, json!({"a": {}, "list": [1, null, 3]}));
    }

    #[test]
    fn test_exist_in() {
        let root = json!({"a": [0]});
        assert!(exist_in(&root, &FormPath::parse("a.0")));
        assert!(!exist_in(&root, &FormPath::parse("a.1")));
    }
}
