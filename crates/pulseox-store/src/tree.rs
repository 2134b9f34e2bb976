//! The `TreeStore` trait and path/tree helpers shared by the backends.
//!
//! Paths are slash-separated (`devices/esp/secret`). A value written at a
//! path can later be read back at that path, at any ancestor (assembled
//! into a nested object), or at any descendant (a field inside the stored
//! document). Writing `Null` deletes the subtree at that path.

use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// A single write in a multi-path update. `Null` deletes the path.
pub type WriteOp = (String, Value);

/// Ordered-child query parameters for [`TreeStore::query`].
///
/// Children missing the ordering field sort before all others, matching
/// the hierarchical database the store models.
#[derive(Debug, Clone, Default)]
pub struct ChildOrder {
    /// Child field to order by.
    pub order_by: String,
    /// Keep only children whose ordering field equals this value.
    pub equal_to: Option<Value>,
    /// Keep only the last `n` children in ascending order.
    pub limit_to_last: Option<usize>,
}

impl ChildOrder {
    pub fn by(field: impl Into<String>) -> Self {
        Self {
            order_by: field.into(),
            ..Self::default()
        }
    }

    pub fn equal_to(mut self, value: impl Into<Value>) -> Self {
        self.equal_to = Some(value.into());
        self
    }

    pub fn limit_to_last(mut self, n: usize) -> Self {
        self.limit_to_last = Some(n);
        self
    }
}

/// Tree-structured document store.
///
/// Methods are synchronous: both backends complete in-process without
/// network I/O, so callers use them directly from async contexts.
pub trait TreeStore: Send + Sync {
    /// Read the value at `path`: an exact document, an assembled subtree,
    /// or a field inside an ancestor document. `None` when nothing exists.
    fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Replace the subtree at `path` with `value`.
    fn set(&self, path: &str, value: &Value) -> Result<()>;

    /// Apply several writes atomically. `Null` values delete their path.
    fn update(&self, ops: Vec<WriteOp>) -> Result<()>;

    /// Remove the subtree at `path`.
    fn delete(&self, path: &str) -> Result<()>;

    /// Insert `value` under a generated chronologically-sortable child key
    /// of `path` and return the key.
    fn push(&self, path: &str, value: &Value) -> Result<String>;

    /// Return the direct children of `path` ordered by a child field.
    ///
    /// This is the store's indexed-query capability; callers use it instead
    /// of iterating collections themselves.
    fn query(&self, path: &str, order: &ChildOrder) -> Result<Vec<(String, Value)>>;
}

/// Validate and canonicalize a path: no leading/trailing slashes, no empty
/// segments.
pub(crate) fn normalize_path(path: &str) -> Result<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(StoreError::InvalidPath("empty path".into()));
    }
    if trimmed.split('/').any(|seg| seg.is_empty()) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Insert `value` at the slash-separated location `rel` inside a nested
/// object, creating intermediate objects as needed. Backends use this to
/// assemble flat descendant entries into a subtree.
pub(crate) fn insert_at(root: &mut Value, rel: &str, value: Value) {
    let mut current = root;
    let segments: Vec<&str> = rel.split('/').collect();
    for (i, seg) in segments.iter().enumerate() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let map = current.as_object_mut().expect("object just ensured");
        if i == segments.len() - 1 {
            map.insert((*seg).to_string(), value);
            return;
        }
        current = map
            .entry((*seg).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Descend into `doc` following slash-separated `rel`, returning the value
/// at that location if present.
pub(crate) fn descend<'a>(doc: &'a Value, rel: &str) -> Option<&'a Value> {
    let mut current = doc;
    for seg in rel.split('/') {
        current = current.as_object()?.get(seg)?;
    }
    Some(current)
}

/// Set (or, with `None`, remove) the field at `rel` inside `doc`, creating
/// intermediate objects as needed. Returns false when a removal found
/// nothing to remove.
pub(crate) fn modify_in_doc(doc: &mut Value, rel: &str, value: Option<Value>) -> bool {
    let segments: Vec<&str> = rel.split('/').collect();
    modify_segments(doc, &segments, value)
}

fn modify_segments(node: &mut Value, segments: &[&str], value: Option<Value>) -> bool {
    let (head, rest) = match segments.split_first() {
        Some(parts) => parts,
        None => return false,
    };
    if rest.is_empty() {
        return match value {
            Some(v) => {
                if !node.is_object() {
                    *node = Value::Object(Map::new());
                }
                node.as_object_mut()
                    .expect("object just ensured")
                    .insert((*head).to_string(), v);
                true
            }
            None => node
                .as_object_mut()
                .map(|m| m.remove(*head).is_some())
                .unwrap_or(false),
        };
    }
    match value {
        Some(_) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            let child = node
                .as_object_mut()
                .expect("object just ensured")
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            modify_segments(child, rest, value)
        }
        None => match node.as_object_mut().and_then(|m| m.get_mut(*head)) {
            Some(child) => modify_segments(child, rest, value),
            None => false,
        },
    }
}

/// Total order over JSON values used for child ordering: null, then
/// booleans, then numbers, then strings; objects/arrays last.
pub(crate) fn order_value_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) | Value::Object(_) => 4,
    }
}

pub(crate) fn compare_order_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let rank = order_value_rank(a).cmp(&order_value_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Apply an ordered-child query to an assembled children map.
pub(crate) fn apply_child_order(
    children: Vec<(String, Value)>,
    order: &ChildOrder,
) -> Vec<(String, Value)> {
    let mut rows: Vec<(String, Value)> = children;

    if let Some(want) = &order.equal_to {
        rows.retain(|(_, child)| {
            descend(child, &order.order_by).map(|v| v == want).unwrap_or(false)
        });
    }

    rows.sort_by(|(ka, va), (kb, vb)| {
        let fa = descend(va, &order.order_by).unwrap_or(&Value::Null);
        let fb = descend(vb, &order.order_by).unwrap_or(&Value::Null);
        compare_order_values(fa, fb).then_with(|| ka.cmp(kb))
    });

    if let Some(n) = order.limit_to_last {
        let len = rows.len();
        if len > n {
            rows.drain(..len - n);
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a/b/").unwrap(), "a/b");
        assert!(normalize_path("").is_err());
        assert!(normalize_path("a//b").is_err());
    }

    #[test]
    fn test_insert_at_nests_pairs() {
        let mut tree = Value::Object(Map::new());
        insert_at(&mut tree, "u1/registered_at", json!(100));
        insert_at(&mut tree, "u2", json!({"registered_at": 200}));
        assert_eq!(tree["u1"]["registered_at"], json!(100));
        assert_eq!(tree["u2"]["registered_at"], json!(200));
    }

    #[test]
    fn test_modify_in_doc_set_and_remove() {
        let mut doc = json!({"secret": "s3", "user_id": "alice"});
        assert!(modify_in_doc(&mut doc, "user_id", None));
        assert!(doc.get("user_id").is_none());
        assert!(!modify_in_doc(&mut doc, "user_id", None));

        assert!(modify_in_doc(&mut doc, "meta/rev", Some(json!(2))));
        assert_eq!(doc["meta"]["rev"], json!(2));
    }

    #[test]
    fn test_apply_child_order_sorts_filters_limits() {
        let children = vec![
            ("a".to_string(), json!({"ts": 3})),
            ("b".to_string(), json!({"ts": 1})),
            ("c".to_string(), json!({"ts": 2})),
            ("d".to_string(), json!({})),
        ];

        let ordered = apply_child_order(children.clone(), &ChildOrder::by("ts"));
        let keys: Vec<_> = ordered.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["d", "b", "c", "a"]);

        let last_two = apply_child_order(children.clone(), &ChildOrder::by("ts").limit_to_last(2));
        let keys: Vec<_> = last_two.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["c", "a"]);

        let only_two = apply_child_order(children, &ChildOrder::by("ts").equal_to(2));
        assert_eq!(only_two.len(), 1);
        assert_eq!(only_two[0].0, "c");
    }
}
