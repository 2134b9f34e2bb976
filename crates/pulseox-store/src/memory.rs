//! In-memory tree store for tests and local development.
//!
//! Same path semantics as the redb backend, over a `BTreeMap` guarded by a
//! single lock (the lock is what makes multi-path updates atomic here).

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::push_id::{current_millis, PushIdGenerator};
use crate::tree::{
    apply_child_order, descend, insert_at, modify_in_doc, normalize_path, ChildOrder, TreeStore,
    WriteOp,
};

/// Non-persistent tree store.
#[derive(Default)]
pub struct MemoryTreeStore {
    docs: RwLock<BTreeMap<String, Value>>,
    push_ids: PushIdGenerator,
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            push_ids: PushIdGenerator::new(),
        }
    }
}

fn apply_write(docs: &mut BTreeMap<String, Value>, path: &str, value: Option<Value>) {
    let child_prefix = format!("{path}/");
    let stale: Vec<String> = docs
        .range(child_prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&child_prefix))
        .map(|(k, _)| k.clone())
        .collect();
    for key in stale {
        docs.remove(&key);
    }
    docs.remove(path);

    let mut segments: Vec<&str> = path.split('/').collect();
    while segments.len() > 1 {
        segments.pop();
        let candidate = segments.join("/");
        if docs.contains_key(&candidate) {
            let rel = path[candidate.len() + 1..].to_string();
            let doc = docs.get_mut(&candidate).expect("ancestor just checked");
            modify_in_doc(doc, &rel, value);
            return;
        }
    }
    if let Some(value) = value {
        docs.insert(path.to_string(), value);
    }
}

impl TreeStore for MemoryTreeStore {
    fn get(&self, path: &str) -> Result<Option<Value>> {
        let path = normalize_path(path)?;
        let docs = self.docs.read().map_err(|_| poisoned())?;

        let exact = docs.get(&path).cloned();

        let child_prefix = format!("{path}/");
        let pairs: Vec<(String, Value)> = docs
            .range(child_prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&child_prefix))
            .map(|(k, v)| (k[child_prefix.len()..].to_string(), v.clone()))
            .collect();

        if !pairs.is_empty() {
            let mut result = match exact {
                Some(value @ Value::Object(_)) => value,
                _ => Value::Object(Map::new()),
            };
            for (rel, value) in pairs {
                insert_at(&mut result, &rel, value);
            }
            return Ok(Some(result));
        }
        if exact.is_some() {
            return Ok(exact);
        }

        let mut segments: Vec<&str> = path.split('/').collect();
        while segments.len() > 1 {
            segments.pop();
            let candidate = segments.join("/");
            if let Some(doc) = docs.get(&candidate) {
                let rel = &path[candidate.len() + 1..];
                return Ok(descend(doc, rel).cloned());
            }
        }
        Ok(None)
    }

    fn set(&self, path: &str, value: &Value) -> Result<()> {
        let path = normalize_path(path)?;
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        apply_write(&mut docs, &path, Some(value.clone()));
        Ok(())
    }

    fn update(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut writes = Vec::with_capacity(ops.len());
        for (path, value) in ops {
            let path = normalize_path(&path)?;
            let value = if value.is_null() { None } else { Some(value) };
            writes.push((path, value));
        }
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        for (path, value) in writes {
            apply_write(&mut docs, &path, value);
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        apply_write(&mut docs, &path, None);
        Ok(())
    }

    fn push(&self, path: &str, value: &Value) -> Result<String> {
        let path = normalize_path(path)?;
        let key = self.push_ids.generate(current_millis());
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        apply_write(&mut docs, &format!("{path}/{key}"), Some(value.clone()));
        Ok(key)
    }

    fn query(&self, path: &str, order: &ChildOrder) -> Result<Vec<(String, Value)>> {
        let children = match self.get(path)? {
            Some(Value::Object(map)) => map.into_iter().collect(),
            _ => Vec::new(),
        };
        Ok(apply_child_order(children, order))
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("store lock poisoned".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_matches_redb_semantics() {
        let store = MemoryTreeStore::new();
        store
            .set("devices/esp", &json!({"secret": "s3", "user_id": "alice"}))
            .unwrap();
        store
            .update(vec![
                ("device_users/esp/bob".to_string(), json!({"registered_at": 5})),
                ("devices/esp/user_id".to_string(), Value::Null),
            ])
            .unwrap();

        assert_eq!(store.get("devices/esp/user_id").unwrap(), None);
        assert_eq!(store.get("devices/esp/secret").unwrap(), Some(json!("s3")));
        let members = store.get("device_users/esp").unwrap().unwrap();
        assert!(members.get("bob").is_some());
    }

    #[test]
    fn test_set_replaces_subtree() {
        let store = MemoryTreeStore::new();
        store.set("a/b/c", &json!(1)).unwrap();
        store.set("a/b", &json!({"d": 2})).unwrap();
        let b = store.get("a/b").unwrap().unwrap();
        assert_eq!(b, json!({"d": 2}));
    }
}
