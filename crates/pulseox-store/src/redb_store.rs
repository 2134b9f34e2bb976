//! Redb-backed tree store.
//!
//! Documents live in a single redb table keyed by their full path, with
//! JSON-encoded values. Every logical operation runs in one write
//! transaction, which is what makes multi-path fan-out updates atomic.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::push_id::{current_millis, PushIdGenerator};
use crate::tree::{
    apply_child_order, descend, insert_at, modify_in_doc, normalize_path, ChildOrder, TreeStore,
    WriteOp,
};

const TREE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tree");

/// Persistent tree store backed by redb.
pub struct RedbTreeStore {
    db: Arc<Database>,
    push_ids: PushIdGenerator,
}

impl RedbTreeStore {
    /// Open or create a database at the given path, creating parent
    /// directories as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
        }
        let db = if path.exists() {
            Database::open(path).map_err(|e| StoreError::Backend(e.to_string()))?
        } else {
            Database::create(path).map_err(|e| StoreError::Backend(e.to_string()))?
        };

        let store = Self {
            db: Arc::new(db),
            push_ids: PushIdGenerator::new(),
        };
        // Ensure the table exists so read transactions never race creation.
        let txn = store.begin_write()?;
        txn.open_table(TREE_TABLE)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(store)
    }

    fn begin_write(&self) -> Result<redb::WriteTransaction> {
        self.db
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn begin_read(&self) -> Result<redb::ReadTransaction> {
        self.db
            .begin_read()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn write_ops(&self, ops: Vec<(String, Option<Value>)>) -> Result<()> {
        let txn = self.begin_write()?;
        {
            let mut table = txn
                .open_table(TREE_TABLE)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            for (path, value) in ops {
                apply_write(&mut table, &path, value)?;
            }
        }
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))
    }
}

/// Apply one write (set or delete) inside an open transaction.
fn apply_write(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    path: &str,
    value: Option<Value>,
) -> Result<()> {
    // Clear descendants: the write replaces the whole subtree.
    let child_prefix = format!("{path}/");
    let mut stale: Vec<String> = Vec::new();
    {
        let range = table
            .range(child_prefix.as_str()..)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        for item in range {
            let (key, _) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let key = key.value();
            if !key.starts_with(child_prefix.as_str()) {
                break;
            }
            stale.push(key.to_string());
        }
    }
    for key in &stale {
        table
            .remove(key.as_str())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
    }
    table
        .remove(path)
        .map_err(|e| StoreError::Backend(e.to_string()))?;

    // When an ancestor document exists the value lives inside it.
    let mut ancestor: Option<(String, Value)> = None;
    let mut segments: Vec<&str> = path.split('/').collect();
    while segments.len() > 1 {
        segments.pop();
        let candidate = segments.join("/");
        let found = {
            let guard = table
                .get(candidate.as_str())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            guard.map(|raw| serde_json::from_slice::<Value>(raw.value()))
        };
        if let Some(parsed) = found {
            ancestor = Some((candidate, parsed?));
            break;
        }
    }

    match (ancestor, value) {
        (Some((anc_path, mut doc)), value) => {
            let rel = &path[anc_path.len() + 1..];
            modify_in_doc(&mut doc, rel, value);
            let bytes = serde_json::to_vec(&doc)?;
            table
                .insert(anc_path.as_str(), bytes.as_slice())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        (None, Some(value)) => {
            let bytes = serde_json::to_vec(&value)?;
            table
                .insert(path, bytes.as_slice())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        (None, None) => {}
    }
    Ok(())
}

impl TreeStore for RedbTreeStore {
    fn get(&self, path: &str) -> Result<Option<Value>> {
        let path = normalize_path(path)?;
        let txn = self.begin_read()?;
        let table = txn
            .open_table(TREE_TABLE)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let exact: Option<Value> = match table
            .get(path.as_str())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(raw) => Some(serde_json::from_slice(raw.value())?),
            None => None,
        };

        // Assemble descendants into a nested object.
        let child_prefix = format!("{path}/");
        let mut pairs: Vec<(String, Value)> = Vec::new();
        let range = table
            .range(child_prefix.as_str()..)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        for item in range {
            let (key, raw) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let key = key.value();
            if !key.starts_with(child_prefix.as_str()) {
                break;
            }
            let rel = key[child_prefix.len()..].to_string();
            pairs.push((rel, serde_json::from_slice(raw.value())?));
        }

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

        // Fall back to a field inside the nearest ancestor document.
        let mut segments: Vec<&str> = path.split('/').collect();
        while segments.len() > 1 {
            segments.pop();
            let candidate = segments.join("/");
            if let Some(raw) = table
                .get(candidate.as_str())
                .map_err(|e| StoreError::Backend(e.to_string()))?
            {
                let doc: Value = serde_json::from_slice(raw.value())?;
                let rel = &path[candidate.len() + 1..];
                return Ok(descend(&doc, rel).cloned());
            }
        }
        Ok(None)
    }

    fn set(&self, path: &str, value: &Value) -> Result<()> {
        let path = normalize_path(path)?;
        self.write_ops(vec![(path, Some(value.clone()))])
    }

    fn update(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut writes = Vec::with_capacity(ops.len());
        for (path, value) in ops {
            let path = normalize_path(&path)?;
            let value = if value.is_null() { None } else { Some(value) };
            writes.push((path, value));
        }
        self.write_ops(writes)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        self.write_ops(vec![(path, None)])
    }

    fn push(&self, path: &str, value: &Value) -> Result<String> {
        let path = normalize_path(path)?;
        let key = self.push_ids.generate(current_millis());
        self.write_ops(vec![(format!("{path}/{key}"), Some(value.clone()))])?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, RedbTreeStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbTreeStore::open(dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_set_get_roundtrip() {
        let (_dir, store) = temp_store();
        store
            .set("devices/esp", &json!({"secret": "s3", "user_id": "alice"}))
            .unwrap();

        let doc = store.get("devices/esp").unwrap().unwrap();
        assert_eq!(doc["secret"], json!("s3"));
        // Field access inside a stored document.
        assert_eq!(store.get("devices/esp/secret").unwrap(), Some(json!("s3")));
        assert_eq!(store.get("devices/esp/missing").unwrap(), None);
    }

    #[test]
    fn test_subtree_assembly() {
        let (_dir, store) = temp_store();
        store
            .set("device_users/esp/u1", &json!({"registered_at": 100}))
            .unwrap();
        store
            .set("device_users/esp/u2", &json!({"registered_at": 200}))
            .unwrap();

        let members = store.get("device_users/esp").unwrap().unwrap();
        assert_eq!(members.as_object().unwrap().len(), 2);
        assert_eq!(members["u1"]["registered_at"], json!(100));
    }

    #[test]
    fn test_update_is_atomic_fanout_with_null_delete() {
        let (_dir, store) = temp_store();
        store
            .set("devices/esp", &json!({"secret": "s3", "user_id": "alice"}))
            .unwrap();

        store
            .update(vec![
                ("records/k1".to_string(), json!({"ts": 1})),
                ("user_records/alice/k1".to_string(), json!({"ts": 1})),
                ("devices/esp/user_id".to_string(), Value::Null),
            ])
            .unwrap();

        assert_eq!(store.get("records/k1").unwrap().unwrap()["ts"], json!(1));
        assert_eq!(
            store.get("user_records/alice/k1").unwrap().unwrap()["ts"],
            json!(1)
        );
        assert_eq!(store.get("devices/esp/user_id").unwrap(), None);
        // The rest of the device document is untouched.
        assert_eq!(store.get("devices/esp/secret").unwrap(), Some(json!("s3")));
    }

    #[test]
    fn test_push_keys_are_ordered() {
        let (_dir, store) = temp_store();
        let first = store.push("records", &json!({"n": 1})).unwrap();
        let second = store.push("records", &json!({"n": 2})).unwrap();
        assert!(first < second);

        let feed = store.get("records").unwrap().unwrap();
        assert_eq!(feed[&first]["n"], json!(1));
    }

    #[test]
    fn test_query_order_and_limit() {
        let (_dir, store) = temp_store();
        store.set("records/a", &json!({"ts": 30, "user": "u1"})).unwrap();
        store.set("records/b", &json!({"ts": 10, "user": "u2"})).unwrap();
        store.set("records/c", &json!({"ts": 20, "user": "u1"})).unwrap();

        let ordered = store.query("records", &ChildOrder::by("ts")).unwrap();
        let keys: Vec<_> = ordered.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);

        let mine = store
            .query("records", &ChildOrder::by("user").equal_to("u1"))
            .unwrap();
        assert_eq!(mine.len(), 2);

        let latest = store
            .query("records", &ChildOrder::by("ts").limit_to_last(1))
            .unwrap();
        assert_eq!(latest[0].0, "a");
    }

    #[test]
    fn test_delete_removes_subtree() {
        let (_dir, store) = temp_store();
        store.set("schedules/s1", &json!({"status": "scheduled"})).unwrap();
        store.delete("schedules/s1").unwrap();
        assert_eq!(store.get("schedules/s1").unwrap(), None);
        assert_eq!(store.get("schedules").unwrap(), None);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");
        {
            let store = RedbTreeStore::open(&db_path).unwrap();
            store.set("devices/esp", &json!({"secret": "s3"})).unwrap();
        }
        let store = RedbTreeStore::open(&db_path).unwrap();
        assert_eq!(store.get("devices/esp/secret").unwrap(), Some(json!("s3")));
    }
}
