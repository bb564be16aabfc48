//! Key/value persistence.
//!
//! Records live under `"<category>:<id>"` keys and hold JSON values. The
//! store is synchronous: it is called from change listeners, which are plain
//! closures.

use crate::error::{StorageError, StorageResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Category holding id counters.
const COUNTER_CATEGORY: &str = "id_counter";

/// Build the storage key of a record.
#[must_use]
pub fn record_key(category: &str, id: impl std::fmt::Display) -> String {
    format!("{category}:{id}")
}

/// Persistence backend.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> StorageResult<Option<serde_json::Value>>;

    /// Insert or replace a value.
    fn put(&self, key: &str, value: serde_json::Value) -> StorageResult<()>;

    /// Delete a value. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Ids of every record in `category`, in key order.
    fn ids(&self, category: &str) -> StorageResult<Vec<String>>;
}

/// Read and deserialize a record.
pub fn load<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    category: &str,
    id: impl std::fmt::Display,
) -> StorageResult<Option<T>> {
    store
        .get(&record_key(category, id))?
        .map(serde_json::from_value)
        .transpose()
        .map_err(StorageError::from)
}

/// Serialize and write a record.
pub fn save<T: Serialize>(
    store: &dyn KeyValueStore,
    category: &str,
    id: impl std::fmt::Display,
    value: &T,
) -> StorageResult<()> {
    store.put(&record_key(category, id), serde_json::to_value(value)?)
}

/// Load every record of a category, skipping ids whose record vanished.
pub fn load_all<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    category: &str,
) -> StorageResult<Vec<T>> {
    let mut out = Vec::new();
    for id in store.ids(category)? {
        if let Some(value) = load(store, category, &id)? {
            out.push(value);
        }
    }
    Ok(out)
}

/// Allocate the next id of `counter`, starting at 1.
pub fn next_id(store: &dyn KeyValueStore, counter: &str) -> StorageResult<u64> {
    let key = record_key(COUNTER_CATEGORY, counter);
    let current = store
        .get(&key)?
        .and_then(|v| v.as_u64())
        .unwrap_or_default();
    let next = current + 1;
    store.put(&key, serde_json::Value::from(next))?;
    Ok(next)
}

fn ids_in(map: &BTreeMap<String, serde_json::Value>, category: &str) -> Vec<String> {
    let prefix = format!("{category}:");
    map.range(prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&prefix))
        .map(|(k, _)| k[prefix.len()..].to_string())
        .collect()
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<serde_json::Value>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).cloned())
    }

    fn put(&self, key: &str, value: serde_json::Value) -> StorageResult<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.remove(key);
        Ok(())
    }

    fn ids(&self, category: &str) -> StorageResult<Vec<String>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ids_in(&records, category))
    }
}

/// File-backed store: one JSON object on disk, cached in memory, written
/// through on every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cache: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl FileStore {
    /// Open the store at `path`, loading existing records.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let store = Self {
            path: path.into(),
            cache: RwLock::new(BTreeMap::new()),
        };
        store.load()?;
        Ok(store)
    }

    /// File backing this store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StorageResult<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let records: BTreeMap<String, serde_json::Value> = if content.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&content)?
        };
        debug!(path = %self.path.display(), records = records.len(), "loaded store");
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = records;
        Ok(())
    }

    fn persist(&self, records: &BTreeMap<String, serde_json::Value>) -> StorageResult<()> {
        let content = serde_json::to_string_pretty(records)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<serde_json::Value>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        Ok(cache.get(key).cloned())
    }

    fn put(&self, key: &str, value: serde_json::Value) -> StorageResult<()> {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.insert(key.to_string(), value);
        self.persist(&cache)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if cache.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&cache)
    }

    fn ids(&self, category: &str) -> StorageResult<Vec<String>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ids_in(&cache, category))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        save(&store, "item", 1, &Item { name: "a".into() }).unwrap();
        save(&store, "item", 2, &Item { name: "b".into() }).unwrap();
        save(&store, "items_extra", 9, &Item { name: "z".into() }).unwrap();

        assert_eq!(store.ids("item").unwrap(), vec!["1", "2"]);
        let item: Option<Item> = load(&store, "item", 2).unwrap();
        assert_eq!(item.unwrap().name, "b");

        store.remove("item:1").unwrap();
        store.remove("item:1").unwrap();
        let all: Vec<Item> = load_all(&store, "item").unwrap();
        assert_eq!(all, vec![Item { name: "b".into() }]);
    }

    #[test]
    fn test_next_id() {
        let store = MemoryStore::new();
        assert_eq!(next_id(&store, "timesheet").unwrap(), 1);
        assert_eq!(next_id(&store, "timesheet").unwrap(), 2);
        assert_eq!(next_id(&store, "action").unwrap(), 1);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");

        {
            let store = FileStore::open(&path).unwrap();
            save(&store, "item", 7, &Item { name: "kept".into() }).unwrap();
            save(&store, "item", 8, &Item { name: "gone".into() }).unwrap();
            store.remove("item:8").unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.ids("item").unwrap(), vec!["7"]);
        let item: Option<Item> = load(&store, "item", 7).unwrap();
        assert_eq!(item, Some(Item { name: "kept".into() }));
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(FileStore::open(&path), Err(StorageError::Json(_))));
    }
}
