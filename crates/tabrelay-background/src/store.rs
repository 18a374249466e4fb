//! Key-value store implementations: in-memory (tests, ephemeral runs) and
//! a directory of JSON files (one file per key).

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::ports::KeyValueStore;

// ─── MemoryStore ──────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored entry.
    pub fn entries(&self) -> HashMap<String, Value> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    fn with_entries<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Value>) -> R,
    ) -> Result<R, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_owned()))?;
        Ok(f(&mut entries))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.with_entries(|entries| entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            entries.insert(key.to_owned(), value);
        })
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            entries.remove(key);
        })
    }
}

// ─── FileStore ────────────────────────────────────────────────────

/// Stores each key as `<dir>/<sanitized key>.json`. Writes go through a
/// temporary file and a rename so a crash never leaves a torn value.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path backing a key. Characters outside `[A-Za-z0-9_-]` become `_`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&value)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.expect("get"), None);
        store.set("k", json!({"a": 1})).await.expect("set");
        assert_eq!(store.get("k").await.expect("get"), Some(json!({"a": 1})));
        store.remove("k").await.expect("remove");
        assert_eq!(store.get("k").await.expect("get"), None);
        assert!(store.entries().is_empty());
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path().join("state"));
        store.set("token-7", json!("abc")).await.expect("set");

        let reopened = FileStore::new(dir.path().join("state"));
        assert_eq!(reopened.get("token-7").await.expect("get"), Some(json!("abc")));
    }

    #[tokio::test]
    async fn file_store_missing_key_is_none_and_remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());
        assert_eq!(store.get("nope").await.expect("get"), None);
        store.remove("nope").await.expect("remove missing");
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());
        std::fs::write(store.path_for("bad"), b"{not json").expect("write");
        assert!(matches!(store.get("bad").await, Err(StoreError::Serde(_))));
    }

    #[test]
    fn keys_are_sanitized_into_file_names() {
        let store = FileStore::new("/tmp/x");
        assert_eq!(
            store.path_for("registry/../state"),
            PathBuf::from("/tmp/x/registry____state.json")
        );
    }
}
