//! Key/value persistence for user and conversation state.
//!
//! The engine only needs `read`, `write` and `delete` of JSON blobs keyed by
//! string. Two backends ship with the crate:
//!
//! | Backend           | Durability              |
//! |-------------------|-------------------------|
//! | [`MemoryStorage`] | process lifetime        |
//! | [`FileStorage`]   | one JSON file per key   |
//!
//! # Example
//!
//! ```rust,ignore
//! let storage: Arc<dyn Storage> = Arc::new(FileStorage::new("./data"));
//! storage.save("console/users/ada", json!({ "name": "Ada" })).await?;
//! let user = storage.load("console/users/ada").await?;
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{StorageError, StorageResult};

// ─── Storage trait ────────────────────────────────────────────────────────────

/// A JSON blob store.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Reads the given keys. Missing keys are absent from the result.
    async fn read(&self, keys: &[String]) -> StorageResult<HashMap<String, Value>>;

    /// Writes every entry, replacing existing blobs.
    async fn write(&self, changes: HashMap<String, Value>) -> StorageResult<()>;

    /// Deletes the given keys. Missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> StorageResult<()>;

    /// Reads a single key.
    async fn load(&self, key: &str) -> StorageResult<Option<Value>> {
        let mut items = self.read(&[key.to_owned()]).await?;
        Ok(items.remove(key))
    }

    /// Writes a single key.
    async fn save(&self, key: &str, value: Value) -> StorageResult<()> {
        self.write(HashMap::from([(key.to_owned(), value)])).await
    }
}

// ─── MemoryStorage ────────────────────────────────────────────────────────────

/// Volatile storage backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, Value>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, keys: &[String]) -> StorageResult<HashMap<String, Value>> {
        let items = self.items.read();
        Ok(keys
            .iter()
            .filter_map(|key| items.get(key).map(|value| (key.clone(), value.clone())))
            .collect())
    }

    async fn write(&self, changes: HashMap<String, Value>) -> StorageResult<()> {
        self.items.write().extend(changes);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StorageResult<()> {
        let mut items = self.items.write();
        for key in keys {
            items.remove(key);
        }
        Ok(())
    }
}

// ─── FileStorage ──────────────────────────────────────────────────────────────

/// Durable storage writing one pretty-printed JSON file per key.
///
/// Keys are escaped into file names, so `console/users/ada` becomes
/// `<base>/console%2Fusers%2Fada.json`. Every write goes through its own
/// temporary file and a rename.
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    /// Creates a store rooted at `base_dir`. The directory is created lazily.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Root directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }
        let mut name = String::with_capacity(key.len() + 5);
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
                name.push(byte as char);
            } else {
                let _ = write!(name, "%{byte:02X}");
            }
        }
        name.push_str(".json");
        Ok(self.base_dir.join(name))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn read(&self, keys: &[String]) -> StorageResult<HashMap<String, Value>> {
        let reads = keys.iter().map(|key| async move {
            let path = self.path_for(key)?;
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(Some((key.clone(), serde_json::from_slice(&bytes)?))),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    trace!(key, "Storage miss");
                    Ok(None)
                }
                Err(err) => Err(StorageError::from(err)),
            }
        });
        let items = try_join_all(reads).await?;
        Ok(items.into_iter().flatten().collect())
    }

    async fn write(&self, changes: HashMap<String, Value>) -> StorageResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.base_dir).await?;
        for (key, value) in changes {
            let path = self.path_for(&key)?;
            let bytes = serde_json::to_vec_pretty(&value)?;
            let dir = self.base_dir.clone();
            let target = path.clone();
            tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                use std::io::Write as _;

                let mut staged = tempfile::NamedTempFile::new_in(&dir)?;
                staged.write_all(&bytes)?;
                staged.persist(&target).map_err(|err| err.error)?;
                Ok(())
            })
            .await
            .map_err(std::io::Error::other)??;
            debug!(key, path = %path.display(), "Stored blob");
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StorageResult<()> {
        for key in keys {
            match tokio::fs::remove_file(self.path_for(key)?).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    async fn exercise(storage: Arc<dyn Storage>) {
        assert_eq!(storage.load("a/b").await.unwrap(), None);

        storage.save("a/b", json!({ "n": 1 })).await.unwrap();
        storage.save("c", json!([1, 2])).await.unwrap();
        assert_eq!(storage.load("a/b").await.unwrap(), Some(json!({ "n": 1 })));

        let both = storage
            .read(&["a/b".to_owned(), "c".to_owned(), "zzz".to_owned()])
            .await
            .unwrap();
        assert_eq!(both.len(), 2);

        storage.save("a/b", json!({ "n": 2 })).await.unwrap();
        assert_eq!(storage.load("a/b").await.unwrap(), Some(json!({ "n": 2 })));

        storage.delete(&["a/b".to_owned(), "missing".to_owned()]).await.unwrap();
        assert_eq!(storage.load("a/b").await.unwrap(), None);
        assert_eq!(storage.load("c").await.unwrap(), Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = Arc::new(MemoryStorage::new());
        exercise(storage.clone()).await;
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("state"));
        exercise(Arc::new(storage.clone())).await;
        assert!(dir.path().join("state").join("c.json").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_file_storage_concurrent_writes_to_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStorage::new(dir.path()));
        let writes = (0..64).map(|n| {
            let storage = storage.clone();
            tokio::spawn(async move { storage.save("test/users/user", json!({ "n": n })).await })
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap().unwrap();
        }

        let stored = storage.load("test/users/user").await.unwrap().unwrap();
        assert!(stored["n"].as_i64().is_some_and(|n| (0..64).contains(&n)));
        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[test]
    fn test_file_names_are_escaped() {
        let storage = FileStorage::new("/base");
        assert_eq!(
            storage.path_for("console/users/ada").unwrap(),
            PathBuf::from("/base/console%2Fusers%2Fada.json")
        );
        tokio_test::assert_err!(storage.path_for(""));
    }
}
