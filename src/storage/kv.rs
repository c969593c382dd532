//! Key-value persistence backends.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::core::errors::{JarvisError, JarvisResult};

/// Boxed future type for key-value operations.
pub type KvFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Async key-value store holding JSON values.
pub trait KeyValueStore: Send + Sync {
    /// Load the value stored under `key`.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read.
    fn load(&self, key: &str) -> KvFuture<'_, JarvisResult<Option<Value>>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be written.
    fn save(&self, key: &str, value: Value) -> KvFuture<'_, JarvisResult<()>>;
}

/// Volatile in-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> KvFuture<'_, JarvisResult<Option<Value>>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.entries.lock().await.get(&key).cloned()) })
    }

    fn save(&self, key: &str, value: Value) -> KvFuture<'_, JarvisResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            self.entries.lock().await.insert(key, value);
            Ok(())
        })
    }
}

/// Store backed by a single JSON object file.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash never leaves a half-written state file behind.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store for `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> JarvisResult<Map<String, Value>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(JarvisError::Storage(format!(
                "{} does not hold a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(JarvisError::Storage(format!(
                "{} is not valid JSON: {e}",
                self.path.display()
            ))),
        }
    }

    async fn write_map(&self, map: Map<String, Value>) -> JarvisResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&Value::Object(map))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Read the map for a modification; a corrupt file is replaced.
    async fn read_map_for_update(&self) -> JarvisResult<Map<String, Value>> {
        match self.read_map().await {
            Err(JarvisError::Storage(reason)) => {
                tracing::warn!(%reason, "discarding unreadable state file");
                Ok(Map::new())
            }
            other => other,
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn load(&self, key: &str) -> KvFuture<'_, JarvisResult<Option<Value>>> {
        let key = key.to_string();
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut map = self.read_map().await?;
            Ok(map.remove(&key))
        })
    }

    fn save(&self, key: &str, value: Value) -> KvFuture<'_, JarvisResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut map = self.read_map_for_update().await?;
            map.insert(key, value);
            self.write_map(map).await
        })
    }
}
