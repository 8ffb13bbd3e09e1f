//! Durable key/value storage used for transfer snapshots.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Mutex;

/// String key/value storage. Values are opaque to the store.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait KvStore: Send + Sync {
    /// Read a value, `None` if the key was never written or was removed.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite a value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl KvStore for InMemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}
