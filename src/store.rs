use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::error::StoreError;
use crate::kv::Backend;

/// JSON values under string keys, persisted through a [`Backend`].
///
/// Writes always replace the whole value; there is no merge primitive.
/// Cloning is cheap and every clone talks to the same backend.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
}

impl Store {
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Decode the value under `key`, or return `default` when nothing is stored.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, StoreError> {
        match self.backend.read(key)? {
            None => Ok(default),
            Some(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::SchemaMismatch {
                key: key.to_string(),
                source,
            }),
        }
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.backend.read(key)
    }

    /// Replace the value under `key`. Returns the exact text that was written.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<String, StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.backend.write(key, &raw)?;
        Ok(raw)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.backend.remove(key)
    }

    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.backend.keys()
    }
}
