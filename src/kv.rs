use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::StoreError;

/// Raw string storage under string keys. The analogue of a browser's local storage area.
pub trait Backend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

// --- SQLite backend ---

pub struct SqliteBackend {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        // Another process writing the same file holds the lock only briefly
        conn.busy_timeout(Duration::from_secs(2))?;
        let backend = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        backend.init()?;
        Ok(backend)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let backend = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        backend.init()?;
        Ok(backend)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn default_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "campus2career") {
            proj_dirs.data_dir().join("campus2career.db")
        } else {
            PathBuf::from("campus2career.db")
        }
    }

    fn init(&self) -> Result<(), StoreError> {
        self.lock()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }
}

impl Backend for SqliteBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .lock()?
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }
}

// --- In-memory backend ---

/// Shared in-memory storage area. Clones see the same entries, like two tabs of one origin.
#[derive(Clone)]
pub struct MemoryBackend {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    online: Arc<AtomicBool>,
    quota: Arc<AtomicUsize>,
}

const UNLIMITED: usize = usize::MAX;

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: Arc::default(),
            online: Arc::new(AtomicBool::new(true)),
            quota: Arc::new(AtomicUsize::new(UNLIMITED)),
        }
    }

    /// Limit the total size of keys plus values, in bytes.
    pub fn with_quota(bytes: usize) -> Self {
        let backend = Self::new();
        backend.set_quota(Some(bytes));
        backend
    }

    /// Change the size limit for every clone. `None` lifts it.
    pub fn set_quota(&self, bytes: Option<usize>) {
        self.quota.store(bytes.unwrap_or(UNLIMITED), Ordering::SeqCst);
    }

    /// Toggle availability; while offline every operation fails with `Unavailable`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn entries(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>, StoreError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("storage is offline".to_string()));
        }
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("storage lock poisoned".to_string()))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries()?;
        let limit = self.quota.load(Ordering::SeqCst);
        if limit != UNLIMITED {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > limit {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    limit,
                });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries()?.keys().cloned().collect())
    }
}
