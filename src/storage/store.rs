//! Key-value stores for gate state
//!
//! Keys are `/`-separated paths such as `permissions/<session_id>`.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde_json::Value;

use crate::core::{GateError, GateResult};

/// Default directory for file-backed state
const STATE_DIR: &str = "state";

/// Simple get/set contract used for rules and thread snapshots
pub trait StateStore: Send + Sync {
    /// Read a value, `None` if the key was never written
    fn get(&self, key: &str) -> GateResult<Option<Value>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: Value) -> GateResult<()>;

    /// Delete a value; deleting a missing key is not an error
    fn remove(&self, key: &str) -> GateResult<()>;
}

/// Process-local store, mainly for tests and ephemeral agents
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for InMemoryStore {
    fn get(&self, key: &str) -> GateResult<Option<Value>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> GateResult<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> GateResult<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// One pretty-printed JSON file per key under a base directory
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create a file store with the default directory
    pub fn new() -> Self {
        Self {
            base_dir: PathBuf::from(STATE_DIR),
        }
    }

    /// Create a file store with a custom directory
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: dir.into(),
        }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Map a key to its file, rejecting keys that could escape the base dir
    pub fn path_for(&self, key: &str) -> GateResult<PathBuf> {
        let segments: Vec<&str> = key.split('/').collect();
        let valid = segments
            .iter()
            .all(|s| !s.is_empty() && *s != "." && *s != ".." && !s.contains('\\'));
        let Some((file_name, dirs)) = segments.split_last().filter(|_| valid) else {
            return Err(GateError::InvalidKey(key.to_string()));
        };

        let mut path = self.base_dir.clone();
        path.extend(dirs);
        path.push(format!("{}.json", file_name));
        Ok(path)
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for FileStore {
    fn get(&self, key: &str) -> GateResult<Option<Value>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);
        let value = serde_json::from_reader(reader)?;
        Ok(Some(value))
    }

    fn set(&self, key: &str, value: Value) -> GateResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &value)?;
        writer.flush()?;

        tracing::debug!("Wrote state {} to {:?}", key, path);
        Ok(())
    }

    fn remove(&self, key: &str) -> GateResult<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}
