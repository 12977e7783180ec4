use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

/// One change in a batch applied to a [`KeyValueStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum KvWrite {
    Set(String, Value),
    Remove(String),
}

impl KvWrite {
    pub fn set(key: &str, value: impl Into<Value>) -> Self {
        KvWrite::Set(key.to_string(), value.into())
    }

    pub fn remove(key: &str) -> Self {
        KvWrite::Remove(key.to_string())
    }
}

/// Flat preference storage. Every batch passed to `apply` lands together.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn apply(&self, batch: Vec<KvWrite>) -> Result<()>;

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.apply(vec![KvWrite::Set(key.to_string(), value)])
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.apply(vec![KvWrite::Remove(key.to_string())])
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }
}

fn apply_to_map(map: &mut Map<String, Value>, batch: Vec<KvWrite>) {
    for write in batch {
        match write {
            KvWrite::Set(key, value) => {
                map.insert(key, value);
            }
            KvWrite::Remove(key) => {
                map.remove(&key);
            }
        }
    }
}

/// Current contents of the preferences file. `None` when the file is missing
/// or does not hold a JSON object.
fn read_map(path: &Path) -> Result<Option<Map<String, Value>>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read preferences from {}", path.display()))?;
    match serde_json::from_str::<Map<String, Value>>(&contents) {
        Ok(map) => Ok(Some(map)),
        Err(err) => {
            log::warn!(
                "Ignoring malformed preferences file {}: {err}",
                path.display()
            );
            Ok(None)
        }
    }
}

/// Preferences persisted as a single pretty-printed JSON object. Writes
/// merge into the file as it is on disk, so keys written by another process
/// since this one opened are kept.
pub struct JsonFileStore {
    path: PathBuf,
    data: RwLock<Map<String, Value>>,
}

impl JsonFileStore {
    /// Opens the store at `path`. A missing file starts empty and an
    /// unreadable one is treated as empty rather than failing startup.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = read_map(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create preferences directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write preferences to {}", self.path.display()))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.data
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn apply(&self, batch: Vec<KvWrite>) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(|e| e.into_inner());
        let mut next = match read_map(&self.path)? {
            Some(on_disk) => on_disk,
            None if self.path.exists() => guard.clone(),
            None => Map::new(),
        };
        apply_to_map(&mut next, batch);
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }
}

/// Volatile store for headless use and tests.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.data
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn apply(&self, batch: Vec<KvWrite>) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(|e| e.into_inner());
        apply_to_map(&mut guard, batch);
        Ok(())
    }
}
