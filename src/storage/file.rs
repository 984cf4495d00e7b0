use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    core::traits::store::{KeyValueStore, StoreError},
    storage::is_owned,
};

const APP_DIR: &str = "challenge-trainer";
const FILE_NAME: &str = "storage.json";

/// All keys kept in a single JSON object on disk. Every write rewrites the
/// whole document into a sibling temp file and renames it over the old one,
/// so readers only ever see a complete document.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `<config dir>/challenge-trainer/storage.json`, relative to the working
    /// directory when the platform has no config dir.
    pub fn default_location() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_default()
            .join(APP_DIR)
            .join(FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str(&text)? {
            Value::Object(map) => Ok(map),
            other => Err(StoreError::Corrupt {
                msg: format!("expected an object, found {}", other),
            }),
        }
    }

    fn save(&self, map: Map<String, Value>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let text = serde_json::to_string_pretty(&Value::Object(map))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, text)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn locked<T>(&self, f: impl FnOnce() -> Result<T, StoreError>) -> Result<T, StoreError> {
        let _guard = self.lock.lock().map_err(|e| StoreError::Io {
            msg: e.to_string(),
        })?;
        f()
    }

    fn update(&self, f: impl FnOnce(&mut Map<String, Value>)) -> Result<(), StoreError> {
        self.locked(|| {
            let mut map = self.load()?;
            f(&mut map);
            self.save(map)
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.locked(|| Ok(self.load()?.remove(key)))
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        tracing::debug!("Storing {} in {}", key, self.path.display());
        self.update(|map| {
            map.insert(key.to_string(), value.clone());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|map| {
            map.remove(key);
        })
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.update(|map| map.retain(|key, _| !is_owned(key)))
    }
}
