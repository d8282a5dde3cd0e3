//! Key/value persistence used for cached values, overrides, sticky experiments, network fallback
//! info and failed event requests.
use std::{
    collections::HashMap,
    fs,
    io::Write as _,
    path::{Path, PathBuf},
    sync::{Mutex, RwLock},
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{Map, Value};

use crate::Result;

/// Persistence capability the SDK depends on. Implementations must be safe to call from any
/// thread.
///
/// Only [`get`](KeyValueStorage::get), [`set`](KeyValueStorage::set) and
/// [`remove`](KeyValueStorage::remove) are required; typed helpers are provided on top.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn remove(&self, key: &str);

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    fn set_string(&self, key: &str, value: &str) {
        self.set(key, Value::String(value.to_owned()));
    }

    fn get_array(&self, key: &str) -> Option<Vec<Value>> {
        match self.get(key)? {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    fn set_array(&self, key: &str, values: Vec<Value>) {
        self.set(key, Value::Array(values));
    }

    /// Raw bytes, stored base64-encoded.
    fn get_data(&self, key: &str) -> Option<Vec<u8>> {
        BASE64.decode(self.get_string(key)?).ok()
    }

    fn set_data(&self, key: &str, data: &[u8]) {
        self.set_string(key, &BASE64.encode(data));
    }

    /// Read a dictionary written by [`set_dictionary`](KeyValueStorage::set_dictionary). The
    /// dictionary is stored as one serialized blob so readers never observe a partial write.
    fn get_dictionary(&self, key: &str) -> Option<Map<String, Value>> {
        let bytes = self.get_data(key)?;
        match serde_json::from_slice(&bytes) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) => None,
            Err(err) => {
                log::warn!(target: "statsig", key; "failed to decode stored dictionary: {err}");
                None
            }
        }
    }

    fn set_dictionary(&self, key: &str, dictionary: &Map<String, Value>) {
        match serde_json::to_vec(dictionary) {
            Ok(bytes) => self.set_data(key, &bytes),
            Err(err) => log::warn!(target: "statsig", key; "failed to encode dictionary: {err}"),
        }
    }
}

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    values: RwLock<HashMap<String, Value>>,
}

impl InMemoryStorage {
    pub fn new() -> InMemoryStorage {
        InMemoryStorage::default()
    }
}

impl KeyValueStorage for InMemoryStorage {
    fn get(&self, key: &str) -> Option<Value> {
        let values = self
            .values
            .read()
            .expect("thread holding storage lock should not panic");
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        let mut values = self
            .values
            .write()
            .expect("thread holding storage lock should not panic");
        values.insert(key.to_owned(), value);
    }

    fn remove(&self, key: &str) {
        let mut values = self
            .values
            .write()
            .expect("thread holding storage lock should not panic");
        values.remove(key);
    }
}

/// Storage backed by a single JSON file. Every mutation rewrites the file through a temporary
/// file and a rename.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    values: Mutex<HashMap<String, Value>>,
}

impl FileStorage {
    /// Open (or create) storage at `path`. A corrupt file is discarded.
    pub fn open(path: impl Into<PathBuf>) -> Result<FileStorage> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                log::warn!(target: "statsig", "discarding unreadable storage file: {err}");
                HashMap::new()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(FileStorage {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &HashMap<String, Value>) {
        if let Err(err) = write_atomically(&self.path, values) {
            log::warn!(target: "statsig", "failed to write storage file: {err}");
        }
    }
}

fn write_atomically(path: &Path, values: &HashMap<String, Value>) -> Result<()> {
    let bytes = serde_json::to_vec(values)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Option<Value> {
        let values = self
            .values
            .lock()
            .expect("thread holding storage lock should not panic");
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        let mut values = self
            .values
            .lock()
            .expect("thread holding storage lock should not panic");
        values.insert(key.to_owned(), value);
        self.persist(&values);
    }

    fn remove(&self, key: &str) {
        let mut values = self
            .values
            .lock()
            .expect("thread holding storage lock should not panic");
        if values.remove(key).is_some() {
            self.persist(&values);
        }
    }
}
