//! Persisted shared secret for the worker control channel.
//!
//! The secret lives in a small string key-value store under a fixed key and is
//! reused across restarts. It is generated once from 32 random bytes.

use crate::error::{Result, RpcError};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Key under which the secret is stored.
pub const SECRET_KEY: &str = "rpcPassword";

const SECRET_BYTES: usize = 32;

/// String-valued key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// JSON object on disk, rewritten atomically on every put.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(serde_json::to_string_pretty(map)?.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| RpcError::Io(e.error))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().expect("JsonFileStore lock poisoned");
        Ok(self.read_map()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().expect("JsonFileStore lock poisoned");
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }
}

/// In-process store, used by tests and embedders without durable storage.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().expect("MemoryStore lock poisoned");
        Ok(values.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().expect("MemoryStore lock poisoned");
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub struct SecretStore {
    store: Box<dyn KeyValueStore>,
}

impl SecretStore {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(JsonFileStore::new(path)))
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::default()))
    }

    /// Return the persisted secret, generating and storing one if absent.
    pub fn get_or_create(&self) -> Result<String> {
        let existing = self
            .store
            .get(SECRET_KEY)
            .map_err(|e| RpcError::SecretPersistence(e.to_string()))?;

        if let Some(secret) = existing.filter(|s| !s.is_empty()) {
            debug!("Using persisted worker secret");
            return Ok(secret);
        }

        let secret = generate_secret();
        self.store
            .put(SECRET_KEY, &secret)
            .map_err(|e| RpcError::SecretPersistence(e.to_string()))?;
        info!("Generated new worker secret");
        Ok(secret)
    }

    pub fn peek(&self) -> Result<Option<String>> {
        self.store
            .get(SECRET_KEY)
            .map_err(|e| RpcError::SecretPersistence(e.to_string()))
    }
}

fn generate_secret() -> String {
    let mut buf = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}
