//! Repositories for persisted state. The engine sees the relational store
//! only through these traits; the in-memory implementations back tests and
//! single-process deployments.

pub mod secrets;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::models::{FileRecord, FsError, Mount, S3Config};
use secrets::SecretCipher;

// ── Mounts ───────────────────────────────────────────────────────────────────

#[async_trait]
pub trait MountStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Mount>, FsError>;
    async fn get(&self, id: &str) -> Result<Option<Mount>, FsError>;
    async fn insert(&self, mount: Mount) -> Result<(), FsError>;
    async fn update(&self, mount: Mount) -> Result<(), FsError>;
    async fn delete(&self, id: &str) -> Result<(), FsError>;
    /// Record that a mount served a request. Callers treat failure as
    /// non-fatal; this must never block the data path.
    async fn touch_last_used(&self, id: &str, at_ms: i64) -> Result<(), FsError>;
}

#[derive(Default)]
pub struct MemoryMountStore {
    inner: Mutex<HashMap<String, Mount>>,
}

impl MemoryMountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MountStore for MemoryMountStore {
    async fn list(&self) -> Result<Vec<Mount>, FsError> {
        let map = self.inner.lock().map_err(|e| FsError::internal(e.to_string()))?;
        let mut mounts: Vec<Mount> = map.values().cloned().collect();
        mounts.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.id.cmp(&b.id)));
        Ok(mounts)
    }

    async fn get(&self, id: &str) -> Result<Option<Mount>, FsError> {
        let map = self.inner.lock().map_err(|e| FsError::internal(e.to_string()))?;
        Ok(map.get(id).cloned())
    }

    async fn insert(&self, mount: Mount) -> Result<(), FsError> {
        let mut map = self.inner.lock().map_err(|e| FsError::internal(e.to_string()))?;
        if map.contains_key(&mount.id) {
            return Err(FsError::conflict(format!("mount '{}' already exists", mount.id)));
        }
        map.insert(mount.id.clone(), mount);
        Ok(())
    }

    async fn update(&self, mount: Mount) -> Result<(), FsError> {
        let mut map = self.inner.lock().map_err(|e| FsError::internal(e.to_string()))?;
        if !map.contains_key(&mount.id) {
            return Err(FsError::not_found(format!("mount '{}'", mount.id)));
        }
        map.insert(mount.id.clone(), mount);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), FsError> {
        let mut map = self.inner.lock().map_err(|e| FsError::internal(e.to_string()))?;
        map.remove(id)
            .map(|_| ())
            .ok_or_else(|| FsError::not_found(format!("mount '{}'", id)))
    }

    async fn touch_last_used(&self, id: &str, at_ms: i64) -> Result<(), FsError> {
        let mut map = self.inner.lock().map_err(|e| FsError::internal(e.to_string()))?;
        if let Some(mount) = map.get_mut(id) {
            mount.last_used_at = Some(at_ms);
        }
        Ok(())
    }
}

// ── S3 configs ───────────────────────────────────────────────────────────────

/// Callback fired when a config changes so pooled drivers can be torn down.
pub type ConfigChangedFn = Box<dyn Fn(&str) + Send + Sync>;

#[async_trait]
pub trait S3ConfigStore: Send + Sync {
    async fn list(&self) -> Result<Vec<S3Config>, FsError>;
    async fn get(&self, id: &str) -> Result<Option<S3Config>, FsError>;
    async fn insert(&self, config: S3Config) -> Result<(), FsError>;
    async fn update(&self, config: S3Config) -> Result<(), FsError>;
    async fn delete(&self, id: &str) -> Result<(), FsError>;
    /// Decrypt the stored secret key. Called only while building a client.
    fn decrypt_secret(&self, config: &S3Config) -> Result<String, FsError>;
    /// Register a listener invoked with the config id on update and delete.
    fn on_config_changed(&self, listener: ConfigChangedFn);
}

pub struct MemoryConfigStore {
    inner: Mutex<HashMap<String, S3Config>>,
    cipher: Arc<SecretCipher>,
    listeners: Mutex<Vec<ConfigChangedFn>>,
}

impl MemoryConfigStore {
    pub fn new(cipher: Arc<SecretCipher>) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            cipher,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn cipher(&self) -> &SecretCipher {
        &self.cipher
    }

    fn notify(&self, id: &str) {
        if let Ok(listeners) = self.listeners.lock() {
            for listener in listeners.iter() {
                listener(id);
            }
        }
    }

    fn validate(config: &S3Config) -> Result<(), FsError> {
        if config.bucket.is_empty() {
            return Err(FsError::bad_request("bucket must not be empty"));
        }
        if !config.endpoint.is_empty()
            && !config.endpoint.starts_with("http://")
            && !config.endpoint.starts_with("https://")
        {
            return Err(FsError::bad_request(format!(
                "endpoint '{}' must be an http(s) URL",
                config.endpoint
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl S3ConfigStore for MemoryConfigStore {
    async fn list(&self) -> Result<Vec<S3Config>, FsError> {
        let map = self.inner.lock().map_err(|e| FsError::internal(e.to_string()))?;
        let mut configs: Vec<S3Config> = map.values().cloned().collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(configs)
    }

    async fn get(&self, id: &str) -> Result<Option<S3Config>, FsError> {
        let map = self.inner.lock().map_err(|e| FsError::internal(e.to_string()))?;
        Ok(map.get(id).cloned())
    }

    async fn insert(&self, config: S3Config) -> Result<(), FsError> {
        Self::validate(&config)?;
        let mut map = self.inner.lock().map_err(|e| FsError::internal(e.to_string()))?;
        if map.contains_key(&config.id) {
            return Err(FsError::conflict(format!("config '{}' already exists", config.id)));
        }
        map.insert(config.id.clone(), config);
        Ok(())
    }

    async fn update(&self, config: S3Config) -> Result<(), FsError> {
        Self::validate(&config)?;
        let id = config.id.clone();
        {
            let mut map = self.inner.lock().map_err(|e| FsError::internal(e.to_string()))?;
            if !map.contains_key(&id) {
                return Err(FsError::not_found(format!("config '{}'", id)));
            }
            map.insert(id.clone(), config);
        }
        self.notify(&id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), FsError> {
        {
            let mut map = self.inner.lock().map_err(|e| FsError::internal(e.to_string()))?;
            map.remove(id)
                .ok_or_else(|| FsError::not_found(format!("config '{}'", id)))?;
        }
        self.notify(id);
        Ok(())
    }

    fn decrypt_secret(&self, config: &S3Config) -> Result<String, FsError> {
        self.cipher.decrypt(&config.encrypted_secret_key)
    }

    fn on_config_changed(&self, listener: ConfigChangedFn) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(listener);
        }
    }
}

// ── File records ─────────────────────────────────────────────────────────────

#[async_trait]
pub trait FileRecordStore: Send + Sync {
    async fn insert(&self, record: FileRecord) -> Result<(), FsError>;
    /// Delete records matching a storage path under a config. Returns the
    /// number removed. Used best-effort after object deletion.
    async fn delete_by_storage_path(&self, config_id: &str, storage_path: &str)
        -> Result<u64, FsError>;
    async fn list_for_config(&self, config_id: &str) -> Result<Vec<FileRecord>, FsError>;
}

#[derive(Default)]
pub struct MemoryFileRecordStore {
    inner: Mutex<Vec<FileRecord>>,
}

impl MemoryFileRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileRecordStore for MemoryFileRecordStore {
    async fn insert(&self, record: FileRecord) -> Result<(), FsError> {
        let mut rows = self.inner.lock().map_err(|e| FsError::internal(e.to_string()))?;
        rows.push(record);
        Ok(())
    }

    async fn delete_by_storage_path(
        &self,
        config_id: &str,
        storage_path: &str,
    ) -> Result<u64, FsError> {
        let mut rows = self.inner.lock().map_err(|e| FsError::internal(e.to_string()))?;
        let before = rows.len();
        rows.retain(|r| !(r.s3_config_id == config_id && r.storage_path == storage_path));
        Ok((before - rows.len()) as u64)
    }

    async fn list_for_config(&self, config_id: &str) -> Result<Vec<FileRecord>, FsError> {
        let rows = self.inner.lock().map_err(|e| FsError::internal(e.to_string()))?;
        Ok(rows.iter().filter(|r| r.s3_config_id == config_id).cloned().collect())
    }
}
