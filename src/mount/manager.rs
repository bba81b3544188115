//! Driver pooling. One driver per storage configuration, built lazily with
//! a freshly decrypted secret and torn down when the configuration changes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::driver::{DriverDeps, DriverFactory, StorageDriver};
use crate::models::{FsError, Mount, Principal, StorageType};
use crate::mount::registry::{MountRegistry, Resolution};
use crate::store::S3ConfigStore;

type PoolKey = (StorageType, String);

pub struct MountManager {
    registry: Arc<MountRegistry>,
    configs: Arc<dyn S3ConfigStore>,
    factory: Arc<dyn DriverFactory>,
    deps: DriverDeps,
    pool: RwLock<HashMap<PoolKey, Arc<dyn StorageDriver>>>,
    // Serializes driver construction so concurrent misses build once.
    build_lock: tokio::sync::Mutex<()>,
}

impl MountManager {
    pub fn new(
        registry: Arc<MountRegistry>,
        configs: Arc<dyn S3ConfigStore>,
        factory: Arc<dyn DriverFactory>,
        deps: DriverDeps,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            registry,
            configs,
            factory,
            deps,
            pool: RwLock::new(HashMap::new()),
            build_lock: tokio::sync::Mutex::new(()),
        });

        // Config edits must not keep serving a stale client.
        let weak = Arc::downgrade(&manager);
        manager.configs.on_config_changed(Box::new(move |config_id| {
            if let Some(manager) = weak.upgrade() {
                manager.clear_config_cache(StorageType::S3, config_id);
            }
        }));

        manager
    }

    pub fn registry(&self) -> &Arc<MountRegistry> {
        &self.registry
    }

    fn pooled(&self, key: &PoolKey) -> Option<Arc<dyn StorageDriver>> {
        self.pool.read().ok().and_then(|p| p.get(key).cloned())
    }

    /// Driver for a mount, building and pooling one on first use.
    pub async fn get_driver(&self, mount: &Mount) -> Result<Arc<dyn StorageDriver>, FsError> {
        let key = (mount.storage_type, mount.storage_config_id.clone());
        if let Some(driver) = self.pooled(&key) {
            return Ok(driver);
        }

        let _guard = self.build_lock.lock().await;
        if let Some(driver) = self.pooled(&key) {
            return Ok(driver);
        }

        let config = self
            .configs
            .get(&mount.storage_config_id)
            .await?
            .ok_or_else(|| {
                FsError::not_found(format!(
                    "storage config '{}' for mount '{}'",
                    mount.storage_config_id, mount.id
                ))
            })?;
        let secret = self.configs.decrypt_secret(&config)?;
        let driver = self.factory.build(&config, &secret, self.deps.clone()).await?;

        debug!(config = %config.id, "pooled new storage driver");
        if let Ok(mut pool) = self.pool.write() {
            pool.insert(key, driver.clone());
        }
        Ok(driver)
    }

    /// Resolve a logical path and return the responsible driver, mount and
    /// sub-path. Virtual ancestors are not addressable here.
    pub async fn get_driver_by_path(
        &self,
        principal: &Principal,
        logical_path: &str,
    ) -> Result<(Arc<dyn StorageDriver>, Mount, String), FsError> {
        match self.registry.resolve(principal, logical_path).await? {
            Resolution::Mounted { mount, sub_path } => {
                let driver = self.get_driver(&mount).await?;
                Ok((driver, mount, sub_path))
            }
            Resolution::Virtual { path } => Err(FsError::not_found(format!(
                "'{}' is a virtual directory, not a storage path",
                path
            ))),
        }
    }

    /// Tear down the pooled driver for a config so the next call rebuilds
    /// it from the current configuration.
    pub fn clear_config_cache(&self, storage_type: StorageType, config_id: &str) -> bool {
        let key = (storage_type, config_id.to_string());
        match self.pool.write() {
            Ok(mut pool) => pool.remove(&key).is_some(),
            Err(e) => {
                warn!("driver pool poisoned on clear: {}", e);
                false
            }
        }
    }

    /// Fire-and-forget `last_used_at` update; never blocks the data path.
    pub fn touch_mount(self: &Arc<Self>, mount_id: &str) {
        let registry = self.registry.clone();
        let mount_id = mount_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = registry.update_last_used(&mount_id).await {
                warn!(mount = %mount_id, "last-used update failed: {}", e);
            }
        });
    }

    pub fn pool_len(&self) -> usize {
        self.pool.read().map(|p| p.len()).unwrap_or(0)
    }
}
