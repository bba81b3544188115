//! Per-mount TTL cache of directory listings. Mutations invalidate the
//! listing's whole ancestor chain so a follow-up read by the same caller
//! never sees pre-mutation state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::cache::Clock;
use crate::models::DirListing;
use crate::path;

struct Entry {
    listing: DirListing,
    inserted_at: i64,
    ttl_ms: i64,
}

impl Entry {
    fn expired(&self, now: i64) -> bool {
        now - self.inserted_at >= self.ttl_ms
    }
}

/// Lookup key is `(mount_id, sub_path)` with the sub-path in directory form.
pub struct DirectoryCache {
    inner: Mutex<HashMap<(String, String), Entry>>,
    clock: Arc<dyn Clock>,
}

impl DirectoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn dir_key(sub_path: &str) -> String {
        if sub_path.ends_with('/') {
            sub_path.to_string()
        } else {
            format!("{}/", sub_path)
        }
    }

    /// Fetch a live entry. Expired entries count as absent and are dropped.
    pub fn get(&self, mount_id: &str, sub_path: &str) -> Option<DirListing> {
        let key = (mount_id.to_string(), Self::dir_key(sub_path));
        let now = self.clock.now_ms();
        let mut map = match self.inner.lock() {
            Ok(m) => m,
            Err(e) => {
                warn!("directory cache poisoned on get: {}", e);
                return None;
            }
        };
        match map.get(&key) {
            Some(entry) if entry.expired(now) => {
                map.remove(&key);
                None
            }
            Some(entry) => Some(entry.listing.clone()),
            None => None,
        }
    }

    /// Store a listing. A zero TTL disables caching for the mount.
    pub fn set(&self, mount_id: &str, sub_path: &str, listing: DirListing, ttl_secs: u64) {
        if ttl_secs == 0 {
            return;
        }
        let key = (mount_id.to_string(), Self::dir_key(sub_path));
        let entry = Entry {
            listing,
            inserted_at: self.clock.now_ms(),
            ttl_ms: (ttl_secs as i64) * 1000,
        };
        match self.inner.lock() {
            Ok(mut map) => {
                map.insert(key, entry);
            }
            Err(e) => warn!("directory cache poisoned on set: {}", e),
        }
    }

    pub fn invalidate(&self, mount_id: &str, sub_path: &str) -> bool {
        let key = (mount_id.to_string(), Self::dir_key(sub_path));
        match self.inner.lock() {
            Ok(mut map) => map.remove(&key).is_some(),
            Err(e) => {
                warn!("directory cache poisoned on invalidate: {}", e);
                false
            }
        }
    }

    /// Invalidate `sub_path`'s directory and every ancestor up to `/`.
    /// Returns the number of entries removed.
    pub fn invalidate_path_and_ancestors(&self, mount_id: &str, sub_path: &str) -> usize {
        let mut removed = 0;
        for ancestor in path::ancestor_chain(sub_path) {
            if self.invalidate(mount_id, &ancestor) {
                removed += 1;
            }
        }
        removed
    }

    /// Drop every cached listing at or below `sub_path` for one mount. Used
    /// when a whole directory subtree is deleted or renamed.
    pub fn invalidate_subtree(&self, mount_id: &str, sub_path: &str) -> usize {
        let prefix = Self::dir_key(sub_path);
        match self.inner.lock() {
            Ok(mut map) => {
                let before = map.len();
                map.retain(|(mid, sub), _| !(mid == mount_id && sub.starts_with(&prefix)));
                before - map.len()
            }
            Err(e) => {
                warn!("directory cache poisoned on subtree invalidate: {}", e);
                0
            }
        }
    }

    /// Drop every entry belonging to a mount (mount deleted or disabled).
    pub fn clear_mount(&self, mount_id: &str) -> usize {
        match self.inner.lock() {
            Ok(mut map) => {
                let before = map.len();
                map.retain(|(mid, _), _| mid != mount_id);
                before - map.len()
            }
            Err(e) => {
                warn!("directory cache poisoned on clear: {}", e);
                0
            }
        }
    }

    /// Remove every expired entry. Periodic maintenance; correctness does
    /// not depend on it because `get` evicts lazily.
    pub fn prune(&self) -> usize {
        let now = self.clock.now_ms();
        match self.inner.lock() {
            Ok(mut map) => {
                let before = map.len();
                map.retain(|_, entry| !entry.expired(now));
                before - map.len()
            }
            Err(e) => {
                warn!("directory cache poisoned on prune: {}", e);
                0
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
