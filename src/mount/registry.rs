//! Mount resolution. A logical path maps to the accessible mount with the
//! longest matching prefix; paths above every mount resolve to synthesized
//! "virtual" listings built from the mount table itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::{DirListing, FileEntry, FsError, Mount, Principal, now_ms};
use crate::path;
use crate::store::MountStore;

/// Top-level segments that can never be mount roots. The embedder may add
/// its own (`/api` and `/dav` are always reserved).
pub const RESERVED_SEGMENTS: &[&str] = &["api", "dav"];

/// Outcome of resolving a logical path.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The path lives inside a mount; `sub_path` keeps its leading slash
    /// and preserves the directory form of the input.
    Mounted { mount: Mount, sub_path: String },
    /// The path is a proper ancestor of at least one mount.
    Virtual { path: String },
}

pub struct MountRegistry {
    store: Arc<dyn MountStore>,
    reserved: Vec<String>,
}

impl MountRegistry {
    pub fn new(store: Arc<dyn MountStore>) -> Self {
        Self::with_reserved(store, &[])
    }

    pub fn with_reserved(store: Arc<dyn MountStore>, extra_reserved: &[String]) -> Self {
        let mut reserved: Vec<String> =
            RESERVED_SEGMENTS.iter().map(|s| s.to_string()).collect();
        reserved.extend(extra_reserved.iter().cloned());
        Self { store, reserved }
    }

    /// Active mounts the principal may address, resolution order (longest
    /// prefix first).
    pub async fn list_for_principal(&self, principal: &Principal) -> Result<Vec<Mount>, FsError> {
        let mut mounts: Vec<Mount> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|m| m.is_active && principal.can_use_mount(m))
            .collect();
        mounts.sort_by(|a, b| {
            b.mount_path
                .len()
                .cmp(&a.mount_path.len())
                .then(a.sort_order.cmp(&b.sort_order))
        });
        Ok(mounts)
    }

    /// Longest-prefix resolution of a logical path for a principal.
    pub async fn resolve(
        &self,
        principal: &Principal,
        logical_path: &str,
    ) -> Result<Resolution, FsError> {
        let logical = path::normalize(logical_path, false)?;
        let mounts = self.list_for_principal(principal).await?;

        for mount in &mounts {
            if let Some(sub) = Self::match_mount(&mount.mount_path, &logical) {
                return Ok(Resolution::Mounted {
                    mount: mount.clone(),
                    sub_path: sub,
                });
            }
        }

        // A directory above one or more mounts still lists, synthesized
        // from the mount table.
        let dir_form = if logical.ends_with('/') {
            logical.clone()
        } else {
            format!("{}/", logical)
        };
        let is_ancestor = dir_form == "/" && !mounts.is_empty()
            || mounts.iter().any(|m| m.mount_path.starts_with(&dir_form));
        if is_ancestor {
            return Ok(Resolution::Virtual { path: dir_form });
        }

        Err(FsError::not_found(format!(
            "path '{}' is not inside any mount",
            logical
        )))
    }

    /// Sub-path of `logical` under a mount path, or None when it does not
    /// match. The mount path itself resolves to `/`.
    fn match_mount(mount_path: &str, logical: &str) -> Option<String> {
        if mount_path == "/" {
            return Some(logical.to_string());
        }
        let rest = logical.strip_prefix(mount_path)?;
        match rest {
            "" => Some("/".to_string()),
            "/" => Some("/".to_string()),
            r if r.starts_with('/') => Some(r.to_string()),
            _ => None, // /docs must not match /docs-archive
        }
    }

    /// Synthesize the listing for a virtual ancestor directory.
    pub async fn virtual_listing(
        &self,
        principal: &Principal,
        logical_dir: &str,
    ) -> Result<DirListing, FsError> {
        let dir = path::normalize(logical_dir, true)?;
        let mounts = self.list_for_principal(principal).await?;

        // name → entry; mount-point entries win over intermediate ones.
        let mut entries: BTreeMap<String, FileEntry> = BTreeMap::new();
        for mount in &mounts {
            let rest = match mount.mount_path.strip_prefix(dir.as_str()) {
                Some(r) if !r.is_empty() => r,
                _ => continue,
            };
            let segment = rest.split('/').next().unwrap_or(rest);
            if segment.is_empty() {
                continue;
            }
            let is_mount = segment == rest;
            let replace = is_mount
                || !entries
                    .get(segment)
                    .map(|e| e.is_mount)
                    .unwrap_or(false);
            if !replace && entries.contains_key(segment) {
                continue;
            }
            entries.insert(
                segment.to_string(),
                FileEntry {
                    name: segment.to_string(),
                    path: path::join(&dir, &format!("{}/", segment)),
                    is_dir: true,
                    size: None,
                    modified: if is_mount { mount.updated_at } else { 0 },
                    etag: None,
                    mount_id: if is_mount { Some(mount.id.clone()) } else { None },
                    is_mount,
                    is_virtual: !is_mount,
                },
            );
        }

        if entries.is_empty() && dir != "/" {
            return Err(FsError::not_found(format!(
                "path '{}' is not inside any mount",
                dir
            )));
        }

        Ok(DirListing {
            is_root: dir == "/",
            path: dir,
            is_virtual: true,
            mount_id: None,
            storage_type: None,
            entries: entries.into_values().collect(),
        })
    }

    /// Record a successful driver call against a mount. Callers spawn this
    /// and swallow failures; it must never gate the data path.
    pub async fn update_last_used(&self, mount_id: &str) -> Result<(), FsError> {
        self.store.touch_last_used(mount_id, now_ms()).await
    }

    /// Validate a prospective mount path: absolute, normalized, no reserved
    /// first segment. Returns the canonical form without a trailing slash.
    pub fn validate_mount_path(&self, mount_path: &str) -> Result<String, FsError> {
        let normalized = path::normalize(mount_path, false)?;
        let trimmed = normalized.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(FsError::bad_request("mount path must not be the root"));
        }
        let first = trimmed.trim_start_matches('/').split('/').next().unwrap_or("");
        if self.reserved.iter().any(|r| r == first) {
            return Err(FsError::bad_request(format!(
                "mount path segment '/{}' is reserved",
                first
            )));
        }
        Ok(trimmed.to_string())
    }
}
