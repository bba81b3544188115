//! Shared test harness: an in-memory object store with S3 flat-key
//! semantics, a storage driver over it, and a `TestContext` that wires the
//! whole engine together. Each test gets its own context for isolation.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;

use cloudfs::cache::{Clock, DirectoryCache, SearchCache};
use cloudfs::driver::{DriverDeps, DriverFactory, FileDownload, StorageDriver};
use cloudfs::fs::FileSystem;
use cloudfs::models::{
    CapabilitySet, CompletedPartSpec, CopyStats, DirListing, FileEntry, FileInfo, FileRecord,
    FsError, Mount, MultipartInit, MultipartUploadInfo, PartInfo, PartUrl, PresignMethod,
    PresignOptions, PresignedUrl, Principal, S3Config, SearchHit, StorageType, UploadOptions,
    UploadResult,
};
use cloudfs::mount::{MountManager, MountRegistry};
use cloudfs::s3::helpers::{
    dir_key, is_executable_filename, key_to_sub_path, multipart_part_count, multipart_part_size,
    object_key, resolve_content_type, DIRECTORY_CONTENT_TYPE,
};
use cloudfs::store::secrets::SecretCipher;
use cloudfs::store::{
    FileRecordStore, MemoryConfigStore, MemoryFileRecordStore, MemoryMountStore, MountStore,
    S3ConfigStore,
};
use cloudfs::{path, CancelFlag};

// ── Manual clock ─────────────────────────────────────────────────────────────

pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new() -> Self {
        Self(AtomicI64::new(1_700_000_000_000))
    }

    pub fn advance_secs(&self, secs: i64) {
        self.0.fetch_add(secs * 1000, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

// ── Fake object store ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct FakeObject {
    pub data: Vec<u8>,
    pub content_type: String,
    pub modified: i64,
    pub etag: String,
}

struct PendingUpload {
    key: String,
    initiated: i64,
    parts: BTreeMap<i32, Vec<u8>>,
}

/// One flat bucket keyed by object key, with a provider-call counter so
/// tests can assert that an operation performed no I/O.
pub struct FakeObjectStore {
    objects: Mutex<BTreeMap<String, FakeObject>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    ops: AtomicU64,
    clock: Arc<ManualClock>,
}

impl FakeObjectStore {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            uploads: Mutex::new(HashMap::new()),
            ops: AtomicU64::new(0),
            clock,
        }
    }

    pub fn provider_calls(&self) -> u64 {
        self.ops.load(Ordering::Relaxed)
    }

    fn tick(&self) {
        self.ops.fetch_add(1, Ordering::Relaxed);
    }

    fn etag_of(data: &[u8]) -> String {
        format!("{:x}", md5::compute(data))
    }

    pub fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> FakeObject {
        self.tick();
        let object = FakeObject {
            etag: Self::etag_of(&data),
            content_type: content_type.to_string(),
            modified: self.clock.now_ms(),
            data,
        };
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), object.clone());
        object
    }

    pub fn get(&self, key: &str) -> Option<FakeObject> {
        self.tick();
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.tick();
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.tick();
        self.objects.lock().unwrap().remove(key).is_some()
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.tick();
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn prefix_occupied(&self, prefix: &str) -> bool {
        self.tick();
        self.objects
            .lock()
            .unwrap()
            .keys()
            .any(|k| k.starts_with(prefix))
    }

    pub fn create_upload(&self, key: &str) -> String {
        self.tick();
        let upload_id = uuid::Uuid::new_v4().simple().to_string();
        self.uploads.lock().unwrap().insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                initiated: self.clock.now_ms(),
                parts: BTreeMap::new(),
            },
        );
        upload_id
    }

    /// Simulates a client PUT to a presigned part URL; returns the etag.
    pub fn put_part(&self, upload_id: &str, part_number: i32, data: Vec<u8>) -> Option<String> {
        self.tick();
        let mut uploads = self.uploads.lock().unwrap();
        let pending = uploads.get_mut(upload_id)?;
        let etag = Self::etag_of(&data);
        pending.parts.insert(part_number, data);
        Some(etag)
    }

    fn complete_upload(
        &self,
        upload_id: &str,
        parts: &[CompletedPartSpec],
        content_type: &str,
    ) -> Result<FakeObject, FsError> {
        self.tick();
        let pending = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| FsError::not_found(format!("upload '{}'", upload_id)))?;

        let mut sorted: Vec<&CompletedPartSpec> = parts.iter().collect();
        sorted.sort_by_key(|p| p.part_number);

        let mut data = Vec::new();
        for spec in sorted {
            let chunk = pending.parts.get(&spec.part_number).ok_or_else(|| {
                FsError::bad_request(format!("part {} was never uploaded", spec.part_number))
            })?;
            if Self::etag_of(chunk) != spec.etag {
                return Err(FsError::bad_request(format!(
                    "etag mismatch on part {}",
                    spec.part_number
                )));
            }
            data.extend_from_slice(chunk);
        }
        Ok(self.put(&pending.key, data, content_type))
    }

    fn abort_upload(&self, upload_id: &str) -> Result<(), FsError> {
        self.tick();
        self.uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| FsError::not_found(format!("upload '{}'", upload_id)))
    }

    fn uploads_under(&self, prefix: &str) -> Vec<MultipartUploadInfo> {
        self.tick();
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, u)| u.key.starts_with(prefix))
            .map(|(id, u)| MultipartUploadInfo {
                key: u.key.clone(),
                upload_id: id.clone(),
                initiated: u.initiated,
            })
            .collect()
    }

    fn parts_of(&self, upload_id: &str) -> Result<Vec<PartInfo>, FsError> {
        self.tick();
        let uploads = self.uploads.lock().unwrap();
        let pending = uploads
            .get(upload_id)
            .ok_or_else(|| FsError::not_found(format!("upload '{}'", upload_id)))?;
        Ok(pending
            .parts
            .iter()
            .map(|(n, data)| PartInfo {
                part_number: *n,
                size: data.len() as u64,
                etag: Some(Self::etag_of(data)),
                modified: pending.initiated,
            })
            .collect())
    }
}

// ── Fake driver ──────────────────────────────────────────────────────────────

/// Storage driver over the fake store, mirroring the S3 driver's directory
/// semantics (placeholder objects, prefix listings, copy-then-delete).
pub struct FakeDriver {
    store: Arc<FakeObjectStore>,
    config: S3Config,
    caps: CapabilitySet,
    dir_cache: Arc<DirectoryCache>,
    records: Arc<dyn FileRecordStore>,
}

impl FakeDriver {
    fn logical(mount: &Mount, sub: &str) -> String {
        path::join(&mount.mount_path, sub)
    }

    fn directory_exists(&self, sub_path: &str) -> bool {
        if sub_path.trim_matches('/').is_empty() {
            return true;
        }
        let marker = dir_key(&self.config, sub_path);
        self.store.exists(&marker) || self.store.prefix_occupied(&marker)
    }

    fn ensure_parent(&self, sub_path: &str) -> Result<(), FsError> {
        let parent = path::parent_of(sub_path);
        if !self.directory_exists(&parent) {
            return Err(FsError::conflict(format!(
                "parent directory '{}' does not exist",
                parent
            )));
        }
        Ok(())
    }

    async fn record_upload(
        &self,
        key: &str,
        file_name: &str,
        mime: &str,
        object: &FakeObject,
        principal: &Principal,
    ) -> Result<(String, String), FsError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let slug = FileRecord::slug_for(&id);
        let now = object.modified;
        self.records
            .insert(FileRecord {
                id: id.clone(),
                filename: file_name.to_string(),
                storage_path: key.to_string(),
                s3_url: format!("https://fake.s3.local/{}/{}", self.config.bucket, key),
                mimetype: mime.to_string(),
                size: object.data.len() as u64,
                s3_config_id: self.config.id.clone(),
                slug: slug.clone(),
                etag: Some(object.etag.clone()),
                created_by: principal.identity(),
                created_at: now,
                updated_at: now,
            })
            .await?;
        Ok((id, slug))
    }

    fn fake_url(&self, key: &str, method: &str) -> String {
        format!(
            "https://fake.s3.local/{}/{}?X-Amz-Signature=test&verb={}",
            self.config.bucket, key, method
        )
    }
}

#[async_trait]
impl StorageDriver for FakeDriver {
    fn storage_type(&self) -> StorageType {
        StorageType::S3
    }

    fn capabilities(&self) -> CapabilitySet {
        self.caps
    }

    async fn list_directory(&self, mount: &Mount, sub_path: &str) -> Result<DirListing, FsError> {
        if mount.cache_ttl_secs > 0 {
            if let Some(cached) = self.dir_cache.get(&mount.id, sub_path) {
                return Ok(cached);
            }
        }

        let prefix = dir_key(&self.config, sub_path);
        let logical_dir = Self::logical(mount, sub_path);
        let keys = self.store.keys_with_prefix(&prefix);

        let mut dirs: BTreeMap<String, FileEntry> = BTreeMap::new();
        let mut files: Vec<FileEntry> = Vec::new();
        for key in keys {
            let rel = &key[prefix.len()..];
            if rel.is_empty() {
                continue; // the directory's own placeholder
            }
            if let Some(pos) = rel.find('/') {
                let name = &rel[..pos];
                if name.is_empty() || dirs.contains_key(name) {
                    continue;
                }
                dirs.insert(
                    name.to_string(),
                    FileEntry {
                        name: name.to_string(),
                        path: path::join(&logical_dir, &format!("{}/", name)),
                        is_dir: true,
                        size: None,
                        modified: 0,
                        etag: None,
                        mount_id: Some(mount.id.clone()),
                        is_mount: false,
                        is_virtual: false,
                    },
                );
            } else {
                let object = self.store.get(&key).unwrap();
                files.push(FileEntry {
                    name: rel.to_string(),
                    path: path::join(&logical_dir, rel),
                    is_dir: false,
                    size: Some(object.data.len() as u64),
                    modified: object.modified,
                    etag: Some(object.etag),
                    mount_id: Some(mount.id.clone()),
                    is_mount: false,
                    is_virtual: false,
                });
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let mut entries: Vec<FileEntry> = dirs.into_values().collect();
        entries.extend(files);

        let listing = DirListing {
            path: logical_dir,
            is_virtual: false,
            is_root: false,
            mount_id: Some(mount.id.clone()),
            storage_type: Some(StorageType::S3),
            entries,
        };
        if mount.cache_ttl_secs > 0 {
            self.dir_cache
                .set(&mount.id, sub_path, listing.clone(), mount.cache_ttl_secs);
        }
        Ok(listing)
    }

    async fn get_file_info(&self, mount: &Mount, sub_path: &str) -> Result<FileInfo, FsError> {
        let logical = Self::logical(mount, sub_path);
        if path::is_dir_ref(sub_path) {
            if self.directory_exists(sub_path) {
                return Ok(FileInfo {
                    name: path::basename(sub_path).to_string(),
                    path: logical,
                    is_dir: true,
                    size: 0,
                    modified: 0,
                    etag: None,
                    content_type: Some(DIRECTORY_CONTENT_TYPE.to_string()),
                });
            }
            return Err(FsError::not_found(logical));
        }

        let key = object_key(&self.config, sub_path);
        if let Some(object) = self.store.get(&key) {
            return Ok(FileInfo {
                name: path::basename(sub_path).to_string(),
                path: logical,
                is_dir: false,
                size: object.data.len() as u64,
                modified: object.modified,
                etag: Some(object.etag),
                content_type: Some(object.content_type),
            });
        }
        if self.store.prefix_occupied(&format!("{}/", key)) {
            return Ok(FileInfo {
                name: path::basename(sub_path).to_string(),
                path: format!("{}/", logical),
                is_dir: true,
                size: 0,
                modified: 0,
                etag: None,
                content_type: Some(DIRECTORY_CONTENT_TYPE.to_string()),
            });
        }
        Err(FsError::not_found(logical))
    }

    async fn download_file(
        &self,
        mount: &Mount,
        sub_path: &str,
        inline: bool,
    ) -> Result<FileDownload, FsError> {
        if path::is_dir_ref(sub_path) {
            return Err(FsError::bad_request("cannot download a directory"));
        }
        let key = object_key(&self.config, sub_path);
        let object = self
            .store
            .get(&key)
            .ok_or_else(|| FsError::not_found(Self::logical(mount, sub_path)))?;

        let file_name = path::basename(sub_path).to_string();
        let kind = if inline { "inline" } else { "attachment" };
        Ok(FileDownload {
            disposition: format!(
                "{}; filename*=UTF-8''{}",
                kind,
                urlencoding::encode(&file_name)
            ),
            content_type: object.content_type.clone(),
            content_length: object.data.len() as u64,
            last_modified: object.modified,
            etag: Some(object.etag.clone()),
            file_name,
            body: ByteStream::from(object.data),
        })
    }

    async fn upload_file(
        &self,
        mount: &Mount,
        sub_path: &str,
        data: Vec<u8>,
        opts: &UploadOptions,
        principal: &Principal,
    ) -> Result<UploadResult, FsError> {
        let file_name = path::basename(sub_path).to_string();
        if is_executable_filename(&file_name) {
            return Err(FsError::Forbidden(format!(
                "file type of '{}' is not allowed",
                file_name
            )));
        }
        self.ensure_parent(sub_path)?;

        let key = object_key(&self.config, sub_path);
        let mime = resolve_content_type(&file_name, opts.content_type.as_deref());
        let size = data.len() as u64;
        let object = self.store.put(&key, data, &mime);
        let (file_id, slug) = self
            .record_upload(&key, &file_name, &mime, &object, principal)
            .await?;

        self.dir_cache
            .invalidate_path_and_ancestors(&mount.id, &path::parent_of(sub_path));

        Ok(UploadResult {
            use_multipart: false,
            upload_id: None,
            path: Self::logical(mount, sub_path),
            size,
            etag: Some(object.etag),
            file_id,
            slug,
        })
    }

    async fn create_directory(&self, mount: &Mount, sub_path: &str) -> Result<(), FsError> {
        let key = dir_key(&self.config, sub_path);
        if self.store.exists(&key) {
            return Err(FsError::conflict(format!(
                "directory '{}' already exists",
                Self::logical(mount, sub_path)
            )));
        }
        self.ensure_parent(sub_path)?;
        self.store.put(&key, Vec::new(), DIRECTORY_CONTENT_TYPE);
        self.dir_cache
            .invalidate_path_and_ancestors(&mount.id, &path::parent_of(sub_path));
        Ok(())
    }

    async fn remove_item(&self, mount: &Mount, sub_path: &str) -> Result<(), FsError> {
        if path::is_dir_ref(sub_path) {
            let prefix = dir_key(&self.config, sub_path);
            let keys = self.store.keys_with_prefix(&prefix);
            if keys.is_empty() {
                return Err(FsError::not_found(Self::logical(mount, sub_path)));
            }
            for key in &keys {
                self.store.remove(key);
                let _ = self
                    .records
                    .delete_by_storage_path(&self.config.id, key)
                    .await;
            }
            self.dir_cache.invalidate_subtree(&mount.id, sub_path);
            self.dir_cache
                .invalidate_path_and_ancestors(&mount.id, sub_path);
        } else {
            let key = object_key(&self.config, sub_path);
            if !self.store.remove(&key) {
                return Err(FsError::not_found(Self::logical(mount, sub_path)));
            }
            let _ = self
                .records
                .delete_by_storage_path(&self.config.id, &key)
                .await;
            self.dir_cache
                .invalidate_path_and_ancestors(&mount.id, &path::parent_of(sub_path));
        }
        Ok(())
    }

    async fn rename_item(
        &self,
        mount: &Mount,
        old_sub: &str,
        new_sub: &str,
    ) -> Result<(), FsError> {
        if path::is_dir_ref(old_sub) != path::is_dir_ref(new_sub) {
            return Err(FsError::bad_request(
                "source and destination must both be files or both be directories",
            ));
        }
        self.ensure_parent(new_sub)?;

        if path::is_dir_ref(old_sub) {
            let old_prefix = dir_key(&self.config, old_sub);
            let new_prefix = dir_key(&self.config, new_sub);
            if self.store.prefix_occupied(&new_prefix) {
                return Err(FsError::conflict(format!(
                    "destination '{}' already exists",
                    Self::logical(mount, new_sub)
                )));
            }
            let keys = self.store.keys_with_prefix(&old_prefix);
            if keys.is_empty() {
                return Err(FsError::not_found(Self::logical(mount, old_sub)));
            }
            for key in keys {
                let rel = key[old_prefix.len()..].to_string();
                if let Some(object) = self.store.get(&key) {
                    self.store
                        .put(&format!("{}{}", new_prefix, rel), object.data, &object.content_type);
                }
                self.store.remove(&key);
            }
            self.dir_cache.invalidate_subtree(&mount.id, old_sub);
            self.dir_cache
                .invalidate_path_and_ancestors(&mount.id, old_sub);
            self.dir_cache
                .invalidate_path_and_ancestors(&mount.id, new_sub);
        } else {
            let old_key = object_key(&self.config, old_sub);
            let new_key = object_key(&self.config, new_sub);
            if self.store.exists(&new_key) {
                return Err(FsError::conflict(format!(
                    "destination '{}' already exists",
                    Self::logical(mount, new_sub)
                )));
            }
            let object = self
                .store
                .get(&old_key)
                .ok_or_else(|| FsError::not_found(Self::logical(mount, old_sub)))?;
            self.store.put(&new_key, object.data, &object.content_type);
            self.store.remove(&old_key);
            self.dir_cache
                .invalidate_path_and_ancestors(&mount.id, &path::parent_of(old_sub));
            self.dir_cache
                .invalidate_path_and_ancestors(&mount.id, &path::parent_of(new_sub));
        }
        Ok(())
    }

    async fn copy_item(
        &self,
        src_mount: &Mount,
        src_sub: &str,
        dest_mount: &Mount,
        dest_sub: &str,
        skip_existing: bool,
    ) -> Result<CopyStats, FsError> {
        let mut stats = CopyStats::default();

        if path::is_dir_ref(src_sub) {
            let src_prefix = dir_key(&self.config, src_sub);
            let dest_prefix = dir_key(&self.config, dest_sub);
            self.ensure_parent(dest_sub)?;

            let keys = self.store.keys_with_prefix(&src_prefix);
            if keys.is_empty() {
                return Err(FsError::not_found(Self::logical(src_mount, src_sub)));
            }
            for key in keys {
                let rel = key[src_prefix.len()..].to_string();
                let dest_key = format!("{}{}", dest_prefix, rel);
                let placeholder = key.ends_with('/') || rel.is_empty();
                let exists = self.store.exists(&dest_key);

                if placeholder {
                    if !exists {
                        if let Some(object) = self.store.get(&key) {
                            self.store.put(&dest_key, object.data, &object.content_type);
                        }
                    }
                    continue;
                }
                if exists && skip_existing {
                    stats.skipped += 1;
                    continue;
                }
                let object = self.store.get(&key).unwrap();
                self.store.put(&dest_key, object.data, &object.content_type);
                stats.copied += 1;
            }
            self.dir_cache
                .invalidate_path_and_ancestors(&dest_mount.id, dest_sub);
        } else {
            let src_key = object_key(&self.config, src_sub);
            let dest_key = object_key(&self.config, dest_sub);
            let object = self
                .store
                .get(&src_key)
                .ok_or_else(|| FsError::not_found(Self::logical(src_mount, src_sub)))?;
            self.ensure_parent(dest_sub)?;

            if self.store.exists(&dest_key) && skip_existing {
                stats.skipped += 1;
                return Ok(stats);
            }
            self.store.put(&dest_key, object.data, &object.content_type);
            stats.copied += 1;
            self.dir_cache
                .invalidate_path_and_ancestors(&dest_mount.id, &path::parent_of(dest_sub));
        }
        Ok(stats)
    }

    async fn presigned_url(
        &self,
        _mount: &Mount,
        sub_path: &str,
        opts: &PresignOptions,
    ) -> Result<PresignedUrl, FsError> {
        if path::is_dir_ref(sub_path) {
            return Err(FsError::bad_request(
                "presigned URLs are only available for files",
            ));
        }
        let key = object_key(&self.config, sub_path);
        let verb = match opts.method {
            PresignMethod::Get => "GET",
            PresignMethod::Put => "PUT",
        };
        Ok(PresignedUrl {
            url: self.fake_url(&key, verb),
            method: opts.method,
            expires_in_secs: opts.expires_in_secs,
            key,
        })
    }

    async fn init_multipart(
        &self,
        mount: &Mount,
        sub_path: &str,
        size: u64,
        content_type: Option<&str>,
    ) -> Result<MultipartInit, FsError> {
        let file_name = path::basename(sub_path).to_string();
        if is_executable_filename(&file_name) {
            return Err(FsError::Forbidden(format!(
                "file type of '{}' is not allowed",
                file_name
            )));
        }
        self.ensure_parent(sub_path)?;
        let _ = content_type;

        let key = object_key(&self.config, sub_path);
        let upload_id = self.store.create_upload(&key);
        let part_size = multipart_part_size(size);
        let part_count = multipart_part_count(size, part_size);
        let part_urls = (1..=part_count)
            .map(|n| PartUrl {
                part_number: n,
                url: self.fake_url(&key, &format!("PART-{}", n)),
            })
            .collect();

        Ok(MultipartInit {
            upload_id,
            key,
            path: Self::logical(mount, sub_path),
            part_size,
            part_count,
            part_urls,
        })
    }

    async fn complete_multipart(
        &self,
        mount: &Mount,
        sub_path: &str,
        upload_id: &str,
        parts: &[CompletedPartSpec],
        principal: &Principal,
    ) -> Result<UploadResult, FsError> {
        let file_name = path::basename(sub_path).to_string();
        let mime = resolve_content_type(&file_name, None);
        let key = object_key(&self.config, sub_path);
        let object = self.store.complete_upload(upload_id, parts, &mime)?;
        let (file_id, slug) = self
            .record_upload(&key, &file_name, &mime, &object, principal)
            .await?;

        self.dir_cache
            .invalidate_path_and_ancestors(&mount.id, &path::parent_of(sub_path));

        Ok(UploadResult {
            use_multipart: true,
            upload_id: Some(upload_id.to_string()),
            path: Self::logical(mount, sub_path),
            size: object.data.len() as u64,
            etag: Some(object.etag),
            file_id,
            slug,
        })
    }

    async fn abort_multipart(
        &self,
        _mount: &Mount,
        _sub_path: &str,
        upload_id: &str,
    ) -> Result<(), FsError> {
        self.store.abort_upload(upload_id)
    }

    async fn list_multipart_uploads(
        &self,
        _mount: &Mount,
        sub_path: Option<&str>,
    ) -> Result<Vec<MultipartUploadInfo>, FsError> {
        let prefix = dir_key(&self.config, sub_path.unwrap_or("/"));
        Ok(self.store.uploads_under(&prefix))
    }

    async fn list_multipart_parts(
        &self,
        _mount: &Mount,
        _sub_path: &str,
        upload_id: &str,
    ) -> Result<Vec<PartInfo>, FsError> {
        self.store.parts_of(upload_id)
    }

    async fn refresh_multipart_urls(
        &self,
        _mount: &Mount,
        sub_path: &str,
        _upload_id: &str,
        part_numbers: &[i32],
    ) -> Result<Vec<PartUrl>, FsError> {
        let key = object_key(&self.config, sub_path);
        Ok(part_numbers
            .iter()
            .map(|n| PartUrl {
                part_number: *n,
                url: self.fake_url(&key, &format!("PART-{}", n)),
            })
            .collect())
    }

    async fn search_walk(
        &self,
        mount: &Mount,
        sub_path: Option<&str>,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, FsError> {
        let prefix = dir_key(&self.config, sub_path.unwrap_or("/"));
        let query_lower = query.to_lowercase();
        let mut hits = Vec::new();

        for key in self.store.keys_with_prefix(&prefix) {
            if key == prefix {
                continue;
            }
            let name = path::basename(&key);
            if name.is_empty() || !name.to_lowercase().contains(&query_lower) {
                continue;
            }
            let sub = match key_to_sub_path(&self.config, &key) {
                Some(s) => s,
                None => continue,
            };
            let object = self.store.get(&key);
            hits.push(SearchHit {
                name: name.to_string(),
                path: path::join(&mount.mount_path, &sub),
                size: object.as_ref().map(|o| o.data.len() as u64).unwrap_or(0),
                is_dir: key.ends_with('/'),
                modified: object.map(|o| o.modified).unwrap_or(0),
                mount_id: mount.id.clone(),
            });
            if hits.len() >= max_results {
                break;
            }
        }
        Ok(hits)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

pub struct FakeDriverFactory {
    store: Arc<FakeObjectStore>,
    caps: CapabilitySet,
}

#[async_trait]
impl DriverFactory for FakeDriverFactory {
    async fn build(
        &self,
        config: &S3Config,
        _secret_key: &str,
        deps: DriverDeps,
    ) -> Result<Arc<dyn StorageDriver>, FsError> {
        Ok(Arc::new(FakeDriver {
            store: self.store.clone(),
            config: config.clone(),
            caps: self.caps,
            dir_cache: deps.dir_cache,
            records: deps.file_records,
        }))
    }
}

// ── Test context ─────────────────────────────────────────────────────────────

/// A fully wired engine over the fake store: one config (`cfg-1`, bucket
/// `b`, root prefix `root/`) and one mount `/docs` owned by `admin:1`.
#[allow(dead_code)]
pub struct TestContext {
    pub fs: Arc<FileSystem>,
    pub manager: Arc<MountManager>,
    pub registry: Arc<MountRegistry>,
    pub dir_cache: Arc<DirectoryCache>,
    pub search_cache: Arc<SearchCache>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<FakeObjectStore>,
    pub records: Arc<MemoryFileRecordStore>,
    pub mounts: Arc<MemoryMountStore>,
    pub configs: Arc<MemoryConfigStore>,
    pub cipher: Arc<SecretCipher>,
    pub admin: Principal,
}

#[allow(dead_code)]
impl TestContext {
    pub async fn new() -> Self {
        Self::with_caps(CapabilitySet::all()).await
    }

    pub async fn with_caps(caps: CapabilitySet) -> Self {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(FakeObjectStore::new(clock.clone()));
        let dir_cache = Arc::new(DirectoryCache::new(clock.clone()));
        let search_cache = Arc::new(SearchCache::new(clock.clone()));
        let records = Arc::new(MemoryFileRecordStore::new());
        let cipher = Arc::new(SecretCipher::from_key([42u8; 32]));
        let configs = Arc::new(MemoryConfigStore::new(cipher.clone()));
        let mounts = Arc::new(MemoryMountStore::new());
        let registry = Arc::new(MountRegistry::new(mounts.clone()));

        let deps = DriverDeps {
            dir_cache: dir_cache.clone(),
            file_records: records.clone(),
        };
        let factory = Arc::new(FakeDriverFactory {
            store: store.clone(),
            caps,
        });
        let manager = MountManager::new(
            registry.clone(),
            configs.clone(),
            factory,
            deps,
        );
        let fs = FileSystem::new(manager.clone(), search_cache.clone());

        let ctx = Self {
            fs,
            manager,
            registry,
            dir_cache,
            search_cache,
            clock,
            store,
            records,
            mounts,
            configs,
            cipher,
            admin: Principal::Admin { user_id: "1".into() },
        };
        ctx.add_config("cfg-1", "root").await;
        ctx.add_mount("m-docs", "/docs", "cfg-1", 60).await;
        ctx
    }

    pub async fn add_config(&self, id: &str, root_prefix: &str) {
        self.configs
            .insert(S3Config {
                id: id.into(),
                name: id.into(),
                endpoint: "https://fake.s3.local".into(),
                region: "us-east-1".into(),
                bucket: "b".into(),
                access_key_id: "AK".into(),
                encrypted_secret_key: self.cipher.encrypt("test-secret").unwrap(),
                path_style: true,
                root_prefix: root_prefix.into(),
                default_folder: String::new(),
                provider_type: "minio".into(),
                signature_version: "v4".into(),
            })
            .await
            .expect("failed to insert test config");
    }

    pub async fn add_mount(&self, id: &str, mount_path: &str, config_id: &str, ttl: u64) {
        self.mounts
            .insert(Mount {
                id: id.into(),
                owner: "admin:1".into(),
                name: id.into(),
                mount_path: mount_path.into(),
                storage_type: StorageType::S3,
                storage_config_id: config_id.into(),
                cache_ttl_secs: ttl,
                sort_order: 0,
                is_active: true,
                created_at: self.clock.now_ms(),
                updated_at: self.clock.now_ms(),
                last_used_at: None,
            })
            .await
            .expect("failed to insert test mount");
    }

    pub fn cancel(&self) -> CancelFlag {
        CancelFlag::new()
    }

    /// Convenience: upload through the facade and panic on failure.
    pub async fn put_file(&self, logical: &str, data: &[u8]) {
        self.fs
            .upload_file(&self.admin, logical, data.to_vec(), &UploadOptions::default())
            .await
            .expect("test upload failed");
    }
}
