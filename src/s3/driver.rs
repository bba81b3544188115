//! The S3 storage driver. Layers directory semantics on a flat keyspace:
//! directories are zero-byte placeholder objects with a trailing-slash key,
//! listings come from delimiter queries, rename is copy-then-delete, and
//! every mutation invalidates the affected ancestor chain in the directory
//! cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, warn};

use crate::driver::{DriverDeps, DriverFactory, FileDownload, StorageDriver};
use crate::models::{
    CapabilitySet, CompletedPartSpec, CopyStats, DirListing, FileEntry, FileInfo, FileRecord,
    FsError, Mount, MultipartInit, MultipartUploadInfo, PartInfo, PartUrl, PresignMethod,
    PresignOptions, PresignedUrl, Principal, S3Config, SearchHit, StorageType, UploadOptions,
    UploadResult, now_ms,
};
use crate::path;
use crate::store::FileRecordStore;

use super::client::build_s3_client;
use super::helpers::*;

pub struct S3Driver {
    client: S3Client,
    config: S3Config,
    dir_cache: Arc<crate::cache::DirectoryCache>,
    file_records: Arc<dyn FileRecordStore>,
}

impl S3Driver {
    pub fn new(client: S3Client, config: S3Config, deps: DriverDeps) -> Self {
        Self {
            client,
            config,
            dir_cache: deps.dir_cache,
            file_records: deps.file_records,
        }
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    /// Full logical path for a sub-path under a mount.
    fn logical(mount: &Mount, sub_path: &str) -> String {
        path::join(&mount.mount_path, sub_path)
    }

    async fn head_key(&self, key: &str) -> Result<FileInfo, FsError> {
        let head = self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_err("head object", e))?;

        Ok(FileInfo {
            name: path::basename(key).to_string(),
            path: String::new(),
            is_dir: key.ends_with('/'),
            size: head.content_length().unwrap_or(0) as u64,
            modified: head
                .last_modified()
                .and_then(|t| t.to_millis().ok())
                .unwrap_or(0),
            etag: head.e_tag().map(|s| strip_etag_quotes(s)),
            content_type: head.content_type().map(|s| s.to_string()),
        })
    }

    async fn object_exists(&self, key: &str) -> Result<bool, FsError> {
        match self.head_key(key).await {
            Ok(_) => Ok(true),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// A directory exists when its placeholder is present or any key lives
    /// under its prefix. The mount root always exists.
    async fn directory_exists(&self, sub_path: &str) -> Result<bool, FsError> {
        let rel = sub_path.trim_matches('/');
        if rel.is_empty() {
            return Ok(true);
        }
        let marker = dir_key(&self.config, sub_path);
        if self.object_exists(&marker).await? {
            return Ok(true);
        }
        prefix_is_occupied(&self.client, &self.config.bucket, &marker).await
    }

    async fn ensure_parent_exists(&self, sub_path: &str) -> Result<(), FsError> {
        let parent = path::parent_of(sub_path);
        if !self.directory_exists(&parent).await? {
            return Err(FsError::conflict(format!(
                "parent directory '{}' does not exist",
                parent
            )));
        }
        Ok(())
    }

    async fn copy_key(&self, src_key: &str, dest_key: &str) -> Result<(), FsError> {
        self.client
            .copy_object()
            .bucket(&self.config.bucket)
            .key(dest_key)
            .copy_source(encode_copy_source(&self.config.bucket, src_key))
            .send()
            .await
            .map_err(|e| s3_err("copy object", e))?;
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<(), FsError> {
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_err("delete object", e))?;
        Ok(())
    }

    /// Batch delete, chunked to the provider limit.
    async fn delete_keys(&self, keys: &[String]) -> Result<(), FsError> {
        for chunk in keys.chunks(DELETE_BATCH) {
            let objects: Vec<_> = chunk
                .iter()
                .map(|k| {
                    aws_sdk_s3::types::ObjectIdentifier::builder()
                        .key(k)
                        .build()
                        .map_err(|e| FsError::internal(e.to_string()))
                })
                .collect::<Result<_, _>>()?;

            let delete = aws_sdk_s3::types::Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| FsError::internal(e.to_string()))?;

            self.client
                .delete_objects()
                .bucket(&self.config.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| s3_err("delete objects", e))?;
        }
        Ok(())
    }

    async fn presign_get(
        &self,
        key: &str,
        expires_in_secs: u64,
        disposition: Option<String>,
    ) -> Result<String, FsError> {
        let presign_config = PresigningConfig::expires_in(Duration::from_secs(expires_in_secs))
            .map_err(|e| FsError::bad_request(format!("invalid expiry: {}", e)))?;

        let mut req = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key);
        if let Some(value) = disposition {
            req = req.response_content_disposition(value);
        }

        let presigned = req
            .presigned(presign_config)
            .await
            .map_err(|e| s3_err("presign get", e))?;
        Ok(presigned.uri().to_string())
    }

    async fn presign_put(&self, key: &str, expires_in_secs: u64) -> Result<String, FsError> {
        let presign_config = PresigningConfig::expires_in(Duration::from_secs(expires_in_secs))
            .map_err(|e| FsError::bad_request(format!("invalid expiry: {}", e)))?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| s3_err("presign put", e))?;
        Ok(presigned.uri().to_string())
    }

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        expires_in_secs: u64,
    ) -> Result<String, FsError> {
        let presign_config = PresigningConfig::expires_in(Duration::from_secs(expires_in_secs))
            .map_err(|e| FsError::bad_request(format!("invalid expiry: {}", e)))?;

        let presigned = self
            .client
            .upload_part()
            .bucket(&self.config.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .presigned(presign_config)
            .await
            .map_err(|e| s3_err("presign part", e))?;
        Ok(presigned.uri().to_string())
    }

    /// Persist a file record after a successful upload; returns `(id, slug)`.
    async fn record_upload(
        &self,
        key: &str,
        file_name: &str,
        mime: &str,
        size: u64,
        etag: Option<&str>,
        principal: &Principal,
    ) -> Result<(String, String), FsError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let slug = FileRecord::slug_for(&id);
        let now = now_ms();
        let record = FileRecord {
            id: id.clone(),
            filename: file_name.to_string(),
            storage_path: key.to_string(),
            s3_url: object_url(&self.config, key),
            mimetype: mime.to_string(),
            size,
            s3_config_id: self.config.id.clone(),
            slug: slug.clone(),
            etag: etag.map(str::to_string),
            created_by: principal.identity(),
            created_at: now,
            updated_at: now,
        };
        self.file_records.insert(record).await?;
        Ok((id, slug))
    }

    /// Best-effort removal of file records for deleted keys.
    async fn forget_records(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self
                .file_records
                .delete_by_storage_path(&self.config.id, key)
                .await
            {
                warn!(key = %key, "file record cleanup failed: {}", e);
            }
        }
    }

    async fn fetch_listing(&self, mount: &Mount, sub_path: &str) -> Result<DirListing, FsError> {
        let prefix = dir_key(&self.config, sub_path);
        let logical_dir = Self::logical(mount, sub_path);

        let mut dirs: Vec<FileEntry> = Vec::new();
        let mut files: Vec<FileEntry> = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .delimiter("/")
                .prefix(&prefix);
            if let Some(token) = &continuation_token {
                req = req.continuation_token(token);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| s3_err("list directory", e))?;

            for cp in resp.common_prefixes() {
                let pfx = match cp.prefix() {
                    Some(p) => p,
                    None => continue,
                };
                let name = pfx
                    .strip_prefix(prefix.as_str())
                    .unwrap_or(pfx)
                    .trim_end_matches('/')
                    .to_string();
                if name.is_empty() {
                    continue;
                }
                dirs.push(FileEntry {
                    path: path::join(&logical_dir, &format!("{}/", name)),
                    name,
                    is_dir: true,
                    size: None,
                    modified: 0,
                    etag: None,
                    mount_id: Some(mount.id.clone()),
                    is_mount: false,
                    is_virtual: false,
                });
            }

            for obj in resp.contents() {
                let key = match obj.key() {
                    Some(k) => k,
                    None => continue,
                };
                // Directory placeholders list as their own prefix.
                if key == prefix || key.ends_with('/') {
                    continue;
                }
                let name = key.strip_prefix(prefix.as_str()).unwrap_or(key).to_string();
                if name.is_empty() {
                    continue;
                }
                files.push(FileEntry {
                    path: path::join(&logical_dir, &name),
                    name,
                    is_dir: false,
                    size: Some(obj.size().unwrap_or(0) as u64),
                    modified: obj
                        .last_modified()
                        .and_then(|t| t.to_millis().ok())
                        .unwrap_or(0),
                    etag: obj.e_tag().map(|s| strip_etag_quotes(s)),
                    mount_id: Some(mount.id.clone()),
                    is_mount: false,
                    is_virtual: false,
                });
            }

            if resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        dirs.sort_by(|a, b| a.name.cmp(&b.name));
        files.sort_by(|a, b| a.name.cmp(&b.name));
        let mut entries = dirs;
        entries.extend(files);

        Ok(DirListing {
            path: logical_dir,
            is_virtual: false,
            is_root: false,
            mount_id: Some(mount.id.clone()),
            storage_type: Some(StorageType::S3),
            entries,
        })
    }
}

#[async_trait]
impl StorageDriver for S3Driver {
    fn storage_type(&self) -> StorageType {
        StorageType::S3
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::all()
    }

    async fn test_connection(&self) -> Result<bool, FsError> {
        let probe = self
            .client
            .list_objects_v2()
            .bucket(&self.config.bucket)
            .max_keys(1)
            .send()
            .await;
        Ok(probe.is_ok())
    }

    async fn list_directory(&self, mount: &Mount, sub_path: &str) -> Result<DirListing, FsError> {
        let ttl = mount.cache_ttl_secs;
        if ttl > 0 {
            if let Some(cached) = self.dir_cache.get(&mount.id, sub_path) {
                debug!(mount = %mount.id, sub = %sub_path, "directory cache hit");
                return Ok(cached);
            }
        }

        let listing = self.fetch_listing(mount, sub_path).await?;
        if ttl > 0 {
            self.dir_cache.set(&mount.id, sub_path, listing.clone(), ttl);
        }
        Ok(listing)
    }

    async fn get_file_info(&self, mount: &Mount, sub_path: &str) -> Result<FileInfo, FsError> {
        let logical = Self::logical(mount, sub_path);

        // Directory references probe the placeholder and fall back to the
        // prefix; file references probe the object key first.
        if path::is_dir_ref(sub_path) {
            if self.directory_exists(sub_path).await? {
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
        let head = self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await;

        match head {
            Ok(out) => Ok(FileInfo {
                name: path::basename(sub_path).to_string(),
                path: logical,
                is_dir: false,
                size: out.content_length().unwrap_or(0) as u64,
                modified: out
                    .last_modified()
                    .and_then(|t| t.to_millis().ok())
                    .unwrap_or(0),
                etag: out.e_tag().map(|s| strip_etag_quotes(s)),
                content_type: out.content_type().map(|s| s.to_string()),
            }),
            Err(err) => {
                let status = sdk_status(&err);
                let code = aws_sdk_s3::error::ProvideErrorMetadata::code(&err).unwrap_or("");

                // Some providers answer HEAD with 403 or an opaque error
                // even when GET works; retry with a full GET and release
                // the body unread.
                if status == Some(403) || code == "UnknownError" {
                    let got = self
                        .client
                        .get_object()
                        .bucket(&self.config.bucket)
                        .key(&key)
                        .send()
                        .await
                        .map_err(|e| s3_err("get object (HEAD fallback)", e))?;
                    let info = FileInfo {
                        name: path::basename(sub_path).to_string(),
                        path: logical,
                        is_dir: false,
                        size: got.content_length().unwrap_or(0) as u64,
                        modified: got
                            .last_modified()
                            .and_then(|t| t.to_millis().ok())
                            .unwrap_or(0),
                        etag: got.e_tag().map(|s| strip_etag_quotes(s)),
                        content_type: got.content_type().map(|s| s.to_string()),
                    };
                    drop(got.body);
                    return Ok(info);
                }

                if status == Some(404) {
                    // The path may name a directory that has content but no
                    // placeholder object.
                    let probe = format!("{}/", key);
                    if prefix_is_occupied(&self.client, &self.config.bucket, &probe).await? {
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
                    return Err(FsError::not_found(logical));
                }

                Err(s3_err("head object", err))
            }
        }
    }

    async fn download_file(
        &self,
        _mount: &Mount,
        sub_path: &str,
        inline: bool,
    ) -> Result<FileDownload, FsError> {
        if path::is_dir_ref(sub_path) {
            return Err(FsError::bad_request("cannot download a directory"));
        }
        let key = object_key(&self.config, sub_path);
        let resp = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| s3_err("get object", e))?;

        let file_name = path::basename(sub_path).to_string();
        let content_type = resp
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| resolve_content_type(&file_name, None));

        Ok(FileDownload {
            disposition: content_disposition(inline, &file_name),
            content_type,
            content_length: resp.content_length().unwrap_or(0) as u64,
            last_modified: resp
                .last_modified()
                .and_then(|t| t.to_millis().ok())
                .unwrap_or(0),
            etag: resp.e_tag().map(|s| strip_etag_quotes(s)),
            file_name,
            body: resp.body,
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
        if path::is_dir_ref(sub_path) {
            return Err(FsError::bad_request("upload target must be a file path"));
        }
        let file_name = path::basename(sub_path).to_string();
        if is_executable_filename(&file_name) {
            return Err(FsError::Forbidden(format!(
                "file type of '{}' is not allowed",
                file_name
            )));
        }

        self.ensure_parent_exists(sub_path).await?;

        let key = object_key(&self.config, sub_path);
        let mime = resolve_content_type(&file_name, opts.content_type.as_deref());
        let size = data.len() as u64;

        let put = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .content_type(&mime)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| s3_err("put object", e))?;

        let etag = put.e_tag().map(|s| strip_etag_quotes(s));
        let (file_id, slug) = self
            .record_upload(&key, &file_name, &mime, size, etag.as_deref(), principal)
            .await?;

        let parent = path::parent_of(sub_path);
        self.dir_cache.invalidate_path_and_ancestors(&mount.id, &parent);

        Ok(UploadResult {
            use_multipart: false,
            upload_id: None,
            path: Self::logical(mount, sub_path),
            size,
            etag,
            file_id,
            slug,
        })
    }

    async fn create_directory(&self, mount: &Mount, sub_path: &str) -> Result<(), FsError> {
        if !path::is_dir_ref(sub_path) {
            return Err(FsError::bad_request("directory path must end with '/'"));
        }
        let key = dir_key(&self.config, sub_path);

        if self.object_exists(&key).await? {
            return Err(FsError::conflict(format!(
                "directory '{}' already exists",
                Self::logical(mount, sub_path)
            )));
        }
        self.ensure_parent_exists(sub_path).await?;

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .content_type(DIRECTORY_CONTENT_TYPE)
            .body(ByteStream::from_static(b""))
            .send()
            .await
            .map_err(|e| s3_err("create directory", e))?;

        let parent = path::parent_of(sub_path);
        self.dir_cache.invalidate_path_and_ancestors(&mount.id, &parent);
        Ok(())
    }

    async fn remove_item(&self, mount: &Mount, sub_path: &str) -> Result<(), FsError> {
        if path::is_dir_ref(sub_path) {
            let prefix = dir_key(&self.config, sub_path);
            let objects = list_all_objects(&self.client, &self.config.bucket, &prefix).await?;
            if objects.is_empty() {
                return Err(FsError::not_found(Self::logical(mount, sub_path)));
            }
            let keys: Vec<String> = objects.into_iter().map(|o| o.key).collect();
            self.delete_keys(&keys).await?;
            self.forget_records(&keys).await;

            self.dir_cache.invalidate_subtree(&mount.id, sub_path);
            self.dir_cache.invalidate_path_and_ancestors(&mount.id, sub_path);
        } else {
            let key = object_key(&self.config, sub_path);
            if !self.object_exists(&key).await? {
                return Err(FsError::not_found(Self::logical(mount, sub_path)));
            }
            self.delete_key(&key).await?;
            self.forget_records(std::slice::from_ref(&key)).await;

            let parent = path::parent_of(sub_path);
            self.dir_cache.invalidate_path_and_ancestors(&mount.id, &parent);
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
        self.ensure_parent_exists(new_sub).await?;

        if path::is_dir_ref(old_sub) {
            let old_prefix = dir_key(&self.config, old_sub);
            let new_prefix = dir_key(&self.config, new_sub);
            if old_prefix == new_prefix {
                return Err(FsError::bad_request("rename source equals destination"));
            }
            if prefix_is_occupied(&self.client, &self.config.bucket, &new_prefix).await? {
                return Err(FsError::conflict(format!(
                    "destination '{}' already exists",
                    Self::logical(mount, new_sub)
                )));
            }

            let objects =
                list_all_objects(&self.client, &self.config.bucket, &old_prefix).await?;
            if objects.is_empty() {
                return Err(FsError::not_found(Self::logical(mount, old_sub)));
            }

            for obj in &objects {
                let rel = obj.key.strip_prefix(old_prefix.as_str()).unwrap_or(&obj.key);
                let dest_key = format!("{}{}", new_prefix, rel);
                self.copy_key(&obj.key, &dest_key).await?;
            }
            let old_keys: Vec<String> = objects.into_iter().map(|o| o.key).collect();
            self.delete_keys(&old_keys).await?;
            self.forget_records(&old_keys).await;

            self.dir_cache.invalidate_subtree(&mount.id, old_sub);
            self.dir_cache.invalidate_path_and_ancestors(&mount.id, old_sub);
            self.dir_cache.invalidate_path_and_ancestors(&mount.id, new_sub);
        } else {
            let old_key = object_key(&self.config, old_sub);
            let new_key = object_key(&self.config, new_sub);
            if old_key == new_key {
                return Err(FsError::bad_request("rename source equals destination"));
            }
            if self.object_exists(&new_key).await? {
                return Err(FsError::conflict(format!(
                    "destination '{}' already exists",
                    Self::logical(mount, new_sub)
                )));
            }
            if !self.object_exists(&old_key).await? {
                return Err(FsError::not_found(Self::logical(mount, old_sub)));
            }

            self.copy_key(&old_key, &new_key).await?;
            self.delete_key(&old_key).await?;
            self.forget_records(std::slice::from_ref(&old_key)).await;

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
        if src_mount.storage_config_id != dest_mount.storage_config_id {
            return Err(FsError::internal(
                "copy_item called across storage configs",
            ));
        }

        let mut stats = CopyStats::default();

        if path::is_dir_ref(src_sub) {
            let src_prefix = dir_key(&self.config, src_sub);
            let dest_prefix = dir_key(&self.config, dest_sub);
            if src_prefix == dest_prefix {
                return Err(FsError::bad_request("copy source equals destination"));
            }
            self.ensure_parent_exists(dest_sub).await?;

            let objects =
                list_all_objects(&self.client, &self.config.bucket, &src_prefix).await?;
            if objects.is_empty() {
                return Err(FsError::not_found(Self::logical(src_mount, src_sub)));
            }

            for obj in &objects {
                let rel = obj.key.strip_prefix(src_prefix.as_str()).unwrap_or(&obj.key);
                let dest_key = format!("{}{}", dest_prefix, rel);
                let placeholder = obj.key.ends_with('/');
                let exists = self.object_exists(&dest_key).await?;

                if placeholder {
                    // Directory markers copy silently and are never counted.
                    if !exists {
                        self.copy_key(&obj.key, &dest_key).await?;
                    }
                    continue;
                }
                if exists && skip_existing {
                    stats.skipped += 1;
                    continue;
                }
                self.copy_key(&obj.key, &dest_key).await?;
                stats.copied += 1;
            }

            self.dir_cache
                .invalidate_path_and_ancestors(&dest_mount.id, dest_sub);
        } else {
            let src_key = object_key(&self.config, src_sub);
            let dest_key = object_key(&self.config, dest_sub);
            if src_key == dest_key {
                return Err(FsError::bad_request("copy source equals destination"));
            }
            if !self.object_exists(&src_key).await? {
                return Err(FsError::not_found(Self::logical(src_mount, src_sub)));
            }
            self.ensure_parent_exists(dest_sub).await?;

            if self.object_exists(&dest_key).await? && skip_existing {
                stats.skipped += 1;
                return Ok(stats);
            }
            self.copy_key(&src_key, &dest_key).await?;
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
        let expires = if opts.expires_in_secs == 0 {
            crate::models::DEFAULT_PRESIGN_EXPIRES_SECS
        } else {
            opts.expires_in_secs
        };

        let url = match opts.method {
            PresignMethod::Get => {
                let disposition = if opts.force_download {
                    Some(content_disposition(false, path::basename(sub_path)))
                } else {
                    None
                };
                self.presign_get(&key, expires, disposition).await?
            }
            PresignMethod::Put => self.presign_put(&key, expires).await?,
        };

        Ok(PresignedUrl {
            url,
            method: opts.method,
            expires_in_secs: expires,
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
        if path::is_dir_ref(sub_path) {
            return Err(FsError::bad_request("upload target must be a file path"));
        }
        let file_name = path::basename(sub_path).to_string();
        if is_executable_filename(&file_name) {
            return Err(FsError::Forbidden(format!(
                "file type of '{}' is not allowed",
                file_name
            )));
        }
        self.ensure_parent_exists(sub_path).await?;

        let key = object_key(&self.config, sub_path);
        let mime = resolve_content_type(&file_name, content_type);

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(&key)
            .content_type(&mime)
            .send()
            .await
            .map_err(|e| s3_err("create multipart upload", e))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| FsError::internal("provider returned no upload id"))?
            .to_string();

        let part_size = multipart_part_size(size);
        let part_count = multipart_part_count(size, part_size);

        let mut part_urls = Vec::with_capacity(part_count as usize);
        for part_number in 1..=part_count {
            let url = self
                .presign_part(
                    &key,
                    &upload_id,
                    part_number,
                    crate::models::DEFAULT_PRESIGN_EXPIRES_SECS,
                )
                .await?;
            part_urls.push(PartUrl { part_number, url });
        }

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
        if parts.is_empty() {
            return Err(FsError::bad_request("multipart completion needs parts"));
        }
        let key = object_key(&self.config, sub_path);

        let mut sorted: Vec<&CompletedPartSpec> = parts.iter().collect();
        sorted.sort_by_key(|p| p.part_number);
        let completed: Vec<_> = sorted
            .iter()
            .map(|p| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();

        let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build();

        let done = self
            .client
            .complete_multipart_upload()
            .bucket(&self.config.bucket)
            .key(&key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| s3_err("complete multipart upload", e))?;

        let etag = done.e_tag().map(|s| strip_etag_quotes(s));

        // Final size is only known provider-side.
        let size = match self.head_key(&key).await {
            Ok(info) => info.size,
            Err(e) => {
                warn!(key = %key, "size probe after multipart completion failed: {}", e);
                0
            }
        };

        let file_name = path::basename(sub_path).to_string();
        let mime = resolve_content_type(&file_name, None);
        let (file_id, slug) = self
            .record_upload(&key, &file_name, &mime, size, etag.as_deref(), principal)
            .await?;

        let parent = path::parent_of(sub_path);
        self.dir_cache.invalidate_path_and_ancestors(&mount.id, &parent);

        Ok(UploadResult {
            use_multipart: true,
            upload_id: Some(upload_id.to_string()),
            path: Self::logical(mount, sub_path),
            size,
            etag,
            file_id,
            slug,
        })
    }

    async fn abort_multipart(
        &self,
        _mount: &Mount,
        sub_path: &str,
        upload_id: &str,
    ) -> Result<(), FsError> {
        let key = object_key(&self.config, sub_path);
        self.client
            .abort_multipart_upload()
            .bucket(&self.config.bucket)
            .key(&key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| s3_err("abort multipart upload", e))?;
        Ok(())
    }

    async fn list_multipart_uploads(
        &self,
        _mount: &Mount,
        sub_path: Option<&str>,
    ) -> Result<Vec<MultipartUploadInfo>, FsError> {
        let prefix = sub_path.map(|s| dir_key(&self.config, s));
        let mut uploads = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut upload_id_marker: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_multipart_uploads()
                .bucket(&self.config.bucket);
            if let Some(p) = &prefix {
                req = req.prefix(p);
            }
            if let Some(km) = &key_marker {
                req = req.key_marker(km);
            }
            if let Some(um) = &upload_id_marker {
                req = req.upload_id_marker(um);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| s3_err("list multipart uploads", e))?;

            for upload in resp.uploads() {
                let key = match upload.key() {
                    Some(k) => k.to_string(),
                    None => continue,
                };
                let upload_id = match upload.upload_id() {
                    Some(id) => id.to_string(),
                    None => continue,
                };
                uploads.push(MultipartUploadInfo {
                    key,
                    upload_id,
                    initiated: upload
                        .initiated()
                        .and_then(|t| t.to_millis().ok())
                        .unwrap_or(0),
                });
            }

            if resp.is_truncated() == Some(true) {
                key_marker = resp.next_key_marker().map(|s| s.to_string());
                upload_id_marker = resp.next_upload_id_marker().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(uploads)
    }

    async fn list_multipart_parts(
        &self,
        _mount: &Mount,
        sub_path: &str,
        upload_id: &str,
    ) -> Result<Vec<PartInfo>, FsError> {
        let key = object_key(&self.config, sub_path);
        let mut parts = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_parts()
                .bucket(&self.config.bucket)
                .key(&key)
                .upload_id(upload_id);
            if let Some(m) = &marker {
                req = req.part_number_marker(m);
            }

            let resp = req.send().await.map_err(|e| s3_err("list parts", e))?;

            for part in resp.parts() {
                parts.push(PartInfo {
                    part_number: part.part_number().unwrap_or(0),
                    size: part.size().unwrap_or(0) as u64,
                    etag: part.e_tag().map(|s| strip_etag_quotes(s)),
                    modified: part
                        .last_modified()
                        .and_then(|t| t.to_millis().ok())
                        .unwrap_or(0),
                });
            }

            if resp.is_truncated() == Some(true) {
                marker = resp.next_part_number_marker().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(parts)
    }

    async fn refresh_multipart_urls(
        &self,
        _mount: &Mount,
        sub_path: &str,
        upload_id: &str,
        part_numbers: &[i32],
    ) -> Result<Vec<PartUrl>, FsError> {
        let key = object_key(&self.config, sub_path);
        let mut urls = Vec::with_capacity(part_numbers.len());
        for &part_number in part_numbers {
            if part_number < 1 {
                return Err(FsError::bad_request("part numbers start at 1"));
            }
            let url = self
                .presign_part(
                    &key,
                    upload_id,
                    part_number,
                    crate::models::DEFAULT_PRESIGN_EXPIRES_SECS,
                )
                .await?;
            urls.push(PartUrl { part_number, url });
        }
        Ok(urls)
    }

    async fn search_walk(
        &self,
        mount: &Mount,
        sub_path: Option<&str>,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, FsError> {
        let query_lower = query.to_lowercase();
        let prefix = dir_key(&self.config, sub_path.unwrap_or("/"));
        let max = max_results.min(MAX_SEARCH_RESULTS);

        let mut hits = Vec::new();
        let mut continuation_token: Option<String> = None;

        'pages: loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(&prefix);
            if let Some(token) = &continuation_token {
                req = req.continuation_token(token);
            }

            let resp = req.send().await.map_err(|e| s3_err("search walk", e))?;

            for obj in resp.contents() {
                let key = match obj.key() {
                    Some(k) => k,
                    None => continue,
                };
                if key == prefix {
                    continue;
                }
                let is_dir = key.ends_with('/');
                let name = path::basename(key);
                if name.is_empty() || !name.to_lowercase().contains(&query_lower) {
                    continue;
                }

                let sub = match key_to_sub_path(&self.config, key) {
                    Some(s) => s,
                    None => continue,
                };
                hits.push(SearchHit {
                    name: name.to_string(),
                    path: path::join(&mount.mount_path, &sub),
                    size: obj.size().unwrap_or(0) as u64,
                    is_dir,
                    modified: obj
                        .last_modified()
                        .and_then(|t| t.to_millis().ok())
                        .unwrap_or(0),
                    mount_id: mount.id.clone(),
                });
                if hits.len() >= max {
                    break 'pages;
                }
            }

            if resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(hits)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Builds `S3Driver`s for the mount manager's pool.
pub struct S3DriverFactory;

#[async_trait]
impl DriverFactory for S3DriverFactory {
    async fn build(
        &self,
        config: &S3Config,
        secret_key: &str,
        deps: DriverDeps,
    ) -> Result<Arc<dyn StorageDriver>, FsError> {
        let client = build_s3_client(config, secret_key).await?;
        Ok(Arc::new(S3Driver::new(client, config.clone(), deps)))
    }
}
