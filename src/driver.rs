//! The storage-driver contract. A driver binds one storage configuration
//! and declares the capabilities it implements; the facade checks the
//! declaration before dispatching, so an unsupported operation fails with
//! `Unimplemented` before any I/O happens.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;

use crate::cache::DirectoryCache;
use crate::models::{
    Capability, CapabilitySet, CompletedPartSpec, CopyStats, DirListing, FileInfo, FsError,
    Mount, MultipartInit, MultipartUploadInfo, PartInfo, PartUrl, PresignOptions, PresignedUrl,
    Principal, S3Config, SearchHit, StorageType, UploadOptions, UploadResult,
};
use crate::store::FileRecordStore;

// ── Downloads ────────────────────────────────────────────────────────────────

/// A download response. The body's ownership transfers to the HTTP layer;
/// the engine never buffers it.
pub struct FileDownload {
    pub file_name: String,
    pub content_type: String,
    pub content_length: u64,
    /// Epoch milliseconds, 0 if unknown.
    pub last_modified: i64,
    pub etag: Option<String>,
    /// Full `Content-Disposition` value (`inline` / `attachment; ...`).
    pub disposition: String,
    pub body: ByteStream,
}

impl FileDownload {
    /// Response headers for the HTTP layer, CORS included.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), self.content_type.clone()),
            ("Content-Length".to_string(), self.content_length.to_string()),
            ("Content-Disposition".to_string(), self.disposition.clone()),
            ("Access-Control-Allow-Origin".to_string(), "*".to_string()),
            ("Access-Control-Expose-Headers".to_string(), "ETag, Content-Length".to_string()),
        ];
        if self.last_modified > 0 {
            if let Some(dt) = chrono::DateTime::from_timestamp_millis(self.last_modified) {
                headers.push((
                    "Last-Modified".to_string(),
                    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
                ));
            }
        }
        if let Some(etag) = &self.etag {
            headers.push(("ETag".to_string(), format!("\"{}\"", etag)));
        }
        headers
    }
}

// ── Driver trait ─────────────────────────────────────────────────────────────

/// One storage backend bound to one configuration. Methods outside the
/// driver's declared capability set keep the default body and answer
/// `Unimplemented`; the facade normally rejects such calls earlier.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    fn storage_type(&self) -> StorageType;
    fn capabilities(&self) -> CapabilitySet;

    /// Cheap reachability probe against the backing store.
    async fn test_connection(&self) -> Result<bool, FsError> {
        Ok(true)
    }

    // Reader ----------------------------------------------------------------

    async fn list_directory(&self, _mount: &Mount, _sub_path: &str) -> Result<DirListing, FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Reader))
    }

    async fn get_file_info(&self, _mount: &Mount, _sub_path: &str) -> Result<FileInfo, FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Reader))
    }

    /// `inline` selects preview disposition instead of attachment.
    async fn download_file(
        &self,
        _mount: &Mount,
        _sub_path: &str,
        _inline: bool,
    ) -> Result<FileDownload, FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Reader))
    }

    /// Paginated filename scan under the mount (or `sub_path` when given).
    /// Raw hits; relevance ordering happens in the facade.
    async fn search_walk(
        &self,
        _mount: &Mount,
        _sub_path: Option<&str>,
        _query: &str,
        _max_results: usize,
    ) -> Result<Vec<SearchHit>, FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Reader))
    }

    // Writer ----------------------------------------------------------------

    async fn upload_file(
        &self,
        _mount: &Mount,
        _sub_path: &str,
        _data: Vec<u8>,
        _opts: &UploadOptions,
        _principal: &Principal,
    ) -> Result<UploadResult, FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Writer))
    }

    async fn create_directory(&self, _mount: &Mount, _sub_path: &str) -> Result<(), FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Writer))
    }

    async fn remove_item(&self, _mount: &Mount, _sub_path: &str) -> Result<(), FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Writer))
    }

    // Atomic ----------------------------------------------------------------

    async fn rename_item(
        &self,
        _mount: &Mount,
        _old_sub: &str,
        _new_sub: &str,
    ) -> Result<(), FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Atomic))
    }

    /// Copy within one storage config. Source and destination mounts may
    /// differ as long as they share the config.
    async fn copy_item(
        &self,
        _src_mount: &Mount,
        _src_sub: &str,
        _dest_mount: &Mount,
        _dest_sub: &str,
        _skip_existing: bool,
    ) -> Result<CopyStats, FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Atomic))
    }

    // Presigned -------------------------------------------------------------

    async fn presigned_url(
        &self,
        _mount: &Mount,
        _sub_path: &str,
        _opts: &PresignOptions,
    ) -> Result<PresignedUrl, FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Presigned))
    }

    // Multipart -------------------------------------------------------------

    async fn init_multipart(
        &self,
        _mount: &Mount,
        _sub_path: &str,
        _size: u64,
        _content_type: Option<&str>,
    ) -> Result<MultipartInit, FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Multipart))
    }

    async fn complete_multipart(
        &self,
        _mount: &Mount,
        _sub_path: &str,
        _upload_id: &str,
        _parts: &[CompletedPartSpec],
        _principal: &Principal,
    ) -> Result<UploadResult, FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Multipart))
    }

    async fn abort_multipart(
        &self,
        _mount: &Mount,
        _sub_path: &str,
        _upload_id: &str,
    ) -> Result<(), FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Multipart))
    }

    async fn list_multipart_uploads(
        &self,
        _mount: &Mount,
        _sub_path: Option<&str>,
    ) -> Result<Vec<MultipartUploadInfo>, FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Multipart))
    }

    async fn list_multipart_parts(
        &self,
        _mount: &Mount,
        _sub_path: &str,
        _upload_id: &str,
    ) -> Result<Vec<PartInfo>, FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Multipart))
    }

    async fn refresh_multipart_urls(
        &self,
        _mount: &Mount,
        _sub_path: &str,
        _upload_id: &str,
        _part_numbers: &[i32],
    ) -> Result<Vec<PartUrl>, FsError> {
        Err(FsError::unsupported(self.storage_type(), Capability::Multipart))
    }
}

// ── Construction ─────────────────────────────────────────────────────────────

/// Shared collaborators handed to every driver the pool constructs.
#[derive(Clone)]
pub struct DriverDeps {
    pub dir_cache: Arc<DirectoryCache>,
    pub file_records: Arc<dyn FileRecordStore>,
}

/// Builds drivers for the pool. Swappable so tests can run the whole engine
/// against an in-memory store.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn build(
        &self,
        config: &S3Config,
        secret_key: &str,
        deps: DriverDeps,
    ) -> Result<Arc<dyn StorageDriver>, FsError>;
}
