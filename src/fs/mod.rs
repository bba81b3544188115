//! The user-facing facade. Every operation resolves its logical path to a
//! driver through the mount manager, verifies the driver declares the
//! required capability, and only then dispatches. Typed errors pass through
//! unchanged; batch operations record per-item failures instead of raising.

mod search;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::SearchCache;
use crate::driver::{FileDownload, StorageDriver};
use crate::models::{
    BatchCopyResult, BatchFailure, BatchRemoveResult, Capability, CompletedPartSpec, CopyDetail,
    CopyItemSpec, CopyOutcome, CrossStorageCopy, DirListing, FileInfo, FsError, MultipartInit,
    MultipartUploadInfo, PartInfo, PartUrl, PresignMethod, PresignOptions, PresignedUrl,
    Principal, SearchParams, SearchResults, UploadOptions, UploadResult,
};
use crate::mount::registry::Resolution;
use crate::mount::MountManager;
use crate::path;

/// Default bound on control-plane operations. Streaming transfers are
/// unbounded; dropping the returned future aborts any in-flight call.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Cooperative cancellation for long multi-item operations. Single provider
/// calls cancel by dropping their future.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), FsError> {
        if self.is_cancelled() {
            Err(FsError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ── Facade ───────────────────────────────────────────────────────────────────

pub struct FileSystem {
    manager: Arc<MountManager>,
    search_cache: Arc<SearchCache>,
}

impl FileSystem {
    pub fn new(manager: Arc<MountManager>, search_cache: Arc<SearchCache>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            search_cache,
        })
    }

    pub fn manager(&self) -> &Arc<MountManager> {
        &self.manager
    }

    fn require(driver: &Arc<dyn StorageDriver>, cap: Capability) -> Result<(), FsError> {
        if driver.capabilities().contains(cap) {
            Ok(())
        } else {
            Err(FsError::unsupported(driver.storage_type(), cap))
        }
    }

    async fn bounded<T>(
        fut: impl std::future::Future<Output = Result<T, FsError>>,
    ) -> Result<T, FsError> {
        match tokio::time::timeout(CONTROL_TIMEOUT, fut).await {
            Ok(result) => result,
            Err(_) => Err(FsError::ProviderTransient {
                status: 0,
                message: "operation timed out".to_string(),
            }),
        }
    }

    async fn resolve(
        &self,
        principal: &Principal,
        logical_path: &str,
        cap: Capability,
    ) -> Result<(Arc<dyn StorageDriver>, crate::models::Mount, String), FsError> {
        let (driver, mount, sub) = self
            .manager
            .get_driver_by_path(principal, logical_path)
            .await?;
        Self::require(&driver, cap)?;
        Ok((driver, mount, sub))
    }

    // ── Reads ────────────────────────────────────────────────────────────

    pub async fn list_directory(
        &self,
        principal: &Principal,
        logical_path: &str,
    ) -> Result<DirListing, FsError> {
        let dir = path::normalize(logical_path, true)?;
        let registry = self.manager.registry().clone();

        match registry.resolve(principal, &dir).await? {
            Resolution::Virtual { path } => registry.virtual_listing(principal, &path).await,
            Resolution::Mounted { mount, sub_path } => {
                let driver = self.manager.get_driver(&mount).await?;
                Self::require(&driver, Capability::Reader)?;
                let listing =
                    Self::bounded(driver.list_directory(&mount, &sub_path)).await?;
                self.manager.touch_mount(&mount.id);
                Ok(listing)
            }
        }
    }

    pub async fn get_file_info(
        &self,
        principal: &Principal,
        logical_path: &str,
    ) -> Result<FileInfo, FsError> {
        let (driver, mount, sub) = self
            .resolve(principal, logical_path, Capability::Reader)
            .await?;
        let info = Self::bounded(driver.get_file_info(&mount, &sub)).await?;
        self.manager.touch_mount(&mount.id);
        Ok(info)
    }

    pub async fn download_file(
        &self,
        principal: &Principal,
        logical_path: &str,
    ) -> Result<FileDownload, FsError> {
        let (driver, mount, sub) = self
            .resolve(principal, logical_path, Capability::Reader)
            .await?;
        let download = driver.download_file(&mount, &sub, false).await?;
        self.manager.touch_mount(&mount.id);
        Ok(download)
    }

    pub async fn preview_file(
        &self,
        principal: &Principal,
        logical_path: &str,
    ) -> Result<FileDownload, FsError> {
        let (driver, mount, sub) = self
            .resolve(principal, logical_path, Capability::Reader)
            .await?;
        let download = driver.download_file(&mount, &sub, true).await?;
        self.manager.touch_mount(&mount.id);
        Ok(download)
    }

    // ── Writes ───────────────────────────────────────────────────────────

    pub async fn upload_file(
        &self,
        principal: &Principal,
        logical_path: &str,
        data: Vec<u8>,
        opts: &UploadOptions,
    ) -> Result<UploadResult, FsError> {
        let (driver, mount, sub) = self
            .resolve(principal, logical_path, Capability::Writer)
            .await?;
        let result = driver.upload_file(&mount, &sub, data, opts, principal).await?;
        self.manager.touch_mount(&mount.id);
        Ok(result)
    }

    pub async fn create_directory(
        &self,
        principal: &Principal,
        logical_path: &str,
    ) -> Result<(), FsError> {
        let dir = path::normalize(logical_path, true)?;
        let (driver, mount, sub) = self.resolve(principal, &dir, Capability::Writer).await?;
        Self::bounded(driver.create_directory(&mount, &sub)).await?;
        self.manager.touch_mount(&mount.id);
        Ok(())
    }

    pub async fn remove_item(
        &self,
        principal: &Principal,
        logical_path: &str,
    ) -> Result<(), FsError> {
        let (driver, mount, sub) = self
            .resolve(principal, logical_path, Capability::Writer)
            .await?;
        Self::bounded(driver.remove_item(&mount, &sub)).await?;
        self.manager.touch_mount(&mount.id);
        Ok(())
    }

    pub async fn rename_item(
        &self,
        principal: &Principal,
        old_path: &str,
        new_path: &str,
    ) -> Result<(), FsError> {
        let (driver, old_mount, old_sub) = self
            .resolve(principal, old_path, Capability::Atomic)
            .await?;
        let (_, new_mount, new_sub) = self
            .resolve(principal, new_path, Capability::Atomic)
            .await?;
        if old_mount.id != new_mount.id {
            return Err(FsError::bad_request(
                "rename across mounts is not supported; use copy",
            ));
        }

        Self::bounded(driver.rename_item(&old_mount, &old_sub, &new_sub)).await?;
        self.manager.touch_mount(&old_mount.id);
        Ok(())
    }

    /// Copy one item. Same-config copies run server-side; copies that cross
    /// storage configurations come back as a presigned hand-off for the
    /// caller to execute.
    pub async fn copy_item(
        &self,
        principal: &Principal,
        source: &str,
        destination: &str,
        skip_existing: bool,
    ) -> Result<CopyOutcome, FsError> {
        let (src_driver, src_mount, src_sub) = self
            .resolve(principal, source, Capability::Atomic)
            .await?;
        let (dest_driver, dest_mount, dest_sub) = self
            .resolve(principal, destination, Capability::Atomic)
            .await?;

        if src_mount.storage_config_id == dest_mount.storage_config_id {
            let stats = Self::bounded(src_driver.copy_item(
                &src_mount,
                &src_sub,
                &dest_mount,
                &dest_sub,
                skip_existing,
            ))
            .await?;
            self.manager.touch_mount(&src_mount.id);
            return Ok(CopyOutcome::Local { stats });
        }

        // Cross-storage: only single files can be handed off.
        if path::is_dir_ref(&src_sub) {
            return Err(FsError::bad_request(
                "cross-storage directory copy is not supported; copy files individually",
            ));
        }
        Self::require(&src_driver, Capability::Presigned)?;
        Self::require(&dest_driver, Capability::Presigned)?;

        let metadata = Self::bounded(src_driver.get_file_info(&src_mount, &src_sub)).await?;
        let get = Self::bounded(src_driver.presigned_url(
            &src_mount,
            &src_sub,
            &PresignOptions::default(),
        ))
        .await?;
        let put = Self::bounded(dest_driver.presigned_url(
            &dest_mount,
            &dest_sub,
            &PresignOptions {
                method: PresignMethod::Put,
                ..PresignOptions::default()
            },
        ))
        .await?;

        self.manager.touch_mount(&src_mount.id);
        Ok(CopyOutcome::CrossStorage(CrossStorageCopy {
            source_path: metadata.path.clone(),
            target_path: path::normalize(destination, false)?,
            get_url: get.url,
            put_url: put.url,
            metadata,
        }))
    }

    // ── Batch operations ─────────────────────────────────────────────────

    /// Remove many paths. The whole list runs through the driver resolved
    /// for the first path; per-item failures are collected, never raised.
    pub async fn batch_remove_items(
        &self,
        principal: &Principal,
        paths: &[String],
        cancel: &CancelFlag,
    ) -> Result<BatchRemoveResult, FsError> {
        let mut result = BatchRemoveResult::default();
        if paths.is_empty() {
            return Ok(result);
        }

        let (driver, _, _) = self
            .resolve(principal, &paths[0], Capability::Writer)
            .await?;

        for logical in paths {
            cancel.check()?;
            let outcome = async {
                let (_, mount, sub) = self
                    .manager
                    .get_driver_by_path(principal, logical)
                    .await?;
                driver.remove_item(&mount, &sub).await?;
                self.manager.touch_mount(&mount.id);
                Ok::<(), FsError>(())
            }
            .await;

            match outcome {
                Ok(()) => result.success += 1,
                Err(e) => result.failed.push(BatchFailure {
                    path: logical.clone(),
                    error: e.to_string(),
                }),
            }
        }
        Ok(result)
    }

    /// Copy many items, auto-correcting directory destinations and
    /// aggregating local stats, skips, failures and cross-storage hand-offs.
    pub async fn batch_copy_items(
        &self,
        principal: &Principal,
        items: &[CopyItemSpec],
        skip_existing: Option<bool>,
        cancel: &CancelFlag,
    ) -> Result<BatchCopyResult, FsError> {
        let skip = skip_existing.unwrap_or(true);
        let mut result = BatchCopyResult::default();

        for item in items {
            cancel.check()?;

            // A directory source forces the destination into directory form.
            let destination = if item.source.ends_with('/') && !item.destination.ends_with('/') {
                format!("{}/", item.destination)
            } else {
                item.destination.clone()
            };

            match self.copy_item(principal, &item.source, &destination, skip).await {
                Ok(CopyOutcome::Local { stats }) => {
                    result.success += stats.copied;
                    result.skipped += stats.skipped;
                    let status = if stats.copied == 0 && stats.skipped > 0 {
                        "skipped"
                    } else {
                        "copied"
                    };
                    result.details.push(CopyDetail {
                        source: item.source.clone(),
                        destination,
                        status: status.to_string(),
                    });
                }
                Ok(CopyOutcome::CrossStorage(hand_off)) => {
                    result.details.push(CopyDetail {
                        source: item.source.clone(),
                        destination,
                        status: "cross-storage".to_string(),
                    });
                    result.cross_storage_results.push(hand_off);
                }
                Err(e) => {
                    result.details.push(CopyDetail {
                        source: item.source.clone(),
                        destination,
                        status: "failed".to_string(),
                    });
                    result.failed.push(BatchFailure {
                        path: item.source.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(result)
    }

    // ── Presigned & multipart ────────────────────────────────────────────

    pub async fn generate_presigned_url(
        &self,
        principal: &Principal,
        logical_path: &str,
        opts: &PresignOptions,
    ) -> Result<PresignedUrl, FsError> {
        let (driver, mount, sub) = self
            .resolve(principal, logical_path, Capability::Presigned)
            .await?;
        let url = Self::bounded(driver.presigned_url(&mount, &sub, opts)).await?;
        self.manager.touch_mount(&mount.id);
        Ok(url)
    }

    pub async fn init_multipart_upload(
        &self,
        principal: &Principal,
        logical_path: &str,
        size: u64,
        content_type: Option<&str>,
    ) -> Result<MultipartInit, FsError> {
        let (driver, mount, sub) = self
            .resolve(principal, logical_path, Capability::Multipart)
            .await?;
        let init = Self::bounded(driver.init_multipart(&mount, &sub, size, content_type)).await?;
        self.manager.touch_mount(&mount.id);
        Ok(init)
    }

    pub async fn complete_multipart_upload(
        &self,
        principal: &Principal,
        logical_path: &str,
        upload_id: &str,
        parts: &[CompletedPartSpec],
    ) -> Result<UploadResult, FsError> {
        let (driver, mount, sub) = self
            .resolve(principal, logical_path, Capability::Multipart)
            .await?;
        let result = Self::bounded(driver.complete_multipart(
            &mount, &sub, upload_id, parts, principal,
        ))
        .await?;
        self.manager.touch_mount(&mount.id);
        Ok(result)
    }

    pub async fn abort_multipart_upload(
        &self,
        principal: &Principal,
        logical_path: &str,
        upload_id: &str,
    ) -> Result<(), FsError> {
        let (driver, mount, sub) = self
            .resolve(principal, logical_path, Capability::Multipart)
            .await?;
        Self::bounded(driver.abort_multipart(&mount, &sub, upload_id)).await?;
        self.manager.touch_mount(&mount.id);
        Ok(())
    }

    pub async fn list_multipart_uploads(
        &self,
        principal: &Principal,
        logical_path: &str,
    ) -> Result<Vec<MultipartUploadInfo>, FsError> {
        let dir = path::normalize(logical_path, true)?;
        let (driver, mount, sub) = self.resolve(principal, &dir, Capability::Multipart).await?;
        Self::bounded(driver.list_multipart_uploads(&mount, Some(sub.as_str()))).await
    }

    pub async fn list_multipart_parts(
        &self,
        principal: &Principal,
        logical_path: &str,
        upload_id: &str,
    ) -> Result<Vec<PartInfo>, FsError> {
        let (driver, mount, sub) = self
            .resolve(principal, logical_path, Capability::Multipart)
            .await?;
        Self::bounded(driver.list_multipart_parts(&mount, &sub, upload_id)).await
    }

    pub async fn refresh_multipart_urls(
        &self,
        principal: &Principal,
        logical_path: &str,
        upload_id: &str,
        part_numbers: &[i32],
    ) -> Result<Vec<PartUrl>, FsError> {
        let (driver, mount, sub) = self
            .resolve(principal, logical_path, Capability::Multipart)
            .await?;
        Self::bounded(driver.refresh_multipart_urls(&mount, &sub, upload_id, part_numbers)).await
    }

    // ── Search ───────────────────────────────────────────────────────────

    pub async fn search_files(
        &self,
        principal: &Principal,
        query: &str,
        params: &SearchParams,
        cancel: &CancelFlag,
    ) -> Result<SearchResults, FsError> {
        search::search_files(
            &self.manager,
            &self.search_cache,
            principal,
            query,
            params,
            cancel,
        )
        .await
    }

    /// Drop the search cache, e.g. after mount table edits.
    pub fn clear_search_cache(&self) {
        let n = self.search_cache.clear();
        if n > 0 {
            debug!("cleared {} cached search result sets", n);
        }
    }
}
