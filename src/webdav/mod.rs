//! WebDAV verb adapter. XML parsing and serialization belong to the
//! embedder; this layer receives already-parsed verb arguments, drives the
//! filesystem facade and answers with structured responses carrying the
//! protocol headers Windows and macOS clients expect.

use std::sync::Arc;

use serde::Serialize;

use crate::driver::FileDownload;
use crate::fs::{CancelFlag, FileSystem};
use crate::models::{CopyOutcome, FileInfo, FsError, Principal, UploadOptions};
use crate::path;

pub const DAV_METHODS: &str =
    "OPTIONS, GET, HEAD, PUT, DELETE, PROPFIND, PROPPATCH, MKCOL, COPY, MOVE, LOCK, UNLOCK";

// ── Configuration ────────────────────────────────────────────────────────────

/// Header knobs, including the platform-specific override hook.
pub struct DavConfig {
    pub allow_origin: String,
    pub allow_headers: String,
    /// Extra headers appended to every response (platform overrides).
    pub extra_headers: Vec<(String, String)>,
}

impl Default for DavConfig {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_headers: "Authorization, Content-Type, Depth, Destination, Overwrite"
                .to_string(),
            extra_headers: Vec::new(),
        }
    }
}

// ── Request & response shapes ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
}

/// One resource inside a 207 Multi-Status answer.
#[derive(Debug, Clone, Serialize)]
pub struct DavResource {
    pub href: String,
    pub display_name: String,
    pub is_collection: bool,
    pub content_length: u64,
    /// Epoch milliseconds, 0 if unknown.
    pub last_modified: i64,
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

pub enum DavBody {
    None,
    Resources(Vec<DavResource>),
    File(FileDownload),
    LockToken(String),
}

pub struct DavResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: DavBody,
}

// ── Adapter ──────────────────────────────────────────────────────────────────

pub struct WebDavAdapter {
    fs: Arc<FileSystem>,
    config: DavConfig,
}

impl WebDavAdapter {
    pub fn new(fs: Arc<FileSystem>, config: DavConfig) -> Self {
        Self { fs, config }
    }

    fn protocol_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("DAV".to_string(), "1,2".to_string()),
            ("MS-Author-Via".to_string(), "DAV".to_string()),
            ("Microsoft-Server-WebDAV-Extensions".to_string(), "1".to_string()),
            ("X-MSDAVEXT".to_string(), "1".to_string()),
            ("Allow".to_string(), DAV_METHODS.to_string()),
            ("Public".to_string(), DAV_METHODS.to_string()),
            (
                "Access-Control-Allow-Origin".to_string(),
                self.config.allow_origin.clone(),
            ),
            (
                "Access-Control-Allow-Methods".to_string(),
                DAV_METHODS.to_string(),
            ),
            (
                "Access-Control-Allow-Headers".to_string(),
                self.config.allow_headers.clone(),
            ),
            ("Access-Control-Max-Age".to_string(), "86400".to_string()),
        ];
        headers.extend(self.config.extra_headers.iter().cloned());
        headers
    }

    fn reply(&self, status: u16, body: DavBody) -> DavResponse {
        DavResponse {
            status,
            headers: self.protocol_headers(),
            body,
        }
    }

    fn fail(&self, err: FsError) -> DavResponse {
        self.reply(err.http_status(), DavBody::None)
    }

    fn resource_of(info: &FileInfo) -> DavResource {
        DavResource {
            href: info.path.clone(),
            display_name: info.name.clone(),
            is_collection: info.is_dir,
            content_length: info.size,
            last_modified: info.modified,
            etag: info.etag.clone(),
            content_type: info.content_type.clone(),
        }
    }

    pub fn options(&self) -> DavResponse {
        self.reply(200, DavBody::None)
    }

    /// PROPFIND maps to a stat (depth 0) or a listing (depth 1); the
    /// multi-status body always leads with the resource itself.
    pub async fn propfind(
        &self,
        principal: &Principal,
        logical_path: &str,
        depth: Depth,
    ) -> DavResponse {
        let is_dir = path::is_dir_ref(logical_path);

        let self_info = if is_dir {
            FileInfo {
                name: path::basename(logical_path).to_string(),
                path: logical_path.to_string(),
                is_dir: true,
                size: 0,
                modified: 0,
                etag: None,
                content_type: None,
            }
        } else {
            match self.fs.get_file_info(principal, logical_path).await {
                Ok(info) => info,
                Err(e) => return self.fail(e),
            }
        };

        let mut resources = vec![Self::resource_of(&self_info)];

        if self_info.is_dir {
            if depth == Depth::One {
                match self.fs.list_directory(principal, logical_path).await {
                    Ok(listing) => {
                        for entry in listing.entries {
                            resources.push(DavResource {
                                href: entry.path,
                                display_name: entry.name,
                                is_collection: entry.is_dir,
                                content_length: entry.size.unwrap_or(0),
                                last_modified: entry.modified,
                                etag: entry.etag,
                                content_type: None,
                            });
                        }
                    }
                    Err(e) => return self.fail(e),
                }
            } else if is_dir {
                // Depth 0 on a directory still needs to prove it exists.
                if let Err(e) = self.fs.list_directory(principal, logical_path).await {
                    return self.fail(e);
                }
            }
        }

        self.reply(207, DavBody::Resources(resources))
    }

    pub async fn get(&self, principal: &Principal, logical_path: &str) -> DavResponse {
        match self.fs.download_file(principal, logical_path).await {
            Ok(download) => {
                let mut response = self.reply(200, DavBody::None);
                response.headers.extend(download.headers());
                response.body = DavBody::File(download);
                response
            }
            Err(e) => self.fail(e),
        }
    }

    pub async fn head(&self, principal: &Principal, logical_path: &str) -> DavResponse {
        match self.fs.get_file_info(principal, logical_path).await {
            Ok(info) => {
                let mut response = self.reply(200, DavBody::None);
                response
                    .headers
                    .push(("Content-Length".to_string(), info.size.to_string()));
                if let Some(ct) = &info.content_type {
                    response.headers.push(("Content-Type".to_string(), ct.clone()));
                }
                if let Some(etag) = &info.etag {
                    response
                        .headers
                        .push(("ETag".to_string(), format!("\"{}\"", etag)));
                }
                response
            }
            Err(e) => self.fail(e),
        }
    }

    pub async fn put(
        &self,
        principal: &Principal,
        logical_path: &str,
        data: Vec<u8>,
        content_type: Option<String>,
    ) -> DavResponse {
        let opts = UploadOptions { content_type };
        match self.fs.upload_file(principal, logical_path, data, &opts).await {
            Ok(_) => self.reply(201, DavBody::None),
            Err(e) => self.fail(e),
        }
    }

    pub async fn delete(&self, principal: &Principal, logical_path: &str) -> DavResponse {
        match self.fs.remove_item(principal, logical_path).await {
            Ok(()) => self.reply(204, DavBody::None),
            // Clients rarely send the trailing slash for collections; retry
            // the directory form before giving up.
            Err(FsError::NotFound(_)) if !path::is_dir_ref(logical_path) => {
                let dir = format!("{}/", logical_path);
                match self.fs.remove_item(principal, &dir).await {
                    Ok(()) => self.reply(204, DavBody::None),
                    Err(e) => self.fail(e),
                }
            }
            Err(e) => self.fail(e),
        }
    }

    pub async fn mkcol(&self, principal: &Principal, logical_path: &str) -> DavResponse {
        match self.fs.create_directory(principal, logical_path).await {
            Ok(()) => self.reply(201, DavBody::None),
            Err(e) => self.fail(e),
        }
    }

    pub async fn copy(
        &self,
        principal: &Principal,
        source: &str,
        destination: &str,
        overwrite: bool,
    ) -> DavResponse {
        if !overwrite {
            if self.fs.get_file_info(principal, destination).await.is_ok() {
                return self.reply(412, DavBody::None);
            }
        }
        match self
            .fs
            .copy_item(principal, source, destination, false)
            .await
        {
            Ok(CopyOutcome::Local { .. }) => self.reply(201, DavBody::None),
            // A cross-config copy cannot run inside the DAV request cycle.
            Ok(CopyOutcome::CrossStorage(_)) => self.reply(502, DavBody::None),
            Err(e) => self.fail(e),
        }
    }

    pub async fn r#move(
        &self,
        principal: &Principal,
        source: &str,
        destination: &str,
        overwrite: bool,
    ) -> DavResponse {
        let mut overwrote = false;
        if self.fs.get_file_info(principal, destination).await.is_ok() {
            if !overwrite {
                return self.reply(412, DavBody::None);
            }
            if let Err(e) = self.fs.remove_item(principal, destination).await {
                return self.fail(e);
            }
            overwrote = true;
        }
        match self.fs.rename_item(principal, source, destination).await {
            Ok(()) => self.reply(if overwrote { 204 } else { 201 }, DavBody::None),
            Err(e) => self.fail(e),
        }
    }

    /// Class-2 compatibility: locks always grant and are never persisted.
    /// The backing store has no lock semantics to enforce.
    pub async fn lock(&self, _principal: &Principal, _logical_path: &str) -> DavResponse {
        let token = format!("opaquelocktoken:{}", uuid::Uuid::new_v4());
        let mut response = self.reply(200, DavBody::LockToken(token.clone()));
        response.headers.push(("Lock-Token".to_string(), format!("<{}>", token)));
        response
    }

    pub async fn unlock(&self, _principal: &Principal, _logical_path: &str) -> DavResponse {
        self.reply(204, DavBody::None)
    }

    /// Property writes are accepted and discarded; object stores keep no
    /// arbitrary dead properties.
    pub async fn proppatch(&self, principal: &Principal, logical_path: &str) -> DavResponse {
        match self.fs.get_file_info(principal, logical_path).await {
            Ok(info) => self.reply(207, DavBody::Resources(vec![Self::resource_of(&info)])),
            Err(e) => self.fail(e),
        }
    }

    /// Batch delete for clients that extend DAV with multi-path DELETE.
    pub async fn delete_many(
        &self,
        principal: &Principal,
        paths: &[String],
    ) -> Result<crate::models::BatchRemoveResult, FsError> {
        self.fs
            .batch_remove_items(principal, paths, &CancelFlag::new())
            .await
    }
}
