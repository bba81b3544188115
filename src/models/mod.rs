use serde::{Deserialize, Serialize};

// ── StorageType ──────────────────────────────────────────────────────────────

/// Kind of backing store a mount points at. Only S3-compatible stores in
/// this crate; the enum leaves room for embedders that add more drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageType {
    S3,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::S3 => "S3",
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Capabilities ─────────────────────────────────────────────────────────────

/// A feature a storage driver may advertise. The facade refuses to dispatch
/// an operation whose capability the resolved driver does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    Reader,
    Writer,
    Atomic,
    Presigned,
    Multipart,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Reader => "Reader",
            Capability::Writer => "Writer",
            Capability::Atomic => "Atomic",
            Capability::Presigned => "Presigned",
            Capability::Multipart => "Multipart",
        }
    }

    fn bit(&self) -> u8 {
        match self {
            Capability::Reader => 1 << 0,
            Capability::Writer => 1 << 1,
            Capability::Atomic => 1 << 2,
            Capability::Presigned => 1 << 3,
            Capability::Multipart => 1 << 4,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable set of capabilities declared by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const fn empty() -> Self {
        CapabilitySet(0)
    }

    pub fn all() -> Self {
        CapabilitySet::empty()
            .with(Capability::Reader)
            .with(Capability::Writer)
            .with(Capability::Atomic)
            .with(Capability::Presigned)
            .with(Capability::Multipart)
    }

    pub fn with(self, cap: Capability) -> Self {
        CapabilitySet(self.0 | cap.bit())
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        iter.into_iter().fold(CapabilitySet::empty(), |s, c| s.with(c))
    }
}

// ── Principal ────────────────────────────────────────────────────────────────

/// Read/write grants carried by an API key. Authorization itself happens in
/// the gateway; the engine only narrows the candidate mount set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeyPermissions {
    pub read: bool,
    pub write: bool,
}

/// The already-authenticated caller of every engine operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Principal {
    Admin {
        user_id: String,
    },
    ApiKey {
        key_id: String,
        permitted_mounts: Vec<String>,
        base_path: String,
        permissions: ApiKeyPermissions,
    },
}

impl Principal {
    /// Ownership tag recorded on file records: `admin:<id>` / `apikey:<id>`.
    pub fn identity(&self) -> String {
        match self {
            Principal::Admin { user_id } => format!("admin:{}", user_id),
            Principal::ApiKey { key_id, .. } => format!("apikey:{}", key_id),
        }
    }

    pub fn can_use_mount(&self, mount: &Mount) -> bool {
        match self {
            Principal::Admin { .. } => mount.owner == self.identity(),
            Principal::ApiKey { permitted_mounts, .. } => {
                permitted_mounts.iter().any(|id| id == &mount.id)
            }
        }
    }
}

// ── Mount ────────────────────────────────────────────────────────────────────

/// A binding of a logical path prefix to one storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    pub id: String,
    /// Owner principal identity (`admin:<id>` / `apikey:<id>`).
    pub owner: String,
    pub name: String,
    /// Absolute logical prefix without trailing slash (`/docs`).
    pub mount_path: String,
    pub storage_type: StorageType,
    pub storage_config_id: String,
    pub cache_ttl_secs: u64,
    pub sort_order: i32,
    pub is_active: bool,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
    pub last_used_at: Option<i64>,
}

// ── S3Config ─────────────────────────────────────────────────────────────────

/// Connection settings for one S3-compatible bucket. The secret key is held
/// encrypted and only decrypted when a client is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub encrypted_secret_key: String,
    pub path_style: bool,
    /// Bucket-side prefix prepended to every key. Empty or `a/b/` form.
    pub root_prefix: String,
    /// Extra folder under the root prefix. Empty or `a/b/` form.
    pub default_folder: String,
    pub provider_type: String,
    pub signature_version: String,
}

// ── Directory listings ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    /// Full logical path of the entry.
    pub path: String,
    pub is_dir: bool,
    pub size: Option<u64>,
    /// Last-modified time as milliseconds since Unix epoch, 0 if unknown.
    pub modified: i64,
    pub etag: Option<String>,
    pub mount_id: Option<String>,
    /// Entry is itself a mount point (virtual listings only).
    pub is_mount: bool,
    /// Entry is an intermediate directory synthesized from mount paths.
    pub is_virtual: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirListing {
    pub path: String,
    pub is_virtual: bool,
    pub is_root: bool,
    pub mount_id: Option<String>,
    pub storage_type: Option<StorageType>,
    pub entries: Vec<FileEntry>,
}

// ── File metadata ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    /// Epoch milliseconds, 0 if unknown.
    pub modified: i64,
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

// ── Upload ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadOptions {
    /// MIME type supplied by the caller; merged with the filename guess.
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResult {
    pub use_multipart: bool,
    pub upload_id: Option<String>,
    pub path: String,
    pub size: u64,
    pub etag: Option<String>,
    pub file_id: String,
    pub slug: String,
}

// ── File records ─────────────────────────────────────────────────────────────

/// Row persisted in the external `files` repository after an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub filename: String,
    pub storage_path: String,
    pub s3_url: String,
    pub mimetype: String,
    pub size: u64,
    pub s3_config_id: String,
    /// `M-` followed by the first five characters of the id.
    pub slug: String,
    pub etag: Option<String>,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl FileRecord {
    pub fn slug_for(id: &str) -> String {
        format!("M-{}", &id[..id.len().min(5)])
    }
}

// ── Presigned URLs ───────────────────────────────────────────────────────────

pub const DEFAULT_PRESIGN_EXPIRES_SECS: u64 = 604_800; // 7 days

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PresignMethod {
    Get,
    Put,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignOptions {
    pub method: PresignMethod,
    pub expires_in_secs: u64,
    pub force_download: bool,
}

impl Default for PresignOptions {
    fn default() -> Self {
        Self {
            method: PresignMethod::Get,
            expires_in_secs: DEFAULT_PRESIGN_EXPIRES_SECS,
            force_download: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignedUrl {
    pub url: String,
    pub method: PresignMethod,
    pub expires_in_secs: u64,
    pub key: String,
}

// ── Multipart ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartUrl {
    pub part_number: i32,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartInit {
    pub upload_id: String,
    pub key: String,
    pub path: String,
    pub part_size: u64,
    pub part_count: i32,
    pub part_urls: Vec<PartUrl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedPartSpec {
    pub part_number: i32,
    pub etag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartUploadInfo {
    pub key: String,
    pub upload_id: String,
    /// Epoch milliseconds.
    pub initiated: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartInfo {
    pub part_number: i32,
    pub size: u64,
    pub etag: Option<String>,
    pub modified: i64,
}

// ── Copy results ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopyStats {
    pub copied: u32,
    pub skipped: u32,
}

/// A copy whose source and destination live on different storage configs.
/// The engine hands back a presigned pair; the caller moves the bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossStorageCopy {
    pub source_path: String,
    pub target_path: String,
    pub get_url: String,
    pub put_url: String,
    pub metadata: FileInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CopyOutcome {
    Local { stats: CopyStats },
    CrossStorage(CrossStorageCopy),
}

// ── Batch results ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchRemoveResult {
    pub success: u32,
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyItemSpec {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyDetail {
    pub source: String,
    pub destination: String,
    pub status: String, // "copied" | "skipped" | "failed" | "cross-storage"
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchCopyResult {
    pub success: u32,
    pub skipped: u32,
    pub failed: Vec<BatchFailure>,
    pub details: Vec<CopyDetail>,
    pub cross_storage_results: Vec<CrossStorageCopy>,
}

// ── Search ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Global,
    Mount,
    Directory,
}

impl SearchScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchScope::Global => "global",
            SearchScope::Mount => "mount",
            SearchScope::Directory => "directory",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub scope: SearchScope,
    /// Mount id for `mount` scope, logical directory for `directory` scope.
    pub scope_target: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            scope: SearchScope::Global,
            scope_target: None,
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    /// Epoch milliseconds.
    pub modified: i64,
    pub mount_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub total: u64,
    pub offset: i64,
    pub limit: i64,
    pub hits: Vec<SearchHit>,
}

// ── FsError ──────────────────────────────────────────────────────────────────

/// Typed failure of every engine operation, mapped 1:1 onto the HTTP codes
/// of the JSON surface.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("not implemented: {0}")]
    Unimplemented(String),

    #[error("provider transient error ({status}): {message}")]
    ProviderTransient { status: u16, message: String },

    #[error("provider error ({status}): {message}")]
    ProviderPermanent { status: u16, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("internal: {0}")]
    Internal(String),
}

impl FsError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        FsError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        FsError::Conflict(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        FsError::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        FsError::Internal(msg.into())
    }

    /// Standard message for an operation a driver does not support.
    pub fn unsupported(storage_type: StorageType, cap: Capability) -> Self {
        FsError::Unimplemented(format!(
            "storage driver {} does not support {}",
            storage_type, cap
        ))
    }

    pub fn code(&self) -> &'static str {
        match self {
            FsError::NotFound(_) => "NOT_FOUND",
            FsError::Conflict(_) => "CONFLICT",
            FsError::BadRequest(_) => "BAD_REQUEST",
            FsError::Forbidden(_) => "FORBIDDEN",
            FsError::Unauthenticated(_) => "UNAUTHENTICATED",
            FsError::Unimplemented(_) => "UNIMPLEMENTED",
            FsError::ProviderTransient { .. } => "PROVIDER_TRANSIENT",
            FsError::ProviderPermanent { .. } => "PROVIDER_PERMANENT",
            FsError::Cancelled => "CANCELLED",
            FsError::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status the JSON and WebDAV surfaces answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            FsError::NotFound(_) => 404,
            FsError::Conflict(_) => 409,
            FsError::BadRequest(_) => 400,
            FsError::Forbidden(_) => 403,
            FsError::Unauthenticated(_) => 401,
            FsError::Unimplemented(_) => 501,
            FsError::ProviderTransient { .. } => 502,
            FsError::ProviderPermanent { status, .. } => {
                if *status >= 400 {
                    *status
                } else {
                    500
                }
            }
            FsError::Cancelled => 499,
            FsError::Internal(_) => 500,
        }
    }
}

impl Serialize for FsError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("FsError", 3)?;
        s.serialize_field("code", self.code())?;
        s.serialize_field("status", &self.http_status())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        FsError::Internal(format!("I/O error: {}", e))
    }
}

// ── Time helper ──────────────────────────────────────────────────────────────

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
