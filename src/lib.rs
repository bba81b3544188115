//! cloudfs — a multi-tenant virtual filesystem engine over S3-compatible
//! object storage.
//!
//! Logical paths resolve through per-principal mount tables to object keys
//! on a configured bucket; drivers translate directory semantics onto the
//! flat keyspace and keep a short-TTL directory cache coherent across
//! mutations. The HTTP layer, authentication and the relational store stay
//! outside, consumed through the repository traits in [`store`] and the
//! typed request/response structs in [`models`].

pub mod cache;
pub mod driver;
pub mod fs;
pub mod models;
pub mod mount;
pub mod path;
pub mod s3;
pub mod store;
pub mod webdav;

pub use cache::{Clock, DirectoryCache, SearchCache, SystemClock};
pub use driver::{DriverDeps, DriverFactory, FileDownload, StorageDriver};
pub use fs::{CancelFlag, FileSystem};
pub use models::{
    Capability, CapabilitySet, DirListing, FileEntry, FileInfo, FsError, Mount, Principal,
    S3Config, StorageType,
};
pub use mount::{MountManager, MountRegistry};
pub use s3::{S3Driver, S3DriverFactory};
pub use webdav::{DavConfig, WebDavAdapter};
