pub mod client;
pub mod driver;
pub mod helpers;

pub use client::build_s3_client;
pub use driver::{S3Driver, S3DriverFactory};
