use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;

use crate::models::{FsError, S3Config};

/// Build an S3 client for one storage configuration with its freshly
/// decrypted secret. Custom endpoints get path-style addressing unless the
/// config says otherwise.
pub async fn build_s3_client(config: &S3Config, secret_key: &str) -> Result<S3Client, FsError> {
    if config.access_key_id.is_empty() {
        return Err(FsError::bad_request(format!(
            "config '{}' has no access key",
            config.id
        )));
    }

    let creds = aws_credential_types::Credentials::new(
        config.access_key_id.clone(),
        secret_key.to_string(),
        None,
        None,
        "cloudfs-config",
    );

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()))
        .credentials_provider(creds);

    if !config.endpoint.is_empty() {
        loader = loader.endpoint_url(&config.endpoint);
    }

    let shared = loader.load().await;

    let mut builder = aws_sdk_s3::config::Builder::from(&shared);
    if config.path_style || !config.endpoint.is_empty() {
        builder = builder.force_path_style(true);
    }

    Ok(S3Client::from_conf(builder.build()))
}
