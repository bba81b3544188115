use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::Client as S3Client;

use crate::models::{FsError, S3Config};

// ── Constants ────────────────────────────────────────────────────────────────

/// Preferred multipart part size; grows for very large objects so the part
/// count stays inside the provider's 10 000 limit.
pub const PART_SIZE: u64 = 8 * 1024 * 1024; // 8 MiB

/// Max keys per DeleteObjects request (provider limit).
pub const DELETE_BATCH: usize = 1000;

/// Cap on raw search hits returned by a single driver walk.
pub const MAX_SEARCH_RESULTS: usize = 1000;

/// Content type of zero-byte directory placeholder objects.
pub const DIRECTORY_CONTENT_TYPE: &str = "application/x-directory";

/// Extensions refused on upload. Closed set; matching is case-insensitive.
pub const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "dll", "com", "msi", "scr", "bat", "cmd", "ps1", "sh", "vbs", "jar",
];

// ── Error mapping ────────────────────────────────────────────────────────────

/// HTTP status of an SDK error, when the provider answered at all.
pub fn sdk_status<E>(err: &SdkError<E>) -> Option<u16> {
    err.raw_response().map(|r| r.status().as_u16())
}

/// Translate an SDK error into the engine's closed error set. 404 becomes
/// `NotFound`; 5xx and throttling codes are transient; everything else is a
/// permanent provider error carrying the original status.
pub fn s3_err<E>(what: &str, err: SdkError<E>) -> FsError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = sdk_status(&err).unwrap_or(0);
    let code = err.code().unwrap_or("UnknownError").to_string();
    let detail = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    let message = format!("{}: {}: {}", what, code, detail);

    if status == 404 || code == "NoSuchKey" || code == "NotFound" {
        return FsError::NotFound(message);
    }
    let transient = status >= 500
        || matches!(code.as_str(), "SlowDown" | "RequestTimeout" | "Throttling" | "ServiceUnavailable");
    if transient {
        FsError::ProviderTransient { status, message }
    } else {
        FsError::ProviderPermanent { status, message }
    }
}

// ── Key building ─────────────────────────────────────────────────────────────

/// Normalize a prefix component to `a/b/` form (trailing slash, no leading
/// slash). Empty stays empty.
fn prefix_component(component: &str) -> String {
    let trimmed = component.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Bucket-side prefix of a config: `root_prefix + default_folder`.
pub fn config_prefix(config: &S3Config) -> String {
    format!(
        "{}{}",
        prefix_component(&config.root_prefix),
        prefix_component(&config.default_folder)
    )
}

/// Object key for a file sub-path (`/a/x.txt` → `<prefix>a/x.txt`).
pub fn object_key(config: &S3Config, sub_path: &str) -> String {
    let rel = sub_path.trim_start_matches('/').trim_end_matches('/');
    format!("{}{}", config_prefix(config), rel)
}

/// Directory key / listing prefix for a sub-path (always trailing slash;
/// the mount root maps to the bare config prefix).
pub fn dir_key(config: &S3Config, sub_path: &str) -> String {
    let rel = sub_path.trim_matches('/');
    if rel.is_empty() {
        config_prefix(config)
    } else {
        format!("{}{}/", config_prefix(config), rel)
    }
}

/// Map an object key back to the sub-path under a config, preserving a
/// trailing slash. None when the key is outside the config prefix.
pub fn key_to_sub_path(config: &S3Config, key: &str) -> Option<String> {
    let prefix = config_prefix(config);
    let rel = key.strip_prefix(&prefix)?;
    Some(format!("/{}", rel))
}

/// Public object URL recorded on file records. Path-style when the config
/// asks for it or when a custom endpoint is set.
pub fn object_url(config: &S3Config, key: &str) -> String {
    if !config.endpoint.is_empty() {
        let endpoint = config.endpoint.trim_end_matches('/');
        format!("{}/{}/{}", endpoint, config.bucket, key)
    } else {
        format!("https://{}.s3.{}.amazonaws.com/{}", config.bucket, config.region, key)
    }
}

/// CopySource value with each segment percent-encoded, slashes preserved.
pub fn encode_copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<String> = key
        .split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect();
    format!("{}/{}", bucket, encoded.join("/"))
}

// ── Content metadata ─────────────────────────────────────────────────────────

/// Strip the surrounding quotes providers put on ETag values.
pub fn strip_etag_quotes(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

/// Whether a filename falls in the refused executable group.
pub fn is_executable_filename(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_ascii_lowercase();
            EXECUTABLE_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

/// Resolve the Content-Type for an upload: the caller's MIME wins, then the
/// filename guess, then octet-stream.
pub fn resolve_content_type(file_name: &str, provided: Option<&str>) -> String {
    if let Some(mime) = provided {
        if !mime.is_empty() {
            return mime.to_string();
        }
    }
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// Content-Disposition with an RFC 5987 encoded filename.
pub fn content_disposition(inline: bool, file_name: &str) -> String {
    let kind = if inline { "inline" } else { "attachment" };
    format!(
        "{}; filename*=UTF-8''{}",
        kind,
        urlencoding::encode(file_name)
    )
}

// ── Listing ──────────────────────────────────────────────────────────────────

/// One object seen during a full prefix walk.
#[derive(Debug, Clone)]
pub struct RawObject {
    pub key: String,
    pub size: u64,
    pub modified: i64,
    pub etag: Option<String>,
}

/// List ALL objects under a prefix, following continuation tokens.
pub async fn list_all_objects(
    client: &S3Client,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<RawObject>, FsError> {
    let mut results = Vec::new();
    let mut continuation_token: Option<String> = None;

    loop {
        let mut req = client.list_objects_v2().bucket(bucket).prefix(prefix);
        if let Some(token) = &continuation_token {
            req = req.continuation_token(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| s3_err("list objects", e))?;

        for obj in resp.contents() {
            let key = obj.key().unwrap_or_default().to_string();
            if key.is_empty() {
                continue;
            }
            results.push(RawObject {
                key,
                size: obj.size().unwrap_or(0) as u64,
                modified: obj
                    .last_modified()
                    .and_then(|t| t.to_millis().ok())
                    .unwrap_or(0),
                etag: obj.e_tag().map(strip_etag_quotes),
            });
        }

        if resp.is_truncated() == Some(true) {
            continuation_token = resp.next_continuation_token().map(|s| s.to_string());
        } else {
            break;
        }
    }

    Ok(results)
}

/// Whether anything (object or nested key) exists under a prefix.
pub async fn prefix_is_occupied(
    client: &S3Client,
    bucket: &str,
    prefix: &str,
) -> Result<bool, FsError> {
    let resp = client
        .list_objects_v2()
        .bucket(bucket)
        .prefix(prefix)
        .max_keys(1)
        .send()
        .await
        .map_err(|e| s3_err("probe prefix", e))?;
    Ok(!resp.contents().is_empty() || !resp.common_prefixes().is_empty())
}

/// Multipart part size for an object of `size` bytes, respecting the
/// 10 000-part provider limit.
pub fn multipart_part_size(size: u64) -> u64 {
    std::cmp::max(PART_SIZE, size / 10_000 + 1)
}

/// Number of parts for an object of `size` bytes (at least one).
pub fn multipart_part_count(size: u64, part_size: u64) -> i32 {
    std::cmp::max(1, ((size + part_size - 1) / part_size) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &str, folder: &str) -> S3Config {
        S3Config {
            id: "cfg".into(),
            name: "n".into(),
            endpoint: "https://minio.local:9000".into(),
            region: "us-east-1".into(),
            bucket: "b".into(),
            access_key_id: "AK".into(),
            encrypted_secret_key: "v1:x".into(),
            path_style: true,
            root_prefix: root.into(),
            default_folder: folder.into(),
            provider_type: "minio".into(),
            signature_version: "v4".into(),
        }
    }

    #[test]
    fn keys_combine_root_and_folder() {
        let cfg = config("root", "inbox");
        assert_eq!(object_key(&cfg, "/a/x.txt"), "root/inbox/a/x.txt");
        assert_eq!(dir_key(&cfg, "/a/"), "root/inbox/a/");
        assert_eq!(dir_key(&cfg, "/"), "root/inbox/");
    }

    #[test]
    fn empty_prefixes_collapse() {
        let cfg = config("", "");
        assert_eq!(object_key(&cfg, "/x.txt"), "x.txt");
        assert_eq!(dir_key(&cfg, "/"), "");
    }

    #[test]
    fn prefixes_tolerate_stray_slashes() {
        let cfg = config("/root/", "inbox/");
        assert_eq!(config_prefix(&cfg), "root/inbox/");
    }

    #[test]
    fn key_round_trips_to_sub_path() {
        let cfg = config("root", "");
        assert_eq!(key_to_sub_path(&cfg, "root/a/x.txt").unwrap(), "/a/x.txt");
        assert_eq!(key_to_sub_path(&cfg, "root/a/").unwrap(), "/a/");
        assert!(key_to_sub_path(&cfg, "elsewhere/x.txt").is_none());
    }

    #[test]
    fn copy_source_encodes_segments_not_slashes() {
        assert_eq!(
            encode_copy_source("b", "root/has space/x+y.txt"),
            "b/root/has%20space/x%2By.txt"
        );
    }

    #[test]
    fn etag_quotes_are_stripped() {
        assert_eq!(strip_etag_quotes("\"abc123\""), "abc123");
        assert_eq!(strip_etag_quotes("abc123"), "abc123");
    }

    #[test]
    fn executables_are_detected_case_insensitively() {
        assert!(is_executable_filename("setup.EXE"));
        assert!(is_executable_filename("run.sh"));
        assert!(!is_executable_filename("notes.txt"));
        assert!(!is_executable_filename("Makefile"));
    }

    #[test]
    fn content_type_prefers_caller_value() {
        assert_eq!(resolve_content_type("a.txt", Some("text/markdown")), "text/markdown");
        assert_eq!(resolve_content_type("a.txt", None), "text/plain");
        assert_eq!(resolve_content_type("blob", None), "application/octet-stream");
    }

    #[test]
    fn disposition_encodes_filename() {
        assert_eq!(
            content_disposition(false, "my report.pdf"),
            "attachment; filename*=UTF-8''my%20report.pdf"
        );
        assert!(content_disposition(true, "x.png").starts_with("inline;"));
    }

    #[test]
    fn part_sizing_respects_limits() {
        assert_eq!(multipart_part_size(10 * 1024 * 1024), PART_SIZE);
        let huge = 100 * 1024 * 1024 * 1024u64; // 100 GiB
        let part = multipart_part_size(huge);
        assert!(multipart_part_count(huge, part) <= 10_000);
        assert_eq!(multipart_part_count(0, PART_SIZE), 1);
    }

    #[test]
    fn object_url_uses_endpoint_when_set() {
        let cfg = config("root", "");
        assert_eq!(
            object_url(&cfg, "root/a/x.txt"),
            "https://minio.local:9000/b/root/a/x.txt"
        );
        let mut aws = config("", "");
        aws.endpoint = String::new();
        assert_eq!(
            object_url(&aws, "x.txt"),
            "https://b.s3.us-east-1.amazonaws.com/x.txt"
        );
    }
}
