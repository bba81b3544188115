//! Logical path canonicalization. A logical path is absolute and
//! slash-delimited; a trailing slash marks a directory reference. These
//! helpers are pure and never touch I/O.

use crate::models::FsError;

/// Canonicalize a logical path: leading slash, collapsed separators, no
/// `..` traversal. When `is_dir` is set the result carries a trailing slash.
pub fn normalize(path: &str, is_dir: bool) -> Result<String, FsError> {
    if path.contains('\0') {
        return Err(FsError::bad_request("path contains a NUL byte"));
    }

    let wants_dir = is_dir || path.ends_with('/') || path.is_empty();

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(FsError::bad_request(format!(
                    "path '{}' contains a '..' segment",
                    path
                )))
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Ok("/".to_string());
    }

    let mut out = String::with_capacity(path.len() + 2);
    for segment in &segments {
        out.push('/');
        out.push_str(segment);
    }
    if wants_dir {
        out.push('/');
    }
    Ok(out)
}

/// Whether the path refers to a directory (trailing slash).
pub fn is_dir_ref(path: &str) -> bool {
    path.ends_with('/')
}

/// Parent directory of a path, always in directory form. The parent of the
/// root is the root itself.
pub fn parent_of(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(pos) => format!("{}/", &trimmed[..pos]),
    }
}

/// Last path component, without any trailing slash. Empty for the root.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    }
}

/// Join a base path and a relative name, preserving the name's trailing
/// slash so directory references survive the join.
pub fn join(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if name.is_empty() {
        return if base.is_empty() { "/".to_string() } else { format!("{}/", base) };
    }
    format!("{}/{}", base, name)
}

/// All directory sub-paths from `sub_path`'s own directory up to `/`,
/// nearest first. For a file path the walk starts at its containing
/// directory; for a directory path at the directory itself.
pub fn ancestor_chain(sub_path: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = if is_dir_ref(sub_path) {
        sub_path.to_string()
    } else {
        parent_of(sub_path)
    };

    loop {
        chain.push(current.clone());
        if current == "/" {
            break;
        }
        current = parent_of(&current);
    }
    chain
}
