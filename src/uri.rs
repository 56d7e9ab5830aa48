//! URI helpers
//!
//! Local resources and documents are addressed with `file://` URIs, remote
//! ones with `http(s)://` URLs. Chunk units carry a `__part_N` suffix on
//! their parent document id.

use std::path::{Path, PathBuf};
use url::Url;

pub const PART_MARKER: &str = "__part_";

/// Check if the URI addresses the local filesystem
pub fn is_local(uri: &str) -> bool {
    uri.starts_with("file://")
}

/// Check if the URI is an HTTP or HTTPS URL
pub fn is_remote(uri: &str) -> bool {
    uri.starts_with("https://") || uri.starts_with("http://")
}

/// Convert a `file://` URI to a filesystem path
pub fn uri_to_path(uri: &str) -> PathBuf {
    if let Some(path) = Url::parse(uri).ok().and_then(|u| u.to_file_path().ok()) {
        return path;
    }
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

/// Convert an absolute filesystem path to a `file://` URI
pub fn path_to_uri(path: &Path) -> String {
    Url::from_file_path(path)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("file://{}", path.display()))
}

/// Id of chunk `index` of a parent document
pub fn part_id(parent_id: &str, index: usize) -> String {
    format!("{}{}{}", parent_id, PART_MARKER, index)
}

/// Recover the parent document id from a chunk id; other ids map to themselves
pub fn parent_document_id(document_id: &str) -> &str {
    match document_id.rsplit_once(PART_MARKER) {
        Some((parent, index))
            if !parent.is_empty()
                && !index.is_empty()
                && index.bytes().all(|b| b.is_ascii_digit()) =>
        {
            parent
        }
        _ => document_id,
    }
}

/// Normalize a remote scope so prefix checks stop at a path boundary
pub fn with_trailing_slash(uri: &str) -> String {
    if uri.ends_with('/') {
        uri.to_string()
    } else {
        format!("{}/", uri)
    }
}
