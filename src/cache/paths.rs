// Cache path and key utilities.
// Derives deterministic, path-safe cache keys from request identity.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Request parameter that carries the credential; never part of a cache key.
pub const TOKEN_PARAM: &str = "oauth_token";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "glitchq")
}

/// Get the base cache directory (~/.cache/glitchq on Linux).
pub fn cache_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.cache_dir().to_path_buf())
}

/// Get the configuration directory (~/.config/glitchq on Linux).
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Cache key for one API request: endpoint plus its sorted parameters.
///
/// `BTreeMap` iteration is ordered, so equal parameter sets always produce
/// the same key regardless of insertion order. Names and values are
/// percent-encoded before joining, so distinct requests never share a key.
pub fn request_key(endpoint: &str, params: &BTreeMap<String, String>) -> String {
    let query = params
        .iter()
        .filter(|(k, _)| k.as_str() != TOKEN_PARAM)
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let endpoint = urlencoding::encode(endpoint);
    if query.is_empty() {
        format!("requests/{}/_", endpoint)
    } else {
        format!("requests/{}/{}", endpoint, query)
    }
}

/// File holding the entry for `key` under `root`.
///
/// Keys may contain `/` to form a directory tree; every segment is
/// sanitized and `..` segments are neutralized.
pub fn entry_path(root: &Path, key: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();

    if segments.is_empty() {
        return path.join("_.json");
    }

    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        let name = match *segment {
            "." | ".." => "_".to_string(),
            other => sanitize_name(other),
        };
        if i == last {
            path.push(format!("{}.json", name));
        } else {
            path.push(name);
        }
    }
    path
}

/// Sanitize a name for use in filesystem paths.
/// Replaces problematic characters with underscores.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            _ => c,
        })
        .collect()
}
