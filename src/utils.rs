/*!
 * Utility functions for nerdstore
 */

use std::fs;
use std::io;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, ResultExt};

static ARK_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ark:/\d+/").unwrap());

/// Read and parse a JSON document
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).with_context(|| format!("{}: unparseable JSON", path.display()))
}

/// Read a JSON document if the file exists
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .with_context(|| format!("{}: unparseable JSON", path.display())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write a JSON document, replacing the target atomically
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> io::Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)
}

/// Last segment of a slash-delimited path
pub fn basename(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    path.rsplit('/').next().unwrap_or(path)
}

/// Everything before the last segment; empty for top-level paths
pub fn dirname(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(pos) => &path[..pos],
        None => "",
    }
}

/// Every proper ancestor of a path, nearest first
///
/// `"a/b/c.txt"` yields `["a/b", "a"]`.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = dirname(path);
    while !current.is_empty() {
        out.push(current);
        current = dirname(current);
    }
    out
}

/// Number of segments in a path
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Identifier with any ARK prefix removed
pub fn local_id(id: &str) -> &str {
    match ARK_PREFIX.find(id) {
        Some(m) => &id[m.end()..],
        None => id,
    }
}

/// Turn an identifier into something usable as a file name
pub fn id_to_filename(id: &str) -> String {
    id.replace('/', "::")
}

/// Inverse of [`id_to_filename`]
pub fn filename_to_id(name: &str) -> String {
    name.replace("::", "/")
}

/// Format a human-readable file size
pub fn format_file_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NerdStoreError;
    use tempfile::tempdir;

    #[test]
    fn test_path_helpers() {
        assert_eq!(basename("a/b/c.txt"), "c.txt");
        assert_eq!(basename("top"), "top");
        assert_eq!(dirname("a/b/c.txt"), "a/b");
        assert_eq!(dirname("top"), "");
        assert_eq!(ancestors("a/b/c.txt"), vec!["a/b", "a"]);
        assert!(ancestors("c.txt").is_empty());
        assert_eq!(depth("a/b/c"), 3);
    }

    #[test]
    fn test_ids_and_filenames() {
        assert_eq!(local_id("ark:/88434/mds3-0001"), "mds3-0001");
        assert_eq!(local_id("nrd:0001"), "nrd:0001");
        let name = id_to_filename("pdr0/x");
        assert_eq!(name, "pdr0::x");
        assert_eq!(filename_to_id(&name), "pdr0/x");
    }

    #[test]
    fn test_json_round_trip_through_disk() -> io::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("_ids.json");
        write_json(&vec!["auth_0", "auth_1"], &path)?;
        let ids: Vec<String> = read_json(&path)?;
        assert_eq!(ids, vec!["auth_0", "auth_1"]);
        assert!(!path.with_extension("json.tmp").exists());

        let missing: Option<Vec<String>> = read_json_opt(&dir.path().join("nope.json"))?;
        assert!(missing.is_none());
        Ok(())
    }

    #[test]
    fn test_corrupt_json_is_storage_format_error() -> io::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("res.json");
        fs::write(&path, "{not json")?;
        let err = read_json::<serde_json::Value>(&path).unwrap_err();
        assert!(matches!(err, NerdStoreError::StorageFormat(_)));
        Ok(())
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(100), "100 bytes");
        assert_eq!(format_file_size(2048), "2.00 KB");
    }
}
