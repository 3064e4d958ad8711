/*!
 * File manager interface
 *
 * A file manager hosts one "space" per record: a folder users upload files
 * into. The record's file hierarchy is kept in step with its space by
 * scanning the space and reconciling the scan report.
 */

mod error;
pub mod local;
pub mod space;

pub use error::{FileManagerError, FmResult};
pub use local::LocalFileManager;
pub use space::UserSpace;

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::ScanReport;

/// Description of one space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceSummary {
    pub space_id: String,
    /// File id of the folder users upload into
    pub uploads_dir_id: String,
    /// Path prefix carried by scan report entries
    pub fm_folder_path: String,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub last_scan_id: Option<String>,
}

/// Operations a record needs from a file manager
pub trait FileManager: Send + Sync {
    /// Create a space, returning its summary; fails if it already exists
    fn create_space(&self, space_id: &str) -> FmResult<SpaceSummary>;

    fn space_exists(&self, space_id: &str) -> FmResult<bool>;

    fn summarize_space(&self, space_id: &str) -> FmResult<SpaceSummary>;

    /// Launch a scan of the space, returning its id once the first report is available
    fn start_scan(&self, space_id: &str) -> FmResult<String>;

    /// Latest report of a scan
    fn get_scan(&self, space_id: &str, scan_id: &str) -> FmResult<ScanReport>;

    fn delete_scan(&self, space_id: &str, scan_id: &str) -> FmResult<()>;

    /// File id of the space's uploads folder
    fn uploads_dir_id(&self, space_id: &str) -> FmResult<String> {
        Ok(self.summarize_space(space_id)?.uploads_dir_id)
    }
}

/// File-manager view of a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub fileid: String,
    pub etag: String,
    pub size: u64,
}

/// Where the slow scan gets file-manager metadata for a file
pub trait ResourceInfoSource: Send + Sync {
    fn resource_info(&self, path: &Path) -> FmResult<ResourceInfo>;
}

/// Derives resource info from the local filesystem
///
/// The file id is the inode number and the etag changes whenever the
/// modification time or size does.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalResourceInfo;

impl LocalResourceInfo {
    pub fn fileid(meta: &fs::Metadata) -> String {
        meta.ino().to_string()
    }
}

impl ResourceInfoSource for LocalResourceInfo {
    fn resource_info(&self, path: &Path) -> FmResult<ResourceInfo> {
        let meta = fs::metadata(path)?;
        let mtime_ns = meta.mtime() as i128 * 1_000_000_000 + meta.mtime_nsec() as i128;
        Ok(ResourceInfo {
            fileid: Self::fileid(&meta),
            etag: format!("{:x}-{:x}", mtime_ns, meta.size()),
            size: meta.size(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::io;
    use tempfile::tempdir;

    #[test]
    fn test_local_etag_tracks_modification() -> io::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("data.csv");
        fs::write(&path, "a,b\n")?;
        set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000, 0))?;
        let before = LocalResourceInfo.resource_info(&path)?;
        assert_eq!(before.size, 4);

        set_file_mtime(&path, FileTime::from_unix_time(1_700_000_100, 0))?;
        let after = LocalResourceInfo.resource_info(&path)?;
        assert_ne!(before.etag, after.etag);
        assert_eq!(before.fileid, after.fileid);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = LocalResourceInfo
            .resource_info(Path::new("/definitely/not/here"))
            .unwrap_err();
        assert!(matches!(err, FileManagerError::Io(_)));
    }
}
