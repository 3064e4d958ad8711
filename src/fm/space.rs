/*!
 * On-disk layout of a local user space
 *
 * ```text
 * <spaces_dir>/<id>/<id>/                   uploaded files
 * <spaces_dir>/<id>/<id>-sys/               scan reports and bookkeeping
 * <spaces_dir>/<id>/<id>-sys/space_summary.json
 * <spaces_dir>/<id>/<id>-sys/lastgoodscan.json
 * <spaces_dir>/<id>/<id>-sys/scan-report-<scan_id>.json
 * ```
 */

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::fm::error::{FileManagerError, FmResult};
use crate::types::ScanReport;
use crate::utils::write_json;

const SUMMARY_FILE: &str = "space_summary.json";
const LAST_GOOD_SCAN_FILE: &str = "lastgoodscan.json";

/// A user space rooted under a spaces directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpace {
    root: PathBuf,
    id: String,
}

impl UserSpace {
    pub fn new(spaces_dir: impl AsRef<Path>, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            root: spaces_dir.as_ref().join(&id),
            id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Folder users upload into
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(&self.id)
    }

    /// Folder for scan reports and other bookkeeping
    pub fn system_dir(&self) -> PathBuf {
        self.root.join(format!("{}-sys", self.id))
    }

    /// Prefix carried by the paths in this space's scan reports
    pub fn folder_path(&self) -> String {
        format!("/{}/{}", self.id, self.id)
    }

    pub fn summary_file(&self) -> PathBuf {
        self.system_dir().join(SUMMARY_FILE)
    }

    pub fn exists(&self) -> bool {
        self.uploads_dir().is_dir() && self.system_dir().is_dir()
    }

    /// Create the space's folders
    pub fn create(&self) -> FmResult<()> {
        if self.exists() {
            return Err(FileManagerError::Client(format!(
                "space {} already exists",
                self.id
            )));
        }
        fs::create_dir_all(self.uploads_dir())?;
        fs::create_dir_all(self.system_dir())?;
        debug!(space = %self.id, root = %self.root.display(), "created space folders");
        Ok(())
    }

    pub fn report_path(&self, scan_id: &str) -> PathBuf {
        self.system_dir()
            .join(format!("scan-report-{}.json", scan_id))
    }

    pub fn save_report(&self, report: &ScanReport) -> FmResult<()> {
        write_json(report, &self.report_path(&report.scan_id))?;
        Ok(())
    }

    pub fn load_report(&self, scan_id: &str) -> FmResult<ScanReport> {
        read_report(&self.report_path(scan_id))?
            .ok_or_else(|| FileManagerError::ResourceNotFound(format!("scan {}", scan_id)))
    }

    /// Remove a saved report; false if there was none
    pub fn delete_report(&self, scan_id: &str) -> FmResult<bool> {
        match fs::remove_file(self.report_path(scan_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Report of the last scan that ran to completion
    pub fn last_good_scan(&self) -> FmResult<Option<ScanReport>> {
        read_report(&self.system_dir().join(LAST_GOOD_SCAN_FILE))
    }

    pub fn save_last_good_scan(&self, report: &ScanReport) -> FmResult<()> {
        write_json(report, &self.system_dir().join(LAST_GOOD_SCAN_FILE))?;
        Ok(())
    }
}

fn read_report(path: &Path) -> FmResult<Option<ScanReport>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
