/*!
 * File manager backed by a local directory
 */

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::fm::error::{FileManagerError, FmResult};
use crate::fm::space::UserSpace;
use crate::fm::{FileManager, LocalResourceInfo, SpaceSummary};
use crate::scan::{ScanDriver, ScanSettings};
use crate::types::ScanReport;
use crate::utils::write_json;

/// A [`FileManager`] whose spaces are folders under one directory
pub struct LocalFileManager {
    spaces_dir: PathBuf,
    driver: ScanDriver,
}

impl LocalFileManager {
    pub fn new(spaces_dir: impl Into<PathBuf>, settings: ScanSettings) -> io::Result<Self> {
        Self::with_driver(spaces_dir, ScanDriver::new(settings))
    }

    pub fn with_driver(spaces_dir: impl Into<PathBuf>, driver: ScanDriver) -> io::Result<Self> {
        let spaces_dir = spaces_dir.into();
        fs::create_dir_all(&spaces_dir)?;
        Ok(Self { spaces_dir, driver })
    }

    pub fn spaces_dir(&self) -> &Path {
        &self.spaces_dir
    }

    pub fn space(&self, space_id: &str) -> UserSpace {
        UserSpace::new(&self.spaces_dir, space_id)
    }

    pub fn driver(&self) -> &ScanDriver {
        &self.driver
    }

    fn existing_space(&self, space_id: &str) -> FmResult<UserSpace> {
        let space = self.space(space_id);
        if !space.exists() {
            return Err(FileManagerError::ResourceNotFound(format!("space {}", space_id)));
        }
        Ok(space)
    }

    fn fresh_summary(space: &UserSpace) -> FmResult<SpaceSummary> {
        let meta = fs::metadata(space.uploads_dir())?;
        Ok(SpaceSummary {
            space_id: space.id().to_string(),
            uploads_dir_id: LocalResourceInfo::fileid(&meta),
            fm_folder_path: space.folder_path(),
            created: Some(Utc::now().to_rfc3339()),
            last_scan_id: None,
        })
    }

    fn save_summary(space: &UserSpace, summary: &SpaceSummary) -> FmResult<()> {
        write_json(summary, &space.summary_file())?;
        Ok(())
    }
}

impl FileManager for LocalFileManager {
    fn create_space(&self, space_id: &str) -> FmResult<SpaceSummary> {
        let space = self.space(space_id);
        space.create()?;
        let summary = Self::fresh_summary(&space)?;
        Self::save_summary(&space, &summary)?;
        info!(space = space_id, "created space");
        Ok(summary)
    }

    fn space_exists(&self, space_id: &str) -> FmResult<bool> {
        Ok(self.space(space_id).exists())
    }

    fn summarize_space(&self, space_id: &str) -> FmResult<SpaceSummary> {
        let space = self.existing_space(space_id)?;
        match fs::read(space.summary_file()) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(space = space_id, "space summary missing; regenerating");
                let summary = Self::fresh_summary(&space)?;
                Self::save_summary(&space, &summary)?;
                Ok(summary)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn start_scan(&self, space_id: &str) -> FmResult<String> {
        let space = self.existing_space(space_id)?;
        let mut summary = self.summarize_space(space_id)?;
        let report = self.driver.launch_scan(space.clone(), None)?;
        summary.last_scan_id = Some(report.scan_id.clone());
        Self::save_summary(&space, &summary)?;
        Ok(report.scan_id)
    }

    fn get_scan(&self, space_id: &str, scan_id: &str) -> FmResult<ScanReport> {
        self.existing_space(space_id)?.load_report(scan_id)
    }

    fn delete_scan(&self, space_id: &str, scan_id: &str) -> FmResult<()> {
        let space = self.existing_space(space_id)?;
        let registry = self.driver.registry();
        if registry.current_scan_id(space_id).as_deref() == Some(scan_id) {
            registry.cancel(space_id);
            registry.wait(space_id)?;
        }
        if !space.delete_report(scan_id)? {
            return Err(FileManagerError::ResourceNotFound(format!("scan {}", scan_id)));
        }
        debug!(space = space_id, scan = scan_id, "deleted scan report");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ScanPhase;
    use tempfile::tempdir;

    #[test]
    fn test_space_lifecycle() -> io::Result<()> {
        let dir = tempdir()?;
        let fm = LocalFileManager::new(dir.path(), ScanSettings::default())?;
        assert!(!fm.space_exists("p1")?);
        assert!(matches!(
            fm.summarize_space("p1"),
            Err(FileManagerError::ResourceNotFound(_))
        ));

        let created = fm.create_space("p1")?;
        assert_eq!(created.fm_folder_path, "/p1/p1");
        assert!(fm.space_exists("p1")?);
        assert_eq!(fm.uploads_dir_id("p1")?, created.uploads_dir_id);
        assert!(fm.create_space("p1").is_err());

        fs::remove_file(fm.space("p1").summary_file())?;
        assert_eq!(fm.summarize_space("p1")?.uploads_dir_id, created.uploads_dir_id);
        Ok(())
    }

    #[test]
    fn test_scan_round_trip() -> io::Result<()> {
        let dir = tempdir()?;
        let fm = LocalFileManager::new(dir.path(), ScanSettings::default())?;
        fm.create_space("p2")?;
        fs::write(fm.space("p2").uploads_dir().join("x.dat"), "xyz")?;

        let scan_id = fm.start_scan("p2")?;
        assert_eq!(fm.summarize_space("p2")?.last_scan_id.as_deref(), Some(scan_id.as_str()));
        assert_eq!(fm.driver().registry().wait("p2")?, Some(ScanPhase::SlowScanDone));

        let report = fm.get_scan("p2", &scan_id)?;
        assert!(report.is_complete);
        assert_eq!(report.file_count(), 1);

        fm.delete_scan("p2", &scan_id)?;
        assert!(matches!(
            fm.get_scan("p2", &scan_id),
            Err(FileManagerError::ResourceNotFound(_))
        ));
        assert!(fm.delete_scan("p2", &scan_id).is_err());
        Ok(())
    }
}
