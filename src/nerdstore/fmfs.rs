/*!
 * Filesystem storage with file hierarchies synchronized from a file manager
 *
 * Records are stored as by [`FsResourceStore`], but each record also owns a
 * space in a [`FileManager`]. The record's file components are rebuilt from
 * scans of that space, and a summary of the last synchronization is cached in
 * `files/_fm_summary.json`.
 */

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{NerdStoreError, Result};
use crate::fm::{FileManager, FileManagerError};
use crate::nerdstore::fsbased::{FsResourceStore, FILES_DIR};
use crate::nerdstore::reconcile::ScanReconciler;
use crate::nerdstore::resource::{Resource, ResourceStore};
use crate::nerdstore::tree::FileComponentTree;
use crate::types::{FileManagerSummary, ScanReport};
use crate::utils::{id_to_filename, local_id, read_json_opt, write_json};

const SUMMARY_FILE: &str = "_fm_summary.json";

fn remote(err: FileManagerError) -> NerdStoreError {
    match err {
        FileManagerError::Json(e) => {
            NerdStoreError::StorageFormat(format!("unparseable scan report: {}", e))
        }
        other => NerdStoreError::RemoteStorage(other.to_string()),
    }
}

/// Keeps one record's file hierarchy in step with its file manager space
pub struct FileManagerSync {
    fm: Arc<dyn FileManager>,
    space_id: String,
    summary_file: PathBuf,
    summary: FileManagerSummary,
}

impl FileManagerSync {
    /// Load the cached summary from `summary_file`, if present
    pub fn new(
        fm: Arc<dyn FileManager>,
        space_id: impl Into<String>,
        summary_file: impl Into<PathBuf>,
    ) -> Result<Self> {
        let summary_file = summary_file.into();
        let summary = read_json_opt(&summary_file)?.unwrap_or_default();
        Ok(Self {
            fm,
            space_id: space_id.into(),
            summary_file,
            summary,
        })
    }

    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    pub fn summary(&self) -> &FileManagerSummary {
        &self.summary
    }

    /// Scan the space afresh and rebuild the hierarchy from it
    pub fn update_hierarchy(&mut self, tree: &mut FileComponentTree) -> Result<FileManagerSummary> {
        self.ensure_uploads_dir_id()?;
        let report = self.scan_files()?;
        self.apply(tree, &report)
    }

    /// Apply the latest report of the pending scan
    ///
    /// With no pending scan this is a no-op unless the hierarchy has never
    /// been populated, in which case a scan is started.
    pub fn update_metadata(&mut self, tree: &mut FileComponentTree) -> Result<FileManagerSummary> {
        let report = match self.summary.last_scan_id.clone() {
            Some(scan_id) => self.get_file_scan(&scan_id)?,
            None if self.summary.file_count < 1 => {
                self.ensure_uploads_dir_id()?;
                self.scan_files()?
            }
            None => {
                debug!(space = %self.space_id, "no pending scan; metadata is current");
                return Ok(self.summary.clone());
            }
        };
        self.apply(tree, &report)
    }

    fn ensure_uploads_dir_id(&mut self) -> Result<()> {
        if self.summary.uploads_dir_id.is_none() {
            let id = self.fm.uploads_dir_id(&self.space_id).map_err(remote)?;
            self.summary.uploads_dir_id = Some(id);
            self.cache_summary()?;
        }
        Ok(())
    }

    /// Replace any previous scan with a new one and fetch its first report
    fn scan_files(&mut self) -> Result<ScanReport> {
        if let Some(old) = self.summary.last_scan_id.take() {
            if let Err(e) = self.fm.delete_scan(&self.space_id, &old) {
                warn!(space = %self.space_id, scan = %old, error = %e, "failed to delete previous scan");
            }
        }
        let scan_id = self.fm.start_scan(&self.space_id).map_err(remote)?;
        crate::ensure!(
            !scan_id.is_empty(),
            RemoteStorage,
            "file manager returned no scan id for space {}",
            self.space_id
        );
        self.summary.last_scan_id = Some(scan_id.clone());
        self.cache_summary()?;
        self.get_file_scan(&scan_id)
    }

    fn get_file_scan(&self, scan_id: &str) -> Result<ScanReport> {
        self.fm.get_scan(&self.space_id, scan_id).map_err(remote)
    }

    fn apply(
        &mut self,
        tree: &mut FileComponentTree,
        report: &ScanReport,
    ) -> Result<FileManagerSummary> {
        let mut summary = ScanReconciler::new(tree)
            .with_file_manager(self.fm.as_ref())
            .reconcile(report)?;
        summary.uploads_dir_id = self.summary.uploads_dir_id.clone();
        self.summary = summary;
        self.cache_summary()?;
        Ok(self.summary.clone())
    }

    fn cache_summary(&self) -> Result<()> {
        write_json(&self.summary, &self.summary_file)?;
        Ok(())
    }
}

/// A [`FsResourceStore`] whose records are tied to file manager spaces
pub struct FmfsResourceStore {
    fs: FsResourceStore,
    fm: Arc<dyn FileManager>,
}

impl FmfsResourceStore {
    pub fn new(fs: FsResourceStore, fm: Arc<dyn FileManager>) -> Self {
        Self { fs, fm }
    }

    /// Space holding the files of the record `id`
    pub fn space_id(id: &str) -> String {
        id_to_filename(local_id(id))
    }

    pub fn file_manager(&self) -> &Arc<dyn FileManager> {
        &self.fm
    }
}

impl ResourceStore for FmfsResourceStore {
    fn open(&mut self, id: Option<&str>) -> Result<Resource> {
        let res = self.fs.open(id)?;
        let space_id = Self::space_id(res.id());
        if !self.fm.space_exists(&space_id).map_err(remote)? {
            self.fm.create_space(&space_id).map_err(remote)?;
            info!(id = res.id(), space = %space_id, "created file manager space");
        }
        let summary_file = self
            .fs
            .record_dir(res.id())
            .join(FILES_DIR)
            .join(SUMMARY_FILE);
        let sync = FileManagerSync::new(Arc::clone(&self.fm), space_id, summary_file)?;
        Ok(res.with_file_manager(sync))
    }

    fn exists(&self, id: &str) -> Result<bool> {
        self.fs.exists(id)
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let deleted = self.fs.delete(id)?;
        if deleted {
            debug!(id, space = %Self::space_id(id), "record deleted; space left in place");
        }
        Ok(deleted)
    }

    fn reserve_id(&mut self, id: &str) -> Result<()> {
        self.fs.reserve_id(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fm::{FmResult, SpaceSummary};
    use crate::types::{ResourceType, ScanEntry, SyncStatus};
    use std::collections::HashMap;
    use std::io;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// File manager serving canned scan reports
    #[derive(Default)]
    struct CannedFileManager {
        spaces: Mutex<Vec<String>>,
        reports: Mutex<Vec<ScanReport>>,
        scans: Mutex<HashMap<String, ScanReport>>,
        deleted: Mutex<Vec<String>>,
    }

    impl CannedFileManager {
        fn queue(&self, entries: Vec<ScanEntry>, complete: bool) {
            let n = self.reports.lock().unwrap().len() + self.scans.lock().unwrap().len();
            let mut report = ScanReport::new("nrd:0001", format!("scan-{}", n), "/nrd:0001/nrd:0001");
            report.contents = entries;
            report.is_complete = complete;
            self.reports.lock().unwrap().push(report);
        }
    }

    impl FileManager for CannedFileManager {
        fn create_space(&self, space_id: &str) -> FmResult<SpaceSummary> {
            self.spaces.lock().unwrap().push(space_id.to_string());
            self.summarize_space(space_id)
        }

        fn space_exists(&self, space_id: &str) -> FmResult<bool> {
            Ok(self.spaces.lock().unwrap().iter().any(|s| s == space_id))
        }

        fn summarize_space(&self, space_id: &str) -> FmResult<SpaceSummary> {
            Ok(SpaceSummary {
                space_id: space_id.to_string(),
                uploads_dir_id: "up-1".to_string(),
                fm_folder_path: format!("/{}/{}", space_id, space_id),
                created: None,
                last_scan_id: None,
            })
        }

        fn start_scan(&self, _: &str) -> FmResult<String> {
            let mut queued = self.reports.lock().unwrap();
            if queued.is_empty() {
                return Err(FileManagerError::Client("no scan queued".to_string()));
            }
            let report = queued.remove(0);
            let id = report.scan_id.clone();
            self.scans.lock().unwrap().insert(id.clone(), report);
            Ok(id)
        }

        fn get_scan(&self, _: &str, scan_id: &str) -> FmResult<ScanReport> {
            self.scans
                .lock()
                .unwrap()
                .get(scan_id)
                .cloned()
                .ok_or_else(|| FileManagerError::ResourceNotFound(scan_id.to_string()))
        }

        fn delete_scan(&self, _: &str, scan_id: &str) -> FmResult<()> {
            self.deleted.lock().unwrap().push(scan_id.to_string());
            self.scans
                .lock()
                .unwrap()
                .remove(scan_id)
                .map(|_| ())
                .ok_or_else(|| FileManagerError::ResourceNotFound(scan_id.to_string()))
        }
    }

    fn entry(id: &str, path: &str, kind: ResourceType) -> ScanEntry {
        let mut e = ScanEntry::new(id, path, kind);
        if kind == ResourceType::File {
            e.size = Some(10);
        }
        e
    }

    #[test]
    fn test_open_creates_space_and_syncs() -> io::Result<()> {
        let dir = tempdir()?;
        let fm = Arc::new(CannedFileManager::default());
        let mut store = FmfsResourceStore::new(FsResourceStore::new(dir.path(), "nrd")?, fm.clone());

        let mut res = store.open(None)?;
        assert_eq!(res.id(), "nrd:0001");
        assert!(fm.space_exists("nrd:0001")?);
        assert_eq!(res.fm_summary()?.syncing, SyncStatus::Unsynced);

        fm.queue(
            vec![
                entry("d1", "/nrd:0001/nrd:0001/data", ResourceType::Folder),
                entry("f1", "/nrd:0001/nrd:0001/data/a.csv", ResourceType::File),
            ],
            false,
        );
        let summary = res.update_file_hierarchy()?;
        assert_eq!(summary.file_count, 1);
        assert_eq!(summary.folder_count, 1);
        assert_eq!(summary.usage, 10);
        assert_eq!(summary.syncing, SyncStatus::Syncing);
        assert_eq!(summary.last_scan_id.as_deref(), Some("scan-0"));
        assert_eq!(summary.uploads_dir_id.as_deref(), Some("up-1"));
        assert_eq!(res.files()?.get_by_path("data/a.csv")?.id(), "f1");

        // the summary survives reopening
        let reopened = store.open(Some("nrd:0001"))?;
        assert_eq!(reopened.fm_summary()?.last_scan_id.as_deref(), Some("scan-0"));
        Ok(())
    }

    #[test]
    fn test_completed_scan_is_deleted_and_replaced() -> io::Result<()> {
        let dir = tempdir()?;
        let fm = Arc::new(CannedFileManager::default());
        let mut store = FmfsResourceStore::new(FsResourceStore::new(dir.path(), "nrd")?, fm.clone());
        let mut res = store.open(None)?;

        fm.queue(vec![entry("f1", "a.txt", ResourceType::File)], false);
        res.update_file_hierarchy()?;

        fm.queue(vec![entry("f2", "b.txt", ResourceType::File)], true);
        let summary = res.update_file_hierarchy()?;
        assert!(summary.last_scan_is_complete);
        assert_eq!(summary.last_scan_id, None);
        assert_eq!(*fm.deleted.lock().unwrap(), vec!["scan-0", "scan-1"]);
        assert_eq!(res.files()?.ids()?, vec!["f2"]);

        // nothing pending and files present: no new scan is started
        let again = res.update_file_metadata()?;
        assert_eq!(again, summary);
        Ok(())
    }

    #[test]
    fn test_update_metadata_rereads_pending_scan() -> io::Result<()> {
        let dir = tempdir()?;
        let fm = Arc::new(CannedFileManager::default());
        let mut store = FmfsResourceStore::new(FsResourceStore::new(dir.path(), "nrd")?, fm.clone());
        let mut res = store.open(None)?;

        fm.queue(vec![entry("f1", "a.txt", ResourceType::File)], false);
        res.update_file_metadata()?;
        {
            let mut scans = fm.scans.lock().unwrap();
            let report = scans.get_mut("scan-0").unwrap();
            report.contents[0].checksum = Some("feed".to_string());
            report.is_complete = true;
        }
        let summary = res.update_file_metadata()?;
        assert_eq!(summary.syncing, SyncStatus::Synced);
        let file = res.files()?.get_by_id("f1")?;
        assert_eq!(file.as_file().and_then(|f| f.checksum.as_ref()).map(|c| c.hash.as_str()), Some("feed"));
        Ok(())
    }

    #[test]
    fn test_remote_failure_is_remote_storage_error() -> io::Result<()> {
        let dir = tempdir()?;
        let fm = Arc::new(CannedFileManager::default());
        let mut store = FmfsResourceStore::new(FsResourceStore::new(dir.path(), "nrd")?, fm);
        let mut res = store.open(None)?;
        let err = res.update_file_hierarchy().unwrap_err();
        assert!(matches!(err, NerdStoreError::RemoteStorage(_)));
        Ok(())
    }
}
