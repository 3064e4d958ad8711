/*!
 * Scanner for spaces held on the local filesystem
 */

use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::fm::{FileManagerError, FmResult, LocalResourceInfo, ResourceInfoSource, UserSpace};
use crate::scan::checksum::sha256_file;
use crate::scan::{CancelToken, ScanSettings, UserSpaceScanner};
use crate::types::{iso_timestamp, ResourceType, ScanEntry, ScanReport};
use crate::utils::ancestors;

/// Walks a [`UserSpace`] and checksums its files
pub struct BasicScanner {
    space: UserSpace,
    settings: ScanSettings,
    info: Arc<dyn ResourceInfoSource>,
}

impl BasicScanner {
    pub fn new(space: UserSpace, settings: ScanSettings) -> Self {
        Self::with_info_source(space, settings, Arc::new(LocalResourceInfo))
    }

    pub fn with_info_source(
        space: UserSpace,
        settings: ScanSettings,
        info: Arc<dyn ResourceInfoSource>,
    ) -> Self {
        Self {
            space,
            settings,
            info,
        }
    }

    /// Local path of a report entry
    fn local_path(&self, prefix: &str, path: &str) -> PathBuf {
        let rel = path
            .strip_prefix(prefix)
            .unwrap_or(path)
            .trim_start_matches('/');
        self.space.uploads_dir().join(rel)
    }

    /// Metadata carried over from the last completed scan, keyed by file id
    fn previous_metadata(&self) -> HashMap<String, (Option<String>, Option<String>)> {
        match self.space.last_good_scan() {
            Ok(Some(report)) => report
                .contents
                .into_iter()
                .filter_map(|e| Some((e.fileid?, (e.etag, e.checksum))))
                .collect(),
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(space = %self.space.id(), error = %e, "ignoring unreadable last good scan");
                HashMap::new()
            }
        }
    }

    fn flush(&self, report: &ScanReport) {
        if let Err(e) = self.space.save_report(report) {
            warn!(scan = %report.scan_id, error = %e, "failed to save incremental scan report");
        }
    }
}

/// Refresh an entry from the filesystem; false if it no longer exists
fn stat_entry(entry: &mut ScanEntry, path: PathBuf) -> bool {
    let meta = match fs::metadata(&path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "entry vanished before stat");
            return false;
        }
        Err(e) => {
            entry.scan_errors.push(format!("stat failed: {}", e));
            return true;
        }
    };
    entry.size = Some(if meta.is_dir() { 0 } else { meta.len() });
    entry.ctime = Some(meta.ctime() as f64 + meta.ctime_nsec() as f64 / 1e9);
    entry.mtime = Some(meta.mtime() as f64 + meta.mtime_nsec() as f64 / 1e9);
    if let Ok(modified) = meta.modified() {
        entry.last_modified = Some(iso_timestamp(modified));
    }
    true
}

impl UserSpaceScanner for BasicScanner {
    fn space(&self) -> &UserSpace {
        &self.space
    }

    fn init_scannable_content(
        &self,
        report: &mut ScanReport,
        folder: Option<&str>,
    ) -> FmResult<()> {
        let base = self.space.uploads_dir();
        let folder = folder.map(|f| f.trim_matches('/')).filter(|f| !f.is_empty());
        let start = match folder {
            Some(f) => base.join(f),
            None => base.clone(),
        };
        if !start.is_dir() {
            return Err(FileManagerError::scan(
                self.space.id(),
                format!("{} is not a folder in the space", start.display()),
            ));
        }
        report.scan_root = folder.map(str::to_string);

        let previous = self.previous_metadata();
        let skip = &self.settings.skip;
        let walker = WalkDir::new(&start)
            .min_depth(if folder.is_some() { 0 } else { 1 })
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !skip.should_skip(&e.file_name().to_string_lossy(), e.file_type().is_dir())
            });

        for entry in walker {
            let entry = entry.map_err(|e| FileManagerError::scan(self.space.id(), e.to_string()))?;
            let kind = if entry.file_type().is_dir() {
                ResourceType::Folder
            } else if entry.file_type().is_file() {
                ResourceType::File
            } else {
                debug!(path = %entry.path().display(), "skipping special file");
                continue;
            };
            let Ok(rel) = entry.path().strip_prefix(&base) else {
                continue;
            };
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let meta = entry
                .metadata()
                .map_err(|e| FileManagerError::scan(self.space.id(), e.to_string()))?;

            let fileid = LocalResourceInfo::fileid(&meta);
            let mut item = ScanEntry::new(
                fileid.clone(),
                format!("{}/{}", report.fm_folder_path, rel),
                kind,
            );
            if let Some((etag, checksum)) = previous.get(&fileid) {
                item.etag = etag.clone();
                item.checksum = checksum.clone();
            }
            report.contents.push(item);
        }
        debug!(scan = %report.scan_id, entries = report.contents.len(), "listed scannable content");
        Ok(())
    }

    fn fast_scan(&self, report: &mut ScanReport) -> FmResult<()> {
        report.contents.sort_by(|a, b| a.path.cmp(&b.path));
        report.in_progress = true;

        let prefix = report.fm_folder_path.clone();
        let contents: Vec<ScanEntry> = std::mem::take(&mut report.contents)
            .into_par_iter()
            .filter_map(|mut entry| {
                let path = self.local_path(&prefix, entry.path.as_deref().unwrap_or(""));
                stat_entry(&mut entry, path).then_some(entry)
            })
            .collect();
        report.contents = contents;

        let mut folder_sizes: HashMap<String, u64> = HashMap::new();
        let mut total = 0u64;
        for entry in report.contents.iter().filter(|e| !e.is_folder()) {
            let size = entry.size.unwrap_or(0);
            total += size;
            if let Some(path) = &entry.path {
                for folder in ancestors(path) {
                    *folder_sizes.entry(folder.to_string()).or_default() += size;
                }
            }
        }
        for entry in report.contents.iter_mut().filter(|e| e.is_folder()) {
            let path = entry.path.as_deref().unwrap_or("");
            entry.accumulated_size = Some(folder_sizes.get(path).copied().unwrap_or(0));
        }
        report.accumulated_size = total;
        report.last_modified = report
            .contents
            .iter()
            .filter_map(|e| e.last_modified.clone())
            .max();

        self.space.save_report(report)?;
        info!(
            scan = %report.scan_id,
            files = report.file_count(),
            folders = report.folder_count(),
            bytes = total,
            "fast scan complete"
        );
        Ok(())
    }

    fn slow_scan(&self, report: &mut ScanReport, cancel: &CancelToken) -> FmResult<()> {
        let mut files_since_flush = 0usize;
        let mut bytes_since_flush = 0u64;

        for i in 0..report.contents.len() {
            if report.contents[i].is_folder() {
                continue;
            }
            if cancel.is_cancelled() {
                self.flush(report);
                return Err(FileManagerError::Cancelled(report.scan_id.clone()));
            }

            let path = self.local_path(
                &report.fm_folder_path,
                report.contents[i].path.as_deref().unwrap_or(""),
            );
            let entry = &mut report.contents[i];
            let info = match self.info.resource_info(&path) {
                Ok(info) => info,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "no resource info");
                    entry.scan_errors.push(format!("resource info unavailable: {}", e));
                    continue;
                }
            };
            let changed = entry.etag.as_deref() != Some(info.etag.as_str());
            let needs_checksum = changed || entry.checksum.is_none();
            entry.etag = Some(info.etag);
            entry.size = Some(info.size);
            if needs_checksum {
                match sha256_file(&path) {
                    Ok(digest) => entry.checksum = Some(digest),
                    Err(e) => entry.scan_errors.push(format!("checksum failed: {}", e)),
                }
                bytes_since_flush += info.size;
            }
            files_since_flush += 1;

            if files_since_flush >= self.settings.flush_file_limit
                || bytes_since_flush >= self.settings.flush_size_limit
            {
                self.flush(report);
                files_since_flush = 0;
                bytes_since_flush = 0;
            }
        }

        report.in_progress = false;
        report.is_complete = true;
        if let Err(e) = self.space.save_report(report) {
            error!(scan = %report.scan_id, error = %e, "failed to save final scan report");
        }
        if let Err(e) = self.space.save_last_good_scan(report) {
            warn!(space = %self.space.id(), error = %e, "failed to record last good scan");
        }
        info!(scan = %report.scan_id, "slow scan complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fm::ResourceInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn space_with_files(dir: &std::path::Path) -> io::Result<UserSpace> {
        let space = UserSpace::new(dir, "s1");
        space.create()?;
        let up = space.uploads_dir();
        fs::create_dir_all(up.join("data/raw"))?;
        fs::create_dir_all(up.join("TRASH"))?;
        fs::write(up.join("data/raw/a.csv"), "1,2,3\n")?;
        fs::write(up.join("data/b.txt"), "hello")?;
        fs::write(up.join(".hidden"), "x")?;
        fs::write(up.join("TRASH/old.txt"), "x")?;
        Ok(space)
    }

    fn paths(report: &ScanReport) -> Vec<String> {
        report
            .contents
            .iter()
            .filter_map(|e| e.path.clone())
            .collect()
    }

    #[test]
    fn test_fast_scan_lists_and_sizes() -> io::Result<()> {
        let dir = tempdir()?;
        let space = space_with_files(dir.path())?;
        let scanner = BasicScanner::new(space.clone(), ScanSettings::default());
        let mut report = ScanReport::new("s1", "scan1", space.folder_path());
        scanner.init_scannable_content(&mut report, None)?;
        scanner.fast_scan(&mut report)?;

        assert_eq!(
            paths(&report),
            vec![
                "/s1/s1/data",
                "/s1/s1/data/b.txt",
                "/s1/s1/data/raw",
                "/s1/s1/data/raw/a.csv"
            ]
        );
        assert!(report.in_progress);
        assert_eq!(report.accumulated_size, 11);
        let data = &report.contents[0];
        assert!(data.is_folder());
        assert_eq!(data.accumulated_size, Some(11));
        assert_eq!(report.contents[2].accumulated_size, Some(6));
        assert!(report.last_modified.is_some());
        assert!(space.report_path("scan1").exists());
        Ok(())
    }

    #[test]
    fn test_fast_scan_drops_vanished_entries() -> io::Result<()> {
        let dir = tempdir()?;
        let space = space_with_files(dir.path())?;
        let scanner = BasicScanner::new(space.clone(), ScanSettings::default());
        let mut report = ScanReport::new("s1", "scan1", space.folder_path());
        scanner.init_scannable_content(&mut report, None)?;
        fs::remove_file(space.uploads_dir().join("data/b.txt"))?;
        scanner.fast_scan(&mut report)?;
        assert_eq!(report.file_count(), 1);
        Ok(())
    }

    #[test]
    fn test_scan_restricted_to_folder() -> io::Result<()> {
        let dir = tempdir()?;
        let space = space_with_files(dir.path())?;
        let scanner = BasicScanner::new(space.clone(), ScanSettings::default());
        let mut report = ScanReport::new("s1", "scan1", space.folder_path());
        scanner.init_scannable_content(&mut report, Some("data/raw"))?;
        assert_eq!(report.scan_root.as_deref(), Some("data/raw"));
        assert_eq!(paths(&report), vec!["/s1/s1/data/raw", "/s1/s1/data/raw/a.csv"]);

        let err = scanner
            .init_scannable_content(&mut report, Some("nope"))
            .unwrap_err();
        assert!(matches!(err, FileManagerError::Scan { .. }));
        Ok(())
    }

    struct CountingInfo(AtomicUsize);

    impl ResourceInfoSource for CountingInfo {
        fn resource_info(&self, path: &std::path::Path) -> FmResult<ResourceInfo> {
            self.0.fetch_add(1, Ordering::SeqCst);
            LocalResourceInfo.resource_info(path)
        }
    }

    #[test]
    fn test_slow_scan_checksums_and_reuses_last_good_scan() -> io::Result<()> {
        let dir = tempdir()?;
        let space = space_with_files(dir.path())?;
        let info = Arc::new(CountingInfo(AtomicUsize::new(0)));
        let scanner =
            BasicScanner::with_info_source(space.clone(), ScanSettings::default(), info.clone());

        let mut report = ScanReport::new("s1", "scan1", space.folder_path());
        scanner.init_scannable_content(&mut report, None)?;
        scanner.fast_scan(&mut report)?;
        scanner.slow_scan(&mut report, &CancelToken::default())?;
        assert!(report.is_complete);
        assert!(!report.in_progress);
        assert_eq!(info.0.load(Ordering::SeqCst), 2);
        let b = report
            .contents
            .iter()
            .find(|e| e.path.as_deref() == Some("/s1/s1/data/b.txt"))
            .unwrap();
        assert_eq!(
            b.checksum.as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
        assert!(space.last_good_scan()?.is_some());

        let mut again = ScanReport::new("s1", "scan2", space.folder_path());
        scanner.init_scannable_content(&mut again, None)?;
        assert!(again.contents.iter().filter(|e| !e.is_folder()).all(|e| e.checksum.is_some()));
        Ok(())
    }

    #[test]
    fn test_slow_scan_honours_cancellation() -> io::Result<()> {
        let dir = tempdir()?;
        let space = space_with_files(dir.path())?;
        let scanner = BasicScanner::new(space.clone(), ScanSettings::default());
        let mut report = ScanReport::new("s1", "scan1", space.folder_path());
        scanner.init_scannable_content(&mut report, None)?;
        scanner.fast_scan(&mut report)?;

        let cancel = CancelToken::default();
        cancel.cancel();
        let err = scanner.slow_scan(&mut report, &cancel).unwrap_err();
        assert!(matches!(err, FileManagerError::Cancelled(_)));
        assert!(!report.is_complete);
        assert!(space.load_report("scan1")?.in_progress);
        Ok(())
    }
}
