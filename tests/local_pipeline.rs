/*!
 * End-to-end synchronisation of a record with a local user space
 */

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use filetime::{set_file_mtime, FileTime};
use tempfile::tempdir;

use nerdstore::fm::FileManager;
use nerdstore::nerdstore::{FmfsResourceStore, FsResourceStore, ResourceStore};
use nerdstore::scan::{sha256_file, ScanPhase, ScanSettings};
use nerdstore::types::SyncStatus;
use nerdstore::LocalFileManager;

fn write(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

#[test]
fn test_record_follows_space_contents() -> io::Result<()> {
    let dir = tempdir()?;
    let fm = Arc::new(LocalFileManager::new(
        dir.path().join("spaces"),
        ScanSettings::default(),
    )?);
    let shared: Arc<dyn FileManager> = fm.clone();
    let records = FsResourceStore::new(dir.path().join("records"), "nrd")?;
    let mut store = FmfsResourceStore::new(records, shared);

    let mut res = store.open(None)?;
    assert_eq!(res.id(), "nrd:0001");
    let space_id = FmfsResourceStore::space_id(res.id());
    assert!(fm.space_exists(&space_id)?);
    assert_eq!(res.fm_summary()?.file_count, -1);

    let uploads = fm.space(&space_id).uploads_dir();
    write(&uploads.join("docs/readme.txt"), "Read me first\n")?;
    write(&uploads.join("data/obs.csv"), "t,v\n0,1.5\n1,1.7\n")?;
    write(&uploads.join(".DS_Store"), "junk")?;
    write(&uploads.join("TRASH/old.csv"), "discarded")?;
    set_file_mtime(uploads.join("data/obs.csv"), FileTime::from_unix_time(1_700_000_000, 0))?;

    let summary = res.update_file_hierarchy()?;
    assert_eq!(summary.file_count, 2);
    assert_eq!(summary.folder_count, 2);
    assert!(res.files()?.path_exists("docs/readme.txt")?);
    assert!(!res.files()?.path_exists("TRASH")?);
    assert!(!res.files()?.path_exists(".DS_Store")?);

    assert_eq!(
        fm.driver().registry().wait(&space_id)?,
        Some(ScanPhase::SlowScanDone)
    );
    let summary = res.update_file_metadata()?;
    assert_eq!(summary.syncing, SyncStatus::Synced);
    assert_eq!(summary.last_scan_id, None);
    assert_eq!(summary.usage, 14 + 16);

    let readme = res.files()?.get_by_path("docs/readme.txt")?;
    let checksum = readme.as_file().and_then(|f| f.checksum.clone());
    assert_eq!(
        checksum.map(|c| c.hash),
        Some(sha256_file(&uploads.join("docs/readme.txt"))?)
    );
    let obs = res.files()?.get_by_path("data/obs.csv")?;
    assert!(obs.metadata()["last_modified"]
        .as_str()
        .unwrap_or_default()
        .starts_with("2023-11-14"));

    // Renames keep the file's identity; removals drop it
    let readme_id = readme.id().to_string();
    fs::rename(uploads.join("docs/readme.txt"), uploads.join("docs/README.md"))?;
    fs::remove_file(uploads.join("data/obs.csv"))?;

    res.update_file_hierarchy()?;
    fm.driver().registry().wait(&space_id)?;
    let summary = res.update_file_metadata()?;
    assert_eq!(summary.file_count, 1);
    assert_eq!(
        res.files()?.find_id_by_path("docs/README.md")?.as_deref(),
        Some(readme_id.as_str())
    );
    assert!(!res.files()?.path_exists("data/obs.csv")?);

    // The cached summary survives reopening the record
    let reopened = store.open(Some(res.id()))?;
    assert_eq!(reopened.fm_summary()?, summary);
    Ok(())
}

#[test]
fn test_second_scan_of_busy_space_is_refused() -> io::Result<()> {
    let dir = tempdir()?;
    let fm = LocalFileManager::new(dir.path(), ScanSettings::default())?;
    fm.create_space("busy")?;
    for i in 0..50 {
        write(
            &fm.space("busy").uploads_dir().join(format!("f{:02}.dat", i)),
            &"x".repeat(4096),
        )?;
    }

    let first = fm.start_scan("busy")?;
    match fm.start_scan("busy") {
        // The first scan may already have finished its slow phase
        Ok(second) => assert_ne!(first, second),
        Err(e) => assert!(e.to_string().contains("busy")),
    }
    fm.driver().registry().wait("busy")?;
    Ok(())
}
