/*!
 * Reconciliation of a file hierarchy with a file manager scan
 *
 * A scan report is a flat listing of a space. [`ScanReconciler`] validates
 * the whole listing, then brings a [`FileComponentTree`] into agreement with
 * it: folders are upserted parents first, then files, then components the
 * scan no longer lists are deleted. File-manager ids are used as component
 * ids, so a file keeps its identity across renames and moves.
 */

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{NerdStoreError, Result};
use crate::fm::FileManager;
use crate::nerdstore::tree::FileComponentTree;
use crate::types::{
    Checksum, FileComponent, FileManagerSummary, ScanEntry, ScanReport, PDR_DOWNLOAD_URL,
};
use crate::utils::{ancestors, depth};

/// Prefix of the top-level names components are parked under while paths are reshuffled
const PARKING_PREFIX: &str = ".reconcile-";

/// Malformed entries quoted in the error message
const MAX_REPORTED_PROBLEMS: usize = 5;

/// A scan entry that passed validation
struct Planned<'r> {
    id: String,
    path: String,
    entry: Option<&'r ScanEntry>,
}

/// Applies scan reports to a file hierarchy
pub struct ScanReconciler<'a> {
    tree: &'a mut FileComponentTree,
    fm: Option<&'a dyn FileManager>,
}

impl<'a> ScanReconciler<'a> {
    pub fn new(tree: &'a mut FileComponentTree) -> Self {
        Self { tree, fm: None }
    }

    /// Delete completed scans from this file manager once they are applied
    pub fn with_file_manager(mut self, fm: &'a dyn FileManager) -> Self {
        self.fm = Some(fm);
        self
    }

    /// Apply a scan report, returning the resulting summary
    ///
    /// A report with any malformed entry is rejected before the tree is
    /// touched.
    pub fn reconcile(&mut self, report: &ScanReport) -> Result<FileManagerSummary> {
        let (mut folders, files) = validate(report)?;

        let scan_ids: HashSet<String> = folders
            .iter()
            .chain(files.iter())
            .map(|p| p.id.clone())
            .collect();
        let synthesized = self.synthesize_folders(&folders, &files, &scan_ids)?;
        if !synthesized.is_empty() {
            let paths: Vec<&str> = synthesized.iter().map(|p| p.path.as_str()).collect();
            warn!(
                scan = %report.scan_id,
                paths = ?paths,
                "scan omitted folders implied by its contents; synthesized them"
            );
        }
        let mut live: HashSet<String> = scan_ids;
        live.extend(synthesized.iter().map(|p| p.id.clone()));
        folders.extend(synthesized);

        let mut stale: Vec<String> = self
            .tree
            .ids()?
            .into_iter()
            .filter(|id| !live.contains(id))
            .collect();

        folders.sort_by(|a, b| a.path.cmp(&b.path));
        for folder in &folders {
            self.upsert_folder(folder, &live).map_err(internal)?;
        }

        let mut files = files;
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let mut usage = 0u64;
        for file in &files {
            usage += self
                .upsert_file(file, &live, &mut stale)
                .map_err(internal)?;
        }

        self.delete_stale(stale)?;

        let last_scan_id = if report.is_complete {
            self.discard_scan(report);
            None
        } else {
            Some(report.scan_id.clone())
        };

        info!(
            scan = %report.scan_id,
            files = files.len(),
            folders = folders.len(),
            usage,
            "applied scan report"
        );
        Ok(FileManagerSummary {
            file_count: files.len() as i64,
            folder_count: folders.len() as i64,
            usage: usage as i64,
            syncing: report.status(),
            last_scan_started: report.scan_datetime.clone(),
            last_scan_id,
            last_scan_is_complete: report.is_complete,
            last_modified: report.last_modified.clone(),
            uploads_dir_id: None,
        })
    }

    /// Plan folders for every ancestor path the scan does not list itself
    fn synthesize_folders<'r>(
        &mut self,
        folders: &[Planned<'r>],
        files: &[Planned<'r>],
        scan_ids: &HashSet<String>,
    ) -> Result<Vec<Planned<'r>>> {
        let mut known: HashSet<String> = folders.iter().map(|p| p.path.clone()).collect();
        let mut missing: Vec<String> = Vec::new();
        for planned in folders.iter().chain(files.iter()) {
            for anc in ancestors(&planned.path) {
                if known.insert(anc.to_string()) {
                    missing.push(anc.to_string());
                }
            }
        }

        let mut out = Vec::with_capacity(missing.len());
        let mut taken: HashSet<String> = HashSet::new();
        for path in missing {
            let existing = match self.tree.find_by_path(&path)? {
                Some(comp)
                    if comp.is_collection()
                        && !scan_ids.contains(comp.id())
                        && !taken.contains(comp.id()) =>
                {
                    Some(comp.id().to_string())
                }
                _ => None,
            };
            let id = match existing {
                Some(id) => id,
                None => loop {
                    let id = self.tree.new_id()?;
                    if !scan_ids.contains(&id) && !self.tree.exists(&id)? {
                        break id;
                    }
                },
            };
            taken.insert(id.clone());
            out.push(Planned {
                id,
                path,
                entry: None,
            });
        }
        Ok(out)
    }

    /// Clear the way for `planned` at its path
    ///
    /// A stale folder is taken over by re-keying it so that its children stay
    /// put; anything else is moved aside and lands in its final place (or is
    /// deleted) later in the pass.
    fn vacate(
        &mut self,
        planned: &Planned<'_>,
        live: &HashSet<String>,
        as_folder: bool,
    ) -> Result<()> {
        let Some(occupant) = self.tree.find_by_path(&planned.path)? else {
            return Ok(());
        };
        if occupant.id() == planned.id {
            return Ok(());
        }
        if as_folder
            && occupant.is_collection()
            && !live.contains(occupant.id())
            && !self.tree.exists(&planned.id)?
        {
            debug!(old = occupant.id(), new = %planned.id, path = %planned.path, "re-keying folder");
            return self.tree.reassign_id(occupant.id(), &planned.id);
        }
        let parking = format!("{}{}", PARKING_PREFIX, occupant.id());
        debug!(id = occupant.id(), path = %planned.path, "moving occupant aside");
        self.tree.move_file(occupant.id(), &parking)?;
        Ok(())
    }

    fn upsert_folder(&mut self, planned: &Planned<'_>, live: &HashSet<String>) -> Result<()> {
        self.vacate(planned, live, true)?;
        let mut comp = match self.tree.find_by_id(&planned.id)? {
            Some(existing) if existing.is_collection() => existing,
            _ => FileComponent::new_folder(planned.id.clone(), planned.path.clone()),
        };
        comp.set_filepath(planned.path.clone());
        self.tree.set_component(&comp)?;
        Ok(())
    }

    /// Returns the file's size
    ///
    /// A folder holding the file's id is retired and queued on `stale`.
    fn upsert_file(
        &mut self,
        planned: &Planned<'_>,
        live: &HashSet<String>,
        stale: &mut Vec<String>,
    ) -> Result<u64> {
        self.vacate(planned, live, false)?;
        let mut comp = match self.tree.find_by_id(&planned.id)? {
            Some(existing) if !existing.is_collection() => existing,
            found => {
                if found.is_some() {
                    stale.push(self.retire_folder(&planned.id)?);
                }
                let mut comp = FileComponent::new_file(planned.id.clone(), planned.path.clone());
                if let FileComponent::File(file) = &mut comp {
                    file.metadata.insert(
                        "downloadURL".to_string(),
                        Value::String(PDR_DOWNLOAD_URL.to_string()),
                    );
                }
                comp
            }
        };
        comp.set_filepath(planned.path.clone());

        if let (FileComponent::File(file), Some(entry)) = (&mut comp, planned.entry) {
            if let Some(size) = entry.size {
                file.size = Some(size);
            }
            if let Some(hash) = entry.checksum.as_deref().filter(|h| !h.is_empty()) {
                file.checksum = Some(Checksum::sha256(hash));
            }
            if let Some(modified) = &entry.last_modified {
                file.metadata
                    .insert("last_modified".to_string(), Value::String(modified.clone()));
            }
        }
        let size = comp.size().unwrap_or(0);
        self.tree.set_component(&comp)?;
        Ok(size)
    }

    /// Re-key a folder and park it so its contents can be deleted as stale
    fn retire_folder(&mut self, id: &str) -> Result<String> {
        let fresh = self.tree.new_id()?;
        self.tree.reassign_id(id, &fresh)?;
        self.tree
            .move_file(&fresh, &format!("{}{}", PARKING_PREFIX, fresh))?;
        debug!(old = id, new = %fresh, "folder now reported as a file");
        Ok(fresh)
    }

    /// Delete components the scan no longer lists, deepest first
    fn delete_stale(&mut self, stale: Vec<String>) -> Result<()> {
        let mut doomed = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(comp) = self.tree.find_by_id(&id)? {
                doomed.push((depth(comp.filepath()), id));
            }
        }
        doomed.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, id) in doomed {
            self.tree.delete_file(&id).map_err(internal)?;
            debug!(id = %id, "removed component no longer in scan");
        }
        Ok(())
    }

    fn discard_scan(&self, report: &ScanReport) {
        let Some(fm) = self.fm else {
            return;
        };
        if let Err(e) = fm.delete_scan(&report.space_id, &report.scan_id) {
            error!(
                space = %report.space_id,
                scan = %report.scan_id,
                error = %e,
                "failed to delete completed scan"
            );
        }
    }
}

/// Errors after validation mean the tree broke an invariant mid-pass
fn internal(err: NerdStoreError) -> NerdStoreError {
    match err {
        NerdStoreError::ObjectNotFound { key } => NerdStoreError::Internal(format!(
            "parent folder {} missing while applying scan",
            key
        )),
        NerdStoreError::Internal(msg) => NerdStoreError::Internal(msg),
        other => NerdStoreError::Internal(format!("failed to apply scan: {}", other)),
    }
}

/// Path of an entry relative to the space root
fn relative_path(prefix: &str, raw: &str) -> std::result::Result<String, String> {
    let prefix = prefix.trim_end_matches('/');
    let stripped = if prefix.is_empty() {
        raw
    } else {
        match raw.strip_prefix(prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
            _ => raw,
        }
    };
    let path = stripped.trim_end_matches('/');
    if path.starts_with('/') {
        return Err(format!("{}: path is outside the space", raw));
    }
    if !path.is_empty() && path.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
        return Err(format!("{}: path has empty or relative segments", raw));
    }
    Ok(path.to_string())
}

/// Check every entry, returning the folders and files to apply
fn validate(report: &ScanReport) -> Result<(Vec<Planned<'_>>, Vec<Planned<'_>>)> {
    let mut problems: Vec<String> = Vec::new();
    let mut folders = Vec::new();
    let mut files = Vec::new();
    let mut seen_ids: HashMap<&str, usize> = HashMap::new();
    let mut seen_paths: HashSet<String> = HashSet::new();

    for (i, entry) in report.contents.iter().enumerate() {
        let Some(id) = entry.fileid.as_deref() else {
            problems.push(format!("entry {}: missing file id", i));
            continue;
        };
        let Some(raw) = entry.path.as_deref() else {
            problems.push(format!("entry {} ({}): missing path", i, id));
            continue;
        };
        let path = match relative_path(&report.fm_folder_path, raw) {
            Ok(path) => path,
            Err(msg) => {
                problems.push(msg);
                continue;
            }
        };
        if path.is_empty() {
            if entry.is_folder() {
                continue;
            }
            problems.push(format!("entry {} ({}): file has an empty path", i, id));
            continue;
        }
        if let Some(first) = seen_ids.insert(id, i) {
            problems.push(format!("entries {} and {}: duplicate file id {}", first, i, id));
            continue;
        }
        if !seen_paths.insert(path.clone()) {
            problems.push(format!("entry {} ({}): duplicate path {}", i, id, path));
            continue;
        }

        let planned = Planned {
            id: id.to_string(),
            path,
            entry: Some(entry),
        };
        if entry.is_folder() {
            folders.push(planned);
        } else {
            files.push(planned);
        }
    }

    if !problems.is_empty() {
        error!(
            scan = %report.scan_id,
            count = problems.len(),
            problems = ?problems,
            "rejecting malformed scan report"
        );
        let shown: Vec<&str> = problems
            .iter()
            .take(MAX_REPORTED_PROBLEMS)
            .map(String::as_str)
            .collect();
        return Err(NerdStoreError::RemoteStorage(format!(
            "scan {} has {} malformed entries: {}",
            report.scan_id,
            problems.len(),
            shown.join("; ")
        )));
    }
    Ok((folders, files))
}
