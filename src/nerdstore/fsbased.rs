/*!
 * Filesystem storage backend
 *
 * Each record is a directory under the store root named after the record's
 * local identifier:
 *
 * ```text
 * <root>/_seq.json            next record sequence number
 * <root>/<id>/res.json        resource-level properties
 * <root>/<id>/auths/          authors list
 * <root>/<id>/refs/           references list
 * <root>/<id>/nonfiles/       non-file components list
 * <root>/<id>/files/          file component hierarchy
 * ```
 *
 * A list directory holds `_ids.json` (the order), `_seq.json` and one
 * `<item-id>.json` per item. The files directory holds one `f:<id>.json` or
 * `c:<id>.json` per file or folder, plus `_children.json` for the top level.
 * All writes go through a temporary file and a rename.
 */

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::nerdstore::list::{ListKind, ListStorage, OrderedObjectList};
use crate::nerdstore::resource::{IdMinter, Resource, ResourceStorage, ResourceStore};
use crate::nerdstore::tree::{FileComponentTree, TreeStorage};
use crate::types::{FileComponent, JsonMap};
use crate::utils::{filename_to_id, id_to_filename, local_id, read_json, read_json_opt, write_json};

const RES_FILE: &str = "res.json";
const SEQ_FILE: &str = "_seq.json";
const IDS_FILE: &str = "_ids.json";
const CHILDREN_FILE: &str = "_children.json";
const FILE_PREFIX: &str = "f:";
const FOLDER_PREFIX: &str = "c:";

/// Subdirectory holding the file hierarchy of a record
pub const FILES_DIR: &str = "files";

fn item_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.json", id_to_filename(id)))
}

/// Names of the regular files in `dir`; empty if it does not exist
fn file_names(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Directory-backed [`ListStorage`]
#[derive(Debug, Clone)]
pub struct FsList {
    dir: PathBuf,
}

impl FsList {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ListStorage for FsList {
    fn load_ids(&self) -> Result<Vec<String>> {
        Ok(read_json_opt(&self.dir.join(IDS_FILE))?.unwrap_or_default())
    }

    fn save_ids(&mut self, ids: &[String]) -> Result<()> {
        write_json(ids, &self.dir.join(IDS_FILE))?;
        Ok(())
    }

    fn load_item(&self, id: &str) -> Result<Option<JsonMap>> {
        read_json_opt(&item_path(&self.dir, id))
    }

    fn save_item(&mut self, id: &str, item: &JsonMap) -> Result<()> {
        write_json(item, &item_path(&self.dir, id))?;
        Ok(())
    }

    fn remove_item(&mut self, id: &str) -> Result<()> {
        remove_if_present(&item_path(&self.dir, id))?;
        Ok(())
    }

    fn next_seq(&self) -> Result<u64> {
        Ok(read_json_opt(&self.dir.join(SEQ_FILE))?.unwrap_or(0))
    }

    fn save_next_seq(&mut self, next: u64) -> Result<()> {
        write_json(&next, &self.dir.join(SEQ_FILE))?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        for name in file_names(&self.dir)? {
            if name != SEQ_FILE && name.ends_with(".json") {
                fs::remove_file(self.dir.join(name))?;
            }
        }
        Ok(())
    }
}

/// Directory-backed [`TreeStorage`]
#[derive(Debug, Clone)]
pub struct FsTree {
    dir: PathBuf,
}

impl FsTree {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn node_path(&self, prefix: &str, id: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}.json", prefix, id_to_filename(id)))
    }

    /// Rebuild the top-level map from the stored nodes
    fn rebuild_top_children(&self) -> Result<IndexMap<String, String>> {
        let mut top: Vec<FileComponent> = Vec::new();
        for id in self.stored_ids()? {
            if let Some(comp) = self.load(&id)? {
                if !comp.filepath().contains('/') {
                    top.push(comp);
                }
            }
        }
        top.sort_by(|a, b| a.filepath().cmp(b.filepath()));
        let children: IndexMap<String, String> = top
            .iter()
            .map(|c| (c.name().to_string(), c.id().to_string()))
            .collect();
        if !children.is_empty() {
            warn!(dir = %self.dir.display(), "top-level index missing; rebuilt from stored components");
            write_json(&children, &self.dir.join(CHILDREN_FILE))?;
        }
        Ok(children)
    }
}

impl TreeStorage for FsTree {
    fn load(&self, id: &str) -> Result<Option<FileComponent>> {
        for prefix in [FOLDER_PREFIX, FILE_PREFIX] {
            if let Some(record) = read_json_opt::<Value>(&self.node_path(prefix, id))? {
                return FileComponent::from_record(record).map(Some);
            }
        }
        Ok(None)
    }

    fn save(&mut self, comp: &FileComponent) -> Result<()> {
        let (prefix, other) = if comp.is_collection() {
            (FOLDER_PREFIX, FILE_PREFIX)
        } else {
            (FILE_PREFIX, FOLDER_PREFIX)
        };
        write_json(&comp.to_record(), &self.node_path(prefix, comp.id()))?;
        remove_if_present(&self.node_path(other, comp.id()))?;
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<bool> {
        let folder = remove_if_present(&self.node_path(FOLDER_PREFIX, id))?;
        let file = remove_if_present(&self.node_path(FILE_PREFIX, id))?;
        Ok(folder || file)
    }

    fn load_top_children(&self) -> Result<IndexMap<String, String>> {
        match read_json_opt(&self.dir.join(CHILDREN_FILE))? {
            Some(children) => Ok(children),
            None => self.rebuild_top_children(),
        }
    }

    fn save_top_children(&mut self, children: &IndexMap<String, String>) -> Result<()> {
        write_json(children, &self.dir.join(CHILDREN_FILE))?;
        Ok(())
    }

    fn stored_ids(&self) -> Result<Vec<String>> {
        Ok(file_names(&self.dir)?
            .iter()
            .filter_map(|name| {
                let stem = name.strip_suffix(".json")?;
                stem.strip_prefix(FILE_PREFIX)
                    .or_else(|| stem.strip_prefix(FOLDER_PREFIX))
                    .map(filename_to_id)
            })
            .collect())
    }

    fn next_seq(&self) -> Result<u64> {
        Ok(read_json_opt(&self.dir.join(SEQ_FILE))?.unwrap_or(0))
    }

    fn save_next_seq(&mut self, next: u64) -> Result<()> {
        write_json(&next, &self.dir.join(SEQ_FILE))?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        for name in file_names(&self.dir)? {
            let node = name.ends_with(".json")
                && (name.starts_with(FILE_PREFIX) || name.starts_with(FOLDER_PREFIX));
            if node || name == CHILDREN_FILE {
                fs::remove_file(self.dir.join(name))?;
            }
        }
        Ok(())
    }
}

struct FsResource {
    dir: PathBuf,
}

impl ResourceStorage for FsResource {
    fn is_live(&self) -> bool {
        self.dir.join(RES_FILE).is_file()
    }

    fn load_res_data(&self) -> Result<JsonMap> {
        read_json(&self.dir.join(RES_FILE))
    }

    fn save_res_data(&mut self, md: &JsonMap) -> Result<()> {
        write_json(md, &self.dir.join(RES_FILE))?;
        Ok(())
    }

    fn remove(&mut self) -> Result<bool> {
        if !self.dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&self.dir)?;
        Ok(true)
    }
}

/// A [`ResourceStore`] that keeps each record in its own directory
pub struct FsResourceStore {
    root: PathBuf,
    minter: IdMinter,
}

impl FsResourceStore {
    /// Open (creating if necessary) a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>, shoulder: impl Into<String>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let next = read_json_opt(&root.join(SEQ_FILE))?.unwrap_or(1);
        debug!(root = %root.display(), next, "opened filesystem store");
        Ok(Self {
            root,
            minter: IdMinter::new(shoulder, next),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the record with the given id
    pub fn record_dir(&self, id: &str) -> PathBuf {
        self.root.join(id_to_filename(local_id(id)))
    }

    fn save_seq(&self) -> Result<()> {
        write_json(&self.minter.next(), &self.root.join(SEQ_FILE))?;
        Ok(())
    }

    fn create_record(&self, id: &str, dir: &Path) -> Result<()> {
        for sub in ["auths", "refs", "nonfiles", FILES_DIR] {
            fs::create_dir_all(dir.join(sub))?;
        }
        let mut md = JsonMap::new();
        md.insert("@id".to_string(), Value::String(id.to_string()));
        write_json(&md, &dir.join(RES_FILE))?;
        info!(id, dir = %dir.display(), "created record");
        Ok(())
    }
}

impl ResourceStore for FsResourceStore {
    fn open(&mut self, id: Option<&str>) -> Result<Resource> {
        let id = match id {
            Some(id) => id.to_string(),
            None => {
                let id = self.minter.mint();
                self.save_seq()?;
                id
            }
        };
        let dir = self.record_dir(&id);
        if !dir.join(RES_FILE).is_file() {
            self.create_record(&id, &dir)?;
        }
        Ok(Resource::new(
            id,
            Box::new(FsResource { dir: dir.clone() }),
            OrderedObjectList::new(ListKind::Authors, Box::new(FsList::new(dir.join("auths")))),
            OrderedObjectList::new(ListKind::References, Box::new(FsList::new(dir.join("refs")))),
            OrderedObjectList::new(
                ListKind::NonFileComponents,
                Box::new(FsList::new(dir.join("nonfiles"))),
            ),
            FileComponentTree::new(Box::new(FsTree::new(dir.join(FILES_DIR)))),
        ))
    }

    fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.record_dir(id).join(RES_FILE).is_file())
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let dir = self.record_dir(id);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir)?;
        info!(id, "deleted record");
        Ok(true)
    }

    fn reserve_id(&mut self, id: &str) -> Result<()> {
        if self.minter.reserve(id) {
            self.save_seq()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NerdStoreError;
    use serde_json::json;
    use tempfile::tempdir;

    fn md(v: Value) -> JsonMap {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_record_persists_across_stores() -> io::Result<()> {
        let dir = tempdir()?;
        {
            let mut store = FsResourceStore::new(dir.path(), "mds3")?;
            let mut res = store.open(None)?;
            assert_eq!(res.id(), "mds3:0001");
            res.replace_res_data(md(json!({"title": "On disk"})))?;
            res.authors_mut()?
                .append(md(json!({"fn": "Ann", "orcid": "https://orcid.org/0000-0001"})))?;
            res.files_mut()?
                .set_file_at(md(json!({})), Some("d"), None, Some(true))?;
            res.files_mut()?
                .set_file_at(md(json!({"size": 3})), Some("d/x.txt"), None, None)?;
        }

        let mut store = FsResourceStore::new(dir.path(), "mds3")?;
        assert!(store.exists("mds3:0001")?);
        let res = store.open(Some("mds3:0001"))?;
        assert_eq!(res.get_res_data()?["title"], "On disk");
        assert_eq!(res.authors()?.ids()?, vec!["orcid:0000-0001"]);
        assert_eq!(res.files()?.get_by_path("d/x.txt")?.size(), Some(3));
        assert_eq!(store.open(None)?.id(), "mds3:0002");
        Ok(())
    }

    #[test]
    fn test_delete_removes_directory() -> io::Result<()> {
        let dir = tempdir()?;
        let mut store = FsResourceStore::new(dir.path(), "nrd")?;
        let mut res = store.open(Some("nrd:0005"))?;
        let record = store.record_dir("nrd:0005");
        assert!(record.join("res.json").exists());

        assert!(res.delete()?);
        assert!(!record.exists());
        assert!(!store.exists("nrd:0005")?);
        assert!(matches!(
            res.get_res_data().unwrap_err(),
            NerdStoreError::RecordDeleted { .. }
        ));
        assert!(!store.delete("nrd:0005")?);
        Ok(())
    }

    #[test]
    fn test_corrupt_record_reports_storage_format() -> io::Result<()> {
        let dir = tempdir()?;
        let mut store = FsResourceStore::new(dir.path(), "nrd")?;
        let res = store.open(Some("nrd:0001"))?;
        fs::write(store.record_dir("nrd:0001").join("res.json"), "{oops")?;
        assert!(matches!(
            res.get_res_data().unwrap_err(),
            NerdStoreError::StorageFormat(_)
        ));
        Ok(())
    }

    #[test]
    fn test_tree_files_and_children_index() -> io::Result<()> {
        let dir = tempdir()?;
        let files = dir.path().join("files");
        fs::create_dir_all(&files)?;
        let mut tree = FileComponentTree::new(Box::new(FsTree::new(&files)));
        let docs = tree.set_file_at(md(json!({})), Some("docs"), None, Some(true))?;
        let readme = tree.set_file_at(md(json!({})), Some("readme.txt"), None, Some(false))?;
        assert!(files.join(format!("c:{}.json", docs)).exists());
        assert!(files.join(format!("f:{}.json", readme)).exists());

        fs::remove_file(files.join(CHILDREN_FILE))?;
        let tree = FileComponentTree::new(Box::new(FsTree::new(&files)));
        assert_eq!(tree.get_ids_in_subcoll("")?, vec![docs, readme]);
        assert!(files.join(CHILDREN_FILE).exists());
        Ok(())
    }

    #[test]
    fn test_tree_clear_keeps_sequence_and_other_files() -> io::Result<()> {
        let dir = tempdir()?;
        let files = dir.path().join("files");
        fs::create_dir_all(&files)?;
        fs::write(files.join("_fm_summary.json"), "{}")?;
        let mut tree = FileComponentTree::new(Box::new(FsTree::new(&files)));
        tree.set_file_at(md(json!({})), Some("a.txt"), None, None)?;
        tree.empty()?;
        assert_eq!(tree.count()?, 0);
        assert!(files.join("_fm_summary.json").exists());
        assert_eq!(
            tree.set_file_at(md(json!({})), Some("b.txt"), None, None)?,
            "file_1"
        );
        Ok(())
    }

    #[test]
    fn test_list_ids_with_slashes() -> io::Result<()> {
        let dir = tempdir()?;
        let mut list =
            OrderedObjectList::new(ListKind::References, Box::new(FsList::new(dir.path())));
        let id = list.append(md(json!({"doi": "https://doi.org/10.18434/abc"})))?;
        assert_eq!(id, "doi:10.18434/abc");
        assert!(dir.path().join("doi:10.18434::abc.json").exists());
        assert_eq!(list.get(0)?["doi"], "https://doi.org/10.18434/abc");
        list.empty()?;
        assert!(list.is_empty()?);
        Ok(())
    }
}
