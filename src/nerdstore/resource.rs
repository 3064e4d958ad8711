/*!
 * Resource records and the stores that hold them
 */

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::info;

use crate::error::{NerdStoreError, Result};
use crate::nerdstore::fmfs::FileManagerSync;
use crate::nerdstore::list::OrderedObjectList;
use crate::nerdstore::tree::FileComponentTree;
use crate::types::{FileManagerSummary, JsonMap};
use crate::utils::local_id;

static RECORD_SEQ: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+\d*:0*(\d+)$").unwrap());

/// Properties held by the sub-lists rather than the resource itself
const LIST_PROPERTIES: &[&str] = &["authors", "references", "components"];

/// Mints `<shoulder>:<seq>` record identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMinter {
    shoulder: String,
    next: u64,
}

impl IdMinter {
    pub const DEFAULT_SHOULDER: &'static str = "nrd";

    pub fn new(shoulder: impl Into<String>, next: u64) -> Self {
        Self {
            shoulder: shoulder.into(),
            next,
        }
    }

    pub fn next(&self) -> u64 {
        self.next
    }

    pub fn mint(&mut self) -> String {
        let id = format!("{}:{:04}", self.shoulder, self.next);
        self.next += 1;
        id
    }

    /// Advance the sequence past the number embedded in `id`, if any
    ///
    /// Returns true if the sequence changed.
    pub fn reserve(&mut self, id: &str) -> bool {
        let n = RECORD_SEQ
            .captures(local_id(id))
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok());
        match n {
            Some(n) if n >= self.next => {
                self.next = n + 1;
                true
            }
            _ => false,
        }
    }
}

/// Persistence backend for a resource's own properties
pub trait ResourceStorage: Send {
    /// False once the record has been deleted
    fn is_live(&self) -> bool;
    fn load_res_data(&self) -> Result<JsonMap>;
    fn save_res_data(&mut self, md: &JsonMap) -> Result<()>;
    /// Delete the whole record; false if it was already gone
    fn remove(&mut self) -> Result<bool>;
}

/// One metadata record with its authors, references and components
pub struct Resource {
    id: String,
    storage: Box<dyn ResourceStorage>,
    authors: OrderedObjectList,
    references: OrderedObjectList,
    nonfiles: OrderedObjectList,
    files: FileComponentTree,
    fm: Option<FileManagerSync>,
}

impl Resource {
    pub fn new(
        id: impl Into<String>,
        storage: Box<dyn ResourceStorage>,
        authors: OrderedObjectList,
        references: OrderedObjectList,
        nonfiles: OrderedObjectList,
        files: FileComponentTree,
    ) -> Self {
        Self {
            id: id.into(),
            storage,
            authors,
            references,
            nonfiles,
            files,
            fm: None,
        }
    }

    /// Tie the file hierarchy to a file manager
    pub fn with_file_manager(mut self, fm: FileManagerSync) -> Self {
        self.fm = Some(fm);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True once [`Resource::delete`] has been called
    pub fn deleted(&self) -> bool {
        !self.storage.is_live()
    }

    fn ensure_live(&self, op: &str) -> Result<()> {
        if self.deleted() {
            return Err(NerdStoreError::deleted(&self.id, op));
        }
        Ok(())
    }

    pub fn authors(&self) -> Result<&OrderedObjectList> {
        self.ensure_live("read authors")?;
        Ok(&self.authors)
    }

    pub fn authors_mut(&mut self) -> Result<&mut OrderedObjectList> {
        self.ensure_live("update authors")?;
        Ok(&mut self.authors)
    }

    pub fn references(&self) -> Result<&OrderedObjectList> {
        self.ensure_live("read references")?;
        Ok(&self.references)
    }

    pub fn references_mut(&mut self) -> Result<&mut OrderedObjectList> {
        self.ensure_live("update references")?;
        Ok(&mut self.references)
    }

    pub fn nonfiles(&self) -> Result<&OrderedObjectList> {
        self.ensure_live("read non-file components")?;
        Ok(&self.nonfiles)
    }

    pub fn nonfiles_mut(&mut self) -> Result<&mut OrderedObjectList> {
        self.ensure_live("update non-file components")?;
        Ok(&mut self.nonfiles)
    }

    pub fn files(&self) -> Result<&FileComponentTree> {
        self.ensure_live("read files")?;
        Ok(&self.files)
    }

    pub fn files_mut(&mut self) -> Result<&mut FileComponentTree> {
        self.ensure_live("update files")?;
        Ok(&mut self.files)
    }

    /// Resource-level properties only
    pub fn get_res_data(&self) -> Result<JsonMap> {
        self.ensure_live("read")?;
        let mut md = self.storage.load_res_data()?;
        md.insert("@id".to_string(), Value::String(self.id.clone()));
        Ok(md)
    }

    /// The full record; file components are left out unless `incl_files`
    pub fn get_data(&self, incl_files: bool) -> Result<JsonMap> {
        let mut md = self.get_res_data()?;

        let authors = self.authors.get_data()?;
        if !authors.is_empty() {
            md.insert("authors".to_string(), objects(authors));
        }
        let references = self.references.get_data()?;
        if !references.is_empty() {
            md.insert("references".to_string(), objects(references));
        }

        let mut components = self.nonfiles.get_data()?;
        if incl_files {
            components.extend(self.files.get_files()?.iter().map(|c| c.export()));
        }
        if !components.is_empty() {
            md.insert("components".to_string(), objects(components));
        }
        Ok(md)
    }

    /// Replace the resource-level properties, leaving the sub-lists alone
    pub fn replace_res_data(&mut self, mut md: JsonMap) -> Result<()> {
        self.ensure_live("update")?;
        for key in LIST_PROPERTIES {
            md.remove(*key);
        }
        md.insert("@id".to_string(), Value::String(self.id.clone()));
        self.storage.save_res_data(&md)
    }

    /// Replace the resource-level properties and every sub-list present in `md`
    pub fn replace_all_data(&mut self, md: JsonMap) -> Result<()> {
        self.ensure_live("update")?;
        let authors = list_property(&md, "authors")?;
        let references = list_property(&md, "references")?;
        let components = list_property(&md, "components")?;
        self.replace_res_data(md)?;

        if let Some(items) = authors {
            self.authors.replace_all_with(items)?;
        }
        if let Some(items) = references {
            self.references.replace_all_with(items)?;
        }
        if let Some(items) = components {
            let (files, nonfiles): (Vec<JsonMap>, Vec<JsonMap>) = items
                .into_iter()
                .partition(|c| c.contains_key("filepath"));
            self.nonfiles.replace_all_with(nonfiles)?;
            self.files.empty()?;
            self.files.load_file_components(files)?;
        }
        Ok(())
    }

    /// Delete the record; further updates fail with `RecordDeleted`
    pub fn delete(&mut self) -> Result<bool> {
        if self.deleted() {
            return Ok(false);
        }
        let removed = self.storage.remove()?;
        info!(id = %self.id, "deleted resource");
        Ok(removed)
    }

    /// Rescan the file manager space and rebuild the file hierarchy from it
    pub fn update_file_hierarchy(&mut self) -> Result<FileManagerSummary> {
        self.ensure_live("update file hierarchy")?;
        let fm = self.fm.as_mut().ok_or_else(|| not_synced(&self.id))?;
        fm.update_hierarchy(&mut self.files)
    }

    /// Refresh file metadata from the latest scan of the file manager space
    pub fn update_file_metadata(&mut self) -> Result<FileManagerSummary> {
        self.ensure_live("update file metadata")?;
        let fm = self.fm.as_mut().ok_or_else(|| not_synced(&self.id))?;
        fm.update_metadata(&mut self.files)
    }

    /// Summary of the last reconciliation with the file manager
    pub fn fm_summary(&self) -> Result<FileManagerSummary> {
        self.ensure_live("read file manager summary")?;
        let fm = self.fm.as_ref().ok_or_else(|| not_synced(&self.id))?;
        Ok(fm.summary().clone())
    }
}

fn not_synced(id: &str) -> NerdStoreError {
    NerdStoreError::Config(format!("{}: files are not managed by a file manager", id))
}

fn objects(items: Vec<JsonMap>) -> Value {
    Value::Array(items.into_iter().map(Value::Object).collect())
}

fn list_property(md: &JsonMap, key: &str) -> Result<Option<Vec<JsonMap>>> {
    match md.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::Object(m) => Ok(m.clone()),
                other => Err(NerdStoreError::InvalidArgument(format!(
                    "{} entries must be objects, got {}",
                    key, other
                ))),
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        _ => Ok(None),
    }
}

/// A collection of resource records keyed by identifier
pub trait ResourceStore {
    /// Open a record, creating an empty one if it does not exist
    ///
    /// A new identifier is minted when `id` is `None`.
    fn open(&mut self, id: Option<&str>) -> Result<Resource>;

    fn exists(&self, id: &str) -> Result<bool>;

    /// Delete a record; false if it did not exist
    fn delete(&mut self, id: &str) -> Result<bool>;

    /// Keep minted identifiers from colliding with `id`
    fn reserve_id(&mut self, id: &str) -> Result<()>;

    /// Create or overwrite a record from a complete metadata document
    ///
    /// The identifier defaults to the document's `@id`.
    fn load_from(&mut self, rec: JsonMap, id: Option<&str>) -> Result<Resource> {
        let id = id
            .map(str::to_string)
            .or_else(|| rec.get("@id").and_then(Value::as_str).map(str::to_string));
        if let Some(id) = &id {
            self.reserve_id(id)?;
        }
        let mut res = self.open(id.as_deref())?;
        res.replace_all_data(rec)?;
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nerdstore::inmem::InMemoryResourceStore;
    use serde_json::json;

    fn md(v: Value) -> JsonMap {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_minter_formats_and_reserves() {
        let mut minter = IdMinter::new("nrd", 1);
        assert_eq!(minter.mint(), "nrd:0001");
        assert!(minter.reserve("ark:/88434/nrd:0010"));
        assert_eq!(minter.mint(), "nrd:0011");
        assert!(!minter.reserve("nrd:0003"));
        assert!(!minter.reserve("something-else"));
    }

    #[test]
    fn test_open_mints_and_shares_data() {
        let mut store = InMemoryResourceStore::default();
        let mut res = store.open(None).unwrap();
        assert_eq!(res.id(), "nrd:0001");
        res.replace_res_data(md(json!({"title": "T", "authors": [{}]})))
            .unwrap();

        let again = store.open(Some("nrd:0001")).unwrap();
        let data = again.get_res_data().unwrap();
        assert_eq!(data["title"], "T");
        assert!(!data.contains_key("authors"));
        assert_eq!(data["@id"], "nrd:0001");
    }

    #[test]
    fn test_load_from_splits_components() {
        let mut store = InMemoryResourceStore::default();
        let rec = md(json!({
            "@id": "nrd:0007",
            "title": "Loaded",
            "authors": [{"fn": "A"}],
            "references": [{"doi": "https://doi.org/10.1/x"}],
            "components": [
                {"@id": "cmp_0", "title": "landing page"},
                {"@id": "f1", "filepath": "d/a.txt"},
                {"@id": "c1", "@type": ["nrdp:Subcollection"], "filepath": "d"}
            ]
        }));
        let res = store.load_from(rec, None).unwrap();
        assert_eq!(res.id(), "nrd:0007");
        assert_eq!(res.references().unwrap().ids().unwrap(), vec!["doi:10.1/x"]);
        assert_eq!(res.nonfiles().unwrap().count().unwrap(), 1);
        assert_eq!(res.files().unwrap().get_by_path("d/a.txt").unwrap().id(), "f1");

        let data = res.get_data(true).unwrap();
        assert_eq!(data["components"].as_array().map(Vec::len), Some(3));
        let without = res.get_data(false).unwrap();
        assert_eq!(without["components"].as_array().map(Vec::len), Some(1));

        let next = store.open(None).unwrap();
        assert_eq!(next.id(), "nrd:0008");
    }

    #[test]
    fn test_deleted_resource_rejects_access() {
        let mut store = InMemoryResourceStore::default();
        let mut res = store.open(Some("nrd:0002")).unwrap();
        assert!(res.delete().unwrap());
        assert!(res.deleted());
        assert!(!res.delete().unwrap());
        assert!(matches!(
            res.authors_mut(),
            Err(NerdStoreError::RecordDeleted { .. })
        ));
        assert!(res.replace_res_data(JsonMap::new()).is_err());
        assert!(!store.exists("nrd:0002").unwrap());
    }

    #[test]
    fn test_store_delete_marks_open_handles() {
        let mut store = InMemoryResourceStore::default();
        let res = store.open(Some("nrd:0003")).unwrap();
        assert!(store.delete("nrd:0003").unwrap());
        assert!(res.deleted());
        assert!(!store.delete("nrd:0003").unwrap());
    }

    #[test]
    fn test_fm_operations_need_file_manager() {
        let mut store = InMemoryResourceStore::default();
        let mut res = store.open(None).unwrap();
        assert!(matches!(
            res.update_file_hierarchy().unwrap_err(),
            NerdStoreError::Config(_)
        ));
        assert!(res.fm_summary().is_err());
    }
}
