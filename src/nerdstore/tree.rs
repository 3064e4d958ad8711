/*!
 * Hierarchy of file and folder components
 *
 * [`FileComponentTree`] keeps every file component of a resource addressable by
 * id and by slash-delimited path. Folders carry an ordered map of child names
 * to child ids; the top level of the hierarchy is a similar map owned by the
 * storage backend.
 */

use std::collections::VecDeque;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::error::{NerdStoreError, Result};
use crate::nerdstore::list::{reorder, sequence_number};
use crate::types::{FileComponent, JsonMap, Member};
use crate::utils::{depth, dirname};

/// Prefix of minted file component identifiers
const FILE_ID_PREFIX: &str = "file";

/// Persistence backend for a [`FileComponentTree`]
pub trait TreeStorage: Send {
    fn load(&self, id: &str) -> Result<Option<FileComponent>>;
    fn save(&mut self, comp: &FileComponent) -> Result<()>;
    /// Returns false if nothing was stored under the id
    fn remove(&mut self, id: &str) -> Result<bool>;
    /// Name to id map of the top-level components
    fn load_top_children(&self) -> Result<IndexMap<String, String>>;
    fn save_top_children(&mut self, children: &IndexMap<String, String>) -> Result<()>;
    /// Every stored id, whether or not it is reachable from the top
    fn stored_ids(&self) -> Result<Vec<String>>;
    fn next_seq(&self) -> Result<u64>;
    fn save_next_seq(&mut self, next: u64) -> Result<()>;
    /// Remove every component; the id sequence is kept
    fn clear(&mut self) -> Result<()>;
}

/// The file and folder components of one resource
pub struct FileComponentTree {
    storage: Box<dyn TreeStorage>,
}

impl FileComponentTree {
    pub fn new(storage: Box<dyn TreeStorage>) -> Self {
        Self { storage }
    }

    /// Look up a component by id, returning `None` when absent
    pub fn find_by_id(&self, id: &str) -> Result<Option<FileComponent>> {
        self.storage.load(id)
    }

    /// Look up a component by id
    pub fn get_by_id(&self, id: &str) -> Result<FileComponent> {
        self.find_by_id(id)?
            .ok_or_else(|| NerdStoreError::not_found(id))
    }

    /// Identifier of the component at `path`, if any
    pub fn find_id_by_path(&self, path: &str) -> Result<Option<String>> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Ok(None);
        }
        let mut children = self.storage.load_top_children()?;
        let mut segments = path.split('/').peekable();
        while let Some(name) = segments.next() {
            let Some(id) = children.get(name).cloned() else {
                return Ok(None);
            };
            if segments.peek().is_none() {
                return Ok(Some(id));
            }
            match self.storage.load(&id)? {
                Some(FileComponent::Folder(folder)) => children = folder.children,
                _ => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Look up a component by path, returning `None` when absent
    pub fn find_by_path(&self, path: &str) -> Result<Option<FileComponent>> {
        match self.find_id_by_path(path)? {
            Some(id) => self.find_by_id(&id),
            None => Ok(None),
        }
    }

    /// Look up a component by path
    pub fn get_by_path(&self, path: &str) -> Result<FileComponent> {
        self.find_by_path(path)?
            .ok_or_else(|| NerdStoreError::not_found(path))
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.find_by_id(id)?.is_some())
    }

    pub fn path_exists(&self, path: &str) -> Result<bool> {
        Ok(self.find_id_by_path(path)?.is_some())
    }

    pub fn path_is_collection(&self, path: &str) -> Result<bool> {
        Ok(self
            .find_by_path(path)?
            .map(|c| c.is_collection())
            .unwrap_or(false))
    }

    /// Every reachable id, breadth first from the top level
    pub fn ids(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut queue: VecDeque<String> =
            self.storage.load_top_children()?.into_values().collect();
        while let Some(id) = queue.pop_front() {
            if let Some(FileComponent::Folder(folder)) = self.storage.load(&id)? {
                queue.extend(folder.children.into_values());
            }
            out.push(id);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.ids()?.len())
    }

    /// Every reachable component, breadth first
    pub fn get_files(&self) -> Result<Vec<FileComponent>> {
        self.ids()?.iter().map(|id| self.get_by_id(id)).collect()
    }

    /// Child ids of the folder at `path`; an empty path is the top level
    pub fn get_ids_in_subcoll(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.children_of(path)?.into_values().collect())
    }

    /// Members of the folder at `path`; an empty path is the top level
    pub fn get_subcoll_members(&self, path: &str) -> Result<Vec<Member>> {
        Ok(self
            .children_of(path)?
            .into_iter()
            .map(|(name, id)| Member { id, name })
            .collect())
    }

    fn children_of(&self, path: &str) -> Result<IndexMap<String, String>> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return self.storage.load_top_children();
        }
        match self.find_by_path(path)? {
            Some(FileComponent::Folder(folder)) => Ok(folder.children),
            _ => Err(NerdStoreError::not_found(path)),
        }
    }

    /// Reorder the children of the folder at `path`
    pub fn set_order_in_subcoll<S: AsRef<str>>(&mut self, path: &str, order: &[S]) -> Result<()> {
        let path = path.trim_matches('/');
        let children = self.children_of(path)?;
        let ids: Vec<String> = children.values().cloned().collect();
        let by_id: IndexMap<&str, &str> = children
            .iter()
            .map(|(name, id)| (id.as_str(), name.as_str()))
            .collect();
        let reordered: IndexMap<String, String> = reorder(&ids, order)
            .into_iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|name| (name.to_string(), id)))
            .collect();
        self.save_children_of(path, reordered)
    }

    fn save_children_of(&mut self, path: &str, children: IndexMap<String, String>) -> Result<()> {
        if path.is_empty() {
            return self.storage.save_top_children(&children);
        }
        let mut comp = self.get_by_path(path)?;
        if let Some(folder) = comp.as_folder_mut() {
            folder.children = children;
        }
        self.storage.save(&comp)
    }

    /// Create or update a component, returning its id
    ///
    /// An existing component is matched by `id` (or the metadata's `@id`)
    /// first and by `filepath` otherwise. Changing the path of a matched
    /// component moves it; a folder keeps its children. A different
    /// component already at the target path is replaced unless it is a
    /// non-empty folder. The parent folder must already exist.
    pub fn set_file_at(
        &mut self,
        md: JsonMap,
        filepath: Option<&str>,
        id: Option<&str>,
        as_collection: Option<bool>,
    ) -> Result<String> {
        let mut comp = FileComponent::from_metadata(md, as_collection)?;
        let req_id = id
            .map(str::to_string)
            .or_else(|| Some(comp.id().to_string()))
            .filter(|i| !i.is_empty());

        let by_id = match &req_id {
            Some(i) => self.find_by_id(i)?,
            None => None,
        };
        let target = filepath
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .or_else(|| Some(comp.filepath().to_string()).filter(|p| !p.is_empty()))
            .or_else(|| by_id.as_ref().map(|c| c.filepath().to_string()))
            .ok_or(NerdStoreError::FilepathNotSpecified)?;
        let destfile = self.find_by_path(&target)?;
        let oldfile = match (by_id, &req_id) {
            (Some(found), _) => Some(found),
            (None, None) => destfile.clone(),
            (None, Some(_)) => None,
        };

        let final_id = match (&oldfile, req_id) {
            (Some(old), _) => old.id().to_string(),
            (None, Some(given)) => {
                self.reserve_id(&given)?;
                given
            }
            (None, None) => self.new_id()?,
        };
        comp.set_id(final_id.clone());
        comp.set_filepath(target.clone());

        if let Some(old) = &oldfile {
            let non_empty = old.as_folder().map_or(false, |f| !f.children.is_empty());
            if non_empty && !comp.is_collection() {
                return Err(NerdStoreError::removal_disallowed(
                    old.filepath(),
                    "converting a non-empty folder to a file would discard its contents",
                ));
            }
            if old.is_collection() && target.starts_with(&format!("{}/", old.filepath())) {
                return Err(NerdStoreError::InvalidArgument(format!(
                    "cannot move {} inside itself ({})",
                    old.filepath(),
                    target
                )));
            }
        }

        let parent = dirname(&target);
        if !parent.is_empty() && !self.path_is_collection(parent)? {
            return Err(NerdStoreError::not_found(parent));
        }

        if let Some(dest) = &destfile {
            let non_empty = dest.as_folder().map_or(false, |f| !f.children.is_empty());
            if dest.id() != final_id {
                if non_empty {
                    return Err(NerdStoreError::removal_disallowed(
                        &target,
                        "destination is a non-empty folder",
                    ));
                }
                debug!(id = dest.id(), path = %target, "replacing component at destination");
                self.deregister(dest)?;
                self.storage.remove(dest.id())?;
            }
        }

        match (&oldfile, comp.as_folder_mut()) {
            (Some(FileComponent::Folder(old)), Some(new)) => new.children = old.children.clone(),
            (_, Some(new)) => new.children.clear(),
            _ => {}
        }

        let moved = match &oldfile {
            Some(old) if old.filepath() != target => {
                self.deregister(old)?;
                true
            }
            _ => false,
        };

        self.storage.save(&comp)?;
        self.register(&comp)?;
        if moved {
            debug!(id = %final_id, path = %target, "moved component");
            self.repath_descendants(&comp)?;
        }
        Ok(final_id)
    }

    /// Store a component value directly
    pub fn set_component(&mut self, comp: &FileComponent) -> Result<String> {
        self.set_file_at(
            comp.to_record(),
            Some(comp.filepath()),
            Some(comp.id()).filter(|i| !i.is_empty()),
            Some(comp.is_collection()),
        )
    }

    /// Delete a file or empty folder; false if the id is unknown
    pub fn delete_file(&mut self, id: &str) -> Result<bool> {
        let Some(comp) = self.find_by_id(id)? else {
            return Ok(false);
        };
        if let Some(folder) = comp.as_folder() {
            if !folder.children.is_empty() {
                return Err(NerdStoreError::removal_disallowed(
                    comp.filepath(),
                    "folder is not empty",
                ));
            }
        }
        self.deregister(&comp)?;
        self.storage.remove(id)?;
        debug!(id, path = comp.filepath(), "deleted component");
        Ok(true)
    }

    /// Move the component identified by id or path to `new_path`
    ///
    /// If `new_path` names an existing folder the component is placed inside
    /// it under its current name.
    pub fn move_file(&mut self, id_or_path: &str, new_path: &str) -> Result<String> {
        let comp = match self.find_by_id(id_or_path)? {
            Some(c) => c,
            None => self.get_by_path(id_or_path)?,
        };
        let mut target = new_path.trim_matches('/').to_string();
        if target.is_empty() {
            target = comp.name().to_string();
        }
        if comp.filepath() == target {
            return Ok(comp.id().to_string());
        }
        if let Some(dest) = self.find_by_path(&target)? {
            if dest.is_collection() && dest.id() != comp.id() {
                target = format!("{}/{}", target, comp.name());
            }
        }
        self.set_file_at(
            comp.to_record(),
            Some(&target),
            Some(comp.id()),
            Some(comp.is_collection()),
        )
    }

    /// Give an existing component a new identifier
    pub fn reassign_id(&mut self, old_id: &str, new_id: &str) -> Result<()> {
        if old_id == new_id {
            return Ok(());
        }
        if self.exists(new_id)? {
            return Err(NerdStoreError::MismatchedIdentifier {
                requested: new_id.to_string(),
                current: old_id.to_string(),
            });
        }
        let mut comp = self.get_by_id(old_id)?;
        comp.set_id(new_id);
        self.reserve_id(new_id)?;
        self.storage.remove(old_id)?;
        self.storage.save(&comp)?;

        let parent = dirname(comp.filepath()).to_string();
        let mut children = self.children_of(&parent)?;
        if let Some(slot) = children.get_mut(comp.name()) {
            if slot == old_id {
                *slot = new_id.to_string();
            }
        }
        self.save_children_of(&parent, children)
    }

    /// Remove every component
    pub fn empty(&mut self) -> Result<()> {
        self.storage.clear()
    }

    /// Bulk-load exported components in any order
    ///
    /// Parents are created before their children and `has_member` lists set
    /// the order of each folder's children.
    pub fn load_file_components(&mut self, comps: Vec<JsonMap>) -> Result<()> {
        let mut pending = Vec::with_capacity(comps.len());
        let mut orderings = Vec::new();
        for md in comps {
            let path = md
                .get("filepath")
                .and_then(Value::as_str)
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .ok_or(NerdStoreError::FilepathNotSpecified)?;
            if let Some(Value::Array(members)) = md.get("has_member") {
                let order: Vec<String> = members
                    .iter()
                    .filter_map(|m| m.get("@id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();
                orderings.push((path.clone(), order));
            }
            pending.push((path, md));
        }
        pending.sort_by_key(|(path, _)| depth(path));
        for (path, md) in pending {
            self.set_file_at(md, Some(&path), None, None)?;
        }
        for (path, order) in orderings {
            if self.path_is_collection(&path)? {
                self.set_order_in_subcoll(&path, &order)?;
            }
        }
        Ok(())
    }

    /// Mint a fresh component identifier
    pub fn new_id(&mut self) -> Result<String> {
        let next = self.storage.next_seq()?;
        self.storage.save_next_seq(next + 1)?;
        Ok(format!("{}_{}", FILE_ID_PREFIX, next))
    }

    /// Keep minted ids from colliding with an externally supplied one
    pub fn reserve_id(&mut self, id: &str) -> Result<()> {
        if let Some(n) = sequence_number(id) {
            if n >= self.storage.next_seq()? {
                self.storage.save_next_seq(n + 1)?;
            }
        }
        Ok(())
    }

    fn register(&mut self, comp: &FileComponent) -> Result<()> {
        let parent = dirname(comp.filepath()).to_string();
        let mut children = self.children_of(&parent)?;
        children.insert(comp.name().to_string(), comp.id().to_string());
        self.save_children_of(&parent, children)
    }

    fn deregister(&mut self, comp: &FileComponent) -> Result<()> {
        let parent = dirname(comp.filepath()).to_string();
        let mut children = match self.children_of(&parent) {
            Ok(children) => children,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if children.get(comp.name()).map(String::as_str) == Some(comp.id()) {
            children.shift_remove(comp.name());
            self.save_children_of(&parent, children)?;
        }
        Ok(())
    }

    fn repath_descendants(&mut self, folder: &FileComponent) -> Result<()> {
        let Some(sub) = folder.as_folder() else {
            return Ok(());
        };
        for (name, child_id) in &sub.children {
            if let Some(mut child) = self.storage.load(child_id)? {
                child.set_filepath(format!("{}/{}", sub.filepath, name));
                self.storage.save(&child)?;
                if child.is_collection() {
                    self.repath_descendants(&child)?;
                }
            }
        }
        Ok(())
    }
}
