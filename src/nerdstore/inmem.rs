/*!
 * In-memory storage backends
 *
 * Records live only as long as the [`InMemoryResourceStore`] that created
 * them. Every [`Resource`] opened for the same id shares the same underlying
 * data, so changes made through one handle are visible through the others.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::info;

use crate::error::{NerdStoreError, Result};
use crate::nerdstore::list::{ListKind, ListStorage, OrderedObjectList};
use crate::nerdstore::resource::{IdMinter, Resource, ResourceStorage, ResourceStore};
use crate::nerdstore::tree::{FileComponentTree, TreeStorage};
use crate::types::{FileComponent, JsonMap};

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock()
        .map_err(|_| NerdStoreError::Storage("in-memory record lock poisoned".to_string()))
}

#[derive(Debug, Default)]
struct ListData {
    ids: Vec<String>,
    items: HashMap<String, JsonMap>,
    next: u64,
}

/// Memory-backed [`ListStorage`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryList(Arc<Mutex<ListData>>);

impl ListStorage for InMemoryList {
    fn load_ids(&self) -> Result<Vec<String>> {
        Ok(lock(&self.0)?.ids.clone())
    }

    fn save_ids(&mut self, ids: &[String]) -> Result<()> {
        lock(&self.0)?.ids = ids.to_vec();
        Ok(())
    }

    fn load_item(&self, id: &str) -> Result<Option<JsonMap>> {
        Ok(lock(&self.0)?.items.get(id).cloned())
    }

    fn save_item(&mut self, id: &str, item: &JsonMap) -> Result<()> {
        lock(&self.0)?.items.insert(id.to_string(), item.clone());
        Ok(())
    }

    fn remove_item(&mut self, id: &str) -> Result<()> {
        lock(&self.0)?.items.remove(id);
        Ok(())
    }

    fn next_seq(&self) -> Result<u64> {
        Ok(lock(&self.0)?.next)
    }

    fn save_next_seq(&mut self, next: u64) -> Result<()> {
        lock(&self.0)?.next = next;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let mut data = lock(&self.0)?;
        data.ids.clear();
        data.items.clear();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TreeData {
    nodes: HashMap<String, FileComponent>,
    top: IndexMap<String, String>,
    next: u64,
}

/// Memory-backed [`TreeStorage`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryTree(Arc<Mutex<TreeData>>);

impl TreeStorage for InMemoryTree {
    fn load(&self, id: &str) -> Result<Option<FileComponent>> {
        Ok(lock(&self.0)?.nodes.get(id).cloned())
    }

    fn save(&mut self, comp: &FileComponent) -> Result<()> {
        lock(&self.0)?
            .nodes
            .insert(comp.id().to_string(), comp.clone());
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<bool> {
        Ok(lock(&self.0)?.nodes.remove(id).is_some())
    }

    fn load_top_children(&self) -> Result<IndexMap<String, String>> {
        Ok(lock(&self.0)?.top.clone())
    }

    fn save_top_children(&mut self, children: &IndexMap<String, String>) -> Result<()> {
        lock(&self.0)?.top = children.clone();
        Ok(())
    }

    fn stored_ids(&self) -> Result<Vec<String>> {
        Ok(lock(&self.0)?.nodes.keys().cloned().collect())
    }

    fn next_seq(&self) -> Result<u64> {
        Ok(lock(&self.0)?.next)
    }

    fn save_next_seq(&mut self, next: u64) -> Result<()> {
        lock(&self.0)?.next = next;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let mut data = lock(&self.0)?;
        data.nodes.clear();
        data.top.clear();
        Ok(())
    }
}

/// The shared parts of one in-memory record
#[derive(Debug, Clone)]
struct SharedRecord {
    res: Arc<Mutex<JsonMap>>,
    live: Arc<AtomicBool>,
    authors: InMemoryList,
    references: InMemoryList,
    nonfiles: InMemoryList,
    files: InMemoryTree,
}

impl SharedRecord {
    fn new(id: &str) -> Self {
        let mut res = JsonMap::new();
        res.insert("@id".to_string(), Value::String(id.to_string()));
        Self {
            res: Arc::new(Mutex::new(res)),
            live: Arc::new(AtomicBool::new(true)),
            authors: InMemoryList::default(),
            references: InMemoryList::default(),
            nonfiles: InMemoryList::default(),
            files: InMemoryTree::default(),
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn open(&self, id: &str) -> Resource {
        Resource::new(
            id,
            Box::new(InMemoryResource {
                res: Arc::clone(&self.res),
                live: Arc::clone(&self.live),
            }),
            OrderedObjectList::new(ListKind::Authors, Box::new(self.authors.clone())),
            OrderedObjectList::new(ListKind::References, Box::new(self.references.clone())),
            OrderedObjectList::new(ListKind::NonFileComponents, Box::new(self.nonfiles.clone())),
            FileComponentTree::new(Box::new(self.files.clone())),
        )
    }
}

struct InMemoryResource {
    res: Arc<Mutex<JsonMap>>,
    live: Arc<AtomicBool>,
}

impl ResourceStorage for InMemoryResource {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn load_res_data(&self) -> Result<JsonMap> {
        Ok(lock(&self.res)?.clone())
    }

    fn save_res_data(&mut self, md: &JsonMap) -> Result<()> {
        *lock(&self.res)? = md.clone();
        Ok(())
    }

    fn remove(&mut self) -> Result<bool> {
        Ok(self.live.swap(false, Ordering::SeqCst))
    }
}

/// A [`ResourceStore`] that keeps records in memory
pub struct InMemoryResourceStore {
    records: HashMap<String, SharedRecord>,
    minter: IdMinter,
}

impl InMemoryResourceStore {
    /// Create an empty store minting ids with the given shoulder
    pub fn new(shoulder: impl Into<String>) -> Self {
        Self {
            records: HashMap::new(),
            minter: IdMinter::new(shoulder, 1),
        }
    }
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new(IdMinter::DEFAULT_SHOULDER)
    }
}

impl ResourceStore for InMemoryResourceStore {
    fn open(&mut self, id: Option<&str>) -> Result<Resource> {
        let id = match id {
            Some(id) => id.to_string(),
            None => self.minter.mint(),
        };
        let record = self
            .records
            .entry(id.clone())
            .and_modify(|r| {
                if !r.is_live() {
                    *r = SharedRecord::new(&id);
                }
            })
            .or_insert_with(|| {
                info!(id = %id, "created in-memory record");
                SharedRecord::new(&id)
            });
        Ok(record.open(&id))
    }

    fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.records.get(id).map_or(false, SharedRecord::is_live))
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        match self.records.remove(id) {
            Some(record) => {
                record.live.store(false, Ordering::SeqCst);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn reserve_id(&mut self, id: &str) -> Result<()> {
        self.minter.reserve(id);
        Ok(())
    }
}
