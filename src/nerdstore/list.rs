/*!
 * Ordered, identifier-keyed lists of metadata objects
 *
 * Authors, references and non-file components of a resource are each kept in
 * an [`OrderedObjectList`]. The list logic lives here; persistence is delegated
 * to a [`ListStorage`] backend and every mutation is written through
 * immediately.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use strum::Display;
use tracing::debug;

use crate::error::{NerdStoreError, Result};
use crate::types::JsonMap;

static SEQ_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+_(\d+)$").unwrap());
static ORCID_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https://orcid.org/").unwrap());
static DOI_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https://doi.org/").unwrap());

/// Persistence backend for an [`OrderedObjectList`]
pub trait ListStorage: Send {
    /// Identifiers in list order
    fn load_ids(&self) -> Result<Vec<String>>;
    fn save_ids(&mut self, ids: &[String]) -> Result<()>;
    fn load_item(&self, id: &str) -> Result<Option<JsonMap>>;
    fn save_item(&mut self, id: &str, item: &JsonMap) -> Result<()>;
    fn remove_item(&mut self, id: &str) -> Result<()>;
    /// Next value of the id sequence
    fn next_seq(&self) -> Result<u64>;
    fn save_next_seq(&mut self, next: u64) -> Result<()>;
    /// Remove every item; the id sequence is kept
    fn clear(&mut self) -> Result<()>;
}

/// Which resource property a list holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ListKind {
    #[strum(serialize = "authors")]
    Authors,
    #[strum(serialize = "references")]
    References,
    #[strum(serialize = "nonfiles")]
    NonFileComponents,
}

impl ListKind {
    /// Prefix of minted identifiers
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ListKind::Authors => "auth",
            ListKind::References => "ref",
            ListKind::NonFileComponents => "cmp",
        }
    }

    /// Identifier suggested by the item's own properties
    fn natural_id(&self, item: &JsonMap) -> Option<String> {
        let (key, pattern, replacement) = match self {
            ListKind::Authors => ("orcid", &*ORCID_URL, "orcid:"),
            ListKind::References => ("doi", &*DOI_URL, "doi:"),
            ListKind::NonFileComponents => return None,
        };
        item.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(|s| pattern.replace(s, replacement).into_owned())
    }
}

/// Address of an item: its identifier or its position
///
/// Positions may be negative, counting back from the end of the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKey {
    Id(String),
    Pos(isize),
}

impl From<&str> for ItemKey {
    fn from(id: &str) -> Self {
        ItemKey::Id(id.to_string())
    }
}

impl From<String> for ItemKey {
    fn from(id: String) -> Self {
        ItemKey::Id(id)
    }
}

impl From<&String> for ItemKey {
    fn from(id: &String) -> Self {
        ItemKey::Id(id.clone())
    }
}

impl From<isize> for ItemKey {
    fn from(pos: isize) -> Self {
        ItemKey::Pos(pos)
    }
}

impl From<i32> for ItemKey {
    fn from(pos: i32) -> Self {
        ItemKey::Pos(pos as isize)
    }
}

impl From<usize> for ItemKey {
    fn from(pos: usize) -> Self {
        ItemKey::Pos(pos as isize)
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKey::Id(id) => write!(f, "{}", id),
            ItemKey::Pos(pos) => write!(f, "position {}", pos),
        }
    }
}

/// Where [`OrderedObjectList::move_item`] should place an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Absolute index, clamped to the list bounds
    To(usize),
    /// Offset from the current index, clamped to the list bounds
    By(isize),
    /// Last place in the list
    End,
}

/// An ordered list of metadata objects with unique `@id`s
pub struct OrderedObjectList {
    kind: ListKind,
    storage: Box<dyn ListStorage>,
}

impl OrderedObjectList {
    pub fn new(kind: ListKind, storage: Box<dyn ListStorage>) -> Self {
        Self { kind, storage }
    }

    pub fn kind(&self) -> ListKind {
        self.kind
    }

    /// Identifiers in list order
    pub fn ids(&self) -> Result<Vec<String>> {
        self.storage.load_ids()
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.ids()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.count()? == 0)
    }

    /// True if the id is in the list or the position is in range
    pub fn contains(&self, key: impl Into<ItemKey>) -> Result<bool> {
        let ids = self.ids()?;
        Ok(resolve(&ids, &key.into()).is_some())
    }

    /// Look up an item, returning `None` when it is absent
    pub fn find(&self, key: impl Into<ItemKey>) -> Result<Option<JsonMap>> {
        let ids = self.ids()?;
        match resolve(&ids, &key.into()) {
            Some((_, id)) => self.load(id).map(Some),
            None => Ok(None),
        }
    }

    /// Look up an item by id or position
    pub fn get(&self, key: impl Into<ItemKey>) -> Result<JsonMap> {
        let key = key.into();
        self.find(key.clone())?
            .ok_or_else(|| NerdStoreError::not_found(key.to_string()))
    }

    /// Every item in list order
    pub fn get_data(&self) -> Result<Vec<JsonMap>> {
        self.ids()?.iter().map(|id| self.load(id)).collect()
    }

    /// Add an item to the end of the list, returning its id
    pub fn append(&mut self, item: JsonMap) -> Result<String> {
        let ids = self.ids()?;
        let pos = ids.len();
        self.add(ids, pos, item)
    }

    /// Add an item at `pos`, returning its id
    ///
    /// Negative positions count back from the end; out-of-range positions are
    /// clamped to the ends of the list.
    pub fn insert(&mut self, pos: isize, item: JsonMap) -> Result<String> {
        let ids = self.ids()?;
        let len = ids.len() as isize;
        let pos = if pos < 0 { len + pos } else { pos };
        let pos = pos.clamp(0, len) as usize;
        self.add(ids, pos, item)
    }

    fn add(&mut self, mut ids: Vec<String>, pos: usize, mut item: JsonMap) -> Result<String> {
        let id = self.select_id(&ids, &item)?;
        item.insert("@id".to_string(), Value::String(id.clone()));
        self.storage.save_item(&id, &item)?;
        ids.insert(pos, id.clone());
        self.storage.save_ids(&ids)?;
        debug!(list = %self.kind, id = %id, pos, "added item");
        Ok(id)
    }

    /// Replace the item at the given key with new metadata
    pub fn set(&mut self, key: impl Into<ItemKey>, mut item: JsonMap) -> Result<String> {
        let key = key.into();
        let ids = self.ids()?;
        let (_, id) =
            resolve(&ids, &key).ok_or_else(|| NerdStoreError::not_found(key.to_string()))?;
        let id = id.to_string();
        item.insert("@id".to_string(), Value::String(id.clone()));
        self.storage.save_item(&id, &item)?;
        Ok(id)
    }

    /// Remove and return an item
    pub fn pop(&mut self, key: impl Into<ItemKey>) -> Result<JsonMap> {
        let key = key.into();
        let mut ids = self.ids()?;
        let (pos, id) =
            resolve(&ids, &key).ok_or_else(|| NerdStoreError::not_found(key.to_string()))?;
        let id = id.to_string();
        let item = self.load(&id)?;
        ids.remove(pos);
        self.storage.save_ids(&ids)?;
        self.storage.remove_item(&id)?;
        Ok(item)
    }

    /// Relocate an item, returning its new position
    pub fn move_item(&mut self, key: impl Into<ItemKey>, to: Position) -> Result<usize> {
        let key = key.into();
        let mut ids = self.ids()?;
        let (old, id) =
            resolve(&ids, &key).ok_or_else(|| NerdStoreError::not_found(key.to_string()))?;
        let id = id.to_string();
        let last = ids.len() - 1;
        let new = match to {
            Position::To(pos) => pos.min(last),
            Position::By(offset) => (old as isize + offset).clamp(0, last as isize) as usize,
            Position::End => last,
        };
        if new != old {
            ids.remove(old);
            ids.insert(new, id);
            self.storage.save_ids(&ids)?;
        }
        Ok(new)
    }

    /// Reorder the list to follow `order`
    ///
    /// Unknown ids are ignored and ids missing from `order` keep their
    /// relative order after the given ones.
    pub fn set_order<S: AsRef<str>>(&mut self, order: &[S]) -> Result<()> {
        let ids = self.ids()?;
        let reordered = reorder(&ids, order);
        self.storage.save_ids(&reordered)
    }

    /// Remove every item
    pub fn empty(&mut self) -> Result<()> {
        self.storage.clear()
    }

    /// Replace the whole list with the given items
    pub fn replace_all_with(&mut self, items: Vec<JsonMap>) -> Result<()> {
        self.empty()?;
        for item in items {
            self.append(item)?;
        }
        Ok(())
    }

    fn load(&self, id: &str) -> Result<JsonMap> {
        self.storage.load_item(id)?.ok_or_else(|| {
            NerdStoreError::StorageFormat(format!(
                "{}: listed item {} has no stored metadata",
                self.kind, id
            ))
        })
    }

    fn select_id(&mut self, ids: &[String], item: &JsonMap) -> Result<String> {
        let given = item
            .get("@id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        if let Some(id) = given {
            if !ids.iter().any(|i| i == id) {
                self.reserve_id(id)?;
                return Ok(id.to_string());
            }
        }
        if let Some(id) = self.kind.natural_id(item) {
            if !ids.contains(&id) {
                return Ok(id);
            }
        }
        self.new_id()
    }

    fn new_id(&mut self) -> Result<String> {
        let next = self.storage.next_seq()?;
        self.storage.save_next_seq(next + 1)?;
        Ok(format!("{}_{}", self.kind.id_prefix(), next))
    }

    fn reserve_id(&mut self, id: &str) -> Result<()> {
        if let Some(n) = sequence_number(id) {
            if n >= self.storage.next_seq()? {
                self.storage.save_next_seq(n + 1)?;
            }
        }
        Ok(())
    }
}

/// Sequence number embedded in a minted `prefix_N` identifier
pub(crate) fn sequence_number(id: &str) -> Option<u64> {
    SEQ_ID
        .captures(id)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Apply a requested ordering to a list of ids
pub(crate) fn reorder<S: AsRef<str>>(ids: &[String], order: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in order.iter().map(AsRef::as_ref) {
        if ids.iter().any(|i| i == id) && !out.iter().any(|o| o == id) {
            out.push(id.to_string());
        }
    }
    for id in ids {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

fn resolve<'a>(ids: &'a [String], key: &ItemKey) -> Option<(usize, &'a str)> {
    match key {
        ItemKey::Id(id) => ids
            .iter()
            .position(|i| i == id)
            .map(|pos| (pos, ids[pos].as_str())),
        ItemKey::Pos(pos) => {
            let len = ids.len() as isize;
            let idx = if *pos < 0 { len + pos } else { *pos };
            if (0..len).contains(&idx) {
                Some((idx as usize, ids[idx as usize].as_str()))
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nerdstore::inmem::InMemoryList;
    use serde_json::json;

    fn item(v: Value) -> JsonMap {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn list(kind: ListKind) -> OrderedObjectList {
        OrderedObjectList::new(kind, Box::new(InMemoryList::default()))
    }

    #[test]
    fn test_append_mints_sequential_ids() {
        let mut l = list(ListKind::NonFileComponents);
        assert_eq!(l.append(item(json!({"title": "a"}))).unwrap(), "cmp_0");
        assert_eq!(l.append(item(json!({"title": "b"}))).unwrap(), "cmp_1");
        assert_eq!(l.get(-1).unwrap()["title"], "b");
        assert_eq!(l.get("cmp_0").unwrap()["@id"], "cmp_0");
    }

    #[test]
    fn test_given_ids_are_reserved() {
        let mut l = list(ListKind::NonFileComponents);
        assert_eq!(l.append(item(json!({"@id": "cmp_5"}))).unwrap(), "cmp_5");
        assert_eq!(l.append(item(json!({}))).unwrap(), "cmp_6");
        // a duplicate id is replaced by a fresh one
        assert_eq!(l.append(item(json!({"@id": "cmp_5"}))).unwrap(), "cmp_7");
    }

    #[test]
    fn test_author_and_reference_natural_ids() {
        let mut authors = list(ListKind::Authors);
        let id = authors
            .append(item(json!({"orcid": "https://orcid.org/0000-0001-2345-6789"})))
            .unwrap();
        assert_eq!(id, "orcid:0000-0001-2345-6789");
        let again = authors
            .append(item(json!({"orcid": "https://orcid.org/0000-0001-2345-6789"})))
            .unwrap();
        assert_eq!(again, "auth_0");

        let mut refs = list(ListKind::References);
        let id = refs
            .append(item(json!({"doi": "https://doi.org/10.1/xyz"})))
            .unwrap();
        assert_eq!(id, "doi:10.1/xyz");
    }

    #[test]
    fn test_insert_clamps_and_counts_from_end() {
        let mut l = list(ListKind::NonFileComponents);
        l.append(item(json!({"@id": "a"}))).unwrap();
        l.append(item(json!({"@id": "b"}))).unwrap();
        l.insert(99, item(json!({"@id": "z"}))).unwrap();
        l.insert(-100, item(json!({"@id": "first"}))).unwrap();
        l.insert(-1, item(json!({"@id": "mid"}))).unwrap();
        assert_eq!(l.ids().unwrap(), vec!["first", "a", "b", "mid", "z"]);
    }

    #[test]
    fn test_move_absolute_relative_and_end() {
        let mut l = list(ListKind::NonFileComponents);
        for id in ["a", "b", "c", "d"] {
            l.append(item(json!({"@id": id}))).unwrap();
        }
        assert_eq!(l.move_item("a", Position::To(2)).unwrap(), 2);
        assert_eq!(l.ids().unwrap(), vec!["b", "c", "a", "d"]);
        assert_eq!(l.move_item("a", Position::To(50)).unwrap(), 3);
        assert_eq!(l.move_item("a", Position::By(-2)).unwrap(), 1);
        assert_eq!(l.move_item(0, Position::End).unwrap(), 3);
        assert_eq!(l.move_item("c", Position::By(-9)).unwrap(), 0);
        assert_eq!(l.ids().unwrap(), vec!["c", "a", "d", "b"]);
        assert_eq!(l.count().unwrap(), 4);
    }

    #[test]
    fn test_set_order_ignores_unknown_and_appends_missing() {
        let mut l = list(ListKind::NonFileComponents);
        for id in ["a", "b", "c"] {
            l.append(item(json!({"@id": id}))).unwrap();
        }
        l.set_order(&["c", "ghost", "a", "c"]).unwrap();
        assert_eq!(l.ids().unwrap(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_set_pop_and_missing_keys() {
        let mut l = list(ListKind::NonFileComponents);
        l.append(item(json!({"@id": "a", "v": 1}))).unwrap();
        l.set(0, item(json!({"@id": "other", "v": 2}))).unwrap();
        assert_eq!(l.get("a").unwrap()["v"], 2);
        assert!(l.set("nope", item(json!({}))).unwrap_err().is_not_found());
        assert!(l.find(3).unwrap().is_none());
        assert_eq!(l.pop("a").unwrap()["v"], 2);
        assert!(l.is_empty().unwrap());
    }

    #[test]
    fn test_replace_all_with() {
        let mut l = list(ListKind::References);
        l.append(item(json!({"@id": "old"}))).unwrap();
        l.replace_all_with(vec![item(json!({"@id": "r1"})), item(json!({}))])
            .unwrap();
        let data = l.get_data().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["@id"], "r1");
        assert!(!l.contains("old").unwrap());
    }
}
