/*!
 * Core types and data structures for nerdstore
 */

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use crate::error::{NerdStoreError, Result};

/// A JSON object as stored on disk and exchanged with callers
pub type JsonMap = Map<String, Value>;

/// `@type` values given to new folder components
pub const SUBCOLLECTION_TYPES: &[&str] = &["nrdp:Subcollection"];

/// `@type` values given to new file components
pub const DATAFILE_TYPES: &[&str] = &["nrdp:DataFile", "nrdp:DownloadableFile", "dcat:Distribution"];

/// Placeholder download URL for files synchronized from a file manager
pub const PDR_DOWNLOAD_URL: &str = "pdr:nrd:@id/nrd:filepath";

/// Tag of the checksum algorithm used by the scanner
pub const SCAN_CHECKSUM_ALGORITHM: &str = "sha256";

/// Internal folder key holding the child name to id map
const CHILDREN_KEY: &str = "__children";

/// Exported folder key listing child members
const MEMBERS_KEY: &str = "has_member";

/// Content checksum attached to a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    /// Hex encoded digest
    pub hash: String,
    /// Algorithm that produced the digest
    pub algorithm: ChecksumAlgorithm,
}

/// Algorithm descriptor for a [`Checksum`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumAlgorithm {
    #[serde(rename = "@type")]
    pub kind: String,
    pub tag: String,
}

impl Checksum {
    /// A SHA-256 checksum with the given hex digest
    pub fn sha256(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            algorithm: ChecksumAlgorithm {
                kind: "Thing".to_string(),
                tag: SCAN_CHECKSUM_ALGORITHM.to_string(),
            },
        }
    }
}

/// Entry of a folder's member list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    #[serde(rename = "@id")]
    pub id: String,
    pub name: String,
}

/// A leaf file in the component hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    /// Component identifier
    pub id: String,
    /// Slash-delimited path from the hierarchy root
    pub filepath: String,
    /// Size in bytes
    pub size: Option<u64>,
    /// Content checksum
    pub checksum: Option<Checksum>,
    /// Remaining descriptive properties
    pub metadata: JsonMap,
}

/// A folder in the component hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct Subcollection {
    /// Component identifier
    pub id: String,
    /// Slash-delimited path from the hierarchy root
    pub filepath: String,
    /// Ordered map of child name to child id
    pub children: IndexMap<String, String>,
    /// Remaining descriptive properties
    pub metadata: JsonMap,
}

impl Subcollection {
    /// Children of this folder in display order
    pub fn members(&self) -> Vec<Member> {
        self.children
            .iter()
            .map(|(name, id)| Member {
                id: id.clone(),
                name: name.clone(),
            })
            .collect()
    }
}

/// A file or folder component
#[derive(Debug, Clone, PartialEq)]
pub enum FileComponent {
    File(DataFile),
    Folder(Subcollection),
}

impl FileComponent {
    /// Create an empty folder at the given path
    pub fn new_folder(id: impl Into<String>, filepath: impl Into<String>) -> Self {
        let mut metadata = JsonMap::new();
        metadata.insert("@type".to_string(), type_list(SUBCOLLECTION_TYPES));
        FileComponent::Folder(Subcollection {
            id: id.into(),
            filepath: filepath.into(),
            children: IndexMap::new(),
            metadata,
        })
    }

    /// Create a file at the given path
    pub fn new_file(id: impl Into<String>, filepath: impl Into<String>) -> Self {
        let mut metadata = JsonMap::new();
        metadata.insert("@type".to_string(), type_list(DATAFILE_TYPES));
        FileComponent::File(DataFile {
            id: id.into(),
            filepath: filepath.into(),
            size: None,
            checksum: None,
            metadata,
        })
    }

    /// Build a component from caller-supplied metadata.
    ///
    /// `as_collection` forces the kind of component; when `None` the kind is
    /// taken from the `@type` property. Exported `has_member` lists are ignored
    /// while a stored `__children` map is honored.
    pub fn from_metadata(mut md: JsonMap, as_collection: Option<bool>) -> Result<Self> {
        let is_coll = as_collection.unwrap_or_else(|| is_collection_md(&md));
        let id = take_string(&mut md, "@id")?.unwrap_or_default();
        let filepath = take_string(&mut md, "filepath")?
            .map(|p| p.trim_matches('/').to_string())
            .unwrap_or_default();
        md.remove(MEMBERS_KEY);

        if is_coll {
            let children = match md.remove(CHILDREN_KEY) {
                Some(v) => serde_json::from_value(v).map_err(|e| {
                    NerdStoreError::StorageFormat(format!("{}: bad children map: {}", id, e))
                })?,
                None => IndexMap::new(),
            };
            if !is_collection_md(&md) {
                md.insert("@type".to_string(), type_list(SUBCOLLECTION_TYPES));
            }
            md.remove("size");
            md.remove("checksum");
            Ok(FileComponent::Folder(Subcollection {
                id,
                filepath,
                children,
                metadata: md,
            }))
        } else {
            md.remove(CHILDREN_KEY);
            let size = match md.remove("size") {
                None | Some(Value::Null) => None,
                Some(v) => Some(coerce_size(&v).ok_or_else(|| {
                    NerdStoreError::InvalidArgument(format!("{}: size is not an integer: {}", id, v))
                })?),
            };
            let checksum = match md.remove("checksum") {
                None | Some(Value::Null) => None,
                Some(v) => Some(serde_json::from_value(v).map_err(|e| {
                    NerdStoreError::InvalidArgument(format!("{}: bad checksum: {}", id, e))
                })?),
            };
            if is_collection_md(&md) || !md.contains_key("@type") {
                md.insert("@type".to_string(), type_list(DATAFILE_TYPES));
            }
            Ok(FileComponent::File(DataFile {
                id,
                filepath,
                size,
                checksum,
                metadata: md,
            }))
        }
    }

    /// Parse a component from its stored JSON form
    pub fn from_record(value: Value) -> Result<Self> {
        match value {
            Value::Object(md) => Self::from_metadata(md, None),
            other => Err(NerdStoreError::StorageFormat(format!(
                "component record is not a JSON object: {}",
                other
            ))),
        }
    }

    /// The stored JSON form, including the internal children map
    pub fn to_record(&self) -> JsonMap {
        let mut out = self.base_map();
        if let FileComponent::Folder(folder) = self {
            let children = folder
                .children
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            out.insert(CHILDREN_KEY.to_string(), Value::Object(children));
        }
        out
    }

    /// The caller-facing JSON form; folders list their members
    pub fn export(&self) -> JsonMap {
        let mut out = self.base_map();
        out.retain(|k, _| !k.starts_with("__"));
        if let FileComponent::Folder(folder) = self {
            let members = folder
                .members()
                .into_iter()
                .map(|m| serde_json::json!({ "@id": m.id, "name": m.name }))
                .collect();
            out.insert(MEMBERS_KEY.to_string(), Value::Array(members));
        }
        out
    }

    fn base_map(&self) -> JsonMap {
        let mut out = JsonMap::new();
        out.insert("@id".to_string(), Value::String(self.id().to_string()));
        for (k, v) in self.metadata() {
            out.insert(k.clone(), v.clone());
        }
        out.insert(
            "filepath".to_string(),
            Value::String(self.filepath().to_string()),
        );
        if let FileComponent::File(file) = self {
            if let Some(size) = file.size {
                out.insert("size".to_string(), Value::from(size));
            }
            if let Some(checksum) = &file.checksum {
                if let Ok(v) = serde_json::to_value(checksum) {
                    out.insert("checksum".to_string(), v);
                }
            }
        }
        out
    }

    pub fn id(&self) -> &str {
        match self {
            FileComponent::File(f) => &f.id,
            FileComponent::Folder(c) => &c.id,
        }
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        match self {
            FileComponent::File(f) => f.id = id.into(),
            FileComponent::Folder(c) => c.id = id.into(),
        }
    }

    pub fn filepath(&self) -> &str {
        match self {
            FileComponent::File(f) => &f.filepath,
            FileComponent::Folder(c) => &c.filepath,
        }
    }

    pub fn set_filepath(&mut self, path: impl Into<String>) {
        match self {
            FileComponent::File(f) => f.filepath = path.into(),
            FileComponent::Folder(c) => c.filepath = path.into(),
        }
    }

    /// Last segment of the file path
    pub fn name(&self) -> &str {
        crate::utils::basename(self.filepath())
    }

    pub fn metadata(&self) -> &JsonMap {
        match self {
            FileComponent::File(f) => &f.metadata,
            FileComponent::Folder(c) => &c.metadata,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, FileComponent::Folder(_))
    }

    /// Folder view of this component, if it is one
    pub fn as_folder(&self) -> Option<&Subcollection> {
        match self {
            FileComponent::Folder(c) => Some(c),
            FileComponent::File(_) => None,
        }
    }

    pub fn as_folder_mut(&mut self) -> Option<&mut Subcollection> {
        match self {
            FileComponent::Folder(c) => Some(c),
            FileComponent::File(_) => None,
        }
    }

    /// File view of this component, if it is one
    pub fn as_file(&self) -> Option<&DataFile> {
        match self {
            FileComponent::File(f) => Some(f),
            FileComponent::Folder(_) => None,
        }
    }

    /// Members of a folder; empty for files
    pub fn members(&self) -> Vec<Member> {
        self.as_folder().map(Subcollection::members).unwrap_or_default()
    }

    /// Size of a file; folders report `None`
    pub fn size(&self) -> Option<u64> {
        self.as_file().and_then(|f| f.size)
    }
}

/// True if the metadata's `@type` marks a subcollection
pub fn is_collection_md(md: &JsonMap) -> bool {
    let is_subcoll = |t: &str| t.rsplit(':').next() == Some("Subcollection");
    match md.get("@type") {
        Some(Value::String(t)) => is_subcoll(t),
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).any(is_subcoll),
        _ => false,
    }
}

fn type_list(types: &[&str]) -> Value {
    Value::Array(types.iter().map(|t| Value::String(t.to_string())).collect())
}

fn take_string(md: &mut JsonMap, key: &str) -> Result<Option<String>> {
    match md.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(NerdStoreError::InvalidArgument(format!(
            "{} must be a string, got {}",
            key, other
        ))),
    }
}

/// Interpret a JSON number or numeric string as a byte count
pub fn coerce_size(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Synchronization state of a record's file hierarchy
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SyncStatus {
    /// Never reconciled against a file manager
    #[default]
    Unsynced,
    /// Reconciled against a scan that is still running
    Syncing,
    /// Reconciled against a completed scan
    Synced,
}

/// Cached outcome of the last reconciliation with the file manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileManagerSummary {
    #[serde(default = "unknown_count")]
    pub file_count: i64,
    #[serde(default = "unknown_count")]
    pub folder_count: i64,
    /// Total bytes across all files
    #[serde(default = "unknown_count")]
    pub usage: i64,
    #[serde(default)]
    pub syncing: SyncStatus,
    #[serde(default)]
    pub last_scan_started: Option<String>,
    #[serde(default)]
    pub last_scan_id: Option<String>,
    #[serde(default)]
    pub last_scan_is_complete: bool,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploads_dir_id: Option<String>,
}

fn unknown_count() -> i64 {
    -1
}

impl Default for FileManagerSummary {
    fn default() -> Self {
        Self {
            file_count: -1,
            folder_count: -1,
            usage: -1,
            syncing: SyncStatus::Unsynced,
            last_scan_started: None,
            last_scan_id: None,
            last_scan_is_complete: false,
            last_modified: None,
            uploads_dir_id: None,
        }
    }
}

/// Kind of entry listed in a scan report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResourceType {
    #[default]
    File,
    #[serde(alias = "collection", alias = "directory")]
    Folder,
}

/// One file or folder in a scan report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanEntry {
    /// File-manager identifier; numbers are accepted and kept as text
    #[serde(
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub fileid: Option<String>,
    /// Path of the entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub resource_type: ResourceType,
    #[serde(
        default,
        deserialize_with = "lenient_size",
        skip_serializing_if = "Option::is_none"
    )]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctime: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Hex SHA-256 digest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Total bytes beneath a folder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accumulated_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scan_errors: Vec<String>,
}

impl ScanEntry {
    pub fn new(fileid: impl Into<String>, path: impl Into<String>, kind: ResourceType) -> Self {
        Self {
            fileid: Some(fileid.into()),
            path: Some(path.into()),
            resource_type: kind,
            ..Default::default()
        }
    }

    pub fn is_folder(&self) -> bool {
        self.resource_type == ResourceType::Folder
    }
}

fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_size<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u64>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(value.as_ref().and_then(|v| {
        let size = coerce_size(v);
        if size.is_none() && !v.is_null() {
            tracing::warn!(value = %v, "scanned size is not an integer");
        }
        size
    }))
}

/// A point-in-time listing of a user space produced by a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub space_id: String,
    pub scan_id: String,
    /// Seconds since the epoch when the scan was launched
    #[serde(default)]
    pub scan_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_datetime: Option<String>,
    /// Root prefix that entry paths may carry
    #[serde(default)]
    pub fm_folder_path: String,
    /// Folder the scan was restricted to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_root: Option<String>,
    pub contents: Vec<ScanEntry>,
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default)]
    pub is_complete: bool,
    /// Total bytes across all files
    #[serde(default)]
    pub accumulated_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl ScanReport {
    /// Start an empty report stamped with the current time
    pub fn new(
        space_id: impl Into<String>,
        scan_id: impl Into<String>,
        fm_folder_path: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            space_id: space_id.into(),
            scan_id: scan_id.into(),
            scan_time: now.timestamp_millis() as f64 / 1000.0,
            scan_datetime: Some(now.to_rfc3339()),
            fm_folder_path: fm_folder_path.into(),
            scan_root: None,
            contents: Vec::new(),
            in_progress: false,
            is_complete: false,
            accumulated_size: 0,
            last_modified: None,
        }
    }

    /// Sync status implied by this report
    pub fn status(&self) -> SyncStatus {
        if self.is_complete {
            SyncStatus::Synced
        } else {
            SyncStatus::Syncing
        }
    }

    pub fn file_count(&self) -> usize {
        self.contents.iter().filter(|e| !e.is_folder()).count()
    }

    pub fn folder_count(&self) -> usize {
        self.contents.iter().filter(|e| e.is_folder()).count()
    }
}

/// Render a timestamp the way scan reports and summaries carry it
pub fn iso_timestamp(time: std::time::SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}
