/*!
 * Storage of resource metadata records
 *
 * A record is a [`Resource`]: resource-level properties plus ordered lists of
 * authors, references and non-file components, and a hierarchy of file
 * components. Records are opened from a [`ResourceStore`]; three backends are
 * provided.
 */

pub mod fmfs;
pub mod fsbased;
pub mod inmem;
pub mod list;
pub mod reconcile;
pub mod resource;
pub mod tree;

pub use fmfs::{FileManagerSync, FmfsResourceStore};
pub use fsbased::FsResourceStore;
pub use inmem::InMemoryResourceStore;
pub use list::{ItemKey, ListKind, OrderedObjectList, Position};
pub use reconcile::ScanReconciler;
pub use resource::{IdMinter, Resource, ResourceStore};
pub use tree::FileComponentTree;
