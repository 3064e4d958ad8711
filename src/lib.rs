/*!
 * nerdstore - Storage for publication record metadata
 *
 * This library keeps the metadata of a draft publication record: resource
 * properties, ordered author and reference lists, non-file components and a
 * hierarchy of file components. A record's file hierarchy can be kept in step
 * with a file-manager space by scanning the space and reconciling the report.
 */

pub mod config;
pub mod error;
pub mod fm;
pub mod logging;
pub mod nerdstore;
pub mod report;
pub mod scan;
pub mod types;
pub mod utils;


// Re-export main components for easier access
pub use config::Config;
pub use error::{NerdStoreError, Result};
pub use fm::{FileManager, FileManagerError, LocalFileManager};
pub use nerdstore::{
    FileComponentTree, FmfsResourceStore, FsResourceStore, InMemoryResourceStore,
    OrderedObjectList, Resource, ResourceStore, ScanReconciler,
};
pub use report::Reporter;
pub use scan::{ScanDriver, ScanPhase, ScanRegistry};
pub use types::{FileComponent, FileManagerSummary, ScanEntry, ScanReport};
pub use utils::format_file_size;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
