/*!
 * Scanning of user spaces
 *
 * A scan lists the files and folders of a space and runs in two phases. The
 * fast phase stats every entry and saves a first report; the slow phase
 * collects file-manager metadata and checksums in the background, saving
 * incremental reports as it goes. [`ScanDriver`] runs the phases and
 * [`ScanRegistry`] tracks the scan in flight for each space.
 */

mod basic;
mod checksum;
mod driver;

pub use basic::BasicScanner;
pub use checksum::sha256_file;
pub use driver::{CancelToken, ScanDriver, ScanPhase, ScanRegistry};

use regex::Regex;

use crate::error::Result;
use crate::fm::{FmResult, UserSpace};
use crate::types::ScanReport;

/// Name patterns skipped by default: hidden files and editor droppings
pub const DEFAULT_SKIP_PATTERNS: &[&str] = &[r"^\.", r"^#"];

/// Folder names skipped by default
pub const DEFAULT_EXCLUDE_FOLDERS: &[&str] = &["TRASH", "HIDE"];

/// The phases of a two-phase scan of one space
pub trait UserSpaceScanner: Send + 'static {
    fn space(&self) -> &UserSpace;

    /// Fill `report.contents` with the scannable entries, optionally under `folder` only
    fn init_scannable_content(&self, report: &mut ScanReport, folder: Option<&str>)
        -> FmResult<()>;

    /// Stat every entry and save the report
    fn fast_scan(&self, report: &mut ScanReport) -> FmResult<()>;

    /// Gather metadata and checksums, saving incremental reports
    fn slow_scan(&self, report: &mut ScanReport, cancel: &CancelToken) -> FmResult<()>;
}

/// Entry names a scan leaves out
#[derive(Debug, Clone)]
pub struct SkipPatterns {
    names: Vec<Regex>,
    folders: Vec<Regex>,
}

impl SkipPatterns {
    /// Build from name regexes and literal folder names
    pub fn new<S: AsRef<str>>(patterns: &[S], exclude_folders: &[S]) -> Result<Self> {
        let names = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let folders = exclude_folders
            .iter()
            .map(|f| exact_name(f.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { names, folders })
    }

    pub fn should_skip(&self, name: &str, is_dir: bool) -> bool {
        self.names.iter().any(|re| re.is_match(name))
            || (is_dir && self.folders.iter().any(|re| re.is_match(name)))
    }
}

impl Default for SkipPatterns {
    fn default() -> Self {
        let names = DEFAULT_SKIP_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        let folders = DEFAULT_EXCLUDE_FOLDERS
            .iter()
            .filter_map(|f| exact_name(f).ok())
            .collect();
        Self { names, folders }
    }
}

/// Regex matching exactly the literal name
fn exact_name(name: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&format!("^{}$", regex::escape(name)))
}

/// Tunables shared by all scans
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub skip: SkipPatterns,
    /// Save an incremental report after this many files
    pub flush_file_limit: usize,
    /// Save an incremental report after this many bytes have been checksummed
    pub flush_size_limit: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            skip: SkipPatterns::default(),
            flush_file_limit: 10,
            flush_size_limit: 10_000_000,
        }
    }
}
