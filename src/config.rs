/*!
 * Configuration handling for nerdstore
 */

use std::io;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::logging::{LogFormat, LoggingConfig};
use crate::scan::{ScanSettings, SkipPatterns, DEFAULT_EXCLUDE_FOLDERS, DEFAULT_SKIP_PATTERNS};
use crate::utils::read_json;

static SHOULDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]\w*$").unwrap());

/// Command-line arguments for nerdstore
#[derive(Parser, Debug, Clone)]
#[clap(
    name = "nerdstore",
    version = env!("CARGO_PKG_VERSION"),
    about = "Manage publication records and keep their file trees in sync with user spaces",
    long_about = "Stores the metadata of publication records and reconciles each record's file \
                  hierarchy against scans of the user space holding its uploaded files."
)]
pub struct Args {
    /// JSON configuration file
    #[clap(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Directory holding record data (overrides the config file)
    #[clap(long)]
    pub store_dir: Option<PathBuf>,

    /// Directory holding user spaces (overrides the config file)
    #[clap(long)]
    pub spaces_dir: Option<PathBuf>,

    /// Log output format
    #[clap(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level for nerdstore events
    #[clap(long)]
    pub log_level: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create an empty user space
    CreateSpace {
        /// Space identifier
        id: String,
    },
    /// Scan a user space and print the resulting report
    Scan {
        /// Space identifier
        space: String,
        /// Restrict the scan to this folder of the space
        #[clap(long)]
        folder: Option<String>,
        /// Return once files are listed; checksums stop when the process exits
        #[clap(long)]
        detach: bool,
    },
    /// Rebuild a record's file tree from a fresh scan of its space
    Sync {
        /// Record identifier, e.g. nrd:0001
        record: String,
        /// Skip waiting for checksums and keep the record marked as syncing
        #[clap(long)]
        detach: bool,
    },
    /// Create or overwrite a record from a JSON metadata document
    Load {
        /// JSON document with optional authors, references and components
        file: PathBuf,
        /// Record identifier; defaults to the document's @id, else a new one
        #[clap(long)]
        id: Option<String>,
    },
    /// Print a record's metadata
    Show {
        record: String,
    },
    /// List the files of a record
    Files {
        record: String,
    },
}

/// File manager settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileManagerConfig {
    pub spaces_dir: PathBuf,
    pub skip_patterns: Vec<String>,
    pub exclude_folders: Vec<String>,
}

impl Default for FileManagerConfig {
    fn default() -> Self {
        Self {
            spaces_dir: default_data_dir().join("spaces"),
            skip_patterns: DEFAULT_SKIP_PATTERNS.iter().map(|s| s.to_string()).collect(),
            exclude_folders: DEFAULT_EXCLUDE_FOLDERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub flush_file_limit: usize,
    pub flush_size_limit: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let settings = ScanSettings::default();
        Self {
            flush_file_limit: settings.flush_file_limit,
            flush_size_limit: settings.flush_size_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory of the record store
    pub store_dir: PathBuf,

    /// Shoulder used when minting record ids
    pub default_shoulder: String,

    pub file_manager: FileManagerConfig,

    pub scan: ScanConfig,

    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: default_data_dir().join("records"),
            default_shoulder: "nrd".to_string(),
            file_manager: FileManagerConfig::default(),
            scan: ScanConfig::default(),
            log: LogConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nerdstore")
}

impl Config {
    /// Read a JSON configuration file; absent keys take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    /// Create configuration from command-line arguments
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(dir) = &args.store_dir {
            config.store_dir = dir.clone();
        }
        if let Some(dir) = &args.spaces_dir {
            config.file_manager.spaces_dir = dir.clone();
        }
        if let Some(format) = args.log_format {
            config.log.format = format;
        }
        if let Some(level) = &args.log_level {
            config.log.level = level.clone();
        }
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> io::Result<()> {
        if self.store_dir.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "store_dir must be set",
            ));
        }

        if self.file_manager.spaces_dir.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "file_manager.spaces_dir must be set",
            ));
        }

        if !SHOULDER_RE.is_match(&self.default_shoulder) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid id shoulder: {}", self.default_shoulder),
            ));
        }

        if self.scan.flush_file_limit == 0 || self.scan.flush_size_limit == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "scan flush limits must be positive",
            ));
        }

        // Compile once so bad patterns surface before any scan starts
        self.scan_settings()?;

        Ok(())
    }

    pub fn scan_settings(&self) -> Result<ScanSettings> {
        Ok(ScanSettings {
            skip: SkipPatterns::new(
                &self.file_manager.skip_patterns,
                &self.file_manager.exclude_folders,
            )?,
            flush_file_limit: self.scan.flush_file_limit,
            flush_size_limit: self.scan.flush_size_limit,
        })
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::default()
            .with_format(self.log.format)
            .with_level(self.log.level.clone())
    }
}
