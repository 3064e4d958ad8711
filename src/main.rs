/*!
 * Command-line interface for nerdstore
 */

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use nerdstore::config::{Args, Command, Config};
use nerdstore::error::NerdStoreError;
use nerdstore::fm::{FileManager, LocalFileManager};
use nerdstore::logging::init_logging;
use nerdstore::nerdstore::{FmfsResourceStore, FsResourceStore, ResourceStore};
use nerdstore::report::Reporter;
use nerdstore::types::JsonMap;
use nerdstore::utils::read_json;

fn main() -> io::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Create and validate configuration
    let config = Config::from_args(&args)?;
    config.validate()?;

    init_logging(config.logging_config())?;
    debug!(store = %config.store_dir.display(), spaces = %config.file_manager.spaces_dir.display(), "configuration loaded");

    let fm = Arc::new(LocalFileManager::new(
        &config.file_manager.spaces_dir,
        config.scan_settings()?,
    )?);
    let reporter = Reporter::default();

    match args.command {
        Command::CreateSpace { id } => {
            let summary = fm.create_space(&id)?;
            println!("Created space {} at {}", id, fm.space(&id).uploads_dir().display());
            debug!(uploads_dir_id = %summary.uploads_dir_id, "space summary");
        }

        Command::Scan {
            space,
            folder,
            detach,
        } => {
            if !fm.space_exists(&space)? {
                return Err(NerdStoreError::not_found(format!("space {}", space)).into());
            }
            let mut report = fm.driver().launch_scan(fm.space(&space), folder.as_deref())?;
            if detach {
                warn!(space = %space, scan = %report.scan_id, "detached; checksums stop at exit");
            } else {
                wait_for_scan(&fm, &space)?;
                report = fm.get_scan(&space, &report.scan_id)?;
            }
            println!("{}", reporter.scan_table(&report));
        }

        Command::Sync { record, detach } => {
            let mut store = open_store(&config, &fm)?;
            let mut res = store.open(Some(record.as_str()))?;
            let mut summary = res.update_file_hierarchy()?;
            if !detach {
                wait_for_scan(&fm, &FmfsResourceStore::space_id(res.id()))?;
                summary = res.update_file_metadata()?;
            }
            info!(id = res.id(), status = %summary.syncing, "record synchronized");
            println!("{}", reporter.summary_table(res.id(), &summary));
        }

        Command::Load { file, id } => {
            let rec: JsonMap = read_json(&file)?;
            let mut store = open_store(&config, &fm)?;
            let res = store.load_from(rec, id.as_deref())?;
            println!("Loaded {}", res.id());
        }

        Command::Show { record } => {
            let mut store = open_store(&config, &fm)?;
            if !store.exists(&record)? {
                return Err(NerdStoreError::not_found(record).into());
            }
            let res = store.open(Some(record.as_str()))?;
            println!("{}", reporter.metadata_table(&res.get_res_data()?));
            println!(
                "{} authors, {} references, {} other components",
                res.authors()?.count()?,
                res.references()?.count()?,
                res.nonfiles()?.count()?
            );
            println!("{}", reporter.summary_table(res.id(), &res.fm_summary()?));
        }

        Command::Files { record } => {
            let mut store = open_store(&config, &fm)?;
            if !store.exists(&record)? {
                return Err(NerdStoreError::not_found(record).into());
            }
            let res = store.open(Some(record.as_str()))?;
            println!("{}", reporter.files_table(&res.files()?.get_files()?));
        }
    }

    Ok(())
}

fn open_store(config: &Config, fm: &Arc<LocalFileManager>) -> io::Result<FmfsResourceStore> {
    let fs = FsResourceStore::new(&config.store_dir, config.default_shoulder.clone())?;
    let fm: Arc<dyn FileManager> = fm.clone();
    Ok(FmfsResourceStore::new(fs, fm))
}

/// Block on the space's slow scan behind a spinner
fn wait_for_scan(fm: &LocalFileManager, space_id: &str) -> io::Result<()> {
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::with_template("{spinner:.green} {prefix:.bold.cyan} {wide_msg:.dim.white} {elapsed_precise}")
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?,
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress.set_prefix("Scanning");
    progress.set_message(format!("computing checksums in space {}", space_id));

    let start = Instant::now();
    let joined = fm.driver().registry().join(space_id);
    progress.finish_and_clear();
    joined?;
    debug!(space = space_id, elapsed = ?start.elapsed(), "scan finished");
    Ok(())
}
