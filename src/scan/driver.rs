/*!
 * Scan orchestration
 *
 * ```text
 * NOT_STARTED -> FAST_SCAN_RUNNING -> FAST_SCAN_DONE -> SLOW_SCAN_RUNNING -> SLOW_SCAN_DONE
 *                       |                  |                   |
 *                       v                  v                   v
 *                    FAILED            CANCELLED         CANCELLED / FAILED
 * ```
 *
 * At most one scan per space is in flight. The fast phase runs on the
 * caller's thread; the slow phase runs on a named worker thread that can be
 * cancelled and joined through the [`ScanRegistry`].
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use strum::Display;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::fm::{FileManagerError, FmResult, LocalResourceInfo, ResourceInfoSource, UserSpace};
use crate::scan::{BasicScanner, ScanSettings, UserSpaceScanner};
use crate::types::ScanReport;

/// Progress of one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanPhase {
    NotStarted,
    FastScanRunning,
    FastScanDone,
    SlowScanRunning,
    SlowScanDone,
    Cancelled,
    Failed,
}

impl ScanPhase {
    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanPhase::SlowScanDone | ScanPhase::Cancelled | ScanPhase::Failed
        )
    }

    pub fn can_transition_to(&self, next: ScanPhase) -> bool {
        use ScanPhase::*;
        matches!(
            (self, next),
            (NotStarted, FastScanRunning)
                | (FastScanRunning, FastScanDone)
                | (FastScanRunning, Failed)
                | (FastScanDone, SlowScanRunning)
                | (FastScanDone, Cancelled)
                | (SlowScanRunning, SlowScanDone)
                | (SlowScanRunning, Cancelled)
                | (SlowScanRunning, Failed)
        )
    }
}

/// Cooperative cancellation flag shared with a scan worker
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct ScanJob {
    scan_id: String,
    phase: ScanPhase,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

/// The scan currently (or most recently) run for each space
#[derive(Clone, Default)]
pub struct ScanRegistry {
    jobs: Arc<Mutex<HashMap<String, ScanJob>>>,
}

impl ScanRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ScanJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new scan; fails while another scan of the space is active
    pub fn begin(&self, space_id: &str, scan_id: &str) -> FmResult<CancelToken> {
        let mut jobs = self.lock();
        if let Some(job) = jobs.get(space_id) {
            if !job.phase.is_terminal() {
                return Err(FileManagerError::ScanInProgress(space_id.to_string()));
            }
        }
        let cancel = CancelToken::default();
        jobs.insert(
            space_id.to_string(),
            ScanJob {
                scan_id: scan_id.to_string(),
                phase: ScanPhase::NotStarted,
                cancel: cancel.clone(),
                handle: None,
            },
        );
        Ok(cancel)
    }

    /// Move the space's scan to a new phase
    pub fn transition(&self, space_id: &str, to: ScanPhase) -> FmResult<()> {
        let mut jobs = self.lock();
        let job = jobs
            .get_mut(space_id)
            .ok_or_else(|| FileManagerError::ResourceNotFound(format!("scan of {}", space_id)))?;
        if !job.phase.can_transition_to(to) {
            return Err(FileManagerError::InvalidStateTransition {
                from: job.phase.to_string(),
                to: to.to_string(),
            });
        }
        job.phase = to;
        Ok(())
    }

    fn attach(&self, space_id: &str, handle: JoinHandle<()>) {
        if let Some(job) = self.lock().get_mut(space_id) {
            job.handle = Some(handle);
        }
    }

    pub fn phase(&self, space_id: &str) -> Option<ScanPhase> {
        self.lock().get(space_id).map(|j| j.phase)
    }

    pub fn current_scan_id(&self, space_id: &str) -> Option<String> {
        self.lock().get(space_id).map(|j| j.scan_id.clone())
    }

    pub fn is_active(&self, space_id: &str) -> bool {
        self.phase(space_id).map_or(false, |p| !p.is_terminal())
    }

    /// Ask the active scan of a space to stop; false if none is active
    pub fn cancel(&self, space_id: &str) -> bool {
        match self.lock().get(space_id) {
            Some(job) if !job.phase.is_terminal() => {
                job.cancel.cancel();
                info!(space = space_id, scan = %job.scan_id, "cancelling scan");
                true
            }
            _ => false,
        }
    }

    /// Block until the space's slow scan has finished, returning its final phase
    pub fn wait(&self, space_id: &str) -> FmResult<Option<ScanPhase>> {
        let handle = self.lock().get_mut(space_id).and_then(|j| j.handle.take());
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| FileManagerError::scan(space_id, "slow scan worker panicked"))?;
        }
        Ok(self.phase(space_id))
    }

    /// Wait for the space's scan and fail unless it ran to completion
    pub fn join(&self, space_id: &str) -> FmResult<()> {
        match self.wait(space_id)? {
            Some(ScanPhase::SlowScanDone) | None => Ok(()),
            Some(phase) => Err(FileManagerError::scan(
                space_id,
                format!("scan ended as {}", phase),
            )),
        }
    }
}

/// Launches two-phase scans of user spaces
#[derive(Clone)]
pub struct ScanDriver {
    settings: ScanSettings,
    info: Arc<dyn ResourceInfoSource>,
    registry: ScanRegistry,
}

impl ScanDriver {
    pub fn new(settings: ScanSettings) -> Self {
        Self::with_info_source(settings, Arc::new(LocalResourceInfo))
    }

    pub fn with_info_source(settings: ScanSettings, info: Arc<dyn ResourceInfoSource>) -> Self {
        Self {
            settings,
            info,
            registry: ScanRegistry::default(),
        }
    }

    pub fn registry(&self) -> &ScanRegistry {
        &self.registry
    }

    /// Scan a space with the [`BasicScanner`]
    pub fn launch_scan(&self, space: UserSpace, folder: Option<&str>) -> FmResult<ScanReport> {
        let scanner =
            BasicScanner::with_info_source(space, self.settings.clone(), Arc::clone(&self.info));
        self.launch_scan_with(scanner, folder)
    }

    /// Run the fast phase now and the slow phase in the background
    ///
    /// Returns the report saved at the end of the fast phase.
    pub fn launch_scan_with<S: UserSpaceScanner>(
        &self,
        scanner: S,
        folder: Option<&str>,
    ) -> FmResult<ScanReport> {
        let space_id = scanner.space().id().to_string();
        let scan_id = Uuid::new_v4().simple().to_string();
        let cancel = self.registry.begin(&space_id, &scan_id)?;
        self.registry
            .transition(&space_id, ScanPhase::FastScanRunning)?;
        info!(space = %space_id, scan = %scan_id, "starting scan");

        let mut report = ScanReport::new(&space_id, &scan_id, scanner.space().folder_path());
        let fast = scanner
            .init_scannable_content(&mut report, folder)
            .and_then(|_| scanner.fast_scan(&mut report));
        if let Err(e) = fast {
            error!(space = %space_id, scan = %scan_id, error = %e, "fast scan failed");
            self.registry.transition(&space_id, ScanPhase::Failed)?;
            return Err(e);
        }
        self.registry
            .transition(&space_id, ScanPhase::FastScanDone)?;

        let snapshot = report.clone();
        let registry = self.registry.clone();
        let worker_space = space_id.clone();
        let spawned = thread::Builder::new()
            .name(format!("slow-scan-{}", scan_id))
            .spawn(move || run_slow_scan(scanner, report, cancel, registry, worker_space));
        match spawned {
            Ok(handle) => {
                self.registry.attach(&space_id, handle);
                Ok(snapshot)
            }
            Err(e) => {
                error!(space = %space_id, error = %e, "could not start slow scan worker");
                self.registry.transition(&space_id, ScanPhase::Cancelled)?;
                Err(e.into())
            }
        }
    }
}

fn run_slow_scan<S: UserSpaceScanner>(
    scanner: S,
    mut report: ScanReport,
    cancel: CancelToken,
    registry: ScanRegistry,
    space_id: String,
) {
    let record = |phase: ScanPhase| {
        if let Err(e) = registry.transition(&space_id, phase) {
            warn!(space = %space_id, error = %e, "scan phase not recorded");
        }
    };

    record(ScanPhase::SlowScanRunning);
    match scanner.slow_scan(&mut report, &cancel) {
        Ok(()) => record(ScanPhase::SlowScanDone),
        Err(FileManagerError::Cancelled(scan_id)) => {
            info!(space = %space_id, scan = %scan_id, "slow scan cancelled");
            record(ScanPhase::Cancelled);
        }
        Err(e) => {
            error!(space = %space_id, scan = %report.scan_id, error = %e, "slow scan failed");
            record(ScanPhase::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_phase_transitions() {
        use ScanPhase::*;
        assert!(NotStarted.can_transition_to(FastScanRunning));
        assert!(FastScanDone.can_transition_to(SlowScanRunning));
        assert!(SlowScanRunning.can_transition_to(Cancelled));
        assert!(!NotStarted.can_transition_to(SlowScanDone));
        assert!(!SlowScanDone.can_transition_to(SlowScanRunning));
        assert!(SlowScanDone.is_terminal());
        assert!(!FastScanDone.is_terminal());
        assert_eq!(FastScanRunning.to_string(), "FAST_SCAN_RUNNING");
    }

    #[test]
    fn test_registry_rejects_bad_transition() {
        let registry = ScanRegistry::default();
        registry.begin("s", "x").unwrap();
        let err = registry
            .transition("s", ScanPhase::SlowScanDone)
            .unwrap_err();
        assert!(matches!(err, FileManagerError::InvalidStateTransition { .. }));
    }

    /// Slow phase that runs until cancelled
    struct StallingScanner(UserSpace);

    impl UserSpaceScanner for StallingScanner {
        fn space(&self) -> &UserSpace {
            &self.0
        }

        fn init_scannable_content(&self, _: &mut ScanReport, _: Option<&str>) -> FmResult<()> {
            Ok(())
        }

        fn fast_scan(&self, report: &mut ScanReport) -> FmResult<()> {
            report.in_progress = true;
            Ok(())
        }

        fn slow_scan(&self, report: &mut ScanReport, cancel: &CancelToken) -> FmResult<()> {
            while !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            Err(FileManagerError::Cancelled(report.scan_id.clone()))
        }
    }

    #[test]
    fn test_one_scan_per_space_and_cancel() {
        let dir = tempdir().unwrap();
        let driver = ScanDriver::new(ScanSettings::default());
        let space = UserSpace::new(dir.path(), "busy");

        let report = driver
            .launch_scan_with(StallingScanner(space.clone()), None)
            .unwrap();
        assert!(report.in_progress);
        assert!(driver.registry().is_active("busy"));
        assert_eq!(
            driver.registry().current_scan_id("busy"),
            Some(report.scan_id.clone())
        );

        let err = driver
            .launch_scan_with(StallingScanner(space.clone()), None)
            .unwrap_err();
        assert!(matches!(err, FileManagerError::ScanInProgress(_)));

        assert!(driver.registry().cancel("busy"));
        assert_eq!(driver.registry().wait("busy").unwrap(), Some(ScanPhase::Cancelled));
        assert!(!driver.registry().cancel("busy"));
        let err = driver.registry().join("busy").unwrap_err();
        assert!(err.to_string().contains("CANCELLED"));

        driver
            .launch_scan_with(StallingScanner(space), None)
            .unwrap();
        driver.registry().cancel("busy");
        driver.registry().wait("busy").unwrap();
    }

    #[test]
    fn test_basic_scan_runs_to_completion() -> io::Result<()> {
        let dir = tempdir()?;
        let space = UserSpace::new(dir.path(), "s1");
        space.create()?;
        fs::write(space.uploads_dir().join("a.txt"), "abc")?;

        let driver = ScanDriver::new(ScanSettings::default());
        let report = driver.launch_scan(space.clone(), None)?;
        assert_eq!(report.file_count(), 1);
        assert!(!report.is_complete);

        driver.registry().join("s1")?;
        assert_eq!(driver.registry().phase("s1"), Some(ScanPhase::SlowScanDone));
        let done = space.load_report(&report.scan_id)?;
        assert!(!done.in_progress);
        assert!(done.is_complete);
        assert!(done.contents[0].checksum.is_some());
        Ok(())
    }

    #[test]
    fn test_failed_fast_scan_frees_the_space() {
        let dir = tempdir().unwrap();
        let driver = ScanDriver::new(ScanSettings::default());
        let missing = UserSpace::new(dir.path(), "ghost");
        assert!(driver.launch_scan(missing.clone(), None).is_err());
        assert_eq!(driver.registry().phase("ghost"), Some(ScanPhase::Failed));
        assert!(!driver.registry().is_active("ghost"));
    }
}
