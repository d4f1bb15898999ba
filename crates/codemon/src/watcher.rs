//! Polling change watcher with a supervised background loop.
//!
//! Tracks a fixed snapshot of filenames and reports modification-time changes
//! to a [`ChangeHandler`].
//!
//! # Design
//! - One poll per interval; all changes seen in a poll are coalesced into a
//!   single handler call
//! - After any notification every baseline is dropped and rebuilt on the next poll
//! - The first observation of a file only records a baseline
//! - A tracked file that disappears is not reported; if it comes back it is
//! - A supervisor relaunches the loop with fresh baselines when it panics or
//!   faults, and counts every relaunch

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::error::{CodemonError, Result};
use crate::ids::FileId;

/// Receives the files that changed during one poll.
///
/// Called on the blocking pool, so it may run tests synchronously.
pub trait ChangeHandler: Send + Sync + 'static {
    fn on_change(&self, changed: Vec<FileId>);
}

impl<F> ChangeHandler for F
where
    F: Fn(Vec<FileId>) + Send + Sync + 'static,
{
    fn on_change(&self, changed: Vec<FileId>) {
        self(changed)
    }
}

/// Lifecycle of a [`ChangeWatcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Watching,
}

/// What a poll saw for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observed {
    Modified(SystemTime),
    Absent,
}

fn observe(file: &FileId) -> Observed {
    std::fs::metadata(file.as_path())
        .and_then(|m| m.modified())
        .map(Observed::Modified)
        .unwrap_or(Observed::Absent)
}

/// Per-file modification-time baselines for one poll loop.
#[derive(Debug, Default)]
pub struct MtimeTracker {
    baselines: HashMap<FileId, Observed>,
}

impl MtimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `files` once and return the ones whose modification time moved
    /// since their baseline, in `files` order.
    ///
    /// When anything changed, all baselines are cleared before returning.
    pub fn poll(&mut self, files: &[FileId]) -> Result<Vec<FileId>> {
        let mut changed = Vec::new();

        for file in files {
            if file.is_empty() {
                return Err(CodemonError::watcher_fault("got an empty tracked filename"));
            }

            let current = observe(file);
            match self.baselines.get(file) {
                None => {
                    log::trace!("Baseline for {}: {:?}", file, current);
                    self.baselines.insert(file.clone(), current);
                }
                Some(previous) if *previous == current => {}
                Some(_) if current == Observed::Absent => {
                    log::debug!("Tracked file disappeared: {}", file);
                    self.baselines.insert(file.clone(), current);
                }
                Some(_) => changed.push(file.clone()),
            }
        }

        if !changed.is_empty() {
            self.baselines.clear();
        }
        Ok(changed)
    }

    /// Number of files with a recorded baseline
    pub fn baseline_count(&self) -> usize {
        self.baselines.len()
    }
}

struct LoopContext {
    files: Arc<[FileId]>,
    interval: Duration,
    handler: Arc<dyn ChangeHandler>,
}

#[derive(Default)]
struct Control {
    token: Option<CancellationToken>,
    supervisor: Option<JoinHandle<()>>,
}

/// Supervised background poller over a fixed set of files.
pub struct ChangeWatcher {
    context: Arc<LoopContext>,
    max_restarts: Option<usize>,
    restarts: Arc<AtomicUsize>,
    watching: Arc<AtomicBool>,
    control: Mutex<Control>,
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("files", &self.context.files.len())
            .field("interval", &self.context.interval)
            .field("state", &self.state())
            .field("restarts", &self.restarts())
            .finish_non_exhaustive()
    }
}

impl ChangeWatcher {
    pub fn new(files: Vec<FileId>, interval: Duration, handler: Arc<dyn ChangeHandler>) -> Self {
        Self {
            context: Arc::new(LoopContext {
                files: files.into(),
                interval,
                handler,
            }),
            max_restarts: None,
            restarts: Arc::new(AtomicUsize::new(0)),
            watching: Arc::new(AtomicBool::new(false)),
            control: Mutex::new(Control::default()),
        }
    }

    /// Stop relaunching after `max` restarts. `None` relaunches indefinitely.
    pub fn with_max_restarts(mut self, max: Option<usize>) -> Self {
        self.max_restarts = max;
        self
    }

    pub fn files(&self) -> &[FileId] {
        &self.context.files
    }

    pub fn state(&self) -> WatcherState {
        if self.watching.load(Ordering::SeqCst) {
            WatcherState::Watching
        } else {
            WatcherState::Idle
        }
    }

    /// How many times the supervisor has relaunched the poll loop
    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Launch the supervised poll loop. Must be called within a tokio runtime.
    ///
    /// No-op while already watching.
    pub fn start(&self) {
        let mut control = self.lock_control();
        if let Some(supervisor) = &control.supervisor {
            if !supervisor.is_finished() {
                log::warn!("Change watcher already running");
                return;
            }
        }

        let token = CancellationToken::new();
        self.watching.store(true, Ordering::SeqCst);
        let supervisor = tokio::spawn(supervise(
            self.context.clone(),
            token.clone(),
            self.max_restarts,
            self.restarts.clone(),
            self.watching.clone(),
        ));

        control.token = Some(token);
        control.supervisor = Some(supervisor);
        log::info!(
            "Watching {} files every {:?}",
            self.context.files.len(),
            self.context.interval
        );
    }

    /// Signal the loop to stop and wait for it to wind down.
    ///
    /// The signal is observed during the inter-poll sleep; a handler call in
    /// progress is allowed to finish.
    pub async fn stop(&self) {
        let (token, supervisor) = {
            let mut control = self.lock_control();
            (control.token.take(), control.supervisor.take())
        };

        if let Some(token) = token {
            token.cancel();
        }
        if let Some(supervisor) = supervisor {
            if let Err(e) = supervisor.await {
                log::warn!("Watcher supervisor ended abnormally: {}", e);
            }
        }
        self.watching.store(false, Ordering::SeqCst);
        log::info!("Change watcher stopped");
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        let control = self.lock_control();
        if let Some(token) = &control.token {
            token.cancel();
        }
    }
}

async fn supervise(
    context: Arc<LoopContext>,
    token: CancellationToken,
    max_restarts: Option<usize>,
    restarts: Arc<AtomicUsize>,
    watching: Arc<AtomicBool>,
) {
    let mut faults = 0usize;

    loop {
        let handle = tokio::spawn(poll_loop(context.clone(), token.clone()));
        let fault = match handle.await {
            Ok(Ok(())) => break,
            Ok(Err(e)) => e,
            Err(e) => CodemonError::watcher_fault(describe_join_error(e)),
        };

        if token.is_cancelled() {
            break;
        }

        faults += 1;
        if max_restarts.is_some_and(|max| faults > max) {
            log::error!(
                "Change watcher giving up after {} restarts; last fault: {}",
                faults - 1,
                fault
            );
            break;
        }

        let count = restarts.fetch_add(1, Ordering::SeqCst) + 1;
        log::warn!(
            "Change watcher loop terminated ({}); restarting with fresh baselines (restart #{})",
            fault,
            count
        );
    }

    watching.store(false, Ordering::SeqCst);
}

async fn poll_loop(context: Arc<LoopContext>, token: CancellationToken) -> Result<()> {
    let mut tracker = MtimeTracker::new();
    log::debug!("Watcher poll loop started");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::debug!("Watcher poll loop stopped");
                return Ok(());
            }
            _ = tokio::time::sleep(context.interval) => {}
        }

        let changed = tracker.poll(&context.files)?;
        if changed.is_empty() {
            continue;
        }

        log::info!(
            "{} file(s) changed: {}",
            changed.len(),
            changed
                .iter()
                .map(|f| f.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let handler = context.handler.clone();
        tokio::task::spawn_blocking(move || handler.on_change(changed))
            .await
            .map_err(|e| CodemonError::watcher_fault(describe_join_error(e)))?;
    }
}

fn describe_join_error(error: JoinError) -> String {
    if error.is_panic() {
        let payload = error.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        format!("panicked: {message}")
    } else {
        format!("task ended: {error}")
    }
}
