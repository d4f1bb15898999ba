//
// coordinator.rs
//
// Load-or-build the influence map, then watch its files and run affected tests
//

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::builder::{BuildReport, MapBuilder};
use crate::codec;
use crate::config::{CodemonConfig, DEFAULT_POLL_INTERVAL_MS};
use crate::error::{CodemonError, Result};
use crate::harness::TestHarness;
use crate::ids::FileId;
use crate::influence_map::{read_shared, share, write_shared, InfluenceMap, SharedInfluenceMap};
use crate::store::MapStore;
use crate::watcher::{ChangeHandler, ChangeWatcher};

/// How a [`Coordinator`] session behaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Skip the build pass and use whatever map was persisted
    pub use_cached: bool,
    /// Load or build the map, then return without watching
    pub map_only: bool,
    pub poll_interval: Duration,
    pub max_restarts: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            use_cached: false,
            map_only: false,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_restarts: None,
        }
    }
}

impl RunOptions {
    /// Watcher settings taken from `config`; mode flags off.
    pub fn from_config(config: &CodemonConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_restarts: config.max_watcher_restarts,
            ..Self::default()
        }
    }
}

/// Ties the builder, the persisted map and the watcher together.
#[derive(Clone)]
pub struct Coordinator {
    config: Arc<CodemonConfig>,
    harness: Arc<dyn TestHarness>,
    store: Arc<dyn MapStore>,
    map: SharedInfluenceMap,
    options: RunOptions,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("options", &self.options)
            .field("files", &read_shared(&self.map).len())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(
        config: CodemonConfig,
        harness: Arc<dyn TestHarness>,
        store: Arc<dyn MapStore>,
        options: RunOptions,
    ) -> Self {
        Self {
            config: Arc::new(config),
            harness,
            store,
            map: share(InfluenceMap::new()),
            options,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// The map queried by the dispatcher
    pub fn map(&self) -> &SharedInfluenceMap {
        &self.map
    }

    /// Load the persisted map, rebuild it unless cached mode is on, and
    /// return the files to watch.
    ///
    /// Blocks for the whole build pass.
    pub fn prepare(&self) -> Result<Vec<FileId>> {
        *write_shared(&self.map) = codec::load_map(self.store.as_ref());

        if self.options.use_cached {
            log::info!("Using cached influence map");
        } else {
            self.rebuild()?;
        }

        let files: Vec<FileId> = read_shared(&self.map).files().cloned().collect();
        Ok(files)
    }

    /// Run a full build pass into the shared map.
    pub fn rebuild(&self) -> Result<BuildReport> {
        MapBuilder::new(self.harness.as_ref(), self.config.as_ref(), self.store.as_ref())
            .run(&self.map)
    }

    /// Prepare, then watch until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let this = self.clone();
        let files = match tokio::task::spawn_blocking(move || this.prepare()).await {
            Ok(result) => result?,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                return Err(CodemonError::configuration(format!(
                    "build pass did not complete: {e}"
                )))
            }
        };

        if self.options.map_only {
            log::info!("Map-only mode; not watching");
            return Ok(());
        }
        if files.is_empty() {
            log::warn!("Influence map is empty; no files will be watched");
        }

        let dispatcher = AffectedTestDispatcher::new(self.map.clone(), self.harness.clone());
        let watcher = ChangeWatcher::new(files, self.options.poll_interval, Arc::new(dispatcher))
            .with_max_restarts(self.options.max_restarts);
        watcher.start();

        shutdown.await;
        log::info!("Shutting down");
        watcher.stop().await;
        Ok(())
    }
}

/// Runs the tests affected by each batch of changed files.
pub struct AffectedTestDispatcher {
    map: SharedInfluenceMap,
    harness: Arc<dyn TestHarness>,
}

impl AffectedTestDispatcher {
    pub fn new(map: SharedInfluenceMap, harness: Arc<dyn TestHarness>) -> Self {
        Self { map, harness }
    }
}

impl ChangeHandler for AffectedTestDispatcher {
    fn on_change(&self, changed: Vec<FileId>) {
        let suite = {
            let map = read_shared(&self.map);
            let (known, unknown): (Vec<FileId>, Vec<FileId>) =
                changed.into_iter().partition(|file| map.contains(file));
            for file in &unknown {
                log::warn!("Ignoring change to {}: not in the influence map", file);
            }
            if known.is_empty() {
                return;
            }

            match map.suite(Some(&known)) {
                Ok(suite) => suite,
                Err(e) => {
                    log::warn!("Cannot compute affected tests: {}", e);
                    return;
                }
            }
        };

        if suite.is_empty() {
            log::info!("No tests cover the changed files");
            return;
        }

        log::info!(
            "Running {} affected test(s): {}",
            suite.len(),
            suite
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        );
        if let Err(e) = self.harness.execute_suite(&suite) {
            log::error!("Test run failed: {:#}", e);
        }
    }
}
