//
// builder.rs
//
// Full build pass: index tests, probe each one, persist the influence map
//

use std::time::{Duration, Instant};

use crate::codec;
use crate::error::{CodemonError, Result};
use crate::harness::{OmissionFilter, ProbeReport, TestHarness};
use crate::ids::TestId;
use crate::influence_map::{write_shared, InfluenceMap, SharedInfluenceMap};
use crate::perf::{BuildMetrics, TimingGuard};
use crate::store::MapStore;

/// Summary of a completed build pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub tests_probed: usize,
    pub files_known: usize,
    pub untested_files: usize,
    pub duration: Duration,
}

/// Rebuilds the influence map from scratch by probing every test.
pub struct MapBuilder<'a> {
    harness: &'a dyn TestHarness,
    filter: &'a dyn OmissionFilter,
    store: &'a dyn MapStore,
}

impl<'a> MapBuilder<'a> {
    pub fn new(
        harness: &'a dyn TestHarness,
        filter: &'a dyn OmissionFilter,
        store: &'a dyn MapStore,
    ) -> Self {
        Self {
            harness,
            filter,
            store,
        }
    }

    /// Indexed tests minus the omitted ones, in index order.
    pub fn tests(&self) -> Result<Vec<TestId>> {
        let indexed = self
            .harness
            .index_tests()
            .map_err(|e| CodemonError::configuration(format!("test indexing failed: {e:#}")))?;
        let total = indexed.len();

        let tests: Vec<TestId> = indexed
            .into_iter()
            .filter(|test| {
                let omitted = self.filter.is_omitted(test);
                if omitted {
                    log::debug!("Omitting test {}", test);
                }
                !omitted
            })
            .collect();

        log::info!("Indexed {} tests ({} omitted)", tests.len(), total - tests.len());
        Ok(tests)
    }

    /// Probe every test sequentially and accumulate a fresh map.
    ///
    /// Nothing is persisted. A probe failure aborts the pass.
    pub fn build(&self) -> Result<InfluenceMap> {
        self.build_with_metrics(&mut BuildMetrics::new())
            .map(|(map, _)| map)
    }

    fn build_with_metrics(&self, metrics: &mut BuildMetrics) -> Result<(InfluenceMap, usize)> {
        self.harness
            .setup()
            .map_err(|e| CodemonError::configuration(format!("setup hook failed: {e:#}")))?;

        let index_guard = TimingGuard::new("build:index");
        let tests = self.tests()?;
        metrics.index_duration = Some(index_guard.finish());

        if tests.is_empty() {
            return Err(CodemonError::configuration(
                "no tests to run: the harness indexed no tests or omitTests excludes all of them",
            ));
        }

        let probe_guard = TimingGuard::with_threshold("build:probe", 60_000);
        let mut map = InfluenceMap::new();
        let total = tests.len();

        for (i, test) in tests.iter().enumerate() {
            let started = Instant::now();
            let report = self
                .harness
                .probe(test)
                .map_err(|e| CodemonError::ProbeFailure {
                    test: test.clone(),
                    reason: format!("{e:#}"),
                })?;
            metrics.record_probe(test.as_str(), started.elapsed());

            apply_report(&mut map, test, &report);
            log::info!("[{}/{}] {}", i + 1, total, test);
        }
        metrics.probe_duration = Some(probe_guard.finish());

        self.harness
            .cleanup()
            .map_err(|e| CodemonError::configuration(format!("cleanup hook failed: {e:#}")))?;

        Ok((map, total))
    }

    /// Build, persist, then publish the new map into `shared`.
    ///
    /// Any failure leaves both the store and `shared` as they were.
    pub fn run(&self, shared: &SharedInfluenceMap) -> Result<BuildReport> {
        let started = Instant::now();
        let mut metrics = BuildMetrics::new();
        let (map, tests_probed) = self.build_with_metrics(&mut metrics)?;

        let persist_guard = TimingGuard::new("build:persist");
        codec::save_map(self.store, &map)?;
        metrics.persist_duration = Some(persist_guard.finish());

        let report = BuildReport {
            tests_probed,
            files_known: map.len(),
            untested_files: map.untested_files().len(),
            duration: started.elapsed(),
        };

        *write_shared(shared) = map;
        metrics.log_summary();
        log::info!(
            "Influence map built: {} files ({} untested) from {} tests in {:?}",
            report.files_known,
            report.untested_files,
            report.tests_probed,
            report.duration
        );
        Ok(report)
    }
}

/// Fold one probe result into `map`.
///
/// Zero-line files are touched so they are known but untested; every executed
/// line records `test`.
pub fn apply_report(map: &mut InfluenceMap, test: &TestId, report: &ProbeReport) {
    for file in &report.zero_line_files {
        map.touch(file);
    }
    for (file, lines) in &report.lines_executed {
        let added = map.record_hits(file, lines.iter().copied(), test);
        log::trace!("{}: {} new hits in {}", test, added, file);
    }
}
