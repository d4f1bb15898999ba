//
// harness.rs
//
// Capabilities the core needs from the host test framework
//

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ids::{FileId, TestId};

/// Lines one test executed under coverage instrumentation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeReport {
    /// Executed line numbers per file
    pub lines_executed: BTreeMap<FileId, BTreeSet<u32>>,
    /// Files the probe measured in which no line ran
    pub zero_line_files: BTreeSet<FileId>,
}

impl ProbeReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add executed lines for `file`.
    pub fn with_lines(mut self, file: impl Into<FileId>, lines: impl IntoIterator<Item = u32>) -> Self {
        self.lines_executed
            .entry(file.into())
            .or_default()
            .extend(lines);
        self
    }

    /// Mark `file` as measured but not executed.
    pub fn with_zero_lines(mut self, file: impl Into<FileId>) -> Self {
        self.zero_line_files.insert(file.into());
        self
    }
}

/// The operations codemon needs from whatever framework owns the tests.
///
/// Probing is never called concurrently: coverage instrumentation is
/// exclusive within one process.
pub trait TestHarness: Send + Sync {
    /// Candidate tests, in the order they should be probed.
    fn index_tests(&self) -> anyhow::Result<Vec<TestId>>;

    /// Run a single test under line coverage.
    fn probe(&self, test: &TestId) -> anyhow::Result<ProbeReport>;

    /// Run a suite of tests. The outcome is reported by the harness itself.
    fn execute_suite(&self, suite: &[TestId]) -> anyhow::Result<()>;

    /// Called once before a build pass indexes tests.
    fn setup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once after every test has been probed, before the map is persisted.
    fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Decides which indexed tests are left out of a build pass.
pub trait OmissionFilter: Send + Sync {
    fn is_omitted(&self, test: &TestId) -> bool;
}

/// Filter that keeps every test.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOmissions;

impl OmissionFilter for NoOmissions {
    fn is_omitted(&self, _test: &TestId) -> bool {
        false
    }
}
