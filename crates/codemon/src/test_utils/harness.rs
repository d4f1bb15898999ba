//! Scripted in-memory [`TestHarness`] that records every call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::anyhow;

use crate::harness::{ProbeReport, TestHarness};
use crate::ids::TestId;

/// Harness whose index and probe results are fixed up front.
#[derive(Debug, Default)]
pub struct ScriptedHarness {
    tests: Vec<(TestId, ProbeReport)>,
    failing_probe: Option<TestId>,
    failing_index: bool,
    probed: Mutex<Vec<TestId>>,
    executed: Mutex<Vec<Vec<TestId>>>,
    setup_calls: AtomicUsize,
    cleanup_calls: AtomicUsize,
}

impl ScriptedHarness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `test` and answer its probe with `report`.
    pub fn with_test(mut self, test: &str, report: ProbeReport) -> Self {
        self.tests.push((TestId::from(test), report));
        self
    }

    /// Make the probe of `test` fail.
    pub fn failing_on(mut self, test: &str) -> Self {
        self.failing_probe = Some(TestId::from(test));
        self
    }

    /// Make test indexing fail.
    pub fn failing_index(mut self) -> Self {
        self.failing_index = true;
        self
    }

    /// Tests probed so far, in call order.
    pub fn probed(&self) -> Vec<TestId> {
        self.probed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Suites executed so far, in call order.
    pub fn executed(&self) -> Vec<Vec<TestId>> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn setup_calls(&self) -> usize {
        self.setup_calls.load(Ordering::SeqCst)
    }

    pub fn cleanup_calls(&self) -> usize {
        self.cleanup_calls.load(Ordering::SeqCst)
    }
}

impl TestHarness for ScriptedHarness {
    fn index_tests(&self) -> anyhow::Result<Vec<TestId>> {
        if self.failing_index {
            return Err(anyhow!("test collection crashed"));
        }
        Ok(self.tests.iter().map(|(test, _)| test.clone()).collect())
    }

    fn probe(&self, test: &TestId) -> anyhow::Result<ProbeReport> {
        self.probed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(test.clone());

        if self.failing_probe.as_ref() == Some(test) {
            return Err(anyhow!("instrumented run of {} exited with status 1", test));
        }
        self.tests
            .iter()
            .find(|(t, _)| t == test)
            .map(|(_, report)| report.clone())
            .ok_or_else(|| anyhow!("unknown test {}", test))
    }

    fn execute_suite(&self, suite: &[TestId]) -> anyhow::Result<()> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(suite.to_vec());
        Ok(())
    }

    fn setup(&self) -> anyhow::Result<()> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cleanup(&self) -> anyhow::Result<()> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
