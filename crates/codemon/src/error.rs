//
// error.rs
//
// Error taxonomy for map building, persistence and watching
//

use thiserror::Error;

use crate::ids::{FileId, TestId};

/// Errors surfaced by codemon operations
#[derive(Debug, Error)]
pub enum CodemonError {
    /// No tests to index, bad configuration, or a build pass that cannot proceed
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// Persisted map is malformed or references an unmapped test index
    #[error("corrupt influence map data: {detail}")]
    CorruptData { detail: String },

    /// Query against a file that was never touched or recorded
    #[error("unknown file: {file}")]
    UnknownFile { file: FileId },

    /// Coverage probe failed while running a test; the whole build pass is aborted
    #[error("coverage probe failed for {test}: {reason}")]
    ProbeFailure { test: TestId, reason: String },

    /// Background polling task terminated unexpectedly
    #[error("watcher fault: {reason}")]
    WatcherFault { reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl CodemonError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::CorruptData {
            detail: detail.into(),
        }
    }

    pub fn watcher_fault(reason: impl Into<String>) -> Self {
        Self::WatcherFault {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CodemonError>;
