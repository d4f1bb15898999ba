//
// lib.rs
//
// Test-impact analysis: map each source line to the tests that execute it,
// watch those files, and rerun only the tests a change can affect.
//

pub mod builder;
pub mod codec;
pub mod command_harness;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod harness;
pub mod ids;
pub mod influence_map;
pub mod perf;
pub mod store;
pub mod watcher;

// test_utils is available in test builds and when the `test-support` feature is enabled,
// so benchmarks and integration tests can import it directly.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

#[cfg(test)]
mod property_tests;

pub use error::{CodemonError, Result};
pub use ids::{FileId, TestId};
pub use influence_map::InfluenceMap;
