//! Test doubles and fixtures shared by unit tests, integration tests and benches.

pub mod fixture_map;
pub mod harness;
