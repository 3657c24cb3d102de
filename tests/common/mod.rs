//! Common test utilities for batch-lookup integration tests

#[allow(dead_code)]
pub mod fixtures;

pub use fixtures::*;
