//! Common test utilities for retrieve-tasks integration tests

#[allow(dead_code)]
pub mod fixtures;

pub use fixtures::*;
