//! Common test utilities and helpers
//!
//! This module provides shared utilities for all tests including:
//! - A shared in-memory world (store, directory, registry)
//! - Message builders
//! - Custom assertion macros

#[macro_use]
pub mod assertions;
pub mod fixtures;

// Re-export commonly used utilities
pub use fixtures::*;
