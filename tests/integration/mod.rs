//! Integration tests over the in-memory store

pub mod ordering_test;
pub mod scenario_test;
pub mod sending_test;
pub mod sharing_test;
