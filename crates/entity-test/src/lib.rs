//! Shared fixtures for the integration, regression, and property test
//! suites: entity-type registries reused across multiple scenario tests,
//! so each `tests/*.rs` file stays focused on the scenario itself.

pub mod fixtures;
