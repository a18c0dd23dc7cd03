//! tests/component_tests.rs
//!
//! Entry point for component-level tests: each file exercises one
//! service end to end through `Simulation`'s public API, rather than
//! the unit tests already living beside each service's source.

mod common;
mod component;
