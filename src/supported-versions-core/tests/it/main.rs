//! Consolidated integration tests for supported-versions-core.
//!
//! One test binary keeps link time down and lets the suites share fixtures.
//! See: https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod bindings;
mod cascade;
mod https;
