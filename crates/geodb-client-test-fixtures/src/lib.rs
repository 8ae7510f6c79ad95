//! Test fixtures for geodb client integration tests
//!
//! This crate provides the simulated multi-region account, canned topologies, proptest
//! configuration and tracing setup shared by the routing test suites.

#![deny(unsafe_code)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod proptest_config;
pub mod simulated;
pub mod topologies;

pub use simulated::{RegionCounters, SimulatedAccount};
pub use topologies::{three_region_multi_write, three_region_single_write, two_region_single_write};

/// Install a test subscriber once per process.
///
/// Honors `RUST_LOG`, defaulting to `warn` so failing tests show failovers and exhausted
/// budgets without drowning in per-request events.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}
