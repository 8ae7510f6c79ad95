//! Shared proptest configuration for geodb test suites.
//!
//! The `PROPTEST_CASES` environment variable overrides the default case count:
//!
//! ```bash
//! PROPTEST_CASES=500 cargo test  # nightly-sized run
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use geodb_client_test_fixtures::proptest_config::test_cases;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #![proptest_config(ProptestConfig::with_cases(test_cases()))]
//!
//!     #[test]
//!     fn my_property_test(input in any::<u32>()) {
//!         // test logic
//!     }
//! }
//! ```

use proptest::test_runner::Config as ProptestConfig;

/// Case count used when `PROPTEST_CASES` is unset or invalid
pub const DEFAULT_PROPTEST_CASES: u32 = 50;

/// Returns the number of test cases to run, reading from `PROPTEST_CASES`.
#[must_use]
pub fn test_cases() -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|cases| *cases > 0)
        .unwrap_or(DEFAULT_PROPTEST_CASES)
}

/// Returns a proptest configuration with [`test_cases`] cases.
#[must_use]
pub fn proptest_config() -> ProptestConfig {
    ProptestConfig::with_cases(test_cases())
}
