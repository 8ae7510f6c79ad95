//! Configuration validation
//!
//! Validates configuration values and ensures consistency

use std::collections::HashSet;

use thiserror::Error;

use crate::{AvailabilityConfig, BarrierConfig, ClientConfig, SessionCapturingConfig};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid log level: {0} (must be one of: trace, debug, info, warn, error)")]
    InvalidLogLevel(String),

    #[error("Region names must not be empty")]
    EmptyRegionName,

    #[error("Region '{0}' appears more than once in preferred_regions")]
    DuplicatePreferredRegion(String),

    #[error("Invalid bloom filter false positive rate: {0} (must be in (0, 1))")]
    InvalidFalsePositiveRate(f64),

    #[error("Invalid bloom filter capacity: {0} (must be > 0)")]
    InvalidBloomCapacity(usize),

    #[error("Invalid barrier budget: {0} must be > 0")]
    InvalidBarrierBudget(&'static str),

    #[error("Invalid end-to-end timeout: {0}ms (must be > 0)")]
    InvalidEndToEndTimeout(u64),

    #[error("Invalid availability strategy: threshold_step_ms must be > 0")]
    InvalidThresholdStep,

    #[error("Invalid max_retries_per_region: {0} (must be > 0)")]
    InvalidRetriesPerRegion(u32),

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type alias for validation operations
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Validate complete configuration
pub fn validate(config: &ClientConfig) -> Result<()> {
    let mut errors = Vec::new();

    if let Err(e) = validate_logging(&config.logging) {
        errors.push(e);
    }

    if let Err(e) = validate_regions(&config.preferred_regions, &config.excluded_regions) {
        errors.push(e);
    }

    if let Err(e) = validate_session_capturing(&config.session_capturing) {
        errors.push(e);
    }

    if let Err(e) = validate_barrier(&config.barrier) {
        errors.push(e);
    }

    if let Err(e) = validate_availability(&config.availability) {
        errors.push(e);
    }

    if config.failover.max_retries_per_region == 0 {
        errors.push(ValidationError::InvalidRetriesPerRegion(0));
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

/// Validate logging level
pub fn validate_logging(level: &str) -> Result<()> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::InvalidLogLevel(level.to_string())),
    }
}

/// Validate preferred and excluded region lists
pub fn validate_regions(preferred: &[String], excluded: &[String]) -> Result<()> {
    if preferred.iter().chain(excluded).any(|r| r.trim().is_empty()) {
        return Err(ValidationError::EmptyRegionName);
    }

    let mut seen = HashSet::new();
    for region in preferred {
        if !seen.insert(region.as_str()) {
            return Err(ValidationError::DuplicatePreferredRegion(region.clone()));
        }
    }

    Ok(())
}

/// Validate bloom filter sizing
pub fn validate_session_capturing(config: &SessionCapturingConfig) -> Result<()> {
    if !config.region_scoped {
        return Ok(());
    }

    if config.expected_insertions == 0 {
        return Err(ValidationError::InvalidBloomCapacity(config.expected_insertions));
    }

    if !(config.false_positive_rate > 0.0 && config.false_positive_rate < 1.0) {
        return Err(ValidationError::InvalidFalsePositiveRate(config.false_positive_rate));
    }

    Ok(())
}

/// Validate barrier budgets
pub fn validate_barrier(config: &BarrierConfig) -> Result<()> {
    if config.bounded_staleness_max_barrier_retries == 0 {
        return Err(ValidationError::InvalidBarrierBudget("bounded_staleness_max_barrier_retries"));
    }
    if config.strong_max_barrier_retries == 0 {
        return Err(ValidationError::InvalidBarrierBudget("strong_max_barrier_retries"));
    }
    Ok(())
}

/// Validate end-to-end timeout and speculation settings
pub fn validate_availability(config: &AvailabilityConfig) -> Result<()> {
    if config.end_to_end_timeout_ms == Some(0) {
        return Err(ValidationError::InvalidEndToEndTimeout(0));
    }

    if let Some(strategy) = config.strategy {
        if strategy.threshold_step_ms == 0 {
            return Err(ValidationError::InvalidThresholdStep);
        }
    }

    Ok(())
}
