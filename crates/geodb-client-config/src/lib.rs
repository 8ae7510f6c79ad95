//! # GeoDB Client Config - Configuration Management
//!
//! Handles configuration loading from files and environment variables.
//!
//! ## Configuration Format
//!
//! The client reads its settings from the `client:` section of a configuration file:
//!
//! ```yaml
//! client:
//!   logging: "info"
//!   consistency_level: "session"
//!   preferred_regions: ["West US", "East US"]
//!   session_retry:
//!     region_switch_hint: "remote_region_preferred"
//!   availability:
//!     end_to_end_timeout_ms: 3000
//!     strategy:
//!       threshold_ms: 100
//!       threshold_step_ms: 200
//! ```

pub mod validation;

use std::{path::Path, time::Duration};

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use geodb_client_types::{ConsistencyLevel, RegionId, RegionSwitchHint};
use serde::{Deserialize, Serialize};

/// Root configuration wrapper; the client reads its own `client:` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RootConfig {
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_logging")]
    pub logging: String,

    /// Default consistency level for operations that do not override it
    #[serde(default)]
    pub consistency_level: ConsistencyLevel,

    /// Regions in the order the client prefers to contact them
    #[serde(default)]
    pub preferred_regions: Vec<String>,

    /// Regions excluded for every operation issued by this client
    #[serde(default)]
    pub excluded_regions: Vec<String>,

    /// Whether the client may write to every writable region of the account
    #[serde(default)]
    pub multiple_write_locations: bool,

    /// Retry writes after timeouts and race them across regions
    #[serde(default)]
    pub non_idempotent_write_retries: bool,

    #[serde(default)]
    pub session_retry: SessionRetryConfig,
    #[serde(default)]
    pub session_capturing: SessionCapturingConfig,
    #[serde(default)]
    pub barrier: BarrierConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub availability: AvailabilityConfig,
}

/// Retry policy for 404/1002 (read session not available)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRetryConfig {
    /// Minimum time spent retrying in one region before switching
    #[serde(default = "default_min_in_region_retry_time_ms")]
    pub min_in_region_retry_time_ms: u64,

    /// Minimum number of retries in one region before switching
    #[serde(default = "default_max_in_region_retries")]
    pub max_in_region_retries: u32,

    #[serde(default)]
    pub region_switch_hint: RegionSwitchHint,

    /// Backoff between in-region session retries
    #[serde(default = "default_session_retry_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for SessionRetryConfig {
    fn default() -> Self {
        Self {
            min_in_region_retry_time_ms: default_min_in_region_retry_time_ms(),
            max_in_region_retries: default_max_in_region_retries(),
            region_switch_hint: RegionSwitchHint::default(),
            backoff_ms: default_session_retry_backoff_ms(),
        }
    }
}

impl SessionRetryConfig {
    pub fn min_in_region_retry_time(&self) -> Duration {
        Duration::from_millis(self.min_in_region_retry_time_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// How session tokens are captured and scoped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCapturingConfig {
    /// Keep one token per (partition, region) instead of one merged token per partition
    #[serde(default)]
    pub region_scoped: bool,

    /// Expected number of (partition key, region) pairs tracked by the bloom filter
    #[serde(default = "default_bloom_expected_insertions")]
    pub expected_insertions: usize,

    /// Target false positive rate of the bloom filter
    #[serde(default = "default_bloom_false_positive_rate")]
    pub false_positive_rate: f64,
}

impl Default for SessionCapturingConfig {
    fn default() -> Self {
        Self {
            region_scoped: false,
            expected_insertions: default_bloom_expected_insertions(),
            false_positive_rate: default_bloom_false_positive_rate(),
        }
    }
}

/// Budgets and backoff of the barrier protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierConfig {
    /// "Successful but below target LSN" barrier responses tolerated for bounded staleness
    #[serde(default = "default_bounded_staleness_max_barrier_retries")]
    pub bounded_staleness_max_barrier_retries: u32,

    /// "Successful but below target LSN" barrier responses tolerated for strong
    #[serde(default = "default_strong_max_barrier_retries")]
    pub strong_max_barrier_retries: u32,

    /// Barrier lease-not-found failures tolerated by a write
    #[serde(default = "default_write_max_lease_not_found")]
    pub write_max_lease_not_found: u32,

    /// Barrier lease-not-found failures tolerated by a read within one region
    #[serde(default = "default_read_max_lease_not_found_per_region")]
    pub read_max_lease_not_found_per_region: u32,

    /// Number of retries that use the short backoff interval
    #[serde(default = "default_short_retry_count")]
    pub short_retry_count: u32,

    #[serde(default = "default_short_retry_interval_ms")]
    pub short_retry_interval_ms: u64,

    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            bounded_staleness_max_barrier_retries: default_bounded_staleness_max_barrier_retries(),
            strong_max_barrier_retries: default_strong_max_barrier_retries(),
            write_max_lease_not_found: default_write_max_lease_not_found(),
            read_max_lease_not_found_per_region: default_read_max_lease_not_found_per_region(),
            short_retry_count: default_short_retry_count(),
            short_retry_interval_ms: default_short_retry_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl BarrierConfig {
    pub fn short_retry_interval(&self) -> Duration {
        Duration::from_millis(self.short_retry_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Regional and per-partition failover behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// How long a failed region stays marked unavailable
    #[serde(default = "default_unavailable_region_cooldown_secs")]
    pub unavailable_region_cooldown_secs: u64,

    /// Attempts made against one region before failing over
    #[serde(default = "default_max_retries_per_region")]
    pub max_retries_per_region: u32,

    /// Enable per-partition automatic failover for reads on single-write accounts
    #[serde(default = "default_per_partition_automatic_failover")]
    pub per_partition_automatic_failover: bool,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            unavailable_region_cooldown_secs: default_unavailable_region_cooldown_secs(),
            max_retries_per_region: default_max_retries_per_region(),
            per_partition_automatic_failover: default_per_partition_automatic_failover(),
        }
    }
}

impl FailoverConfig {
    pub fn unavailable_region_cooldown(&self) -> Duration {
        Duration::from_secs(self.unavailable_region_cooldown_secs)
    }
}

/// End-to-end timeout and speculative execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvailabilityConfig {
    /// Hard ceiling on the duration of one logical operation
    pub end_to_end_timeout_ms: Option<u64>,

    /// Threshold-based speculation across regions
    pub strategy: Option<ThresholdStrategyConfig>,
}

impl AvailabilityConfig {
    pub fn end_to_end_timeout(&self) -> Option<Duration> {
        self.end_to_end_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdStrategyConfig {
    /// Delay before the first speculative attempt
    pub threshold_ms: u64,
    /// Delay between subsequent speculative attempts
    pub threshold_step_ms: u64,
}

fn default_logging() -> String {
    "info".to_string()
}

fn default_min_in_region_retry_time_ms() -> u64 {
    500
}

fn default_max_in_region_retries() -> u32 {
    1
}

fn default_session_retry_backoff_ms() -> u64 {
    5
}

fn default_bloom_expected_insertions() -> usize {
    5_000_000
}

fn default_bloom_false_positive_rate() -> f64 {
    0.001
}

fn default_bounded_staleness_max_barrier_retries() -> u32 {
    18
}

fn default_strong_max_barrier_retries() -> u32 {
    111
}

fn default_write_max_lease_not_found() -> u32 {
    2
}

fn default_read_max_lease_not_found_per_region() -> u32 {
    4
}

fn default_short_retry_count() -> u32 {
    4
}

fn default_short_retry_interval_ms() -> u64 {
    10
}

fn default_retry_interval_ms() -> u64 {
    30
}

fn default_unavailable_region_cooldown_secs() -> u64 {
    300 // 5 minutes
}

fn default_max_retries_per_region() -> u32 {
    2
}

fn default_per_partition_automatic_failover() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            logging: default_logging(),
            consistency_level: ConsistencyLevel::default(),
            preferred_regions: Vec::new(),
            excluded_regions: Vec::new(),
            multiple_write_locations: false,
            non_idempotent_write_retries: false,
            session_retry: SessionRetryConfig::default(),
            session_capturing: SessionCapturingConfig::default(),
            barrier: BarrierConfig::default(),
            failover: FailoverConfig::default(),
            availability: AvailabilityConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Validate configuration at startup
    ///
    /// Delegates hard errors to [`validation::validate`] and logs warnings for settings
    /// that are legal but likely unintended.
    pub fn validate(&self) -> anyhow::Result<()> {
        validation::validate(self).map_err(|e| anyhow::anyhow!(e))?;

        if self.failover.unavailable_region_cooldown_secs == 0 {
            tracing::warn!(
                "failover.unavailable_region_cooldown_secs is 0. Failed regions will be retried immediately."
            );
        }

        if let (Some(timeout), Some(strategy)) =
            (self.availability.end_to_end_timeout_ms, self.availability.strategy)
        {
            if strategy.threshold_ms >= timeout {
                tracing::warn!(
                    threshold_ms = strategy.threshold_ms,
                    end_to_end_timeout_ms = timeout,
                    "availability.strategy.threshold_ms is not below the end-to-end timeout; \
                     speculative attempts will never start"
                );
            }
        }

        if self.availability.strategy.is_some() && self.availability.end_to_end_timeout_ms.is_none()
        {
            tracing::warn!(
                "availability.strategy is configured without end_to_end_timeout_ms; \
                 speculation is bounded only by the per-region retry budgets"
            );
        }

        Ok(())
    }

    pub fn preferred_region_ids(&self) -> Vec<RegionId> {
        self.preferred_regions.iter().map(RegionId::new).collect()
    }

    pub fn excluded_region_ids(&self) -> Vec<RegionId> {
        self.excluded_regions.iter().map(RegionId::new).collect()
    }
}

/// Load configuration with layered precedence: defaults → file → env vars
///
/// Environment variables use the `GEODB__CLIENT__` prefix:
/// - `GEODB__CLIENT__LOGGING=debug`
/// - `GEODB__CLIENT__CONSISTENCY_LEVEL=strong`
/// - `GEODB__CLIENT__FAILOVER__MAX_RETRIES_PER_REGION=3`
pub fn load<P: AsRef<Path>>(path: P) -> Result<ClientConfig, ConfigError> {
    let builder = ConfigBuilder::builder().add_source(File::from(path.as_ref()).required(false));

    let builder =
        builder.add_source(Environment::with_prefix("GEODB").separator("__").try_parsing(true));

    let config = builder.build()?;

    let root: RootConfig = config.try_deserialize()?;
    Ok(root.client)
}

/// Load configuration, falling back to defaults when loading fails
pub fn load_or_default<P: AsRef<Path>>(path: P) -> ClientConfig {
    match load(path.as_ref()) {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully from {:?}", path.as_ref());
            config
        },
        Err(e) => {
            tracing::warn!(
                "Failed to load config from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            ClientConfig::default()
        },
    }
}
