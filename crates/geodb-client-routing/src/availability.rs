//! # Threshold-Based Availability Strategy
//!
//! Races an operation across regions to cut tail latency: the first region starts
//! immediately, the second after `threshold`, and each further region `threshold_step`
//! after the previous one. The first success (or non-transient failure) wins and every
//! other attempt is aborted. An attempt that fails transiently before the next start
//! time lets the next region start right away.
//!
//! The whole race is bounded by the operation deadline; when it passes every attempt is
//! aborted and the operation fails with 408/20008.

use std::{future::Future, time::Duration};

use geodb_client_config::ThresholdStrategyConfig;
use geodb_client_observe::metrics;
use geodb_client_types::{ClientError, RetryAction};
use tokio::{
    task::JoinSet,
    time::{Instant, sleep_until},
};
use tracing::{debug, warn};

use crate::{diagnostics::OperationContext, topology::RegionalEndpoint};

/// When speculative attempts start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdBasedAvailabilityStrategy {
    /// Delay before the first speculative attempt
    pub threshold: Duration,
    /// Delay between further speculative attempts
    pub threshold_step: Duration,
}

impl ThresholdBasedAvailabilityStrategy {
    pub fn new(threshold: Duration, threshold_step: Duration) -> Self {
        Self { threshold, threshold_step }
    }

    /// Offset from the start of the operation at which the `index`-th region starts
    pub fn start_offset(&self, index: usize) -> Duration {
        match index {
            0 => Duration::ZERO,
            n => self.threshold + self.threshold_step * (n as u32 - 1),
        }
    }
}

impl From<ThresholdStrategyConfig> for ThresholdBasedAvailabilityStrategy {
    fn from(config: ThresholdStrategyConfig) -> Self {
        Self::new(
            Duration::from_millis(config.threshold_ms),
            Duration::from_millis(config.threshold_step_ms),
        )
    }
}

/// Runs one operation across several regions under a strategy
#[derive(Debug, Clone, Copy)]
pub struct AvailabilityStrategyExecutor {
    strategy: ThresholdBasedAvailabilityStrategy,
}

impl AvailabilityStrategyExecutor {
    pub fn new(strategy: ThresholdBasedAvailabilityStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ThresholdBasedAvailabilityStrategy {
        self.strategy
    }

    /// Race `attempt` across `regions` (in preference order).
    ///
    /// `attempt` must run the operation pinned to the region it is given.
    pub async fn execute<T, F, Fut>(
        &self,
        regions: Vec<RegionalEndpoint>,
        deadline: Option<Instant>,
        ctx: &OperationContext,
        attempt: F,
    ) -> Result<T, ClientError>
    where
        T: Send + 'static,
        F: Fn(RegionalEndpoint) -> Fut,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let started = Instant::now();
        let mut pending = regions.into_iter().enumerate().peekable();
        let mut join_set = JoinSet::new();
        let mut last_error: Option<ClientError> = None;

        loop {
            // Start every region whose time has come, or the next one when nothing
            // is in flight anymore.
            while let Some((index, _)) = pending.peek() {
                let due = started + self.strategy.start_offset(*index);
                if Instant::now() < due && !join_set.is_empty() {
                    break;
                }
                let Some((index, region)) = pending.next() else { break };
                ctx.record_raced(&region.region);
                if index > 0 {
                    metrics::record_speculative_attempt(region.region.as_str());
                    if let Some(err) = &last_error {
                        ctx.record_retry(&region.region, err.status, RetryAction::Speculate);
                    } else {
                        ctx.record_retry(
                            &region.region,
                            geodb_client_types::StatusPair::ok(),
                            RetryAction::Speculate,
                        );
                    }
                    debug!(
                        region = %region.region,
                        index,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Starting speculative attempt"
                    );
                }
                join_set.spawn(attempt(region));
            }

            if join_set.is_empty() {
                return Err(last_error.unwrap_or_else(|| {
                    ClientError::no_viable_region("No region available for availability strategy")
                }));
            }

            let next_start =
                pending.peek().map(|(index, _)| started + self.strategy.start_offset(*index));

            tokio::select! {
                _ = wait_until(deadline) => {
                    join_set.shutdown().await;
                    warn!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "End-to-end timeout elapsed while racing regions"
                    );
                    return Err(ClientError::operation_cancelled(
                        "End-to-end timeout elapsed while racing regions",
                    ));
                }
                joined = join_set.join_next() => {
                    match joined {
                        Some(Ok(Ok(value))) => {
                            join_set.shutdown().await;
                            return Ok(value);
                        }
                        Some(Ok(Err(err))) if !err.is_transient() => {
                            join_set.shutdown().await;
                            return Err(err);
                        }
                        Some(Ok(Err(err))) => {
                            debug!(status = %err.status, "Speculative attempt failed transiently");
                            last_error = Some(err);
                        }
                        Some(Err(join_err)) => {
                            warn!(error = %join_err, "Speculative attempt task failed");
                        }
                        None => {}
                    }
                }
                _ = wait_until(next_start) => {}
            }
        }
    }
}

/// Sleep until `instant`, or forever when there is none
async fn wait_until(instant: Option<Instant>) {
    match instant {
        Some(instant) => sleep_until(instant).await,
        None => std::future::pending().await,
    }
}
