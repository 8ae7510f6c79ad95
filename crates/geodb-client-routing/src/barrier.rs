//! # Consistency Barrier Protocol
//!
//! Strong and Bounded Staleness operations are not complete when the main request
//! succeeds: the client must confirm, with lightweight HEAD requests, that enough
//! replicas have caught up to the LSN of the main response.
//!
//! - **Writes** (Strong) need one confirmation that the write is globally committed
//!   (`global_committed_lsn >= target`)
//! - **Reads** (Strong, Bounded Staleness) need the read quorum of distinct replicas reporting
//!   `lsn >= target`
//!
//! HEADs start at the primary and then rotate through the secondaries, so the primary
//! is always contacted. Each run has two budgets:
//! - lease-not-found (410/1022) responses: writes tolerate 2 (the 3rd is terminal),
//!   reads tolerate 4 per region (the 5th hands the operation to another region)
//! - non-meeting responses: 18 for Bounded Staleness, 111 for Strong
//!
//! Retries back off with a short interval first and a longer one afterwards. The loop
//! honours the operation deadline both between and during HEAD requests.

use std::{collections::HashSet, sync::Arc, time::Duration};

use geodb_client_config::BarrierConfig;
use geodb_client_observe::metrics;
use geodb_client_types::{
    ClientError, ConsistencyLevel, OperationType, RegionId, RequestStatistics, StatusPair,
};
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, trace, warn};

use crate::{
    diagnostics::OperationContext,
    transport::{ReplicaAddress, ReplicaSet, ReplicaTarget, StoreRequest, Transport},
};

/// Retry budgets and backoff of the barrier loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierPolicy {
    pub bounded_staleness_max_barrier_retries: u32,
    pub strong_max_barrier_retries: u32,
    pub write_max_lease_not_found: u32,
    pub read_max_lease_not_found_per_region: u32,
    pub short_retry_count: u32,
    pub short_retry_interval: Duration,
    pub retry_interval: Duration,
}

impl From<&BarrierConfig> for BarrierPolicy {
    fn from(config: &BarrierConfig) -> Self {
        Self {
            bounded_staleness_max_barrier_retries: config.bounded_staleness_max_barrier_retries,
            strong_max_barrier_retries: config.strong_max_barrier_retries,
            write_max_lease_not_found: config.write_max_lease_not_found,
            read_max_lease_not_found_per_region: config.read_max_lease_not_found_per_region,
            short_retry_count: config.short_retry_count,
            short_retry_interval: config.short_retry_interval(),
            retry_interval: config.retry_interval(),
        }
    }
}

impl Default for BarrierPolicy {
    fn default() -> Self {
        Self::from(&BarrierConfig::default())
    }
}

impl BarrierPolicy {
    /// Lease-not-found responses tolerated before the run is exhausted
    pub fn max_lease_not_found(&self, operation_type: OperationType) -> u32 {
        if operation_type.is_write() {
            self.write_max_lease_not_found
        } else {
            self.read_max_lease_not_found_per_region
        }
    }

    /// Non-meeting responses tolerated before the run is exhausted
    pub fn max_not_met(&self, consistency_level: ConsistencyLevel) -> u32 {
        match consistency_level {
            ConsistencyLevel::BoundedStaleness => self.bounded_staleness_max_barrier_retries,
            _ => self.strong_max_barrier_retries,
        }
    }

    /// Delay before the `retry`-th (1-based) retry
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry <= self.short_retry_count {
            self.short_retry_interval
        } else {
            self.retry_interval
        }
    }
}

/// Lifecycle of one barrier run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    AwaitingMainResponse,
    IssuingBarriers,
    Satisfied,
    Exhausted,
}

/// Why a barrier run gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierExhaustion {
    /// Too many 410/1022 responses
    LeaseNotFound,
    /// Too many responses below the target LSN
    NotMet,
}

impl BarrierExhaustion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeaseNotFound => "lease_not_found",
            Self::NotMet => "not_met",
        }
    }
}

/// Bookkeeping of one barrier run
#[derive(Debug, Clone)]
pub struct BarrierAttemptState {
    pub state: BarrierState,
    pub target_lsn: u64,
    pub heads_issued: u32,
    pub lease_not_found: u32,
    pub not_met: u32,
    /// Replicas that confirmed the target LSN
    pub confirmed: HashSet<String>,
    pub primary_contacted: bool,
    pub started: Instant,
}

impl BarrierAttemptState {
    fn new(target_lsn: u64) -> Self {
        Self {
            state: BarrierState::AwaitingMainResponse,
            target_lsn,
            heads_issued: 0,
            lease_not_found: 0,
            not_met: 0,
            confirmed: HashSet::new(),
            primary_contacted: false,
            started: Instant::now(),
        }
    }

    fn retries(&self) -> u32 {
        self.lease_not_found + self.not_met
    }
}

/// Final status of a barrier run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierStatus {
    Satisfied,
    Exhausted(BarrierExhaustion),
}

#[derive(Debug, Clone)]
pub struct BarrierOutcome {
    pub status: BarrierStatus,
    pub attempt: BarrierAttemptState,
}

impl BarrierOutcome {
    pub fn is_satisfied(&self) -> bool {
        self.status == BarrierStatus::Satisfied
    }
}

/// Everything a barrier run needs from the main request
#[derive(Debug, Clone, Copy)]
pub struct BarrierRequest<'a> {
    pub main_request: &'a StoreRequest,
    pub region: &'a RegionId,
    pub endpoint: &'a str,
    pub replicas: &'a ReplicaSet,
    pub target_lsn: u64,
    pub deadline: Option<Instant>,
}

/// Runs barrier loops over a transport
pub struct BarrierController {
    transport: Arc<dyn Transport>,
    policy: BarrierPolicy,
}

impl BarrierController {
    pub fn new(transport: Arc<dyn Transport>, policy: BarrierPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &BarrierPolicy {
        &self.policy
    }

    /// Whether an operation needs a barrier after its main request
    pub fn requires_barrier(
        operation_type: OperationType,
        consistency_level: ConsistencyLevel,
    ) -> bool {
        match operation_type {
            OperationType::Head => false,
            op if op.is_write() => consistency_level.requires_write_barrier(),
            _ => consistency_level.requires_read_barrier(),
        }
    }

    /// Distinct replica confirmations needed to satisfy the barrier
    pub fn required_confirmations(operation_type: OperationType, replicas: &ReplicaSet) -> usize {
        if operation_type.is_write() { 1 } else { replicas.read_quorum() }
    }

    /// Run HEAD requests until the barrier is satisfied or a budget runs out.
    ///
    /// Returns `Err` only when the deadline passes (408/20008) or a HEAD fails with a
    /// status other than 410/1022; both budgets exhausting is reported as an
    /// [`BarrierStatus::Exhausted`] outcome.
    pub async fn run(
        &self,
        request: BarrierRequest<'_>,
        ctx: &OperationContext,
    ) -> Result<BarrierOutcome, ClientError> {
        let main = request.main_request;
        let operation_type = main.operation_type;
        let required = Self::required_confirmations(operation_type, request.replicas);
        let max_lease_not_found = self.policy.max_lease_not_found(operation_type);
        let max_not_met = self.policy.max_not_met(main.consistency_level);
        let replicas: Vec<&ReplicaAddress> = request.replicas.ordered().collect();
        let head = main.barrier(request.target_lsn);

        let mut attempt = BarrierAttemptState::new(request.target_lsn);
        attempt.state = BarrierState::IssuingBarriers;

        debug!(
            activity_id = %main.activity_id,
            region = %request.region,
            operation = %operation_type,
            target_lsn = request.target_lsn,
            required,
            "Starting barrier"
        );

        let mut cursor = 0usize;
        loop {
            if request.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(Self::cancelled(&attempt));
            }

            let replica = replicas[cursor % replicas.len()];
            cursor += 1;

            let target = ReplicaTarget {
                region: request.region.clone(),
                endpoint: request.endpoint.to_string(),
                replica: replica.clone(),
            };

            attempt.heads_issued += 1;
            attempt.primary_contacted |= replica.is_primary;

            let started = Instant::now();
            let send = self.transport.send(&target, &head);
            let result = match request.deadline {
                Some(deadline) => match timeout_at(deadline, send).await {
                    Ok(result) => result,
                    Err(_) => return Err(Self::cancelled(&attempt)),
                },
                None => send.await,
            };

            let (status, lsn) = match &result {
                Ok(response) => (response.status, Some(response.lsn)),
                Err(err) => (err.status, None),
            };
            ctx.record_request(RequestStatistics {
                region: request.region.clone(),
                replica: replica.uri.clone(),
                is_primary: replica.is_primary,
                operation_type: OperationType::Head,
                resource_type: main.resource_type,
                status,
                lsn,
                duration: started.elapsed(),
            });

            match result {
                Ok(response) => {
                    let observed = if operation_type.is_write() {
                        response.global_committed_lsn
                    } else {
                        response.lsn
                    };

                    if observed >= request.target_lsn {
                        metrics::record_barrier_head("met");
                        attempt.confirmed.insert(replica.uri.clone());
                        trace!(
                            replica = %replica.uri,
                            confirmed = attempt.confirmed.len(),
                            required,
                            "Barrier confirmed by replica"
                        );
                        if attempt.confirmed.len() >= required {
                            attempt.state = BarrierState::Satisfied;
                            debug!(
                                region = %request.region,
                                heads = attempt.heads_issued,
                                "Barrier satisfied"
                            );
                            return Ok(BarrierOutcome { status: BarrierStatus::Satisfied, attempt });
                        }
                        continue;
                    }

                    metrics::record_barrier_head("not_met");
                    attempt.not_met += 1;
                    if attempt.not_met > max_not_met {
                        return Ok(self.exhausted(
                            attempt,
                            BarrierExhaustion::NotMet,
                            request.region,
                        ));
                    }
                },
                Err(err) if err.status.is_lease_not_found() => {
                    metrics::record_barrier_head("lease_not_found");
                    attempt.lease_not_found += 1;
                    if attempt.lease_not_found > max_lease_not_found {
                        return Ok(self.exhausted(
                            attempt,
                            BarrierExhaustion::LeaseNotFound,
                            request.region,
                        ));
                    }
                },
                Err(err) => {
                    metrics::record_barrier_head("error");
                    warn!(
                        region = %request.region,
                        replica = %replica.uri,
                        status = %err.status,
                        "Barrier request failed"
                    );
                    return Err(ClientError::from_status(err.status, err.message));
                },
            }

            let delay = self.policy.backoff(attempt.retries());
            let wake = Instant::now() + delay;
            sleep_until(request.deadline.map_or(wake, |deadline| wake.min(deadline))).await;
        }
    }

    fn exhausted(
        &self,
        mut attempt: BarrierAttemptState,
        reason: BarrierExhaustion,
        region: &RegionId,
    ) -> BarrierOutcome {
        attempt.state = BarrierState::Exhausted;
        metrics::record_barrier_exhausted(reason.as_str());
        warn!(
            region = %region,
            reason = reason.as_str(),
            heads = attempt.heads_issued,
            lease_not_found = attempt.lease_not_found,
            not_met = attempt.not_met,
            "Barrier budget exhausted"
        );
        BarrierOutcome { status: BarrierStatus::Exhausted(reason), attempt }
    }

    fn cancelled(attempt: &BarrierAttemptState) -> ClientError {
        ClientError::operation_cancelled(format!(
            "End-to-end timeout elapsed during barrier after {} HEAD requests",
            attempt.heads_issued
        ))
    }

    /// Error surfaced for a write whose barrier ran out of budget
    pub fn write_exhaustion_error(reason: BarrierExhaustion) -> ClientError {
        use geodb_client_types::sub_status_codes::{LEASE_NOT_FOUND, WRITE_BARRIER_NOT_MET};

        let sub_status = match reason {
            BarrierExhaustion::LeaseNotFound => LEASE_NOT_FOUND,
            BarrierExhaustion::NotMet => WRITE_BARRIER_NOT_MET,
        };
        ClientError::request_timeout(
            sub_status,
            format!("Write barrier could not be satisfied ({})", reason.as_str()),
        )
    }

    /// Status recorded when a read barrier hands the operation to another region
    pub fn read_exhaustion_status(reason: BarrierExhaustion) -> StatusPair {
        match reason {
            BarrierExhaustion::LeaseNotFound => StatusPair::new(
                geodb_client_types::status_codes::GONE,
                geodb_client_types::sub_status_codes::LEASE_NOT_FOUND,
            ),
            BarrierExhaustion::NotMet => StatusPair::new(
                geodb_client_types::status_codes::REQUEST_TIMEOUT,
                geodb_client_types::sub_status_codes::UNKNOWN,
            ),
        }
    }
}
