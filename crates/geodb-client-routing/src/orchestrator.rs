//! # Request Orchestrator
//!
//! Runs one logical operation end to end:
//!
//! 1. Resolve the effective consistency level, exclusions, deadline and speculation
//!    strategy from the request and the client configuration
//! 2. Pick the preference-ordered regions (per-partition failover overrides first)
//! 3. In a region: resolve replicas, send the main request, capture the session token,
//!    run the barrier when the consistency level needs one
//! 4. On failure: retry in region, refresh addresses, fail over the partition or the
//!    region, or give up, depending on the status and the operation type
//!
//! Rules that shape the retry loop:
//! - 404/1002 retries stay in region while the session retry budget (count and minimum
//!   time) lasts, unless the region switch hint prefers remote regions
//! - Writes on single-write-region accounts never leave the hub region
//! - Writes are only retried after a 408 or 503 when non-idempotent write retries are
//!   enabled
//! - A 410 on the main request never reaches the caller as such; once every region is
//!   exhausted it is reported as 503 with the same sub-status
//! - A main request that succeeded is never sent again because its barrier failed
//!
//! Diagnostics are recorded through a shared [`OperationContext`] and handed to the
//! diagnostics sink whether the operation succeeds, fails or times out.

use std::{sync::Arc, time::Duration};

use geodb_client_config::ClientConfig;
use geodb_client_observe::metrics;
use geodb_client_types::{
    ClientError, ConsistencyLevel, Diagnostics, ErrorKind, OperationType,
    PartitionKeyRangeIdentity, RegionId, RegionSwitchHint, RequestStatistics, ResourceType,
    RetryAction, StatusPair, status_codes, sub_status_codes,
};
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::{
    Result, RoutingError,
    availability::{AvailabilityStrategyExecutor, ThresholdBasedAvailabilityStrategy},
    barrier::{BarrierController, BarrierPolicy, BarrierRequest, BarrierStatus},
    bridge::RoutingBridge,
    diagnostics::{DiagnosticsSink, OperationContext, TracingDiagnosticsSink},
    partition_failover::PartitionFailoverRegistry,
    routing_table::RegionalRoutingTable,
    session_store::SessionTokenStore,
    topology::{AccountTopology, AccountTopologyProvider, RegionalEndpoint},
    transport::{AddressResolver, ReplicaTarget, StoreRequest, StoreResponse, Transport},
};

const MAX_SESSION_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// One logical operation as issued by the caller
#[derive(Debug, Clone, bon::Builder)]
pub struct OperationRequest {
    pub operation_type: OperationType,
    #[builder(default)]
    pub resource_type: ResourceType,
    pub partition: PartitionKeyRangeIdentity,
    /// Effective partition key of a single-logical-partition request
    #[builder(into)]
    pub effective_partition_key: Option<String>,
    /// Overrides the client's default consistency level
    pub consistency_level: Option<ConsistencyLevel>,
    /// Regions excluded for this request, on top of the client-level exclusions
    #[builder(default)]
    pub excluded_regions: Vec<RegionId>,
    /// Overrides the client's end-to-end timeout
    pub end_to_end_timeout: Option<Duration>,
    /// Overrides the client's availability strategy
    pub availability_strategy: Option<ThresholdBasedAvailabilityStrategy>,
    /// Overrides the client's region switch hint for 404/1002 retries
    pub region_switch_hint: Option<RegionSwitchHint>,
}

/// Result of a successful logical operation
#[derive(Debug, Clone)]
pub struct OperationResponse {
    pub status: StatusPair,
    pub lsn: u64,
    /// Region that served the successful attempt
    pub region: RegionId,
    pub session_token: Option<String>,
    pub diagnostics: Diagnostics,
}

/// Request fields resolved against the client configuration
#[derive(Debug)]
struct ExecutionPlan {
    request: OperationRequest,
    consistency_level: ConsistencyLevel,
    excluded_regions: Vec<RegionId>,
    deadline: Option<Instant>,
    region_switch_hint: RegionSwitchHint,
    strategy: Option<ThresholdBasedAvailabilityStrategy>,
}

impl ExecutionPlan {
    fn operation_type(&self) -> OperationType {
        self.request.operation_type
    }

    fn partition(&self) -> &PartitionKeyRangeIdentity {
        &self.request.partition
    }
}

struct RegionSuccess {
    region: RegionId,
    response: StoreResponse,
}

enum RegionOutcome {
    Success(RegionSuccess),
    /// Give up on this region and let the caller try the next one
    Failover { error: ClientError, action: RetryAction },
    /// Stop the operation
    Terminal(ClientError),
}

struct OrchestratorInner {
    config: ClientConfig,
    routing_table: Arc<RegionalRoutingTable>,
    failover_registry: Arc<PartitionFailoverRegistry>,
    session_store: Arc<SessionTokenStore>,
    barrier: BarrierController,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn AddressResolver>,
    diagnostics_sink: Arc<dyn DiagnosticsSink>,
    excluded_regions: Vec<RegionId>,
}

/// Entry point of the routing core
#[derive(Clone)]
pub struct RequestOrchestrator {
    inner: Arc<OrchestratorInner>,
}

#[bon::bon]
impl RequestOrchestrator {
    /// Create an orchestrator for an account
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or the topology is invalid.
    #[builder]
    pub fn new(
        #[builder(default)] config: ClientConfig,
        topology: AccountTopology,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn AddressResolver>,
        diagnostics_sink: Option<Arc<dyn DiagnosticsSink>>,
    ) -> Result<Self> {
        config.validate().map_err(|e| RoutingError::Config(format!("{e:#}")))?;
        topology.validate()?;

        let routing_table = Arc::new(RegionalRoutingTable::new(
            topology,
            config.preferred_region_ids(),
            config.multiple_write_locations,
        ));
        let failover_registry = Arc::new(PartitionFailoverRegistry::new(
            Arc::clone(&routing_table),
            config.failover.per_partition_automatic_failover,
        ));
        let session_store = Arc::new(if config.session_capturing.region_scoped {
            SessionTokenStore::region_scoped(
                config.session_capturing.expected_insertions,
                config.session_capturing.false_positive_rate,
            )
        } else {
            SessionTokenStore::new()
        });
        let barrier =
            BarrierController::new(Arc::clone(&transport), BarrierPolicy::from(&config.barrier));
        let excluded_regions = config.excluded_region_ids();

        Ok(Self {
            inner: Arc::new(OrchestratorInner {
                config,
                routing_table,
                failover_registry,
                session_store,
                barrier,
                transport,
                resolver,
                diagnostics_sink: diagnostics_sink
                    .unwrap_or_else(|| Arc::new(TracingDiagnosticsSink)),
                excluded_regions,
            }),
        })
    }
}

impl RequestOrchestrator {
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn routing_table(&self) -> &Arc<RegionalRoutingTable> {
        &self.inner.routing_table
    }

    pub fn failover_registry(&self) -> &Arc<PartitionFailoverRegistry> {
        &self.inner.failover_registry
    }

    pub fn session_store(&self) -> &Arc<SessionTokenStore> {
        &self.inner.session_store
    }

    /// Read-only view of the routing state
    pub fn bridge(&self) -> RoutingBridge {
        RoutingBridge::new(
            Arc::clone(&self.inner.routing_table),
            Arc::clone(&self.inner.failover_registry),
            Arc::clone(&self.inner.session_store),
        )
    }

    /// Replace the account topology with the provider's current view
    pub fn refresh_topology(&self, provider: &dyn AccountTopologyProvider) -> Result<()> {
        self.inner.routing_table.refresh(provider)
    }

    /// Execute one logical operation
    pub async fn execute(
        &self,
        request: OperationRequest,
    ) -> std::result::Result<OperationResponse, ClientError> {
        let plan = Arc::new(self.plan(request));
        let operation_type = plan.operation_type();
        let ctx = OperationContext::new(
            Uuid::new_v4(),
            operation_type,
            plan.request.resource_type,
            plan.consistency_level,
            plan.excluded_regions.clone(),
        );

        let span = info_span!(
            "operation",
            activity_id = %ctx.activity_id(),
            operation = %operation_type,
            consistency = %plan.consistency_level,
            partition = %plan.partition(),
        );
        let result = self.run(&plan, &ctx).instrument(span).await;

        let diagnostics = ctx.snapshot();
        self.inner.diagnostics_sink.record(&diagnostics);
        metrics::record_operation(
            operation_type.as_str(),
            diagnostics.duration.as_secs_f64(),
            result.as_ref().err().map(|e| e.kind.as_str()),
        );

        match result {
            Ok(success) => Ok(OperationResponse {
                status: success.response.status,
                lsn: success.response.lsn,
                region: success.region,
                session_token: success.response.session_token,
                diagnostics,
            }),
            Err(err) => Err(err.with_diagnostics(diagnostics)),
        }
    }

    fn plan(&self, request: OperationRequest) -> ExecutionPlan {
        let config = &self.inner.config;

        let mut excluded_regions = self.inner.excluded_regions.clone();
        for region in &request.excluded_regions {
            if !excluded_regions.contains(region) {
                excluded_regions.push(region.clone());
            }
        }

        let deadline = request
            .end_to_end_timeout
            .or_else(|| config.availability.end_to_end_timeout())
            .map(|timeout| Instant::now() + timeout);

        let operation_type = request.operation_type;
        let speculation_allowed = operation_type.is_read_only()
            || (operation_type.is_write()
                && config.non_idempotent_write_retries
                && self.inner.routing_table.uses_multiple_write_locations());
        let strategy = request
            .availability_strategy
            .or_else(|| config.availability.strategy.map(ThresholdBasedAvailabilityStrategy::from))
            .filter(|_| speculation_allowed);

        ExecutionPlan {
            consistency_level: request.consistency_level.unwrap_or(config.consistency_level),
            region_switch_hint: request
                .region_switch_hint
                .unwrap_or(config.session_retry.region_switch_hint),
            excluded_regions,
            deadline,
            strategy,
            request,
        }
    }

    async fn run(
        &self,
        plan: &Arc<ExecutionPlan>,
        ctx: &OperationContext,
    ) -> std::result::Result<RegionSuccess, ClientError> {
        if let Some(strategy) = plan.strategy {
            let regions = self.candidate_regions(plan, &[])?;
            if regions.len() > 1 {
                let this = self.clone();
                let shared_plan = Arc::clone(plan);
                let attempt_ctx = ctx.clone();
                return AvailabilityStrategyExecutor::new(strategy)
                    .execute(regions, plan.deadline, ctx, move |region| {
                        let this = this.clone();
                        let plan = Arc::clone(&shared_plan);
                        let ctx = attempt_ctx.clone();
                        async move { this.execute_with_failover(&plan, &ctx, Some(region)).await }
                    })
                    .await;
            }
        }

        let execution = self.execute_with_failover(plan, ctx, None);
        match plan.deadline {
            Some(deadline) => match timeout_at(deadline, execution).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("End-to-end timeout elapsed");
                    Err(ClientError::operation_cancelled("End-to-end timeout elapsed"))
                },
            },
            None => execution.await,
        }
    }

    /// Regions to try, in order, skipping `failed`
    fn candidate_regions(
        &self,
        plan: &ExecutionPlan,
        failed: &[RegionId],
    ) -> std::result::Result<Vec<RegionalEndpoint>, ClientError> {
        let mut excluded = plan.excluded_regions.clone();
        excluded.extend(failed.iter().cloned());

        let operation_type = plan.operation_type();
        let mut regions = self.inner.routing_table.ordered_regions(operation_type, &excluded)?;

        if operation_type.is_read_only() && self.inner.routing_table.is_single_write_region() {
            if let Some(current) =
                self.inner.failover_registry.current_region_for_partition(plan.partition())
            {
                if let Some(position) = regions.iter().position(|r| r.region == current) {
                    let endpoint = regions.remove(position);
                    regions.insert(0, endpoint);
                }
            }
        }

        Ok(regions)
    }

    /// Try regions in order until one succeeds; `pinned` confines the run to one region
    async fn execute_with_failover(
        &self,
        plan: &ExecutionPlan,
        ctx: &OperationContext,
        pinned: Option<RegionalEndpoint>,
    ) -> std::result::Result<RegionSuccess, ClientError> {
        let mut failed: Vec<RegionId> = Vec::new();
        let mut last_error: Option<ClientError> = None;

        loop {
            let region = match &pinned {
                Some(region) if failed.is_empty() => region.clone(),
                Some(_) => break,
                None => match self.candidate_regions(plan, &failed) {
                    Ok(regions) => match regions.into_iter().next() {
                        Some(region) => region,
                        None => break,
                    },
                    Err(err) if last_error.is_none() => return Err(err),
                    Err(_) => break,
                },
            };

            // Single-write-region writes get the hub back even after it failed.
            if failed.contains(&region.region) {
                debug!(region = %region.region, "No untried region left");
                break;
            }

            if let Some(previous) = failed.last() {
                metrics::record_region_failover(previous.as_str(), region.region.as_str());
            }

            match self.execute_in_region(plan, ctx, &region).await {
                RegionOutcome::Success(success) => return Ok(success),
                RegionOutcome::Terminal(err) => return Err(err),
                RegionOutcome::Failover { error, action } => {
                    ctx.record_retry(&region.region, error.status, action);
                    failed.push(region.region.clone());
                    last_error = Some(error);
                },
            }
        }

        Err(Self::surface(last_error))
    }

    /// Error reported once every candidate region failed
    fn surface(last_error: Option<ClientError>) -> ClientError {
        match last_error {
            None => ClientError::no_viable_region("No region left to try"),
            Some(err) if err.status.status == status_codes::GONE => ClientError::new(
                ErrorKind::Service,
                StatusPair::new(status_codes::SERVICE_UNAVAILABLE, err.status.sub_status),
                format!("Service unavailable: {}", err.message),
            ),
            Some(err) => err,
        }
    }

    async fn execute_in_region(
        &self,
        plan: &ExecutionPlan,
        ctx: &OperationContext,
        region: &RegionalEndpoint,
    ) -> RegionOutcome {
        let config = &self.inner.config;
        let operation_type = plan.operation_type();
        let max_attempts = config.failover.max_retries_per_region.max(1);
        let region_started = Instant::now();

        let mut transient_attempts: u32 = 0;
        let mut session_retries: u32 = 0;
        let mut replica_attempt: u32 = 0;
        let mut force_refresh = false;

        loop {
            replica_attempt += 1;
            ctx.record_contacted(&region.region);

            let replicas = match self
                .inner
                .resolver
                .resolve(&region.region, plan.partition(), force_refresh)
                .await
            {
                Ok(replicas) => replicas,
                Err(err) => {
                    transient_attempts += 1;
                    if transient_attempts < max_attempts {
                        ctx.record_retry(&region.region, err.status, RetryAction::RefreshAddresses);
                        force_refresh = true;
                        continue;
                    }
                    let error = ClientError::from_status(err.status, err.message);
                    return self.region_failure(plan, region, error);
                },
            };
            force_refresh = false;

            let replica = if operation_type.is_write() {
                replicas.primary.clone()
            } else {
                replicas.read_replica(replica_attempt).clone()
            };
            let store_request = self.store_request(plan, ctx);
            let target = ReplicaTarget {
                region: region.region.clone(),
                endpoint: region.endpoint.clone(),
                replica: replica.clone(),
            };

            let started = Instant::now();
            let result = self.inner.transport.send(&target, &store_request).await;
            ctx.record_request(RequestStatistics {
                region: region.region.clone(),
                replica: replica.uri.clone(),
                is_primary: replica.is_primary,
                operation_type,
                resource_type: plan.request.resource_type,
                status: match &result {
                    Ok(response) => response.status,
                    Err(err) => err.status,
                },
                lsn: result.as_ref().ok().map(|response| response.lsn),
                duration: started.elapsed(),
            });

            let (status, message) = match result {
                Ok(response) => {
                    self.capture_session_token(plan, &region.region, &response);

                    if !BarrierController::requires_barrier(
                        operation_type,
                        plan.consistency_level,
                    ) {
                        return self.success(region, response);
                    }

                    let barrier = BarrierRequest {
                        main_request: &store_request,
                        region: &region.region,
                        endpoint: &region.endpoint,
                        replicas: &replicas,
                        target_lsn: response.lsn,
                        deadline: plan.deadline,
                    };
                    match self.inner.barrier.run(barrier, ctx).await {
                        Ok(outcome) => match outcome.status {
                            BarrierStatus::Satisfied => return self.success(region, response),
                            BarrierStatus::Exhausted(reason) if operation_type.is_write() => {
                                return RegionOutcome::Terminal(
                                    BarrierController::write_exhaustion_error(reason),
                                );
                            },
                            BarrierStatus::Exhausted(reason) => {
                                let status = BarrierController::read_exhaustion_status(reason);
                                return self.region_failure(
                                    plan,
                                    region,
                                    ClientError::from_status(
                                        status,
                                        format!("Read barrier exhausted ({})", reason.as_str()),
                                    ),
                                );
                            },
                        },
                        Err(err) if err.kind == ErrorKind::OperationCancelled => {
                            return RegionOutcome::Terminal(err);
                        },
                        // The main request already committed; it is never sent again.
                        Err(err) if operation_type.is_write() => {
                            return RegionOutcome::Terminal(ClientError::request_timeout(
                                err.status.sub_status,
                                format!("Write barrier failed: {}", err.message),
                            ));
                        },
                        Err(err) => return self.region_failure(plan, region, err),
                    }
                },
                Err(err) => (err.status, err.message),
            };

            if status.is_read_session_not_available() {
                let retry = &config.session_retry;
                let local_budget_spent = session_retries >= retry.max_in_region_retries
                    && region_started.elapsed() >= retry.min_in_region_retry_time();

                if plan.region_switch_hint == RegionSwitchHint::RemoteRegionPreferred
                    || local_budget_spent
                {
                    metrics::record_session_retry(region.region.as_str(), true);
                    return RegionOutcome::Failover {
                        error: ClientError::from_status(status, message),
                        action: RetryAction::FailoverRegion,
                    };
                }

                session_retries += 1;
                metrics::record_session_retry(region.region.as_str(), false);
                ctx.record_retry(&region.region, status, RetryAction::RetryInRegion);
                sleep(self.session_backoff(session_retries)).await;
                continue;
            }

            match status.status {
                status_codes::GONE => {
                    if status.sub_status == sub_status_codes::NAME_CACHE_STALE {
                        self.inner
                            .session_store
                            .invalidate_collection(&plan.partition().collection_rid);
                    }
                    transient_attempts += 1;
                    if transient_attempts < max_attempts {
                        ctx.record_retry(&region.region, status, RetryAction::RefreshAddresses);
                        force_refresh = true;
                        continue;
                    }
                    let error = ClientError::from_status(status, message);
                    return self.region_failure(plan, region, error);
                },
                status_codes::REQUEST_TIMEOUT | status_codes::SERVICE_UNAVAILABLE
                    if operation_type.is_write() && !config.non_idempotent_write_retries =>
                {
                    return RegionOutcome::Terminal(ClientError::from_status(status, message));
                },
                status_codes::REQUEST_TIMEOUT
                | status_codes::SERVICE_UNAVAILABLE
                | status_codes::INTERNAL_SERVER_ERROR => {
                    transient_attempts += 1;
                    if transient_attempts < max_attempts {
                        ctx.record_retry(&region.region, status, RetryAction::RetryInRegion);
                        continue;
                    }
                    let error = ClientError::from_status(status, message);
                    return self.region_failure(plan, region, error);
                },
                _ => return RegionOutcome::Terminal(ClientError::from_status(status, message)),
            }
        }
    }

    fn success(&self, region: &RegionalEndpoint, response: StoreResponse) -> RegionOutcome {
        if !self.inner.routing_table.is_available(&region.region) {
            self.inner.routing_table.mark_available(&region.region);
        }
        RegionOutcome::Success(RegionSuccess { region: region.region.clone(), response })
    }

    /// Give up on `region`: move the partition when per-partition failover applies,
    /// otherwise demote the whole region for the cooldown window
    fn region_failure(
        &self,
        plan: &ExecutionPlan,
        region: &RegionalEndpoint,
        error: ClientError,
    ) -> RegionOutcome {
        let operation_type = plan.operation_type();

        if operation_type.is_read_only()
            && self.inner.failover_registry.try_mark_unavailable_for_partition(
                plan.partition(),
                &region.region,
                operation_type,
            )
        {
            return RegionOutcome::Failover { error, action: RetryAction::PartitionFailover };
        }

        // Single-write-region writes have nowhere else to go; the hub stays available.
        if operation_type.is_write() && self.inner.routing_table.is_single_write_region() {
            return RegionOutcome::Failover { error, action: RetryAction::FailoverRegion };
        }

        self.inner.routing_table.mark_unavailable(
            &region.region,
            self.inner.config.failover.unavailable_region_cooldown(),
        );
        RegionOutcome::Failover { error, action: RetryAction::FailoverRegion }
    }

    fn store_request(&self, plan: &ExecutionPlan, ctx: &OperationContext) -> StoreRequest {
        let operation_type = plan.operation_type();
        let session_token = if operation_type.is_read_only()
            && plan.consistency_level.uses_session_token()
        {
            self.inner.session_store.session_header(
                plan.partition(),
                plan.request.effective_partition_key.as_deref(),
                &plan.excluded_regions,
            )
        } else {
            None
        };

        StoreRequest {
            activity_id: ctx.activity_id(),
            operation_type,
            resource_type: plan.request.resource_type,
            partition: plan.partition().clone(),
            effective_partition_key: plan.request.effective_partition_key.clone(),
            consistency_level: plan.consistency_level,
            session_token,
            target_lsn: None,
        }
    }

    fn capture_session_token(
        &self,
        plan: &ExecutionPlan,
        region: &RegionId,
        response: &StoreResponse,
    ) {
        let Some(header) = &response.session_token else {
            return;
        };

        if let Err(e) = self.inner.session_store.record_response_header(
            plan.partition(),
            plan.request.effective_partition_key.as_deref(),
            region,
            header,
        ) {
            warn!(region = %region, error = %e, "Ignoring unparsable session token");
        }
    }

    fn session_backoff(&self, retry: u32) -> Duration {
        let base = self.inner.config.session_retry.backoff();
        base.saturating_mul(1u32 << retry.saturating_sub(1).min(16))
            .min(MAX_SESSION_RETRY_BACKOFF)
    }
}
