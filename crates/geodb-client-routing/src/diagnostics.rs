//! Diagnostics recording for in-flight operations
//!
//! An [`OperationContext`] is shared (cheaply cloned) by every task working on one
//! logical operation, including speculative attempts in other regions. It survives the
//! cancellation of those tasks, so a timed-out operation still reports every region and
//! replica it touched.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use geodb_client_observe::metrics;
use geodb_client_types::{
    ConsistencyLevel, Diagnostics, OperationType, RegionId, RequestStatistics, ResourceType,
    RetryAction, RetryRecord, StatusPair,
};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::sharded::lock;

/// Receives the diagnostics of every completed operation
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, diagnostics: &Diagnostics);
}

/// Logs a one-line summary of every operation
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnosticsSink;

impl DiagnosticsSink for TracingDiagnosticsSink {
    fn record(&self, diagnostics: &Diagnostics) {
        debug!(
            activity_id = %diagnostics.activity_id,
            operation = %diagnostics.operation_type,
            consistency = %diagnostics.consistency_level,
            regions = ?diagnostics.contacted_region_names(),
            requests = diagnostics.requests.len(),
            retries = diagnostics.retries.len(),
            duration_ms = diagnostics.duration.as_millis() as u64,
            "Operation completed"
        );
    }
}

/// Keeps every diagnostics snapshot in memory
#[derive(Debug, Default)]
pub struct InMemoryDiagnosticsSink {
    records: Mutex<Vec<Diagnostics>>,
}

impl InMemoryDiagnosticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Diagnostics> {
        lock(&self.records).clone()
    }

    pub fn last(&self) -> Option<Diagnostics> {
        lock(&self.records).last().cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticsSink for InMemoryDiagnosticsSink {
    fn record(&self, diagnostics: &Diagnostics) {
        lock(&self.records).push(diagnostics.clone());
    }
}

impl<T: DiagnosticsSink + ?Sized> DiagnosticsSink for Arc<T> {
    fn record(&self, diagnostics: &Diagnostics) {
        (**self).record(diagnostics);
    }
}

/// Shared recorder for one logical operation
#[derive(Clone)]
pub struct OperationContext {
    state: Arc<Mutex<Diagnostics>>,
    started: Instant,
}

impl OperationContext {
    pub fn new(
        activity_id: Uuid,
        operation_type: OperationType,
        resource_type: ResourceType,
        consistency_level: ConsistencyLevel,
        excluded_regions: Vec<RegionId>,
    ) -> Self {
        let diagnostics = Diagnostics {
            activity_id,
            operation_type,
            resource_type,
            consistency_level,
            excluded_regions,
            ..Default::default()
        };
        Self { state: Arc::new(Mutex::new(diagnostics)), started: Instant::now() }
    }

    pub fn activity_id(&self) -> Uuid {
        lock(&self.state).activity_id
    }

    pub fn excluded_regions(&self) -> Vec<RegionId> {
        lock(&self.state).excluded_regions.clone()
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Record that a request is about to be dispatched to `region`
    pub fn record_contacted(&self, region: &RegionId) {
        let mut state = lock(&self.state);
        if !state.contacted_regions.contains(region) {
            state.contacted_regions.push(region.clone());
        }
    }

    /// Record a region taking part in availability-strategy racing
    pub fn record_raced(&self, region: &RegionId) {
        let mut state = lock(&self.state);
        if !state.raced_regions.contains(region) {
            state.raced_regions.push(region.clone());
        }
    }

    /// Record a finished replica-level request
    pub fn record_request(&self, statistics: RequestStatistics) {
        metrics::record_request(
            statistics.region.as_str(),
            statistics.operation_type.as_str(),
            statistics.status.status,
            statistics.status.sub_status,
        );
        lock(&self.state).requests.push(statistics);
    }

    /// Record a retry or failover decision
    pub fn record_retry(&self, region: &RegionId, status: StatusPair, action: RetryAction) {
        info!(
            region = %region,
            status = %status,
            action = ?action,
            "Retrying operation"
        );
        lock(&self.state).retries.push(RetryRecord { region: region.clone(), status, action });
    }

    /// Snapshot of everything recorded so far
    pub fn snapshot(&self) -> Diagnostics {
        let mut diagnostics = lock(&self.state).clone();
        diagnostics.duration = self.started.elapsed();
        diagnostics
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("activity_id", &self.activity_id())
            .finish_non_exhaustive()
    }
}
