//! Helper utilities for routing integration tests

#![allow(dead_code)] // Some test files use subsets of these utilities

use std::sync::Arc;

use geodb_client_config::ClientConfig;
use geodb_client_routing::{
    AccountTopology, FaultCondition, FaultInjectionRule, FaultInjectionTransport, FaultResult,
    InMemoryDiagnosticsSink, OperationRequest, RequestOrchestrator, RoutingBridge,
};
use geodb_client_test_fixtures::{SimulatedAccount, init_test_tracing};
use geodb_client_types::{ConsistencyLevel, OperationType, PartitionKeyRangeIdentity, RegionId};

/// A simulated account wired to an orchestrator through a fault injection transport
pub struct TestHarness {
    pub account: Arc<SimulatedAccount>,
    pub faults: Arc<FaultInjectionTransport<Arc<SimulatedAccount>>>,
    pub sink: Arc<InMemoryDiagnosticsSink>,
    pub orchestrator: RequestOrchestrator,
}

impl TestHarness {
    pub fn new(topology: AccountTopology, config: ClientConfig) -> Self {
        init_test_tracing();

        let account = Arc::new(SimulatedAccount::new(topology));
        let faults = Arc::new(FaultInjectionTransport::new(Arc::clone(&account)));
        let sink = Arc::new(InMemoryDiagnosticsSink::new());

        let orchestrator = RequestOrchestrator::builder()
            .config(config)
            .topology(account.topology())
            .transport(faults.clone())
            .resolver(account.clone())
            .diagnostics_sink(sink.clone())
            .build()
            .expect("valid orchestrator");

        Self { account, faults, sink, orchestrator }
    }

    pub fn bridge(&self) -> RoutingBridge {
        self.orchestrator.bridge()
    }

    /// Fail the next `hits` HEAD requests in `region` with 410/1022
    pub fn fail_heads_with_lease_not_found(&self, region: &str, hits: u32) -> FaultInjectionRule {
        let rule = FaultInjectionRule::builder()
            .id(format!("lease-not-found-{region}"))
            .condition(
                FaultCondition::builder()
                    .operation_type(OperationType::Head)
                    .region(region)
                    .build(),
            )
            .result(FaultResult::lease_not_found())
            .hit_limit(hits)
            .build();
        self.faults.add_rule(rule.clone());
        rule
    }
}

/// Configuration with the given default consistency level
pub fn config(consistency_level: ConsistencyLevel) -> ClientConfig {
    ClientConfig { consistency_level, ..ClientConfig::default() }
}

pub fn partition() -> PartitionKeyRangeIdentity {
    PartitionKeyRangeIdentity::new("coll1", "0")
}

pub fn read() -> OperationRequest {
    OperationRequest::builder().operation_type(OperationType::Read).partition(partition()).build()
}

pub fn create() -> OperationRequest {
    OperationRequest::builder().operation_type(OperationType::Create).partition(partition()).build()
}

pub fn read_excluding(regions: &[&str]) -> OperationRequest {
    OperationRequest::builder()
        .operation_type(OperationType::Read)
        .partition(partition())
        .excluded_regions(regions.iter().map(|r| RegionId::new(*r)).collect())
        .build()
}

pub fn regions(names: &[&str]) -> Vec<RegionId> {
    names.iter().map(|n| RegionId::new(*n)).collect()
}
