//! # GeoDB Client Routing - Consistency and Multi-Region Failover Core
//!
//! Decides, for every logical operation, which region and replica to contact, when to
//! retry, when to fail over, and when a consistency barrier has been satisfied.
//!
//! The main entry point is [`RequestOrchestrator`], which composes:
//! - [`RegionalRoutingTable`]: preference-ordered read/write regions with exclusions
//!   and temporary unavailability
//! - [`PartitionFailoverRegistry`]: per-partition region overrides for single-write-region
//!   accounts
//! - [`SessionTokenStore`]: session tokens per partition, optionally scoped per region
//! - [`BarrierController`]: HEAD-based barrier confirmation for Strong and Bounded
//!   Staleness
//! - [`AvailabilityStrategyExecutor`]: threshold-based speculative cross-region racing
//!
//! The transport itself is an external dependency behind the [`Transport`] and
//! [`AddressResolver`] traits; [`FaultInjectionTransport`] decorates any transport with
//! rule-driven delays and errors for testing.

use thiserror::Error;

pub mod availability;
pub mod barrier;
pub mod bloom;
pub mod bridge;
pub mod diagnostics;
pub mod fault_injection;
pub mod orchestrator;
pub mod partition_failover;
pub mod routing_table;
pub mod session_store;
pub mod session_token;
pub mod topology;
pub mod transport;

mod sharded;

pub use availability::{AvailabilityStrategyExecutor, ThresholdBasedAvailabilityStrategy};
pub use barrier::{
    BarrierAttemptState, BarrierController, BarrierExhaustion, BarrierOutcome, BarrierPolicy,
    BarrierRequest, BarrierState, BarrierStatus,
};
pub use bridge::RoutingBridge;
pub use diagnostics::{
    DiagnosticsSink, InMemoryDiagnosticsSink, OperationContext, TracingDiagnosticsSink,
};
pub use fault_injection::{
    FaultCondition, FaultInjectionRule, FaultInjectionTransport, FaultResult, ReplicaFilter,
};
pub use orchestrator::{OperationRequest, OperationResponse, RequestOrchestrator};
pub use partition_failover::{PartitionFailoverRegistry, PartitionFailoverSnapshot};
pub use routing_table::RegionalRoutingTable;
pub use session_store::SessionTokenStore;
pub use session_token::{PartitionSessionToken, SessionTokenError, VectorSessionToken};
pub use topology::{
    AccountTopology, AccountTopologyProvider, RegionalEndpoint, StaticTopologyProvider,
    TopologyBuilder, TopologyError,
};
pub use transport::{
    AddressResolver, ReplicaAddress, ReplicaSet, ReplicaTarget, StoreRequest, StoreResponse,
    Transport, TransportError,
};

use geodb_client_types::RegionId;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("No viable region: every candidate region is excluded (excluded: {0:?})")]
    NoViableRegion(Vec<RegionId>),

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("Session token error: {0}")]
    SessionToken(#[from] SessionTokenError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RoutingError>;

impl From<RoutingError> for geodb_client_types::ClientError {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::NoViableRegion(_) => Self::no_viable_region(err.to_string()),
            other => Self::new(
                geodb_client_types::ErrorKind::Service,
                geodb_client_types::StatusPair::new(
                    geodb_client_types::status_codes::INTERNAL_SERVER_ERROR,
                    geodb_client_types::sub_status_codes::UNKNOWN,
                ),
                other.to_string(),
            ),
        }
    }
}
