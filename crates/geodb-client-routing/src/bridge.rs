//! Read-only views of the routing state for tests and diagnostics tooling

use std::{collections::BTreeMap, sync::Arc};

use geodb_client_types::{OperationType, PartitionKeyRangeIdentity, RegionId};

use crate::{
    Result,
    partition_failover::{PartitionFailoverRegistry, PartitionFailoverSnapshot},
    routing_table::RegionalRoutingTable,
    session_store::SessionTokenStore,
    session_token::VectorSessionToken,
};

/// Accessor over the shared routing state of one orchestrator
#[derive(Clone)]
pub struct RoutingBridge {
    routing_table: Arc<RegionalRoutingTable>,
    failover_registry: Arc<PartitionFailoverRegistry>,
    session_store: Arc<SessionTokenStore>,
}

impl RoutingBridge {
    pub fn new(
        routing_table: Arc<RegionalRoutingTable>,
        failover_registry: Arc<PartitionFailoverRegistry>,
        session_store: Arc<SessionTokenStore>,
    ) -> Self {
        Self { routing_table, failover_registry, session_store }
    }

    /// Regions currently inside their unavailability cooldown, sorted by name
    pub fn unavailable_regions(&self) -> Vec<RegionId> {
        self.routing_table.unavailable_regions()
    }

    pub fn ordered_read_regions(&self, excluded: &[RegionId]) -> Result<Vec<RegionId>> {
        self.ordered(OperationType::Read, excluded)
    }

    pub fn ordered_write_regions(&self, excluded: &[RegionId]) -> Result<Vec<RegionId>> {
        self.ordered(OperationType::Create, excluded)
    }

    fn ordered(
        &self,
        operation_type: OperationType,
        excluded: &[RegionId],
    ) -> Result<Vec<RegionId>> {
        Ok(self
            .routing_table
            .ordered_regions(operation_type, excluded)?
            .into_iter()
            .map(|endpoint| endpoint.region)
            .collect())
    }

    /// Per-partition failover state, if the partition ever failed over
    pub fn partition_failover(
        &self,
        partition: &PartitionKeyRangeIdentity,
    ) -> Option<PartitionFailoverSnapshot> {
        self.failover_registry.snapshot(partition)
    }

    pub fn partition_current_region(
        &self,
        partition: &PartitionKeyRangeIdentity,
    ) -> Option<RegionId> {
        self.failover_registry.current_region_for_partition(partition)
    }

    /// Token a request on `partition` would carry
    pub fn session_token(
        &self,
        partition: &PartitionKeyRangeIdentity,
        excluded: &[RegionId],
    ) -> VectorSessionToken {
        self.session_store.token_for_request(partition, excluded)
    }

    /// Region-scoped tokens of `partition` (empty in partition-scoped mode)
    pub fn region_session_tokens(
        &self,
        partition: &PartitionKeyRangeIdentity,
    ) -> BTreeMap<RegionId, VectorSessionToken> {
        self.session_store.region_tokens(partition)
    }
}
