//! Transport and address-resolution seams
//!
//! The core never talks to the network itself: replica addresses come from an
//! [`AddressResolver`] and requests go through a [`Transport`]. Both are async traits so
//! a real RNTBD/HTTP stack, the fault injection decorator and the test simulator are
//! interchangeable.

use std::sync::Arc;

use async_trait::async_trait;
use geodb_client_types::{
    ConsistencyLevel, OperationType, PartitionKeyRangeIdentity, RegionId, ResourceType,
    StatusPair,
};
use thiserror::Error;
use uuid::Uuid;

/// Physical address of one replica
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicaAddress {
    pub uri: String,
    pub is_primary: bool,
}

impl ReplicaAddress {
    pub fn primary(uri: impl Into<String>) -> Self {
        Self { uri: uri.into(), is_primary: true }
    }

    pub fn secondary(uri: impl Into<String>) -> Self {
        Self { uri: uri.into(), is_primary: false }
    }
}

/// Replicas serving one partition in one region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSet {
    pub region: RegionId,
    pub primary: ReplicaAddress,
    pub secondaries: Vec<ReplicaAddress>,
}

impl ReplicaSet {
    /// Total number of replicas
    pub fn len(&self) -> usize {
        1 + self.secondaries.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Primary first, then secondaries in resolution order
    pub fn ordered(&self) -> impl Iterator<Item = &ReplicaAddress> {
        std::iter::once(&self.primary).chain(&self.secondaries)
    }

    /// Replica for the `attempt`-th (1-based) read: secondaries round-robin, falling
    /// back to the primary when there are none
    pub fn read_replica(&self, attempt: u32) -> &ReplicaAddress {
        if self.secondaries.is_empty() {
            return &self.primary;
        }
        let index = (attempt.saturating_sub(1) as usize) % self.secondaries.len();
        &self.secondaries[index]
    }

    /// Read quorum: distinct replicas that must confirm a read barrier, half the set
    /// rounded up
    pub fn read_quorum(&self) -> usize {
        self.len().div_ceil(2)
    }
}

/// Where a request is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaTarget {
    pub region: RegionId,
    pub endpoint: String,
    pub replica: ReplicaAddress,
}

/// A replica-level request
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub activity_id: Uuid,
    pub operation_type: OperationType,
    pub resource_type: ResourceType,
    pub partition: PartitionKeyRangeIdentity,
    /// Effective partition key, when the request targets a single logical partition
    pub effective_partition_key: Option<String>,
    pub consistency_level: ConsistencyLevel,
    /// Partition-qualified session token header
    pub session_token: Option<String>,
    /// LSN a barrier request waits for
    pub target_lsn: Option<u64>,
}

impl StoreRequest {
    /// Barrier (HEAD) request derived from a main request
    pub fn barrier(&self, target_lsn: u64) -> Self {
        Self {
            activity_id: self.activity_id,
            operation_type: OperationType::Head,
            resource_type: self.resource_type,
            partition: self.partition.clone(),
            effective_partition_key: None,
            consistency_level: self.consistency_level,
            session_token: None,
            target_lsn: Some(target_lsn),
        }
    }

    pub fn is_barrier(&self) -> bool {
        self.operation_type == OperationType::Head
    }
}

/// A successful replica-level response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResponse {
    pub status: StatusPair,
    /// LSN of the write (or of the replica's committed state for reads and barriers)
    pub lsn: u64,
    /// Globally committed LSN reported by the replica, used by write barriers
    pub global_committed_lsn: u64,
    /// Partition-qualified session token header
    pub session_token: Option<String>,
}

impl StoreResponse {
    pub fn new(status: StatusPair, lsn: u64) -> Self {
        Self { status, lsn, global_committed_lsn: lsn, session_token: None }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_global_committed_lsn(mut self, lsn: u64) -> Self {
        self.global_committed_lsn = lsn;
        self
    }
}

/// A failed replica-level request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct TransportError {
    pub status: StatusPair,
    pub message: String,
}

impl TransportError {
    pub fn new(status: StatusPair, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

/// Sends requests to replicas
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(
        &self,
        target: &ReplicaTarget,
        request: &StoreRequest,
    ) -> Result<StoreResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(
        &self,
        target: &ReplicaTarget,
        request: &StoreRequest,
    ) -> Result<StoreResponse, TransportError> {
        (**self).send(target, request).await
    }
}

/// Resolves the replicas of a partition in a region
#[async_trait]
pub trait AddressResolver: Send + Sync + 'static {
    /// Resolve replica addresses; `force_refresh` bypasses any address cache
    async fn resolve(
        &self,
        region: &RegionId,
        partition: &PartitionKeyRangeIdentity,
        force_refresh: bool,
    ) -> Result<ReplicaSet, TransportError>;
}

#[async_trait]
impl<T: AddressResolver + ?Sized> AddressResolver for Arc<T> {
    async fn resolve(
        &self,
        region: &RegionId,
        partition: &PartitionKeyRangeIdentity,
        force_refresh: bool,
    ) -> Result<ReplicaSet, TransportError> {
        (**self).resolve(region, partition, force_refresh).await
    }
}
