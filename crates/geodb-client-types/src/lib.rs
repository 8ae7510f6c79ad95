//! # GeoDB Client Types
//!
//! Shared type definitions for the geodb multi-region client.
//!
//! This crate holds the identifiers, protocol enums, status codes and the caller-facing
//! error taxonomy used by every other crate in the workspace, so the routing core, the
//! configuration layer and the test fixtures agree on a single vocabulary.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod diagnostics;
pub mod error;

pub use diagnostics::{Diagnostics, RequestStatistics, RetryAction, RetryRecord};
pub use error::{ClientError, ErrorKind};

// ============================================================================
// Identity Types
// ============================================================================

/// Unique identifier for a region (e.g. "West US", "North Europe")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionId(pub String);

impl RegionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RegionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RegionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identity of a physical partition key range within a collection.
///
/// Immutable once assigned; a split produces new identities for the children.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKeyRangeIdentity {
    /// Resource id of the owning collection
    pub collection_rid: String,
    /// Partition key range id (e.g. "0", "1")
    pub partition_key_range_id: String,
    /// Inclusive lower bound of the effective partition key hash range
    pub min_inclusive: String,
    /// Exclusive upper bound of the effective partition key hash range
    pub max_exclusive: String,
}

impl PartitionKeyRangeIdentity {
    pub fn new(
        collection_rid: impl Into<String>,
        partition_key_range_id: impl Into<String>,
    ) -> Self {
        Self {
            collection_rid: collection_rid.into(),
            partition_key_range_id: partition_key_range_id.into(),
            min_inclusive: String::new(),
            max_exclusive: "FF".to_string(),
        }
    }

    /// Set the effective partition key hash range
    pub fn with_range(
        mut self,
        min_inclusive: impl Into<String>,
        max_exclusive: impl Into<String>,
    ) -> Self {
        self.min_inclusive = min_inclusive.into();
        self.max_exclusive = max_exclusive.into();
        self
    }
}

impl std::fmt::Display for PartitionKeyRangeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection_rid, self.partition_key_range_id)
    }
}

// ============================================================================
// Protocol Enums
// ============================================================================

/// Consistency level requested for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    Strong,
    BoundedStaleness,
    #[default]
    Session,
    ConsistentPrefix,
    Eventual,
}

impl ConsistencyLevel {
    /// Whether reads at this level must be confirmed by a read barrier
    pub fn requires_read_barrier(&self) -> bool {
        matches!(self, Self::Strong | Self::BoundedStaleness)
    }

    /// Whether writes at this level must be confirmed by a write barrier
    pub fn requires_write_barrier(&self) -> bool {
        matches!(self, Self::Strong)
    }

    /// Whether requests carry a session token
    pub fn uses_session_token(&self) -> bool {
        matches!(self, Self::Session)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::BoundedStaleness => "bounded_staleness",
            Self::Session => "session",
            Self::ConsistentPrefix => "consistent_prefix",
            Self::Eventual => "eventual",
        }
    }
}

impl std::fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation performed by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    #[default]
    Read,
    Replace,
    Upsert,
    Delete,
    Query,
    Patch,
    Batch,
    ReadFeed,
    /// Barrier request reading a replica's current LSN
    Head,
}

impl OperationType {
    /// Whether the operation mutates state on the service
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::Replace | Self::Upsert | Self::Delete | Self::Patch | Self::Batch
        )
    }

    pub fn is_read_only(&self) -> bool {
        !self.is_write()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Replace => "replace",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
            Self::Query => "query",
            Self::Patch => "patch",
            Self::Batch => "batch",
            Self::ReadFeed => "read_feed",
            Self::Head => "head",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource addressed by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Database,
    Collection,
    #[default]
    Document,
    PartitionKeyRange,
}

/// Hint for where 404/1002 session retries should be attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionSwitchHint {
    /// Keep retrying in the current region before moving on
    #[default]
    LocalRegionPreferred,
    /// Move to the next region right after the first mismatch
    RemoteRegionPreferred,
}

// ============================================================================
// Status Codes
// ============================================================================

/// HTTP-style status codes returned by replicas
pub mod status_codes {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const NO_CONTENT: u16 = 204;
    pub const NOT_FOUND: u16 = 404;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const CONFLICT: u16 = 409;
    pub const GONE: u16 = 410;
    pub const PRECONDITION_FAILED: u16 = 412;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const RETRY_WITH: u16 = 449;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// Sub-status codes refining a status code
pub mod sub_status_codes {
    pub const UNKNOWN: u32 = 0;
    /// 410: the collection was recreated and name-based caches are stale
    pub const NAME_CACHE_STALE: u32 = 1000;
    /// 404: the replica cannot satisfy the presented session token yet
    pub const READ_SESSION_NOT_AVAILABLE: u32 = 1002;
    /// 410: the partition key range was split or merged
    pub const PARTITION_KEY_RANGE_GONE: u32 = 1002;
    pub const COMPLETING_SPLIT: u32 = 1007;
    pub const COMPLETING_PARTITION_MIGRATION: u32 = 1008;
    /// 410 / 408: the replica no longer owns the partition lease
    pub const LEASE_NOT_FOUND: u32 = 1022;
    /// 408: the operation exceeded its end-to-end timeout on the client
    pub const CLIENT_OPERATION_TIMEOUT: u32 = 20008;
    /// 503: every candidate region was excluded
    pub const NO_VIABLE_REGION: u32 = 20100;
    /// 408: a strong write was never confirmed by the write barrier
    pub const WRITE_BARRIER_NOT_MET: u32 = 21010;
}

/// A (status, sub-status) pair as reported by the service or synthesized by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusPair {
    pub status: u16,
    pub sub_status: u32,
}

impl StatusPair {
    pub const fn new(status: u16, sub_status: u32) -> Self {
        Self { status, sub_status }
    }

    pub const fn ok() -> Self {
        Self::new(status_codes::OK, sub_status_codes::UNKNOWN)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_lease_not_found(&self) -> bool {
        self.status == status_codes::GONE && self.sub_status == sub_status_codes::LEASE_NOT_FOUND
    }

    pub fn is_read_session_not_available(&self) -> bool {
        self.status == status_codes::NOT_FOUND
            && self.sub_status == sub_status_codes::READ_SESSION_NOT_AVAILABLE
    }
}

impl std::fmt::Display for StatusPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.status, self.sub_status)
    }
}
