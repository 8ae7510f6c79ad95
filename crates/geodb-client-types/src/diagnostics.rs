//! Read-only diagnostics snapshot of a logical operation
//!
//! Produced by the routing core when an operation completes (successfully or not) and
//! handed to the diagnostics sink and to callers through `ClientError`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ConsistencyLevel, OperationType, RegionId, ResourceType, StatusPair};

/// Statistics for a single replica-level request (main request or barrier)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStatistics {
    pub region: RegionId,
    /// Physical address of the replica that served the request
    pub replica: String,
    /// Whether the replica was the partition's primary
    pub is_primary: bool,
    pub operation_type: OperationType,
    pub resource_type: ResourceType,
    pub status: StatusPair,
    /// LSN reported by the replica, when the request succeeded
    pub lsn: Option<u64>,
    pub duration: Duration,
}

impl RequestStatistics {
    pub fn is_head(&self) -> bool {
        self.operation_type == OperationType::Head
    }
}

/// What the core decided to do after a replica-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAction {
    /// Retried against the same region
    RetryInRegion,
    /// Re-resolved replica addresses before retrying in the same region
    RefreshAddresses,
    /// Moved on to the next region in preference order
    FailoverRegion,
    /// Moved the partition to another region through per-partition failover
    PartitionFailover,
    /// Started a speculative attempt in another region
    Speculate,
}

/// One entry of the retry/failover history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub region: RegionId,
    pub status: StatusPair,
    pub action: RetryAction,
}

/// Snapshot of everything the core did for one logical operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub activity_id: Uuid,
    pub operation_type: OperationType,
    pub resource_type: ResourceType,
    pub consistency_level: ConsistencyLevel,
    pub excluded_regions: Vec<RegionId>,
    /// Regions contacted, in first-contact order, without duplicates
    pub contacted_regions: Vec<RegionId>,
    /// Regions that took part in availability-strategy racing
    pub raced_regions: Vec<RegionId>,
    pub requests: Vec<RequestStatistics>,
    pub retries: Vec<RetryRecord>,
    pub duration: Duration,
}

impl Diagnostics {
    /// Names of the contacted regions in first-contact order
    pub fn contacted_region_names(&self) -> Vec<&str> {
        self.contacted_regions.iter().map(RegionId::as_str).collect()
    }

    /// Barrier (HEAD) requests only
    pub fn head_requests(&self) -> impl Iterator<Item = &RequestStatistics> {
        self.requests.iter().filter(|r| r.is_head())
    }

    /// Number of barrier requests that failed with 410/1022
    pub fn lease_not_found_head_count(&self) -> usize {
        self.head_requests().filter(|r| r.status.is_lease_not_found()).count()
    }

    /// Whether any barrier request was sent to a primary replica
    pub fn primary_contacted_by_barrier(&self) -> bool {
        self.head_requests().any(|r| r.is_primary)
    }

    /// Main (non-barrier) requests that ended with the given status
    pub fn main_requests_with_status(&self, status: u16) -> usize {
        self.requests.iter().filter(|r| !r.is_head() && r.status.status == status).count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{status_codes, sub_status_codes};

    fn head(region: &str, primary: bool, status: StatusPair) -> RequestStatistics {
        RequestStatistics {
            region: RegionId::new(region),
            replica: format!("rntbd://{region}/replica"),
            is_primary: primary,
            operation_type: OperationType::Head,
            resource_type: ResourceType::Document,
            status,
            lsn: None,
            duration: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_head_accounting() {
        let lease = StatusPair::new(status_codes::GONE, sub_status_codes::LEASE_NOT_FOUND);
        let diagnostics = Diagnostics {
            contacted_regions: vec![RegionId::new("West US")],
            requests: vec![
                head("West US", false, lease),
                head("West US", false, lease),
                head("West US", true, StatusPair::ok()),
            ],
            ..Default::default()
        };

        assert_eq!(diagnostics.head_requests().count(), 3);
        assert_eq!(diagnostics.lease_not_found_head_count(), 2);
        assert!(diagnostics.primary_contacted_by_barrier());
        assert_eq!(diagnostics.contacted_region_names(), vec!["West US"]);
        assert_eq!(diagnostics.main_requests_with_status(status_codes::GONE), 0);
    }
}
