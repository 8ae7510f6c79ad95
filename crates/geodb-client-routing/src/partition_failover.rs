//! # Per-Partition Automatic Failover
//!
//! For accounts with a single write region, a read failure that is local to one
//! partition (lease lost, barrier exhausted, replicas unreachable) moves only that
//! partition to the next region instead of demoting the whole region.
//!
//! Every partition entry keeps a `current` region and the set of regions that already
//! failed for it. Under concurrent failures exactly one caller moves the partition;
//! the others observe that `current` no longer matches the region they saw fail and
//! return without touching the entry. When every region has failed, the failed set is
//! reset so the partition keeps cycling instead of getting stuck.

use std::{collections::BTreeSet, sync::Arc};

use geodb_client_observe::metrics;
use geodb_client_types::{OperationType, PartitionKeyRangeIdentity, RegionId};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    routing_table::RegionalRoutingTable,
    sharded::{ShardedMap, lock},
};

/// Registry key: the collection and partition key range a failover applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub collection_rid: String,
    pub partition_key_range_id: String,
}

impl From<&PartitionKeyRangeIdentity> for PartitionKey {
    fn from(partition: &PartitionKeyRangeIdentity) -> Self {
        Self {
            collection_rid: partition.collection_rid.clone(),
            partition_key_range_id: partition.partition_key_range_id.clone(),
        }
    }
}

/// Failover state of one partition
#[derive(Debug, Clone)]
struct PartitionLevelFailoverInfo {
    current: RegionId,
    failed: BTreeSet<RegionId>,
    failover_count: u64,
    last_failover_at: Option<Instant>,
}

impl PartitionLevelFailoverInfo {
    fn new(current: RegionId) -> Self {
        Self { current, failed: BTreeSet::new(), failover_count: 0, last_failover_at: None }
    }

    /// Move away from `failed_region`; returns the new current region, or `None` when
    /// another caller already moved the partition or no other region exists.
    fn try_move_next(
        &mut self,
        failed_region: &RegionId,
        ordered: &[RegionId],
    ) -> Option<RegionId> {
        if &self.current != failed_region {
            return None;
        }

        self.failed.insert(failed_region.clone());

        let next = match ordered.iter().find(|r| *r != failed_region && !self.failed.contains(*r))
        {
            Some(next) => next.clone(),
            None => {
                // Every region failed once: start over, keeping only the latest failure.
                self.failed.clear();
                self.failed.insert(failed_region.clone());
                ordered.iter().find(|r| *r != failed_region)?.clone()
            },
        };

        self.current = next.clone();
        self.failover_count += 1;
        self.last_failover_at = Some(Instant::now());
        Some(next)
    }
}

/// Read-only view of a partition's failover state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFailoverSnapshot {
    pub current: RegionId,
    pub failed: Vec<RegionId>,
    pub failover_count: u64,
    pub last_failover_at: Option<Instant>,
}

/// Thread-safe per-partition region overrides
pub struct PartitionFailoverRegistry {
    routing_table: Arc<RegionalRoutingTable>,
    enabled: bool,
    entries: ShardedMap<PartitionKey, PartitionLevelFailoverInfo>,
}

impl PartitionFailoverRegistry {
    pub fn new(routing_table: Arc<RegionalRoutingTable>, enabled: bool) -> Self {
        Self { routing_table, enabled, entries: ShardedMap::new() }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Try to move `partition` away from `failed_region`.
    ///
    /// Returns `true` when the partition is (now, or already, through a concurrent
    /// caller) routed away from `failed_region`; `false` when per-partition failover
    /// does not apply to this request and the caller should fall back to region-level
    /// handling.
    pub fn try_mark_unavailable_for_partition(
        &self,
        partition: &PartitionKeyRangeIdentity,
        failed_region: &RegionId,
        operation_type: OperationType,
    ) -> bool {
        if !self.enabled {
            return false;
        }

        if operation_type.is_write() {
            debug!(partition = %partition, "Per-partition failover does not apply to writes");
            return false;
        }

        if !self.routing_table.is_single_write_region() {
            debug!(
                partition = %partition,
                "Per-partition failover only applies to single-write-region accounts"
            );
            return false;
        }

        let ordered: Vec<RegionId> = match self.routing_table.ordered_read_regions(&[]) {
            Ok(endpoints) => endpoints.into_iter().map(|e| e.region).collect(),
            Err(_) => return false,
        };

        if !ordered.iter().any(|r| r != failed_region) {
            return false;
        }

        let key = PartitionKey::from(partition);
        let entry = self.entries.get_or_insert_with(&key, || {
            PartitionLevelFailoverInfo::new(failed_region.clone())
        });

        let mut info = lock(&entry);
        match info.try_move_next(failed_region, &ordered) {
            Some(next) => {
                metrics::record_partition_failover(failed_region.as_str(), next.as_str());
                warn!(
                    partition = %partition,
                    from = %failed_region,
                    to = %next,
                    failover_count = info.failover_count,
                    "Partition failed over to next region"
                );
                true
            },
            None => {
                debug!(
                    partition = %partition,
                    failed_region = %failed_region,
                    current = %info.current,
                    "Partition already moved by a concurrent failover"
                );
                true
            },
        }
    }

    /// Region override for a partition, if it has failed over
    pub fn current_region_for_partition(
        &self,
        partition: &PartitionKeyRangeIdentity,
    ) -> Option<RegionId> {
        if !self.enabled {
            return None;
        }

        let entry = self.entries.get(&PartitionKey::from(partition))?;
        let info = lock(&entry);
        Some(info.current.clone())
    }

    /// Snapshot of a partition's failover state
    pub fn snapshot(
        &self,
        partition: &PartitionKeyRangeIdentity,
    ) -> Option<PartitionFailoverSnapshot> {
        let entry = self.entries.get(&PartitionKey::from(partition))?;
        let info = lock(&entry);
        Some(PartitionFailoverSnapshot {
            current: info.current.clone(),
            failed: info.failed.iter().cloned().collect(),
            failover_count: info.failover_count,
            last_failover_at: info.last_failover_at,
        })
    }

    /// Forget the override of a partition (e.g. after a split made it obsolete)
    pub fn remove_partition(&self, partition: &PartitionKeyRangeIdentity) -> bool {
        self.entries.remove(&PartitionKey::from(partition)).is_some()
    }

    /// Forget every override of a collection
    pub fn remove_collection(&self, collection_rid: &str) {
        self.entries.retain(|key| key.collection_rid != collection_rid);
    }

    /// Forget every override
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of partitions with an override
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
