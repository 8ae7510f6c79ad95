//! # Session Token Store
//!
//! Keeps, per partition key range, the session tokens returned by the service so later
//! reads can ask for at least the progress the client has already observed.
//!
//! Two capturing modes:
//! - **Partition-scoped** (default): one merged token per partition
//! - **Region-scoped**: one token per (partition, region). Requests merge only tokens of
//!   regions that are not excluded. When an effective partition key is known, local LSNs
//!   are further limited to regions that may have served that key according to a Bloom
//!   filter.
//!
//! Recorded tokens only ever move forward: merging is a component-wise maximum.

use std::collections::BTreeMap;

use geodb_client_types::{PartitionKeyRangeIdentity, RegionId};
use tracing::{debug, trace, warn};

use crate::{
    Result,
    bloom::PartitionKeyRegionFilter,
    session_token::{PartitionSessionToken, VectorSessionToken},
    sharded::{ShardedMap, lock},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    collection_rid: String,
    partition_key_range_id: String,
}

impl From<&PartitionKeyRangeIdentity> for SessionKey {
    fn from(partition: &PartitionKeyRangeIdentity) -> Self {
        Self {
            collection_rid: partition.collection_rid.clone(),
            partition_key_range_id: partition.partition_key_range_id.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct PartitionSessionState {
    /// Merge of every recorded token
    merged: VectorSessionToken,
    /// Region-scoped tokens (only populated in region-scoped mode)
    by_region: BTreeMap<RegionId, VectorSessionToken>,
}

/// Thread-safe session token bookkeeping
pub struct SessionTokenStore {
    region_scoped: bool,
    partitions: ShardedMap<SessionKey, PartitionSessionState>,
    key_filter: Option<PartitionKeyRegionFilter>,
}

impl SessionTokenStore {
    /// Create a partition-scoped store
    pub fn new() -> Self {
        Self { region_scoped: false, partitions: ShardedMap::new(), key_filter: None }
    }

    /// Create a region-scoped store with a Bloom filter sized for `expected_insertions`
    pub fn region_scoped(expected_insertions: usize, false_positive_rate: f64) -> Self {
        Self {
            region_scoped: true,
            partitions: ShardedMap::new(),
            key_filter: Some(PartitionKeyRegionFilter::new(
                expected_insertions,
                false_positive_rate,
            )),
        }
    }

    pub fn is_region_scoped(&self) -> bool {
        self.region_scoped
    }

    /// Record a token returned by `region` for `partition`.
    ///
    /// Returns whether the stored state advanced.
    pub fn record_response_token(
        &self,
        partition: &PartitionKeyRangeIdentity,
        region: &RegionId,
        token: &VectorSessionToken,
    ) -> bool {
        let entry = self
            .partitions
            .get_or_insert_with(&SessionKey::from(partition), PartitionSessionState::default);
        let mut state = lock(&entry);

        let mut advanced = state.merged.merge_in_place(token);
        if self.region_scoped {
            advanced |= state.by_region.entry(region.clone()).or_default().merge_in_place(token);
        }

        if advanced {
            trace!(
                partition = %partition,
                region = %region,
                token = %token,
                "Session token advanced"
            );
        }
        advanced
    }

    /// Record a token and remember that `region` served the effective partition key
    pub fn record_response_token_for_key(
        &self,
        partition: &PartitionKeyRangeIdentity,
        effective_partition_key: &str,
        region: &RegionId,
        token: &VectorSessionToken,
    ) -> bool {
        if let Some(filter) = &self.key_filter {
            filter.record(&partition.collection_rid, effective_partition_key, region);
        }
        self.record_response_token(partition, region, token)
    }

    /// Record every entry of a response session header that belongs to `partition`
    pub fn record_response_header(
        &self,
        partition: &PartitionKeyRangeIdentity,
        effective_partition_key: Option<&str>,
        region: &RegionId,
        header: &str,
    ) -> Result<bool> {
        let mut advanced = false;
        for entry in PartitionSessionToken::parse_header(header)? {
            if entry.partition_key_range_id != partition.partition_key_range_id {
                debug!(
                    partition = %partition,
                    returned = %entry.partition_key_range_id,
                    "Ignoring session token for another partition key range"
                );
                continue;
            }
            advanced |= match effective_partition_key {
                Some(epk) => {
                    self.record_response_token_for_key(partition, epk, region, &entry.token)
                },
                None => self.record_response_token(partition, region, &entry.token),
            };
        }
        Ok(advanced)
    }

    /// Token to send for a request on `partition`.
    ///
    /// Returns the empty sentinel when nothing applicable has been recorded.
    pub fn token_for_request(
        &self,
        partition: &PartitionKeyRangeIdentity,
        excluded_regions: &[RegionId],
    ) -> VectorSessionToken {
        self.resolve(partition, excluded_regions, None)
    }

    /// Token to send for a request on a single logical partition key
    pub fn token_for_request_with_key(
        &self,
        partition: &PartitionKeyRangeIdentity,
        effective_partition_key: &str,
        excluded_regions: &[RegionId],
    ) -> VectorSessionToken {
        self.resolve(partition, excluded_regions, Some(effective_partition_key))
    }

    /// Partition-qualified session header to send, if any token applies
    pub fn session_header(
        &self,
        partition: &PartitionKeyRangeIdentity,
        effective_partition_key: Option<&str>,
        excluded_regions: &[RegionId],
    ) -> Option<String> {
        let token = self.resolve(partition, excluded_regions, effective_partition_key);
        if token.is_empty() {
            return None;
        }
        let entry = PartitionSessionToken::new(partition.partition_key_range_id.clone(), token);
        Some(entry.to_string())
    }

    fn resolve(
        &self,
        partition: &PartitionKeyRangeIdentity,
        excluded_regions: &[RegionId],
        effective_partition_key: Option<&str>,
    ) -> VectorSessionToken {
        let Some(entry) = self.partitions.get(&SessionKey::from(partition)) else {
            return VectorSessionToken::empty();
        };
        let state = lock(&entry);

        if !self.region_scoped {
            return state.merged.clone();
        }

        let candidates: Vec<(&RegionId, &VectorSessionToken)> = state
            .by_region
            .iter()
            .filter(|(region, _)| !excluded_regions.contains(region))
            .collect();
        let merged = candidates
            .iter()
            .fold(VectorSessionToken::empty(), |acc, (_, token)| acc.merge(token));

        let (Some(epk), Some(filter)) = (effective_partition_key, &self.key_filter) else {
            return merged;
        };

        // Version and global LSN stay the maximum over every candidate region, only the
        // local LSNs are narrowed to regions that served the key. Regions learned by the
        // filter are never forgotten, so the narrowed token cannot move backwards.
        let local_lsn_by_region = candidates
            .iter()
            .filter(|(region, _)| filter.may_contain(&partition.collection_rid, epk, region))
            .fold(VectorSessionToken::empty(), |acc, (_, token)| acc.merge(token))
            .local_lsn_by_region;

        VectorSessionToken { local_lsn_by_region, ..merged }
    }

    /// Region-scoped tokens of a partition
    pub fn region_tokens(
        &self,
        partition: &PartitionKeyRangeIdentity,
    ) -> BTreeMap<RegionId, VectorSessionToken> {
        self.partitions
            .get(&SessionKey::from(partition))
            .map(|entry| lock(&entry).by_region.clone())
            .unwrap_or_default()
    }

    /// Drop every token of a collection (e.g. after the collection was recreated)
    pub fn invalidate_collection(&self, collection_rid: &str) {
        warn!(collection_rid = %collection_rid, "Invalidating session tokens of collection");
        self.partitions.retain(|key| key.collection_rid != collection_rid);
    }

    /// Drop every recorded token
    pub fn clear(&self) {
        self.partitions.clear();
    }

    /// Number of partitions with recorded tokens
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn partition() -> PartitionKeyRangeIdentity {
        PartitionKeyRangeIdentity::new("coll1", "0")
    }

    fn token(global: u64, region: u32, local: u64) -> VectorSessionToken {
        VectorSessionToken::new(1, global).with_region(region, local)
    }

    #[test]
    fn test_partition_scoped_merges_everything() {
        let store = SessionTokenStore::new();
        let west = RegionId::new("West US");
        let east = RegionId::new("East US");

        assert!(store.token_for_request(&partition(), &[]).is_empty());

        assert!(store.record_response_token(&partition(), &west, &token(10, 1, 10)));
        assert!(store.record_response_token(&partition(), &east, &token(8, 2, 8)));
        assert!(!store.record_response_token(&partition(), &east, &token(5, 2, 5)));

        let merged = store.token_for_request(&partition(), &[west]);
        assert_eq!(merged.to_string(), "1#10#1=10#2=8");
        assert!(store.region_tokens(&partition()).is_empty());
    }

    #[test]
    fn test_region_scoped_honours_exclusions() {
        let store = SessionTokenStore::region_scoped(1_000, 0.001);
        let west = RegionId::new("West US");
        let east = RegionId::new("East US");

        store.record_response_token(&partition(), &west, &token(10, 1, 10));
        store.record_response_token(&partition(), &east, &token(8, 2, 8));

        let without_west = store.token_for_request(&partition(), &[west.clone()]);
        assert_eq!(without_west.to_string(), "1#8#2=8");

        let all_excluded = store.token_for_request(&partition(), &[west, east]);
        assert!(all_excluded.is_empty());

        assert_eq!(store.region_tokens(&partition()).len(), 2);
    }

    #[test]
    fn test_region_scoped_uses_key_filter() {
        let store = SessionTokenStore::region_scoped(1_000, 0.001);
        let west = RegionId::new("West US");
        let east = RegionId::new("East US");

        store.record_response_token_for_key(&partition(), "pk-a", &west, &token(10, 1, 10));
        store.record_response_token_for_key(&partition(), "pk-b", &east, &token(12, 2, 12));

        // Local LSNs only come from regions that served the key.
        let for_a = store.token_for_request_with_key(&partition(), "pk-a", &[]);
        assert_eq!(for_a.to_string(), "1#12#1=10");

        // Keys no region has served only carry the partition-wide progress.
        let for_unknown = store.token_for_request_with_key(&partition(), "pk-z", &[]);
        assert_eq!(for_unknown.to_string(), "1#12");

        let unkeyed = store.token_for_request(&partition(), &[]);
        assert_eq!(unkeyed.to_string(), "1#12#1=10#2=12");
    }

    #[test]
    fn test_keyed_token_does_not_regress_once_key_is_learned() {
        let store = SessionTokenStore::region_scoped(1_000, 0.001);
        let west = RegionId::new("West US");
        let east = RegionId::new("East US");

        store.record_response_token(&partition(), &east, &token(12, 2, 12));
        let before = store.token_for_request_with_key(&partition(), "pk-a", &[]);

        store.record_response_token_for_key(&partition(), "pk-a", &west, &token(10, 1, 10));
        let after = store.token_for_request_with_key(&partition(), "pk-a", &[]);

        assert!(after.is_as_new_as(&before));
        assert_eq!(after.to_string(), "1#12#1=10");
    }

    #[test]
    fn test_header_round_trip_and_foreign_partitions() {
        let store = SessionTokenStore::new();
        let west = RegionId::new("West US");

        let advanced = store
            .record_response_header(&partition(), None, &west, "0:1#10#1=10,7:1#99#1=99")
            .unwrap();
        assert!(advanced);

        assert_eq!(store.session_header(&partition(), None, &[]).as_deref(), Some("0:1#10#1=10"));
        let other = PartitionKeyRangeIdentity::new("coll1", "7");
        assert!(store.session_header(&other, None, &[]).is_none());

        assert!(store.record_response_header(&partition(), None, &west, "garbage").is_err());
    }

    #[test]
    fn test_invalidate_collection() {
        let store = SessionTokenStore::new();
        let west = RegionId::new("West US");
        store.record_response_token(&partition(), &west, &token(10, 1, 10));
        let other = PartitionKeyRangeIdentity::new("coll2", "0");
        store.record_response_token(&other, &west, &token(3, 1, 3));

        store.invalidate_collection("coll1");
        assert_eq!(store.len(), 1);
        assert!(store.token_for_request(&partition(), &[]).is_empty());

        store.clear();
        assert!(store.is_empty());
    }
}
