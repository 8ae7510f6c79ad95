//! Bloom filter over (collection, effective partition key, region) triples
//!
//! Region-scoped session capturing records which regions served a given logical
//! partition key. A request can then send a session token merged only from the regions
//! that actually saw that key, instead of the token of every region. False positives
//! only widen the merged token; there are no false negatives.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::RwLock,
};

use geodb_client_types::RegionId;

use crate::sharded::{read, write};

/// A space-efficient probabilistic set
#[derive(Debug, Clone)]
pub struct BloomFilter {
    /// Bit array stored as packed `u64` words
    bits: Vec<u64>,
    /// Number of hash functions (k)
    num_hashes: u32,
    /// Total number of bits in the filter (m)
    num_bits: usize,
}

impl BloomFilter {
    /// Create a filter sized for `expected_items` at the target `false_positive_rate`.
    ///
    /// Out-of-range inputs are clamped: at least one item, and a rate inside (0, 1).
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let expected_items = expected_items.max(1);
        let false_positive_rate = if false_positive_rate > 0.0 && false_positive_rate < 1.0 {
            false_positive_rate
        } else {
            0.01
        };

        // m = -n * ln(p) / (ln 2)^2
        let ln2 = std::f64::consts::LN_2;
        let num_bits =
            (-(expected_items as f64) * false_positive_rate.ln() / (ln2 * ln2)).ceil() as usize;
        let num_bits = num_bits.max(64);

        // k = (m / n) * ln 2
        let num_hashes = ((num_bits as f64 / expected_items as f64) * ln2).ceil() as u32;
        let num_hashes = num_hashes.max(1);

        Self { bits: vec![0u64; num_bits.div_ceil(64)], num_hashes, num_bits }
    }

    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hash_pair(key);
        for i in 0..self.num_hashes {
            let idx = self.bit_index(h1, h2, i);
            self.bits[idx / 64] |= 1u64 << (idx % 64);
        }
    }

    /// `false` means the key was definitely never inserted
    pub fn contains(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hash_pair(key);
        (0..self.num_hashes).all(|i| {
            let idx = self.bit_index(h1, h2, i);
            self.bits[idx / 64] & (1u64 << (idx % 64)) != 0
        })
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    fn hash_pair(key: &[u8]) -> (u64, u64) {
        let mut h1 = DefaultHasher::new();
        key.hash(&mut h1);
        let hash1 = h1.finish();

        let mut h2 = DefaultHasher::new();
        hash1.hash(&mut h2);
        key.hash(&mut h2);

        (hash1, h2.finish())
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> usize {
        (h1.wrapping_add(u64::from(i).wrapping_mul(h2)) % self.num_bits as u64) as usize
    }
}

/// Concurrent filter recording which regions served a partition key
#[derive(Debug)]
pub struct PartitionKeyRegionFilter {
    filter: RwLock<BloomFilter>,
}

impl PartitionKeyRegionFilter {
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        Self { filter: RwLock::new(BloomFilter::new(expected_items, false_positive_rate)) }
    }

    fn key(collection_rid: &str, effective_partition_key: &str, region: &RegionId) -> Vec<u8> {
        let mut key = Vec::with_capacity(
            collection_rid.len() + effective_partition_key.len() + region.as_str().len() + 2,
        );
        key.extend_from_slice(collection_rid.as_bytes());
        key.push(0);
        key.extend_from_slice(effective_partition_key.as_bytes());
        key.push(0);
        key.extend_from_slice(region.as_str().as_bytes());
        key
    }

    /// Record that `region` served a request for the partition key
    pub fn record(&self, collection_rid: &str, effective_partition_key: &str, region: &RegionId) {
        let key = Self::key(collection_rid, effective_partition_key, region);
        if read(&self.filter).contains(&key) {
            return;
        }
        write(&self.filter).insert(&key);
    }

    /// Whether `region` may have served the partition key
    pub fn may_contain(
        &self,
        collection_rid: &str,
        effective_partition_key: &str,
        region: &RegionId,
    ) -> bool {
        read(&self.filter).contains(&Self::key(collection_rid, effective_partition_key, region))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::new(1_000, 0.01);
        for i in 0..1_000u32 {
            filter.insert(&i.to_le_bytes());
        }
        for i in 0..1_000u32 {
            assert!(filter.contains(&i.to_le_bytes()));
        }
    }

    #[test]
    fn test_false_positive_rate_is_bounded() {
        let mut filter = BloomFilter::new(1_000, 0.01);
        for i in 0..1_000u32 {
            filter.insert(&i.to_le_bytes());
        }
        let false_positives =
            (1_000..11_000u32).filter(|i| filter.contains(&i.to_le_bytes())).count();
        // 1% target over 10k lookups, with generous slack
        assert!(false_positives < 300, "false positives: {false_positives}");
    }

    #[test]
    fn test_invalid_parameters_are_clamped() {
        let filter = BloomFilter::new(0, 2.0);
        assert!(filter.num_bits() >= 64);
        assert!(filter.num_hashes() >= 1);
    }

    #[test]
    fn test_partition_key_region_filter() {
        let filter = PartitionKeyRegionFilter::new(10_000, 0.001);
        let west = RegionId::new("West US");
        let east = RegionId::new("East US");

        filter.record("coll1", "pk-a", &west);
        assert!(filter.may_contain("coll1", "pk-a", &west));
        assert!(!filter.may_contain("coll1", "pk-a", &east));
        assert!(!filter.may_contain("coll2", "pk-a", &west));
    }
}
