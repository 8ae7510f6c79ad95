//! Vector session tokens
//!
//! A session token records the progress a client has observed on one partition:
//! a token version, the global LSN and, per region, the local LSN. The text form is
//! `"{version}#{globalLsn}#{regionId}={localLsn}#..."`, and the partition-qualified form
//! used in request/response headers is `"{pkRangeId}:{token}"`, comma-separated for
//! several partitions.
//!
//! Tokens form a partial order: `a.is_as_new_as(b)` holds when every component of `a`
//! is at least the matching component of `b`. Merging takes the component-wise maximum,
//! so a merged token is as new as both inputs.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionTokenError {
    #[error("Malformed session token: {0}")]
    Malformed(String),

    #[error("Session token is missing the partition key range id: {0}")]
    MissingPartitionKeyRangeId(String),
}

/// Session progress on one partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorSessionToken {
    pub version: u64,
    pub global_lsn: u64,
    /// Region id (as assigned by the service) -> local LSN
    pub local_lsn_by_region: BTreeMap<u32, u64>,
}

impl VectorSessionToken {
    pub fn new(version: u64, global_lsn: u64) -> Self {
        Self { version, global_lsn, local_lsn_by_region: BTreeMap::new() }
    }

    /// Set the local LSN of a region
    pub fn with_region(mut self, region_id: u32, local_lsn: u64) -> Self {
        self.local_lsn_by_region.insert(region_id, local_lsn);
        self
    }

    /// The sentinel token: nothing observed yet
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.version == 0 && self.global_lsn == 0 && self.local_lsn_by_region.is_empty()
    }

    /// Local LSN of a region, or 0 when the region never appeared
    pub fn local_lsn(&self, region_id: u32) -> u64 {
        self.local_lsn_by_region.get(&region_id).copied().unwrap_or(0)
    }

    /// Check whether this token covers every component of `other`
    pub fn is_as_new_as(&self, other: &VectorSessionToken) -> bool {
        self.version >= other.version
            && self.global_lsn >= other.global_lsn
            && other
                .local_lsn_by_region
                .iter()
                .all(|(region, lsn)| self.local_lsn(*region) >= *lsn)
    }

    /// Component-wise maximum of two tokens
    pub fn merge(&self, other: &VectorSessionToken) -> VectorSessionToken {
        let mut local_lsn_by_region = self.local_lsn_by_region.clone();
        for (region, lsn) in &other.local_lsn_by_region {
            local_lsn_by_region
                .entry(*region)
                .and_modify(|current| *current = (*current).max(*lsn))
                .or_insert(*lsn);
        }

        VectorSessionToken {
            version: self.version.max(other.version),
            global_lsn: self.global_lsn.max(other.global_lsn),
            local_lsn_by_region,
        }
    }

    /// Merge `other` into this token; returns whether anything advanced
    pub fn merge_in_place(&mut self, other: &VectorSessionToken) -> bool {
        if self.is_as_new_as(other) {
            return false;
        }
        *self = self.merge(other);
        true
    }
}

impl fmt::Display for VectorSessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.version, self.global_lsn)?;
        for (region, lsn) in &self.local_lsn_by_region {
            write!(f, "#{region}={lsn}")?;
        }
        Ok(())
    }
}

impl FromStr for VectorSessionToken {
    type Err = SessionTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || SessionTokenError::Malformed(s.to_string());

        let mut segments = s.trim().split('#');
        let version = segments.next().and_then(|v| v.parse().ok()).ok_or_else(malformed)?;
        let global_lsn = segments.next().and_then(|v| v.parse().ok()).ok_or_else(malformed)?;

        let mut local_lsn_by_region = BTreeMap::new();
        for segment in segments {
            let (region, lsn) = segment.split_once('=').ok_or_else(malformed)?;
            let region: u32 = region.parse().map_err(|_| malformed())?;
            let lsn: u64 = lsn.parse().map_err(|_| malformed())?;
            local_lsn_by_region.insert(region, lsn);
        }

        Ok(Self { version, global_lsn, local_lsn_by_region })
    }
}

/// A session token qualified by its partition key range id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSessionToken {
    pub partition_key_range_id: String,
    pub token: VectorSessionToken,
}

impl PartitionSessionToken {
    pub fn new(partition_key_range_id: impl Into<String>, token: VectorSessionToken) -> Self {
        Self { partition_key_range_id: partition_key_range_id.into(), token }
    }

    /// Parse a comma-separated session header
    pub fn parse_header(header: &str) -> Result<Vec<PartitionSessionToken>, SessionTokenError> {
        header
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::parse)
            .collect()
    }

    /// Format several tokens as a session header
    pub fn format_header(tokens: &[PartitionSessionToken]) -> String {
        tokens.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
    }
}

impl fmt::Display for PartitionSessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition_key_range_id, self.token)
    }
}

impl FromStr for PartitionSessionToken {
    type Err = SessionTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (partition_key_range_id, token) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| SessionTokenError::MissingPartitionKeyRangeId(s.to_string()))?;

        if partition_key_range_id.is_empty() {
            return Err(SessionTokenError::MissingPartitionKeyRangeId(s.to_string()));
        }

        Ok(Self {
            partition_key_range_id: partition_key_range_id.to_string(),
            token: token.parse()?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let token: VectorSessionToken = "2#100#1=20#3=7".parse().unwrap();
        assert_eq!(token.version, 2);
        assert_eq!(token.global_lsn, 100);
        assert_eq!(token.local_lsn(1), 20);
        assert_eq!(token.local_lsn(3), 7);
        assert_eq!(token.local_lsn(2), 0);
        assert_eq!(token.to_string(), "2#100#1=20#3=7");

        let bare: VectorSessionToken = "1#5".parse().unwrap();
        assert!(bare.local_lsn_by_region.is_empty());
    }

    #[test]
    fn test_parse_errors() {
        for input in ["", "abc", "1", "1#x", "1#5#1", "1#5#a=3", "1#5#1=b"] {
            assert!(
                matches!(input.parse::<VectorSessionToken>(), Err(SessionTokenError::Malformed(_))),
                "expected {input:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_partial_order() {
        let older = VectorSessionToken::new(1, 10).with_region(1, 5);
        let newer = VectorSessionToken::new(1, 12).with_region(1, 6);
        let concurrent = VectorSessionToken::new(1, 11).with_region(2, 3);

        assert!(newer.is_as_new_as(&older));
        assert!(!older.is_as_new_as(&newer));
        assert!(!newer.is_as_new_as(&concurrent));
        assert!(!concurrent.is_as_new_as(&newer));
        assert!(older.is_as_new_as(&VectorSessionToken::empty()));
    }

    #[test]
    fn test_merge_is_upper_bound() {
        let a = VectorSessionToken::new(1, 12).with_region(1, 6);
        let b = VectorSessionToken::new(2, 11).with_region(2, 3);
        let merged = a.merge(&b);

        assert!(merged.is_as_new_as(&a));
        assert!(merged.is_as_new_as(&b));
        assert_eq!(merged.to_string(), "2#12#1=6#2=3");
    }

    #[test]
    fn test_merge_in_place_reports_progress() {
        let mut token = VectorSessionToken::new(1, 10);
        assert!(!token.merge_in_place(&VectorSessionToken::new(1, 9)));
        assert!(token.merge_in_place(&VectorSessionToken::new(1, 11)));
        assert_eq!(token.global_lsn, 11);
    }

    #[test]
    fn test_partition_header() {
        let tokens = PartitionSessionToken::parse_header("0:1#100#1=20, 1:1#50").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].partition_key_range_id, "0");
        assert_eq!(tokens[1].token.global_lsn, 50);
        assert_eq!(PartitionSessionToken::format_header(&tokens), "0:1#100#1=20,1:1#50");

        assert!(matches!(
            "1#100".parse::<PartitionSessionToken>(),
            Err(SessionTokenError::MissingPartitionKeyRangeId(_))
        ));
        assert!(PartitionSessionToken::parse_header("").unwrap().is_empty());
    }
}
