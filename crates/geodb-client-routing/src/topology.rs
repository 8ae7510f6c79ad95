//! # Account Topology
//!
//! Describes the regions an account is deployed to: which regions accept reads, which
//! accept writes, and whether the account allows writes in more than one region.
//! Readable and writable lists are kept in service order (the order the account
//! reports them), which is the fallback order whenever no preference applies.

use std::collections::HashSet;

use geodb_client_types::RegionId;
use serde::{Deserialize, Serialize};

/// A region together with the endpoint that serves it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionalEndpoint {
    pub region: RegionId,
    /// Gateway endpoint of the region (e.g., "https://acct-westus.geodb.example")
    pub endpoint: String,
}

impl RegionalEndpoint {
    pub fn new(region: impl Into<RegionId>, endpoint: impl Into<String>) -> Self {
        Self { region: region.into(), endpoint: endpoint.into() }
    }
}

/// Region layout of a database account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTopology {
    /// Regions accepting reads, in service order
    pub readable: Vec<RegionalEndpoint>,
    /// Regions accepting writes, in service order; the first one is the hub
    pub writable: Vec<RegionalEndpoint>,
    /// Whether the account accepts writes in every writable region
    pub multiple_write_locations: bool,
}

impl AccountTopology {
    /// Get the hub (first) write region
    pub fn hub_write_region(&self) -> Option<&RegionalEndpoint> {
        self.writable.first()
    }

    /// Check whether a region accepts reads
    pub fn is_readable(&self, region: &RegionId) -> bool {
        self.readable.iter().any(|r| &r.region == region)
    }

    /// Check whether a region accepts writes
    pub fn is_writable(&self, region: &RegionId) -> bool {
        self.writable.iter().any(|r| &r.region == region)
    }

    /// All distinct regions of the account (readable first, then write-only ones)
    pub fn regions(&self) -> Vec<RegionId> {
        let mut seen = HashSet::new();
        self.readable
            .iter()
            .chain(&self.writable)
            .filter(|r| seen.insert(r.region.clone()))
            .map(|r| r.region.clone())
            .collect()
    }

    /// Validate the topology configuration
    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.readable.is_empty() {
            return Err(TopologyError::NoReadableRegions);
        }

        if self.writable.is_empty() {
            return Err(TopologyError::NoWritableRegions);
        }

        for list in [&self.readable, &self.writable] {
            let mut seen = HashSet::new();
            for endpoint in list {
                if endpoint.region.as_str().trim().is_empty() {
                    return Err(TopologyError::EmptyRegionName);
                }
                if endpoint.endpoint.trim().is_empty() {
                    return Err(TopologyError::InvalidEndpoint(endpoint.region.clone()));
                }
                if !seen.insert(&endpoint.region) {
                    return Err(TopologyError::DuplicateRegion(endpoint.region.clone()));
                }
            }
        }

        Ok(())
    }
}

/// Errors related to topology configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("Account topology has no readable regions")]
    NoReadableRegions,

    #[error("Account topology has no writable regions")]
    NoWritableRegions,

    #[error("Region names must not be empty")]
    EmptyRegionName,

    #[error("Region {0} has an empty endpoint")]
    InvalidEndpoint(RegionId),

    #[error("Region {0} is listed more than once")]
    DuplicateRegion(RegionId),
}

/// Builder for creating account topologies
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    topology: AccountTopology,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a region that accepts reads
    pub fn readable_region(
        mut self,
        region: impl Into<RegionId>,
        endpoint: impl Into<String>,
    ) -> Self {
        self.topology.readable.push(RegionalEndpoint::new(region, endpoint));
        self
    }

    /// Add a region that accepts writes
    pub fn writable_region(
        mut self,
        region: impl Into<RegionId>,
        endpoint: impl Into<String>,
    ) -> Self {
        self.topology.writable.push(RegionalEndpoint::new(region, endpoint));
        self
    }

    /// Add a region that accepts both reads and writes
    pub fn region(self, region: impl Into<RegionId>, endpoint: impl Into<String>) -> Self {
        let region = region.into();
        let endpoint = endpoint.into();
        self.readable_region(region.clone(), endpoint.clone()).writable_region(region, endpoint)
    }

    /// Allow writes in every writable region
    pub fn multiple_write_locations(mut self, enabled: bool) -> Self {
        self.topology.multiple_write_locations = enabled;
        self
    }

    /// Build and validate the topology
    pub fn build(self) -> Result<AccountTopology, TopologyError> {
        self.topology.validate()?;
        Ok(self.topology)
    }
}

/// Source of the current account topology
///
/// Implementations typically wrap the account metadata endpoint; tests use
/// [`StaticTopologyProvider`].
pub trait AccountTopologyProvider: Send + Sync {
    /// Readable regions in service order
    fn readable_regions(&self) -> Vec<RegionalEndpoint>;

    /// Writable regions in service order
    fn writable_regions(&self) -> Vec<RegionalEndpoint>;

    /// Whether the account accepts writes in every writable region
    fn multiple_write_locations(&self) -> bool;

    /// Assemble and validate the current topology
    fn topology(&self) -> Result<AccountTopology, TopologyError> {
        let topology = AccountTopology {
            readable: self.readable_regions(),
            writable: self.writable_regions(),
            multiple_write_locations: self.multiple_write_locations(),
        };
        topology.validate()?;
        Ok(topology)
    }
}

/// Provider returning a fixed topology
#[derive(Debug, Clone)]
pub struct StaticTopologyProvider {
    topology: AccountTopology,
}

impl StaticTopologyProvider {
    pub fn new(topology: AccountTopology) -> Self {
        Self { topology }
    }
}

impl AccountTopologyProvider for StaticTopologyProvider {
    fn readable_regions(&self) -> Vec<RegionalEndpoint> {
        self.topology.readable.clone()
    }

    fn writable_regions(&self) -> Vec<RegionalEndpoint> {
        self.topology.writable.clone()
    }

    fn multiple_write_locations(&self) -> bool {
        self.topology.multiple_write_locations
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_single_write_region() {
        let topology = TopologyBuilder::new()
            .region("West US", "https://westus")
            .readable_region("East US", "https://eastus")
            .build()
            .unwrap();

        assert_eq!(topology.readable.len(), 2);
        assert_eq!(topology.writable.len(), 1);
        assert_eq!(topology.hub_write_region().unwrap().region.as_str(), "West US");
        assert!(topology.is_readable(&RegionId::new("East US")));
        assert!(!topology.is_writable(&RegionId::new("East US")));
        assert!(!topology.multiple_write_locations);
    }

    #[test]
    fn test_regions_are_distinct() {
        let topology = TopologyBuilder::new()
            .region("West US", "https://westus")
            .region("East US", "https://eastus")
            .multiple_write_locations(true)
            .build()
            .unwrap();

        assert_eq!(topology.regions(), vec![RegionId::new("West US"), RegionId::new("East US")]);
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(
            TopologyBuilder::new().writable_region("West US", "https://westus").build(),
            Err(TopologyError::NoReadableRegions)
        );
        assert_eq!(
            TopologyBuilder::new().readable_region("West US", "https://westus").build(),
            Err(TopologyError::NoWritableRegions)
        );
        assert_eq!(
            TopologyBuilder::new()
                .region("West US", "https://westus")
                .readable_region("West US", "https://westus-2")
                .build(),
            Err(TopologyError::DuplicateRegion(RegionId::new("West US")))
        );
        assert_eq!(
            TopologyBuilder::new().region("West US", "").build(),
            Err(TopologyError::InvalidEndpoint(RegionId::new("West US")))
        );
    }

    #[test]
    fn test_static_provider_round_trips_topology() {
        let topology = TopologyBuilder::new()
            .region("West US", "https://westus")
            .readable_region("East US", "https://eastus")
            .build()
            .unwrap();

        let provider = StaticTopologyProvider::new(topology.clone());
        assert_eq!(provider.topology().unwrap(), topology);
    }
}
