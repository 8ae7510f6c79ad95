//! # Regional Routing Table
//!
//! Produces the preference-ordered list of regions for reads and writes:
//! - Preferred regions known to the account come first, in preference order
//! - Remaining account regions follow in service order
//! - Excluded regions are removed
//! - Regions marked unavailable (and still inside their cooldown) are moved to the end,
//!   never dropped, so an operation always has somewhere to go
//! - Single-write-region accounts route every write to the hub write region
//!
//! The table is a copy-on-write snapshot: readers clone an `Arc` and never block
//! writers that mark regions unavailable or refresh the topology.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use geodb_client_observe::metrics;
use geodb_client_types::{OperationType, RegionId};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    Result, RoutingError,
    sharded::{read, write},
    topology::{AccountTopology, AccountTopologyProvider, RegionalEndpoint},
};

/// Immutable routing state shared with readers
#[derive(Debug, Clone)]
pub struct RoutingSnapshot {
    pub topology: AccountTopology,
    /// Region -> end of its unavailability window
    pub unavailable_until: HashMap<RegionId, Instant>,
}

impl RoutingSnapshot {
    fn is_unavailable(&self, region: &RegionId, now: Instant) -> bool {
        self.unavailable_until.get(region).is_some_and(|until| *until > now)
    }
}

/// Preference-ordered region selection for an account
pub struct RegionalRoutingTable {
    preferred_regions: Vec<RegionId>,
    /// Client-side opt-in for using every writable region
    use_multiple_write_locations: bool,
    state: RwLock<Arc<RoutingSnapshot>>,
}

impl RegionalRoutingTable {
    /// Create a routing table for the given topology
    pub fn new(
        topology: AccountTopology,
        preferred_regions: Vec<RegionId>,
        use_multiple_write_locations: bool,
    ) -> Self {
        for region in &preferred_regions {
            if !topology.is_readable(region) && !topology.is_writable(region) {
                debug!(region = %region, "Preferred region is not part of the account topology");
            }
        }

        Self {
            preferred_regions,
            use_multiple_write_locations,
            state: RwLock::new(Arc::new(RoutingSnapshot {
                topology,
                unavailable_until: HashMap::new(),
            })),
        }
    }

    /// Create a routing table from a topology provider
    pub fn from_provider(
        provider: &dyn AccountTopologyProvider,
        preferred_regions: Vec<RegionId>,
        use_multiple_write_locations: bool,
    ) -> Result<Self> {
        let topology = provider.topology()?;
        Ok(Self::new(topology, preferred_regions, use_multiple_write_locations))
    }

    /// Get the current snapshot
    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        read(&self.state).clone()
    }

    /// Preferred regions configured on the client
    pub fn preferred_regions(&self) -> &[RegionId] {
        &self.preferred_regions
    }

    /// Whether writes may go to any writable region
    pub fn uses_multiple_write_locations(&self) -> bool {
        self.use_multiple_write_locations && self.snapshot().topology.multiple_write_locations
    }

    /// Whether writes are confined to the hub region
    pub fn is_single_write_region(&self) -> bool {
        !self.uses_multiple_write_locations()
    }

    /// Get the hub write region
    pub fn hub_write_region(&self) -> Option<RegionalEndpoint> {
        self.snapshot().topology.hub_write_region().cloned()
    }

    /// Ordered regions for an operation type
    pub fn ordered_regions(
        &self,
        operation_type: OperationType,
        excluded: &[RegionId],
    ) -> Result<Vec<RegionalEndpoint>> {
        if operation_type.is_write() {
            self.ordered_write_regions(excluded)
        } else {
            self.ordered_read_regions(excluded)
        }
    }

    /// Ordered regions for reads
    ///
    /// Fails with [`RoutingError::NoViableRegion`] only when every readable region is
    /// excluded.
    pub fn ordered_read_regions(&self, excluded: &[RegionId]) -> Result<Vec<RegionalEndpoint>> {
        let snapshot = self.snapshot();
        self.order(&snapshot, &snapshot.topology.readable, excluded)
    }

    /// Ordered regions for writes
    ///
    /// Single-write-region accounts always get exactly the hub write region, regardless
    /// of exclusions and availability.
    pub fn ordered_write_regions(&self, excluded: &[RegionId]) -> Result<Vec<RegionalEndpoint>> {
        let snapshot = self.snapshot();

        if !(self.use_multiple_write_locations && snapshot.topology.multiple_write_locations) {
            return snapshot
                .topology
                .hub_write_region()
                .cloned()
                .map(|hub| vec![hub])
                .ok_or_else(|| RoutingError::NoViableRegion(excluded.to_vec()));
        }

        self.order(&snapshot, &snapshot.topology.writable, excluded)
    }

    fn order(
        &self,
        snapshot: &RoutingSnapshot,
        candidates: &[RegionalEndpoint],
        excluded: &[RegionId],
    ) -> Result<Vec<RegionalEndpoint>> {
        let mut ordered: Vec<RegionalEndpoint> = Vec::with_capacity(candidates.len());

        for preferred in &self.preferred_regions {
            if let Some(endpoint) = candidates.iter().find(|c| &c.region == preferred) {
                if !ordered.contains(endpoint) {
                    ordered.push(endpoint.clone());
                }
            }
        }

        for candidate in candidates {
            if !ordered.iter().any(|o| o.region == candidate.region) {
                ordered.push(candidate.clone());
            }
        }

        ordered.retain(|endpoint| !excluded.contains(&endpoint.region));

        if ordered.is_empty() {
            return Err(RoutingError::NoViableRegion(excluded.to_vec()));
        }

        // Stable partition: available regions keep their relative order ahead of
        // unavailable ones.
        let now = Instant::now();
        let (available, unavailable): (Vec<_>, Vec<_>) = ordered
            .into_iter()
            .partition(|endpoint| !snapshot.is_unavailable(&endpoint.region, now));

        Ok(available.into_iter().chain(unavailable).collect())
    }

    /// Mark a region unavailable for `cooldown`
    pub fn mark_unavailable(&self, region: &RegionId, cooldown: Duration) {
        let until = Instant::now() + cooldown;
        {
            let mut state = write(&self.state);
            let mut next = RoutingSnapshot::clone(&state);
            next.unavailable_until.insert(region.clone(), until);
            *state = Arc::new(next);
        }

        metrics::set_region_unavailable(region.as_str(), true);
        warn!(
            region = %region,
            cooldown_ms = cooldown.as_millis() as u64,
            "Region marked unavailable"
        );
    }

    /// Clear the unavailability mark of a region
    pub fn mark_available(&self, region: &RegionId) {
        let removed = {
            let mut state = write(&self.state);
            if state.unavailable_until.contains_key(region) {
                let mut next = RoutingSnapshot::clone(&state);
                next.unavailable_until.remove(region);
                *state = Arc::new(next);
                true
            } else {
                false
            }
        };

        if removed {
            metrics::set_region_unavailable(region.as_str(), false);
            info!(region = %region, "Region marked available");
        }
    }

    /// Whether a region is outside any unavailability window
    pub fn is_available(&self, region: &RegionId) -> bool {
        !self.snapshot().is_unavailable(region, Instant::now())
    }

    /// Regions currently inside their unavailability window
    pub fn unavailable_regions(&self) -> Vec<RegionId> {
        let snapshot = self.snapshot();
        let now = Instant::now();
        let mut regions: Vec<RegionId> = snapshot
            .unavailable_until
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(region, _)| region.clone())
            .collect();
        regions.sort();
        regions
    }

    /// Replace the topology with the provider's current view.
    ///
    /// Unavailability marks survive for regions still present in the account.
    pub fn refresh(&self, provider: &dyn AccountTopologyProvider) -> Result<()> {
        let topology = provider.topology()?;
        let regions = topology.regions();

        let mut state = write(&self.state);
        let unavailable_until = state
            .unavailable_until
            .iter()
            .filter(|(region, _)| regions.contains(region))
            .map(|(region, until)| (region.clone(), *until))
            .collect();

        info!(
            readable = topology.readable.len(),
            writable = topology.writable.len(),
            multiple_write_locations = topology.multiple_write_locations,
            "Account topology refreshed"
        );

        *state = Arc::new(RoutingSnapshot { topology, unavailable_until });
        Ok(())
    }
}
