//! In-process simulation of a multi-region account
//!
//! Every partition has a single committed LSN shared by all regions. A region sees that
//! LSN minus its configured replication lag, so session reads can observe 404/1002 in a
//! lagging region while the write region already acknowledged the write.
//!
//! Knobs:
//! - `set_region_lag`: how far behind the committed LSN a region's replicas are
//! - `set_region_down`: every request to the region fails with 503
//! - `set_stale_heads`: the next N HEAD requests in a region report one LSN short
//! - `set_latency`: delay before a region answers
//!
//! Region indexes in session tokens follow [`AccountTopology::regions`] order.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use geodb_client_routing::{
    AccountTopology, AddressResolver, PartitionSessionToken, ReplicaAddress, ReplicaSet,
    ReplicaTarget, StoreRequest, StoreResponse, Transport, TransportError,
};
use geodb_client_types::{
    OperationType, PartitionKeyRangeIdentity, RegionId, StatusPair, status_codes,
    sub_status_codes,
};
use tracing::trace;

const SECONDARIES_PER_REGION: usize = 3;
const WRITE_FORBIDDEN: u16 = 403;
const WRITE_FORBIDDEN_SUB_STATUS: u32 = 3;

/// Requests observed by one region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionCounters {
    pub reads: u32,
    pub writes: u32,
    pub heads: u32,
    pub resolves: u32,
    pub forced_resolves: u32,
}

#[derive(Debug, Default)]
struct SimulationState {
    committed_lsn: HashMap<(String, String), u64>,
    region_lag: HashMap<RegionId, u64>,
    down: HashSet<RegionId>,
    stale_heads: HashMap<RegionId, u32>,
    latency: HashMap<RegionId, Duration>,
    counters: HashMap<RegionId, RegionCounters>,
}

/// A fake account answering both address resolution and replica requests
#[derive(Debug)]
pub struct SimulatedAccount {
    topology: AccountTopology,
    region_indexes: HashMap<RegionId, u32>,
    state: Mutex<SimulationState>,
}

impl SimulatedAccount {
    pub fn new(topology: AccountTopology) -> Self {
        let region_indexes = topology
            .regions()
            .into_iter()
            .enumerate()
            .map(|(index, region)| (region, index as u32))
            .collect();
        Self { topology, region_indexes, state: Mutex::new(SimulationState::default()) }
    }

    pub fn topology(&self) -> AccountTopology {
        self.topology.clone()
    }

    pub fn set_region_lag(&self, region: &str, lag: u64) {
        self.state.lock().unwrap().region_lag.insert(RegionId::new(region), lag);
    }

    pub fn set_region_down(&self, region: &str, down: bool) {
        let mut state = self.state.lock().unwrap();
        if down {
            state.down.insert(RegionId::new(region));
        } else {
            state.down.remove(&RegionId::new(region));
        }
    }

    pub fn set_stale_heads(&self, region: &str, count: u32) {
        self.state.lock().unwrap().stale_heads.insert(RegionId::new(region), count);
    }

    pub fn set_latency(&self, region: &str, latency: Duration) {
        self.state.lock().unwrap().latency.insert(RegionId::new(region), latency);
    }

    /// Commit a write directly, bypassing any client
    pub fn commit(&self, partition: &PartitionKeyRangeIdentity) -> u64 {
        let mut state = self.state.lock().unwrap();
        let lsn = state.committed_lsn.entry(key(partition)).or_insert(0);
        *lsn += 1;
        *lsn
    }

    pub fn committed_lsn(&self, partition: &PartitionKeyRangeIdentity) -> u64 {
        self.state.lock().unwrap().committed_lsn.get(&key(partition)).copied().unwrap_or(0)
    }

    pub fn counters(&self, region: &str) -> RegionCounters {
        self.state
            .lock()
            .unwrap()
            .counters
            .get(&RegionId::new(region))
            .copied()
            .unwrap_or_default()
    }

    /// Index of `region` inside session tokens
    pub fn region_index(&self, region: &str) -> Option<u32> {
        self.region_indexes.get(&RegionId::new(region)).copied()
    }

    fn accepts_writes(&self, region: &RegionId) -> bool {
        if self.topology.multiple_write_locations {
            self.topology.is_writable(region)
        } else {
            self.topology.hub_write_region().is_some_and(|hub| &hub.region == region)
        }
    }

    fn session_header(
        &self,
        partition: &PartitionKeyRangeIdentity,
        region: &RegionId,
        lsn: u64,
    ) -> String {
        let index = self.region_indexes.get(region).copied().unwrap_or(0);
        format!("{}:1#{lsn}#{index}={lsn}", partition.partition_key_range_id)
    }

    fn handle(
        &self,
        target: &ReplicaTarget,
        request: &StoreRequest,
    ) -> Result<StoreResponse, TransportError> {
        let region = &target.region;
        let mut state = self.state.lock().unwrap();

        let counters = state.counters.entry(region.clone()).or_default();
        match request.operation_type {
            OperationType::Head => counters.heads += 1,
            op if op.is_write() => counters.writes += 1,
            _ => counters.reads += 1,
        }

        if state.down.contains(region) {
            return Err(TransportError::new(
                StatusPair::new(status_codes::SERVICE_UNAVAILABLE, sub_status_codes::UNKNOWN),
                format!("{region} is down"),
            ));
        }

        let partition_key = key(&request.partition);
        let committed = state.committed_lsn.get(&partition_key).copied().unwrap_or(0);
        let visible = committed.saturating_sub(state.region_lag.get(region).copied().unwrap_or(0));

        match request.operation_type {
            OperationType::Head => {
                let stale = state.stale_heads.get_mut(region).filter(|n| **n > 0);
                let reported = match stale {
                    Some(remaining) => {
                        *remaining -= 1;
                        visible.saturating_sub(1)
                    },
                    None => visible,
                };
                Ok(StoreResponse::new(StatusPair::ok(), reported))
            },
            op if op.is_write() => {
                if !self.accepts_writes(region) {
                    return Err(TransportError::new(
                        StatusPair::new(WRITE_FORBIDDEN, WRITE_FORBIDDEN_SUB_STATUS),
                        format!("{region} does not accept writes"),
                    ));
                }
                let lsn = committed + 1;
                state.committed_lsn.insert(partition_key, lsn);
                drop(state);

                trace!(region = %region, lsn, "Simulated write committed");
                Ok(StoreResponse::new(StatusPair::new(status_codes::CREATED, 0), lsn)
                    .with_session_token(self.session_header(&request.partition, region, lsn)))
            },
            _ => {
                drop(state);

                let required = request
                    .session_token
                    .as_deref()
                    .and_then(|header| PartitionSessionToken::parse_header(header).ok())
                    .into_iter()
                    .flatten()
                    .filter(|entry| {
                        entry.partition_key_range_id == request.partition.partition_key_range_id
                    })
                    .map(|entry| entry.token.global_lsn)
                    .max()
                    .unwrap_or(0);

                if required > visible {
                    return Err(TransportError::new(
                        StatusPair::new(
                            status_codes::NOT_FOUND,
                            sub_status_codes::READ_SESSION_NOT_AVAILABLE,
                        ),
                        format!("{region} is at {visible}, session requires {required}"),
                    ));
                }

                Ok(StoreResponse::new(StatusPair::ok(), visible)
                    .with_session_token(self.session_header(&request.partition, region, visible)))
            },
        }
    }
}

fn key(partition: &PartitionKeyRangeIdentity) -> (String, String) {
    (partition.collection_rid.clone(), partition.partition_key_range_id.clone())
}

#[async_trait]
impl Transport for SimulatedAccount {
    async fn send(
        &self,
        target: &ReplicaTarget,
        request: &StoreRequest,
    ) -> Result<StoreResponse, TransportError> {
        let latency = self.state.lock().unwrap().latency.get(&target.region).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.handle(target, request)
    }
}

#[async_trait]
impl AddressResolver for SimulatedAccount {
    async fn resolve(
        &self,
        region: &RegionId,
        partition: &PartitionKeyRangeIdentity,
        force_refresh: bool,
    ) -> Result<ReplicaSet, TransportError> {
        {
            let mut state = self.state.lock().unwrap();
            let counters = state.counters.entry(region.clone()).or_default();
            counters.resolves += 1;
            counters.forced_resolves += u32::from(force_refresh);
        }

        let base = format!(
            "rntbd://{}/{}/{}",
            region.as_str().replace(' ', "").to_lowercase(),
            partition.collection_rid,
            partition.partition_key_range_id
        );
        Ok(ReplicaSet {
            region: region.clone(),
            primary: ReplicaAddress::primary(format!("{base}/replica-0")),
            secondaries: (1..=SECONDARIES_PER_REGION)
                .map(|i| ReplicaAddress::secondary(format!("{base}/replica-{i}")))
                .collect(),
        })
    }
}
