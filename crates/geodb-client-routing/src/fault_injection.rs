//! # Fault Injection
//!
//! [`FaultInjectionTransport`] decorates any [`Transport`] and, for requests matching a
//! rule's condition, injects a delay, an error status, or both. Rules can skip the first
//! matching requests, be limited to a number of hits and be toggled at runtime. Counters
//! are shared between clones of a rule so tests can keep a handle and assert on them.

use std::{
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use geodb_client_types::{OperationType, RegionId, StatusPair, status_codes, sub_status_codes};
use tracing::debug;

use crate::{
    sharded::{read, write},
    transport::{ReplicaTarget, StoreRequest, StoreResponse, Transport, TransportError},
};

/// Which replicas of a partition a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaFilter {
    Primary,
    Secondary,
}

/// Requests a rule applies to; unset fields match everything
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct FaultCondition {
    pub operation_type: Option<OperationType>,
    #[builder(into)]
    pub region: Option<RegionId>,
    pub replica: Option<ReplicaFilter>,
    #[builder(into)]
    pub partition_key_range_id: Option<String>,
}

impl FaultCondition {
    pub fn matches(&self, target: &ReplicaTarget, request: &StoreRequest) -> bool {
        self.operation_type.is_none_or(|op| op == request.operation_type)
            && self.region.as_ref().is_none_or(|region| region == &target.region)
            && self.replica.is_none_or(|filter| match filter {
                ReplicaFilter::Primary => target.replica.is_primary,
                ReplicaFilter::Secondary => !target.replica.is_primary,
            })
            && self
                .partition_key_range_id
                .as_ref()
                .is_none_or(|id| id == &request.partition.partition_key_range_id)
    }
}

/// What happens to a matching request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResult {
    /// Fail without contacting the replica
    Error(StatusPair),
    /// Delay, then forward to the replica
    Delay(Duration),
    /// Delay, then fail without contacting the replica
    DelayThenError { delay: Duration, status: StatusPair },
}

impl FaultResult {
    pub fn lease_not_found() -> Self {
        Self::Error(StatusPair::new(status_codes::GONE, sub_status_codes::LEASE_NOT_FOUND))
    }

    pub fn read_session_not_available() -> Self {
        Self::Error(StatusPair::new(
            status_codes::NOT_FOUND,
            sub_status_codes::READ_SESSION_NOT_AVAILABLE,
        ))
    }

    pub fn service_unavailable() -> Self {
        Self::Error(StatusPair::new(status_codes::SERVICE_UNAVAILABLE, sub_status_codes::UNKNOWN))
    }

    pub fn request_timeout() -> Self {
        Self::Error(StatusPair::new(status_codes::REQUEST_TIMEOUT, sub_status_codes::UNKNOWN))
    }
}

/// A condition, a result and an optional hit limit
#[derive(Debug, Clone, bon::Builder)]
#[builder(on(String, into))]
pub struct FaultInjectionRule {
    id: String,
    #[builder(default)]
    condition: FaultCondition,
    result: FaultResult,
    /// Let this many matching requests through before applying
    #[builder(default)]
    start_after: u32,
    /// Stop applying after this many hits
    hit_limit: Option<u32>,
    #[builder(skip)]
    matched: Arc<AtomicU32>,
    #[builder(skip)]
    hits: Arc<AtomicU32>,
    #[builder(skip = Arc::new(AtomicBool::new(true)))]
    enabled: Arc<AtomicBool>,
}

impl FaultInjectionRule {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn condition(&self) -> &FaultCondition {
        &self.condition
    }

    pub fn result(&self) -> FaultResult {
        self.result
    }

    /// Number of matching requests seen while enabled, applied or not
    pub fn match_count(&self) -> u32 {
        self.matched.load(Ordering::SeqCst)
    }

    /// Number of requests this rule has been applied to
    pub fn hit_count(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Claim one hit if the rule applies to the request
    fn try_apply(&self, target: &ReplicaTarget, request: &StoreRequest) -> bool {
        if !self.is_enabled() || !self.condition.matches(target, request) {
            return false;
        }
        if self.matched.fetch_add(1, Ordering::SeqCst) < self.start_after {
            return false;
        }

        self.hits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |hits| {
                self.hit_limit.is_none_or(|limit| hits < limit).then_some(hits + 1)
            })
            .is_ok()
    }
}

/// Transport decorator applying fault injection rules in order; the first applicable
/// rule wins
pub struct FaultInjectionTransport<T> {
    inner: T,
    rules: RwLock<Vec<FaultInjectionRule>>,
}

impl<T: Transport> FaultInjectionTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, rules: RwLock::new(Vec::new()) }
    }

    pub fn with_rules(inner: T, rules: Vec<FaultInjectionRule>) -> Self {
        Self { inner, rules: RwLock::new(rules) }
    }

    pub fn add_rule(&self, rule: FaultInjectionRule) {
        write(&self.rules).push(rule);
    }

    pub fn remove_rule(&self, id: &str) -> bool {
        let mut rules = write(&self.rules);
        let before = rules.len();
        rules.retain(|rule| rule.id != id);
        rules.len() != before
    }

    pub fn clear_rules(&self) {
        write(&self.rules).clear();
    }

    pub fn rules(&self) -> Vec<FaultInjectionRule> {
        read(&self.rules).clone()
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn matching_fault(
        &self,
        target: &ReplicaTarget,
        request: &StoreRequest,
    ) -> Option<(String, FaultResult)> {
        read(&self.rules)
            .iter()
            .find(|rule| rule.try_apply(target, request))
            .map(|rule| (rule.id.clone(), rule.result))
    }
}

#[async_trait]
impl<T: Transport> Transport for FaultInjectionTransport<T> {
    async fn send(
        &self,
        target: &ReplicaTarget,
        request: &StoreRequest,
    ) -> Result<StoreResponse, TransportError> {
        let Some((rule_id, fault)) = self.matching_fault(target, request) else {
            return self.inner.send(target, request).await;
        };

        debug!(
            rule = %rule_id,
            region = %target.region,
            replica = %target.replica.uri,
            operation = %request.operation_type,
            fault = ?fault,
            "Injecting fault"
        );

        match fault {
            FaultResult::Error(status) => {
                Err(TransportError::new(status, format!("Injected by rule {rule_id}")))
            },
            FaultResult::Delay(delay) => {
                tokio::time::sleep(delay).await;
                self.inner.send(target, request).await
            },
            FaultResult::DelayThenError { delay, status } => {
                tokio::time::sleep(delay).await;
                Err(TransportError::new(status, format!("Injected by rule {rule_id}")))
            },
        }
    }
}
