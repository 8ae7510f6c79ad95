//! Barrier bail-out boundaries for Strong writes and reads

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{TestHarness, config, create, partition, read, regions};
use geodb_client_routing::{FaultCondition, FaultInjectionRule, FaultResult};
use geodb_client_test_fixtures::two_region_single_write;
use geodb_client_types::{
    ConsistencyLevel, ErrorKind, OperationType, RetryAction, StatusPair, status_codes,
    sub_status_codes,
};

/// Fail HEAD requests in `region` with 410/0, at most `hits` times
fn fail_heads_with_gone(harness: &TestHarness, region: &str, hits: Option<u32>) {
    harness.faults.add_rule(
        FaultInjectionRule::builder()
            .id(format!("gone-{region}"))
            .condition(
                FaultCondition::builder()
                    .operation_type(OperationType::Head)
                    .region(region)
                    .build(),
            )
            .result(FaultResult::Error(StatusPair::new(
                status_codes::GONE,
                sub_status_codes::UNKNOWN,
            )))
            .maybe_hit_limit(hits)
            .build(),
    );
}

#[tokio::test(start_paused = true)]
async fn test_create_survives_two_lease_not_found_heads() {
    let harness = TestHarness::new(two_region_single_write(), config(ConsistencyLevel::Strong));
    let rule = harness.fail_heads_with_lease_not_found("West US", 2);

    let response = harness.orchestrator.execute(create()).await.unwrap();

    assert_eq!(response.region.as_str(), "West US");
    assert_eq!(response.diagnostics.contacted_region_names(), vec!["West US"]);
    assert_eq!(response.diagnostics.lease_not_found_head_count(), 2);
    assert!(response.diagnostics.primary_contacted_by_barrier());
    assert_eq!(rule.hit_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_create_bails_out_after_third_lease_not_found_head() {
    let harness = TestHarness::new(two_region_single_write(), config(ConsistencyLevel::Strong));
    harness.fail_heads_with_lease_not_found("West US", 10);

    let err = harness.orchestrator.execute(create()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::RequestTimeout);
    assert_eq!(err.status.status, status_codes::REQUEST_TIMEOUT);
    assert_eq!(err.status.sub_status, sub_status_codes::LEASE_NOT_FOUND);
    assert_eq!(err.diagnostics.contacted_region_names(), vec!["West US"]);
    assert_eq!(err.diagnostics.lease_not_found_head_count(), 3);
    assert!(err.diagnostics.primary_contacted_by_barrier());
    // The write itself succeeded exactly once; it must never be replayed elsewhere.
    assert_eq!(harness.account.counters("West US").writes, 1);
    assert_eq!(harness.account.counters("East US").writes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_strong_read_absorbs_four_lease_not_found_heads_in_region() {
    let harness = TestHarness::new(two_region_single_write(), config(ConsistencyLevel::Strong));
    harness.fail_heads_with_lease_not_found("West US", 4);

    let response = harness.orchestrator.execute(read()).await.unwrap();

    assert_eq!(response.region.as_str(), "West US");
    assert_eq!(response.diagnostics.contacted_region_names(), vec!["West US"]);
    assert_eq!(response.diagnostics.lease_not_found_head_count(), 4);
    assert!(harness.bridge().partition_failover(&partition()).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_strong_read_moves_partition_after_fifth_lease_not_found_head() {
    let harness = TestHarness::new(two_region_single_write(), config(ConsistencyLevel::Strong));
    harness.fail_heads_with_lease_not_found("West US", 5);

    let response = harness.orchestrator.execute(read()).await.unwrap();

    assert_eq!(response.region.as_str(), "East US");
    assert_eq!(response.diagnostics.contacted_region_names(), vec!["West US", "East US"]);
    assert!(
        response
            .diagnostics
            .retries
            .iter()
            .any(|r| r.action == RetryAction::PartitionFailover && r.region.as_str() == "West US")
    );

    let failover = harness.bridge().partition_failover(&partition()).unwrap();
    assert_eq!(failover.current.as_str(), "East US");
    assert_eq!(failover.failed, regions(&["West US"]));
    // Only the partition moved; the region stays available for everyone else.
    assert!(harness.bridge().unavailable_regions().is_empty());

    // The next read goes straight to the partition's new region.
    let response = harness.orchestrator.execute(read()).await.unwrap();
    assert_eq!(response.diagnostics.contacted_region_names(), vec!["East US"]);
}

#[tokio::test(start_paused = true)]
async fn test_barrier_waits_for_lagging_replicas() {
    let harness = TestHarness::new(two_region_single_write(), config(ConsistencyLevel::Strong));
    harness.account.set_stale_heads("West US", 3);

    let response = harness.orchestrator.execute(create()).await.unwrap();

    assert_eq!(response.lsn, 1);
    assert_eq!(response.diagnostics.head_requests().count(), 4);
    assert_eq!(harness.account.counters("West US").heads, 4);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_staleness_read_runs_barrier_but_write_does_not() {
    let harness =
        TestHarness::new(two_region_single_write(), config(ConsistencyLevel::BoundedStaleness));

    let write = harness.orchestrator.execute(create()).await.unwrap();
    assert_eq!(write.diagnostics.head_requests().count(), 0);

    let read = harness.orchestrator.execute(read()).await.unwrap();
    assert_eq!(read.lsn, 1);
    // Four replicas per region: a read barrier needs two distinct confirmations.
    assert_eq!(read.diagnostics.head_requests().count(), 2);
    assert!(read.diagnostics.primary_contacted_by_barrier());
}

#[tokio::test(start_paused = true)]
async fn test_session_reads_never_issue_heads() {
    let harness = TestHarness::new(two_region_single_write(), config(ConsistencyLevel::Session));

    harness.orchestrator.execute(create()).await.unwrap();
    let response = harness.orchestrator.execute(read()).await.unwrap();

    assert_eq!(response.diagnostics.head_requests().count(), 0);
    assert_eq!(harness.account.counters("West US").heads, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_barrier_never_replays_the_create() {
    let harness = TestHarness::new(two_region_single_write(), config(ConsistencyLevel::Strong));
    fail_heads_with_gone(&harness, "West US", Some(1));

    let err = harness.orchestrator.execute(create()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::RequestTimeout);
    assert_eq!(
        err.status,
        StatusPair::new(status_codes::REQUEST_TIMEOUT, sub_status_codes::UNKNOWN)
    );
    assert_eq!(harness.account.counters("West US").writes, 1);
    assert_eq!(harness.account.committed_lsn(&partition()), 1);
    assert!(harness.bridge().unavailable_regions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_read_barrier_moves_partition() {
    let harness = TestHarness::new(two_region_single_write(), config(ConsistencyLevel::Strong));
    fail_heads_with_gone(&harness, "West US", None);

    let response = harness.orchestrator.execute(read()).await.unwrap();

    assert_eq!(response.region.as_str(), "East US");
    assert_eq!(harness.account.counters("West US").reads, 1);
    let current = harness.bridge().partition_current_region(&partition()).unwrap();
    assert_eq!(current.as_str(), "East US");
}
