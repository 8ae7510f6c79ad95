//! Threshold-based speculative execution and end-to-end timeouts

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::time::Duration;

use common::{TestHarness, config, create, partition, read};
use geodb_client_config::{ClientConfig, ThresholdStrategyConfig};
use geodb_client_routing::{OperationRequest, ThresholdBasedAvailabilityStrategy};
use geodb_client_test_fixtures::{three_region_multi_write, three_region_single_write};
use geodb_client_types::{
    ConsistencyLevel, ErrorKind, OperationType, status_codes, sub_status_codes,
};
use tokio::time::Instant;

fn strategy(threshold_ms: u64, step_ms: u64) -> ThresholdBasedAvailabilityStrategy {
    ThresholdBasedAvailabilityStrategy::new(
        Duration::from_millis(threshold_ms),
        Duration::from_millis(step_ms),
    )
}

fn racing_read(threshold_ms: u64, step_ms: u64, timeout: Duration) -> OperationRequest {
    OperationRequest::builder()
        .operation_type(OperationType::Read)
        .partition(partition())
        .availability_strategy(strategy(threshold_ms, step_ms))
        .end_to_end_timeout(timeout)
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_slow_primary_region_loses_to_secondary() {
    let harness = TestHarness::new(three_region_single_write(), config(ConsistencyLevel::Session));
    harness.account.set_latency("West US", Duration::from_millis(1500));

    let started = Instant::now();
    let response =
        harness.orchestrator.execute(racing_read(100, 200, Duration::from_secs(3))).await.unwrap();

    assert_eq!(response.region.as_str(), "East US");
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(started.elapsed(), Duration::from_millis(100));
    assert_eq!(response.diagnostics.raced_regions.len(), 2);
    assert_eq!(harness.account.counters("North Europe").reads, 0);
}

#[tokio::test(start_paused = true)]
async fn test_fast_primary_region_never_speculates() {
    let harness = TestHarness::new(three_region_single_write(), config(ConsistencyLevel::Session));

    let response =
        harness.orchestrator.execute(racing_read(100, 200, Duration::from_secs(3))).await.unwrap();

    assert_eq!(response.region.as_str(), "West US");
    assert_eq!(response.diagnostics.raced_regions.len(), 1);
    assert_eq!(harness.account.counters("East US").reads, 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_while_racing_reports_raced_regions() {
    let harness = TestHarness::new(three_region_single_write(), config(ConsistencyLevel::Session));
    for region in ["West US", "East US", "North Europe"] {
        harness.account.set_latency(region, Duration::from_secs(10));
    }

    let started = Instant::now();
    let err = harness
        .orchestrator
        .execute(racing_read(100, 100, Duration::from_millis(300)))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::OperationCancelled);
    assert_eq!(err.status.status, status_codes::REQUEST_TIMEOUT);
    assert_eq!(err.status.sub_status, sub_status_codes::CLIENT_OPERATION_TIMEOUT);
    assert_eq!(started.elapsed(), Duration::from_millis(300));
    assert_eq!(err.diagnostics.raced_regions.len(), 3);
    assert_eq!(harness.sink.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_without_strategy_bounds_single_chain() {
    let harness = TestHarness::new(three_region_single_write(), config(ConsistencyLevel::Session));
    harness.account.set_latency("West US", Duration::from_secs(10));

    let request = OperationRequest::builder()
        .operation_type(OperationType::Read)
        .partition(partition())
        .end_to_end_timeout(Duration::from_millis(500))
        .build();
    let err = harness.orchestrator.execute(request).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::OperationCancelled);
    assert_eq!(err.diagnostics.contacted_region_names(), vec!["West US"]);
    assert!(err.diagnostics.raced_regions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_client_level_strategy_applies_to_reads() {
    let mut config = config(ConsistencyLevel::Session);
    config.availability.end_to_end_timeout_ms = Some(3_000);
    config.availability.strategy =
        Some(ThresholdStrategyConfig { threshold_ms: 50, threshold_step_ms: 50 });
    let harness = TestHarness::new(three_region_single_write(), config);
    harness.account.set_latency("West US", Duration::from_secs(1));

    let response = harness.orchestrator.execute(read()).await.unwrap();

    assert_eq!(response.region.as_str(), "East US");
}

#[tokio::test(start_paused = true)]
async fn test_single_write_region_writes_are_never_raced() {
    let mut config = config(ConsistencyLevel::Session);
    config.availability.strategy =
        Some(ThresholdStrategyConfig { threshold_ms: 50, threshold_step_ms: 50 });
    let harness = TestHarness::new(three_region_single_write(), config);
    harness.account.set_latency("West US", Duration::from_millis(200));

    let response = harness.orchestrator.execute(create()).await.unwrap();

    assert_eq!(response.region.as_str(), "West US");
    assert!(response.diagnostics.raced_regions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_multi_write_writes_race_with_retries_enabled() {
    let config = ClientConfig {
        multiple_write_locations: true,
        non_idempotent_write_retries: true,
        ..config(ConsistencyLevel::Session)
    };
    let harness = TestHarness::new(three_region_multi_write(), config);
    harness.account.set_latency("West US", Duration::from_secs(2));

    let request = OperationRequest::builder()
        .operation_type(OperationType::Create)
        .partition(partition())
        .availability_strategy(strategy(100, 100))
        .build();
    let response = harness.orchestrator.execute(request).await.unwrap();

    assert_eq!(response.region.as_str(), "East US");
    assert_eq!(response.diagnostics.raced_regions.len(), 2);
}
