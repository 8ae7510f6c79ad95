//! Regional and per-partition failover, exclusions and preferred regions

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::time::Duration;

use common::{TestHarness, config, create, partition, read, read_excluding, regions};
use geodb_client_config::ClientConfig;
use geodb_client_test_fixtures::{
    three_region_multi_write, three_region_single_write, two_region_single_write,
};
use geodb_client_types::{
    ConsistencyLevel, ErrorKind, RetryAction, status_codes, sub_status_codes,
};

fn multi_write_config() -> ClientConfig {
    ClientConfig {
        multiple_write_locations: true,
        non_idempotent_write_retries: true,
        ..config(ConsistencyLevel::Session)
    }
}

#[tokio::test(start_paused = true)]
async fn test_read_moves_partition_when_region_is_down() {
    let harness = TestHarness::new(two_region_single_write(), config(ConsistencyLevel::Session));
    harness.account.set_region_down("West US", true);

    let response = harness.orchestrator.execute(read()).await.unwrap();

    assert_eq!(response.region.as_str(), "East US");
    assert_eq!(response.diagnostics.contacted_region_names(), vec!["West US", "East US"]);
    assert_eq!(
        response.diagnostics.main_requests_with_status(status_codes::SERVICE_UNAVAILABLE),
        2
    );
    let current = harness.bridge().partition_current_region(&partition()).unwrap();
    assert_eq!(current.as_str(), "East US");
}

#[tokio::test(start_paused = true)]
async fn test_partition_failover_disabled_demotes_region() {
    let mut config = config(ConsistencyLevel::Session);
    config.failover.per_partition_automatic_failover = false;
    let harness = TestHarness::new(two_region_single_write(), config);
    harness.account.set_region_down("West US", true);

    let response = harness.orchestrator.execute(read()).await.unwrap();

    assert_eq!(response.region.as_str(), "East US");
    assert!(response.diagnostics.retries.iter().any(|r| r.action == RetryAction::FailoverRegion));
    assert!(harness.bridge().partition_failover(&partition()).is_none());
    assert_eq!(harness.bridge().unavailable_regions(), regions(&["West US"]));
    assert_eq!(
        harness.bridge().ordered_read_regions(&[]).unwrap(),
        regions(&["East US", "West US"])
    );
}

#[tokio::test(start_paused = true)]
async fn test_single_write_region_write_stays_in_hub() {
    let harness = TestHarness::new(three_region_single_write(), config(ConsistencyLevel::Session));
    harness.account.set_region_down("West US", true);

    let err = harness.orchestrator.execute(create()).await.unwrap_err();

    assert_eq!(err.status.status, status_codes::SERVICE_UNAVAILABLE);
    assert_eq!(err.diagnostics.contacted_region_names(), vec!["West US"]);
    // Without non-idempotent write retries the write is attempted exactly once.
    assert_eq!(harness.account.counters("West US").writes, 1);
    assert_eq!(harness.account.counters("East US").writes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_single_write_region_write_retries_only_in_hub() {
    let config =
        ClientConfig { non_idempotent_write_retries: true, ..config(ConsistencyLevel::Session) };
    let harness = TestHarness::new(three_region_single_write(), config);
    harness.account.set_region_down("West US", true);

    let err = harness.orchestrator.execute(create()).await.unwrap_err();

    assert_eq!(err.status.status, status_codes::SERVICE_UNAVAILABLE);
    assert_eq!(err.diagnostics.contacted_region_names(), vec!["West US"]);
    assert_eq!(harness.account.counters("West US").writes, 2);
    assert_eq!(harness.account.counters("North Europe").writes, 0);
    assert!(harness.bridge().unavailable_regions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_multi_write_account_fails_over_writes() {
    let harness = TestHarness::new(three_region_multi_write(), multi_write_config());
    harness.account.set_region_down("West US", true);

    let response = harness.orchestrator.execute(create()).await.unwrap();

    assert_eq!(response.region.as_str(), "East US");
    assert_eq!(response.diagnostics.contacted_region_names(), vec!["West US", "East US"]);
    assert_eq!(harness.bridge().unavailable_regions(), regions(&["West US"]));

    // While West US cools down it is tried last.
    let response = harness.orchestrator.execute(create()).await.unwrap();
    assert_eq!(response.diagnostics.contacted_region_names(), vec!["East US"]);
}

#[tokio::test(start_paused = true)]
async fn test_region_returns_after_cooldown() {
    let harness = TestHarness::new(three_region_multi_write(), multi_write_config());
    harness.account.set_region_down("West US", true);
    harness.orchestrator.execute(create()).await.unwrap();
    assert_eq!(harness.bridge().unavailable_regions(), regions(&["West US"]));

    harness.account.set_region_down("West US", false);
    tokio::time::advance(Duration::from_secs(301)).await;

    assert!(harness.bridge().unavailable_regions().is_empty());
    let response = harness.orchestrator.execute(create()).await.unwrap();
    assert_eq!(response.region.as_str(), "West US");
}

#[tokio::test(start_paused = true)]
async fn test_gone_refreshes_addresses_before_leaving_region() {
    let harness = TestHarness::new(two_region_single_write(), config(ConsistencyLevel::Session));
    harness.faults.add_rule(
        geodb_client_routing::FaultInjectionRule::builder()
            .id("gone")
            .condition(
                geodb_client_routing::FaultCondition::builder()
                    .operation_type(geodb_client_types::OperationType::Read)
                    .region("West US")
                    .build(),
            )
            .result(geodb_client_routing::FaultResult::Error(geodb_client_types::StatusPair::new(
                status_codes::GONE,
                sub_status_codes::UNKNOWN,
            )))
            .hit_limit(1)
            .build(),
    );

    let response = harness.orchestrator.execute(read()).await.unwrap();

    assert_eq!(response.region.as_str(), "West US");
    assert!(response.diagnostics.retries.iter().any(|r| r.action == RetryAction::RefreshAddresses));
    assert_eq!(harness.account.counters("West US").forced_resolves, 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_region_excluded_is_no_viable_region() {
    let harness = TestHarness::new(two_region_single_write(), config(ConsistencyLevel::Session));

    let err =
        harness.orchestrator.execute(read_excluding(&["West US", "East US"])).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::NoViableRegion);
    assert_eq!(err.status.status, status_codes::SERVICE_UNAVAILABLE);
    assert_eq!(err.status.sub_status, sub_status_codes::NO_VIABLE_REGION);
    assert!(err.diagnostics.contacted_regions.is_empty());
    assert_eq!(harness.sink.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_same_exclusions_contact_same_single_region() {
    let harness = TestHarness::new(three_region_single_write(), config(ConsistencyLevel::Session));

    for _ in 0..3 {
        let response = harness.orchestrator.execute(read_excluding(&["West US"])).await.unwrap();
        assert_eq!(response.diagnostics.contacted_region_names(), vec!["East US"]);
        assert_eq!(response.diagnostics.excluded_regions, regions(&["West US"]));
    }
}

#[tokio::test(start_paused = true)]
async fn test_client_and_request_exclusions_combine() {
    let config = ClientConfig {
        excluded_regions: vec!["West US".to_string()],
        ..config(ConsistencyLevel::Session)
    };
    let harness = TestHarness::new(three_region_single_write(), config);

    let response = harness.orchestrator.execute(read_excluding(&["East US"])).await.unwrap();

    assert_eq!(response.diagnostics.contacted_region_names(), vec!["North Europe"]);
    assert_eq!(response.diagnostics.excluded_regions, regions(&["West US", "East US"]));
}

#[tokio::test(start_paused = true)]
async fn test_preferred_regions_drive_read_order() {
    let config = ClientConfig {
        preferred_regions: vec!["North Europe".to_string(), "East US".to_string()],
        ..config(ConsistencyLevel::Session)
    };
    let harness = TestHarness::new(three_region_single_write(), config);

    let response = harness.orchestrator.execute(read()).await.unwrap();
    assert_eq!(response.region.as_str(), "North Europe");

    // Writes still go to the hub.
    let response = harness.orchestrator.execute(create()).await.unwrap();
    assert_eq!(response.region.as_str(), "West US");
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_status_passes_through() {
    let harness = TestHarness::new(three_region_multi_write(), multi_write_config());
    harness.faults.add_rule(
        geodb_client_routing::FaultInjectionRule::builder()
            .id("conflict")
            .result(geodb_client_routing::FaultResult::Error(geodb_client_types::StatusPair::new(
                status_codes::CONFLICT,
                sub_status_codes::UNKNOWN,
            )))
            .build(),
    );

    let err = harness.orchestrator.execute(create()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Service);
    assert_eq!(err.status.status, status_codes::CONFLICT);
    assert_eq!(err.diagnostics.contacted_region_names(), vec!["West US"]);
    assert!(err.diagnostics.retries.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_gone_on_hub_write_keeps_hub_available() {
    let harness = TestHarness::new(two_region_single_write(), config(ConsistencyLevel::Session));
    harness.faults.add_rule(
        geodb_client_routing::FaultInjectionRule::builder()
            .id("gone-writes")
            .condition(
                geodb_client_routing::FaultCondition::builder()
                    .operation_type(geodb_client_types::OperationType::Create)
                    .region("West US")
                    .build(),
            )
            .result(geodb_client_routing::FaultResult::Error(geodb_client_types::StatusPair::new(
                status_codes::GONE,
                sub_status_codes::UNKNOWN,
            )))
            .build(),
    );

    let err = harness.orchestrator.execute(create()).await.unwrap_err();

    // 410s stay inside the retry loop; the caller sees a 503.
    assert_eq!(err.kind, ErrorKind::Service);
    assert_eq!(err.status.status, status_codes::SERVICE_UNAVAILABLE);
    assert_eq!(err.status.sub_status, sub_status_codes::UNKNOWN);
    assert_eq!(err.diagnostics.contacted_region_names(), vec!["West US"]);
    assert!(harness.bridge().unavailable_regions().is_empty());

    // Reads on unrelated partitions keep using the hub.
    let other = geodb_client_routing::OperationRequest::builder()
        .operation_type(geodb_client_types::OperationType::Read)
        .partition(geodb_client_types::PartitionKeyRangeIdentity::new("coll9", "3"))
        .build();
    let response = harness.orchestrator.execute(other).await.unwrap();
    assert_eq!(response.region.as_str(), "West US");
}
