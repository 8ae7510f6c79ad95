//! Metrics collection for the routing core
//!
//! Provides structured metrics using the `metrics` crate with Prometheus export.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Initialize all metric descriptions
pub fn init_metrics_descriptions() {
    // Request metrics
    describe_counter!(
        "geodb_requests_total",
        "Total number of replica-level requests by region, operation and status"
    );
    describe_histogram!(
        "geodb_operation_duration_seconds",
        "Duration of logical operations in seconds"
    );
    describe_counter!(
        "geodb_operation_errors_total",
        "Total number of logical operations that failed, by error kind"
    );

    // Barrier metrics
    describe_counter!(
        "geodb_barrier_heads_total",
        "Total number of barrier (HEAD) requests by outcome"
    );
    describe_counter!(
        "geodb_barrier_exhausted_total",
        "Total number of barrier runs that exhausted their retry budget"
    );

    // Failover metrics
    describe_counter!(
        "geodb_region_failovers_total",
        "Total number of operations moved to another region"
    );
    describe_counter!(
        "geodb_partition_failovers_total",
        "Total number of per-partition failovers"
    );
    describe_gauge!(
        "geodb_region_unavailable",
        "Whether a region is currently marked unavailable (1) or not (0)"
    );

    // Speculation metrics
    describe_counter!(
        "geodb_speculative_attempts_total",
        "Total number of speculative cross-region attempts started"
    );

    // Session metrics
    describe_counter!(
        "geodb_session_retries_total",
        "Total number of retries caused by read session not available"
    );
}

/// Record a replica-level request
pub fn record_request(region: &str, operation: &str, status: u16, sub_status: u32) {
    counter!(
        "geodb_requests_total",
        "region" => region.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string(),
        "sub_status" => sub_status.to_string()
    )
    .increment(1);
}

/// Record the completion of a logical operation
pub fn record_operation(operation: &str, duration_seconds: f64, error_kind: Option<&str>) {
    histogram!("geodb_operation_duration_seconds", "operation" => operation.to_string())
        .record(duration_seconds);

    if let Some(kind) = error_kind {
        counter!(
            "geodb_operation_errors_total",
            "operation" => operation.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }
}

/// Record a barrier request outcome ("met", "not_met", "lease_not_found", "error")
pub fn record_barrier_head(outcome: &str) {
    counter!("geodb_barrier_heads_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a barrier run that ran out of budget
pub fn record_barrier_exhausted(reason: &str) {
    counter!("geodb_barrier_exhausted_total", "reason" => reason.to_string()).increment(1);
}

/// Record an operation moving from one region to another
pub fn record_region_failover(from: &str, to: &str) {
    counter!(
        "geodb_region_failovers_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record a per-partition failover
pub fn record_partition_failover(from: &str, to: &str) {
    counter!(
        "geodb_partition_failovers_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Update the availability gauge of a region
pub fn set_region_unavailable(region: &str, unavailable: bool) {
    gauge!("geodb_region_unavailable", "region" => region.to_string())
        .set(if unavailable { 1.0 } else { 0.0 });
}

/// Record a speculative attempt against a region
pub fn record_speculative_attempt(region: &str) {
    counter!("geodb_speculative_attempts_total", "region" => region.to_string()).increment(1);
}

/// Record a 404/1002 retry
pub fn record_session_retry(region: &str, switched_region: bool) {
    counter!(
        "geodb_session_retries_total",
        "region" => region.to_string(),
        "switched_region" => switched_region.to_string()
    )
    .increment(1);
}
