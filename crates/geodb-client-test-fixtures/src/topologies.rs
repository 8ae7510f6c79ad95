//! Canned account topologies

use geodb_client_routing::{AccountTopology, TopologyBuilder};

fn endpoint(region: &str) -> String {
    format!("https://acct-{}.geodb.example", region.replace(' ', "").to_lowercase())
}

/// "West US" (read/write hub) and "East US" (read-only)
pub fn two_region_single_write() -> AccountTopology {
    TopologyBuilder::new()
        .region("West US", endpoint("West US"))
        .readable_region("East US", endpoint("East US"))
        .build()
        .expect("valid topology")
}

/// "West US" (read/write hub), "East US" and "North Europe" (read-only)
pub fn three_region_single_write() -> AccountTopology {
    TopologyBuilder::new()
        .region("West US", endpoint("West US"))
        .readable_region("East US", endpoint("East US"))
        .readable_region("North Europe", endpoint("North Europe"))
        .build()
        .expect("valid topology")
}

/// "West US", "East US" and "North Europe", all readable and writable
pub fn three_region_multi_write() -> AccountTopology {
    TopologyBuilder::new()
        .region("West US", endpoint("West US"))
        .region("East US", endpoint("East US"))
        .region("North Europe", endpoint("North Europe"))
        .multiple_write_locations(true)
        .build()
        .expect("valid topology")
}
