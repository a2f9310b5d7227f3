// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod cluster;
pub mod commands;
pub mod config;
pub mod deploy;
pub mod error;
pub mod item;
pub mod manager;
pub mod placement;
pub mod reconcile;
pub mod state;
pub mod substrate;
pub mod test_env;
pub mod variable;

/// Directory the operator reads cluster descriptors from.
pub fn default_cluster_dir() -> String {
    match std::env::var("CURVEOP_CLUSTER_DIR") {
        Ok(dir) => dir,
        Err(_) => "/etc/curveop/clusters".to_string(),
    }
}

/// Directory for cluster status, the event journal and local substrate objects.
pub fn default_state_dir() -> String {
    match std::env::var("CURVEOP_STATE_DIR") {
        Ok(dir) => dir,
        Err(_) => "/var/lib/curveop".to_string(),
    }
}

/// Seconds between operator scans.
pub fn default_interval() -> u64 {
    std::env::var("CURVEOP_INTERVAL")
        .ok()
        .and_then(|secs| secs.parse().ok())
        .unwrap_or(30)
}
