//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

use crate::hub::HubStats;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` while the hub is running.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Distinct users with at least one live connection.
    pub users: usize,
    /// Live connections.
    pub connections: usize,
}

/// Build a health response from hub stats.
pub fn health_check(start_time: Instant, stats: HubStats) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        users: stats.users,
        connections: stats.connections,
    }
}
