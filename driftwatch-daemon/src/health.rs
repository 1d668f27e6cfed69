//! Daemon health reporting.
//!
//! The orchestrator periodically builds a [`DaemonHealth`] snapshot from the
//! detector and logs it at a level matching its status.

use serde::Serialize;

use driftwatch_core::pipeline::HealthStatus;
use driftwatch_detector::StatsSnapshot;

/// Point-in-time health report for the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Detector health status.
    pub status: HealthStatus,
    /// Daemon uptime in seconds since the orchestrator was built.
    pub uptime_secs: u64,
    /// Number of monitoring rules currently loaded.
    pub rules_loaded: usize,
    /// Scored samples waiting in the result buffer.
    pub buffer_len: usize,
    /// Detector counters.
    pub detector: StatsSnapshot,
}

/// Log a health report: healthy at debug, degraded at warn, unhealthy at error.
pub fn log_health(health: &DaemonHealth) {
    let stats = &health.detector;
    match &health.status {
        HealthStatus::Healthy => tracing::debug!(
            uptime_secs = health.uptime_secs,
            rules = health.rules_loaded,
            buffer_len = health.buffer_len,
            lines = stats.lines,
            enqueued = stats.enqueued,
            dropped = stats.dropped,
            active_connections = stats.active_connections,
            "daemon healthy"
        ),
        HealthStatus::Degraded(reason) => tracing::warn!(
            reason = %reason,
            buffer_len = health.buffer_len,
            dropped = stats.dropped,
            "daemon degraded"
        ),
        HealthStatus::Unhealthy(reason) => tracing::error!(
            reason = %reason,
            "daemon unhealthy"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_serializes_status_and_counters() {
        let health = DaemonHealth {
            status: HealthStatus::Degraded("buffer".to_owned()),
            uptime_secs: 12,
            rules_loaded: 3,
            buffer_len: 7,
            detector: StatsSnapshot {
                lines: 10,
                dropped: 2,
                ..StatsSnapshot::default()
            },
        };

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"]["Degraded"], "buffer");
        assert_eq!(json["rules_loaded"], 3);
        assert_eq!(json["detector"]["dropped"], 2);

        log_health(&health);
    }
}
