//! Database model types.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// A single probe outcome for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub success: bool,
    /// Round-trip time in milliseconds, 0.0 when the probe failed.
    pub rtt_ms: f64,
    /// Failure reason, present only when `success` is false.
    pub error_message: Option<String>,
}

impl Sample {
    /// A healthy sample with a measured round-trip time.
    pub fn success(target: &str, timestamp: DateTime<Utc>, rtt_ms: f64) -> Self {
        Self {
            timestamp,
            target: target.to_string(),
            success: true,
            rtt_ms,
            error_message: None,
        }
    }

    /// A failed sample carrying the reason.
    pub fn failure(target: &str, timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            timestamp,
            target: target.to_string(),
            success: false,
            rtt_ms: 0.0,
            error_message: Some(reason.into()),
        }
    }
}

/// Per-target aggregate over a trailing window of raw samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetStats {
    pub target: String,
    pub total_pings: i64,
    pub successful_pings: i64,
    pub avg_rtt: Option<f64>,
    pub min_rtt: Option<f64>,
    pub max_rtt: Option<f64>,
    pub packet_loss: f64,
}

/// A maximal run of failing samples for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outage {
    pub target: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub failed_checks: i64,
    pub duration_secs: f64,
}

impl Outage {
    pub fn new(
        target: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        failed_checks: i64,
    ) -> Self {
        let duration = end_time - start_time;
        Self {
            target: target.to_string(),
            start_time,
            end_time,
            failed_checks,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        }
    }

    pub fn duration(&self) -> ChronoDuration {
        self.end_time - self.start_time
    }
}

/// One hour-of-day cell of the failure heatmap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapPoint {
    pub hour: i64,
    pub target: String,
    pub failure_rate: f64,
    pub avg_latency: Option<f64>,
    pub max_latency: Option<f64>,
    pub total_failures: i64,
    pub total_pings: i64,
    pub days_with_data: i64,
}

/// A stored hour-of-day aggregate for a single calendar date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyPattern {
    pub date: String,
    pub hour: i64,
    pub target: String,
    pub total_pings: i64,
    pub failed_pings: i64,
    pub avg_rtt: Option<f64>,
    pub max_rtt: Option<f64>,
    pub failure_rate: f64,
}

/// Archival rollup for one clock hour, kept after raw samples are pruned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyStat {
    pub hour: String,
    pub target: String,
    pub total_pings: i64,
    pub successful_pings: i64,
    pub avg_rtt: Option<f64>,
    pub max_rtt: Option<f64>,
    pub min_rtt: Option<f64>,
    pub packet_loss: f64,
}

/// Storage statistics for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub db_size_bytes: i64,
    pub page_size: i64,
    pub page_count: i64,
    pub freelist_count: i64,
    pub raw_samples: i64,
    pub hourly_patterns: i64,
    pub hourly_stats: i64,
}
