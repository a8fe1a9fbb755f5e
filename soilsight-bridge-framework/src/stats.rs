//! Run statistics for a bridge's poll loop.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters accumulated over the lifetime of a poll loop.
///
/// Owned by the loop itself; counters only ever increase and are reset only by
/// restarting the process.
#[derive(Debug, Clone)]
pub struct RunStatistics {
    /// Wall-clock start time for reporting.
    started_at: DateTime<Utc>,
    /// Start time for uptime calculation.
    start_time: Instant,
    /// Cycles that produced a publishable batch.
    readings_count: u64,
    /// Batches accepted by the transport.
    publish_success: u64,
    /// Batches the transport refused or that could not be encoded.
    publish_failed: u64,
    /// Cycles skipped because the sensor returned no usable data.
    sensor_errors: u64,
}

/// Serializable view of [`RunStatistics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Start time, RFC 3339.
    pub started_at: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    pub readings_count: u64,
    pub publish_success: u64,
    pub publish_failed: u64,
    pub sensor_errors: u64,
    /// Publish success as a percentage of readings; absent before the first reading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStatistics {
    /// Start counting from now.
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            start_time: Instant::now(),
            readings_count: 0,
            publish_success: 0,
            publish_failed: 0,
            sensor_errors: 0,
        }
    }

    pub fn record_reading(&mut self) {
        self.readings_count += 1;
    }

    pub fn record_publish_success(&mut self) {
        self.publish_success += 1;
    }

    pub fn record_publish_failure(&mut self) {
        self.publish_failed += 1;
    }

    pub fn record_sensor_error(&mut self) {
        self.sensor_errors += 1;
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn readings_count(&self) -> u64 {
        self.readings_count
    }

    pub fn publish_success(&self) -> u64 {
        self.publish_success
    }

    pub fn publish_failed(&self) -> u64 {
        self.publish_failed
    }

    pub fn sensor_errors(&self) -> u64 {
        self.sensor_errors
    }

    /// Time since the statistics were created.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Successful publishes as a percentage of readings.
    ///
    /// `None` until at least one reading has been taken.
    pub fn success_rate(&self) -> Option<f64> {
        if self.readings_count == 0 {
            None
        } else {
            Some((self.publish_success as f64 / self.readings_count as f64) * 100.0)
        }
    }

    /// Get a snapshot of the current counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at.to_rfc3339(),
            uptime_secs: self.uptime().as_secs(),
            readings_count: self.readings_count,
            publish_success: self.publish_success,
            publish_failed: self.publish_failed,
            sensor_errors: self.sensor_errors,
            success_rate: self.success_rate(),
        }
    }

    /// Log the accumulated counters under `span`.
    pub fn log_summary(&self, span: &tracing::Span) {
        let snapshot = self.snapshot();

        tracing::info!(
            parent: span,
            uptime_secs = snapshot.uptime_secs,
            readings = snapshot.readings_count,
            publish_success = snapshot.publish_success,
            publish_failed = snapshot.publish_failed,
            sensor_errors = snapshot.sensor_errors,
            "Run statistics"
        );

        if let Some(rate) = snapshot.success_rate {
            tracing::info!(parent: span, "Success rate: {:.1}%", rate);
        }
    }
}
