//! The poll, validate and publish loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{Span, debug, error, info, warn};

use soilsight_bridge_framework::{BridgeError, Result, RunStatistics, ShutdownSignal};
use soilsight_common::{ReadingBatch, TimestampedPayload, current_timestamp_millis, encode};

use crate::attributes::DeviceAttributes;
use crate::config::NpkBridgeConfig;
use crate::publisher::{PubSubTransport, TelemetryPublisher};
use crate::reader::{RegisterTransport, SensorReader};

/// Lifecycle of a [`Monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Initializing,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub reading_interval: Duration,
    pub include_timestamp: bool,
    pub connect_timeout: Duration,
}

impl MonitorSettings {
    pub fn from_config(config: &NpkBridgeConfig) -> Self {
        Self {
            reading_interval: config.application.reading_interval(),
            include_timestamp: config.mqtt.include_timestamp,
            connect_timeout: config.mqtt.connect_timeout(),
        }
    }
}

/// What a single cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published,
    PublishFailed,
    /// None of the mandatory channels produced a value.
    NoValidData,
    /// Dry run: the batch went to stdout.
    Printed,
    /// Shutdown arrived while reconnecting.
    Interrupted,
}

/// Drives readings from the sensor to the publisher.
///
/// Without a publisher the monitor runs dry: batches are printed as JSON and
/// no broker is contacted.
pub struct Monitor<R, P> {
    sensor: Arc<SensorReader<R>>,
    publisher: Option<TelemetryPublisher<P>>,
    settings: MonitorSettings,
    stats: RunStatistics,
    state: MonitorState,
    span: Span,
}

impl<R: RegisterTransport, P: PubSubTransport> Monitor<R, P> {
    pub fn new(
        sensor: Arc<SensorReader<R>>,
        publisher: Option<TelemetryPublisher<P>>,
        settings: MonitorSettings,
        span: Span,
    ) -> Self {
        Self {
            sensor,
            publisher,
            settings,
            stats: RunStatistics::new(),
            state: MonitorState::Initializing,
            span,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn statistics(&self) -> &RunStatistics {
        &self.stats
    }

    pub fn sensor(&self) -> &Arc<SensorReader<R>> {
        &self.sensor
    }

    pub fn publisher(&self) -> Option<&TelemetryPublisher<P>> {
        self.publisher.as_ref()
    }

    pub fn is_dry_run(&self) -> bool {
        self.publisher.is_none()
    }

    /// Check the sensor, connect, and report device attributes.
    ///
    /// A silent sensor or a failed initial connection is an initialization
    /// error; both components are released before returning it. Shutdown
    /// during the connect wait returns `Ok` so that [`run`](Self::run) stops
    /// cleanly.
    pub async fn initialize(
        &mut self,
        attributes: &DeviceAttributes,
        shutdown: &mut ShutdownSignal,
    ) -> Result<()> {
        info!(parent: &self.span, "Testing sensor connection");
        if !self.sensor.test_connection().await {
            self.stop().await;
            return Err(BridgeError::initialization(
                "sensor did not respond to the connection test",
            ));
        }
        info!(parent: &self.span, "Sensor connection OK");

        let span = self.span.clone();
        let timeout = self.settings.connect_timeout;
        let Some(publisher) = self.publisher.as_mut() else {
            info!(parent: &span, "Dry run, skipping broker connection");
            return Ok(());
        };

        let connected = tokio::select! {
            connected = publisher.connect(timeout) => connected,
            _ = shutdown.triggered() => {
                info!(parent: &span, "Shutdown requested while connecting");
                return Ok(());
            }
        };

        if !connected {
            self.stop().await;
            return Err(BridgeError::initialization(
                "could not connect to ThingsBoard",
            ));
        }

        if !publisher.publish_attributes(attributes).await {
            warn!(parent: &span, "Failed to publish device attributes");
        }

        Ok(())
    }

    /// Run cycles until shutdown or a fatal error, then stop.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> Result<RunStatistics> {
        self.state = MonitorState::Running;
        info!(
            parent: &self.span,
            interval_secs = self.settings.reading_interval.as_secs(),
            dry_run = self.is_dry_run(),
            "Monitoring started"
        );

        let mut ticker = tokio::time::interval(self.settings.reading_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break Ok(()),
                _ = ticker.tick() => {}
            }

            match self.run_cycle(&mut shutdown).await {
                Ok(outcome) => debug!(parent: &self.span, ?outcome, "Cycle complete"),
                Err(e) => {
                    error!(parent: &self.span, error = %e, "Fatal error in monitor loop");
                    break Err(e);
                }
            }
        };

        self.stop().await;
        result.map(|()| self.stats)
    }

    /// One reconnect-read-validate-publish pass.
    pub async fn run_cycle(&mut self, shutdown: &mut ShutdownSignal) -> Result<CycleOutcome> {
        let span = self.span.clone();
        let timeout = self.settings.connect_timeout;
        if let Some(publisher) = self.publisher.as_mut()
            && !publisher.is_connected()
        {
            warn!(parent: &span, "Not connected, attempting to reconnect");
            let connected = tokio::select! {
                connected = publisher.connect(timeout) => connected,
                _ = shutdown.triggered() => return Ok(CycleOutcome::Interrupted),
            };
            if !connected {
                warn!(parent: &span, "Reconnect failed, will retry next cycle");
            }
        }

        let batch = self
            .sensor
            .read_all()
            .await
            .map_err(|e| BridgeError::worker(format!("sensor read failed: {}", e)))?;

        let batch = match batch.into_publishable() {
            Ok(batch) => batch,
            Err(e) => {
                warn!(parent: &self.span, error = %e, "Skipping cycle");
                self.stats.record_sensor_error();
                return Ok(CycleOutcome::NoValidData);
            }
        };

        self.stats.record_reading();
        log_batch(&self.span, &batch);

        let timestamp = self
            .settings
            .include_timestamp
            .then(current_timestamp_millis);

        let Some(publisher) = self.publisher.as_mut() else {
            let payload = match timestamp {
                Some(ts) => encode(&TimestampedPayload { ts, values: &batch })?,
                None => encode(&batch)?,
            };
            println!("{}", String::from_utf8_lossy(&payload));
            return Ok(CycleOutcome::Printed);
        };

        if publisher.publish_telemetry(&batch, timestamp).await {
            self.stats.record_publish_success();
            Ok(CycleOutcome::Published)
        } else {
            self.stats.record_publish_failure();
            Ok(CycleOutcome::PublishFailed)
        }
    }

    /// Log statistics and release the sensor and broker session.
    pub async fn stop(&mut self) {
        if self.state == MonitorState::Stopped {
            return;
        }
        self.state = MonitorState::Stopping;
        info!(parent: &self.span, "Stopping monitor");

        self.stats.log_summary(&self.span);
        if let Some(publisher) = self.publisher.as_ref() {
            let stats = publisher.statistics();
            debug!(
                parent: &self.span,
                publish_count = stats.publish_count,
                last_publish = ?stats.last_publish_time,
                "Publisher statistics"
            );
        }

        self.sensor.close().await;
        if let Some(publisher) = self.publisher.as_mut() {
            publisher.disconnect().await;
        }

        self.state = MonitorState::Stopped;
        info!(parent: &self.span, "Monitor stopped");
    }
}

fn log_batch(span: &Span, batch: &ReadingBatch) {
    for reading in batch.iter() {
        if let Some(value) = reading.value {
            debug!(parent: span, channel = %reading.name, value, "Reading");
        }
    }
    info!(parent: span, channels = batch.len(), "Sensor reading taken");
}
