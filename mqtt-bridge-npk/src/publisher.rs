//! ThingsBoard telemetry publisher.
//!
//! The publisher owns a [`PubSubTransport`] and tracks the link state that the
//! transport's background task reports through a watch channel. Publishing is
//! only attempted while the link is up; nothing here reconnects implicitly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{Span, debug, error, info, warn};

use soilsight_common::{TimestampedPayload, encode};

use crate::config::QosLevel;

/// ThingsBoard device telemetry topic.
pub const TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";

/// ThingsBoard client-side attributes topic.
pub const ATTRIBUTES_TOPIC: &str = "v1/devices/me/attributes";

/// Client id used when none is configured: `npk_sensor_<epoch seconds>`.
pub fn default_client_id() -> String {
    format!("npk_sensor_{}", Utc::now().timestamp())
}

/// State of the broker link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Write half of the link-state cell, handed to the transport.
#[derive(Debug, Clone)]
pub struct LinkReporter {
    tx: Arc<watch::Sender<LinkState>>,
}

impl LinkReporter {
    pub(crate) fn new() -> (Self, watch::Receiver<LinkState>) {
        let (tx, rx) = watch::channel(LinkState::Disconnected);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Record a new state. Returns true if the state changed.
    pub fn set(&self, state: LinkState) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        })
    }

    pub fn get(&self) -> LinkState {
        *self.tx.borrow()
    }
}

/// Error type for broker operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection refused: {0}")]
    Refused(String),
    #[error("Client error: {0}")]
    Client(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("No acknowledgment within {0:?}")]
    Timeout(Duration),
}

/// Parameters for one broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Sent as the MQTT username; no password.
    pub access_token: String,
    pub keepalive: Duration,
}

/// A publish-subscribe session.
///
/// `open` starts the session and returns without waiting for the broker;
/// the transport reports progress through the [`LinkReporter`].
#[async_trait]
pub trait PubSubTransport: Send {
    async fn open(
        &mut self,
        settings: &SessionSettings,
        link: LinkReporter,
    ) -> Result<(), ConnectionError>;

    async fn publish(
        &mut self,
        topic: &str,
        qos: QosLevel,
        payload: Vec<u8>,
    ) -> Result<(), ConnectionError>;

    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Snapshot of the publisher's connection state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherStatistics {
    pub connected: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub publish_count: u64,
    /// RFC 3339
    pub last_publish_time: Option<String>,
}

pub struct TelemetryPublisher<T> {
    transport: T,
    settings: SessionSettings,
    qos: QosLevel,
    link: LinkReporter,
    link_rx: watch::Receiver<LinkState>,
    session_open: bool,
    last_publish: Option<DateTime<Utc>>,
    publish_count: u64,
    span: Span,
}

impl<T: PubSubTransport> TelemetryPublisher<T> {
    pub fn new(transport: T, settings: SessionSettings, qos: QosLevel, span: Span) -> Self {
        let (link, link_rx) = LinkReporter::new();
        Self {
            transport,
            settings,
            qos,
            link,
            link_rx,
            session_open: false,
            last_publish: None,
            publish_count: 0,
            span,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.settings.client_id
    }

    /// Last state reported by the transport.
    pub fn link_state(&self) -> LinkState {
        *self.link_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.link_state() == LinkState::Connected
    }

    /// Connect and wait up to `timeout` for the broker's acknowledgment.
    ///
    /// Returns true immediately when already connected. Failures are logged
    /// and reported as `false`.
    pub async fn connect(&mut self, timeout: Duration) -> bool {
        if self.is_connected() {
            return true;
        }

        if !self.session_open {
            info!(
                parent: &self.span,
                host = %self.settings.host,
                port = self.settings.port,
                client_id = %self.settings.client_id,
                "Connecting to ThingsBoard"
            );
            self.link.set(LinkState::Connecting);

            if let Err(e) = self.transport.open(&self.settings, self.link.clone()).await {
                error!(parent: &self.span, error = %e, "Failed to open MQTT session");
                self.link.set(LinkState::Disconnected);
                return false;
            }
            self.session_open = true;
        }

        let mut rx = self.link_rx.clone();
        match tokio::time::timeout(timeout, rx.wait_for(|s| *s == LinkState::Connected)).await {
            Ok(Ok(_)) => {
                info!(parent: &self.span, "Connected to ThingsBoard");
                true
            }
            Ok(Err(_)) => {
                warn!(parent: &self.span, "Link state channel closed");
                false
            }
            Err(_) => {
                let e = ConnectionError::Timeout(timeout);
                warn!(parent: &self.span, error = %e, "Broker did not acknowledge connection");
                false
            }
        }
    }

    /// Publish telemetry, wrapped as `{ts, values}` when a timestamp is given.
    ///
    /// Returns false without touching the transport when not connected.
    pub async fn publish_telemetry<D: Serialize>(
        &mut self,
        data: &D,
        timestamp: Option<i64>,
    ) -> bool {
        if !self.is_connected() {
            warn!(parent: &self.span, "Not connected, telemetry not sent");
            return false;
        }

        let encoded = match timestamp {
            Some(ts) => encode(&TimestampedPayload { ts, values: data }),
            None => encode(data),
        };
        let payload = match encoded {
            Ok(payload) => payload,
            Err(e) => {
                error!(parent: &self.span, error = %e, "Failed to encode telemetry");
                return false;
            }
        };

        if !self.send(TELEMETRY_TOPIC, payload).await {
            return false;
        }

        self.publish_count += 1;
        self.last_publish = Some(Utc::now());
        true
    }

    /// Publish client-side attributes.
    pub async fn publish_attributes<D: Serialize>(&mut self, data: &D) -> bool {
        if !self.is_connected() {
            warn!(parent: &self.span, "Not connected, attributes not sent");
            return false;
        }

        match encode(data) {
            Ok(payload) => self.send(ATTRIBUTES_TOPIC, payload).await,
            Err(e) => {
                error!(parent: &self.span, error = %e, "Failed to encode attributes");
                false
            }
        }
    }

    async fn send(&mut self, topic: &str, payload: Vec<u8>) -> bool {
        let size = payload.len();
        match self.transport.publish(topic, self.qos, payload).await {
            Ok(()) => {
                debug!(parent: &self.span, topic, bytes = size, "Published");
                true
            }
            Err(e) => {
                warn!(parent: &self.span, topic, error = %e, "Publish failed");
                false
            }
        }
    }

    /// Close the session. Idempotent.
    pub async fn disconnect(&mut self) {
        if self.session_open {
            if let Err(e) = self.transport.close().await {
                warn!(parent: &self.span, error = %e, "Error while closing MQTT session");
            }
            self.session_open = false;
            info!(parent: &self.span, "Disconnected from ThingsBoard");
        }
        self.link.set(LinkState::Disconnected);
    }

    pub fn statistics(&self) -> PublisherStatistics {
        PublisherStatistics {
            connected: self.is_connected(),
            host: self.settings.host.clone(),
            port: self.settings.port,
            client_id: self.settings.client_id.clone(),
            publish_count: self.publish_count,
            last_publish_time: self.last_publish.map(|t| t.to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        opens: usize,
        closes: usize,
        published: Vec<(String, QosLevel, Vec<u8>)>,
    }

    /// Acks immediately when `ack` is set, otherwise stays in Connecting.
    struct FakeBroker {
        ack: bool,
        recorded: Arc<Mutex<Recorded>>,
        link: Option<LinkReporter>,
    }

    impl FakeBroker {
        fn new(ack: bool) -> (Self, Arc<Mutex<Recorded>>) {
            let recorded = Arc::new(Mutex::new(Recorded::default()));
            (
                Self {
                    ack,
                    recorded: recorded.clone(),
                    link: None,
                },
                recorded,
            )
        }
    }

    #[async_trait]
    impl PubSubTransport for FakeBroker {
        async fn open(
            &mut self,
            _settings: &SessionSettings,
            link: LinkReporter,
        ) -> Result<(), ConnectionError> {
            self.recorded.lock().unwrap().opens += 1;
            if self.ack {
                link.set(LinkState::Connected);
            }
            self.link = Some(link);
            Ok(())
        }

        async fn publish(
            &mut self,
            topic: &str,
            qos: QosLevel,
            payload: Vec<u8>,
        ) -> Result<(), ConnectionError> {
            self.recorded
                .lock()
                .unwrap()
                .published
                .push((topic.to_string(), qos, payload));
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            self.recorded.lock().unwrap().closes += 1;
            if let Some(link) = self.link.take() {
                link.set(LinkState::Disconnected);
            }
            Ok(())
        }
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            host: "tb.local".to_string(),
            port: 1883,
            client_id: "npk_sensor_1".to_string(),
            access_token: "tok".to_string(),
            keepalive: Duration::from_secs(60),
        }
    }

    fn publisher(ack: bool) -> (TelemetryPublisher<FakeBroker>, Arc<Mutex<Recorded>>) {
        let (broker, recorded) = FakeBroker::new(ack);
        (
            TelemetryPublisher::new(broker, settings(), QosLevel::AtLeastOnce, Span::none()),
            recorded,
        )
    }

    #[test]
    fn test_default_client_id() {
        assert!(default_client_id().starts_with("npk_sensor_"));
    }

    #[test]
    fn test_link_reporter_reports_changes() {
        let (link, rx) = LinkReporter::new();
        assert_eq!(link.get(), LinkState::Disconnected);
        assert!(link.set(LinkState::Connecting));
        assert!(!link.set(LinkState::Connecting));
        assert_eq!(*rx.borrow(), LinkState::Connecting);
    }

    #[tokio::test]
    async fn test_connect_and_publish() {
        let (mut publisher, recorded) = publisher(true);
        assert_eq!(publisher.link_state(), LinkState::Disconnected);

        assert!(publisher.connect(Duration::from_secs(10)).await);
        assert!(publisher.is_connected());

        let data = serde_json::json!({"nitrogen": 120});
        assert!(publisher.publish_telemetry(&data, None).await);
        assert!(publisher.publish_attributes(&serde_json::json!({"model": "x"})).await);

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.published.len(), 2);
        assert_eq!(recorded.published[0].0, TELEMETRY_TOPIC);
        assert_eq!(recorded.published[0].1, QosLevel::AtLeastOnce);
        assert_eq!(recorded.published[0].2, br#"{"nitrogen":120}"#.to_vec());
        assert_eq!(recorded.published[1].0, ATTRIBUTES_TOPIC);

        let stats = publisher.statistics();
        assert!(stats.connected);
        assert_eq!(stats.publish_count, 1);
        assert!(stats.last_publish_time.is_some());
    }

    #[tokio::test]
    async fn test_connect_when_connected_is_noop() {
        let (mut publisher, recorded) = publisher(true);
        assert!(publisher.connect(Duration::from_secs(1)).await);
        assert!(publisher.connect(Duration::from_secs(1)).await);
        assert_eq!(recorded.lock().unwrap().opens, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_without_ack() {
        let (mut publisher, _recorded) = publisher(false);

        let started = tokio::time::Instant::now();
        assert!(!publisher.connect(Duration::from_secs(10)).await);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(publisher.link_state(), LinkState::Connecting);
    }

    #[tokio::test]
    async fn test_publish_when_disconnected() {
        let (mut publisher, recorded) = publisher(true);

        let data = serde_json::json!({"nitrogen": 1});
        assert!(!publisher.publish_telemetry(&data, None).await);
        assert!(!publisher.publish_attributes(&data).await);
        assert!(recorded.lock().unwrap().published.is_empty());
        assert_eq!(publisher.statistics().publish_count, 0);
    }

    #[tokio::test]
    async fn test_publish_with_timestamp() {
        let (mut publisher, recorded) = publisher(true);
        publisher.connect(Duration::from_secs(1)).await;

        let data = serde_json::json!({"nitrogen": 100});
        assert!(publisher.publish_telemetry(&data, Some(1_700_000_000_000)).await);

        let recorded = recorded.lock().unwrap();
        assert_eq!(
            String::from_utf8(recorded.published[0].2.clone()).unwrap(),
            r#"{"ts":1700000000000,"values":{"nitrogen":100}}"#
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (mut publisher, recorded) = publisher(true);
        publisher.connect(Duration::from_secs(1)).await;

        publisher.disconnect().await;
        publisher.disconnect().await;

        assert!(!publisher.is_connected());
        assert_eq!(recorded.lock().unwrap().closes, 1);

        // A fresh connect opens a new session
        assert!(publisher.connect(Duration::from_secs(1)).await);
        assert_eq!(recorded.lock().unwrap().opens, 2);
    }
}
