//! MQTT transport backed by `rumqttc`.
//!
//! `open` spawns a task that drives the client's event loop. The task reports
//! link changes through the [`LinkReporter`] and keeps reconnecting with
//! exponential backoff until the session is closed.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::task::JoinHandle;
use tracing::{Span, debug, error, info, warn};

use crate::config::QosLevel;
use crate::publisher::{
    ConnectionError, LinkReporter, LinkState, PubSubTransport, SessionSettings,
};

const MIN_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(120);
const REQUEST_CHANNEL_CAPACITY: usize = 10;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Doubling reconnect delay, bounded to 1..120 seconds.
#[derive(Debug, Clone)]
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: MIN_RECONNECT_DELAY,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_RECONNECT_DELAY);
        delay
    }

    fn reset(&mut self) {
        self.current = MIN_RECONNECT_DELAY;
    }
}

fn to_qos(level: QosLevel) -> QoS {
    match level {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Client options for a ThingsBoard device session.
///
/// The access token is the MQTT username. The password is left empty, which
/// `rumqttc` encodes by leaving the password flag clear.
fn mqtt_options(settings: &SessionSettings) -> MqttOptions {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(settings.keepalive);
    options.set_credentials(&settings.access_token, "");
    options.set_clean_session(true);
    options
}

fn refusal_reason(code: &ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Success => "accepted",
        ConnectReturnCode::RefusedProtocolVersion => "incorrect protocol version",
        ConnectReturnCode::BadClientId => "invalid client identifier",
        ConnectReturnCode::ServiceUnavailable => "server unavailable",
        ConnectReturnCode::BadUserNamePassword => "bad access token",
        ConnectReturnCode::NotAuthorized => "not authorized",
    }
}

pub struct MqttTransport {
    client: Option<AsyncClient>,
    task: Option<JoinHandle<()>>,
    span: Span,
}

impl MqttTransport {
    pub fn new(span: Span) -> Self {
        Self {
            client: None,
            task: None,
            span,
        }
    }
}

#[async_trait]
impl PubSubTransport for MqttTransport {
    async fn open(
        &mut self,
        settings: &SessionSettings,
        link: LinkReporter,
    ) -> Result<(), ConnectionError> {
        if self.client.is_some() {
            return Ok(());
        }

        let options = mqtt_options(settings);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let task = tokio::spawn(drive_event_loop(eventloop, link, self.span.clone()));

        self.client = Some(client);
        self.task = Some(task);
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        qos: QosLevel,
        payload: Vec<u8>,
    ) -> Result<(), ConnectionError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ConnectionError::Client("session not open".to_string()))?;

        client
            .publish(topic, to_qos(qos), false, payload)
            .await
            .map_err(|e| ConnectionError::Client(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        let result = client
            .disconnect()
            .await
            .map_err(|e| ConnectionError::Client(e.to_string()));

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                debug!(parent: &self.span, "Event loop did not stop in time, aborting");
                task.abort();
            }
        }

        result
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Poll the event loop until the session is closed.
async fn drive_event_loop(mut eventloop: EventLoop, link: LinkReporter, span: Span) {
    let mut backoff = Backoff::new();

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    backoff.reset();
                    if link.set(LinkState::Connected) {
                        info!(parent: &span, "MQTT session established");
                    }
                } else {
                    warn!(parent: &span, reason = refusal_reason(&ack.code), "Connection refused");
                    link.set(LinkState::Disconnected);
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!(parent: &span, pkid = ack.pkid, "Publish acknowledged");
            }
            Ok(Event::Incoming(Packet::PubComp(comp))) => {
                debug!(parent: &span, pkid = comp.pkid, "Publish completed");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!(parent: &span, "Broker closed the session");
                link.set(LinkState::Disconnected);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                link.set(LinkState::Disconnected);
                debug!(parent: &span, "Session closed by client");
                break;
            }
            Ok(_) => {}
            Err(rumqttc::ConnectionError::RequestsDone) => {
                link.set(LinkState::Disconnected);
                break;
            }
            Err(e) => {
                match &e {
                    rumqttc::ConnectionError::ConnectionRefused(code) => {
                        error!(parent: &span, reason = refusal_reason(code), "Connection refused");
                    }
                    other => {
                        warn!(parent: &span, error = %other, "MQTT connection lost");
                    }
                }
                link.set(LinkState::Disconnected);

                let delay = backoff.next_delay();
                info!(parent: &span, delay_secs = delay.as_secs(), "Reconnecting");
                tokio::time::sleep(delay).await;
                link.set(LinkState::Connecting);
            }
        }
    }
}
