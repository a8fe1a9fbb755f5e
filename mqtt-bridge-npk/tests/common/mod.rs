//! In-memory sensor and broker used by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::Span;

use mqtt_bridge_npk::register::decode_register;
use mqtt_bridge_npk::{
    ConnectionError, LinkReporter, LinkState, Monitor, MonitorSettings, PubSubTransport, QosLevel,
    RegisterMap, RegisterTransport, SensorReader, SessionSettings, TelemetryPublisher,
    TransportError,
};

/// Register values by address. Missing addresses time out.
#[derive(Clone, Default)]
pub struct FakeSensor {
    registers: Arc<Mutex<HashMap<u16, u16>>>,
    reads: Arc<Mutex<usize>>,
}

impl FakeSensor {
    pub fn with_npk(
        nitrogen: Option<u16>,
        phosphorus: Option<u16>,
        potassium: Option<u16>,
    ) -> Self {
        let sensor = Self::default();
        for (address, value) in [(0x1E, nitrogen), (0x1F, phosphorus), (0x20, potassium)] {
            if let Some(value) = value {
                sensor.set(address, value);
            }
        }
        sensor
    }

    pub fn set(&self, address: u16, raw: u16) {
        self.registers.lock().unwrap().insert(address, raw);
    }

    pub fn clear(&self) {
        self.registers.lock().unwrap().clear();
    }

    pub fn reads(&self) -> usize {
        *self.reads.lock().unwrap()
    }
}

#[async_trait]
impl RegisterTransport for FakeSensor {
    async fn read_register(
        &mut self,
        address: u16,
        decimals: u8,
        signed: bool,
    ) -> Result<f64, TransportError> {
        *self.reads.lock().unwrap() += 1;
        self.registers
            .lock()
            .unwrap()
            .get(&address)
            .map(|raw| decode_register(*raw, decimals, signed))
            .ok_or(TransportError::Timeout(Duration::from_secs(1)))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct BrokerLog {
    pub opens: usize,
    pub closes: usize,
    pub published: Vec<(String, Vec<u8>)>,
}

/// Broker double sharing its state with the test.
#[derive(Clone)]
pub struct FakeBroker {
    pub log: Arc<Mutex<BrokerLog>>,
    ack: Arc<Mutex<bool>>,
    refuse_publish: Arc<Mutex<bool>>,
    link: Arc<Mutex<Option<LinkReporter>>>,
}

impl FakeBroker {
    /// A broker that acknowledges connections when `ack` is true.
    pub fn new(ack: bool) -> Self {
        Self {
            log: Arc::new(Mutex::new(BrokerLog::default())),
            ack: Arc::new(Mutex::new(ack)),
            refuse_publish: Arc::new(Mutex::new(false)),
            link: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_ack(&self, ack: bool) {
        *self.ack.lock().unwrap() = ack;
    }

    pub fn refuse_publish(&self, refuse: bool) {
        *self.refuse_publish.lock().unwrap() = refuse;
    }

    /// Simulate the broker dropping the connection.
    pub fn drop_link(&self) {
        if let Some(link) = self.link.lock().unwrap().as_ref() {
            link.set(LinkState::Disconnected);
        }
    }

    /// Simulate the background task re-establishing the session.
    pub fn restore_link(&self) {
        if let Some(link) = self.link.lock().unwrap().as_ref() {
            link.set(LinkState::Connected);
        }
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.log
            .lock()
            .unwrap()
            .published
            .iter()
            .map(|(topic, payload)| (topic.clone(), String::from_utf8_lossy(payload).into_owned()))
            .collect()
    }

    pub fn telemetry(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|(topic, _)| topic == mqtt_bridge_npk::TELEMETRY_TOPIC)
            .map(|(_, payload)| payload)
            .collect()
    }
}

#[async_trait]
impl PubSubTransport for FakeBroker {
    async fn open(
        &mut self,
        _settings: &SessionSettings,
        link: LinkReporter,
    ) -> Result<(), ConnectionError> {
        self.log.lock().unwrap().opens += 1;
        if *self.ack.lock().unwrap() {
            link.set(LinkState::Connected);
        }
        *self.link.lock().unwrap() = Some(link);
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        _qos: QosLevel,
        payload: Vec<u8>,
    ) -> Result<(), ConnectionError> {
        if *self.refuse_publish.lock().unwrap() {
            return Err(ConnectionError::Client("request queue full".to_string()));
        }
        self.log
            .lock()
            .unwrap()
            .published
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.log.lock().unwrap().closes += 1;
        if let Some(link) = self.link.lock().unwrap().take() {
            link.set(LinkState::Disconnected);
        }
        Ok(())
    }
}

pub fn session_settings() -> SessionSettings {
    SessionSettings {
        host: "tb.local".to_string(),
        port: 1883,
        client_id: "npk_sensor_test".to_string(),
        access_token: "A1B2C3".to_string(),
        keepalive: Duration::from_secs(60),
    }
}

pub fn settings(include_timestamp: bool) -> MonitorSettings {
    MonitorSettings {
        reading_interval: Duration::from_secs(60),
        include_timestamp,
        connect_timeout: Duration::from_secs(10),
    }
}

pub fn sensor_reader(sensor: FakeSensor) -> Arc<SensorReader<FakeSensor>> {
    Arc::new(SensorReader::new(sensor, RegisterMap::defaults(), Span::none()))
}

pub fn publisher(broker: FakeBroker) -> TelemetryPublisher<FakeBroker> {
    TelemetryPublisher::new(broker, session_settings(), QosLevel::AtLeastOnce, Span::none())
}

pub fn monitor(
    sensor: FakeSensor,
    broker: Option<FakeBroker>,
    include_timestamp: bool,
) -> Monitor<FakeSensor, FakeBroker> {
    Monitor::new(
        sensor_reader(sensor),
        broker.map(publisher),
        settings(include_timestamp),
        Span::none(),
    )
}
