//! Configuration for the NPK bridge.

use serde::{Deserialize, Serialize};
use soilsight_bridge_framework::{BridgeConfig, BridgeError, LoggingConfig, Result};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::publisher::SessionSettings;
use crate::register::{RegisterMap, RegisterSpec};

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpkBridgeConfig {
    /// Serial field bus and register settings
    #[serde(default)]
    pub sensor: SensorConfig,

    /// MQTT session settings
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// ThingsBoard endpoint and device credential
    pub thingsboard: ThingsBoardConfig,

    /// Poll loop settings
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Device identity reported as attributes
    #[serde(default)]
    pub device: DeviceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Modbus RTU sensor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Serial port path (e.g., "/dev/ttyS0" or "/dev/ttyUSB0")
    #[serde(default = "default_serial_port")]
    pub port: String,

    /// Modbus slave ID (1-247)
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,

    /// Baud rate (default: 4800)
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,

    /// Read timeout in seconds
    #[serde(default = "default_sensor_timeout")]
    pub timeout: f64,

    /// Channel name -> register address or `{ address, decimals, signed }`.
    /// The built-in register table is used when omitted.
    #[serde(default)]
    pub registers: Option<BTreeMap<String, RegisterSpec>>,

    /// Sensor model, reported as a device attribute
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_serial_port() -> String {
    "/dev/ttyS0".to_string()
}

fn default_slave_id() -> u8 {
    1
}

fn default_baudrate() -> u32 {
    4800
}

fn default_sensor_timeout() -> f64 {
    1.0
}

fn default_model() -> String {
    "Generic NPK".to_string()
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            slave_id: default_slave_id(),
            baudrate: default_baudrate(),
            timeout: default_sensor_timeout(),
            registers: None,
            model: default_model(),
        }
    }
}

impl SensorConfig {
    /// Per-read timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    /// Build the register map from the configured (or default) registers.
    pub fn register_map(&self) -> Result<RegisterMap> {
        match &self.registers {
            Some(registers) => RegisterMap::from_config(registers),
            None => Ok(RegisterMap::defaults()),
        }
    }
}

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    /// 0: fire and forget
    AtMostOnce,
    /// 1: acknowledged delivery (default)
    #[default]
    AtLeastOnce,
    /// 2: four-way handshake
    ExactlyOnce,
}

impl TryFrom<u8> for QosLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(format!("invalid QoS level {} (use 0, 1 or 2)", other)),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

/// MQTT connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker port (default: 1883)
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,

    /// Quality of service for every publish: 0, 1 or 2
    #[serde(default)]
    pub qos: QosLevel,

    /// Stamp telemetry with the local clock instead of broker time
    #[serde(default)]
    pub include_timestamp: bool,

    /// Client identifier (default: "npk_sensor_<epoch seconds>")
    #[serde(default)]
    pub client_id: Option<String>,

    /// How long to wait for the broker's acknowledgment, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keepalive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            port: default_mqtt_port(),
            keepalive: default_keepalive(),
            qos: QosLevel::default(),
            include_timestamp: false,
            client_id: None,
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl MqttConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

/// ThingsBoard endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThingsBoardConfig {
    /// Broker hostname (e.g., "demo.thingsboard.io")
    pub host: String,

    /// Device access token, sent as the MQTT username
    pub access_token: String,
}

/// Poll loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Seconds between sensor readings
    #[serde(default = "default_reading_interval")]
    pub reading_interval: u64,
}

fn default_reading_interval() -> u64 {
    60
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            reading_interval: default_reading_interval(),
        }
    }
}

impl ApplicationConfig {
    pub fn reading_interval(&self) -> Duration {
        Duration::from_secs(self.reading_interval)
    }
}

/// Device identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_name")]
    pub name: String,

    #[serde(default = "default_location")]
    pub location: String,
}

fn default_device_name() -> String {
    "npk-sensor".to_string()
}

fn default_location() -> String {
    "Unknown".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            location: default_location(),
        }
    }
}

impl NpkBridgeConfig {
    /// Session parameters for the telemetry publisher.
    ///
    /// `fallback_client_id` is used when no client id is configured.
    pub fn session_settings(&self, fallback_client_id: impl Into<String>) -> SessionSettings {
        SessionSettings {
            host: self.thingsboard.host.clone(),
            port: self.mqtt.port,
            client_id: self
                .mqtt
                .client_id
                .clone()
                .unwrap_or_else(|| fallback_client_id.into()),
            access_token: self.thingsboard.access_token.clone(),
            keepalive: Duration::from_secs(self.mqtt.keepalive),
        }
    }
}

impl BridgeConfig for NpkBridgeConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<()> {
        if self.thingsboard.host.trim().is_empty() {
            return Err(BridgeError::validation("thingsboard.host cannot be empty"));
        }

        if self.thingsboard.access_token.trim().is_empty() {
            return Err(BridgeError::validation(
                "thingsboard.access_token cannot be empty",
            ));
        }

        if self.sensor.port.is_empty() {
            return Err(BridgeError::validation("sensor.port cannot be empty"));
        }

        if !(1..=247).contains(&self.sensor.slave_id) {
            return Err(BridgeError::validation(format!(
                "sensor.slave_id must be 1-247, got {}",
                self.sensor.slave_id
            )));
        }

        if self.sensor.baudrate == 0 {
            return Err(BridgeError::validation("sensor.baudrate must be positive"));
        }

        if !self.sensor.timeout.is_finite() || self.sensor.timeout <= 0.0 {
            return Err(BridgeError::validation(format!(
                "sensor.timeout must be a positive number of seconds, got {}",
                self.sensor.timeout
            )));
        }

        if self.application.reading_interval == 0 {
            return Err(BridgeError::validation(
                "application.reading_interval must be positive",
            ));
        }

        if self.mqtt.connect_timeout == 0 {
            return Err(BridgeError::validation(
                "mqtt.connect_timeout must be positive",
            ));
        }

        self.sensor.register_map()?;

        Ok(())
    }
}
