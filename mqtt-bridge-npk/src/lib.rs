//! NPK soil sensor to ThingsBoard bridge.
//!
//! Polls a soil-nutrient sensor over Modbus RTU and publishes the readings as
//! ThingsBoard device telemetry over MQTT.
//!
//! # Topics
//!
//! ```text
//! v1/devices/me/telemetry    {"nitrogen":120,"potassium":75}
//!                            {"ts":1700000000000,"values":{...}}
//! v1/devices/me/attributes   {"device_type":"NPK Soil Sensor",...}
//! ```
//!
//! The device access token is the MQTT username. Nitrogen, phosphorus and
//! potassium are mandatory: a cycle in which none of them could be read is
//! skipped rather than published.

pub mod attributes;
pub mod config;
pub mod modbus;
pub mod monitor;
pub mod mqtt;
pub mod publisher;
pub mod reader;
pub mod register;

pub use attributes::DeviceAttributes;
pub use config::{NpkBridgeConfig, QosLevel};
pub use monitor::{CycleOutcome, Monitor, MonitorSettings, MonitorState};
pub use publisher::{
    ATTRIBUTES_TOPIC, ConnectionError, LinkReporter, LinkState, PubSubTransport,
    PublisherStatistics, SessionSettings, TELEMETRY_TOPIC, TelemetryPublisher,
};
pub use reader::{RegisterTransport, SensorError, SensorReader, TransportError};
pub use register::{RegisterEntry, RegisterMap, RegisterSpec};
