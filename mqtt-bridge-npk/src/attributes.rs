//! Device attributes reported once after connecting.

use serde::{Deserialize, Serialize};

use crate::config::NpkBridgeConfig;
use crate::register::RegisterMap;

pub const DEVICE_TYPE: &str = "NPK Soil Sensor";

/// Client-side attributes shown on the ThingsBoard device page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAttributes {
    pub device_type: String,
    pub firmware_version: String,
    pub model: String,
    pub location: String,
    /// Seconds between readings.
    pub reading_interval: u64,
    pub device_name: String,
    /// Channels this device reports, in publish order.
    pub channels: Vec<String>,
}

impl DeviceAttributes {
    pub fn from_config(config: &NpkBridgeConfig, registers: &RegisterMap) -> Self {
        Self {
            device_type: DEVICE_TYPE.to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            model: config.sensor.model.clone(),
            location: config.device.location.clone(),
            reading_interval: config.application.reading_interval,
            device_name: config.device.name.clone(),
            channels: registers.channels(),
        }
    }
}
