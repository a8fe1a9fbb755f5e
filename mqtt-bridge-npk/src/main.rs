//! NPK soil sensor to ThingsBoard bridge.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info_span;

use mqtt_bridge_npk::modbus::ModbusRtuTransport;
use mqtt_bridge_npk::mqtt::MqttTransport;
use mqtt_bridge_npk::publisher::default_client_id;
use mqtt_bridge_npk::{
    DeviceAttributes, Monitor, MonitorSettings, NpkBridgeConfig, SensorReader, TelemetryPublisher,
};
use soilsight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeError, BridgeRunner};

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("config/npk.json5");

    let config = NpkBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let runner = BridgeRunner::new_with_args("mqtt-bridge-npk", config, Some(&args))?;
    let dry_run = runner.is_dry_run();

    runner
        .run(|config, mut shutdown| async move {
            let registers = config.sensor.register_map()?;
            let attributes = DeviceAttributes::from_config(&config, &registers);

            let sensor_span = info_span!(
                "sensor",
                port = %config.sensor.port,
                slave = config.sensor.slave_id
            );
            let transport = ModbusRtuTransport::open(&config.sensor)
                .map_err(|e| BridgeError::initialization(e.to_string()))?;
            let sensor = Arc::new(SensorReader::new(transport, registers, sensor_span));

            let publisher = if dry_run {
                None
            } else {
                let settings = config.session_settings(default_client_id());
                let span =
                    info_span!("mqtt", host = %settings.host, client_id = %settings.client_id);
                Some(TelemetryPublisher::new(
                    MqttTransport::new(span.clone()),
                    settings,
                    config.mqtt.qos,
                    span,
                ))
            };

            let mut monitor = Monitor::new(
                sensor,
                publisher,
                MonitorSettings::from_config(&config),
                info_span!("monitor", device = %config.device.name),
            );

            monitor.initialize(&attributes, &mut shutdown).await?;
            monitor.run(shutdown).await.map(|_| ())
        })
        .await?;

    Ok(())
}
