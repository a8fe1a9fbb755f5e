//! Modbus RTU transport over a serial port.

use std::time::Duration;

use async_trait::async_trait;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tokio_serial::SerialPortBuilder;
use tracing::debug;

use crate::config::SensorConfig;
use crate::reader::{RegisterTransport, TransportError};
use crate::register::decode_register;

/// Single-slave RTU client. Frames are 8N1; reads use function code 0x03.
///
/// After a timeout or a framing error the serial port is reopened before the
/// next transaction, so a late or partial reply is never read as the answer
/// to the following request.
pub struct ModbusRtuTransport {
    ctx: Option<Context>,
    builder: SerialPortBuilder,
    port: String,
    slave: Slave,
    timeout: Duration,
    closed: bool,
}

/// Whether the stream may hold bytes from an unfinished reply.
fn leaves_stale_frame(error: &TransportError) -> bool {
    matches!(error, TransportError::Timeout(_) | TransportError::Io(_))
}

impl ModbusRtuTransport {
    /// Open the serial port and attach to the configured slave.
    pub fn open(config: &SensorConfig) -> Result<Self, TransportError> {
        let timeout = config.timeout();
        let builder = tokio_serial::new(&config.port, config.baudrate)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .data_bits(tokio_serial::DataBits::Eight)
            .timeout(timeout);

        let mut transport = Self {
            ctx: None,
            builder,
            port: config.port.clone(),
            slave: Slave(config.slave_id),
            timeout,
            closed: false,
        };
        transport.context()?;
        Ok(transport)
    }

    /// The attached context, reopening the port if it was dropped.
    fn context(&mut self) -> Result<&mut Context, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        if self.ctx.is_none() {
            let serial = tokio_serial::SerialStream::open(&self.builder).map_err(|e| {
                TransportError::Io(format!("Serial open failed for {}: {}", self.port, e))
            })?;
            self.ctx = Some(rtu::attach_slave(serial, self.slave));
        }

        self.ctx.as_mut().ok_or(TransportError::Closed)
    }

    async fn read_holding(&mut self, address: u16) -> Result<u16, TransportError> {
        let timeout = self.timeout;
        let ctx = self.context()?;

        let words = tokio::time::timeout(timeout, ctx.read_holding_registers(address, 1))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| TransportError::Io(e.to_string()))?
            .map_err(|e| TransportError::Exception(format!("{:?}", e)))?;

        words.first().copied().ok_or_else(|| {
            TransportError::Protocol(format!("empty response for register {:#06x}", address))
        })
    }
}

#[async_trait]
impl RegisterTransport for ModbusRtuTransport {
    async fn read_register(
        &mut self,
        address: u16,
        decimals: u8,
        signed: bool,
    ) -> Result<f64, TransportError> {
        match self.read_holding(address).await {
            Ok(raw) => Ok(decode_register(raw, decimals, signed)),
            Err(e) => {
                if leaves_stale_frame(&e) && self.ctx.take().is_some() {
                    // The port is opened exclusively; dropping the context releases it
                    debug!(port = %self.port, error = %e, "Serial port will be reopened");
                }
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        match self.ctx.take() {
            Some(mut ctx) => ctx
                .disconnect()
                .await
                .map_err(|e| TransportError::Io(e.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor_config(port: &str) -> SensorConfig {
        let mut config: SensorConfig = serde_json::from_str("{}").unwrap();
        config.port = port.to_string();
        config
    }

    #[test]
    fn test_stale_frame_errors() {
        assert!(leaves_stale_frame(&TransportError::Timeout(Duration::from_secs(1))));
        assert!(leaves_stale_frame(&TransportError::Io("invalid CRC".into())));
        assert!(!leaves_stale_frame(&TransportError::Exception("IllegalDataAddress".into())));
        assert!(!leaves_stale_frame(&TransportError::Protocol("empty".into())));
        assert!(!leaves_stale_frame(&TransportError::Closed));
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let port = "/dev/npk-does-not-exist";
        match ModbusRtuTransport::open(&sensor_config(port)) {
            Err(TransportError::Io(message)) => assert!(message.contains(port)),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }
}
