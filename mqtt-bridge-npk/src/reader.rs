//! Sensor reading over a register transport.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{Span, debug, warn};

use soilsight_common::{ChannelReading, ReadingBatch};

use crate::register::{RegisterEntry, RegisterMap};

/// Error type for a single register transaction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("No response within {0:?}")]
    Timeout(Duration),
    #[error("Device exception: {0}")]
    Exception(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Transport closed")]
    Closed,
}

/// Error type for sensor operations.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Channel '{0}' has no register mapping")]
    UnknownChannel(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Sensor connection is closed")]
    Closed,
}

/// Something that can read one holding register and scale it.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Read a single register at `address`, apply sign and decimal scaling.
    async fn read_register(
        &mut self,
        address: u16,
        decimals: u8,
        signed: bool,
    ) -> Result<f64, TransportError>;

    /// Release the underlying port.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Reads named channels from an NPK sensor.
///
/// Transactions are serialized: the field bus only ever carries one
/// outstanding request.
pub struct SensorReader<T> {
    transport: Mutex<Option<T>>,
    registers: RegisterMap,
    span: Span,
}

impl<T: RegisterTransport> SensorReader<T> {
    pub fn new(transport: T, registers: RegisterMap, span: Span) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
            registers,
            span,
        }
    }

    pub fn registers(&self) -> &RegisterMap {
        &self.registers
    }

    /// Read one channel by name.
    pub async fn read_channel(&self, name: &str) -> Result<f64, SensorError> {
        let entry = self
            .registers
            .get(name)
            .ok_or_else(|| SensorError::UnknownChannel(name.to_string()))?;

        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(SensorError::Closed)?;
        Self::read_entry(transport, entry).await
    }

    async fn read_entry(transport: &mut T, entry: &RegisterEntry) -> Result<f64, SensorError> {
        transport
            .read_register(entry.address, entry.decimals, entry.signed)
            .await
            .map_err(|e| match e {
                TransportError::Closed => SensorError::Closed,
                other => SensorError::Transport(other),
            })
    }

    /// Read every mapped channel, in map order.
    ///
    /// Channels that fail to read are logged and left out, so the batch never
    /// holds more entries than the map. Only a closed transport is reported
    /// as an error.
    pub async fn read_all(&self) -> Result<ReadingBatch, SensorError> {
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(SensorError::Closed)?;
        let mut batch = ReadingBatch::new();

        for entry in self.registers.iter() {
            match Self::read_entry(transport, entry).await {
                Ok(value) => batch.push(
                    ChannelReading::new(entry.channel.as_str(), Some(value))
                        .with_decimals(entry.decimals),
                ),
                Err(SensorError::Closed) => return Err(SensorError::Closed),
                Err(e) => {
                    warn!(
                        parent: &self.span,
                        channel = %entry.channel,
                        mandatory = entry.is_mandatory(),
                        error = %e,
                        "Failed to read channel"
                    );
                }
            }
        }

        debug!(parent: &self.span, channels = batch.len(), "Sensor poll complete");
        Ok(batch)
    }

    /// Check that the sensor answers a single nitrogen read.
    pub async fn test_connection(&self) -> bool {
        match self.read_channel(soilsight_common::NITROGEN).await {
            Ok(value) => {
                debug!(parent: &self.span, nitrogen = value, "Sensor responded");
                true
            }
            Err(e) => {
                warn!(parent: &self.span, error = %e, "Sensor connection test failed");
                false
            }
        }
    }

    /// Close the transport. Idempotent.
    pub async fn close(&self) {
        let transport = self.transport.lock().await.take();
        if let Some(mut transport) = transport {
            if let Err(e) = transport.close().await {
                warn!(parent: &self.span, error = %e, "Error while closing sensor transport");
            }
            debug!(parent: &self.span, "Sensor transport closed");
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.transport.lock().await.is_none()
    }
}
