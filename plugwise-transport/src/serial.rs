//! Serial port transport implementation

use crate::error::{StickError, StickResult};
use crate::stream::{ByteStream, TransportLayer};
use async_trait::async_trait;
use plugwise_core::constants::STICK_BAUD_RATE;
use serde::Deserialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_serial::SerialStream;

/// Wrapper for SerialStream that implements Debug
struct DebugSerialStream(SerialStream);

impl fmt::Debug for DebugSerialStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialStream").finish()
    }
}

impl Deref for DebugSerialStream {
    type Target = SerialStream;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DebugSerialStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

fn default_baud_rate() -> u32 {
    STICK_BAUD_RATE
}

fn default_data_bits() -> tokio_serial::DataBits {
    tokio_serial::DataBits::Eight
}

fn default_stop_bits() -> tokio_serial::StopBits {
    tokio_serial::StopBits::One
}

fn default_parity() -> tokio_serial::Parity {
    tokio_serial::Parity::None
}

fn default_flow_control() -> tokio_serial::FlowControl {
    tokio_serial::FlowControl::None
}

/// Serial port transport layer settings
///
/// The stick always talks 8N1 without flow control; only the port and speed are
/// read from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialSettings {
    pub port_name: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(skip, default = "default_data_bits")]
    pub data_bits: tokio_serial::DataBits,
    #[serde(skip, default = "default_stop_bits")]
    pub stop_bits: tokio_serial::StopBits,
    #[serde(skip, default = "default_parity")]
    pub parity: tokio_serial::Parity,
    #[serde(skip, default = "default_flow_control")]
    pub flow_control: tokio_serial::FlowControl,
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl SerialSettings {
    /// Create new serial settings for the stick's line parameters
    pub fn new(port_name: String) -> Self {
        Self {
            port_name,
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: default_parity(),
            flow_control: default_flow_control(),
            timeout: None,
        }
    }

    /// Create serial settings with an open timeout
    pub fn with_timeout(port_name: String, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::new(port_name)
        }
    }
}

/// Serial port transport layer implementation
#[derive(Debug)]
pub struct SerialTransport {
    stream: Option<DebugSerialStream>,
    settings: SerialSettings,
    closed: bool,
}

impl SerialTransport {
    /// Create a new serial transport layer
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            stream: None,
            settings,
            closed: true,
        }
    }

    /// Create serial transport from a device path
    pub fn from_port(port_name: &str) -> Self {
        Self::new(SerialSettings::new(port_name.to_string()))
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }
}

#[async_trait]
impl TransportLayer for SerialTransport {
    async fn open(&mut self) -> StickResult<()> {
        if !self.closed {
            return Err(StickError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Connection has already been opened",
            )));
        }

        let mut builder = tokio_serial::new(&self.settings.port_name, self.settings.baud_rate)
            .data_bits(self.settings.data_bits)
            .stop_bits(self.settings.stop_bits)
            .parity(self.settings.parity)
            .flow_control(self.settings.flow_control);
        if let Some(timeout) = self.settings.timeout {
            builder = builder.timeout(timeout);
        }

        let stream = SerialStream::open(&builder).map_err(|e| {
            StickError::Connection(std::io::Error::other(format!(
                "Failed to open serial port {}: {}",
                self.settings.port_name, e
            )))
        })?;

        log::info!("Opened serial port {}", self.settings.port_name);
        self.stream = Some(DebugSerialStream(stream));
        self.closed = false;
        Ok(())
    }

    fn take_stream(&mut self) -> StickResult<Box<dyn ByteStream>> {
        match self.stream.take() {
            Some(DebugSerialStream(stream)) => Ok(Box::new(stream)),
            None => Err(StickError::Closed),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> StickResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.flush().await;
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_settings() {
        let settings = SerialSettings::new("/dev/ttyUSB0".to_string());
        assert_eq!(settings.port_name, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.data_bits, tokio_serial::DataBits::Eight);
        assert_eq!(settings.parity, tokio_serial::Parity::None);
    }

    #[test]
    fn test_take_stream_before_open() {
        let mut transport = SerialTransport::from_port("/dev/ttyUSB0");
        assert!(transport.is_closed());
        assert!(matches!(transport.take_stream(), Err(StickError::Closed)));
    }
}
