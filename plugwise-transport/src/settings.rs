//! Transport selection

use crate::serial::{SerialSettings, SerialTransport};
use crate::stream::TransportLayer;
use crate::tcp::{TcpSettings, TcpTransport};
use serde::Deserialize;

/// Which physical link to use for the stick
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportSettings {
    Serial(SerialSettings),
    Tcp(TcpSettings),
}

impl TransportSettings {
    /// Pick the transport from a port string
    ///
    /// `host:port` selects a socket, anything else is a serial device path.
    pub fn from_port(port: &str) -> Self {
        if port.contains(':') {
            TransportSettings::Tcp(TcpSettings::new(port.to_string()))
        } else {
            TransportSettings::Serial(SerialSettings::new(port.to_string()))
        }
    }

    /// Port string the settings were built from
    pub fn port(&self) -> &str {
        match self {
            TransportSettings::Serial(settings) => &settings.port_name,
            TransportSettings::Tcp(settings) => &settings.address,
        }
    }

    /// Build an unopened transport
    pub fn build(&self) -> Box<dyn TransportLayer> {
        match self {
            TransportSettings::Serial(settings) => Box::new(SerialTransport::new(settings.clone())),
            TransportSettings::Tcp(settings) => Box::new(TcpTransport::new(settings.clone())),
        }
    }
}
