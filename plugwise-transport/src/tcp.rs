//! TCP transport implementation
//!
//! Used for sticks exposed through a serial-to-network bridge.

use crate::error::{StickError, StickResult};
use crate::stream::{ByteStream, TransportLayer};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Wrapper for TcpStream that implements Debug
struct DebugTcpStream(TcpStream);

impl fmt::Debug for DebugTcpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpStream").finish()
    }
}

impl Deref for DebugTcpStream {
    type Target = TcpStream;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DebugTcpStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

fn default_connect_timeout() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

/// TCP transport layer settings
#[derive(Debug, Clone, Deserialize)]
pub struct TcpSettings {
    /// `host:port`, resolved on open
    pub address: String,
    #[serde(default = "default_connect_timeout")]
    pub timeout: Option<Duration>,
}

impl TcpSettings {
    /// Create new TCP settings
    pub fn new(address: String) -> Self {
        Self {
            address,
            timeout: default_connect_timeout(),
        }
    }

    /// Create TCP settings with timeout
    pub fn with_timeout(address: String, timeout: Duration) -> Self {
        Self {
            address,
            timeout: Some(timeout),
        }
    }
}

/// TCP transport layer implementation
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<DebugTcpStream>,
    settings: TcpSettings,
    closed: bool,
}

impl TcpTransport {
    /// Create a new TCP transport layer
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            stream: None,
            settings,
            closed: true,
        }
    }

    /// Create TCP transport from address string
    pub fn from_address(address: &str) -> StickResult<Self> {
        if !address.contains(':') {
            return Err(StickError::InvalidData(format!(
                "Invalid TCP address '{}', expected host:port",
                address
            )));
        }
        Ok(Self::new(TcpSettings::new(address.to_string())))
    }

    pub fn settings(&self) -> &TcpSettings {
        &self.settings
    }
}

#[async_trait]
impl TransportLayer for TcpTransport {
    async fn open(&mut self) -> StickResult<()> {
        if !self.closed {
            return Err(StickError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Connection has already been opened",
            )));
        }

        let address = self.settings.address.as_str();
        let stream = if let Some(timeout) = self.settings.timeout {
            tokio::time::timeout(timeout, TcpStream::connect(address))
                .await
                .map_err(|_| StickError::Timeout)?
                .map_err(StickError::Connection)?
        } else {
            TcpStream::connect(address)
                .await
                .map_err(StickError::Connection)?
        };
        stream.set_nodelay(true).map_err(StickError::Connection)?;

        log::info!("Connected to stick at {}", address);
        self.stream = Some(DebugTcpStream(stream));
        self.closed = false;
        Ok(())
    }

    fn take_stream(&mut self) -> StickResult<Box<dyn ByteStream>> {
        match self.stream.take() {
            Some(DebugTcpStream(stream)) => Ok(Box::new(stream)),
            None => Err(StickError::Closed),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> StickResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_tcp_settings() {
        let settings = TcpSettings::new("192.168.1.20:3333".to_string());
        assert_eq!(settings.address, "192.168.1.20:3333");
        assert!(settings.timeout.is_some());
        assert!(TcpTransport::from_address("/dev/ttyUSB0").is_err());
    }

    #[tokio::test]
    async fn test_tcp_open_and_take_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut transport = TcpTransport::from_address(&address).unwrap();
        transport.open().await.unwrap();
        assert!(!transport.is_closed());
        assert!(transport.open().await.is_err());

        let mut stream = transport.take_stream().unwrap();
        stream.write_all(b"\x05\x05\x03\x03").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"\x05\x05\x03\x03");
        assert!(transport.take_stream().is_err());

        transport.close().await.unwrap();
        assert!(transport.is_closed());
    }
}
