//! Stick builder
//!
//! ```rust,no_run
//! use plugwise::StickBuilder;
//!
//! # async fn run() -> plugwise::StickResult<()> {
//! let stick = StickBuilder::new()
//!     .port("/dev/ttyUSB0")
//!     .auto_accept_joins(true)
//!     .connect()
//!     .await?;
//! stick.initialize().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{StickError, StickResult};
use crate::settings::StickSettings;
use crate::stick::Stick;
use plugwise_session::SessionSettings;
use plugwise_transport::TransportSettings;
use std::time::Duration;

/// Fluent construction of [`StickSettings`]
#[derive(Debug, Clone, Default)]
pub struct StickBuilder {
    settings: StickSettings,
}

impl StickBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serial device path, or `host:port` for a stick behind a socket
    pub fn port(mut self, port: &str) -> Self {
        self.settings.port = port.to_string();
        self
    }

    /// Explicit link settings, overriding the port string
    pub fn transport(mut self, transport: TransportSettings) -> Self {
        self.settings.port = transport.port().to_string();
        self.settings.transport = Some(transport);
        self
    }

    pub fn session(mut self, session: SessionSettings) -> Self {
        self.settings.session = session;
        self
    }

    pub fn auto_accept_joins(mut self, enable: bool) -> Self {
        self.settings.auto_accept_joins = enable;
        self
    }

    /// Fixed period of the update loop
    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.settings.update_interval = Some(interval);
        self
    }

    pub fn unavailable_after(mut self, silence: Duration) -> Self {
        self.settings.unavailable_after = silence;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.settings.event_capacity = capacity;
        self
    }

    /// Validate and return the settings
    ///
    /// # Errors
    ///
    /// `StickError::InvalidData` without a port or with a zero event capacity
    pub fn build(self) -> StickResult<StickSettings> {
        if self.settings.port.is_empty() {
            return Err(StickError::InvalidData(
                "a serial port or socket address must be configured".to_string(),
            ));
        }
        if self.settings.event_capacity == 0 {
            return Err(StickError::InvalidData("event capacity must be positive".to_string()));
        }
        Ok(self.settings)
    }

    /// Build the settings and open the link
    pub async fn connect(self) -> StickResult<Stick> {
        Stick::connect(self.build()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_port() {
        assert!(matches!(StickBuilder::new().build(), Err(StickError::InvalidData(_))));
        assert!(matches!(
            StickBuilder::new().port("COM3").event_capacity(0).build(),
            Err(StickError::InvalidData(_))
        ));
    }

    #[test]
    fn test_build() {
        let settings = StickBuilder::new()
            .port("stick.local:3333")
            .auto_accept_joins(true)
            .update_interval(Duration::from_secs(10))
            .unavailable_after(Duration::from_secs(60))
            .build()
            .unwrap();
        assert_eq!(settings.port, "stick.local:3333");
        assert!(settings.auto_accept_joins);
        assert_eq!(settings.update_period(40), Duration::from_secs(10));
        assert_eq!(settings.unavailable_after, Duration::from_secs(60));
        assert!(matches!(settings.transport(), TransportSettings::Tcp(_)));
    }

    #[test]
    fn test_explicit_transport() {
        let settings = StickBuilder::new()
            .transport(TransportSettings::from_port("/dev/ttyACM0"))
            .build()
            .unwrap();
        assert_eq!(settings.port, "/dev/ttyACM0");
    }
}
