//! Stick settings

use plugwise_session::SessionSettings;
use plugwise_transport::TransportSettings;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_UNAVAILABLE_AFTER: Duration = Duration::from_secs(5 * 60);
const DEFAULT_EVENT_CAPACITY: usize = 256;
/// Base period of the adaptive update loop
const UPDATE_BASE: Duration = Duration::from_secs(5);
/// Added to the update period for every metering node
const UPDATE_PER_NODE: Duration = Duration::from_secs(1);

/// Everything needed to run a stick
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StickSettings {
    /// Serial device path or `host:port`
    pub port: String,
    /// Explicit link settings; derived from `port` when absent
    pub transport: Option<TransportSettings>,
    pub session: SessionSettings,
    /// Accept joining nodes without raising a join request event
    pub auto_accept_joins: bool,
    /// Fixed update period; adaptive to the number of metering nodes when absent
    pub update_interval: Option<Duration>,
    /// Silence after which a non-sleeping node is marked unavailable
    pub unavailable_after: Duration,
    /// Buffer of the node event channel per subscriber
    pub event_capacity: usize,
}

impl Default for StickSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            transport: None,
            session: SessionSettings::default(),
            auto_accept_joins: false,
            update_interval: None,
            unavailable_after: DEFAULT_UNAVAILABLE_AFTER,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl StickSettings {
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            ..Self::default()
        }
    }

    /// Link settings to open
    pub fn transport(&self) -> TransportSettings {
        self.transport
            .clone()
            .unwrap_or_else(|| TransportSettings::from_port(&self.port))
    }

    /// Period of the update loop with `metering_nodes` nodes to poll
    pub fn update_period(&self, metering_nodes: usize) -> Duration {
        self.update_interval
            .unwrap_or_else(|| UPDATE_BASE + UPDATE_PER_NODE * metering_nodes as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = StickSettings::new("/dev/ttyUSB0");
        assert!(!settings.auto_accept_joins);
        assert_eq!(settings.unavailable_after, Duration::from_secs(300));
        assert_eq!(settings.event_capacity, 256);
        assert!(matches!(settings.transport(), TransportSettings::Serial(_)));
        assert!(matches!(
            StickSettings::new("10.0.0.2:3333").transport(),
            TransportSettings::Tcp(_)
        ));
    }

    #[test]
    fn test_adaptive_update_period() {
        let mut settings = StickSettings::default();
        assert_eq!(settings.update_period(0), Duration::from_secs(5));
        assert_eq!(settings.update_period(12), Duration::from_secs(17));
        settings.update_interval = Some(Duration::from_secs(30));
        assert_eq!(settings.update_period(12), Duration::from_secs(30));
    }
}
