//! Session controller settings

use plugwise_core::constants::{MESSAGE_RETRY, MESSAGE_TIME_OUT, RESPONSE_TIME_OUT, SLEEP_TIME};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_COMMAND_CAPACITY: usize = 64;
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Timing and retry settings of the session controller
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Wait for the stick acknowledge before sending the next request
    pub ack_timeout: Duration,
    /// Age after which a pending request is retried or dropped
    pub response_timeout: Duration,
    /// Period of the stale request sweep
    pub sweep_interval: Duration,
    /// Retries used when a caller does not pass a budget
    pub default_retries: u8,
    /// Retries of the availability ping issued after a drop
    pub probe_retries: u8,
    /// Tick at which background loops check the running flag
    pub idle_poll: Duration,
    /// Capacity of the command channel into the controller
    pub command_capacity: usize,
    /// Session events buffered for a slow receiver before new ones are dropped
    pub event_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ack_timeout: MESSAGE_TIME_OUT,
            response_timeout: RESPONSE_TIME_OUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            default_retries: MESSAGE_RETRY,
            probe_retries: 0,
            idle_poll: SLEEP_TIME,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings with a different response timeout
    pub fn with_response_timeout(response_timeout: Duration) -> Self {
        Self {
            response_timeout,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SessionSettings::new();
        assert_eq!(settings.ack_timeout, Duration::from_secs(15));
        assert_eq!(settings.response_timeout, Duration::from_secs(60));
        assert_eq!(settings.default_retries, 2);
        assert_eq!(settings.probe_retries, 0);
        assert_eq!(settings.event_capacity, 256);
        let custom = SessionSettings::with_response_timeout(Duration::from_secs(5));
        assert_eq!(custom.response_timeout, Duration::from_secs(5));
        assert_eq!(custom.sweep_interval, settings.sweep_interval);
    }
}
