//! Request queue of sleeping end devices
//!
//! Battery nodes listen only for a short window after announcing themselves awake.
//! Requests for them wait here, one per request kind, and go out at high priority
//! when a wake reason allows it.

use chrono::{DateTime, Utc};
use plugwise_core::constants::{
    SED_CLOCK_INTERVAL, SED_CLOCK_SYNC, SED_MAINTENANCE_INTERVAL, SED_SLEEP_FOR, SED_STAY_ACTIVE,
};
use plugwise_core::MacAddress;
use plugwise_protocol::{AwakeReason, Request, RequestKind};
use plugwise_session::Priority;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::outbound::Outbound;

/// Wake and sleep schedule of a battery node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SleepConfig {
    /// Seconds to stay awake after a wake announcement
    pub stay_active: u8,
    /// Minutes to sleep between wakes
    pub sleep_for: u16,
    /// Minutes between maintenance wakes
    pub maintenance_interval: u16,
    pub clock_sync: bool,
    /// Minutes between clock synchronisations
    pub clock_interval: u16,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            stay_active: SED_STAY_ACTIVE,
            sleep_for: SED_SLEEP_FOR,
            maintenance_interval: SED_MAINTENANCE_INTERVAL,
            clock_sync: SED_CLOCK_SYNC,
            clock_interval: SED_CLOCK_INTERVAL,
        }
    }
}

impl SleepConfig {
    pub fn request(&self, mac: MacAddress) -> Request {
        Request::SleepConfig {
            mac,
            stay_active: self.stay_active,
            maintenance_interval: self.maintenance_interval,
            sleep_for: self.sleep_for,
            clock_sync: self.clock_sync,
            clock_interval: self.clock_interval,
        }
    }
}

/// Last-write-wins queue of one sleeping node
#[derive(Debug, Clone)]
pub struct SleepQueue {
    mac: MacAddress,
    queued: BTreeMap<RequestKind, Request>,
    maintenance_interval: u16,
    pending_config: Option<SleepConfig>,
    last_awake: Option<(AwakeReason, DateTime<Utc>)>,
}

impl SleepQueue {
    pub fn new(mac: MacAddress) -> Self {
        Self {
            mac,
            queued: BTreeMap::new(),
            maintenance_interval: SED_MAINTENANCE_INTERVAL,
            pending_config: None,
            last_awake: None,
        }
    }

    /// Minutes between expected maintenance wakes
    pub fn maintenance_interval(&self) -> u16 {
        self.maintenance_interval
    }

    pub fn last_awake(&self) -> Option<(AwakeReason, DateTime<Utc>)> {
        self.last_awake
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn queued(&self, kind: RequestKind) -> Option<&Request> {
        self.queued.get(&kind)
    }

    /// Hold a request until the next usable wake, replacing one of the same kind
    pub fn queue(&mut self, request: Request) {
        let kind = request.kind();
        if self.queued.insert(kind, request).is_some() {
            log::info!("Replaced queued {} request for sleeping node {}", kind, self.mac);
        } else {
            log::info!("Queued {} request for sleeping node {}", kind, self.mac);
        }
    }

    /// Queue a new sleep schedule; it takes effect once the node accepts it
    pub fn configure(&mut self, config: SleepConfig) {
        self.pending_config = Some(config);
        self.queue(config.request(self.mac));
    }

    /// Process a wake announcement
    ///
    /// # Returns
    ///
    /// The queued requests, drained, when the wake reason allows sending
    pub fn on_awake(&mut self, reason: AwakeReason, now: DateTime<Utc>) -> Vec<Outbound> {
        log::debug!("Node {} awake ({})", self.mac, reason);
        self.last_awake = Some((reason, now));
        if reason.flushes_queue() {
            self.flush()
        } else {
            Vec::new()
        }
    }

    /// A node rejoining the network is awake as well
    pub fn on_rejoin(&mut self, now: DateTime<Utc>) -> Vec<Outbound> {
        self.last_awake = Some((AwakeReason::Startup, now));
        self.flush()
    }

    /// Apply the node's answer to a sleep configuration
    pub fn on_sleep_config(&mut self, accepted: bool) {
        let config = self.pending_config.take();
        if accepted {
            if let Some(config) = config {
                self.maintenance_interval = config.maintenance_interval;
            }
            self.queued.remove(&RequestKind::SleepConfig);
            log::info!(
                "Node {} accepted sleep configuration, maintenance every {} minutes",
                self.mac,
                self.maintenance_interval
            );
        } else {
            log::warn!("Node {} refused sleep configuration", self.mac);
        }
    }

    fn flush(&mut self) -> Vec<Outbound> {
        if !self.queued.is_empty() {
            log::info!("Send {} queued requests to node {}", self.queued.len(), self.mac);
        }
        std::mem::take(&mut self.queued)
            .into_values()
            .map(|request| Outbound::new(request, Priority::High))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mac() -> MacAddress {
        "000D6F0000468F71".parse().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_last_write_wins() {
        let mut queue = SleepQueue::new(mac());
        queue.queue(Request::RelaySwitch { mac: mac(), on: true });
        queue.queue(Request::RelaySwitch { mac: mac(), on: false });
        assert_eq!(queue.len(), 1);
        let sent = queue.on_awake(AwakeReason::Maintenance, now());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].request, Request::RelaySwitch { mac: mac(), on: false });
        assert_eq!(sent[0].priority, Priority::High);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_state_wake_keeps_queue() {
        let mut queue = SleepQueue::new(mac());
        queue.queue(Request::NodeInfo { mac: mac() });
        assert!(queue.on_awake(AwakeReason::State, now()).is_empty());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.last_awake(), Some((AwakeReason::State, now())));
        assert_eq!(queue.on_awake(AwakeReason::Button, now()).len(), 1);
    }

    #[test]
    fn test_rejoin_flushes() {
        let mut queue = SleepQueue::new(mac());
        queue.queue(Request::Ping { mac: mac() });
        queue.queue(Request::NodeInfo { mac: mac() });
        assert_eq!(queue.on_rejoin(now()).len(), 2);
    }

    #[test]
    fn test_sleep_config_accepted() {
        let mut queue = SleepQueue::new(mac());
        let config = SleepConfig {
            maintenance_interval: 60,
            ..SleepConfig::default()
        };
        queue.configure(config);
        assert!(queue.queued(RequestKind::SleepConfig).is_some());
        queue.on_sleep_config(true);
        assert_eq!(queue.maintenance_interval(), 60);
        assert!(queue.queued(RequestKind::SleepConfig).is_none());
    }

    #[test]
    fn test_sleep_config_refused() {
        let mut queue = SleepQueue::new(mac());
        queue.configure(SleepConfig {
            maintenance_interval: 60,
            ..SleepConfig::default()
        });
        queue.on_sleep_config(false);
        assert_eq!(queue.maintenance_interval(), SED_MAINTENANCE_INTERVAL);
    }
}
