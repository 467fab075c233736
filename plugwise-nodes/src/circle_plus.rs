//! Coordinator duties of the Circle+: network table scan and real-time clock

use chrono::{DateTime, NaiveTime, Utc};
use plugwise_core::constants::{MAX_NETWORK_NODES, MAX_TIME_DRIFT};
use plugwise_core::MacAddress;
use plugwise_protocol::{NodeResponseCode, Request};
use plugwise_session::Priority;
use std::collections::BTreeMap;

use crate::circle::clock_drift;
use crate::event::{NodeEvent, Setting};
use crate::outbound::{Actions, Outbound};

#[derive(Debug, Clone)]
struct MeshScan {
    answered: Vec<bool>,
    found: BTreeMap<MacAddress, u8>,
}

/// Coordinator state of the Circle+ node
#[derive(Debug, Clone)]
pub struct Coordinator {
    mac: MacAddress,
    scan: Option<MeshScan>,
    rtc_drift: Option<i64>,
}

impl Coordinator {
    pub fn new(mac: MacAddress) -> Self {
        Self {
            mac,
            scan: None,
            rtc_drift: None,
        }
    }

    pub fn startup(&self) -> Vec<Outbound> {
        vec![self.rtc_request()]
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_some()
    }

    pub fn rtc_drift(&self) -> Option<i64> {
        self.rtc_drift
    }

    pub fn rtc_request(&self) -> Outbound {
        Outbound::new(Request::RealTimeClockGet { mac: self.mac }, Priority::Low)
    }

    /// Read every slot of the network table
    pub fn start_scan(&mut self) -> Vec<Outbound> {
        log::debug!("Scan coordinator {} for registered nodes", self.mac);
        self.scan = Some(MeshScan {
            answered: vec![false; MAX_NETWORK_NODES as usize],
            found: BTreeMap::new(),
        });
        (0..MAX_NETWORK_NODES).map(|address| self.scan_request(address)).collect()
    }

    /// Record one network table slot
    ///
    /// An unanswered slot below the answered one is requested again. Once every slot
    /// answered, the registered nodes are published.
    pub fn on_scan(&mut self, node_mac: MacAddress, address: u8, actions: &mut Actions) {
        let Some(scan) = self.scan.as_mut() else {
            log::debug!("Scan response of coordinator {} without a scan running", self.mac);
            return;
        };
        let Some(answered) = scan.answered.get_mut(address as usize) else {
            log::warn!("Scan response for slot {} outside the network table", address);
            return;
        };
        *answered = true;
        if !node_mac.is_unset() {
            log::debug!("Registered node {} found in slot {}", node_mac, address);
            scan.found.entry(node_mac).or_insert(address);
        }

        match scan.answered.iter().position(|answered| !answered) {
            Some(missing) if (missing as u8) < address => {
                log::debug!("Resend missing scan request for slot {}", missing);
                let request = self.scan_request(missing as u8);
                actions.send(request);
            }
            Some(_) => {}
            None => {
                let mut nodes: Vec<(MacAddress, u8)> =
                    scan.found.iter().map(|(mac, slot)| (*mac, *slot)).collect();
                nodes.sort_by_key(|(_, slot)| *slot);
                log::info!("Coordinator {} lists {} registered nodes", self.mac, nodes.len());
                self.scan = None;
                actions.emit(NodeEvent::NetworkScanned {
                    coordinator: self.mac,
                    nodes,
                });
            }
        }
    }

    /// Measure the real-time clock drift
    ///
    /// # Returns
    ///
    /// A clock set request when the drift exceeds the tolerance
    pub fn on_real_time_clock(&mut self, time: NaiveTime, now: DateTime<Utc>) -> Option<Outbound> {
        let drift = clock_drift(time, now);
        log::debug!("Real-time clock of coordinator {} drifted {} seconds", self.mac, drift);
        self.rtc_drift = Some(drift);
        (drift.abs() > MAX_TIME_DRIFT).then(|| {
            log::info!(
                "Set real-time clock of coordinator {}, drifted {} seconds",
                self.mac,
                drift
            );
            Outbound::new(Request::RealTimeClockSet { mac: self.mac, time: now }, Priority::High)
        })
    }

    pub fn on_response(&mut self, code: NodeResponseCode) -> Option<NodeEvent> {
        let accepted = match code {
            NodeResponseCode::RealTimeClockAccepted => true,
            NodeResponseCode::RealTimeClockFailed => false,
            _ => return None,
        };
        Some(NodeEvent::Configured {
            mac: self.mac,
            setting: Setting::RealTimeClock,
            accepted,
        })
    }

    fn scan_request(&self, address: u8) -> Outbound {
        Outbound::new(
            Request::CirclePlusScan {
                mac: self.mac,
                address,
            },
            Priority::Medium,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn coordinator_mac() -> MacAddress {
        "000D6F0000123456".parse().unwrap()
    }

    fn node(n: u8) -> MacAddress {
        format!("000D6F00004680{:02X}", n).parse().unwrap()
    }

    #[test]
    fn test_scan_collects_registered_nodes() {
        let mut coordinator = Coordinator::new(coordinator_mac());
        let requests = coordinator.start_scan();
        assert_eq!(requests.len(), 64);
        assert!(coordinator.is_scanning());

        let mut actions = Actions::new();
        for address in 0..64u8 {
            let mac = match address {
                0 => node(1),
                5 => node(2),
                _ => MacAddress::UNSET,
            };
            coordinator.on_scan(mac, address, &mut actions);
        }
        assert!(actions.outbound.is_empty());
        assert_eq!(
            actions.events,
            vec![NodeEvent::NetworkScanned {
                coordinator: coordinator_mac(),
                nodes: vec![(node(1), 0), (node(2), 5)],
            }]
        );
        assert!(!coordinator.is_scanning());
    }

    #[test]
    fn test_scan_requests_missed_slot() {
        let mut coordinator = Coordinator::new(coordinator_mac());
        coordinator.start_scan();
        let mut actions = Actions::new();
        coordinator.on_scan(MacAddress::UNSET, 0, &mut actions);
        coordinator.on_scan(MacAddress::UNSET, 2, &mut actions);
        assert_eq!(actions.outbound.len(), 1);
        assert_eq!(
            actions.outbound[0].request,
            Request::CirclePlusScan {
                mac: coordinator_mac(),
                address: 1
            }
        );
    }

    #[test]
    fn test_real_time_clock_drift() {
        let mut coordinator = Coordinator::new(coordinator_mac());
        let now = Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap();
        assert!(coordinator
            .on_real_time_clock(NaiveTime::from_hms_opt(11, 59, 57).unwrap(), now)
            .is_none());
        let set = coordinator
            .on_real_time_clock(NaiveTime::from_hms_opt(12, 1, 0).unwrap(), now)
            .unwrap();
        assert_eq!(set.priority, Priority::High);
        assert_eq!(coordinator.rtc_drift(), Some(-60));
    }
}
