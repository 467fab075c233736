//! Relay and power meter of Circle type nodes

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use plugwise_core::constants::MAX_TIME_DRIFT;
use plugwise_core::MacAddress;
use plugwise_energy::{
    correct_pulses, Calibration, CounterKind, Direction, EnergyCollection, LogPosition,
    PulseInterval, PulseLog,
};
use plugwise_protocol::{LogSlot, NodeResponseCode, Request};
use plugwise_session::Priority;
use std::collections::HashMap;

use crate::capability::{Meterable, Power, Switchable};
use crate::error::{StickError, StickResult};
use crate::event::{NodeEvent, Setting};
use crate::outbound::{Actions, Outbound};

const DAY_IN_SECONDS: i64 = 86_400;
/// Largest log interval a node accepts, in minutes
const MAX_LOG_INTERVAL: u16 = 1440;
/// Number of addresses read back after discovery
const INITIAL_LOG_ADDRESSES: i32 = 11;
/// Minutes node info is trusted for the initial log read
const INFO_FRESH_MINUTES: i64 = 1;
/// Minutes after which node info is refreshed before reading logs
const INFO_STALE_MINUTES: i64 = 15;
/// Minutes an outstanding log request is not repeated
const LOG_REQUEST_BACKOFF_MINUTES: i64 = 1;

/// Seconds the node clock runs behind `now`, negative when it runs ahead
///
/// Nodes report only the time of day, so the difference is taken modulo one day
/// and folded into the nearest half day.
pub fn clock_drift(node_time: NaiveTime, now: DateTime<Utc>) -> i64 {
    let local = now.time().num_seconds_from_midnight() as i64;
    let node = node_time.num_seconds_from_midnight() as i64;
    let drift = (local - node).rem_euclid(DAY_IN_SECONDS);
    if drift > DAY_IN_SECONDS / 2 {
        drift - DAY_IN_SECONDS
    } else {
        drift
    }
}

/// Relay of a switching node
#[derive(Debug, Clone)]
pub struct Relay {
    mac: MacAddress,
    state: Option<bool>,
    initial_state: Option<bool>,
}

impl Relay {
    pub fn new(mac: MacAddress) -> Self {
        Self {
            mac,
            state: None,
            initial_state: None,
        }
    }

    /// Request to switch the relay
    pub fn switch(&self, on: bool) -> Outbound {
        Outbound::new(self.switch_request(self.mac, on), Priority::High)
    }

    /// Fold a relay acknowledge into the state
    ///
    /// # Returns
    ///
    /// An event only when the state actually changed
    pub fn on_response(&mut self, code: NodeResponseCode) -> Option<NodeEvent> {
        match code {
            NodeResponseCode::RelaySwitchedOn => self.set(true),
            NodeResponseCode::RelaySwitchedOff => self.set(false),
            NodeResponseCode::RelaySwitchFailed => {
                log::warn!("Relay of node {} failed to switch", self.mac);
                None
            }
            _ => None,
        }
    }

    /// State reported by a node info response
    pub fn on_info(&mut self, on: bool) -> Option<NodeEvent> {
        self.set(on)
    }

    pub fn on_initial_state(&mut self, relay: bool) -> NodeEvent {
        self.initial_state = Some(relay);
        NodeEvent::Configured {
            mac: self.mac,
            setting: Setting::InitialRelayState,
            accepted: true,
        }
    }

    fn set(&mut self, on: bool) -> Option<NodeEvent> {
        if self.state == Some(on) {
            return None;
        }
        log::debug!("Relay of node {} switched {}", self.mac, if on { "on" } else { "off" });
        self.state = Some(on);
        Some(NodeEvent::RelayChanged { mac: self.mac, on })
    }
}

impl Switchable for Relay {
    fn relay(&self) -> Option<bool> {
        self.state
    }

    fn initial_relay_state(&self) -> Option<bool> {
        self.initial_state
    }
}

/// Power meter and energy history of a metering node
#[derive(Debug, Clone)]
pub struct Meter {
    mac: MacAddress,
    collection: EnergyCollection,
    power: Option<Power>,
    info_received: Option<DateTime<Utc>>,
    info_log_address: Option<i32>,
    clock_drift: Option<i64>,
    requested_interval: Option<(u16, u16)>,
    intervals: [Option<i64>; 2],
    log_requests: HashMap<i32, DateTime<Utc>>,
}

impl Meter {
    pub fn new(mac: MacAddress, now: DateTime<Utc>) -> Self {
        Self {
            mac,
            collection: EnergyCollection::with_all_counters(now),
            power: None,
            info_received: None,
            info_log_address: None,
            clock_drift: None,
            requested_interval: None,
            intervals: [None, None],
            log_requests: HashMap::new(),
        }
    }

    /// Requests issued right after discovery
    pub fn startup(&self) -> Vec<Outbound> {
        vec![
            Outbound::new(Request::Calibration { mac: self.mac }, Priority::Medium),
            self.clock_request(),
        ]
    }

    /// Last measured drift of the node clock in seconds
    pub fn clock_drift(&self) -> Option<i64> {
        self.clock_drift
    }

    pub fn clock_request(&self) -> Outbound {
        Outbound::new(Request::ClockGet { mac: self.mac }, Priority::Low)
    }

    /// Power usage request, or the calibration it depends on
    pub fn power_request(&self) -> Outbound {
        if self.collection.calibration().is_none() {
            Outbound::new(Request::Calibration { mac: self.mac }, Priority::Medium)
        } else {
            Outbound::new(Request::PowerUsage { mac: self.mac }, Priority::Medium)
        }
    }

    /// Request new log intervals
    ///
    /// # Errors
    ///
    /// `StickError::InvalidData` for an interval outside 1..=1440 minutes
    pub fn measure_interval(&mut self, consumption: u16, production: u16) -> StickResult<Outbound> {
        for minutes in [consumption, production] {
            if !(1..=MAX_LOG_INTERVAL).contains(&minutes) {
                return Err(StickError::InvalidData(format!(
                    "log interval {} outside 1..={} minutes",
                    minutes, MAX_LOG_INTERVAL
                )));
            }
        }
        self.requested_interval = Some((consumption, production));
        Ok(Outbound::new(
            Request::MeasureInterval {
                mac: self.mac,
                consumption,
                production,
            },
            Priority::Medium,
        ))
    }

    pub fn on_calibration(&mut self, gain_a: f32, gain_b: f32, off_tot: f32, off_noise: f32) {
        let calibration =
            Calibration::new(gain_a as f64, gain_b as f64, off_noise as f64, off_tot as f64);
        log::debug!("Calibration of node {}: {:?}", self.mac, calibration);
        self.collection.set_calibration(calibration);
    }

    pub fn on_info(&mut self, last_log_address: i32, now: DateTime<Utc>) {
        self.info_received = Some(now);
        self.info_log_address = Some(last_log_address);
    }

    /// Process a power usage response
    #[allow(clippy::too_many_arguments)]
    pub fn on_power_usage(
        &mut self,
        pulse_1s: i64,
        pulse_8s: i64,
        consumed: i64,
        produced: i64,
        nanosecond_offset: i64,
        now: DateTime<Utc>,
        actions: &mut Actions,
    ) {
        let Some(calibration) = self.collection.calibration().copied() else {
            log::warn!("Power usage of node {} received before its calibration", self.mac);
            actions.send(Outbound::new(Request::Calibration { mac: self.mac }, Priority::Medium));
            return;
        };
        let power = Power {
            last_second: calibration.power_watts(correct_pulses(pulse_1s, nanosecond_offset), 1.0),
            last_eight_seconds: calibration
                .power_watts(correct_pulses(pulse_8s, nanosecond_offset), 8.0),
        };
        if self.power != Some(power) {
            self.power = Some(power);
            actions.emit(NodeEvent::PowerChanged {
                mac: self.mac,
                last_second: power.last_second,
                last_eight_seconds: power.last_eight_seconds,
            });
        }

        let before = self.energies();
        self.collection.update_pulses(PulseInterval {
            timestamp: now,
            consumption: consumed,
            production: produced,
        });
        self.emit_changes(before, actions);
    }

    /// Store the dated slots of one log address
    pub fn on_energy_logs(
        &mut self,
        slots: &[LogSlot; 4],
        log_address: i32,
        actions: &mut Actions,
    ) {
        self.log_requests.remove(&log_address);
        let before = self.energies();
        for (slot, entry) in slots.iter().enumerate() {
            let Some(timestamp) = entry.timestamp else {
                continue;
            };
            match LogPosition::new(log_address, slot as u8) {
                Ok(position) => {
                    self.collection.add_log(PulseLog {
                        position,
                        timestamp,
                        pulses: entry.pulses,
                    });
                }
                Err(err) => log::warn!("Log of node {} skipped: {}", self.mac, err),
            }
        }
        self.emit_changes(before, actions);
    }

    /// Measure the clock drift from a clock response
    ///
    /// # Returns
    ///
    /// A clock set request when the drift exceeds the tolerance
    pub fn on_clock(&mut self, time: NaiveTime, now: DateTime<Utc>) -> Option<Outbound> {
        let drift = clock_drift(time, now);
        log::debug!("Clock of node {} drifted {} seconds", self.mac, drift);
        self.clock_drift = Some(drift);
        if drift.abs() > MAX_TIME_DRIFT {
            log::info!("Set clock of node {}, drifted {} seconds", self.mac, drift);
            Some(Outbound::new(Request::ClockSet { mac: self.mac, time: now }, Priority::High))
        } else {
            None
        }
    }

    pub fn on_log_interval_accepted(&mut self, actions: &mut Actions) {
        if let Some((consumption, production)) = self.requested_interval.take() {
            self.collection
                .set_interval_minutes(Direction::Consumption, consumption as i64);
            self.collection
                .set_interval_minutes(Direction::Production, production as i64);
        }
        actions.emit(NodeEvent::Configured {
            mac: self.mac,
            setting: Setting::LogInterval,
            accepted: true,
        });
        self.emit_interval_change(actions);
    }

    /// Log addresses to read during an update cycle
    ///
    /// Missing addresses reported by the collection when it knows enough, otherwise
    /// the most recent addresses counting down from the node info, or a node info
    /// request when that is outdated.
    pub fn energy_log_requests(&mut self, now: DateTime<Utc>) -> Vec<Outbound> {
        let fresh = Duration::minutes(INFO_FRESH_MINUTES);
        let stale = Duration::minutes(INFO_STALE_MINUTES);
        let addresses = match self.collection.missing_log_addresses(now) {
            Some(missing) => missing,
            None => match (self.info_received, self.info_log_address) {
                (Some(received), Some(last)) if now - received < fresh => {
                    (last - INITIAL_LOG_ADDRESSES + 1..=last).rev().collect()
                }
                (Some(received), _) if now - received <= stale => Vec::new(),
                _ => {
                    let info = Request::NodeInfo { mac: self.mac };
                    return vec![Outbound::new(info, Priority::Low)];
                }
            },
        };
        let backoff = Duration::minutes(LOG_REQUEST_BACKOFF_MINUTES);
        self.log_requests.retain(|_, requested| now - *requested < backoff);
        let mut outbound = Vec::new();
        for address in addresses {
            if address < 0
                || self.collection.is_collected(address)
                || self.log_requests.contains_key(&address)
            {
                continue;
            }
            self.log_requests.insert(address, now);
            outbound.push(Outbound::new(
                Request::EnergyLogs {
                    mac: self.mac,
                    log_address: address,
                },
                Priority::Low,
            ));
        }
        outbound
    }

    fn energies(&self) -> Vec<(CounterKind, Option<f64>)> {
        self.collection
            .counters()
            .map(|counter| (counter.kind(), counter.energy()))
            .collect()
    }

    fn emit_changes(&mut self, before: Vec<(CounterKind, Option<f64>)>, actions: &mut Actions) {
        for (counter, previous) in before {
            if let Some(kwh) = self.collection.energy(counter) {
                if previous != Some(kwh) {
                    actions.emit(NodeEvent::EnergyChanged {
                        mac: self.mac,
                        counter,
                        kwh,
                    });
                }
            }
        }
        self.emit_interval_change(actions);
    }

    fn emit_interval_change(&mut self, actions: &mut Actions) {
        let current = [
            self.collection.interval_minutes(Direction::Consumption),
            self.collection.interval_minutes(Direction::Production),
        ];
        if current != self.intervals {
            self.intervals = current;
            actions.emit(NodeEvent::IntervalChanged {
                mac: self.mac,
                consumption: current[0],
                production: current[1],
            });
        }
    }
}

impl Meterable for Meter {
    fn calibration(&self) -> Option<&Calibration> {
        self.collection.calibration()
    }

    fn power(&self) -> Option<Power> {
        self.power
    }

    fn collection(&self) -> &EnergyCollection {
        &self.collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mac() -> MacAddress {
        "000D6F0000468F71".parse().unwrap()
    }

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, hour, minute, second).unwrap()
    }

    #[test]
    fn test_clock_drift() {
        let now = at(12, 0, 10);
        assert_eq!(clock_drift(NaiveTime::from_hms_opt(12, 0, 0).unwrap(), now), 10);
        assert_eq!(clock_drift(NaiveTime::from_hms_opt(12, 0, 30).unwrap(), now), -20);
        // node already past midnight
        let late = Utc.with_ymd_and_hms(2024, 3, 6, 23, 59, 55).unwrap();
        assert_eq!(clock_drift(NaiveTime::from_hms_opt(0, 0, 5).unwrap(), late), -10);
    }

    #[test]
    fn test_relay_transitions_emit_once() {
        let mut relay = Relay::new(mac());
        assert_eq!(
            relay.on_response(NodeResponseCode::RelaySwitchedOn),
            Some(NodeEvent::RelayChanged { mac: mac(), on: true })
        );
        assert_eq!(relay.on_response(NodeResponseCode::RelaySwitchedOn), None);
        assert_eq!(relay.on_info(true), None);
        assert_eq!(relay.on_response(NodeResponseCode::RelaySwitchFailed), None);
        assert_eq!(relay.relay(), Some(true));
        assert!(relay.on_response(NodeResponseCode::RelaySwitchedOff).is_some());
        assert_eq!(relay.relay(), Some(false));
    }

    #[test]
    fn test_switch_is_high_priority() {
        let relay = Relay::new(mac());
        let outbound = relay.switch(true);
        assert_eq!(outbound.priority, Priority::High);
        assert_eq!(outbound.request, Request::RelaySwitch { mac: mac(), on: true });
    }

    #[test]
    fn test_power_before_calibration_requests_calibration() {
        let mut meter = Meter::new(mac(), at(12, 0, 0));
        assert_eq!(meter.power_request().request, Request::Calibration { mac: mac() });
        let mut actions = Actions::new();
        meter.on_power_usage(100, 800, 5000, 0, 0, at(12, 0, 0), &mut actions);
        assert_eq!(actions.outbound.len(), 1);
        assert_eq!(actions.outbound[0].request, Request::Calibration { mac: mac() });
        assert!(actions.events.is_empty());
        assert!(meter.power().is_none());
    }

    #[test]
    fn test_power_after_calibration() {
        let mut meter = Meter::new(mac(), at(12, 0, 0));
        meter.on_calibration(1.0, 0.0, 0.0, 0.0);
        assert_eq!(meter.power_request().request, Request::PowerUsage { mac: mac() });
        let mut actions = Actions::new();
        meter.on_power_usage(469, 3752, 5000, 0, 0, at(12, 0, 0), &mut actions);
        let power = meter.power().unwrap();
        assert!((power.last_second - 1000.0).abs() < 1.0);
        assert!((power.last_eight_seconds - 1000.0).abs() < 1.0);
        assert!(matches!(actions.events[0], NodeEvent::PowerChanged { .. }));

        // same reading again is not an event
        let mut again = Actions::new();
        meter.on_power_usage(469, 3752, 5000, 0, 0, at(12, 0, 5), &mut again);
        assert!(!again
            .events
            .iter()
            .any(|event| matches!(event, NodeEvent::PowerChanged { .. })));
    }

    #[test]
    fn test_clock_set_beyond_drift() {
        let mut meter = Meter::new(mac(), at(12, 0, 0));
        let now = at(12, 0, 4);
        assert!(meter.on_clock(NaiveTime::from_hms_opt(12, 0, 0).unwrap(), now).is_none());
        let set = meter
            .on_clock(NaiveTime::from_hms_opt(11, 59, 0).unwrap(), now)
            .unwrap();
        assert_eq!(set.request, Request::ClockSet { mac: mac(), time: now });
        assert_eq!(set.priority, Priority::High);
        assert_eq!(meter.clock_drift(), Some(64));
    }

    #[test]
    fn test_measure_interval_range() {
        let mut meter = Meter::new(mac(), at(12, 0, 0));
        assert!(meter.measure_interval(0, 60).is_err());
        assert!(meter.measure_interval(60, 1441).is_err());
        assert!(meter.measure_interval(15, 60).is_ok());
        let mut actions = Actions::new();
        meter.on_log_interval_accepted(&mut actions);
        assert_eq!(meter.collection().interval_minutes(Direction::Consumption), Some(15));
        assert!(actions.events.contains(&NodeEvent::IntervalChanged {
            mac: mac(),
            consumption: Some(15),
            production: Some(60),
        }));
    }

    #[test]
    fn test_initial_log_requests_follow_info() {
        let now = at(12, 0, 0);
        let mut meter = Meter::new(mac(), now);
        // no info yet
        let first = meter.energy_log_requests(now);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].request, Request::NodeInfo { mac: mac() });

        meter.on_info(100, now);
        let requests = meter.energy_log_requests(now + Duration::seconds(10));
        let addresses: Vec<i32> = requests
            .iter()
            .filter_map(|outbound| match outbound.request {
                Request::EnergyLogs { log_address, .. } => Some(log_address),
                _ => None,
            })
            .collect();
        assert_eq!(addresses, (90..=100).rev().collect::<Vec<_>>());
        assert!(requests.iter().all(|outbound| outbound.priority == Priority::Low));

        // outstanding requests are not repeated right away
        assert!(meter.energy_log_requests(now + Duration::seconds(20)).is_empty());
        // info between fresh and stale asks for nothing
        assert!(meter.energy_log_requests(now + Duration::minutes(5)).is_empty());
        // stale info is refreshed first
        let stale = meter.energy_log_requests(now + Duration::minutes(16));
        assert_eq!(stale[0].request, Request::NodeInfo { mac: mac() });
    }

    #[test]
    fn test_energy_logs_are_stored() {
        let now = at(12, 0, 0);
        let mut meter = Meter::new(mac(), now);
        let slot = |hour: u32, pulses: i64| LogSlot {
            timestamp: Some(at(hour, 0, 0)),
            pulses,
        };
        let slots = [
            slot(8, 1000),
            slot(9, 1100),
            LogSlot {
                timestamp: None,
                pulses: 0,
            },
            slot(10, 1200),
        ];
        let mut actions = Actions::new();
        meter.on_energy_logs(&slots, 42, &mut actions);
        assert_eq!(meter.collection().log_count(), 3);
        assert!(meter.collection().log(LogPosition::new(42, 2).unwrap()).is_none());
        assert!(meter.collection().log(LogPosition::new(42, 3).unwrap()).is_some());
    }
}
