//! Flat node state machine
//!
//! A node starts undiscovered, is discovering while its info request is in flight
//! and becomes known once the info response names its type. The type selects the
//! components the node carries; responses are routed to them from one match.

use chrono::{DateTime, Duration, Utc};
use plugwise_core::{hardware_model, MacAddress, NodeType};
use plugwise_protocol::{
    NodeInfoData, NodeResponseCode, Request, RequestKind, Response, ResponseBody,
};
use plugwise_session::Priority;

use crate::capability::{Meterable, Reading, Sensing, Switchable};
use crate::circle::{Meter, Relay};
use crate::circle_plus::Coordinator;
use crate::error::{StickError, StickResult};
use crate::event::{NodeEvent, Setting};
use crate::outbound::{Actions, Outbound};
use crate::scan::{Motion, ScanConfig};
use crate::sed::{SleepConfig, SleepQueue};
use crate::sense::Climate;
use crate::switch::ButtonSwitch;

/// Discovery and availability state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Undiscovered,
    /// Info request outstanding since
    Discovering { since: DateTime<Utc> },
    Known { available: bool },
}

/// Link quality from the last ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingStats {
    pub rssi_in: i8,
    pub rssi_out: i8,
    pub round_trip_ms: u16,
}

/// One mesh node
#[derive(Debug, Clone)]
pub struct Node {
    mac: MacAddress,
    address: Option<u8>,
    state: NodeState,
    node_type: Option<NodeType>,
    last_update: Option<DateTime<Utc>>,
    hardware_version: Option<String>,
    firmware: Option<DateTime<Utc>>,
    features: Option<String>,
    ping: Option<PingStats>,
    relay: Option<Relay>,
    meter: Option<Meter>,
    coordinator: Option<Coordinator>,
    sleep: Option<SleepQueue>,
    motion: Option<Motion>,
    climate: Option<Climate>,
    switch: Option<ButtonSwitch>,
}

impl Node {
    pub fn new(mac: MacAddress) -> Self {
        Self {
            mac,
            address: None,
            state: NodeState::Undiscovered,
            node_type: None,
            last_update: None,
            hardware_version: None,
            firmware: None,
            features: None,
            ping: None,
            relay: None,
            meter: None,
            coordinator: None,
            sleep: None,
            motion: None,
            climate: None,
            switch: None,
        }
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    /// Slot in the coordinator's network table
    pub fn address(&self) -> Option<u8> {
        self.address
    }

    pub fn set_address(&mut self, address: u8) {
        self.address = Some(address);
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn node_type(&self) -> Option<NodeType> {
        self.node_type
    }

    pub fn is_known(&self) -> bool {
        matches!(self.state, NodeState::Known { .. })
    }

    pub fn is_available(&self) -> bool {
        self.state == NodeState::Known { available: true }
    }

    pub fn is_sleeping(&self) -> bool {
        self.node_type.is_some_and(|node_type| node_type.is_sleeping())
    }

    pub fn measures_power(&self) -> bool {
        self.meter.is_some()
    }

    /// Time of the last response from the node
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn hardware_version(&self) -> Option<&str> {
        self.hardware_version.as_deref()
    }

    pub fn hardware_model(&self) -> Option<&'static str> {
        self.hardware_version.as_deref().map(hardware_model)
    }

    pub fn firmware(&self) -> Option<DateTime<Utc>> {
        self.firmware
    }

    pub fn features(&self) -> Option<&str> {
        self.features.as_deref()
    }

    pub fn ping(&self) -> Option<PingStats> {
        self.ping
    }

    pub fn as_switchable(&self) -> Option<&dyn Switchable> {
        self.relay.as_ref().map(|relay| relay as &dyn Switchable)
    }

    pub fn as_meterable(&self) -> Option<&dyn Meterable> {
        self.meter.as_ref().map(|meter| meter as &dyn Meterable)
    }

    /// Sensor components of the node
    pub fn sensors(&self) -> Vec<&dyn Sensing> {
        let mut sensors: Vec<&dyn Sensing> = Vec::new();
        if let Some(motion) = &self.motion {
            sensors.push(motion);
        }
        if let Some(climate) = &self.climate {
            sensors.push(climate);
        }
        if let Some(switch) = &self.switch {
            sensors.push(switch);
        }
        sensors
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.sensors().iter().flat_map(|sensor| sensor.readings()).collect()
    }

    pub fn meter(&self) -> Option<&Meter> {
        self.meter.as_ref()
    }

    pub fn coordinator(&self) -> Option<&Coordinator> {
        self.coordinator.as_ref()
    }

    pub fn sleep_queue(&self) -> Option<&SleepQueue> {
        self.sleep.as_ref()
    }

    pub fn motion(&self) -> Option<&Motion> {
        self.motion.as_ref()
    }

    pub fn climate(&self) -> Option<&Climate> {
        self.climate.as_ref()
    }

    /// Info request that discovers the node type
    ///
    /// A regular discovery is a low priority probe; a forced discovery, used when
    /// the node just sent something, goes at medium priority with the full budget.
    pub fn discovery_request(&mut self, now: DateTime<Utc>, forced: bool) -> Outbound {
        if !self.is_known() {
            self.state = NodeState::Discovering { since: now };
        }
        let request = Request::NodeInfo { mac: self.mac };
        if forced {
            Outbound::new(request, Priority::Medium)
        } else {
            Outbound::probe(request)
        }
    }

    /// Turn an undiscovered node into a typed one
    pub fn classify(&mut self, info: &NodeInfoData, now: DateTime<Utc>) -> Actions {
        let mut actions = Actions::new();
        let node_type = info.node_type;
        log::info!("Node {} discovered as {}", self.mac, node_type);
        self.node_type = Some(node_type);
        self.state = NodeState::Known { available: true };
        self.last_update = Some(now);

        if node_type.measures_power() {
            self.relay = Some(Relay::new(self.mac));
            self.meter = Some(Meter::new(self.mac, now));
        }
        if node_type == NodeType::CirclePlus {
            self.coordinator = Some(Coordinator::new(self.mac));
        }
        if node_type.is_sleeping() {
            self.sleep = Some(SleepQueue::new(self.mac));
        }
        match node_type {
            NodeType::Scan => self.motion = Some(Motion::new(self.mac)),
            NodeType::Sense => self.climate = Some(Climate::new(self.mac)),
            NodeType::Switch => self.switch = Some(ButtonSwitch::new(self.mac)),
            _ => {}
        }

        actions.emit(NodeEvent::Discovered {
            mac: self.mac,
            node_type,
        });
        self.apply_info(info, now, &mut actions);
        if let Some(meter) = &self.meter {
            actions.outbound.extend(meter.startup());
        }
        if let Some(coordinator) = &self.coordinator {
            actions.outbound.extend(coordinator.startup());
        }
        actions
    }

    /// Route a response from this node
    pub fn handle(&mut self, response: &Response, now: DateTime<Utc>) -> Actions {
        let mut actions = Actions::new();
        if !self.is_known() {
            log::debug!(
                "Response {:?} for undiscovered node {} ignored",
                response.kind(),
                self.mac
            );
            return actions;
        }
        let was_available = self.is_available();
        self.mark_available(now, &mut actions);
        if !was_available
            && self.measures_power()
            && !matches!(response.body, ResponseBody::NodeInfo(_))
        {
            actions.send(Outbound::new(Request::NodeInfo { mac: self.mac }, Priority::Medium));
        }

        match &response.body {
            ResponseBody::Ping {
                rssi_in,
                rssi_out,
                round_trip_ms,
            } => self.on_ping(*rssi_in, *rssi_out, *round_trip_ms, &mut actions),
            ResponseBody::NodeInfo(info) => {
                if self.node_type != Some(info.node_type) {
                    log::warn!(
                        "Node {} reports type {} but was discovered as {:?}",
                        self.mac,
                        info.node_type,
                        self.node_type
                    );
                }
                self.apply_info(info, now, &mut actions);
            }
            ResponseBody::NodeResponse(code) => self.on_node_response(*code, &mut actions),
            ResponseBody::PowerUsage {
                pulse_1s,
                pulse_8s,
                consumed,
                produced,
                nanosecond_offset,
            } => match self.meter.as_mut() {
                Some(meter) => meter.on_power_usage(
                    *pulse_1s,
                    *pulse_8s,
                    *consumed,
                    *produced,
                    *nanosecond_offset,
                    now,
                    &mut actions,
                ),
                None => self.unexpected(response),
            },
            ResponseBody::Calibration {
                gain_a,
                gain_b,
                off_tot,
                off_noise,
            } => match self.meter.as_mut() {
                Some(meter) => meter.on_calibration(*gain_a, *gain_b, *off_tot, *off_noise),
                None => self.unexpected(response),
            },
            ResponseBody::EnergyLogs { slots, log_address } => match self.meter.as_mut() {
                Some(meter) => meter.on_energy_logs(slots, *log_address, &mut actions),
                None => self.unexpected(response),
            },
            ResponseBody::Clock { time, .. } => match self.meter.as_mut() {
                Some(meter) => actions.outbound.extend(meter.on_clock(*time, now)),
                None => self.unexpected(response),
            },
            ResponseBody::RealTimeClock { time, .. } => match self.coordinator.as_mut() {
                Some(coordinator) => {
                    actions.outbound.extend(coordinator.on_real_time_clock(*time, now))
                }
                None => self.unexpected(response),
            },
            ResponseBody::CirclePlusScan { node_mac, address } => match self.coordinator.as_mut() {
                Some(coordinator) => coordinator.on_scan(*node_mac, *address, &mut actions),
                None => self.unexpected(response),
            },
            ResponseBody::Awake(reason) => match self.sleep.as_mut() {
                Some(sleep) => actions.outbound.extend(sleep.on_awake(*reason, now)),
                None => self.unexpected(response),
            },
            ResponseBody::Rejoin => {
                log::info!("Node {} rejoined the network", self.mac);
                if let Some(sleep) = self.sleep.as_mut() {
                    actions.outbound.extend(sleep.on_rejoin(now));
                }
            }
            ResponseBody::SwitchGroup { power_state, .. } => {
                let event = if let Some(motion) = self.motion.as_mut() {
                    motion.on_switch_group(*power_state)
                } else if let Some(switch) = self.switch.as_mut() {
                    switch.on_switch_group(*power_state)
                } else {
                    self.unexpected(response);
                    None
                };
                actions.events.extend(event);
            }
            ResponseBody::NodeAck(code) => {
                let event = if let Some(motion) = self.motion.as_mut() {
                    motion.on_node_ack(*code)
                } else if let Some(climate) = self.climate.as_mut() {
                    climate.on_node_ack(*code)
                } else {
                    None
                };
                if event.is_none() {
                    log::debug!("Node {} acknowledged {:?}", self.mac, code);
                }
                actions.events.extend(event);
            }
            ResponseBody::SenseReport { humidity, temperature } => match self.climate.as_mut() {
                Some(climate) => climate.on_report(*humidity, *temperature, &mut actions),
                None => self.unexpected(response),
            },
            ResponseBody::RelayInitState { relay, .. } => match self.relay.as_mut() {
                Some(switch) => actions.emit(switch.on_initial_state(*relay)),
                None => self.unexpected(response),
            },
            ResponseBody::Features { features } => self.features = Some(features.clone()),
            _ => log::debug!("Response {:?} of node {} needs no action", response.kind(), self.mac),
        }
        actions
    }

    /// A request for this node was given up by the session
    pub fn on_request_dropped(&mut self, kind: RequestKind, now: DateTime<Utc>) -> Actions {
        let mut actions = Actions::new();
        match self.state {
            NodeState::Discovering { since } if kind == RequestKind::NodeInfo => {
                log::info!(
                    "Node {} did not answer discovery started at {}, expected for sleeping nodes",
                    self.mac,
                    since
                );
                self.state = NodeState::Undiscovered;
            }
            NodeState::Known { available: true }
                if matches!(kind, RequestKind::Ping | RequestKind::NodeInfo)
                    && !self.is_sleeping() =>
            {
                log::warn!("Node {} did not answer {} at {}", self.mac, kind, now);
                self.mark_unavailable(&mut actions);
            }
            _ => {}
        }
        actions
    }

    /// Send now, or hold in the sleep queue for a battery node
    pub fn submit(&mut self, request: Request, priority: Priority) -> Vec<Outbound> {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.queue(request);
                Vec::new()
            }
            None => vec![Outbound::new(request, priority)],
        }
    }

    /// Switch the relay
    ///
    /// # Errors
    ///
    /// `StickError::Protocol` if the node has no relay
    pub fn set_relay(&mut self, on: bool) -> StickResult<Vec<Outbound>> {
        let relay = self.relay.as_ref().ok_or_else(|| missing(self.mac, "relay"))?;
        let outbound = relay.switch(on);
        Ok(self.submit(outbound.request, outbound.priority))
    }

    pub fn set_initial_relay_state(&mut self, on: bool) -> StickResult<Vec<Outbound>> {
        if self.relay.is_none() {
            return Err(missing(self.mac, "relay"));
        }
        let request = Request::InitialRelayState {
            mac: self.mac,
            configure: true,
            relay: on,
        };
        Ok(self.submit(request, Priority::Medium))
    }

    pub fn set_measure_interval(
        &mut self,
        consumption: u16,
        production: u16,
    ) -> StickResult<Vec<Outbound>> {
        let mac = self.mac;
        let meter = self.meter.as_mut().ok_or_else(|| missing(mac, "power meter"))?;
        Ok(vec![meter.measure_interval(consumption, production)?])
    }

    /// Queue a sleep schedule for a battery node
    pub fn configure_sleep(&mut self, config: SleepConfig) -> StickResult<()> {
        let mac = self.mac;
        let sleep = self.sleep.as_mut().ok_or_else(|| missing(mac, "sleep schedule"))?;
        sleep.configure(config);
        Ok(())
    }

    pub fn configure_scan(&mut self, config: ScanConfig) -> StickResult<()> {
        let mac = self.mac;
        let motion = self.motion.as_mut().ok_or_else(|| missing(mac, "motion sensor"))?;
        let request = motion.configure(config)?;
        self.submit(request, Priority::Medium);
        Ok(())
    }

    pub fn calibrate_light(&mut self) -> StickResult<()> {
        let motion = self.motion.as_ref().ok_or_else(|| missing(self.mac, "motion sensor"))?;
        let request = motion.light_calibration();
        self.submit(request, Priority::Medium);
        Ok(())
    }

    pub fn set_sense_interval(&mut self, minutes: u8) -> StickResult<()> {
        let mac = self.mac;
        let climate = self.climate.as_mut().ok_or_else(|| missing(mac, "climate sensor"))?;
        let request = climate.set_report_interval(minutes);
        self.submit(request, Priority::Medium);
        Ok(())
    }

    /// Start reading the coordinator's network table
    pub fn start_scan(&mut self) -> StickResult<Vec<Outbound>> {
        let coordinator = self
            .coordinator
            .as_mut()
            .ok_or_else(|| StickError::Protocol("node is not the coordinator".to_string()))?;
        Ok(coordinator.start_scan())
    }

    /// Clock reads of every clock the node keeps
    pub fn clock_requests(&self) -> Vec<Outbound> {
        let mut outbound = Vec::new();
        if let Some(meter) = &self.meter {
            outbound.push(meter.clock_request());
        }
        if let Some(coordinator) = &self.coordinator {
            outbound.push(coordinator.rtc_request());
        }
        outbound
    }

    pub fn ping_request(&self) -> Outbound {
        Outbound::probe(Request::Ping { mac: self.mac })
    }

    /// Power usage and missing energy logs of a metering node
    pub fn metering_requests(&mut self, now: DateTime<Utc>) -> Vec<Outbound> {
        match self.meter.as_mut() {
            Some(meter) => {
                let mut outbound = vec![meter.power_request()];
                outbound.extend(meter.energy_log_requests(now));
                outbound
            }
            None => Vec::new(),
        }
    }

    /// Time since the last response
    pub fn silent_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_update.map(|last| now - last)
    }

    pub(crate) fn mark_unavailable(&mut self, actions: &mut Actions) {
        if self.is_available() {
            log::info!("Mark node {} unavailable", self.mac);
            self.state = NodeState::Known { available: false };
            actions.emit(NodeEvent::AvailabilityChanged {
                mac: self.mac,
                available: false,
            });
        }
    }

    fn mark_available(&mut self, now: DateTime<Utc>, actions: &mut Actions) {
        self.last_update = Some(now);
        if self.state == (NodeState::Known { available: false }) {
            log::info!("Mark node {} available", self.mac);
            self.state = NodeState::Known { available: true };
            actions.emit(NodeEvent::AvailabilityChanged {
                mac: self.mac,
                available: true,
            });
        }
    }

    fn apply_info(&mut self, info: &NodeInfoData, now: DateTime<Utc>, actions: &mut Actions) {
        self.hardware_version = Some(info.hardware_version.clone());
        self.firmware = DateTime::from_timestamp(info.firmware, 0);
        if let Some(relay) = self.relay.as_mut() {
            actions.events.extend(relay.on_info(info.relay_state));
        }
        if let Some(meter) = self.meter.as_mut() {
            meter.on_info(info.last_log_address, now);
        }
    }

    fn on_ping(&mut self, rssi_in: i8, rssi_out: i8, round_trip_ms: u16, actions: &mut Actions) {
        let stats = PingStats {
            rssi_in,
            rssi_out,
            round_trip_ms,
        };
        if self.ping != Some(stats) {
            self.ping = Some(stats);
            actions.emit(NodeEvent::PingUpdated {
                mac: self.mac,
                rssi_in,
                rssi_out,
                round_trip_ms,
            });
        }
    }

    fn on_node_response(&mut self, code: NodeResponseCode, actions: &mut Actions) {
        match code {
            NodeResponseCode::RelaySwitchedOn
            | NodeResponseCode::RelaySwitchedOff
            | NodeResponseCode::RelaySwitchFailed => {
                if let Some(relay) = self.relay.as_mut() {
                    actions.events.extend(relay.on_response(code));
                }
            }
            NodeResponseCode::ClockAccepted => actions.emit(NodeEvent::Configured {
                mac: self.mac,
                setting: Setting::Clock,
                accepted: true,
            }),
            NodeResponseCode::RealTimeClockAccepted | NodeResponseCode::RealTimeClockFailed => {
                if let Some(coordinator) = self.coordinator.as_mut() {
                    actions.events.extend(coordinator.on_response(code));
                }
            }
            NodeResponseCode::SleepConfigAccepted | NodeResponseCode::SleepConfigFailed => {
                let accepted = code == NodeResponseCode::SleepConfigAccepted;
                if let Some(sleep) = self.sleep.as_mut() {
                    sleep.on_sleep_config(accepted);
                }
                actions.emit(NodeEvent::Configured {
                    mac: self.mac,
                    setting: Setting::SleepConfig,
                    accepted,
                });
            }
            NodeResponseCode::LogIntervalAccepted => {
                if let Some(meter) = self.meter.as_mut() {
                    meter.on_log_interval_accepted(actions);
                }
            }
            other => log::debug!("Node {} responded {:?}", self.mac, other),
        }
    }

    fn unexpected(&self, response: &Response) {
        log::warn!(
            "Unexpected {:?} from node {} of type {:?}",
            response.kind(),
            self.mac,
            self.node_type
        );
    }
}

fn missing(mac: MacAddress, component: &str) -> StickError {
    StickError::Protocol(format!("node {} has no {}", mac, component))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use plugwise_protocol::{AwakeReason, SequenceId};

    fn mac() -> MacAddress {
        "000D6F0000468F71".parse().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap()
    }

    fn info(node_type: NodeType, relay_state: bool) -> NodeInfoData {
        NodeInfoData {
            timestamp: Some(now()),
            last_log_address: 100,
            relay_state,
            frequency: 50,
            hardware_version: "000000070140".to_string(),
            firmware: 1_300_000_000,
            node_type,
        }
    }

    fn response(body: ResponseBody) -> Response {
        Response::new(SequenceId::new(0x10), Some(mac()), body)
    }

    #[test]
    fn test_discovery_states() {
        let mut node = Node::new(mac());
        assert_eq!(node.state(), NodeState::Undiscovered);
        let outbound = node.discovery_request(now(), false);
        assert!(outbound.probe);
        assert_eq!(node.state(), NodeState::Discovering { since: now() });
        node.on_request_dropped(RequestKind::NodeInfo, now());
        assert_eq!(node.state(), NodeState::Undiscovered);

        let forced = node.discovery_request(now(), true);
        assert_eq!(forced.priority, Priority::Medium);
        assert!(!forced.probe);
    }

    #[test]
    fn test_circle_capabilities() {
        let mut node = Node::new(mac());
        let actions = node.classify(&info(NodeType::Circle, true), now());
        assert!(node.is_available());
        assert!(node.as_switchable().is_some());
        assert!(node.as_meterable().is_some());
        assert!(node.sensors().is_empty());
        assert_eq!(node.as_switchable().unwrap().relay(), Some(true));
        assert_eq!(
            actions.events[0],
            NodeEvent::Discovered {
                mac: mac(),
                node_type: NodeType::Circle
            }
        );
        assert!(actions
            .outbound
            .iter()
            .any(|outbound| outbound.request == Request::Calibration { mac: mac() }));
        assert!(actions
            .outbound
            .iter()
            .any(|outbound| outbound.request == Request::ClockGet { mac: mac() }));
    }

    #[test]
    fn test_relay_ack_changes_once() {
        let mut node = Node::new(mac());
        node.classify(&info(NodeType::Circle, false), now());
        let on = response(ResponseBody::NodeResponse(NodeResponseCode::RelaySwitchedOn));
        let first = node.handle(&on, now());
        assert_eq!(first.events, vec![NodeEvent::RelayChanged { mac: mac(), on: true }]);
        let second = node.handle(&on, now());
        assert!(second.events.is_empty());
    }

    #[test]
    fn test_dropped_ping_marks_unavailable() {
        let mut node = Node::new(mac());
        node.classify(&info(NodeType::Circle, false), now());
        let actions = node.on_request_dropped(RequestKind::Ping, now());
        assert_eq!(
            actions.events,
            vec![NodeEvent::AvailabilityChanged {
                mac: mac(),
                available: false
            }]
        );
        assert_eq!(node.state(), NodeState::Known { available: false });

        // any response brings it back and refreshes the node info
        let ping = response(ResponseBody::Ping {
            rssi_in: 60,
            rssi_out: 70,
            round_trip_ms: 12,
        });
        let actions = node.handle(&ping, now());
        assert!(node.is_available());
        assert!(actions.events.contains(&NodeEvent::AvailabilityChanged {
            mac: mac(),
            available: true
        }));
        assert!(actions
            .outbound
            .iter()
            .any(|outbound| outbound.request == Request::NodeInfo { mac: mac() }));
    }

    #[test]
    fn test_sleeping_node_never_unavailable_on_drop() {
        let mut node = Node::new(mac());
        node.classify(&info(NodeType::Scan, false), now());
        assert!(node.is_sleeping());
        let actions = node.on_request_dropped(RequestKind::Ping, now());
        assert!(actions.is_empty());
        assert!(node.is_available());
    }

    #[test]
    fn test_sleeping_node_sends_last_queued_relay_request() {
        let mut node = Node::new(mac());
        node.classify(&info(NodeType::Sense, false), now());
        assert!(node
            .submit(Request::RelaySwitch { mac: mac(), on: true }, Priority::High)
            .is_empty());
        assert!(node
            .submit(Request::RelaySwitch { mac: mac(), on: false }, Priority::High)
            .is_empty());

        let state = node.handle(&response(ResponseBody::Awake(AwakeReason::State)), now());
        assert!(state.outbound.is_empty());

        let awake = response(ResponseBody::Awake(AwakeReason::Maintenance));
        let maintenance = node.handle(&awake, now());
        let sent: Vec<&Request> =
            maintenance.outbound.iter().map(|outbound| &outbound.request).collect();
        assert_eq!(sent, vec![&Request::RelaySwitch { mac: mac(), on: false }]);
    }

    #[test]
    fn test_scan_motion_and_config() {
        let mut node = Node::new(mac());
        node.classify(&info(NodeType::Scan, false), now());
        node.configure_scan(ScanConfig::default()).unwrap();
        node.calibrate_light().unwrap();
        assert_eq!(node.sleep_queue().unwrap().len(), 2);
        assert!(node.set_relay(true).is_err());

        let motion = node.handle(
            &response(ResponseBody::SwitchGroup {
                group: 1,
                power_state: true,
            }),
            now(),
        );
        assert_eq!(motion.events, vec![NodeEvent::MotionChanged { mac: mac(), motion: true }]);
        assert_eq!(node.readings(), vec![Reading::Motion(true)]);
    }

    #[test]
    fn test_unexpected_response_is_ignored() {
        let mut node = Node::new(mac());
        node.classify(&info(NodeType::Sense, false), now());
        let actions = node.handle(
            &response(ResponseBody::PowerUsage {
                pulse_1s: 1,
                pulse_8s: 8,
                consumed: 0,
                produced: 0,
                nanosecond_offset: 0,
            }),
            now(),
        );
        assert!(actions.is_empty());
    }
}
