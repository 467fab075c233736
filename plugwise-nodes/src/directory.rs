//! Directory of mesh nodes
//!
//! Routes session events to the node they concern, discovers nodes that show up
//! unannounced and drives the periodic update cycle. Like the nodes themselves it
//! performs no I/O and returns [`Actions`] for the owner to execute.

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use plugwise_core::MacAddress;
use plugwise_protocol::{NodeResponseCode, Request, RequestKind, Response, ResponseBody};
use plugwise_session::{Priority, SessionEvent};
use std::collections::{BTreeMap, VecDeque};

use crate::error::{StickError, StickResult};
use crate::event::NodeEvent;
use crate::node::{Node, NodeState};
use crate::outbound::{Actions, Outbound};
use crate::scan::ScanConfig;
use crate::sed::SleepConfig;

/// Responses held back while their node is being discovered
const BUFFER_CAPACITY: usize = 128;
/// Undiscovered nodes are retried once every this many update cycles
const UNDISCOVERED_PING_CYCLES: u64 = 10;
/// Grace period on top of a sleeping node's maintenance interval
const SLEEP_GRACE_MINUTES: i64 = 1;

/// All nodes known to the stick, keyed by MAC address
#[derive(Debug)]
pub struct NodeDirectory {
    nodes: BTreeMap<MacAddress, Node>,
    coordinator: Option<MacAddress>,
    buffered: VecDeque<Response>,
    auto_accept_joins: bool,
    unavailable_after: Duration,
    update_cycles: u64,
    last_clock_sync: Option<NaiveDate>,
}

impl NodeDirectory {
    /// Create an empty directory
    ///
    /// # Arguments
    ///
    /// * `auto_accept_joins` - Accept nodes asking to join without raising an event
    /// * `unavailable_after` - Silence after which a non-sleeping node is unavailable
    pub fn new(auto_accept_joins: bool, unavailable_after: Duration) -> Self {
        Self {
            nodes: BTreeMap::new(),
            coordinator: None,
            buffered: VecDeque::new(),
            auto_accept_joins,
            unavailable_after,
            update_cycles: 0,
            last_clock_sync: None,
        }
    }

    pub fn coordinator(&self) -> Option<MacAddress> {
        self.coordinator
    }

    /// Register the coordinator reported by the stick
    pub fn set_coordinator(&mut self, mac: MacAddress) {
        log::info!("Coordinator is {}", mac);
        self.coordinator = Some(mac);
        self.nodes.entry(mac).or_insert_with(|| Node::new(mac));
    }

    pub fn auto_accept_joins(&self) -> bool {
        self.auto_accept_joins
    }

    pub fn set_auto_accept_joins(&mut self, enable: bool) {
        self.auto_accept_joins = enable;
    }

    pub fn node(&self, mac: &MacAddress) -> Option<&Node> {
        self.nodes.get(mac)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of discovered nodes with a power meter
    pub fn metering_count(&self) -> usize {
        self.nodes.values().filter(|node| node.measures_power()).count()
    }

    /// Responses waiting for their node to be discovered
    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }

    /// Start discovery of a node
    ///
    /// Known nodes get their info refreshed. A node already being discovered is left
    /// alone unless `forced`.
    pub fn discover(&mut self, mac: MacAddress, now: DateTime<Utc>, forced: bool) -> Vec<Outbound> {
        let node = self.nodes.entry(mac).or_insert_with(|| Node::new(mac));
        if matches!(node.state(), NodeState::Discovering { .. }) && !forced {
            return Vec::new();
        }
        vec![node.discovery_request(now, forced)]
    }

    /// Read the coordinator's network table
    ///
    /// # Errors
    ///
    /// `StickError::NotInitialized` before the coordinator is known and discovered
    pub fn scan(&mut self) -> StickResult<Vec<Outbound>> {
        let mac = self.coordinator.ok_or(StickError::NotInitialized)?;
        let node = self
            .nodes
            .get_mut(&mac)
            .filter(|node| node.is_known())
            .ok_or(StickError::NotInitialized)?;
        node.start_scan()
    }

    /// Feed one session event
    pub fn handle_event(&mut self, event: &SessionEvent, now: DateTime<Utc>) -> Actions {
        match event {
            SessionEvent::Response(response) => self.handle_response(response, now),
            SessionEvent::RequestDropped { mac: Some(mac), kind } => {
                self.handle_dropped(*mac, *kind, now)
            }
            SessionEvent::RequestDropped { mac: None, kind } => {
                log::warn!("Stick request {} dropped", kind);
                Actions::new()
            }
            SessionEvent::ConnectionClosed(reason) => {
                log::info!("Connection closed: {}", reason.as_deref().unwrap_or("by request"));
                Actions::new()
            }
        }
    }

    /// Route a response to its node
    pub fn handle_response(&mut self, response: &Response, now: DateTime<Utc>) -> Actions {
        if is_stick_response(&response.body) {
            log::debug!("Stick response {:?} needs no node", response.kind());
            return Actions::new();
        }
        let Some(mac) = response.mac else {
            log::debug!("Response {:?} without node address ignored", response.kind());
            return Actions::new();
        };
        match &response.body {
            ResponseBody::JoinAvailable => return self.on_join_available(mac),
            ResponseBody::NodeResponse(NodeResponseCode::JoinAccepted) => {
                log::info!("Node {} joined the network", mac);
                return Actions::from(self.discover(mac, now, true));
            }
            ResponseBody::NodeRemove { removed_mac, status } => {
                return self.on_node_removed(removed_mac, *status);
            }
            _ => {}
        }

        let Some(node) = self.nodes.get_mut(&mac) else {
            return self.hold(response, now);
        };
        if node.is_known() {
            let actions = node.handle(response, now);
            return self.after_node(actions, now);
        }
        match &response.body {
            ResponseBody::NodeInfo(info) => {
                let mut actions = node.classify(info, now);
                actions.append(self.replay(mac, now));
                self.after_node(actions, now)
            }
            _ => self.hold(response, now),
        }
    }

    /// A request was given up by the session
    pub fn handle_dropped(
        &mut self,
        mac: MacAddress,
        kind: RequestKind,
        now: DateTime<Utc>,
    ) -> Actions {
        match self.nodes.get_mut(&mac) {
            Some(node) => node.on_request_dropped(kind, now),
            None => Actions::new(),
        }
    }

    /// Answer a node asking to join
    pub fn accept_join(&self, mac: MacAddress, accept: bool) -> Outbound {
        Outbound::new(Request::NodeAdd { mac, accept }, Priority::High)
    }

    /// Open or close the network for joining nodes
    pub fn allow_joining(&mut self, enable: bool, auto_accept: bool) -> Outbound {
        self.auto_accept_joins = auto_accept;
        Outbound::new(Request::AllowJoining { enable }, Priority::High)
    }

    /// Ask the coordinator to remove a node from the network
    ///
    /// # Errors
    ///
    /// `StickError::NotInitialized` without a coordinator, `StickError::NodeNotFound`
    /// for an unregistered node
    pub fn unjoin(&self, mac: MacAddress) -> StickResult<Outbound> {
        let coordinator = self.coordinator.ok_or(StickError::NotInitialized)?;
        if !self.nodes.contains_key(&mac) {
            return Err(StickError::NodeNotFound(mac.to_string()));
        }
        Ok(Outbound::new(
            Request::NodeRemove {
                mac: coordinator,
                target: mac,
            },
            Priority::High,
        ))
    }

    /// Submit a request for a discovered node, queued if it is asleep
    pub fn send(
        &mut self,
        mac: MacAddress,
        request: Request,
        priority: Priority,
    ) -> StickResult<Vec<Outbound>> {
        Ok(self.known_mut(mac)?.submit(request, priority))
    }

    pub fn set_relay(&mut self, mac: MacAddress, on: bool) -> StickResult<Vec<Outbound>> {
        self.known_mut(mac)?.set_relay(on)
    }

    pub fn set_initial_relay_state(
        &mut self,
        mac: MacAddress,
        on: bool,
    ) -> StickResult<Vec<Outbound>> {
        self.known_mut(mac)?.set_initial_relay_state(on)
    }

    pub fn set_measure_interval(
        &mut self,
        mac: MacAddress,
        consumption: u16,
        production: u16,
    ) -> StickResult<Vec<Outbound>> {
        self.known_mut(mac)?.set_measure_interval(consumption, production)
    }

    pub fn configure_sleep(&mut self, mac: MacAddress, config: SleepConfig) -> StickResult<()> {
        self.known_mut(mac)?.configure_sleep(config)
    }

    pub fn configure_scan(&mut self, mac: MacAddress, config: ScanConfig) -> StickResult<()> {
        self.known_mut(mac)?.configure_scan(config)
    }

    pub fn calibrate_light(&mut self, mac: MacAddress) -> StickResult<()> {
        self.known_mut(mac)?.calibrate_light()
    }

    pub fn set_sense_interval(&mut self, mac: MacAddress, minutes: u8) -> StickResult<()> {
        self.known_mut(mac)?.set_sense_interval(minutes)
    }

    /// Clock reads of every available metering node
    pub fn sync_clocks(&self) -> Vec<Outbound> {
        self.nodes
            .values()
            .filter(|node| node.is_available())
            .flat_map(|node| node.clock_requests())
            .collect()
    }

    /// One pass of the periodic update loop
    pub fn update_cycle(&mut self, now: DateTime<Utc>) -> Actions {
        self.update_cycles += 1;
        let today = now.with_timezone(&Local).date_naive();
        let sync_clocks = match self.last_clock_sync {
            Some(day) => day != today,
            // clocks are read when a node is discovered
            None => false,
        };
        self.last_clock_sync = Some(today);
        let ping_undiscovered = self.update_cycles % UNDISCOVERED_PING_CYCLES == 0;

        let mut actions = Actions::new();
        for node in self.nodes.values_mut() {
            match node.state() {
                NodeState::Undiscovered => {
                    if ping_undiscovered {
                        actions.send(node.discovery_request(now, false));
                    }
                }
                NodeState::Discovering { .. } => {}
                NodeState::Known { available } if node.is_sleeping() => {
                    let maintenance = node
                        .sleep_queue()
                        .map(|queue| i64::from(queue.maintenance_interval()))
                        .unwrap_or_default();
                    let limit = Duration::minutes(maintenance + SLEEP_GRACE_MINUTES);
                    if available && node.silent_for(now).is_some_and(|silent| silent > limit) {
                        node.mark_unavailable(&mut actions);
                    }
                }
                NodeState::Known { available: false } => actions.send(node.ping_request()),
                NodeState::Known { available: true } => {
                    if node.silent_for(now).is_some_and(|silent| silent > self.unavailable_after) {
                        node.mark_unavailable(&mut actions);
                        actions.send(node.ping_request());
                        continue;
                    }
                    actions.outbound.extend(node.metering_requests(now));
                    if sync_clocks {
                        actions.outbound.extend(node.clock_requests());
                    }
                }
            }
        }
        actions
    }

    fn known_mut(&mut self, mac: MacAddress) -> StickResult<&mut Node> {
        self.nodes
            .get_mut(&mac)
            .filter(|node| node.is_known())
            .ok_or_else(|| StickError::NodeNotFound(mac.to_string()))
    }

    fn on_join_available(&self, mac: MacAddress) -> Actions {
        let mut actions = Actions::new();
        if self.nodes.get(&mac).is_some_and(|node| node.is_known()) {
            log::debug!("Known node {} asks to join again", mac);
            return actions;
        }
        if self.auto_accept_joins {
            log::info!("Accepting node {} into the network", mac);
            actions.send(self.accept_join(mac, true));
        } else {
            log::info!("Node {} asks to join the network", mac);
            actions.emit(NodeEvent::JoinRequest { mac });
        }
        actions
    }

    fn on_node_removed(&mut self, removed_mac: &str, status: u8) -> Actions {
        let mut actions = Actions::new();
        if status != 1 {
            log::warn!("Coordinator refused to remove node {}", removed_mac);
            return actions;
        }
        match removed_mac.parse::<MacAddress>() {
            Ok(mac) => {
                if self.nodes.remove(&mac).is_some() {
                    log::info!("Node {} removed from the network", mac);
                }
                self.buffered.retain(|response| response.mac != Some(mac));
                actions.emit(NodeEvent::NodeRemoved { mac });
            }
            Err(e) => log::warn!("Node remove response with invalid address: {}", e),
        }
        actions
    }

    /// Buffer a response from a node that is not discovered yet and discover it
    fn hold(&mut self, response: &Response, now: DateTime<Utc>) -> Actions {
        let Some(mac) = response.mac else {
            return Actions::new();
        };
        if self.buffered.len() >= BUFFER_CAPACITY {
            if let Some(oldest) = self.buffered.pop_front() {
                log::warn!(
                    "Discovery buffer full, dropping {:?} of {:?}",
                    oldest.kind(),
                    oldest.mac
                );
            }
        }
        log::debug!("Holding {:?} of undiscovered node {}", response.kind(), mac);
        self.buffered.push_back(response.clone());
        Actions::from(self.discover(mac, now, true))
    }

    fn replay(&mut self, mac: MacAddress, now: DateTime<Utc>) -> Actions {
        let (held, rest): (VecDeque<Response>, VecDeque<Response>) =
            std::mem::take(&mut self.buffered)
                .into_iter()
                .partition(|response| response.mac == Some(mac));
        self.buffered = rest;
        let mut actions = Actions::new();
        if let Some(node) = self.nodes.get_mut(&mac) {
            for response in &held {
                log::debug!("Replaying {:?} of node {}", response.kind(), mac);
                actions.append(node.handle(response, now));
            }
        }
        actions
    }

    /// Register the nodes found by a network scan
    fn after_node(&mut self, mut actions: Actions, now: DateTime<Utc>) -> Actions {
        let found: Vec<(MacAddress, u8)> = actions
            .events
            .iter()
            .filter_map(|event| match event {
                NodeEvent::NetworkScanned { nodes, .. } => Some(nodes.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        for (mac, address) in found {
            let node = self.nodes.entry(mac).or_insert_with(|| Node::new(mac));
            node.set_address(address);
            if node.state() == NodeState::Undiscovered {
                actions.send(node.discovery_request(now, false));
            }
        }
        actions
    }
}

/// Responses about the stick itself rather than a mesh node
fn is_stick_response(body: &ResponseBody) -> bool {
    matches!(
        body,
        ResponseBody::StickAck(_)
            | ResponseBody::StickInit { .. }
            | ResponseBody::NetworkInfo { .. }
            | ResponseBody::CirclePlusConnect { .. }
    )
}
