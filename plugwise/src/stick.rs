//! Stick facade
//!
//! Owns the session controller and the node directory. A dispatch task feeds every
//! session event through the directory and an update task runs the periodic node
//! cycle; both execute the requests the directory returns and publish its events on
//! a broadcast channel.

use crate::error::{StickError, StickResult};
use crate::settings::StickSettings;
use chrono::Utc;
use plugwise_core::MacAddress;
use plugwise_nodes::{Actions, Node, NodeDirectory, NodeEvent, Outbound, ScanConfig, SleepConfig};
use plugwise_protocol::{Request, ResponseBody};
use plugwise_session::{Controller, Priority, SessionEvent, SessionStatistics};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

/// Network details reported by the stick at initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickInfo {
    /// Address of the stick itself
    pub mac: Option<MacAddress>,
    pub network_online: bool,
    pub network_id: u16,
    /// Coordinator of the network, when the network is online
    pub coordinator: Option<MacAddress>,
}

/// State shared by the facade and its background tasks
struct Shared {
    controller: Controller,
    directory: Mutex<NodeDirectory>,
    events: broadcast::Sender<NodeEvent>,
    settings: StickSettings,
    running: AtomicBool,
}

impl Shared {
    /// Submit requests, failing on the first rejected one
    async fn submit(&self, outbound: Vec<Outbound>) -> StickResult<()> {
        for outbound in outbound {
            let retries = outbound
                .retries
                .unwrap_or(self.settings.session.default_retries);
            let submitted = if outbound.probe {
                self.controller
                    .send_probe(outbound.request, outbound.priority, retries)
                    .await
            } else {
                self.controller
                    .send(outbound.request, outbound.priority, retries)
                    .await
            };
            match submitted {
                Ok(_) => {}
                // Same request already on its way.
                Err(StickError::DuplicateRequest { kind, mac }) => {
                    log::debug!("{} request for {} already pending", kind, mac)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Carry out the outcome of a directory call from a background task
    async fn execute(&self, actions: Actions) {
        let Actions { outbound, events } = actions;
        if let Err(e) = self.submit(outbound).await {
            log::warn!("Submitting node requests failed: {}", e);
        }
        self.publish(events);
    }

    fn publish(&self, events: Vec<NodeEvent>) {
        for event in events {
            log::debug!("Publish {:?}", event);
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }

    /// Time allowed for a request including all retries
    fn exchange_deadline(&self) -> Duration {
        let session = &self.settings.session;
        session.ack_timeout + session.response_timeout * (u32::from(session.default_retries) + 1)
    }
}

/// Client of one Plugwise USB stick and its mesh
pub struct Stick {
    shared: Arc<Shared>,
    info: Mutex<Option<StickInfo>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    update: Mutex<Option<JoinHandle<()>>>,
}

impl Stick {
    /// Open the link and start the session
    pub async fn connect(settings: StickSettings) -> StickResult<Self> {
        log::info!("Connecting to stick on {}", settings.port);
        let transport = settings.transport().build();
        let (controller, session_events) =
            Controller::connect(transport, settings.session.clone()).await?;
        Self::start(controller, session_events, settings)
    }

    /// Attach to a running session
    ///
    /// # Errors
    ///
    /// `StickError::InvalidData` when `unavailable_after` does not fit a time span
    pub fn start(
        controller: Controller,
        session_events: mpsc::Receiver<SessionEvent>,
        settings: StickSettings,
    ) -> StickResult<Self> {
        let unavailable_after = chrono::Duration::from_std(settings.unavailable_after)
            .map_err(|e| StickError::InvalidData(format!("unavailable_after: {}", e)))?;
        let directory = NodeDirectory::new(settings.auto_accept_joins, unavailable_after);
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let shared = Arc::new(Shared {
            controller,
            directory: Mutex::new(directory),
            events,
            settings,
            running: AtomicBool::new(true),
        });
        let dispatch = tokio::spawn(dispatch_loop(shared.clone(), session_events));
        Ok(Self {
            shared,
            info: Mutex::new(None),
            dispatch: Mutex::new(Some(dispatch)),
            update: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &StickSettings {
        &self.shared.settings
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst) && self.shared.controller.is_running()
    }

    /// Details from the last successful initialization
    pub async fn info(&self) -> Option<StickInfo> {
        self.info.lock().await.clone()
    }

    /// Initialize the stick and start managing the network
    ///
    /// The coordinator is discovered right away and the update loop starts.
    ///
    /// # Errors
    ///
    /// `StickError::Timeout` if the stick does not answer
    pub async fn initialize(&self) -> StickResult<StickInfo> {
        let shared = &self.shared;
        let response = shared
            .controller
            .request(Request::StickInit, Priority::High, shared.settings.session.default_retries)
            .await?;
        let ResponseBody::StickInit {
            network_online,
            circle_plus_mac,
            network_id,
        } = &response.body
        else {
            return Err(StickError::Protocol(format!(
                "unexpected {} in answer to stick init",
                response.kind()
            )));
        };
        let coordinator = if *network_online {
            Some(circle_plus_mac.parse::<MacAddress>()?.coordinator_address())
        } else {
            log::warn!("Stick reports the network offline");
            None
        };
        let info = StickInfo {
            mac: response.mac,
            network_online: *network_online,
            network_id: *network_id,
            coordinator,
        };
        log::info!("Stick initialized: {:?}", info);

        if let Some(coordinator) = coordinator {
            let outbound = {
                let mut directory = shared.directory.lock().await;
                directory.set_coordinator(coordinator);
                directory.discover(coordinator, Utc::now(), true)
            };
            shared.submit(outbound).await?;
        }
        *self.info.lock().await = Some(info.clone());

        let mut update = self.update.lock().await;
        if update.is_none() {
            *update = Some(tokio::spawn(update_loop(shared.clone())));
        }
        Ok(info)
    }

    /// Subscribe to node events
    pub fn events(&self) -> broadcast::Receiver<NodeEvent> {
        self.shared.events.subscribe()
    }

    /// Discover a node and wait until its type is known
    ///
    /// # Errors
    ///
    /// `StickError::Timeout` if the node does not answer its info request
    pub async fn discover(&self, mac: MacAddress) -> StickResult<Node> {
        let mut events = self.events();
        let outbound = {
            let mut directory = self.shared.directory.lock().await;
            if let Some(node) = directory.node(&mac).filter(|node| node.is_known()) {
                return Ok(node.clone());
            }
            directory.discover(mac, Utc::now(), true)
        };
        self.shared.submit(outbound).await?;
        self.wait_for(&mut events, |event| {
            matches!(event, NodeEvent::Discovered { mac: found, .. } if *found == mac)
        })
        .await?;
        self.node(&mac)
            .await
            .ok_or_else(|| StickError::NodeNotFound(mac.to_string()))
    }

    /// Read the coordinator's network table and discover every registered node
    ///
    /// # Returns
    ///
    /// The registered nodes with their network table slot
    pub async fn scan(&self) -> StickResult<Vec<(MacAddress, u8)>> {
        let coordinator = self
            .shared
            .directory
            .lock()
            .await
            .coordinator()
            .ok_or(StickError::NotInitialized)?;
        self.discover(coordinator).await?;

        let mut events = self.events();
        let outbound = self.shared.directory.lock().await.scan()?;
        self.shared.submit(outbound).await?;
        let scanned = self
            .wait_for(&mut events, |event| matches!(event, NodeEvent::NetworkScanned { .. }))
            .await?;
        match scanned {
            NodeEvent::NetworkScanned { nodes, .. } => Ok(nodes),
            _ => Ok(Vec::new()),
        }
    }

    /// Snapshot of one node
    pub async fn node(&self, mac: &MacAddress) -> Option<Node> {
        self.shared.directory.lock().await.node(mac).cloned()
    }

    /// Snapshot of every registered node
    pub async fn nodes(&self) -> Vec<Node> {
        self.shared.directory.lock().await.nodes().cloned().collect()
    }

    /// Send a request to a discovered node; sleeping nodes receive it when awake
    pub async fn send(
        &self,
        mac: MacAddress,
        request: Request,
        priority: Priority,
    ) -> StickResult<()> {
        let outbound = self.shared.directory.lock().await.send(mac, request, priority)?;
        self.shared.submit(outbound).await
    }

    /// Accept a node asking to join
    pub async fn join(&self, mac: MacAddress) -> StickResult<()> {
        let outbound = self.shared.directory.lock().await.accept_join(mac, true);
        self.shared.submit(vec![outbound]).await
    }

    /// Remove a node from the network
    pub async fn unjoin(&self, mac: MacAddress) -> StickResult<()> {
        let outbound = self.shared.directory.lock().await.unjoin(mac)?;
        self.shared.submit(vec![outbound]).await
    }

    /// Open or close the network for joining nodes
    pub async fn allow_join_requests(&self, enable: bool, auto_accept: bool) -> StickResult<()> {
        let outbound = self
            .shared
            .directory
            .lock()
            .await
            .allow_joining(enable, auto_accept);
        self.shared.submit(vec![outbound]).await
    }

    pub async fn set_relay(&self, mac: MacAddress, on: bool) -> StickResult<()> {
        let outbound = self.shared.directory.lock().await.set_relay(mac, on)?;
        self.shared.submit(outbound).await
    }

    pub async fn set_initial_relay_state(&self, mac: MacAddress, on: bool) -> StickResult<()> {
        let outbound = self
            .shared
            .directory
            .lock()
            .await
            .set_initial_relay_state(mac, on)?;
        self.shared.submit(outbound).await
    }

    /// Set the log intervals of a metering node in minutes
    pub async fn set_measure_interval(
        &self,
        mac: MacAddress,
        consumption: u16,
        production: u16,
    ) -> StickResult<()> {
        let outbound = self
            .shared
            .directory
            .lock()
            .await
            .set_measure_interval(mac, consumption, production)?;
        self.shared.submit(outbound).await
    }

    /// Queue a sleep schedule for a battery node
    pub async fn configure_sleep(&self, mac: MacAddress, config: SleepConfig) -> StickResult<()> {
        self.shared.directory.lock().await.configure_sleep(mac, config)
    }

    /// Queue a motion sensor configuration
    pub async fn configure_scan(&self, mac: MacAddress, config: ScanConfig) -> StickResult<()> {
        self.shared.directory.lock().await.configure_scan(mac, config)
    }

    pub async fn calibrate_light(&self, mac: MacAddress) -> StickResult<()> {
        self.shared.directory.lock().await.calibrate_light(mac)
    }

    pub async fn set_sense_interval(&self, mac: MacAddress, minutes: u8) -> StickResult<()> {
        self.shared.directory.lock().await.set_sense_interval(mac, minutes)
    }

    /// Check the clocks of all available nodes now
    pub async fn sync_clocks(&self) -> StickResult<()> {
        let outbound = self.shared.directory.lock().await.sync_clocks();
        self.shared.submit(outbound).await
    }

    /// Snapshot of the session counters
    pub async fn statistics(&self) -> StickResult<SessionStatistics> {
        self.shared.controller.statistics().await
    }

    /// Stop the background tasks and close the link
    pub async fn disconnect(&self) -> StickResult<()> {
        log::info!("Disconnecting stick");
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(update) = self.update.lock().await.take() {
            update.abort();
        }
        self.shared.controller.close().await?;
        if let Some(dispatch) = self.dispatch.lock().await.take() {
            if let Err(e) = dispatch.await {
                log::warn!("Event dispatch ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    async fn wait_for<F>(
        &self,
        events: &mut broadcast::Receiver<NodeEvent>,
        matches: F,
    ) -> StickResult<NodeEvent>
    where
        F: Fn(&NodeEvent) -> bool,
    {
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event) if matches(&event) => return Ok(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Missed {} node events while waiting", skipped)
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(StickError::Closed),
                }
            }
        };
        tokio::time::timeout(self.shared.exchange_deadline(), wait)
            .await
            .map_err(|_| StickError::Timeout)?
    }
}

async fn dispatch_loop(shared: Arc<Shared>, mut session_events: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = session_events.recv().await {
        let closed = matches!(event, SessionEvent::ConnectionClosed(_));
        let actions = shared.directory.lock().await.handle_event(&event, Utc::now());
        shared.execute(actions).await;
        if closed {
            break;
        }
    }
    shared.running.store(false, Ordering::SeqCst);
    log::debug!("Event dispatch stopped");
}

async fn update_loop(shared: Arc<Shared>) {
    loop {
        let metering = shared.directory.lock().await.metering_count();
        tokio::time::sleep(shared.settings.update_period(metering)).await;
        if !shared.running.load(Ordering::SeqCst) || !shared.controller.is_running() {
            break;
        }
        let actions = shared.directory.lock().await.update_cycle(Utc::now());
        shared.execute(actions).await;
    }
    log::debug!("Update loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugwise_core::NodeType;
    use plugwise_protocol::{
        NodeInfoData, NodeResponseCode, RequestKind, Response, SequenceId, StickAck,
    };
    use plugwise_session::SessionSettings;
    use plugwise_transport::Connection;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
    use tokio::time::timeout;

    fn stick_mac() -> MacAddress {
        "000D6F0000A1B2C3".parse().unwrap()
    }

    fn circle() -> MacAddress {
        "000D6F0000468F71".parse().unwrap()
    }

    fn start() -> (Stick, DuplexStream) {
        let (local, peer) = duplex(4096);
        let (connection, inbound) = Connection::from_stream(local);
        let mut settings = StickSettings::new("loopback");
        settings.update_interval = Some(Duration::from_secs(3600));
        let (controller, events) = Controller::start(connection, inbound, SessionSettings::new());
        let stick = Stick::start(controller, events, settings).unwrap();
        (stick, peer)
    }

    async fn read_frames(peer: &mut DuplexStream, count: usize) -> Vec<Request> {
        let mut buffer = Vec::new();
        let mut frames = Vec::new();
        while frames.len() < count {
            let mut chunk = [0u8; 256];
            let n = peer.read(&mut chunk).await.unwrap();
            assert!(n > 0, "link closed");
            buffer.extend_from_slice(&chunk[..n]);
            while let Some(end) = buffer.windows(2).position(|w| w == b"\r\n") {
                let frame: Vec<u8> = buffer.drain(..end + 2).collect();
                frames.push(Request::decode(&frame).unwrap());
            }
        }
        frames
    }

    async fn answer(
        peer: &mut DuplexStream,
        seq: u16,
        mac: Option<MacAddress>,
        body: ResponseBody,
    ) {
        let seq = SequenceId::new(seq);
        let ack = Response::new(seq, None, ResponseBody::StickAck(StickAck::Accepted));
        peer.write_all(&ack.encode().unwrap()).await.unwrap();
        let response = Response::new(seq, mac, body);
        peer.write_all(&response.encode().unwrap()).await.unwrap();
    }

    fn circle_info() -> ResponseBody {
        ResponseBody::NodeInfo(NodeInfoData {
            timestamp: None,
            last_log_address: 10,
            relay_state: false,
            frequency: 133,
            hardware_version: "000000070140".to_string(),
            firmware: 1_580_000_000,
            node_type: NodeType::Circle,
        })
    }

    #[tokio::test]
    async fn test_initialize_discovers_coordinator() {
        let (stick, mut peer) = start();
        let init = tokio::spawn(async move {
            let info = stick.initialize().await;
            (stick, info)
        });

        let frames = read_frames(&mut peer, 1).await;
        assert_eq!(frames[0], Request::StickInit);
        answer(
            &mut peer,
            0x10,
            Some(stick_mac()),
            ResponseBody::StickInit {
                network_online: true,
                circle_plus_mac: "010D6F0000123456".to_string(),
                network_id: 0x4A2B,
            },
        )
        .await;

        let (stick, info) = init.await.unwrap();
        let info = info.unwrap();
        let coordinator: MacAddress = "000D6F0000123456".parse().unwrap();
        assert_eq!(info.coordinator, Some(coordinator));
        assert_eq!(info.network_id, 0x4A2B);
        assert_eq!(stick.info().await, Some(info));

        let frames = read_frames(&mut peer, 1).await;
        assert_eq!(frames[0], Request::NodeInfo { mac: coordinator });
        stick.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsolicited_response_discovers_node_and_publishes_events() {
        let (stick, mut peer) = start();
        let mut events = stick.events();

        // an unknown node reports its relay switched on
        let ack = Response::new(
            SequenceId::new(0x30),
            Some(circle()),
            ResponseBody::NodeResponse(NodeResponseCode::RelaySwitchedOn),
        );
        peer.write_all(&ack.encode().unwrap()).await.unwrap();

        let frames = read_frames(&mut peer, 1).await;
        assert_eq!(frames[0].kind(), RequestKind::NodeInfo);
        answer(&mut peer, 0x31, Some(circle()), circle_info()).await;

        let mut seen = Vec::new();
        while seen.len() < 2 {
            let event = timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
            if matches!(
                event,
                NodeEvent::Discovered { .. } | NodeEvent::RelayChanged { on: true, .. }
            ) {
                seen.push(event);
            }
        }
        assert_eq!(
            seen[0],
            NodeEvent::Discovered {
                mac: circle(),
                node_type: NodeType::Circle
            }
        );
        let node = stick.node(&circle()).await.unwrap();
        assert!(node.is_available());
        assert_eq!(node.as_switchable().and_then(|relay| relay.relay()), Some(true));
        stick.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_commands_need_a_known_node() {
        let (stick, _peer) = start();
        assert!(matches!(
            stick.set_relay(circle(), true).await,
            Err(StickError::NodeNotFound(_))
        ));
        assert!(matches!(stick.scan().await, Err(StickError::NotInitialized)));
        assert!(matches!(stick.unjoin(circle()).await, Err(StickError::NotInitialized)));
        stick.disconnect().await.unwrap();
        assert!(!stick.is_running());
    }
}
