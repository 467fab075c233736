//! Session controller
//!
//! One task owns the [`Dispatcher`] and the [`Connection`]: it feeds received bytes
//! through the frame parser, executes submissions from [`Controller`] handles and
//! writes frames. A sweeper task periodically asks it to expire stale requests.
//! All session state therefore changes on a single task.

use crate::dispatcher::{Dispatcher, Effect, Signal};
use crate::error::{StickError, StickResult};
use crate::event::SessionEvent;
use crate::pending::{DropReason, Exchange, Outcome};
use crate::queue::Priority;
use crate::settings::SessionSettings;
use crate::statistics::SessionStatistics;
use plugwise_protocol::{Decoded, FrameParser, Request, Response};
use plugwise_transport::{Connection, ReadEvent, TransportLayer};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

enum Command {
    Submit {
        exchange: Exchange,
        reply: oneshot::Sender<StickResult<()>>,
    },
    Sweep,
    Statistics(oneshot::Sender<SessionStatistics>),
    Busy(oneshot::Sender<bool>),
    Close(oneshot::Sender<()>),
}

/// Receiver of the outcome of one submitted request
#[derive(Debug)]
pub struct PendingResponse(oneshot::Receiver<Outcome>);

impl PendingResponse {
    /// Wait for the request to complete or be dropped
    pub async fn outcome(self) -> Outcome {
        self.0
            .await
            .unwrap_or(Outcome::Dropped(DropReason::Closed))
    }
}

/// Handle to a running session
#[derive(Clone)]
pub struct Controller {
    commands: mpsc::Sender<Command>,
    running: Arc<AtomicBool>,
    settings: SessionSettings,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("running", &self.is_running())
            .finish()
    }
}

impl Controller {
    /// Open a transport and start a session on it
    pub async fn connect(
        transport: Box<dyn TransportLayer>,
        settings: SessionSettings,
    ) -> StickResult<(Self, mpsc::Receiver<SessionEvent>)> {
        let (connection, inbound) = Connection::open(transport).await?;
        Ok(Self::start(connection, inbound, settings))
    }

    /// Start the session and sweeper tasks on an open connection
    ///
    /// # Returns
    ///
    /// The handle and the receiver of session events. Events that find the receiver
    /// full are dropped and counted in the statistics.
    pub fn start(
        connection: Connection,
        inbound: mpsc::Receiver<ReadEvent>,
        settings: SessionSettings,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (command_tx, command_rx) = mpsc::channel(settings.command_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(settings.event_capacity.max(1));
        let running = Arc::new(AtomicBool::new(true));

        tokio::spawn(sweeper_loop(
            command_tx.downgrade(),
            running.clone(),
            settings.clone(),
        ));
        tokio::spawn(session_loop(
            Dispatcher::new(settings.clone()),
            connection,
            inbound,
            command_rx,
            event_tx,
            running.clone(),
        ));

        let controller = Self {
            commands: command_tx,
            running,
            settings,
        };
        (controller, event_rx)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue a request
    ///
    /// # Arguments
    ///
    /// * `request` - Request to transmit
    /// * `priority` - Queue tier
    /// * `retries` - Retransmissions allowed after the first transmission
    ///
    /// # Errors
    ///
    /// `StickError::DuplicateRequest` when suppressed, `StickError::Closed` once the
    /// session has ended
    pub async fn send(
        &self,
        request: Request,
        priority: Priority,
        retries: u8,
    ) -> StickResult<PendingResponse> {
        self.submit(request, priority, retries, false).await
    }

    /// Queue a reachability check; its drop never triggers another probe
    pub async fn send_probe(
        &self,
        request: Request,
        priority: Priority,
        retries: u8,
    ) -> StickResult<PendingResponse> {
        self.submit(request, priority, retries, true).await
    }

    /// Send a request and wait for its completing response
    ///
    /// # Errors
    ///
    /// `StickError::Timeout` if every transmission went unanswered
    pub async fn request(
        &self,
        request: Request,
        priority: Priority,
        retries: u8,
    ) -> StickResult<Response> {
        let pending = self.send(request, priority, retries).await?;
        match pending.outcome().await {
            Outcome::Response(response) => Ok(response),
            Outcome::Dropped(DropReason::RetriesExhausted) => Err(StickError::Timeout),
            Outcome::Dropped(DropReason::Closed) => Err(StickError::Closed),
        }
    }

    async fn submit(
        &self,
        request: Request,
        priority: Priority,
        retries: u8,
        probe: bool,
    ) -> StickResult<PendingResponse> {
        let (completion_tx, completion_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = Exchange::new(request, priority, retries, probe, Some(completion_tx));
        self.commands
            .send(Command::Submit {
                exchange,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StickError::Closed)?;
        reply_rx.await.map_err(|_| StickError::Closed)??;
        Ok(PendingResponse(completion_rx))
    }

    /// Snapshot of the session counters
    pub async fn statistics(&self) -> StickResult<SessionStatistics> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Statistics(tx))
            .await
            .map_err(|_| StickError::Closed)?;
        rx.await.map_err(|_| StickError::Closed)
    }

    /// Whether more than one request is queued or in flight
    pub async fn busy(&self) -> StickResult<bool> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Busy(tx))
            .await
            .map_err(|_| StickError::Closed)?;
        rx.await.map_err(|_| StickError::Closed)
    }

    /// Drop all outstanding requests and close the link
    pub async fn close(&self) -> StickResult<()> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Close(tx)).await.is_err() {
            // Session already ended on its own.
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}

async fn sweeper_loop(
    commands: mpsc::WeakSender<Command>,
    running: Arc<AtomicBool>,
    settings: SessionSettings,
) {
    let mut ticker = tokio::time::interval(settings.idle_poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_sweep = Instant::now();
    loop {
        ticker.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }
        if last_sweep.elapsed() < settings.sweep_interval {
            continue;
        }
        last_sweep = Instant::now();
        let Some(sender) = commands.upgrade() else {
            break;
        };
        if sender.send(Command::Sweep).await.is_err() {
            break;
        }
    }
    log::debug!("Sweeper stopped");
}

async fn session_loop(
    mut dispatcher: Dispatcher,
    mut connection: Connection,
    mut inbound: mpsc::Receiver<ReadEvent>,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<SessionEvent>,
    running: Arc<AtomicBool>,
) {
    let mut parser = FrameParser::new();
    let mut close_reply = None;

    while !dispatcher.is_closed() {
        let ack_deadline = dispatcher.ack_deadline();
        let effects = tokio::select! {
            command = commands.recv() => {
                let now = Instant::now();
                match command {
                    Some(Command::Submit { exchange, reply }) => {
                        match dispatcher.submit(exchange, now) {
                            Ok(effects) => {
                                let _ = reply.send(Ok(()));
                                effects
                            }
                            Err(e) => {
                                let _ = reply.send(Err(e));
                                Vec::new()
                            }
                        }
                    }
                    Some(Command::Sweep) => dispatcher.handle(Signal::Sweep, now),
                    Some(Command::Statistics(reply)) => {
                        let _ = reply.send(dispatcher.statistics().clone());
                        Vec::new()
                    }
                    Some(Command::Busy(reply)) => {
                        let _ = reply.send(dispatcher.busy());
                        Vec::new()
                    }
                    Some(Command::Close(reply)) => {
                        close_reply = Some(reply);
                        dispatcher.handle(Signal::Closed(None), now)
                    }
                    None => dispatcher.handle(Signal::Closed(None), now),
                }
            }
            event = inbound.recv() => {
                let now = Instant::now();
                match event {
                    Some(ReadEvent::Data(data)) => {
                        parser.feed(&data);
                        let mut effects = Vec::new();
                        loop {
                            let decoded = parser.poll(|seq| dispatcher.expected_kind(seq));
                            let signal = match decoded {
                                Some(Decoded::Frame(response)) => Signal::Inbound(response),
                                Some(Decoded::Rejected(error)) => Signal::Rejected(error),
                                None => break,
                            };
                            effects.extend(dispatcher.handle(signal, now));
                        }
                        effects
                    }
                    Some(ReadEvent::Closed(reason)) => {
                        dispatcher.handle(Signal::Closed(reason), now)
                    }
                    None => {
                        let reason = Some("reader stopped".to_string());
                        dispatcher.handle(Signal::Closed(reason), now)
                    }
                }
            }
            _ = tokio::time::sleep_until(ack_deadline.unwrap_or_else(Instant::now)),
                if ack_deadline.is_some() =>
            {
                dispatcher.handle(Signal::AckTimeout, Instant::now())
            }
        };
        apply(effects, &mut dispatcher, &connection, &events).await;
    }

    running.store(false, Ordering::SeqCst);
    if let Err(e) = connection.close().await {
        log::warn!("Closing connection failed: {}", e);
    }
    if let Some(reply) = close_reply {
        let _ = reply.send(());
    }
}

async fn apply(
    effects: Vec<Effect>,
    dispatcher: &mut Dispatcher,
    connection: &Connection,
    events: &mpsc::Sender<SessionEvent>,
) {
    let mut effects = VecDeque::from(effects);
    while let Some(effect) = effects.pop_front() {
        match effect {
            Effect::Write { seq, frame } => {
                log::debug!("Writing frame {}: {:?}", seq, &frame[..]);
                if let Err(e) = connection.write(frame).await {
                    log::error!("Writing frame {} failed: {}", seq, e);
                    let reason = Some(e.to_string());
                    effects.extend(dispatcher.handle(Signal::Closed(reason), Instant::now()));
                }
            }
            Effect::Event(event) => match events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    log::warn!("Session event queue full, dropping {:?}", event);
                    dispatcher.record_dropped_event();
                }
                // Nobody listening is not an error for the session.
                Err(TrySendError::Closed(_)) => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugwise_core::{MacAddress, NodeType};
    use plugwise_protocol::{
        NodeInfoData, NodeResponseCode, RequestKind, ResponseBody, SequenceId, StickAck,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
    use tokio::time::{Duration, timeout};

    fn mac() -> MacAddress {
        "000D6F0000468F71".parse().unwrap()
    }

    fn start(
        settings: SessionSettings,
    ) -> (Controller, mpsc::Receiver<SessionEvent>, DuplexStream) {
        let (local, peer) = duplex(4096);
        let (connection, inbound) = Connection::from_stream(local);
        let (controller, events) = Controller::start(connection, inbound, settings);
        (controller, events, peer)
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

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_ping_transmits_three_times_then_probes_once() {
        let (controller, mut events, mut peer) = start(SessionSettings::new());
        let pending = controller
            .send(Request::Ping { mac: mac() }, Priority::Medium, 2)
            .await
            .unwrap();

        let frames = timeout(Duration::from_secs(1000), read_frames(&mut peer, 4))
            .await
            .unwrap();
        assert!(frames.iter().all(|frame| *frame == Request::Ping { mac: mac() }));
        assert_eq!(
            pending.outcome().await,
            Outcome::Dropped(DropReason::RetriesExhausted)
        );

        let mut silent = [0u8; 64];
        assert!(timeout(Duration::from_secs(1000), peer.read(&mut silent)).await.is_err());

        let stats = controller.statistics().await.unwrap();
        assert_eq!(stats.frames_sent, 4);
        assert_eq!(stats.probes_sent, 1);
        assert_eq!(stats.requests_dropped, 2);

        let mut dropped = 0;
        while let Ok(event) = events.try_recv() {
            if event.is_dropped_probe() {
                dropped += 1;
            }
        }
        assert_eq!(dropped, 2);
    }

    #[tokio::test]
    async fn test_response_completes_request() {
        let (controller, mut events, mut peer) = start(SessionSettings::new());
        let task = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .request(Request::NodeInfo { mac: mac() }, Priority::Medium, 1)
                    .await
            })
        };

        let frames = read_frames(&mut peer, 1).await;
        assert_eq!(frames[0].kind(), RequestKind::NodeInfo);

        let seq = SequenceId::new(0x42);
        let ack = Response::new(seq, None, ResponseBody::StickAck(StickAck::Accepted));
        let info = Response::new(
            seq,
            Some(mac()),
            ResponseBody::NodeInfo(NodeInfoData {
                timestamp: None,
                last_log_address: 10,
                relay_state: true,
                frequency: 133,
                hardware_version: "000000070140".to_string(),
                firmware: 1_580_000_000,
                node_type: NodeType::Circle,
            }),
        );
        peer.write_all(&ack.encode().unwrap()).await.unwrap();
        peer.write_all(&info.encode().unwrap()).await.unwrap();

        let response = task.await.unwrap().unwrap();
        assert_eq!(response, info);
        assert_eq!(events.recv().await, Some(SessionEvent::Response(info)));
        assert!(!controller.busy().await.unwrap());
    }

    #[tokio::test]
    async fn test_full_event_queue_drops_and_counts() {
        let settings = SessionSettings {
            event_capacity: 1,
            ..SessionSettings::default()
        };
        let (controller, mut events, mut peer) = start(settings);
        let reports = [
            (0x30, NodeResponseCode::RelaySwitchedOn),
            (0x31, NodeResponseCode::RelaySwitchedOff),
        ];
        for (seq, code) in reports {
            let body = ResponseBody::NodeResponse(code);
            let report = Response::new(SequenceId::new(seq), Some(mac()), body);
            peer.write_all(&report.encode().unwrap()).await.unwrap();
        }

        let dropped = timeout(Duration::from_secs(5), async {
            loop {
                let stats = controller.statistics().await.unwrap();
                if stats.frames_received == 2 {
                    return stats.events_dropped;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(dropped, 1);

        // the session keeps running and the first event is still delivered
        assert!(controller.is_running());
        match events.recv().await {
            Some(SessionEvent::Response(response)) => {
                assert_eq!(
                    response.body,
                    ResponseBody::NodeResponse(NodeResponseCode::RelaySwitchedOn)
                );
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_submission_rejected() {
        let (controller, _events, _peer) = start(SessionSettings::new());
        let _first = controller
            .send(Request::Calibration { mac: mac() }, Priority::Low, 0)
            .await
            .unwrap();
        let second = controller
            .send(Request::Calibration { mac: mac() }, Priority::Low, 0)
            .await;
        assert!(matches!(second, Err(StickError::DuplicateRequest { .. })));
    }

    #[tokio::test]
    async fn test_peer_close_ends_session() {
        let (controller, mut events, peer) = start(SessionSettings::new());
        drop(peer);
        assert_eq!(events.recv().await, Some(SessionEvent::ConnectionClosed(None)));
        let result = controller.send(Request::Ping { mac: mac() }, Priority::High, 0).await;
        assert!(matches!(result, Err(StickError::Closed)));
    }

    #[tokio::test]
    async fn test_close_drops_pending() {
        let (controller, mut events, _peer) = start(SessionSettings::new());
        let pending = controller
            .send(Request::Ping { mac: mac() }, Priority::Medium, 2)
            .await
            .unwrap();
        controller.close().await.unwrap();
        assert_eq!(pending.outcome().await, Outcome::Dropped(DropReason::Closed));
        assert_eq!(events.recv().await, Some(SessionEvent::ConnectionClosed(None)));
        assert!(!controller.is_running());
    }
}
