//! Single entry point for all session state changes
//!
//! The dispatcher owns the send queue, the pending request table and the last
//! acknowledged sequence id. It never performs I/O: every call returns the
//! [`Effect`]s the controller has to carry out, which keeps the retry policy
//! deterministic and testable without a link.

use crate::error::{StickError, StickResult};
use crate::event::SessionEvent;
use crate::pending::{DropReason, Exchange, Outcome, PendingRequest};
use crate::queue::{Priority, SendQueue};
use crate::settings::SessionSettings;
use crate::statistics::SessionStatistics;
use bytes::Bytes;
use plugwise_core::MacAddress;
use plugwise_protocol::{
    Request, RequestKind, Response, ResponseBody, ResponseKind, SequenceId, StickAck,
};
use std::collections::HashMap;
use tokio::time::Instant;

/// Input to the dispatcher
#[derive(Debug)]
pub enum Signal {
    /// A decoded frame
    Inbound(Response),
    /// A complete frame that failed to decode
    Rejected(StickError),
    /// The stick acknowledge deadline may have passed
    AckTimeout,
    /// Periodic scan for stale pending requests
    Sweep,
    /// The link is gone
    Closed(Option<String>),
}

/// Work for the controller
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Write { seq: SequenceId, frame: Bytes },
    Event(SessionEvent),
}

/// Session state machine
#[derive(Debug)]
pub struct Dispatcher {
    settings: SessionSettings,
    queue: SendQueue<Exchange>,
    pending: HashMap<SequenceId, PendingRequest>,
    last_ack: Option<SequenceId>,
    /// Predicted id of the last written frame and the deadline of its stick acknowledge
    awaiting_ack: Option<(SequenceId, Instant)>,
    statistics: SessionStatistics,
    closed: bool,
}

impl Dispatcher {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            queue: SendQueue::new(),
            pending: HashMap::new(),
            last_ack: None,
            awaiting_ack: None,
            statistics: SessionStatistics::new(),
            closed: false,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn statistics(&self) -> &SessionStatistics {
        &self.statistics
    }

    /// Count an event the receiver had no room for
    pub fn record_dropped_event(&mut self) {
        self.statistics.increment_events_dropped();
    }

    /// Queue a request for transmission
    ///
    /// # Errors
    ///
    /// * `StickError::Closed` after the session closed
    /// * `StickError::DuplicateRequest` if the same kind for the same node is already
    ///   queued or pending and the kind does not allow duplicates
    pub fn submit(&mut self, exchange: Exchange, now: Instant) -> StickResult<Vec<Effect>> {
        if self.closed {
            return Err(StickError::Closed);
        }
        let (mac, kind) = exchange.key();
        if kind.rejects_duplicates() && self.is_queued_or_pending(mac, kind) {
            self.statistics.increment_duplicates_dropped();
            let mac = mac.map(|m| m.to_string()).unwrap_or_else(|| "stick".to_string());
            log::warn!("Dropping duplicate {} request for {}", kind, mac);
            return Err(StickError::DuplicateRequest {
                kind: kind.to_string(),
                mac,
            });
        }
        log::info!("Queueing {} at {} priority", exchange.request, exchange.priority);
        self.queue.push(exchange.priority, exchange);
        Ok(self.transmit(now))
    }

    /// Apply a signal
    pub fn handle(&mut self, signal: Signal, now: Instant) -> Vec<Effect> {
        let mut effects = match signal {
            Signal::Inbound(response) => self.on_response(response),
            Signal::Rejected(error) => {
                self.on_rejected(&error);
                Vec::new()
            }
            Signal::AckTimeout => {
                self.on_ack_timeout(now);
                Vec::new()
            }
            Signal::Sweep => self.sweep(now),
            Signal::Closed(reason) => return self.close(reason),
        };
        effects.extend(self.transmit(now));
        effects
    }

    /// Response kind awaited for a sequence id
    pub fn expected_kind(&self, seq: SequenceId) -> Option<ResponseKind> {
        self.pending
            .get(&seq)
            .and_then(|pending| pending.exchange.request.expected_response())
    }

    /// Deadline of the outstanding stick acknowledge
    pub fn ack_deadline(&self) -> Option<Instant> {
        self.awaiting_ack.map(|(_, deadline)| deadline)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// More than one request queued or in flight
    pub fn busy(&self) -> bool {
        self.queue.len() + self.pending.len() > 1
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn is_queued_or_pending(&self, mac: Option<MacAddress>, kind: RequestKind) -> bool {
        let key = (mac, kind);
        self.queue.iter().any(|exchange| exchange.key() == key)
            || self.pending.values().any(|pending| pending.exchange.key() == key)
    }

    /// Successor of the last acknowledged id, skipping ids still in use
    fn predict_seq(&self) -> SequenceId {
        let mut seq = match self.last_ack {
            Some(last) => last.next(),
            None => SequenceId::new(0),
        };
        while self.pending.contains_key(&seq) {
            seq = seq.next();
        }
        seq
    }

    fn transmit(&mut self, now: Instant) -> Vec<Effect> {
        if self.closed || self.awaiting_ack.is_some() {
            return Vec::new();
        }
        while let Some((_, mut exchange)) = self.queue.pop() {
            let frame = match exchange.request.encode() {
                Ok(frame) => frame,
                Err(e) => {
                    log::error!("Cannot encode {}: {}", exchange.request, e);
                    exchange.complete(Outcome::Dropped(DropReason::RetriesExhausted));
                    continue;
                }
            };
            let seq = self.predict_seq();
            exchange.transmissions += 1;
            log::debug!(
                "Sending {} as {} (transmission {})",
                exchange.request,
                seq,
                exchange.transmissions
            );
            self.statistics.increment_frames_sent();
            self.pending.insert(seq, PendingRequest::new(exchange, now));
            self.awaiting_ack = Some((seq, now + self.settings.ack_timeout));
            return vec![Effect::Write { seq, frame }];
        }
        Vec::new()
    }

    fn on_response(&mut self, response: Response) -> Vec<Effect> {
        self.statistics.increment_frames_received();
        match response.body {
            ResponseBody::StickAck(ack) => self.on_stick_ack(ack, response),
            _ => self.on_node_response(response),
        }
    }

    fn on_stick_ack(&mut self, ack: StickAck, response: Response) -> Vec<Effect> {
        let seq = response.seq;
        if let Some((predicted, _)) = self.awaiting_ack.take() {
            // An id that is already pending belongs to a late acknowledge of an earlier frame.
            if predicted != seq && !self.pending.contains_key(&seq) {
                if let Some(pending) = self.pending.remove(&predicted) {
                    log::debug!(
                        "Stick assigned {} to {} predicted as {}",
                        seq,
                        pending.exchange.request,
                        predicted
                    );
                    self.pending.insert(seq, pending);
                }
            }
        }
        self.last_ack = Some(seq);

        match ack {
            StickAck::Accepted => {
                let ack_only = match self.pending.get_mut(&seq) {
                    Some(pending) => {
                        pending.mark_acked();
                        pending.exchange.request.expected_response().is_none()
                    }
                    None => {
                        log::debug!("Stick acknowledge {} without pending request", seq);
                        self.statistics.increment_unexpected_responses();
                        false
                    }
                };
                if ack_only {
                    if let Some(mut pending) = self.pending.remove(&seq) {
                        log::info!("{} accepted by stick", pending.exchange.request);
                        pending.exchange.complete(Outcome::Response(response));
                    }
                }
                Vec::new()
            }
            StickAck::Failed | StickAck::Timeout => {
                if ack == StickAck::Timeout {
                    self.statistics.increment_stick_timeouts();
                } else {
                    self.statistics.increment_stick_failures();
                }
                match self.pending.remove(&seq) {
                    Some(pending) => {
                        log::error!("Stick reported {:?} for {}", ack, pending.exchange.request);
                        self.retry(pending.exchange)
                    }
                    None => {
                        log::error!("Stick reported {:?} for unknown {}", ack, seq);
                        Vec::new()
                    }
                }
            }
            StickAck::Unknown(code) => {
                log::warn!("Unknown stick acknowledge {:04X} for {}", code, seq);
                Vec::new()
            }
        }
    }

    fn on_node_response(&mut self, response: Response) -> Vec<Effect> {
        let seq = response.seq;
        let matches = self.pending.get(&seq).map(|pending| {
            let request = &pending.exchange.request;
            request.expected_response() == Some(response.kind())
                && (request.mac().is_none()
                    || response.mac.is_none()
                    || response.mac == request.mac())
        });
        match matches {
            Some(true) => {
                if let Some(mut pending) = self.pending.remove(&seq) {
                    log::info!("{} completes {}", response, pending.exchange.request);
                    pending.exchange.complete(Outcome::Response(response.clone()));
                }
                if self.awaiting_ack.is_some_and(|(awaited, _)| awaited == seq) {
                    self.awaiting_ack = None;
                }
            }
            Some(false) => {
                log::warn!("{} does not answer pending request {}", response, seq);
                self.statistics.increment_unexpected_responses();
            }
            None if !seq.is_reserved() => {
                log::debug!("{} without pending request", response);
                self.statistics.increment_unexpected_responses();
            }
            None => {}
        }
        vec![Effect::Event(SessionEvent::Response(response))]
    }

    fn on_rejected(&mut self, error: &StickError) {
        self.statistics.increment_frames_rejected();
        match error {
            StickError::ChecksumMismatch { .. } => self.statistics.increment_checksum_errors(),
            StickError::LengthMismatch { .. } => self.statistics.increment_length_errors(),
            StickError::UnknownMessage(_) => self.statistics.increment_unknown_frames(),
            _ => {}
        }
    }

    fn on_ack_timeout(&mut self, now: Instant) {
        if let Some((seq, deadline)) = self.awaiting_ack {
            if now >= deadline {
                log::warn!(
                    "No stick acknowledge for {} within {:?}",
                    seq,
                    self.settings.ack_timeout
                );
                self.statistics.increment_stick_timeouts();
                self.awaiting_ack = None;
            }
        }
    }

    fn sweep(&mut self, now: Instant) -> Vec<Effect> {
        let timeout = self.settings.response_timeout;
        let mut stale: Vec<(Instant, SequenceId)> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.is_stale(now, timeout))
            .map(|(seq, pending)| (pending.sent_at(), *seq))
            .collect();
        stale.sort();

        let mut effects = Vec::new();
        for (_, seq) in stale {
            if let Some(pending) = self.pending.remove(&seq) {
                log::warn!(
                    "No response for {} within {:?} (acknowledged: {})",
                    pending.exchange.request,
                    timeout,
                    pending.is_acked()
                );
                if self.awaiting_ack.is_some_and(|(awaited, _)| awaited == seq) {
                    self.awaiting_ack = None;
                }
                effects.extend(self.retry(pending.exchange));
            }
        }
        effects
    }

    fn retry(&mut self, mut exchange: Exchange) -> Vec<Effect> {
        if exchange.retries_left == 0 {
            return self.give_up(exchange);
        }
        exchange.retries_left -= 1;
        self.statistics.increment_retransmissions();
        log::warn!(
            "Retrying {} ({} retries left)",
            exchange.request,
            exchange.retries_left
        );
        self.queue.push(exchange.priority, exchange);
        Vec::new()
    }

    fn give_up(&mut self, mut exchange: Exchange) -> Vec<Effect> {
        let (mac, kind) = exchange.key();
        self.statistics.increment_requests_dropped();
        log::error!(
            "Dropping {} after {} transmissions",
            exchange.request,
            exchange.transmissions
        );
        exchange.complete(Outcome::Dropped(DropReason::RetriesExhausted));

        if !exchange.probe && kind != RequestKind::BroadcastGroupSwitch {
            if let Some(mac) = mac {
                self.probe(mac);
            }
        }
        vec![Effect::Event(SessionEvent::RequestDropped { mac, kind })]
    }

    fn probe(&mut self, mac: MacAddress) {
        if self.is_queued_or_pending(Some(mac), RequestKind::Ping) {
            log::debug!("Availability ping for {} already outstanding", mac);
            return;
        }
        log::info!("Probing availability of {}", mac);
        self.statistics.increment_probes_sent();
        let exchange = Exchange::new(
            Request::Ping { mac },
            Priority::Low,
            self.settings.probe_retries,
            true,
            None,
        );
        self.queue.push(Priority::Low, exchange);
    }

    fn close(&mut self, reason: Option<String>) -> Vec<Effect> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        self.awaiting_ack = None;
        for mut exchange in self.queue.drain() {
            exchange.complete(Outcome::Dropped(DropReason::Closed));
        }
        for (_, mut pending) in self.pending.drain() {
            pending.exchange.complete(Outcome::Dropped(DropReason::Closed));
        }
        match &reason {
            Some(error) => log::error!("Session closed: {}", error),
            None => log::info!("Session closed"),
        }
        vec![Effect::Event(SessionEvent::ConnectionClosed(reason))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugwise_protocol::NodeResponseCode;
    use tokio::sync::oneshot;
    use tokio::time::Duration;

    fn mac() -> MacAddress {
        "000D6F0000468F71".parse().unwrap()
    }

    fn exchange(
        request: Request,
        priority: Priority,
        retries: u8,
    ) -> (Exchange, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (Exchange::new(request, priority, retries, false, Some(tx)), rx)
    }

    fn written(effects: &[Effect]) -> Vec<(SequenceId, Request)> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Write { seq, frame } => Some((*seq, Request::decode(frame).unwrap())),
                _ => None,
            })
            .collect()
    }

    fn stick_ack(seq: SequenceId, ack: StickAck) -> Signal {
        Signal::Inbound(Response::new(seq, None, ResponseBody::StickAck(ack)))
    }

    #[test]
    fn test_high_priority_overtakes_medium() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(SessionSettings::new());
        let (first, _r1) = exchange(Request::Ping { mac: mac() }, Priority::Low, 0);
        let effects = dispatcher.submit(first, now).unwrap();
        assert_eq!(written(&effects).len(), 1);

        let (medium, _r2) = exchange(Request::NodeInfo { mac: mac() }, Priority::Medium, 0);
        let switch_on = Request::RelaySwitch { mac: mac(), on: true };
        let (high, _r3) = exchange(switch_on, Priority::High, 0);
        assert!(dispatcher.submit(medium, now).unwrap().is_empty());
        assert!(dispatcher.submit(high, now).unwrap().is_empty());

        let effects = dispatcher.handle(stick_ack(SequenceId::new(0), StickAck::Accepted), now);
        let sent = written(&effects);
        assert_eq!(sent[0].1, Request::RelaySwitch { mac: mac(), on: true });
    }

    #[test]
    fn test_ack_only_request_completes_on_accept() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(SessionSettings::new());
        let (join, mut rx) = exchange(Request::AllowJoining { enable: true }, Priority::Medium, 2);
        dispatcher.submit(join, now).unwrap();
        dispatcher.handle(stick_ack(SequenceId::new(0), StickAck::Accepted), now);
        assert!(matches!(rx.try_recv(), Ok(Outcome::Response(_))));
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_stick_assigned_sequence_rekeys_pending() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(SessionSettings::new());
        let switch_off = Request::RelaySwitch { mac: mac(), on: false };
        let (relay, mut rx) = exchange(switch_off, Priority::High, 2);
        let effects = dispatcher.submit(relay, now).unwrap();
        assert_eq!(written(&effects)[0].0, SequenceId::new(0));

        let actual = SequenceId::new(0x0105);
        dispatcher.handle(stick_ack(actual, StickAck::Accepted), now);
        assert_eq!(dispatcher.expected_kind(actual), Some(ResponseKind::NodeResponse));

        let response = Response::new(
            actual,
            Some(mac()),
            ResponseBody::NodeResponse(NodeResponseCode::RelaySwitchedOff),
        );
        let effects = dispatcher.handle(Signal::Inbound(response.clone()), now);
        assert_eq!(effects, vec![Effect::Event(SessionEvent::Response(response.clone()))]);
        assert_eq!(rx.try_recv().unwrap(), Outcome::Response(response));

        let (next, _rx) = exchange(Request::Ping { mac: mac() }, Priority::Medium, 0);
        let effects = dispatcher.submit(next, now).unwrap();
        assert_eq!(written(&effects)[0].0, SequenceId::new(0x0106));
    }

    #[test]
    fn test_duplicate_rejected() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(SessionSettings::new());
        let (a, _ra) = exchange(Request::NodeInfo { mac: mac() }, Priority::Low, 0);
        let (b, _rb) = exchange(Request::NodeInfo { mac: mac() }, Priority::High, 0);
        dispatcher.submit(a, now).unwrap();
        assert!(matches!(
            dispatcher.submit(b, now),
            Err(StickError::DuplicateRequest { .. })
        ));
        let (logs_a, _rc) = exchange(
            Request::EnergyLogs { mac: mac(), log_address: 1 },
            Priority::Low,
            0,
        );
        let (logs_b, _rd) = exchange(
            Request::EnergyLogs { mac: mac(), log_address: 2 },
            Priority::Low,
            0,
        );
        dispatcher.submit(logs_a, now).unwrap();
        dispatcher.submit(logs_b, now).unwrap();
        assert_eq!(dispatcher.statistics().duplicates_dropped, 1);
        assert_eq!(dispatcher.queued(), 2);
        assert!(dispatcher.busy());
    }

    #[test]
    fn test_exhausted_request_dropped_once_then_probed() {
        let settings = SessionSettings::new();
        let timeout = settings.response_timeout + Duration::from_secs(1);
        let mut dispatcher = Dispatcher::new(settings);
        let mut now = Instant::now();
        let (info, mut rx) = exchange(Request::NodeInfo { mac: mac() }, Priority::Medium, 2);

        let mut sent = written(&dispatcher.submit(info, now).unwrap());
        let mut events = Vec::new();
        for _ in 0..6 {
            let (seq, _) = *sent.last().unwrap();
            dispatcher.handle(stick_ack(seq, StickAck::Accepted), now);
            now += timeout;
            let effects = dispatcher.handle(Signal::Sweep, now);
            sent.extend(written(&effects));
            events.extend(effects.into_iter().filter(|e| matches!(e, Effect::Event(_))));
        }

        let kinds: Vec<_> = sent.iter().map(|(_, request)| request.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                RequestKind::NodeInfo,
                RequestKind::NodeInfo,
                RequestKind::NodeInfo,
                RequestKind::Ping
            ]
        );
        assert_eq!(
            events,
            vec![
                Effect::Event(SessionEvent::RequestDropped {
                    mac: Some(mac()),
                    kind: RequestKind::NodeInfo
                }),
                Effect::Event(SessionEvent::RequestDropped {
                    mac: Some(mac()),
                    kind: RequestKind::Ping
                }),
            ]
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Outcome::Dropped(DropReason::RetriesExhausted)
        );
        let stats = dispatcher.statistics();
        assert_eq!(stats.retransmissions, 2);
        assert_eq!(stats.probes_sent, 1);
        assert_eq!(stats.requests_dropped, 2);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_stick_failure_retries_immediately() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(SessionSettings::new());
        let (ping, _rx) = exchange(Request::Ping { mac: mac() }, Priority::Medium, 1);
        dispatcher.submit(ping, now).unwrap();
        let effects = dispatcher.handle(stick_ack(SequenceId::new(0), StickAck::Failed), now);
        assert_eq!(written(&effects).len(), 1);
        assert_eq!(dispatcher.statistics().stick_failures, 1);
        assert_eq!(dispatcher.statistics().retransmissions, 1);
    }

    #[test]
    fn test_ack_timeout_releases_send_path() {
        let settings = SessionSettings::new();
        let ack_timeout = settings.ack_timeout;
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(settings);
        let (a, _ra) = exchange(Request::Ping { mac: mac() }, Priority::Medium, 0);
        let (b, _rb) = exchange(Request::NodeInfo { mac: mac() }, Priority::Medium, 0);
        dispatcher.submit(a, now).unwrap();
        assert!(dispatcher.submit(b, now).unwrap().is_empty());
        assert!(dispatcher.handle(Signal::AckTimeout, now).is_empty());

        let later = now + ack_timeout;
        let effects = dispatcher.handle(Signal::AckTimeout, later);
        assert_eq!(written(&effects)[0].1.kind(), RequestKind::NodeInfo);
        assert_eq!(dispatcher.statistics().stick_timeouts, 1);
        assert_eq!(dispatcher.pending(), 2);
    }

    #[test]
    fn test_close_drops_everything() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(SessionSettings::new());
        let (a, mut ra) = exchange(Request::Ping { mac: mac() }, Priority::Medium, 0);
        let (b, mut rb) = exchange(Request::NodeInfo { mac: mac() }, Priority::Medium, 0);
        dispatcher.submit(a, now).unwrap();
        dispatcher.submit(b, now).unwrap();
        let effects = dispatcher.handle(Signal::Closed(Some("gone".into())), now);
        assert_eq!(
            effects,
            vec![Effect::Event(SessionEvent::ConnectionClosed(Some("gone".into())))]
        );
        assert_eq!(ra.try_recv().unwrap(), Outcome::Dropped(DropReason::Closed));
        assert_eq!(rb.try_recv().unwrap(), Outcome::Dropped(DropReason::Closed));
        let (c, _rc) = exchange(Request::Ping { mac: mac() }, Priority::Medium, 0);
        assert!(matches!(dispatcher.submit(c, now), Err(StickError::Closed)));
    }

    #[test]
    fn test_rejected_frames_counted() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(SessionSettings::new());
        dispatcher.handle(
            Signal::Rejected(StickError::ChecksumMismatch {
                expected: "0000".into(),
                actual: "FFFF".into(),
            }),
            now,
        );
        dispatcher.handle(Signal::Rejected(StickError::UnknownMessage("00FF".into())), now);
        let stats = dispatcher.statistics();
        assert_eq!(stats.frames_rejected, 2);
        assert_eq!(stats.checksum_errors, 1);
        assert_eq!(stats.unknown_frames, 1);
    }
}
