//! Requests in flight
//!
//! An [`Exchange`] is one logical request including all of its retransmissions. It
//! waits in the send queue, becomes a [`PendingRequest`] once written, and goes back
//! into the queue for every retry.

use plugwise_core::MacAddress;
use plugwise_protocol::{Request, RequestKind, Response};
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};

use crate::queue::Priority;

/// Why a request was given up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No response after the initial transmission and every retry
    RetriesExhausted,
    /// The session closed first
    Closed,
}

/// Final result delivered to the submitter of a request
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The completing response, a stick acknowledge for ack-only requests
    Response(Response),
    Dropped(DropReason),
}

/// One logical request and its retry state
#[derive(Debug)]
pub struct Exchange {
    pub request: Request,
    pub priority: Priority,
    /// Retransmissions still allowed
    pub retries_left: u8,
    /// Transmissions so far
    pub transmissions: u8,
    /// Issued to test reachability; never followed by another probe
    pub probe: bool,
    completion: Option<oneshot::Sender<Outcome>>,
}

impl Exchange {
    pub fn new(
        request: Request,
        priority: Priority,
        retries: u8,
        probe: bool,
        completion: Option<oneshot::Sender<Outcome>>,
    ) -> Self {
        Self {
            request,
            priority,
            retries_left: retries,
            transmissions: 0,
            probe,
            completion,
        }
    }

    /// Identity used for duplicate suppression
    pub fn key(&self) -> (Option<MacAddress>, RequestKind) {
        (self.request.mac(), self.request.kind())
    }

    /// Deliver the outcome to the submitter, at most once
    pub fn complete(&mut self, outcome: Outcome) {
        if let Some(completion) = self.completion.take() {
            // The submitter may have stopped waiting.
            let _ = completion.send(outcome);
        }
    }
}

/// A written request waiting for its response
#[derive(Debug)]
pub struct PendingRequest {
    pub exchange: Exchange,
    sent_at: Instant,
    acked: bool,
}

impl PendingRequest {
    pub fn new(exchange: Exchange, sent_at: Instant) -> Self {
        Self {
            exchange,
            sent_at,
            acked: false,
        }
    }

    /// The stick accepted the frame
    pub fn mark_acked(&mut self) {
        self.acked = true;
    }

    pub fn is_acked(&self) -> bool {
        self.acked
    }

    /// Whether the response window has passed
    ///
    /// # Arguments
    ///
    /// * `now` - Current instant
    /// * `timeout` - Response window measured from the last transmission
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.sent_at) > timeout
    }

    pub fn sent_at(&self) -> Instant {
        self.sent_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> Request {
        Request::Ping {
            mac: "000D6F0000468F71".parse().unwrap(),
        }
    }

    #[test]
    fn test_complete_once() {
        let (tx, mut rx) = oneshot::channel();
        let mut exchange = Exchange::new(ping(), Priority::Medium, 2, false, Some(tx));
        exchange.complete(Outcome::Dropped(DropReason::Closed));
        exchange.complete(Outcome::Dropped(DropReason::RetriesExhausted));
        assert_eq!(rx.try_recv().unwrap(), Outcome::Dropped(DropReason::Closed));
    }

    #[test]
    fn test_stale_after_timeout() {
        let start = Instant::now();
        let exchange = Exchange::new(ping(), Priority::Low, 0, true, None);
        let pending = PendingRequest::new(exchange, start);
        assert!(!pending.is_stale(start + Duration::from_secs(60), Duration::from_secs(60)));
        assert!(pending.is_stale(start + Duration::from_secs(61), Duration::from_secs(60)));
        assert!(!pending.is_acked());
        assert_eq!(pending.exchange.key().1, RequestKind::Ping);
    }
}
