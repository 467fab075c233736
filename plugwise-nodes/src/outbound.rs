//! Requests and notifications produced by node state machines
//!
//! Nodes never talk to the session controller themselves. Every state change returns
//! the requests to submit and the events to publish; the owner of the directory
//! carries them out in order.

use plugwise_protocol::Request;
use plugwise_session::Priority;

use crate::event::NodeEvent;

/// A request to submit to the session controller
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub request: Request,
    pub priority: Priority,
    /// Retry budget; the session default when `None`
    pub retries: Option<u8>,
    /// Reachability check; a drop of this request never triggers another probe
    pub probe: bool,
}

impl Outbound {
    pub fn new(request: Request, priority: Priority) -> Self {
        Self {
            request,
            priority,
            retries: None,
            probe: false,
        }
    }

    /// Low priority reachability check with a single retry
    pub fn probe(request: Request) -> Self {
        Self {
            request,
            priority: Priority::Low,
            retries: Some(1),
            probe: true,
        }
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// Outcome of feeding one input to a node or the directory
#[derive(Debug, Default)]
pub struct Actions {
    pub outbound: Vec<Outbound>,
    pub events: Vec<NodeEvent>,
}

impl Actions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, outbound: Outbound) {
        self.outbound.push(outbound);
    }

    pub fn emit(&mut self, event: NodeEvent) {
        self.events.push(event);
    }

    pub fn append(&mut self, mut other: Actions) {
        self.outbound.append(&mut other.outbound);
        self.events.append(&mut other.events);
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.events.is_empty()
    }
}

impl From<Vec<Outbound>> for Actions {
    fn from(outbound: Vec<Outbound>) -> Self {
        Self {
            outbound,
            events: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_defaults() {
        let mac = "000D6F0000468F71".parse().unwrap();
        let probe = Outbound::probe(Request::Ping { mac });
        assert_eq!(probe.priority, Priority::Low);
        assert_eq!(probe.retries, Some(1));
        assert!(probe.probe);
        let plain = Outbound::new(Request::Ping { mac }, Priority::High).with_retries(0);
        assert_eq!(plain.retries, Some(0));
        assert!(!plain.probe);
    }

    #[test]
    fn test_append_keeps_order() {
        let mac = "000D6F0000468F71".parse().unwrap();
        let mut first = Actions::new();
        first.send(Outbound::new(Request::Ping { mac }, Priority::Low));
        first.emit(NodeEvent::NodeRemoved { mac });
        let mut second = Actions::new();
        second.send(Outbound::new(Request::Calibration { mac }, Priority::Low));
        first.append(second);
        assert_eq!(first.outbound.len(), 2);
        assert_eq!(first.outbound[1].request, Request::Calibration { mac });
        assert_eq!(first.events.len(), 1);
        assert!(!first.is_empty());
    }
}
