//! Notifications raised by the session controller

use plugwise_core::MacAddress;
use plugwise_protocol::{RequestKind, Response};

/// Something the layers above the controller need to know about
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A node response, correlated or unsolicited; stick acknowledges are not forwarded
    Response(Response),
    /// A request was given up after exhausting its retries
    RequestDropped {
        mac: Option<MacAddress>,
        kind: RequestKind,
    },
    /// The link went away, with the failure text if it failed
    ConnectionClosed(Option<String>),
}

impl SessionEvent {
    /// Whether a dropped request was a reachability check of its node
    pub fn is_dropped_probe(&self) -> bool {
        matches!(
            self,
            SessionEvent::RequestDropped {
                kind: RequestKind::Ping | RequestKind::NodeInfo,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropped_probe_kinds() {
        let mac = "000D6F0000468F71".parse().ok();
        assert!(SessionEvent::RequestDropped {
            mac,
            kind: RequestKind::NodeInfo
        }
        .is_dropped_probe());
        assert!(!SessionEvent::RequestDropped {
            mac,
            kind: RequestKind::RelaySwitch
        }
        .is_dropped_probe());
        assert!(!SessionEvent::ConnectionClosed(None).is_dropped_probe());
    }
}
