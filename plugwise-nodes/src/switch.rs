//! Wall switch nodes

use plugwise_core::MacAddress;

use crate::capability::{Reading, Sensing};
use crate::event::NodeEvent;

/// Last reported position of a battery wall switch
#[derive(Debug, Clone)]
pub struct ButtonSwitch {
    mac: MacAddress,
    state: Option<bool>,
}

impl ButtonSwitch {
    pub fn new(mac: MacAddress) -> Self {
        Self { mac, state: None }
    }

    pub fn state(&self) -> Option<bool> {
        self.state
    }

    pub fn on_switch_group(&mut self, power_state: bool) -> Option<NodeEvent> {
        if self.state == Some(power_state) {
            return None;
        }
        self.state = Some(power_state);
        Some(NodeEvent::SwitchChanged {
            mac: self.mac,
            on: power_state,
        })
    }
}

impl Sensing for ButtonSwitch {
    fn readings(&self) -> Vec<Reading> {
        self.state.map(Reading::Switch).into_iter().collect()
    }
}
