//! Capability interfaces of discovered nodes
//!
//! A node's type selects which components it carries at discovery. Callers reach
//! those components through these traits instead of matching on the node type.

use plugwise_core::MacAddress;
use plugwise_energy::{Calibration, CounterKind, EnergyCollection};
use plugwise_protocol::Request;

/// Latest power reading of a metering node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Power {
    /// Watts averaged over the last second
    pub last_second: f64,
    /// Watts averaged over the last eight seconds
    pub last_eight_seconds: f64,
}

/// One sensor value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Motion(bool),
    Temperature(f64),
    Humidity(f64),
    Switch(bool),
}

/// Nodes with a relay
pub trait Switchable {
    /// Last confirmed relay state
    fn relay(&self) -> Option<bool>;

    /// Relay state applied after power loss, once read or configured
    fn initial_relay_state(&self) -> Option<bool>;

    fn switch_request(&self, mac: MacAddress, on: bool) -> Request {
        Request::RelaySwitch { mac, on }
    }
}

/// Nodes with a power meter
pub trait Meterable {
    fn calibration(&self) -> Option<&Calibration>;

    fn power(&self) -> Option<Power>;

    /// Total of one energy counter in kWh
    fn energy(&self, counter: CounterKind) -> Option<f64> {
        self.collection().energy(counter)
    }

    fn collection(&self) -> &EnergyCollection;
}

/// Nodes reporting sensor values
pub trait Sensing {
    /// Values received so far; unknown readings are left out
    fn readings(&self) -> Vec<Reading>;
}
