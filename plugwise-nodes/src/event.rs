//! Domain events published for discovered nodes

use plugwise_core::{MacAddress, NodeType};
use plugwise_energy::CounterKind;
use std::fmt;

/// Node setting that a node acknowledged or refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    Clock,
    RealTimeClock,
    SleepConfig,
    ScanConfig,
    LightCalibration,
    SenseInterval,
    SenseBoundaries,
    LogInterval,
    InitialRelayState,
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Setting::Clock => "clock",
            Setting::RealTimeClock => "real-time clock",
            Setting::SleepConfig => "sleep configuration",
            Setting::ScanConfig => "scan configuration",
            Setting::LightCalibration => "light calibration",
            Setting::SenseInterval => "sense report interval",
            Setting::SenseBoundaries => "sense boundaries",
            Setting::LogInterval => "log interval",
            Setting::InitialRelayState => "initial relay state",
        };
        f.write_str(name)
    }
}

/// Something that happened to a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// Type of a node became known
    Discovered { mac: MacAddress, node_type: NodeType },
    /// An unknown node asks to join and waits for acceptance
    JoinRequest { mac: MacAddress },
    AvailabilityChanged { mac: MacAddress, available: bool },
    RelayChanged { mac: MacAddress, on: bool },
    MotionChanged { mac: MacAddress, motion: bool },
    SwitchChanged { mac: MacAddress, on: bool },
    TemperatureChanged { mac: MacAddress, celsius: f64 },
    HumidityChanged { mac: MacAddress, percent: f64 },
    /// Average power over the last second and the last eight seconds, in watts
    PowerChanged {
        mac: MacAddress,
        last_second: f64,
        last_eight_seconds: f64,
    },
    /// A counter total in kWh
    EnergyChanged {
        mac: MacAddress,
        counter: CounterKind,
        kwh: f64,
    },
    PingUpdated {
        mac: MacAddress,
        rssi_in: i8,
        rssi_out: i8,
        round_trip_ms: u16,
    },
    /// Log interval of the node in minutes
    IntervalChanged {
        mac: MacAddress,
        consumption: Option<i64>,
        production: Option<i64>,
    },
    /// Registered nodes found in the coordinator's network table
    NetworkScanned {
        coordinator: MacAddress,
        nodes: Vec<(MacAddress, u8)>,
    },
    NodeRemoved { mac: MacAddress },
    Configured {
        mac: MacAddress,
        setting: Setting,
        accepted: bool,
    },
}

impl NodeEvent {
    /// Node the event is about
    pub fn mac(&self) -> MacAddress {
        match self {
            NodeEvent::Discovered { mac, .. }
            | NodeEvent::JoinRequest { mac }
            | NodeEvent::AvailabilityChanged { mac, .. }
            | NodeEvent::RelayChanged { mac, .. }
            | NodeEvent::MotionChanged { mac, .. }
            | NodeEvent::SwitchChanged { mac, .. }
            | NodeEvent::TemperatureChanged { mac, .. }
            | NodeEvent::HumidityChanged { mac, .. }
            | NodeEvent::PowerChanged { mac, .. }
            | NodeEvent::EnergyChanged { mac, .. }
            | NodeEvent::PingUpdated { mac, .. }
            | NodeEvent::IntervalChanged { mac, .. }
            | NodeEvent::NodeRemoved { mac }
            | NodeEvent::Configured { mac, .. } => *mac,
            NodeEvent::NetworkScanned { coordinator, .. } => *coordinator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_mac() {
        let mac: MacAddress = "000D6F0000468F71".parse().unwrap();
        let coordinator: MacAddress = "000D6F0000123456".parse().unwrap();
        assert_eq!(NodeEvent::RelayChanged { mac, on: true }.mac(), mac);
        let scanned = NodeEvent::NetworkScanned {
            coordinator,
            nodes: vec![(mac, 3)],
        };
        assert_eq!(scanned.mac(), coordinator);
        assert_eq!(Setting::SleepConfig.to_string(), "sleep configuration");
    }
}
