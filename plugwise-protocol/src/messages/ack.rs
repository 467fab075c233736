//! Acknowledge codes and wake reasons

use std::fmt;

/// Result of a frame as reported by the stick itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StickAck {
    Accepted,
    Failed,
    Timeout,
    Unknown(u16),
}

impl StickAck {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x00C1 => StickAck::Accepted,
            0x00C2 => StickAck::Failed,
            0x00E1 => StickAck::Timeout,
            other => StickAck::Unknown(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            StickAck::Accepted => 0x00C1,
            StickAck::Failed => 0x00C2,
            StickAck::Timeout => 0x00E1,
            StickAck::Unknown(code) => *code,
        }
    }
}

/// Acknowledge sent by a node in the generic acknowledge frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeResponseCode {
    ClockAccepted,
    RelaySwitchedOn,
    JoinAccepted,
    CalibrationAccepted,
    CirclePlus,
    RelaySwitchedOff,
    RealTimeClockAccepted,
    RelaySwitchFailed,
    RealTimeClockFailed,
    SleepConfigAccepted,
    SleepConfigFailed,
    LogIntervalAccepted,
    Unknown(u16),
}

impl NodeResponseCode {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x00D7 => NodeResponseCode::ClockAccepted,
            0x00D8 => NodeResponseCode::RelaySwitchedOn,
            0x00D9 => NodeResponseCode::JoinAccepted,
            0x00DA => NodeResponseCode::CalibrationAccepted,
            0x00DD => NodeResponseCode::CirclePlus,
            0x00DE => NodeResponseCode::RelaySwitchedOff,
            0x00DF => NodeResponseCode::RealTimeClockAccepted,
            0x00E2 => NodeResponseCode::RelaySwitchFailed,
            0x00E7 => NodeResponseCode::RealTimeClockFailed,
            0x00F6 => NodeResponseCode::SleepConfigAccepted,
            0x00F7 => NodeResponseCode::SleepConfigFailed,
            0x00F8 => NodeResponseCode::LogIntervalAccepted,
            other => NodeResponseCode::Unknown(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            NodeResponseCode::ClockAccepted => 0x00D7,
            NodeResponseCode::RelaySwitchedOn => 0x00D8,
            NodeResponseCode::JoinAccepted => 0x00D9,
            NodeResponseCode::CalibrationAccepted => 0x00DA,
            NodeResponseCode::CirclePlus => 0x00DD,
            NodeResponseCode::RelaySwitchedOff => 0x00DE,
            NodeResponseCode::RealTimeClockAccepted => 0x00DF,
            NodeResponseCode::RelaySwitchFailed => 0x00E2,
            NodeResponseCode::RealTimeClockFailed => 0x00E7,
            NodeResponseCode::SleepConfigAccepted => 0x00F6,
            NodeResponseCode::SleepConfigFailed => 0x00F7,
            NodeResponseCode::LogIntervalAccepted => 0x00F8,
            NodeResponseCode::Unknown(code) => *code,
        }
    }
}

/// Acknowledge sent by nodes speaking the newer acknowledge message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeAckCode {
    SenseIntervalAccepted,
    SenseIntervalFailed,
    SenseBoundariesAccepted,
    SenseBoundariesFailed,
    LightCalibrationAccepted,
    ScanConfigAccepted,
    ScanConfigFailed,
    Unknown(u16),
}

impl NodeAckCode {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x00B3 => NodeAckCode::SenseIntervalAccepted,
            0x00B4 => NodeAckCode::SenseIntervalFailed,
            0x00B5 => NodeAckCode::SenseBoundariesAccepted,
            0x00B6 => NodeAckCode::SenseBoundariesFailed,
            0x00BD => NodeAckCode::LightCalibrationAccepted,
            0x00BE => NodeAckCode::ScanConfigAccepted,
            0x00BF => NodeAckCode::ScanConfigFailed,
            other => NodeAckCode::Unknown(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            NodeAckCode::SenseIntervalAccepted => 0x00B3,
            NodeAckCode::SenseIntervalFailed => 0x00B4,
            NodeAckCode::SenseBoundariesAccepted => 0x00B5,
            NodeAckCode::SenseBoundariesFailed => 0x00B6,
            NodeAckCode::LightCalibrationAccepted => 0x00BD,
            NodeAckCode::ScanConfigAccepted => 0x00BE,
            NodeAckCode::ScanConfigFailed => 0x00BF,
            NodeAckCode::Unknown(code) => *code,
        }
    }
}

/// Why a sleeping node announced itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwakeReason {
    /// Periodic maintenance wake
    Maintenance,
    /// First wake after joining
    First,
    /// Wake after a restart, e.g. new batteries
    Startup,
    /// Wake to report a sensor state
    State,
    Unknown,
    /// Wake caused by a button press
    Button,
    Other(u8),
}

impl AwakeReason {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => AwakeReason::Maintenance,
            1 => AwakeReason::First,
            2 => AwakeReason::Startup,
            3 => AwakeReason::State,
            4 => AwakeReason::Unknown,
            5 => AwakeReason::Button,
            other => AwakeReason::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            AwakeReason::Maintenance => 0,
            AwakeReason::First => 1,
            AwakeReason::Startup => 2,
            AwakeReason::State => 3,
            AwakeReason::Unknown => 4,
            AwakeReason::Button => 5,
            AwakeReason::Other(code) => *code,
        }
    }

    /// Whether queued requests may be sent during this wake window
    ///
    /// A state report wake is too short to carry queued traffic.
    pub fn flushes_queue(&self) -> bool {
        matches!(
            self,
            AwakeReason::Maintenance
                | AwakeReason::First
                | AwakeReason::Startup
                | AwakeReason::Button
        )
    }
}

impl fmt::Display for AwakeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AwakeReason::Maintenance => write!(f, "maintenance"),
            AwakeReason::First => write!(f, "first"),
            AwakeReason::Startup => write!(f, "startup"),
            AwakeReason::State => write!(f, "state"),
            AwakeReason::Unknown => write!(f, "unknown"),
            AwakeReason::Button => write!(f, "button"),
            AwakeReason::Other(code) => write!(f, "other ({})", code),
        }
    }
}
