//! Pulse records: live interval counters and dated log slots

use crate::error::{StickError, StickResult};
use chrono::{DateTime, Utc};
use plugwise_core::constants::LOG_SLOTS;
use std::fmt;

/// Position of one dated record in a node's log buffer
///
/// Each log address holds four slots, numbered 0 to 3; the slot after 3 is slot 0
/// of the next address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogPosition {
    pub address: i32,
    pub slot: u8,
}

impl LogPosition {
    /// Create a position
    ///
    /// # Errors
    ///
    /// `StickError::InvalidData` for a slot outside 0..=3
    pub fn new(address: i32, slot: u8) -> StickResult<Self> {
        if slot >= LOG_SLOTS {
            return Err(StickError::InvalidData(format!("log slot {} out of range", slot)));
        }
        Ok(Self { address, slot })
    }

    /// Position `offset` slots away, crossing address boundaries
    pub fn step(&self, offset: i32) -> Self {
        let slots = LOG_SLOTS as i32;
        let index = self.address * slots + self.slot as i32 + offset;
        Self {
            address: index.div_euclid(slots),
            slot: index.rem_euclid(slots) as u8,
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.slot)
    }
}

/// Which way energy flowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Consumption,
    Production,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Consumption, Direction::Production];

    pub(crate) fn index(&self) -> usize {
        match self {
            Direction::Consumption => 0,
            Direction::Production => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Consumption => write!(f, "consumption"),
            Direction::Production => write!(f, "production"),
        }
    }
}

/// One slot of a retrieved log buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseLog {
    pub position: LogPosition,
    pub timestamp: DateTime<Utc>,
    pub pulses: i64,
}

/// Live pulse counters of the current log interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseInterval {
    pub timestamp: DateTime<Utc>,
    pub consumption: i64,
    pub production: i64,
}

impl PulseInterval {
    pub fn pulses(&self, direction: Direction) -> i64 {
        match direction {
            Direction::Consumption => self.consumption,
            Direction::Production => self.production,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_range() {
        assert!(LogPosition::new(10, 3).is_ok());
        assert!(LogPosition::new(10, 4).is_err());
    }

    #[test]
    fn test_step_crosses_addresses() {
        let position = LogPosition::new(10, 3).unwrap();
        assert_eq!(position.step(1), LogPosition { address: 11, slot: 0 });
        assert_eq!(position.step(-4), LogPosition { address: 9, slot: 3 });
        let first = LogPosition::new(10, 0).unwrap();
        assert_eq!(first.step(-1), LogPosition { address: 9, slot: 3 });
        assert_eq!(first.step(9), LogPosition { address: 12, slot: 1 });
        assert_eq!(first.step(0), first);
    }

    #[test]
    fn test_ordering_follows_time() {
        let a = LogPosition::new(9, 3).unwrap();
        let b = LogPosition::new(10, 0).unwrap();
        assert!(a < b);
        assert_eq!(b.to_string(), "10/0");
    }
}
