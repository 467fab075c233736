//! Energy accounting for Plugwise metering nodes
//!
//! Converts raw pulses to calibrated energy and keeps hour, day and week counters for
//! consumption and production, fed by live pulse counters and the node's log buffer.

pub mod calibration;
pub mod collection;
pub mod counter;
pub mod error;
pub mod pulses;

pub use calibration::{Calibration, correct_pulses, pulses_to_kws};
pub use collection::{EnergyCollection, LogMarker, LogRecord};
pub use counter::{CounterKind, EnergyCounter, PulseStats};
pub use error::{StickError, StickResult};
pub use pulses::{Direction, LogPosition, PulseInterval, PulseLog};
