//! Protocol constants shared by all layers

use std::time::Duration;

/// Fixed frame header
pub const MESSAGE_HEADER: &[u8; 4] = b"\x05\x05\x03\x03";
/// Fixed frame footer
pub const MESSAGE_FOOTER: &[u8; 2] = b"\x0d\x0a";
/// Byte the stick sometimes appends after a footer
pub const TRAILING_NOISE: u8 = 0x83;

/// Footer position of a generic acknowledge without device address
pub const SMALL_ACK_FOOTER_INDEX: usize = 20;
/// Footer position of a generic acknowledge carrying a device address
pub const LARGE_ACK_FOOTER_INDEX: usize = 36;

/// Serial line speed of the stick
pub const STICK_BAUD_RATE: u32 = 115_200;

/// Bounded wait for a stick acknowledge after writing a frame
pub const MESSAGE_TIME_OUT: Duration = Duration::from_secs(15);
/// Age after which a pending request without response is expired
pub const RESPONSE_TIME_OUT: Duration = Duration::from_secs(60);
/// Default number of retries after the first transmission
pub const MESSAGE_RETRY: u8 = 2;
/// Idle poll of worker loops
pub const SLEEP_TIME: Duration = Duration::from_millis(150);

/// Largest clock drift in seconds tolerated before a clock is set
pub const MAX_TIME_DRIFT: i64 = 5;

/// Offset of log address 0 in node flash memory
pub const LOGADDR_OFFSET: i64 = 278_528;
/// Size of one log address in node flash memory
pub const LOGADDR_STEP: i64 = 32;
/// Number of dated slots in one log address
pub const LOG_SLOTS: u8 = 4;

/// Calibrated pulses per kilowatt second
pub const PULSES_PER_KW_SECOND: f64 = 468.938_519_3;

/// Epoch of the two-digit year fields
pub const PLUGWISE_EPOCH: i32 = 2000;

/// Number of addresses in the coordinator's network table
pub const MAX_NETWORK_NODES: u8 = 64;

// Sleeping end device defaults
pub const SED_STAY_ACTIVE: u8 = 10;
pub const SED_SLEEP_FOR: u16 = 60;
pub const SED_MAINTENANCE_INTERVAL: u16 = 1440;
pub const SED_CLOCK_SYNC: bool = true;
pub const SED_CLOCK_INTERVAL: u16 = 25_200;

// Scan defaults
pub const SCAN_MOTION_RESET_TIMER: u8 = 5;
pub const SCAN_DAYLIGHT_MODE: bool = false;

// Sense conversion
pub const SENSE_TEMPERATURE_MULTIPLIER: f64 = 175.72;
pub const SENSE_TEMPERATURE_OFFSET: f64 = 46.85;
pub const SENSE_HUMIDITY_MULTIPLIER: f64 = 125.0;
pub const SENSE_HUMIDITY_OFFSET: f64 = 6.0;
pub const SENSE_NO_READING: i64 = 65_535;
