//! Energy counters
//!
//! A counter accumulates the pulses of one direction since its reset boundary: the
//! start of the local hour, the local day or the local week (Monday). Once an update
//! is timestamped past the next boundary the counter moves forward and starts over.

use crate::calibration::{Calibration, pulses_to_kws};
use crate::pulses::Direction;
use chrono::{DateTime, Datelike, Duration, FixedOffset, Local, NaiveTime, Timelike, Utc};
use std::fmt;

const HOUR_IN_SECONDS: f64 = 3600.0;

/// The six counters a metering node keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CounterKind {
    HourConsumption,
    HourProduction,
    DayConsumption,
    DayProduction,
    WeekConsumption,
    WeekProduction,
}

impl CounterKind {
    pub const ALL: [CounterKind; 6] = [
        CounterKind::HourConsumption,
        CounterKind::HourProduction,
        CounterKind::DayConsumption,
        CounterKind::DayProduction,
        CounterKind::WeekConsumption,
        CounterKind::WeekProduction,
    ];

    pub fn direction(&self) -> Direction {
        match self {
            CounterKind::HourConsumption
            | CounterKind::DayConsumption
            | CounterKind::WeekConsumption => {
                Direction::Consumption
            }
            _ => Direction::Production,
        }
    }

    /// Length of the accumulation window
    pub fn hours(&self) -> i64 {
        match self {
            CounterKind::HourConsumption | CounterKind::HourProduction => 1,
            CounterKind::DayConsumption | CounterKind::DayProduction => 24,
            CounterKind::WeekConsumption | CounterKind::WeekProduction => 168,
        }
    }

    /// Start of the window containing `now`
    ///
    /// # Arguments
    ///
    /// * `now` - Reference instant
    /// * `offset` - Local UTC offset the window aligns to
    pub fn window_start(&self, now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
        let local = now.with_timezone(&offset).naive_local();
        let start = match self.hours() {
            1 => local.date().and_time(NaiveTime::MIN) + Duration::hours(local.hour() as i64),
            24 => local.date().and_time(NaiveTime::MIN),
            _ => {
                local.date().and_time(NaiveTime::MIN)
                    - Duration::days(local.weekday().num_days_from_monday() as i64)
            }
        };
        (start - Duration::seconds(offset.local_minus_utc() as i64)).and_utc()
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CounterKind::HourConsumption => "hour consumption",
            CounterKind::HourProduction => "hour production",
            CounterKind::DayConsumption => "day consumption",
            CounterKind::DayProduction => "day production",
            CounterKind::WeekConsumption => "week consumption",
            CounterKind::WeekProduction => "week production",
        };
        f.write_str(name)
    }
}

/// Pulse total of a counter at one moment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseStats {
    pub timestamp: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub pulses: i64,
}

/// One bucket of accumulated energy
#[derive(Debug, Clone)]
pub struct EnergyCounter {
    kind: CounterKind,
    offset: Option<FixedOffset>,
    calibration: Option<Calibration>,
    energy: Option<f64>,
    statistics: Option<PulseStats>,
    reset: DateTime<Utc>,
    next_reset: DateTime<Utc>,
}

impl EnergyCounter {
    /// Create a counter whose window contains `now`
    ///
    /// # Arguments
    ///
    /// * `kind` - Which bucket
    /// * `now` - Current instant
    /// * `offset` - Fixed local offset; the system's local time when `None`
    pub fn new(kind: CounterKind, now: DateTime<Utc>, offset: Option<FixedOffset>) -> Self {
        let mut counter = Self {
            kind,
            offset,
            calibration: None,
            energy: None,
            statistics: None,
            reset: now,
            next_reset: now,
        };
        counter.align(now);
        counter
    }

    pub fn kind(&self) -> CounterKind {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        self.kind.direction()
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub fn set_calibration(&mut self, calibration: Calibration) {
        self.calibration = Some(calibration);
    }

    /// Energy since the last reset, unknown until calibrated and updated
    pub fn energy(&self) -> Option<f64> {
        self.energy
    }

    pub fn statistics(&self) -> Option<&PulseStats> {
        self.statistics.as_ref()
    }

    /// Start of the current window
    pub fn reset(&self) -> DateTime<Utc> {
        self.reset
    }

    pub fn next_reset(&self) -> DateTime<Utc> {
        self.next_reset
    }

    /// Whether the last update lies at or past the end of the window
    pub fn expired(&self) -> bool {
        self.statistics
            .is_some_and(|stats| stats.timestamp >= self.next_reset)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.statistics.map(|stats| stats.timestamp)
    }

    /// Apply a new pulse total
    ///
    /// # Returns
    ///
    /// `true` when the update crossed the window end; the counter then moved forward,
    /// cleared its energy and expects a total computed from the new reset.
    pub fn update(&mut self, statistics: PulseStats) -> bool {
        let rolled = statistics.timestamp >= self.next_reset;
        if rolled {
            self.align(statistics.timestamp);
            self.energy = None;
            log::debug!("Energy counter {} reset to {}", self.kind, self.reset);
        } else {
            self.energy = self
                .calibration
                .map(|calibration| {
                    pulses_to_kws(statistics.pulses as f64, &calibration, HOUR_IN_SECONDS)
                });
        }
        self.statistics = Some(statistics);
        rolled
    }

    fn align(&mut self, now: DateTime<Utc>) {
        let offset = self.offset.unwrap_or_else(|| *Local::now().offset());
        self.reset = self.kind.window_start(now, offset);
        self.next_reset = self.reset + Duration::hours(self.kind.hours());
    }
}
