//! Energy collection of one metering node
//!
//! Two pulse sources feed the counters: the live pulse counters of the current log
//! interval, reported by power usage responses, and the dated history slots of the
//! node's log buffer. A counter total is the sum of the logs since its reset plus the
//! live pulses.
//!
//! Both sources wrap independently when a log interval ends: the live counter drops
//! back to zero and a new history slot appears. Whichever is observed first raises a
//! rollover flag for its direction and the counters of that direction hold their last
//! value until the other side catches up.

use crate::calibration::Calibration;
use crate::counter::{CounterKind, EnergyCounter, PulseStats};
use crate::pulses::{Direction, LogPosition, PulseInterval, PulseLog};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use plugwise_core::constants::LOG_SLOTS;
use std::collections::BTreeMap;

/// Stored history slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub pulses: i64,
    pub direction: Direction,
}

/// Position and timestamp of a notable log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogMarker {
    pub position: LogPosition,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Markers {
    first: Option<LogMarker>,
    second: Option<LogMarker>,
    before_last: Option<LogMarker>,
    last: Option<LogMarker>,
}

impl Markers {
    fn record(&mut self, marker: LogMarker) {
        if self.first.is_none() {
            self.first = Some(marker);
        } else if self.second.is_none() {
            self.second = Some(marker);
        }
        if self.last.is_some() {
            self.before_last = self.last;
        }
        self.last = Some(marker);
    }
}

/// Pulse logs, live pulses and counters of one metering node
#[derive(Debug, Clone)]
pub struct EnergyCollection {
    calibration: Option<Calibration>,
    counters: BTreeMap<CounterKind, EnergyCounter>,
    logs: BTreeMap<i32, BTreeMap<u8, LogRecord>>,
    latest_log: Option<PulseLog>,
    markers: [Markers; 2],
    production_logged: bool,
    pulses: Option<PulseInterval>,
    interval_pulses: [i64; 2],
    interval: [Option<Duration>; 2],
    interval_cleanup: [Option<Duration>; 2],
    rollover_pulses: [bool; 2],
    rollover_log: [bool; 2],
}

impl EnergyCollection {
    /// Create a collection with the given counters
    ///
    /// # Arguments
    ///
    /// * `kinds` - Counters to maintain
    /// * `now` - Current instant, aligns the counter windows
    /// * `offset` - Fixed local offset; the system's local time when `None`
    pub fn new(kinds: &[CounterKind], now: DateTime<Utc>, offset: Option<FixedOffset>) -> Self {
        let counters = kinds
            .iter()
            .map(|kind| (*kind, EnergyCounter::new(*kind, now, offset)))
            .collect();
        Self {
            calibration: None,
            counters,
            logs: BTreeMap::new(),
            latest_log: None,
            markers: [Markers::default(); 2],
            production_logged: false,
            pulses: None,
            interval_pulses: [0; 2],
            interval: [None; 2],
            interval_cleanup: [None; 2],
            rollover_pulses: [false; 2],
            rollover_log: [false; 2],
        }
    }

    /// Collection maintaining all six counters in system local time
    pub fn with_all_counters(now: DateTime<Utc>) -> Self {
        Self::new(&CounterKind::ALL, now, None)
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    /// Store the calibration and forward it to every counter
    pub fn set_calibration(&mut self, calibration: Calibration) {
        self.calibration = Some(calibration);
        for counter in self.counters.values_mut() {
            counter.set_calibration(calibration);
        }
    }

    pub fn counters(&self) -> impl Iterator<Item = &EnergyCounter> {
        self.counters.values()
    }

    pub fn counter(&self, kind: CounterKind) -> Option<&EnergyCounter> {
        self.counters.get(&kind)
    }

    /// Energy of one counter since its reset
    pub fn energy(&self, kind: CounterKind) -> Option<f64> {
        self.counters.get(&kind).and_then(EnergyCounter::energy)
    }

    /// Minutes between the two most recent logs of a direction
    pub fn interval_minutes(&self, direction: Direction) -> Option<i64> {
        self.interval[direction.index()].map(|interval| interval.num_minutes())
    }

    /// Apply a log interval the node accepted
    ///
    /// Shrinking the interval keeps logs of the previous, longer interval around for
    /// one more cleanup period.
    pub fn set_interval_minutes(&mut self, direction: Direction, minutes: i64) {
        let index = direction.index();
        if let Some(current) = self.interval[index] {
            if current.num_minutes() > minutes {
                self.interval_cleanup[index] = Some(current);
            }
        }
        self.interval[index] = Some(Duration::minutes(minutes));
    }

    /// Most recently received log
    pub fn latest_log(&self) -> Option<&PulseLog> {
        self.latest_log.as_ref()
    }

    pub fn log(&self, position: LogPosition) -> Option<&LogRecord> {
        self.logs.get(&position.address)?.get(&position.slot)
    }

    /// Number of stored slots
    pub fn log_count(&self) -> usize {
        self.logs.values().map(BTreeMap::len).sum()
    }

    pub fn first_log_address(&self) -> Option<i32> {
        self.logs.keys().next().copied()
    }

    pub fn last_log_address(&self) -> Option<i32> {
        self.logs.keys().next_back().copied()
    }

    /// Addresses with all four slots stored
    pub fn collected_addresses(&self) -> Vec<i32> {
        self.logs
            .iter()
            .filter(|(_, slots)| slots.len() == LOG_SLOTS as usize)
            .map(|(address, _)| *address)
            .collect()
    }

    pub fn is_collected(&self, address: i32) -> bool {
        self.logs
            .get(&address)
            .is_some_and(|slots| slots.len() == LOG_SLOTS as usize)
    }

    /// Oldest stored log of a direction
    pub fn first_log(&self, direction: Direction) -> Option<LogMarker> {
        self.markers[direction.index()].first
    }

    /// Newest stored log of a direction
    pub fn last_log(&self, direction: Direction) -> Option<LogMarker> {
        self.markers[direction.index()].last
    }

    /// Whether the node logs produced energy
    pub fn logs_production(&self) -> bool {
        self.production_logged
    }

    /// Live pulses last reported
    pub fn pulses(&self) -> Option<&PulseInterval> {
        self.pulses.as_ref()
    }

    /// Live counter wrapped before its log arrived
    pub fn pulse_rollover(&self, direction: Direction) -> bool {
        self.rollover_pulses[direction.index()]
    }

    /// Log arrived before the live counter wrapped
    pub fn log_rollover(&self, direction: Direction) -> bool {
        self.rollover_log[direction.index()]
    }

    /// Timestamp the next log of `direction` is expected at
    pub fn next_log_timestamp_for(&self, direction: Direction) -> Option<DateTime<Utc>> {
        let index = direction.index();
        match (self.markers[index].last, self.interval[index]) {
            (Some(last), Some(interval)) => Some(last.timestamp + interval),
            _ => None,
        }
    }

    /// Earliest expected next log of either direction
    pub fn next_log_timestamp(&self) -> Option<DateTime<Utc>> {
        let consumption = self.next_log_timestamp_for(Direction::Consumption);
        if !self.production_logged {
            return consumption;
        }
        let production = self.next_log_timestamp_for(Direction::Production);
        match (consumption, production) {
            (Some(c), Some(p)) => Some(c.min(p)),
            (c, p) => c.or(p),
        }
    }

    /// Store one history slot
    ///
    /// # Returns
    ///
    /// `false` when that slot was already stored; it is then ignored
    pub fn add_log(&mut self, log: PulseLog) -> bool {
        self.latest_log = Some(log);
        if self.log(log.position).is_some() {
            log::debug!("Log {} already collected", log.position);
            return false;
        }
        log::debug!("Log {} at {}: {} pulses", log.position, log.timestamp, log.pulses);

        let direction = if log.pulses < 0 {
            self.production_logged = true;
            Direction::Production
        } else {
            Direction::Consumption
        };
        self.logs.entry(log.position.address).or_default().insert(
            log.position.slot,
            LogRecord {
                timestamp: log.timestamp,
                pulses: log.pulses,
                direction,
            },
        );

        self.update_log_rollover(direction, log.timestamp);
        self.update_markers();
        self.cleanup_logs();
        self.update_interval(direction);
        self.update_counters(direction);
        true
    }

    /// Apply the live pulse counters of a power usage response
    pub fn update_pulses(&mut self, pulses: PulseInterval) {
        self.pulses = Some(pulses);
        for direction in Direction::BOTH {
            self.update_interval_pulses(pulses.timestamp, pulses.pulses(direction), direction);
        }
        for direction in Direction::BOTH {
            self.update_counters(direction);
        }
    }

    /// Log addresses worth requesting
    ///
    /// Covers holes between stored addresses, addresses older than the first stored
    /// log back to the oldest counter reset, and addresses newer than the last stored
    /// log up to `now`. `None` until enough logs are known to tell.
    pub fn missing_log_addresses(&self, now: DateTime<Utc>) -> Option<Vec<i32>> {
        let first = self.first_log_address()?;
        let last = self.last_log_address()?;
        let consumption_reset = self.longest_counter(Direction::Consumption)?.reset();
        let production_reset = if self.production_logged {
            Some(self.longest_counter(Direction::Production)?.reset())
        } else {
            None
        };
        self.last_log(Direction::Consumption)?;
        if self.production_logged {
            self.last_log(Direction::Production)?;
        }

        let mut missing: Vec<i32> = (first..=last)
            .filter(|address| !self.logs.contains_key(address))
            .collect();

        let before = match production_reset {
            Some(production) if production < consumption_reset => production,
            _ => consumption_reset,
        };
        for address in self.missing_before(before).into_iter().chain(self.missing_after(now)) {
            if !missing.contains(&address) {
                missing.push(address);
            }
        }
        Some(missing)
    }

    fn longest_counter(&self, direction: Direction) -> Option<&EnergyCounter> {
        self.counters
            .values()
            .filter(|counter| counter.direction() == direction)
            .max_by_key(|counter| counter.kind().hours())
    }

    fn delta(first: Option<LogMarker>, second: Option<LogMarker>) -> Option<Duration> {
        Some(second?.timestamp - first?.timestamp)
    }

    fn missing_before(&self, target: DateTime<Utc>) -> Vec<i32> {
        let mut addresses = Vec::new();
        let consumption = self.markers[Direction::Consumption.index()];
        let Some(consumption_first) = consumption.first else {
            return addresses;
        };
        let Some(consumption_delta) = Self::delta(consumption.first, consumption.second) else {
            return addresses;
        };
        if consumption_delta <= Duration::zero() {
            return addresses;
        }
        let mut consumption_ts = consumption_first.timestamp;
        let mut position = consumption_first.position;

        let mut production_track = None;
        if self.production_logged {
            let production = self.markers[Direction::Production.index()];
            let (Some(production_first), Some(production_delta)) =
                (production.first, Self::delta(production.first, production.second))
            else {
                return addresses;
            };
            if production_delta <= Duration::zero() {
                return addresses;
            }
            if production_first.timestamp <= consumption_ts {
                position = production_first.position;
            }
            production_track = Some((production_first.timestamp, production_delta));
        }

        loop {
            position = position.step(-1);
            match production_track.as_mut() {
                Some((production_ts, production_delta)) => {
                    if *production_ts - *production_delta > consumption_ts - consumption_delta {
                        *production_ts -= *production_delta;
                    } else {
                        consumption_ts -= consumption_delta;
                    }
                    if consumption_ts < target && *production_ts < target {
                        break;
                    }
                }
                None => {
                    consumption_ts -= consumption_delta;
                    if consumption_ts < target {
                        break;
                    }
                }
            }
            if !addresses.contains(&position.address) {
                addresses.push(position.address);
            }
        }
        addresses
    }

    fn missing_after(&self, now: DateTime<Utc>) -> Vec<i32> {
        let mut addresses = Vec::new();
        let consumption = self.markers[Direction::Consumption.index()];
        let Some(consumption_last) = consumption.last else {
            return addresses;
        };
        let Some(consumption_delta) = Self::delta(consumption.before_last, consumption.last) else {
            return addresses;
        };
        if consumption_delta < Duration::minutes(1) {
            return addresses;
        }
        let mut consumption_ts = consumption_last.timestamp;
        let mut position = consumption_last.position;

        let mut production_track = None;
        if self.production_logged {
            let production = self.markers[Direction::Production.index()];
            let (Some(production_last), Some(production_delta)) =
                (production.last, Self::delta(production.before_last, production.last))
            else {
                return addresses;
            };
            if production_delta < Duration::minutes(1) {
                return addresses;
            }
            if consumption_ts > production_last.timestamp {
                position = production_last.position;
            }
            production_track = Some((production_last.timestamp, production_delta));
        }

        loop {
            position = position.step(1);
            match production_track.as_mut() {
                Some((production_ts, production_delta)) => {
                    if *production_ts + *production_delta < consumption_ts + consumption_delta {
                        *production_ts += *production_delta;
                    } else {
                        consumption_ts += consumption_delta;
                    }
                    if consumption_ts >= now && *production_ts >= now {
                        break;
                    }
                }
                None => {
                    consumption_ts += consumption_delta;
                    if consumption_ts >= now {
                        break;
                    }
                }
            }
            if !addresses.contains(&position.address) {
                addresses.push(position.address);
            }
        }
        addresses
    }

    /// Recompute first, second, before-last and last per direction
    ///
    /// A slot directly following another with the same timestamp holds that
    /// interval's production.
    fn update_markers(&mut self) {
        let mut markers = [Markers::default(); 2];
        let mut previous: Option<LogMarker> = None;
        for (address, slots) in self.logs.iter_mut() {
            for (slot, record) in slots.iter_mut() {
                let marker = LogMarker {
                    position: LogPosition {
                        address: *address,
                        slot: *slot,
                    },
                    timestamp: record.timestamp,
                };
                if let Some(previous) = previous {
                    if marker.position == previous.position.step(1) {
                        if record.timestamp == previous.timestamp {
                            record.direction = Direction::Production;
                            self.production_logged = true;
                        } else if record.pulses > 0 {
                            record.direction = Direction::Consumption;
                        }
                    }
                }
                markers[record.direction.index()].record(marker);
                previous = Some(marker);
            }
        }
        self.markers = markers;
    }

    fn update_interval(&mut self, direction: Direction) {
        let markers = self.markers[direction.index()];
        if let Some(delta) = Self::delta(markers.before_last, markers.last) {
            self.interval[direction.index()] = Some(delta);
        }
    }

    /// Drop logs older than the longest counter's window, minus one interval
    fn cleanup_logs(&mut self) {
        let keep_after = |direction: Direction| -> Option<DateTime<Utc>> {
            let index = direction.index();
            let margin = self.interval_cleanup[index].or(self.interval[index])?;
            Some(self.longest_counter(direction)?.reset() - margin)
        };
        let consumption = keep_after(Direction::Consumption);
        let production = if self.production_logged {
            keep_after(Direction::Production)
        } else {
            None
        };
        let keep_after = match (consumption, production) {
            (Some(c), Some(p)) => c.min(p),
            (c, p) => match c.or(p) {
                Some(keep_after) => keep_after,
                None => return,
            },
        };

        let before = self.log_count();
        for slots in self.logs.values_mut() {
            slots.retain(|_, record| record.timestamp >= keep_after);
        }
        self.logs.retain(|_, slots| !slots.is_empty());
        let removed = before - self.log_count();
        if removed > 0 {
            log::debug!("Removed {} logs older than {}", removed, keep_after);
            self.update_markers();
        }
    }

    fn rollover_active(&self, direction: Direction) -> bool {
        self.rollover_pulses[direction.index()] || self.rollover_log[direction.index()]
    }

    /// Pulses of one direction since `start`, `None` while unknown
    fn total_pulses(&self, start: DateTime<Utc>, direction: Direction) -> Option<i64> {
        self.pulses?;
        if self.rollover_active(direction) {
            log::debug!("Skipping {} total while rollover is active", direction);
            return None;
        }
        let log_pulses = match self.last_log(direction) {
            Some(last) if start >= last.timestamp => Some(0),
            _ => self.log_pulses_since(start, direction),
        }?;
        Some(log_pulses + self.interval_pulses[direction.index()])
    }

    fn log_pulses_since(&self, start: DateTime<Utc>, direction: Direction) -> Option<i64> {
        self.logs
            .values()
            .flat_map(BTreeMap::values)
            .filter(|record| record.direction == direction && record.timestamp > start)
            .map(|record| record.pulses)
            .reduce(|total, pulses| total + pulses)
    }

    fn update_counters(&mut self, direction: Direction) {
        if self.rollover_active(direction) {
            log::debug!(
                "Holding {} counters, rollover of pulses={} log={}",
                direction,
                self.rollover_pulses[direction.index()],
                self.rollover_log[direction.index()]
            );
            return;
        }
        let kinds: Vec<CounterKind> = self
            .counters
            .keys()
            .filter(|kind| kind.direction() == direction)
            .copied()
            .collect();
        for kind in kinds {
            if self.update_counter(kind, direction) {
                // Window moved forward, total again from the new reset.
                self.update_counter(kind, direction);
            }
        }
    }

    fn update_counter(&mut self, kind: CounterKind, direction: Direction) -> bool {
        let (Some(counter), Some(pulses)) = (self.counters.get(&kind), self.pulses) else {
            return false;
        };
        let start = counter.reset();
        let Some(total) = self.total_pulses(start, direction) else {
            return false;
        };
        let statistics = PulseStats {
            timestamp: pulses.timestamp,
            start,
            pulses: total,
        };
        self.counters
            .get_mut(&kind)
            .is_some_and(|counter| counter.update(statistics))
    }

    fn update_interval_pulses(
        &mut self,
        timestamp: DateTime<Utc>,
        pulses: i64,
        direction: Direction,
    ) {
        match self.next_log_timestamp_for(direction) {
            None => {
                // Not enough logs yet to tell a rollover from a regular update
                self.interval_pulses[direction.index()] = pulses;
            }
            Some(next_log) if timestamp < next_log => self.update_before_log(pulses, direction),
            Some(_) => self.update_after_log(pulses, direction),
        }
    }

    fn update_before_log(&mut self, pulses: i64, direction: Direction) {
        let index = direction.index();
        let decreased = pulses < self.interval_pulses[index];
        match (self.rollover_pulses[index], self.rollover_log[index]) {
            (false, false) if decreased => {
                log::debug!("{} pulses decreased before the next log, rollover started", direction);
                self.rollover_pulses[index] = true;
            }
            (false, true) if decreased => {
                log::debug!("{} pulses decreased after the new log, rollover finished", direction);
                self.rollover_log[index] = false;
            }
            (true, true) => {
                log::warn!("Unexpected {} rollover state before the next log", direction);
            }
            _ => {}
        }
        self.interval_pulses[index] = pulses;
    }

    fn update_after_log(&mut self, pulses: i64, direction: Direction) {
        let index = direction.index();
        let decreased = pulses < self.interval_pulses[index];
        match (self.rollover_pulses[index], self.rollover_log[index]) {
            (false, true) if decreased => {
                log::debug!("{} pulses decreased after the new log, rollover finished", direction);
                self.rollover_log[index] = false;
            }
            (false, false) if decreased => {
                log::debug!(
                    "{} pulses decreased before the overdue log, rollover started",
                    direction
                );
                self.rollover_pulses[index] = true;
            }
            (true, true) => {
                log::warn!(
                    "Unexpected {} rollover state after the expected log, resetting",
                    direction
                );
                self.rollover_pulses[index] = false;
                self.rollover_log[index] = false;
            }
            _ => {}
        }
        self.interval_pulses[index] = pulses;
    }

    fn update_log_rollover(&mut self, direction: Direction, timestamp: DateTime<Utc>) {
        let Some(next_log) = self.next_log_timestamp_for(direction) else {
            return;
        };
        if timestamp < next_log {
            return;
        }
        let index = direction.index();
        match (self.rollover_pulses[index], self.rollover_log[index]) {
            (true, false) => {
                log::debug!("New {} log completes the pulse rollover", direction);
                self.rollover_pulses[index] = false;
            }
            (false, false) => {
                log::debug!("New {} log before the pulses wrapped, rollover started", direction);
                self.rollover_log[index] = true;
            }
            _ => {}
        }
    }
}
