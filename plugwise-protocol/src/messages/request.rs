//! Request messages sent to the stick
//!
//! Each request is an id, an optional target address and a fixed list of positional
//! arguments. The argument layout per kind lives in [`RequestKind::layout`] so both
//! encoding and decoding follow the same table.

use crate::error::{StickError, StickResult};
use crate::frame::{self, CHECKSUM_LENGTH, FOOTER_LENGTH, HEADER_LENGTH, ID_LENGTH, MAC_LENGTH};
use crate::messages::response::ResponseKind;
use bytes::Bytes;
use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use plugwise_core::datatypes::{FieldReader, FieldType, FieldValue};
use plugwise_core::MacAddress;
use std::fmt;

use FieldType::{Int, LogAddress, Mac, RealClockDate, RealClockTime, SignedInt, Text, Time};

/// Zero padding preceding the coordinator address in a connect request
const CONNECT_PADDING: &str = "00000000000000000000";
/// Placeholder for the log buffer field of a clock set request
const CLOCK_LOG_BUFFER: &str = "FFFFFFFF";

/// Kind of a request, without its arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKind {
    NetworkInfo,
    CirclePlusConnect,
    NodeAdd,
    AllowJoining,
    Reset,
    StickInit,
    ImagePrepare,
    Ping,
    PowerUsage,
    ClockSet,
    RelaySwitch,
    CirclePlusScan,
    NodeRemove,
    NodeInfo,
    Calibration,
    RealTimeClockSet,
    RealTimeClockGet,
    ClockGet,
    EnableSchedule,
    AddToGroup,
    RemoveFromGroup,
    BroadcastGroupSwitch,
    EnergyLogs,
    SleepConfig,
    SelfRemove,
    MeasureInterval,
    ClearGroupMac,
    ScheduleValue,
    Features,
    ScanConfigure,
    ScanLightCalibrate,
    SenseReportInterval,
    InitialRelayState,
}

impl RequestKind {
    /// Every request kind, in id order
    pub const ALL: [RequestKind; 33] = [
        RequestKind::NetworkInfo,
        RequestKind::CirclePlusConnect,
        RequestKind::NodeAdd,
        RequestKind::AllowJoining,
        RequestKind::Reset,
        RequestKind::StickInit,
        RequestKind::ImagePrepare,
        RequestKind::Ping,
        RequestKind::PowerUsage,
        RequestKind::ClockSet,
        RequestKind::RelaySwitch,
        RequestKind::CirclePlusScan,
        RequestKind::NodeRemove,
        RequestKind::NodeInfo,
        RequestKind::Calibration,
        RequestKind::RealTimeClockSet,
        RequestKind::RealTimeClockGet,
        RequestKind::ClockGet,
        RequestKind::EnableSchedule,
        RequestKind::AddToGroup,
        RequestKind::RemoveFromGroup,
        RequestKind::BroadcastGroupSwitch,
        RequestKind::EnergyLogs,
        RequestKind::SleepConfig,
        RequestKind::SelfRemove,
        RequestKind::MeasureInterval,
        RequestKind::ClearGroupMac,
        RequestKind::ScheduleValue,
        RequestKind::Features,
        RequestKind::ScanConfigure,
        RequestKind::ScanLightCalibrate,
        RequestKind::SenseReportInterval,
        RequestKind::InitialRelayState,
    ];

    pub fn id(&self) -> &'static [u8; 4] {
        match self {
            RequestKind::NetworkInfo => b"0001",
            RequestKind::CirclePlusConnect => b"0004",
            RequestKind::NodeAdd => b"0007",
            RequestKind::AllowJoining => b"0008",
            RequestKind::Reset => b"0009",
            RequestKind::StickInit => b"000A",
            RequestKind::ImagePrepare => b"000B",
            RequestKind::Ping => b"000D",
            RequestKind::PowerUsage => b"0012",
            RequestKind::ClockSet => b"0016",
            RequestKind::RelaySwitch => b"0017",
            RequestKind::CirclePlusScan => b"0018",
            RequestKind::NodeRemove => b"001C",
            RequestKind::NodeInfo => b"0023",
            RequestKind::Calibration => b"0026",
            RequestKind::RealTimeClockSet => b"0028",
            RequestKind::RealTimeClockGet => b"0029",
            RequestKind::ClockGet => b"003E",
            RequestKind::EnableSchedule => b"0040",
            RequestKind::AddToGroup => b"0045",
            RequestKind::RemoveFromGroup => b"0046",
            RequestKind::BroadcastGroupSwitch => b"0047",
            RequestKind::EnergyLogs => b"0048",
            RequestKind::SleepConfig => b"0050",
            RequestKind::SelfRemove => b"0051",
            RequestKind::MeasureInterval => b"0057",
            RequestKind::ClearGroupMac => b"0058",
            RequestKind::ScheduleValue => b"0059",
            RequestKind::Features => b"005F",
            RequestKind::ScanConfigure => b"0101",
            RequestKind::ScanLightCalibrate | RequestKind::SenseReportInterval => b"0102",
            RequestKind::InitialRelayState => b"0138",
        }
    }

    /// Whether the request is addressed to a node
    pub fn has_mac(&self) -> bool {
        !matches!(self, RequestKind::AllowJoining | RequestKind::StickInit)
    }

    /// Whether the address follows the arguments instead of preceding them
    fn mac_trails(&self) -> bool {
        matches!(self, RequestKind::CirclePlusConnect | RequestKind::NodeAdd)
    }

    /// Positional argument layout
    pub fn layout(&self) -> &'static [FieldType] {
        match self {
            RequestKind::NetworkInfo
            | RequestKind::StickInit
            | RequestKind::ImagePrepare
            | RequestKind::Ping
            | RequestKind::PowerUsage
            | RequestKind::NodeInfo
            | RequestKind::Calibration
            | RequestKind::RealTimeClockGet
            | RequestKind::ClockGet
            | RequestKind::SelfRemove
            | RequestKind::Features
            | RequestKind::ScanLightCalibrate => &[],
            RequestKind::CirclePlusConnect => &[Text(20)],
            RequestKind::NodeAdd
            | RequestKind::AllowJoining
            | RequestKind::RelaySwitch
            | RequestKind::CirclePlusScan
            | RequestKind::BroadcastGroupSwitch
            | RequestKind::ClearGroupMac
            | RequestKind::SenseReportInterval => &[Int(2)],
            RequestKind::Reset => &[Int(2), Int(2)],
            RequestKind::ClockSet => &[FieldType::DateTime, Text(8), Time, Int(2)],
            RequestKind::NodeRemove => &[Mac],
            RequestKind::RealTimeClockSet => &[RealClockTime, Int(2), RealClockDate],
            RequestKind::EnableSchedule => &[Int(2), Int(2)],
            RequestKind::AddToGroup => &[Text(16), Text(16), Text(16)],
            RequestKind::RemoveFromGroup => &[Text(16)],
            RequestKind::EnergyLogs => &[LogAddress],
            RequestKind::SleepConfig => &[Int(2), Int(4), Int(4), Int(2), Int(4)],
            RequestKind::MeasureInterval => &[Int(4), Int(4)],
            RequestKind::ScheduleValue => &[SignedInt(4)],
            RequestKind::ScanConfigure => &[Int(2), Int(2), Int(2)],
            RequestKind::InitialRelayState => &[Int(2), Int(2)],
        }
    }

    /// Response that completes a request of this kind
    ///
    /// # Returns
    ///
    /// `None` when the stick acknowledge alone completes the request
    pub fn expected_response(&self) -> Option<ResponseKind> {
        match self {
            RequestKind::NetworkInfo => Some(ResponseKind::NetworkInfo),
            RequestKind::CirclePlusConnect => Some(ResponseKind::CirclePlusConnect),
            RequestKind::StickInit => Some(ResponseKind::StickInit),
            RequestKind::Ping => Some(ResponseKind::Ping),
            RequestKind::PowerUsage => Some(ResponseKind::PowerUsage),
            RequestKind::ClockSet
            | RequestKind::RelaySwitch
            | RequestKind::RealTimeClockSet
            | RequestKind::SleepConfig
            | RequestKind::MeasureInterval => Some(ResponseKind::NodeResponse),
            RequestKind::CirclePlusScan => Some(ResponseKind::CirclePlusScan),
            RequestKind::NodeRemove => Some(ResponseKind::NodeRemove),
            RequestKind::NodeInfo => Some(ResponseKind::NodeInfo),
            RequestKind::Calibration => Some(ResponseKind::Calibration),
            RequestKind::RealTimeClockGet => Some(ResponseKind::RealTimeClock),
            RequestKind::ClockGet => Some(ResponseKind::Clock),
            RequestKind::EnergyLogs => Some(ResponseKind::EnergyLogs),
            RequestKind::Features => Some(ResponseKind::Features),
            RequestKind::ScanConfigure
            | RequestKind::ScanLightCalibrate
            | RequestKind::SenseReportInterval => Some(ResponseKind::NodeAck),
            RequestKind::InitialRelayState => Some(ResponseKind::RelayInitState),
            RequestKind::NodeAdd
            | RequestKind::AllowJoining
            | RequestKind::Reset
            | RequestKind::ImagePrepare
            | RequestKind::EnableSchedule
            | RequestKind::AddToGroup
            | RequestKind::RemoveFromGroup
            | RequestKind::BroadcastGroupSwitch
            | RequestKind::SelfRemove
            | RequestKind::ClearGroupMac
            | RequestKind::ScheduleValue => None,
        }
    }

    /// Whether a second request of this kind to the same node is refused while one is queued
    ///
    /// Clock updates, log reads and coordinator scans differ per call and may
    /// legitimately queue side by side.
    pub fn rejects_duplicates(&self) -> bool {
        !matches!(
            self,
            RequestKind::ClockSet
                | RequestKind::EnergyLogs
                | RequestKind::CirclePlusScan
                | RequestKind::RealTimeClockSet
        )
    }

    /// Find the kind of a request frame body
    ///
    /// Light calibration and report interval share an id and differ only in length.
    fn from_body(id: &[u8], body_length: usize) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| &kind.id()[..] == id && kind.body_length() == body_length)
    }

    /// Exact length of a frame of this kind
    pub fn frame_length(&self) -> usize {
        HEADER_LENGTH + self.body_length() + CHECKSUM_LENGTH + FOOTER_LENGTH
    }

    fn body_length(&self) -> usize {
        let mac = if self.has_mac() { MAC_LENGTH } else { 0 };
        ID_LENGTH + mac + self.layout().iter().map(FieldType::width).sum::<usize>()
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A request with its target and arguments
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Network details of the stick
    NetworkInfo { mac: MacAddress },
    /// Connect the stick to the coordinator
    CirclePlusConnect { mac: MacAddress },
    /// Accept or refuse a node waiting to join
    NodeAdd { mac: MacAddress, accept: bool },
    /// Open or close the network for joining nodes
    AllowJoining { enable: bool },
    Reset {
        mac: MacAddress,
        module_type: u8,
        timeout: u8,
    },
    StickInit,
    ImagePrepare { mac: MacAddress },
    Ping { mac: MacAddress },
    PowerUsage { mac: MacAddress },
    ClockSet { mac: MacAddress, time: DateTime<Utc> },
    RelaySwitch { mac: MacAddress, on: bool },
    /// Read one slot of the coordinator's node table
    CirclePlusScan { mac: MacAddress, address: u8 },
    /// Unjoin `target` through the coordinator at `mac`
    NodeRemove { mac: MacAddress, target: MacAddress },
    NodeInfo { mac: MacAddress },
    Calibration { mac: MacAddress },
    RealTimeClockSet { mac: MacAddress, time: DateTime<Utc> },
    RealTimeClockGet { mac: MacAddress },
    ClockGet { mac: MacAddress },
    EnableSchedule { mac: MacAddress, on: bool },
    AddToGroup {
        mac: MacAddress,
        group_mac: MacAddress,
        task_id: MacAddress,
        port_mask: MacAddress,
    },
    RemoveFromGroup { mac: MacAddress, group_mac: MacAddress },
    BroadcastGroupSwitch { group_mac: MacAddress, on: bool },
    EnergyLogs { mac: MacAddress, log_address: i32 },
    /// Sleep and wake schedule of a battery node
    SleepConfig {
        mac: MacAddress,
        stay_active: u8,
        maintenance_interval: u16,
        sleep_for: u16,
        clock_sync: bool,
        clock_interval: u16,
    },
    SelfRemove { mac: MacAddress },
    /// Minutes between stored log entries
    MeasureInterval {
        mac: MacAddress,
        consumption: u16,
        production: u16,
    },
    ClearGroupMac { mac: MacAddress, task_id: u8 },
    ScheduleValue { mac: MacAddress, value: i16 },
    Features { mac: MacAddress },
    ScanConfigure {
        mac: MacAddress,
        sensitivity: u8,
        daylight_mode: bool,
        reset_timer: u8,
    },
    ScanLightCalibrate { mac: MacAddress },
    SenseReportInterval { mac: MacAddress, interval: u8 },
    InitialRelayState {
        mac: MacAddress,
        configure: bool,
        relay: bool,
    },
}

/// Walks decoded argument values in layout order
struct Args<'a> {
    iter: std::slice::Iter<'a, FieldValue>,
    kind: RequestKind,
}

impl<'a> Args<'a> {
    fn next(&mut self) -> StickResult<&'a FieldValue> {
        self.iter
            .next()
            .ok_or_else(|| StickError::InvalidData(format!("{} is missing an argument", self.kind)))
    }

    fn int(&mut self) -> StickResult<u64> {
        self.next()?.as_u64()
    }

    fn flag(&mut self) -> StickResult<bool> {
        Ok(self.int()? == 1)
    }

    fn mac_text(&mut self) -> StickResult<MacAddress> {
        MacAddress::from_string(&self.next()?.as_text()?)
    }
}

fn flag(value: bool) -> FieldValue {
    FieldValue::int(value as u64, 2)
}

fn mac_text(mac: &MacAddress) -> FieldValue {
    FieldValue::Text(mac.as_bytes().to_vec())
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::NetworkInfo { .. } => RequestKind::NetworkInfo,
            Request::CirclePlusConnect { .. } => RequestKind::CirclePlusConnect,
            Request::NodeAdd { .. } => RequestKind::NodeAdd,
            Request::AllowJoining { .. } => RequestKind::AllowJoining,
            Request::Reset { .. } => RequestKind::Reset,
            Request::StickInit => RequestKind::StickInit,
            Request::ImagePrepare { .. } => RequestKind::ImagePrepare,
            Request::Ping { .. } => RequestKind::Ping,
            Request::PowerUsage { .. } => RequestKind::PowerUsage,
            Request::ClockSet { .. } => RequestKind::ClockSet,
            Request::RelaySwitch { .. } => RequestKind::RelaySwitch,
            Request::CirclePlusScan { .. } => RequestKind::CirclePlusScan,
            Request::NodeRemove { .. } => RequestKind::NodeRemove,
            Request::NodeInfo { .. } => RequestKind::NodeInfo,
            Request::Calibration { .. } => RequestKind::Calibration,
            Request::RealTimeClockSet { .. } => RequestKind::RealTimeClockSet,
            Request::RealTimeClockGet { .. } => RequestKind::RealTimeClockGet,
            Request::ClockGet { .. } => RequestKind::ClockGet,
            Request::EnableSchedule { .. } => RequestKind::EnableSchedule,
            Request::AddToGroup { .. } => RequestKind::AddToGroup,
            Request::RemoveFromGroup { .. } => RequestKind::RemoveFromGroup,
            Request::BroadcastGroupSwitch { .. } => RequestKind::BroadcastGroupSwitch,
            Request::EnergyLogs { .. } => RequestKind::EnergyLogs,
            Request::SleepConfig { .. } => RequestKind::SleepConfig,
            Request::SelfRemove { .. } => RequestKind::SelfRemove,
            Request::MeasureInterval { .. } => RequestKind::MeasureInterval,
            Request::ClearGroupMac { .. } => RequestKind::ClearGroupMac,
            Request::ScheduleValue { .. } => RequestKind::ScheduleValue,
            Request::Features { .. } => RequestKind::Features,
            Request::ScanConfigure { .. } => RequestKind::ScanConfigure,
            Request::ScanLightCalibrate { .. } => RequestKind::ScanLightCalibrate,
            Request::SenseReportInterval { .. } => RequestKind::SenseReportInterval,
            Request::InitialRelayState { .. } => RequestKind::InitialRelayState,
        }
    }

    /// Target node, if the request is addressed
    pub fn mac(&self) -> Option<MacAddress> {
        match self {
            Request::AllowJoining { .. } | Request::StickInit => None,
            Request::NetworkInfo { mac }
            | Request::CirclePlusConnect { mac }
            | Request::NodeAdd { mac, .. }
            | Request::Reset { mac, .. }
            | Request::ImagePrepare { mac }
            | Request::Ping { mac }
            | Request::PowerUsage { mac }
            | Request::ClockSet { mac, .. }
            | Request::RelaySwitch { mac, .. }
            | Request::CirclePlusScan { mac, .. }
            | Request::NodeRemove { mac, .. }
            | Request::NodeInfo { mac }
            | Request::Calibration { mac }
            | Request::RealTimeClockSet { mac, .. }
            | Request::RealTimeClockGet { mac }
            | Request::ClockGet { mac }
            | Request::EnableSchedule { mac, .. }
            | Request::AddToGroup { mac, .. }
            | Request::RemoveFromGroup { mac, .. }
            | Request::EnergyLogs { mac, .. }
            | Request::SleepConfig { mac, .. }
            | Request::SelfRemove { mac }
            | Request::MeasureInterval { mac, .. }
            | Request::ClearGroupMac { mac, .. }
            | Request::ScheduleValue { mac, .. }
            | Request::Features { mac }
            | Request::ScanConfigure { mac, .. }
            | Request::ScanLightCalibrate { mac }
            | Request::SenseReportInterval { mac, .. }
            | Request::InitialRelayState { mac, .. } => Some(*mac),
            Request::BroadcastGroupSwitch { group_mac, .. } => Some(*group_mac),
        }
    }

    pub fn expected_response(&self) -> Option<ResponseKind> {
        self.kind().expected_response()
    }

    /// Argument values in layout order
    pub fn args(&self) -> Vec<FieldValue> {
        match self {
            Request::NetworkInfo { .. }
            | Request::StickInit
            | Request::ImagePrepare { .. }
            | Request::Ping { .. }
            | Request::PowerUsage { .. }
            | Request::NodeInfo { .. }
            | Request::Calibration { .. }
            | Request::RealTimeClockGet { .. }
            | Request::ClockGet { .. }
            | Request::SelfRemove { .. }
            | Request::Features { .. }
            | Request::ScanLightCalibrate { .. } => Vec::new(),
            Request::CirclePlusConnect { .. } => vec![FieldValue::text(CONNECT_PADDING)],
            Request::NodeAdd { accept, .. } => vec![flag(*accept)],
            Request::AllowJoining { enable } => vec![flag(*enable)],
            Request::Reset {
                module_type,
                timeout,
                ..
            } => vec![
                FieldValue::int(*module_type as u64, 2),
                FieldValue::int(*timeout as u64, 2),
            ],
            Request::ClockSet { time, .. } => vec![
                FieldValue::DateTime(Some(*time)),
                FieldValue::text(CLOCK_LOG_BUFFER),
                FieldValue::Time(time.time()),
                FieldValue::int(time.weekday().num_days_from_monday() as u64, 2),
            ],
            Request::RelaySwitch { on, .. } => vec![flag(*on)],
            Request::CirclePlusScan { address, .. } => vec![FieldValue::int(*address as u64, 2)],
            Request::NodeRemove { target, .. } => vec![FieldValue::Mac(*target)],
            Request::RealTimeClockSet { time, .. } => vec![
                FieldValue::RealClockTime(time.time()),
                FieldValue::int(time.weekday().num_days_from_monday() as u64, 2),
                FieldValue::RealClockDate(time.date_naive()),
            ],
            Request::EnableSchedule { on, .. } => vec![flag(*on), FieldValue::int(1, 2)],
            Request::AddToGroup {
                group_mac,
                task_id,
                port_mask,
                ..
            } => vec![mac_text(group_mac), mac_text(task_id), mac_text(port_mask)],
            Request::RemoveFromGroup { group_mac, .. } => vec![mac_text(group_mac)],
            Request::BroadcastGroupSwitch { on, .. } => vec![flag(*on)],
            Request::EnergyLogs { log_address, .. } => vec![FieldValue::LogAddress(*log_address)],
            Request::SleepConfig {
                stay_active,
                maintenance_interval,
                sleep_for,
                clock_sync,
                clock_interval,
                ..
            } => vec![
                FieldValue::int(*stay_active as u64, 2),
                FieldValue::int(*maintenance_interval as u64, 4),
                FieldValue::int(*sleep_for as u64, 4),
                flag(*clock_sync),
                FieldValue::int(*clock_interval as u64, 4),
            ],
            Request::MeasureInterval {
                consumption,
                production,
                ..
            } => vec![
                FieldValue::int(*consumption as u64, 4),
                FieldValue::int(*production as u64, 4),
            ],
            Request::ClearGroupMac { task_id, .. } => vec![FieldValue::int(*task_id as u64, 2)],
            Request::ScheduleValue { value, .. } => vec![FieldValue::signed(*value as i64, 4)],
            Request::ScanConfigure {
                sensitivity,
                daylight_mode,
                reset_timer,
                ..
            } => vec![
                FieldValue::int(*sensitivity as u64, 2),
                flag(*daylight_mode),
                FieldValue::int(*reset_timer as u64, 2),
            ],
            Request::SenseReportInterval { interval, .. } => {
                vec![FieldValue::int(*interval as u64, 2)]
            }
            Request::InitialRelayState {
                configure, relay, ..
            } => vec![flag(*configure), flag(*relay)],
        }
    }

    /// Serialize to a complete frame
    ///
    /// # Errors
    ///
    /// Returns `StickError::InvalidData` if an argument does not fit its field
    pub fn encode(&self) -> StickResult<Bytes> {
        let kind = self.kind();
        let mut body = Vec::with_capacity(kind.body_length());
        body.extend_from_slice(kind.id());
        let mac = self.mac();
        if !kind.mac_trails() {
            if let Some(mac) = &mac {
                body.extend_from_slice(mac.as_bytes());
            }
        }
        for arg in self.args() {
            arg.encode(&mut body)?;
        }
        if kind.mac_trails() {
            if let Some(mac) = &mac {
                body.extend_from_slice(mac.as_bytes());
            }
        }
        if body.len() != kind.body_length() {
            return Err(StickError::LengthMismatch {
                kind: kind.to_string(),
                expected: kind.body_length(),
                actual: body.len(),
            });
        }
        Ok(frame::seal(&body))
    }

    /// Parse a request frame, as a stick would
    pub fn decode(frame: &[u8]) -> StickResult<Self> {
        let body = frame::open(frame)?;
        if body.len() < ID_LENGTH {
            return Err(StickError::FrameInvalid("Request without id".to_string()));
        }
        let kind = RequestKind::from_body(&body[..ID_LENGTH], body.len()).ok_or_else(|| {
            StickError::UnknownMessage(String::from_utf8_lossy(&body[..ID_LENGTH]).into_owned())
        })?;
        let rest = &body[ID_LENGTH..];
        let (mac_bytes, arg_bytes) = match (kind.has_mac(), kind.mac_trails()) {
            (false, _) => (None, rest),
            (true, false) => (Some(&rest[..MAC_LENGTH]), &rest[MAC_LENGTH..]),
            (true, true) => {
                let split = rest.len() - MAC_LENGTH;
                (Some(&rest[split..]), &rest[..split])
            }
        };
        let mac = mac_bytes.map(MacAddress::from_wire).transpose()?;
        let mut reader = FieldReader::new(arg_bytes);
        let values = kind
            .layout()
            .iter()
            .map(|field| reader.read(*field))
            .collect::<StickResult<Vec<_>>>()?;
        reader.finish()?;
        Self::from_args(kind, mac, &values)
    }

    fn from_args(
        kind: RequestKind,
        mac: Option<MacAddress>,
        values: &[FieldValue],
    ) -> StickResult<Self> {
        let mut a = Args {
            iter: values.iter(),
            kind,
        };
        let target = || {
            mac.ok_or_else(|| StickError::InvalidData(format!("{} without address", kind)))
        };
        let request = match kind {
            RequestKind::NetworkInfo => Request::NetworkInfo { mac: target()? },
            RequestKind::CirclePlusConnect => {
                a.next()?;
                Request::CirclePlusConnect { mac: target()? }
            }
            RequestKind::NodeAdd => Request::NodeAdd {
                mac: target()?,
                accept: a.flag()?,
            },
            RequestKind::AllowJoining => Request::AllowJoining { enable: a.flag()? },
            RequestKind::Reset => Request::Reset {
                mac: target()?,
                module_type: a.int()? as u8,
                timeout: a.int()? as u8,
            },
            RequestKind::StickInit => Request::StickInit,
            RequestKind::ImagePrepare => Request::ImagePrepare { mac: target()? },
            RequestKind::Ping => Request::Ping { mac: target()? },
            RequestKind::PowerUsage => Request::PowerUsage { mac: target()? },
            RequestKind::ClockSet => {
                let moment = a.next()?.as_date_time()?.ok_or_else(|| {
                    StickError::InvalidData("Clock set without a date".to_string())
                })?;
                a.next()?;
                let time = a.next()?.as_time()?;
                a.next()?;
                let time = moment.with_second(time.second()).unwrap_or(moment);
                Request::ClockSet {
                    mac: target()?,
                    time,
                }
            }
            RequestKind::RelaySwitch => Request::RelaySwitch {
                mac: target()?,
                on: a.flag()?,
            },
            RequestKind::CirclePlusScan => Request::CirclePlusScan {
                mac: target()?,
                address: a.int()? as u8,
            },
            RequestKind::NodeRemove => Request::NodeRemove {
                mac: target()?,
                target: a.next()?.as_mac()?,
            },
            RequestKind::NodeInfo => Request::NodeInfo { mac: target()? },
            RequestKind::Calibration => Request::Calibration { mac: target()? },
            RequestKind::RealTimeClockSet => {
                let time = a.next()?.as_time()?;
                a.next()?;
                let date = a.next()?.as_date()?;
                Request::RealTimeClockSet {
                    mac: target()?,
                    time: NaiveDateTime::new(date, time).and_utc(),
                }
            }
            RequestKind::RealTimeClockGet => Request::RealTimeClockGet { mac: target()? },
            RequestKind::ClockGet => Request::ClockGet { mac: target()? },
            RequestKind::EnableSchedule => Request::EnableSchedule {
                mac: target()?,
                on: a.flag()?,
            },
            RequestKind::AddToGroup => Request::AddToGroup {
                mac: target()?,
                group_mac: a.mac_text()?,
                task_id: a.mac_text()?,
                port_mask: a.mac_text()?,
            },
            RequestKind::RemoveFromGroup => Request::RemoveFromGroup {
                mac: target()?,
                group_mac: a.mac_text()?,
            },
            RequestKind::BroadcastGroupSwitch => Request::BroadcastGroupSwitch {
                group_mac: target()?,
                on: a.flag()?,
            },
            RequestKind::EnergyLogs => Request::EnergyLogs {
                mac: target()?,
                log_address: a.next()?.as_log_address()?,
            },
            RequestKind::SleepConfig => Request::SleepConfig {
                mac: target()?,
                stay_active: a.int()? as u8,
                maintenance_interval: a.int()? as u16,
                sleep_for: a.int()? as u16,
                clock_sync: a.flag()?,
                clock_interval: a.int()? as u16,
            },
            RequestKind::SelfRemove => Request::SelfRemove { mac: target()? },
            RequestKind::MeasureInterval => Request::MeasureInterval {
                mac: target()?,
                consumption: a.int()? as u16,
                production: a.int()? as u16,
            },
            RequestKind::ClearGroupMac => Request::ClearGroupMac {
                mac: target()?,
                task_id: a.int()? as u8,
            },
            RequestKind::ScheduleValue => Request::ScheduleValue {
                mac: target()?,
                value: a.next()?.as_i64()? as i16,
            },
            RequestKind::Features => Request::Features { mac: target()? },
            RequestKind::ScanConfigure => Request::ScanConfigure {
                mac: target()?,
                sensitivity: a.int()? as u8,
                daylight_mode: a.flag()?,
                reset_timer: a.int()? as u8,
            },
            RequestKind::ScanLightCalibrate => Request::ScanLightCalibrate { mac: target()? },
            RequestKind::SenseReportInterval => Request::SenseReportInterval {
                mac: target()?,
                interval: a.int()? as u8,
            },
            RequestKind::InitialRelayState => Request::InitialRelayState {
                mac: target()?,
                configure: a.flag()?,
                relay: a.flag()?,
            },
        };
        Ok(request)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mac() {
            Some(mac) => write!(f, "{} for {}", self.kind(), mac),
            None => write!(f, "{}", self.kind()),
        }
    }
}
