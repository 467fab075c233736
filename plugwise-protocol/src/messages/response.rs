//! Response messages received from the stick and the nodes behind it

use crate::error::{StickError, StickResult};
use crate::frame::{
    self, ResponseHeader, ACK_LENGTH, ID_LENGTH, MAC_LENGTH, RESPONSE_OVERHEAD, SEQ_LENGTH,
};
use crate::messages::ack::{AwakeReason, NodeAckCode, NodeResponseCode, StickAck};
use crate::sequence::SequenceId;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use once_cell::sync::Lazy;
use plugwise_core::constants::{LARGE_ACK_FOOTER_INDEX, SMALL_ACK_FOOTER_INDEX};
use plugwise_core::datatypes::{FieldReader, FieldType, FieldValue};
use plugwise_core::{MacAddress, NodeType};
use std::collections::HashMap;
use std::fmt;

use FieldType::{
    Float, Int, LogAddress, Mac, RealClockDate, RealClockTime, SignedInt, Text, Time, UnixTimestamp,
};

/// Kind of a response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    StickAck,
    NodeResponse,
    NetworkInfo,
    NodeSpecific,
    CirclePlusConnect,
    JoinAvailable,
    Ping,
    ImageValidation,
    StickInit,
    PowerUsage,
    LogData,
    CirclePlusScan,
    NodeRemove,
    NodeInfo,
    Calibration,
    RealTimeClock,
    Clock,
    EnergyLogs,
    Awake,
    SwitchGroup,
    Features,
    Rejoin,
    NodeAck,
    SenseReport,
    RelayInitState,
}

static ID_TABLE: Lazy<HashMap<&'static [u8; 4], ResponseKind>> = Lazy::new(|| {
    HashMap::from([
        (b"0002", ResponseKind::NetworkInfo),
        (b"0003", ResponseKind::NodeSpecific),
        (b"0005", ResponseKind::CirclePlusConnect),
        (b"0006", ResponseKind::JoinAvailable),
        (b"000E", ResponseKind::Ping),
        (b"0010", ResponseKind::ImageValidation),
        (b"0011", ResponseKind::StickInit),
        (b"0013", ResponseKind::PowerUsage),
        (b"0015", ResponseKind::LogData),
        (b"0019", ResponseKind::CirclePlusScan),
        (b"001D", ResponseKind::NodeRemove),
        (b"0024", ResponseKind::NodeInfo),
        (b"0027", ResponseKind::Calibration),
        (b"003A", ResponseKind::RealTimeClock),
        (b"003F", ResponseKind::Clock),
        (b"0049", ResponseKind::EnergyLogs),
        (b"004F", ResponseKind::Awake),
        (b"0056", ResponseKind::SwitchGroup),
        (b"0060", ResponseKind::Features),
        (b"0061", ResponseKind::Rejoin),
        (b"0100", ResponseKind::NodeAck),
        (b"0105", ResponseKind::SenseReport),
        (b"0139", ResponseKind::RelayInitState),
    ])
});

const ENERGY_LOG_LAYOUT: [FieldType; 9] = [
    FieldType::DateTime,
    SignedInt(8),
    FieldType::DateTime,
    SignedInt(8),
    FieldType::DateTime,
    SignedInt(8),
    FieldType::DateTime,
    SignedInt(8),
    LogAddress,
];

impl ResponseKind {
    /// Every response kind
    pub const ALL: [ResponseKind; 25] = [
        ResponseKind::StickAck,
        ResponseKind::NodeResponse,
        ResponseKind::NetworkInfo,
        ResponseKind::NodeSpecific,
        ResponseKind::CirclePlusConnect,
        ResponseKind::JoinAvailable,
        ResponseKind::Ping,
        ResponseKind::ImageValidation,
        ResponseKind::StickInit,
        ResponseKind::PowerUsage,
        ResponseKind::LogData,
        ResponseKind::CirclePlusScan,
        ResponseKind::NodeRemove,
        ResponseKind::NodeInfo,
        ResponseKind::Calibration,
        ResponseKind::RealTimeClock,
        ResponseKind::Clock,
        ResponseKind::EnergyLogs,
        ResponseKind::Awake,
        ResponseKind::SwitchGroup,
        ResponseKind::Features,
        ResponseKind::Rejoin,
        ResponseKind::NodeAck,
        ResponseKind::SenseReport,
        ResponseKind::RelayInitState,
    ];

    /// Message id on the wire
    pub fn id(&self) -> &'static [u8; 4] {
        match self {
            ResponseKind::StickAck | ResponseKind::NodeResponse => b"0000",
            ResponseKind::NetworkInfo => b"0002",
            ResponseKind::NodeSpecific => b"0003",
            ResponseKind::CirclePlusConnect => b"0005",
            ResponseKind::JoinAvailable => b"0006",
            ResponseKind::Ping => b"000E",
            ResponseKind::ImageValidation => b"0010",
            ResponseKind::StickInit => b"0011",
            ResponseKind::PowerUsage => b"0013",
            ResponseKind::LogData => b"0015",
            ResponseKind::CirclePlusScan => b"0019",
            ResponseKind::NodeRemove => b"001D",
            ResponseKind::NodeInfo => b"0024",
            ResponseKind::Calibration => b"0027",
            ResponseKind::RealTimeClock => b"003A",
            ResponseKind::Clock => b"003F",
            ResponseKind::EnergyLogs => b"0049",
            ResponseKind::Awake => b"004F",
            ResponseKind::SwitchGroup => b"0056",
            ResponseKind::Features => b"0060",
            ResponseKind::Rejoin => b"0061",
            ResponseKind::NodeAck => b"0100",
            ResponseKind::SenseReport => b"0105",
            ResponseKind::RelayInitState => b"0139",
        }
    }

    /// Look up a message id in the static table
    ///
    /// The generic acknowledge id `0000` is not in the table; its shape depends on
    /// the frame length, see [`ResponseKind::from_ack_footer`].
    pub fn from_id(id: &[u8; 4]) -> Option<Self> {
        ID_TABLE.get(id).copied()
    }

    /// Resolve the generic acknowledge shape from the position of the footer
    pub fn from_ack_footer(footer_index: usize) -> Option<Self> {
        match footer_index {
            SMALL_ACK_FOOTER_INDEX => Some(ResponseKind::StickAck),
            LARGE_ACK_FOOTER_INDEX => Some(ResponseKind::NodeResponse),
            _ => None,
        }
    }

    /// Fixed kind of unsolicited messages using a reserved sequence id
    pub fn from_reserved_seq(seq: SequenceId) -> Option<Self> {
        match seq {
            SequenceId::REJOIN => Some(ResponseKind::Rejoin),
            SequenceId::AWAKE => Some(ResponseKind::Awake),
            SequenceId::SWITCH_GROUP => Some(ResponseKind::SwitchGroup),
            _ => None,
        }
    }

    /// Frame carries an acknowledge code before the address
    ///
    /// The `0100` acknowledge of protocol 2.4 nodes uses the same placement as the
    /// generic node response.
    pub fn has_ack(&self) -> bool {
        matches!(
            self,
            ResponseKind::StickAck | ResponseKind::NodeResponse | ResponseKind::NodeAck
        )
    }

    /// Frame carries the address of the reporting node
    pub fn has_mac(&self) -> bool {
        !matches!(
            self,
            ResponseKind::StickAck
                | ResponseKind::NetworkInfo
                | ResponseKind::NodeSpecific
                | ResponseKind::CirclePlusConnect
        )
    }

    /// Parameter layout after acknowledge code and address
    pub fn layout(&self) -> &'static [FieldType] {
        match self {
            ResponseKind::StickAck
            | ResponseKind::NodeResponse
            | ResponseKind::NodeAck
            | ResponseKind::JoinAvailable
            | ResponseKind::Rejoin => &[],
            ResponseKind::NetworkInfo => &[
                Text(2),
                Text(16),
                Text(16),
                Text(16),
                Text(16),
                Text(4),
                Int(2),
            ],
            ResponseKind::NodeSpecific => &[Int(4)],
            ResponseKind::CirclePlusConnect => &[Int(2), Int(2)],
            ResponseKind::Ping => &[SignedInt(2), SignedInt(2), Int(4)],
            ResponseKind::ImageValidation => &[UnixTimestamp],
            ResponseKind::StickInit => &[Int(2), Int(2), Text(16), Int(4), Int(2)],
            ResponseKind::PowerUsage => &[
                SignedInt(4),
                SignedInt(4),
                SignedInt(8),
                SignedInt(8),
                SignedInt(4),
            ],
            ResponseKind::LogData => &[FieldType::DateTime, Int(8), LogAddress],
            ResponseKind::CirclePlusScan => &[Mac, Int(2)],
            ResponseKind::NodeRemove => &[Text(16), Int(2)],
            ResponseKind::NodeInfo => &[
                FieldType::DateTime,
                LogAddress,
                Int(2),
                Int(2),
                Text(12),
                UnixTimestamp,
                Int(2),
            ],
            ResponseKind::Calibration => &[Float, Float, Float, Float],
            ResponseKind::RealTimeClock => &[RealClockTime, Int(2), RealClockDate],
            ResponseKind::Clock => &[Time, Int(2), Int(2), Int(4)],
            ResponseKind::EnergyLogs => &ENERGY_LOG_LAYOUT,
            ResponseKind::Awake => &[Int(2)],
            ResponseKind::SwitchGroup => &[Int(2), Int(2)],
            ResponseKind::Features => &[Text(16)],
            ResponseKind::SenseReport => &[Int(4), Int(4)],
            ResponseKind::RelayInitState => &[Int(2), Int(2)],
        }
    }

    /// Exact length of a frame of this kind
    pub fn frame_length(&self) -> usize {
        let mut length = RESPONSE_OVERHEAD;
        if self.has_ack() {
            length += ACK_LENGTH;
        }
        if self.has_mac() {
            length += MAC_LENGTH;
        }
        length + self.layout().iter().map(FieldType::width).sum::<usize>()
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Node description returned by the node info request
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfoData {
    pub timestamp: Option<DateTime<Utc>>,
    pub last_log_address: i32,
    pub relay_state: bool,
    pub frequency: u8,
    pub hardware_version: String,
    pub firmware: i64,
    pub node_type: NodeType,
}

/// One dated slot of an energy log buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogSlot {
    pub timestamp: Option<DateTime<Utc>>,
    pub pulses: i64,
}

/// Decoded payload of a response
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    StickAck(StickAck),
    NodeResponse(NodeResponseCode),
    NetworkInfo {
        channel: String,
        source_mac: String,
        extended_pan_id: String,
        unique_network_id: String,
        new_node_mac: String,
        pan_id: String,
        index: u8,
    },
    NodeSpecific {
        status: u16,
    },
    CirclePlusConnect {
        existing: bool,
        allowed: bool,
    },
    JoinAvailable,
    Ping {
        rssi_in: i8,
        rssi_out: i8,
        round_trip_ms: u16,
    },
    ImageValidation {
        timestamp: i64,
    },
    StickInit {
        network_online: bool,
        circle_plus_mac: String,
        network_id: u16,
    },
    PowerUsage {
        pulse_1s: i64,
        pulse_8s: i64,
        consumed: i64,
        produced: i64,
        nanosecond_offset: i64,
    },
    LogData {
        stored: Option<DateTime<Utc>>,
        meter_info: u64,
        log_address: i32,
    },
    CirclePlusScan {
        node_mac: MacAddress,
        address: u8,
    },
    NodeRemove {
        removed_mac: String,
        status: u8,
    },
    NodeInfo(NodeInfoData),
    Calibration {
        gain_a: f32,
        gain_b: f32,
        off_tot: f32,
        off_noise: f32,
    },
    RealTimeClock {
        time: NaiveTime,
        day_of_week: u8,
        date: NaiveDate,
    },
    Clock {
        time: NaiveTime,
        day_of_week: u8,
    },
    EnergyLogs {
        slots: [LogSlot; 4],
        log_address: i32,
    },
    Awake(AwakeReason),
    SwitchGroup {
        group: u8,
        power_state: bool,
    },
    Features {
        features: String,
    },
    Rejoin,
    NodeAck(NodeAckCode),
    SenseReport {
        humidity: u16,
        temperature: u16,
    },
    RelayInitState {
        configure: bool,
        relay: bool,
    },
}

/// Walks decoded parameter values in layout order
struct Values<'a> {
    iter: std::slice::Iter<'a, FieldValue>,
    kind: ResponseKind,
}

impl<'a> Values<'a> {
    fn next(&mut self) -> StickResult<&'a FieldValue> {
        self.iter
            .next()
            .ok_or_else(|| StickError::InvalidData(format!("{} is missing a parameter", self.kind)))
    }

    fn int(&mut self) -> StickResult<u64> {
        self.next()?.as_u64()
    }

    fn signed(&mut self) -> StickResult<i64> {
        self.next()?.as_i64()
    }

    fn text(&mut self) -> StickResult<String> {
        self.next()?.as_text()
    }

    fn date_time(&mut self) -> StickResult<Option<DateTime<Utc>>> {
        self.next()?.as_date_time()
    }

    fn log_address(&mut self) -> StickResult<i32> {
        self.next()?.as_log_address()
    }

    fn float(&mut self) -> StickResult<f32> {
        self.next()?.as_f32()
    }
}

impl ResponseBody {
    pub fn kind(&self) -> ResponseKind {
        match self {
            ResponseBody::StickAck(_) => ResponseKind::StickAck,
            ResponseBody::NodeResponse(_) => ResponseKind::NodeResponse,
            ResponseBody::NetworkInfo { .. } => ResponseKind::NetworkInfo,
            ResponseBody::NodeSpecific { .. } => ResponseKind::NodeSpecific,
            ResponseBody::CirclePlusConnect { .. } => ResponseKind::CirclePlusConnect,
            ResponseBody::JoinAvailable => ResponseKind::JoinAvailable,
            ResponseBody::Ping { .. } => ResponseKind::Ping,
            ResponseBody::ImageValidation { .. } => ResponseKind::ImageValidation,
            ResponseBody::StickInit { .. } => ResponseKind::StickInit,
            ResponseBody::PowerUsage { .. } => ResponseKind::PowerUsage,
            ResponseBody::LogData { .. } => ResponseKind::LogData,
            ResponseBody::CirclePlusScan { .. } => ResponseKind::CirclePlusScan,
            ResponseBody::NodeRemove { .. } => ResponseKind::NodeRemove,
            ResponseBody::NodeInfo(_) => ResponseKind::NodeInfo,
            ResponseBody::Calibration { .. } => ResponseKind::Calibration,
            ResponseBody::RealTimeClock { .. } => ResponseKind::RealTimeClock,
            ResponseBody::Clock { .. } => ResponseKind::Clock,
            ResponseBody::EnergyLogs { .. } => ResponseKind::EnergyLogs,
            ResponseBody::Awake(_) => ResponseKind::Awake,
            ResponseBody::SwitchGroup { .. } => ResponseKind::SwitchGroup,
            ResponseBody::Features { .. } => ResponseKind::Features,
            ResponseBody::Rejoin => ResponseKind::Rejoin,
            ResponseBody::NodeAck(_) => ResponseKind::NodeAck,
            ResponseBody::SenseReport { .. } => ResponseKind::SenseReport,
            ResponseBody::RelayInitState { .. } => ResponseKind::RelayInitState,
        }
    }

    /// Acknowledge code carried before the address
    fn ack_code(&self) -> Option<u16> {
        match self {
            ResponseBody::StickAck(ack) => Some(ack.code()),
            ResponseBody::NodeResponse(code) => Some(code.code()),
            ResponseBody::NodeAck(code) => Some(code.code()),
            _ => None,
        }
    }

    fn from_fields(
        kind: ResponseKind,
        ack: Option<u16>,
        values: &[FieldValue],
    ) -> StickResult<Self> {
        let mut v = Values {
            iter: values.iter(),
            kind,
        };
        let body = match kind {
            ResponseKind::StickAck => {
                ResponseBody::StickAck(StickAck::from_code(ack.unwrap_or_default()))
            }
            ResponseKind::NodeResponse => {
                ResponseBody::NodeResponse(NodeResponseCode::from_code(ack.unwrap_or_default()))
            }
            ResponseKind::NetworkInfo => ResponseBody::NetworkInfo {
                channel: v.text()?,
                source_mac: v.text()?,
                extended_pan_id: v.text()?,
                unique_network_id: v.text()?,
                new_node_mac: v.text()?,
                pan_id: v.text()?,
                index: v.int()? as u8,
            },
            ResponseKind::NodeSpecific => ResponseBody::NodeSpecific {
                status: v.int()? as u16,
            },
            ResponseKind::CirclePlusConnect => ResponseBody::CirclePlusConnect {
                existing: v.int()? == 1,
                allowed: v.int()? == 1,
            },
            ResponseKind::JoinAvailable => ResponseBody::JoinAvailable,
            ResponseKind::Ping => ResponseBody::Ping {
                rssi_in: v.signed()? as i8,
                rssi_out: v.signed()? as i8,
                round_trip_ms: v.int()? as u16,
            },
            ResponseKind::ImageValidation => ResponseBody::ImageValidation {
                timestamp: v.next()?.as_timestamp()?,
            },
            ResponseKind::StickInit => {
                let _unknown = v.int()?;
                let network_online = v.int()? == 1;
                let circle_plus_mac = v.text()?;
                let network_id = v.int()? as u16;
                let _unknown2 = v.int()?;
                ResponseBody::StickInit {
                    network_online,
                    circle_plus_mac,
                    network_id,
                }
            }
            ResponseKind::PowerUsage => ResponseBody::PowerUsage {
                pulse_1s: v.signed()?,
                pulse_8s: v.signed()?,
                consumed: v.signed()?,
                produced: v.signed()?,
                nanosecond_offset: v.signed()?,
            },
            ResponseKind::LogData => ResponseBody::LogData {
                stored: v.date_time()?,
                meter_info: v.int()?,
                log_address: v.log_address()?,
            },
            ResponseKind::CirclePlusScan => ResponseBody::CirclePlusScan {
                node_mac: v.next()?.as_mac()?,
                address: v.int()? as u8,
            },
            ResponseKind::NodeRemove => ResponseBody::NodeRemove {
                removed_mac: v.text()?,
                status: v.int()? as u8,
            },
            ResponseKind::NodeInfo => ResponseBody::NodeInfo(NodeInfoData {
                timestamp: v.date_time()?,
                last_log_address: v.log_address()?,
                relay_state: v.int()? == 1,
                frequency: v.int()? as u8,
                hardware_version: v.text()?,
                firmware: v.next()?.as_timestamp()?,
                node_type: NodeType::from_code(v.int()? as u8),
            }),
            ResponseKind::Calibration => ResponseBody::Calibration {
                gain_a: v.float()?,
                gain_b: v.float()?,
                off_tot: v.float()?,
                off_noise: v.float()?,
            },
            ResponseKind::RealTimeClock => ResponseBody::RealTimeClock {
                time: v.next()?.as_time()?,
                day_of_week: v.int()? as u8,
                date: v.next()?.as_date()?,
            },
            ResponseKind::Clock => {
                let time = v.next()?.as_time()?;
                let day_of_week = v.int()? as u8;
                let _unknown = v.int()?;
                let _unknown2 = v.int()?;
                ResponseBody::Clock { time, day_of_week }
            }
            ResponseKind::EnergyLogs => {
                let mut slots = [LogSlot {
                    timestamp: None,
                    pulses: 0,
                }; 4];
                for slot in slots.iter_mut() {
                    slot.timestamp = v.date_time()?;
                    slot.pulses = v.signed()?;
                }
                ResponseBody::EnergyLogs {
                    slots,
                    log_address: v.log_address()?,
                }
            }
            ResponseKind::Awake => ResponseBody::Awake(AwakeReason::from_code(v.int()? as u8)),
            ResponseKind::SwitchGroup => ResponseBody::SwitchGroup {
                group: v.int()? as u8,
                power_state: v.int()? == 1,
            },
            ResponseKind::Features => ResponseBody::Features {
                features: v.text()?,
            },
            ResponseKind::Rejoin => ResponseBody::Rejoin,
            ResponseKind::NodeAck => {
                ResponseBody::NodeAck(NodeAckCode::from_code(ack.unwrap_or_default()))
            }
            ResponseKind::SenseReport => ResponseBody::SenseReport {
                humidity: v.int()? as u16,
                temperature: v.int()? as u16,
            },
            ResponseKind::RelayInitState => ResponseBody::RelayInitState {
                configure: v.int()? == 1,
                relay: v.int()? == 1,
            },
        };
        Ok(body)
    }

    /// Parameter values in layout order
    pub fn fields(&self) -> Vec<FieldValue> {
        let flag = |b: bool| FieldValue::int(b as u64, 2);
        match self {
            ResponseBody::StickAck(_)
            | ResponseBody::NodeResponse(_)
            | ResponseBody::NodeAck(_)
            | ResponseBody::JoinAvailable
            | ResponseBody::Rejoin => Vec::new(),
            ResponseBody::NetworkInfo {
                channel,
                source_mac,
                extended_pan_id,
                unique_network_id,
                new_node_mac,
                pan_id,
                index,
            } => vec![
                FieldValue::text(channel),
                FieldValue::text(source_mac),
                FieldValue::text(extended_pan_id),
                FieldValue::text(unique_network_id),
                FieldValue::text(new_node_mac),
                FieldValue::text(pan_id),
                FieldValue::int(*index as u64, 2),
            ],
            ResponseBody::NodeSpecific { status } => vec![FieldValue::int(*status as u64, 4)],
            ResponseBody::CirclePlusConnect { existing, allowed } => {
                vec![flag(*existing), flag(*allowed)]
            }
            ResponseBody::Ping {
                rssi_in,
                rssi_out,
                round_trip_ms,
            } => vec![
                FieldValue::signed(*rssi_in as i64, 2),
                FieldValue::signed(*rssi_out as i64, 2),
                FieldValue::int(*round_trip_ms as u64, 4),
            ],
            ResponseBody::ImageValidation { timestamp } => {
                vec![FieldValue::UnixTimestamp(*timestamp)]
            }
            ResponseBody::StickInit {
                network_online,
                circle_plus_mac,
                network_id,
            } => vec![
                FieldValue::int(0, 2),
                flag(*network_online),
                FieldValue::text(circle_plus_mac),
                FieldValue::int(*network_id as u64, 4),
                FieldValue::int(0xFF, 2),
            ],
            ResponseBody::PowerUsage {
                pulse_1s,
                pulse_8s,
                consumed,
                produced,
                nanosecond_offset,
            } => vec![
                FieldValue::signed(*pulse_1s, 4),
                FieldValue::signed(*pulse_8s, 4),
                FieldValue::signed(*consumed, 8),
                FieldValue::signed(*produced, 8),
                FieldValue::signed(*nanosecond_offset, 4),
            ],
            ResponseBody::LogData {
                stored,
                meter_info,
                log_address,
            } => vec![
                FieldValue::DateTime(*stored),
                FieldValue::int(*meter_info, 8),
                FieldValue::LogAddress(*log_address),
            ],
            ResponseBody::CirclePlusScan { node_mac, address } => {
                vec![FieldValue::Mac(*node_mac), FieldValue::int(*address as u64, 2)]
            }
            ResponseBody::NodeRemove {
                removed_mac,
                status,
            } => vec![FieldValue::text(removed_mac), FieldValue::int(*status as u64, 2)],
            ResponseBody::NodeInfo(info) => vec![
                FieldValue::DateTime(info.timestamp),
                FieldValue::LogAddress(info.last_log_address),
                flag(info.relay_state),
                FieldValue::int(info.frequency as u64, 2),
                FieldValue::text(&info.hardware_version),
                FieldValue::UnixTimestamp(info.firmware),
                FieldValue::int(info.node_type.code() as u64, 2),
            ],
            ResponseBody::Calibration {
                gain_a,
                gain_b,
                off_tot,
                off_noise,
            } => vec![
                FieldValue::Float(*gain_a),
                FieldValue::Float(*gain_b),
                FieldValue::Float(*off_tot),
                FieldValue::Float(*off_noise),
            ],
            ResponseBody::RealTimeClock {
                time,
                day_of_week,
                date,
            } => vec![
                FieldValue::RealClockTime(*time),
                FieldValue::int(*day_of_week as u64, 2),
                FieldValue::RealClockDate(*date),
            ],
            ResponseBody::Clock { time, day_of_week } => vec![
                FieldValue::Time(*time),
                FieldValue::int(*day_of_week as u64, 2),
                FieldValue::int(0, 2),
                FieldValue::int(0, 4),
            ],
            ResponseBody::EnergyLogs { slots, log_address } => {
                let mut values = Vec::with_capacity(9);
                for slot in slots {
                    values.push(FieldValue::DateTime(slot.timestamp));
                    values.push(FieldValue::signed(slot.pulses, 8));
                }
                values.push(FieldValue::LogAddress(*log_address));
                values
            }
            ResponseBody::Awake(reason) => vec![FieldValue::int(reason.code() as u64, 2)],
            ResponseBody::SwitchGroup { group, power_state } => {
                vec![FieldValue::int(*group as u64, 2), flag(*power_state)]
            }
            ResponseBody::Features { features } => vec![FieldValue::text(features)],
            ResponseBody::SenseReport {
                humidity,
                temperature,
            } => vec![
                FieldValue::int(*humidity as u64, 4),
                FieldValue::int(*temperature as u64, 4),
            ],
            ResponseBody::RelayInitState { configure, relay } => {
                vec![flag(*configure), flag(*relay)]
            }
        }
    }
}

/// A validated response frame
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub seq: SequenceId,
    pub mac: Option<MacAddress>,
    pub body: ResponseBody,
}

impl Response {
    pub fn new(seq: SequenceId, mac: Option<MacAddress>, body: ResponseBody) -> Self {
        Self { seq, mac, body }
    }

    pub fn kind(&self) -> ResponseKind {
        self.body.kind()
    }

    /// Decode a complete frame as the given kind
    ///
    /// # Errors
    ///
    /// Checksum, length and field errors reject the whole frame.
    pub fn decode(kind: ResponseKind, frame: &[u8]) -> StickResult<Self> {
        let body = frame::open(frame)?;
        if frame.len() != kind.frame_length() {
            return Err(StickError::LengthMismatch {
                kind: kind.to_string(),
                expected: kind.frame_length(),
                actual: frame.len(),
            });
        }
        let header = ResponseHeader::peek(frame)?;
        let mut reader = FieldReader::new(&body[ID_LENGTH + SEQ_LENGTH..]);
        let ack = if kind.has_ack() {
            Some(reader.int(ACK_LENGTH)? as u16)
        } else {
            None
        };
        let mac = if kind.has_mac() {
            Some(reader.mac()?)
        } else {
            None
        };
        let values = kind
            .layout()
            .iter()
            .map(|field| reader.read(*field))
            .collect::<StickResult<Vec<_>>>()?;
        reader.finish()?;
        Ok(Self {
            seq: header.seq,
            mac,
            body: ResponseBody::from_fields(kind, ack, &values)?,
        })
    }

    /// Encode as the stick would send it
    pub fn encode(&self) -> StickResult<Bytes> {
        let kind = self.kind();
        let mut body = Vec::with_capacity(kind.frame_length());
        body.extend_from_slice(kind.id());
        body.extend_from_slice(&self.seq.to_wire());
        if let Some(code) = self.body.ack_code() {
            FieldValue::int(code as u64, ACK_LENGTH).encode(&mut body)?;
        }
        if kind.has_mac() {
            let mac = self.mac.ok_or_else(|| {
                StickError::InvalidData(format!("{} requires a node address", kind))
            })?;
            body.extend_from_slice(mac.as_bytes());
        }
        for field in self.body.fields() {
            field.encode(&mut body)?;
        }
        let frame = frame::seal(&body);
        if frame.len() != kind.frame_length() {
            return Err(StickError::LengthMismatch {
                kind: kind.to_string(),
                expected: kind.frame_length(),
                actual: frame.len(),
            });
        }
        Ok(frame)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mac {
            Some(mac) => write!(f, "{} from {} (seq {})", self.kind(), mac, self.seq),
            None => write!(f, "{} (seq {})", self.kind(), self.seq),
        }
    }
}

/// Offset of the footer in a frame of the given length
pub(crate) fn footer_index(frame_length: usize) -> usize {
    frame_length - frame::FOOTER_LENGTH
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn mac() -> MacAddress {
        "0123456789ABCDEF".parse().unwrap()
    }

    #[test]
    fn test_frame_lengths() {
        assert_eq!(ResponseKind::StickAck.frame_length(), 22);
        assert_eq!(ResponseKind::NodeResponse.frame_length(), 38);
        assert_eq!(ResponseKind::Ping.frame_length(), 34 + 8);
        assert_eq!(ResponseKind::NodeSpecific.frame_length(), 18 + 4);
        assert_eq!(ResponseKind::EnergyLogs.frame_length(), 34 + 4 * 16 + 8);
        assert_eq!(footer_index(ResponseKind::StickAck.frame_length()), 20);
        assert_eq!(footer_index(ResponseKind::NodeResponse.frame_length()), 36);
    }

    #[test]
    fn test_kind_lookup() {
        assert_eq!(ResponseKind::from_id(b"0024"), Some(ResponseKind::NodeInfo));
        assert_eq!(ResponseKind::from_id(b"0000"), None);
        assert_eq!(ResponseKind::from_ack_footer(20), Some(ResponseKind::StickAck));
        assert_eq!(ResponseKind::from_ack_footer(36), Some(ResponseKind::NodeResponse));
        assert_eq!(ResponseKind::from_ack_footer(30), None);
        assert_eq!(
            ResponseKind::from_reserved_seq(SequenceId::AWAKE),
            Some(ResponseKind::Awake)
        );
    }

    #[test]
    fn test_stick_ack_wire_format() {
        let ack = Response::new(
            SequenceId::new(0x12),
            None,
            ResponseBody::StickAck(StickAck::Accepted),
        );
        let frame = ack.encode().unwrap();
        assert_eq!(&frame[4..16], b"0000001200C1");
        assert_eq!(Response::decode(ResponseKind::StickAck, &frame).unwrap(), ack);
    }

    #[test]
    fn test_power_usage_signed_pulses() {
        let response = Response::new(
            SequenceId::new(7),
            Some(mac()),
            ResponseBody::PowerUsage {
                pulse_1s: -1,
                pulse_8s: 120,
                consumed: 1000,
                produced: -5,
                nanosecond_offset: 0,
            },
        );
        let frame = response.encode().unwrap();
        assert_eq!(frame.len(), 62);
        assert_eq!(Response::decode(ResponseKind::PowerUsage, &frame).unwrap(), response);
    }

    #[test]
    fn test_energy_logs_decode() {
        let stamp = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let slot = |hours: i64, pulses| LogSlot {
            timestamp: Some(stamp + chrono::Duration::hours(hours)),
            pulses,
        };
        let response = Response::new(
            SequenceId::new(9),
            Some(mac()),
            ResponseBody::EnergyLogs {
                slots: [
                    slot(0, 10),
                    slot(1, 20),
                    slot(2, 30),
                    LogSlot {
                        timestamp: None,
                        pulses: 0,
                    },
                ],
                log_address: 42,
            },
        );
        let frame = response.encode().unwrap();
        assert_eq!(Response::decode(ResponseKind::EnergyLogs, &frame).unwrap(), response);
    }

    /// One representative response of every kind
    fn catalog() -> Vec<Response> {
        let stamp = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let seq = SequenceId::new(0x0A1B);
        let node = |body| Response::new(seq, Some(mac()), body);
        let stick = |body| Response::new(seq, None, body);
        vec![
            stick(ResponseBody::StickAck(StickAck::Timeout)),
            node(ResponseBody::NodeResponse(NodeResponseCode::SleepConfigAccepted)),
            stick(ResponseBody::NetworkInfo {
                channel: "0F".to_string(),
                source_mac: "000D6F0000A1B2C3".to_string(),
                extended_pan_id: "FFFFFFFFFFFFFFFF".to_string(),
                unique_network_id: "0123456789ABCDEF".to_string(),
                new_node_mac: "FFFFFFFFFFFFFFFF".to_string(),
                pan_id: "4A2B".to_string(),
                index: 1,
            }),
            stick(ResponseBody::NodeSpecific { status: 0x00C1 }),
            stick(ResponseBody::CirclePlusConnect {
                existing: true,
                allowed: false,
            }),
            node(ResponseBody::JoinAvailable),
            node(ResponseBody::Ping {
                rssi_in: -62,
                rssi_out: 35,
                round_trip_ms: 843,
            }),
            node(ResponseBody::ImageValidation {
                timestamp: 1_580_000_000,
            }),
            node(ResponseBody::StickInit {
                network_online: true,
                circle_plus_mac: "010D6F0000123456".to_string(),
                network_id: 0x4A2B,
            }),
            node(ResponseBody::PowerUsage {
                pulse_1s: 12,
                pulse_8s: 97,
                consumed: 4_500,
                produced: 0,
                nanosecond_offset: -1_200,
            }),
            node(ResponseBody::LogData {
                stored: Some(stamp),
                meter_info: 7,
                log_address: 250,
            }),
            node(ResponseBody::CirclePlusScan {
                node_mac: "000D6F0000468F71".parse().unwrap(),
                address: 12,
            }),
            node(ResponseBody::NodeRemove {
                removed_mac: "000D6F0000468F71".to_string(),
                status: 1,
            }),
            node(ResponseBody::NodeInfo(NodeInfoData {
                timestamp: Some(stamp),
                last_log_address: 6015,
                relay_state: true,
                frequency: 133,
                hardware_version: "000000070140".to_string(),
                firmware: 1_580_000_000,
                node_type: NodeType::Circle,
            })),
            node(ResponseBody::Calibration {
                gain_a: 1.0,
                gain_b: -0.25,
                off_tot: 0.5,
                off_noise: 0.0,
            }),
            node(ResponseBody::RealTimeClock {
                time: NaiveTime::from_hms_opt(13, 45, 7).unwrap(),
                day_of_week: 6,
                date: NaiveDate::from_ymd_opt(2023, 11, 5).unwrap(),
            }),
            node(ResponseBody::Clock {
                time: NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
                day_of_week: 2,
            }),
            node(ResponseBody::EnergyLogs {
                slots: [
                    LogSlot {
                        timestamp: Some(stamp),
                        pulses: 1_000,
                    },
                    LogSlot {
                        timestamp: Some(stamp),
                        pulses: -40,
                    },
                    LogSlot {
                        timestamp: None,
                        pulses: 0,
                    },
                    LogSlot {
                        timestamp: None,
                        pulses: 0,
                    },
                ],
                log_address: 17,
            }),
            node(ResponseBody::Awake(AwakeReason::Button)),
            node(ResponseBody::SwitchGroup {
                group: 1,
                power_state: true,
            }),
            node(ResponseBody::Features {
                features: "0000000000010080".to_string(),
            }),
            node(ResponseBody::Rejoin),
            node(ResponseBody::NodeAck(NodeAckCode::ScanConfigAccepted)),
            node(ResponseBody::SenseReport {
                humidity: 0x7FFF,
                temperature: 0xFFFF,
            }),
            node(ResponseBody::RelayInitState {
                configure: false,
                relay: true,
            }),
        ]
    }

    #[test]
    fn test_catalog_roundtrip() {
        let responses = catalog();
        let kinds: HashSet<ResponseKind> = responses.iter().map(Response::kind).collect();
        assert_eq!(kinds, ResponseKind::ALL.into_iter().collect::<HashSet<_>>());
        assert_eq!(responses.len(), ResponseKind::ALL.len());

        for response in responses {
            let kind = response.kind();
            let frame = response.encode().unwrap();
            assert_eq!(frame.len(), kind.frame_length(), "{}", kind);
            assert_eq!(Response::decode(kind, &frame).unwrap(), response, "{}", kind);
        }
    }

    #[test]
    fn test_node_ack_code_precedes_address() {
        let response = Response::new(
            SequenceId::new(0x21),
            Some(mac()),
            ResponseBody::NodeAck(NodeAckCode::LightCalibrationAccepted),
        );
        let frame = response.encode().unwrap();
        assert_eq!(&frame[4..12], b"01000021");
        assert_eq!(&frame[12..32], b"00BD0123456789ABCDEF");
        assert_eq!(frame.len(), ResponseKind::NodeResponse.frame_length());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let awake = ResponseBody::Awake(AwakeReason::State);
        let frame = Response::new(SequenceId::new(1), Some(mac()), awake)
            .encode()
            .unwrap();
        assert!(matches!(
            Response::decode(ResponseKind::Ping, &frame),
            Err(StickError::LengthMismatch { .. })
        ));
    }
}
