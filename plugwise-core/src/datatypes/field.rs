//! Positional field types of the stick protocol
//!
//! Every value travels as ASCII: integers as fixed-width uppercase hex, clock values
//! as hex or decimal digit pairs, and addresses as 16 hex digits.

use crate::constants::{LOGADDR_OFFSET, LOGADDR_STEP, PLUGWISE_EPOCH};
use crate::error::{StickError, StickResult};
use crate::mac::MacAddress;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use std::fmt;

/// Minutes value marking an empty date/time field
const NO_DATE_TIME: u64 = 0xFFFF;

/// Layout of a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Unsigned hex integer of the given number of digits
    Int(usize),
    /// Two's complement hex integer of the given number of digits
    SignedInt(usize),
    /// Raw ASCII of the given length
    Text(usize),
    /// 16 hex digit device address
    Mac,
    /// Seconds since the Unix epoch, 8 hex digits
    UnixTimestamp,
    /// Year, month and minutes into the month
    DateTime,
    /// Hour, minute, second as hex pairs
    Time,
    /// Second, minute, hour as decimal pairs
    RealClockTime,
    /// Day, month, year as decimal pairs
    RealClockDate,
    /// Big-endian IEEE-754 single precision, 8 hex digits
    Float,
    /// Flash memory address of a log buffer
    LogAddress,
}

impl FieldType {
    /// Encoded width in bytes
    pub fn width(&self) -> usize {
        match self {
            FieldType::Int(n) | FieldType::SignedInt(n) | FieldType::Text(n) => *n,
            FieldType::Mac => 16,
            FieldType::UnixTimestamp | FieldType::DateTime | FieldType::Float => 8,
            FieldType::Time | FieldType::RealClockTime | FieldType::RealClockDate => 6,
            FieldType::LogAddress => 8,
        }
    }

    /// Decode a field of this type
    ///
    /// # Arguments
    ///
    /// * `data` - Exactly `width()` bytes
    pub fn decode(&self, data: &[u8]) -> StickResult<FieldValue> {
        if data.len() != self.width() {
            return Err(StickError::InvalidData(format!(
                "{:?} needs {} bytes, got {}",
                self,
                self.width(),
                data.len()
            )));
        }
        let value = match self {
            FieldType::Int(_) => FieldValue::Int {
                value: parse_hex(data)?,
                width: data.len(),
            },
            FieldType::SignedInt(_) => FieldValue::SignedInt {
                value: to_signed(parse_hex(data)?, data.len()),
                width: data.len(),
            },
            FieldType::Text(_) => FieldValue::Text(data.to_vec()),
            FieldType::Mac => FieldValue::Mac(MacAddress::from_wire(data)?),
            FieldType::UnixTimestamp => FieldValue::UnixTimestamp(parse_hex(data)? as i64),
            FieldType::DateTime => FieldValue::DateTime(decode_date_time(data)?),
            FieldType::Time => {
                let hour = parse_hex(&data[0..2])? as u32;
                let minute = parse_hex(&data[2..4])? as u32;
                let second = parse_hex(&data[4..6])? as u32;
                FieldValue::Time(make_time(hour, minute, second)?)
            }
            FieldType::RealClockTime => {
                let second = parse_decimal(&data[0..2])?;
                let minute = parse_decimal(&data[2..4])?;
                let hour = parse_decimal(&data[4..6])?;
                FieldValue::RealClockTime(make_time(hour, minute, second)?)
            }
            FieldType::RealClockDate => {
                let day = parse_decimal(&data[0..2])?;
                let month = parse_decimal(&data[2..4])?;
                let year = parse_decimal(&data[4..6])? as i32 + PLUGWISE_EPOCH;
                let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
                    StickError::InvalidData(format!("invalid date {}-{}-{}", year, month, day))
                })?;
                FieldValue::RealClockDate(date)
            }
            FieldType::Float => FieldValue::Float(f32::from_bits(parse_hex(data)? as u32)),
            FieldType::LogAddress => {
                let raw = parse_hex(data)? as i64;
                FieldValue::LogAddress(((raw - LOGADDR_OFFSET).div_euclid(LOGADDR_STEP)) as i32)
            }
        };
        Ok(value)
    }
}

/// A typed field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int { value: u64, width: usize },
    SignedInt { value: i64, width: usize },
    Text(Vec<u8>),
    Mac(MacAddress),
    UnixTimestamp(i64),
    DateTime(Option<DateTime<Utc>>),
    Time(NaiveTime),
    RealClockTime(NaiveTime),
    RealClockDate(NaiveDate),
    Float(f32),
    LogAddress(i32),
}

impl FieldValue {
    pub fn int(value: u64, width: usize) -> Self {
        FieldValue::Int { value, width }
    }

    pub fn signed(value: i64, width: usize) -> Self {
        FieldValue::SignedInt { value, width }
    }

    pub fn text(value: &str) -> Self {
        FieldValue::Text(value.as_bytes().to_vec())
    }

    /// Layout this value encodes to
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Int { width, .. } => FieldType::Int(*width),
            FieldValue::SignedInt { width, .. } => FieldType::SignedInt(*width),
            FieldValue::Text(bytes) => FieldType::Text(bytes.len()),
            FieldValue::Mac(_) => FieldType::Mac,
            FieldValue::UnixTimestamp(_) => FieldType::UnixTimestamp,
            FieldValue::DateTime(_) => FieldType::DateTime,
            FieldValue::Time(_) => FieldType::Time,
            FieldValue::RealClockTime(_) => FieldType::RealClockTime,
            FieldValue::RealClockDate(_) => FieldType::RealClockDate,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::LogAddress(_) => FieldType::LogAddress,
        }
    }

    /// Append the wire form of this value
    ///
    /// # Errors
    ///
    /// Returns `StickError::InvalidData` if the value does not fit its width
    pub fn encode(&self, out: &mut Vec<u8>) -> StickResult<()> {
        match self {
            FieldValue::Int { value, width } => push_hex(out, *value, *width)?,
            FieldValue::SignedInt { value, width } => {
                let bits = (*width as u32) * 4;
                let min = -(1i128 << (bits - 1));
                let max = (1i128 << (bits - 1)) - 1;
                if (*value as i128) < min || (*value as i128) > max {
                    return Err(StickError::InvalidData(format!(
                        "{} does not fit {} signed hex digits",
                        value, width
                    )));
                }
                let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
                push_hex(out, (*value as u64) & mask, *width)?;
            }
            FieldValue::Text(bytes) => out.extend_from_slice(bytes),
            FieldValue::Mac(mac) => out.extend_from_slice(mac.as_bytes()),
            FieldValue::UnixTimestamp(seconds) => {
                let seconds = u64::try_from(*seconds)
                    .map_err(|_| {
                        StickError::InvalidData(format!("negative timestamp {}", seconds))
                    })?;
                push_hex(out, seconds, 8)?;
            }
            FieldValue::DateTime(value) => match value {
                Some(moment) => {
                    let year = u64::try_from(moment.year() - PLUGWISE_EPOCH).map_err(|_| {
                        StickError::InvalidData(format!("year {} before epoch", moment.year()))
                    })?;
                    let minutes = (moment.day() as u64 - 1) * 24 * 60
                        + moment.hour() as u64 * 60
                        + moment.minute() as u64;
                    push_hex(out, year, 2)?;
                    push_hex(out, moment.month() as u64, 2)?;
                    push_hex(out, minutes, 4)?;
                }
                None => {
                    push_hex(out, 0, 2)?;
                    push_hex(out, 1, 2)?;
                    push_hex(out, NO_DATE_TIME, 4)?;
                }
            },
            FieldValue::Time(time) => {
                push_hex(out, time.hour() as u64, 2)?;
                push_hex(out, time.minute() as u64, 2)?;
                push_hex(out, time.second() as u64, 2)?;
            }
            FieldValue::RealClockTime(time) => {
                out.extend_from_slice(
                    format!("{:02}{:02}{:02}", time.second(), time.minute(), time.hour())
                        .as_bytes(),
                );
            }
            FieldValue::RealClockDate(date) => {
                let year = date.year() - PLUGWISE_EPOCH;
                if !(0..100).contains(&year) {
                    return Err(StickError::InvalidData(format!(
                        "year {} out of range",
                        date.year()
                    )));
                }
                out.extend_from_slice(
                    format!("{:02}{:02}{:02}", date.day(), date.month(), year).as_bytes(),
                );
            }
            FieldValue::Float(value) => push_hex(out, value.to_bits() as u64, 8)?,
            FieldValue::LogAddress(address) => {
                let raw = u64::try_from(*address as i64 * LOGADDR_STEP + LOGADDR_OFFSET)
                    .map_err(|_| StickError::InvalidData(format!("log address {}", address)))?;
                push_hex(out, raw, 8)?;
            }
        }
        Ok(())
    }

    pub fn as_u64(&self) -> StickResult<u64> {
        match self {
            FieldValue::Int { value, .. } => Ok(*value),
            other => Err(type_error("Int", other)),
        }
    }

    pub fn as_i64(&self) -> StickResult<i64> {
        match self {
            FieldValue::SignedInt { value, .. } => Ok(*value),
            FieldValue::Int { value, .. } => Ok(*value as i64),
            other => Err(type_error("SignedInt", other)),
        }
    }

    pub fn as_text(&self) -> StickResult<String> {
        match self {
            FieldValue::Text(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            other => Err(type_error("Text", other)),
        }
    }

    pub fn as_mac(&self) -> StickResult<MacAddress> {
        match self {
            FieldValue::Mac(mac) => Ok(*mac),
            other => Err(type_error("Mac", other)),
        }
    }

    pub fn as_date_time(&self) -> StickResult<Option<DateTime<Utc>>> {
        match self {
            FieldValue::DateTime(value) => Ok(*value),
            other => Err(type_error("DateTime", other)),
        }
    }

    pub fn as_time(&self) -> StickResult<NaiveTime> {
        match self {
            FieldValue::Time(time) | FieldValue::RealClockTime(time) => Ok(*time),
            other => Err(type_error("Time", other)),
        }
    }

    pub fn as_date(&self) -> StickResult<NaiveDate> {
        match self {
            FieldValue::RealClockDate(date) => Ok(*date),
            other => Err(type_error("RealClockDate", other)),
        }
    }

    pub fn as_f32(&self) -> StickResult<f32> {
        match self {
            FieldValue::Float(value) => Ok(*value),
            other => Err(type_error("Float", other)),
        }
    }

    pub fn as_log_address(&self) -> StickResult<i32> {
        match self {
            FieldValue::LogAddress(address) => Ok(*address),
            other => Err(type_error("LogAddress", other)),
        }
    }

    pub fn as_timestamp(&self) -> StickResult<i64> {
        match self {
            FieldValue::UnixTimestamp(seconds) => Ok(*seconds),
            other => Err(type_error("UnixTimestamp", other)),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int { value, .. } => write!(f, "{}", value),
            FieldValue::SignedInt { value, .. } => write!(f, "{}", value),
            FieldValue::Text(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            FieldValue::Mac(mac) => write!(f, "{}", mac),
            FieldValue::UnixTimestamp(seconds) => write!(f, "@{}", seconds),
            FieldValue::DateTime(Some(moment)) => write!(f, "{}", moment),
            FieldValue::DateTime(None) => write!(f, "-"),
            FieldValue::Time(time) | FieldValue::RealClockTime(time) => write!(f, "{}", time),
            FieldValue::RealClockDate(date) => write!(f, "{}", date),
            FieldValue::Float(value) => write!(f, "{}", value),
            FieldValue::LogAddress(address) => write!(f, "log#{}", address),
        }
    }
}

/// Sequential reader over the parameter bytes of a frame
#[derive(Debug)]
pub struct FieldReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Read the next field of the given type
    pub fn read(&mut self, field: FieldType) -> StickResult<FieldValue> {
        let width = field.width();
        let end = self.position + width;
        if end > self.data.len() {
            return Err(StickError::InvalidData(format!(
                "{:?} at offset {} exceeds {} parameter bytes",
                field,
                self.position,
                self.data.len()
            )));
        }
        let value = field.decode(&self.data[self.position..end])?;
        self.position = end;
        Ok(value)
    }

    pub fn int(&mut self, width: usize) -> StickResult<u64> {
        self.read(FieldType::Int(width))?.as_u64()
    }

    pub fn signed(&mut self, width: usize) -> StickResult<i64> {
        self.read(FieldType::SignedInt(width))?.as_i64()
    }

    pub fn text(&mut self, width: usize) -> StickResult<String> {
        self.read(FieldType::Text(width))?.as_text()
    }

    pub fn mac(&mut self) -> StickResult<MacAddress> {
        self.read(FieldType::Mac)?.as_mac()
    }

    pub fn unix_timestamp(&mut self) -> StickResult<i64> {
        self.read(FieldType::UnixTimestamp)?.as_timestamp()
    }

    pub fn date_time(&mut self) -> StickResult<Option<DateTime<Utc>>> {
        self.read(FieldType::DateTime)?.as_date_time()
    }

    pub fn time(&mut self) -> StickResult<NaiveTime> {
        self.read(FieldType::Time)?.as_time()
    }

    pub fn real_clock_time(&mut self) -> StickResult<NaiveTime> {
        self.read(FieldType::RealClockTime)?.as_time()
    }

    pub fn real_clock_date(&mut self) -> StickResult<NaiveDate> {
        self.read(FieldType::RealClockDate)?.as_date()
    }

    pub fn float(&mut self) -> StickResult<f32> {
        self.read(FieldType::Float)?.as_f32()
    }

    pub fn log_address(&mut self) -> StickResult<i32> {
        self.read(FieldType::LogAddress)?.as_log_address()
    }

    /// Bytes not consumed yet
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Fail unless every byte was consumed
    pub fn finish(&self) -> StickResult<()> {
        if self.remaining() != 0 {
            return Err(StickError::InvalidData(format!(
                "{} trailing parameter bytes",
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// Encode a list of fields back to back
pub fn encode_fields(fields: &[FieldValue]) -> StickResult<Vec<u8>> {
    let mut out = Vec::with_capacity(fields.iter().map(|f| f.field_type().width()).sum());
    for field in fields {
        field.encode(&mut out)?;
    }
    Ok(out)
}

fn push_hex(out: &mut Vec<u8>, value: u64, width: usize) -> StickResult<()> {
    if width < 16 && value >= (1u64 << (width * 4)) {
        return Err(StickError::InvalidData(format!(
            "{} does not fit {} hex digits",
            value, width
        )));
    }
    out.extend_from_slice(format!("{:0width$X}", value, width = width).as_bytes());
    Ok(())
}

fn parse_hex(data: &[u8]) -> StickResult<u64> {
    let text = std::str::from_utf8(data)
        .map_err(|_| StickError::InvalidData(format!("non-ASCII hex {:?}", data)))?;
    u64::from_str_radix(text, 16)
        .map_err(|_| StickError::InvalidData(format!("invalid hex '{}'", text)))
}

fn parse_decimal(data: &[u8]) -> StickResult<u32> {
    let text = std::str::from_utf8(data)
        .map_err(|_| StickError::InvalidData(format!("non-ASCII digits {:?}", data)))?;
    text.parse::<u32>()
        .map_err(|_| StickError::InvalidData(format!("invalid decimal '{}'", text)))
}

fn to_signed(value: u64, width: usize) -> i64 {
    let bits = (width * 4) as u32;
    if bits >= 64 {
        return value as i64;
    }
    if value & (1u64 << (bits - 1)) != 0 {
        (value as i64) - (1i64 << bits)
    } else {
        value as i64
    }
}

fn make_time(hour: u32, minute: u32, second: u32) -> StickResult<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| {
        StickError::InvalidData(format!("invalid time {}:{}:{}", hour, minute, second))
    })
}

// Empty log slots carry garbage in year and month, so anything unusable decodes to None.
fn decode_date_time(data: &[u8]) -> StickResult<Option<DateTime<Utc>>> {
    let year = parse_hex(&data[0..2])? as i32 + PLUGWISE_EPOCH;
    let month = parse_hex(&data[2..4])? as u32;
    let minutes = parse_hex(&data[4..8])?;
    if minutes == NO_DATE_TIME {
        return Ok(None);
    }
    let start = match Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single() {
        Some(start) => start,
        None => return Ok(None),
    };
    Ok(start.checked_add_signed(Duration::minutes(minutes as i64)))
}
