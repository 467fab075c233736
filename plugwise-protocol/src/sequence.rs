//! Sequence ids correlating requests and responses

use crate::error::{StickError, StickResult};
use std::fmt;

/// Four hex digit sequence id assigned by the stick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId(u16);

impl SequenceId {
    /// Node rejoined the network
    pub const REJOIN: SequenceId = SequenceId(0xFFFD);
    /// Sleeping node announced it is awake
    pub const AWAKE: SequenceId = SequenceId(0xFFFE);
    /// Broadcast switch-group report
    pub const SWITCH_GROUP: SequenceId = SequenceId(0xFFFF);
    /// First id that wraps back to zero
    const WRAP: u16 = 0xFFFC;

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    /// Parse the four ASCII hex digits of a frame
    pub fn from_wire(data: &[u8]) -> StickResult<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| StickError::FrameInvalid(format!("sequence id {:?}", data)))?;
        if text.len() != 4 {
            return Err(StickError::FrameInvalid(format!("sequence id '{}'", text)));
        }
        u16::from_str_radix(text, 16)
            .map(Self)
            .map_err(|_| StickError::FrameInvalid(format!("sequence id '{}'", text)))
    }

    /// Wire representation
    pub fn to_wire(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        out.copy_from_slice(format!("{:04X}", self.0).as_bytes());
        out
    }

    /// Id the stick assigns after this one
    ///
    /// Never returns one of the broadcast ids: the counter wraps to `0000` once the
    /// successor reaches `FFFC`.
    pub fn next(&self) -> Self {
        let next = self.0 as u32 + 1;
        if next >= Self::WRAP as u32 {
            Self(0)
        } else {
            Self(next as u16)
        }
    }

    /// Ids used by unsolicited broadcast messages
    pub fn is_reserved(&self) -> bool {
        self.0 >= Self::WRAP
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_wraps_before_reserved() {
        assert_eq!(SequenceId::new(0x0000).next(), SequenceId::new(0x0001));
        assert_eq!(SequenceId::new(0xFFFA).next(), SequenceId::new(0xFFFB));
        assert_eq!(SequenceId::new(0xFFFB).next(), SequenceId::new(0x0000));
        assert!(!SequenceId::new(0xFFFB).is_reserved());
        assert!(SequenceId::AWAKE.is_reserved());
        assert_eq!(SequenceId::AWAKE.next(), SequenceId::new(0));
    }

    #[test]
    fn test_sequence_wire_format() {
        let seq = SequenceId::from_wire(b"00AF").unwrap();
        assert_eq!(seq.value(), 0xAF);
        assert_eq!(&seq.to_wire(), b"00AF");
        assert_eq!(seq.to_string(), "00AF");
        assert!(SequenceId::from_wire(b"00G0").is_err());
        assert_eq!(SequenceId::from_wire(b"FFFD").unwrap(), SequenceId::REJOIN);
    }
}
