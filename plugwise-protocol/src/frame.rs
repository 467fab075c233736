//! Frame layout shared by requests and responses
//!
//! ```text
//! request:  header | id(4) | [mac(16)] | args | crc(4) | footer
//! response: header | id(4) | seq(4) | [ack(4)] | [mac(16)] | params | crc(4) | footer
//! ```
//!
//! The checksum covers everything between header and checksum.

use crate::crc::checksum;
use crate::error::{StickError, StickResult};
use crate::sequence::SequenceId;
use bytes::{BufMut, Bytes, BytesMut};
use plugwise_core::constants::{MESSAGE_FOOTER, MESSAGE_HEADER};

pub const HEADER_LENGTH: usize = 4;
pub const FOOTER_LENGTH: usize = 2;
pub const ID_LENGTH: usize = 4;
pub const SEQ_LENGTH: usize = 4;
pub const ACK_LENGTH: usize = 4;
pub const MAC_LENGTH: usize = 16;
pub const CHECKSUM_LENGTH: usize = 4;

/// Bytes of a response frame that are not parameters, acknowledge code or address
pub const RESPONSE_OVERHEAD: usize =
    HEADER_LENGTH + ID_LENGTH + SEQ_LENGTH + CHECKSUM_LENGTH + FOOTER_LENGTH;

/// Wrap a frame body with header, checksum and footer
pub fn seal(body: &[u8]) -> Bytes {
    let mut out =
        BytesMut::with_capacity(HEADER_LENGTH + body.len() + CHECKSUM_LENGTH + FOOTER_LENGTH);
    out.put_slice(MESSAGE_HEADER);
    out.put_slice(body);
    out.put_slice(&checksum(body));
    out.put_slice(MESSAGE_FOOTER);
    out.freeze()
}

/// Check header, footer and checksum of a complete frame
///
/// # Returns
///
/// The body between header and checksum
pub fn open(frame: &[u8]) -> StickResult<&[u8]> {
    let minimum = HEADER_LENGTH + ID_LENGTH + CHECKSUM_LENGTH + FOOTER_LENGTH;
    if frame.len() < minimum {
        return Err(StickError::FrameInvalid(format!(
            "Frame too short: {} bytes",
            frame.len()
        )));
    }
    if &frame[..HEADER_LENGTH] != MESSAGE_HEADER {
        return Err(StickError::FrameInvalid(format!(
            "Invalid header {:?}",
            &frame[..HEADER_LENGTH]
        )));
    }
    if &frame[frame.len() - FOOTER_LENGTH..] != MESSAGE_FOOTER {
        return Err(StickError::FrameInvalid(format!(
            "Invalid footer {:?}",
            &frame[frame.len() - FOOTER_LENGTH..]
        )));
    }
    let crc_start = frame.len() - FOOTER_LENGTH - CHECKSUM_LENGTH;
    let body = &frame[HEADER_LENGTH..crc_start];
    let expected = checksum(body);
    let actual = &frame[crc_start..crc_start + CHECKSUM_LENGTH];
    if actual != &expected[..] {
        return Err(StickError::ChecksumMismatch {
            expected: String::from_utf8_lossy(&expected).into_owned(),
            actual: String::from_utf8_lossy(actual).into_owned(),
        });
    }
    Ok(body)
}

/// Leading fields of a response frame, read before the type is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub id: [u8; 4],
    pub seq: SequenceId,
}

impl ResponseHeader {
    /// Read id and sequence id following the frame header
    pub fn peek(frame: &[u8]) -> StickResult<Self> {
        let start = HEADER_LENGTH;
        let end = start + ID_LENGTH + SEQ_LENGTH;
        if frame.len() < end {
            return Err(StickError::FrameInvalid(format!(
                "Frame too short for id and sequence: {} bytes",
                frame.len()
            )));
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&frame[start..start + ID_LENGTH]);
        let seq = SequenceId::from_wire(&frame[start + ID_LENGTH..end])?;
        Ok(Self { id, seq })
    }

    pub fn id_str(&self) -> String {
        String::from_utf8_lossy(&self.id).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let frame = seal(b"000A");
        assert_eq!(&frame[..4], MESSAGE_HEADER);
        assert_eq!(&frame[frame.len() - 2..], MESSAGE_FOOTER);
        assert_eq!(frame.len(), 4 + 4 + 4 + 2);
        assert_eq!(open(&frame).unwrap(), b"000A");
    }

    #[test]
    fn test_open_rejects_bad_checksum() {
        let mut frame = seal(b"000D0123456789ABCDEF").to_vec();
        let crc_index = frame.len() - 3;
        frame[crc_index] = if frame[crc_index] == b'0' { b'1' } else { b'0' };
        assert!(matches!(
            open(&frame),
            Err(StickError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_peek_header() {
        let frame = seal(b"00000001");
        let header = ResponseHeader::peek(&frame).unwrap();
        assert_eq!(&header.id, b"0000");
        assert_eq!(header.seq, SequenceId::new(1));
        assert!(ResponseHeader::peek(b"\x05\x05\x03\x0300").is_err());
    }
}
