//! Incremental frame parser over the raw byte stream
//!
//! The stick delivers bytes in arbitrary chunks. [`FrameParser`] buffers them,
//! locates frames between header and footer, resolves the response kind and
//! decodes it. A frame that fails any check is reported and skipped so the
//! stream resynchronizes on the next header.

use crate::error::StickError;
use crate::frame::{FOOTER_LENGTH, HEADER_LENGTH, ResponseHeader};
use crate::messages::response::{footer_index, Response, ResponseKind};
use crate::sequence::SequenceId;
use bytes::{Buf, BytesMut};
use plugwise_core::constants::{MESSAGE_FOOTER, MESSAGE_HEADER, TRAILING_NOISE};

const INITIAL_CAPACITY: usize = 1024;

/// Outcome of extracting one frame
#[derive(Debug)]
pub enum Decoded {
    Frame(Response),
    /// A complete frame was found but could not be decoded
    Rejected(StickError),
}

/// Buffers received bytes and yields decoded responses
#[derive(Debug)]
pub struct FrameParser {
    buffer: BytesMut,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Append received bytes
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes not consumed yet
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Extract the next complete frame
    ///
    /// # Arguments
    ///
    /// * `expected` - Kind awaited for a sequence id, consulted when the message id
    ///   is not in the static table
    ///
    /// # Returns
    ///
    /// `None` while no complete frame is buffered
    pub fn poll<F>(&mut self, expected: F) -> Option<Decoded>
    where
        F: Fn(SequenceId) -> Option<ResponseKind>,
    {
        let start = match find(&self.buffer, MESSAGE_HEADER) {
            Some(start) => start,
            None => {
                self.keep_header_prefix();
                return None;
            }
        };
        if start > 0 {
            log::debug!("Dropping {} bytes before frame header", start);
            self.buffer.advance(start);
        }

        let footer = find(&self.buffer[HEADER_LENGTH..], MESSAGE_FOOTER)? + HEADER_LENGTH;
        let frame_length = footer + FOOTER_LENGTH;

        match decode_frame(&self.buffer[..frame_length], &expected) {
            Ok(response) => {
                self.buffer.advance(frame_length);
                self.discard_noise();
                Some(Decoded::Frame(response))
            }
            Err(e) => {
                log::warn!("Dropping invalid frame: {}", e);
                self.buffer.advance(HEADER_LENGTH);
                Some(Decoded::Rejected(e))
            }
        }
    }

    // Without a header in the buffer, only a partial header at its tail can matter.
    fn keep_header_prefix(&mut self) {
        let keep = (1..HEADER_LENGTH)
            .rev()
            .find(|n| self.buffer.len() >= *n && self.buffer.ends_with(&MESSAGE_HEADER[..*n]))
            .unwrap_or(0);
        let drop = self.buffer.len() - keep;
        if drop > 0 {
            self.buffer.advance(drop);
        }
    }

    fn discard_noise(&mut self) {
        while self.buffer.first() == Some(&TRAILING_NOISE) {
            self.buffer.advance(1);
        }
    }
}

/// Resolve the kind of a complete frame and decode it
fn decode_frame<F>(frame: &[u8], expected: &F) -> Result<Response, StickError>
where
    F: Fn(SequenceId) -> Option<ResponseKind>,
{
    let header = ResponseHeader::peek(frame)?;
    let kind = ResponseKind::from_reserved_seq(header.seq)
        .or_else(|| {
            if &header.id == ResponseKind::StickAck.id() {
                ResponseKind::from_ack_footer(footer_index(frame.len()))
            } else {
                ResponseKind::from_id(&header.id).or_else(|| expected(header.seq))
            }
        })
        .ok_or_else(|| {
            StickError::UnknownMessage(format!("{} (seq {})", header.id_str(), header.seq))
        })?;
    Response::decode(kind, frame)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ack::{AwakeReason, NodeResponseCode, StickAck};
    use crate::messages::response::ResponseBody;
    use plugwise_core::MacAddress;

    fn mac() -> MacAddress {
        "000D6F0000468F71".parse().unwrap()
    }

    fn none(_: SequenceId) -> Option<ResponseKind> {
        None
    }

    fn stick_ack(seq: u16) -> Vec<u8> {
        Response::new(SequenceId::new(seq), None, ResponseBody::StickAck(StickAck::Accepted))
            .encode()
            .unwrap()
            .to_vec()
    }

    fn ping(seq: u16) -> Vec<u8> {
        Response::new(
            SequenceId::new(seq),
            Some(mac()),
            ResponseBody::Ping {
                rssi_in: 60,
                rssi_out: 58,
                round_trip_ms: 12,
            },
        )
        .encode()
        .unwrap()
        .to_vec()
    }

    fn expect_frame(parser: &mut FrameParser) -> Response {
        match parser.poll(none) {
            Some(Decoded::Frame(response)) => response,
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_small_and_large_ack() {
        let mut parser = FrameParser::new();
        parser.feed(&stick_ack(3));
        let large = Response::new(
            SequenceId::new(4),
            Some(mac()),
            ResponseBody::NodeResponse(NodeResponseCode::RelaySwitchedOn),
        );
        parser.feed(&large.encode().unwrap());

        assert_eq!(
            expect_frame(&mut parser).body,
            ResponseBody::StickAck(StickAck::Accepted)
        );
        assert_eq!(expect_frame(&mut parser), large);
        assert!(parser.poll(none).is_none());
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_split_feeds() {
        let frame = ping(0x10);
        let mut parser = FrameParser::new();
        for chunk in frame.chunks(5) {
            assert!(parser.poll(none).is_none());
            parser.feed(chunk);
        }
        let response = expect_frame(&mut parser);
        assert_eq!(response.seq, SequenceId::new(0x10));
        assert_eq!(response.mac, Some(mac()));
    }

    #[test]
    fn test_checksum_flip_rejected_then_resync() {
        let mut corrupt = ping(1);
        let index = corrupt.len() - 4;
        corrupt[index] = if corrupt[index] == b'0' { b'1' } else { b'0' };

        let mut parser = FrameParser::new();
        parser.feed(&corrupt);
        parser.feed(&ping(2));

        assert!(matches!(
            parser.poll(none),
            Some(Decoded::Rejected(StickError::ChecksumMismatch { .. }))
        ));
        assert_eq!(expect_frame(&mut parser).seq, SequenceId::new(2));
    }

    #[test]
    fn test_garbage_and_noise_discarded() {
        let mut parser = FrameParser::new();
        parser.feed(b"garbage");
        assert!(parser.poll(none).is_none());
        assert_eq!(parser.buffered(), 0);

        parser.feed(&stick_ack(7));
        parser.feed(&[TRAILING_NOISE]);
        parser.feed(&stick_ack(8));
        assert_eq!(expect_frame(&mut parser).seq, SequenceId::new(7));
        assert_eq!(expect_frame(&mut parser).seq, SequenceId::new(8));

        parser.feed(&[TRAILING_NOISE]);
        assert!(parser.poll(none).is_none());
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_partial_header_kept() {
        let frame = stick_ack(9);
        let mut parser = FrameParser::new();
        parser.feed(b"xx");
        parser.feed(&frame[..2]);
        assert!(parser.poll(none).is_none());
        assert_eq!(parser.buffered(), 2);
        parser.feed(&frame[2..]);
        assert_eq!(expect_frame(&mut parser).seq, SequenceId::new(9));
    }

    #[test]
    fn test_reserved_sequence_kind() {
        let awake = Response::new(
            SequenceId::AWAKE,
            Some(mac()),
            ResponseBody::Awake(AwakeReason::Button),
        );
        let mut parser = FrameParser::new();
        parser.feed(&awake.encode().unwrap());
        assert_eq!(expect_frame(&mut parser), awake);
    }

    #[test]
    fn test_unknown_id_uses_expected_kind() {
        let mut frame = ping(0x20);
        // Rewrite the id and fix the checksum as a newer firmware would send it
        frame[4..8].copy_from_slice(b"00FF");
        let body = frame[4..frame.len() - 6].to_vec();
        let resealed = crate::frame::seal(&body);

        let mut parser = FrameParser::new();
        parser.feed(&resealed);
        assert!(matches!(
            parser.poll(none),
            Some(Decoded::Rejected(StickError::UnknownMessage(_)))
        ));

        parser.clear();
        parser.feed(&resealed);
        let expected =
            |seq: SequenceId| (seq == SequenceId::new(0x20)).then_some(ResponseKind::Ping);
        assert!(matches!(parser.poll(expected), Some(Decoded::Frame(_))));
    }
}
