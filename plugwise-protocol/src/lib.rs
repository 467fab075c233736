//! Wire protocol of the Plugwise USB stick
//!
//! Frames are ASCII: a fixed header, a four digit message id, positional fields,
//! a CRC-16 rendered as four hex digits and a CR/LF footer.

pub mod crc;
pub mod error;
pub mod frame;
pub mod messages;
pub mod parser;
pub mod sequence;

pub use error::{StickError, StickResult};
pub use messages::{
    AwakeReason, LogSlot, NodeAckCode, NodeInfoData, NodeResponseCode, Request, RequestKind,
    Response,
    ResponseBody, ResponseKind, StickAck,
};
pub use parser::{Decoded, FrameParser};
pub use sequence::SequenceId;
