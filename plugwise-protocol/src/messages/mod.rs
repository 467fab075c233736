pub mod ack;
pub mod request;
pub mod response;

pub use ack::{AwakeReason, NodeAckCode, NodeResponseCode, StickAck};
pub use request::{Request, RequestKind};
pub use response::{LogSlot, NodeInfoData, Response, ResponseBody, ResponseKind};
