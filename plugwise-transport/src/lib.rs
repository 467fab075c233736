//! Transport layer module for the Plugwise stick protocol
//!
//! This crate provides the byte-duplex link to the stick over a serial port or a
//! socket, plus a `Connection` that runs the background reader and writer workers.

pub mod connection;
pub mod error;
pub mod serial;
pub mod settings;
pub mod stream;
pub mod tcp;

pub use connection::{Connection, ReadEvent};
pub use error::{StickError, StickResult};
pub use serial::{SerialSettings, SerialTransport};
pub use settings::TransportSettings;
pub use stream::{ByteStream, TransportLayer};
pub use tcp::{TcpSettings, TcpTransport};
