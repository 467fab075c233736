//! Transport layer trait

use crate::error::StickResult;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Duplex byte stream handed from a transport to the connection workers
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

/// Physical link to the stick
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportLayer: Send + Sync {
    /// Open the physical layer connection
    async fn open(&mut self) -> StickResult<()>;

    /// Hand the opened stream over to the caller
    ///
    /// # Returns
    ///
    /// The stream, or `StickError::Closed` if the transport is not open or the
    /// stream was already taken
    fn take_stream(&mut self) -> StickResult<Box<dyn ByteStream>>;

    /// Check if the transport is closed
    fn is_closed(&self) -> bool;

    /// Close the transport
    async fn close(&mut self) -> StickResult<()>;
}
