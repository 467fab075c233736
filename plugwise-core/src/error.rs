use thiserror::Error;

/// Main error type for stick protocol operations
#[derive(Error, Debug)]
pub enum StickError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout")]
    Timeout,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Length mismatch for {kind}: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        kind: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("Duplicate {kind} request for {mac}")]
    DuplicateRequest { kind: String, mac: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Stick is not initialized")]
    NotInitialized,

    #[error("Connection closed")]
    Closed,
}

impl StickError {
    /// Frame-level errors are recoverable: the parser drops the frame and keeps scanning.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            StickError::FrameInvalid(_)
                | StickError::ChecksumMismatch { .. }
                | StickError::LengthMismatch { .. }
                | StickError::UnknownMessage(_)
                | StickError::InvalidData(_)
        )
    }
}

/// Result type alias for stick protocol operations
pub type StickResult<T> = Result<T, StickError>;
