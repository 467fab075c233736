//! Error types re-exported from the core crate

pub use plugwise_core::error::{StickError, StickResult};
