//! Core types and utilities for the Plugwise stick protocol
//!
//! This crate provides the error type, device addresses, protocol constants,
//! node type codes and the positional field types shared by all layers.

pub mod constants;
pub mod datatypes;
pub mod error;
pub mod mac;
pub mod node_type;

pub use datatypes::{FieldReader, FieldType, FieldValue};
pub use error::{StickError, StickResult};
pub use mac::MacAddress;
pub use node_type::{hardware_model, NodeType};
