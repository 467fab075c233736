//! Data types used in the stick protocol

pub mod field;

pub use field::{encode_fields, FieldReader, FieldType, FieldValue};
