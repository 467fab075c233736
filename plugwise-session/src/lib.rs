//! Session layer for the Plugwise stick
//!
//! This crate queues outbound requests by priority, correlates stick acknowledges and
//! node responses by sequence id and applies the retry policy.
//!
//! - [x] Priority send queue, FIFO within a tier
//! - [x] Sequence id prediction and re-keying on the stick acknowledge
//! - [x] Retries on stick failure, stick timeout and stale responses
//! - [x] Availability probe after a dropped request
//! - [x] Duplicate request suppression
//! - [x] Session statistics

pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod pending;
pub mod queue;
pub mod settings;
pub mod statistics;

pub use controller::{Controller, PendingResponse};
pub use dispatcher::{Dispatcher, Effect, Signal};
pub use error::{StickError, StickResult};
pub use event::SessionEvent;
pub use pending::{DropReason, Exchange, Outcome, PendingRequest};
pub use queue::{Priority, SendQueue};
pub use settings::SessionSettings;
pub use statistics::SessionStatistics;
