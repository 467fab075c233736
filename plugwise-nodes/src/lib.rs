//! Nodes of a Plugwise mesh
//!
//! Discovery, availability tracking and the per-device behaviour of relay plugs,
//! the coordinator, battery powered sensors and switches. Every type here is a
//! synchronous state machine; the stick facade executes the requests they return.

pub mod capability;
pub mod circle;
pub mod circle_plus;
pub mod directory;
pub mod error;
pub mod event;
pub mod node;
pub mod outbound;
pub mod scan;
pub mod sed;
pub mod sense;
pub mod switch;

pub use capability::{Meterable, Power, Reading, Sensing, Switchable};
pub use circle::{Meter, Relay, clock_drift};
pub use circle_plus::Coordinator;
pub use directory::NodeDirectory;
pub use error::{StickError, StickResult};
pub use event::{NodeEvent, Setting};
pub use node::{Node, NodeState, PingStats};
pub use outbound::{Actions, Outbound};
pub use scan::{Motion, ScanConfig, Sensitivity};
pub use sed::{SleepConfig, SleepQueue};
pub use sense::{Climate, humidity_from_raw, temperature_from_raw};
pub use switch::ButtonSwitch;
