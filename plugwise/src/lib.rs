//! Client for the Plugwise USB stick and the mesh of nodes behind it
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `plugwise-core`: MAC addresses, node types, field codecs, errors and constants
//! - `plugwise-transport`: Serial and TCP links to the stick
//! - `plugwise-protocol`: Frame codec and the request/response catalog
//! - `plugwise-session`: Request queueing, correlation, retries and probes
//! - `plugwise-energy`: Pulse calibration, log buffers and energy counters
//! - `plugwise-nodes`: Node discovery, availability and device behaviour
//!
//! # Usage
//!
//! ```no_run
//! use plugwise::{NodeEvent, StickBuilder};
//!
//! # async fn run() -> plugwise::StickResult<()> {
//! let stick = StickBuilder::new().port("/dev/ttyUSB0").connect().await?;
//! let mut events = stick.events();
//! stick.initialize().await?;
//! for (mac, _) in stick.scan().await? {
//!     stick.discover(mac).await?;
//! }
//! while let Ok(event) = events.recv().await {
//!     if let NodeEvent::PowerChanged { mac, last_second, .. } = event {
//!         println!("{} uses {:.1} W", mac, last_second);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod error;
pub mod settings;
pub mod stick;

pub use builder::StickBuilder;
pub use error::{StickError, StickResult};
pub use settings::StickSettings;
pub use stick::{Stick, StickInfo};

pub use plugwise_core as core;
pub use plugwise_energy as energy;
pub use plugwise_nodes as nodes;
pub use plugwise_protocol as protocol;
pub use plugwise_session as session;
pub use plugwise_transport as transport;

pub use plugwise_core::{MacAddress, NodeType};
pub use plugwise_energy::CounterKind;
pub use plugwise_nodes::{
    Node, NodeEvent, NodeState, Reading, ScanConfig, Sensitivity, Setting, SleepConfig,
};
pub use plugwise_session::Priority;
