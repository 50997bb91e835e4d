//! `controller-link`: command protocol, connection management and firmware
//! updates for TNGL lighting controllers.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  Command / Reply   ┌─────────────────┐
//!  │  Controller  │───────────────────▶│ CommandProtocol │  ids, pending table
//!  │  (state,     │                    └────────┬────────┘
//!  │   cache,     │  OtaSession                 │ frames
//!  │   supervisor)│────────────────────────────▶│
//!  └──────┬───────┘                    ┌────────▼────────┐
//!         │ events                     │    Transport    │  BLE, serial, sim
//!         └◀───────────────────────────└─────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`flags`]           — wire opcodes
//! - [`frame`]           — request/response framing and validation
//! - [`controller_info`] — controller-info payload layout
//! - [`command`]         — command schema table, requests and replies
//! - [`protocol`]        — correlation ids and the pending-request table
//! - [`transport`]       — the transport contract
//! - [`criteria`]        — controller selection predicates
//! - [`state`]           — connection state and link events
//! - [`connection`]      — the [`Controller`] client and its connect sequence
//! - [`supervisor`]      — periodic reconnection
//! - [`ota`]             — firmware update session
//! - [`cache`]           — local subsystem copies and fingerprints
//! - [`clock`]           — shared clock and local timeline
//! - [`config`]          — link configuration and context
//! - [`simulator`]       — in-process controllers behind a simulated transport

pub mod cache;
pub mod clock;
pub mod command;
pub mod config;
pub mod connection;
pub mod controller_info;
pub mod criteria;
pub mod error;
pub mod flags;
pub mod frame;
pub mod ota;
pub mod protocol;
pub mod simulator;
pub mod state;
pub mod supervisor;
pub mod transport;

pub use command::{Command, CommandKind, Reply, TimelineState};
pub use config::{ConnectOptions, LinkConfig, LinkContext};
pub use connection::Controller;
pub use controller_info::ControllerInfo;
pub use criteria::{ControllerAdvert, ControllerCriteria, Criteria};
pub use error::LinkError;
pub use ota::{OtaOptions, OtaState};
pub use state::{ConnectionState, LinkEvent};
pub use transport::{Transport, TransportEvent};
