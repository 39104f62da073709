//! Console side of Reef.
//!
//! [`reconnect::ReconnectController`] keeps exactly one logical connection to
//! the relay alive, [`model::ReconciliationModel`] folds relayed messages into
//! a desired/actual view with an activity history, and [`driver::Console`]
//! wires both to a WebSocket transport and a presenter channel.

pub mod activity;
pub mod driver;
pub mod error;
pub mod model;
pub mod reconnect;

pub use activity::{ActivityEntry, ActivityLog, Severity, ACTIVITY_CAPACITY};
pub use driver::{
    fetch_blueprints, fetch_bootstrap, Console, ConsoleControl, ConsoleSettings, ConsoleUpdate,
};
pub use error::ConsoleError;
pub use model::{LinkNotice, ModelChange, ReconciliationModel};
pub use reconnect::{
    Attempt, LinkCommand, LinkEvent, LinkState, ReconnectController, ReconnectSettings,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_RETRY_DELAY,
};
