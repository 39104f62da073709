//! Reef relay: bridges each operator console's WebSocket to its own link on
//! the reconciliation engine's event stream, and serves the console bootstrap.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod routes;
pub mod telemetry;
pub mod upstream;
pub mod watch;

pub use bridge::{Bridge, BridgeSettings, SessionReport};
pub use config::{Credential, RelayConfig};
pub use error::{BridgeError, ConnectError, Side, TransportError};
pub use routes::{router, serve, serve_on, AppState};
pub use upstream::{UpstreamConnector, UpstreamLink, WsConnector};
