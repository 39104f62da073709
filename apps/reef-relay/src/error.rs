use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Downstream,
    Upstream,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Downstream => Side::Upstream,
            Side::Upstream => Side::Downstream,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Downstream => "downstream",
            Side::Upstream => "upstream",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The reconciliation engine could not be reached while setting up a session.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connecting to {address} timed out after {timeout:?}")]
    TimedOut { address: String, timeout: Duration },
    #[error("failed to connect to {address}: {source}")]
    Failed {
        address: String,
        #[source]
        source: tungstenite::Error,
    },
}

/// I/O failure on an established endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("downstream transport failed: {0}")]
    Downstream(#[source] axum::Error),
    #[error("upstream transport failed: {0}")]
    Upstream(#[source] tungstenite::Error),
    #[error("{0} endpoint is closed")]
    Closed(Side),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// The client went away during the setup delay; no upstream was opened.
    #[error("downstream abandoned the connection before setup completed")]
    PhantomConnection,
}
