//! Client-side link to the reconciliation engine's event stream.
//!
//! The link knows nothing about consoles and never retries; a failed or lost
//! link is reported to the owning bridge, which tears the session down.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::bridge::{Endpoint, Frame};
use crate::error::{ConnectError, Side, TransportError};

/// Opens upstream links to a single address fixed at construction.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    type Link: Endpoint + 'static;

    async fn open(&self) -> Result<Self::Link, ConnectError>;

    fn address(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct WsConnector {
    address: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl UpstreamConnector for WsConnector {
    type Link = UpstreamLink;

    async fn open(&self) -> Result<UpstreamLink, ConnectError> {
        UpstreamLink::open(&self.address, self.connect_timeout).await
    }

    fn address(&self) -> &str {
        &self.address
    }
}

pub struct UpstreamLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    address: String,
    open: bool,
}

impl UpstreamLink {
    pub async fn open(address: &str, connect_timeout: Duration) -> Result<Self, ConnectError> {
        let (stream, response) = match timeout(connect_timeout, connect_async(address)).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(source)) => {
                return Err(ConnectError::Failed {
                    address: address.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(ConnectError::TimedOut {
                    address: address.to_string(),
                    timeout: connect_timeout,
                })
            }
        };
        debug!(address, status = %response.status(), "upstream link open");
        Ok(Self {
            stream,
            address: address.to_string(),
            open: true,
        })
    }
}

#[async_trait]
impl Endpoint for UpstreamLink {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        if !self.open {
            return None;
        }
        loop {
            match self.stream.next().await {
                Some(Ok(message)) => {
                    let Some(frame) = Frame::from_upstream(message) else {
                        continue;
                    };
                    if frame == Frame::Close {
                        self.open = false;
                    }
                    return Some(Ok(frame));
                }
                Some(Err(err)) => {
                    self.open = false;
                    return Some(Err(TransportError::Upstream(err)));
                }
                None => {
                    self.open = false;
                    return None;
                }
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed(Side::Upstream));
        }
        self.stream
            .send(frame.into_upstream())
            .await
            .map_err(TransportError::Upstream)
    }

    async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(err) = self.stream.close(None).await {
            debug!(address = %self.address, error = %err, "upstream close handshake failed");
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
