use async_trait::async_trait;
use axum::extract::ws::WebSocket;
use tracing::debug;

use super::frame::Frame;
use crate::error::{Side, TransportError};

/// One end of a bridged session.
#[async_trait]
pub trait Endpoint: Send {
    /// Next frame from the peer; `None` once the connection is gone.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Closes the connection. Calling it again is a no-op.
    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// The console's connection, as accepted by the axum WebSocket upgrade.
pub struct DownstreamSocket {
    socket: WebSocket,
    open: bool,
}

impl DownstreamSocket {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket, open: true }
    }
}

#[async_trait]
impl Endpoint for DownstreamSocket {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        if !self.open {
            return None;
        }
        match self.socket.recv().await {
            Some(Ok(message)) => {
                let frame = Frame::from_downstream(message);
                if frame == Frame::Close {
                    self.open = false;
                }
                Some(Ok(frame))
            }
            Some(Err(err)) => {
                self.open = false;
                Some(Err(TransportError::Downstream(err)))
            }
            None => {
                self.open = false;
                None
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed(Side::Downstream));
        }
        self.socket
            .send(frame.into_downstream())
            .await
            .map_err(TransportError::Downstream)
    }

    async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(err) = self.socket.send(Frame::Close.into_downstream()).await {
            debug!(error = %err, "downstream close handshake failed");
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
