use axum::extract::ws::Message as DownstreamMessage;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;

/// A WebSocket frame in a transport-neutral form, so the session reducer can
/// treat both ends alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    /// Text and binary frames carry relayed payloads; the rest is protocol.
    pub fn is_data(&self) -> bool {
        matches!(self, Frame::Text(_) | Frame::Binary(_))
    }

    pub fn payload_len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) | Frame::Ping(bytes) | Frame::Pong(bytes) => bytes.len(),
            Frame::Close => 0,
        }
    }

    /// Browsers consume relayed messages as text; binary payloads that are
    /// valid UTF-8 are re-framed as text, anything else stays binary.
    pub fn into_console_frame(self) -> Frame {
        match self {
            Frame::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Frame::Text(text),
                Err(err) => Frame::Binary(err.into_bytes()),
            },
            other => other,
        }
    }

    pub fn from_downstream(message: DownstreamMessage) -> Frame {
        match message {
            DownstreamMessage::Text(text) => Frame::Text(text),
            DownstreamMessage::Binary(bytes) => Frame::Binary(bytes),
            DownstreamMessage::Ping(bytes) => Frame::Ping(bytes),
            DownstreamMessage::Pong(bytes) => Frame::Pong(bytes),
            DownstreamMessage::Close(_) => Frame::Close,
        }
    }

    pub fn into_downstream(self) -> DownstreamMessage {
        match self {
            Frame::Text(text) => DownstreamMessage::Text(text),
            Frame::Binary(bytes) => DownstreamMessage::Binary(bytes),
            Frame::Ping(bytes) => DownstreamMessage::Ping(bytes),
            Frame::Pong(bytes) => DownstreamMessage::Pong(bytes),
            Frame::Close => DownstreamMessage::Close(None),
        }
    }

    /// Raw frames only show up on the write path, so reading one yields `None`.
    pub fn from_upstream(message: UpstreamMessage) -> Option<Frame> {
        Some(match message {
            UpstreamMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
            UpstreamMessage::Binary(bytes) => Frame::Binary(bytes.to_vec()),
            UpstreamMessage::Ping(bytes) => Frame::Ping(bytes.to_vec()),
            UpstreamMessage::Pong(bytes) => Frame::Pong(bytes.to_vec()),
            UpstreamMessage::Close(_) => Frame::Close,
            UpstreamMessage::Frame(_) => return None,
        })
    }

    pub fn into_upstream(self) -> UpstreamMessage {
        match self {
            Frame::Text(text) => UpstreamMessage::Text(text.into()),
            Frame::Binary(bytes) => UpstreamMessage::Binary(bytes.into()),
            Frame::Ping(bytes) => UpstreamMessage::Ping(bytes.into()),
            Frame::Pong(bytes) => UpstreamMessage::Pong(bytes.into()),
            Frame::Close => UpstreamMessage::Close(None),
        }
    }
}
