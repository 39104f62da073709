//! Per-session reducer: every I/O occurrence on a bridged pair becomes a
//! [`SessionEvent`], and the reducer answers with the [`SessionAction`]s the
//! driver must perform. Once teardown starts every further event is ignored,
//! which is what makes teardown idempotent whichever side triggers it first.

use reef_proto::MessageKind;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::frame::Frame;
use crate::error::{Side, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Downstream(Frame),
    Upstream(Frame),
    DownstreamClosed,
    UpstreamClosed,
    DownstreamErrored(String),
    UpstreamErrored(String),
    KeepaliveFired,
}

impl SessionEvent {
    pub fn received(side: Side, frame: Option<Result<Frame, TransportError>>) -> Self {
        match (side, frame) {
            (Side::Downstream, None | Some(Ok(Frame::Close))) => SessionEvent::DownstreamClosed,
            (Side::Upstream, None | Some(Ok(Frame::Close))) => SessionEvent::UpstreamClosed,
            (Side::Downstream, Some(Ok(frame))) => SessionEvent::Downstream(frame),
            (Side::Upstream, Some(Ok(frame))) => SessionEvent::Upstream(frame),
            (side, Some(Err(err))) => SessionEvent::errored(side, &err),
        }
    }

    pub fn errored(side: Side, err: &TransportError) -> Self {
        match side {
            Side::Downstream => SessionEvent::DownstreamErrored(err.to_string()),
            Side::Upstream => SessionEvent::UpstreamErrored(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    Send(Side, Frame),
    Ping(Side),
    CancelKeepalive,
    Close(Side),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownCause {
    Closed(Side),
    Errored(Side, String),
}

impl TeardownCause {
    pub fn side(&self) -> Side {
        match self {
            TeardownCause::Closed(side) | TeardownCause::Errored(side, _) => *side,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayCounters {
    pub to_upstream: u64,
    pub to_downstream: u64,
    pub bytes_to_upstream: u64,
    pub bytes_to_downstream: u64,
}

#[derive(Debug)]
pub struct Session {
    id: Uuid,
    closing: Option<TeardownCause>,
    counters: RelayCounters,
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            closing: None,
            counters: RelayCounters::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closing(&self) -> bool {
        self.closing.is_some()
    }

    pub fn teardown_cause(&self) -> Option<&TeardownCause> {
        self.closing.as_ref()
    }

    pub fn counters(&self) -> &RelayCounters {
        &self.counters
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        if self.closing.is_some() {
            trace!(session_id = %self.id, ?event, "session closing, event ignored");
            return Vec::new();
        }

        match event {
            SessionEvent::Upstream(frame) => {
                if !frame.is_data() {
                    return Vec::new();
                }
                self.note_upstream_payload(&frame);
                self.counters.to_downstream += 1;
                self.counters.bytes_to_downstream += frame.payload_len() as u64;
                vec![SessionAction::Send(
                    Side::Downstream,
                    frame.into_console_frame(),
                )]
            }
            SessionEvent::Downstream(frame) => {
                if !frame.is_data() {
                    return Vec::new();
                }
                self.counters.to_upstream += 1;
                self.counters.bytes_to_upstream += frame.payload_len() as u64;
                vec![SessionAction::Send(Side::Upstream, frame)]
            }
            SessionEvent::KeepaliveFired => vec![
                SessionAction::Ping(Side::Downstream),
                SessionAction::Ping(Side::Upstream),
            ],
            SessionEvent::DownstreamClosed => {
                self.teardown(TeardownCause::Closed(Side::Downstream))
            }
            SessionEvent::UpstreamClosed => self.teardown(TeardownCause::Closed(Side::Upstream)),
            SessionEvent::DownstreamErrored(reason) => {
                self.teardown(TeardownCause::Errored(Side::Downstream, reason))
            }
            SessionEvent::UpstreamErrored(reason) => {
                self.teardown(TeardownCause::Errored(Side::Upstream, reason))
            }
        }
    }

    fn teardown(&mut self, cause: TeardownCause) -> Vec<SessionAction> {
        let survivor = cause.side().other();
        match &cause {
            TeardownCause::Closed(side) => {
                debug!(session_id = %self.id, side = %side, "endpoint closed, tearing down")
            }
            TeardownCause::Errored(side, reason) => warn!(
                session_id = %self.id,
                side = %side,
                error = %reason,
                "endpoint failed, tearing down session"
            ),
        }
        self.closing = Some(cause);
        vec![SessionAction::CancelKeepalive, SessionAction::Close(survivor)]
    }

    fn note_upstream_payload(&self, frame: &Frame) {
        let Frame::Text(text) = frame else {
            return;
        };
        match MessageKind::peek(text) {
            MessageKind::Init => debug!(session_id = %self.id, "relaying init"),
            MessageKind::Update => trace!(session_id = %self.id, "relaying update"),
            MessageKind::Other(kind) => warn!(
                session_id = %self.id,
                kind = %kind,
                "relaying message of unrecognized type"
            ),
            MessageKind::Untyped => warn!(session_id = %self.id, "relaying untyped frame"),
        }
    }
}
