//! Reconnection state machine for the console's single relay connection.
//!
//! The controller does no I/O. Callers feed it [`LinkEvent`]s and carry out
//! the returned [`LinkCommand`]s; every transport-originated event is tagged
//! with the attempt that produced it so late events from a replaced transport
//! are dropped.

use std::sync::Arc;
use std::time::Duration;

use reef_proto::{ClientIdentity, PhantomPolicy};
use tracing::{debug, info};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1_500);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Identifies one transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Attempt(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectRequested,
    Opened(Attempt),
    Closed(Attempt),
    Errored(Attempt),
    WatchdogFired(Attempt),
    RetryElapsed,
    /// The host came back from suspension (page made visible again, process
    /// continued after a stop).
    Resumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCommand {
    OpenTransport(Attempt),
    ArmWatchdog(Attempt, Duration),
    CancelWatchdog,
    CloseTransport,
    ScheduleRetry(Duration),
    /// Discard all console state and start over.
    Reload,
}

#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    pub connect_timeout: Duration,
    pub retry_delay: Duration,
    pub identity: ClientIdentity,
    pub phantom_policy: Arc<dyn PhantomPolicy>,
}

#[derive(Debug)]
pub struct ReconnectController {
    settings: ReconnectSettings,
    state: LinkState,
    attempt: Attempt,
    has_handle: bool,
}

impl ReconnectController {
    pub fn new(settings: ReconnectSettings) -> Self {
        Self {
            settings,
            state: LinkState::Idle,
            attempt: Attempt(0),
            has_handle: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn attempt(&self) -> Attempt {
        self.attempt
    }

    pub fn retry_delay(&self) -> Duration {
        self.settings.retry_delay
    }

    pub fn handle(&mut self, event: LinkEvent) -> Vec<LinkCommand> {
        match event {
            LinkEvent::ConnectRequested => self.connect(),
            LinkEvent::RetryElapsed => {
                if self.state == LinkState::Closed {
                    self.connect()
                } else {
                    debug!(state = ?self.state, "retry timer elapsed, nothing to do");
                    Vec::new()
                }
            }
            LinkEvent::Opened(attempt) => {
                if !self.is_current(attempt) || self.state != LinkState::Connecting {
                    return Vec::new();
                }
                self.state = LinkState::Open;
                info!(attempt = attempt.0, "relay connection open");
                vec![LinkCommand::CancelWatchdog]
            }
            LinkEvent::Closed(attempt) | LinkEvent::Errored(attempt) => {
                if !self.is_current(attempt)
                    || !matches!(self.state, LinkState::Connecting | LinkState::Open)
                {
                    return Vec::new();
                }
                let was_connecting = self.state == LinkState::Connecting;
                self.state = LinkState::Closed;
                info!(
                    attempt = attempt.0,
                    retry_in_ms = self.settings.retry_delay.as_millis() as u64,
                    "relay connection lost"
                );
                let mut commands = Vec::with_capacity(2);
                if was_connecting {
                    commands.push(LinkCommand::CancelWatchdog);
                }
                commands.push(LinkCommand::ScheduleRetry(self.settings.retry_delay));
                commands
            }
            LinkEvent::WatchdogFired(attempt) => {
                if !self.is_current(attempt) || self.state != LinkState::Connecting {
                    return Vec::new();
                }
                if self
                    .settings
                    .phantom_policy
                    .expects_phantom(&self.settings.identity)
                {
                    info!(
                        attempt = attempt.0,
                        "connect watchdog fired for phantom-prone client, reloading"
                    );
                    self.state = LinkState::Idle;
                    self.has_handle = false;
                    vec![LinkCommand::CloseTransport, LinkCommand::Reload]
                } else {
                    info!(attempt = attempt.0, "connect watchdog fired");
                    self.state = LinkState::Closed;
                    vec![
                        LinkCommand::CloseTransport,
                        LinkCommand::ScheduleRetry(self.settings.retry_delay),
                    ]
                }
            }
            LinkEvent::Resumed => {
                if !self.has_handle {
                    return Vec::new();
                }
                info!(state = ?self.state, "resumed, forcing a fresh connection");
                let mut commands = vec![LinkCommand::CloseTransport];
                if self.state == LinkState::Connecting {
                    commands.push(LinkCommand::CancelWatchdog);
                }
                self.state = LinkState::Closed;
                commands.extend(self.connect());
                commands
            }
        }
    }

    fn connect(&mut self) -> Vec<LinkCommand> {
        if matches!(self.state, LinkState::Connecting | LinkState::Open) {
            debug!(state = ?self.state, "connect refused, link already active");
            return Vec::new();
        }
        self.attempt = Attempt(self.attempt.0 + 1);
        self.state = LinkState::Connecting;
        self.has_handle = true;
        vec![
            LinkCommand::OpenTransport(self.attempt),
            LinkCommand::ArmWatchdog(self.attempt, self.settings.connect_timeout),
        ]
    }

    fn is_current(&self, attempt: Attempt) -> bool {
        attempt == self.attempt
    }
}
