//! Connection bridge: one accepted console connection paired with exactly one
//! upstream link for its whole lifetime.

mod endpoint;
mod frame;
mod session;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, decrement_gauge, increment_gauge};
use reef_proto::{ClientIdentity, PhantomPolicy};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use endpoint::{DownstreamSocket, Endpoint};
pub use frame::Frame;
pub use session::{RelayCounters, Session, SessionAction, SessionEvent, TeardownCause};

use crate::error::{BridgeError, Side};
use crate::upstream::UpstreamConnector;

pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);
pub const DEFAULT_PHANTOM_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy)]
pub struct BridgeSettings {
    pub keepalive: Duration,
    pub phantom_delay: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            keepalive: DEFAULT_KEEPALIVE,
            phantom_delay: DEFAULT_PHANTOM_DELAY,
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub counters: RelayCounters,
    pub cause: Option<TeardownCause>,
    pub lifetime: Duration,
}

pub struct Bridge<C> {
    settings: BridgeSettings,
    connector: C,
    identity: ClientIdentity,
    policy: Arc<dyn PhantomPolicy>,
}

enum Settled {
    Ready(Vec<Frame>),
    Abandoned,
}

impl<C: UpstreamConnector> Bridge<C> {
    pub fn new(
        settings: BridgeSettings,
        connector: C,
        identity: ClientIdentity,
        policy: Arc<dyn PhantomPolicy>,
    ) -> Self {
        Self {
            settings,
            connector,
            identity,
            policy,
        }
    }

    /// Drives the session until either side goes away. Returns once both
    /// endpoints have been dealt with; nothing outlives this call.
    pub async fn run<D: Endpoint>(self, mut downstream: D) -> Result<SessionReport, BridgeError> {
        let started = Instant::now();
        let mut session = Session::new(Uuid::new_v4());
        let session_id = session.id();
        counter!("reef_relay_sessions_total", 1);

        let mut backlog = Vec::new();
        if !self.settings.phantom_delay.is_zero() && self.policy.expects_phantom(&self.identity) {
            debug!(
                session_id = %session_id,
                identity = %self.identity,
                delay_ms = self.settings.phantom_delay.as_millis() as u64,
                "holding setup for phantom-prone client"
            );
            match settle(&mut downstream, self.settings.phantom_delay).await {
                Settled::Ready(frames) => backlog = frames,
                Settled::Abandoned => {
                    counter!("reef_relay_phantom_aborts_total", 1);
                    debug!(session_id = %session_id, "client left during setup delay");
                    downstream.close().await;
                    return Err(BridgeError::PhantomConnection);
                }
            }
        }

        let mut upstream = match self.connector.open().await {
            Ok(link) => link,
            Err(err) => {
                counter!("reef_relay_upstream_connect_failures_total", 1);
                warn!(
                    session_id = %session_id,
                    error = %err,
                    "upstream unavailable, closing client"
                );
                downstream.close().await;
                return Err(err.into());
            }
        };

        info!(
            session_id = %session_id,
            identity = %self.identity,
            upstream = %self.connector.address(),
            "session established"
        );
        increment_gauge!("reef_relay_sessions_active", 1.0);

        let period = self.settings.keepalive;
        let mut keepalive = (!period.is_zero()).then(|| {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        let mut queue: VecDeque<SessionEvent> =
            backlog.into_iter().map(SessionEvent::Downstream).collect();

        loop {
            let event = match queue.pop_front() {
                Some(event) => event,
                None if session.is_closing() => break,
                None => tokio::select! {
                    frame = downstream.recv() => SessionEvent::received(Side::Downstream, frame),
                    frame = upstream.recv() => SessionEvent::received(Side::Upstream, frame),
                    _ = next_tick(&mut keepalive) => SessionEvent::KeepaliveFired,
                },
            };

            for action in session.handle(event) {
                match action {
                    SessionAction::Send(side, frame) => {
                        let result = match side {
                            Side::Downstream => downstream.send(frame).await,
                            Side::Upstream => upstream.send(frame).await,
                        };
                        match result {
                            Ok(()) => {
                                counter!(
                                    "reef_relay_frames_relayed_total",
                                    1,
                                    "direction" => side.as_str()
                                );
                            }
                            Err(err) => queue.push_back(SessionEvent::errored(side, &err)),
                        }
                    }
                    SessionAction::Ping(side) => {
                        let result = match side {
                            Side::Downstream if downstream.is_open() => {
                                downstream.send(Frame::Ping(Vec::new())).await
                            }
                            Side::Upstream if upstream.is_open() => {
                                upstream.send(Frame::Ping(Vec::new())).await
                            }
                            _ => Ok(()),
                        };
                        if let Err(err) = result {
                            queue.push_back(SessionEvent::errored(side, &err));
                        }
                    }
                    SessionAction::CancelKeepalive => keepalive = None,
                    SessionAction::Close(Side::Downstream) => downstream.close().await,
                    SessionAction::Close(Side::Upstream) => upstream.close().await,
                }
            }
        }

        decrement_gauge!("reef_relay_sessions_active", 1.0);
        let report = SessionReport {
            session_id,
            counters: session.counters().clone(),
            cause: session.teardown_cause().cloned(),
            lifetime: started.elapsed(),
        };
        info!(
            session_id = %session_id,
            to_upstream = report.counters.to_upstream,
            to_downstream = report.counters.to_downstream,
            lifetime_ms = report.lifetime.as_millis() as u64,
            "session closed"
        );
        Ok(report)
    }
}

/// Watches the client for the setup delay. Data frames are kept for replay.
async fn settle<D: Endpoint>(downstream: &mut D, delay: Duration) -> Settled {
    let deadline = sleep(delay);
    tokio::pin!(deadline);
    let mut buffered = Vec::new();
    loop {
        tokio::select! {
            _ = &mut deadline => return Settled::Ready(buffered),
            frame = downstream.recv() => match frame {
                Some(Ok(frame)) if frame.is_data() => buffered.push(frame),
                Some(Ok(Frame::Close)) | Some(Err(_)) | None => return Settled::Abandoned,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectError, TransportError};
    use async_trait::async_trait;
    use reef_proto::{NeverPhantom, UserAgentPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    const SAFARI: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 \
                          (KHTML, like Gecko) Version/17.4 Safari/605.1.15";

    struct ChannelEndpoint {
        inbox: mpsc::UnboundedReceiver<Frame>,
        outbox: mpsc::UnboundedSender<Frame>,
        closes: Arc<AtomicUsize>,
        open: bool,
    }

    struct Peer {
        to_endpoint: mpsc::UnboundedSender<Frame>,
        from_endpoint: mpsc::UnboundedReceiver<Frame>,
        closes: Arc<AtomicUsize>,
    }

    fn endpoint_pair() -> (ChannelEndpoint, Peer) {
        let (to_endpoint, inbox) = mpsc::unbounded_channel();
        let (outbox, from_endpoint) = mpsc::unbounded_channel();
        let closes = Arc::new(AtomicUsize::new(0));
        (
            ChannelEndpoint {
                inbox,
                outbox,
                closes: closes.clone(),
                open: true,
            },
            Peer {
                to_endpoint,
                from_endpoint,
                closes,
            },
        )
    }

    #[async_trait]
    impl Endpoint for ChannelEndpoint {
        async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
            if !self.open {
                return std::future::pending().await;
            }
            let frame = self.inbox.recv().await;
            if matches!(frame, None | Some(Frame::Close)) {
                self.open = false;
            }
            frame.map(Ok)
        }

        async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
            self.outbox
                .send(frame)
                .map_err(|_| TransportError::Closed(Side::Upstream))
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    struct FakeConnector {
        link: Mutex<Option<ChannelEndpoint>>,
        opens: Arc<AtomicUsize>,
    }

    impl FakeConnector {
        fn new(link: Option<ChannelEndpoint>) -> (Self, Arc<AtomicUsize>) {
            let opens = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    link: Mutex::new(link),
                    opens: opens.clone(),
                },
                opens,
            )
        }
    }

    #[async_trait]
    impl UpstreamConnector for FakeConnector {
        type Link = ChannelEndpoint;

        async fn open(&self) -> Result<ChannelEndpoint, ConnectError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let link = self.link.lock().unwrap().take();
            link.ok_or_else(|| ConnectError::TimedOut {
                address: "ws://engine.test/reconciler".into(),
                timeout: Duration::from_secs(5),
            })
        }

        fn address(&self) -> &str {
            "ws://engine.test/reconciler"
        }
    }

    fn bridge(
        connector: FakeConnector,
        identity: Option<&str>,
        policy: Arc<dyn PhantomPolicy>,
    ) -> Bridge<FakeConnector> {
        Bridge::new(
            BridgeSettings::default(),
            connector,
            ClientIdentity::from_header(identity),
            policy,
        )
    }

    #[test_timeout::tokio_timeout_test]
    async fn relays_both_directions_and_converts_utf8_binary() {
        let (client, mut console) = endpoint_pair();
        let (link, mut engine) = endpoint_pair();
        let (connector, _) = FakeConnector::new(Some(link));
        let task = tokio::spawn(bridge(connector, None, Arc::new(NeverPhantom)).run(client));

        let update = r#"{"type":"update","device":"d1","spec":{"appVersion":"2.0"}}"#;
        engine
            .to_endpoint
            .send(Frame::Binary(update.as_bytes().to_vec()))
            .unwrap();
        assert_eq!(
            console.from_endpoint.recv().await,
            Some(Frame::Text(update.into()))
        );

        console.to_endpoint.send(Frame::Text("hello".into())).unwrap();
        assert_eq!(engine.from_endpoint.recv().await, Some(Frame::Text("hello".into())));

        drop(engine.to_endpoint);
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.cause, Some(TeardownCause::Closed(Side::Upstream)));
        assert_eq!(console.closes.load(Ordering::SeqCst), 1);
        assert_eq!(engine.closes.load(Ordering::SeqCst), 0);
        assert_eq!(report.counters.to_downstream, 1);
        assert_eq!(report.counters.to_upstream, 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn console_close_closes_upstream_once() {
        let (client, console) = endpoint_pair();
        let (link, engine) = endpoint_pair();
        let (connector, opens) = FakeConnector::new(Some(link));
        let task = tokio::spawn(bridge(connector, None, Arc::new(NeverPhantom)).run(client));

        console.to_endpoint.send(Frame::Close).unwrap();
        let report = task.await.unwrap().unwrap();

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(engine.closes.load(Ordering::SeqCst), 1);
        assert_eq!(console.closes.load(Ordering::SeqCst), 0);
        assert_eq!(report.cause, Some(TeardownCause::Closed(Side::Downstream)));
    }

    #[test_timeout::tokio_timeout_test]
    async fn connect_failure_closes_the_console() {
        let (client, console) = endpoint_pair();
        let (connector, opens) = FakeConnector::new(None);

        let result = bridge(connector, None, Arc::new(NeverPhantom)).run(client).await;

        assert!(matches!(result, Err(BridgeError::Connect(ConnectError::TimedOut { .. }))));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(console.closes.load(Ordering::SeqCst), 1);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn phantom_client_leaving_during_delay_never_opens_upstream() {
        let (client, console) = endpoint_pair();
        let (link, _engine) = endpoint_pair();
        let (connector, opens) = FakeConnector::new(Some(link));

        console.to_endpoint.send(Frame::Close).unwrap();
        let result = bridge(connector, Some(SAFARI), Arc::new(UserAgentPolicy::safari()))
            .run(client)
            .await;

        assert!(matches!(result, Err(BridgeError::PhantomConnection)));
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn frames_sent_during_delay_are_forwarded_after_setup() {
        let (client, console) = endpoint_pair();
        let (link, mut engine) = endpoint_pair();
        let (connector, opens) = FakeConnector::new(Some(link));

        console.to_endpoint.send(Frame::Text("early".into())).unwrap();
        let task = tokio::spawn(
            bridge(connector, Some(SAFARI), Arc::new(UserAgentPolicy::safari())).run(client),
        );

        assert_eq!(engine.from_endpoint.recv().await, Some(Frame::Text("early".into())));
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        drop(console.to_endpoint);
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.cause, Some(TeardownCause::Closed(Side::Downstream)));
        assert_eq!(engine.closes.load(Ordering::SeqCst), 1);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn keepalive_pings_both_sides_until_teardown() {
        let (client, mut console) = endpoint_pair();
        let (link, mut engine) = endpoint_pair();
        let (connector, _) = FakeConnector::new(Some(link));
        let task = tokio::spawn(bridge(connector, None, Arc::new(NeverPhantom)).run(client));

        assert_eq!(console.from_endpoint.recv().await, Some(Frame::Ping(Vec::new())));
        assert_eq!(engine.from_endpoint.recv().await, Some(Frame::Ping(Vec::new())));

        console.to_endpoint.send(Frame::Close).unwrap();
        task.await.unwrap().unwrap();
        tokio::time::advance(DEFAULT_KEEPALIVE * 2).await;
        assert!(engine.from_endpoint.try_recv().is_err());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn keepalive_skips_a_side_that_is_no_longer_open() {
        let (client, mut console) = endpoint_pair();
        let (mut link, mut engine) = endpoint_pair();
        link.open = false;
        let (connector, _) = FakeConnector::new(Some(link));
        let task = tokio::spawn(bridge(connector, None, Arc::new(NeverPhantom)).run(client));

        assert_eq!(console.from_endpoint.recv().await, Some(Frame::Ping(Vec::new())));

        console.to_endpoint.send(Frame::Close).unwrap();
        task.await.unwrap().unwrap();
        assert!(engine.from_endpoint.try_recv().is_err());
        assert_eq!(engine.closes.load(Ordering::SeqCst), 1);
    }
}
