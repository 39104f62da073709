use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use reef_proto::{Blueprint, ConsoleBootstrap};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::ConsoleError;
use crate::model::{LinkNotice, ModelChange, ReconciliationModel};
use crate::reconnect::{
    Attempt, LinkCommand, LinkEvent, LinkState, ReconnectController, ReconnectSettings,
};

#[derive(Debug, Clone)]
pub struct ConsoleSettings {
    /// Relay WebSocket endpoint, usually `reconcilerWsUrl` from the bootstrap.
    pub ws_url: String,
    /// Platform listing used to seed the table before the stream delivers.
    pub snapshot_url: Option<String>,
    pub device_kind: String,
    pub reconnect: ReconnectSettings,
}

/// What the console reports to its presenter.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleUpdate {
    Link(LinkState),
    Model(ModelChange),
    /// All state was discarded; the presenter should clear its view.
    Reloaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleControl {
    Resume,
    Shutdown,
}

enum Internal {
    Link(LinkEvent),
    Frame(Attempt, String),
    Snapshot(Vec<Blueprint>),
}

struct TransportHandle {
    attempt: Attempt,
    close: Option<oneshot::Sender<()>>,
}

impl TransportHandle {
    fn close(mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
        debug!(attempt = self.attempt.0, "transport close requested");
    }
}

/// Drives the reconnect controller and reconciliation model from one task.
pub struct Console {
    settings: ConsoleSettings,
    controller: ReconnectController,
    model: ReconciliationModel,
    http: reqwest::Client,
    events_tx: mpsc::UnboundedSender<Internal>,
    events_rx: mpsc::UnboundedReceiver<Internal>,
    updates: mpsc::UnboundedSender<ConsoleUpdate>,
    transport: Option<TransportHandle>,
    watchdog: Option<JoinHandle<()>>,
}

impl Console {
    pub fn new(settings: ConsoleSettings, updates: mpsc::UnboundedSender<ConsoleUpdate>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let controller = ReconnectController::new(settings.reconnect.clone());
        Self {
            settings,
            controller,
            model: ReconciliationModel::new(),
            http: reqwest::Client::new(),
            events_tx,
            events_rx,
            updates,
            transport: None,
            watchdog: None,
        }
    }

    /// Runs until `Shutdown` is received or the control channel closes, then
    /// hands back the final model.
    pub async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<ConsoleControl>,
    ) -> ReconciliationModel {
        info!(url = %self.settings.ws_url, "console starting");
        self.fetch_snapshot();
        self.dispatch(LinkEvent::ConnectRequested);

        loop {
            let step = tokio::select! {
                event = self.events_rx.recv() => Step::Internal(event),
                command = control.recv() => Step::Control(command),
            };
            match step {
                Step::Internal(Some(event)) => self.on_internal(event),
                Step::Internal(None) => break,
                Step::Control(Some(ConsoleControl::Resume)) => self.dispatch(LinkEvent::Resumed),
                Step::Control(Some(ConsoleControl::Shutdown)) | Step::Control(None) => break,
            }
        }

        self.stop();
        info!("console stopped");
        self.model
    }

    fn on_internal(&mut self, event: Internal) {
        match event {
            Internal::Link(event) => self.dispatch(event),
            Internal::Frame(attempt, text) => {
                if attempt != self.controller.attempt()
                    || self.controller.state() != LinkState::Open
                {
                    debug!(attempt = attempt.0, "dropping frame from a retired transport");
                    return;
                }
                match self.model.apply_frame(&text, Utc::now()) {
                    Ok(changes) => self.publish(changes),
                    Err(err) => warn!(error = %err, "ignoring relayed frame"),
                }
            }
            Internal::Snapshot(blueprints) => {
                let changes =
                    self.model
                        .apply_snapshot(&blueprints, &self.settings.device_kind, Utc::now());
                self.publish(changes);
            }
        }
    }

    fn dispatch(&mut self, event: LinkEvent) {
        let before = self.controller.state();
        let commands = self.controller.handle(event);
        let after = self.controller.state();

        if before != after {
            let notice = match (before, after) {
                (_, LinkState::Open) => Some(LinkNotice::Connected),
                (LinkState::Open, LinkState::Closed) => Some(LinkNotice::Disconnected {
                    retry_in: self.controller.retry_delay(),
                }),
                _ => None,
            };
            let _ = self.updates.send(ConsoleUpdate::Link(after));
            if let Some(notice) = notice {
                let change = self.model.note_link(notice, Utc::now());
                let _ = self.updates.send(ConsoleUpdate::Model(change));
            }
        }

        for command in commands {
            self.execute(command);
        }
    }

    fn execute(&mut self, command: LinkCommand) {
        match command {
            LinkCommand::OpenTransport(attempt) => {
                if let Some(stale) = self.transport.take() {
                    stale.close();
                }
                let (close_tx, close_rx) = oneshot::channel();
                tokio::spawn(run_transport(
                    attempt,
                    self.settings.ws_url.clone(),
                    self.events_tx.clone(),
                    close_rx,
                ));
                self.transport = Some(TransportHandle {
                    attempt,
                    close: Some(close_tx),
                });
            }
            LinkCommand::ArmWatchdog(attempt, after) => {
                self.cancel_watchdog();
                let events = self.events_tx.clone();
                self.watchdog = Some(tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = events.send(Internal::Link(LinkEvent::WatchdogFired(attempt)));
                }));
            }
            LinkCommand::CancelWatchdog => self.cancel_watchdog(),
            LinkCommand::CloseTransport => {
                if let Some(transport) = self.transport.take() {
                    transport.close();
                }
            }
            LinkCommand::ScheduleRetry(after) => {
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = events.send(Internal::Link(LinkEvent::RetryElapsed));
                });
            }
            LinkCommand::Reload => {
                info!("reloading console state");
                self.model = ReconciliationModel::new();
                let _ = self.updates.send(ConsoleUpdate::Reloaded);
                self.fetch_snapshot();
                self.dispatch(LinkEvent::ConnectRequested);
            }
        }
    }

    fn publish(&self, changes: Vec<ModelChange>) {
        for change in changes {
            let _ = self.updates.send(ConsoleUpdate::Model(change));
        }
    }

    fn fetch_snapshot(&self) {
        let Some(url) = self.settings.snapshot_url.clone() else {
            return;
        };
        let http = self.http.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            match fetch_blueprints(&http, &url).await {
                Ok(blueprints) => {
                    debug!(count = blueprints.len(), "device snapshot fetched");
                    let _ = events.send(Internal::Snapshot(blueprints));
                }
                Err(err) => warn!(error = %err, url = %url, "device snapshot unavailable"),
            }
        });
    }

    fn cancel_watchdog(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
    }

    fn stop(&mut self) {
        self.cancel_watchdog();
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }
}

enum Step {
    Internal(Option<Internal>),
    Control(Option<ConsoleControl>),
}

async fn run_transport(
    attempt: Attempt,
    url: String,
    events: mpsc::UnboundedSender<Internal>,
    mut close: oneshot::Receiver<()>,
) {
    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        _ = &mut close => return,
    };
    let stream = match connected {
        Ok((stream, _)) => stream,
        Err(err) => {
            debug!(attempt = attempt.0, error = %err, "relay connect failed");
            let _ = events.send(Internal::Link(LinkEvent::Errored(attempt)));
            return;
        }
    };
    let _ = events.send(Internal::Link(LinkEvent::Opened(attempt)));

    let (mut sink, mut source) = stream.split();
    let outcome = loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(Internal::Frame(attempt, text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        let _ = events.send(Internal::Frame(attempt, text));
                    }
                    Err(_) => warn!(attempt = attempt.0, "dropping non UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.as_str().to_owned());
                    debug!(attempt = attempt.0, reason = ?reason, "relay closed connection");
                    break LinkEvent::Closed(attempt);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(attempt = attempt.0, error = %err, "relay connection error");
                    break LinkEvent::Errored(attempt);
                }
                None => break LinkEvent::Closed(attempt),
            },
            _ = &mut close => {
                let _ = sink.send(Message::Close(None)).await;
                break LinkEvent::Closed(attempt);
            }
        }
    };
    let _ = events.send(Internal::Link(outcome));
}

pub async fn fetch_blueprints(
    http: &reqwest::Client,
    url: &str,
) -> Result<Vec<Blueprint>, ConsoleError> {
    let response = http.get(url).send().await?.error_for_status()?;
    Ok(response.json().await?)
}

/// Reads the relay's bootstrap document from `{base_url}/api/config`.
pub async fn fetch_bootstrap(
    http: &reqwest::Client,
    base_url: &str,
) -> Result<ConsoleBootstrap, ConsoleError> {
    let base = base_url.trim_end_matches('/');
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(ConsoleError::InvalidUrl(base_url.to_string()));
    }
    let response = http
        .get(format!("{base}/api/config"))
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use reef_proto::{ClientIdentity, NeverPhantom, SyncStatus, UserAgentPolicy};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;

    fn settings(ws_url: String) -> ConsoleSettings {
        ConsoleSettings {
            ws_url,
            snapshot_url: None,
            device_kind: "Device".into(),
            reconnect: ReconnectSettings {
                connect_timeout: Duration::from_millis(1_500),
                retry_delay: Duration::from_millis(50),
                identity: ClientIdentity::new("reef-tests"),
                phantom_policy: Arc::new(NeverPhantom),
            },
        }
    }

    async fn next_matching<F>(rx: &mut mpsc::UnboundedReceiver<ConsoleUpdate>, mut pred: F)
    where
        F: FnMut(&ConsoleUpdate) -> bool,
    {
        while let Some(update) = rx.recv().await {
            if pred(&update) {
                return;
            }
        }
        panic!("update stream ended");
    }

    #[test_timeout::tokio_timeout_test(20)]
    async fn reconnects_after_relay_drops_and_reapplies_init() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            for version in ["1.0", "2.0"] {
                let (tcp, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(tcp).await.unwrap();
                let init = format!(
                    r#"{{"type":"init","devices":{{"d1":{{"spec":{{"appVersion":"2.0"}},"status":{{"appVersion":"{version}"}}}}}}}}"#
                );
                ws.send(Message::Text(init.into())).await.unwrap();
                ws.close(None).await.unwrap();
            }
        });

        let (updates_tx, mut updates) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let console = Console::new(settings(format!("ws://{addr}")), updates_tx);
        let running = tokio::spawn(console.run(control_rx));

        next_matching(&mut updates, |u| {
            matches!(
                u,
                ConsoleUpdate::Model(ModelChange::Updated { sync: SyncStatus::Pending, .. })
            )
        })
        .await;
        next_matching(&mut updates, |u| *u == ConsoleUpdate::Link(LinkState::Closed)).await;
        next_matching(&mut updates, |u| *u == ConsoleUpdate::Link(LinkState::Open)).await;
        next_matching(&mut updates, |u| {
            matches!(
                u,
                ConsoleUpdate::Model(ModelChange::Updated { sync: SyncStatus::Synced, .. })
            )
        })
        .await;

        control_tx.send(ConsoleControl::Shutdown).unwrap();
        let model = running.await.unwrap();
        assert_eq!(model.sync_status("d1"), SyncStatus::Synced);
        assert!(model
            .activity()
            .iter()
            .any(|entry| entry.message.contains("Disconnected")));
        server.await.unwrap();
    }

    #[test_timeout::tokio_timeout_test(20)]
    async fn keeps_retrying_while_relay_is_down() {
        // reserve a port, then free it so connects are refused
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (updates_tx, mut updates) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let console = Console::new(settings(format!("ws://{addr}")), updates_tx);
        let running = tokio::spawn(console.run(control_rx));

        let mut attempts = 0;
        while attempts < 3 {
            if let Some(ConsoleUpdate::Link(LinkState::Connecting)) = updates.recv().await {
                attempts += 1;
            }
        }

        control_tx.send(ConsoleControl::Shutdown).unwrap();
        let model = running.await.unwrap();
        assert_eq!(model.devices().count(), 0);
    }

    /// Accepts TCP connections and holds them without ever answering the
    /// WebSocket handshake. Reports each accept on the returned channel.
    async fn silent_relay() -> (String, mpsc::UnboundedReceiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut held: Vec<TcpStream> = Vec::new();
            while let Ok((tcp, _)) = listener.accept().await {
                held.push(tcp);
                let _ = tx.send(());
            }
        });
        (format!("ws://{addr}"), rx)
    }

    /// Answers every request with `body` as JSON.
    async fn json_server(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut tcp, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match tcp.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&chunk[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = tcp.write_all(response.as_bytes()).await;
                let _ = tcp.shutdown().await;
            }
        });
        format!("http://{addr}/blueprints")
    }

    #[test_timeout::tokio_timeout_test(20)]
    async fn phantom_client_reloads_when_the_handshake_stalls() {
        let (ws_url, mut accepts) = silent_relay().await;
        let mut settings = settings(ws_url);
        settings.reconnect.connect_timeout = Duration::from_millis(200);
        settings.reconnect.identity = ClientIdentity::new(
            "Mozilla/5.0 (Macintosh) AppleWebKit/605.1.15 Version/17.4 Safari/605.1.15",
        );
        settings.reconnect.phantom_policy = Arc::new(UserAgentPolicy::safari());

        let (updates_tx, mut updates) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let running = tokio::spawn(Console::new(settings, updates_tx).run(control_rx));

        accepts.recv().await.unwrap();
        next_matching(&mut updates, |u| *u == ConsoleUpdate::Reloaded).await;
        assert_eq!(
            updates.recv().await,
            Some(ConsoleUpdate::Link(LinkState::Connecting))
        );
        accepts.recv().await.unwrap();

        control_tx.send(ConsoleControl::Shutdown).unwrap();
        let model = running.await.unwrap();
        assert_eq!(model.devices().count(), 0);
    }

    #[test_timeout::tokio_timeout_test(20)]
    async fn resume_reconnects_without_waiting_for_the_retry_delay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (links_tx, mut links) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(tcp).await {
                    let _ = links_tx.send(ws);
                }
            }
        });

        let mut settings = settings(format!("ws://{addr}"));
        settings.reconnect.retry_delay = Duration::from_secs(60);
        let (updates_tx, mut updates) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let running = tokio::spawn(Console::new(settings, updates_tx).run(control_rx));

        let _first = links.recv().await.unwrap();
        next_matching(&mut updates, |u| *u == ConsoleUpdate::Link(LinkState::Open)).await;

        control_tx.send(ConsoleControl::Resume).unwrap();
        let _second = timeout(Duration::from_secs(2), links.recv())
            .await
            .expect("resume should reconnect immediately")
            .unwrap();
        next_matching(&mut updates, |u| *u == ConsoleUpdate::Link(LinkState::Open)).await;

        control_tx.send(ConsoleControl::Shutdown).unwrap();
        running.await.unwrap();
    }

    #[test_timeout::tokio_timeout_test(20)]
    async fn snapshot_seeds_the_table_before_the_stream_arrives() {
        let snapshot_url = json_server(
            r#"[{"kind":"Device","metadata":{"name":"d1"},"spec":{"appVersion":"2.0"},"status":{"appVersion":"1.0"}},{"kind":"Gateway","metadata":{"name":"gw"},"spec":{}}]"#,
        )
        .await;
        let (ws_url, _accepts) = silent_relay().await;
        let mut settings = settings(ws_url);
        settings.snapshot_url = Some(snapshot_url);
        settings.reconnect.connect_timeout = Duration::from_secs(10);

        let (updates_tx, mut updates) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let running = tokio::spawn(Console::new(settings, updates_tx).run(control_rx));

        next_matching(&mut updates, |u| {
            matches!(
                u,
                ConsoleUpdate::Model(ModelChange::Updated { device, sync: SyncStatus::Pending, .. })
                    if device == "d1"
            )
        })
        .await;

        control_tx.send(ConsoleControl::Shutdown).unwrap();
        let model = running.await.unwrap();
        assert_eq!(model.sync_status("d1"), SyncStatus::Pending);
        assert_eq!(model.devices().count(), 1);
    }

    #[test_timeout::timeout]
    fn bootstrap_requires_http_base() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = runtime
            .block_on(fetch_bootstrap(&reqwest::Client::new(), "ws://relay:8080"))
            .unwrap_err();
        assert!(matches!(err, ConsoleError::InvalidUrl(_)));
    }
}
