//! `reef-relay watch`: the console state machine with a terminal presenter.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reef_console::{
    fetch_bootstrap, Console, ConsoleControl, ConsoleSettings, ConsoleUpdate, LinkState,
    ModelChange, ReconnectSettings,
};
use reef_proto::{ClientIdentity, UserAgentPolicy};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::WatchArgs;

pub async fn run_watch(args: WatchArgs) -> Result<()> {
    let ws_url = match args.ws_url.clone() {
        Some(url) => url,
        None => {
            let http = reqwest::Client::new();
            let bootstrap = fetch_bootstrap(&http, &args.relay_url)
                .await
                .with_context(|| format!("failed to load bootstrap from {}", args.relay_url))?;
            info!(
                colony = %bootstrap.colony_name,
                ws_url = %bootstrap.reconciler_ws_url,
                "bootstrap loaded"
            );
            bootstrap.reconciler_ws_url
        }
    };

    let settings = console_settings(&args, ws_url);
    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let console = tokio::spawn(Console::new(settings, updates_tx).run(control_rx));
    forward_signals(control_tx);

    while let Some(update) = updates_rx.recv().await {
        if let Some(line) = render_update(&update) {
            println!("{line}");
        }
    }

    let model = console.await.context("console task failed")?;
    for (device, pair) in model.devices() {
        println!(
            "{device}: desired {} actual {} ({})",
            pair.desired_version().unwrap_or("-"),
            pair.actual_version().unwrap_or("-"),
            pair.sync_status()
        );
    }
    Ok(())
}

fn console_settings(args: &WatchArgs, ws_url: String) -> ConsoleSettings {
    ConsoleSettings {
        ws_url,
        snapshot_url: args.snapshot_url.clone(),
        device_kind: args.device_kind.clone(),
        reconnect: ReconnectSettings {
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            retry_delay: Duration::from_millis(args.retry_delay_ms),
            identity: ClientIdentity::from_header(args.identity.as_deref()),
            phantom_policy: Arc::new(UserAgentPolicy::safari()),
        },
    }
}

/// ctrl-c stops the console; SIGUSR1 asks it to reconnect right away.
fn forward_signals(control: mpsc::UnboundedSender<ConsoleControl>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let resume = control.clone();
        match signal(SignalKind::user_defined1()) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    while stream.recv().await.is_some() {
                        if resume.send(ConsoleControl::Resume).is_err() {
                            break;
                        }
                    }
                });
            }
            Err(err) => warn!(error = %err, "resume signal unavailable"),
        }
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = control.send(ConsoleControl::Shutdown);
        }
    });
}

/// One terminal line per presenter update; pulses without news render nothing.
pub fn render_update(update: &ConsoleUpdate) -> Option<String> {
    match update {
        ConsoleUpdate::Link(state) => Some(format!(
            "-- link {}",
            match state {
                LinkState::Idle => "idle",
                LinkState::Connecting => "connecting",
                LinkState::Open => "open",
                LinkState::Closed => "closed",
            }
        )),
        ConsoleUpdate::Model(ModelChange::Activity(entry)) => Some(format!(
            "{} [{}] {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.severity.as_str(),
            entry.message
        )),
        ConsoleUpdate::Model(ModelChange::Removed { device }) => Some(format!("{device}: removed")),
        ConsoleUpdate::Model(ModelChange::Updated { .. }) => None,
        ConsoleUpdate::Reloaded => Some("-- reloaded".to_string()),
    }
}
