use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use reef_proto::{ColoniesEndpoint, NeverPhantom, PhantomPolicy, UserAgentPolicy};

use crate::bridge::BridgeSettings;
use crate::cli::ServeArgs;

/// Secret handed to consoles verbatim. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Immutable relay configuration shared by every session.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub upstream_url: String,
    pub ws_path: String,
    pub keepalive: Duration,
    pub phantom_delay: Duration,
    pub connect_timeout: Duration,
    pub colonies: ColoniesEndpoint,
    pub colony_name: String,
    pub colony_prv_key: Option<Credential>,
    pub executor_prv_key: Option<Credential>,
    pub phantom_policy: Arc<dyn PhantomPolicy>,
    pub metrics_enabled: bool,
}

impl RelayConfig {
    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            keepalive: self.keepalive,
            phantom_delay: self.phantom_delay,
        }
    }
}

impl TryFrom<ServeArgs> for RelayConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", args.listen_addr))?;

        if !(args.upstream_url.starts_with("ws://") || args.upstream_url.starts_with("wss://")) {
            bail!("upstream url must use ws:// or wss://: {}", args.upstream_url);
        }
        if !args.ws_path.starts_with('/') || args.ws_path.len() < 2 {
            bail!("websocket path must start with '/' and name a route: {}", args.ws_path);
        }
        if args.connect_timeout_secs == 0 {
            bail!("upstream connect timeout must be positive");
        }

        let phantom_delay = Duration::from_millis(args.phantom_delay_ms);
        let phantom_policy: Arc<dyn PhantomPolicy> = if phantom_delay.is_zero() {
            Arc::new(NeverPhantom)
        } else if args.phantom_agents.is_empty() {
            Arc::new(UserAgentPolicy::safari())
        } else {
            Arc::new(UserAgentPolicy::new(args.phantom_agents, Vec::new()))
        };

        Ok(RelayConfig {
            listen_addr,
            upstream_url: args.upstream_url,
            ws_path: args.ws_path,
            keepalive: Duration::from_secs(args.keepalive_secs),
            phantom_delay,
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            colonies: ColoniesEndpoint {
                host: args.colonies_host,
                port: args.colonies_port,
                tls: args.colonies_tls,
            },
            colony_name: args.colony_name,
            colony_prv_key: args.colony_prv_key.map(Credential::new),
            executor_prv_key: args.executor_prv_key.map(Credential::new),
            phantom_policy,
            metrics_enabled: !args.disable_metrics,
        })
    }
}
