use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "reef-relay",
    author,
    version,
    about = "Relay between operator consoles and the reconciliation engine"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Relay settings (default behavior if no command specified)
    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Follow reconciliation progress through a running relay
    Watch(WatchArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to bind the HTTP and WebSocket listener to.
    #[arg(long, env = "REEF_RELAY_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Event stream of the reconciliation engine; one link is opened per console.
    #[arg(
        long,
        env = "REEF_RELAY_UPSTREAM_URL",
        default_value = "ws://127.0.0.1:8090/reconciler"
    )]
    pub upstream_url: String,

    /// Path consoles connect to.
    #[arg(long, env = "REEF_RELAY_WS_PATH", default_value = "/reconciler")]
    pub ws_path: String,

    /// Interval between pings on both ends of a session. 0 disables them.
    #[arg(long, env = "REEF_RELAY_KEEPALIVE_SECS", default_value_t = 15)]
    pub keepalive_secs: u64,

    /// Setup delay for clients that open throwaway connections. 0 disables it.
    #[arg(long, env = "REEF_RELAY_PHANTOM_DELAY_MS", default_value_t = 200)]
    pub phantom_delay_ms: u64,

    /// User-agent tokens that mark a phantom-prone client (defaults to Safari).
    #[arg(long = "phantom-agent", env = "REEF_RELAY_PHANTOM_AGENTS", value_delimiter = ',')]
    pub phantom_agents: Vec<String>,

    #[arg(long, env = "REEF_RELAY_CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    pub connect_timeout_secs: u64,

    #[arg(long, env = "REEF_RELAY_COLONIES_HOST", default_value = "localhost")]
    pub colonies_host: String,

    #[arg(long, env = "REEF_RELAY_COLONIES_PORT", default_value_t = 50080)]
    pub colonies_port: u16,

    #[arg(long, env = "REEF_RELAY_COLONIES_TLS", default_value_t = false)]
    pub colonies_tls: bool,

    #[arg(long, env = "REEF_RELAY_COLONY_NAME", default_value = "dev")]
    pub colony_name: String,

    #[arg(long, env = "REEF_RELAY_COLONY_PRVKEY", hide_env_values = true)]
    pub colony_prv_key: Option<String>,

    #[arg(long, env = "REEF_RELAY_EXECUTOR_PRVKEY", hide_env_values = true)]
    pub executor_prv_key: Option<String>,

    /// Skip installing the Prometheus recorder; `/metrics` then returns 404.
    #[arg(long, env = "REEF_RELAY_DISABLE_METRICS", default_value_t = false)]
    pub disable_metrics: bool,
}

#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    /// Base URL of the relay; the bootstrap document is read from `/api/config`.
    #[arg(long, env = "REEF_WATCH_RELAY_URL", default_value = "http://127.0.0.1:8080")]
    pub relay_url: String,

    /// Connect here instead of the bootstrap's `reconcilerWsUrl`.
    #[arg(long, env = "REEF_WATCH_WS_URL")]
    pub ws_url: Option<String>,

    /// Blueprint listing used to seed the device table.
    #[arg(long, env = "REEF_WATCH_SNAPSHOT_URL")]
    pub snapshot_url: Option<String>,

    #[arg(long, env = "REEF_WATCH_DEVICE_KIND", default_value = "HomeDevice")]
    pub device_kind: String,

    #[arg(long, env = "REEF_WATCH_CONNECT_TIMEOUT_MS", default_value_t = 1_500)]
    pub connect_timeout_ms: u64,

    #[arg(long, env = "REEF_WATCH_RETRY_DELAY_MS", default_value_t = 2_000)]
    pub retry_delay_ms: u64,

    /// Client identity to present, matched against the phantom policy.
    #[arg(long, env = "REEF_WATCH_IDENTITY")]
    pub identity: Option<String>,
}
