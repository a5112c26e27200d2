//! `relaygate` binary: run a gateway or a chat service.

use std::{net::SocketAddr, path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use relaygate_container::ContainerConfig;
use relaygate_core::{MemoryNaming, MemoryStorage, Naming, ServerConfig};
use relaygate_proto::commands::Protocol;
use relaygate_server::{ChatOptions, GatewayOptions, MemoryMessageService, ServiceError, build_chat, build_gateway, parse_peer};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "relaygate", version, about = "Relaygate message gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "RELAYGATE_LOG", default_value = "info")]
    log_level: String,

    /// Serve Prometheus metrics on this address.
    #[arg(long, global = true, env = "RELAYGATE_METRICS_LISTEN")]
    metrics_listen: Option<SocketAddr>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a client-facing gateway.
    Gateway(GatewayArgs),
    /// Run a login and chat service.
    Chat(ChatArgs),
}

#[derive(Args)]
struct Common {
    /// Unique service id.
    #[arg(long, env = "RELAYGATE_SERVICE_ID")]
    service_id: String,

    /// Listen address.
    #[arg(long, env = "RELAYGATE_LISTEN")]
    listen: String,

    /// Address announced to peers.
    #[arg(long, env = "RELAYGATE_PUBLIC_ADDRESS", default_value = "127.0.0.1")]
    public_address: String,

    /// Port announced to peers.
    #[arg(long, env = "RELAYGATE_PUBLIC_PORT")]
    public_port: u16,

    /// Registry tag, repeatable.
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Known peer as id=name@host:port, repeatable.
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Dispatch workers.
    #[arg(long, default_value_t = relaygate_core::config::DEFAULT_WORKERS)]
    workers: usize,

    /// Seconds to wait for in-flight channels on shutdown.
    #[arg(long, default_value_t = 10)]
    shutdown_grace: u64,
}

#[derive(Args)]
struct GatewayArgs {
    #[command(flatten)]
    common: Common,

    /// Client transport: tcp or websocket.
    #[arg(long, default_value = "tcp")]
    protocol: Protocol,

    /// Token signing secret.
    #[arg(long, env = "RELAYGATE_APP_SECRET", default_value = relaygate_server::token::DEFAULT_SECRET)]
    app_secret: String,

    /// Seconds a client may stay silent.
    #[arg(long, default_value_t = 120)]
    read_wait: u64,

    /// Zone route table (JSON).
    #[arg(long, env = "RELAYGATE_ROUTE")]
    route: Option<PathBuf>,

    /// Seconds before a newly discovered backend receives traffic.
    #[arg(long, default_value_t = 10)]
    warmup: u64,
}

#[derive(Args)]
struct ChatArgs {
    #[command(flatten)]
    common: Common,

    /// Registered service name.
    #[arg(long, default_value = relaygate_proto::commands::SN_CHAT)]
    service_name: String,
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(false)).init();
}

impl Common {
    async fn naming(&self) -> Result<Arc<dyn Naming>, ServiceError> {
        let naming: Arc<dyn Naming> = Arc::new(MemoryNaming::new());
        for spec in &self.peers {
            let peer = parse_peer(spec)?;
            info!(peer = %peer, "static peer");
            naming.register(&peer).await.map_err(|e| ServiceError::Config(e.to_string()))?;
        }
        Ok(naming)
    }

    fn server(&self) -> ServerConfig {
        ServerConfig { workers: self.workers, ..ServerConfig::default() }
    }

    fn container(&self, warmup: Option<u64>) -> ContainerConfig {
        let mut config =
            ContainerConfig { shutdown_grace: Duration::from_secs(self.shutdown_grace), ..ContainerConfig::default() };
        if let Some(secs) = warmup {
            config.warmup = Duration::from_secs(secs);
        }
        config
    }
}

fn init_metrics(listen: Option<SocketAddr>) -> Result<(), ServiceError> {
    let Some(addr) = listen else {
        return Ok(());
    };
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ServiceError::Config(format!("metrics exporter: {e}")))?;
    info!(%addr, "metrics exporter listening");
    Ok(())
}

async fn run(cli: Cli) -> Result<(), ServiceError> {
    init_metrics(cli.metrics_listen)?;
    match cli.command {
        Command::Gateway(args) => {
            let naming = args.common.naming().await?;
            let opts = GatewayOptions {
                service_id: args.common.service_id.clone(),
                listen: args.common.listen.clone(),
                public_address: args.common.public_address.clone(),
                public_port: args.common.public_port,
                protocol: args.protocol,
                app_secret: args.app_secret,
                read_wait: Duration::from_secs(args.read_wait),
                route: args.route,
                tags: args.common.tags.clone(),
                container: args.common.container(Some(args.warmup)),
                server: args.common.server(),
                ..GatewayOptions::default()
            };
            let container = build_gateway(opts, naming)?;
            container.start().await?;
        },
        Command::Chat(args) => {
            let naming = args.common.naming().await?;
            let opts = ChatOptions {
                service_id: args.common.service_id.clone(),
                service_name: args.service_name,
                listen: args.common.listen.clone(),
                public_address: args.common.public_address.clone(),
                public_port: args.common.public_port,
                tags: args.common.tags.clone(),
                container: args.common.container(None),
                server: args.common.server(),
            };
            let container =
                build_chat(opts, naming, Arc::new(MemoryStorage::new()), Arc::new(MemoryMessageService::new()))?;
            container.start().await?;
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_telemetry(&cli);
    info!(version = env!("CARGO_PKG_VERSION"), "relaygate starting");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "relaygate exited");
            ExitCode::FAILURE
        },
    }
}
