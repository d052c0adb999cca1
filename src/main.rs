//! EmberMQ - MQTT v5.0 broker
//!
//! Usage:
//!   embermq [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Configuration file path (TOML)
//!   -b, --bind <ADDR>       TCP listen address (overrides config)
//!   --max-connections <N>   Maximum connections
//!   --max-packet-size <N>   Maximum packet size in bytes
//!   -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use embermq::broker::Broker;
use embermq::config::Config;
use embermq::metrics::{Metrics, MetricsServer};

/// Log level for the CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// EmberMQ - MQTT v5.0 broker
#[derive(Parser, Debug)]
#[command(name = "embermq")]
#[command(version = "0.1.0")]
#[command(about = "MQTT v5.0 broker with QoS 0/1, shared subscriptions and session takeover")]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP listen address (replaces configured listeners)
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Maximum connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Maximum packet size in bytes
    #[arg(long)]
    max_packet_size: Option<usize>,

    /// Keep-alive cap in seconds (1..=600)
    #[arg(long)]
    max_keep_alive: Option<u16>,

    /// Metrics endpoint address (enables metrics)
    #[arg(long)]
    metrics_bind: Option<SocketAddr>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("error loading config file: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    // CLI overrides config, config overrides defaults
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_name(&file_config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("loaded configuration from {:?}", path);
    }

    let mut broker_config = file_config.broker_config();
    if let Some(bind) = args.bind {
        broker_config.listeners = vec![bind];
    }
    if let Some(n) = args.max_connections {
        broker_config.max_connections = n;
    }
    if let Some(n) = args.max_packet_size {
        broker_config.max_packet_size = n;
    }
    if let Some(n) = args.max_keep_alive {
        broker_config.max_keep_alive = n.clamp(1, 600);
    }

    info!("starting EmberMQ");
    for addr in &broker_config.listeners {
        info!("  listener: {}", addr);
    }
    for addr in &broker_config.tls_listeners {
        info!("  TLS listener: {}", addr);
    }
    info!("  max connections: {}", broker_config.max_connections);
    info!("  max packet size: {} bytes", broker_config.max_packet_size);
    info!("  keep-alive cap: {} s", broker_config.max_keep_alive);

    let metrics = Arc::new(Metrics::new());

    let metrics_bind = args.metrics_bind.or_else(|| {
        file_config
            .metrics
            .enabled
            .then_some(file_config.metrics.bind)
    });
    if let Some(bind) = metrics_bind {
        let server = MetricsServer::new(metrics.clone(), bind);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!("metrics server error: {}", e);
            }
        });
    }

    let broker = Arc::new(Broker::with_metrics(broker_config, metrics));

    // Ctrl+C triggers an orderly shutdown
    {
        let broker = broker.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received");
                broker.shutdown();
            }
        });
    }

    broker.run().await?;

    Ok(())
}
