//! RelayMesh Agent
//!
//! Sidecar binary: runs one channel agent behind the line-delimited
//! JSON control surface so non-native hosts can embed it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent::config::{default_config_path, AgentConfig};
use agent::control::ControlServer;
use agent::transport::{HttpTransport, HttpTransportConfig, UdpBridge, UdpBridgeConfig};
use agent::ChannelAgent;
use clap::{Parser, Subcommand};

/// RelayMesh agent - channel sidecar with a local control endpoint.
#[derive(Parser, Debug)]
#[command(name = "relaymesh-agent")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the agent.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the agent and its control endpoint
    Start {
        /// Override the control bind address
        #[arg(long, value_name = "ADDR")]
        bind: Option<SocketAddr>,
    },

    /// Write a default configuration file and exit
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        AgentConfig::load(config_path)?
    } else {
        AgentConfig::load_or_default()?
    };
    config.apply_env_overrides();
    config.validate()?;

    // Initialize tracing; the guard must outlive main for file logging
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.log_level.clone()
    };
    let _guard = match &config.logging.log_dir {
        Some(log_dir) => {
            let appender = tracing_appender::rolling::daily(log_dir, "relaymesh-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter.as_str())
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter.as_str())
                .init();
            None
        }
    };

    match cli.command {
        Commands::Start { bind } => {
            tracing::info!(broker = %config.broker.url, "relaymesh agent starting");

            let mut transport_config = HttpTransportConfig::new(config.broker.url.clone())
                .with_request_timeout(Duration::from_secs(config.broker.request_timeout_secs))
                .with_receive_timeout(Duration::from_secs(config.broker.receive_timeout_secs));
            if let Some(api_key) = &config.broker.api_key {
                transport_config = transport_config.with_api_key(api_key.clone());
            }
            let transport = Arc::new(HttpTransport::new(transport_config)?);

            let mut channel_agent = ChannelAgent::new(transport);
            if let Some(datagram_addr) = &config.broker.datagram_addr {
                let bridge =
                    UdpBridge::connect(UdpBridgeConfig::new(datagram_addr.clone())).await?;
                channel_agent = channel_agent.with_datagram_bridge(Arc::new(bridge));
            }

            let bind_addr = match bind {
                Some(addr) => addr,
                None => config.control.bind_addr.parse()?,
            };
            let server = ControlServer::bind(bind_addr, channel_agent.clone()).await?;

            tokio::select! {
                result = server.run() => {
                    result?;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received");
                    channel_agent.disconnect_beacon();
                    // give the beacon a moment to fire
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }

        Commands::InitConfig => {
            let path = cli.config.unwrap_or_else(default_config_path);
            if path.exists() {
                anyhow::bail!("config file already exists: {:?}", path);
            }
            AgentConfig::default().save(&path)?;
            println!("wrote {}", path.display());
        }
    }

    Ok(())
}
