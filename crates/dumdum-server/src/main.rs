//! dumdum Chat Server
//!
//! Hosts a set of channels over the dumdum protocol.
//!
//! ## Server Properties
//!
//! - Channels are fixed at startup
//! - Nicknames are unique among connected users
//! - History is kept in memory only, bounded per channel
//! - Optional TLS upgrade after the hello exchange

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use dumdum_core::logging::{init_logging, LogFormat};
use dumdum_core::protocol::validate_channel_name;
use dumdum_core::server::{DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_MESSAGES};
use dumdum_core::tls::{self, CertSpec};
use dumdum_core::{Manager, ManagerConfig, ServerState};
use std::time::Duration;
use tokio::net::TcpListener;

/// dumdum server - host chat channels
#[derive(Parser, Debug)]
#[command(name = "dumdum-server")]
#[command(author, version, about)]
struct Args {
    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Log output format (text or json)
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    /// Channels to open
    #[arg(short, long, num_args = 1.., default_values_t = vec!["general".to_string()])]
    channels: Vec<String>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "6667")]
    port: u16,

    /// TLS certificate: one PEM with chain and key, or CHAIN:KEY
    #[arg(long)]
    cert: Option<String>,

    /// Messages kept per channel
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGES)]
    max_messages: usize,

    /// Messages returned per history request
    #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
    history_limit: usize,

    /// Seconds a write may take to drain before the client is dropped
    #[arg(long, default_value = "30")]
    drain_timeout: u64,
}

impl Args {
    fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            drain_timeout: Duration::from_secs(self.drain_timeout),
            history_limit: self.history_limit,
            ..ManagerConfig::default()
        }
    }

    fn validate(&self) -> Result<()> {
        for channel in &self.channels {
            validate_channel_name(channel)
                .with_context(|| format!("Invalid channel name {:?}", channel))?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.log_format)?;
    args.validate()?;

    let acceptor = match &args.cert {
        Some(cert) => {
            let spec = CertSpec::parse(cert)?;
            Some(tls::load_acceptor(&spec).context("Failed to load TLS certificate")?)
        }
        None => None,
    };

    let state = ServerState::with_channels(args.channels.iter().cloned(), args.max_messages);
    let manager = Manager::new(state, acceptor, args.manager_config());

    let listener = TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", args.host, args.port))?;

    tracing::info!(
        address = %listener.local_addr()?,
        channels = ?args.channels,
        max_messages = args.max_messages,
        tls = manager.using_ssl(),
        "dumdum server started"
    );

    tokio::select! {
        _ = manager.clone().serve(listener) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(
                connections = manager.connection_count().await,
                "Shutting down"
            );
        }
    }

    Ok(())
}
