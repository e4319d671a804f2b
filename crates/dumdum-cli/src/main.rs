//! dumdum Command-Line Client
//!
//! Connects to a dumdum server, authenticates with a nickname and then
//! lists channels, prints history, posts one message, or runs an
//! interactive session on a channel.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use dumdum_core::logging::{init_logging, LogFormat};
use dumdum_core::protocol::{validate_channel_name, validate_nick};
use dumdum_core::{tls, AsyncClient, ClientOptions};
use std::path::PathBuf;
use std::time::Duration;

mod commands;

/// dumdum - a small terminal chat client
#[derive(Parser)]
#[command(name = "dumdum")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Log output format (text or json)
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "6667")]
    port: u16,

    /// Nickname to authenticate with
    #[arg(short, long)]
    nick: String,

    /// PEM file with the certificate authorities trusted for TLS
    #[arg(long)]
    ca_file: Option<PathBuf>,

    /// Name to verify the server certificate against (defaults to --host)
    #[arg(long)]
    server_name: Option<String>,

    /// Seconds to wait for the server on each step
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the server's channels
    Channels,

    /// Show a channel's recent history
    History {
        /// Channel name
        channel: String,

        /// Only messages with an id at or above this one
        #[arg(long)]
        before: Option<u64>,

        /// Only messages with an id at or below this one
        #[arg(long)]
        after: Option<u64>,
    },

    /// Post one message
    Send {
        /// Channel name
        channel: String,

        /// Message text
        text: String,
    },

    /// Interactive session on a channel
    Chat {
        /// Channel name
        channel: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format)?;
    validate_nick(&cli.nick).context("Invalid nickname")?;

    let client = connect(&cli).await?;
    let wait = Duration::from_secs(cli.timeout);

    match cli.command {
        Commands::Channels => {
            commands::list_channels(client, wait, cli.json).await?;
        }
        Commands::History {
            channel,
            before,
            after,
        } => {
            validate_channel_name(&channel).context("Invalid channel name")?;
            commands::show_history(client, wait, &channel, before, after, cli.json).await?;
        }
        Commands::Send { channel, text } => {
            validate_channel_name(&channel).context("Invalid channel name")?;
            commands::send_message(client, wait, &cli.nick, &channel, &text).await?;
        }
        Commands::Chat { channel } => {
            validate_channel_name(&channel).context("Invalid channel name")?;
            commands::chat(client, wait, &channel).await?;
        }
    }

    Ok(())
}

async fn connect(cli: &Cli) -> Result<AsyncClient> {
    let tls = match &cli.ca_file {
        Some(path) => Some(
            tls::load_connector(path)
                .with_context(|| format!("Failed to load CA file {}", path.display()))?,
        ),
        None => None,
    };

    let options = ClientOptions {
        tls,
        server_name: cli.server_name.clone().or_else(|| Some(cli.host.clone())),
        timeout: Duration::from_secs(cli.timeout),
        ..ClientOptions::default()
    };

    let addr = format!("{}:{}", cli.host, cli.port);
    AsyncClient::connect(&addr, &cli.nick, options)
        .await
        .with_context(|| format!("Failed to join {} as {}", addr, cli.nick))
}
