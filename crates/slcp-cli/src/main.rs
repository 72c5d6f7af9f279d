//! CLI binary for SLCP: chat on the local network, run a discovery service,
//! list peers, and edit the config file.

mod command;
mod interface;
mod progress;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use slcp_core::config::{self, DEFAULT_CONFIG_FILE, SlcpConfig};
use slcp_net::{ChatEvent, DiscoveryService, Messenger, NetError};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[derive(Parser)]
#[command(name = "slcp", about = "Simple Local Chat Protocol client", version)]
struct Cli {
    /// Config file (created on first run)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the chat interactively (default)
    Chat {
        /// Handle to chat as (overrides the config file)
        #[arg(long)]
        handle: Option<String>,

        /// Port for UDP messages and incoming images
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not start an embedded discovery service on the whois port
        #[arg(long)]
        no_discovery: bool,
    },

    /// Run a standalone discovery service until Ctrl-C
    Discovery,

    /// Ask who is online, print the answers and exit
    Peers {
        /// How long to collect answers, in milliseconds
        #[arg(long, default_value = "1000")]
        wait_ms: u64,
    },

    /// Show or edit the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Set one key, e.g. `port 5001` or `network.chunk_size 4096`
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so chat output on stdout stays readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Chat {
        handle: None,
        port: None,
        no_discovery: false,
    });

    match command {
        Commands::Chat {
            handle,
            port,
            no_discovery,
        } => cmd_chat(&cli.config, handle, port, no_discovery).await,
        Commands::Discovery => cmd_discovery(&cli.config).await,
        Commands::Peers { wait_ms } => cmd_peers(&cli.config, wait_ms).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => cmd_config_show(&cli.config),
            ConfigAction::Set { key, value } => cmd_config_set(&cli.config, &key, &value),
        },
    }
}

async fn cmd_chat(
    config_path: &Path,
    handle: Option<String>,
    port: Option<u16>,
    no_discovery: bool,
) -> Result<()> {
    let mut config = SlcpConfig::load(config_path)?;
    if let Some(handle) = handle {
        config::validate_handle(&handle)?;
        config.handle = handle;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if !config.is_complete() {
        prompt_missing(&mut config)?;
        config.save(config_path)?;
        eprintln!("Saved settings to {}", config_path.display());
    }
    config.validate()?;

    // Stops the embedded discovery service when the chat ends.
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    if no_discovery || config.port == config.whoisport {
        tracing::debug!("embedded discovery service disabled");
    } else {
        start_embedded_discovery(&config, stop_rx).await;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let messenger = Messenger::start(config, tx)
        .await
        .context("failed to start messenger")?;
    let result = interface::ChatInterface::new(messenger, rx).run().await;
    let _ = stop_tx.send(());
    result
}

/// Serve the whois port from this process unless another service already does.
async fn start_embedded_discovery(config: &SlcpConfig, stop: oneshot::Receiver<()>) {
    match DiscoveryService::bind(config).await {
        Ok(service) => {
            tokio::spawn(async move {
                let shutdown = async {
                    let _ = stop.await;
                };
                if let Err(e) = service.run(shutdown).await {
                    tracing::warn!("discovery service stopped: {}", e);
                }
            });
        }
        Err(NetError::Bind { source, .. }) if source.kind() == std::io::ErrorKind::AddrInUse => {
            tracing::info!(
                "port {} is served by another discovery service",
                config.whoisport
            );
        }
        Err(e) => tracing::warn!("could not start discovery service: {}", e),
    }
}

async fn cmd_discovery(config_path: &Path) -> Result<()> {
    let config = SlcpConfig::load(config_path)?;
    let service = DiscoveryService::bind(&config)
        .await
        .with_context(|| format!("failed to bind whois port {}", config.whoisport))?;
    println!("Discovery service on port {}. Press Ctrl-C to stop.", config.whoisport);

    service
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

async fn cmd_peers(config_path: &Path, wait_ms: u64) -> Result<()> {
    let mut config = SlcpConfig::load(config_path)?;
    if config.handle.is_empty() {
        config.handle = format!("slcp-{}", std::process::id());
    }
    // A throwaway port so a running chat client is not disturbed.
    config.port = 0;
    config.network.who_window_ms = wait_ms;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let messenger = Messenger::start(config, tx)
        .await
        .context("failed to start messenger")?;
    messenger.who().await.context("failed to send WHO")?;

    let deadline = Duration::from_millis(wait_ms) + Duration::from_secs(1);
    let answers = tokio::time::timeout(deadline, async {
        while let Some(event) = rx.recv().await {
            if let ChatEvent::KnownUsers(users) = event {
                return users;
            }
        }
        Vec::new()
    })
    .await
    .unwrap_or_default();
    messenger.shutdown();

    if answers.is_empty() {
        println!("Nobody answered.");
    } else {
        for user in &answers {
            println!("{user}");
        }
    }
    Ok(())
}

fn cmd_config_show(config_path: &Path) -> Result<()> {
    let config = SlcpConfig::load(config_path)?;
    println!("# {}", config_path.display());
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_config_set(config_path: &Path, key: &str, value: &str) -> Result<()> {
    let mut config = SlcpConfig::load(config_path)?;
    config.set(key, value)?;
    config.save(config_path)?;
    println!("Set {} = {} in {}", key, value, config_path.display());
    Ok(())
}

/// Ask on the terminal for whatever the config is missing.
fn prompt_missing(config: &mut SlcpConfig) -> Result<()> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();

    while config.handle.is_empty() {
        let answer = prompt(&mut input, "Handle: ")?;
        match config::validate_handle(&answer) {
            Ok(()) => config.handle = answer,
            Err(e) => eprintln!("{e}"),
        }
    }
    while config.port == 0 {
        let answer = prompt(&mut input, "Port: ")?;
        match answer.parse::<u16>() {
            Ok(port) if port != 0 => config.port = port,
            _ => eprintln!("port must be a number between 1 and 65535"),
        }
    }
    Ok(())
}

fn prompt(input: &mut impl BufRead, label: &str) -> Result<String> {
    print!("{label}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        anyhow::bail!("stdin closed while reading {}", label.trim_end_matches(": "));
    }
    Ok(line.trim().to_string())
}
