use anyhow::{Context, Result};
use clap::{Args, Command, FromArgMatches, Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{
    commands::MAX_CONNECT_TIMEOUT_SECS,
    reader::PcscTransport,
    transport::CardTransport,
    utils::format_hex_spaced,
};
use crate::server::{
    config::{BridgeConfig, DEFAULT_PORT},
    BridgeServer,
};

#[derive(Parser, Debug)]
#[command(name = "nfc-bridge")]
#[command(about = "WebSocket bridge exposing a PCSC smart card / NFC reader to remote clients")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the WebSocket bridge (default when no command is given)
    Serve(ServeArgs),

    /// List available PCSC readers
    List {
        /// Also try to read the ATR of the card in each reader
        #[arg(short = 'l', long)]
        detailed: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind the WebSocket listener to
    #[arg(long, default_value = "127.0.0.1", env = "NFC_BRIDGE_BIND")]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT, env = "NFC_BRIDGE_PORT")]
    pub port: u16,

    /// Seconds between keep-alive pings
    #[arg(long, default_value_t = 20, env = "NFC_BRIDGE_PING_INTERVAL",
          value_parser = clap::value_parser!(u64).range(1..))]
    pub ping_interval: u64,

    /// Seconds a client may stay silent after a ping before it is dropped
    #[arg(long, default_value_t = 20, env = "NFC_BRIDGE_PING_TIMEOUT")]
    pub ping_timeout: u64,

    /// Default seconds to wait for a card on `connect`
    #[arg(long, default_value_t = 30, env = "NFC_BRIDGE_CONNECT_TIMEOUT",
          value_parser = clap::value_parser!(u64).range(0..=MAX_CONNECT_TIMEOUT_SECS as u64))]
    pub connect_timeout: u64,
}

impl ServeArgs {
    /// Serve settings when no subcommand is given: defaults plus any
    /// `NFC_BRIDGE_*` environment overrides.
    pub fn from_env() -> Result<Self, clap::Error> {
        let matches = Self::augment_args(Command::new("nfc-bridge")).try_get_matches_from(["nfc-bridge"])?;
        Self::from_arg_matches(&matches)
    }

    pub fn into_config(self) -> BridgeConfig {
        BridgeConfig {
            bind_addr: SocketAddr::new(self.bind, self.port),
            ping_interval: Duration::from_secs(self.ping_interval),
            ping_timeout: Duration::from_secs(self.ping_timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            ..BridgeConfig::default()
        }
    }
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    let command = match cli.command {
        Some(command) => command,
        None => Commands::Serve(ServeArgs::from_env().unwrap_or_else(|e| e.exit())),
    };

    // Set up logging
    let log_level = if cli.debug {
        log::LevelFilter::Debug
    } else if cli.verbose {
        log::LevelFilter::Info
    } else if matches!(command, Commands::Serve(_)) {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match command {
        Commands::Serve(args) => cmd_serve(args.into_config()),
        Commands::List { detailed } => cmd_list(&PcscTransport::new(), detailed),
    }
}

fn cmd_serve(config: BridgeConfig) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    runtime.block_on(async {
        let server = BridgeServer::bind(config, Arc::new(PcscTransport::new())).await?;
        println!("Starting NFC bridge on ws://{}", server.local_addr()?);

        server
            .run_until(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            })
            .await
    })?;

    log::info!("NFC bridge stopped");
    Ok(())
}

fn cmd_list(transport: &dyn CardTransport, detailed: bool) -> Result<()> {
    let readers = transport.list_readers().unwrap_or_else(|e| {
        log::warn!("Failed to list readers: {}", e);
        Vec::new()
    });

    if readers.is_empty() {
        println!("No PCSC readers found.");
        return Ok(());
    }

    println!("Available PCSC readers:");
    for (i, name) in readers.iter().enumerate() {
        println!("  [{i}] {name}");

        if detailed {
            let atr = transport.open(name).and_then(|mut card| {
                let atr = card.atr();
                if let Err(e) = card.close() {
                    log::warn!("Failed to release card in {}: {}", name, e);
                }
                atr
            });

            match atr {
                Ok(atr) => println!("      Status: Card present, ATR: {}", format_hex_spaced(&atr)),
                Err(e) => println!("      Status: No card ({e})"),
            }
        }
    }

    Ok(())
}
