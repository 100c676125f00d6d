//! pmulink-cli - Phasor data concentrator command-line interface
//!
//! Connects to a measurement unit and issues one command per invocation.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use pmulink_client::{ConnectionConfig, PdcClient};
use pmulink_protocol::{Command, ConfigVersion};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pmulink-cli")]
#[command(about = "Phasor data concentrator client for C37.118 measurement units")]
#[command(version)]
struct Cli {
    /// Measurement unit address
    #[arg(short, long, default_value = "127.0.0.1:4712", env = "PMULINK_SERVER")]
    server: SocketAddr,

    /// IDCODE stamped on outgoing commands
    #[arg(short, long, default_value = "1")]
    id_code: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Request the header frame
    Header,

    /// Request a configuration frame
    Config {
        /// Configuration frame version
        #[arg(short, long, default_value = "2", value_parser = clap::value_parser!(u8).range(1..=3))]
        version: u8,
    },

    /// Turn on data transmission and print data frames
    Stream {
        /// Stop after this many frames
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Print each frame as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send a single command frame
    Send {
        /// start, stop, header, config1, config2, config3, extended or a hex code (0xNN)
        #[arg(value_parser = commands::parse_command)]
        command: Command,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = ConnectionConfig::new(cli.server).with_id_code(cli.id_code);
    let mut client = PdcClient::connect(config).await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    match cli.command {
        Commands::Stream { count, json } => {
            let streamed = commands::stream(&mut client, count, json).await;
            // Always turn transmission back off
            let _ = client.stop().await;
            match streamed {
                Ok(n) => eprintln!("{} {} data frames", "Received".green(), n),
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
        cmd => match commands::execute(&mut client, cmd).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    client.close().await?;
    Ok(())
}

/// Maps the `--version` argument to a configuration frame version.
fn config_version(version: u8) -> ConfigVersion {
    match version {
        1 => ConfigVersion::V1,
        3 => ConfigVersion::V3,
        _ => ConfigVersion::V2,
    }
}
