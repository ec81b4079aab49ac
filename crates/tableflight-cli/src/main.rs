use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tableflight_client::FlightClient;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::*;
use config::{Config, OutputFormat};

#[derive(Parser)]
#[command(name = "tfl")]
#[command(author, version, about = "Tableflight - list and fetch Arrow Flight datasets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Flight service address (overrides the configuration file)
    #[arg(short, long, global = true)]
    address: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the flights the service advertises
    List {
        /// Criteria expression passed to ListFlights
        #[arg(long)]
        criteria: Option<String>,
    },

    /// Fetch a flight into a table and print it
    Fetch {
        /// Ticket as UTF-8 text (defaults to the first advertised flight)
        #[arg(short, long, conflicts_with = "hex")]
        ticket: Option<String>,

        /// Ticket as hex-encoded bytes
        #[arg(long)]
        hex: Option<String>,

        /// Output format
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,

        /// Maximum rows to print (0 prints everything)
        #[arg(short, long)]
        max_rows: Option<usize>,
    },

    /// Show the schema of a path-described flight
    Schema {
        /// Descriptor path segments
        #[arg(required = true)]
        path: Vec<String>,
    },

    /// Write the effective configuration to a file
    SaveConfig {
        /// Destination file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let mut config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    if let Some(address) = cli.address {
        config.client.address = address;
    }

    if let Commands::SaveConfig { path } = &cli.command {
        return save_config(&config, path);
    }

    debug!("Connecting to {}", config.client.address);
    let client = FlightClient::connect_with_config(&config.client).await?;

    let result = match cli.command {
        Commands::List { criteria } => list_flights(&client, criteria).await,
        Commands::Fetch {
            ticket,
            hex,
            output,
            max_rows,
        } => {
            let ticket = parse_ticket(ticket, hex)?;
            let format = output.unwrap_or(config.output_format);
            let max_rows = max_rows.unwrap_or(config.max_rows);
            fetch(&client, ticket, format, max_rows).await
        }
        Commands::Schema { path } => describe_schema(&client, path).await,
        Commands::SaveConfig { .. } => Ok(()),
    };

    client.close();
    result
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "tableflight_cli=debug,tableflight_client=debug,tableflight_core=debug"
    } else {
        "tableflight_cli=info,tableflight_client=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
