//! Rapla calendar proxy
//!
//! Serves one upstream Rapla calendar as an iCalendar (or JSON) document.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌───────────────────────────────────────────────────┐
//!                  │                   RAPLA PROXY                      │
//!   GET /          │  ┌──────────┐   ┌──────────┐   ┌───────────────┐  │
//!   ───────────────┼─▶│ request  │──▶│  gate    │──▶│   pipeline    │  │
//!                  │  │ id/trace │   │ GET only │   │               │  │
//!                  │  └──────────┘   └────┬─────┘   └──┬─────────┬──┘  │
//!                  │                  405 │            │         │     │
//!                  │                      ▼            ▼         │     │
//!                  │               ┌──────────┐  ┌──────────┐    │     │      Rapla
//!                  │               │  client  │  │ extract  │────┼─────┼────▶ upstream
//!                  │               └──────────┘  │ + parse  │    │     │
//!                  │                             └──────────┘    ▼     │
//!   text/calendar  │                                     ┌────────────┐│
//!   ◀──────────────┼─────────────────────────────────────│ serializer ││
//!                  │                                     │ (streamed) ││
//!                  │                                     └────────────┘│
//!                  └───────────────────────────────────────────────────┘
//! ```

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use rapla_proxy::calendar::{IcsSerializer, JsonSerializer, ResourceKey, Serializer};
use rapla_proxy::config::{load_config, validate_config, ConfigError, ProxyConfig};
use rapla_proxy::extract::{Extractor, RaplaExtractor};
use rapla_proxy::http::Format;
use rapla_proxy::lifecycle::{self, StartupError};
use rapla_proxy::observability::logging;

#[derive(Parser)]
#[command(name = "rapla-proxy", version)]
#[command(about = "Serve a Rapla calendar as iCalendar", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket address to listen on
    #[arg(short, long, env = "RAPLA_PROXY_ADDR")]
    address: Option<String>,

    /// Resource key of the upstream calendar
    #[arg(short, long)]
    key: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP proxy (default)
    Serve,
    /// Fetch the calendar once and write it to stdout
    Fetch {
        #[arg(short, long, value_enum, default_value = "ics")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Ics,
    Json,
}

impl From<OutputFormat> for Format {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Ics => Format::Ics,
            OutputFormat::Json => Format::Json,
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    if let Some(address) = &cli.address {
        config.listener.bind_address = address.clone();
    }
    if let Some(key) = &cli.key {
        config.upstream.resource_key = key.clone();
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

async fn fetch(config: ProxyConfig, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let key = ResourceKey::new(config.upstream.resource_key.as_str())?;
    let extractor = RaplaExtractor::new(&config.upstream, &config.timeouts)?;
    let calendar = extractor.extract(&key).await?;

    let serializer: &dyn Serializer = match format {
        Format::Ics => &IcsSerializer,
        Format::Json => &JsonSerializer,
    };

    let mut stdout = io::stdout().lock();
    calendar.serialize_to(serializer, &mut stdout)?;
    stdout.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", StartupError::from(e));
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!("rapla-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    let result: Result<(), Box<dyn std::error::Error>> = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => lifecycle::start(config).await.map_err(Into::into),
        Commands::Fetch { format } => fetch(config, format.into()).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Exiting");
            ExitCode::FAILURE
        }
    }
}
