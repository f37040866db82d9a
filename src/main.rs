//! web-deadend
//!
//! A catch-all HTTP decoy built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────────┐
//!                       │                      DEAD END                         │
//!                       │                                                       │
//!   Client Request      │  ┌────────┐   ┌─────────┐   ┌─────────┐   ┌────────┐  │
//!   ────────────────────┼─▶│  http  │──▶│ context │──▶│ routing │──▶│ render │  │
//!                       │  │ server │   │ decode  │   │ matcher │   │template│  │
//!                       │  └────────┘   └─────────┘   └─────────┘   └───┬────┘  │
//!   Decoy Response      │                                               │       │
//!   ◀───────────────────┼───────────────────────────────────────────────┘       │
//!                       │        │                                              │
//!                       │        ▼                                              │
//!                       │  ┌──────────┐   ┌─────────────┐                       │
//!                       │  │   gelf   │──▶│   shipper   │───────────────────────┼──▶ Collector
//!                       │  │  record  │   │ (background)│                       │
//!                       │  └──────────┘   └─────────────┘                       │
//!                       │                                                       │
//!                       │  config · security · admin · observability · lifecycle│
//!                       └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use web_deadend::config::validation::validate_config;
use web_deadend::config::{load_config, ConfigError, DeadendConfig};
use web_deadend::lifecycle::{self, Shutdown};
use web_deadend::observability::init_logging;

#[derive(Parser, Debug)]
#[command(name = "web-deadend", version, about = "Catch-all HTTP decoy with structured logging")]
struct Cli {
    /// TOML configuration file; built-in defaults are used when absent.
    #[arg(short, long, env = "DEADEND_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:3000.
    #[arg(long)]
    bind: Option<String>,

    /// Collector URI, udp://host:port or tcp://host:port.
    #[arg(long, env = "GELF_SERVER")]
    gelf_server: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Apply command line overrides on top of file values.
    fn apply(&self, config: &mut DeadendConfig) {
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(server) = &self.gelf_server {
            config.gelf.server = Some(server.clone()).filter(|s| !s.is_empty());
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
    }

    fn load(&self) -> Result<DeadendConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => DeadendConfig::default(),
        };
        self.apply(&mut config);
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load()?;

    init_logging(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "web-deadend starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        gelf_server = config.gelf.server.as_deref().unwrap_or("disabled"),
        config_file = ?cli.config,
        "Configuration loaded"
    );

    lifecycle::run(config, Shutdown::new()).await?;
    Ok(())
}
