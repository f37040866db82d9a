use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use web_deadend::config::validation::ValidationError;
use web_deadend::config::{load_config, ConfigError, DeadendConfig};
use web_deadend::routing::Router;

#[derive(Parser)]
#[command(name = "deadend-cli")]
#[command(about = "Management CLI for the web-deadend decoy", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and list its compiled routes
    Check {
        config: PathBuf,
    },
    /// Show which route answers a request
    Match {
        config: PathBuf,
        method: String,
        path: String,
    },
    /// Query a running instance's status endpoint
    Status {
        #[arg(short, long, default_value = "http://localhost:3000")]
        url: String,

        #[arg(short, long, default_value = "/deadend-status")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let Some(config) = load_checked(&config)? else {
                return Ok(ExitCode::FAILURE);
            };
            let router = Router::from_config(&config.routes, &config.fallback)?;

            let routes: Vec<Value> = router
                .routes()
                .iter()
                .map(|route| {
                    json!({
                        "id": route.id,
                        "pattern": route.source,
                        "kind": route.pattern.kind(),
                        "methods": route.methods,
                        "status": route.response.status.as_u16(),
                    })
                })
                .collect();

            let summary = json!({
                "bind_address": config.listener.bind_address,
                "configured": config.routes.len(),
                "compiled": router.len(),
                "routes": routes,
                "fallback_status": config.fallback.status,
                "gelf_server": config.gelf.server,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Match { config, method, path } => {
            let Some(config) = load_checked(&config)? else {
                return Ok(ExitCode::FAILURE);
            };
            let router = Router::from_config(&config.routes, &config.fallback)?;
            let matched = router.match_request(&method.to_ascii_uppercase(), &path);

            let result = json!({
                "route": matched.route.id,
                "pattern": matched.route.source,
                "fallback": matched.is_fallback(),
                "status": matched.route.response.status.as_u16(),
                "vars": matched.vars,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Status { url, path } => {
            let client = reqwest::Client::new();
            let res = client
                .get(format!("{}{}", url.trim_end_matches('/'), path))
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Load a config file. Validation errors are printed one per line and
/// yield `None` so the caller can exit non-zero.
fn load_checked(path: &Path) -> Result<Option<DeadendConfig>, ConfigError> {
    match load_config(path) {
        Ok(config) => Ok(Some(config)),
        Err(ConfigError::Validation(errors)) => {
            eprint!("{}", validation_report(path, &errors));
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn validation_report(path: &Path, errors: &[ValidationError]) -> String {
    let mut report = format!("{}: {} problem(s)\n", path.display(), errors.len());
    for error in errors {
        report.push_str(&format!("  - {error}\n"));
    }
    report
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if status == reqwest::StatusCode::NO_CONTENT {
        eprintln!("Status endpoint answered 204: this address is not allowed to see the status");
        return Ok(());
    }
    if !status.is_success() {
        eprintln!("Error: status endpoint returned {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
