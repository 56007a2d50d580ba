//! Sluice demo service.
//!
//! Serves the standard pipeline configured from a file and `SLUICE__*`
//! environment variables.

use std::path::PathBuf;

use tracing::{error, info};

use sluice::{App, ConfigLoader, SluiceConfig};
use sluice_telemetry::init_logging;

/// Configuration file read when `--config` is not given, if present.
const DEFAULT_CONFIG_FILE: &str = "sluice.toml";

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("sluice {}", sluice::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r#"Sluice - HTTP request pipeline with per-client rate limiting

USAGE:
    sluice [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    SLUICE__SERVER__HTTP_ADDR            Bind address (default: 0.0.0.0:8080)
    SLUICE__LOGGING__LEVEL               Log filter directive (default: info)
    SLUICE__LOGGING__FORMAT              json, pretty or compact
    SLUICE__RATE_LIMITING__ENABLED       Enable rate limiting (default: true)
    SLUICE__RATE_LIMITING__RULES         Rules as a JSON array

    A .env file in the working directory is loaded first.

EXAMPLES:
    # Run with a configuration file
    sluice --config /etc/sluice/sluice.toml

    # Ten requests per second per client
    SLUICE__RATE_LIMITING__RULES='[{{"endpoint":"*","limit":10,"period":"1s"}}]' sluice
"#
    );
}

fn load_config(path: Option<PathBuf>) -> Result<SluiceConfig, sluice::AppError> {
    let loader = ConfigLoader::new().with_defaults().with_dotenv()?;
    let loader = match path {
        Some(path) => loader.with_file(path)?,
        None => loader.with_optional_file(DEFAULT_CONFIG_FILE)?,
    };
    Ok(loader.with_env_prefix("SLUICE").load()?)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.logging.to_log_config()) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    info!(
        version = sluice::VERSION,
        service = %config.logging.service_name,
        addr = %config.server.http_addr,
        rules = config.rate_limiting.rules.len(),
        "Starting Sluice"
    );

    let app = match App::from_config(config) {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "Failed to build pipeline");
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
