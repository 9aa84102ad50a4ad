//! Patcher CLI application
//!
//! Command-line interface for collecting Jamf Pro patch compliance reports.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use patcher::cli::{handle_auth, handle_cache, handle_fetch, handle_reset, Cli, Commands};
use patcher::config::AppConfig;
use patcher::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    // Configuration errors surface again from the command handlers
    let config_level = AppConfig::load(cli.global.config.clone())
        .await
        .ok()
        .and_then(|config| config.logging.level());
    init_logging(&cli, config_level);

    info!("Patcher v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Fetch(args) => {
            info!("Executing fetch command");
            handle_fetch(&cli.global, args).await
        }
        Commands::Cache(args) => {
            info!("Executing cache command");
            handle_cache(&cli.global, args).await
        }
        Commands::Auth(args) => {
            info!("Executing auth command");
            handle_auth(args).await
        }
        Commands::Reset(args) => {
            info!("Executing reset command");
            handle_reset(&cli.global, args).await
        }
    }
}

/// Initialize logging from CLI verbosity flags, then the configured level
fn init_logging(cli: &Cli, config_level: Option<tracing::Level>) {
    let log_level = cli.log_level_or(config_level.unwrap_or(tracing::Level::WARN));

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("patcher={}", log_level).parse() {
        filter = filter.add_directive(directive);
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_level(cli.global.very_verbose) // Show levels only in very verbose mode
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
