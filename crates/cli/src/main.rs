//! NestClaw CLI: the main entry point.
//!
//! Commands:
//! - `config show`      : Print the effective configuration
//! - `config path`      : Print the config file location
//! - `config validate`  : Validate and summarize the configuration
//! - `config init`      : Write a default config file if none exists

use clap::{Parser, Subcommand};
use nestclaw_config::{AppConfig, LoggingConfig};

mod commands;

#[derive(Parser)]
#[command(
    name = "nestclaw",
    about = "NestClaw, an agent orchestration engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file path
    Path,
    /// Validate the configuration and print a summary
    Validate,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // A broken config file must not prevent `config validate` from reporting it
    let logging = AppConfig::load().map(|c| c.logging).unwrap_or_default();
    init_tracing(&logging, cli.verbose, cli.json);

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
        },
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig, verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { logging.level.as_str() };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false);

    if json || logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
