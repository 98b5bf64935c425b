//! AIConfig CLI
//!
//! Main entry point for the aiconfig command-line tool.
//! Runs and inspects prompts stored in `.aiconfig.json` / `.aiconfig.yaml`
//! documents.

mod commands;

use aiconfig_core::{config::AppConfig, logging};
use clap::{Parser, Subcommand};
use commands::{ListCommand, ResolveCommand, RunCommand};
use std::path::PathBuf;

/// AIConfig CLI - resolve and run prompt documents
#[derive(Parser, Debug)]
#[command(name = "aiconfig")]
#[command(about = "Resolve and run AIConfig prompt documents", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Model used by prompts that name none
    #[arg(short = 'm', long, global = true)]
    default_model: Option<String>,

    /// Per-callback timeout in milliseconds
    #[arg(long, global = true)]
    callback_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a prompt and print its output
    Run(RunCommand),

    /// Print the backend request a prompt resolves to, without running it
    Resolve(ResolveCommand),

    /// List documents in a directory, or the prompts of one document
    List(ListCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Load base configuration from file and environment
    let mut config = AppConfig::load()?;
    if let Some(path) = &cli.config {
        config = config.merge_yaml(path)?;
        config.config_file = Some(path.clone());
    }

    // Apply CLI overrides
    let config = config.with_overrides(
        cli.default_model,
        cli.callback_timeout_ms,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );
    config.validate()?;

    // Initialize logging with final configuration
    logging::init_logging(config.log_level.as_deref(), config.no_color)?;

    tracing::info!("AIConfig CLI starting");
    tracing::debug!("Config file: {:?}", config.config_file);
    tracing::debug!("Default model: {:?}", config.default_model);

    let command_name = match &cli.command {
        Commands::Run(_) => "run",
        Commands::Resolve(_) => "resolve",
        Commands::List(_) => "list",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    // Route to command handlers
    let result = match cli.command {
        Commands::Run(cmd) => cmd.execute(&config).await,
        Commands::Resolve(cmd) => cmd.execute(&config).await,
        Commands::List(cmd) => cmd.execute(&config),
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {:#}", e),
    }

    result
}
