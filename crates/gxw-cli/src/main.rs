//! GXW CLI - Main entry point

use clap::Parser;
use gxw_cli::{commands, Cli, Commands, GxwConfig};
use gxw_common::logging::init_logging;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    let config = match GxwConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    // Environment variables take precedence over the config file
    let log_config = config.to_log_config(cli.verbose);
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI works without logging; the guard flushes file output on exit
    let _guard = init_logging(&log_config).ok().flatten();

    // Execute command
    let result = execute_command(&cli, &config).await;

    // Handle result
    if let Err(e) = result {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: &Cli, config: &GxwConfig) -> gxw_cli::Result<()> {
    match &cli.command {
        Commands::Run { run_id, json } => commands::run::run(config, run_id.clone(), *json).await,

        Commands::Resume { run_id, json } => commands::resume::run(config, run_id, *json).await,

        Commands::Rollback { run_id } => commands::rollback::run(config, run_id).await,

        Commands::Validate {
            input_dir,
            gene_filter,
        } => commands::validate::run(config, input_dir.clone(), gene_filter.clone()).await,

        Commands::Report { run_id, json } => commands::report::run(config, run_id, *json).await,

        Commands::Status { limit } => commands::status::run(config, *limit).await,

        Commands::Correlate { studies, json } => {
            commands::correlate::run(config, studies, *json).await
        }
    }
}
