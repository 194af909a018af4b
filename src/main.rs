//! subsys - composition engine CLI
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use subsys::cli::{Cli, Commands};
use subsys::config::{ConfigManager, LogFormat};
use subsys::error::ComposeResult;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ComposeResult<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::resolve(cli.config.clone());
    let config = config_manager.load().await?;

    // 0 = warn, 1 = info, 2+ = debug; general.verbose raises the floor to info
    let verbosity = cli.verbose.max(u8::from(config.general.verbose));
    let filter = match verbosity {
        0 => EnvFilter::new("subsys=warn"),
        1 => EnvFilter::new("subsys=info"),
        _ => EnvFilter::new("subsys=debug"),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match config.general.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.without_time().init(),
    }

    match cli.command {
        Commands::Plan(args) => subsys::cli::commands::plan(args, &config).await,
        Commands::Check(args) => subsys::cli::commands::check(args, &config).await,
        Commands::Config(args) => {
            subsys::cli::commands::config(args, &config_manager, &config).await
        }
    }
}
