//! Jsonnet debugger - step through Jsonnet programs from a REPL or an editor
//!
//! The `repl` subcommand debugs one program interactively; `dap` serves the
//! Debug Adapter Protocol over stdio or TCP; `test` runs YAML scenarios.

use std::path::PathBuf;

use clap::Parser;
use jsonnet_debugger::commands::Commands;
use jsonnet_debugger::common::config::Config;
use jsonnet_debugger::common::logging;
use jsonnet_debugger::{cli, Result};

#[derive(Parser)]
#[command(name = "jsonnet-debugger", about = "Interactive Jsonnet debugger")]
#[command(version, long_about = None)]
struct Cli {
    /// Log level: trace, debug, info, warn, error (RUST_LOG overrides)
    #[arg(short = 'l', long, global = true)]
    log_level: Option<String>,

    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let requested = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let Some(level) = logging::parse_level(requested) else {
        eprintln!("Error: invalid log level '{requested}' (expected trace, debug, info, warn or error)");
        std::process::exit(2);
    };

    // stdout carries the protocol in DAP mode, so logs go to a file there
    let guard = match &cli.command {
        Commands::Dap { log_file, .. } => {
            let file = log_file.clone().or_else(|| config.logging.file.clone());
            let (path, guard) = logging::init_dap(level, file);
            if let Some(path) = path {
                tracing::info!(log = %path.display(), "DAP logging initialized");
            }
            guard
        }
        _ => {
            logging::init_repl(level);
            None
        }
    };

    let code = match cli::dispatch(cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            1
        }
    };

    drop(guard);
    std::process::exit(code);
}
