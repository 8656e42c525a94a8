//! JackTorr - TorrServer supervisor and streaming front-end
//!
//! # Usage
//!
//! ```bash
//! # Keep the daemon running (foreground)
//! jacktorr service
//!
//! # Stream a magnet link to mpv
//! jacktorr play-magnet "magnet:?xt=urn:btih:..."
//!
//! # Scripting
//! jacktorr torrents --json
//! ```

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use jacktorr::cli::{Cli, Command, ExitCode, Output};
use jacktorr::commands;
use jacktorr::config::{DataPaths, Settings};
use jacktorr::context::AppContext;
use jacktorr::host::ConsoleHost;
use jacktorr::logging;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    run_cli(cli).await.into()
}

/// Build the context and run the command
async fn run_cli(cli: Cli) -> ExitCode {
    let output = Output::new(&cli);

    let settings = match &cli.config {
        Some(path) if path.exists() => match Settings::load_from(path) {
            Ok(settings) => settings,
            Err(e) => return output.error(format!("{:#}", e), ExitCode::InvalidArgs),
        },
        Some(_) => Settings::default(),
        None => Settings::load(),
    };

    let paths = DataPaths::new(cli.data_dir.clone().unwrap_or_else(DataPaths::default_root));
    if let Err(e) = logging::init_tracing(logging::level_for_verbosity(cli.verbose), paths.root()) {
        output.info(format!("File logging disabled: {:#}", e));
    }

    // Ctrl-C cancels the current dialog; a second one aborts
    let cancel = CancellationToken::new();
    let abort = CancellationToken::new();
    if !matches!(cli.command, Command::Service) {
        spawn_interrupt_handler(cancel.clone(), abort.clone());
    }

    let host = Arc::new(ConsoleHost::new(output, cancel));
    let mut ctx = AppContext::new(settings, cli.config.clone(), paths, host, abort);
    commands::run(cli.command, &mut ctx, &output).await
}

fn spawn_interrupt_handler(cancel: CancellationToken, abort: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Failed to listen for Ctrl-C");
            return;
        }
        info!("Interrupted, cancelling");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted again, aborting");
            abort.cancel();
        }
    });
}
