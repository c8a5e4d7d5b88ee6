mod cli;
mod config;
mod engine;
mod error;
mod logging;
mod model;
mod orchestrator;
mod portal;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;
use logging::LogSink;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_tui = args.is_tui();
    logging::init(if is_tui { LogSink::File } else { LogSink::Stderr })?;

    match cli::run(args).await {
        Ok(()) => {
            // Explicitly exit with code 0 on success, especially for non-TUI modes
            if !is_tui {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => {
            if is_tui {
                tracing::error!("{e:#}");
            }
            Err(e)
        }
    }
}
