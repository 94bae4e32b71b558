mod cli;
mod engine;
mod error;
mod logging;
mod model;
#[cfg(feature = "tui")]
mod orchestrator;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_non_tui = !args.is_interactive();

    match cli::run(args).await {
        Ok(()) => {
            // Exit right away in one-shot modes; a finished query leaves nothing to wait for.
            if is_non_tui {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
