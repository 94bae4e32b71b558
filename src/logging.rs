//! Tracing bootstrap.
//!
//! Logs go to stderr in the one-shot modes. The TUI owns the terminal, so there
//! they are written to `--log-file` or dropped.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "winsat_viewer=warn",
        1 => "winsat_viewer=info",
        2 => "winsat_viewer=debug",
        _ => "winsat_viewer=trace",
    }
}

/// `RUST_LOG` wins over `-v` when set.
pub(crate) fn init(verbose: u8, log_file: Option<&Path>, interactive: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose)))
        .context("failed to build log filter")?;

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
                .try_init()
                .context("failed to install log subscriber")?;
        }
        None if interactive => {}
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
                .try_init()
                .context("failed to install log subscriber")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_steps_up_to_trace() {
        assert_eq!(default_directive(0), "winsat_viewer=warn");
        assert_eq!(default_directive(2), "winsat_viewer=debug");
        assert_eq!(default_directive(9), "winsat_viewer=trace");
    }
}
