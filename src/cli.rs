use crate::engine::WinsatEngine;
use crate::error::WinsatError;
use crate::model::{RunState, ViewerConfig};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "winsat-viewer",
    version,
    about = "View Windows Experience Index (WinSAT) scores, with optional TUI"
)]
pub struct Cli {
    /// Print a text summary and exit (no TUI)
    #[arg(long, conflicts_with_all = ["json", "raw"])]
    pub text: bool,

    /// Print the score record as JSON and exit (no TUI)
    #[arg(long, conflicts_with = "raw")]
    pub json: bool,

    /// Print the provider's raw JSON and exit (no TUI)
    #[arg(long)]
    pub raw: bool,

    /// Run `winsat formal` before querying (text/json/raw modes; needs an elevated terminal)
    #[arg(long)]
    pub run_assessment: bool,

    /// Wall-clock limit for one score query
    #[arg(long, default_value = "10s")]
    pub query_timeout: humantime::Duration,

    /// Use this powershell.exe instead of searching for one
    #[arg(long, value_name = "PATH")]
    pub powershell: Option<PathBuf>,

    /// Query scores when the TUI starts. Use --refresh-on-launch false to disable
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub refresh_on_launch: bool,

    /// Append logs to this file (the only log destination in TUI mode)
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn is_interactive(&self) -> bool {
        self.output_mode().is_none()
    }

    fn output_mode(&self) -> Option<OutputMode> {
        if self.json {
            Some(OutputMode::Json)
        } else if self.raw {
            Some(OutputMode::Raw)
        } else if self.text {
            Some(OutputMode::Text)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Text,
    Json,
    Raw,
}

pub async fn run(args: Cli) -> Result<()> {
    let mode = args.output_mode();

    if args.run_assessment && mode.is_none() {
        return Err(anyhow::anyhow!(
            "--run-assessment needs --text, --json or --raw. In the TUI press 'a' instead."
        ));
    }

    crate::logging::init(args.verbose, args.log_file.as_deref(), mode.is_none())?;

    match mode {
        Some(mode) => run_once(args, mode).await,
        None => {
            #[cfg(feature = "tui")]
            {
                crate::tui::run(args).await
            }
            #[cfg(not(feature = "tui"))]
            {
                // Fallback when built without TUI support.
                run_once(args, OutputMode::Text).await
            }
        }
    }
}

/// Build a `ViewerConfig` from CLI arguments and the process environment.
pub fn build_config(args: &Cli) -> ViewerConfig {
    let system_root = std::env::var_os("SystemRoot")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Windows"));
    let search_path = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();

    ViewerConfig {
        query_timeout: Duration::from(args.query_timeout),
        interpreter_override: args.powershell.clone(),
        system_root,
        search_path,
        refresh_on_launch: args.refresh_on_launch,
    }
}

/// Error text plus the actionable hint, when there is one.
pub(crate) fn describe(e: &WinsatError) -> String {
    match e.hint() {
        Some(hint) => format!("{e}\nHint: {hint}"),
        None => e.to_string(),
    }
}

async fn run_once(args: Cli, mode: OutputMode) -> Result<()> {
    let cfg = build_config(&args);
    let engine = WinsatEngine::new(&cfg);
    let (out_tx, out_handle) = spawn_output_writer();

    let res = query_and_print(&args, mode, &engine, &out_tx).await;

    drop(out_tx);
    let _ = out_handle.await;
    res
}

async fn query_and_print(
    args: &Cli,
    mode: OutputMode,
    engine: &WinsatEngine,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    let interpreter = engine
        .interpreter()
        .map_err(|e| anyhow::anyhow!(describe(&e)))?;

    if args.run_assessment {
        run_assessment(engine, out_tx).await?;
    }

    let record = engine
        .query()
        .await
        .map_err(|e| anyhow::anyhow!(describe(&e)))
        .context("failed to query Win32_WinSAT")?;

    match mode {
        OutputMode::Text => {
            let summary = crate::text_summary::build_text_summary(&record, Some(&interpreter));
            for line in summary.lines {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        }
        OutputMode::Json => {
            let out = serde_json::to_string_pretty(&record)?;
            let _ = out_tx.send(OutputLine::Stdout(out));
        }
        OutputMode::Raw => {
            let _ = out_tx.send(OutputLine::Stdout(record.raw_json().trim().to_string()));
        }
    }
    Ok(())
}

const PROGRESS_EVERY: Duration = Duration::from_secs(30);

/// Start `winsat formal` and wait for it, printing progress to stderr.
async fn run_assessment(
    engine: &WinsatEngine,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    let outcome = engine.trigger_assessment();
    if let Some(e) = outcome.rejection() {
        return Err(anyhow::anyhow!(describe(e))).context("failed to start winsat formal");
    }
    let _ = out_tx.send(OutputLine::Stderr(
        "Running winsat formal, this usually takes a few minutes…".to_string(),
    ));

    let mut runs = engine.subscribe_runs();
    let mut ticker = tokio::time::interval(PROGRESS_EVERY);
    ticker.tick().await;

    loop {
        let run = runs.borrow_and_update().clone();
        if !run.is_running() {
            let elapsed = run
                .duration()
                .map(|d| humantime::format_duration(Duration::from_secs(d.as_secs())).to_string())
                .unwrap_or_else(|| "-".to_string());
            return match run.state {
                RunState::Succeeded => {
                    let _ = out_tx.send(OutputLine::Stderr(format!(
                        "Assessment finished in {elapsed}"
                    )));
                    Ok(())
                }
                RunState::Failed(failure) => {
                    if let Some(tail) = run.output.as_deref() {
                        for line in tail.lines() {
                            let _ = out_tx.send(OutputLine::Stderr(format!("  {line}")));
                        }
                    }
                    let hint = failure
                        .hint()
                        .map(|h| format!("\nHint: {h}"))
                        .unwrap_or_default();
                    Err(anyhow::anyhow!("assessment failed: {}{hint}", failure.to_message()))
                }
                RunState::Idle | RunState::Running => Err(anyhow::anyhow!(
                    "assessment state was reset before it finished"
                )),
            };
        }

        tokio::select! {
            changed = runs.changed() => {
                changed.context("assessment tracker went away")?;
            }
            _ = ticker.tick() => {
                let secs = engine
                    .current_run_state()
                    .duration()
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "Still assessing… ({})",
                    humantime::format_duration(Duration::from_secs(secs))
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_mode_flags() {
        let args = Cli::try_parse_from(["winsat-viewer", "--json"]).unwrap();
        assert_eq!(args.output_mode(), Some(OutputMode::Json));
        let args = Cli::try_parse_from(["winsat-viewer"]).unwrap();
        assert!(args.is_interactive());
        assert!(Cli::try_parse_from(["winsat-viewer", "--text", "--raw"]).is_err());
    }

    #[test]
    fn config_carries_flags() {
        let args = Cli::try_parse_from([
            "winsat-viewer",
            "--text",
            "--query-timeout",
            "3s",
            "--powershell",
            "C:/pwsh/powershell.exe",
            "--refresh-on-launch",
            "false",
            "-vv",
        ])
        .unwrap();
        let cfg = build_config(&args);
        assert_eq!(cfg.query_timeout, Duration::from_secs(3));
        assert_eq!(
            cfg.interpreter_override,
            Some(PathBuf::from("C:/pwsh/powershell.exe"))
        );
        assert!(!cfg.refresh_on_launch);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn default_query_timeout_is_ten_seconds() {
        let args = Cli::try_parse_from(["winsat-viewer"]).unwrap();
        assert_eq!(build_config(&args).query_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn run_assessment_requires_one_shot_mode() {
        let args = Cli::try_parse_from(["winsat-viewer", "--run-assessment"]).unwrap();
        let err = run(args).await.unwrap_err();
        assert!(err.to_string().contains("--run-assessment"));
    }

    #[test]
    fn describe_appends_hint() {
        let e = WinsatError::PermissionDenied {
            detail: "exit code 5".into(),
        };
        assert!(describe(&e).contains("Hint: Run winsat-viewer from an elevated"));
        assert_eq!(describe(&WinsatError::AlreadyRunning), "an assessment is already running");
    }
}
