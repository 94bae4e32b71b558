//! Formal assessment runner.
//!
//! At most one `winsat formal` runs at a time. The run lifecycle lives in a
//! watch channel: the trigger is its only writer, UI pollers read the current
//! value and the orchestrator awaits changes for completion.

use super::locator::InterpreterLocator;
use super::process::{self, CapturedOutput, CommandTemplate};
use crate::error::WinsatError;
use crate::model::{AssessmentRun, RunFailure, RunState};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{info, warn};

// winsat.exe must be resolvable or the script fails before anything runs; an
// unset $LASTEXITCODE means winsat never ran. Output is buffered inside
// PowerShell so winsat keeps writing to a live pipe if the viewer quits.
const FORMAL_SCRIPT: &str = r#"$ErrorActionPreference = 'Stop'
$winsat = Get-Command winsat.exe
$ErrorActionPreference = 'Continue'
$out = & $winsat formal 2>&1 | Out-String
$code = $LASTEXITCODE
Write-Output $out
if ($null -eq $code) { exit 1 }
exit $code"#;

/// winsat.exe exit code for "not running with administrator privileges".
const WINSAT_EXIT_NOT_ELEVATED: i32 = 5;

const ELEVATION_MARKERS: [&str; 4] = [
    "requires elevation",
    "administrator privileges",
    "administrative privileges",
    "access is denied",
];

const OUTPUT_TAIL_LINES: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    Rejected(WinsatError),
}

impl TriggerOutcome {
    pub fn started(&self) -> bool {
        matches!(self, TriggerOutcome::Started)
    }

    pub fn rejection(&self) -> Option<&WinsatError> {
        match self {
            TriggerOutcome::Started => None,
            TriggerOutcome::Rejected(e) => Some(e),
        }
    }
}

pub struct AssessmentTrigger {
    locator: Arc<InterpreterLocator>,
    template: CommandTemplate,
    runs: Arc<watch::Sender<AssessmentRun>>,
}

impl AssessmentTrigger {
    pub fn new(locator: Arc<InterpreterLocator>) -> Self {
        Self::with_template(locator, CommandTemplate::powershell(FORMAL_SCRIPT))
    }

    pub fn with_template(locator: Arc<InterpreterLocator>, template: CommandTemplate) -> Self {
        let (runs, _) = watch::channel(AssessmentRun::default());
        Self {
            locator,
            template,
            runs: Arc::new(runs),
        }
    }

    /// Start a formal assessment in the background. Must be called inside a
    /// tokio runtime. Never blocks on the assessment itself.
    pub fn trigger(&self) -> TriggerOutcome {
        let mut claimed = false;
        self.runs.send_if_modified(|run| {
            if run.is_running() {
                return false;
            }
            *run = AssessmentRun::running(OffsetDateTime::now_utc());
            claimed = true;
            true
        });
        if !claimed {
            info!("Assessment trigger rejected: a run is already in progress");
            return TriggerOutcome::Rejected(WinsatError::AlreadyRunning);
        }

        let launched = self
            .locator
            .resolve()
            .and_then(|interp| process::spawn_unowned(&interp.path, &self.template));
        let child = match launched {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "Failed to launch winsat formal");
                publish_end(&self.runs, RunState::Failed(RunFailure::Launch(e.to_string())), None);
                return TriggerOutcome::Rejected(e);
            }
        };

        info!(pid = ?child.id(), "winsat formal started");
        let runs = self.runs.clone();
        tokio::spawn(async move {
            let (state, output) = match process::wait_captured(child, None).await {
                Ok(out) => {
                    let tail = output_tail(&out);
                    (classify(&out), Some(tail))
                }
                Err(e) => (
                    RunState::Failed(RunFailure::NonZeroExit {
                        code: None,
                        detail: e.to_string(),
                    }),
                    None,
                ),
            };
            match &state {
                RunState::Failed(reason) => warn!(reason = %reason.to_message(), "winsat formal failed"),
                _ => info!("winsat formal finished"),
            }
            publish_end(&runs, state, output);
        });

        TriggerOutcome::Started
    }

    pub fn poll_status(&self) -> AssessmentRun {
        self.runs.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AssessmentRun> {
        self.runs.subscribe()
    }
}

fn publish_end(runs: &watch::Sender<AssessmentRun>, state: RunState, output: Option<String>) {
    runs.send_modify(|run| {
        run.state = state;
        run.ended_at = Some(OffsetDateTime::now_utc());
        run.output = output;
    });
}

fn classify(out: &CapturedOutput) -> RunState {
    if out.success {
        return RunState::Succeeded;
    }
    let text = format!("{}\n{}", out.stderr, out.stdout).to_lowercase();
    let detail = last_line(&out.stderr)
        .or_else(|| last_line(&out.stdout))
        .unwrap_or_default();
    if out.exit_code == Some(WINSAT_EXIT_NOT_ELEVATED)
        || ELEVATION_MARKERS.iter().any(|m| text.contains(m))
    {
        let detail = if detail.is_empty() {
            "winsat requires an elevated session".to_string()
        } else {
            detail
        };
        return RunState::Failed(RunFailure::PermissionDenied(detail));
    }
    RunState::Failed(RunFailure::NonZeroExit {
        code: out.exit_code,
        detail,
    })
}

fn last_line(s: &str) -> Option<String> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
}

fn output_tail(out: &CapturedOutput) -> String {
    let lines: Vec<&str> = out.stdout.lines().chain(out.stderr.lines()).collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join("\n")
}
