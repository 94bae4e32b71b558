use crate::error::WinsatError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;

/// Allowed drift between WinSPRLevel and the lowest component score.
pub const BASE_SCORE_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub query_timeout: Duration,
    pub interpreter_override: Option<PathBuf>,
    pub system_root: PathBuf,
    pub search_path: Vec<PathBuf>,
    pub refresh_on_launch: bool,
}

/// How the PowerShell interpreter path was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionMethod {
    Configured,
    Standard,
    Sysnative,
    SearchPath,
}

impl ResolutionMethod {
    pub fn label(self) -> &'static str {
        match self {
            ResolutionMethod::Configured => "configured",
            ResolutionMethod::Standard => "standard",
            ResolutionMethod::Sysnative => "sysnative",
            ResolutionMethod::SearchPath => "path",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterPath {
    pub path: PathBuf,
    pub method: ResolutionMethod,
}

/// Win32_WinSAT.WinSATAssessmentState.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssessmentState {
    Unknown,
    Valid,
    Incoherent,
    NotAvailable,
    Invalid,
    Other(u32),
}

impl AssessmentState {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => AssessmentState::Unknown,
            1 => AssessmentState::Valid,
            2 => AssessmentState::Incoherent,
            3 => AssessmentState::NotAvailable,
            4 => AssessmentState::Invalid,
            n => AssessmentState::Other(n),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            AssessmentState::Unknown => 0,
            AssessmentState::Valid => 1,
            AssessmentState::Incoherent => 2,
            AssessmentState::NotAvailable => 3,
            AssessmentState::Invalid => 4,
            AssessmentState::Other(n) => n,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AssessmentState::Unknown => "Unknown",
            AssessmentState::Valid => "Valid",
            AssessmentState::Incoherent => "Incoherent with hardware",
            AssessmentState::NotAvailable => "No assessment available",
            AssessmentState::Invalid => "Invalid",
            AssessmentState::Other(_) => "Unrecognized",
        }
    }
}

/// One snapshot of Win32_WinSAT, as returned by a single query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreRecord {
    pub cpu_score: Option<f64>,
    pub memory_score: Option<f64>,
    pub disk_score: Option<f64>,
    pub graphics_score: Option<f64>,
    pub d3d_score: Option<f64>,
    pub base_score: Option<f64>,
    pub assessment_state: Option<AssessmentState>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub assessment_timestamp: Option<OffsetDateTime>,
    /// `TimeTaken` as the provider reported it.
    pub time_taken: Option<String>,
    #[serde(skip)]
    pub raw_payload: String,
}

impl ScoreRecord {
    pub fn components(&self) -> [Option<f64>; 5] {
        [
            self.cpu_score,
            self.memory_score,
            self.disk_score,
            self.graphics_score,
            self.d3d_score,
        ]
    }

    /// Lowest component score, only when every component was measured.
    pub fn expected_base_score(&self) -> Option<f64> {
        self.components()
            .into_iter()
            .try_fold(f64::INFINITY, |min, v| v.map(|v| min.min(v)))
    }

    /// `None` when either side of the comparison is missing.
    pub fn base_score_consistent(&self) -> Option<bool> {
        let expected = self.expected_base_score()?;
        let base = self.base_score?;
        Some((expected - base).abs() <= BASE_SCORE_TOLERANCE)
    }

    pub fn raw_json(&self) -> &str {
        &self.raw_payload
    }
}

/// Why a formal assessment did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunFailure {
    PermissionDenied(String),
    NonZeroExit { code: Option<i32>, detail: String },
    Launch(String),
}

impl RunFailure {
    pub fn to_message(&self) -> String {
        match self {
            RunFailure::PermissionDenied(detail) => {
                format!("administrator privileges required ({detail})")
            }
            RunFailure::NonZeroExit { code: Some(c), detail } if !detail.is_empty() => {
                format!("winsat exited with code {c}: {detail}")
            }
            RunFailure::NonZeroExit { code: Some(c), .. } => format!("winsat exited with code {c}"),
            RunFailure::NonZeroExit { code: None, .. } => "winsat was terminated".to_string(),
            RunFailure::Launch(detail) => format!("could not start winsat: {detail}"),
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self {
            RunFailure::PermissionDenied(_) => Some(crate::error::ELEVATION_HINT),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Succeeded,
    Failed(RunFailure),
}

impl RunState {
    pub fn label(&self) -> &'static str {
        match self {
            RunState::Idle => "Idle",
            RunState::Running => "Running",
            RunState::Succeeded => "Succeeded",
            RunState::Failed(_) => "Failed",
        }
    }
}

/// Lifecycle of the most recent `winsat formal` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentRun {
    pub state: RunState,
    pub started_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
    /// Tail of the tool's console output, once the run has ended.
    pub output: Option<String>,
}

impl Default for AssessmentRun {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            started_at: None,
            ended_at: None,
            output: None,
        }
    }
}

impl AssessmentRun {
    pub fn running(now: OffsetDateTime) -> Self {
        Self {
            state: RunState::Running,
            started_at: Some(now),
            ended_at: None,
            output: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn duration(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.ended_at.unwrap_or_else(OffsetDateTime::now_utc);
        (end - start).try_into().ok()
    }
}

#[derive(Debug, Clone)]
pub enum ViewerEvent {
    InterpreterResolved(InterpreterPath),
    InterpreterMissing(WinsatError),
    QueryStarted,
    ScoresUpdated {
        // Boxed to keep the event small; the record carries the raw payload.
        record: Box<ScoreRecord>,
    },
    /// Provider JSON of the last successful query, sent after `ScoresUpdated`.
    RawJsonUpdated(String),
    QueryFailed(WinsatError),
    AssessmentChanged(AssessmentRun),
    AssessmentRejected(WinsatError),
    Info(InfoEvent),
}

/// Structured info events emitted by the orchestrator and consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    Message(String),
    QueryInFlight,
    RefreshAfterAssessment,
}

impl InfoEvent {
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::QueryInFlight => "A query is already in progress".to_string(),
            InfoEvent::RefreshAfterAssessment => {
                "Assessment finished, re-querying Win32_WinSAT…".to_string()
            }
        }
    }
}
