use crate::cli::describe;
use crate::model::{
    AssessmentRun, InterpreterPath, RunFailure, RunState, ScoreRecord, ViewerEvent,
};
use std::collections::VecDeque;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

const MAX_LOG_LINES: usize = 500;

pub const TAB_SCORES: usize = 0;
pub const TAB_RAW: usize = 1;
pub const TAB_HELP: usize = 2;
pub const TAB_COUNT: usize = 3;

/// Everything the UI thread renders. Owned by the UI thread only.
pub struct UiState {
    pub tab: usize,
    pub info: String,

    pub interpreter: Option<InterpreterPath>,
    pub interpreter_error: Option<String>,

    pub record: Option<ScoreRecord>,
    raw_json: Option<String>,
    pub querying: bool,
    pub last_query_at: Option<OffsetDateTime>,
    pub query_error: Option<String>,

    pub run: AssessmentRun,

    pub log: VecDeque<String>,
    pub raw_scroll: u16,
    local_offset: UtcOffset,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: TAB_SCORES,
            info: String::new(),
            interpreter: None,
            interpreter_error: None,
            record: None,
            raw_json: None,
            querying: false,
            last_query_at: None,
            query_error: None,
            run: AssessmentRun::default(),
            log: VecDeque::new(),
            raw_scroll: 0,
            // Resolve once; the offset lookup can fail once other threads exist.
            local_offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        }
    }
}

impl UiState {
    pub fn clock(&self, at: OffsetDateTime) -> String {
        at.to_offset(self.local_offset)
            .format(format_description!("[hour]:[minute]:[second]"))
            .unwrap_or_default()
    }

    /// Append to the activity log and mirror the message in the info row.
    pub fn push_log(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        let stamp = self.clock(OffsetDateTime::now_utc());
        // Multi-line errors (hints) log line by line.
        for (i, line) in msg.lines().enumerate() {
            let entry = if i == 0 {
                format!("[{stamp}] {line}")
            } else {
                format!("           {line}")
            };
            self.log.push_back(entry);
        }
        while self.log.len() > MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.info = msg.lines().next().unwrap_or_default().to_string();
    }

    pub fn raw_json(&self) -> Option<&str> {
        self.raw_json.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn apply_event(&mut self, ev: ViewerEvent) {
        match ev {
            ViewerEvent::InterpreterResolved(path) => {
                self.push_log(format!(
                    "PowerShell: {} ({})",
                    path.path.display(),
                    path.method.label()
                ));
                self.interpreter = Some(path);
                self.interpreter_error = None;
            }
            ViewerEvent::InterpreterMissing(e) => {
                self.interpreter = None;
                self.interpreter_error = Some(e.to_string());
                self.push_log(describe(&e));
            }
            ViewerEvent::QueryStarted => {
                self.querying = true;
                self.push_log("Querying Win32_WinSAT…");
            }
            ViewerEvent::ScoresUpdated { record } => {
                self.querying = false;
                self.query_error = None;
                self.last_query_at = Some(OffsetDateTime::now_utc());
                let base = crate::text_summary::fmt_score(record.base_score);
                self.push_log(format!("Scores updated (base score {base})"));
                if let Some(note) = crate::text_summary::base_score_note(&record) {
                    self.push_log(format!("Base score {base}: {note}"));
                }
                self.record = Some(*record);
            }
            ViewerEvent::RawJsonUpdated(raw) => {
                self.raw_json = Some(raw);
                self.raw_scroll = 0;
            }
            ViewerEvent::QueryFailed(e) => {
                // Keep the previous scores on screen.
                self.querying = false;
                self.query_error = Some(e.to_string());
                self.push_log(format!("Query failed: {}", describe(&e)));
            }
            ViewerEvent::AssessmentChanged(run) => {
                self.log_run(&run);
                self.run = run;
            }
            ViewerEvent::AssessmentRejected(e) => {
                self.push_log(format!("Assessment not started: {}", describe(&e)));
            }
            ViewerEvent::Info(info) => self.push_log(info.to_message()),
        }
    }

    fn log_run(&mut self, run: &AssessmentRun) {
        match &run.state {
            RunState::Idle => {}
            RunState::Running => {
                self.push_log("winsat formal started, this usually takes a few minutes");
            }
            RunState::Succeeded => {
                self.push_output(run);
                self.push_log(format!("winsat formal finished in {}", fmt_elapsed(run)));
            }
            // Already logged from the matching AssessmentRejected event.
            RunState::Failed(RunFailure::Launch(_)) => {}
            RunState::Failed(failure) => {
                self.push_output(run);
                let mut msg = format!("Assessment failed: {}", failure.to_message());
                if let Some(hint) = failure.hint() {
                    msg.push_str(&format!("\nHint: {hint}"));
                }
                self.push_log(msg);
            }
        }
    }

    fn push_output(&mut self, run: &AssessmentRun) {
        let Some(output) = run.output.as_deref() else {
            return;
        };
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            self.log.push_back(format!("    {line}"));
        }
        while self.log.len() > MAX_LOG_LINES {
            self.log.pop_front();
        }
    }
}

/// Whole seconds, humantime style (`3m 12s`).
pub fn fmt_elapsed(run: &AssessmentRun) -> String {
    match run.duration() {
        Some(d) => humantime::format_duration(std::time::Duration::from_secs(d.as_secs())).to_string(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WinsatError;
    use crate::model::{InfoEvent, ResolutionMethod};
    use std::path::PathBuf;

    fn record(base: f64) -> ScoreRecord {
        ScoreRecord {
            cpu_score: Some(8.9),
            memory_score: Some(8.9),
            disk_score: Some(8.2),
            graphics_score: Some(6.6),
            d3d_score: Some(9.9),
            base_score: Some(base),
            assessment_state: None,
            assessment_timestamp: None,
            time_taken: None,
            raw_payload: r#"{"CPUScore": 8.9}"#.into(),
        }
    }

    #[test]
    fn failed_query_keeps_previous_scores() {
        let mut s = UiState::default();
        s.apply_event(ViewerEvent::QueryStarted);
        assert!(s.querying);
        s.apply_event(ViewerEvent::ScoresUpdated {
            record: Box::new(record(6.6)),
        });
        assert!(!s.querying);
        assert_eq!(s.raw_json(), None);
        s.apply_event(ViewerEvent::RawJsonUpdated(r#"{"CPUScore": 8.9}"#.into()));
        assert_eq!(s.raw_json(), Some(r#"{"CPUScore": 8.9}"#));

        s.apply_event(ViewerEvent::QueryFailed(WinsatError::Parse {
            reason: "bad".into(),
        }));
        assert_eq!(s.record.as_ref().and_then(|r| r.base_score), Some(6.6));
        assert!(s.query_error.is_some());
        assert!(s.info.starts_with("Query failed"));
    }

    #[test]
    fn missing_interpreter_logs_hint() {
        let mut s = UiState::default();
        s.apply_event(ViewerEvent::InterpreterMissing(WinsatError::NotFound {
            tried: vec![PathBuf::from("a")],
        }));
        assert!(s.interpreter.is_none());
        assert!(s.log.iter().any(|l| l.contains("--powershell")));

        s.apply_event(ViewerEvent::InterpreterResolved(InterpreterPath {
            path: PathBuf::from("powershell.exe"),
            method: ResolutionMethod::SearchPath,
        }));
        assert!(s.interpreter_error.is_none());
    }

    #[test]
    fn permission_failure_suggests_elevation() {
        let mut s = UiState::default();
        let mut run = AssessmentRun::running(OffsetDateTime::now_utc());
        run.state = RunState::Failed(RunFailure::PermissionDenied("not elevated".into()));
        run.ended_at = run.started_at;
        run.output = Some("line one\n\nline two".into());
        s.apply_event(ViewerEvent::AssessmentChanged(run));

        assert!(s.log.iter().any(|l| l.contains("elevated (Administrator)")));
        assert_eq!(s.log.iter().filter(|l| l.starts_with("    line")).count(), 2);
        assert_eq!(s.run.state.label(), "Failed");
    }

    #[test]
    fn log_is_bounded() {
        let mut s = UiState::default();
        for _ in 0..(MAX_LOG_LINES + 20) {
            s.apply_event(ViewerEvent::Info(InfoEvent::QueryInFlight));
        }
        assert_eq!(s.log.len(), MAX_LOG_LINES);
    }
}
