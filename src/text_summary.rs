//! Text summary builder for CLI output.
//!
//! This module formats a score record into human-readable lines for text mode.
//! The TUI reuses the row labels and score formatting.

use crate::model::{InterpreterPath, ScoreRecord};
use time::format_description::well_known::Rfc3339;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Absent scores render as `-`, never as zero.
pub(crate) fn fmt_score(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{v:.1}"),
        None => "-".to_string(),
    }
}

/// Component rows in display order.
pub(crate) fn score_rows(record: &ScoreRecord) -> [(&'static str, Option<f64>); 5] {
    [
        ("Processor (CPUScore)", record.cpu_score),
        ("Memory (MemoryScore)", record.memory_score),
        ("Graphics (GraphicsScore)", record.graphics_score),
        ("Gaming graphics (D3DScore)", record.d3d_score),
        ("Primary disk (DiskScore)", record.disk_score),
    ]
}

pub(crate) fn fmt_state(record: &ScoreRecord) -> String {
    match record.assessment_state {
        Some(s) => format!("{} ({})", s.label(), s.code()),
        None => "-".to_string(),
    }
}

/// Timestamp when the provider gave one, otherwise the raw `TimeTaken` text.
pub(crate) fn fmt_assessed(record: &ScoreRecord) -> String {
    if let Some(ts) = record.assessment_timestamp {
        if let Ok(s) = ts.format(&Rfc3339) {
            return s;
        }
    }
    record.time_taken.clone().unwrap_or_else(|| "-".to_string())
}

/// Note appended to the base score when it disagrees with the lowest component.
pub(crate) fn base_score_note(record: &ScoreRecord) -> Option<String> {
    match record.base_score_consistent() {
        Some(false) => Some(format!(
            "lowest component is {}, not yet recomputed by Windows",
            fmt_score(record.expected_base_score())
        )),
        _ => None,
    }
}

pub(crate) fn build_text_summary(
    record: &ScoreRecord,
    interpreter: Option<&InterpreterPath>,
) -> TextSummary {
    let mut lines = Vec::new();

    if let Some(interp) = interpreter {
        lines.push(format!(
            "PowerShell: {} ({})",
            interp.path.display(),
            interp.method.label()
        ));
    }

    let base = fmt_score(record.base_score);
    match base_score_note(record) {
        Some(note) => lines.push(format!("Base score (WinSPRLevel): {base} ({note})")),
        None => lines.push(format!("Base score (WinSPRLevel): {base}")),
    }
    for (label, value) in score_rows(record) {
        lines.push(format!("{label}: {}", fmt_score(value)));
    }
    lines.push(format!("Assessment state: {}", fmt_state(record)));
    lines.push(format!("Assessed: {}", fmt_assessed(record)));

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssessmentState, ResolutionMethod};
    use std::path::PathBuf;

    fn record() -> ScoreRecord {
        ScoreRecord {
            cpu_score: Some(8.9),
            memory_score: Some(8.9),
            disk_score: Some(8.2),
            graphics_score: Some(6.6),
            d3d_score: None,
            base_score: Some(6.6),
            assessment_state: Some(AssessmentState::Valid),
            assessment_timestamp: None,
            time_taken: Some("MostRecentAssessment".into()),
            raw_payload: String::new(),
        }
    }

    #[test]
    fn missing_scores_render_as_dash() {
        let s = build_text_summary(&record(), None);
        assert!(s.lines.contains(&"Gaming graphics (D3DScore): -".to_string()));
        assert!(s.lines.contains(&"Base score (WinSPRLevel): 6.6".to_string()));
        assert!(s.lines.contains(&"Assessment state: Valid (1)".to_string()));
        assert!(s.lines.contains(&"Assessed: MostRecentAssessment".to_string()));
    }

    #[test]
    fn stale_base_score_gets_a_note() {
        let mut r = record();
        r.d3d_score = Some(9.9);
        r.base_score = Some(7.0);
        let interp = InterpreterPath {
            path: PathBuf::from("powershell.exe"),
            method: ResolutionMethod::SearchPath,
        };
        let s = build_text_summary(&r, Some(&interp));
        assert_eq!(s.lines[0], "PowerShell: powershell.exe (path)");
        assert!(s.lines[1].contains("lowest component is 6.6"));
    }
}
