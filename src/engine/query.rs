//! Win32_WinSAT query: one PowerShell invocation, one JSON object, one record.

use super::process::{self, CommandTemplate};
use crate::error::WinsatError;
use crate::model::{AssessmentState, InterpreterPath, ScoreRecord};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::{debug, info, warn};

// Windows 10 exposes WinSATAssessmentState, not AssessmentState.
const QUERY_SCRIPT: &str = r#"$ErrorActionPreference = 'Stop'
try { $w = Get-CimInstance -ClassName Win32_WinSAT -Namespace root\cimv2 }
catch { $w = Get-WmiObject -Class Win32_WinSAT -Namespace root\cimv2 }
if (-not $w) { throw 'No Win32_WinSAT instance returned. WinSAT may not be available on this system.' }
$w | Sort-Object -Property TimeTaken -Descending -ErrorAction SilentlyContinue |
  Select-Object -First 1 |
  Select-Object CPUScore, D3DScore, DiskScore, MemoryScore, GraphicsScore, WinSPRLevel, TimeTaken, WinSATAssessmentState |
  ConvertTo-Json -Depth 3"#;

const EXPECTED_FIELDS: [&str; 8] = [
    "CPUScore",
    "MemoryScore",
    "DiskScore",
    "GraphicsScore",
    "D3DScore",
    "WinSPRLevel",
    "WinSATAssessmentState",
    "TimeTaken",
];

#[derive(Debug, Deserialize)]
struct ProviderRecord {
    #[serde(rename = "CPUScore", default)]
    cpu_score: Option<f64>,
    #[serde(rename = "MemoryScore", default)]
    memory_score: Option<f64>,
    #[serde(rename = "DiskScore", default)]
    disk_score: Option<f64>,
    #[serde(rename = "GraphicsScore", default)]
    graphics_score: Option<f64>,
    #[serde(rename = "D3DScore", default)]
    d3d_score: Option<f64>,
    #[serde(rename = "WinSPRLevel", default)]
    base_score: Option<f64>,
    #[serde(rename = "WinSATAssessmentState", default)]
    assessment_state: Option<u32>,
    #[serde(rename = "TimeTaken", default)]
    time_taken: Option<Value>,
}

pub struct QueryExecutor {
    template: CommandTemplate,
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryExecutor {
    pub fn new() -> Self {
        Self::with_template(CommandTemplate::powershell(QUERY_SCRIPT))
    }

    pub fn with_template(template: CommandTemplate) -> Self {
        Self { template }
    }

    pub async fn query(
        &self,
        interpreter: &InterpreterPath,
        timeout: Duration,
    ) -> Result<ScoreRecord, WinsatError> {
        info!(
            interpreter = %interpreter.path.display(),
            timeout_ms = timeout.as_millis() as u64,
            "Querying Win32_WinSAT"
        );
        let child = process::spawn(&interpreter.path, &self.template)?;
        let out = process::wait_captured(child, Some(timeout)).await?;

        if !out.success {
            let stderr = if out.stderr.trim().is_empty() {
                out.stdout.trim().to_string()
            } else {
                out.stderr.trim().to_string()
            };
            return Err(WinsatError::Execution {
                exit_code: out.exit_code,
                stderr,
            });
        }

        let body = out.stdout.trim();
        if body.is_empty() {
            let stderr = out.stderr.trim();
            return Err(WinsatError::Execution {
                exit_code: out.exit_code,
                stderr: if stderr.is_empty() {
                    "PowerShell returned no output".to_string()
                } else {
                    stderr.to_string()
                },
            });
        }

        let record = parse_score_record(body)?;
        debug!(elapsed_ms = out.elapsed.as_millis() as u64, "Win32_WinSAT parsed");
        Ok(record)
    }
}

/// Parse `ConvertTo-Json` output into a record. Missing or null scores stay `None`.
pub fn parse_score_record(raw: &str) -> Result<ScoreRecord, WinsatError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| WinsatError::Parse {
        reason: format!("invalid JSON: {e}"),
    })?;

    // A single instance comes back as an object; tolerate a one-element array too.
    let object = match value {
        Value::Object(_) => value,
        Value::Array(items) => items.into_iter().next().ok_or_else(|| WinsatError::Parse {
            reason: "provider returned an empty array".into(),
        })?,
        other => {
            return Err(WinsatError::Parse {
                reason: format!("expected a JSON object, got {}", json_type(&other)),
            })
        }
    };

    let Some(map) = object.as_object() else {
        return Err(WinsatError::Parse {
            reason: format!("expected a JSON object, got {}", json_type(&object)),
        });
    };
    if !EXPECTED_FIELDS.iter().any(|k| map.contains_key(*k)) {
        return Err(WinsatError::Parse {
            reason: "none of the Win32_WinSAT fields are present".into(),
        });
    }

    let rec: ProviderRecord = serde_json::from_value(object).map_err(|e| WinsatError::Parse {
        reason: e.to_string(),
    })?;

    let time_taken = rec.time_taken.as_ref().and_then(time_taken_text);
    let assessment_timestamp = time_taken.as_deref().and_then(parse_timestamp);

    let record = ScoreRecord {
        cpu_score: rec.cpu_score,
        memory_score: rec.memory_score,
        disk_score: rec.disk_score,
        graphics_score: rec.graphics_score,
        d3d_score: rec.d3d_score,
        base_score: rec.base_score,
        assessment_state: rec.assessment_state.map(AssessmentState::from_code),
        assessment_timestamp,
        time_taken,
        raw_payload: raw.to_string(),
    };

    if record.base_score_consistent() == Some(false) {
        warn!(
            base = ?record.base_score,
            expected = ?record.expected_base_score(),
            "WinSPRLevel differs from the lowest component score"
        );
    }

    Ok(record)
}

fn time_taken_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        // Windows PowerShell 5.1 serializes some DateTime values as {"value": ..., "DateTime": ...}.
        Value::Object(m) => m.get("value").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Accepts RFC 3339, `/Date(ms)/` and CIM DMTF datetimes. Labels such as
/// `MostRecentAssessment` yield `None`.
pub(crate) fn parse_timestamp(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim();

    if let Some(inner) = s.strip_prefix("/Date(").and_then(|r| r.strip_suffix(")/")) {
        let digits_end = inner
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '+' || *c == '-')
            .map(|(i, _)| i)
            .unwrap_or(inner.len());
        let ms: i64 = inner[..digits_end].parse().ok()?;
        return OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok();
    }

    if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(ts);
    }

    parse_dmtf(s)
}

fn parse_dmtf(s: &str) -> Option<OffsetDateTime> {
    // yyyymmddHHMMSS.ffffff±UUU (offset in minutes)
    if s.len() != 25 || !s.is_ascii() || s.as_bytes()[14] != b'.' {
        return None;
    }
    let base = PrimitiveDateTime::parse(
        &s[..14],
        format_description!("[year][month][day][hour][minute][second]"),
    )
    .ok()?;
    let micros: i64 = s[15..21].parse().ok()?;
    let sign = match s.as_bytes()[21] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let minutes: i32 = s[22..25].parse().ok()?;
    let offset = UtcOffset::from_whole_seconds(sign * minutes * 60).ok()?;
    Some((base + time::Duration::microseconds(micros)).assume_offset(offset))
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const CALIBRATION: &str = r#"{
    "CPUScore":  8.9,
    "D3DScore":  9.9,
    "DiskScore":  8.2,
    "MemoryScore":  8.9,
    "GraphicsScore":  6.6,
    "WinSPRLevel":  6.6,
    "TimeTaken":  "MostRecentAssessment",
    "WinSATAssessmentState":  1
}"#;

    #[test]
    fn calibration_sample_round_values() {
        let r = parse_score_record(CALIBRATION).unwrap();
        assert_eq!(r.cpu_score, Some(8.9));
        assert_eq!(r.memory_score, Some(8.9));
        assert_eq!(r.disk_score, Some(8.2));
        assert_eq!(r.graphics_score, Some(6.6));
        assert_eq!(r.d3d_score, Some(9.9));
        assert_eq!(r.base_score, Some(6.6));
        assert_eq!(r.assessment_state, Some(AssessmentState::Valid));
        assert_eq!(r.assessment_state.map(|s| s.code()), Some(1));
        assert_eq!(r.time_taken.as_deref(), Some("MostRecentAssessment"));
        assert!(r.assessment_timestamp.is_none());
        assert_eq!(r.raw_json(), CALIBRATION);
        assert_eq!(r.base_score_consistent(), Some(true));
    }

    #[test]
    fn missing_d3d_is_absent_not_zero() {
        let raw = r#"{"CPUScore": 7.1, "MemoryScore": 7.3, "DiskScore": 5.9, "GraphicsScore": 4.4, "WinSPRLevel": 4.4, "WinSATAssessmentState": 1}"#;
        let r = parse_score_record(raw).unwrap();
        assert_eq!(r.d3d_score, None);
        assert_eq!(r.cpu_score, Some(7.1));
        assert_eq!(r.graphics_score, Some(4.4));
    }

    #[test]
    fn null_scores_are_absent() {
        let r = parse_score_record(r#"{"CPUScore": null, "DiskScore": 0.0}"#).unwrap();
        assert_eq!(r.cpu_score, None);
        assert_eq!(r.disk_score, Some(0.0));
        assert_eq!(r.assessment_state, None);
    }

    #[test]
    fn single_element_array_is_accepted() {
        let raw = format!("[{CALIBRATION}]");
        let r = parse_score_record(&raw).unwrap();
        assert_eq!(r.cpu_score, Some(8.9));
    }

    #[test]
    fn malformed_payloads_are_parse_errors() {
        for raw in ["{not json", "[]", "42", r#"{"Name": "x"}"#, r#"{"CPUScore": "fast"}"#] {
            let err = parse_score_record(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Parse, "payload {raw:?}");
        }
    }

    #[test]
    fn query_script_targets_win32_winsat() {
        let exec = QueryExecutor::new();
        let args = exec.template.args();
        assert_eq!(args[..5], ["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command"]);
        let script = &args[5];
        for needle in [
            "Get-CimInstance -ClassName Win32_WinSAT -Namespace root\\cimv2",
            "Get-WmiObject -Class Win32_WinSAT",
            "Select-Object -First 1",
            "ConvertTo-Json",
        ] {
            assert!(script.contains(needle), "script lacks {needle:?}");
        }
        for field in EXPECTED_FIELDS {
            assert!(script.contains(field), "script does not select {field}");
        }
    }

    #[test]
    fn timestamps_in_supported_formats() {
        let ms = parse_timestamp("/Date(1699215302000)/").unwrap();
        assert_eq!(ms.unix_timestamp(), 1_699_215_302);

        let rfc = parse_timestamp("2023-11-05T20:15:02Z").unwrap();
        assert_eq!(rfc.unix_timestamp(), 1_699_215_302);

        let dmtf = parse_timestamp("20231105211502.000000+060").unwrap();
        assert_eq!(dmtf.unix_timestamp(), 1_699_215_302);

        assert!(parse_timestamp("MostRecentAssessment").is_none());
    }

    #[test]
    fn time_taken_object_form() {
        let raw = r#"{"CPUScore": 8.0, "TimeTaken": {"value": "/Date(1699215302000)/", "DateTime": "Sunday, November 5, 2023"}}"#;
        let r = parse_score_record(raw).unwrap();
        assert_eq!(
            r.assessment_timestamp.map(|t| t.unix_timestamp()),
            Some(1_699_215_302)
        );
    }

    #[cfg(unix)]
    mod process_backed {
        use super::*;
        use crate::model::ResolutionMethod;
        use std::path::PathBuf;
        use std::time::Instant;

        fn sh() -> InterpreterPath {
            InterpreterPath {
                path: PathBuf::from("/bin/sh"),
                method: ResolutionMethod::Configured,
            }
        }

        #[tokio::test]
        async fn query_parses_child_stdout() {
            let exec = QueryExecutor::with_template(CommandTemplate::new([
                "-c",
                "printf '%s' \"$0\"",
                CALIBRATION,
            ]));
            let r = exec.query(&sh(), Duration::from_secs(5)).await.unwrap();
            assert_eq!(r.d3d_score, Some(9.9));
        }

        #[tokio::test]
        async fn nonzero_exit_carries_stderr() {
            let exec = QueryExecutor::with_template(CommandTemplate::new([
                "-c",
                "echo 'Invalid class' >&2; exit 1",
            ]));
            match exec.query(&sh(), Duration::from_secs(5)).await {
                Err(WinsatError::Execution { exit_code, stderr }) => {
                    assert_eq!(exit_code, Some(1));
                    assert_eq!(stderr, "Invalid class");
                }
                other => panic!("expected Execution, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn empty_output_is_execution_error() {
            let exec = QueryExecutor::with_template(CommandTemplate::new(["-c", "exit 0"]));
            let err = exec.query(&sh(), Duration::from_secs(5)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Execution);
        }

        #[tokio::test]
        async fn deadline_covers_pipes_held_by_descendants() {
            // The shell exits at once; its background child keeps stdout open.
            let exec = QueryExecutor::with_template(CommandTemplate::new([
                "-c",
                r#"sleep 4 & echo '{"CPUScore": 8.9}'"#,
            ]));
            let timeout = Duration::from_millis(300);
            let started = Instant::now();
            let res = exec.query(&sh(), timeout).await;
            assert!(
                started.elapsed() < Duration::from_secs(2),
                "query ran for {:?}",
                started.elapsed()
            );
            assert!(matches!(res, Err(WinsatError::Timeout { .. })), "got {res:?}");
        }

        #[tokio::test]
        async fn hung_child_times_out_and_is_killed() {
            let exec =
                QueryExecutor::with_template(CommandTemplate::new(["-c", "exec sleep 30"]));
            let timeout = Duration::from_millis(300);
            let started = Instant::now();
            let err = exec.query(&sh(), timeout).await.unwrap_err();
            assert!(started.elapsed() < timeout + Duration::from_secs(3));

            let WinsatError::Timeout { timeout: t, pid } = err else {
                panic!("expected Timeout, got {err:?}");
            };
            assert_eq!(t, timeout);
            let pid = pid.expect("child pid");
            #[cfg(target_os = "linux")]
            assert!(
                !std::path::Path::new(&format!("/proc/{pid}")).exists(),
                "child {pid} still present"
            );
            #[cfg(not(target_os = "linux"))]
            let _ = pid;
        }
    }
}
