//! Error taxonomy for the assessment-acquisition engine.
//!
//! Every engine operation returns these typed errors to its caller. None of them
//! is fatal: after any failure the next query or trigger can be attempted again.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const ELEVATION_HINT: &str = "Run winsat-viewer from an elevated (Administrator) terminal";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WinsatError {
    #[error("PowerShell not found (tried: {})", display_paths(.tried))]
    NotFound { tried: Vec<PathBuf> },

    #[error("query timed out after {}", format_timeout(.timeout))]
    Timeout {
        timeout: Duration,
        /// Pid of the child that was killed, when the OS reported one.
        pid: Option<u32>,
    },

    #[error("{}", execution_message(.exit_code, .stderr))]
    Execution {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("could not parse provider output: {reason}")]
    Parse { reason: String },

    #[error("permission denied: {detail}")]
    PermissionDenied { detail: String },

    #[error("an assessment is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Timeout,
    Execution,
    Parse,
    PermissionDenied,
    AlreadyRunning,
}

impl WinsatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WinsatError::NotFound { .. } => ErrorKind::NotFound,
            WinsatError::Timeout { .. } => ErrorKind::Timeout,
            WinsatError::Execution { .. } => ErrorKind::Execution,
            WinsatError::Parse { .. } => ErrorKind::Parse,
            WinsatError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            WinsatError::AlreadyRunning => ErrorKind::AlreadyRunning,
        }
    }

    /// Actionable hint for the display layer, if the error has one.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            WinsatError::NotFound { .. } => Some(
                "Verify that Windows PowerShell exists under %SystemRoot%\\System32\\WindowsPowerShell\\v1.0, or pass --powershell <path>",
            ),
            WinsatError::PermissionDenied { .. } => Some(ELEVATION_HINT),
            _ => None,
        }
    }

    /// Map a spawn failure onto the taxonomy.
    pub(crate) fn from_spawn(program: &std::path::Path, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => WinsatError::NotFound {
                tried: vec![program.to_path_buf()],
            },
            std::io::ErrorKind::PermissionDenied => WinsatError::PermissionDenied {
                detail: format!("cannot start {}: {}", program.display(), err),
            },
            _ => WinsatError::Execution {
                exit_code: None,
                stderr: format!("failed to start {}: {}", program.display(), err),
            },
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".into();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_timeout(timeout: &Duration) -> String {
    humantime::format_duration(*timeout).to_string()
}

fn execution_message(exit_code: &Option<i32>, stderr: &str) -> String {
    let status = match exit_code {
        Some(code) => format!("PowerShell exited with code {code}"),
        None => "PowerShell failed".to_string(),
    };
    let stderr = stderr.trim();
    if stderr.is_empty() {
        status
    } else {
        format!("{status}: {stderr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_only_for_actionable_kinds() {
        let nf = WinsatError::NotFound { tried: vec![] };
        assert!(nf.hint().is_some());
        let pd = WinsatError::PermissionDenied {
            detail: "elevation declined".into(),
        };
        assert!(pd.hint().unwrap().contains("Administrator"));
        assert!(WinsatError::AlreadyRunning.hint().is_none());
        assert!(WinsatError::Parse { reason: "x".into() }.hint().is_none());
    }

    #[test]
    fn execution_message_includes_stderr() {
        let e = WinsatError::Execution {
            exit_code: Some(1),
            stderr: "  Invalid class \n".into(),
        };
        assert_eq!(e.to_string(), "PowerShell exited with code 1: Invalid class");
        assert_eq!(e.kind(), ErrorKind::Execution);
    }

    #[test]
    fn spawn_not_found_maps_to_not_found() {
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        let mapped = WinsatError::from_spawn(std::path::Path::new("ps.exe"), &err);
        assert_eq!(mapped.kind(), ErrorKind::NotFound);
    }
}
