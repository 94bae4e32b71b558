//! Child process plumbing shared by the query and the trigger.
//!
//! Commands are built from a fixed argument template; nothing is ever passed
//! through a shell string.

use crate::error::WinsatError;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

const UTF8_PREFIX: &str = "[Console]::OutputEncoding = [System.Text.Encoding]::UTF8; ";

/// Fixed argument vector appended to the interpreter path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    args: Vec<String>,
}

impl CommandTemplate {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Non-interactive PowerShell invocation of `script`.
    pub fn powershell(script: &str) -> Self {
        Self::new([
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-ExecutionPolicy".to_string(),
            "Bypass".to_string(),
            "-Command".to_string(),
            format!("{UTF8_PREFIX}{script}"),
        ])
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn build(&self, program: &Path, kill_on_drop: bool) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(kill_on_drop);

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        cmd
    }
}

#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Spawn `program` with `template`; the child dies with its handle.
/// Must be called inside a tokio runtime.
pub fn spawn(program: &Path, template: &CommandTemplate) -> Result<Child, WinsatError> {
    spawn_with(program, template, true)
}

/// Like [`spawn`], but the child outlives its handle (and the viewer).
pub fn spawn_unowned(program: &Path, template: &CommandTemplate) -> Result<Child, WinsatError> {
    spawn_with(program, template, false)
}

fn spawn_with(
    program: &Path,
    template: &CommandTemplate,
    kill_on_drop: bool,
) -> Result<Child, WinsatError> {
    info!(program = %program.display(), kill_on_drop, "Starting subprocess");
    debug!(args = ?template.args(), "Subprocess arguments");
    template
        .build(program, kill_on_drop)
        .spawn()
        .map_err(|e| WinsatError::from_spawn(program, &e))
}

/// Wait for `child` and drain both pipes. The deadline covers the whole
/// collection, including descendants that keep a pipe open after the child
/// exits; on expiry the child is killed and reaped before `Timeout` is returned.
pub async fn wait_captured(
    mut child: Child,
    deadline: Option<Duration>,
) -> Result<CapturedOutput, WinsatError> {
    let started = Instant::now();
    let pid = child.id();
    let mut stdout_task = tokio::spawn(read_all(child.stdout.take()));
    let mut stderr_task = tokio::spawn(read_all(child.stderr.take()));

    let collected = match deadline {
        Some(limit) => {
            let drain = collect(&mut child, &mut stdout_task, &mut stderr_task);
            match tokio::time::timeout(limit, drain).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(pid = ?pid, timeout_ms = limit.as_millis() as u64, "Subprocess timed out, killing");
                    if let Err(e) = child.kill().await {
                        // Already exited; a descendant is holding the pipes.
                        debug!(pid = ?pid, error = %e, "Kill after timeout failed");
                    }
                    stdout_task.abort();
                    stderr_task.abort();
                    return Err(WinsatError::Timeout {
                        timeout: limit,
                        pid,
                    });
                }
            }
        }
        None => collect(&mut child, &mut stdout_task, &mut stderr_task).await,
    };

    let (status, stdout, stderr) = collected;
    let status = status.map_err(|e| WinsatError::Execution {
        exit_code: None,
        stderr: format!("failed waiting for child: {e}"),
    })?;
    let elapsed = started.elapsed();

    debug!(
        pid = ?pid,
        exit_code = ?status.code(),
        duration_ms = elapsed.as_millis() as u64,
        stdout_bytes = stdout.len(),
        stderr_bytes = stderr.len(),
        "Subprocess completed"
    );

    Ok(CapturedOutput {
        exit_code: status.code(),
        success: status.success(),
        stdout,
        stderr,
        elapsed,
    })
}

async fn collect(
    child: &mut Child,
    stdout_task: &mut JoinHandle<String>,
    stderr_task: &mut JoinHandle<String>,
) -> (io::Result<ExitStatus>, String, String) {
    let status = child.wait().await;
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    (status, stdout, stderr)
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    #[test]
    fn powershell_template_is_non_interactive() {
        let t = CommandTemplate::powershell("Get-Date");
        assert_eq!(&t.args()[..5], ["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command"]);
        assert!(t.args()[5].ends_with("Get-Date"));
        assert!(t.args()[5].starts_with("[Console]::OutputEncoding"));
    }

    #[tokio::test]
    async fn captures_stdout_stderr_and_exit_code() {
        let t = CommandTemplate::new(["-c", "echo out; echo err >&2; exit 3"]);
        let child = spawn(&sh(), &t).unwrap();
        let out = wait_captured(child, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let t = CommandTemplate::new(Vec::<String>::new());
        let err = spawn(Path::new("/definitely/not/here/powershell.exe"), &t).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
