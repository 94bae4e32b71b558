//! PowerShell path resolution.
//!
//! Resolution order: configured override, `System32`, `Sysnative`, then every
//! directory of the executable search path. The first hit is cached until the
//! caller explicitly invalidates it.

use crate::error::WinsatError;
use crate::model::{InterpreterPath, ResolutionMethod};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub const INTERPRETER_FILE: &str = "powershell.exe";

/// Existence check used by the locator. Never executes anything.
pub trait PathProbe: Send + Sync {
    fn is_file(&self, path: &Path) -> bool;
}

pub struct FsProbe;

impl PathProbe for FsProbe {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Filesystem roots the locator searches, captured once at startup.
#[derive(Debug, Clone)]
pub struct SearchRoots {
    pub system_root: PathBuf,
    pub search_path: Vec<PathBuf>,
}

impl SearchRoots {
    fn standard(&self) -> PathBuf {
        powershell_under(&self.system_root.join("System32"))
    }

    fn sysnative(&self) -> PathBuf {
        // Only visible to 32-bit processes on 64-bit Windows.
        powershell_under(&self.system_root.join("Sysnative"))
    }
}

fn powershell_under(system_dir: &Path) -> PathBuf {
    system_dir
        .join("WindowsPowerShell")
        .join("v1.0")
        .join(INTERPRETER_FILE)
}

pub struct InterpreterLocator {
    probe: Box<dyn PathProbe>,
    roots: SearchRoots,
    configured: Option<PathBuf>,
    cached: Mutex<Option<InterpreterPath>>,
}

impl InterpreterLocator {
    pub fn new(roots: SearchRoots, configured: Option<PathBuf>) -> Self {
        Self::with_probe(Box::new(FsProbe), roots, configured)
    }

    pub fn with_probe(
        probe: Box<dyn PathProbe>,
        roots: SearchRoots,
        configured: Option<PathBuf>,
    ) -> Self {
        Self {
            probe,
            roots,
            configured,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached interpreter, probing on first use.
    pub fn resolve(&self) -> Result<InterpreterPath, WinsatError> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = cached.as_ref() {
            return Ok(hit.clone());
        }
        let found = self.probe_all()?;
        info!(
            path = %found.path.display(),
            method = found.method.label(),
            "Resolved PowerShell interpreter"
        );
        *cached = Some(found.clone());
        Ok(found)
    }

    pub fn invalidate(&self) {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if cached.take().is_some() {
            debug!("Interpreter cache invalidated");
        }
    }

    pub fn re_resolve(&self) -> Result<InterpreterPath, WinsatError> {
        self.invalidate();
        self.resolve()
    }

    fn probe_all(&self) -> Result<InterpreterPath, WinsatError> {
        if let Some(path) = self.configured.as_ref() {
            if self.probe.is_file(path) {
                return Ok(InterpreterPath {
                    path: path.clone(),
                    method: ResolutionMethod::Configured,
                });
            }
            warn!(path = %path.display(), "Configured PowerShell path does not exist");
            return Err(WinsatError::NotFound {
                tried: vec![path.clone()],
            });
        }

        let mut tried = Vec::new();
        let fixed = [
            (self.roots.standard(), ResolutionMethod::Standard),
            (self.roots.sysnative(), ResolutionMethod::Sysnative),
        ];
        for (path, method) in fixed {
            if self.probe.is_file(&path) {
                return Ok(InterpreterPath { path, method });
            }
            tried.push(path);
        }

        for dir in &self.roots.search_path {
            let path = dir.join(INTERPRETER_FILE);
            if self.probe.is_file(&path) {
                return Ok(InterpreterPath {
                    path,
                    method: ResolutionMethod::SearchPath,
                });
            }
            tried.push(path);
        }

        warn!(candidates = tried.len(), "PowerShell interpreter not found");
        Err(WinsatError::NotFound { tried })
    }
}
