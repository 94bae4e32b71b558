mod locator;
mod process;
mod query;
mod trigger;

pub use locator::{InterpreterLocator, SearchRoots};
pub use process::CommandTemplate;
pub use query::QueryExecutor;
pub use trigger::{AssessmentTrigger, TriggerOutcome};

use crate::error::WinsatError;
use crate::model::{AssessmentRun, InterpreterPath, ScoreRecord, ViewerConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

/// Entry point for display layers: scores, the formal run and diagnostics.
pub struct WinsatEngine {
    locator: Arc<InterpreterLocator>,
    executor: QueryExecutor,
    trigger: AssessmentTrigger,
    query_timeout: Duration,
    last_raw: Mutex<Option<String>>,
}

impl WinsatEngine {
    pub fn new(cfg: &ViewerConfig) -> Self {
        let roots = SearchRoots {
            system_root: cfg.system_root.clone(),
            search_path: cfg.search_path.clone(),
        };
        let locator = Arc::new(InterpreterLocator::new(
            roots,
            cfg.interpreter_override.clone(),
        ));
        let trigger = AssessmentTrigger::new(locator.clone());
        Self::from_parts(locator, QueryExecutor::new(), trigger, cfg.query_timeout)
    }

    pub fn from_parts(
        locator: Arc<InterpreterLocator>,
        executor: QueryExecutor,
        trigger: AssessmentTrigger,
        query_timeout: Duration,
    ) -> Self {
        Self {
            locator,
            executor,
            trigger,
            query_timeout,
            last_raw: Mutex::new(None),
        }
    }

    pub fn interpreter(&self) -> Result<InterpreterPath, WinsatError> {
        self.locator.resolve()
    }

    /// Drop the cached interpreter and probe again, e.g. after the user fixed
    /// a missing PowerShell install.
    pub fn re_resolve(&self) -> Result<InterpreterPath, WinsatError> {
        self.locator.re_resolve()
    }

    pub async fn query(&self) -> Result<ScoreRecord, WinsatError> {
        let interpreter = self.locator.resolve()?;
        let record = match self.executor.query(&interpreter, self.query_timeout).await {
            Ok(record) => record,
            Err(e) => {
                warn!(kind = ?e.kind(), error = %e, "Win32_WinSAT query failed");
                return Err(e);
            }
        };
        *self.last_raw.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(record.raw_payload.clone());
        Ok(record)
    }

    pub fn trigger_assessment(&self) -> TriggerOutcome {
        self.trigger.trigger()
    }

    pub fn current_run_state(&self) -> AssessmentRun {
        self.trigger.poll_status()
    }

    pub fn subscribe_runs(&self) -> watch::Receiver<AssessmentRun> {
        self.trigger.subscribe()
    }

    /// Raw provider JSON of the last successful query.
    pub fn last_raw_json(&self) -> Option<String> {
        self.last_raw
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
