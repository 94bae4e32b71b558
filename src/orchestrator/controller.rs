//! Query and assessment lifecycle controller.
//!
//! Turns UI commands into engine calls on background tasks and emits events for
//! presentation layers. The UI thread never touches the engine directly.

use crate::engine::{TriggerOutcome, WinsatEngine};
use crate::error::WinsatError;
use crate::model::{InfoEvent, RunState, ScoreRecord, ViewerEvent};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Refresh,
    RunAssessment,
    ReResolve,
    Quit,
}

type QueryHandle = JoinHandle<Result<ScoreRecord, WinsatError>>;

fn start_query(engine: &Arc<WinsatEngine>, event_tx: &UnboundedSender<ViewerEvent>) -> QueryHandle {
    let _ = event_tx.send(ViewerEvent::QueryStarted);
    let engine = engine.clone();
    tokio::spawn(async move { engine.query().await })
}

fn announce_interpreter(
    resolved: Result<crate::model::InterpreterPath, WinsatError>,
    event_tx: &UnboundedSender<ViewerEvent>,
) {
    let ev = match resolved {
        Ok(path) => ViewerEvent::InterpreterResolved(path),
        Err(e) => ViewerEvent::InterpreterMissing(e),
    };
    let _ = event_tx.send(ev);
}

/// Serve UI commands until `Quit` (or the command channel closes).
pub(crate) async fn run_controller(
    engine: Arc<WinsatEngine>,
    refresh_on_launch: bool,
    event_tx: UnboundedSender<ViewerEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    announce_interpreter(engine.interpreter(), &event_tx);

    let mut query: Option<QueryHandle> = if refresh_on_launch {
        Some(start_query(&engine, &event_tx))
    } else {
        None
    };
    // Set when a finished assessment arrives while a query is still in flight.
    let mut refresh_pending = false;
    let mut runs = engine.subscribe_runs();
    let mut runs_open = true;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Refresh) => {
                        if query.is_some() {
                            let _ = event_tx.send(ViewerEvent::Info(InfoEvent::QueryInFlight));
                        } else {
                            query = Some(start_query(&engine, &event_tx));
                        }
                    }
                    Some(UiCommand::RunAssessment) => {
                        let outcome = engine.trigger_assessment();
                        debug!(started = outcome.started(), "Assessment trigger requested");
                        // Started runs are reported through the watch branch below.
                        if let TriggerOutcome::Rejected(e) = outcome {
                            let _ = event_tx.send(ViewerEvent::AssessmentRejected(e));
                        }
                    }
                    Some(UiCommand::ReResolve) => {
                        announce_interpreter(engine.re_resolve(), &event_tx);
                    }
                    Some(UiCommand::Quit) | None => {
                        // The formal run is not ours to cancel; only the query dies with us.
                        if let Some(h) = query.take() {
                            h.abort();
                        }
                        break Ok(());
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it can be dropped
            // if another select branch is chosen, and we'll never observe completion.
            maybe_done = async {
                if let Some(h) = query.as_mut() {
                    return Some(h.await);
                }
                futures::future::pending().await
            } => {
                if let Some(join_res) = maybe_done {
                    query = None;
                    match join_res {
                        Ok(Ok(record)) => {
                            let _ = event_tx.send(ViewerEvent::ScoresUpdated { record: Box::new(record) });
                            if let Some(raw) = engine.last_raw_json() {
                                let _ = event_tx.send(ViewerEvent::RawJsonUpdated(raw));
                            }
                        }
                        Ok(Err(e)) => {
                            let _ = event_tx.send(ViewerEvent::QueryFailed(e));
                        }
                        Err(e) => {
                            let _ = event_tx.send(ViewerEvent::Info(InfoEvent::Message(format!(
                                "Query task failed: {e}"
                            ))));
                        }
                    }
                    if refresh_pending {
                        refresh_pending = false;
                        query = Some(start_query(&engine, &event_tx));
                    }
                }
            }
            changed = runs.changed(), if runs_open => {
                if changed.is_err() {
                    runs_open = false;
                    continue;
                }
                let run = runs.borrow_and_update().clone();
                debug!(state = run.state.label(), "Assessment state changed");
                let succeeded = run.state == RunState::Succeeded;
                let _ = event_tx.send(ViewerEvent::AssessmentChanged(run));
                if succeeded {
                    let _ = event_tx.send(ViewerEvent::Info(InfoEvent::RefreshAfterAssessment));
                    if query.is_some() {
                        refresh_pending = true;
                    } else {
                        query = Some(start_query(&engine, &event_tx));
                    }
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::engine::{
        AssessmentTrigger, CommandTemplate, InterpreterLocator, QueryExecutor, SearchRoots,
    };
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn engine(trigger_script: &str) -> Arc<WinsatEngine> {
        let locator = Arc::new(InterpreterLocator::new(
            SearchRoots {
                system_root: PathBuf::from("/nonexistent"),
                search_path: Vec::new(),
            },
            Some(PathBuf::from("/bin/sh")),
        ));
        let trigger = AssessmentTrigger::with_template(
            locator.clone(),
            CommandTemplate::new(["-c", trigger_script]),
        );
        let executor = QueryExecutor::with_template(CommandTemplate::new([
            "-c",
            r#"echo '{"CPUScore": 8.9, "WinSPRLevel": 6.6, "WinSATAssessmentState": 1}'"#,
        ]));
        Arc::new(WinsatEngine::from_parts(
            locator,
            executor,
            trigger,
            Duration::from_secs(5),
        ))
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ViewerEvent>) -> ViewerEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn refresh_emits_scores() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let ctl = tokio::spawn(run_controller(engine("true"), false, event_tx, cmd_rx));

        assert!(matches!(
            next_event(&mut event_rx).await,
            ViewerEvent::InterpreterResolved(_)
        ));
        cmd_tx.send(UiCommand::Refresh).unwrap();
        assert!(matches!(next_event(&mut event_rx).await, ViewerEvent::QueryStarted));
        match next_event(&mut event_rx).await {
            ViewerEvent::ScoresUpdated { record } => assert_eq!(record.cpu_score, Some(8.9)),
            other => panic!("unexpected event {other:?}"),
        }
        match next_event(&mut event_rx).await {
            ViewerEvent::RawJsonUpdated(raw) => assert!(raw.contains("\"CPUScore\": 8.9")),
            other => panic!("unexpected event {other:?}"),
        }

        cmd_tx.send(UiCommand::Quit).unwrap();
        ctl.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn successful_assessment_triggers_requery() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let ctl = tokio::spawn(run_controller(engine("sleep 0.2"), false, event_tx, cmd_rx));
        next_event(&mut event_rx).await;

        cmd_tx.send(UiCommand::RunAssessment).unwrap();
        cmd_tx.send(UiCommand::RunAssessment).unwrap();

        let mut saw_rejection = false;
        let mut saw_success = false;
        loop {
            match next_event(&mut event_rx).await {
                ViewerEvent::AssessmentRejected(e) => {
                    assert_eq!(e, WinsatError::AlreadyRunning);
                    saw_rejection = true;
                }
                ViewerEvent::AssessmentChanged(run) if run.state == RunState::Succeeded => {
                    saw_success = true;
                }
                ViewerEvent::ScoresUpdated { .. } => break,
                _ => {}
            }
        }
        assert!(saw_rejection && saw_success);

        drop(cmd_tx);
        ctl.await.unwrap().unwrap();
    }
}
