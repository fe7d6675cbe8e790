//! Run lifecycle controller.
//!
//! Owns the session on a single task: applies commands, drives the per-run progress
//! ticker, dispatches to the executor, and emits events for presentation layers.

use super::dispatch::{DispatchError, RunDispatcher};
use super::post_process::process_run_completion;
use super::session::{Session, SessionView};
use crate::model::{RunId, RunOutcome, RunRequest, RunStatus, SessionEvent, Stage, TargetConfig};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default spacing between synthetic progress ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1400);

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Start,
    Select(RunId),
    EditSow { id: RunId, content: String },
    Configure(TargetConfig),
    /// Write a record as JSON into `dir` under its default export name.
    Export { id: RunId, dir: PathBuf },
    /// Finish the active run (if any), then stop.
    Quit,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub tick_interval: Duration,
    pub target: TargetConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            target: TargetConfig::default(),
        }
    }
}

/// Synthetic progress ticks for one run. Dropping it cancels any pending tick.
struct Ticker {
    run_id: RunId,
    interval: Interval,
    /// Whether an executor call is in flight; otherwise this is the offline progression.
    dispatched: bool,
}

/// An executor call awaiting its result.
struct InFlight {
    run_id: RunId,
    handle: JoinHandle<Result<RunOutcome, DispatchError>>,
}

/// Session controller state; lives on the controller task only.
pub struct SessionController {
    session: Session,
    config: ControllerConfig,
    dispatcher: Option<Arc<dyn RunDispatcher>>,
    event_tx: UnboundedSender<SessionEvent>,
    view_tx: watch::Sender<SessionView>,
}

impl SessionController {
    pub fn new(
        session: Session,
        config: ControllerConfig,
        dispatcher: Option<Arc<dyn RunDispatcher>>,
        event_tx: UnboundedSender<SessionEvent>,
    ) -> (Self, watch::Receiver<SessionView>) {
        let (view_tx, view_rx) = watch::channel(session.view());
        (
            Self {
                session,
                config,
                dispatcher,
                event_tx,
                view_tx,
            },
            view_rx,
        )
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.session.view());
    }

    fn log_line(&mut self, id: &RunId, line: impl Into<String>) {
        let line = line.into();
        if self.session.append_log(id, line.clone()) {
            self.emit(SessionEvent::LogLine {
                id: id.clone(),
                line,
            });
        }
    }

    /// Lines appended when a stage is entered.
    fn enter_stage(&mut self, id: &RunId, stage: Stage, dispatched: bool) {
        self.emit(SessionEvent::StepEntered {
            id: id.clone(),
            stage,
        });
        if dispatched {
            for line in stage.progress_lines() {
                self.log_line(id, *line);
            }
        } else {
            self.log_line(id, stage.canned_line());
        }
    }

    fn ticker(&self, run_id: RunId, dispatched: bool) -> Ticker {
        let period = self.config.tick_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ticker {
            run_id,
            interval,
            dispatched,
        }
    }

    /// Handle a start request. Returns the ticker and in-flight call for the new run,
    /// or `None` when a run is already active.
    fn start_run(&mut self) -> Option<(Ticker, Option<InFlight>)> {
        let target = self.config.target.clone();
        let dispatcher = self
            .dispatcher
            .clone()
            .filter(|_| target.is_configured());
        let repo_url = dispatcher.as_ref().map(|_| target.repo_url.as_str());

        let Some(id) = self.session.start(repo_url) else {
            debug!("start ignored: a run is already active");
            return None;
        };
        let (title, snapshot) = match self.session.get(&id) {
            Some(record) => (record.title.clone(), record.sow_snapshot.clone()),
            None => return None,
        };
        info!(run_id = %id, title = %title, offline = dispatcher.is_none(), "run started");
        self.emit(SessionEvent::RunStarted {
            id: id.clone(),
            title,
        });

        let inflight = dispatcher.map(|dispatcher| {
            let request = RunRequest {
                repo_url: target.repo_url.trim().to_string(),
                sow_content: snapshot,
                auto_push: target.auto_push,
            };
            self.log_line(&id, format!("Starting run against {}", request.repo_url));
            InFlight {
                run_id: id.clone(),
                handle: tokio::spawn(async move { dispatcher.dispatch(request).await }),
            }
        });
        if inflight.is_none() {
            self.log_line(&id, "No repository configured; running offline demo");
        }

        let dispatched = inflight.is_some();
        self.enter_stage(&id, Stage::first(), dispatched);
        let ticker = self.ticker(id, dispatched);
        Some((ticker, inflight))
    }

    /// Advance on a tick. Returns `false` once the ticker is no longer needed.
    fn on_tick(&mut self, run_id: &RunId, dispatched: bool) -> bool {
        match self.session.advance(run_id) {
            Some(stage) => {
                debug!(run_id = %run_id, stage = %stage, "stage entered");
                self.enter_stage(run_id, stage, dispatched);
                true
            }
            None if dispatched => {
                // Stay on the last stage until the executor answers.
                self.session.get(run_id).is_some_and(|r| r.is_running())
            }
            None => {
                self.log_line(run_id, "[DONE] Demo run complete");
                if self.session.finish(run_id, RunStatus::Succeeded, None) {
                    info!(run_id = %run_id, "offline run succeeded");
                    self.emit(SessionEvent::RunFinished {
                        id: run_id.clone(),
                        status: RunStatus::Succeeded,
                        branch: None,
                    });
                }
                false
            }
        }
    }

    fn on_dispatch_done(
        &mut self,
        run_id: &RunId,
        joined: Result<Result<RunOutcome, DispatchError>, tokio::task::JoinError>,
    ) {
        let result = match joined {
            Ok(result) => result,
            Err(e) => Err(DispatchError::Transport(format!("dispatch task failed: {e}"))),
        };
        if let Err(e) = &result {
            warn!(run_id = %run_id, error = %e, "dispatch failed");
        }
        let processed = process_run_completion(&mut self.session, run_id, result);
        for line in processed.appended {
            self.emit(SessionEvent::LogLine {
                id: run_id.clone(),
                line,
            });
        }
        info!(run_id = %run_id, status = processed.status.as_str(), "run finished");
        self.emit(SessionEvent::RunFinished {
            id: run_id.clone(),
            status: processed.status,
            branch: processed.branch,
        });
    }

    fn on_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Select(id) => {
                if !self.session.select(&id) {
                    self.emit(SessionEvent::Info(format!("Unknown run {id}")));
                }
            }
            SessionCommand::EditSow { id, content } => {
                if let Err(e) = self.session.edit_sow(&id, content) {
                    self.emit(SessionEvent::Info(format!("Edit rejected: {e}")));
                }
            }
            SessionCommand::Configure(target) => {
                info!(run_target = %target, "run target changed");
                self.emit(SessionEvent::Info(format!("Target: {target}")));
                self.config.target = target;
            }
            SessionCommand::Export { id, dir } => {
                let message = match self.session.get(&id) {
                    Some(record) => {
                        let path = dir.join(crate::storage::export_file_name(record));
                        match crate::storage::export_json(&path, record) {
                            Ok(()) => format!("Exported JSON: {}", path.display()),
                            Err(e) => format!("JSON export failed: {e:#}"),
                        }
                    }
                    None => format!("Unknown run {id}"),
                };
                self.emit(SessionEvent::Info(message));
            }
            SessionCommand::Start | SessionCommand::Quit => {}
        }
    }

    /// Process commands until `Quit` (or the command channel closes) and no run is
    /// active, then hand back the final session.
    pub async fn run(mut self, mut cmd_rx: UnboundedReceiver<SessionCommand>) -> Result<Session> {
        let mut ticker: Option<Ticker> = None;
        let mut inflight: Option<InFlight> = None;
        let mut quit_pending = false;
        let mut commands_open = true;

        loop {
            if quit_pending && !self.session.is_running() {
                break;
            }

            tokio::select! {
                cmd = cmd_rx.recv(), if commands_open => {
                    match cmd {
                        Some(SessionCommand::Start) => {
                            if let Some((t, f)) = self.start_run() {
                                ticker = Some(t);
                                inflight = f;
                            }
                        }
                        Some(SessionCommand::Quit) => {
                            quit_pending = true;
                        }
                        Some(other) => self.on_command(other),
                        None => {
                            commands_open = false;
                            quit_pending = true;
                        }
                    }
                }
                tick = async {
                    match ticker.as_mut() {
                        Some(t) => {
                            t.interval.tick().await;
                            Some((t.run_id.clone(), t.dispatched))
                        }
                        None => futures::future::pending().await,
                    }
                } => {
                    if let Some((run_id, dispatched)) = tick {
                        if !self.on_tick(&run_id, dispatched) {
                            ticker = None;
                        }
                    }
                }
                // Do not take the handle before this branch wins; otherwise it can be dropped
                // if another branch is chosen, and we'll never observe completion.
                joined = async {
                    match inflight.as_mut() {
                        Some(f) => Some((&mut f.handle).await),
                        None => futures::future::pending().await,
                    }
                } => {
                    if let (Some(joined), Some(f)) = (joined, inflight.take()) {
                        // Cancel the ticker before the final state lands.
                        if ticker.as_ref().is_some_and(|t| t.run_id == f.run_id) {
                            ticker = None;
                        }
                        self.on_dispatch_done(&f.run_id, joined);
                    }
                }
            }

            self.publish();
        }

        Ok(self.session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct FakeDispatcher {
        delay: Duration,
        result: Result<RunOutcome, String>,
    }

    #[async_trait]
    impl RunDispatcher for FakeDispatcher {
        async fn dispatch(&self, _request: RunRequest) -> Result<RunOutcome, DispatchError> {
            tokio::time::sleep(self.delay).await;
            self.result.clone().map_err(DispatchError::Transport)
        }
    }

    struct Harness {
        cmd_tx: mpsc::UnboundedSender<SessionCommand>,
        event_rx: mpsc::UnboundedReceiver<SessionEvent>,
        view_rx: watch::Receiver<SessionView>,
        handle: JoinHandle<Result<Session>>,
    }

    fn spawn(target: TargetConfig, dispatcher: Option<Arc<dyn RunDispatcher>>) -> Harness {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let config = ControllerConfig {
            tick_interval: DEFAULT_TICK_INTERVAL,
            target,
        };
        let (controller, view_rx) =
            SessionController::new(Session::with_draft("# Update Auth Module\n"), config, dispatcher, event_tx);
        let handle = tokio::spawn(controller.run(cmd_rx));
        Harness {
            cmd_tx,
            event_rx,
            view_rx,
            handle,
        }
    }

    async fn wait_finished(event_rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        while let Some(event) = event_rx.recv().await {
            let done = matches!(event, SessionEvent::RunFinished { .. });
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    }

    fn stages(events: &[SessionEvent]) -> Vec<Stage> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::StepEntered { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect()
    }

    fn target() -> TargetConfig {
        TargetConfig {
            repo_url: "https://github.com/acme/app".into(),
            auto_push: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn offline_run_walks_all_stages_and_succeeds() {
        let mut h = spawn(TargetConfig::default(), None);
        h.cmd_tx.send(SessionCommand::Start).unwrap();
        let events = wait_finished(&mut h.event_rx).await;
        assert_eq!(stages(&events), Stage::ALL.to_vec());

        h.cmd_tx.send(SessionCommand::Quit).unwrap();
        let session = h.handle.await.unwrap().unwrap();
        assert!(!session.is_running());
        let run = &session.runs()[0];
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.current_step, None);
        assert_eq!(run.repo_url, None);
        let canned: Vec<&str> = Stage::ALL.iter().map(|s| s.canned_line()).collect();
        let logged: Vec<&str> = run
            .log
            .iter()
            .map(String::as_str)
            .filter(|l| canned.contains(l))
            .collect();
        assert_eq!(logged, canned);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_run_takes_one_tick_per_stage() {
        let mut h = spawn(TargetConfig::default(), None);
        let started = Instant::now();
        h.cmd_tx.send(SessionCommand::Start).unwrap();
        wait_finished(&mut h.event_rx).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= DEFAULT_TICK_INTERVAL * 5);
        assert!(elapsed < DEFAULT_TICK_INTERVAL * 6);
        drop(h.cmd_tx);
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_back_starts_create_one_run() {
        let mut h = spawn(TargetConfig::default(), None);
        h.cmd_tx.send(SessionCommand::Start).unwrap();
        h.cmd_tx.send(SessionCommand::Start).unwrap();
        wait_finished(&mut h.event_rx).await;
        h.cmd_tx.send(SessionCommand::Quit).unwrap();
        let session = h.handle.await.unwrap().unwrap();
        // The draft plus exactly one run.
        assert_eq!(session.runs().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatched_run_applies_authoritative_result() {
        let dispatcher: Arc<dyn RunDispatcher> = Arc::new(FakeDispatcher {
            delay: Duration::from_millis(3000),
            result: Ok(RunOutcome {
                success: true,
                log: "agent output\nPushed to branch: feature/x\n".into(),
                branch: Some("feature/x".into()),
                exit_code: Some(0),
            }),
        });
        let mut h = spawn(target(), Some(dispatcher));
        h.cmd_tx.send(SessionCommand::Start).unwrap();
        let events = wait_finished(&mut h.event_rx).await;
        // Ticks at 1.4s and 2.8s, result at 3.0s.
        assert_eq!(
            stages(&events),
            vec![Stage::Auditor, Stage::Bridge, Stage::Architect]
        );
        assert!(matches!(
            events.last(),
            Some(SessionEvent::RunFinished { status: RunStatus::Succeeded, branch: Some(b), .. }) if b == "feature/x"
        ));

        // No stale tick lands after the result.
        tokio::time::sleep(Duration::from_secs(10)).await;
        let view = h.view_rx.borrow().clone();
        let selected = view.selected.unwrap();
        assert!(!view.running);
        assert_eq!(selected.current_step, None);
        assert_eq!(selected.result_branch.as_deref(), Some("feature/x"));
        assert_eq!(selected.repo_url.as_deref(), Some("https://github.com/acme/app"));
        assert!(selected.log.iter().any(|l| l == "agent output"));
        assert!(!selected.log.iter().any(|l| l.starts_with("[artisan]")));

        h.cmd_tx.send(SessionCommand::Quit).unwrap();
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_executor_holds_last_stage_until_result() {
        let dispatcher: Arc<dyn RunDispatcher> = Arc::new(FakeDispatcher {
            delay: Duration::from_secs(60),
            result: Ok(RunOutcome {
                success: false,
                log: "QA: FAIL".into(),
                branch: None,
                exit_code: Some(1),
            }),
        });
        let mut h = spawn(target(), Some(dispatcher));
        h.cmd_tx.send(SessionCommand::Start).unwrap();
        let events = wait_finished(&mut h.event_rx).await;
        assert_eq!(stages(&events), Stage::ALL.to_vec());
        h.cmd_tx.send(SessionCommand::Quit).unwrap();
        let session = h.handle.await.unwrap().unwrap();
        let run = &session.runs()[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.exit_code, Some(1));
        assert!(!session.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_reaches_failed_state() {
        let dispatcher: Arc<dyn RunDispatcher> = Arc::new(FakeDispatcher {
            delay: Duration::from_millis(100),
            result: Err("connection refused".into()),
        });
        let mut h = spawn(target(), Some(dispatcher));
        h.cmd_tx.send(SessionCommand::Start).unwrap();
        wait_finished(&mut h.event_rx).await;
        h.cmd_tx.send(SessionCommand::Quit).unwrap();
        let session = h.handle.await.unwrap().unwrap();
        let run = &session.runs()[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.log.last().map(String::as_str), Some("[ERROR] connection refused"));
        assert!(!session.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn configured_target_without_dispatcher_runs_offline() {
        let mut h = spawn(target(), None);
        h.cmd_tx.send(SessionCommand::Start).unwrap();
        wait_finished(&mut h.event_rx).await;
        h.cmd_tx.send(SessionCommand::Quit).unwrap();
        let session = h.handle.await.unwrap().unwrap();
        assert_eq!(session.runs()[0].status, RunStatus::Succeeded);
        assert_eq!(session.runs()[0].repo_url, None);
    }

    #[tokio::test(start_paused = true)]
    async fn quit_waits_for_active_run() {
        let mut h = spawn(TargetConfig::default(), None);
        h.cmd_tx.send(SessionCommand::Start).unwrap();
        h.cmd_tx.send(SessionCommand::Quit).unwrap();
        let session = h.handle.await.unwrap().unwrap();
        assert_eq!(session.runs()[0].status, RunStatus::Succeeded);
        assert!(wait_finished(&mut h.event_rx).await.iter().any(|e| matches!(e, SessionEvent::RunFinished { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn edit_and_select_flow_through_commands() {
        let h = spawn(TargetConfig::default(), None);
        let draft = h.view_rx.borrow().selected.as_ref().unwrap().id.clone();
        h.cmd_tx
            .send(SessionCommand::EditSow {
                id: draft.clone(),
                content: "# Refactor API routes\n".into(),
            })
            .unwrap();
        h.cmd_tx.send(SessionCommand::Start).unwrap();
        h.cmd_tx.send(SessionCommand::Select(draft.clone())).unwrap();
        h.cmd_tx.send(SessionCommand::Quit).unwrap();
        let session = h.handle.await.unwrap().unwrap();

        assert_eq!(session.selected_id(), Some(&draft));
        assert_eq!(session.runs()[0].title, "Refactor API routes");
        assert_eq!(session.runs()[0].sow_snapshot, "# Refactor API routes\n");
        assert_eq!(session.get(&draft).unwrap().title, "Refactor API routes");
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_the_target_switches_next_run_offline() {
        let dispatcher: Arc<dyn RunDispatcher> = Arc::new(FakeDispatcher {
            delay: Duration::from_millis(500),
            result: Ok(RunOutcome {
                success: true,
                log: "agent output".into(),
                branch: None,
                exit_code: Some(0),
            }),
        });
        let mut h = spawn(target(), Some(dispatcher));
        h.cmd_tx.send(SessionCommand::Start).unwrap();
        wait_finished(&mut h.event_rx).await;

        h.cmd_tx
            .send(SessionCommand::Configure(TargetConfig {
                repo_url: "".into(),
                auto_push: true,
            }))
            .unwrap();
        h.cmd_tx.send(SessionCommand::Start).unwrap();
        let events = wait_finished(&mut h.event_rx).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Info(m) if m == "Target: offline demo")));
        h.cmd_tx.send(SessionCommand::Quit).unwrap();
        let session = h.handle.await.unwrap().unwrap();

        let offline = &session.runs()[0];
        assert_eq!(offline.repo_url, None);
        assert_eq!(offline.status, RunStatus::Succeeded);
        for stage in Stage::ALL {
            assert!(offline.log.iter().any(|l| l == stage.canned_line()));
        }
        let dispatched = &session.runs()[1];
        assert_eq!(dispatched.repo_url.as_deref(), Some("https://github.com/acme/app"));
        assert!(dispatched.log.iter().any(|l| l == "agent output"));
    }

    #[tokio::test(start_paused = true)]
    async fn export_writes_record_and_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = spawn(TargetConfig::default(), None);
        let draft = h.view_rx.borrow().selected.as_ref().unwrap().id.clone();
        h.cmd_tx
            .send(SessionCommand::Export {
                id: draft,
                dir: dir.path().to_path_buf(),
            })
            .unwrap();
        h.cmd_tx.send(SessionCommand::Quit).unwrap();
        h.handle.await.unwrap().unwrap();

        let message = match h.event_rx.recv().await {
            Some(SessionEvent::Info(message)) => message,
            other => panic!("unexpected event: {other:?}"),
        };
        assert!(message.starts_with("Exported JSON: "));
        let written: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(written.len(), 1);
    }
}
