use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{error, info, warn};
use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use crate::camera::{CameraArbiter, CameraLease};
use crate::error::{ToolError, ToolResult};
use crate::models::{SessionState, ToolKind};
use crate::settings::{CameraSource, LaunchMode, Settings};

use super::registry::SessionRegistry;
use super::signals::ProcessController;
use super::{StartOutcome, StopOutcome, Supervisor};

/// Extra time allowed after a force kill for the exit to be reaped.
const ESCALATION_BUDGET: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessState {
    NotStarted,
    Running,
    Terminating,
    Stopped,
}

struct StopRequest {
    grace: Duration,
    reply: oneshot::Sender<StopOutcome>,
}

/// A worker process owned by a session. The `Child` itself lives in the
/// waiter task; this side only keeps what is needed to ask it to stop.
pub struct ExternalProcess {
    pid: Option<u32>,
    state: ProcessState,
    stop_tx: Option<oneshot::Sender<StopRequest>>,
    lease: CameraLease,
}

impl ExternalProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }
}

/// Starts tool workers as child processes and stops them with a graceful
/// signal, escalating to a kill once the grace period runs out.
pub struct ExternalProcessSupervisor {
    registry: Arc<SessionRegistry>,
    arbiter: Arc<CameraArbiter>,
    controller: Arc<dyn ProcessController>,
    settings: Arc<Settings>,
}

impl ExternalProcessSupervisor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        arbiter: Arc<CameraArbiter>,
        controller: Arc<dyn ProcessController>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            registry,
            arbiter,
            controller,
            settings,
        }
    }

    fn command_for(&self, kind: ToolKind) -> ToolResult<Command> {
        let (program, args): (PathBuf, Vec<OsString>) = match self.settings.launch_mode(kind) {
            LaunchMode::External {
                program: Some(program),
                args,
            } => (program.into(), args.into_iter().map(OsString::from).collect()),
            LaunchMode::External {
                program: None,
                args,
            } => {
                let exe = std::env::current_exe().map_err(|err| ToolError::Spawn {
                    kind,
                    reason: format!("cannot locate own executable: {err}"),
                })?;
                (exe, worker_args(kind, &self.settings, args))
            }
            LaunchMode::InProcess => {
                return Err(ToolError::Spawn {
                    kind,
                    reason: "tool is configured to run in-process".into(),
                })
            }
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        Ok(command)
    }

    pub async fn start(&self, kind: ToolKind) -> ToolResult<StartOutcome> {
        let slot = self.registry.slot(kind);
        let mut guard = slot.lock().await;
        if guard
            .process
            .as_ref()
            .is_some_and(|p| matches!(p.state, ProcessState::Running | ProcessState::Terminating))
            || guard.is_active()
        {
            return Ok(StartOutcome::AlreadyRunning);
        }

        let session_id = guard
            .begin(self.settings.cooldown_ms)
            .map_err(|err| ToolError::Spawn {
                kind,
                reason: format!("{err:#}"),
            })?
            .id
            .clone();

        let lease = match self.arbiter.acquire(kind, &session_id) {
            Ok(lease) => lease,
            Err(err) => {
                info!("{kind} not started: {err}");
                guard.abandon(&session_id);
                return Err(err);
            }
        };

        let spawned = self
            .command_for(kind)
            .and_then(|mut command| {
                command.spawn().map_err(|err| ToolError::Spawn {
                    kind,
                    reason: err.to_string(),
                })
            });
        let child = match spawned {
            Ok(child) => child,
            Err(err) => {
                self.arbiter.release(&lease);
                error!("{kind} session {session_id} failed to start: {err}");
                guard.crash(&session_id, err.to_string());
                return Err(err);
            }
        };

        let pid = child.id();
        let (stop_tx, stop_rx) = oneshot::channel();
        guard.process = Some(ExternalProcess {
            pid,
            state: ProcessState::Running,
            stop_tx: Some(stop_tx),
            lease: lease.clone(),
        });
        if let Err(err) = guard.advance(&session_id, SessionState::Running) {
            warn!("{kind}: {err:#}");
        }
        info!(
            "{kind} worker running (pid {}, session {session_id})",
            pid.map_or_else(|| "?".to_string(), |pid| pid.to_string())
        );

        tokio::spawn(watch_child(
            Arc::clone(&self.registry),
            Arc::clone(&self.arbiter),
            Arc::clone(&self.controller),
            kind,
            session_id,
            child,
            stop_rx,
        ));
        Ok(StartOutcome::Started)
    }

    /// Graceful signal, then a kill if the worker is still alive after
    /// `grace`. Never waits longer than `grace` plus a short reaping budget.
    pub async fn stop(&self, kind: ToolKind, grace: Duration) -> StopOutcome {
        let slot = self.registry.slot(kind);
        let (session_id, stop_tx) = {
            let mut guard = slot.lock().await;
            let Some(session_id) = guard.session_id().map(str::to_string) else {
                return StopOutcome::NotRunning;
            };
            let Some(process) = guard.process.as_mut() else {
                return StopOutcome::NotRunning;
            };
            match process.state {
                ProcessState::Running => {}
                ProcessState::Terminating => {
                    drop(guard);
                    self.registry
                        .wait_until_settled(kind, &session_id, grace + ESCALATION_BUDGET)
                        .await;
                    return StopOutcome::Stopped;
                }
                ProcessState::NotStarted | ProcessState::Stopped => return StopOutcome::NotRunning,
            }
            process.state = ProcessState::Terminating;
            let stop_tx = process.stop_tx.take();
            if let Err(err) = guard.advance(&session_id, SessionState::Stopping) {
                warn!("{kind}: {err:#}");
            }
            (session_id, stop_tx)
        };

        info!("stopping {kind} worker (session {session_id}, grace {}ms)", grace.as_millis());
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = stop_tx
            .map(|tx| {
                tx.send(StopRequest {
                    grace,
                    reply: reply_tx,
                })
                .is_ok()
            })
            .unwrap_or(false);

        if sent {
            let reply = tokio::time::timeout(grace + ESCALATION_BUDGET, reply_rx).await;
            if let Ok(Ok(outcome)) = reply {
                return outcome;
            }
            warn!("{kind} worker did not confirm exit in time");
        }

        // The waiter already saw the process exit, or it is wedged; settle
        // the slot from here.
        if !self
            .registry
            .wait_until_settled(kind, &session_id, ESCALATION_BUDGET)
            .await
        {
            let mut guard = slot.lock().await;
            if let Some(process) = guard.process.as_mut() {
                process.state = ProcessState::Stopped;
                self.arbiter.release(&process.lease);
            }
            if let Err(err) = guard.finish(&session_id) {
                warn!("{kind}: {err:#}");
            }
        }
        StopOutcome::Stopped
    }

    pub async fn is_running(&self, kind: ToolKind) -> bool {
        let slot = self.registry.slot(kind);
        let guard = slot.lock().await;
        guard
            .process
            .as_ref()
            .is_some_and(|p| matches!(p.state, ProcessState::Running | ProcessState::Terminating))
    }

    pub async fn process_state(&self, kind: ToolKind) -> ProcessState {
        let slot = self.registry.slot(kind);
        let guard = slot.lock().await;
        guard
            .process
            .as_ref()
            .map_or(ProcessState::NotStarted, |p| p.state)
    }
}

/// Owns the child for its whole life: either it exits on its own, or a stop
/// request drives it through interrupt, grace period and kill.
async fn watch_child(
    registry: Arc<SessionRegistry>,
    arbiter: Arc<CameraArbiter>,
    controller: Arc<dyn ProcessController>,
    kind: ToolKind,
    session_id: String,
    mut child: Child,
    mut stop_rx: oneshot::Receiver<StopRequest>,
) {
    let request = tokio::select! {
        status = child.wait() => {
            let slot = registry.slot(kind);
            let mut guard = slot.lock().await;
            if let Some(process) = guard.process.as_mut() {
                arbiter.release(&process.lease);
                process.state = ProcessState::NotStarted;
                process.pid = None;
                process.stop_tx = None;
            }
            match status {
                Ok(status) if status.success() => {
                    info!("{kind} worker exited on its own ({status})");
                    if let Err(err) = guard.finish(&session_id) {
                        warn!("{kind}: {err:#}");
                    }
                }
                Ok(status) => {
                    warn!("{kind} worker exited on its own ({status})");
                    guard.crash(&session_id, format!("worker exited with {status}"));
                }
                Err(err) => {
                    error!("{kind} worker could not be waited on: {err}");
                    guard.crash(&session_id, format!("worker wait failed: {err}"));
                }
            }
            return;
        }
        request = &mut stop_rx => match request {
            Ok(request) => request,
            // Sender dropped without a request: the slot was reset under us.
            Err(_) => return,
        },
    };

    let outcome = terminate(controller.as_ref(), kind, &mut child, request.grace).await;

    let slot = registry.slot(kind);
    let mut guard = slot.lock().await;
    if let Some(process) = guard.process.as_mut() {
        arbiter.release(&process.lease);
        process.state = ProcessState::Stopped;
        process.pid = None;
    }
    if let Err(err) = guard.finish(&session_id) {
        warn!("{kind}: {err:#}");
    }
    drop(guard);

    info!("{kind} worker {outcome:?} (session {session_id})");
    let _ = request.reply.send(outcome);
}

async fn terminate(
    controller: &dyn ProcessController,
    kind: ToolKind,
    child: &mut Child,
    grace: Duration,
) -> StopOutcome {
    if let Err(err) = controller.interrupt(child) {
        warn!("{kind} worker interrupt failed: {err:#}");
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!("{kind} worker exited after interrupt ({status})");
            return StopOutcome::Stopped;
        }
        Ok(Err(err)) => warn!("{kind} worker wait failed: {err}"),
        Err(_) => warn!(
            "{}; killing it",
            ToolError::GracefulStopTimeout {
                kind,
                grace_ms: grace.as_millis() as u64,
            }
        ),
    }

    if let Err(err) = controller.kill(child) {
        error!("{kind} worker kill failed: {err:#}");
    }
    if let Err(err) = child.wait().await {
        error!("{kind} worker could not be reaped: {err}");
    }
    StopOutcome::ForceKilled
}

impl Supervisor for ExternalProcessSupervisor {
    fn name(&self) -> &'static str {
        "external"
    }

    fn running_kinds(&self) -> BoxFuture<'_, Vec<ToolKind>> {
        async move {
            let mut kinds = Vec::new();
            for kind in ToolKind::ALL {
                if self.is_running(kind).await {
                    kinds.push(kind);
                }
            }
            kinds
        }
        .boxed()
    }

    fn shutdown(&self, kind: ToolKind, grace: Duration) -> BoxFuture<'_, ToolResult<StopOutcome>> {
        async move { Ok(self.stop(kind, grace).await) }.boxed()
    }

    /// Reply wait after the grace period, then the fallback settle wait.
    fn stop_budget(&self, grace: Duration) -> Duration {
        grace + ESCALATION_BUDGET * 2
    }
}

/// Arguments that re-launch this executable as a worker for `kind` with the
/// host's settings file and camera source.
fn worker_args(kind: ToolKind, settings: &Settings, extra: Vec<String>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["worker".into(), "--tool".into(), kind.to_string().into()];
    if let Some(path) = &settings.source_path {
        args.push("--config".into());
        args.push(path.clone().into_os_string());
    }
    if settings.camera.source == CameraSource::Synthetic {
        args.push("--synthetic".into());
    }
    args.extend(extra.into_iter().map(OsString::from));
    args
}
