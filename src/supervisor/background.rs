use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::camera::{CameraArbiter, LeaseGuard};
use crate::error::{ToolError, ToolResult};
use crate::models::{SessionState, ToolKind};
use crate::stream::{frame_feed, FrameStreamSession, LoopStats, SessionParts};
use crate::tools::{build_strategy, ToolContext};
use crate::vision::VisionProvider;

use super::registry::{BackgroundTask, SessionRegistry};
use super::{StartOutcome, StopOutcome, Supervisor};

/// Starts and stops in-process frame loops.
///
/// `start` marks the slot `Starting` under the slot lock before any work is
/// done, so concurrent starts for one kind spawn at most one loop.
pub struct BackgroundTaskSupervisor {
    registry: Arc<SessionRegistry>,
    arbiter: Arc<CameraArbiter>,
    vision: Arc<dyn VisionProvider>,
    tools: ToolContext,
    retain_frames: bool,
}

impl BackgroundTaskSupervisor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        arbiter: Arc<CameraArbiter>,
        vision: Arc<dyn VisionProvider>,
        tools: ToolContext,
    ) -> Self {
        Self {
            registry,
            arbiter,
            vision,
            tools,
            retain_frames: true,
        }
    }

    /// Sessions started from here keep no frame subscriber in their slot.
    /// With no one watching, the loop skips encoding.
    pub fn without_frame_feed(mut self) -> Self {
        self.retain_frames = false;
        self
    }

    pub async fn start(&self, kind: ToolKind) -> ToolResult<StartOutcome> {
        let slot = self.registry.slot(kind);
        let (session_id, cancel) = {
            let mut guard = slot.lock().await;
            if guard.is_active() {
                return Ok(StartOutcome::AlreadyRunning);
            }
            let session_id = guard
                .begin(self.tools.settings.cooldown_ms)
                .map_err(|err| ToolError::LoopFault {
                    kind,
                    reason: format!("{err:#}"),
                })?
                .id
                .clone();
            let cancel = CancellationToken::new();
            guard.task = Some(BackgroundTask {
                cancel: cancel.clone(),
                handle: None,
                lease: None,
            });
            (session_id, cancel)
        };

        info!("starting {kind} session {session_id}");
        match self.launch(kind, &session_id, cancel).await {
            Ok(()) => Ok(StartOutcome::Started),
            Err(err @ ToolError::ResourceBusy { .. }) => {
                info!("{kind} not started: {err}");
                slot.lock().await.abandon(&session_id);
                Err(err)
            }
            Err(err) => {
                error!("{kind} session {session_id} failed to start: {err}");
                slot.lock().await.crash(&session_id, err.to_string());
                Err(err)
            }
        }
    }

    async fn launch(
        &self,
        kind: ToolKind,
        session_id: &str,
        cancel: CancellationToken,
    ) -> ToolResult<()> {
        let settings = Arc::clone(&self.tools.settings);
        let lease = self.arbiter.acquire(kind, session_id)?;
        let lease_guard = LeaseGuard::new(Arc::clone(&self.arbiter), lease.clone());

        let strategy = build_strategy(kind, &self.tools).map_err(|err| ToolError::InvalidConfig {
            kind,
            reason: format!("{err:#}"),
        })?;

        let opened = {
            let arbiter = Arc::clone(&self.arbiter);
            let camera = settings.camera.clone();
            let lease = lease.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || arbiter.open_device(&lease, &camera, &cancel))
                .await
                .map_err(|err| ToolError::LoopFault {
                    kind,
                    reason: format!("camera open panicked: {err}"),
                })?
        };

        let slot = self.registry.slot(kind);
        let device = match opened {
            Ok(device) => device,
            Err(_) if cancel.is_cancelled() => {
                drop(lease_guard);
                info!("{kind} session {session_id} stopped before the camera opened");
                slot.lock().await.finish(session_id).ok();
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let (publisher, subscriber) = frame_feed();
        let stats = Arc::new(LoopStats::default());
        let session = FrameStreamSession::new(SessionParts {
            session_id: session_id.to_string(),
            device,
            strategy,
            vision: Arc::clone(&self.vision),
            publisher,
            stats: Arc::clone(&stats),
            cooldown: settings.cooldown(),
            jpeg_quality: settings.jpeg_quality,
            max_read_failures: settings.camera.max_consecutive_read_failures,
            lease: lease_guard,
        });

        let mut guard = slot.lock().await;
        if cancel.is_cancelled() {
            drop(session);
            info!("{kind} session {session_id} stopped before its loop ran");
            guard.finish(session_id).ok();
            return Ok(());
        }

        guard
            .advance(session_id, SessionState::Running)
            .map_err(|err| ToolError::LoopFault {
                kind,
                reason: format!("{err:#}"),
            })?;
        if self.retain_frames {
            guard.frames = Some(subscriber);
        }
        guard.stats = Some(stats);

        let handle = tokio::spawn(supervise(
            Arc::clone(&self.registry),
            kind,
            session_id.to_string(),
            session,
            cancel,
        ));
        if let Some(task) = guard.task.as_mut() {
            task.handle = Some(handle);
            task.lease = Some(lease);
        }
        info!("{kind} session {session_id} running");
        Ok(())
    }

    /// Cancels the loop and waits up to `stop_timeout` for it to settle.
    pub async fn stop(&self, kind: ToolKind) -> StopOutcome {
        self.stop_within(kind, self.tools.settings.stop_timeout()).await
    }

    /// Cancels the loop and waits up to `budget` for it to settle, plus one
    /// open retry delay if the camera is still being opened. A loop stuck
    /// past that is aborted and its lease released here.
    pub async fn stop_within(&self, kind: ToolKind, budget: Duration) -> StopOutcome {
        let slot = self.registry.slot(kind);
        let (session_id, was_starting, abort, lease) = {
            let mut guard = slot.lock().await;
            let state = guard.state();
            if guard.task.is_none() || !state.is_active() {
                return StopOutcome::NotRunning;
            }
            let Some(session_id) = guard.session_id().map(str::to_string) else {
                return StopOutcome::NotRunning;
            };
            if state == SessionState::Running {
                if let Err(err) = guard.advance(&session_id, SessionState::Stopping) {
                    warn!("{kind}: {err:#}");
                }
            }
            let Some(task) = guard.task.as_ref() else {
                return StopOutcome::NotRunning;
            };
            task.cancel.cancel();
            (
                session_id,
                state == SessionState::Starting,
                task.handle.as_ref().map(|handle| handle.abort_handle()),
                task.lease.clone(),
            )
        };

        info!("stopping {kind} session {session_id}");
        let mut budget = budget;
        if was_starting {
            budget += self.open_retry_delay();
        }

        if self
            .registry
            .wait_until_settled(kind, &session_id, budget)
            .await
        {
            return StopOutcome::Stopped;
        }

        warn!(
            "{kind} loop did not stop within {}ms; aborting it",
            budget.as_millis()
        );
        if let Some(abort) = abort {
            abort.abort();
        }
        if let Some(lease) = lease {
            self.arbiter.release(&lease);
        }
        if let Err(err) = slot.lock().await.finish(&session_id) {
            warn!("{kind}: {err:#}");
        }
        StopOutcome::Stopped
    }

    fn open_retry_delay(&self) -> Duration {
        Duration::from_millis(self.tools.settings.camera.open_retry_delay_ms)
    }

    pub async fn is_running(&self, kind: ToolKind) -> bool {
        let slot = self.registry.slot(kind);
        let guard = slot.lock().await;
        guard.task.is_some() && guard.is_active()
    }
}

/// Runs the loop and records how it ended. Faults and panics become a
/// `Crashed` session; the host keeps running.
async fn supervise(
    registry: Arc<SessionRegistry>,
    kind: ToolKind,
    session_id: String,
    session: FrameStreamSession,
    cancel: CancellationToken,
) {
    let outcome = AssertUnwindSafe(session.run(cancel)).catch_unwind().await;

    let slot = registry.slot(kind);
    let mut guard = slot.lock().await;
    match outcome {
        Ok(Ok(_frames)) => {
            if let Err(err) = guard.finish(&session_id) {
                warn!("{kind}: {err:#}");
            }
            info!("{kind} session {session_id} stopped");
        }
        Ok(Err(err)) => {
            error!("{kind} session {session_id} crashed: {err}");
            guard.crash(&session_id, err.to_string());
        }
        Err(_) => {
            let err = ToolError::LoopFault {
                kind,
                reason: "loop panicked".into(),
            };
            error!("{kind} session {session_id} crashed: {err}");
            guard.crash(&session_id, err.to_string());
        }
    }
}

impl Supervisor for BackgroundTaskSupervisor {
    fn name(&self) -> &'static str {
        "in-process"
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
        async move { Ok(self.stop_within(kind, grace).await) }.boxed()
    }

    fn stop_budget(&self, grace: Duration) -> Duration {
        grace + self.open_retry_delay()
    }
}
