use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::camera::CameraLease;
use crate::models::{Session, SessionState, ToolKind};
use crate::stream::{FrameSubscriber, LoopStats};

use super::process::ExternalProcess;

/// Last published state of a slot, tagged with the session it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSignal {
    pub session_id: Option<String>,
    pub state: SessionState,
}

/// In-process loop owned by a session.
pub struct BackgroundTask {
    pub(crate) cancel: CancellationToken,
    pub(crate) handle: Option<JoinHandle<()>>,
    pub(crate) lease: Option<CameraLease>,
}

impl BackgroundTask {
    /// Whether the loop's task is still executing.
    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

/// Everything the host knows about one tool kind.
pub struct SessionSlot {
    kind: ToolKind,
    pub(crate) session: Option<Session>,
    pub(crate) task: Option<BackgroundTask>,
    pub(crate) process: Option<ExternalProcess>,
    pub(crate) frames: Option<FrameSubscriber>,
    pub(crate) stats: Option<Arc<LoopStats>>,
    signal: watch::Sender<StateSignal>,
}

impl SessionSlot {
    fn new(kind: ToolKind) -> Self {
        let (signal, _) = watch::channel(StateSignal {
            session_id: None,
            state: SessionState::Idle,
        });
        Self {
            kind,
            session: None,
            task: None,
            process: None,
            frames: None,
            stats: None,
            signal,
        }
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or_default()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.id.as_str())
    }

    /// True while a worker exists or is being brought up.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Replaces any finished session with a fresh one in `Starting`.
    pub(crate) fn begin(&mut self, cooldown_ms: u64) -> Result<&Session> {
        let mut session = Session::new(self.kind, cooldown_ms);
        session.transition(SessionState::Starting)?;
        self.task = None;
        self.process = None;
        self.frames = None;
        self.stats = None;
        self.session = Some(session);
        self.publish();
        self.session
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("session slot for {} is empty", self.kind))
    }

    /// Moves the current session along, if `session_id` still owns the slot.
    pub(crate) fn advance(&mut self, session_id: &str, next: SessionState) -> Result<bool> {
        let Some(session) = self.session.as_mut().filter(|s| s.id == session_id) else {
            return Ok(false);
        };
        if session.state == next {
            return Ok(false);
        }
        session.transition(next)?;
        self.publish();
        Ok(true)
    }

    /// Walks a live session forward to `Stopped` through whichever of the
    /// remaining states it has not passed yet.
    pub(crate) fn finish(&mut self, session_id: &str) -> Result<()> {
        for next in [
            SessionState::Running,
            SessionState::Stopping,
            SessionState::Stopped,
        ] {
            let Some(session) = self.session.as_ref().filter(|s| s.id == session_id) else {
                return Ok(());
            };
            if session.state.is_terminal() {
                break;
            }
            if session.state.can_transition_to(next) {
                self.advance(session_id, next)?;
            }
        }
        self.record_last_action();
        self.frames = None;
        Ok(())
    }

    pub(crate) fn crash(&mut self, session_id: &str, reason: impl Into<String>) {
        let Some(session) = self.session.as_mut().filter(|s| s.id == session_id) else {
            return;
        };
        session.crash(reason);
        self.record_last_action();
        self.frames = None;
        self.publish();
    }

    /// Copies the loop's last dispatch time onto the session record.
    fn record_last_action(&mut self) {
        let Some(at) = self.stats.as_ref().and_then(|stats| stats.last_action_at()) else {
            return;
        };
        if let Some(session) = self.session.as_mut() {
            session.last_action_at = Some(at);
        }
    }

    /// Drops a session that never got its worker, returning the slot to idle.
    pub(crate) fn abandon(&mut self, session_id: &str) {
        if self.session_id() != Some(session_id) {
            return;
        }
        self.session = None;
        self.task = None;
        self.process = None;
        self.frames = None;
        self.stats = None;
        self.publish();
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<StateSignal> {
        self.signal.subscribe()
    }

    fn publish(&self) {
        self.signal.send_replace(StateSignal {
            session_id: self.session.as_ref().map(|s| s.id.clone()),
            state: self.state(),
        });
    }

    pub fn snapshot(&self, launch: &'static str) -> SlotSnapshot {
        let session = self.session.as_ref();
        let last_action_at = self
            .stats
            .as_ref()
            .and_then(|stats| stats.last_action_at())
            .or_else(|| session.and_then(|s| s.last_action_at));
        SlotSnapshot {
            kind: self.kind,
            launch,
            state: self.state(),
            session_id: session.map(|s| s.id.clone()),
            started_at: session.map(|s| s.started_at),
            stopped_at: session.and_then(|s| s.stopped_at),
            last_action_at,
            cooldown_ms: session.map(|s| s.cooldown_ms),
            fault: session.and_then(|s| s.fault.clone()),
            frames: self.stats.as_ref().map(|stats| stats.frames()).unwrap_or(0),
            worker_alive: self.task.as_ref().is_some_and(BackgroundTask::is_alive),
            process: self.process.as_ref().map(|p| p.state()),
            pid: self.process.as_ref().and_then(|p| p.pid()),
        }
    }
}

/// Serializable view of a slot for the listing endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSnapshot {
    pub kind: ToolKind,
    pub launch: &'static str,
    pub state: SessionState,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_action_at: Option<DateTime<Utc>>,
    pub cooldown_ms: Option<u64>,
    pub fault: Option<String>,
    pub frames: u64,
    pub worker_alive: bool,
    pub process: Option<super::process::ProcessState>,
    pub pid: Option<u32>,
}

/// Fixed map from tool kind to its slot. Each slot has its own lock; there
/// is no lock spanning tools.
pub struct SessionRegistry {
    slots: BTreeMap<ToolKind, Arc<Mutex<SessionSlot>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let slots = ToolKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::new(Mutex::new(SessionSlot::new(kind)))))
            .collect();
        Self { slots }
    }

    pub fn slot(&self, kind: ToolKind) -> Arc<Mutex<SessionSlot>> {
        // Every kind is inserted in `new`.
        match self.slots.get(&kind) {
            Some(slot) => Arc::clone(slot),
            None => Arc::new(Mutex::new(SessionSlot::new(kind))),
        }
    }

    pub async fn state(&self, kind: ToolKind) -> SessionState {
        self.slot(kind).lock().await.state()
    }

    pub async fn frames(&self, kind: ToolKind) -> Option<FrameSubscriber> {
        self.slot(kind).lock().await.frames.clone()
    }

    /// Waits until `session_id` reaches a terminal state or gives up its slot.
    /// Returns false on timeout.
    pub async fn wait_until_settled(
        &self,
        kind: ToolKind,
        session_id: &str,
        timeout: Duration,
    ) -> bool {
        let mut rx = self.slot(kind).lock().await.subscribe();
        let settled = rx.wait_for(|signal| {
            signal.session_id.as_deref() != Some(session_id) || signal.state.is_terminal()
        });
        let settled_in_time = matches!(tokio::time::timeout(timeout, settled).await, Ok(Ok(_)));
        settled_in_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finish_walks_forward_from_any_live_state() {
        let registry = SessionRegistry::new();
        let slot = registry.slot(ToolKind::ZoomControl);
        let mut guard = slot.lock().await;
        let id = guard.begin(3000).unwrap().id.clone();
        guard.finish(&id).unwrap();
        assert_eq!(guard.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn stale_session_id_is_ignored() {
        let registry = SessionRegistry::new();
        let slot = registry.slot(ToolKind::GestureNav);
        let mut guard = slot.lock().await;
        let old = guard.begin(3000).unwrap().id.clone();
        guard.finish(&old).unwrap();
        guard.begin(3000).unwrap();
        guard.crash(&old, "late report");
        assert_eq!(guard.state(), SessionState::Starting);
    }

    #[tokio::test]
    async fn waiters_wake_on_terminal_state() {
        let registry = Arc::new(SessionRegistry::new());
        let id = {
            let slot = registry.slot(ToolKind::FaceOverlay);
            let mut guard = slot.lock().await;
            let id = guard.begin(3000).unwrap().id.clone();
            guard.advance(&id, SessionState::Running).unwrap();
            id
        };

        let waiter = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tokio::spawn(async move {
                registry
                    .wait_until_settled(ToolKind::FaceOverlay, &id, Duration::from_secs(2))
                    .await
            })
        };

        registry
            .slot(ToolKind::FaceOverlay)
            .lock()
            .await
            .crash(&id, "boom");
        assert!(waiter.await.unwrap());
        assert_eq!(
            registry.state(ToolKind::FaceOverlay).await,
            SessionState::Crashed
        );
    }
}
