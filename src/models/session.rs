use std::fmt;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    GestureNav,
    ThreatOverlay,
    ZoomControl,
    FaceOverlay,
    VolumeControl,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::GestureNav,
        ToolKind::ThreatOverlay,
        ToolKind::ZoomControl,
        ToolKind::FaceOverlay,
        ToolKind::VolumeControl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::GestureNav => "gesture-nav",
            ToolKind::ThreatOverlay => "threat-overlay",
            ToolKind::ZoomControl => "zoom-control",
            ToolKind::FaceOverlay => "face-overlay",
            ToolKind::VolumeControl => "volume-control",
        }
    }

    /// Whether camera frames are mirrored before detection.
    pub fn mirrors_frames(&self) -> bool {
        matches!(self, ToolKind::ThreatOverlay | ToolKind::ZoomControl)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        ToolKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| anyhow!("unknown tool kind '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Crashed => "crashed",
        }
    }

    /// Forward path is Idle -> Starting -> Running -> Stopping -> Stopped.
    /// Any state may fall into Crashed.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (_, Crashed)
        )
    }

    /// A worker exists (or is about to) for this session.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Running | SessionState::Stopping
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Crashed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub kind: ToolKind,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_action_at: Option<DateTime<Utc>>,
    pub cooldown_ms: u64,
    pub fault: Option<String>,
}

impl Session {
    pub fn new(kind: ToolKind, cooldown_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            state: SessionState::Idle,
            started_at: Utc::now(),
            stopped_at: None,
            last_action_at: None,
            cooldown_ms,
            fault: None,
        }
    }

    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(anyhow!(
                "session {} ({}) cannot move from {} to {}",
                self.id,
                self.kind,
                self.state.as_str(),
                next.as_str()
            ));
        }
        self.state = next;
        if next.is_terminal() {
            self.stopped_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn crash(&mut self, reason: impl Into<String>) {
        self.state = SessionState::Crashed;
        self.stopped_at = Some(Utc::now());
        self.fault = Some(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_path_is_accepted() {
        let mut session = Session::new(ToolKind::GestureNav, 3000);
        for next in [
            SessionState::Starting,
            SessionState::Running,
            SessionState::Stopping,
            SessionState::Stopped,
        ] {
            session.transition(next).unwrap();
        }
        assert!(session.stopped_at.is_some());
    }

    #[test]
    fn skipping_states_is_rejected() {
        let mut session = Session::new(ToolKind::ZoomControl, 3000);
        assert!(session.transition(SessionState::Running).is_err());
        assert_eq!(session.state, SessionState::Idle);

        session.transition(SessionState::Starting).unwrap();
        assert!(session.transition(SessionState::Stopped).is_err());
    }

    #[test]
    fn any_state_can_crash() {
        let mut session = Session::new(ToolKind::FaceOverlay, 3000);
        session.transition(SessionState::Crashed).unwrap();
        assert_eq!(session.state, SessionState::Crashed);
        assert!(!session.state.can_transition_to(SessionState::Starting));
    }

    #[test]
    fn tool_kind_round_trips_through_its_path_name() {
        for kind in ToolKind::ALL {
            assert_eq!(kind.as_str().parse::<ToolKind>().unwrap(), kind);
        }
        assert!("tool9".parse::<ToolKind>().is_err());
    }
}
