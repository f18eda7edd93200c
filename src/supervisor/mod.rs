//! Lifecycle control for tool sessions: in-process loops, worker processes,
//! and the shutdown fan-out over both.

pub mod background;
pub mod process;
pub mod registry;
pub mod shutdown;
pub mod signals;

pub use background::BackgroundTaskSupervisor;
pub use process::{ExternalProcessSupervisor, ProcessState};
pub use registry::{SessionRegistry, SlotSnapshot};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use signals::{shutdown_signal, PlatformController, ProcessController};

use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;

use crate::error::ToolResult;
use crate::models::ToolKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    /// The worker ignored the graceful signal and was killed.
    ForceKilled,
    NotRunning,
}

/// The part of a supervisor the shutdown path needs.
pub trait Supervisor: Send + Sync {
    fn name(&self) -> &'static str;

    fn running_kinds(&self) -> BoxFuture<'_, Vec<ToolKind>>;

    /// Stops `kind`, giving it `grace` to wind down before it is killed or
    /// aborted.
    fn shutdown(&self, kind: ToolKind, grace: Duration) -> BoxFuture<'_, ToolResult<StopOutcome>>;

    /// Upper bound on one `shutdown(kind, grace)` call.
    fn stop_budget(&self, grace: Duration) -> Duration {
        grace
    }
}
