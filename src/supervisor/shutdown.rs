use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use log::{error, info, warn};
use serde::Serialize;

use crate::models::ToolKind;

use super::{StopOutcome, Supervisor};

/// Slack on top of the longest stop budget when the configured shutdown
/// timeout is too short to cover it.
const SETTLE_MARGIN: Duration = Duration::from_millis(500);

/// What happened to each session during shutdown.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownReport {
    pub stopped: Vec<ToolKind>,
    pub force_killed: Vec<ToolKind>,
    pub failed: Vec<(ToolKind, String)>,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

impl ShutdownReport {
    pub fn total(&self) -> usize {
        self.stopped.len() + self.force_killed.len() + self.failed.len()
    }
}

/// Drives every registered supervisor to a stopped state once, at host exit.
pub struct ShutdownCoordinator {
    supervisors: Vec<Arc<dyn Supervisor>>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// `grace` is the per-worker graceful window, usually shorter than the
    /// one used for on-demand stops.
    pub fn new(supervisors: Vec<Arc<dyn Supervisor>>, grace: Duration) -> Self {
        Self { supervisors, grace }
    }

    /// Stops everything concurrently. Individual failures are logged and
    /// reported, never propagated. Each stop is bounded on its own, so one
    /// wedged worker cannot hide the outcome of the others.
    ///
    /// `timeout` is raised to exceed the longest single stop budget;
    /// otherwise a session that would have stopped in time is reported as
    /// timed out.
    pub async fn shutdown_all(&self, timeout: Duration) -> ShutdownReport {
        let started = Instant::now();
        let mut targets = Vec::new();
        for supervisor in &self.supervisors {
            for kind in supervisor.running_kinds().await {
                targets.push((Arc::clone(supervisor), kind));
            }
        }

        if targets.is_empty() {
            info!("shutdown: nothing running");
            return ShutdownReport::default();
        }
        info!("shutdown: stopping {} session(s)", targets.len());

        let grace = self.grace;
        let longest = targets
            .iter()
            .map(|(supervisor, _)| supervisor.stop_budget(grace))
            .max()
            .unwrap_or_default();
        let timeout = if timeout <= longest {
            let raised = longest + SETTLE_MARGIN;
            warn!(
                "shutdown: timeout {}ms does not cover a {}ms stop; using {}ms",
                timeout.as_millis(),
                longest.as_millis(),
                raised.as_millis()
            );
            raised
        } else {
            timeout
        };
        let deadline = tokio::time::Instant::from_std(started + timeout);

        let stops = targets.iter().map(|(supervisor, kind)| {
            let kind = *kind;
            async move {
                let outcome =
                    tokio::time::timeout_at(deadline, supervisor.shutdown(kind, grace)).await;
                (kind, supervisor.name(), outcome)
            }
        });

        let mut report = ShutdownReport::default();
        for (kind, name, outcome) in join_all(stops).await {
            match outcome {
                Ok(Ok(StopOutcome::Stopped)) | Ok(Ok(StopOutcome::NotRunning)) => {
                    report.stopped.push(kind)
                }
                Ok(Ok(StopOutcome::ForceKilled)) => {
                    warn!("shutdown: {name} {kind} worker had to be killed");
                    report.force_killed.push(kind);
                }
                Ok(Err(err)) => {
                    error!("shutdown: {name} {kind} failed to stop: {err}");
                    report.failed.push((kind, err.to_string()));
                }
                Err(_) => {
                    error!(
                        "shutdown: {name} {kind} still stopping after {}ms",
                        timeout.as_millis()
                    );
                    report.timed_out = true;
                    report.failed.push((kind, "shutdown timed out".into()));
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "shutdown: {} stopped, {} killed, {} failed in {}ms",
            report.stopped.len(),
            report.force_killed.len(),
            report.failed.len(),
            report.elapsed_ms
        );
        report
    }
}
