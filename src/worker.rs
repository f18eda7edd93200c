//! Headless single-tool process. This is what the host spawns for tools
//! configured with an external launch mode.

use anyhow::{bail, Result};
use log::{info, warn};

use crate::models::{SessionState, ToolKind};
use crate::settings::Settings;
use crate::supervisor::{shutdown_signal, StartOutcome, StopOutcome};
use crate::AppState;

/// Runs `kind` until SIGINT/SIGTERM or until its loop ends on its own.
/// Returns an error when the session crashed so the parent sees a
/// non-zero exit status.
pub async fn run_worker(kind: ToolKind, settings: Settings) -> Result<()> {
    let state = AppState::headless_with_system_defaults(settings);

    if state.background.start(kind).await? == StartOutcome::AlreadyRunning {
        bail!("{kind} is already running in this worker");
    }
    info!("worker for {kind} started (pid {})", std::process::id());

    let mut signals = state.registry.slot(kind).lock().await.subscribe();
    let ended = async {
        // A closed sender means the registry is gone; treat it as ended.
        let _ = signals.wait_for(|signal| signal.state.is_terminal()).await;
    };

    tokio::select! {
        _ = shutdown_signal() => {
            info!("worker for {kind} received termination request");
            match state.background.stop(kind).await {
                StopOutcome::ForceKilled => warn!("{kind} loop had to be aborted"),
                StopOutcome::Stopped | StopOutcome::NotRunning => {}
            }
        }
        _ = ended => {}
    }

    let final_state = state.registry.state(kind).await;
    state.shutdown_all().await;
    if final_state == SessionState::Crashed {
        bail!("{kind} session crashed");
    }
    info!("worker for {kind} exited cleanly");
    Ok(())
}
