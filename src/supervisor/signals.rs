//! Platform differences in stopping a child process.

use anyhow::{Context, Result};
use tokio::process::Child;

/// Sends the polite and the forceful stop to a worker process.
pub trait ProcessController: Send + Sync {
    /// Asks the process to exit on its own.
    fn interrupt(&self, child: &mut Child) -> Result<()>;

    /// Kills the process outright.
    fn kill(&self, child: &mut Child) -> Result<()>;
}

/// SIGINT then SIGKILL on Unix. Elsewhere both steps terminate the process,
/// since there is no interrupt to deliver to a console-less child.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformController;

impl ProcessController for PlatformController {
    #[cfg(unix)]
    fn interrupt(&self, child: &mut Child) -> Result<()> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            // Already reaped.
            return Ok(());
        };
        signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT)
            .with_context(|| format!("Failed to send SIGINT to {pid}"))
    }

    #[cfg(not(unix))]
    fn interrupt(&self, child: &mut Child) -> Result<()> {
        child.start_kill().context("Failed to terminate worker")
    }

    fn kill(&self, child: &mut Child) -> Result<()> {
        child.start_kill().context("Failed to kill worker")
    }
}

/// Resolves once the host is asked to terminate (Ctrl-C, or SIGTERM on Unix).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
