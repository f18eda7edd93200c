use thiserror::Error;

use crate::models::ToolKind;

/// Failures a tool session can report back to its caller.
///
/// Anything that happens inside a running loop is contained there and turned
/// into a session state change; only arbitration and startup failures reach
/// the request that triggered them.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The camera is leased to another session.
    #[error("camera is in use by {holder}")]
    ResourceBusy { holder: ToolKind },

    /// A single frame read failed; the loop skips the iteration.
    #[error("frame read failed: {0}")]
    TransientRead(String),

    /// An external worker ignored the graceful signal for the whole grace period.
    #[error("{kind} worker did not exit within {grace_ms}ms")]
    GracefulStopTimeout { kind: ToolKind, grace_ms: u64 },

    /// Unhandled fault inside a session loop.
    #[error("{kind} loop faulted: {reason}")]
    LoopFault { kind: ToolKind, reason: String },

    /// The camera could not be opened after the configured retries.
    #[error("camera {index} could not be opened after {attempts} attempts")]
    Startup { index: u32, attempts: u32 },

    /// The tool could not be built from the current settings.
    #[error("invalid {kind} configuration: {reason}")]
    InvalidConfig { kind: ToolKind, reason: String },

    /// The external worker program could not be spawned.
    #[error("failed to spawn {kind} worker: {reason}")]
    Spawn { kind: ToolKind, reason: String },
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;
