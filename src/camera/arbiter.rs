use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolResult};
use crate::models::ToolKind;
use crate::settings::CameraSettings;

use super::{CameraBackend, CaptureDevice};

const RETRY_SLICE: Duration = Duration::from_millis(10);

/// Exclusive claim on the capture resource, bound to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraLease {
    kind: ToolKind,
    session_id: String,
    generation: u64,
}

impl CameraLease {
    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Hands out at most one live [`CameraLease`] at a time.
///
/// The lock only guards the holder slot; opening and dropping devices happens
/// after it is released.
pub struct CameraArbiter {
    holder: Mutex<Option<CameraLease>>,
    next_generation: AtomicU64,
    backend: Arc<dyn CameraBackend>,
}

impl CameraArbiter {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            holder: Mutex::new(None),
            next_generation: AtomicU64::new(1),
            backend,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<CameraLease>> {
        match self.holder.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claims the camera for `session_id`. Fails fast with
    /// [`ToolError::ResourceBusy`] when another session holds it; asking again
    /// from the holding session returns the existing lease.
    pub fn acquire(&self, kind: ToolKind, session_id: &str) -> ToolResult<CameraLease> {
        let mut slot = self.slot();
        match slot.as_ref() {
            Some(current) if current.session_id == session_id => Ok(current.clone()),
            Some(current) => Err(ToolError::ResourceBusy {
                holder: current.kind,
            }),
            None => {
                let lease = CameraLease {
                    kind,
                    session_id: session_id.to_string(),
                    generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                };
                *slot = Some(lease.clone());
                drop(slot);
                info!("camera leased to {kind} session {session_id}");
                Ok(lease)
            }
        }
    }

    /// Frees the camera if `lease` is still the live one. Stale, repeated or
    /// foreign leases are ignored. Returns whether anything was released.
    pub fn release(&self, lease: &CameraLease) -> bool {
        let mut slot = self.slot();
        let released = match slot.as_ref() {
            Some(current) if current.generation == lease.generation => {
                *slot = None;
                true
            }
            _ => false,
        };
        drop(slot);

        if released {
            info!(
                "camera released by {} session {}",
                lease.kind, lease.session_id
            );
        } else {
            debug!(
                "ignoring release of stale camera lease from {} session {}",
                lease.kind, lease.session_id
            );
        }
        released
    }

    pub fn is_live(&self, lease: &CameraLease) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|current| current.generation == lease.generation)
    }

    pub fn holder(&self) -> Option<ToolKind> {
        self.slot().as_ref().map(|lease| lease.kind)
    }

    /// Opens the device on behalf of a live lease, retrying up to
    /// `open_attempts` times. Blocks the calling thread; run it off the
    /// async executor.
    pub fn open_device(
        &self,
        lease: &CameraLease,
        camera: &CameraSettings,
        cancel: &CancellationToken,
    ) -> ToolResult<Box<dyn CaptureDevice>> {
        let attempts = camera.open_attempts.max(1);
        for attempt in 1..=attempts {
            if cancel.is_cancelled() || !self.is_live(lease) {
                break;
            }
            match self.backend.open(camera.index, camera.width, camera.height) {
                Ok(device) => return Ok(device),
                Err(err) => {
                    warn!(
                        "camera {} not available (attempt {attempt}/{attempts}): {err:#}",
                        camera.index
                    );
                    if attempt < attempts {
                        pause(Duration::from_millis(camera.open_retry_delay_ms), cancel);
                    }
                }
            }
        }

        Err(ToolError::Startup {
            index: camera.index,
            attempts,
        })
    }
}

/// Sleeps for `delay` in short slices, waking early once `cancel` fires.
fn pause(delay: Duration, cancel: &CancellationToken) {
    let deadline = Instant::now() + delay;
    while !cancel.is_cancelled() {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        thread::sleep(left.min(RETRY_SLICE));
    }
}

/// Releases its lease when dropped, so a loop that exits by any path
/// (including a panic) frees the camera.
pub struct LeaseGuard {
    arbiter: Arc<CameraArbiter>,
    lease: CameraLease,
}

impl LeaseGuard {
    pub fn new(arbiter: Arc<CameraArbiter>, lease: CameraLease) -> Self {
        Self { arbiter, lease }
    }

    pub fn lease(&self) -> &CameraLease {
        &self.lease
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.arbiter.release(&self.lease);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;

    fn arbiter() -> CameraArbiter {
        CameraArbiter::new(Arc::new(ScriptedBackend::default()))
    }

    #[test]
    fn second_session_is_turned_away() {
        let arbiter = arbiter();
        let lease = arbiter.acquire(ToolKind::GestureNav, "a").unwrap();
        match arbiter.acquire(ToolKind::ZoomControl, "b") {
            Err(ToolError::ResourceBusy { holder }) => assert_eq!(holder, ToolKind::GestureNav),
            other => panic!("expected busy, got {other:?}"),
        }
        assert!(arbiter.release(&lease));
        assert!(arbiter.acquire(ToolKind::ZoomControl, "b").is_ok());
    }

    #[test]
    fn reacquire_by_holder_returns_same_lease() {
        let arbiter = arbiter();
        let first = arbiter.acquire(ToolKind::FaceOverlay, "a").unwrap();
        let again = arbiter.acquire(ToolKind::FaceOverlay, "a").unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn release_is_idempotent() {
        let arbiter = arbiter();
        let lease = arbiter.acquire(ToolKind::GestureNav, "a").unwrap();
        assert!(arbiter.release(&lease));
        assert!(!arbiter.release(&lease));
        assert_eq!(arbiter.holder(), None);
    }

    #[test]
    fn stale_lease_cannot_release_newer_holder() {
        let arbiter = arbiter();
        let old = arbiter.acquire(ToolKind::GestureNav, "a").unwrap();
        arbiter.release(&old);
        let _new = arbiter.acquire(ToolKind::ThreatOverlay, "b").unwrap();
        assert!(!arbiter.release(&old));
        assert_eq!(arbiter.holder(), Some(ToolKind::ThreatOverlay));
    }

    #[test]
    fn concurrent_acquires_grant_exactly_one_lease() {
        let arbiter = Arc::new(arbiter());
        let handles: Vec<_> = (0..16)
            .map(|n| {
                let arbiter = Arc::clone(&arbiter);
                thread::spawn(move || {
                    arbiter.acquire(ToolKind::GestureNav, &format!("s{n}")).is_ok()
                })
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, 1);
    }

    #[test]
    fn open_gives_up_after_configured_attempts() {
        let backend = Arc::new(ScriptedBackend::failing_opens(10));
        let arbiter = CameraArbiter::new(backend.clone());
        let lease = arbiter.acquire(ToolKind::GestureNav, "a").unwrap();
        let camera = CameraSettings {
            open_attempts: 3,
            open_retry_delay_ms: 1,
            ..CameraSettings::default()
        };
        let result = arbiter.open_device(&lease, &camera, &CancellationToken::new());
        assert!(matches!(result, Err(ToolError::Startup { attempts: 3, .. })));
        assert_eq!(backend.open_calls(), 3);
    }

    #[test]
    fn cancel_cuts_the_retry_wait_short() {
        let backend = Arc::new(ScriptedBackend::failing_opens(10));
        let arbiter = CameraArbiter::new(backend.clone());
        let lease = arbiter.acquire(ToolKind::GestureNav, "a").unwrap();
        let camera = CameraSettings {
            open_attempts: 5,
            open_retry_delay_ms: 10_000,
            ..CameraSettings::default()
        };
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                cancel.cancel();
            })
        };

        let began = Instant::now();
        let result = arbiter.open_device(&lease, &camera, &cancel);
        canceller.join().unwrap();

        assert!(matches!(result, Err(ToolError::Startup { .. })));
        assert!(began.elapsed() < Duration::from_secs(2));
        assert_eq!(backend.open_calls(), 1);
    }

    #[test]
    fn dropping_guard_frees_camera() {
        let arbiter = Arc::new(arbiter());
        let lease = arbiter.acquire(ToolKind::ZoomControl, "a").unwrap();
        let guard = LeaseGuard::new(Arc::clone(&arbiter), lease);
        assert_eq!(arbiter.holder(), Some(ToolKind::ZoomControl));
        drop(guard);
        assert_eq!(arbiter.holder(), None);
    }
}
