use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use image::imageops;
use log::trace;
use tokio_util::sync::CancellationToken;

use crate::camera::{CaptureDevice, LeaseGuard};
use crate::error::{ToolError, ToolResult};
use crate::gesture::GestureClassifier;
use crate::models::{FaceBox, ToolKind};
use crate::tools::{FrameContext, ToolStrategy};
use crate::vision::VisionProvider;

use super::encoder::encode_jpeg;
use super::feed::FramePublisher;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const MAX_READ_BACKOFF: Duration = Duration::from_millis(500);

/// Counters the loop shares with the registry for status reporting.
#[derive(Debug, Default)]
pub struct LoopStats {
    frames: AtomicU64,
    read_failures: AtomicU64,
    last_action_at: Mutex<Option<DateTime<Utc>>>,
}

impl LoopStats {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn read_failures(&self) -> u64 {
        self.read_failures.load(Ordering::Relaxed)
    }

    pub fn last_action_at(&self) -> Option<DateTime<Utc>> {
        match self.last_action_at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn record_action(&self) {
        let mut guard = match self.last_action_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(Utc::now());
    }
}

/// The per-tool frame loop: read, detect, classify, act, render, encode,
/// publish. Tool differences live entirely in the [`ToolStrategy`].
///
/// Field order matters: the device closes before the lease guard frees the
/// camera.
pub struct FrameStreamSession {
    kind: ToolKind,
    session_id: String,
    device: Box<dyn CaptureDevice>,
    strategy: Box<dyn ToolStrategy>,
    classifier: GestureClassifier,
    vision: Arc<dyn VisionProvider>,
    publisher: FramePublisher,
    stats: Arc<LoopStats>,
    jpeg_quality: u8,
    max_read_failures: u32,
    _lease: LeaseGuard,
}

pub struct SessionParts {
    pub session_id: String,
    pub device: Box<dyn CaptureDevice>,
    pub strategy: Box<dyn ToolStrategy>,
    pub vision: Arc<dyn VisionProvider>,
    pub publisher: FramePublisher,
    pub stats: Arc<LoopStats>,
    pub cooldown: Duration,
    pub jpeg_quality: u8,
    pub max_read_failures: u32,
    pub lease: LeaseGuard,
}

impl FrameStreamSession {
    pub fn new(parts: SessionParts) -> Self {
        let classifier = GestureClassifier::new(parts.strategy.gestures(), parts.cooldown);
        Self {
            kind: parts.strategy.kind(),
            session_id: parts.session_id,
            device: parts.device,
            strategy: parts.strategy,
            classifier,
            vision: parts.vision,
            publisher: parts.publisher,
            stats: parts.stats,
            jpeg_quality: parts.jpeg_quality,
            max_read_failures: parts.max_read_failures.max(1),
            _lease: parts.lease,
        }
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    /// Runs until `cancel` fires. The token is checked once per iteration and
    /// handed to the device so a waiting read can bail early.
    ///
    /// A read failure skips the iteration; `max_read_failures` in a row end
    /// the loop with [`ToolError::LoopFault`]. Dropping the session closes the
    /// device and releases the camera lease.
    pub async fn run(mut self, cancel: CancellationToken) -> ToolResult<u64> {
        log_info!("{} loop started (session {})", self.kind, self.session_id);
        let mut consecutive_failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let token = cancel.clone();
            let kind = self.kind;
            let (session, outcome) = tokio::task::spawn_blocking(move || {
                let outcome = self.step(&token);
                (self, outcome)
            })
            .await
            .map_err(|err| ToolError::LoopFault {
                kind,
                reason: format!("frame worker panicked: {err}"),
            })?;
            self = session;

            match outcome {
                Ok(()) => consecutive_failures = 0,
                Err(ToolError::TransientRead(reason)) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    consecutive_failures += 1;
                    self.stats.read_failures.fetch_add(1, Ordering::Relaxed);
                    if consecutive_failures >= self.max_read_failures {
                        return Err(ToolError::LoopFault {
                            kind,
                            reason: format!(
                                "{consecutive_failures} consecutive frame reads failed, \
                                 last: {reason}"
                            ),
                        });
                    }
                    log_debug!(
                        "{kind} skipped frame ({consecutive_failures}/{}): {reason}",
                        self.max_read_failures
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(read_backoff(consecutive_failures)) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
                Err(err) => return Err(err),
            }
        }

        let published = self.publisher.published();
        log_info!(
            "{} loop stopped after {} frames, {published} published (session {})",
            self.kind,
            self.stats.frames(),
            self.session_id
        );
        Ok(published)
    }

    /// One iteration. Blocks on the device read.
    fn step(&mut self, cancel: &CancellationToken) -> ToolResult<()> {
        let mut frame = self
            .device
            .read_frame(cancel)
            .map_err(|err| ToolError::TransientRead(format!("{err:#}")))?;
        if self.kind.mirrors_frames() {
            imageops::flip_horizontal_in_place(&mut frame);
        }

        let hand = match self.vision.detect_hand(&frame) {
            Ok(hand) => hand,
            Err(err) => {
                log_warn!("{} hand detection failed: {err:#}", self.kind);
                None
            }
        };
        let faces: Vec<FaceBox> = if self.strategy.wants_faces() {
            self.vision.detect_faces(&frame).unwrap_or_else(|err| {
                log_warn!("{} face detection failed: {err:#}", self.kind);
                Vec::new()
            })
        } else {
            Vec::new()
        };

        let now = Instant::now();
        let mut dispatched = None;
        if let Some(hand) = hand.as_ref() {
            self.strategy.observe(hand);
            let fingers = self.strategy.fingers_for(hand);
            match self.classifier.classify(fingers, now) {
                Some(command) => {
                    log_info!("{} dispatching {command:?} for {fingers}", self.kind);
                    self.stats.record_action();
                    if let Err(err) = self.strategy.dispatch(command, &frame) {
                        log_warn!("{} {command:?} side effect failed: {err:#}", self.kind);
                    }
                    dispatched = Some(command);
                }
                None => trace!("{} no command for {fingers}", self.kind),
            }
        }

        let ctx = FrameContext {
            hand: hand.as_ref(),
            faces: &faces,
            dispatched,
            cooldown_remaining: self.classifier.cooldown_remaining(now),
            cooldown: self.classifier.cooldown(),
        };
        let rendered = self.strategy.render(frame, &ctx);
        if self.publisher.is_observed() {
            let jpeg =
                encode_jpeg(&rendered, self.jpeg_quality).map_err(|err| ToolError::LoopFault {
                    kind: self.kind,
                    reason: format!("{err:#}"),
                })?;
            self.publisher.publish(jpeg);
        }
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn read_backoff(consecutive_failures: u32) -> Duration {
    let exp = consecutive_failures.saturating_sub(1).min(6);
    (Duration::from_millis(10) * 2u32.pow(exp)).min(MAX_READ_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraArbiter, CameraBackend};
    use crate::models::FingerVector;
    use crate::stream::feed::frame_feed;
    use crate::testing::{tool_context, RecordingEffects, ScriptedBackend, ScriptedVision};
    use crate::tools::build_strategy;
    use futures::StreamExt;

    struct Fixture {
        arbiter: Arc<CameraArbiter>,
        session: FrameStreamSession,
        subscriber: crate::stream::FrameSubscriber,
        stats: Arc<LoopStats>,
    }

    fn fixture(
        kind: ToolKind,
        backend: ScriptedBackend,
        vision: ScriptedVision,
        recorder: &RecordingEffects,
    ) -> Fixture {
        let backend = Arc::new(backend);
        let arbiter = Arc::new(CameraArbiter::new(backend.clone()));
        let lease = arbiter.acquire(kind, "s1").unwrap();
        let device = backend.open(0, 32, 24).unwrap();
        let (publisher, subscriber) = frame_feed();
        let stats = Arc::new(LoopStats::default());
        let strategy = build_strategy(kind, &tool_context(recorder)).unwrap();
        let session = FrameStreamSession::new(SessionParts {
            session_id: "s1".into(),
            device,
            strategy,
            vision: Arc::new(vision),
            publisher,
            stats: Arc::clone(&stats),
            cooldown: Duration::from_secs(3),
            jpeg_quality: 70,
            max_read_failures: 4,
            lease: LeaseGuard::new(Arc::clone(&arbiter), lease),
        });
        Fixture {
            arbiter,
            session,
            subscriber,
            stats,
        }
    }

    #[tokio::test]
    async fn held_gesture_dispatches_once_per_cooldown() {
        let recorder = RecordingEffects::default();
        let vision = ScriptedVision::always(FingerVector::from_bits([0, 1, 0, 0, 0]));
        let fx = fixture(
            ToolKind::GestureNav,
            ScriptedBackend::default(),
            vision,
            &recorder,
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(fx.session.run(cancel.clone()));

        let mut frames = Box::pin(fx.subscriber.frames());
        for _ in 0..10 {
            frames.next().await.unwrap();
        }
        cancel.cancel();
        assert!(task.await.unwrap().unwrap() >= 10);

        assert_eq!(recorder.opened(), vec!["https://www.google.com".to_string()]);
        assert!(fx.stats.last_action_at().is_some());
        assert_eq!(fx.arbiter.holder(), None);
    }

    #[tokio::test]
    async fn transient_failures_are_skipped() {
        let recorder = RecordingEffects::default();
        let backend = ScriptedBackend::default().failing_reads(&[1, 2]);
        let fx = fixture(ToolKind::ThreatOverlay, backend, ScriptedVision::none(), &recorder);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(fx.session.run(cancel.clone()));

        let mut frames = Box::pin(fx.subscriber.frames());
        for _ in 0..3 {
            frames.next().await.unwrap();
        }
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(fx.stats.read_failures(), 2);
    }

    #[tokio::test]
    async fn dead_device_faults_the_loop_and_frees_camera() {
        let recorder = RecordingEffects::default();
        let backend = ScriptedBackend::default().dead_after(0);
        let fx = fixture(ToolKind::FaceOverlay, backend, ScriptedVision::none(), &recorder);

        let result = fx.session.run(CancellationToken::new()).await;
        match result {
            Err(ToolError::LoopFault { kind, reason }) => {
                assert_eq!(kind, ToolKind::FaceOverlay);
                assert!(reason.contains("4 consecutive"));
            }
            other => panic!("expected loop fault, got {other:?}"),
        }
        assert_eq!(fx.arbiter.holder(), None);
        assert!(fx.subscriber.is_closed());
    }

    #[tokio::test]
    async fn threat_gun_pose_fires() {
        let recorder = RecordingEffects::default();
        let vision = ScriptedVision::gun_pose();
        let fx = fixture(
            ToolKind::ThreatOverlay,
            ScriptedBackend::default(),
            vision,
            &recorder,
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(fx.session.run(cancel.clone()));
        let mut frames = Box::pin(fx.subscriber.frames());
        frames.next().await.unwrap();
        frames.next().await.unwrap();
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(recorder.cues(), vec![crate::audio::Cue::Fire]);
    }

    #[tokio::test]
    async fn face_tool_asks_the_detector_for_faces() {
        let recorder = RecordingEffects::default();
        let face = FaceBox {
            x: 4,
            y: 4,
            width: 10,
            height: 10,
        };
        let vision = ScriptedVision::none().with_faces(vec![face]);
        let fx = fixture(
            ToolKind::FaceOverlay,
            ScriptedBackend::default(),
            vision.clone(),
            &recorder,
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(fx.session.run(cancel.clone()));
        let mut frames = Box::pin(fx.subscriber.frames());
        for _ in 0..3 {
            frames.next().await.unwrap();
        }
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(vision.face_calls() >= 3, "{}", vision.face_calls());
    }

    #[tokio::test]
    async fn other_tools_skip_face_detection() {
        let recorder = RecordingEffects::default();
        let vision = ScriptedVision::none().with_faces(vec![FaceBox {
            x: 0,
            y: 0,
            width: 8,
            height: 8,
        }]);
        let fx = fixture(
            ToolKind::GestureNav,
            ScriptedBackend::default(),
            vision.clone(),
            &recorder,
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(fx.session.run(cancel.clone()));
        let mut frames = Box::pin(fx.subscriber.frames());
        for _ in 0..3 {
            frames.next().await.unwrap();
        }
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(vision.face_calls(), 0);
    }

    #[tokio::test]
    async fn unwatched_loop_runs_without_encoding() {
        let recorder = RecordingEffects::default();
        let fx = fixture(
            ToolKind::ThreatOverlay,
            ScriptedBackend::default(),
            ScriptedVision::none(),
            &recorder,
        );
        drop(fx.subscriber);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(fx.session.run(cancel.clone()));

        for _ in 0..400 {
            if fx.stats.frames() >= 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        assert_eq!(task.await.unwrap().unwrap(), 0);
        assert!(fx.stats.frames() >= 5);
        assert_eq!(fx.arbiter.holder(), None);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(read_backoff(1), Duration::from_millis(10));
        assert_eq!(read_backoff(2), Duration::from_millis(20));
        assert_eq!(read_backoff(30), MAX_READ_BACKOFF);
    }
}
