//! Scripted stand-ins for the camera, the detector and the desktop side
//! effects. Built for unit tests, and for dependents with the `testing`
//! feature.

use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use image::{Rgb, RgbImage};
use tokio_util::sync::CancellationToken;

use crate::audio::{Cue, CuePlayer};
use crate::camera::{CameraBackend, CaptureDevice};
use crate::models::gesture::{
    INDEX_PIP, INDEX_TIP, MIDDLE_PIP, MIDDLE_TIP, THUMB_IP, THUMB_TIP,
};
use crate::models::{FaceBox, FingerVector, Hand, Landmark, LANDMARK_COUNT};
use crate::settings::Settings;
use crate::tools::{Effects, SharedScale, ToolContext, UrlOpener, VolumeControl, VolumeStep};
use crate::vision::VisionProvider;

const FRAME_PACE: Duration = Duration::from_millis(2);

#[derive(Default)]
struct BackendScript {
    failing_opens: AtomicU32,
    open_calls: AtomicU32,
    failing_reads: Vec<u64>,
    dead_after: Option<u64>,
}

/// Camera backend whose open and read failures are scripted up front.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<BackendScript>,
}

impl ScriptedBackend {
    /// The first `count` opens fail.
    pub fn failing_opens(count: u32) -> Self {
        Self {
            script: Arc::new(BackendScript {
                failing_opens: AtomicU32::new(count),
                ..BackendScript::default()
            }),
        }
    }

    /// Reads with these 1-based indices fail.
    pub fn failing_reads(self, reads: &[u64]) -> Self {
        self.rescript(|script| script.failing_reads = reads.to_vec())
    }

    /// Every read after the first `reads` fails.
    pub fn dead_after(self, reads: u64) -> Self {
        self.rescript(|script| script.dead_after = Some(reads))
    }

    fn rescript(self, edit: impl FnOnce(&mut BackendScript)) -> Self {
        let mut script = BackendScript {
            failing_opens: AtomicU32::new(self.script.failing_opens.load(Ordering::SeqCst)),
            open_calls: AtomicU32::new(0),
            failing_reads: self.script.failing_reads.clone(),
            dead_after: self.script.dead_after,
        };
        edit(&mut script);
        Self {
            script: Arc::new(script),
        }
    }

    pub fn open_calls(&self) -> u32 {
        self.script.open_calls.load(Ordering::SeqCst)
    }
}

impl CameraBackend for ScriptedBackend {
    fn open(&self, index: u32, width: u32, height: u32) -> Result<Box<dyn CaptureDevice>> {
        self.script.open_calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .script
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            bail!("camera {index} is not connected");
        }
        Ok(Box::new(ScriptedCamera {
            script: Arc::clone(&self.script),
            width: width.max(1),
            height: height.max(1),
            reads: AtomicU64::new(0),
        }))
    }
}

struct ScriptedCamera {
    script: Arc<BackendScript>,
    width: u32,
    height: u32,
    reads: AtomicU64,
}

impl CaptureDevice for ScriptedCamera {
    fn read_frame(&mut self, cancel: &CancellationToken) -> Result<RgbImage> {
        thread::sleep(FRAME_PACE);
        if cancel.is_cancelled() {
            bail!("read interrupted by cancellation");
        }
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.script.failing_reads.contains(&n) {
            bail!("scripted read failure #{n}");
        }
        if self.script.dead_after.is_some_and(|limit| n > limit) {
            bail!("device unplugged");
        }
        Ok(RgbImage::from_pixel(self.width, self.height, Rgb([16, 16, 16])))
    }
}

/// Detector that reports the same hand (or none) for every frame. Clones
/// share one face-detection counter.
#[derive(Clone, Default)]
pub struct ScriptedVision {
    hand: Option<Hand>,
    faces: Vec<FaceBox>,
    face_calls: Arc<AtomicU32>,
}

impl ScriptedVision {
    pub fn none() -> Self {
        Self::default()
    }

    /// A hand with flat landmarks and the given finger flags.
    pub fn always(fingers: FingerVector) -> Self {
        Self {
            hand: Some(Hand::new([Landmark::default(); LANDMARK_COUNT], fingers)),
            ..Self::default()
        }
    }

    /// Thumb and index raised by landmark height, middle curled.
    pub fn gun_pose() -> Self {
        let mut landmarks = [Landmark::default(); LANDMARK_COUNT];
        let mut place = |index: usize, y: f32| landmarks[index] = Landmark { x: 0.0, y, z: 0.0 };
        place(THUMB_IP, 100.0);
        place(THUMB_TIP, 80.0);
        place(INDEX_PIP, 100.0);
        place(INDEX_TIP, 60.0);
        place(MIDDLE_PIP, 100.0);
        place(MIDDLE_TIP, 120.0);
        Self {
            hand: Some(Hand::new(landmarks, FingerVector::from_bits([0, 1, 0, 0, 0]))),
            ..Self::default()
        }
    }

    pub fn with_faces(mut self, faces: Vec<FaceBox>) -> Self {
        self.faces = faces;
        self
    }

    pub fn face_calls(&self) -> u32 {
        self.face_calls.load(Ordering::SeqCst)
    }
}

impl VisionProvider for ScriptedVision {
    fn detect_hand(&self, _frame: &RgbImage) -> Result<Option<Hand>> {
        Ok(self.hand.clone())
    }

    fn detect_faces(&self, _frame: &RgbImage) -> Result<Vec<FaceBox>> {
        self.face_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.faces.clone())
    }
}

#[derive(Default)]
struct Recorded {
    opened: Vec<String>,
    cues: Vec<Cue>,
    volume: Vec<VolumeStep>,
}

/// Captures every side effect instead of touching the desktop.
#[derive(Clone, Default)]
pub struct RecordingEffects {
    log: Arc<Mutex<Recorded>>,
}

impl RecordingEffects {
    fn with<T>(&self, read: impl FnOnce(&mut Recorded) -> T) -> T {
        let mut guard = match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        read(&mut guard)
    }

    pub fn opened(&self) -> Vec<String> {
        self.with(|log| log.opened.clone())
    }

    pub fn cues(&self) -> Vec<Cue> {
        self.with(|log| log.cues.clone())
    }

    pub fn volume_steps(&self) -> Vec<VolumeStep> {
        self.with(|log| log.volume.clone())
    }

    pub fn effects(&self) -> Effects {
        Effects {
            opener: Arc::new(self.clone()),
            volume: Arc::new(self.clone()),
            cues: Arc::new(self.clone()),
        }
    }
}

impl UrlOpener for RecordingEffects {
    fn open(&self, url: &str) -> Result<()> {
        self.with(|log| log.opened.push(url.to_string()));
        Ok(())
    }
}

impl VolumeControl for RecordingEffects {
    fn adjust(&self, step: VolumeStep) -> Result<()> {
        self.with(|log| log.volume.push(step));
        Ok(())
    }
}

impl CuePlayer for RecordingEffects {
    fn play(&self, cue: Cue) {
        self.with(|log| log.cues.push(cue));
    }
}

pub fn tool_context(recorder: &RecordingEffects) -> ToolContext {
    tool_context_with(recorder, |_| {})
}

pub fn tool_context_with(
    recorder: &RecordingEffects,
    configure: impl FnOnce(&mut Settings),
) -> ToolContext {
    let mut settings = Settings::default();
    configure(&mut settings);
    ToolContext {
        settings: Arc::new(settings),
        effects: recorder.effects(),
        zoom_scale: SharedScale::default(),
    }
}
