//! Camera, detector and desktop doubles shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use image::{Rgb, RgbImage};
use tokio_util::sync::CancellationToken;

use gesture_studio_lib::audio::{Cue, CuePlayer};
use gesture_studio_lib::camera::{CameraBackend, CaptureDevice};
use gesture_studio_lib::models::{
    FaceBox, FingerVector, Hand, Landmark, SessionState, ToolKind, LANDMARK_COUNT,
};
use gesture_studio_lib::settings::{LaunchMode, Settings};
use gesture_studio_lib::supervisor::PlatformController;
use gesture_studio_lib::tools::{Effects, UrlOpener, VolumeControl, VolumeStep};
use gesture_studio_lib::vision::VisionProvider;
use gesture_studio_lib::{AppState, Collaborators};

const FRAME_PACE: Duration = Duration::from_millis(2);

#[derive(Default)]
struct BackendState {
    opens: AtomicU32,
    first_read_stall: Option<Duration>,
}

/// Camera that hands out flat grey frames.
#[derive(Clone, Default)]
pub struct TestBackend {
    state: Arc<BackendState>,
}

impl TestBackend {
    /// The first device opened blocks for `stall` on every read and never
    /// looks at the cancel token. Later devices behave.
    pub fn stalling_first_device(stall: Duration) -> Self {
        Self {
            state: Arc::new(BackendState {
                opens: AtomicU32::new(0),
                first_read_stall: Some(stall),
            }),
        }
    }

    pub fn open_calls(&self) -> u32 {
        self.state.opens.load(Ordering::SeqCst)
    }
}

impl CameraBackend for TestBackend {
    fn open(&self, _index: u32, width: u32, height: u32) -> Result<Box<dyn CaptureDevice>> {
        let previous = self.state.opens.fetch_add(1, Ordering::SeqCst);
        let stall = self.state.first_read_stall.filter(|_| previous == 0);
        Ok(Box::new(TestCamera {
            width: width.max(1),
            height: height.max(1),
            stall,
        }))
    }
}

struct TestCamera {
    width: u32,
    height: u32,
    stall: Option<Duration>,
}

impl CaptureDevice for TestCamera {
    fn read_frame(&mut self, cancel: &CancellationToken) -> Result<RgbImage> {
        match self.stall {
            Some(stall) => thread::sleep(stall),
            None => {
                thread::sleep(FRAME_PACE);
                if cancel.is_cancelled() {
                    bail!("read interrupted by cancellation");
                }
            }
        }
        Ok(RgbImage::from_pixel(self.width, self.height, Rgb([20, 20, 20])))
    }
}

/// Detector double. `panicking` blows up on its first hand lookup only.
#[derive(Clone, Default)]
pub struct TestVision {
    hand: Option<Hand>,
    faces: Vec<FaceBox>,
    panic_once: Arc<AtomicBool>,
}

impl TestVision {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn always(bits: [u8; 5]) -> Self {
        Self {
            hand: Some(Hand::new(
                [Landmark::default(); LANDMARK_COUNT],
                FingerVector::from_bits(bits),
            )),
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic_once: Arc::new(AtomicBool::new(true)),
            ..Self::default()
        }
    }
}

impl VisionProvider for TestVision {
    fn detect_hand(&self, _frame: &RgbImage) -> Result<Option<Hand>> {
        if self.panic_once.swap(false, Ordering::SeqCst) {
            panic!("detector crashed");
        }
        Ok(self.hand.clone())
    }

    fn detect_faces(&self, _frame: &RgbImage) -> Result<Vec<FaceBox>> {
        Ok(self.faces.clone())
    }
}

/// Records opened URLs and swallows the other side effects.
#[derive(Clone, Default)]
pub struct TestEffects {
    opened: Arc<Mutex<Vec<String>>>,
}

impl TestEffects {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn effects(&self) -> Effects {
        Effects {
            opener: Arc::new(self.clone()),
            volume: Arc::new(self.clone()),
            cues: Arc::new(self.clone()),
        }
    }
}

impl UrlOpener for TestEffects {
    fn open(&self, url: &str) -> Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

impl VolumeControl for TestEffects {
    fn adjust(&self, _step: VolumeStep) -> Result<()> {
        Ok(())
    }
}

impl CuePlayer for TestEffects {
    fn play(&self, _cue: Cue) {}
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.camera.width = 32;
    settings.camera.height = 24;
    settings.camera.open_retry_delay_ms = 5;
    settings.stop_timeout_ms = 1000;
    for kind in ToolKind::ALL {
        settings.tools.insert(kind, LaunchMode::InProcess);
    }
    settings
}

pub fn app(settings: Settings, backend: TestBackend, vision: TestVision) -> Arc<AppState> {
    app_with_effects(settings, backend, vision, &TestEffects::default())
}

pub fn app_with_effects(
    settings: Settings,
    backend: TestBackend,
    vision: TestVision,
    effects: &TestEffects,
) -> Arc<AppState> {
    AppState::new(
        settings,
        Collaborators {
            backend: Arc::new(backend),
            vision: Arc::new(vision),
            effects: effects.effects(),
            controller: Arc::new(PlatformController),
        },
    )
}

pub async fn wait_for_state(state: &AppState, kind: ToolKind, want: SessionState) {
    for _ in 0..400 {
        if state.registry.state(kind).await == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{kind} never reached {want:?}");
}
