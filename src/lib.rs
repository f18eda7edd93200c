pub mod api;
pub mod audio;
pub mod camera;
pub mod error;
pub mod gesture;
pub mod models;
pub mod settings;
pub mod stream;
pub mod supervisor;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tools;
pub mod utils;
pub mod vision;
pub mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::net::TcpListener;

use audio::AudioEngineHandle;
use camera::{system_backend, CameraArbiter, CameraBackend};
use error::ToolResult;
use models::ToolKind;
use settings::Settings;
use supervisor::{
    shutdown_signal, BackgroundTaskSupervisor, ExternalProcessSupervisor, PlatformController,
    ProcessController, SessionRegistry, ShutdownCoordinator, ShutdownReport, SlotSnapshot,
    StartOutcome, StopOutcome, Supervisor,
};
use tools::{Effects, SharedScale, SystemOpener, SystemVolume, ToolContext};
use vision::{NullVision, VisionProvider};

/// External capabilities the host is wired to.
pub struct Collaborators {
    pub backend: Arc<dyn CameraBackend>,
    pub vision: Arc<dyn VisionProvider>,
    pub effects: Effects,
    pub controller: Arc<dyn ProcessController>,
}

pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<SessionRegistry>,
    pub arbiter: Arc<CameraArbiter>,
    pub background: Arc<BackgroundTaskSupervisor>,
    pub external: Arc<ExternalProcessSupervisor>,
    pub zoom_scale: SharedScale,
    shutdown: ShutdownCoordinator,
    audio: Option<AudioEngineHandle>,
}

impl AppState {
    pub fn new(settings: Settings, parts: Collaborators) -> Arc<Self> {
        Self::build(settings, parts, None, true)
    }

    fn build(
        settings: Settings,
        parts: Collaborators,
        audio: Option<AudioEngineHandle>,
        retain_frames: bool,
    ) -> Arc<Self> {
        let settings = Arc::new(settings);
        let registry = Arc::new(SessionRegistry::new());
        let arbiter = Arc::new(CameraArbiter::new(parts.backend));
        let zoom_scale = SharedScale::default();

        let tools = ToolContext {
            settings: Arc::clone(&settings),
            effects: parts.effects,
            zoom_scale: zoom_scale.clone(),
        };
        let mut background = BackgroundTaskSupervisor::new(
            Arc::clone(&registry),
            Arc::clone(&arbiter),
            parts.vision,
            tools,
        );
        if !retain_frames {
            background = background.without_frame_feed();
        }
        let background = Arc::new(background);
        let external = Arc::new(ExternalProcessSupervisor::new(
            Arc::clone(&registry),
            Arc::clone(&arbiter),
            parts.controller,
            Arc::clone(&settings),
        ));
        let shutdown = ShutdownCoordinator::new(
            vec![
                Arc::clone(&background) as Arc<dyn Supervisor>,
                Arc::clone(&external) as Arc<dyn Supervisor>,
            ],
            settings.shutdown_grace(),
        );

        Arc::new(Self {
            settings,
            registry,
            arbiter,
            background,
            external,
            zoom_scale,
            shutdown,
            audio,
        })
    }

    /// Wires the host to the desktop: the configured camera source, no
    /// detector, the system browser and mixer, and rodio cues.
    pub fn with_system_defaults(settings: Settings) -> Arc<Self> {
        let (parts, audio) = system_parts(&settings);
        Self::build(settings, parts, Some(audio), true)
    }

    /// System wiring for a worker process. Its sessions keep no frame feed,
    /// so frames are not encoded and nothing can stream or capture them.
    pub fn headless_with_system_defaults(settings: Settings) -> Arc<Self> {
        let (parts, audio) = system_parts(&settings);
        Self::build(settings, parts, Some(audio), false)
    }

    pub fn is_external(&self, kind: ToolKind) -> bool {
        self.settings.launch_mode(kind).is_external()
    }

    pub async fn start_tool(&self, kind: ToolKind) -> ToolResult<StartOutcome> {
        if self.is_external(kind) {
            self.external.start(kind).await
        } else {
            self.background.start(kind).await
        }
    }

    pub async fn stop_tool(&self, kind: ToolKind) -> StopOutcome {
        if self.is_external(kind) {
            self.external.stop(kind, self.settings.stop_grace()).await
        } else {
            self.background.stop(kind).await
        }
    }

    pub async fn is_running(&self, kind: ToolKind) -> bool {
        if self.is_external(kind) {
            self.external.is_running(kind).await
        } else {
            self.background.is_running(kind).await
        }
    }

    pub async fn snapshot(&self) -> Vec<SlotSnapshot> {
        let mut out = Vec::with_capacity(ToolKind::ALL.len());
        for kind in ToolKind::ALL {
            let launch = if self.is_external(kind) {
                "external"
            } else {
                "in_process"
            };
            out.push(self.registry.slot(kind).lock().await.snapshot(launch));
        }
        out
    }

    pub async fn shutdown_all(&self) -> ShutdownReport {
        let report = self
            .shutdown
            .shutdown_all(self.settings.shutdown_timeout())
            .await;
        if let Some(audio) = &self.audio {
            let _ = audio.stop();
        }
        report
    }
}

fn system_parts(settings: &Settings) -> (Collaborators, AudioEngineHandle) {
    let audio = AudioEngineHandle::new();
    if let Err(err) = audio.set_volume(settings.cue_volume) {
        warn!("Audio cues unavailable: {err}");
    }
    let parts = Collaborators {
        backend: system_backend(&settings.camera),
        vision: Arc::new(NullVision),
        effects: Effects {
            opener: Arc::new(SystemOpener),
            volume: Arc::new(SystemVolume),
            cues: Arc::new(audio.clone()),
        },
        controller: Arc::new(PlatformController),
    };
    (parts, audio)
}

/// Serves the HTTP API until Ctrl-C or SIGTERM, then stops every session.
pub async fn serve(settings: Settings) -> Result<()> {
    let state = AppState::with_system_defaults(settings);
    let listener = TcpListener::bind(&state.settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", state.settings.bind_addr))?;
    info!("listening on {}", listener.local_addr()?);

    let app = api::router(Arc::clone(&state));
    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("termination requested");
            // Open streams only end once their sessions stop.
            shutdown_state.shutdown_all().await;
        })
        .await
        .context("HTTP server failed")?;

    info!("server exited");
    Ok(())
}
