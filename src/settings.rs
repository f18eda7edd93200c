use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::models::ToolKind;

const CONFIG_ENV: &str = "GESTURE_STUDIO_CONFIG";
const BIND_ENV: &str = "GESTURE_STUDIO_BIND";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum LaunchMode {
    InProcess,
    /// Runs the tool in a child process. Without a program the current
    /// executable is re-launched as `worker --tool <kind>`.
    External {
        #[serde(default)]
        program: Option<String>,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl LaunchMode {
    pub fn is_external(&self) -> bool {
        matches!(self, LaunchMode::External { .. })
    }
}

/// Where frames come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraSource {
    /// The capture device at `index`.
    #[default]
    Device,
    /// Generated test pattern, no hardware needed.
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub source: CameraSource,
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub open_attempts: u32,
    pub open_retry_delay_ms: u64,
    /// Consecutive failed reads tolerated before the session is marked crashed.
    pub max_consecutive_read_failures: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            source: CameraSource::Device,
            index: 0,
            width: 1280,
            height: 720,
            fps: 30,
            open_attempts: 5,
            open_retry_delay_ms: 1000,
            max_consecutive_read_failures: 30,
        }
    }
}

impl CameraSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub camera: CameraSettings,
    pub cooldown_ms: u64,
    /// Upper bound on waiting for an in-process loop to observe cancellation.
    pub stop_timeout_ms: u64,
    pub stop_grace_ms: u64,
    pub shutdown_grace_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub jpeg_quality: u8,
    /// Playback volume for audio cues, 0.0 to 1.0.
    pub cue_volume: f32,
    pub capture_dir: PathBuf,
    pub nav_urls: Vec<String>,
    pub zoom_image: Option<PathBuf>,
    pub tools: BTreeMap<ToolKind, LaunchMode>,
    /// File these settings were read from, handed on to spawned workers.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let tools = ToolKind::ALL
            .into_iter()
            .map(|kind| {
                let mode = match kind {
                    ToolKind::GestureNav => LaunchMode::External {
                        program: None,
                        args: Vec::new(),
                    },
                    _ => LaunchMode::InProcess,
                };
                (kind, mode)
            })
            .collect();

        Self {
            bind_addr: "127.0.0.1:5000".into(),
            camera: CameraSettings::default(),
            cooldown_ms: 3000,
            stop_timeout_ms: 3000,
            stop_grace_ms: 5000,
            shutdown_grace_ms: 2000,
            shutdown_timeout_ms: 8000,
            jpeg_quality: 80,
            cue_volume: 0.8,
            capture_dir: PathBuf::from("captures"),
            nav_urls: vec![
                "https://www.google.com".into(),
                "https://www.youtube.com".into(),
                "https://www.amazon.com".into(),
                "https://web.whatsapp.com".into(),
                "https://mygyanvihar.com".into(),
            ],
            zoom_image: None,
            tools,
            source_path: None,
        }
    }
}

impl Settings {
    /// Loads settings from `path`, the `GESTURE_STUDIO_CONFIG` file, or the
    /// per-user config dir, in that order. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_settings_path(),
        };

        let mut settings = match path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read settings from {}", path.display()))?;
                let mut settings: Settings = serde_json::from_str(&contents).unwrap_or_else(|err| {
                    warn!("Ignoring unparsable settings at {}: {err}", path.display());
                    Settings::default()
                });
                settings.source_path = Some(path);
                settings
            }
            _ => Settings::default(),
        };

        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = env::var(BIND_ENV) {
            if !addr.trim().is_empty() {
                self.bind_addr = addr;
            }
        }
    }

    pub fn launch_mode(&self, kind: ToolKind) -> LaunchMode {
        self.tools.get(&kind).cloned().unwrap_or(LaunchMode::InProcess)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn default_settings_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("gesture-studio").join("settings.json"))
}
