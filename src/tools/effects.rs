use std::process::{Command as ProcessCommand, Stdio};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use log::debug;

use crate::audio::CuePlayer;

/// Opens a URL in the desktop's browser.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStep {
    Up,
    Down,
    Mute,
}

/// Adjusts the system output volume.
pub trait VolumeControl: Send + Sync {
    fn adjust(&self, step: VolumeStep) -> Result<()>;
}

/// Side-effect sinks shared by every tool strategy.
#[derive(Clone)]
pub struct Effects {
    pub opener: Arc<dyn UrlOpener>,
    pub volume: Arc<dyn VolumeControl>,
    pub cues: Arc<dyn CuePlayer>,
}

pub struct SystemOpener;

impl UrlOpener for SystemOpener {
    fn open(&self, url: &str) -> Result<()> {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut cmd = ProcessCommand::new("cmd");
            cmd.args(["/C", "start", "", url]);
            cmd
        } else if cfg!(target_os = "macos") {
            let mut cmd = ProcessCommand::new("open");
            cmd.arg(url);
            cmd
        } else {
            let mut cmd = ProcessCommand::new("xdg-open");
            cmd.arg(url);
            cmd
        };

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to launch opener for {url}"))?;

        // Reap the opener so it doesn't linger as a zombie.
        thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }
}

pub struct SystemVolume;

impl SystemVolume {
    fn command_for(step: VolumeStep) -> Option<(&'static str, Vec<String>)> {
        if cfg!(target_os = "windows") {
            let key = match step {
                VolumeStep::Up => 175,
                VolumeStep::Down => 174,
                VolumeStep::Mute => 173,
            };
            let script = format!("(New-Object -comObject WScript.Shell).SendKeys([char]{key})");
            Some(("powershell", vec!["-c".into(), script]))
        } else if cfg!(target_os = "macos") {
            let script = match step {
                VolumeStep::Up => {
                    "set volume output volume ((output volume of (get volume settings)) + 6)"
                }
                VolumeStep::Down => {
                    "set volume output volume ((output volume of (get volume settings)) - 6)"
                }
                VolumeStep::Mute => "set volume with output muted",
            };
            Some(("osascript", vec!["-e".into(), script.into()]))
        } else if cfg!(target_os = "linux") {
            let args = match step {
                VolumeStep::Up => vec!["set-sink-volume", "@DEFAULT_SINK@", "+5%"],
                VolumeStep::Down => vec!["set-sink-volume", "@DEFAULT_SINK@", "-5%"],
                VolumeStep::Mute => vec!["set-sink-mute", "@DEFAULT_SINK@", "toggle"],
            };
            Some(("pactl", args.into_iter().map(String::from).collect()))
        } else {
            None
        }
    }
}

impl VolumeControl for SystemVolume {
    fn adjust(&self, step: VolumeStep) -> Result<()> {
        let Some((program, args)) = Self::command_for(step) else {
            bail!("volume control not available on this platform");
        };

        debug!("volume {step:?} via {program}");
        let status = ProcessCommand::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("Failed to run {program}"))?;
        if !status.success() {
            bail!("{program} exited with {status}");
        }
        Ok(())
    }
}
