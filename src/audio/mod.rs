pub mod burst;
pub mod tone;

use burst::BurstCue;
use tone::ToneCue;

use log::warn;
use rodio::{OutputStream, Sink};
use std::sync::{
    mpsc::{self, Sender},
    Arc, Mutex,
};
use std::thread;
use std::time::Duration;

/// Audible feedback for a dispatched gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Confirm,
    Fire,
    Shutter,
    VolumeUp,
    VolumeDown,
}

/// Anything that can play a [`Cue`]. Playback is fire-and-forget.
pub trait CuePlayer: Send + Sync {
    fn play(&self, cue: Cue);
}

enum AudioCommand {
    Play(Cue),
    SetVolume(f32),
    Stop,
}

/// Handle to a dedicated audio thread; the rodio stream is not `Send`, so it
/// lives on that thread and is driven over a channel.
#[derive(Clone)]
pub struct AudioEngineHandle {
    tx: Arc<Mutex<Option<Sender<AudioCommand>>>>,
}

impl AudioEngineHandle {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(Mutex::new(None)),
        }
    }

    fn ensure_thread(&self) -> Result<Sender<AudioCommand>, String> {
        let mut guard = self.tx.lock().map_err(|e| e.to_string())?;
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();

        thread::Builder::new()
            .name("audio-cues".to_string())
            .spawn(move || {
                let mut _stream: Option<OutputStream> = None;
                let mut sink: Option<Sink> = None;
                let mut volume = 1.0_f32;

                fn ensure_sink(
                    stream: &mut Option<OutputStream>,
                    sink: &mut Option<Sink>,
                    volume: f32,
                ) -> Result<(), String> {
                    if sink.is_none() {
                        let (s, handle) = OutputStream::try_default()
                            .map_err(|e| format!("Failed to create audio output stream: {}", e))?;
                        let new_sink = Sink::try_new(&handle)
                            .map_err(|e| format!("Failed to create audio sink: {}", e))?;
                        new_sink.set_volume(volume);
                        *stream = Some(s);
                        *sink = Some(new_sink);
                    }
                    Ok(())
                }

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        AudioCommand::Play(cue) => {
                            if let Err(err) = ensure_sink(&mut _stream, &mut sink, volume) {
                                warn!("Dropping {cue:?} cue: {err}");
                                continue;
                            }
                            if let Some(ref s) = sink {
                                match cue {
                                    Cue::Fire => {
                                        s.append(BurstCue::new(Duration::from_millis(350)))
                                    }
                                    Cue::Confirm => {
                                        s.append(ToneCue::new(880.0, Duration::from_millis(120)))
                                    }
                                    Cue::Shutter => {
                                        s.append(ToneCue::new(1320.0, Duration::from_millis(60)))
                                    }
                                    Cue::VolumeUp => {
                                        s.append(ToneCue::new(660.0, Duration::from_millis(90)));
                                        s.append(ToneCue::new(990.0, Duration::from_millis(90)));
                                    }
                                    Cue::VolumeDown => {
                                        s.append(ToneCue::new(990.0, Duration::from_millis(90)));
                                        s.append(ToneCue::new(660.0, Duration::from_millis(90)));
                                    }
                                }
                            }
                        }
                        AudioCommand::SetVolume(v) => {
                            volume = v.clamp(0.0, 1.0);
                            if let Some(ref s) = sink {
                                s.set_volume(volume);
                            }
                        }
                        AudioCommand::Stop => {
                            if let Some(s_old) = sink.take() {
                                s_old.stop();
                            }
                            _stream = None;
                        }
                    }
                }
            })
            .map_err(|e| e.to_string())?;

        *guard = Some(tx.clone());
        Ok(tx)
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), String> {
        let tx = self.ensure_thread()?;
        tx.send(AudioCommand::SetVolume(volume))
            .map_err(|e| e.to_string())
    }

    pub fn stop(&self) -> Result<(), String> {
        if let Ok(Some(tx)) = self.tx.lock().map(|g| g.clone()) {
            let _ = tx.send(AudioCommand::Stop);
        }
        Ok(())
    }
}

impl CuePlayer for AudioEngineHandle {
    fn play(&self, cue: Cue) {
        let sent = self
            .ensure_thread()
            .and_then(|tx| tx.send(AudioCommand::Play(cue)).map_err(|e| e.to_string()));
        if let Err(err) = sent {
            warn!("Audio cue {cue:?} not played: {err}");
        }
    }
}
