use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use super::{CameraBackend, CaptureDevice};

const WAIT_SLICE: Duration = Duration::from_millis(5);

/// Test-pattern camera used when no capture hardware is wired in: a drifting
/// gradient with a little sensor noise, paced at the configured frame rate.
pub struct SyntheticBackend {
    frame_interval: Duration,
}

impl SyntheticBackend {
    pub fn new(frame_interval: Duration) -> Self {
        Self { frame_interval }
    }
}

impl CameraBackend for SyntheticBackend {
    fn open(&self, index: u32, width: u32, height: u32) -> Result<Box<dyn CaptureDevice>> {
        if width == 0 || height == 0 {
            bail!("camera {index}: invalid frame size {width}x{height}");
        }
        Ok(Box::new(SyntheticCamera {
            width,
            height,
            frame_interval: self.frame_interval,
            last_frame: None,
            tick: 0,
            rng: StdRng::from_entropy(),
        }))
    }
}

struct SyntheticCamera {
    width: u32,
    height: u32,
    frame_interval: Duration,
    last_frame: Option<Instant>,
    tick: u32,
    rng: StdRng,
}

impl SyntheticCamera {
    fn wait_for_next_frame(&mut self, cancel: &CancellationToken) -> bool {
        if let Some(last) = self.last_frame {
            let due = last + self.frame_interval;
            while Instant::now() < due {
                if cancel.is_cancelled() {
                    return false;
                }
                thread::sleep(WAIT_SLICE.min(due.saturating_duration_since(Instant::now())));
            }
        }
        self.last_frame = Some(Instant::now());
        true
    }
}

impl CaptureDevice for SyntheticCamera {
    fn read_frame(&mut self, cancel: &CancellationToken) -> Result<RgbImage> {
        if !self.wait_for_next_frame(cancel) {
            bail!("read interrupted by cancellation");
        }

        self.tick = self.tick.wrapping_add(1);
        let shift = self.tick.wrapping_mul(3);
        let (width, height) = (self.width, self.height);
        let mut frame = RgbImage::new(width, height);
        for (x, y, pixel) in frame.enumerate_pixels_mut() {
            let noise: i16 = self.rng.gen_range(-6..=6);
            let r = ((x.wrapping_add(shift) % width) * 255 / width) as i16;
            let g = (y * 255 / height) as i16;
            *pixel = Rgb([
                (r + noise).clamp(0, 255) as u8,
                (g + noise).clamp(0, 255) as u8,
                (96 + noise).clamp(0, 255) as u8,
            ]);
        }
        Ok(frame)
    }
}
