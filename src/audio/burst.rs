use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rodio::Source;
use std::time::Duration;

/// Noise burst with an exponential decay, used as the "shot" cue.
/// Low-passed white noise gives it a thump instead of a hiss.
pub struct BurstCue {
    sample_rate: u32,
    num_sample: usize,
    total_samples: usize,
    last_value: f32,
    rng: StdRng,
}

impl BurstCue {
    pub fn new(duration: Duration) -> Self {
        let sample_rate = 44100;
        Self {
            sample_rate,
            num_sample: 0,
            total_samples: (duration.as_secs_f32() * sample_rate as f32) as usize,
            last_value: 0.0,
            rng: StdRng::from_entropy(),
        }
    }
}

impl Iterator for BurstCue {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_sample >= self.total_samples {
            return None;
        }
        self.num_sample += 1;

        let white: f32 = self.rng.gen_range(-1.0..1.0);
        self.last_value = (self.last_value * 0.7 + white * 0.3).clamp(-1.0, 1.0);

        let t = self.num_sample as f32 / self.sample_rate as f32;
        let envelope = (-t * 18.0).exp();
        Some(self.last_value * envelope * 0.8)
    }
}

impl Source for BurstCue {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.total_samples - self.num_sample)
    }

    fn channels(&self) -> u16 {
        1 // Mono
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f32(
            self.total_samples as f32 / self.sample_rate as f32,
        ))
    }
}
