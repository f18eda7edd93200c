pub mod arbiter;
pub mod still;
pub mod synthetic;
#[cfg(feature = "webcam")]
pub mod webcam;

pub use arbiter::{CameraArbiter, CameraLease, LeaseGuard};
pub use synthetic::SyntheticBackend;

use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;
use tokio_util::sync::CancellationToken;

use crate::settings::{CameraSettings, CameraSource};

/// An opened capture device. Reads block the calling thread.
pub trait CaptureDevice: Send {
    /// Blocks until the next frame is available or the read fails. Backends
    /// that wait in slices should return early once `cancel` fires.
    fn read_frame(&mut self, cancel: &CancellationToken) -> Result<RgbImage>;
}

/// Opens the physical capture resource. Only the arbiter calls this.
pub trait CameraBackend: Send + Sync {
    fn open(&self, index: u32, width: u32, height: u32) -> Result<Box<dyn CaptureDevice>>;
}

/// Backend for the configured camera source.
pub fn system_backend(camera: &CameraSettings) -> Arc<dyn CameraBackend> {
    match camera.source {
        CameraSource::Synthetic => Arc::new(SyntheticBackend::new(camera.frame_interval())),
        CameraSource::Device => device_backend(camera),
    }
}

#[cfg(feature = "webcam")]
fn device_backend(camera: &CameraSettings) -> Arc<dyn CameraBackend> {
    Arc::new(webcam::WebcamBackend::new(camera.fps))
}

#[cfg(not(feature = "webcam"))]
fn device_backend(_camera: &CameraSettings) -> Arc<dyn CameraBackend> {
    Arc::new(NoDeviceSupport)
}

/// Stands in for the device backend in builds without the `webcam` feature.
#[cfg(not(feature = "webcam"))]
struct NoDeviceSupport;

#[cfg(not(feature = "webcam"))]
impl CameraBackend for NoDeviceSupport {
    fn open(&self, index: u32, _width: u32, _height: u32) -> Result<Box<dyn CaptureDevice>> {
        anyhow::bail!(
            "camera {index}: built without capture device support \
             (enable the `webcam` feature or run with --synthetic)"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_needs_no_hardware() {
        let camera = CameraSettings {
            source: CameraSource::Synthetic,
            width: 32,
            height: 24,
            ..CameraSettings::default()
        };
        let mut device = system_backend(&camera).open(0, 32, 24).unwrap();
        let frame = device.read_frame(&CancellationToken::new()).unwrap();
        assert_eq!(frame.dimensions(), (32, 24));
    }

    #[cfg(not(feature = "webcam"))]
    #[test]
    fn device_source_without_webcam_support_fails_to_open() {
        let backend = system_backend(&CameraSettings::default());
        let err = backend.open(0, 32, 24).err().unwrap();
        assert!(err.to_string().contains("--synthetic"), "{err}");
    }
}
