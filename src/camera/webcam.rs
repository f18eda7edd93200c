//! Capture devices through nokhwa. The camera handle is not `Send` on every
//! platform, so it lives on its own thread and frames are requested over a
//! channel.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use log::{info, warn};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use tokio_util::sync::CancellationToken;

use super::{CameraBackend, CaptureDevice};

/// How often a pending read checks for cancellation.
const REPLY_SLICE: Duration = Duration::from_millis(20);

type FrameReply = Sender<Result<RgbImage>>;

pub struct WebcamBackend {
    fps: u32,
}

impl WebcamBackend {
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1) }
    }
}

impl CameraBackend for WebcamBackend {
    fn open(&self, index: u32, width: u32, height: u32) -> Result<Box<dyn CaptureDevice>> {
        let (requests_tx, requests_rx) = mpsc::channel::<FrameReply>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let fps = self.fps;
        let worker = thread::Builder::new()
            .name(format!("camera-{index}"))
            .spawn(move || {
                capture_thread(index, (width, height, fps), ready_tx, requests_rx);
            })
            .context("Failed to spawn camera thread")?;

        let ready = ready_rx.recv();
        match ready {
            Ok(Ok(())) => Ok(Box::new(WebcamDevice {
                requests: Some(requests_tx),
                worker: Some(worker),
            })),
            Ok(Err(err)) => {
                let _ = worker.join();
                Err(err)
            }
            Err(_) => {
                let _ = worker.join();
                bail!("camera {index}: capture thread exited while opening")
            }
        }
    }
}

fn open_camera(index: u32, (width, height, fps): (u32, u32, u32)) -> Result<Camera> {
    let wanted = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, fps);
    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));
    let mut camera = Camera::new(CameraIndex::Index(index), format)
        .with_context(|| format!("camera {index}: open failed"))?;
    camera
        .open_stream()
        .with_context(|| format!("camera {index}: could not start streaming"))?;
    Ok(camera)
}

fn capture_thread(
    index: u32,
    format: (u32, u32, u32),
    ready: Sender<Result<()>>,
    requests: Receiver<FrameReply>,
) {
    let mut camera = match open_camera(index, format) {
        Ok(camera) => camera,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    info!("camera {index} streaming at {}", camera.resolution());

    if ready.send(Ok(())).is_ok() {
        // Ends once the device handle drops its sender.
        while let Ok(reply) = requests.recv() {
            let _ = reply.send(grab(&mut camera));
        }
    }

    if let Err(err) = camera.stop_stream() {
        warn!("camera {index}: failed to stop stream: {err}");
    }
    info!("camera {index} closed");
}

fn grab(camera: &mut Camera) -> Result<RgbImage> {
    let buffer = camera.frame().context("frame read failed")?;
    let decoded = buffer
        .decode_image::<RgbFormat>()
        .context("frame decode failed")?;
    let (width, height) = (decoded.width(), decoded.height());
    // nokhwa links its own `image` version; hand the pixels over raw.
    RgbImage::from_raw(width, height, decoded.into_raw())
        .ok_or_else(|| anyhow!("decoded frame does not match {width}x{height}"))
}

struct WebcamDevice {
    requests: Option<Sender<FrameReply>>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureDevice for WebcamDevice {
    fn read_frame(&mut self, cancel: &CancellationToken) -> Result<RgbImage> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| anyhow!("camera is closed"))?;
        let (reply_tx, reply_rx) = mpsc::channel();
        requests
            .send(reply_tx)
            .map_err(|_| anyhow!("camera thread has exited"))?;

        loop {
            match reply_rx.recv_timeout(REPLY_SLICE) {
                Ok(frame) => return frame,
                Err(RecvTimeoutError::Timeout) if cancel.is_cancelled() => {
                    bail!("read interrupted by cancellation")
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => bail!("camera thread has exited"),
            }
        }
    }
}

impl Drop for WebcamDevice {
    /// Closes the stream before the lease behind this device is released.
    fn drop(&mut self) {
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("camera thread panicked");
            }
        }
    }
}
