use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use image::{imageops, imageops::FilterType, RgbImage};

use crate::models::{Command, Hand, ToolKind};

use super::{overlay, FrameContext, ToolContext, ToolStrategy};

const MIN_PINCH_PX: f32 = 50.0;
const MAX_PINCH_PX: f32 = 300.0;
const MIN_MAPPED_SCALE: f32 = 0.5;
const MAX_MAPPED_SCALE: f32 = 3.0;
const SCALE_FLOOR: f32 = 0.2;
const SCALE_CEIL: f32 = 5.0;

/// Zoom factor shared between the loop and the state endpoint.
#[derive(Debug, Clone)]
pub struct SharedScale(Arc<AtomicU32>);

impl Default for SharedScale {
    fn default() -> Self {
        Self(Arc::new(AtomicU32::new(1.0_f32.to_bits())))
    }
}

impl SharedScale {
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set(1.0);
    }
}

/// Linear map of thumb-to-index distance onto a zoom factor, clamped at
/// both ends.
pub fn scale_for_distance(distance: f32) -> f32 {
    let t = ((distance - MIN_PINCH_PX) / (MAX_PINCH_PX - MIN_PINCH_PX)).clamp(0.0, 1.0);
    let scale = MIN_MAPPED_SCALE + t * (MAX_MAPPED_SCALE - MIN_MAPPED_SCALE);
    scale.clamp(SCALE_FLOOR, SCALE_CEIL)
}

/// Pinch controls a shared zoom factor; with a configured image the stream
/// shows that image zoomed, otherwise the camera frame with a gauge.
pub struct ZoomTool {
    scale: SharedScale,
    image: Option<RgbImage>,
    target: (u32, u32),
}

impl ZoomTool {
    pub fn new(ctx: &ToolContext) -> Result<Self> {
        let image = match &ctx.settings.zoom_image {
            Some(path) => Some(
                image::open(path)
                    .with_context(|| format!("zoom image {} could not be loaded", path.display()))?
                    .to_rgb8(),
            ),
            None => None,
        };
        ctx.zoom_scale.reset();

        Ok(Self {
            scale: ctx.zoom_scale.clone(),
            image,
            target: (ctx.settings.camera.width, ctx.settings.camera.height),
        })
    }
}

/// Scales `source` by `scale`, then center-crops or pads with black to
/// exactly `target`.
pub fn zoom_to_canvas(source: &RgbImage, scale: f32, target: (u32, u32)) -> RgbImage {
    let width = ((source.width() as f32 * scale).round() as u32).max(1);
    let height = ((source.height() as f32 * scale).round() as u32).max(1);
    let resized = imageops::resize(source, width, height, FilterType::Triangle);

    let mut canvas = RgbImage::new(target.0, target.1);
    let x = (i64::from(target.0) - i64::from(width)) / 2;
    let y = (i64::from(target.1) - i64::from(height)) / 2;
    imageops::overlay(&mut canvas, &resized, x, y);
    canvas
}

impl ToolStrategy for ZoomTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ZoomControl
    }

    fn observe(&mut self, hand: &Hand) {
        self.scale.set(scale_for_distance(hand.pinch_distance()));
    }

    fn dispatch(&mut self, _command: Command, _frame: &RgbImage) -> Result<()> {
        Ok(())
    }

    fn render(&mut self, frame: RgbImage, _ctx: &FrameContext<'_>) -> RgbImage {
        let scale = self.scale.get();
        match &self.image {
            Some(image) => zoom_to_canvas(image, scale, self.target),
            None => {
                let mut frame = frame;
                let level = (scale - SCALE_FLOOR) / (SCALE_CEIL - SCALE_FLOOR);
                overlay::gauge(&mut frame, level, overlay::CYAN);
                frame
            }
        }
    }
}
