//! Per-tool behavior plugged into the shared frame loop.

pub mod effects;
pub mod face;
pub mod navigation;
pub mod overlay;
pub mod threat;
pub mod volume;
pub mod zoom;

pub use effects::{Effects, SystemOpener, SystemVolume, UrlOpener, VolumeControl, VolumeStep};
pub use zoom::SharedScale;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use image::{Rgb, RgbImage};

use crate::gesture::{tables, GestureTable};
use crate::models::{Command, FaceBox, FingerVector, Hand, ToolKind};
use crate::settings::Settings;

/// What the loop learned about the current frame.
pub struct FrameContext<'a> {
    pub hand: Option<&'a Hand>,
    pub faces: &'a [FaceBox],
    pub dispatched: Option<Command>,
    pub cooldown_remaining: Option<Duration>,
    pub cooldown: Duration,
}

pub trait ToolStrategy: Send {
    fn kind(&self) -> ToolKind;

    fn gestures(&self) -> GestureTable {
        tables::for_tool(self.kind())
    }

    fn wants_faces(&self) -> bool {
        false
    }

    /// Finger vector handed to the classifier for a detected hand.
    fn fingers_for(&self, hand: &Hand) -> FingerVector {
        hand.fingers
    }

    /// Sees every detected hand before classification. Continuous tools
    /// update their state here.
    fn observe(&mut self, _hand: &Hand) {}

    /// Side effect of a dispatched command. Runs at most once per cooldown.
    fn dispatch(&mut self, command: Command, frame: &RgbImage) -> Result<()>;

    /// Produces the frame that gets encoded and streamed.
    fn render(&mut self, frame: RgbImage, ctx: &FrameContext<'_>) -> RgbImage;
}

/// Everything a strategy may need at construction time.
#[derive(Clone)]
pub struct ToolContext {
    pub settings: Arc<Settings>,
    pub effects: Effects,
    pub zoom_scale: SharedScale,
}

pub fn build_strategy(kind: ToolKind, ctx: &ToolContext) -> Result<Box<dyn ToolStrategy>> {
    let strategy: Box<dyn ToolStrategy> = match kind {
        ToolKind::GestureNav => Box::new(navigation::NavigationTool::new(ctx)),
        ToolKind::ThreatOverlay => Box::new(threat::ThreatTool::new(ctx)),
        ToolKind::ZoomControl => Box::new(zoom::ZoomTool::new(ctx)?),
        ToolKind::FaceOverlay => Box::new(face::FaceTool::new(ctx)),
        ToolKind::VolumeControl => Box::new(volume::VolumeTool::new(ctx)),
    };
    Ok(strategy)
}

/// Colored marker shown for a fixed number of frames after an action.
#[derive(Debug, Default)]
pub struct TransientIndicator {
    frames_left: u32,
    color: Option<Rgb<u8>>,
}

impl TransientIndicator {
    pub fn trigger(&mut self, frames: u32, color: Rgb<u8>) {
        self.frames_left = frames;
        self.color = Some(color);
    }

    pub fn is_active(&self) -> bool {
        self.frames_left > 0
    }

    /// Draws the banner if still active and counts one frame down.
    pub fn paint(&mut self, frame: &mut RgbImage) {
        if self.frames_left == 0 {
            return;
        }
        if let Some(color) = self.color {
            overlay::banner(frame, color);
        }
        self.frames_left -= 1;
    }
}

/// Cooldown bar shared by the command-driven tools.
pub(crate) fn paint_cooldown(frame: &mut RgbImage, ctx: &FrameContext<'_>) {
    if let Some(remaining) = ctx.cooldown_remaining {
        overlay::cooldown_bar(frame, remaining, ctx.cooldown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_runs_for_requested_frames() {
        let mut indicator = TransientIndicator::default();
        let mut frame = RgbImage::new(64, 64);
        indicator.trigger(2, overlay::RED);
        indicator.paint(&mut frame);
        assert!(indicator.is_active());
        indicator.paint(&mut frame);
        assert!(!indicator.is_active());
        assert_eq!(*frame.get_pixel(32, 10), overlay::RED);
    }
}
