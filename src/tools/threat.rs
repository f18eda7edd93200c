use anyhow::Result;
use image::RgbImage;

use crate::audio::Cue;
use crate::gesture::tables::GUN_POSE;
use crate::models::{Command, FingerVector, Hand, ToolKind};

use super::{
    overlay, paint_cooldown, Effects, FrameContext, ToolContext, ToolStrategy, TransientIndicator,
};

const FIRE_FRAMES: u32 = 5;

/// Gun pose plays a shot and flashes a red banner.
pub struct ThreatTool {
    effects: Effects,
    indicator: TransientIndicator,
}

impl ThreatTool {
    pub fn new(ctx: &ToolContext) -> Self {
        Self {
            effects: ctx.effects.clone(),
            indicator: TransientIndicator::default(),
        }
    }
}

impl ToolStrategy for ThreatTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ThreatOverlay
    }

    // Landmark geometry wins over the detector's finger flags, which tend to
    // miss a sideways thumb.
    fn fingers_for(&self, hand: &Hand) -> FingerVector {
        if hand.is_gun_pose() {
            GUN_POSE
        } else {
            hand.fingers
        }
    }

    fn dispatch(&mut self, command: Command, _frame: &RgbImage) -> Result<()> {
        if command == Command::Fire {
            self.indicator.trigger(FIRE_FRAMES, overlay::RED);
            self.effects.cues.play(Cue::Fire);
        }
        Ok(())
    }

    fn render(&mut self, mut frame: RgbImage, ctx: &FrameContext<'_>) -> RgbImage {
        paint_cooldown(&mut frame, ctx);
        self.indicator.paint(&mut frame);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{tool_context, RecordingEffects};
    use std::time::Duration;

    #[test]
    fn fire_shows_banner_for_five_frames() {
        let recorder = RecordingEffects::default();
        let mut tool = ThreatTool::new(&tool_context(&recorder));
        tool.dispatch(Command::Fire, &RgbImage::new(64, 64)).unwrap();
        assert_eq!(recorder.cues(), vec![Cue::Fire]);

        let ctx = FrameContext {
            hand: None,
            faces: &[],
            dispatched: None,
            cooldown_remaining: None,
            cooldown: Duration::from_secs(3),
        };
        for _ in 0..FIRE_FRAMES {
            let frame = tool.render(RgbImage::new(64, 64), &ctx);
            assert_eq!(*frame.get_pixel(32, 10), overlay::RED);
        }
        let frame = tool.render(RgbImage::new(64, 64), &ctx);
        assert_ne!(*frame.get_pixel(32, 10), overlay::RED);
    }
}
