use anyhow::Result;
use image::RgbImage;
use log::info;

use crate::audio::Cue;
use crate::models::{Command, ToolKind};

use super::{
    overlay, paint_cooldown, Effects, FrameContext, ToolContext, ToolStrategy, TransientIndicator,
    VolumeStep,
};

pub struct VolumeTool {
    effects: Effects,
    indicator: TransientIndicator,
}

impl VolumeTool {
    pub fn new(ctx: &ToolContext) -> Self {
        Self {
            effects: ctx.effects.clone(),
            indicator: TransientIndicator::default(),
        }
    }
}

impl ToolStrategy for VolumeTool {
    fn kind(&self) -> ToolKind {
        ToolKind::VolumeControl
    }

    fn dispatch(&mut self, command: Command, _frame: &RgbImage) -> Result<()> {
        let (step, cue, color) = match command {
            Command::VolumeUp => (VolumeStep::Up, Some(Cue::VolumeUp), overlay::GREEN),
            Command::VolumeDown => (VolumeStep::Down, Some(Cue::VolumeDown), overlay::AMBER),
            // Mute stays silent.
            Command::Mute => (VolumeStep::Mute, None, overlay::RED),
            _ => return Ok(()),
        };

        info!("volume gesture {step:?}");
        self.indicator.trigger(8, color);
        if let Some(cue) = cue {
            self.effects.cues.play(cue);
        }
        self.effects.volume.adjust(step)
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

    #[test]
    fn commands_map_to_volume_steps() {
        let recorder = RecordingEffects::default();
        let mut tool = VolumeTool::new(&tool_context(&recorder));
        let frame = RgbImage::new(8, 8);
        for command in [Command::VolumeUp, Command::VolumeDown, Command::Mute] {
            tool.dispatch(command, &frame).unwrap();
        }
        assert_eq!(
            recorder.volume_steps(),
            vec![VolumeStep::Up, VolumeStep::Down, VolumeStep::Mute]
        );
        assert_eq!(recorder.cues(), vec![Cue::VolumeUp, Cue::VolumeDown]);
    }
}
