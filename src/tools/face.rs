use std::path::PathBuf;

use anyhow::Result;
use chrono::Local;
use image::RgbImage;
use log::info;

use crate::audio::Cue;
use crate::camera::still::save_still;
use crate::models::{Command, ToolKind};
use crate::stream::encoder::encode_jpeg;

use super::{
    overlay, paint_cooldown, Effects, FrameContext, ToolContext, ToolStrategy, TransientIndicator,
};

/// Outlines faces; an open palm saves a still of the raw frame.
pub struct FaceTool {
    capture_dir: PathBuf,
    jpeg_quality: u8,
    effects: Effects,
    indicator: TransientIndicator,
    last_still: Option<PathBuf>,
}

impl FaceTool {
    pub fn new(ctx: &ToolContext) -> Self {
        Self {
            capture_dir: ctx.settings.capture_dir.clone(),
            jpeg_quality: ctx.settings.jpeg_quality,
            effects: ctx.effects.clone(),
            indicator: TransientIndicator::default(),
            last_still: None,
        }
    }

    pub fn last_still(&self) -> Option<&PathBuf> {
        self.last_still.as_ref()
    }
}

impl ToolStrategy for FaceTool {
    fn kind(&self) -> ToolKind {
        ToolKind::FaceOverlay
    }

    fn wants_faces(&self) -> bool {
        true
    }

    fn dispatch(&mut self, command: Command, frame: &RgbImage) -> Result<()> {
        if command != Command::CaptureStill {
            return Ok(());
        }
        let jpeg = encode_jpeg(frame, self.jpeg_quality)?;
        let path = save_still(&self.capture_dir, &jpeg, Local::now())?;
        info!("still saved to {}", path.display());
        self.last_still = Some(path);
        self.indicator.trigger(3, overlay::GREEN);
        self.effects.cues.play(Cue::Shutter);
        Ok(())
    }

    fn render(&mut self, mut frame: RgbImage, ctx: &FrameContext<'_>) -> RgbImage {
        for face in ctx.faces {
            overlay::outline_rect(
                &mut frame,
                face.x,
                face.y,
                face.width,
                face.height,
                3,
                overlay::CYAN,
            );
        }
        paint_cooldown(&mut frame, ctx);
        self.indicator.paint(&mut frame);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FaceBox;
    use crate::testing::{tool_context_with, RecordingEffects};
    use std::time::Duration;

    #[test]
    fn open_palm_writes_a_still() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = RecordingEffects::default();
        let ctx = tool_context_with(&recorder, |settings| {
            settings.capture_dir = dir.path().to_path_buf();
        });
        let mut tool = FaceTool::new(&ctx);

        tool.dispatch(Command::CaptureStill, &RgbImage::new(32, 24)).unwrap();

        let path = tool.last_still().unwrap();
        assert!(path.starts_with(dir.path()));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("photo_") && name.ends_with(".jpg"));
        assert_eq!(recorder.cues(), vec![Cue::Shutter]);
    }

    #[test]
    fn faces_are_outlined() {
        let recorder = RecordingEffects::default();
        let mut tool = FaceTool::new(&tool_context_with(&recorder, |_| {}));
        let faces = [FaceBox {
            x: 10,
            y: 10,
            width: 20,
            height: 20,
        }];
        let ctx = FrameContext {
            hand: None,
            faces: &faces,
            dispatched: None,
            cooldown_remaining: None,
            cooldown: Duration::from_secs(3),
        };
        let frame = tool.render(RgbImage::new(64, 64), &ctx);
        assert_eq!(*frame.get_pixel(10, 20), overlay::CYAN);
        assert_eq!(*frame.get_pixel(20, 20), image::Rgb([0, 0, 0]));
    }
}
