use anyhow::{anyhow, Result};
use image::RgbImage;
use log::info;

use crate::audio::Cue;
use crate::models::{Command, ToolKind};

use super::{
    overlay, paint_cooldown, Effects, FrameContext, ToolContext, ToolStrategy, TransientIndicator,
};

/// Finger counts open one of the configured URLs.
pub struct NavigationTool {
    urls: Vec<String>,
    effects: Effects,
    indicator: TransientIndicator,
}

impl NavigationTool {
    pub fn new(ctx: &ToolContext) -> Self {
        Self {
            urls: ctx.settings.nav_urls.clone(),
            effects: ctx.effects.clone(),
            indicator: TransientIndicator::default(),
        }
    }
}

impl ToolStrategy for NavigationTool {
    fn kind(&self) -> ToolKind {
        ToolKind::GestureNav
    }

    fn dispatch(&mut self, command: Command, _frame: &RgbImage) -> Result<()> {
        let url = command
            .nav_slot()
            .and_then(|slot| self.urls.get(slot))
            .ok_or_else(|| anyhow!("no URL configured for {command:?}"))?;

        info!("{command:?} gesture, opening {url}");
        self.indicator.trigger(10, overlay::GREEN);
        self.effects.cues.play(Cue::Confirm);
        self.effects.opener.open(url)
    }

    fn render(&mut self, mut frame: RgbImage, ctx: &FrameContext<'_>) -> RgbImage {
        paint_cooldown(&mut frame, ctx);
        self.indicator.paint(&mut frame);
        frame
    }
}
