//! Seam to the hand-landmark and face detection capability.
//!
//! Detection itself is not done here. A provider is handed one frame at a
//! time and reports zero or one hand (21 landmarks plus the finger-up flags)
//! and any face boxes it found.

use anyhow::Result;
use image::RgbImage;

use crate::models::{FaceBox, Hand};

pub trait VisionProvider: Send + Sync {
    fn detect_hand(&self, frame: &RgbImage) -> Result<Option<Hand>>;

    fn detect_faces(&self, _frame: &RgbImage) -> Result<Vec<FaceBox>> {
        Ok(Vec::new())
    }
}

/// Provider used when no detector is attached: frames pass through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullVision;

impl VisionProvider for NullVision {
    fn detect_hand(&self, _frame: &RgbImage) -> Result<Option<Hand>> {
        Ok(None)
    }
}
