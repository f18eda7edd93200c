//! Minimal raster helpers for on-frame indicators. No text rendering; tools
//! signal state with colored bars and boxes.

use std::time::Duration;

use image::{Rgb, RgbImage};

pub const RED: Rgb<u8> = Rgb([230, 30, 30]);
pub const GREEN: Rgb<u8> = Rgb([40, 200, 80]);
pub const AMBER: Rgb<u8> = Rgb([240, 170, 20]);
pub const CYAN: Rgb<u8> = Rgb([30, 190, 230]);

pub fn fill_rect(frame: &mut RgbImage, x: u32, y: u32, width: u32, height: u32, color: Rgb<u8>) {
    let (fw, fh) = frame.dimensions();
    let x_end = x.saturating_add(width).min(fw);
    let y_end = y.saturating_add(height).min(fh);
    for py in y.min(fh)..y_end {
        for px in x.min(fw)..x_end {
            frame.put_pixel(px, py, color);
        }
    }
}

pub fn outline_rect(
    frame: &mut RgbImage,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    thickness: u32,
    color: Rgb<u8>,
) {
    fill_rect(frame, x, y, width, thickness, color);
    fill_rect(frame, x, y + height.saturating_sub(thickness), width, thickness, color);
    fill_rect(frame, x, y, thickness, height, color);
    fill_rect(frame, x + width.saturating_sub(thickness), y, thickness, height, color);
}

/// Thin bar along the top edge that shrinks as the cooldown runs out.
pub fn cooldown_bar(frame: &mut RgbImage, remaining: Duration, cooldown: Duration) {
    if cooldown.is_zero() {
        return;
    }
    let fraction = (remaining.as_secs_f32() / cooldown.as_secs_f32()).clamp(0.0, 1.0);
    let width = (frame.width() as f32 * fraction) as u32;
    fill_rect(frame, 0, 0, width, 6, AMBER);
}

/// Solid banner across the top third of the frame.
pub fn banner(frame: &mut RgbImage, color: Rgb<u8>) {
    let (width, height) = frame.dimensions();
    fill_rect(frame, width / 8, height / 8, width * 3 / 4, height / 10, color);
}

/// Vertical gauge on the right edge, `level` in 0..=1.
pub fn gauge(frame: &mut RgbImage, level: f32, color: Rgb<u8>) {
    let (width, height) = frame.dimensions();
    let track_height = height * 3 / 4;
    let filled = (track_height as f32 * level.clamp(0.0, 1.0)) as u32;
    let x = width.saturating_sub(36);
    let top = height / 8;
    outline_rect(frame, x, top, 20, track_height, 2, color);
    fill_rect(frame, x, top + track_height - filled, 20, filled, color);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rects_are_clipped_to_the_frame() {
        let mut frame = RgbImage::new(10, 10);
        fill_rect(&mut frame, 8, 8, 50, 50, RED);
        assert_eq!(*frame.get_pixel(9, 9), RED);
        assert_eq!(*frame.get_pixel(7, 7), Rgb([0, 0, 0]));
    }

    #[test]
    fn cooldown_bar_scales_with_remaining_time() {
        let mut frame = RgbImage::new(100, 20);
        cooldown_bar(&mut frame, Duration::from_secs(1), Duration::from_secs(4));
        assert_eq!(*frame.get_pixel(24, 0), AMBER);
        assert_eq!(*frame.get_pixel(25, 0), Rgb([0, 0, 0]));
    }
}
