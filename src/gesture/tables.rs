//! Gesture tables for the command-driven tools.

use crate::models::{Command, FingerVector, ToolKind};

use super::GestureTable;

const fn v(bits: [u8; 5]) -> FingerVector {
    FingerVector::from_bits(bits)
}

pub fn navigation() -> GestureTable {
    GestureTable::new(vec![
        (v([0, 1, 0, 0, 0]), Command::OpenPrimary),
        (v([0, 1, 1, 0, 0]), Command::OpenSecondary),
        (v([0, 1, 1, 1, 0]), Command::OpenTertiary),
        (v([1, 1, 1, 1, 1]), Command::OpenQuaternary),
        (v([0, 1, 1, 1, 1]), Command::OpenQuinary),
    ])
}

/// Thumb and index out, the rest curled.
pub const GUN_POSE: FingerVector = v([1, 1, 0, 0, 0]);

pub fn threat() -> GestureTable {
    GestureTable::new(vec![(GUN_POSE, Command::Fire)])
}

pub fn face() -> GestureTable {
    GestureTable::new(vec![(v([1, 1, 1, 1, 1]), Command::CaptureStill)])
}

pub fn volume() -> GestureTable {
    GestureTable::new(vec![
        (v([0, 1, 0, 0, 0]), Command::VolumeUp),
        (v([0, 1, 1, 0, 0]), Command::VolumeDown),
        (v([0, 0, 0, 0, 0]), Command::Mute),
    ])
}

pub fn for_tool(kind: ToolKind) -> GestureTable {
    match kind {
        ToolKind::GestureNav => navigation(),
        ToolKind::ThreatOverlay => threat(),
        ToolKind::FaceOverlay => face(),
        ToolKind::VolumeControl => volume(),
        ToolKind::ZoomControl => GestureTable::empty(),
    }
}
