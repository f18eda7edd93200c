use std::fmt;

use serde::{Deserialize, Serialize};

pub const LANDMARK_COUNT: usize = 21;

pub const THUMB_IP: usize = 3;
pub const THUMB_TIP: usize = 4;
pub const INDEX_PIP: usize = 6;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_PIP: usize = 10;
pub const MIDDLE_TIP: usize = 12;

/// Finger-up flags ordered thumb, index, middle, ring, pinky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FingerVector(pub [bool; 5]);

impl FingerVector {
    /// Builds a vector from the 0/1 notation the detector reports.
    pub const fn from_bits(bits: [u8; 5]) -> Self {
        Self([
            bits[0] != 0,
            bits[1] != 0,
            bits[2] != 0,
            bits[3] != 0,
            bits[4] != 0,
        ])
    }

    pub fn raised(&self) -> usize {
        self.0.iter().filter(|up| **up).count()
    }
}

impl fmt::Display for FingerVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits: Vec<&str> = self.0.iter().map(|up| if *up { "1" } else { "0" }).collect();
        write!(f, "[{}]", bits.join(","))
    }
}

/// Pixel-space landmark as reported by the hand detector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn distance_to(&self, other: &Landmark) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hand {
    pub landmarks: [Landmark; LANDMARK_COUNT],
    pub fingers: FingerVector,
}

impl Hand {
    pub fn new(landmarks: [Landmark; LANDMARK_COUNT], fingers: FingerVector) -> Self {
        Self { landmarks, fingers }
    }

    /// Thumb and index extended with the middle finger curled, judged from
    /// landmark heights rather than the detector's finger flags.
    pub fn is_gun_pose(&self) -> bool {
        let lm = &self.landmarks;
        let thumb_up = lm[THUMB_TIP].y < lm[THUMB_IP].y;
        let index_up = lm[INDEX_TIP].y < lm[INDEX_PIP].y;
        let middle_down = lm[MIDDLE_TIP].y > lm[MIDDLE_PIP].y;
        thumb_up && index_up && middle_down
    }

    pub fn pinch_distance(&self) -> f32 {
        self.landmarks[THUMB_TIP].distance_to(&self.landmarks[INDEX_TIP])
    }
}

/// Axis-aligned face box in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    OpenPrimary,
    OpenSecondary,
    OpenTertiary,
    OpenQuaternary,
    OpenQuinary,
    Fire,
    CaptureStill,
    VolumeUp,
    VolumeDown,
    Mute,
}

impl Command {
    /// Slot in the configured navigation URL list.
    pub fn nav_slot(&self) -> Option<usize> {
        match self {
            Command::OpenPrimary => Some(0),
            Command::OpenSecondary => Some(1),
            Command::OpenTertiary => Some(2),
            Command::OpenQuaternary => Some(3),
            Command::OpenQuinary => Some(4),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hand_with(points: &[(usize, f32)]) -> Hand {
        let mut landmarks = [Landmark::default(); LANDMARK_COUNT];
        for (idx, y) in points {
            landmarks[*idx].y = *y;
        }
        Hand::new(landmarks, FingerVector::from_bits([1, 1, 0, 0, 0]))
    }

    #[test]
    fn gun_pose_needs_middle_finger_curled() {
        let gun = hand_with(&[
            (THUMB_TIP, 100.0),
            (THUMB_IP, 120.0),
            (INDEX_TIP, 50.0),
            (INDEX_PIP, 90.0),
            (MIDDLE_TIP, 200.0),
            (MIDDLE_PIP, 150.0),
        ]);
        assert!(gun.is_gun_pose());

        let open = hand_with(&[
            (THUMB_TIP, 100.0),
            (THUMB_IP, 120.0),
            (INDEX_TIP, 50.0),
            (INDEX_PIP, 90.0),
            (MIDDLE_TIP, 40.0),
            (MIDDLE_PIP, 150.0),
        ]);
        assert!(!open.is_gun_pose());
    }

    #[test]
    fn finger_vector_formats_as_bits() {
        let v = FingerVector::from_bits([0, 1, 1, 0, 0]);
        assert_eq!(v.to_string(), "[0,1,1,0,0]");
        assert_eq!(v.raised(), 2);
    }
}
