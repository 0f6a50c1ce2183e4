//! Landmark layout and detector boundary
//!
//! The gaze core never computes landmarks itself. A detector is plugged in
//! through [`LandmarkExtractor`]; the indices the feature reducer reads are
//! described by a [`LandmarkLayout`].

use crate::error::GazeError;
use crate::types::LandmarkFrame;
use serde::{Deserialize, Serialize};

/// MediaPipe face mesh indices (468-point topology)
pub mod mediapipe {
    pub const LEFT_EYE_CONTOUR: [usize; 16] = [
        33, 7, 163, 144, 145, 153, 154, 155, 133, 173, 157, 158, 159, 160, 161, 246,
    ];
    pub const RIGHT_EYE_CONTOUR: [usize; 16] = [
        362, 382, 381, 380, 374, 373, 390, 249, 263, 466, 388, 387, 386, 385, 384, 398,
    ];

    /// Outer corner, two upper lid points, inner corner, two lower lid points
    pub const LEFT_EYE_EAR: [usize; 6] = [33, 160, 158, 133, 153, 144];
    pub const RIGHT_EYE_EAR: [usize; 6] = [362, 385, 387, 263, 373, 380];

    pub const NUM_LANDMARKS: usize = 468;
}

/// Which landmark indices make up each eye.
///
/// EAR index order is `[p1, p2, p3, p4, p5, p6]`: horizontal corners are
/// `p1`/`p4`, and the vertical pairs are `p2`–`p6` and `p3`–`p5`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandmarkLayout {
    pub left_eye: Vec<usize>,
    pub right_eye: Vec<usize>,
    pub left_eye_ear: [usize; 6],
    pub right_eye_ear: [usize; 6],
}

impl Default for LandmarkLayout {
    fn default() -> Self {
        Self::mediapipe()
    }
}

impl LandmarkLayout {
    /// Layout for MediaPipe face mesh output
    pub fn mediapipe() -> Self {
        Self {
            left_eye: mediapipe::LEFT_EYE_CONTOUR.to_vec(),
            right_eye: mediapipe::RIGHT_EYE_CONTOUR.to_vec(),
            left_eye_ear: mediapipe::LEFT_EYE_EAR,
            right_eye_ear: mediapipe::RIGHT_EYE_EAR,
        }
    }

    /// Smallest point count a frame needs for every index to resolve
    pub fn min_points(&self) -> usize {
        self.left_eye
            .iter()
            .chain(self.right_eye.iter())
            .chain(self.left_eye_ear.iter())
            .chain(self.right_eye_ear.iter())
            .copied()
            .max()
            .map_or(0, |max| max + 1)
    }

    pub fn validate(&self) -> Result<(), GazeError> {
        if self.left_eye.is_empty() || self.right_eye.is_empty() {
            return Err(GazeError::InvalidConfiguration(
                "landmark layout needs at least one point per eye".to_string(),
            ));
        }
        Ok(())
    }
}

/// Capability boundary for the external landmark detector.
///
/// Returns `Ok(None)` when no face is found in the image. Tests substitute
/// synthetic extractors; the real detector lives at the system boundary.
pub trait LandmarkExtractor {
    type Image;

    fn extract(&mut self, image: &Self::Image) -> Result<Option<LandmarkFrame>, GazeError>;
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::mediapipe;
    use crate::types::{LandmarkFrame, Point};

    pub const IMAGE_WIDTH: f64 = 640.0;
    pub const IMAGE_HEIGHT: f64 = 480.0;

    /// Builds MediaPipe-shaped frames with a 200x200 face box centered in a
    /// 640x480 image, eyes 20px above the box center.
    #[derive(Debug, Clone, Copy)]
    pub struct SyntheticFace {
        pub gaze_dx: f64,
        pub gaze_dy: f64,
        /// Half the vertical lid opening; EAR = half_height / 15
        pub lid_half_height: f64,
        pub scale: f64,
        pub shift: (f64, f64),
    }

    impl Default for SyntheticFace {
        fn default() -> Self {
            Self {
                gaze_dx: 0.0,
                gaze_dy: 0.0,
                lid_half_height: 5.0,
                scale: 1.0,
                shift: (0.0, 0.0),
            }
        }
    }

    impl SyntheticFace {
        pub fn looking(gaze_dx: f64, gaze_dy: f64) -> Self {
            Self {
                gaze_dx,
                gaze_dy,
                ..Self::default()
            }
        }

        pub fn frame(&self) -> LandmarkFrame {
            let center = (IMAGE_WIDTH / 2.0, IMAGE_HEIGHT / 2.0);
            let mut raw = vec![(center.0, center.1); mediapipe::NUM_LANDMARKS];

            // Face extent: forehead, chin, both cheeks
            raw[10] = (center.0, center.1 - 100.0);
            raw[152] = (center.0, center.1 + 100.0);
            raw[234] = (center.0 - 100.0, center.1);
            raw[454] = (center.0 + 100.0, center.1);

            let eye_y = center.1 - 20.0 + self.gaze_dy;
            let left = (center.0 - 40.0 + self.gaze_dx, eye_y);
            let right = (center.0 + 40.0 + self.gaze_dx, eye_y);
            place_eye(&mut raw, &mediapipe::LEFT_EYE_CONTOUR, &mediapipe::LEFT_EYE_EAR, left, self.lid_half_height);
            place_eye(&mut raw, &mediapipe::RIGHT_EYE_CONTOUR, &mediapipe::RIGHT_EYE_EAR, right, self.lid_half_height);

            let points = raw
                .into_iter()
                .map(|(x, y)| {
                    Point::new(
                        center.0 + (x - center.0) * self.scale + self.shift.0,
                        center.1 + (y - center.1) * self.scale + self.shift.1,
                    )
                })
                .collect();
            LandmarkFrame::new(points, IMAGE_WIDTH, IMAGE_HEIGHT)
        }
    }

    fn place_eye(
        raw: &mut [(f64, f64)],
        contour: &[usize],
        ear: &[usize; 6],
        c: (f64, f64),
        h: f64,
    ) {
        for &i in contour {
            raw[i] = c;
        }
        raw[ear[0]] = (c.0 - 15.0, c.1);
        raw[ear[1]] = (c.0 - 5.0, c.1 - h);
        raw[ear[2]] = (c.0 + 5.0, c.1 - h);
        raw[ear[3]] = (c.0 + 15.0, c.1);
        raw[ear[4]] = (c.0 + 5.0, c.1 + h);
        raw[ear[5]] = (c.0 - 5.0, c.1 + h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mediapipe_min_points() {
        assert_eq!(LandmarkLayout::mediapipe().min_points(), 467);
    }

    #[test]
    fn test_empty_layout_rejected() {
        let layout = LandmarkLayout {
            left_eye: vec![],
            ..LandmarkLayout::mediapipe()
        };
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_fixture_has_full_mesh() {
        let frame = fixtures::SyntheticFace::default().frame();
        assert_eq!(frame.points.len(), mediapipe::NUM_LANDMARKS);
        assert!(frame.points.len() >= LandmarkLayout::mediapipe().min_points());
    }
}
