//! Feature reduction
//!
//! This module reduces raw landmark geometry to a small normalized feature
//! vector:
//! - Eye-center offsets relative to the face box, scaled by face box size
//! - Face-box center offsets relative to the image, scaled by image size
//! - Eyelid openness as the mean eye aspect ratio of both eyes
//!
//! Blinks and missing faces are reported as distinct no-signal results.

use crate::config::GazeConfig;
use crate::landmarks::LandmarkLayout;
use crate::types::{FeatureVector, FrameSignal, LandmarkFrame, NoSignalReason, Point};
use tracing::debug;

/// Feature reducer for converting landmark frames to feature vectors
#[derive(Debug, Clone)]
pub struct FeatureReducer {
    layout: LandmarkLayout,
    blink_threshold: f64,
}

impl Default for FeatureReducer {
    fn default() -> Self {
        Self::from_config(&GazeConfig::default())
    }
}

impl FeatureReducer {
    pub fn new(layout: LandmarkLayout, blink_threshold: f64) -> Self {
        Self {
            layout,
            blink_threshold,
        }
    }

    /// Reducer with the configured layout and blink threshold
    pub fn from_config(config: &GazeConfig) -> Self {
        Self::new(config.layout.clone(), config.blink_threshold)
    }

    pub fn layout(&self) -> &LandmarkLayout {
        &self.layout
    }

    /// Reduce one frame. `None` means the detector found no face.
    pub fn reduce(&self, frame: Option<&LandmarkFrame>) -> FrameSignal {
        let Some(frame) = frame else {
            return FrameSignal::NoSignal(NoSignalReason::FaceAbsent);
        };
        if !frame.valid {
            return FrameSignal::NoSignal(NoSignalReason::FaceAbsent);
        }
        match self.compute(frame) {
            Some(features) => self.screen(FrameSignal::Features(features)),
            None => FrameSignal::NoSignal(NoSignalReason::FaceAbsent),
        }
    }

    /// Apply the blink threshold to an already reduced signal
    pub fn screen(&self, signal: FrameSignal) -> FrameSignal {
        match signal {
            FrameSignal::Features(features) if features.eyelid_openness < self.blink_threshold => {
                FrameSignal::NoSignal(NoSignalReason::Blink)
            }
            other => other,
        }
    }

    fn compute(&self, frame: &LandmarkFrame) -> Option<FeatureVector> {
        if frame.points.len() < self.layout.min_points() {
            debug!(
                points = frame.points.len(),
                required = self.layout.min_points(),
                "landmark frame too short for layout"
            );
            return None;
        }
        if !(frame.image_width > 0.0 && frame.image_height > 0.0) {
            debug!("landmark frame has no image dimensions");
            return None;
        }

        let face = FaceBox::enclosing(&frame.points)?;
        if face.width <= 0.0 || face.height <= 0.0 {
            debug!("degenerate face box");
            return None;
        }

        let left_eye = centroid_of(frame, &self.layout.left_eye)?;
        let right_eye = centroid_of(frame, &self.layout.right_eye)?;
        let gaze = Point::new(
            (left_eye.x + right_eye.x) / 2.0,
            (left_eye.y + right_eye.y) / 2.0,
        );
        let face_center = face.center();

        let left_ear = eye_aspect_ratio(frame, &self.layout.left_eye_ear)?;
        let right_ear = eye_aspect_ratio(frame, &self.layout.right_eye_ear)?;

        let features = FeatureVector {
            horizontal_eye_offset: (gaze.x - face_center.x) / face.width,
            vertical_eye_offset: (gaze.y - face_center.y) / face.height,
            horizontal_face_offset: (face_center.x - frame.image_width / 2.0) / frame.image_width,
            vertical_face_offset: (face_center.y - frame.image_height / 2.0) / frame.image_height,
            eyelid_openness: (left_ear + right_ear) / 2.0,
        };

        if features.is_finite() {
            Some(features)
        } else {
            debug!("non-finite features discarded");
            None
        }
    }
}

/// Axis-aligned bounding box of a set of landmarks
#[derive(Debug, Clone, Copy, PartialEq)]
struct FaceBox {
    min_x: f64,
    min_y: f64,
    width: f64,
    height: f64,
}

impl FaceBox {
    fn enclosing(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self {
            min_x,
            min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }

    fn center(&self) -> Point {
        Point::new(self.min_x + self.width / 2.0, self.min_y + self.height / 2.0)
    }
}

fn centroid_of(frame: &LandmarkFrame, indices: &[usize]) -> Option<Point> {
    let points: Vec<Point> = indices
        .iter()
        .map(|&i| frame.point(i))
        .collect::<Option<Vec<_>>>()?;
    Point::centroid(&points)
}

/// Eye aspect ratio: `(|p2-p6| + |p3-p5|) / (2 |p1-p4|)`.
///
/// Returns `None` when the eye corners coincide.
fn eye_aspect_ratio(frame: &LandmarkFrame, indices: &[usize; 6]) -> Option<f64> {
    let p = indices
        .iter()
        .map(|&i| frame.point(i))
        .collect::<Option<Vec<_>>>()?;
    let horizontal = p[0].distance(&p[3]);
    if horizontal <= 0.0 {
        return None;
    }
    let vertical = p[1].distance(&p[5]) + p[2].distance(&p[4]);
    Some(vertical / (2.0 * horizontal))
}
