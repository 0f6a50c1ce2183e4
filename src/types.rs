//! Core types for the Synheart Gaze pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: landmark frames, feature vectors, classifications, smoother state
//! and session log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 2-D landmark position in image pixels.
///
/// Serialized as a compact `[x, y]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Centroid of a set of points, `None` when empty
    pub fn centroid(points: &[Point]) -> Option<Point> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let (sx, sy) = points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point::new(sx / n, sy / n))
    }
}

impl From<[f64; 2]> for Point {
    fn from(xy: [f64; 2]) -> Self {
        Point::new(xy[0], xy[1])
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// Per-frame landmark geometry produced by the external detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    /// Landmark points, indexed by the detector's fixed layout
    pub points: Vec<Point>,
    /// Source image width in pixels
    pub image_width: f64,
    /// Source image height in pixels
    pub image_height: f64,
    /// Detector's validity flag for this frame
    #[serde(default = "default_valid")]
    pub valid: bool,
}

fn default_valid() -> bool {
    true
}

impl LandmarkFrame {
    /// Create a valid frame
    pub fn new(points: Vec<Point>, image_width: f64, image_height: f64) -> Self {
        Self {
            points,
            image_width,
            image_height,
            valid: true,
        }
    }

    /// Look up a landmark by index
    pub fn point(&self, index: usize) -> Option<Point> {
        self.points.get(index).copied()
    }
}

/// The two decision axes of the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Horizontal,
    Vertical,
}

/// Direction label reported by the classifier and the smoother.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Straight,
    Left,
    Right,
    Up,
    Down,
    /// No decision: face absent, blink, or no calibration yet
    Unknown,
}

impl Direction {
    /// The five calibratable poses in canonical order
    pub const POSES: [Direction; 5] = [
        Direction::Straight,
        Direction::Left,
        Direction::Right,
        Direction::Up,
        Direction::Down,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Straight => "straight",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Unknown => "unknown",
        }
    }

    /// Decision axis of a deviating pose; `None` for straight and unknown
    pub fn axis(&self) -> Option<Axis> {
        match self {
            Direction::Left | Direction::Right => Some(Axis::Horizontal),
            Direction::Up | Direction::Down => Some(Axis::Vertical),
            Direction::Straight | Direction::Unknown => None,
        }
    }

    /// The pose on the other side of the same axis
    pub fn opposite(&self) -> Option<Direction> {
        match self {
            Direction::Left => Some(Direction::Right),
            Direction::Right => Some(Direction::Left),
            Direction::Up => Some(Direction::Down),
            Direction::Down => Some(Direction::Up),
            Direction::Straight | Direction::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Direction::Unknown)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "straight" | "center" => Ok(Direction::Straight),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "unknown" => Ok(Direction::Unknown),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// Normalized scalar signals derived from one landmark frame.
///
/// Eye offsets are relative to the face box and normalized by its size; face
/// offsets are relative to the image center and normalized by image size.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub horizontal_eye_offset: f64,
    pub vertical_eye_offset: f64,
    pub horizontal_face_offset: f64,
    pub vertical_face_offset: f64,
    pub eyelid_openness: f64,
}

impl FeatureVector {
    pub fn new(
        horizontal_eye_offset: f64,
        vertical_eye_offset: f64,
        horizontal_face_offset: f64,
        vertical_face_offset: f64,
        eyelid_openness: f64,
    ) -> Self {
        Self {
            horizontal_eye_offset,
            vertical_eye_offset,
            horizontal_face_offset,
            vertical_face_offset,
            eyelid_openness,
        }
    }

    /// Combined eye + head signal along a decision axis
    pub fn axis_value(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Horizontal => self.horizontal_eye_offset + self.horizontal_face_offset,
            Axis::Vertical => self.vertical_eye_offset + self.vertical_face_offset,
        }
    }

    /// Per-axis mean of a set of vectors, `None` when empty
    pub fn mean(samples: &[FeatureVector]) -> Option<FeatureVector> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let sum = samples.iter().fold(FeatureVector::default(), |acc, s| {
            FeatureVector {
                horizontal_eye_offset: acc.horizontal_eye_offset + s.horizontal_eye_offset,
                vertical_eye_offset: acc.vertical_eye_offset + s.vertical_eye_offset,
                horizontal_face_offset: acc.horizontal_face_offset + s.horizontal_face_offset,
                vertical_face_offset: acc.vertical_face_offset + s.vertical_face_offset,
                eyelid_openness: acc.eyelid_openness + s.eyelid_openness,
            }
        });
        Some(FeatureVector {
            horizontal_eye_offset: sum.horizontal_eye_offset / n,
            vertical_eye_offset: sum.vertical_eye_offset / n,
            horizontal_face_offset: sum.horizontal_face_offset / n,
            vertical_face_offset: sum.vertical_face_offset / n,
            eyelid_openness: sum.eyelid_openness / n,
        })
    }

    pub fn is_finite(&self) -> bool {
        self.horizontal_eye_offset.is_finite()
            && self.vertical_eye_offset.is_finite()
            && self.horizontal_face_offset.is_finite()
            && self.vertical_face_offset.is_finite()
            && self.eyelid_openness.is_finite()
    }
}

/// Why a frame carries no direction signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoSignalReason {
    /// Detector found no face, or the geometry was unusable
    FaceAbsent,
    /// Eyes closed below the blink threshold
    Blink,
}

/// Output of the feature reducer for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameSignal {
    Features(FeatureVector),
    NoSignal(NoSignalReason),
}

impl FrameSignal {
    pub fn features(&self) -> Option<&FeatureVector> {
        match self {
            FrameSignal::Features(fv) => Some(fv),
            FrameSignal::NoSignal(_) => None,
        }
    }

    pub fn no_signal_reason(&self) -> Option<NoSignalReason> {
        match self {
            FrameSignal::Features(_) => None,
            FrameSignal::NoSignal(reason) => Some(*reason),
        }
    }
}

/// Per-frame classifier verdict
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: Direction,
    /// Normalized margin of the winning axis, in [0, 1]; display only
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    /// Epoch of the calibration profile used, `None` without a profile
    pub profile_epoch: Option<u64>,
}

impl Classification {
    pub fn unknown(timestamp: DateTime<Utc>, profile_epoch: Option<u64>) -> Self {
        Self {
            label: Direction::Unknown,
            confidence: 0.0,
            timestamp,
            profile_epoch,
        }
    }
}

/// Debounce state of the temporal smoother
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoothedState {
    pub current_label: Direction,
    /// Frames since `current_label` was entered
    pub frames_in_state: u64,
    pub pending_label: Option<Direction>,
    pub pending_count: u32,
    /// Consecutive no-signal frames
    pub absent_frames: u32,
}

impl Default for SmoothedState {
    fn default() -> Self {
        Self {
            current_label: Direction::Unknown,
            frames_in_state: 0,
            pending_label: None,
            pending_count: 0,
            absent_frames: 0,
        }
    }
}

/// Which stage consumed a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramePhase {
    Live,
    Calibrating,
}

/// One entry of the append-only session log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Zero-based arrival index since session start
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    pub phase: FramePhase,
    /// Feature vector, absent for no-signal frames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_signal: Option<NoSignalReason>,
    pub raw_label: Direction,
    pub smoothed_label: Direction,
    pub confidence: f64,
    pub profile_epoch: Option<u64>,
}
