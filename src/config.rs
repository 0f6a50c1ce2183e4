//! Pipeline configuration
//!
//! Every value is checked by [`GazeConfig::validate`]; out-of-range values are
//! rejected, never clamped.

use crate::error::GazeError;
use crate::landmarks::LandmarkLayout;
use serde::{Deserialize, Serialize};

/// Default number of consecutive frames before a label change is accepted
pub const DEFAULT_DEBOUNCE_THRESHOLD: u32 = 3;

/// Default calibration threshold scale
pub const DEFAULT_SENSITIVITY: f64 = 1.0;

/// Default number of valid samples collected per calibration pose
pub const DEFAULT_SAMPLES_PER_POSE: usize = 15;

/// Default number of no-signal frames tolerated before forcing `unknown`
pub const DEFAULT_ABSENCE_GRACE_FRAMES: u32 = 5;

/// Default time budget for collecting one pose (milliseconds)
pub const DEFAULT_POSE_TIME_BUDGET_MS: u64 = 5_000;

/// Default eye aspect ratio below which a frame counts as a blink
pub const DEFAULT_BLINK_THRESHOLD: f64 = 0.2;

/// Tunable parameters of the gaze pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    /// Frames a new label must persist before it replaces the current one
    pub debounce_threshold: u32,
    /// Scales calibration thresholds; higher is stricter
    pub sensitivity: f64,
    /// Valid samples required for each calibration pose
    pub samples_per_pose: usize,
    /// No-signal frames tolerated before the smoother forces `unknown`
    pub absence_grace_frames: u32,
    /// Per-pose collection budget, measured on frame timestamps
    pub pose_time_budget_ms: u64,
    /// Eyelid openness below this value is treated as a blink
    pub blink_threshold: f64,
    /// Landmark indices read by the feature reducer
    pub layout: LandmarkLayout,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            debounce_threshold: DEFAULT_DEBOUNCE_THRESHOLD,
            sensitivity: DEFAULT_SENSITIVITY,
            samples_per_pose: DEFAULT_SAMPLES_PER_POSE,
            absence_grace_frames: DEFAULT_ABSENCE_GRACE_FRAMES,
            pose_time_budget_ms: DEFAULT_POSE_TIME_BUDGET_MS,
            blink_threshold: DEFAULT_BLINK_THRESHOLD,
            layout: LandmarkLayout::mediapipe(),
        }
    }
}

impl GazeConfig {
    /// Check every option against its valid range
    pub fn validate(&self) -> Result<(), GazeError> {
        if self.debounce_threshold == 0 {
            return Err(GazeError::InvalidConfiguration(
                "debounce_threshold must be at least 1".to_string(),
            ));
        }
        if !self.sensitivity.is_finite() || self.sensitivity <= 0.0 {
            return Err(GazeError::InvalidConfiguration(format!(
                "sensitivity must be a positive finite number, got {}",
                self.sensitivity
            )));
        }
        if self.samples_per_pose == 0 {
            return Err(GazeError::InvalidConfiguration(
                "samples_per_pose must be at least 1".to_string(),
            ));
        }
        if self.pose_time_budget_ms == 0 {
            return Err(GazeError::InvalidConfiguration(
                "pose_time_budget_ms must be positive".to_string(),
            ));
        }
        if !self.blink_threshold.is_finite() || !(0.0..1.0).contains(&self.blink_threshold) {
            return Err(GazeError::InvalidConfiguration(format!(
                "blink_threshold must be in [0, 1), got {}",
                self.blink_threshold
            )));
        }
        self.layout.validate()?;
        Ok(())
    }

    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, GazeError> {
        let config: GazeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, GazeError> {
        serde_json::to_string_pretty(self).map_err(GazeError::JsonError)
    }

    pub fn with_debounce_threshold(mut self, frames: u32) -> Result<Self, GazeError> {
        self.debounce_threshold = frames;
        self.validate()?;
        Ok(self)
    }

    pub fn with_sensitivity(mut self, sensitivity: f64) -> Result<Self, GazeError> {
        self.sensitivity = sensitivity;
        self.validate()?;
        Ok(self)
    }

    pub fn with_samples_per_pose(mut self, samples: usize) -> Result<Self, GazeError> {
        self.samples_per_pose = samples;
        self.validate()?;
        Ok(self)
    }

    pub fn with_absence_grace_frames(mut self, frames: u32) -> Result<Self, GazeError> {
        self.absence_grace_frames = frames;
        self.validate()?;
        Ok(self)
    }

    pub fn with_pose_time_budget_ms(mut self, budget_ms: u64) -> Result<Self, GazeError> {
        self.pose_time_budget_ms = budget_ms;
        self.validate()?;
        Ok(self)
    }

    pub fn with_blink_threshold(mut self, threshold: f64) -> Result<Self, GazeError> {
        self.blink_threshold = threshold;
        self.validate()?;
        Ok(self)
    }

    pub fn with_layout(mut self, layout: LandmarkLayout) -> Result<Self, GazeError> {
        self.layout = layout;
        self.validate()?;
        Ok(self)
    }
}
