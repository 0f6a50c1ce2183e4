//! Calibration profile building
//!
//! A [`CalibrationRun`] walks the user through an ordered pose sequence,
//! averages the valid feature vectors captured for each pose, and derives
//! per-direction decision thresholds at the midpoint between the straight
//! reference and each pose's reference.
//!
//! A finished [`CalibrationProfile`] is an immutable value. Changing its
//! sensitivity or epoch yields a new profile.

use crate::config::GazeConfig;
use crate::error::GazeError;
use crate::types::{Axis, Direction, FeatureVector, FrameSignal};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Minimum axis separation between a pose reference and straight
pub const MIN_POSE_SEPARATION: f64 = 1e-3;

/// Side of the straight reference a pose lies on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Negative,
    Positive,
}

impl Side {
    fn of(delta: f64) -> Self {
        if delta < 0.0 {
            Side::Negative
        } else {
            Side::Positive
        }
    }

    /// Whether a signed deviation points to this side
    pub fn contains(&self, deviation: f64) -> bool {
        match self {
            Side::Negative => deviation < 0.0,
            Side::Positive => deviation > 0.0,
        }
    }
}

/// Decision threshold for one deviating pose
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseThreshold {
    pub axis: Axis,
    pub side: Side,
    /// Absolute deviation from straight that must be exceeded
    pub threshold: f64,
}

/// Per-user reference vectors and derived thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredProfile")]
pub struct CalibrationProfile {
    epoch: u64,
    created_at: DateTime<Utc>,
    sensitivity: f64,
    references: BTreeMap<Direction, FeatureVector>,
    thresholds: BTreeMap<Direction, PoseThreshold>,
}

impl CalibrationProfile {
    /// Build and verify a profile from per-pose reference vectors.
    ///
    /// Requires a straight reference; every other pose must be separated
    /// from straight on its axis, and opposite poses must lie on opposite
    /// sides of straight.
    pub fn from_references(
        references: BTreeMap<Direction, FeatureVector>,
        sensitivity: f64,
        epoch: u64,
        created_at: DateTime<Utc>,
    ) -> Result<Self, GazeError> {
        if !sensitivity.is_finite() || sensitivity <= 0.0 {
            return Err(GazeError::InvalidConfiguration(format!(
                "sensitivity must be a positive finite number, got {sensitivity}"
            )));
        }
        if references.contains_key(&Direction::Unknown) {
            return Err(GazeError::DegenerateCalibration(
                "'unknown' cannot have a reference".to_string(),
            ));
        }
        let straight = references.get(&Direction::Straight).ok_or_else(|| {
            GazeError::DegenerateCalibration("missing straight reference".to_string())
        })?;
        if let Some((pose, _)) = references.iter().find(|(_, fv)| !fv.is_finite()) {
            return Err(GazeError::DegenerateCalibration(format!(
                "reference for '{pose}' is not finite"
            )));
        }

        let mut thresholds = BTreeMap::new();
        for (&pose, reference) in &references {
            let Some(axis) = pose.axis() else { continue };
            let delta = reference.axis_value(axis) - straight.axis_value(axis);
            if delta.abs() <= MIN_POSE_SEPARATION {
                return Err(GazeError::DegenerateCalibration(format!(
                    "'{pose}' reference is indistinguishable from straight"
                )));
            }
            thresholds.insert(
                pose,
                PoseThreshold {
                    axis,
                    side: Side::of(delta),
                    threshold: delta.abs() / 2.0 * sensitivity,
                },
            );
        }

        for (pose, t) in &thresholds {
            let opposite = pose.opposite().and_then(|o| thresholds.get(&o));
            if let Some(o) = opposite {
                if o.side == t.side {
                    return Err(GazeError::DegenerateCalibration(format!(
                        "'{pose}' and its opposite lie on the same side of straight"
                    )));
                }
            }
        }

        Ok(Self {
            epoch,
            created_at,
            sensitivity,
            references,
            thresholds,
        })
    }

    /// Same references, thresholds re-derived for another sensitivity
    pub fn with_sensitivity(&self, sensitivity: f64) -> Result<Self, GazeError> {
        Self::from_references(self.references.clone(), sensitivity, self.epoch, self.created_at)
    }

    /// Same profile tagged with a different epoch
    pub fn with_epoch(&self, epoch: u64) -> Self {
        Self {
            epoch,
            ..self.clone()
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    pub fn straight(&self) -> &FeatureVector {
        // Presence is checked in `from_references`, the only constructor
        &self.references[&Direction::Straight]
    }

    pub fn reference(&self, pose: Direction) -> Option<&FeatureVector> {
        self.references.get(&pose)
    }

    pub fn threshold(&self, pose: Direction) -> Option<&PoseThreshold> {
        self.thresholds.get(&pose)
    }

    /// Calibrated poses on one axis
    pub fn thresholds_on(&self, axis: Axis) -> impl Iterator<Item = (Direction, &PoseThreshold)> + '_ {
        self.thresholds
            .iter()
            .filter(move |(_, t)| t.axis == axis)
            .map(|(pose, t)| (*pose, t))
    }

    pub fn poses(&self) -> impl Iterator<Item = Direction> + '_ {
        self.references.keys().copied()
    }

    /// Load a profile from JSON; thresholds are re-derived and verified
    pub fn from_json(json: &str) -> Result<Self, GazeError> {
        serde_json::from_str(json).map_err(GazeError::JsonError)
    }

    pub fn to_json(&self) -> Result<String, GazeError> {
        serde_json::to_string(self).map_err(GazeError::JsonError)
    }
}

/// Persisted form of a profile. Stored thresholds are ignored and
/// re-derived so a hand-edited file cannot desynchronize them.
#[derive(Deserialize)]
struct StoredProfile {
    epoch: u64,
    created_at: DateTime<Utc>,
    sensitivity: f64,
    references: BTreeMap<Direction, FeatureVector>,
}

impl TryFrom<StoredProfile> for CalibrationProfile {
    type Error = GazeError;

    fn try_from(stored: StoredProfile) -> Result<Self, Self::Error> {
        CalibrationProfile::from_references(
            stored.references,
            stored.sensitivity,
            stored.epoch,
            stored.created_at,
        )
    }
}

/// Result of feeding one frame to a calibration run
#[derive(Debug)]
pub enum CalibrationStep {
    /// Still collecting samples for `pose`
    Collecting {
        pose: Direction,
        collected: usize,
        required: usize,
    },
    /// `pose` captured; the run moved on to `next`
    PoseCompleted { pose: Direction, next: Direction },
    /// A non-straight pose ran out of time; waiting for retake or abort
    RetakeRequired {
        pose: Direction,
        collected: usize,
        required: usize,
    },
    /// All poses captured and verified
    Finished(CalibrationProfile),
    /// Calibration cannot complete; no profile was produced
    Failed(GazeError),
}

/// Snapshot of a run's position, for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalibrationProgress {
    pub pose: Direction,
    pub pose_index: usize,
    pub total_poses: usize,
    pub collected: usize,
    pub required: usize,
    pub awaiting_retake: bool,
}

/// Interactive calibration sequence in progress
#[derive(Debug, Clone)]
pub struct CalibrationRun {
    sequence: Vec<Direction>,
    index: usize,
    samples: Vec<FeatureVector>,
    pose_started_at: Option<DateTime<Utc>>,
    references: BTreeMap<Direction, FeatureVector>,
    awaiting_retake: bool,
    samples_per_pose: usize,
    time_budget: Duration,
    sensitivity: f64,
    epoch: u64,
}

impl CalibrationRun {
    /// Start a run over `sequence`, which must contain straight exactly once
    /// and no duplicates or `unknown`.
    pub fn new(sequence: &[Direction], config: &GazeConfig, epoch: u64) -> Result<Self, GazeError> {
        config.validate()?;
        validate_sequence(sequence)?;
        let budget_ms = i64::try_from(config.pose_time_budget_ms).map_err(|_| {
            GazeError::InvalidConfiguration("pose_time_budget_ms is too large".to_string())
        })?;

        info!(sequence = ?sequence, epoch, "calibration started");
        Ok(Self {
            sequence: sequence.to_vec(),
            index: 0,
            samples: Vec::with_capacity(config.samples_per_pose),
            pose_started_at: None,
            references: BTreeMap::new(),
            awaiting_retake: false,
            samples_per_pose: config.samples_per_pose,
            time_budget: Duration::milliseconds(budget_ms),
            sensitivity: config.sensitivity,
            epoch,
        })
    }

    /// Pose currently being captured
    pub fn current_pose(&self) -> Direction {
        self.sequence[self.index]
    }

    pub fn progress(&self) -> CalibrationProgress {
        CalibrationProgress {
            pose: self.current_pose(),
            pose_index: self.index,
            total_poses: self.sequence.len(),
            collected: self.samples.len(),
            required: self.samples_per_pose,
            awaiting_retake: self.awaiting_retake,
        }
    }

    /// Feed one reduced frame. Blink and no-signal frames are skipped but
    /// still advance the pose clock.
    pub fn feed(&mut self, signal: &FrameSignal, timestamp: DateTime<Utc>) -> CalibrationStep {
        let pose = self.current_pose();
        if self.awaiting_retake {
            return CalibrationStep::RetakeRequired {
                pose,
                collected: self.samples.len(),
                required: self.samples_per_pose,
            };
        }

        let started = *self.pose_started_at.get_or_insert(timestamp);
        if timestamp - started > self.time_budget {
            return self.pose_timed_out(pose);
        }

        match signal.features() {
            Some(fv) => self.samples.push(*fv),
            None => {
                debug!(pose = %pose, reason = ?signal.no_signal_reason(), "calibration frame skipped");
            }
        }

        if self.samples.len() < self.samples_per_pose {
            return CalibrationStep::Collecting {
                pose,
                collected: self.samples.len(),
                required: self.samples_per_pose,
            };
        }

        self.complete_pose(pose, timestamp)
    }

    /// Restart collection of the pose that ran out of time
    pub fn retake_pose(&mut self) -> Result<Direction, GazeError> {
        if !self.awaiting_retake {
            return Err(GazeError::NoRetakePending);
        }
        self.awaiting_retake = false;
        self.samples.clear();
        self.pose_started_at = None;
        info!(pose = %self.current_pose(), "calibration pose retake");
        Ok(self.current_pose())
    }

    fn pose_timed_out(&mut self, pose: Direction) -> CalibrationStep {
        let collected = self.samples.len();
        let required = self.samples_per_pose;
        warn!(pose = %pose, collected, required, "calibration pose ran out of time");

        if pose == Direction::Straight {
            return CalibrationStep::Failed(GazeError::CalibrationInsufficientData {
                pose,
                collected,
                required,
            });
        }
        self.awaiting_retake = true;
        CalibrationStep::RetakeRequired {
            pose,
            collected,
            required,
        }
    }

    fn complete_pose(&mut self, pose: Direction, timestamp: DateTime<Utc>) -> CalibrationStep {
        let reference = match FeatureVector::mean(&self.samples) {
            Some(reference) => reference,
            None => {
                return CalibrationStep::Failed(GazeError::CalibrationInsufficientData {
                    pose,
                    collected: 0,
                    required: self.samples_per_pose,
                })
            }
        };
        info!(pose = %pose, samples = self.samples.len(), "calibration pose captured");
        self.references.insert(pose, reference);
        self.samples.clear();
        self.pose_started_at = None;

        if self.index + 1 < self.sequence.len() {
            self.index += 1;
            return CalibrationStep::PoseCompleted {
                pose,
                next: self.current_pose(),
            };
        }

        match CalibrationProfile::from_references(
            self.references.clone(),
            self.sensitivity,
            self.epoch,
            timestamp,
        ) {
            Ok(profile) => CalibrationStep::Finished(profile),
            Err(e) => {
                warn!(error = %e, "calibration verification failed");
                CalibrationStep::Failed(e)
            }
        }
    }
}

/// Check a pose sequence: non-empty, straight exactly once, no duplicates
/// and no `unknown`
pub fn validate_sequence(sequence: &[Direction]) -> Result<(), GazeError> {
    if sequence.is_empty() {
        return Err(GazeError::InvalidCalibrationSequence(
            "sequence is empty".to_string(),
        ));
    }
    if sequence.contains(&Direction::Unknown) {
        return Err(GazeError::InvalidCalibrationSequence(
            "'unknown' is not a pose".to_string(),
        ));
    }
    let mut seen = BTreeSet::new();
    for pose in sequence {
        if !seen.insert(*pose) {
            return Err(GazeError::InvalidCalibrationSequence(format!(
                "pose '{pose}' appears more than once"
            )));
        }
    }
    if !seen.contains(&Direction::Straight) {
        return Err(GazeError::InvalidCalibrationSequence(
            "sequence must include 'straight'".to_string(),
        ));
    }
    Ok(())
}
