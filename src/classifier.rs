//! Direction classification
//!
//! A pure function over a feature vector and the active calibration profile.
//! Each axis is tested against the threshold of the calibrated pose on the
//! side the deviation points to. When both axes exceed their thresholds, the
//! axis with the larger normalized excess wins, which keeps diagonal glances
//! from producing a label that alternates between the two axes.

use crate::calibration::CalibrationProfile;
use crate::types::{Axis, Classification, Direction, FeatureVector, FrameSignal};
use chrono::{DateTime, Utc};

/// A pose whose threshold was exceeded on one axis
#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisVerdict {
    pose: Direction,
    /// `(|deviation| - threshold) / threshold`, strictly positive
    excess: f64,
}

/// Classify one reduced frame.
///
/// No-signal frames and a missing profile yield `unknown` with zero
/// confidence; neither is an error.
pub fn classify(
    signal: &FrameSignal,
    profile: Option<&CalibrationProfile>,
    timestamp: DateTime<Utc>,
) -> Classification {
    let epoch = profile.map(CalibrationProfile::epoch);
    match (signal.features(), profile) {
        (Some(features), Some(profile)) => classify_features(features, profile, timestamp),
        _ => Classification::unknown(timestamp, epoch),
    }
}

/// Classify a feature vector against a profile
pub fn classify_features(
    features: &FeatureVector,
    profile: &CalibrationProfile,
    timestamp: DateTime<Utc>,
) -> Classification {
    let horizontal = axis_verdict(features, profile, Axis::Horizontal);
    let vertical = axis_verdict(features, profile, Axis::Vertical);

    let winner = match (horizontal, vertical) {
        (Some(h), Some(v)) if h.excess > v.excess => Some(h),
        (Some(h), None) => Some(h),
        (_, Some(v)) => Some(v),
        (None, None) => None,
    };

    let (label, confidence) = match winner {
        Some(verdict) => (verdict.pose, verdict.excess.clamp(0.0, 1.0)),
        None => (Direction::Straight, 0.0),
    };

    Classification {
        label,
        confidence,
        timestamp,
        profile_epoch: Some(profile.epoch()),
    }
}

fn axis_verdict(
    features: &FeatureVector,
    profile: &CalibrationProfile,
    axis: Axis,
) -> Option<AxisVerdict> {
    let deviation = features.axis_value(axis) - profile.straight().axis_value(axis);
    let (pose, threshold) = profile
        .thresholds_on(axis)
        .find(|(_, t)| t.side.contains(deviation))?;

    // Ties resolve to straight: the deviation must exceed the threshold
    if deviation.abs() <= threshold.threshold {
        return None;
    }
    Some(AxisVerdict {
        pose,
        excess: (deviation.abs() - threshold.threshold) / threshold.threshold,
    })
}
