//! Error types for Synheart Gaze

use crate::types::Direction;
use thiserror::Error;

/// Errors surfaced to callers of the gaze pipeline.
///
/// Transient per-frame conditions (blinks, a face leaving the frame) are not
/// errors; they flow through the pipeline as `unknown` labels.
#[derive(Debug, Error)]
pub enum GazeError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Calibration failed for pose '{pose}': collected {collected} of {required} valid samples")]
    CalibrationInsufficientData {
        pose: Direction,
        collected: usize,
        required: usize,
    },

    #[error("Degenerate calibration: {0}")]
    DegenerateCalibration(String),

    #[error("Invalid calibration sequence: {0}")]
    InvalidCalibrationSequence(String),

    #[error("A calibration is already in progress")]
    CalibrationInProgress,

    #[error("No calibration is in progress")]
    NoCalibrationInProgress,

    #[error("No calibration pose is awaiting a retake")]
    NoRetakePending,

    #[error("No active calibration profile")]
    NoActiveProfile,

    #[error("Invalid landmark frame: {0}")]
    InvalidLandmarkFrame(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}
