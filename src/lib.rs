//! Synheart Gaze - On-device gaze and head direction classification
//!
//! Gaze turns per-frame facial landmark geometry into a stable direction
//! label through a deterministic pipeline: feature reduction → calibration
//! profile → direction classification → temporal smoothing → session log.
//!
//! ## Modules
//!
//! - **Session**: [`GazeSession`] runs frames through every stage and owns
//!   calibration control
//! - **Replay**: [`schema`] drives a session from NDJSON input events
//! - **Export**: [`SessionExporter`] packages the session log for analysis

pub mod calibration;
pub mod classifier;
pub mod config;
pub mod encoder;
pub mod error;
pub mod features;
pub mod handoff;
pub mod landmarks;
pub mod pipeline;
pub mod recorder;
pub mod schema;
pub mod smoother;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use calibration::{CalibrationProfile, CalibrationProgress, CalibrationRun, CalibrationStep};
pub use classifier::classify;
pub use config::GazeConfig;
pub use encoder::{SessionExport, SessionExporter};
pub use error::GazeError;
pub use features::FeatureReducer;
pub use handoff::LatestFrameSlot;
pub use landmarks::{LandmarkExtractor, LandmarkLayout};
pub use pipeline::{CalibrationEvent, FrameOutcome, GazeSession};
pub use recorder::{LookingAwayEpisode, RecorderHandle, SessionRecorder, SessionSummary};
pub use smoother::TemporalSmoother;
pub use types::{Classification, Direction, FeatureVector, FrameSignal, LandmarkFrame};

// Schema exports
pub use schema::{InputEvent, InputEventAdapter, SCHEMA_VERSION};

/// Gaze version embedded in all exports
pub const GAZE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for exports
pub const PRODUCER_NAME: &str = "synheart-gaze";
