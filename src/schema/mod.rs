//! gaze.input_event.v1 schema
//!
//! This module defines the replay input schema: landmark frames, pre-reduced
//! feature frames, and calibration control events, one per line.

mod input_event;
mod adapter;

pub use input_event::*;
pub use adapter::*;
