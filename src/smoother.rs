//! Temporal smoothing
//!
//! A debounce state machine over raw per-frame labels. A new label is only
//! reported after it has been seen on `debounce_threshold` consecutive
//! signal frames. `unknown` frames neither confirm nor break a pending
//! change, but a long enough run of them forces the reported label to
//! `unknown`.

use crate::config::GazeConfig;
use crate::types::{Direction, SmoothedState};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    debounce_threshold: u32,
    absence_grace_frames: u32,
    state: SmoothedState,
}

impl Default for TemporalSmoother {
    fn default() -> Self {
        Self::from_config(&GazeConfig::default())
    }
}

impl TemporalSmoother {
    /// A debounce threshold of 0 behaves like 1.
    pub fn new(debounce_threshold: u32, absence_grace_frames: u32) -> Self {
        Self {
            debounce_threshold: debounce_threshold.max(1),
            absence_grace_frames,
            state: SmoothedState::default(),
        }
    }

    pub fn from_config(config: &GazeConfig) -> Self {
        Self::new(config.debounce_threshold, config.absence_grace_frames)
    }

    pub fn state(&self) -> &SmoothedState {
        &self.state
    }

    pub fn current_label(&self) -> Direction {
        self.state.current_label
    }

    /// Back to the initial `unknown` state
    pub fn reset(&mut self) {
        self.state = SmoothedState::default();
    }

    /// Feed one raw label and return the smoothed label
    pub fn update(&mut self, raw: Direction) -> Direction {
        let state = &mut self.state;
        state.frames_in_state = state.frames_in_state.saturating_add(1);

        if raw.is_unknown() {
            state.absent_frames = state.absent_frames.saturating_add(1);
            if state.absent_frames > self.absence_grace_frames {
                if !state.current_label.is_unknown() {
                    debug!(
                        from = %state.current_label,
                        absent_frames = state.absent_frames,
                        "smoothed label forced to unknown"
                    );
                    state.current_label = Direction::Unknown;
                    state.frames_in_state = 1;
                }
                state.pending_label = None;
                state.pending_count = 0;
            }
            return state.current_label;
        }

        state.absent_frames = 0;

        if raw == state.current_label {
            state.pending_label = None;
            state.pending_count = 0;
            return state.current_label;
        }

        if state.pending_label == Some(raw) {
            state.pending_count += 1;
        } else {
            state.pending_label = Some(raw);
            state.pending_count = 1;
        }

        if state.pending_count >= self.debounce_threshold {
            debug!(from = %state.current_label, to = %raw, "smoothed label changed");
            state.current_label = raw;
            state.frames_in_state = 1;
            state.pending_label = None;
            state.pending_count = 0;
        }
        state.current_label
    }
}
