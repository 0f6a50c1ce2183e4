//! Frame handoff between acquisition and processing
//!
//! [`LatestFrameSlot`] holds at most one frame. Publishing over an unconsumed
//! frame replaces it and counts the old one as dropped, so a slow consumer
//! always sees the freshest frame and never builds a backlog.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug)]
struct SlotState<T> {
    frame: Option<T>,
    published: u64,
    dropped: u64,
    closed: bool,
}

/// Single-slot, latest-frame-wins handoff. Share it through an `Arc`.
#[derive(Debug)]
pub struct LatestFrameSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Default for LatestFrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestFrameSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                frame: None,
                published: 0,
                dropped: 0,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Store `frame`, replacing any frame not yet taken.
    ///
    /// Returns `true` when an older frame was dropped. Frames published
    /// after [`close`](Self::close) are discarded.
    pub fn publish(&self, frame: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.published += 1;
        let replaced = state.frame.replace(frame).is_some();
        if replaced {
            state.dropped += 1;
            trace!(dropped = state.dropped, "unconsumed frame replaced");
        }
        drop(state);
        self.ready.notify_one();
        replaced
    }

    /// Take the pending frame without waiting
    pub fn take(&self) -> Option<T> {
        self.state.lock().frame.take()
    }

    /// Wait up to `timeout` for a frame. Returns `None` on timeout, or once
    /// the slot is closed and drained.
    pub fn wait_take(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(frame) = state.frame.take() {
                return Some(frame);
            }
            if state.closed {
                return None;
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return state.frame.take();
            }
        }
    }

    /// Stop accepting frames and wake every waiter
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn published_frames(&self) -> u64 {
        self.state.lock().published
    }

    pub fn dropped_frames(&self) -> u64 {
        self.state.lock().dropped
    }
}
