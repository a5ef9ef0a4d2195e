//! Mock frame source for unit and integration testing.
//!
//! Frames injected with [`MockFrameSource::inject_frame`] are returned by
//! `current_frame` in order; once the queue is empty the last frame is
//! repeated if [`MockFrameSource::repeat_last`] is on, otherwise `None`.
//! Clones share state, so a test can keep one handle after giving the other
//! to the capture adapter.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use framelink_core::PixelFormat;

use super::{CaptureError, FrameSource, RawFrame};

#[derive(Default)]
struct State {
    queue: VecDeque<RawFrame>,
    last: Option<RawFrame>,
    repeat_last: bool,
    fail_next: Option<String>,
    resizes: Vec<(u32, u32)>,
    pulls: usize,
}

#[derive(Clone, Default)]
pub struct MockFrameSource {
    state: Arc<Mutex<State>>,
}

impl MockFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source that returns the same solid RGB frame on every pull.
    pub fn solid(width: u32, height: u32) -> Self {
        let source = Self::new();
        source.inject_frame(RawFrame {
            width,
            height,
            format: PixelFormat::Rgb8,
            data: vec![0x80; width as usize * height as usize * 3],
        });
        source.repeat_last(true);
        source
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn inject_frame(&self, frame: RawFrame) {
        self.state().queue.push_back(frame);
    }

    pub fn repeat_last(&self, on: bool) {
        self.state().repeat_last = on;
    }

    /// Makes the next pull fail with [`CaptureError::Unavailable`].
    pub fn fail_next(&self, reason: &str) {
        self.state().fail_next = Some(reason.to_string());
    }

    /// Every `resize` call received, oldest first.
    pub fn resizes(&self) -> Vec<(u32, u32)> {
        self.state().resizes.clone()
    }

    /// Number of `current_frame` calls.
    pub fn pulls(&self) -> usize {
        self.state().pulls
    }
}

impl FrameSource for MockFrameSource {
    fn current_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        let mut state = self.state();
        state.pulls += 1;
        if let Some(reason) = state.fail_next.take() {
            return Err(CaptureError::Unavailable(reason));
        }
        if let Some(frame) = state.queue.pop_front() {
            state.last = Some(frame.clone());
            return Ok(Some(frame));
        }
        Ok(if state.repeat_last {
            state.last.clone()
        } else {
            None
        })
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), CaptureError> {
        self.state().resizes.push((width, height));
        Ok(())
    }
}
