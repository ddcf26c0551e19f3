// Pre-roll buffer for decoded frames
// Keeps the most recent frames so a recording can start before the motion that triggered it

use std::collections::VecDeque;

use crate::video::DecodedFrame;

/// Fixed-capacity ring of recent decoded frames, oldest evicted first
pub struct FramePrerollBuffer {
    frames: VecDeque<DecodedFrame>,
    capacity: usize,
}

impl FramePrerollBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: DecodedFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Buffered frames, oldest first
    pub fn snapshot(&self) -> Vec<DecodedFrame> {
        self.frames.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
