use std::collections::VecDeque;

use morsel_types::GatewayCommand;

/// Frames waiting for the socket to open. FIFO, bounded, drop-oldest.
#[derive(Debug)]
pub struct OutboundQueue {
    frames: VecDeque<GatewayCommand>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a frame. Returns the frame evicted to make room, if any.
    pub fn push(&mut self, frame: GatewayCommand) -> Option<GatewayCommand> {
        let evicted = if self.frames.len() >= self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    /// Put back a frame that could not be written, keeping it first in line.
    pub fn requeue(&mut self, frame: GatewayCommand) {
        self.frames.push_front(frame);
        self.frames.truncate(self.capacity);
    }

    pub fn pop(&mut self) -> Option<GatewayCommand> {
        self.frames.pop_front()
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

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
