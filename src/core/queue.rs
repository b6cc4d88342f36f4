//! Bounded outbound queue
//!
//! Holds frames submitted while the socket is not open. Fixed capacity,
//! oldest entry overwritten once full, drained front to back.

use std::collections::VecDeque;

use super::message::OutboundMessage;

/// FIFO ring of pending outbound frames
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    buffer: VecDeque<OutboundMessage>,
    capacity: usize,
}

impl OutboundQueue {
    /// Create queue holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a frame, returning the evicted oldest frame when full
    ///
    /// A zero-capacity queue retains nothing and hands the frame straight
    /// back.
    pub fn push(&mut self, msg: OutboundMessage) -> Option<OutboundMessage> {
        if self.capacity == 0 {
            return Some(msg);
        }
        let evicted = if self.buffer.len() >= self.capacity {
            self.buffer.pop_front()
        } else {
            None
        };
        self.buffer.push_back(msg);
        evicted
    }

    /// Remove every frame in submission order
    pub fn drain(&mut self) -> impl Iterator<Item = OutboundMessage> + '_ {
        self.buffer.drain(..)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
