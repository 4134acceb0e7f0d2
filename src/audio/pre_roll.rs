//! Pre-roll ring: the most recent voice frames, kept so a freshly started
//! recognition session sees the speech that preceded it.

use crate::audio::frame::AudioFrame;
use std::collections::VecDeque;

/// Bounded FIFO of the last K voice frames.
///
/// Written on every voice frame regardless of turn phase; silence frames
/// are never buffered. Session start takes a snapshot, not a reference,
/// so the ring keeps rolling for the next pre-roll.
pub struct PreRollRing {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
}

impl PreRollRing {
    /// Create a ring holding up to `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a voice frame, evicting the oldest when full.
    pub fn push(&mut self, frame: AudioFrame) {
        if self.capacity == 0 {
            return;
        }
        if self.frames.len() == self.capacity {
            let _ = self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Snapshot the buffered frames in capture order.
    pub fn snapshot(&self) -> Vec<AudioFrame> {
        self.frames.iter().cloned().collect()
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::FrameClass;
    use std::time::Instant;

    fn frame(marker: i16) -> AudioFrame {
        AudioFrame {
            samples: vec![marker; 4],
            captured_at: Instant::now(),
            classification: FrameClass::Voice,
        }
    }

    #[test]
    fn keeps_newest_frames_in_capture_order() {
        let mut ring = PreRollRing::new(3);
        for marker in 0..5 {
            ring.push(frame(marker));
        }
        let markers: Vec<i16> = ring.snapshot().iter().map(|f| f.samples[0]).collect();
        assert_eq!(markers, vec![2, 3, 4]);
    }

    #[test]
    fn snapshot_does_not_drain() {
        let mut ring = PreRollRing::new(2);
        ring.push(frame(1));
        assert_eq!(ring.snapshot().len(), 1);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn zero_capacity_buffers_nothing() {
        let mut ring = PreRollRing::new(0);
        ring.push(frame(1));
        assert!(ring.is_empty());
    }
}
