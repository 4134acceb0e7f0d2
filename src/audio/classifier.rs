//! Frame classification: Voice/Silence tagging plus the running
//! contiguous-silence counter.
//!
//! The voice-activity decision itself is externally supplied: either the
//! capture layer tags each frame, or the client reports silence via the
//! ingress. Frames that arrive untagged fall back to RMS energy
//! thresholding.

use crate::audio::frame::{AudioFrame, FrameClass};
use crate::config::AudioConfig;
use crate::pipeline::messages::FrameClassification;

/// Stateful per-session frame classifier.
pub struct FrameClassifier {
    frame_ms: u32,
    energy_threshold: f32,
    contiguous_silence_ms: u32,
}

impl FrameClassifier {
    /// Create a classifier for the configured frame shape.
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            frame_ms: config.frame_ms,
            energy_threshold: config.energy_threshold,
            contiguous_silence_ms: 0,
        }
    }

    /// Classify one frame and update the silence counter.
    pub fn classify(&mut self, frame: &AudioFrame) -> FrameClassification {
        let is_voice = match frame.classification {
            FrameClass::Voice => true,
            FrameClass::Silence => false,
            FrameClass::Unknown => rms_energy(&frame.samples) > self.energy_threshold,
        };

        if is_voice {
            self.contiguous_silence_ms = 0;
        } else {
            self.contiguous_silence_ms = self.contiguous_silence_ms.saturating_add(self.frame_ms);
        }

        FrameClassification {
            is_voice,
            contiguous_silence_ms: self.contiguous_silence_ms,
        }
    }

    /// Adopt a client-side VAD silence report (`{"silence_ms":n}`).
    pub fn note_client_silence(&mut self, silence_ms: u32) {
        self.contiguous_silence_ms = silence_ms;
    }

    /// Reset at a session boundary.
    pub fn reset(&mut self) {
        self.contiguous_silence_ms = 0;
    }
}

/// RMS energy of 16-bit samples, normalised to \[0, 1\].
pub fn rms_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples
        .iter()
        .map(|&s| {
            let normalised = f32::from(s) / f32::from(i16::MAX);
            normalised * normalised
        })
        .sum();
    (sum_sq / samples.len() as f32).sqrt()
}
