//! Audio frame types and the capture-ingress message codec.
//!
//! The capture layer delivers fixed-duration PCM frames (20 ms @ 16 kHz
//! mono, 16-bit little-endian, 640 bytes) interleaved with out-of-band
//! JSON messages: `{"action":"stop"}` ends the dialogue session, and
//! `{"silence_ms":<n>}` reports client-side contiguous silence for clients
//! that run their own VAD.

use crate::config::AudioConfig;
use crate::error::{DialogueError, Result};
use serde::Deserialize;
use std::time::Instant;

/// Voice-activity verdict attached to a frame.
///
/// `Unknown` frames are resolved by the frame classifier's energy fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameClass {
    Voice,
    Silence,
    #[default]
    Unknown,
}

/// A fixed-duration block of PCM samples from the capture layer.
///
/// Immutable once produced; lives until consumed by the classifier,
/// pre-roll ring, or recognition session.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono samples, 16-bit signed, at the configured sample rate.
    pub samples: Vec<i16>,
    /// Monotonic capture timestamp.
    pub captured_at: Instant,
    /// Voice-activity verdict supplied by the capture layer, if any.
    pub classification: FrameClass,
}

impl AudioFrame {
    /// Decode one frame from little-endian PCM bytes.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the payload is not exactly
    /// `expected_samples` 16-bit samples.
    pub fn from_pcm_bytes(bytes: &[u8], expected_samples: usize) -> Result<Self> {
        if bytes.len() != expected_samples * 2 {
            return Err(DialogueError::Protocol(format!(
                "frame payload is {} bytes, expected {}",
                bytes.len(),
                expected_samples * 2
            )));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self {
            samples,
            captured_at: Instant::now(),
            classification: FrameClass::Unknown,
        })
    }

    /// Re-encode the samples as little-endian PCM bytes (recognizer wire
    /// format).
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

/// One message from the capture ingress.
#[derive(Debug, Clone)]
pub enum CaptureMessage {
    /// A PCM audio frame.
    Frame(AudioFrame),
    /// `{"action":"stop"}`: the client asked to end the session.
    Stop,
    /// `{"silence_ms":n}`: client-side VAD reports contiguous silence.
    ClientSilence { silence_ms: u32 },
}

#[derive(Deserialize)]
struct OobMessage {
    action: Option<String>,
    silence_ms: Option<u32>,
}

/// Decode one capture-ingress message.
///
/// A payload of exactly one frame's worth of bytes is PCM; anything else
/// must parse as one of the out-of-band JSON objects.
///
/// # Errors
///
/// Returns a protocol error for unparseable payloads or unknown actions.
pub fn decode_capture_message(payload: &[u8], audio: &AudioConfig) -> Result<CaptureMessage> {
    if payload.len() == audio.frame_bytes() {
        return Ok(CaptureMessage::Frame(AudioFrame::from_pcm_bytes(
            payload,
            audio.frame_samples(),
        )?));
    }

    let oob: OobMessage = serde_json::from_slice(payload)
        .map_err(|e| DialogueError::Protocol(format!("unparseable capture message: {e}")))?;

    if let Some(action) = oob.action {
        return match action.as_str() {
            "stop" => Ok(CaptureMessage::Stop),
            other => Err(DialogueError::Protocol(format!(
                "unknown capture action: {other:?}"
            ))),
        };
    }
    if let Some(silence_ms) = oob.silence_ms {
        return Ok(CaptureMessage::ClientSilence { silence_ms });
    }
    Err(DialogueError::Protocol(
        "capture message carries neither action nor silence_ms".into(),
    ))
}
