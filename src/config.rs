//! Configuration types for the dialogue engine.
//!
//! All scalars have documented defaults and can be overridden by the
//! embedder before engine construction. Credentials have no defaults.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the dialogue engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// Audio frame shape and classifier settings.
    pub audio: AudioConfig,
    /// Turn state machine thresholds.
    pub turn: TurnConfig,
    /// Recognition session manager settings.
    pub recognizer: RecognizerConfig,
    /// Sentence aggregation settings.
    pub sentence: SentenceConfig,
    /// Reply orchestration settings.
    pub reply: ReplyConfig,
    /// Event bus settings.
    pub bus: BusConfig,
    /// Log verbosity (maps to the default tracing filter directive).
    pub log: LogConfig,
}

/// Audio frame shape and frame classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Frame duration in milliseconds.
    pub frame_ms: u32,
    /// RMS energy threshold used when a frame arrives without a VAD verdict.
    ///
    /// Computed over samples normalised to \[-1, 1\]. Typical values:
    ///   - 0.005: very sensitive (picks up quiet speech and some noise)
    ///   - 0.01:  normal sensitivity (default)
    ///   - 0.02:  reduced sensitivity (noisy environments)
    pub energy_threshold: f32,
    /// Seconds of dead capture audio before the mic watchdog warns.
    pub mic_watchdog_secs: u64,
}

impl AudioConfig {
    /// Samples per frame at the configured rate and duration.
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }

    /// Bytes per frame (16-bit little-endian PCM).
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * 2
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_ms: 20,
            energy_threshold: 0.01,
            mic_watchdog_secs: 5,
        }
    }
}

/// Turn state machine thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Voice frames retained before a recognition session starts.
    pub pre_roll_frames: usize,
    /// Contiguous silence frames needed to leave `Speaking` for `Waiting`.
    pub max_silence_frames: u32,
    /// Max wait in the transition buffer for a non-empty partial, in ms.
    pub transition_buffer_timeout_ms: u64,
    /// Voice frames required before the transition buffer can promote to
    /// `Speaking`.
    pub min_voice_frames_to_speak: u32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            pre_roll_frames: 10,
            max_silence_frames: 25,
            transition_buffer_timeout_ms: 500,
            min_voice_frames_to_speak: 3,
        }
    }
}

/// Recognition session manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Upstream endpoint for the recognizer vendor.
    pub endpoint: String,
    /// Vendor credential. No default; required by real adapters.
    pub api_key: Option<String>,
    /// Bound on `start_session`, in ms.
    pub session_start_timeout_ms: u64,
    /// How long `end_session` waits for a late final, in ms.
    pub final_drain_timeout_ms: u64,
    /// Reconnect attempts after a transient upstream error.
    pub max_reconnects: u32,
    /// First reconnect backoff in ms; doubles per attempt.
    pub reconnect_backoff_ms: u64,
    /// Frames buffered while reconnecting. Overflow fails the session.
    pub reconnect_buffer_frames: usize,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://localhost:2700/stt".to_owned(),
            api_key: None,
            session_start_timeout_ms: 3_000,
            final_drain_timeout_ms: 1_000,
            max_reconnects: 2,
            reconnect_backoff_ms: 200,
            reconnect_buffer_frames: 100,
        }
    }
}

/// Sentence aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentenceConfig {
    /// Two finals arriving within this window (with no intervening partial
    /// of new content) are merged into one sentence.
    pub merge_window_ms: u64,
}

impl Default for SentenceConfig {
    fn default() -> Self {
        Self {
            merge_window_ms: 200,
        }
    }
}

/// Reply orchestration settings (LLM + TTS pipeline).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    /// LLM endpoint.
    pub llm_endpoint: String,
    /// LLM credential. No default; required by real adapters.
    pub llm_api_key: Option<String>,
    /// TTS endpoint.
    pub tts_endpoint: String,
    /// TTS credential. No default; required by real adapters.
    pub tts_api_key: Option<String>,
    /// How often the orchestrator polls for completed sentences, in ms.
    pub monitor_interval_ms: u64,
    /// Bound on one LLM generation, in ms.
    pub llm_timeout_ms: u64,
    /// Bound on one TTS synthesis request, in ms.
    pub tts_timeout_ms: u64,
    /// Bound on a single TTS chunk read, in ms.
    pub tts_chunk_timeout_ms: u64,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            llm_endpoint: "http://localhost:8080/v1".to_owned(),
            llm_api_key: None,
            tts_endpoint: "http://localhost:8880/tts".to_owned(),
            tts_api_key: None,
            monitor_interval_ms: 100,
            llm_timeout_ms: 15_000,
            tts_timeout_ms: 10_000,
            tts_chunk_timeout_ms: 5_000,
        }
    }
}

/// Event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bounded per-subscriber queue depth. Overflow drops the oldest events
    /// and surfaces a `SubscriberLagged` event.
    pub subscriber_queue_depth: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_depth: 1024,
        }
    }
}

/// Log verbosity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default tracing directive when `RUST_LOG` is unset
    /// (`error`, `warn`, `info`, `debug`, `trace`).
    pub verbosity: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbosity: "info".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn frame_shape_defaults() {
        let audio = AudioConfig::default();
        assert_eq!(audio.frame_samples(), 320);
        assert_eq!(audio.frame_bytes(), 640);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = DialogueConfig::default();
        assert_eq!(config.turn.pre_roll_frames, 10);
        assert_eq!(config.turn.max_silence_frames, 25);
        assert_eq!(config.turn.transition_buffer_timeout_ms, 500);
        assert_eq!(config.turn.min_voice_frames_to_speak, 3);
        assert_eq!(config.recognizer.final_drain_timeout_ms, 1_000);
        assert_eq!(config.recognizer.max_reconnects, 2);
        assert_eq!(config.sentence.merge_window_ms, 200);
        assert_eq!(config.reply.monitor_interval_ms, 100);
        assert_eq!(config.bus.subscriber_queue_depth, 1024);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: DialogueConfig =
            serde_json::from_str(r#"{"turn":{"max_silence_frames":40}}"#).unwrap();
        assert_eq!(config.turn.max_silence_frames, 40);
        assert_eq!(config.turn.pre_roll_frames, 10);
        assert_eq!(config.audio.sample_rate, 16_000);
    }

    #[test]
    fn credentials_have_no_default() {
        let config = DialogueConfig::default();
        assert!(config.recognizer.api_key.is_none());
        assert!(config.reply.llm_api_key.is_none());
        assert!(config.reply.tts_api_key.is_none());
    }
}
