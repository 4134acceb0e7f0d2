//! Control channel: out-of-band commands and playback lifecycle.
//!
//! Wire format is line-oriented JSON with a case-sensitive `type` tag:
//! `{"type":"reset"}`, `{"type":"playback_started"}`,
//! `{"type":"playback_ended"}`, `{"type":"interrupt"}` inbound;
//! `{"type":"phase_changed","phase":"Speaking"}` and
//! `{"type":"interrupt"}` outbound.

use crate::error::{DialogueError, Result};
use crate::turn::TurnPhase;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Out-of-band control events.
///
/// `ForceEndSession` has no control-wire form; it is produced by the
/// capture ingress `{"action":"stop"}` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Force the turn machine to `Initial` and cancel any reply.
    ResetToInitial,
    /// As reset, plus the recognition session manager is torn down.
    ForceEndSession,
    /// The playback layer began playing reply audio.
    PlaybackStarted,
    /// The playback layer finished (or abandoned) reply audio.
    PlaybackEnded,
    /// An operator asked for the in-flight reply to be cancelled.
    InterruptRequested,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlWire {
    Reset,
    PlaybackStarted,
    PlaybackEnded,
    Interrupt,
    PhaseChanged { phase: String },
}

/// Decode one inbound control message.
///
/// # Errors
///
/// Returns a protocol error for unparseable payloads or message types
/// that are not valid inbound (`phase_changed` is outbound-only).
pub fn decode_control_message(payload: &[u8]) -> Result<ControlEvent> {
    let wire: ControlWire = serde_json::from_slice(payload)
        .map_err(|e| DialogueError::Protocol(format!("unparseable control message: {e}")))?;
    match wire {
        ControlWire::Reset => Ok(ControlEvent::ResetToInitial),
        ControlWire::PlaybackStarted => Ok(ControlEvent::PlaybackStarted),
        ControlWire::PlaybackEnded => Ok(ControlEvent::PlaybackEnded),
        ControlWire::Interrupt => Ok(ControlEvent::InterruptRequested),
        ControlWire::PhaseChanged { .. } => Err(DialogueError::Protocol(
            "phase_changed is an egress-only message".into(),
        )),
    }
}

/// Encode the outbound phase notification.
///
/// Callers pass the *visible* phase; the probationary transition buffer
/// must never appear on the wire.
pub fn encode_phase_changed(phase: TurnPhase) -> String {
    debug_assert!(phase != TurnPhase::TransitionBuffer);
    // Serialization of a tag + &str pair cannot fail.
    serde_json::to_string(&ControlWire::PhaseChanged {
        phase: phase.as_str().to_owned(),
    })
    .unwrap_or_default()
}

/// Encode the outbound interrupt notification (tells the playback layer
/// to drop buffered audio).
pub fn encode_interrupt() -> String {
    serde_json::to_string(&ControlWire::Interrupt).unwrap_or_default()
}

/// Playback status as reported by the playback layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Playing,
}

/// Playback lifecycle state, mutated only by the control channel.
#[derive(Debug, Default)]
pub struct PlaybackState {
    status: PlaybackStatus,
    started_at: Option<Instant>,
    last_chunk_at: Option<Instant>,
}

impl PlaybackState {
    /// Apply a playback lifecycle notification. Repeats are no-ops.
    /// Returns whether the status changed.
    pub fn apply(&mut self, event: ControlEvent, now: Instant) -> bool {
        match (self.status, event) {
            (PlaybackStatus::Idle, ControlEvent::PlaybackStarted) => {
                self.status = PlaybackStatus::Playing;
                self.started_at = Some(now);
                true
            }
            (PlaybackStatus::Playing, ControlEvent::PlaybackEnded) => {
                self.status = PlaybackStatus::Idle;
                true
            }
            _ => false,
        }
    }

    /// Record that a reply chunk reached the egress.
    pub fn note_chunk(&mut self, now: Instant) {
        self.last_chunk_at = Some(now);
    }

    /// Current status.
    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    /// When playback last started, if ever.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// When the last chunk was forwarded, if ever.
    pub fn last_chunk_at(&self) -> Option<Instant> {
        self.last_chunk_at
    }
}
