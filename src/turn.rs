//! Turn state machine: the sole authority on conversational phase.
//!
//! The machine is synchronous and runs to completion between events; each
//! handler consumes one input (frame classification, control event,
//! recognizer signal, or timer tick) and returns the effects the driver
//! must execute, in order. It never fails: errors elsewhere reach it as
//! control events and only ever change phase.

use crate::config::TurnConfig;
use crate::control::ControlEvent;
use crate::pipeline::messages::FrameClassification;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Conversational phase.
///
/// `TransitionBuffer` is probationary and hidden from external observers;
/// the control egress maps it through [`TurnMachine::visible_phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// No recognition session; nobody holds the floor.
    Initial,
    /// Audio arrived but the recognizer has not yet confirmed speech.
    TransitionBuffer,
    /// The user is actively speaking.
    Speaking,
    /// End of utterance suspected; the session stays open for late finals.
    Waiting,
    /// The agent is playing a reply.
    Listening,
}

impl TurnPhase {
    /// Wire name used on the control egress.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::TransitionBuffer => "TransitionBuffer",
            Self::Speaking => "Speaking",
            Self::Waiting => "Waiting",
            Self::Listening => "Listening",
        }
    }
}

/// An effect the driver must carry out after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEffect {
    /// Open a recognition session; the pre-roll snapshot is injected ahead
    /// of any live frame.
    StartSession,
    /// Re-inject the pre-roll snapshot into the already-open session
    /// (continuation after `Waiting`).
    InjectPreRoll,
    /// Forward the current frame to the open session.
    ForwardFrame,
    /// End the session gracefully, collecting a late final within the
    /// drain timeout.
    DrainSession,
    /// Tear the session down immediately, discarding anything pending.
    AbortSession,
    /// Announce a barge-in so the in-flight reply is cancelled.
    PublishInterrupt,
    /// Phase transition to publish.
    PhaseChanged { from: TurnPhase, to: TurnPhase },
}

/// Turn-taking state machine.
pub struct TurnMachine {
    config: TurnConfig,
    frame_ms: u32,
    phase: TurnPhase,
    /// Visible phase reported while inside the transition buffer.
    buffer_visible: TurnPhase,
    /// When the transition buffer was entered.
    buffer_entered_at: Option<Instant>,
    /// Voice frames observed since entering the transition buffer.
    buffer_voice_frames: u32,
    /// Whether a non-empty partial arrived since entering the buffer.
    buffer_has_partial: bool,
    /// Whether a recognition session is currently open.
    session_active: bool,
}

impl TurnMachine {
    /// Create a machine in `Initial` with the given thresholds.
    pub fn new(config: &TurnConfig, frame_ms: u32) -> Self {
        Self {
            config: config.clone(),
            frame_ms,
            phase: TurnPhase::Initial,
            buffer_visible: TurnPhase::Initial,
            buffer_entered_at: None,
            buffer_voice_frames: 0,
            buffer_has_partial: false,
            session_active: false,
        }
    }

    /// Current internal phase (may be `TransitionBuffer`).
    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Phase as external observers see it: `TransitionBuffer` reports the
    /// phase it was entered from.
    pub fn visible_phase(&self) -> TurnPhase {
        match self.phase {
            TurnPhase::TransitionBuffer => self.buffer_visible,
            other => other,
        }
    }

    /// Whether the machine believes a recognition session is open.
    pub fn session_active(&self) -> bool {
        self.session_active
    }

    /// Deadline at which the transition buffer gives up waiting for a
    /// non-empty partial, if one is armed.
    pub fn buffer_deadline(&self) -> Option<Instant> {
        if self.phase != TurnPhase::TransitionBuffer || self.buffer_has_partial {
            return None;
        }
        self.buffer_entered_at
            .map(|t| t + Duration::from_millis(self.config.transition_buffer_timeout_ms))
    }

    /// Handle one classified frame.
    pub fn on_frame(&mut self, class: FrameClassification, now: Instant) -> Vec<TurnEffect> {
        let mut effects = Vec::new();
        match self.phase {
            TurnPhase::Initial => {
                if class.is_voice {
                    self.enter_buffer(TurnPhase::Initial, now, &mut effects);
                    effects.push(TurnEffect::ForwardFrame);
                }
            }
            TurnPhase::TransitionBuffer => {
                if class.is_voice {
                    self.buffer_voice_frames = self.buffer_voice_frames.saturating_add(1);
                }
                effects.push(TurnEffect::ForwardFrame);
                if self.buffer_promotable() {
                    self.set_phase(TurnPhase::Speaking, &mut effects);
                } else if self.buffer_has_partial && self.silence_exceeded(class) {
                    // The recognizer confirmed speech but the user already
                    // stopped: the utterance was shorter than the promote
                    // threshold. Treat it as ended rather than stalling in
                    // the buffer.
                    self.set_phase(TurnPhase::Waiting, &mut effects);
                }
            }
            TurnPhase::Speaking => {
                effects.push(TurnEffect::ForwardFrame);
                if !class.is_voice && self.silence_exceeded(class) {
                    self.set_phase(TurnPhase::Waiting, &mut effects);
                }
            }
            TurnPhase::Waiting => {
                // Silence frames are reported upstream for observability
                // but not forwarded; a voice frame is a possible
                // continuation of the utterance.
                if class.is_voice {
                    self.enter_buffer(TurnPhase::Waiting, now, &mut effects);
                    effects.push(TurnEffect::ForwardFrame);
                }
            }
            TurnPhase::Listening => {
                if class.is_voice {
                    // Barge-in: the user takes the floor back.
                    effects.push(TurnEffect::PublishInterrupt);
                    self.enter_buffer(TurnPhase::Listening, now, &mut effects);
                    effects.push(TurnEffect::ForwardFrame);
                }
            }
        }
        effects
    }

    /// Handle a control event. Repeated events are idempotent.
    pub fn on_control(&mut self, event: ControlEvent) -> Vec<TurnEffect> {
        let mut effects = Vec::new();
        match event {
            ControlEvent::ResetToInitial | ControlEvent::ForceEndSession => {
                if self.session_active {
                    effects.push(TurnEffect::AbortSession);
                    self.session_active = false;
                }
                if self.phase != TurnPhase::Initial {
                    self.set_phase(TurnPhase::Initial, &mut effects);
                }
            }
            ControlEvent::PlaybackStarted => {
                if self.phase != TurnPhase::Listening {
                    if self.session_active {
                        // The turn is over once the agent starts talking;
                        // collect any late final on the way out.
                        effects.push(TurnEffect::DrainSession);
                        self.session_active = false;
                    }
                    self.set_phase(TurnPhase::Listening, &mut effects);
                }
            }
            ControlEvent::PlaybackEnded => {
                if self.phase == TurnPhase::Listening {
                    self.set_phase(TurnPhase::Initial, &mut effects);
                }
            }
            ControlEvent::InterruptRequested => {
                // Reply cancellation is the barge-in coordinator's job;
                // the phase waits for the playback notification.
            }
        }
        effects
    }

    /// Handle a partial transcript from the open session.
    pub fn on_partial(&mut self, non_empty: bool) -> Vec<TurnEffect> {
        let mut effects = Vec::new();
        if self.phase == TurnPhase::TransitionBuffer && non_empty {
            self.buffer_has_partial = true;
            if self.buffer_promotable() {
                self.set_phase(TurnPhase::Speaking, &mut effects);
            }
        }
        effects
    }

    /// Check the transition-buffer timeout.
    pub fn on_tick(&mut self, now: Instant) -> Vec<TurnEffect> {
        let mut effects = Vec::new();
        if let Some(deadline) = self.buffer_deadline()
            && now >= deadline
        {
            debug!("transition buffer timed out without a partial, audio was spurious");
            if self.session_active {
                effects.push(TurnEffect::DrainSession);
                self.session_active = false;
            }
            self.set_phase(TurnPhase::Initial, &mut effects);
        }
        effects
    }

    /// Handle terminal recognizer failure: reset to `Initial`.
    ///
    /// The failed session is already gone; no teardown effect is emitted.
    pub fn on_recognizer_failed(&mut self) -> Vec<TurnEffect> {
        let mut effects = Vec::new();
        self.session_active = false;
        if self.phase != TurnPhase::Initial {
            self.set_phase(TurnPhase::Initial, &mut effects);
        }
        effects
    }

    fn enter_buffer(&mut self, from: TurnPhase, now: Instant, effects: &mut Vec<TurnEffect>) {
        self.buffer_visible = match from {
            TurnPhase::TransitionBuffer => self.buffer_visible,
            visible => visible,
        };
        self.buffer_entered_at = Some(now);
        self.buffer_voice_frames = 1;
        self.buffer_has_partial = false;
        self.set_phase(TurnPhase::TransitionBuffer, effects);
        if self.session_active {
            effects.push(TurnEffect::InjectPreRoll);
        } else {
            effects.push(TurnEffect::StartSession);
            self.session_active = true;
        }
    }

    fn buffer_promotable(&self) -> bool {
        self.buffer_has_partial && self.buffer_voice_frames >= self.config.min_voice_frames_to_speak
    }

    fn silence_exceeded(&self, class: FrameClassification) -> bool {
        !class.is_voice
            && class.contiguous_silence_ms >= self.config.max_silence_frames * self.frame_ms
    }

    fn set_phase(&mut self, to: TurnPhase, effects: &mut Vec<TurnEffect>) {
        let from = self.phase;
        if from == to {
            return;
        }
        debug!(from = from.as_str(), to = to.as_str(), "phase change");
        self.phase = to;
        effects.push(TurnEffect::PhaseChanged { from, to });
    }
}
