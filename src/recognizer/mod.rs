//! Recognition session manager: owns the lifecycle of one streaming
//! recognition session at a time.
//!
//! Vendor results are normalised into a single ordered event queue with
//! strictly monotonic sequences; out-of-order vendor partials are dropped.
//! Transient upstream errors trigger bounded reconnection with exponential
//! backoff while inbound frames are buffered; overflow or an exhausted
//! retry budget fails the session terminally.

pub mod adapter;

use crate::audio::frame::AudioFrame;
use crate::config::RecognizerConfig;
use crate::error::{DialogueError, Result};
use crate::pipeline::messages::{RecognizerEvent, SessionId, Transcript};
use crate::recognizer::adapter::{RecognizerAdapter, VendorPartial};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

/// Lifecycle state of the managed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session exists.
    #[default]
    Idle,
    /// Connecting or reconnecting; frames are buffered.
    Starting,
    /// Streaming frames and receiving results.
    Active,
    /// Drain requested; waiting for a late final.
    Draining,
    /// Session over; a new `start_session` may follow.
    Closed,
    /// Terminal failure; retry budget exhausted or buffer overflow.
    Failed,
}

/// Manager for the singleton recognition session.
pub struct RecognitionManager {
    config: RecognizerConfig,
    adapter: Arc<dyn RecognizerAdapter>,
    state: SessionState,
    session: Option<SessionId>,
    /// Engine-side sequence counter, restarted per session.
    next_sequence: u64,
    /// Highest vendor sequence accepted this session.
    last_vendor_sequence: Option<u64>,
    /// Normalised events awaiting `poll_events`.
    events: VecDeque<RecognizerEvent>,
    /// Frames awaiting flush (the reconnect buffer while `Starting`).
    pending: VecDeque<AudioFrame>,
    reconnects_used: u32,
    retry_at: Option<Instant>,
}

impl RecognitionManager {
    /// Create a manager over the given vendor adapter.
    pub fn new(config: &RecognizerConfig, adapter: Arc<dyn RecognizerAdapter>) -> Self {
        Self {
            config: config.clone(),
            adapter,
            state: SessionState::Idle,
            session: None,
            next_sequence: 0,
            last_vendor_sequence: None,
            events: VecDeque::new(),
            pending: VecDeque::new(),
            reconnects_used: 0,
            retry_at: None,
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Id of the current session, if one exists.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session
    }

    /// When the next reconnect attempt is due, if one is scheduled.
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Establish a new session and inject the pre-roll snapshot ahead of
    /// any live frame.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the upstream does not acknowledge readiness
    /// within `session_start_timeout_ms`, or the upstream error otherwise.
    pub async fn start_session(&mut self, pre_roll: Vec<AudioFrame>) -> Result<SessionId> {
        self.state = SessionState::Starting;
        self.connect().await.inspect_err(|_| {
            self.state = SessionState::Failed;
        })?;

        let session = SessionId::new();
        self.session = Some(session);
        self.next_sequence = 0;
        self.last_vendor_sequence = None;
        self.reconnects_used = 0;
        self.retry_at = None;
        self.state = SessionState::Active;
        info!(%session, pre_roll_frames = pre_roll.len(), "recognition session started");

        self.pending.extend(pre_roll);
        self.flush().await;
        Ok(session)
    }

    /// Queue frames for the upstream. Never blocks on the network beyond
    /// the in-flight chunk; while reconnecting, frames are buffered up to
    /// `reconnect_buffer_frames`.
    pub async fn send_frames(&mut self, frames: Vec<AudioFrame>) -> Result<()> {
        match self.state {
            SessionState::Active => {
                self.pending.extend(frames);
                self.flush().await;
                Ok(())
            }
            SessionState::Starting => {
                if self.pending.len() + frames.len() > self.config.reconnect_buffer_frames {
                    self.fail_terminal("reconnect buffer overflow".into());
                    return Err(DialogueError::TransientUpstream(
                        "reconnect buffer overflow".into(),
                    ));
                }
                self.pending.extend(frames);
                Ok(())
            }
            _ => {
                // Frames racing a teardown are expected; drop them.
                debug!(state = ?self.state, "dropping frames outside an active session");
                Ok(())
            }
        }
    }

    /// Run due maintenance (reconnect attempts). Returns the new session
    /// id when a reconnect succeeded this call.
    pub async fn maintain(&mut self, now: Instant) -> Option<SessionId> {
        let due = self.retry_at.is_some_and(|at| now >= at);
        if !due || self.state != SessionState::Starting {
            return None;
        }
        self.retry_at = None;
        self.reconnects_used += 1;

        match self.connect().await {
            Ok(()) => {
                let session = SessionId::new();
                self.session = Some(session);
                self.next_sequence = 0;
                self.last_vendor_sequence = None;
                self.state = SessionState::Active;
                info!(
                    %session,
                    buffered = self.pending.len(),
                    attempt = self.reconnects_used,
                    "recognition session reconnected"
                );
                self.flush().await;
                Some(session)
            }
            Err(e) => {
                if self.reconnects_used >= self.config.max_reconnects {
                    self.fail_terminal(format!("reconnect budget exhausted: {e}"));
                } else {
                    self.schedule_retry(now);
                }
                None
            }
        }
    }

    /// Request a drain: collect a late final within `final_drain_timeout_ms`
    /// and close.
    ///
    /// The final (if any) is also delivered through `poll_events`, which is
    /// the only path the sentence aggregator consumes; the return value is
    /// informational.
    pub async fn end_session(&mut self) -> Result<Option<Transcript>> {
        if !matches!(self.state, SessionState::Active | SessionState::Starting) {
            return Ok(None);
        }
        let Some(session) = self.session else {
            return Ok(None);
        };
        self.state = SessionState::Draining;
        self.retry_at = None;

        // Commit anything the vendor already finalized before draining.
        self.poll_sentences().await;

        let late_final = match timeout(
            Duration::from_millis(self.config.final_drain_timeout_ms),
            self.adapter.end_session(),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(%session, "drain failed: {e}");
                None
            }
            Err(_) => {
                debug!(%session, "no late final within drain timeout");
                None
            }
        };

        let transcript = late_final.map(|f| {
            let transcript = Transcript {
                text: f.text,
                is_final: true,
                sequence: self.alloc_sequence(),
            };
            self.events.push_back(RecognizerEvent::SentenceFinalized {
                session,
                transcript: transcript.clone(),
            });
            transcript
        });

        self.close(session).await;
        Ok(transcript)
    }

    /// Tear the session down immediately. Anything pending (buffered
    /// frames and undelivered events) is discarded, so nothing from the
    /// closed session can reach the aggregator afterwards.
    pub async fn abort(&mut self) {
        if !matches!(
            self.state,
            SessionState::Active | SessionState::Starting | SessionState::Draining
        ) {
            return;
        }
        let Some(session) = self.session else { return };
        debug!(%session, "recognition session aborted");
        self.events.clear();
        self.retry_at = None;
        let _ = self.adapter.end_session().await;
        self.close(session).await;
    }

    /// Drain the normalised event queue.
    pub fn poll_events(&mut self) -> Vec<RecognizerEvent> {
        self.events.drain(..).collect()
    }

    async fn connect(&mut self) -> Result<()> {
        match timeout(
            Duration::from_millis(self.config.session_start_timeout_ms),
            self.adapter.start_session(),
        )
        .await
        {
            Ok(Ok(())) => {
                self.adapter.clear_sentence_buffer().await;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DialogueError::Timeout(
                "recognizer did not acknowledge session start".into(),
            )),
        }
    }

    /// Send queued frames in capture order until empty or the upstream
    /// falters.
    async fn flush(&mut self) {
        while self.state == SessionState::Active {
            let Some(frame) = self.pending.pop_front() else {
                break;
            };
            let chunk = Bytes::from(frame.to_pcm_bytes());
            match self.adapter.send_chunk(chunk).await {
                Ok(Some(partial)) => self.accept_partial(partial),
                Ok(None) => {}
                Err(e) if e.is_retryable() && self.reconnects_used < self.config.max_reconnects => {
                    warn!("recognizer send failed, reconnecting: {e}");
                    self.pending.push_front(frame);
                    self.state = SessionState::Starting;
                    self.schedule_retry(Instant::now());
                    return;
                }
                Err(e) => {
                    self.fail_terminal(format!("recognizer send failed: {e}"));
                    return;
                }
            }
        }
        if self.state == SessionState::Active {
            self.poll_sentences().await;
        }
    }

    fn accept_partial(&mut self, partial: VendorPartial) {
        let Some(session) = self.session else { return };
        if let Some(last) = self.last_vendor_sequence
            && partial.sequence <= last
        {
            debug!(
                sequence = partial.sequence,
                last, "dropping out-of-order vendor partial"
            );
            return;
        }
        self.last_vendor_sequence = Some(partial.sequence);
        let transcript = Transcript {
            text: partial.text,
            is_final: false,
            sequence: self.alloc_sequence(),
        };
        self.events
            .push_back(RecognizerEvent::PartialEmitted { session, transcript });
    }

    async fn poll_sentences(&mut self) {
        let Some(session) = self.session else { return };
        for text in self.adapter.poll_complete_sentences().await {
            if text.is_empty() {
                warn!("vendor emitted an empty final, dropping");
                continue;
            }
            let transcript = Transcript {
                text,
                is_final: true,
                sequence: self.alloc_sequence(),
            };
            self.events
                .push_back(RecognizerEvent::SentenceFinalized { session, transcript });
        }
    }

    async fn close(&mut self, session: SessionId) {
        self.adapter.clear_sentence_buffer().await;
        self.pending.clear();
        self.state = SessionState::Closed;
        self.events.push_back(RecognizerEvent::Closed { session });
    }

    fn fail_terminal(&mut self, message: String) {
        warn!("recognition session failed: {message}");
        let session = self.session.unwrap_or_default();
        self.pending.clear();
        self.retry_at = None;
        self.state = SessionState::Failed;
        self.events
            .push_back(RecognizerEvent::Error { session, message });
    }

    fn schedule_retry(&mut self, now: Instant) {
        let backoff =
            Duration::from_millis(self.config.reconnect_backoff_ms << self.reconnects_used);
        self.retry_at = Some(now + backoff);
        debug!(
            attempt = self.reconnects_used + 1,
            backoff_ms = backoff.as_millis() as u64,
            "reconnect scheduled"
        );
    }

    fn alloc_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }
}
