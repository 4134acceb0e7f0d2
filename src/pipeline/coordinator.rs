//! Engine orchestration: wires the frame classifier, turn machine,
//! recognition session, sentence queue, and reply pipeline together and
//! drives them until shutdown.

use crate::audio::classifier::{FrameClassifier, rms_energy};
use crate::audio::egress::PlaybackSink;
use crate::audio::frame::{AudioFrame, CaptureMessage};
use crate::audio::pre_roll::PreRollRing;
use crate::barge_in::BargeInCoordinator;
use crate::bus::{EngineEvent, EventBus};
use crate::config::{DialogueConfig, ReplyConfig};
use crate::control::{
    ControlEvent, PlaybackState, PlaybackStatus, encode_interrupt, encode_phase_changed,
};
use crate::error::{DialogueError, Result};
use crate::llm::{LlmAdapter, fallback};
use crate::pipeline::messages::RecognizerEvent;
use crate::recognizer::RecognitionManager;
use crate::recognizer::adapter::RecognizerAdapter;
use crate::reply::{ReplySlot, ReplyTask};
use crate::sentence::SentenceAggregator;
use crate::tts::TtsAdapter;
use crate::turn::{TurnEffect, TurnMachine, TurnPhase};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// RMS threshold used for "the mic is delivering real audio" detection.
///
/// Low enough that room noise counts as live audio while an all-zero
/// permission-denied stream stays below it.
const MIC_RMS_THRESHOLD: f32 = 0.000_01;

/// Orchestrates the full dialogue engine.
///
/// Adapters and transports are attached with the `with_*` methods; `run`
/// drives all stages until the engine token is cancelled or the capture
/// stream ends.
pub struct DialogueEngine {
    config: DialogueConfig,
    cancel: CancellationToken,
    bus: EventBus,
    recognizer: Option<Arc<dyn RecognizerAdapter>>,
    llm: Option<Arc<dyn LlmAdapter>>,
    tts: Option<Arc<dyn TtsAdapter>>,
    sink: Option<Arc<dyn PlaybackSink>>,
    capture_rx: Option<mpsc::Receiver<CaptureMessage>>,
    control_rx: Option<mpsc::UnboundedReceiver<ControlEvent>>,
    control_egress_tx: Option<mpsc::UnboundedSender<String>>,
}

impl DialogueEngine {
    /// Create an engine with the given configuration.
    pub fn new(config: DialogueConfig) -> Self {
        let bus = EventBus::new(&config.bus);
        Self {
            config,
            cancel: CancellationToken::new(),
            bus,
            recognizer: None,
            llm: None,
            tts: None,
            sink: None,
            capture_rx: None,
            control_rx: None,
            control_egress_tx: None,
        }
    }

    /// Attach the recognizer vendor adapter.
    pub fn with_recognizer(mut self, adapter: Arc<dyn RecognizerAdapter>) -> Self {
        self.recognizer = Some(adapter);
        self
    }

    /// Attach the language model adapter.
    pub fn with_llm(mut self, adapter: Arc<dyn LlmAdapter>) -> Self {
        self.llm = Some(adapter);
        self
    }

    /// Attach the speech synthesis adapter.
    pub fn with_tts(mut self, adapter: Arc<dyn TtsAdapter>) -> Self {
        self.tts = Some(adapter);
        self
    }

    /// Attach the playback egress sink.
    pub fn with_playback_sink(mut self, sink: Arc<dyn PlaybackSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Attach the capture ingress channel.
    pub fn with_capture(mut self, rx: mpsc::Receiver<CaptureMessage>) -> Self {
        self.capture_rx = Some(rx);
        self
    }

    /// Attach the operator/UI control channel.
    pub fn with_control(mut self, rx: mpsc::UnboundedReceiver<ControlEvent>) -> Self {
        self.control_rx = Some(rx);
        self
    }

    /// Attach the outbound control egress (JSON messages toward the
    /// client: `phase_changed`, `interrupt`).
    pub fn with_control_egress(mut self, tx: mpsc::UnboundedSender<String>) -> Self {
        self.control_egress_tx = Some(tx);
        self
    }

    /// Handle for subscribing to engine events.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Engine shutdown token. Cancelling it winds down every stage and
    /// fires the cancel token of any in-flight reply.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the engine until cancelled.
    ///
    /// # Errors
    ///
    /// Returns a config error when a required adapter or the capture
    /// channel is missing.
    pub async fn run(mut self) -> Result<()> {
        let recognizer = require(self.recognizer.take(), "recognizer adapter")?;
        let llm = require(self.llm.take(), "LLM adapter")?;
        let tts = require(self.tts.take(), "TTS adapter")?;
        let sink = require(self.sink.take(), "playback sink")?;
        let capture_rx = require(self.capture_rx.take(), "capture channel")?;

        info!("starting dialogue engine");
        let cancel = self.cancel.clone();
        let bus = self.bus.clone();
        let aggregator = SentenceAggregator::new(&self.config.sentence);
        let slot = ReplySlot::new(cancel.clone());
        let (control_to_turn_tx, control_to_turn_rx) = mpsc::unbounded_channel::<ControlEvent>();

        // Turn stage: classifier + pre-roll + state machine + recognition
        // session, all run-to-completion per event.
        let turn_handle = {
            let stage = TurnStage::new(
                &self.config,
                bus.clone(),
                RecognitionManager::new(&self.config.recognizer, recognizer),
                aggregator.clone(),
                slot.clone(),
                Arc::clone(&sink),
            );
            let cancel = cancel.clone();
            tokio::spawn(async move {
                stage.run(capture_rx, control_to_turn_rx, cancel).await;
            })
        };

        // Reply stage: polls the sentence queue and drives LLM → TTS →
        // playback for each completed utterance.
        let reply_handle = {
            let ctx = ReplyStageCtx {
                config: self.config.reply.clone(),
                aggregator,
                slot: slot.clone(),
                llm,
                tts,
                sink: Arc::clone(&sink),
                bus: bus.clone(),
            };
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_reply_stage(ctx, cancel).await;
            })
        };

        // Barge-in coordinator.
        let barge_in_handle = {
            let coordinator = BargeInCoordinator::new(bus.clone(), slot, Arc::clone(&sink));
            let cancel = cancel.clone();
            tokio::spawn(async move {
                coordinator.run(cancel).await;
            })
        };

        // Control channel: operator events in, phase/interrupt JSON out.
        let control_handle = {
            let control_rx = self.control_rx.take();
            let egress_tx = self.control_egress_tx.take();
            let bus = bus.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_control_stage(control_rx, control_to_turn_tx, egress_tx, bus, cancel).await;
            })
        };

        cancel.cancelled().await;
        info!("dialogue engine shutting down");
        let _ = tokio::join!(turn_handle, reply_handle, barge_in_handle, control_handle);
        Ok(())
    }
}

fn require<T>(value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| DialogueError::Config(format!("{what} is not attached")))
}

// ── Turn stage ────────────────────────────────────────────────────────

struct TurnStage {
    bus: EventBus,
    classifier: FrameClassifier,
    ring: PreRollRing,
    machine: TurnMachine,
    manager: RecognitionManager,
    aggregator: SentenceAggregator,
    slot: ReplySlot,
    sink: Arc<dyn PlaybackSink>,
    // Mic flow validation: confirm live audio once, warn when capture
    // stays dead past the watchdog window, recover if audio appears later.
    mic_watchdog_secs: u64,
    mic_active_reported: bool,
    mic_watchdog_reported: bool,
    started_at: Instant,
}

impl TurnStage {
    fn new(
        config: &DialogueConfig,
        bus: EventBus,
        manager: RecognitionManager,
        aggregator: SentenceAggregator,
        slot: ReplySlot,
        sink: Arc<dyn PlaybackSink>,
    ) -> Self {
        Self {
            bus,
            classifier: FrameClassifier::new(&config.audio),
            ring: PreRollRing::new(config.turn.pre_roll_frames),
            machine: TurnMachine::new(&config.turn, config.audio.frame_ms),
            manager,
            aggregator,
            slot,
            sink,
            mic_watchdog_secs: config.audio.mic_watchdog_secs,
            mic_active_reported: false,
            mic_watchdog_reported: false,
            started_at: Instant::now(),
        }
    }

    async fn run(
        mut self,
        mut capture_rx: mpsc::Receiver<CaptureMessage>,
        mut control_rx: mpsc::UnboundedReceiver<ControlEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                // Control events win a same-tick race against frames
                // (the agent began first), except PlaybackEnded, which
                // yields to frames already queued (the user took the
                // floor immediately).
                event = control_rx.recv() => {
                    let Some(event) = event else { break };
                    if event == ControlEvent::PlaybackEnded {
                        while let Ok(message) = capture_rx.try_recv() {
                            self.handle_capture(message).await;
                        }
                    }
                    self.handle_control(event).await;
                }
                message = capture_rx.recv() => {
                    let Some(message) = message else {
                        info!("capture stream ended, stopping engine");
                        cancel.cancel();
                        break;
                    };
                    self.handle_capture(message).await;
                }
                () = sleep_until_instant(deadline), if deadline.is_some() => {
                    self.handle_tick().await;
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.machine.buffer_deadline(), self.manager.next_retry_at()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn handle_capture(&mut self, message: CaptureMessage) {
        match message {
            CaptureMessage::Frame(frame) => self.handle_frame(frame).await,
            CaptureMessage::Stop => self.handle_control(ControlEvent::ForceEndSession).await,
            CaptureMessage::ClientSilence { silence_ms } => {
                self.classifier.note_client_silence(silence_ms);
            }
        }
    }

    async fn handle_frame(&mut self, frame: AudioFrame) {
        self.check_mic_flow(&frame);

        let class = self.classifier.classify(&frame);
        self.bus.publish(EngineEvent::FrameClassified(class));

        let effects = self.machine.on_frame(class, Instant::now());
        self.execute(&effects, Some(&frame)).await;

        // Buffered after effect execution so a session started by this
        // frame sees pre-roll strictly before the live frame, never a
        // duplicate of it.
        if class.is_voice {
            self.ring.push(frame);
        }
        self.route_recognizer_events().await;
    }

    async fn handle_control(&mut self, event: ControlEvent) {
        self.bus.publish(EngineEvent::Control(event));

        if matches!(
            event,
            ControlEvent::ResetToInitial | ControlEvent::ForceEndSession
        ) {
            if let Some(reply) = self.slot.cancel_current() {
                debug!(%reply, "reply cancelled by control event");
            }
            if let Err(e) = self.sink.drop_buffered().await {
                warn!("failed to truncate playback on reset: {e}");
            }
            self.aggregator.clear();
        }

        let effects = self.machine.on_control(event);
        self.execute(&effects, None).await;
        self.route_recognizer_events().await;
    }

    async fn handle_tick(&mut self) {
        let now = Instant::now();
        let effects = self.machine.on_tick(now);
        self.execute(&effects, None).await;
        if let Some(session) = self.manager.maintain(now).await {
            self.bus.publish(EngineEvent::SessionStarted { session });
        }
        self.route_recognizer_events().await;
    }

    async fn execute(&mut self, effects: &[TurnEffect], frame: Option<&AudioFrame>) {
        for effect in effects {
            match effect {
                TurnEffect::StartSession => {
                    let pre_roll = self.ring.snapshot();
                    match self.manager.start_session(pre_roll).await {
                        Ok(session) => {
                            self.bus.publish(EngineEvent::SessionStarted { session });
                        }
                        Err(e) => {
                            error!("recognition session failed to start: {e}");
                            let effects = self.machine.on_recognizer_failed();
                            self.publish_phase_changes(&effects);
                        }
                    }
                }
                TurnEffect::InjectPreRoll => {
                    let _ = self.manager.send_frames(self.ring.snapshot()).await;
                }
                TurnEffect::ForwardFrame => {
                    if let Some(frame) = frame {
                        let _ = self.manager.send_frames(vec![frame.clone()]).await;
                    }
                }
                TurnEffect::DrainSession => {
                    let _ = self.manager.end_session().await;
                    self.classifier.reset();
                }
                TurnEffect::AbortSession => {
                    self.manager.abort().await;
                    self.classifier.reset();
                }
                TurnEffect::PublishInterrupt => {
                    self.bus
                        .publish(EngineEvent::Control(ControlEvent::InterruptRequested));
                }
                TurnEffect::PhaseChanged { from, to } => {
                    self.bus.publish(EngineEvent::PhaseChanged {
                        from: *from,
                        to: *to,
                    });
                }
            }
        }
    }

    /// Publish phase-change effects only; used where the machine cannot
    /// produce session effects (partials, failure resets).
    fn publish_phase_changes(&self, effects: &[TurnEffect]) {
        for effect in effects {
            if let TurnEffect::PhaseChanged { from, to } = effect {
                self.bus.publish(EngineEvent::PhaseChanged {
                    from: *from,
                    to: *to,
                });
            }
        }
    }

    async fn route_recognizer_events(&mut self) {
        for event in self.manager.poll_events() {
            match event {
                RecognizerEvent::PartialEmitted {
                    session,
                    transcript,
                } => {
                    let non_empty = !transcript.text.trim().is_empty();
                    self.aggregator.observe_partial(&transcript);
                    self.bus.publish(EngineEvent::PartialEmitted {
                        session,
                        transcript,
                    });
                    let effects = self.machine.on_partial(non_empty);
                    self.publish_phase_changes(&effects);
                }
                RecognizerEvent::SentenceFinalized {
                    session,
                    transcript,
                } => {
                    info!(sentence = %transcript.text, "sentence finalized");
                    self.aggregator.push_final(transcript.clone(), Instant::now());
                    self.bus.publish(EngineEvent::SentenceFinalized {
                        session,
                        transcript,
                    });
                }
                RecognizerEvent::Error { session, message } => {
                    warn!(%session, "recognizer failed: {message}");
                    self.bus
                        .publish(EngineEvent::RecognizerFailed { session, message });
                    let effects = self.machine.on_recognizer_failed();
                    self.publish_phase_changes(&effects);
                }
                RecognizerEvent::Closed { session } => {
                    self.bus.publish(EngineEvent::SessionClosed { session });
                }
            }
        }
    }

    fn check_mic_flow(&mut self, frame: &AudioFrame) {
        let rms = rms_energy(&frame.samples);
        if rms > MIC_RMS_THRESHOLD {
            if !self.mic_active_reported {
                info!("mic audio confirmed (rms={rms:.5})");
                self.bus.publish(EngineEvent::MicStatus { active: true });
                self.mic_active_reported = true;
            }
            if self.mic_watchdog_reported {
                info!("mic audio detected after watchdog warning");
                self.mic_watchdog_reported = false;
            }
        } else if !self.mic_active_reported
            && !self.mic_watchdog_reported
            && self.started_at.elapsed() > Duration::from_secs(self.mic_watchdog_secs)
        {
            warn!(
                "mic watchdog: no audio detected after {}s",
                self.mic_watchdog_secs
            );
            self.bus.publish(EngineEvent::MicStatus { active: false });
            self.mic_watchdog_reported = true;
        }
    }
}

async fn sleep_until_instant(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ── Control stage ─────────────────────────────────────────────────────

async fn run_control_stage(
    mut control_rx: Option<mpsc::UnboundedReceiver<ControlEvent>>,
    to_turn: mpsc::UnboundedSender<ControlEvent>,
    egress_tx: Option<mpsc::UnboundedSender<String>>,
    bus: EventBus,
    cancel: CancellationToken,
) {
    let mut sub = bus.subscribe("control");
    let mut playback = PlaybackState::default();
    let mut last_visible = TurnPhase::Initial;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = recv_or_pending(&mut control_rx) => {
                match event {
                    Some(event) => {
                        if to_turn.send(event).is_err() {
                            break;
                        }
                    }
                    None => control_rx = None,
                }
            }
            event = sub.recv() => {
                let Some(event) = event else { break };
                match event {
                    EngineEvent::Control(control) => {
                        let now = Instant::now();
                        if playback.apply(control, now) {
                            match playback.status() {
                                PlaybackStatus::Playing => {
                                    debug!("playback started");
                                }
                                PlaybackStatus::Idle => {
                                    let played_ms = playback
                                        .started_at()
                                        .map(|at| now.duration_since(at).as_millis() as u64);
                                    let chunk_gap_ms = playback
                                        .last_chunk_at()
                                        .map(|at| now.duration_since(at).as_millis() as u64);
                                    debug!(played_ms, chunk_gap_ms, "playback ended");
                                }
                            }
                        }
                    }
                    EngineEvent::ReplyChunkDispatched { .. } => {
                        playback.note_chunk(Instant::now());
                    }
                    EngineEvent::PhaseChanged { to, .. } => {
                        // The transition buffer is probationary: external
                        // observers keep seeing the phase it was entered
                        // from until the machine commits either way.
                        let visible = if to == TurnPhase::TransitionBuffer {
                            last_visible
                        } else {
                            to
                        };
                        if visible != last_visible {
                            last_visible = visible;
                            if let Some(tx) = &egress_tx {
                                let _ = tx.send(encode_phase_changed(visible));
                            }
                        }
                    }
                    EngineEvent::InterruptAcknowledged { .. } => {
                        if let Some(tx) = &egress_tx {
                            let _ = tx.send(encode_interrupt());
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn recv_or_pending(
    rx: &mut Option<mpsc::UnboundedReceiver<ControlEvent>>,
) -> Option<ControlEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// ── Reply stage ───────────────────────────────────────────────────────

#[derive(Clone)]
struct ReplyStageCtx {
    config: ReplyConfig,
    aggregator: SentenceAggregator,
    slot: ReplySlot,
    llm: Arc<dyn LlmAdapter>,
    tts: Arc<dyn TtsAdapter>,
    sink: Arc<dyn PlaybackSink>,
    bus: EventBus,
}

async fn run_reply_stage(ctx: ReplyStageCtx, cancel: CancellationToken) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(ctx.config.monitor_interval_ms.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let sentences = ctx.aggregator.consume_all(Instant::now());
                if sentences.is_empty() {
                    continue;
                }
                let utterance = sentences.join(" ");

                // Supersede: truncate the previous reply's audio before
                // its successor exists, then cancel it via the slot.
                if ctx.slot.current().is_some() {
                    info!("new utterance supersedes the in-flight reply");
                    if let Err(e) = ctx.sink.drop_buffered().await {
                        warn!("failed to truncate superseded reply: {e}");
                    }
                }

                let task = ctx.slot.begin(utterance.clone());
                info!(reply = %task.id(), %utterance, "reply started");
                ctx.bus.publish(EngineEvent::ReplyStarted {
                    reply: task.id(),
                    utterance,
                });
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    run_reply_generation(task, ctx).await;
                });
            }
        }
    }
}

/// How one reply generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyOutcome {
    /// All audio dispatched (possibly truncated after an upstream error).
    Completed,
    /// The cancel token fired mid-flight.
    Cancelled,
    /// TTS failed before the first chunk; nothing was emitted.
    Dropped,
}

async fn run_reply_generation(task: Arc<ReplyTask>, ctx: ReplyStageCtx) {
    let outcome = drive_reply(&task, &ctx).await;

    // The end-of-reply marker is flushed only for replies that produced
    // audio and were not cancelled (barge-in truncates via the egress).
    if outcome == ReplyOutcome::Completed && task.has_output() && !task.is_cancelled() {
        if let Err(e) = ctx.sink.end_reply().await {
            warn!("failed to close reply stream: {e}");
        }
    }

    let cancelled = outcome == ReplyOutcome::Cancelled || task.is_cancelled();
    debug!(reply = %task.id(), ?outcome, "reply finished");
    ctx.bus.publish(EngineEvent::ReplyFinished {
        reply: task.id(),
        cancelled,
    });
    ctx.slot.finish(task.id());
}

async fn drive_reply(task: &ReplyTask, ctx: &ReplyStageCtx) -> ReplyOutcome {
    let token = task.cancel_token();
    let deadline = Instant::now() + Duration::from_millis(ctx.config.llm_timeout_ms.max(1));

    let generated = tokio::select! {
        () = token.cancelled() => return ReplyOutcome::Cancelled,
        () = tokio::time::sleep_until(deadline) => {
            warn!("LLM request timed out, speaking fallback");
            return finish_with(speak(task, ctx, fallback::next_fallback_line()).await);
        }
        result = ctx.llm.generate(task.triggering_sentence(), token.clone()) => result,
    };

    let mut stream = match generated {
        Ok(stream) => stream,
        Err(e) => {
            warn!("LLM request failed, speaking fallback: {e}");
            return finish_with(speak(task, ctx, fallback::next_fallback_line()).await);
        }
    };

    loop {
        let item = tokio::select! {
            () = token.cancelled() => return ReplyOutcome::Cancelled,
            () = tokio::time::sleep_until(deadline) => {
                if task.has_output() {
                    warn!("LLM deadline reached mid-reply, truncating");
                    return ReplyOutcome::Completed;
                }
                warn!("LLM produced nothing before the deadline, speaking fallback");
                return finish_with(speak(task, ctx, fallback::next_fallback_line()).await);
            }
            item = stream.next() => item,
        };

        match item {
            Some(Ok(chunk)) => match speak(task, ctx, &chunk.text).await {
                SpeakResult::Spoken => {}
                SpeakResult::Cancelled => return ReplyOutcome::Cancelled,
                SpeakResult::FailedBeforeFirstChunk => return ReplyOutcome::Dropped,
                SpeakResult::FailedMidReply => return ReplyOutcome::Completed,
            },
            Some(Err(e)) => {
                if task.has_output() {
                    warn!("LLM stream failed mid-reply, truncating: {e}");
                    return ReplyOutcome::Completed;
                }
                warn!("LLM stream failed, speaking fallback: {e}");
                return finish_with(speak(task, ctx, fallback::next_fallback_line()).await);
            }
            None => return ReplyOutcome::Completed,
        }
    }
}

fn finish_with(result: SpeakResult) -> ReplyOutcome {
    match result {
        SpeakResult::Spoken | SpeakResult::FailedMidReply => ReplyOutcome::Completed,
        SpeakResult::Cancelled => ReplyOutcome::Cancelled,
        SpeakResult::FailedBeforeFirstChunk => ReplyOutcome::Dropped,
    }
}

/// Outcome of synthesizing and dispatching one piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpeakResult {
    /// Every chunk reached the egress.
    Spoken,
    /// The cancel token fired.
    Cancelled,
    /// TTS failed and the reply has emitted nothing: drop it silently.
    FailedBeforeFirstChunk,
    /// TTS failed after audio went out: truncate gracefully.
    FailedMidReply,
}

async fn speak(task: &ReplyTask, ctx: &ReplyStageCtx, text: &str) -> SpeakResult {
    let token = task.cancel_token();
    let failed = |message: String| {
        warn!("{message}");
        if task.has_output() {
            SpeakResult::FailedMidReply
        } else {
            SpeakResult::FailedBeforeFirstChunk
        }
    };

    let request = tokio::time::timeout(
        Duration::from_millis(ctx.config.tts_timeout_ms.max(1)),
        ctx.tts.synthesize(text, token.clone()),
    );
    let mut stream = tokio::select! {
        () = token.cancelled() => return SpeakResult::Cancelled,
        result = request => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return failed(format!("TTS request failed: {e}")),
            Err(_) => return failed("TTS request timed out".into()),
        },
    };

    loop {
        let item = tokio::select! {
            () = token.cancelled() => return SpeakResult::Cancelled,
            item = tokio::time::timeout(
                Duration::from_millis(ctx.config.tts_chunk_timeout_ms.max(1)),
                stream.next(),
            ) => item,
        };

        match item {
            Err(_) => return failed("TTS chunk read timed out".into()),
            Ok(None) => return SpeakResult::Spoken,
            Ok(Some(Err(e))) => return failed(format!("TTS stream failed: {e}")),
            Ok(Some(Ok(chunk))) => {
                if chunk.pcm.is_empty() {
                    warn!("TTS emitted an empty chunk, skipping");
                    continue;
                }
                // Transport boundary: the last place a chunk of a
                // cancelled reply can be dropped.
                if token.is_cancelled() {
                    return SpeakResult::Cancelled;
                }
                let bytes = chunk.pcm.len();
                if let Err(e) = ctx.sink.send_chunk(chunk.pcm).await {
                    return failed(format!("playback egress rejected chunk: {e}"));
                }
                task.mark_output();
                ctx.bus.publish(EngineEvent::ReplyChunkDispatched {
                    reply: task.id(),
                    bytes,
                });
            }
        }
    }
}
