//! Message types passed between engine stages.

use std::fmt;
use uuid::Uuid;

/// Identifier of one recognition session.
///
/// A reconnect produces a fresh id; transcript sequences are scoped to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Allocate a new unique session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough for log correlation.
        write!(f, "sess-{}", &self.0.as_simple().to_string()[..8])
    }
}

/// Identifier of one in-flight reply (LLM + TTS generation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplyId(Uuid);

impl ReplyId {
    /// Allocate a new unique reply id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReplyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReplyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reply-{}", &self.0.as_simple().to_string()[..8])
    }
}

/// Per-frame output of the frame classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameClassification {
    /// Whether the frame carries voice.
    pub is_voice: bool,
    /// Contiguous silence observed up to and including this frame, in ms.
    /// Always zero when `is_voice` is set.
    pub contiguous_silence_ms: u32,
}

/// A recognizer transcript, partial or final.
///
/// Sequences are strictly increasing within one session. A final is a
/// terminal commit; later partials cannot revise it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Transcribed text. Partials may be empty; finals never are.
    pub text: String,
    /// Whether this transcript is committed.
    pub is_final: bool,
    /// Position in the session's transcript stream.
    pub sequence: u64,
}

/// Events emitted by the recognition session manager.
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    /// A (possibly empty) partial transcript arrived.
    PartialEmitted {
        session: SessionId,
        transcript: Transcript,
    },
    /// A sentence was committed by the vendor.
    SentenceFinalized {
        session: SessionId,
        transcript: Transcript,
    },
    /// The session failed terminally (retry budget exhausted).
    Error { session: SessionId, message: String },
    /// The session closed (drained or torn down).
    Closed { session: SessionId },
}
