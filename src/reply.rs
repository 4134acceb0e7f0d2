//! Reply task handles: one in-flight LLM + TTS generation at a time.
//!
//! Every reply carries its own cancel token, checked at every suspension
//! point of the generation pipeline and once more at the playback
//! transport boundary. The slot enforces the singleton: beginning a new
//! reply cancels its predecessor before the successor exists.

use crate::pipeline::messages::ReplyId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to one in-flight reply generation.
pub struct ReplyTask {
    id: ReplyId,
    triggering_sentence: String,
    cancel: CancellationToken,
    started_at: Instant,
    produced_output: AtomicBool,
}

impl ReplyTask {
    fn new(triggering_sentence: String, parent: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            id: ReplyId::new(),
            triggering_sentence,
            cancel: parent.child_token(),
            started_at: Instant::now(),
            produced_output: AtomicBool::new(false),
        })
    }

    /// Task identifier.
    pub fn id(&self) -> ReplyId {
        self.id
    }

    /// The user utterance this reply answers.
    pub fn triggering_sentence(&self) -> &str {
        &self.triggering_sentence
    }

    /// When the task was created.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Clone of the task's cancel token, for handing to adapters.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fire the cancel token.
    pub fn cancel(&self) {
        debug!(reply = %self.id, "reply cancelled");
        self.cancel.cancel();
    }

    /// Whether the token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record that the first audio chunk was dispatched.
    pub fn mark_output(&self) {
        self.produced_output.store(true, Ordering::Relaxed);
    }

    /// Whether any audio was dispatched for this reply.
    pub fn has_output(&self) -> bool {
        self.produced_output.load(Ordering::Relaxed)
    }
}

/// The singleton slot holding the active reply, shared between the
/// orchestrator (owner) and the barge-in coordinator (canceller).
#[derive(Clone)]
pub struct ReplySlot {
    current: Arc<Mutex<Option<Arc<ReplyTask>>>>,
    parent: CancellationToken,
}

impl ReplySlot {
    /// Create an empty slot whose tasks are children of `parent` (engine
    /// shutdown cancels every reply).
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            current: Arc::new(Mutex::new(None)),
            parent,
        }
    }

    /// Begin a new reply, cancelling any predecessor first.
    pub fn begin(&self, triggering_sentence: String) -> Arc<ReplyTask> {
        let mut slot = self.lock();
        if let Some(previous) = slot.take() {
            previous.cancel();
        }
        let task = ReplyTask::new(triggering_sentence, &self.parent);
        *slot = Some(Arc::clone(&task));
        task
    }

    /// Cancel the active reply, if any. Returns its id.
    pub fn cancel_current(&self) -> Option<ReplyId> {
        let mut slot = self.lock();
        slot.take().map(|task| {
            task.cancel();
            task.id()
        })
    }

    /// Release the slot once the identified task finished, failed, or was
    /// cancelled. A stale id (already superseded) is a no-op.
    pub fn finish(&self, id: ReplyId) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|task| task.id() == id) {
            *slot = None;
        }
    }

    /// The active reply, if any.
    pub fn current(&self) -> Option<Arc<ReplyTask>> {
        self.lock().clone()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<ReplyTask>>> {
        self.current.lock().expect("reply slot lock poisoned")
    }
}
