//! Sentence aggregation: collects finalized sentences from the recognizer
//! and exposes a consume-once queue to the orchestrator.
//!
//! Vendors sometimes split one utterance into a comma-terminated fragment
//! followed by its continuation a few frames later. Two finals arriving
//! within the merge window with no intervening partial of new content are
//! concatenated with a single separator. The queue never reorders and
//! every sentence is delivered exactly once.

use crate::config::SentenceConfig;
use crate::pipeline::messages::Transcript;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

struct Inner {
    merge_window: Duration,
    sentences: Vec<String>,
    /// When the newest sentence was finalized.
    last_final_at: Option<Instant>,
    /// Whether a partial with new content arrived since the newest final
    /// (seals the tail against further merging).
    partial_since_final: bool,
}

/// Shared handle to the aggregation queue.
///
/// Cloned between the recognizer event route (producer) and the
/// orchestrator poll loop (consumer).
#[derive(Clone)]
pub struct SentenceAggregator {
    inner: Arc<Mutex<Inner>>,
}

impl SentenceAggregator {
    /// Create an empty aggregator.
    pub fn new(config: &SentenceConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                merge_window: Duration::from_millis(config.merge_window_ms),
                sentences: Vec::new(),
                last_final_at: None,
                partial_since_final: false,
            })),
        }
    }

    /// Record a partial. A non-empty partial seals the newest sentence
    /// against merging, since it proves new content followed.
    pub fn observe_partial(&self, transcript: &Transcript) {
        if transcript.text.trim().is_empty() {
            return;
        }
        let mut inner = self.lock();
        inner.partial_since_final = true;
    }

    /// Append a finalized sentence, merging with the tail when the vendor
    /// split one utterance across two rapid finals.
    pub fn push_final(&self, transcript: Transcript, now: Instant) {
        let text = transcript.text.trim();
        if text.is_empty() {
            return;
        }
        let mut inner = self.lock();
        let mergeable = inner.last_final_at.is_some_and(|at| {
            now.duration_since(at) < inner.merge_window && !inner.partial_since_final
        });
        if mergeable && let Some(tail) = inner.sentences.last_mut() {
            tail.push(' ');
            tail.push_str(text);
            debug!(sentence = %tail, "merged rapid sentence fragments");
        } else {
            inner.sentences.push(text.to_owned());
        }
        inner.last_final_at = Some(now);
        inner.partial_since_final = false;
    }

    /// Atomically drain the queue.
    ///
    /// The newest sentence is held back while its merge window is still
    /// open (a continuation fragment may yet arrive); everything drained
    /// is gone from the queue before this returns.
    pub fn consume_all(&self, now: Instant) -> Vec<String> {
        let mut inner = self.lock();
        if inner.sentences.is_empty() {
            return Vec::new();
        }
        let tail_open = !inner.partial_since_final
            && inner
                .last_final_at
                .is_some_and(|at| now.duration_since(at) < inner.merge_window);
        let take = if tail_open {
            inner.sentences.len() - 1
        } else {
            inner.sentences.len()
        };
        inner.sentences.drain(..take).collect()
    }

    /// Discard everything pending (session reset).
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.sentences.clear();
        inner.last_final_at = None;
        inner.partial_since_final = false;
    }

    /// Number of sentences currently queued.
    pub fn len(&self) -> usize {
        self.lock().sentences.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().sentences.is_empty()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("sentence queue lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn aggregator() -> SentenceAggregator {
        SentenceAggregator::new(&SentenceConfig::default())
    }

    fn final_transcript(text: &str, sequence: u64) -> Transcript {
        Transcript {
            text: text.to_owned(),
            is_final: true,
            sequence,
        }
    }

    fn partial_transcript(text: &str) -> Transcript {
        Transcript {
            text: text.to_owned(),
            is_final: false,
            sequence: 0,
        }
    }

    #[test]
    fn rapid_fragments_merge_with_single_separator() {
        let agg = aggregator();
        let t0 = Instant::now();
        agg.push_final(final_transcript("okay,", 1), t0);
        agg.push_final(final_transcript(" let's go", 2), t0 + Duration::from_millis(150));

        let drained = agg.consume_all(t0 + Duration::from_millis(400));
        assert_eq!(drained, vec!["okay, let's go"]);
    }

    #[test]
    fn slow_fragments_stay_separate() {
        let agg = aggregator();
        let t0 = Instant::now();
        agg.push_final(final_transcript("first.", 1), t0);
        agg.push_final(final_transcript("second.", 2), t0 + Duration::from_millis(300));

        let drained = agg.consume_all(t0 + Duration::from_secs(1));
        assert_eq!(drained, vec!["first.", "second."]);
    }

    #[test]
    fn intervening_partial_blocks_merge() {
        let agg = aggregator();
        let t0 = Instant::now();
        agg.push_final(final_transcript("first.", 1), t0);
        agg.observe_partial(&partial_transcript("sec"));
        agg.push_final(final_transcript("second.", 2), t0 + Duration::from_millis(100));

        let drained = agg.consume_all(t0 + Duration::from_secs(1));
        assert_eq!(drained, vec!["first.", "second."]);
    }

    #[test]
    fn empty_partials_do_not_block_merge() {
        let agg = aggregator();
        let t0 = Instant::now();
        agg.push_final(final_transcript("okay,", 1), t0);
        agg.observe_partial(&partial_transcript("  "));
        agg.push_final(final_transcript("go", 2), t0 + Duration::from_millis(100));

        let drained = agg.consume_all(t0 + Duration::from_secs(1));
        assert_eq!(drained, vec!["okay, go"]);
    }

    #[test]
    fn tail_is_held_back_while_merge_window_is_open() {
        let agg = aggregator();
        let t0 = Instant::now();
        agg.push_final(final_transcript("okay,", 1), t0);

        // Poll inside the window: nothing delivered yet.
        assert!(agg.consume_all(t0 + Duration::from_millis(100)).is_empty());

        agg.push_final(final_transcript(" let's go", 2), t0 + Duration::from_millis(150));
        agg.push_final(final_transcript(" now.", 3), t0 + Duration::from_millis(500));

        // First consumption: the merged head; the tail window is open.
        let first = agg.consume_all(t0 + Duration::from_millis(550));
        assert_eq!(first, vec!["okay, let's go"]);
        // Second consumption after the tail window expires.
        let second = agg.consume_all(t0 + Duration::from_millis(800));
        assert_eq!(second, vec!["now."]);
    }

    #[test]
    fn consume_is_exactly_once() {
        let agg = aggregator();
        let t0 = Instant::now();
        agg.push_final(final_transcript("hello.", 1), t0);
        let later = t0 + Duration::from_secs(1);
        assert_eq!(agg.consume_all(later), vec!["hello."]);
        assert!(agg.consume_all(later).is_empty());
        assert!(agg.is_empty());
    }

    #[test]
    fn clear_discards_pending_sentences() {
        let agg = aggregator();
        let t0 = Instant::now();
        agg.push_final(final_transcript("doomed.", 1), t0);
        agg.clear();
        assert!(agg.consume_all(t0 + Duration::from_secs(1)).is_empty());
    }
}
