//! In-process publish/subscribe fabric connecting the engine components.
//!
//! Delivery is in-order per publisher and best-effort across publishers.
//! Each subscriber owns a bounded queue; a slow subscriber loses the oldest
//! events and receives a [`EngineEvent::SubscriberLagged`] marker instead,
//! so publishers never block. Events are not persisted.

use crate::config::BusConfig;
use crate::control::ControlEvent;
use crate::pipeline::messages::{FrameClassification, ReplyId, SessionId, Transcript};
use crate::turn::TurnPhase;
use tokio::sync::broadcast;
use tracing::warn;

/// Events published on the engine bus.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A frame was classified (one event per inbound audio frame).
    FrameClassified(FrameClassification),
    /// The turn state machine changed phase. Carries the internal phase,
    /// including `TransitionBuffer`; the control egress maps it to a
    /// visible phase before anything leaves the process.
    PhaseChanged { from: TurnPhase, to: TurnPhase },
    /// A control event was injected or synthesized.
    Control(ControlEvent),
    /// A recognition session became active.
    SessionStarted { session: SessionId },
    /// A recognition session closed (drained, torn down, or failed).
    SessionClosed { session: SessionId },
    /// A partial transcript arrived.
    PartialEmitted {
        session: SessionId,
        transcript: Transcript,
    },
    /// A sentence was committed by the recognizer.
    SentenceFinalized {
        session: SessionId,
        transcript: Transcript,
    },
    /// The recognizer failed terminally; the turn will reset.
    RecognizerFailed { session: SessionId, message: String },
    /// A reply task was spawned for a completed user utterance.
    ReplyStarted { reply: ReplyId, utterance: String },
    /// One audio chunk of a reply reached the playback egress.
    ReplyChunkDispatched { reply: ReplyId, bytes: usize },
    /// A reply task finished.
    ReplyFinished { reply: ReplyId, cancelled: bool },
    /// A barge-in was acknowledged: the named reply's token has fired.
    InterruptAcknowledged { reply: Option<ReplyId> },
    /// Capture audio has been dead (or recovered) per the mic watchdog.
    MicStatus { active: bool },
    /// A subscriber's queue overflowed and it missed `missed` events.
    SubscriberLagged {
        subscriber: &'static str,
        missed: u64,
    },
}

/// Handle for publishing onto the bus and creating subscriptions.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus whose subscribers buffer up to
    /// `config.subscriber_queue_depth` events each.
    pub fn new(config: &BusConfig) -> Self {
        let depth = config.subscriber_queue_depth.max(1);
        let (tx, _) = broadcast::channel(depth);
        Self { tx }
    }

    /// Publish an event. Best-effort: an event published while no
    /// subscriber exists is dropped.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Create a named subscription. The name appears in lag diagnostics.
    pub fn subscribe(&self, name: &'static str) -> BusSubscription {
        BusSubscription {
            name,
            rx: self.tx.subscribe(),
        }
    }
}

/// One subscriber's view of the bus.
pub struct BusSubscription {
    name: &'static str,
    rx: broadcast::Receiver<EngineEvent>,
}

impl BusSubscription {
    /// Receive the next event, waiting if none is queued.
    ///
    /// Returns `None` once the bus is gone and the queue is drained. On
    /// overflow the oldest events are discarded and a `SubscriberLagged`
    /// marker is delivered in their place. The marker goes to the lagging
    /// subscriber only; republishing it would evict yet more of its
    /// queue.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => Some(self.lagged(missed)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Receive without waiting. `None` means the queue is currently empty
    /// or the bus is gone.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => Some(self.lagged(missed)),
            Err(_) => None,
        }
    }

    fn lagged(&self, missed: u64) -> EngineEvent {
        warn!(
            subscriber = self.name,
            missed, "bus subscriber lagged, oldest events dropped"
        );
        EngineEvent::SubscriberLagged {
            subscriber: self.name,
            missed,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn bus_with_depth(depth: usize) -> EventBus {
        EventBus::new(&BusConfig {
            subscriber_queue_depth: depth,
        })
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let bus = bus_with_depth(16);
        let mut sub = bus.subscribe("test");
        bus.publish(EngineEvent::MicStatus { active: true });
        bus.publish(EngineEvent::MicStatus { active: false });

        assert!(matches!(
            sub.recv().await,
            Some(EngineEvent::MicStatus { active: true })
        ));
        assert!(matches!(
            sub.recv().await,
            Some(EngineEvent::MicStatus { active: false })
        ));
    }

    #[tokio::test]
    async fn fans_out_to_every_subscriber() {
        let bus = bus_with_depth(16);
        let mut a = bus.subscribe("a");
        let mut b = bus.subscribe("b");
        bus.publish(EngineEvent::MicStatus { active: true });

        assert!(matches!(
            a.recv().await,
            Some(EngineEvent::MicStatus { .. })
        ));
        assert!(matches!(
            b.recv().await,
            Some(EngineEvent::MicStatus { .. })
        ));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_reports_lag() {
        let bus = bus_with_depth(2);
        let mut slow = bus.subscribe("slow");
        for _ in 0..5 {
            bus.publish(EngineEvent::MicStatus { active: true });
        }

        let first = slow.recv().await.unwrap();
        match first {
            EngineEvent::SubscriberLagged { subscriber, missed } => {
                assert_eq!(subscriber, "slow");
                assert_eq!(missed, 3);
            }
            other => panic!("expected lag marker, got {other:?}"),
        }
        // The two newest events survive.
        assert!(slow.try_recv().is_some());
        assert!(slow.try_recv().is_some());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let bus = bus_with_depth(4);
        bus.publish(EngineEvent::MicStatus { active: true });
        let mut late = bus.subscribe("late");
        assert!(late.try_recv().is_none());
    }
}
