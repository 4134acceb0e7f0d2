//! Barge-in coordination: cancel the in-flight reply the moment the user
//! takes the floor back.
//!
//! Watches the bus for an interrupt request (published by the turn machine
//! when voice arrives during `Listening`, or injected by an operator) and
//! for the `Listening → TransitionBuffer` phase edge as a belt-and-braces
//! second trigger. From the moment the interrupt fires, no further audio
//! chunk of the cancelled reply reaches the playback egress: the reply's
//! token is cancelled here and re-checked at the transport boundary, and
//! the egress truncates whatever the client has buffered.

use crate::audio::egress::PlaybackSink;
use crate::bus::{EngineEvent, EventBus};
use crate::control::ControlEvent;
use crate::reply::ReplySlot;
use crate::turn::TurnPhase;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Barge-in coordinator task.
pub struct BargeInCoordinator {
    bus: EventBus,
    slot: ReplySlot,
    sink: Arc<dyn PlaybackSink>,
}

impl BargeInCoordinator {
    /// Create a coordinator over the shared reply slot and playback sink.
    pub fn new(bus: EventBus, slot: ReplySlot, sink: Arc<dyn PlaybackSink>) -> Self {
        Self { bus, slot, sink }
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut sub = self.bus.subscribe("barge-in");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = sub.recv() => {
                    let Some(event) = event else { break };
                    if Self::is_trigger(&event) {
                        self.interrupt().await;
                    }
                }
            }
        }
    }

    fn is_trigger(event: &EngineEvent) -> bool {
        match event {
            EngineEvent::Control(ControlEvent::InterruptRequested) => true,
            EngineEvent::PhaseChanged { from, to } => {
                *from == TurnPhase::Listening && *to == TurnPhase::TransitionBuffer
            }
            _ => false,
        }
    }

    /// Cancel the active reply and truncate buffered playback.
    ///
    /// Both triggers fire for a voice barge-in; the second invocation
    /// finds the slot empty and does nothing, so exactly one
    /// `InterruptAcknowledged` is published per cancelled reply.
    async fn interrupt(&self) {
        let Some(reply) = self.slot.cancel_current() else {
            return;
        };
        info!(%reply, "barge-in: reply cancelled");
        if let Err(e) = self.sink.drop_buffered().await {
            warn!("failed to truncate playback on barge-in: {e}");
        }
        self.bus.publish(EngineEvent::InterruptAcknowledged {
            reply: Some(reply),
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::bus::BusSubscription;

    async fn next_ack(sub: &mut BusSubscription) -> Option<EngineEvent> {
        while let Some(event) = sub.recv().await {
            if matches!(event, EngineEvent::InterruptAcknowledged { .. }) {
                return Some(event);
            }
        }
        None
    }
    use crate::config::BusConfig;
    use crate::error::Result;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        dropped: Mutex<usize>,
    }

    #[async_trait]
    impl PlaybackSink for RecordingSink {
        async fn send_chunk(&self, _pcm: Bytes) -> Result<()> {
            Ok(())
        }
        async fn end_reply(&self) -> Result<()> {
            Ok(())
        }
        async fn drop_buffered(&self) -> Result<()> {
            *self.dropped.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn setup() -> (EventBus, ReplySlot, Arc<RecordingSink>, CancellationToken) {
        let bus = EventBus::new(&BusConfig::default());
        let slot = ReplySlot::new(CancellationToken::new());
        let sink = Arc::new(RecordingSink::default());
        (bus, slot, sink, CancellationToken::new())
    }

    #[tokio::test]
    async fn interrupt_request_cancels_active_reply() {
        let (bus, slot, sink, cancel) = setup();
        let task = slot.begin("hello".into());
        let coordinator =
            BargeInCoordinator::new(bus.clone(), slot.clone(), Arc::clone(&sink) as Arc<dyn PlaybackSink>);
        let mut observer = bus.subscribe("observer");
        let handle = tokio::spawn(coordinator.run(cancel.clone()));

        bus.publish(EngineEvent::Control(ControlEvent::InterruptRequested));
        let ack = next_ack(&mut observer).await.unwrap();
        match ack {
            EngineEvent::InterruptAcknowledged { reply } => {
                assert_eq!(reply, Some(task.id()));
            }
            _ => unreachable!(),
        }
        assert!(task.is_cancelled());
        assert_eq!(*sink.dropped.lock().unwrap(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn phase_edge_from_listening_triggers() {
        let (bus, slot, sink, cancel) = setup();
        let task = slot.begin("hello".into());
        let coordinator =
            BargeInCoordinator::new(bus.clone(), slot.clone(), Arc::clone(&sink) as Arc<dyn PlaybackSink>);
        let mut observer = bus.subscribe("observer");
        let handle = tokio::spawn(coordinator.run(cancel.clone()));

        bus.publish(EngineEvent::PhaseChanged {
            from: TurnPhase::Listening,
            to: TurnPhase::TransitionBuffer,
        });
        next_ack(&mut observer).await.unwrap();
        assert!(task.is_cancelled());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn double_trigger_acknowledges_once() {
        let (bus, slot, sink, cancel) = setup();
        let _task = slot.begin("hello".into());
        let coordinator =
            BargeInCoordinator::new(bus.clone(), slot.clone(), Arc::clone(&sink) as Arc<dyn PlaybackSink>);
        let mut observer = bus.subscribe("observer");
        let handle = tokio::spawn(coordinator.run(cancel.clone()));

        // The machine publishes both the interrupt and the phase edge.
        bus.publish(EngineEvent::Control(ControlEvent::InterruptRequested));
        bus.publish(EngineEvent::PhaseChanged {
            from: TurnPhase::Listening,
            to: TurnPhase::TransitionBuffer,
        });
        next_ack(&mut observer).await.unwrap();

        // Give the second trigger time to (not) act.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*sink.dropped.lock().unwrap(), 1);
        while let Some(event) = observer.try_recv() {
            assert!(
                !matches!(event, EngineEvent::InterruptAcknowledged { .. }),
                "second ack must not be published"
            );
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn other_phase_edges_are_ignored() {
        let (bus, slot, sink, cancel) = setup();
        let task = slot.begin("hello".into());
        let coordinator =
            BargeInCoordinator::new(bus.clone(), slot.clone(), Arc::clone(&sink) as Arc<dyn PlaybackSink>);
        let handle = tokio::spawn(coordinator.run(cancel.clone()));

        bus.publish(EngineEvent::PhaseChanged {
            from: TurnPhase::Initial,
            to: TurnPhase::TransitionBuffer,
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_cancelled());
        assert_eq!(*sink.dropped.lock().unwrap(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
