//! Update publisher: fan-out of round results to live observers
//!
//! Delivery is best-effort and never blocks the round: sinks must not wait
//! (channel sinks use unbounded sends). A sink whose delivery fails is dropped
//! and the remaining sinks still receive the event.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::RoundResult;

/// Delivery to a subscriber failed; the subscriber is removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Subscriber is gone")]
pub struct SinkClosed;

/// Something that receives round results
///
/// `deliver` runs on the task that plays the round and must return without
/// waiting. Live events are delivered outside the publisher's lock, so a sink
/// may call back into the publisher. Replay in
/// [`UpdatePublisher::subscribe_with_replay`] runs under the lock and must not.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &RoundResult) -> Result<(), SinkClosed>;
}

impl EventSink for mpsc::UnboundedSender<RoundResult> {
    fn deliver(&self, event: &RoundResult) -> Result<(), SinkClosed> {
        self.send(event.clone()).map_err(|_| SinkClosed)
    }
}

pub type SubscriberId = u64;

/// Channel-backed subscription
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub rx: mpsc::UnboundedReceiver<RoundResult>,
}

#[derive(Default)]
struct Inner {
    next_id: SubscriberId,
    sinks: Vec<(SubscriberId, Arc<dyn EventSink>)>,
    /// Rounds of the current match, replayed to late joiners
    history: Vec<RoundResult>,
}

/// Publish/subscribe hub for one match
#[derive(Default)]
pub struct UpdatePublisher {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for UpdatePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("UpdatePublisher")
            .field("subscribers", &inner.sinks.len())
            .field("history", &inner.history.len())
            .finish()
    }
}

impl UpdatePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink for future events
    pub fn subscribe(&self, sink: Box<dyn EventSink>) -> SubscriberId {
        let mut inner = self.lock();
        register(&mut inner, Arc::from(sink))
    }

    /// Replay the current match's rounds to the sink, then register it.
    /// Returns `None` if the sink failed during replay.
    pub fn subscribe_with_replay(&self, sink: Box<dyn EventSink>) -> Option<SubscriberId> {
        let mut inner = self.lock();
        for event in &inner.history {
            if sink.deliver(event).is_err() {
                return None;
            }
        }
        Some(register(&mut inner, Arc::from(sink)))
    }

    /// Subscribe through an unbounded channel, with replay
    pub fn subscribe_channel(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        // A fresh receiver is alive, so replay cannot fail
        let id = self.subscribe_with_replay(Box::new(tx)).unwrap_or_default();
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.lock().sinks.retain(|(sid, _)| *sid != id);
    }

    /// Deliver to every sink, dropping the ones that fail. Returns deliveries made.
    pub fn publish(&self, event: &RoundResult) -> usize {
        // History and the recipient list change together, so a sink joining
        // concurrently sees this event exactly once (replay or delivery)
        let sinks = {
            let mut inner = self.lock();
            inner.history.push(event.clone());
            inner.sinks.clone()
        };

        let failed: Vec<SubscriberId> = sinks
            .iter()
            .filter_map(|(id, sink)| match sink.deliver(event) {
                Ok(()) => None,
                Err(e) => {
                    tracing::debug!(subscriber = id, error = %e, "dropping subscriber");
                    Some(*id)
                }
            })
            .collect();

        if !failed.is_empty() {
            self.lock().sinks.retain(|(id, _)| !failed.contains(id));
        }

        let delivered = sinks.len() - failed.len();
        tracing::debug!(round = event.round, delivered, dropped = failed.len(), "published round");
        delivered
    }

    /// Forget the replay history (new match); subscribers stay
    pub fn clear_history(&self) {
        self.lock().history.clear();
    }

    pub fn history(&self) -> Vec<RoundResult> {
        self.lock().history.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().sinks.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn register(inner: &mut Inner, sink: Arc<dyn EventSink>) -> SubscriberId {
    inner.next_id += 1;
    let id = inner.next_id;
    inner.sinks.push((id, sink));
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoundKind;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(round: u32) -> RoundResult {
        RoundResult {
            round,
            kind: RoundKind::Contest,
            participants: vec![],
            statements: BTreeMap::new(),
            whispers: BTreeMap::new(),
            judge_feedback: String::new(),
            round_scores: BTreeMap::new(),
            cumulative_scores: BTreeMap::new(),
            scoring_degraded: false,
            degraded_participants: vec![],
            failed_participants: vec![],
            outcome: None,
            timestamp: Utc::now(),
        }
    }

    struct BrokenSink;

    impl EventSink for BrokenSink {
        fn deliver(&self, _: &RoundResult) -> Result<(), SinkClosed> {
            Err(SinkClosed)
        }
    }

    struct CountingSink(Arc<AtomicUsize>);

    impl EventSink for CountingSink {
        fn deliver(&self, _: &RoundResult) -> Result<(), SinkClosed> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_failing_sink_removed_others_delivered() {
        let publisher = UpdatePublisher::new();
        let count = Arc::new(AtomicUsize::new(0));

        publisher.subscribe(Box::new(BrokenSink));
        publisher.subscribe(Box::new(CountingSink(count.clone())));
        assert_eq!(publisher.subscriber_count(), 2);

        assert_eq!(publisher.publish(&event(1)), 1);
        assert_eq!(publisher.subscriber_count(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        publisher.publish(&event(2));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dropped_receiver_removed() {
        let publisher = UpdatePublisher::new();
        let sub = publisher.subscribe_channel();
        drop(sub.rx);

        publisher.publish(&event(1));
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_channel_receives_in_order() {
        let publisher = UpdatePublisher::new();
        let mut sub = publisher.subscribe_channel();

        publisher.publish(&event(1));
        publisher.publish(&event(2));

        assert_eq!(sub.rx.recv().await.unwrap().round, 1);
        assert_eq!(sub.rx.recv().await.unwrap().round, 2);
    }

    #[tokio::test]
    async fn test_late_joiner_gets_replay() {
        let publisher = UpdatePublisher::new();
        publisher.publish(&event(0));
        publisher.publish(&event(1));

        let mut sub = publisher.subscribe_channel();
        assert_eq!(sub.rx.recv().await.unwrap().round, 0);
        assert_eq!(sub.rx.recv().await.unwrap().round, 1);

        publisher.clear_history();
        let mut fresh = publisher.subscribe_channel();
        assert!(fresh.rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe() {
        let publisher = UpdatePublisher::new();
        let sub = publisher.subscribe_channel();
        publisher.unsubscribe(sub.id);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    /// Reads the publisher from inside `deliver`
    struct ReentrantSink {
        publisher: Arc<UpdatePublisher>,
        seen: Arc<AtomicUsize>,
    }

    impl EventSink for ReentrantSink {
        fn deliver(&self, _: &RoundResult) -> Result<(), SinkClosed> {
            self.seen.store(self.publisher.subscriber_count(), Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_sink_may_call_back_into_publisher() {
        let publisher = Arc::new(UpdatePublisher::new());
        let seen = Arc::new(AtomicUsize::new(0));
        publisher.subscribe(Box::new(ReentrantSink {
            publisher: publisher.clone(),
            seen: seen.clone(),
        }));
        publisher.subscribe(Box::new(BrokenSink));

        assert_eq!(publisher.publish(&event(1)), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(publisher.subscriber_count(), 1);
        assert_eq!(publisher.history().len(), 1);
    }

    #[test]
    fn test_replay_failure_not_registered() {
        let publisher = UpdatePublisher::new();
        publisher.publish(&event(1));
        assert!(publisher.subscribe_with_replay(Box::new(BrokenSink)).is_none());
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
