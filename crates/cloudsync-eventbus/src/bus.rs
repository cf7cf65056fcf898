use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::broadcast;

use crate::envelope::SyncEventEnvelope;
use crate::event::{SyncEvent, SyncEventTopic};

pub const DEFAULT_TOPIC_BUFFER_CAPACITY: usize = 64;
pub const DEFAULT_GLOBAL_BUFFER_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncEventBusConfig {
    pub topic_buffer_capacity: usize,
    pub global_buffer_capacity: usize,
}

impl Default for SyncEventBusConfig {
    fn default() -> Self {
        Self {
            topic_buffer_capacity: DEFAULT_TOPIC_BUFFER_CAPACITY,
            global_buffer_capacity: DEFAULT_GLOBAL_BUFFER_CAPACITY,
        }
    }
}

#[derive(Debug)]
pub struct SyncEventBus {
    next_sequence: AtomicU64,
    started_at: Instant,
    topic_senders: HashMap<SyncEventTopic, broadcast::Sender<SyncEventEnvelope>>,
    global_sender: broadcast::Sender<SyncEventEnvelope>,
}

impl Default for SyncEventBus {
    fn default() -> Self {
        Self::new(SyncEventBusConfig::default())
    }
}

impl SyncEventBus {
    pub fn new(config: SyncEventBusConfig) -> Self {
        assert!(
            config.topic_buffer_capacity > 0,
            "topic_buffer_capacity must be greater than 0"
        );
        assert!(
            config.global_buffer_capacity > 0,
            "global_buffer_capacity must be greater than 0"
        );

        let topic_senders = SyncEventTopic::ALL
            .into_iter()
            .map(|topic| {
                let (sender, _receiver) = broadcast::channel(config.topic_buffer_capacity);
                (topic, sender)
            })
            .collect();
        let (global_sender, _global_receiver) = broadcast::channel(config.global_buffer_capacity);
        Self {
            next_sequence: AtomicU64::new(0),
            started_at: Instant::now(),
            topic_senders,
            global_sender,
        }
    }

    pub fn subscribe(&self, topic: SyncEventTopic) -> broadcast::Receiver<SyncEventEnvelope> {
        self.topic_sender(topic).subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<SyncEventEnvelope> {
        self.global_sender.subscribe()
    }

    pub fn receiver_count(&self, topic: SyncEventTopic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    pub fn publish(&self, event: SyncEvent) -> SyncEventEnvelope {
        let envelope = SyncEventEnvelope {
            sequence: self.next_sequence(),
            published_at_nanos: self.nanos_since_start(),
            event,
        };

        let topic_sender = self.topic_sender(envelope.event.topic());
        if topic_sender.receiver_count() > 0 {
            let _ = topic_sender.send(envelope.clone());
        }
        if self.global_sender.receiver_count() > 0 {
            let _ = self.global_sender.send(envelope.clone());
        }

        envelope
    }

    fn topic_sender(&self, topic: SyncEventTopic) -> &broadcast::Sender<SyncEventEnvelope> {
        self.topic_senders
            .get(&topic)
            .expect("every sync event topic has a sender")
    }

    fn next_sequence(&self) -> u64 {
        let mut current = self.next_sequence.load(Ordering::Relaxed);
        loop {
            let next = current
                .checked_add(1)
                .expect("sync event sequence exhausted");
            match self.next_sequence.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    fn nanos_since_start(&self) -> u64 {
        let nanos = self.started_at.elapsed().as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use cloudsync_core::SyncState;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};
    use tokio::time::timeout;

    use super::{SyncEventBus, SyncEventBusConfig};
    use crate::event::{Notice, SyncEvent, SyncEventTopic};

    const TEST_TIMEOUT: Duration = Duration::from_secs(2);

    #[test]
    #[should_panic(expected = "sync event sequence exhausted")]
    fn running_out_of_sequence_numbers_panics() {
        let bus = SyncEventBus::default();
        bus.next_sequence.store(u64::MAX, Ordering::Relaxed);

        let _ = bus.publish(SyncEvent::StateChanged(SyncState::Loaded));
    }

    #[test]
    fn envelopes_are_numbered_in_publish_order_across_topics() {
        let bus = SyncEventBus::default();

        let sequences: Vec<u64> = [
            SyncEvent::StateChanged(SyncState::Initializing),
            SyncEvent::Notice(Notice::info("checking")),
            SyncEvent::StateChanged(SyncState::Loaded),
        ]
        .into_iter()
        .map(|event| bus.publish(event).sequence)
        .collect();

        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn publish_fans_out_to_topic_and_global_subscribers() {
        let bus = SyncEventBus::default();
        let mut topic_subscriber = bus.subscribe(SyncEventTopic::StateChanged);
        let mut global_subscriber = bus.subscribe_all();

        let published = bus.publish(SyncEvent::StateChanged(SyncState::Loaded));

        let topic_envelope = timeout(TEST_TIMEOUT, topic_subscriber.recv())
            .await
            .expect("topic recv timed out")
            .expect("topic recv should succeed");
        let global_envelope = timeout(TEST_TIMEOUT, global_subscriber.recv())
            .await
            .expect("global recv timed out")
            .expect("global recv should succeed");

        assert_eq!(topic_envelope, published);
        assert_eq!(global_envelope, published);
    }

    #[tokio::test]
    async fn topic_subscriptions_only_receive_matching_events() {
        let bus = SyncEventBus::default();
        let mut notices = bus.subscribe(SyncEventTopic::Notices);
        let mut states = bus.subscribe(SyncEventTopic::StateChanged);

        let state_event = bus.publish(SyncEvent::StateChanged(SyncState::IsAnalyzing));
        let notice_event = bus.publish(SyncEvent::Notice(Notice::info("done")));

        let received_notice = timeout(TEST_TIMEOUT, notices.recv())
            .await
            .expect("notice recv timed out")
            .expect("notice recv should succeed");
        let received_state = timeout(TEST_TIMEOUT, states.recv())
            .await
            .expect("state recv timed out")
            .expect("state recv should succeed");

        assert_eq!(received_notice, notice_event);
        assert_eq!(received_state, state_event);
        assert!(matches!(states.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn dropping_a_receiver_unsubscribes() {
        let bus = SyncEventBus::default();
        let receiver = bus.subscribe(SyncEventTopic::PullRequests);
        assert_eq!(bus.receiver_count(SyncEventTopic::PullRequests), 1);

        drop(receiver);

        assert_eq!(bus.receiver_count(SyncEventTopic::PullRequests), 0);
    }

    #[tokio::test]
    async fn slow_observer_sees_lag_then_the_newest_state() {
        let bus = SyncEventBus::new(SyncEventBusConfig {
            topic_buffer_capacity: 1,
            global_buffer_capacity: 1,
        });
        let mut observer = bus.subscribe_all();

        let _ = bus.publish(SyncEvent::StateChanged(SyncState::Initializing));
        let _ = bus.publish(SyncEvent::StateChanged(SyncState::IsAnalyzing));
        let newest = bus.publish(SyncEvent::StateChanged(SyncState::Loaded));

        assert!(matches!(
            observer.recv().await,
            Err(RecvError::Lagged(skipped)) if skipped == 2
        ));
        let caught_up = timeout(TEST_TIMEOUT, observer.recv())
            .await
            .expect("observer recv timed out")
            .expect("observer recv should succeed");
        assert_eq!(caught_up, newest);
    }
}
