//! Event stream publisher
//!
//! One writer (the orchestration loop) publishes [`Event`]s over a
//! `tokio::sync::broadcast` channel; any number of subscribers read them in
//! publication order. Publishing never waits. A subscriber that falls more
//! than the channel capacity behind loses its oldest events and counts them.
//!
//! The trajectory is the authoritative record of a run. The stream is a
//! best-effort view of it for UIs and log sinks.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Kind of loop event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Thought,
    Action,
    Observation,
    ConfirmationRequested,
    Error,
    FinalAnswer,

    /// Any kind this build does not know about; consumers skip it
    #[serde(other)]
    Unknown,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Thought => "thought",
            Self::Action => "action",
            Self::Observation => "observation",
            Self::ConfirmationRequested => "confirmation_requested",
            Self::Error => "error",
            Self::FinalAnswer => "final_answer",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A single published event. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub kind: EventKind,
    pub step_index: usize,
    pub payload: String,
}

impl Event {
    pub fn new(kind: EventKind, step_index: usize, payload: impl Into<String>) -> Self {
        Self {
            kind,
            step_index,
            payload: payload.into(),
        }
    }
}

/// Fan-out publisher; closing drops the sender so streams end once drained.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: Arc<Mutex<Option<broadcast::Sender<Event>>>>,
}

impl EventPublisher {
    /// Create a publisher whose subscribers buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<broadcast::Sender<Event>>> {
        self.sender.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a new subscriber.
    ///
    /// The subscriber sees every event published from now on. Subscribing
    /// after [`close`](Self::close) yields an already-finished stream.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender().as_ref().map(broadcast::Sender::subscribe),
            dropped: 0,
        }
    }

    /// Publish an event to every subscriber without waiting.
    pub fn publish(&self, event: Event) {
        let sender = self.sender();
        let Some(sender) = sender.as_ref() else {
            warn!("Event published after close: {:?}", event.kind);
            return;
        };

        debug!(
            "Publishing {} for step {} to {} subscribers",
            event.kind,
            event.step_index,
            sender.receiver_count()
        );
        // No receivers is not an error; the trajectory keeps the record
        let _ = sender.send(event);
    }

    /// End every subscription once its buffered events are drained.
    pub fn close(&self) {
        self.sender().take();
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

/// One subscriber's view of a run's events.
///
/// Finite: ends after the publisher closes and the buffer drains. Not
/// restartable.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: Option<broadcast::Receiver<Event>>,
    dropped: u64,
}

impl EventSubscription {
    /// Wait for the next event; `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.as_mut()?.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!("Event subscriber lagged, {} events dropped", missed);
                    self.dropped += missed;
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Events this subscriber lost by falling behind, counted as they are
    /// skipped
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Adapt into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_subscriber_receives_in_order() {
        let publisher = EventPublisher::new(16);
        let mut sub = publisher.subscribe();

        publisher.publish(Event::new(EventKind::Thought, 0, "think"));
        publisher.publish(Event::new(EventKind::Action, 0, "act"));
        publisher.publish(Event::new(EventKind::Observation, 0, "see"));
        publisher.close();

        let kinds: Vec<EventKind> = sub_kinds(&mut sub).await;
        assert_eq!(
            kinds,
            vec![EventKind::Thought, EventKind::Action, EventKind::Observation]
        );
    }

    async fn sub_kinds(sub: &mut EventSubscription) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Some(event) = sub.next().await {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let publisher = EventPublisher::new(2);
        let mut sub = publisher.subscribe();

        for i in 0..5 {
            publisher.publish(Event::new(EventKind::Observation, i, format!("{i}")));
        }
        publisher.close();

        assert_eq!(sub.next().await.unwrap().step_index, 3);
        assert_eq!(sub.dropped(), 3);
        assert_eq!(sub.next().await.unwrap().step_index, 4);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_get_everything() {
        let publisher = EventPublisher::new(8);
        let a = publisher.subscribe().into_stream();
        let b = publisher.subscribe().into_stream();
        assert_eq!(publisher.subscriber_count(), 2);

        publisher.publish(Event::new(EventKind::Thought, 0, "x"));
        publisher.publish(Event::new(EventKind::FinalAnswer, 0, "done"));
        publisher.close();

        let a: Vec<Event> = a.collect().await;
        let b: Vec<Event> = b.collect().await;
        assert_eq!(a.len(), 2);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_waiting_subscriber_wakes_on_publish() {
        let publisher = EventPublisher::new(4);
        let mut sub = publisher.subscribe();

        let writer = publisher.clone();
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            writer.publish(Event::new(EventKind::Error, 2, "boom"));
        });

        let event = sub.next().await.unwrap();
        assert_eq!(event.kind, EventKind::Error);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_empty_stream() {
        let publisher = EventPublisher::new(4);
        publisher.publish(Event::new(EventKind::Thought, 0, "early"));
        publisher.close();

        let mut late = publisher.subscribe();
        assert!(late.next().await.is_none());
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_harmless() {
        let publisher = EventPublisher::new(4);
        publisher.publish(Event::new(EventKind::Thought, 0, "nobody listens"));

        let mut sub = publisher.subscribe();
        publisher.publish(Event::new(EventKind::FinalAnswer, 0, "done"));
        publisher.close();

        assert_eq!(sub.next().await.unwrap().payload, "done");
        assert!(sub.next().await.is_none());
        assert_eq!(sub.dropped(), 0);
    }

    #[test]
    fn test_unknown_kind_deserializes() {
        let event: Event =
            serde_json::from_str(r#"{"kind":"tool_progress","stepIndex":1,"payload":"50%"}"#)
                .unwrap();
        assert_eq!(event.kind, EventKind::Unknown);

        let json = serde_json::to_string(&Event::new(EventKind::FinalAnswer, 3, "ok")).unwrap();
        assert!(json.contains(r#""kind":"final_answer""#));
        assert!(json.contains(r#""stepIndex":3"#));
    }
}
