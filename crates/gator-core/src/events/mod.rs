//! The per-mission event bus driving SSE status updates.
//!
//! Each mission gets its own broadcast topic. Publishers post a
//! [`MissionEvent`]; subscribers drain it as a stream, each with its own
//! cooperative receiver (a dropped subscriber simply stops receiving,
//! `tokio::sync::broadcast`'s lagging-receiver semantics notwithstanding).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum MissionEvent {
    #[serde(rename = "mission.status")]
    MissionStatus { mission_id: String, status: String },
    #[serde(rename = "mission.failed")]
    MissionFailed { mission_id: String, errors: Vec<String> },
    #[serde(rename = "task.status")]
    TaskStatus { mission_id: String, task_id: String, status: String },
    #[serde(rename = "task.failed")]
    TaskFailed { mission_id: String, task_id: String, reason: String },
    #[serde(rename = "quality_gate.denied")]
    QualityGateDenied { mission_id: String, task_id: String, reason: String },
    #[serde(rename = "wave.completed")]
    WaveCompleted { mission_id: String, wave_count: u32, admitted: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: MissionEvent,
    pub published_at: DateTime<Utc>,
}

/// Many publishers, many subscribers, one topic per mission id. Topics are
/// created lazily on first publish or subscribe and removed explicitly via
/// [`EventBus::clear_mission`].
#[derive(Default)]
pub struct EventBus {
    topics: Mutex<HashMap<String, broadcast::Sender<PublishedEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, mission_id: &str) -> broadcast::Sender<PublishedEvent> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(mission_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub fn publish(&self, mission_id: &str, event: MissionEvent) {
        let sender = self.topic(mission_id);
        // No subscribers is not an error: events published before the first
        // SSE client connects are simply dropped, matching an at-most-once,
        // best-effort event bus.
        let _ = sender.send(PublishedEvent {
            event,
            published_at: Utc::now(),
        });
    }

    pub fn subscribe(&self, mission_id: &str) -> impl Stream<Item = PublishedEvent> + Send + 'static {
        let receiver = self.topic(mission_id).subscribe();
        BroadcastStream::new(receiver).filter_map(|r| r.ok())
    }

    /// Remove a mission's topic entirely; any live subscribers see their
    /// stream end.
    pub fn clear_mission(&self, mission_id: &str) {
        self.topics.lock().unwrap_or_else(|e| e.into_inner()).remove(mission_id);
    }

    pub fn subscriber_count(&self, mission_id: &str) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(mission_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut stream = Box::pin(bus.subscribe("mission-1"));

        bus.publish(
            "mission-1",
            MissionEvent::MissionStatus {
                mission_id: "mission-1".to_string(),
                status: "EXECUTING".to_string(),
            },
        );

        let received = stream.next().await.unwrap();
        match received.event {
            MissionEvent::MissionStatus { status, .. } => assert_eq!(status, "EXECUTING"),
            _ => panic!("wrong event variant"),
        }
    }

    #[tokio::test]
    async fn events_delivered_in_publish_order() {
        let bus = EventBus::new();
        let mut stream = Box::pin(bus.subscribe("mission-1"));

        for i in 0..3 {
            bus.publish(
                "mission-1",
                MissionEvent::WaveCompleted {
                    mission_id: "mission-1".to_string(),
                    wave_count: i,
                    admitted: vec![],
                },
            );
        }

        for expected in 0..3 {
            let received = stream.next().await.unwrap();
            match received.event {
                MissionEvent::WaveCompleted { wave_count, .. } => assert_eq!(wave_count, expected),
                _ => panic!("wrong variant"),
            }
        }
    }

    #[tokio::test]
    async fn missions_have_independent_topics() {
        let bus = EventBus::new();
        let mut stream_a = Box::pin(bus.subscribe("mission-a"));
        let _stream_b = Box::pin(bus.subscribe("mission-b"));

        bus.publish(
            "mission-a",
            MissionEvent::MissionStatus {
                mission_id: "mission-a".to_string(),
                status: "EXECUTING".to_string(),
            },
        );

        let received = stream_a.next().await.unwrap();
        match received.event {
            MissionEvent::MissionStatus { mission_id, .. } => assert_eq!(mission_id, "mission-a"),
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn clear_mission_ends_subscriber_stream() {
        let bus = EventBus::new();
        let mut stream = Box::pin(bus.subscribe("mission-1"));
        bus.clear_mission("mission-1");

        bus.publish(
            "mission-1",
            MissionEvent::MissionStatus {
                mission_id: "mission-1".to_string(),
                status: "EXECUTING".to_string(),
            },
        );

        // The old receiver's sender was dropped along with the old topic,
        // so its stream ends rather than observing the new topic's event.
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn subscriber_count_reflects_live_subscriptions() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count("mission-1"), 0);
        let _s1 = bus.subscribe("mission-1");
        assert_eq!(bus.subscriber_count("mission-1"), 1);
    }
}
