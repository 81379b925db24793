use std::ops::BitOr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Bitmask of entity types a watcher is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatcherType(u8);

impl WatcherType {
    pub const JOB: WatcherType = WatcherType(1);
    pub const EXECUTION: WatcherType = WatcherType(1 << 1);
    pub const EVALUATION: WatcherType = WatcherType(1 << 2);
    pub const ALL: WatcherType = WatcherType(0b111);

    pub fn contains(self, other: WatcherType) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for WatcherType {
    type Output = WatcherType;

    fn bitor(self, rhs: Self) -> Self::Output {
        WatcherType(self.0 | rhs.0)
    }
}

/// Bitmask of store events a watcher is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(u8);

impl EventType {
    pub const CREATE: EventType = EventType(1);
    pub const UPDATE: EventType = EventType(1 << 1);
    pub const DELETE: EventType = EventType(1 << 2);
    pub const ALL: EventType = EventType(0b111);

    pub fn contains(self, other: EventType) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EventType {
    type Output = EventType;

    fn bitor(self, rhs: Self) -> Self::Output {
        EventType(self.0 | rhs.0)
    }
}

/// A change notification; `object` is the JSON encoding of the entity after
/// the change (before it, for deletes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub timestamp: DateTime<Utc>,
    pub entity_type: WatcherType,
    pub event_type: EventType,
    pub object: Vec<u8>,
}

impl WatchEvent {
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.object)
    }
}

pub type WatchStream = ReceiverStream<WatchEvent>;

struct Watcher {
    types: WatcherType,
    events: EventType,
    tx: mpsc::Sender<WatchEvent>,
}

/// Fan-out of store events to filtered subscribers.
pub(crate) struct WatcherRegistry {
    watchers: Vec<Watcher>,
    capacity: usize,
}

impl WatcherRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            watchers: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn register(&mut self, types: WatcherType, events: EventType) -> WatchStream {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.watchers.push(Watcher { types, events, tx });
        ReceiverStream::new(rx)
    }

    pub(crate) fn publish<T: Serialize>(
        &mut self,
        entity_type: WatcherType,
        event_type: EventType,
        object: &T,
    ) {
        self.watchers.retain(|w| !w.tx.is_closed());
        if !self
            .watchers
            .iter()
            .any(|w| w.types.contains(entity_type) && w.events.contains(event_type))
        {
            return;
        }

        let object = match serde_json::to_vec(object) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode watch event");
                return;
            }
        };
        let event = WatchEvent {
            timestamp: Utc::now(),
            entity_type,
            event_type,
            object,
        };

        for watcher in &self.watchers {
            if !watcher.types.contains(entity_type) || !watcher.events.contains(event_type) {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = watcher.tx.try_send(event.clone()) {
                tracing::warn!("Watcher is lagging, dropping store event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn test_masks() {
        let types = WatcherType::JOB | WatcherType::EXECUTION;
        assert!(types.contains(WatcherType::JOB));
        assert!(types.contains(WatcherType::EXECUTION));
        assert!(!types.contains(WatcherType::EVALUATION));
        assert!(WatcherType::ALL.contains(WatcherType::EVALUATION));

        let events = EventType::CREATE | EventType::DELETE;
        assert!(events.contains(EventType::DELETE));
        assert!(!events.contains(EventType::UPDATE));
    }

    #[tokio::test]
    async fn test_publish_filters_by_mask() {
        let mut registry = WatcherRegistry::new(8);
        let mut jobs = registry.register(WatcherType::JOB, EventType::ALL);
        let mut creates = registry.register(WatcherType::ALL, EventType::CREATE);

        registry.publish(WatcherType::JOB, EventType::UPDATE, &"job-1");
        registry.publish(WatcherType::EXECUTION, EventType::CREATE, &"exec-1");

        let event = jobs.next().await.unwrap();
        assert_eq!(event.entity_type, WatcherType::JOB);
        assert_eq!(event.decode::<String>().unwrap(), "job-1");

        let event = creates.next().await.unwrap();
        assert_eq!(event.entity_type, WatcherType::EXECUTION);
        assert_eq!(event.decode::<String>().unwrap(), "exec-1");
    }

    #[test]
    fn test_closed_watchers_are_dropped() {
        let mut registry = WatcherRegistry::new(8);
        let stream = registry.register(WatcherType::ALL, EventType::ALL);
        drop(stream);
        registry.publish(WatcherType::JOB, EventType::CREATE, &"job");
        assert!(registry.watchers.is_empty());
    }
}
