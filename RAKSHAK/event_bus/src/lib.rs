#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Safety event bus abstractions used to fan guardian events out to observers.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::broadcast};

/// Safety event encoded as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyEvent {
    /// Unique identifier.
    pub id: String,
    /// Component producing the event.
    pub source: String,
    /// Event type (e.g. `guardian.incident.recorded`).
    pub event_type: String,
    /// Vehicle the event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    /// RFC3339 timestamp.
    pub timestamp: String,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Event publisher interface.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes an event to the bus.
    async fn publish(&self, event: SafetyEvent) -> Result<()>;
}

/// Event subscriber interface.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Returns a receiver that observes every event published after the call.
    async fn subscribe(&self) -> Result<broadcast::Receiver<SafetyEvent>>;
}

/// In-memory broadcast bus with a bounded backlog.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<SafetyEvent>,
    backlog: Arc<Mutex<VecDeque<SafetyEvent>>>,
    capacity: usize,
}

impl MemoryEventBus {
    /// Creates a new bus retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Snapshot of retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SafetyEvent> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Retained events concerning a single vehicle.
    #[must_use]
    pub fn events_for(&self, vehicle_id: &str) -> Vec<SafetyEvent> {
        self.backlog
            .lock()
            .iter()
            .filter(|event| event.vehicle_id.as_deref() == Some(vehicle_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: SafetyEvent) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            if backlog.len() == self.capacity {
                backlog.pop_front();
            }
            backlog.push_back(event.clone());
        }
        // No subscribers is not an error for a fire-and-forget bus.
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for MemoryEventBus {
    async fn subscribe(&self) -> Result<broadcast::Receiver<SafetyEvent>> {
        Ok(self.sender.subscribe())
    }
}

/// File-backed publisher appending one JSON document per line.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Creates a publisher that appends JSON lines to the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Target file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, event: SafetyEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut data = serde_json::to_vec(&event)?;
        data.push(b'\n');
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_event(vehicle: &str) -> SafetyEvent {
        SafetyEvent {
            id: "evt-1".into(),
            source: "guardian".into(),
            event_type: "guardian.alert.issued".into(),
            vehicle_id: Some(vehicle.into()),
            timestamp: "2026-10-18T00:00:00Z".into(),
            payload: serde_json::json!({ "severity": "high" }),
        }
    }

    #[tokio::test]
    async fn publishes_and_receives() {
        let bus = MemoryEventBus::new(16);
        let mut rx = bus.subscribe().await.unwrap();
        bus.publish(sample_event("BUS-7")).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "guardian.alert.issued");
        assert_eq!(bus.events_for("BUS-7").len(), 1);
        assert!(bus.events_for("BUS-8").is_empty());
    }

    #[tokio::test]
    async fn backlog_is_bounded() {
        let bus = MemoryEventBus::new(2);
        for vehicle in ["A", "B", "C"] {
            bus.publish(sample_event(vehicle)).await.unwrap();
        }
        let kept: Vec<_> = bus
            .snapshot()
            .into_iter()
            .filter_map(|e| e.vehicle_id)
            .collect();
        assert_eq!(kept, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn file_publisher_writes_events() {
        let dir = tempdir().unwrap();
        let publisher = FileEventPublisher::new(dir.path().join("events/guardian.jsonl")).unwrap();
        publisher.publish(sample_event("BUS-7")).await.unwrap();
        publisher.publish(sample_event("BUS-7")).await.unwrap();
        let content = std::fs::read_to_string(publisher.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("guardian.alert.issued"));
    }
}
