//! Sync lifecycle events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::MemoryId;

/// Types of sync events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventType {
    SnapSyncStarted,
    SnapSynced,
    SnapSyncFailed,
    SnapDeleted,
    PullCompleted,
}

/// A sync event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    #[serde(rename = "type")]
    pub event_type: SyncEventType,
    pub timestamp: DateTime<Utc>,
    pub memory_id: Option<MemoryId>,
    pub remote_id: Option<String>,
    /// Additional data
    pub data: Option<serde_json::Value>,
}

impl SyncEvent {
    fn new(event_type: SyncEventType, memory_id: Option<MemoryId>) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            memory_id,
            remote_id: None,
            data: None,
        }
    }

    pub fn snap_sync_started(memory_id: MemoryId, task: &str) -> Self {
        let mut event = Self::new(SyncEventType::SnapSyncStarted, Some(memory_id));
        event.data = Some(serde_json::json!({ "task": task }));
        event
    }

    pub fn snap_synced(memory_id: MemoryId, remote_id: &str) -> Self {
        let mut event = Self::new(SyncEventType::SnapSynced, Some(memory_id));
        event.remote_id = Some(remote_id.to_string());
        event
    }

    pub fn snap_sync_failed(memory_id: Option<MemoryId>, task: &str, error: &str) -> Self {
        let mut event = Self::new(SyncEventType::SnapSyncFailed, memory_id);
        event.data = Some(serde_json::json!({
            "task": task,
            "error": error,
        }));
        event
    }

    pub fn snap_deleted(memory_id: MemoryId, remote_id: Option<&str>) -> Self {
        let mut event = Self::new(SyncEventType::SnapDeleted, Some(memory_id));
        event.remote_id = remote_id.map(String::from);
        event
    }

    pub fn pull_completed(user_id: &str, report: &super::merge::MergeReport) -> Self {
        let mut event = Self::new(SyncEventType::PullCompleted, None);
        event.data = Some(serde_json::json!({
            "user_id": user_id,
            "inserted": report.inserted,
            "overwritten": report.overwritten,
            "kept_local": report.kept_local,
        }));
        event
    }
}

/// Fan-out of sync events to any number of listeners
#[derive(Debug, Clone)]
pub struct SyncEventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl Default for SyncEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl SyncEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; having no listeners is fine
    pub fn publish(&self, event: SyncEvent) {
        tracing::trace!("Sync event {:?} for {:?}", event.event_type, event.memory_id);
        let _ = self.sender.send(event);
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = SyncEventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(SyncEvent::snap_synced(3, "r-3"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, SyncEventType::SnapSynced);
        assert_eq!(event.memory_id, Some(3));
        assert_eq!(event.remote_id.as_deref(), Some("r-3"));
    }

    #[test]
    fn test_publish_without_listeners() {
        let bus = SyncEventBus::new(4);
        assert_eq!(bus.listener_count(), 0);
        bus.publish(SyncEvent::snap_deleted(1, None));
    }

    #[test]
    fn test_event_json_shape() {
        let event = SyncEvent::snap_sync_failed(Some(2), "create_memory(2)", "boom");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "snap_sync_failed");
        assert_eq!(json["data"]["error"], "boom");
    }
}
