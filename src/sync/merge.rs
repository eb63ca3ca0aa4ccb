//! Last-writer-wins merge of pulled rows

use serde::{Deserialize, Serialize};

use super::remote::RemoteMemory;
use crate::types::{Memory, MemoryId, SyncState};

/// What to do with one remote row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeDecision {
    /// No local row carries the remote id
    Insert,
    /// Remote is newer and the local row has nothing unsynced
    Overwrite(MemoryId),
    /// Local row is at least as new, or holds unsynced edits
    KeepLocal(MemoryId),
}

/// Decide how to merge a remote row into the local store.
///
/// Only `Synced` rows are overwritten. `Pending` and `Failed` rows keep their
/// edits for the queued push; a `Syncing` row is mid-push.
pub fn decide(local: Option<&Memory>, remote: &RemoteMemory) -> MergeDecision {
    match local {
        None => MergeDecision::Insert,
        Some(local) if local.sync_state != SyncState::Synced => MergeDecision::KeepLocal(local.id),
        Some(local) if remote.updated_at > local.updated_at => MergeDecision::Overwrite(local.id),
        Some(local) => MergeDecision::KeepLocal(local.id),
    }
}

/// Counts from one pull
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub inserted: usize,
    pub overwritten: usize,
    pub kept_local: usize,
}

impl MergeReport {
    pub fn record(&mut self, decision: MergeDecision) {
        match decision {
            MergeDecision::Insert => self.inserted += 1,
            MergeDecision::Overwrite(_) => self.overwritten += 1,
            MergeDecision::KeepLocal(_) => self.kept_local += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.overwritten + self.kept_local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Mood;
    use chrono::{Duration, TimeZone, Utc};

    fn local(state: SyncState, minutes: i64) -> Memory {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        Memory {
            id: 1,
            owner_id: "u1".into(),
            title: "local".into(),
            description: String::new(),
            created_at: base,
            updated_at: base + Duration::minutes(minutes),
            mood: Mood::Calm,
            photo_uri: None,
            audio_uri: None,
            location: None,
            is_favorite: false,
            media_size_bytes: 0,
            sync_state: state,
            retry_count: 0,
            remote_id: Some("r1".into()),
            remote_photo_path: None,
            remote_audio_path: None,
            last_sync_error: None,
            synced_at: None,
        }
    }

    fn remote(minutes: i64) -> RemoteMemory {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        RemoteMemory {
            id: "r1".into(),
            user_id: "u1".into(),
            title: "remote".into(),
            description: String::new(),
            mood: Mood::Happy,
            photo_path: None,
            audio_path: None,
            latitude: None,
            longitude: None,
            location_name: None,
            is_favorite: true,
            media_size_bytes: 0,
            created_at: base,
            updated_at: base + Duration::minutes(minutes),
        }
    }

    #[test]
    fn test_decisions() {
        assert_eq!(decide(None, &remote(0)), MergeDecision::Insert);
        assert_eq!(
            decide(Some(&local(SyncState::Synced, 0)), &remote(5)),
            MergeDecision::Overwrite(1)
        );
        assert_eq!(
            decide(Some(&local(SyncState::Synced, 5)), &remote(5)),
            MergeDecision::KeepLocal(1)
        );
        assert_eq!(
            decide(Some(&local(SyncState::Pending, 0)), &remote(60)),
            MergeDecision::KeepLocal(1)
        );
        assert_eq!(
            decide(Some(&local(SyncState::Failed, 0)), &remote(60)),
            MergeDecision::KeepLocal(1)
        );
        assert_eq!(
            decide(Some(&local(SyncState::Syncing, 0)), &remote(60)),
            MergeDecision::KeepLocal(1)
        );
    }

    #[test]
    fn test_report() {
        let mut report = MergeReport::default();
        report.record(MergeDecision::Insert);
        report.record(MergeDecision::KeepLocal(2));
        assert_eq!(report.total(), 2);
        assert_eq!(report.inserted, 1);
    }
}
