//! Units of sync work

use serde::{Deserialize, Serialize};

use crate::types::MemoryId;

/// Work item persisted in the sync queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncTask {
    CreateMemory {
        memory_id: MemoryId,
    },
    UpdateMemory {
        memory_id: MemoryId,
    },
    ToggleFavorite {
        memory_id: MemoryId,
        is_favorite: bool,
    },
    /// Carries the remote identifiers since the local row is already gone
    DeleteMemory {
        memory_id: MemoryId,
        remote_id: Option<String>,
        remote_photo_path: Option<String>,
        remote_audio_path: Option<String>,
    },
    PullAll {
        user_id: String,
    },
}

impl SyncTask {
    /// Short name stored alongside the task for filtering
    pub fn kind(&self) -> &'static str {
        match self {
            SyncTask::CreateMemory { .. } => "create_memory",
            SyncTask::UpdateMemory { .. } => "update_memory",
            SyncTask::ToggleFavorite { .. } => "toggle_favorite",
            SyncTask::DeleteMemory { .. } => "delete_memory",
            SyncTask::PullAll { .. } => "pull_all",
        }
    }

    pub fn memory_id(&self) -> Option<MemoryId> {
        match self {
            SyncTask::CreateMemory { memory_id }
            | SyncTask::UpdateMemory { memory_id }
            | SyncTask::ToggleFavorite { memory_id, .. }
            | SyncTask::DeleteMemory { memory_id, .. } => Some(*memory_id),
            SyncTask::PullAll { .. } => None,
        }
    }
}

impl std::fmt::Display for SyncTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncTask::PullAll { user_id } => write!(f, "pull_all({})", user_id),
            other => match other.memory_id() {
                Some(id) => write!(f, "{}({})", other.kind(), id),
                None => write!(f, "{}", other.kind()),
            },
        }
    }
}
