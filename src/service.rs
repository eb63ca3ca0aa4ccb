//! Local memory operations that queue their own sync work
//!
//! Every mutation and its sync task commit in one transaction, so a crash can
//! never leave a change without a task (or a task without its change).

use std::sync::Arc;

use crate::access::{actions, AccessGuard, CapacityCheck, CapacityDecision, CapacityGuard};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SoulSnapsError};
use crate::storage::queries::{self, ListOptions};
use crate::storage::Storage;
use crate::sync::{enqueue_with, SyncTask};
use crate::types::{
    CreateMemoryInput, Memory, MemoryId, SyncStatus, UpdateMemoryInput, UsageSnapshot,
};

pub struct MemoryService {
    storage: Storage,
    clock: Arc<dyn Clock>,
    capacity: Option<Arc<CapacityGuard>>,
}

impl MemoryService {
    /// Service without entitlement checks
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
            capacity: None,
        }
    }

    /// Check plans and quotas before each mutation
    pub fn with_capacity_guard(mut self, capacity: Arc<CapacityGuard>) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn access(&self) -> Option<&AccessGuard> {
        self.capacity.as_deref().map(|c| c.access())
    }

    fn require(&self, user_id: &str, action: &str) -> Result<()> {
        if let Some(access) = self.access() {
            let result = access.allow_action(user_id, action, None, None)?;
            if !result.allowed {
                return Err(SoulSnapsError::AccessDenied(
                    result
                        .message
                        .unwrap_or_else(|| format!("{} is not allowed", action)),
                ));
            }
        }
        Ok(())
    }

    /// Scopes needed to attach media or a location
    fn require_attachments(
        &self,
        user_id: &str,
        photo: bool,
        audio: bool,
        location: bool,
    ) -> Result<()> {
        let wanted = [
            (photo, actions::MEDIA_PHOTO),
            (audio, actions::MEDIA_AUDIO),
            (location, actions::LOCATION_TAG),
        ];
        for (needed, action) in wanted {
            if needed {
                self.require(user_id, action)?;
            }
        }
        Ok(())
    }

    fn deny_capacity(user_id: &str, check: &CapacityCheck) -> SoulSnapsError {
        tracing::info!("Rejected memory for {}: {:?}", user_id, check.reason);
        SoulSnapsError::AccessDenied(
            check
                .message
                .clone()
                .unwrap_or_else(|| "not enough capacity".to_string()),
        )
    }

    /// Input is validated and attachment scopes checked before the daily
    /// quota is spent.
    pub fn create(&self, input: CreateMemoryInput) -> Result<Memory> {
        queries::validate_new_memory(&input)?;
        self.require_attachments(
            &input.owner_id,
            input.photo_uri.is_some(),
            input.audio_uri.is_some(),
            input.location.is_some(),
        )?;

        if let Some(capacity) = &self.capacity {
            match capacity.allow_memory_creation(&input.owner_id, input.media_size_bytes)? {
                CapacityDecision::Allowed(_) => {}
                CapacityDecision::CapacityDenied(check) => {
                    return Err(Self::deny_capacity(&input.owner_id, &check));
                }
                CapacityDecision::AccessDenied(result) => {
                    return Err(SoulSnapsError::AccessDenied(result.message.unwrap_or_else(
                        || "memory capture is not allowed".to_string(),
                    )));
                }
            }
        }

        let now = self.clock.now();
        let memory = self.storage.with_transaction(|conn| {
            let memory = queries::create_memory(conn, &input, now)?;
            enqueue_with(
                conn,
                &SyncTask::CreateMemory {
                    memory_id: memory.id,
                },
                now,
            )?;
            Ok(memory)
        })?;

        tracing::info!("Captured memory {} for {}", memory.id, memory.owner_id);
        Ok(memory)
    }

    pub fn get(&self, id: MemoryId) -> Result<Memory> {
        self.storage
            .with_connection(|conn| queries::get_memory(conn, id))
    }

    pub fn list(&self, owner_id: &str, options: &ListOptions) -> Result<Vec<Memory>> {
        self.storage
            .with_connection(|conn| queries::list_memories(conn, owner_id, options))
    }

    /// Apply an edit. An empty edit changes nothing and queues nothing.
    pub fn update(&self, id: MemoryId, input: UpdateMemoryInput) -> Result<Memory> {
        let current = self.get(id)?;
        if input.is_empty() {
            return Ok(current);
        }
        self.require(&current.owner_id, actions::MEMORY_UPDATE)?;
        // clearing an attachment needs no scope
        self.require_attachments(
            &current.owner_id,
            matches!(input.photo_uri, Some(Some(_))),
            matches!(input.audio_uri, Some(Some(_))),
            matches!(input.location, Some(Some(_))),
        )?;
        if let (Some(capacity), Some(new_bytes)) = (&self.capacity, input.media_size_bytes) {
            if new_bytes > current.media_size_bytes {
                let check = capacity.check_media_growth(
                    &current.owner_id,
                    current.media_size_bytes,
                    new_bytes,
                )?;
                if !check.allowed {
                    return Err(Self::deny_capacity(&current.owner_id, &check));
                }
            }
        }

        if input.touches_media() {
            tracing::debug!("Media of memory {} changed, it will be re-uploaded", id);
        }

        let now = self.clock.now();
        self.storage.with_transaction(|conn| {
            let memory = queries::update_memory(conn, id, &input, now)?;
            enqueue_with(conn, &SyncTask::UpdateMemory { memory_id: id }, now)?;
            Ok(memory)
        })
    }

    pub fn set_favorite(&self, id: MemoryId, is_favorite: bool) -> Result<Memory> {
        let current = self.get(id)?;
        self.require(&current.owner_id, actions::MEMORY_FAVORITE)?;

        let now = self.clock.now();
        self.storage.with_transaction(|conn| {
            let memory = queries::set_favorite(conn, id, is_favorite, now)?;
            enqueue_with(
                conn,
                &SyncTask::ToggleFavorite {
                    memory_id: id,
                    is_favorite,
                },
                now,
            )?;
            Ok(memory)
        })
    }

    /// Delete locally and queue removal of the remote row and media
    pub fn delete(&self, id: MemoryId) -> Result<Memory> {
        let current = self.get(id)?;
        self.require(&current.owner_id, actions::MEMORY_DELETE)?;

        let now = self.clock.now();
        let removed = self.storage.with_transaction(|conn| {
            let removed = queries::delete_memory(conn, id)?;
            enqueue_with(
                conn,
                &SyncTask::DeleteMemory {
                    memory_id: id,
                    remote_id: removed.remote_id.clone(),
                    remote_photo_path: removed.remote_photo_path.clone(),
                    remote_audio_path: removed.remote_audio_path.clone(),
                },
                now,
            )?;
            Ok(removed)
        })?;

        tracing::info!("Deleted memory {}", id);
        Ok(removed)
    }

    /// Queue a full pull of the user's remote rows
    pub fn request_pull(&self, user_id: &str) -> Result<i64> {
        let now = self.clock.now();
        self.storage.with_connection(|conn| {
            enqueue_with(
                conn,
                &SyncTask::PullAll {
                    user_id: user_id.to_string(),
                },
                now,
            )
        })
    }

    pub fn usage(&self, owner_id: &str) -> Result<UsageSnapshot> {
        self.storage
            .with_connection(|conn| queries::usage_for_owner(conn, owner_id))
    }

    pub fn sync_status(&self, max_attempts: u32) -> Result<SyncStatus> {
        self.storage
            .with_connection(|conn| queries::sync_status(conn, max_attempts))
    }
}
