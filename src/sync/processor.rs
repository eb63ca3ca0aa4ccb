//! Executes sync tasks against the remote backends

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::events::{SyncEvent, SyncEventBus};
use super::merge::{decide, MergeDecision, MergeReport};
use super::queue::SyncQueue;
use super::remote::{ObjectStore, RemoteMemoryDraft, RemoteMemoryStore, AUDIO_BUCKET, IMAGE_BUCKET};
use super::task::SyncTask;
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SoulSnapsError};
use crate::storage::queries::{self, SyncWriteBack};
use crate::storage::Storage;
use crate::types::{Memory, MemoryId};

/// Bucket names for uploaded media
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaBuckets {
    pub photo: String,
    pub audio: String,
}

impl Default for MediaBuckets {
    fn default() -> Self {
        Self {
            photo: IMAGE_BUCKET.to_string(),
            audio: AUDIO_BUCKET.to_string(),
        }
    }
}

/// Result of one successfully processed task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Pushed {
        memory_id: MemoryId,
        remote_id: String,
    },
    Deleted {
        memory_id: MemoryId,
    },
    Pulled(MergeReport),
    /// The local row no longer exists
    Skipped,
}

/// Counts from one pass over the queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failures that used up the last attempt
    pub dead: usize,
}

#[derive(Clone, Copy)]
enum MediaKind {
    Photo,
    Audio,
}

impl MediaKind {
    fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Audio => "m4a",
        }
    }
}

pub struct SyncProcessor {
    storage: Storage,
    remote: Arc<dyn RemoteMemoryStore>,
    objects: Arc<dyn ObjectStore>,
    events: SyncEventBus,
    buckets: MediaBuckets,
    clock: Arc<dyn Clock>,
}

impl SyncProcessor {
    pub fn new(
        storage: Storage,
        remote: Arc<dyn RemoteMemoryStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            storage,
            remote,
            objects,
            events: SyncEventBus::default(),
            buckets: MediaBuckets::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_events(mut self, events: SyncEventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_buckets(mut self, buckets: MediaBuckets) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn events(&self) -> &SyncEventBus {
        &self.events
    }

    /// Run one task. On failure the local row is marked `FAILED`, a
    /// `SnapSyncFailed` event is published and the error is returned.
    pub async fn run(&self, task: &SyncTask) -> Result<SyncOutcome> {
        let result = match task {
            SyncTask::CreateMemory { memory_id }
            | SyncTask::UpdateMemory { memory_id }
            | SyncTask::ToggleFavorite { memory_id, .. } => self.push(*memory_id, task).await,
            SyncTask::DeleteMemory {
                memory_id,
                remote_id,
                remote_photo_path,
                remote_audio_path,
            } => {
                self.delete_remote(
                    *memory_id,
                    remote_id.as_deref(),
                    remote_photo_path.as_deref(),
                    remote_audio_path.as_deref(),
                )
                .await
            }
            SyncTask::PullAll { user_id } => self.pull_all(user_id).await.map(SyncOutcome::Pulled),
        };

        if let Err(e) = &result {
            self.record_failure(task, e);
        }
        result
    }

    /// Process every live entry currently in the queue once
    pub async fn drain(&self, queue: &SyncQueue, batch_size: usize) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        let mut after_id = 0;

        loop {
            let batch = queue.next_batch_after(after_id, batch_size.max(1))?;
            if batch.is_empty() {
                break;
            }

            for entry in batch {
                after_id = entry.id;
                report.processed += 1;
                match self.run(&entry.task).await {
                    Ok(_) => {
                        queue.complete(entry.id)?;
                        report.succeeded += 1;
                    }
                    Err(e) => {
                        report.failed += 1;
                        if queue.fail(entry.id, &e.to_string())? {
                            report.dead += 1;
                        }
                    }
                }
            }
        }

        if report.processed > 0 {
            tracing::info!(
                "Sync pass: {} processed, {} succeeded, {} failed",
                report.processed,
                report.succeeded,
                report.failed
            );
        }
        Ok(report)
    }

    async fn push(&self, memory_id: MemoryId, task: &SyncTask) -> Result<SyncOutcome> {
        let memory = match self
            .storage
            .with_connection(|conn| queries::find_memory(conn, memory_id))?
        {
            Some(memory) => memory,
            None => {
                tracing::debug!("Memory {} is gone, skipping {}", memory_id, task);
                return Ok(SyncOutcome::Skipped);
            }
        };

        self.storage
            .with_connection(|conn| queries::mark_syncing(conn, memory_id))?;
        self.events
            .publish(SyncEvent::snap_sync_started(memory_id, &task.to_string()));

        let remote_id = match (task, memory.remote_id.as_deref()) {
            // the row exists remotely, only the flag changes
            (SyncTask::ToggleFavorite { is_favorite, .. }, Some(remote_id)) => {
                self.remote
                    .set_favorite(remote_id, *is_favorite, memory.updated_at)
                    .await?;
                let write_back = SyncWriteBack {
                    remote_id: remote_id.to_string(),
                    remote_photo_path: memory.remote_photo_path.clone(),
                    remote_audio_path: memory.remote_audio_path.clone(),
                };
                // a concurrent delete carries this remote id in its own task
                self.finish_push(memory_id, &write_back)?;
                write_back.remote_id
            }
            _ => match self.push_full(&memory).await? {
                Some(remote_id) => remote_id,
                None => return Ok(SyncOutcome::Skipped),
            },
        };

        tracing::info!("Synced memory {} as {}", memory_id, remote_id);
        self.events
            .publish(SyncEvent::snap_synced(memory_id, &remote_id));
        Ok(SyncOutcome::Pushed {
            memory_id,
            remote_id,
        })
    }

    /// Upload pending media, then insert or update the row. Returns `None`
    /// when the local row was deleted mid-push and the remote copy was undone.
    async fn push_full(&self, memory: &Memory) -> Result<Option<String>> {
        let photo_path = match (&memory.photo_uri, &memory.remote_photo_path) {
            (Some(uri), None) => Some(self.upload_media(memory, uri, MediaKind::Photo).await?),
            (_, existing) => existing.clone(),
        };
        let audio_path = match (&memory.audio_uri, &memory.remote_audio_path) {
            (Some(uri), None) => Some(self.upload_media(memory, uri, MediaKind::Audio).await?),
            (_, existing) => existing.clone(),
        };

        let draft = RemoteMemoryDraft::from_memory(memory, photo_path.clone(), audio_path.clone());
        let remote_id = match &memory.remote_id {
            Some(remote_id) => {
                self.remote.update(remote_id, &draft).await?;
                remote_id.clone()
            }
            None => self.remote.insert(&draft).await?.id,
        };

        let write_back = SyncWriteBack {
            remote_id: remote_id.clone(),
            remote_photo_path: photo_path,
            remote_audio_path: audio_path,
        };
        if !self.finish_push(memory.id, &write_back)? {
            self.undo_push(memory.id, &write_back).await?;
            return Ok(None);
        }
        Ok(Some(remote_id))
    }

    /// `false` when the local row no longer exists
    fn finish_push(&self, memory_id: MemoryId, write_back: &SyncWriteBack) -> Result<bool> {
        let now = self.clock.now();
        self.storage
            .with_connection(|conn| queries::mark_synced(conn, memory_id, write_back, now))
    }

    /// The delete task queued mid-push could not see the remote row or the
    /// objects written by this push, so remove them here.
    async fn undo_push(&self, memory_id: MemoryId, write_back: &SyncWriteBack) -> Result<()> {
        tracing::info!(
            "Memory {} was deleted during its push, removing remote {}",
            memory_id,
            write_back.remote_id
        );
        self.delete_remote(
            memory_id,
            Some(&write_back.remote_id),
            write_back.remote_photo_path.as_deref(),
            write_back.remote_audio_path.as_deref(),
        )
        .await?;
        Ok(())
    }

    async fn upload_media(&self, memory: &Memory, uri: &str, kind: MediaKind) -> Result<String> {
        let local_path = uri.strip_prefix("file://").unwrap_or(uri);
        let data = tokio::fs::read(local_path).await.map_err(|e| {
            SoulSnapsError::Sync(format!("cannot read media {}: {}", local_path, e))
        })?;

        let extension = Path::new(local_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_else(|| kind.default_extension().to_string());
        let object_path = format!("{}/{}.{}", memory.owner_id, memory.id, extension);
        let bucket = match kind {
            MediaKind::Photo => &self.buckets.photo,
            MediaKind::Audio => &self.buckets.audio,
        };

        let size = data.len();
        self.objects
            .upload(bucket, &object_path, data, content_type_for(&extension))
            .await?;
        tracing::debug!("Uploaded {} bytes to {}/{}", size, bucket, object_path);

        // a retry after a failed row push skips this upload
        let (photo, audio) = match kind {
            MediaKind::Photo => (Some(object_path.as_str()), None),
            MediaKind::Audio => (None, Some(object_path.as_str())),
        };
        self.storage.with_connection(|conn| {
            queries::record_uploaded_media(conn, memory.id, photo, audio)
        })?;

        Ok(object_path)
    }

    async fn delete_remote(
        &self,
        memory_id: MemoryId,
        remote_id: Option<&str>,
        remote_photo_path: Option<&str>,
        remote_audio_path: Option<&str>,
    ) -> Result<SyncOutcome> {
        // media may have been uploaded before the row was ever pushed
        if let Some(path) = remote_photo_path {
            self.objects.delete(&self.buckets.photo, path).await?;
        }
        if let Some(path) = remote_audio_path {
            self.objects.delete(&self.buckets.audio, path).await?;
        }

        match remote_id {
            Some(remote_id) => {
                self.remote.delete(remote_id).await?;
                tracing::info!("Deleted remote memory {} ({})", remote_id, memory_id);
            }
            None => tracing::debug!("Memory {} was never synced, no row to delete", memory_id),
        }
        self.events
            .publish(SyncEvent::snap_deleted(memory_id, remote_id));
        Ok(SyncOutcome::Deleted { memory_id })
    }

    /// Merge every remote row of the user into the local store
    pub async fn pull_all(&self, user_id: &str) -> Result<MergeReport> {
        let rows = self.remote.list_for_user(user_id).await?;
        let now = self.clock.now();
        let mut report = MergeReport::default();

        for row in &rows {
            let decision = self.storage.with_transaction(|conn| {
                let local = queries::find_by_remote_id(conn, &row.id)?;
                let decision = decide(local.as_ref(), row);
                match decision {
                    MergeDecision::Insert => {
                        queries::insert_from_remote(conn, row, now)?;
                    }
                    MergeDecision::Overwrite(id) => {
                        queries::overwrite_from_remote(conn, id, row, now)?;
                    }
                    MergeDecision::KeepLocal(_) => {}
                }
                Ok(decision)
            })?;
            report.record(decision);
        }

        tracing::info!(
            "Pulled {} rows for {}: {} new, {} updated, {} kept",
            report.total(),
            user_id,
            report.inserted,
            report.overwritten,
            report.kept_local
        );
        self.events
            .publish(SyncEvent::pull_completed(user_id, &report));
        Ok(report)
    }

    fn record_failure(&self, task: &SyncTask, error: &SoulSnapsError) {
        let memory_id = task.memory_id();
        tracing::error!("Sync task {} failed: {}", task, error);

        // for deletes the row is already gone and this touches nothing
        if let Some(id) = memory_id {
            if let Err(e) = self
                .storage
                .with_connection(|conn| queries::mark_failed(conn, id, &error.to_string()))
            {
                tracing::error!("Could not mark memory {} as failed: {}", id, e);
            }
        }

        self.events.publish(SyncEvent::snap_sync_failed(
            memory_id,
            &task.to_string(),
            &error.to_string(),
        ));
    }
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "heic" => "image/heic",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "m4a" | "mp4" => "audio/mp4",
        "aac" => "audio/aac",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::events::SyncEventType;
    use crate::sync::remote::{InMemoryObjectStore, InMemoryRemoteStore, RemoteMemory};
    use crate::types::{CreateMemoryInput, Mood, SyncState};
    use chrono::{Duration, Utc};

    struct Harness {
        storage: Storage,
        remote: Arc<InMemoryRemoteStore>,
        objects: Arc<InMemoryObjectStore>,
        processor: SyncProcessor,
    }

    fn harness() -> Harness {
        let storage = Storage::open_in_memory().unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let objects = Arc::new(InMemoryObjectStore::new());
        let processor = SyncProcessor::new(storage.clone(), remote.clone(), objects.clone());
        Harness {
            storage,
            remote,
            objects,
            processor,
        }
    }

    fn create(storage: &Storage, input: CreateMemoryInput) -> Memory {
        storage
            .with_connection(|conn| queries::create_memory(conn, &input, Utc::now()))
            .unwrap()
    }

    fn get(storage: &Storage, id: MemoryId) -> Memory {
        storage
            .with_connection(|conn| queries::get_memory(conn, id))
            .unwrap()
    }

    fn input(title: &str) -> CreateMemoryInput {
        CreateMemoryInput {
            owner_id: "u1".into(),
            title: title.into(),
            mood: Mood::Grateful,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_uploads_media_and_writes_back() {
        let h = harness();
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("sunset.PNG");
        std::fs::write(&photo, b"png-bytes").unwrap();

        let memory = create(
            &h.storage,
            CreateMemoryInput {
                photo_uri: Some(format!("file://{}", photo.display())),
                ..input("Sunset")
            },
        );

        let outcome = h
            .processor
            .run(&SyncTask::CreateMemory {
                memory_id: memory.id,
            })
            .await
            .unwrap();
        let SyncOutcome::Pushed { remote_id, .. } = outcome else {
            panic!("expected a push");
        };

        let synced = get(&h.storage, memory.id);
        assert_eq!(synced.sync_state, SyncState::Synced);
        assert_eq!(synced.remote_id.as_deref(), Some(remote_id.as_str()));
        let object_path = format!("u1/{}.png", memory.id);
        assert_eq!(synced.remote_photo_path.as_deref(), Some(object_path.as_str()));
        assert!(h.objects.contains(IMAGE_BUCKET, &object_path));
        assert_eq!(
            h.objects.content_type(IMAGE_BUCKET, &object_path).as_deref(),
            Some("image/png")
        );
        assert_eq!(h.remote.get(&remote_id).unwrap().title, "Sunset");
    }

    #[tokio::test]
    async fn test_missing_local_row_is_skipped() {
        let h = harness();
        let outcome = h
            .processor
            .run(&SyncTask::UpdateMemory { memory_id: 404 })
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped);
        assert!(h.remote.is_empty());
    }

    #[tokio::test]
    async fn test_failure_marks_row_and_publishes() {
        let h = harness();
        let mut events = h.processor.events().subscribe();
        let memory = create(&h.storage, input("Offline"));
        h.remote.fail_on("insert");

        let err = h
            .processor
            .run(&SyncTask::CreateMemory {
                memory_id: memory.id,
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let failed = get(&h.storage, memory.id);
        assert_eq!(failed.sync_state, SyncState::Failed);
        assert_eq!(failed.retry_count, 1);
        assert!(failed.last_sync_error.unwrap().contains("simulated insert"));

        assert_eq!(
            events.recv().await.unwrap().event_type,
            SyncEventType::SnapSyncStarted
        );
        assert_eq!(
            events.recv().await.unwrap().event_type,
            SyncEventType::SnapSyncFailed
        );
    }

    #[tokio::test]
    async fn test_missing_media_file_fails_task() {
        let h = harness();
        let memory = create(
            &h.storage,
            CreateMemoryInput {
                audio_uri: Some("/definitely/not/here.m4a".into()),
                ..input("Voice note")
            },
        );
        assert!(h
            .processor
            .run(&SyncTask::CreateMemory {
                memory_id: memory.id,
            })
            .await
            .is_err());
        assert_eq!(get(&h.storage, memory.id).sync_state, SyncState::Failed);
        assert!(h.remote.is_empty());
    }

    #[tokio::test]
    async fn test_toggle_favorite_on_synced_row() {
        let h = harness();
        let memory = create(&h.storage, input("Park"));
        h.processor
            .run(&SyncTask::CreateMemory {
                memory_id: memory.id,
            })
            .await
            .unwrap();
        let remote_id = get(&h.storage, memory.id).remote_id.unwrap();

        h.storage
            .with_connection(|conn| queries::set_favorite(conn, memory.id, true, Utc::now()))
            .unwrap();
        h.processor
            .run(&SyncTask::ToggleFavorite {
                memory_id: memory.id,
                is_favorite: true,
            })
            .await
            .unwrap();

        assert!(h.remote.get(&remote_id).unwrap().is_favorite);
        assert_eq!(get(&h.storage, memory.id).sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_objects() {
        let h = harness();
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("note.m4a");
        std::fs::write(&audio, b"aac").unwrap();
        let memory = create(
            &h.storage,
            CreateMemoryInput {
                audio_uri: Some(audio.display().to_string()),
                ..input("Voice")
            },
        );
        h.processor
            .run(&SyncTask::CreateMemory {
                memory_id: memory.id,
            })
            .await
            .unwrap();
        let synced = get(&h.storage, memory.id);
        assert_eq!(h.objects.len(), 1);

        h.processor
            .run(&SyncTask::DeleteMemory {
                memory_id: memory.id,
                remote_id: synced.remote_id.clone(),
                remote_photo_path: None,
                remote_audio_path: synced.remote_audio_path.clone(),
            })
            .await
            .unwrap();
        assert!(h.remote.is_empty());
        assert!(h.objects.is_empty());
    }

    #[tokio::test]
    async fn test_delete_before_row_push_removes_uploaded_media() {
        let h = harness();
        h.objects
            .upload(IMAGE_BUCKET, "u1/7.jpg", b"jpeg".to_vec(), "image/jpeg")
            .await
            .unwrap();

        let outcome = h
            .processor
            .run(&SyncTask::DeleteMemory {
                memory_id: 7,
                remote_id: None,
                remote_photo_path: Some("u1/7.jpg".into()),
                remote_audio_path: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Deleted { memory_id: 7 });
        assert!(h.objects.is_empty());
    }

    #[tokio::test]
    async fn test_pull_merges_last_writer_wins() {
        let h = harness();
        let now = Utc::now();
        let row = |id: &str, title: &str, minutes: i64| RemoteMemory {
            id: id.into(),
            user_id: "u1".into(),
            title: title.into(),
            description: String::new(),
            mood: Mood::Calm,
            photo_path: None,
            audio_path: None,
            latitude: None,
            longitude: None,
            location_name: None,
            is_favorite: false,
            media_size_bytes: 0,
            created_at: now,
            updated_at: now + Duration::minutes(minutes),
        };

        h.remote.put(row("new", "From tablet", 0));
        let first = h.processor.pull_all("u1").await.unwrap();
        assert_eq!(first.inserted, 1);

        // pending local edit must survive a newer remote row
        let local = h
            .storage
            .with_connection(|conn| queries::find_by_remote_id(conn, "new"))
            .unwrap()
            .unwrap();
        h.storage
            .with_connection(|conn| queries::set_favorite(conn, local.id, true, Utc::now()))
            .unwrap();
        h.remote.put(row("new", "Edited on tablet", 90));

        let second = h.processor.pull_all("u1").await.unwrap();
        assert_eq!(second.kept_local, 1);
        assert_eq!(get(&h.storage, local.id).title, "From tablet");
    }

    #[tokio::test]
    async fn test_drain_completes_and_records_failures() {
        let h = harness();
        let queue = SyncQueue::new(h.storage.clone(), 2);
        let ok = create(&h.storage, input("Ok"));
        queue
            .enqueue(&SyncTask::CreateMemory { memory_id: ok.id })
            .unwrap();
        queue
            .enqueue(&SyncTask::PullAll {
                user_id: "u1".into(),
            })
            .unwrap();

        h.remote.fail_on("list");
        let report = h.processor.drain(&queue, 1).await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(queue.len().unwrap(), 1);

        let report = h.processor.drain(&queue, 10).await.unwrap();
        assert_eq!(report.dead, 1);
        assert!(queue.is_empty().unwrap());
        assert_eq!(queue.dead_entries().unwrap().len(), 1);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("jpeg"), "image/jpeg");
        assert_eq!(content_type_for("m4a"), "audio/mp4");
        assert_eq!(content_type_for("xyz"), "application/octet-stream");
    }
}
