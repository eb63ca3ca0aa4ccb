//! Remote collaborators: the row backend and object storage
//!
//! Both are treated as opaque. The in-memory implementations here back the
//! tests and offline runs; network implementations live behind the `remote`
//! and `cloud` features.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Result, SoulSnapsError};
use crate::types::{Location, Memory, Mood};

/// Bucket holding snap photos
pub const IMAGE_BUCKET: &str = "snap-images";
/// Bucket holding snap audio clips
pub const AUDIO_BUCKET: &str = "snap-audio";

/// Memory row as stored by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMemory {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mood: Mood,
    pub photo_path: Option<String>,
    pub audio_path: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_name: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub media_size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteMemory {
    pub fn from_draft(id: String, draft: &RemoteMemoryDraft) -> Self {
        Self {
            id,
            user_id: draft.user_id.clone(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            mood: draft.mood,
            photo_path: draft.photo_path.clone(),
            audio_path: draft.audio_path.clone(),
            latitude: draft.latitude,
            longitude: draft.longitude,
            location_name: draft.location_name.clone(),
            is_favorite: draft.is_favorite,
            media_size_bytes: draft.media_size_bytes,
            created_at: draft.created_at,
            updated_at: draft.updated_at,
        }
    }

    pub fn location(&self) -> Option<Location> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
                name: self.location_name.clone(),
            }),
            _ => None,
        }
    }
}

/// Row payload for inserts and updates (the backend owns the id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMemoryDraft {
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub mood: Mood,
    pub photo_path: Option<String>,
    pub audio_path: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_name: Option<String>,
    pub is_favorite: bool,
    pub media_size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteMemoryDraft {
    /// Build the row for a local memory with the given object paths
    pub fn from_memory(
        memory: &Memory,
        photo_path: Option<String>,
        audio_path: Option<String>,
    ) -> Self {
        Self {
            user_id: memory.owner_id.clone(),
            title: memory.title.clone(),
            description: memory.description.clone(),
            mood: memory.mood,
            photo_path,
            audio_path,
            latitude: memory.location.as_ref().map(|l| l.latitude),
            longitude: memory.location.as_ref().map(|l| l.longitude),
            location_name: memory.location.as_ref().and_then(|l| l.name.clone()),
            is_favorite: memory.is_favorite,
            media_size_bytes: memory.media_size_bytes,
            created_at: memory.created_at,
            updated_at: memory.updated_at,
        }
    }
}

/// Row-based remote database holding memories
#[async_trait]
pub trait RemoteMemoryStore: Send + Sync {
    /// Insert a row, returning it with the backend-assigned id
    async fn insert(&self, draft: &RemoteMemoryDraft) -> Result<RemoteMemory>;

    /// Replace all fields of an existing row
    async fn update(&self, remote_id: &str, draft: &RemoteMemoryDraft) -> Result<RemoteMemory>;

    /// Update only the favorite flag
    async fn set_favorite(
        &self,
        remote_id: &str,
        is_favorite: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete a row; deleting a missing row is not an error
    async fn delete(&self, remote_id: &str) -> Result<()>;

    /// All rows owned by a user
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<RemoteMemory>>;
}

/// Object storage for snap media
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload (or overwrite) an object
    async fn upload(&self, bucket: &str, path: &str, data: Vec<u8>, content_type: &str)
        -> Result<()>;

    /// Delete an object; deleting a missing object is not an error
    async fn delete(&self, bucket: &str, path: &str) -> Result<()>;
}

/// In-process row backend
#[derive(Default)]
pub struct InMemoryRemoteStore {
    rows: DashMap<String, RemoteMemory>,
    failures: Mutex<HashSet<&'static str>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row directly (simulates writes from another device)
    pub fn put(&self, row: RemoteMemory) {
        self.rows.insert(row.id.clone(), row);
    }

    pub fn get(&self, remote_id: &str) -> Option<RemoteMemory> {
        self.rows.get(remote_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Make an operation ("insert", "update", "favorite", "delete", "list") fail
    pub fn fail_on(&self, operation: &'static str) {
        self.failures.lock().insert(operation);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.failures.lock().contains(operation) {
            return Err(SoulSnapsError::Remote(format!(
                "simulated {} failure",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteMemoryStore for InMemoryRemoteStore {
    async fn insert(&self, draft: &RemoteMemoryDraft) -> Result<RemoteMemory> {
        self.check("insert")?;
        let row = RemoteMemory::from_draft(uuid::Uuid::new_v4().to_string(), draft);
        self.rows.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn update(&self, remote_id: &str, draft: &RemoteMemoryDraft) -> Result<RemoteMemory> {
        self.check("update")?;
        let row = RemoteMemory::from_draft(remote_id.to_string(), draft);
        match self.rows.get_mut(remote_id) {
            Some(mut existing) => {
                *existing = row.clone();
                Ok(row)
            }
            None => Err(SoulSnapsError::Remote(format!(
                "remote memory {} does not exist",
                remote_id
            ))),
        }
    }

    async fn set_favorite(
        &self,
        remote_id: &str,
        is_favorite: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check("favorite")?;
        match self.rows.get_mut(remote_id) {
            Some(mut existing) => {
                existing.is_favorite = is_favorite;
                existing.updated_at = updated_at;
                Ok(())
            }
            None => Err(SoulSnapsError::Remote(format!(
                "remote memory {} does not exist",
                remote_id
            ))),
        }
    }

    async fn delete(&self, remote_id: &str) -> Result<()> {
        self.check("delete")?;
        self.rows.remove(remote_id);
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<RemoteMemory>> {
        self.check("list")?;
        let mut rows: Vec<RemoteMemory> = self
            .rows
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }
}

/// In-process object storage
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<(String, String), (Vec<u8>, String)>,
    fail_uploads: Mutex<bool>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, bucket: &str, path: &str) -> bool {
        self.objects
            .contains_key(&(bucket.to_string(), path.to_string()))
    }

    pub fn content_type(&self, bucket: &str, path: &str) -> Option<String> {
        self.objects
            .get(&(bucket.to_string(), path.to_string()))
            .map(|o| o.1.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        *self.fail_uploads.lock() = fail;
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        if *self.fail_uploads.lock() {
            return Err(SoulSnapsError::ObjectStorage(format!(
                "simulated upload failure for {}/{}",
                bucket, path
            )));
        }
        self.objects.insert(
            (bucket.to_string(), path.to_string()),
            (data, content_type.to_string()),
        );
        Ok(())
    }

    async fn delete(&self, bucket: &str, path: &str) -> Result<()> {
        self.objects.remove(&(bucket.to_string(), path.to_string()));
        Ok(())
    }
}
