//! Core types for SoulSnaps

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Local identifier for a memory
pub type MemoryId = i64;

/// A captured memory ("snap") stored on the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Local identifier
    pub id: MemoryId,
    /// User who captured the memory
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Bumped on every local edit and taken from the remote row on pull
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub mood: Mood,
    /// Local photo file (plain path or `file://` URI)
    pub photo_uri: Option<String>,
    /// Local audio file (plain path or `file://` URI)
    pub audio_uri: Option<String>,
    pub location: Option<Location>,
    #[serde(default)]
    pub is_favorite: bool,
    /// Size of attached media, used for storage quotas
    #[serde(default)]
    pub media_size_bytes: u64,
    #[serde(default)]
    pub sync_state: SyncState,
    #[serde(default)]
    pub retry_count: u32,
    /// Identifier of the remote row once synced
    pub remote_id: Option<String>,
    /// Object path in the image bucket
    pub remote_photo_path: Option<String>,
    /// Object path in the audio bucket
    pub remote_audio_path: Option<String>,
    pub last_sync_error: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl Memory {
    /// Whether local edits have not reached the backend yet
    pub fn has_unsynced_changes(&self) -> bool {
        matches!(self.sync_state, SyncState::Pending | SyncState::Failed)
    }
}

/// Where a memory was captured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
}

/// Mood attached to a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Calm,
    Grateful,
    Excited,
    Reflective,
    Sad,
    Anxious,
    Angry,
    Tired,
    #[default]
    Neutral,
}

impl Mood {
    pub const ALL: [Mood; 10] = [
        Mood::Happy,
        Mood::Calm,
        Mood::Grateful,
        Mood::Excited,
        Mood::Reflective,
        Mood::Sad,
        Mood::Anxious,
        Mood::Angry,
        Mood::Tired,
        Mood::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Happy => "happy",
            Mood::Calm => "calm",
            Mood::Grateful => "grateful",
            Mood::Excited => "excited",
            Mood::Reflective => "reflective",
            Mood::Sad => "sad",
            Mood::Anxious => "anxious",
            Mood::Angry => "angry",
            Mood::Tired => "tired",
            Mood::Neutral => "neutral",
        }
    }

    /// Moods that usually call for a supportive tone
    pub fn is_difficult(&self) -> bool {
        matches!(self, Mood::Sad | Mood::Anxious | Mood::Angry | Mood::Tired)
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Mood {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Mood::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == lower)
            .ok_or_else(|| format!("Unknown mood: {}", s))
    }
}

/// Sync bookkeeping state of a local memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncState {
    /// Local change waiting to be pushed
    #[default]
    Pending,
    /// Push in progress
    Syncing,
    /// Local row matches the backend
    Synced,
    /// Last push failed; will be retried from the queue
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "PENDING",
            SyncState::Syncing => "SYNCING",
            SyncState::Synced => "SYNCED",
            SyncState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(SyncState::Pending),
            "SYNCING" => Ok(SyncState::Syncing),
            "SYNCED" => Ok(SyncState::Synced),
            "FAILED" => Ok(SyncState::Failed),
            _ => Err(format!("Unknown sync state: {}", s)),
        }
    }
}

/// Input for capturing a new memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateMemoryInput {
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mood: Mood,
    pub photo_uri: Option<String>,
    pub audio_uri: Option<String>,
    pub location: Option<Location>,
    #[serde(default)]
    pub media_size_bytes: u64,
}

/// Partial edit of an existing memory; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMemoryInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub mood: Option<Mood>,
    /// `Some(None)` clears the photo
    pub photo_uri: Option<Option<String>>,
    pub audio_uri: Option<Option<String>>,
    pub location: Option<Option<Location>>,
    pub media_size_bytes: Option<u64>,
}

impl UpdateMemoryInput {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.mood.is_none()
            && self.photo_uri.is_none()
            && self.audio_uri.is_none()
            && self.location.is_none()
            && self.media_size_bytes.is_none()
    }

    /// Whether the edit replaces attached media (forces a re-upload)
    pub fn touches_media(&self) -> bool {
        self.photo_uri.is_some() || self.audio_uri.is_some()
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database
    pub db_path: String,
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            db_path: ":memory:".to_string(),
        }
    }
}

/// Aggregate usage of one user, input to capacity checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub memory_count: u64,
    pub storage_bytes: u64,
}

/// Per-state counts for status displays
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub pending: i64,
    pub syncing: i64,
    pub synced: i64,
    pub failed: i64,
    pub queued_tasks: i64,
    pub dead_tasks: i64,
}
