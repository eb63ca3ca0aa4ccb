//! Database queries for memory operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, SoulSnapsError};
use crate::sync::RemoteMemory;
use crate::types::*;

const MEMORY_COLUMNS: &str = "id, owner_id, title, description, created_at, updated_at, mood, \
     photo_uri, audio_uri, latitude, longitude, location_name, is_favorite, media_size_bytes, \
     sync_state, retry_count, remote_id, remote_photo_path, remote_audio_path, last_sync_error, \
     synced_at";

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a memory from a database row
pub fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let mood: String = row.get("mood")?;
    let sync_state: String = row.get("sync_state")?;
    let latitude: Option<f64> = row.get("latitude")?;
    let longitude: Option<f64> = row.get("longitude")?;
    let location_name: Option<String> = row.get("location_name")?;
    let is_favorite: i32 = row.get("is_favorite")?;
    let media_size_bytes: i64 = row.get("media_size_bytes")?;
    let retry_count: i64 = row.get("retry_count")?;
    let synced_at: Option<String> = row.get("synced_at")?;

    let location = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(Location {
            latitude,
            longitude,
            name: location_name,
        }),
        _ => None,
    };

    Ok(Memory {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        mood: mood.parse().unwrap_or_default(),
        photo_uri: row.get("photo_uri")?,
        audio_uri: row.get("audio_uri")?,
        location,
        is_favorite: is_favorite != 0,
        media_size_bytes: media_size_bytes.max(0) as u64,
        sync_state: sync_state.parse().unwrap_or_default(),
        retry_count: retry_count.max(0) as u32,
        remote_id: row.get("remote_id")?,
        remote_photo_path: row.get("remote_photo_path")?,
        remote_audio_path: row.get("remote_audio_path")?,
        last_sync_error: row.get("last_sync_error")?,
        synced_at: synced_at.map(|s| parse_timestamp(&s)),
    })
}

/// Reject input that `create_memory` would refuse
pub fn validate_new_memory(input: &CreateMemoryInput) -> Result<()> {
    if input.owner_id.trim().is_empty() {
        return Err(SoulSnapsError::InvalidInput(
            "owner_id must not be empty".to_string(),
        ));
    }
    if input.title.trim().is_empty() {
        return Err(SoulSnapsError::InvalidInput(
            "title must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Capture a new memory; it starts out `PENDING`
pub fn create_memory(
    conn: &Connection,
    input: &CreateMemoryInput,
    now: DateTime<Utc>,
) -> Result<Memory> {
    validate_new_memory(input)?;

    let now_str = now.to_rfc3339();
    conn.execute(
        "INSERT INTO memories (owner_id, title, description, created_at, updated_at, mood,
            photo_uri, audio_uri, latitude, longitude, location_name, media_size_bytes, sync_state)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'PENDING')",
        params![
            input.owner_id,
            input.title.trim(),
            input.description,
            now_str,
            now_str,
            input.mood.as_str(),
            input.photo_uri,
            input.audio_uri,
            input.location.as_ref().map(|l| l.latitude),
            input.location.as_ref().map(|l| l.longitude),
            input.location.as_ref().and_then(|l| l.name.clone()),
            input.media_size_bytes as i64,
        ],
    )?;

    get_memory(conn, conn.last_insert_rowid())
}

/// Get a memory by ID
pub fn get_memory(conn: &Connection, id: MemoryId) -> Result<Memory> {
    find_memory(conn, id)?.ok_or(SoulSnapsError::NotFound(id))
}

/// Get a memory by ID, `None` when absent
pub fn find_memory(conn: &Connection, id: MemoryId) -> Result<Option<Memory>> {
    let sql = format!("SELECT {} FROM memories WHERE id = ?", MEMORY_COLUMNS);
    let memory = conn
        .query_row(&sql, params![id], memory_from_row)
        .optional()?;
    Ok(memory)
}

/// Find the local copy of a remote row
pub fn find_by_remote_id(conn: &Connection, remote_id: &str) -> Result<Option<Memory>> {
    let sql = format!("SELECT {} FROM memories WHERE remote_id = ?", MEMORY_COLUMNS);
    let memory = conn
        .query_row(&sql, params![remote_id], memory_from_row)
        .optional()?;
    Ok(memory)
}

/// Filters for listing memories
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub favorites_only: bool,
    pub sync_state: Option<SyncState>,
    pub mood: Option<Mood>,
    pub limit: Option<usize>,
}

/// List a user's memories, newest first
pub fn list_memories(
    conn: &Connection,
    owner_id: &str,
    options: &ListOptions,
) -> Result<Vec<Memory>> {
    let mut sql = format!("SELECT {} FROM memories WHERE owner_id = ?", MEMORY_COLUMNS);
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(owner_id.to_string())];

    if options.favorites_only {
        sql.push_str(" AND is_favorite = 1");
    }
    if let Some(state) = options.sync_state {
        sql.push_str(" AND sync_state = ?");
        values.push(Box::new(state.as_str().to_string()));
    }
    if let Some(mood) = options.mood {
        sql.push_str(" AND mood = ?");
        values.push(Box::new(mood.as_str().to_string()));
    }

    sql.push_str(" ORDER BY created_at DESC, id DESC");
    if let Some(limit) = options.limit {
        sql.push_str(" LIMIT ?");
        values.push(Box::new(limit as i64));
    }

    let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let memories = stmt
        .query_map(params.as_slice(), memory_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(memories)
}

/// Apply a local edit; the memory goes back to `PENDING`
pub fn update_memory(
    conn: &Connection,
    id: MemoryId,
    input: &UpdateMemoryInput,
    now: DateTime<Utc>,
) -> Result<Memory> {
    // existence check doubles as NotFound
    get_memory(conn, id)?;

    let mut updates = vec![
        "updated_at = ?".to_string(),
        "sync_state = 'PENDING'".to_string(),
    ];
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now.to_rfc3339())];

    if let Some(ref title) = input.title {
        if title.trim().is_empty() {
            return Err(SoulSnapsError::InvalidInput(
                "title must not be empty".to_string(),
            ));
        }
        updates.push("title = ?".to_string());
        values.push(Box::new(title.trim().to_string()));
    }

    if let Some(ref description) = input.description {
        updates.push("description = ?".to_string());
        values.push(Box::new(description.clone()));
    }

    if let Some(mood) = input.mood {
        updates.push("mood = ?".to_string());
        values.push(Box::new(mood.as_str().to_string()));
    }

    // New media invalidates the uploaded object path
    if let Some(ref photo_uri) = input.photo_uri {
        updates.push("photo_uri = ?".to_string());
        values.push(Box::new(photo_uri.clone()));
        updates.push("remote_photo_path = NULL".to_string());
    }

    if let Some(ref audio_uri) = input.audio_uri {
        updates.push("audio_uri = ?".to_string());
        values.push(Box::new(audio_uri.clone()));
        updates.push("remote_audio_path = NULL".to_string());
    }

    if let Some(ref location) = input.location {
        updates.push("latitude = ?".to_string());
        values.push(Box::new(location.as_ref().map(|l| l.latitude)));
        updates.push("longitude = ?".to_string());
        values.push(Box::new(location.as_ref().map(|l| l.longitude)));
        updates.push("location_name = ?".to_string());
        values.push(Box::new(location.as_ref().and_then(|l| l.name.clone())));
    }

    if let Some(size) = input.media_size_bytes {
        updates.push("media_size_bytes = ?".to_string());
        values.push(Box::new(size as i64));
    }

    let sql = format!("UPDATE memories SET {} WHERE id = ?", updates.join(", "));
    values.push(Box::new(id));

    let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
    conn.execute(&sql, params.as_slice())?;

    get_memory(conn, id)
}

/// Set the favorite flag; the memory goes back to `PENDING`
pub fn set_favorite(
    conn: &Connection,
    id: MemoryId,
    is_favorite: bool,
    now: DateTime<Utc>,
) -> Result<Memory> {
    let affected = conn.execute(
        "UPDATE memories SET is_favorite = ?, updated_at = ?, sync_state = 'PENDING' WHERE id = ?",
        params![is_favorite, now.to_rfc3339(), id],
    )?;
    if affected == 0 {
        return Err(SoulSnapsError::NotFound(id));
    }
    get_memory(conn, id)
}

/// Delete a memory, returning the removed row
pub fn delete_memory(conn: &Connection, id: MemoryId) -> Result<Memory> {
    let memory = get_memory(conn, id)?;
    conn.execute("DELETE FROM memories WHERE id = ?", params![id])?;
    Ok(memory)
}

/// Memory count and stored media bytes for a user
pub fn usage_for_owner(conn: &Connection, owner_id: &str) -> Result<UsageSnapshot> {
    let (count, bytes): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(media_size_bytes), 0) FROM memories WHERE owner_id = ?",
        params![owner_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(UsageSnapshot {
        memory_count: count.max(0) as u64,
        storage_bytes: bytes.max(0) as u64,
    })
}

/// Mark a memory as being pushed
pub fn mark_syncing(conn: &Connection, id: MemoryId) -> Result<()> {
    conn.execute(
        "UPDATE memories SET sync_state = 'SYNCING' WHERE id = ?",
        params![id],
    )?;
    Ok(())
}

/// Remote identifiers written back after a successful push
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncWriteBack {
    pub remote_id: String,
    pub remote_photo_path: Option<String>,
    pub remote_audio_path: Option<String>,
}

/// Record a successful push.
///
/// Identifiers are always written so retries stay idempotent. The state only
/// flips to `SYNCED` from `SYNCING`: an edit that landed mid-push keeps its
/// `PENDING` state and its own queued task.
///
/// Returns `false` when the row was deleted while the push was in flight.
pub fn mark_synced(
    conn: &Connection,
    id: MemoryId,
    write_back: &SyncWriteBack,
    now: DateTime<Utc>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE memories SET
            remote_id = ?,
            remote_photo_path = ?,
            remote_audio_path = ?,
            last_sync_error = NULL,
            retry_count = 0,
            synced_at = ?,
            sync_state = CASE WHEN sync_state = 'SYNCING' THEN 'SYNCED' ELSE sync_state END
         WHERE id = ?",
        params![
            write_back.remote_id,
            write_back.remote_photo_path,
            write_back.remote_audio_path,
            now.to_rfc3339(),
            id
        ],
    )?;
    Ok(updated > 0)
}

/// Persist media paths uploaded before the row push, so a retry skips them
pub fn record_uploaded_media(
    conn: &Connection,
    id: MemoryId,
    remote_photo_path: Option<&str>,
    remote_audio_path: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE memories SET
            remote_photo_path = COALESCE(?, remote_photo_path),
            remote_audio_path = COALESCE(?, remote_audio_path)
         WHERE id = ?",
        params![remote_photo_path, remote_audio_path, id],
    )?;
    Ok(())
}

/// Record a failed push
pub fn mark_failed(conn: &Connection, id: MemoryId, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE memories SET
            sync_state = 'FAILED',
            retry_count = retry_count + 1,
            last_sync_error = ?
         WHERE id = ?",
        params![error, id],
    )?;
    Ok(())
}

/// Insert a row pulled from the backend as a synced local memory
pub fn insert_from_remote(
    conn: &Connection,
    remote: &RemoteMemory,
    now: DateTime<Utc>,
) -> Result<Memory> {
    conn.execute(
        "INSERT INTO memories (owner_id, title, description, created_at, updated_at, mood,
            latitude, longitude, location_name, is_favorite, media_size_bytes, sync_state,
            remote_id, remote_photo_path, remote_audio_path, synced_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'SYNCED', ?, ?, ?, ?)",
        params![
            remote.user_id,
            remote.title,
            remote.description,
            remote.created_at.to_rfc3339(),
            remote.updated_at.to_rfc3339(),
            remote.mood.as_str(),
            remote.latitude,
            remote.longitude,
            remote.location_name,
            remote.is_favorite,
            remote.media_size_bytes as i64,
            remote.id,
            remote.photo_path,
            remote.audio_path,
            now.to_rfc3339(),
        ],
    )?;
    get_memory(conn, conn.last_insert_rowid())
}

/// Overwrite a local memory with a newer remote row.
///
/// Local media files are kept only when the object path did not change.
pub fn overwrite_from_remote(
    conn: &Connection,
    id: MemoryId,
    remote: &RemoteMemory,
    now: DateTime<Utc>,
) -> Result<Memory> {
    conn.execute(
        "UPDATE memories SET
            title = ?,
            description = ?,
            updated_at = ?,
            mood = ?,
            photo_uri = CASE WHEN remote_photo_path IS ? THEN photo_uri ELSE NULL END,
            audio_uri = CASE WHEN remote_audio_path IS ? THEN audio_uri ELSE NULL END,
            latitude = ?,
            longitude = ?,
            location_name = ?,
            is_favorite = ?,
            media_size_bytes = ?,
            sync_state = 'SYNCED',
            retry_count = 0,
            last_sync_error = NULL,
            remote_photo_path = ?,
            remote_audio_path = ?,
            synced_at = ?
         WHERE id = ?",
        params![
            remote.title,
            remote.description,
            remote.updated_at.to_rfc3339(),
            remote.mood.as_str(),
            remote.photo_path,
            remote.audio_path,
            remote.latitude,
            remote.longitude,
            remote.location_name,
            remote.is_favorite,
            remote.media_size_bytes as i64,
            remote.photo_path,
            remote.audio_path,
            now.to_rfc3339(),
            id,
        ],
    )?;
    get_memory(conn, id)
}

/// Counts per sync state plus queue depth
pub fn sync_status(conn: &Connection, max_attempts: u32) -> Result<SyncStatus> {
    let mut status = SyncStatus::default();
    let mut stmt =
        conn.prepare("SELECT sync_state, COUNT(*) FROM memories GROUP BY sync_state")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (state, count) = row?;
        match state.parse::<SyncState>() {
            Ok(SyncState::Pending) => status.pending = count,
            Ok(SyncState::Syncing) => status.syncing = count,
            Ok(SyncState::Synced) => status.synced = count,
            Ok(SyncState::Failed) => status.failed = count,
            Err(e) => tracing::warn!("Skipping unknown sync state in status: {}", e),
        }
    }

    let (queued, dead): (i64, i64) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN attempts < ?1 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN attempts >= ?1 THEN 1 ELSE 0 END), 0)
         FROM sync_queue",
        params![max_attempts],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    status.queued_tasks = queued;
    status.dead_tasks = dead;

    Ok(status)
}
