//! Persistent FIFO of sync tasks
//!
//! Tasks are stored as JSON in `sync_queue`. A failed task stays in place with
//! its attempt count bumped; once attempts reach `max_attempts` it is no longer
//! handed out and shows up in `dead_entries` until retried.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use super::task::SyncTask;
use crate::error::Result;
use crate::storage::Storage;

/// Default attempts before a task is parked
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// A queued task with its bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub task: SyncTask,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Decoded row, or the row id when the task JSON is unreadable
fn entry_from_row(row: &Row) -> rusqlite::Result<std::result::Result<QueueEntry, (i64, String)>> {
    let id: i64 = row.get("id")?;
    let raw: String = row.get("task")?;
    let task = match serde_json::from_str::<SyncTask>(&raw) {
        Ok(task) => task,
        Err(e) => return Ok(Err((id, e.to_string()))),
    };
    let enqueued_at: String = row.get("enqueued_at")?;
    let last_attempt_at: Option<String> = row.get("last_attempt_at")?;

    Ok(Ok(QueueEntry {
        id,
        task,
        attempts: row.get::<_, i64>("attempts")?.max(0) as u32,
        last_error: row.get("last_error")?,
        enqueued_at: parse_time(&enqueued_at),
        last_attempt_at: last_attempt_at.as_deref().map(parse_time),
    }))
}

/// Append a task using an existing connection (lets callers enqueue inside
/// the transaction that made the local change)
pub fn enqueue_with(conn: &Connection, task: &SyncTask, now: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO sync_queue (task, kind, memory_id, enqueued_at) VALUES (?, ?, ?, ?)",
        params![
            serde_json::to_string(task)?,
            task.kind(),
            task.memory_id(),
            now.to_rfc3339()
        ],
    )?;
    let id = conn.last_insert_rowid();
    tracing::debug!("Queued {} as entry {}", task, id);
    Ok(id)
}

fn select_entries(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<(Vec<QueueEntry>, Vec<(i64, String)>)> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, entry_from_row)?;
    let mut entries = Vec::new();
    let mut unreadable = Vec::new();
    for row in rows {
        match row? {
            Ok(entry) => entries.push(entry),
            Err(bad) => unreadable.push(bad),
        }
    }
    Ok((entries, unreadable))
}

/// Queue handle over the local database
#[derive(Clone)]
pub struct SyncQueue {
    storage: Storage,
    max_attempts: u32,
}

impl SyncQueue {
    pub fn new(storage: Storage, max_attempts: u32) -> Self {
        Self {
            storage,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn enqueue(&self, task: &SyncTask) -> Result<i64> {
        self.storage
            .with_connection(|conn| enqueue_with(conn, task, Utc::now()))
    }

    /// Oldest live entries, at most `limit`. Entries whose JSON cannot be
    /// decoded are dropped, since no retry can ever run them.
    pub fn next_batch(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        self.next_batch_after(0, limit)
    }

    /// Like `next_batch`, restricted to entries with an id above `after_id`
    pub fn next_batch_after(&self, after_id: i64, limit: usize) -> Result<Vec<QueueEntry>> {
        let max_attempts = self.max_attempts;
        self.storage.with_transaction(|conn| {
            let (entries, unreadable) = select_entries(
                conn,
                "SELECT * FROM sync_queue WHERE attempts < ? AND id > ? ORDER BY id LIMIT ?",
                params![max_attempts, after_id, limit as i64],
            )?;
            for (id, error) in unreadable {
                tracing::warn!("Dropping unreadable sync task {}: {}", id, error);
                conn.execute("DELETE FROM sync_queue WHERE id = ?", params![id])?;
            }
            Ok(entries)
        })
    }

    /// Remove a finished entry
    pub fn complete(&self, entry_id: i64) -> Result<()> {
        self.storage.with_connection(|conn| {
            conn.execute("DELETE FROM sync_queue WHERE id = ?", params![entry_id])?;
            Ok(())
        })
    }

    /// Record a failed attempt; returns true when the entry is now dead
    pub fn fail(&self, entry_id: i64, error: &str) -> Result<bool> {
        let max_attempts = self.max_attempts;
        self.storage.with_connection(|conn| {
            conn.execute(
                "UPDATE sync_queue SET
                    attempts = attempts + 1,
                    last_error = ?,
                    last_attempt_at = ?
                 WHERE id = ?",
                params![error, Utc::now().to_rfc3339(), entry_id],
            )?;
            let attempts: i64 = conn.query_row(
                "SELECT attempts FROM sync_queue WHERE id = ?",
                params![entry_id],
                |row| row.get(0),
            )?;
            let dead = attempts >= max_attempts as i64;
            if dead {
                tracing::warn!(
                    "Sync task {} gave up after {} attempts: {}",
                    entry_id,
                    attempts,
                    error
                );
            }
            Ok(dead)
        })
    }

    /// Entries still eligible for processing
    pub fn len(&self) -> Result<usize> {
        let max_attempts = self.max_attempts;
        self.storage.with_connection(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE attempts < ?",
                params![max_attempts],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Entries that exhausted their attempts
    pub fn dead_entries(&self) -> Result<Vec<QueueEntry>> {
        let max_attempts = self.max_attempts;
        self.storage.with_connection(|conn| {
            let (entries, _) = select_entries(
                conn,
                "SELECT * FROM sync_queue WHERE attempts >= ? ORDER BY id",
                params![max_attempts],
            )?;
            Ok(entries)
        })
    }

    /// Give dead entries a fresh set of attempts
    pub fn retry_dead(&self) -> Result<usize> {
        let max_attempts = self.max_attempts;
        self.storage.with_connection(|conn| {
            let revived = conn.execute(
                "UPDATE sync_queue SET attempts = 0 WHERE attempts >= ?",
                params![max_attempts],
            )?;
            if revived > 0 {
                tracing::info!("Re-queued {} dead sync tasks", revived);
            }
            Ok(revived)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(max_attempts: u32) -> SyncQueue {
        SyncQueue::new(Storage::open_in_memory().unwrap(), max_attempts)
    }

    #[test]
    fn test_fifo_order_and_complete() {
        let queue = queue(3);
        queue.enqueue(&SyncTask::CreateMemory { memory_id: 1 }).unwrap();
        queue.enqueue(&SyncTask::UpdateMemory { memory_id: 1 }).unwrap();
        queue
            .enqueue(&SyncTask::PullAll {
                user_id: "u1".into(),
            })
            .unwrap();

        let batch = queue.next_batch(2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].task, SyncTask::CreateMemory { memory_id: 1 });
        assert_eq!(batch[1].task, SyncTask::UpdateMemory { memory_id: 1 });

        queue.complete(batch[0].id).unwrap();
        assert_eq!(queue.len().unwrap(), 2);
    }

    #[test]
    fn test_failures_park_entries() {
        let queue = queue(2);
        let id = queue.enqueue(&SyncTask::CreateMemory { memory_id: 7 }).unwrap();

        assert!(!queue.fail(id, "timeout").unwrap());
        let entry = &queue.next_batch(10).unwrap()[0];
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.last_error.as_deref(), Some("timeout"));
        assert!(entry.last_attempt_at.is_some());

        assert!(queue.fail(id, "timeout again").unwrap());
        assert!(queue.next_batch(10).unwrap().is_empty());
        assert!(queue.is_empty().unwrap());

        let dead = queue.dead_entries().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("timeout again"));

        assert_eq!(queue.retry_dead().unwrap(), 1);
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn test_unreadable_tasks_are_dropped() {
        let storage = Storage::open_in_memory().unwrap();
        let queue = SyncQueue::new(storage.clone(), 3);
        storage
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO sync_queue (task, kind, enqueued_at) VALUES ('{bad', 'x', ?)",
                    params![Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .unwrap();
        queue.enqueue(&SyncTask::CreateMemory { memory_id: 1 }).unwrap();

        let batch = queue.next_batch(10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(queue.len().unwrap(), 1);
        assert!(queue.dead_entries().unwrap().is_empty());

        // nothing left for retry_dead to revive
        assert_eq!(queue.retry_dead().unwrap(), 0);
        assert_eq!(queue.next_batch(10).unwrap().len(), 1);
        let rows: i64 = storage
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(rows, 1);
    }
}
