//! Offline-first sync
//!
//! Local writes land in SQLite and queue a task; the processor pushes them to
//! the row backend and object storage, and `PullAll` merges remote rows back
//! with last-writer-wins.
//!
//! # Feature Flags
//!
//! - `cloud`: S3-compatible object storage
//! - `remote`: PostgREST-style row backend over HTTP
//!
//! In-memory backends are always available.

#[cfg(feature = "cloud")]
mod cloud;
mod events;
mod merge;
mod processor;
mod queue;
mod remote;
#[cfg(feature = "remote")]
mod rest;
mod task;
mod worker;

#[cfg(feature = "cloud")]
pub use cloud::S3ObjectStore;
pub use events::{SyncEvent, SyncEventBus, SyncEventType};
pub use merge::{decide, MergeDecision, MergeReport};
pub use processor::{DrainReport, MediaBuckets, SyncOutcome, SyncProcessor};
pub use queue::{enqueue_with, QueueEntry, SyncQueue, DEFAULT_MAX_ATTEMPTS};
pub use remote::{
    InMemoryObjectStore, InMemoryRemoteStore, ObjectStore, RemoteMemory, RemoteMemoryDraft,
    RemoteMemoryStore, AUDIO_BUCKET, IMAGE_BUCKET,
};
#[cfg(feature = "remote")]
pub use rest::{RestRemoteStore, DEFAULT_TABLE};
pub use task::SyncTask;
pub use worker::{SyncCommand, SyncWorker};
