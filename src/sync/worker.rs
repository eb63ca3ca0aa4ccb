//! Background queue drainer

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::processor::{DrainReport, SyncProcessor};
use super::queue::SyncQueue;
use super::task::SyncTask;
use crate::error::{Result, SoulSnapsError};

/// Commands for the sync worker
#[derive(Debug)]
pub enum SyncCommand {
    /// Drain now, optionally reporting back
    Drain(Option<oneshot::Sender<DrainReport>>),
    /// Queue a full pull for a user, then drain
    Pull(String),
    /// Final drain, then exit
    Stop,
}

/// Handle to a running worker
pub struct SyncWorker {
    sender: mpsc::Sender<SyncCommand>,
    handle: JoinHandle<()>,
}

impl SyncWorker {
    /// Spawn the worker on the current runtime. It drains on every command
    /// and on each `drain_interval` tick.
    pub fn start(
        processor: Arc<SyncProcessor>,
        queue: SyncQueue,
        drain_interval: Duration,
        batch_size: usize,
    ) -> Self {
        let (sender, mut receiver) = mpsc::channel::<SyncCommand>(100);

        let handle = tokio::spawn(async move {
            let mut tick = interval(drain_interval.max(Duration::from_millis(10)));
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    cmd = receiver.recv() => {
                        match cmd {
                            Some(SyncCommand::Drain(reply)) => {
                                let report = Self::drain(&processor, &queue, batch_size).await;
                                if let Some(reply) = reply {
                                    let _ = reply.send(report);
                                }
                            }
                            Some(SyncCommand::Pull(user_id)) => {
                                if let Err(e) = queue.enqueue(&SyncTask::PullAll { user_id }) {
                                    tracing::error!("Could not queue pull: {}", e);
                                }
                                Self::drain(&processor, &queue, batch_size).await;
                            }
                            Some(SyncCommand::Stop) | None => {
                                // Final drain before stopping
                                Self::drain(&processor, &queue, batch_size).await;
                                break;
                            }
                        }
                    }
                    _ = tick.tick() => {
                        Self::drain(&processor, &queue, batch_size).await;
                    }
                }
            }

            tracing::info!("Sync worker stopped");
        });

        Self { sender, handle }
    }

    async fn drain(processor: &SyncProcessor, queue: &SyncQueue, batch_size: usize) -> DrainReport {
        match processor.drain(queue, batch_size).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Sync pass aborted: {}", e);
                DrainReport::default()
            }
        }
    }

    async fn send(&self, cmd: SyncCommand) -> Result<()> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| SoulSnapsError::Sync("Worker channel closed".to_string()))
    }

    /// Ask for a drain without waiting for it
    pub async fn trigger(&self) -> Result<()> {
        self.send(SyncCommand::Drain(None)).await
    }

    /// Drain and wait for the report
    pub async fn drain_now(&self) -> Result<DrainReport> {
        let (tx, rx) = oneshot::channel();
        self.send(SyncCommand::Drain(Some(tx))).await?;
        rx.await
            .map_err(|_| SoulSnapsError::Sync("Worker dropped the drain reply".to_string()))
    }

    pub async fn pull(&self, user_id: &str) -> Result<()> {
        self.send(SyncCommand::Pull(user_id.to_string())).await
    }

    /// Stop after a final drain and wait for the task to exit
    pub async fn shutdown(self) -> Result<()> {
        self.send(SyncCommand::Stop).await?;
        self.handle
            .await
            .map_err(|e| SoulSnapsError::Internal(format!("sync worker panicked: {}", e)))
    }
}
