//! Lane worker.
//!
//! Consumes one lane and hands each job to a [`JobHandler`]. A job whose run
//! returns an error goes back on the lane until it has been delivered
//! `max_attempts` times; after that it is dropped with an error log.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use curator_core::types::Job;

use crate::error::IngestError;
use crate::queue::{Envelope, LaneQueue};

/// Executes jobs taken off a lane.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run_job(&self, job: &Job) -> Result<(), IngestError>;
}

/// Counters for one `run` or `drain` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: usize,
    pub redelivered: usize,
    pub abandoned: usize,
}

pub struct Worker {
    queue: Arc<LaneQueue>,
    lane: String,
    receiver: tokio::sync::Mutex<UnboundedReceiver<Envelope>>,
    handler: Arc<dyn JobHandler>,
    max_attempts: u32,
    shutdown: Arc<Notify>,
}

impl Worker {
    /// Attach a worker to `lane`. Fails if the lane already has a consumer.
    pub fn new(
        queue: Arc<LaneQueue>,
        lane: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        max_attempts: u32,
    ) -> Result<Self, IngestError> {
        let lane = lane.into();
        let receiver = queue
            .take_receiver(&lane)
            .ok_or_else(|| IngestError::Enqueue(format!("Lane {} already has a worker", lane)))?;
        Ok(Self {
            queue,
            lane,
            receiver: tokio::sync::Mutex::new(receiver),
            handler,
            max_attempts: max_attempts.max(1),
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn lane(&self) -> &str {
        &self.lane
    }

    /// Process jobs until shutdown is signalled or every sender is gone.
    pub async fn run(&self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let mut receiver = self.receiver.lock().await;
        info!(lane = %self.lane, "Worker started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    info!(lane = %self.lane, "Worker shutting down");
                    return stats;
                }
                next = receiver.recv() => match next {
                    Some(envelope) => self.process(envelope, &mut stats).await,
                    None => return stats,
                }
            }
        }
    }

    /// Process everything currently queued, redeliveries included, then
    /// return.
    pub async fn drain(&self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let mut receiver = self.receiver.lock().await;
        while let Ok(envelope) = receiver.try_recv() {
            self.process(envelope, &mut stats).await;
        }
        debug!(lane = %self.lane, ?stats, "Lane drained");
        stats
    }

    /// Signal `run` to return after the job in progress.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    async fn process(&self, envelope: Envelope, stats: &mut WorkerStats) {
        let kind = envelope.job.kind();
        let attempt = envelope.attempt;
        match self.handler.run_job(&envelope.job).await {
            Ok(()) => {
                debug!(lane = %self.lane, kind, attempt, "Job completed");
                stats.completed += 1;
            }
            Err(e) if attempt < self.max_attempts => {
                warn!(lane = %self.lane, kind, attempt, error = %e, "Job failed, redelivering");
                let retry = Envelope {
                    job: envelope.job,
                    attempt: attempt + 1,
                };
                match self.queue.redeliver(&self.lane, retry) {
                    Ok(()) => stats.redelivered += 1,
                    Err(e) => {
                        error!(lane = %self.lane, kind, error = %e, "Redelivery failed");
                        stats.abandoned += 1;
                    }
                }
            }
            Err(e) => {
                error!(lane = %self.lane, kind, attempt, error = %e, "Job abandoned after final attempt");
                stats.abandoned += 1;
            }
        }
    }
}
