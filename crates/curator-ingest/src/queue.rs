//! Named job lanes.
//!
//! Each lane is an unbounded tokio channel with a single consumer. Enqueueing
//! never blocks; it only fails once the lane's consumer has gone away.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use curator_core::types::Job;

use crate::error::IngestError;

/// A job plus its delivery count, starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub job: Job,
    pub attempt: u32,
}

/// Hand-off point between the actor and the workers.
pub trait JobQueue: Send + Sync {
    /// Schedule `job` on `lane` without waiting for it to run.
    fn enqueue(&self, lane: &str, job: Job) -> Result<(), IngestError>;
}

struct Lane {
    sender: UnboundedSender<Envelope>,
    receiver: Option<UnboundedReceiver<Envelope>>,
}

impl Lane {
    fn open() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

/// In-process queue with lanes created on first use.
#[derive(Default)]
pub struct LaneQueue {
    lanes: Mutex<HashMap<String, Lane>>,
}

impl LaneQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the consuming end of `lane`. Only one consumer per lane; later
    /// calls return `None`.
    pub fn take_receiver(&self, lane: &str) -> Option<UnboundedReceiver<Envelope>> {
        let mut lanes = self.lanes.lock().ok()?;
        lanes
            .entry(lane.to_string())
            .or_insert_with(Lane::open)
            .receiver
            .take()
    }

    /// Put an envelope back on its lane.
    pub fn redeliver(&self, lane: &str, envelope: Envelope) -> Result<(), IngestError> {
        debug!(lane, kind = envelope.job.kind(), attempt = envelope.attempt, "Redelivering job");
        self.send(lane, envelope)
    }

    fn send(&self, lane: &str, envelope: Envelope) -> Result<(), IngestError> {
        let mut lanes = self
            .lanes
            .lock()
            .map_err(|e| IngestError::Enqueue(format!("Lock poisoned: {}", e)))?;
        lanes
            .entry(lane.to_string())
            .or_insert_with(Lane::open)
            .sender
            .send(envelope)
            .map_err(|_| IngestError::Enqueue(format!("Lane {} is closed", lane)))
    }
}

impl JobQueue for LaneQueue {
    fn enqueue(&self, lane: &str, job: Job) -> Result<(), IngestError> {
        let kind = job.kind();
        self.send(lane, Envelope { job, attempt: 1 })?;
        debug!(lane, kind, "Job enqueued");
        Ok(())
    }
}
