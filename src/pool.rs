//! Bounded prover pool and generation job registry
//!
//! Proving is CPU-bound and may take seconds. [`ProverPool`] runs it on
//! tokio's blocking threads behind a semaphore, so at most `workers` proofs
//! are in flight and the request-accept path never blocks.
//!
//! [`JobRegistry`] tracks each generation as `Pending → Ready | Failed`
//! through a `watch` channel per job. Callers may wait with a timeout or poll
//! by id. The job keeps running when a waiter goes away; its result is
//! persisted and stays pollable until pruned.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio::sync::{watch, Semaphore};

use crate::error::{ClaimProofError, StoreError};
use crate::record::{JobId, ProofRecord};

/// Semaphore-capped pool over `spawn_blocking`.
#[derive(Clone, Debug)]
pub struct ProverPool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl ProverPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Idle permits right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `f` on a blocking thread once a permit is free. The permit moves
    /// into the blocking task and is released only when `f` returns, even if
    /// the awaiting future is dropped first.
    pub async fn run<T, Job>(&self, f: Job) -> Result<T, ClaimProofError>
    where
        Job: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ClaimProofError::ProofGenerationFailed("prover pool closed".into()))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|je| {
            if je.is_panic() {
                ClaimProofError::ProofGenerationFailed("prover panicked".into())
            } else {
                ClaimProofError::ProofGenerationFailed("prover task cancelled".into())
            }
        })
    }
}

/// Observable state of a generation job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Ready(ProofRecord),
    Failed(ClaimProofError),
}

impl JobStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, JobStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Ready(_) => "ready",
            JobStatus::Failed(_) => "failed",
        }
    }
}

struct JobSlot {
    rx: watch::Receiver<JobStatus>,
    finished_at: Option<Instant>,
}

type Slots = Arc<Mutex<HashMap<JobId, JobSlot>>>;

/// In-process registry of generation jobs.
#[derive(Clone)]
pub struct JobRegistry {
    slots: Slots,
    retention: Duration,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.len())
            .field("retention", &self.retention)
            .finish()
    }
}

/// Completion side of one job. Dropping it unfinished marks the job failed.
pub struct JobHandle {
    id: JobId,
    tx: watch::Sender<JobStatus>,
    slots: Slots,
    done: bool,
}

impl JobHandle {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn complete(mut self, status: JobStatus) {
        self.finish(status);
    }

    fn finish(&mut self, status: JobStatus) {
        self.done = true;
        // send_replace never fails, even with no receivers left.
        self.tx.send_replace(status);
        if let Ok(mut g) = self.slots.lock() {
            if let Some(slot) = g.get_mut(&self.id) {
                slot.finished_at = Some(Instant::now());
            }
        }
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if !self.done {
            self.finish(JobStatus::Failed(ClaimProofError::ProofGenerationFailed(
                "generation task ended without a result".into(),
            )));
        }
    }
}

/// Remove finished slots older than `retention`; returns how many went.
fn drop_expired(slots: &mut HashMap<JobId, JobSlot>, retention: Duration) -> usize {
    let before = slots.len();
    slots.retain(|_, slot| match slot.finished_at {
        Some(t) => t.elapsed() < retention,
        None => true,
    });
    before - slots.len()
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            retention,
        }
    }

    /// Register a new pending job. Expired finished jobs are dropped on the
    /// way, so the registry stays bounded without an external pruner.
    pub fn register(&self) -> Result<JobHandle, StoreError> {
        let id = JobId::random();
        let (tx, rx) = watch::channel(JobStatus::Pending);
        let mut g = self.slots.lock().map_err(|_| StoreError::Poisoned)?;
        drop_expired(&mut g, self.retention);
        g.insert(
            id.clone(),
            JobSlot {
                rx,
                finished_at: None,
            },
        );
        Ok(JobHandle {
            id,
            tx,
            slots: self.slots.clone(),
            done: false,
        })
    }

    fn receiver(&self, id: &JobId) -> Result<watch::Receiver<JobStatus>, ClaimProofError> {
        let g = self.slots.lock().map_err(|_| StoreError::Poisoned)?;
        g.get(id)
            .map(|s| s.rx.clone())
            .ok_or_else(|| ClaimProofError::JobNotFound(id.clone()))
    }

    /// Current status without waiting.
    pub fn status(&self, id: &JobId) -> Result<JobStatus, ClaimProofError> {
        let rx = self.receiver(id)?;
        let status = rx.borrow().clone();
        Ok(status)
    }

    /// Wait up to `timeout` for a terminal status; `Ok(Pending)` on timeout.
    pub async fn wait(&self, id: &JobId, timeout: Duration) -> Result<JobStatus, ClaimProofError> {
        let mut rx = self.receiver(id)?;
        let waited = tokio::time::timeout(timeout, rx.wait_for(|s| !s.is_pending()))
            .await
            .map(|r| r.map(|s| s.clone()));
        match waited {
            Ok(Ok(status)) => Ok(status),
            // Sender gone: the handle's Drop already published a final status.
            Ok(Err(_)) => Ok(rx.borrow().clone()),
            Err(_) => Ok(JobStatus::Pending),
        }
    }

    /// Drop finished jobs older than the retention window. Returns how many
    /// were removed.
    pub fn prune(&self) -> usize {
        let Ok(mut g) = self.slots.lock() else {
            return 0;
        };
        drop_expired(&mut g, self.retention)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
