//! Background execution of project fetches.
//!
//! A [`JobQueue`] owns one bounded channel shared by all worker tasks, so the
//! next job goes to whichever worker is free. Enqueueing never waits: the
//! caller learns immediately whether the job was accepted and the fetch itself
//! happens later on a worker.

use crate::error::{Error, Result};
use crate::model::ProfessorId;
use crate::workflow::{FetchSummary, ProjectUpsertWorkflow};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, error, info, instrument, trace, warn};

/// Refresh the projects of one professor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FetchJob {
    pub professor_id: ProfessorId,
}

impl FetchJob {
    pub fn new(professor_id: ProfessorId) -> Self {
        Self { professor_id }
    }

    pub async fn execute(&self, workflow: &ProjectUpsertWorkflow) -> Result<FetchSummary> {
        let professor = workflow.store().get_professor(self.professor_id).await?;
        workflow.run(&professor).await
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
pub enum WorkRequest {
    Fetch(FetchJob),
    Shutdown { response: oneshot::Sender<()> },
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<WorkRequest>>>;

pub struct JobQueue {
    sender: mpsc::Sender<WorkRequest>,
    // Held for reading while a job is sent, so that no job can slip in behind
    // the shutdown requests.
    closed: RwLock<bool>,
}

impl JobQueue {
    /// Build a queue holding at most `capacity` pending jobs, and the
    /// receiving end its workers will share.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WorkRequest>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender,
                closed: RwLock::new(false),
            },
            receiver,
        )
    }

    /// Build a queue and spawn its workers on the current runtime.
    pub fn start(
        workflow: Arc<ProjectUpsertWorkflow>,
        workers: usize,
        capacity: usize,
        retry: RetryPolicy,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (queue, receiver) = Self::channel(capacity);
        let receiver: SharedReceiver = Arc::new(Mutex::new(receiver));
        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    receiver.clone(),
                    workflow.clone(),
                    retry,
                ))
            })
            .collect();
        info!(workers, capacity, "fetch workers started");
        (queue, handles)
    }

    pub fn enqueue(&self, job: FetchJob) -> Result<()> {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(Error::QueueClosed);
        }
        match self.sender.try_send(WorkRequest::Fetch(job)) {
            Ok(()) => {
                debug!(professor = %job.professor_id, "fetch job queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(Error::QueueFull),
            Err(TrySendError::Closed(_)) => Err(Error::QueueClosed),
        }
    }

    /// Refuse new jobs, let the workers finish what is already queued, then
    /// stop them. Workers still running once `grace` has elapsed are aborted.
    pub async fn shutdown(&self, workers: Vec<JoinHandle<()>>, grace: Duration) {
        *self.closed.write().unwrap_or_else(PoisonError::into_inner) = true;
        let deadline = Instant::now() + grace;
        // Queued jobs come first, so each worker only sees its shutdown
        // request once the queue has been drained.
        let mut acks = Vec::with_capacity(workers.len());
        for _ in 0..workers.len() {
            let (response, ack) = oneshot::channel();
            match timeout_at(deadline, self.sender.send(WorkRequest::Shutdown { response })).await {
                Ok(Ok(())) => acks.push(ack),
                Ok(Err(_)) => {
                    warn!("workers already stopped");
                    break;
                }
                Err(_) => {
                    warn!("job queue still full at shutdown deadline");
                    break;
                }
            }
        }
        let mut acknowledged = 0;
        for ack in acks {
            match timeout_at(deadline, ack).await {
                Ok(Ok(())) => acknowledged += 1,
                Ok(Err(_)) => error!("worker dropped its shutdown acknowledgement"),
                Err(_) => break,
            }
        }
        debug!(acknowledged, "shutdown acknowledged");
        for (worker_idx, mut handle) in workers.into_iter().enumerate() {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => trace!(worker_idx, "worker stopped"),
                Ok(Err(e)) => error!(worker_idx, error = %e, "worker panicked"),
                Err(_) => {
                    warn!(worker_idx, "worker did not stop in time, aborting it");
                    handle.abort();
                }
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: SharedReceiver,
    workflow: Arc<ProjectUpsertWorkflow>,
    retry: RetryPolicy,
) {
    trace!("worker {worker_id} started");
    loop {
        let work = rx.lock().await.recv().await;
        match work {
            Some(WorkRequest::Fetch(job)) => {
                debug!(professor = %job.professor_id, "worker {worker_id} picked up fetch job");
                // Failures have already been logged.
                let _ = run_with_retries(job, &workflow, retry).await;
            }
            Some(WorkRequest::Shutdown { response }) => {
                debug!("worker {worker_id} received shutdown signal");
                if response.send(()).is_err() {
                    error!("worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
            None => break,
        }
    }
    trace!("worker {worker_id} stopped");
}

/// Execute `job`, running it again after retryable failures.
#[instrument(level = "debug", skip(workflow, retry), fields(professor = %job.professor_id))]
pub async fn run_with_retries(
    job: FetchJob,
    workflow: &ProjectUpsertWorkflow,
    retry: RetryPolicy,
) -> Result<FetchSummary> {
    let mut attempt = 1;
    loop {
        match job.execute(workflow).await {
            Ok(summary) => return Ok(summary),
            Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                warn!(attempt, error = %e, "fetch job failed, retrying");
                sleep(retry.delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!(attempt, error = %e, "fetch job failed");
                return Err(e);
            }
        }
    }
}
