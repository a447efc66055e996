//! Per-tenant serialization queue.
//!
//! Each tenant gets one worker task that owns the tenant's connection and
//! drains a bounded FIFO channel. Because the worker is the only code that
//! ever touches the connection and it finishes one job before receiving the
//! next, jobs for a tenant never overlap and run in submission order. Jobs
//! for different tenants run on different workers and never wait on each
//! other.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use sqlx::{Connection, SqliteConnection};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::executor;
use super::query::{Query, QueryOutput};
use crate::error::{Error, Result};
use crate::tenant::TenantId;

/// The work carried by a job.
#[derive(Debug, Clone)]
pub enum Work {
    /// One statement.
    Single(Query),
    /// Statements run atomically as one transaction.
    Batch(Vec<Query>),
}

impl Work {
    fn statements(&self) -> usize {
        match self {
            Work::Single(_) => 1,
            Work::Batch(queries) => queries.len(),
        }
    }
}

/// What a finished job produced; mirrors [`Work`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutput {
    Single(QueryOutput),
    Batch(Vec<QueryOutput>),
}

/// Receiver resolved exactly once when the job finishes.
pub type Completion = oneshot::Receiver<Result<JobOutput>>;

struct Job {
    work: Work,
    enqueued_at: Instant,
    reply: oneshot::Sender<Result<JobOutput>>,
}

enum Command {
    Run(Job),
    /// Sent behind every queued job at shutdown; the worker closes the
    /// connection once it gets here.
    Close,
}

/// Counters shared between a queue and its worker.
#[derive(Debug, Default)]
pub struct QueueStats {
    processed: AtomicU64,
    failed: AtomicU64,
    expired: AtomicU64,
    running: AtomicBool,
}

impl QueueStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    /// Whether a job is executing right now.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// Queue limits applied to every tenant.
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub max_depth: usize,
    pub max_wait: Option<Duration>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_depth: 1024,
            max_wait: None,
        }
    }
}

/// Handle to one tenant's job queue.
pub struct TenantQueue {
    tenant: TenantId,
    sender: mpsc::Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closing: AtomicBool,
    stats: Arc<QueueStats>,
}

impl TenantQueue {
    /// Spawn the worker that takes ownership of `conn`.
    pub fn spawn(tenant: TenantId, conn: SqliteConnection, settings: QueueSettings) -> Self {
        let (sender, receiver) = mpsc::channel(settings.max_depth.max(1));
        let stats = Arc::new(QueueStats::default());

        let worker = tokio::spawn(run_worker(
            tenant.clone(),
            conn,
            receiver,
            settings.max_wait,
            stats.clone(),
        ));

        Self {
            tenant,
            sender,
            worker: Mutex::new(Some(worker)),
            closing: AtomicBool::new(false),
            stats,
        }
    }

    /// Append a job to the tail of the queue without waiting for it.
    ///
    /// The submission order of calls to this method is the execution order.
    pub fn submit(&self, work: Work) -> Result<Completion> {
        let (reply, completion) = oneshot::channel();
        let job = Job {
            work,
            enqueued_at: Instant::now(),
            reply,
        };

        match self.sender.try_send(Command::Run(job)) {
            Ok(()) => Ok(completion),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    tenant = %self.tenant,
                    depth = self.depth(),
                    "Tenant queue full, rejecting job"
                );
                Err(Error::Busy {
                    tenant: self.tenant.to_string(),
                    depth: self.depth(),
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) if self.closing.load(Ordering::Acquire) => {
                Err(Error::ShuttingDown)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!(tenant = %self.tenant, "Tenant worker is gone, rejecting job");
                Err(Error::Internal(format!(
                    "worker for tenant '{}' stopped unexpectedly",
                    self.tenant
                )))
            }
        }
    }

    /// Submit a job and wait until it has run.
    pub async fn enqueue(&self, work: Work) -> Result<JobOutput> {
        let completion = self.submit(work)?;
        await_completion(&self.tenant, completion).await
    }

    /// Jobs accepted but not yet picked up by the worker.
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// Let every queued job finish, then close the connection and wait for
    /// the worker to exit. Idempotent.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::Release);
        // Waits for room if the queue is full; the worker keeps draining.
        if self.sender.send(Command::Close).await.is_err() {
            tracing::debug!(tenant = %self.tenant, "Tenant worker already stopped");
        }

        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(tenant = %self.tenant, error = %e, "Tenant worker panicked");
            }
        }
    }
}

/// Wait for a submitted job's result.
pub async fn await_completion(tenant: &TenantId, completion: Completion) -> Result<JobOutput> {
    completion.await.map_err(|_| {
        Error::Internal(format!(
            "worker for tenant '{}' stopped before finishing the job",
            tenant
        ))
    })?
}

async fn run_worker(
    tenant: TenantId,
    mut conn: SqliteConnection,
    mut receiver: mpsc::Receiver<Command>,
    max_wait: Option<Duration>,
    stats: Arc<QueueStats>,
) {
    tracing::debug!(tenant = %tenant, "Tenant worker started");

    while let Some(command) = receiver.recv().await {
        let job = match command {
            Command::Run(job) => job,
            Command::Close => break,
        };

        let waited = job.enqueued_at.elapsed();
        let statements = job.work.statements();

        let outcome = match max_wait {
            Some(limit) if waited > limit => {
                stats.expired.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    tenant = %tenant,
                    waited_ms = waited.as_millis() as u64,
                    "Job exceeded queue wait limit, not started"
                );
                Err(Error::Expired {
                    tenant: tenant.to_string(),
                    waited_ms: waited.as_millis() as u64,
                })
            }
            _ => {
                stats.running.store(true, Ordering::Relaxed);
                let started = Instant::now();
                let outcome = AssertUnwindSafe(run_job(&mut conn, job.work))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!(tenant = %tenant, statements, "Job panicked");
                        Err(Error::Internal("job panicked while running".to_string()))
                    });
                stats.running.store(false, Ordering::Relaxed);

                tracing::debug!(
                    tenant = %tenant,
                    statements,
                    queued_ms = waited.as_millis() as u64,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    ok = outcome.is_ok(),
                    "Job finished"
                );
                if outcome.is_err() {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                }
                outcome
            }
        };
        stats.processed.fetch_add(1, Ordering::Relaxed);

        if job.reply.send(outcome).is_err() {
            tracing::debug!(tenant = %tenant, "Caller stopped waiting before the job finished");
        }
    }

    // Nothing is admitted after Close, but fail anything that slipped in
    // rather than leaving its caller waiting forever.
    receiver.close();
    while let Ok(command) = receiver.try_recv() {
        if let Command::Run(job) = command {
            let _ = job.reply.send(Err(Error::ShuttingDown));
        }
    }

    if let Err(e) = conn.close().await {
        tracing::warn!(tenant = %tenant, error = %e, "Error closing tenant database");
    } else {
        tracing::info!(tenant = %tenant, "Closed tenant database");
    }
}

async fn run_job(conn: &mut SqliteConnection, work: Work) -> Result<JobOutput> {
    match work {
        Work::Single(query) => executor::execute(conn, &query)
            .await
            .map(JobOutput::Single)
            .map_err(Error::from),
        Work::Batch(queries) => executor::execute_batch(conn, &queries)
            .await
            .map(JobOutput::Batch),
    }
}
