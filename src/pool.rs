//! Bounded-concurrency worker pool
//!
//! [`WorkerPool`] runs submitted jobs on a fixed number of worker threads.
//! Each worker owns at most one job at a time and drives its retries
//! sequentially, so no more than `capacity` job processes ever run at once.
//! Jobs beyond capacity wait in an unbounded FIFO queue.
//!
//! # Lifecycle
//!
//! ```text
//! new() ──start()──▶ Running ──join_all()──▶ Running ──stop()──▶ Stopped
//!                     ▲    │
//!                     └────┘ submit()
//! ```
//!
//! `submit` and `join_all` before `start`, or anything after `stop`, return a
//! [`PoolError`]. `join_all` only signals that every job is terminal; whether
//! a job succeeded is recorded in its log directory.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::executor::{JobRunner, ProcessRunner};
use crate::job::{Job, JobCommand, JobId, JobOutcome};
use crate::log_record::{AttemptEntry, JobStatus, JobSummary, LogRecord};
use crate::retry::RetryPolicy;

/// Errors from pool lifecycle operations.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool capacity must be at least 1")]
    ZeroCapacity,

    #[error("pool has not been started")]
    NotStarted,

    #[error("pool is already running")]
    AlreadyStarted,

    #[error("pool has been stopped")]
    Stopped,

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

#[derive(Debug)]
struct QueueState {
    lifecycle: Lifecycle,
    pending: VecDeque<Job>,
    in_flight: usize,
    next_id: u64,
}

impl QueueState {
    fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }
}

struct Shared {
    state: Mutex<QueueState>,
    /// Signalled when a job is queued or the pool stops.
    work_ready: Condvar,
    /// Signalled when the queue is empty and nothing is in flight.
    drained: Condvar,
    runner: Arc<dyn JobRunner>,
}

impl Shared {
    // A worker that panicked while holding the lock cannot leave the queue
    // half-updated: every critical section is a handful of field writes.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fixed-capacity pool executing jobs with retries and log capture.
pub struct WorkerPool {
    capacity: usize,
    retry_delay: Duration,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Create a pool of `capacity` workers using `runner` for every attempt.
    pub fn new(capacity: usize, runner: Arc<dyn JobRunner>) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            retry_delay: Duration::ZERO,
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    lifecycle: Lifecycle::Created,
                    pending: VecDeque::new(),
                    in_flight: 0,
                    next_id: 1,
                }),
                work_ready: Condvar::new(),
                drained: Condvar::new(),
                runner,
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Create a pool whose jobs run as child processes.
    pub fn with_process_runner(capacity: usize, runner: ProcessRunner) -> Result<Self, PoolError> {
        Self::new(capacity, Arc::new(runner))
    }

    /// Pause between a failed attempt and the next one (default: none).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Spawn the workers and start accepting jobs.
    pub fn start(&self) -> Result<(), PoolError> {
        let mut workers = self.lock_workers();
        {
            let state = self.shared.lock();
            match state.lifecycle {
                Lifecycle::Created => {}
                Lifecycle::Running => return Err(PoolError::AlreadyStarted),
                Lifecycle::Stopped => return Err(PoolError::Stopped),
            }
        }

        for index in 0..self.capacity {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("pool-worker-{}", index))
                .spawn(move || worker_loop(index, shared));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!(index, error = %e, "failed to spawn worker thread");
                    // Workers only exit once the pool is stopped; do that
                    // briefly, then return to Created so nothing is left behind.
                    self.shared.lock().lifecycle = Lifecycle::Stopped;
                    self.shared.work_ready.notify_all();
                    for handle in workers.drain(..) {
                        let _ = handle.join();
                    }
                    self.shared.lock().lifecycle = Lifecycle::Created;
                    return Err(PoolError::WorkerSpawn(e));
                }
            }
        }

        self.shared.lock().lifecycle = Lifecycle::Running;
        // Workers spawned before the flip may be waiting already.
        self.shared.work_ready.notify_all();
        info!(capacity = self.capacity, "worker pool started");
        Ok(())
    }

    /// Queue a job. Returns as soon as it is enqueued.
    pub fn submit(
        &self,
        command: JobCommand,
        log_dir: impl Into<PathBuf>,
        retry_budget: u32,
    ) -> Result<JobId, PoolError> {
        let retry = RetryPolicy::new(retry_budget).with_delay(self.retry_delay);
        let log_dir = log_dir.into();

        let mut state = self.shared.lock();
        match state.lifecycle {
            Lifecycle::Running => {}
            Lifecycle::Created => return Err(PoolError::NotStarted),
            Lifecycle::Stopped => return Err(PoolError::Stopped),
        }

        let id = JobId(state.next_id);
        state.next_id += 1;
        debug!(%id, %command, log_dir = %log_dir.display(), retry_budget, "job submitted");
        state.pending.push_back(Job::new(id, command, log_dir, retry));
        drop(state);

        self.shared.work_ready.notify_one();
        Ok(id)
    }

    /// Block until every job submitted so far is terminal.
    pub fn join_all(&self) -> Result<(), PoolError> {
        let mut state = self.shared.lock();
        match state.lifecycle {
            Lifecycle::Running => {}
            Lifecycle::Created => return Err(PoolError::NotStarted),
            Lifecycle::Stopped => return Err(PoolError::Stopped),
        }

        while !state.is_drained() {
            state = self
                .shared
                .drained
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        debug!("all submitted jobs are terminal");
        Ok(())
    }

    /// Stop accepting jobs, drop queued ones, wait for in-flight jobs and
    /// join the workers.
    pub fn stop(&self) -> Result<(), PoolError> {
        let mut workers = self.lock_workers();
        {
            let mut state = self.shared.lock();
            match state.lifecycle {
                Lifecycle::Running => {}
                Lifecycle::Created => return Err(PoolError::NotStarted),
                Lifecycle::Stopped => return Err(PoolError::Stopped),
            }
            state.lifecycle = Lifecycle::Stopped;

            if !state.pending.is_empty() {
                warn!(discarded = state.pending.len(), "stopping pool with jobs still queued");
                state.pending.clear();
            }
        }
        self.shared.work_ready.notify_all();

        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }

        // Anyone still blocked in join_all sees an empty queue now.
        self.shared.drained.notify_all();
        info!("worker pool stopped");
        Ok(())
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let running = self.shared.lock().lifecycle == Lifecycle::Running;
        if running {
            debug!("worker pool dropped while running, stopping");
            let _ = self.stop();
        }
    }
}

fn worker_loop(index: usize, shared: Arc<Shared>) {
    debug!(worker = index, "worker started");
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if state.lifecycle == Lifecycle::Stopped {
                    debug!(worker = index, "worker exiting");
                    return;
                }
                if state.lifecycle == Lifecycle::Running {
                    if let Some(job) = state.pending.pop_front() {
                        state.in_flight += 1;
                        break job;
                    }
                }
                state = shared
                    .work_ready
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };

        let id = job.id;
        let runner = shared.runner.as_ref();
        match panic::catch_unwind(AssertUnwindSafe(|| run_job(job, runner))) {
            Ok(outcome) => debug!(worker = index, %id, attempts = outcome.attempts(), "job terminal"),
            Err(_) => error!(worker = index, %id, "job runner panicked, job abandoned"),
        }

        let mut state = shared.lock();
        state.in_flight -= 1;
        if state.is_drained() {
            shared.drained.notify_all();
        }
    }
}

/// Drive one job through its retry policy and record the result.
fn run_job(mut job: Job, runner: &dyn JobRunner) -> JobOutcome {
    let started = Instant::now();
    let log = match LogRecord::prepare(&job.log_dir) {
        Ok(log) => log,
        Err(e) => {
            // Attempts still run; the runner reports them as launch failures.
            error!(id = %job.id, log_dir = %job.log_dir.display(), error = %e, "cannot create log directory");
            LogRecord::new(&job.log_dir)
        }
    };

    let mut attempts = Vec::new();
    let result = job.retry.execute(|attempt| {
        job.attempts_made = attempt;
        let outcome = runner.run_attempt(&job.command, &log, attempt);
        if !outcome.is_success() {
            warn!(
                id = %job.id,
                attempt,
                max_attempts = job.retry.max_attempts(),
                %outcome,
                "job attempt failed"
            );
        }
        let succeeded = outcome.is_success();
        attempts.push(AttemptEntry {
            attempt,
            outcome,
            log_file: format!("attempt-{}.log", attempt),
        });
        succeeded
    });

    let (outcome, status) = if result.succeeded {
        info!(id = %job.id, attempts = result.attempts, "job succeeded");
        (
            JobOutcome::Succeeded {
                attempts: result.attempts,
            },
            JobStatus::Succeeded,
        )
    } else {
        error!(
            id = %job.id,
            attempts = result.attempts,
            log_dir = %job.log_dir.display(),
            "job failed, retry budget exhausted"
        );
        (
            JobOutcome::Exhausted {
                attempts: result.attempts,
            },
            JobStatus::Failed,
        )
    };

    let summary = JobSummary {
        job_id: job.id,
        command: job.command.to_string(),
        status,
        max_attempts: job.retry.max_attempts(),
        attempts,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    if let Err(e) = log.write_summary(&summary) {
        warn!(id = %job.id, error = %e, "could not write job summary");
    }

    outcome
}
