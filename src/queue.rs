//! Job queue and worker pool
//!
//! Persisted events are processed through a bounded in-process channel. A
//! pool of workers shares the receiver; failed jobs are re-enqueued with
//! exponential backoff and jitter until `max_attempts`, then written to
//! `dead_letter_jobs` and published on the dead-letter channel. The event
//! row itself stays unprocessed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, gauge, histogram};
use rand::{Rng, thread_rng};
use sea_orm::DatabaseConnection;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::PipelineError;
use crate::repositories::{DeadLetterRepository, EventRepository};

/// Initial pause before retrying an enqueue into a full channel.
const ENQUEUE_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub capacity: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub jitter_factor: f64,
    pub enqueue_retries: u32,
}

impl From<&WorkerConfig> for QueueConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            capacity: config.queue_capacity,
            max_attempts: config.max_attempts,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            jitter_factor: config.jitter_factor,
            enqueue_retries: config.enqueue_retries,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

/// One unit of work: process `event_id`. `attempt` counts prior failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub event_id: Uuid,
    pub attempt: u32,
}

/// Published when a job exhausts its attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub event_id: Uuid,
    pub attempts: u32,
    pub error: serde_json::Value,
}

#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, event_id: Uuid) -> Result<(), PipelineError>;
}

/// Delay before retrying a job that has failed `attempt + 1` times.
pub fn calculate_backoff(config: &QueueConfig, attempt: u32) -> Duration {
    let base = config.backoff_base.as_secs_f64();
    let max = config.backoff_max.as_secs_f64();
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let backoff = (base * 2_f64.powi(exponent)).min(max);

    let spread = config.jitter_factor * backoff;
    let jitter = if spread > 0.0 {
        thread_rng().gen_range(0.0..spread)
    } else {
        0.0
    };
    Duration::from_secs_f64(backoff + jitter)
}

/// Cloneable producer side of the queue.
#[derive(Clone)]
pub struct QueueHandle {
    sender: mpsc::Sender<Job>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    dead_letter_tx: broadcast::Sender<DeadLetter>,
    config: Arc<QueueConfig>,
    events: EventRepository,
    dead_letters: DeadLetterRepository,
}

impl QueueHandle {
    /// Create the queue; the receiver goes to [`WorkerPool::spawn`].
    pub fn new(db: DatabaseConnection, config: QueueConfig) -> (Self, mpsc::Receiver<Job>) {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let (dead_letter_tx, _) = broadcast::channel(64);
        let handle = Self {
            sender,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            dead_letter_tx,
            config: Arc::new(config),
            events: EventRepository::new(db.clone()),
            dead_letters: DeadLetterRepository::new(db),
        };
        (handle, receiver)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Queue `event_id` unless it is already queued or being processed.
    ///
    /// Returns `Ok(false)` for an event already in flight.
    pub async fn enqueue(&self, event_id: Uuid) -> Result<bool, PipelineError> {
        if !self.mark_in_flight(event_id) {
            debug!(event_id = %event_id, "Event already in flight");
            return Ok(false);
        }

        let job = Job {
            event_id,
            attempt: 0,
        };
        let mut delay = ENQUEUE_RETRY_DELAY;
        for attempt in 0..=self.config.enqueue_retries {
            match self.sender.try_send(job) {
                Ok(()) => {
                    self.report_depth();
                    return Ok(true);
                }
                Err(TrySendError::Closed(_)) => {
                    self.release(event_id);
                    return Err(PipelineError::QueueClosed);
                }
                Err(TrySendError::Full(_)) if attempt < self.config.enqueue_retries => {
                    warn!(event_id = %event_id, attempt, "Job queue full; retrying enqueue");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(TrySendError::Full(_)) => {}
            }
        }

        self.release(event_id);
        Err(PipelineError::QueueFull)
    }

    pub fn is_in_flight(&self, event_id: Uuid) -> bool {
        self.lock_in_flight().contains(&event_id)
    }

    pub fn subscribe_dead_letters(&self) -> broadcast::Receiver<DeadLetter> {
        self.dead_letter_tx.subscribe()
    }

    /// Re-enqueue events persisted more than `grace` ago that were never
    /// processed, are not in flight and were not dead-lettered.
    ///
    /// Stops early once the queue is full; the remainder is picked up by a
    /// later sweep.
    pub async fn reconcile_unqueued(&self, grace: Duration) -> Result<usize, PipelineError> {
        let grace = chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(grace)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let in_flight: HashSet<Uuid> = self.lock_in_flight().iter().copied().collect();
        let stranded = self.events.list_unprocessed_before(cutoff, &in_flight).await?;
        let total = stranded.len();

        let mut requeued = 0;
        for (index, event) in stranded.into_iter().enumerate() {
            match self.enqueue(event.id).await {
                Ok(true) => requeued += 1,
                Ok(false) => {}
                Err(PipelineError::QueueFull) => {
                    // The rest waits for the next sweep.
                    warn!(
                        requeued,
                        remaining = total - index,
                        "Job queue full; stopping reconciliation early"
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        if requeued > 0 {
            counter!("jobs_reconciled_total").increment(requeued as u64);
            info!(requeued, "Reconciled unqueued events");
        }
        Ok(requeued)
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn mark_in_flight(&self, event_id: Uuid) -> bool {
        self.lock_in_flight().insert(event_id)
    }

    fn release(&self, event_id: Uuid) {
        self.lock_in_flight().remove(&event_id);
        self.report_depth();
    }

    fn report_depth(&self) {
        gauge!("queue_in_flight").set(self.lock_in_flight().len() as f64);
    }

    /// Put a failed job back on the queue after its backoff.
    fn schedule_retry(&self, job: Job, delay: Duration, shutdown: CancellationToken) {
        let sender = self.sender.clone();
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    handle.release(job.event_id);
                }
                _ = tokio::time::sleep(delay) => {
                    if sender.send(job).await.is_err() {
                        handle.release(job.event_id);
                    }
                }
            }
        });
    }

    async fn dead_letter(&self, job: Job, attempts: u32, error: &PipelineError) {
        let details = error.to_details();
        if let Err(err) = self
            .dead_letters
            .insert(job.event_id, attempts, details.clone())
            .await
        {
            error!(event_id = %job.event_id, error = %err, "Failed to persist dead letter");
        }

        counter!("jobs_dead_lettered_total").increment(1);
        error!(
            event_id = %job.event_id,
            attempts,
            error = %error,
            "Job exhausted retries; dead-lettered"
        );

        self.release(job.event_id);
        let _ = self.dead_letter_tx.send(DeadLetter {
            event_id: job.event_id,
            attempts,
            error: details,
        });
    }
}

/// Worker tasks consuming one shared receiver.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        handle: QueueHandle,
        receiver: mpsc::Receiver<Job>,
        processor: Arc<dyn JobProcessor>,
        shutdown: CancellationToken,
    ) -> Self {
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let concurrency = handle.config.concurrency.max(1);

        let workers = (0..concurrency)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    handle: handle.clone(),
                    receiver: Arc::clone(&receiver),
                    processor: Arc::clone(&processor),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(concurrency, "Worker pool started");
        Self { workers }
    }

    /// Wait for every worker to exit (after shutdown is cancelled).
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(err) = worker.await {
                error!(error = %err, "Worker task terminated abnormally");
            }
        }
    }
}

struct Worker {
    id: usize,
    handle: QueueHandle,
    receiver: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    processor: Arc<dyn JobProcessor>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                job = async { self.receiver.lock().await.recv().await } => job,
            };
            let Some(job) = next else {
                break;
            };
            self.handle_job(job).await;
        }
        debug!(worker_id = self.id, "Worker stopped");
    }

    #[instrument(skip(self), fields(worker_id = self.id, event_id = %job.event_id, attempt = job.attempt))]
    async fn handle_job(&self, job: Job) {
        let started = Instant::now();
        let processor = Arc::clone(&self.processor);

        // A panic inside the processor is contained to this job.
        let outcome = match tokio::spawn(async move { processor.process(job.event_id).await }).await
        {
            Ok(result) => result,
            Err(join_err) => Err(PipelineError::ProcessingFailure {
                event_id: job.event_id,
                reason: format!("processor task failed: {join_err}"),
            }),
        };

        histogram!("worker_job_duration_ms").record(started.elapsed().as_millis() as f64);

        match outcome {
            Ok(()) => {
                debug!("Job completed");
                self.handle.release(job.event_id);
            }
            Err(err) => {
                counter!("jobs_failed_total").increment(1);
                let attempts = job.attempt + 1;
                if attempts >= self.handle.config.max_attempts {
                    self.handle.dead_letter(job, attempts, &err).await;
                    return;
                }

                let delay = calculate_backoff(&self.handle.config, job.attempt);
                warn!(
                    error = %err,
                    attempts,
                    backoff_ms = delay.as_millis() as u64,
                    "Job failed; scheduling retry"
                );
                self.handle.schedule_retry(
                    Job {
                        event_id: job.event_id,
                        attempt: attempts,
                    },
                    delay,
                    self.shutdown.clone(),
                );
            }
        }
    }
}
