use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{FabricConfig, Job, QueueName, QueuePolicy};
use crate::job_queue::JobQueue;

/// Stage logic invoked for every job claimed from a queue.
///
/// Returning an error hands the job back to the queue's retry machinery;
/// whether it is retried depends on [`AppError::is_retryable`] and the
/// job's remaining attempts.
pub trait JobHandler: Send + Sync + Clone + 'static {
    fn handle(&self, job: &Job) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Events emitted by queue workers for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
        queue: QueueName,
        concurrency: usize,
    },
    JobClaimed {
        job: &'a Job,
    },
    JobCompleted {
        job_id: Uuid,
        queue: QueueName,
        elapsed: Duration,
    },
    JobFailed {
        job_id: Uuid,
        queue: QueueName,
        error: &'a str,
        attempt: u32,
        will_retry: bool,
    },
    JobStalled {
        job_id: Uuid,
        queue: QueueName,
    },
    JobDeferred {
        job_id: Uuid,
        queue: QueueName,
        run_at: DateTime<Utc>,
    },
    /// The worker lost the job (stall recovery) before it could record
    /// the outcome, so the outcome was dropped.
    OutcomeDiscarded {
        job_id: Uuid,
        queue: QueueName,
    },
    ShuttingDown {
        worker_id: &'a str,
        jobs_released: u64,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started {
                worker_id,
                queue,
                concurrency,
            } => {
                tracing::info!(%worker_id, %queue, concurrency, "Worker started");
            }
            WorkerEvent::JobClaimed { job } => {
                tracing::debug!(
                    job_id = %job.id,
                    queue = %job.queue,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    "Job claimed"
                );
            }
            WorkerEvent::JobCompleted {
                job_id,
                queue,
                elapsed,
            } => {
                tracing::info!(%job_id, %queue, elapsed_ms = elapsed.as_millis() as u64, "Job completed");
            }
            WorkerEvent::JobFailed {
                job_id,
                queue,
                error,
                attempt,
                will_retry,
            } => {
                if will_retry {
                    tracing::warn!(%job_id, %queue, %error, attempt, "Job failed, will retry");
                } else {
                    tracing::error!(%job_id, %queue, %error, attempt, "Job failed permanently");
                }
            }
            WorkerEvent::JobStalled { job_id, queue } => {
                tracing::warn!(%job_id, %queue, "Stalled job recovered");
            }
            WorkerEvent::JobDeferred {
                job_id,
                queue,
                run_at,
            } => {
                tracing::debug!(%job_id, %queue, %run_at, "Job deferred");
            }
            WorkerEvent::OutcomeDiscarded { job_id, queue } => {
                tracing::warn!(%job_id, %queue, "Job no longer held by this worker, outcome discarded");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                jobs_released,
            } => {
                tracing::info!(%worker_id, %jobs_released, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Consumer for one named queue.
///
/// Runs up to `policy.concurrency` handlers at once, heartbeats every active
/// job, and periodically returns stalled jobs of its queue to `waiting`.
#[derive(Clone)]
pub struct QueueWorker<Q, H>
where
    Q: JobQueue,
    H: JobHandler,
{
    queue: Q,
    queue_name: QueueName,
    handler: H,
    policy: QueuePolicy,
    worker_id: String,
    poll_interval: Duration,
    stall_timeout: Duration,
}

impl<Q, H> QueueWorker<Q, H>
where
    Q: JobQueue + 'static,
    H: JobHandler,
{
    pub fn new(queue: Q, queue_name: QueueName, handler: H, config: &FabricConfig) -> Self {
        Self {
            queue,
            queue_name,
            handler,
            policy: config.policy(queue_name),
            worker_id: config.consumer_id(queue_name),
            poll_interval: config.poll_interval,
            stall_timeout: config.stall_timeout,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run the consume loop until cancellation.
    ///
    /// In-flight jobs are allowed to finish; anything still held by this
    /// worker afterwards is released back to the queue.
    pub async fn run<R>(self, cancel_token: CancellationToken, reporter: Arc<R>) -> Result<(), AppError>
    where
        R: WorkerReporter + 'static,
    {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.worker_id,
            queue: self.queue_name,
            concurrency: self.policy.concurrency,
        });

        let permits = Arc::new(Semaphore::new(self.policy.concurrency));
        let mut tasks = JoinSet::new();
        let mut last_recovery: Option<Instant> = None;

        loop {
            while let Some(res) = tasks.try_join_next() {
                if let Err(e) = res {
                    tracing::error!(queue = %self.queue_name, error = %e, "Job task panicked");
                }
            }

            let permit = tokio::select! {
                p = permits.clone().acquire_owned() => match p {
                    Ok(p) => p,
                    Err(_) => break,
                },
                () = cancel_token.cancelled() => break,
            };

            if last_recovery.is_none_or(|t| t.elapsed() >= self.stall_timeout) {
                self.recover_stalled(reporter.as_ref()).await;
                last_recovery = Some(Instant::now());
            }

            match self.queue.claim_job(self.queue_name, &self.worker_id).await {
                Ok(Some(job)) => {
                    reporter.report(WorkerEvent::JobClaimed { job: &job });
                    let worker = self.clone();
                    let reporter = Arc::clone(&reporter);
                    tasks.spawn(async move {
                        worker.process_job(job, reporter.as_ref()).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        () = tokio::time::sleep(self.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(queue = %self.queue_name, error = %e, "Failed to claim job");
                    tokio::select! {
                        () = tokio::time::sleep(self.poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                tracing::error!(queue = %self.queue_name, error = %e, "Job task panicked");
            }
        }

        let released = match self.queue.release_worker_jobs(&self.worker_id).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(worker_id = %self.worker_id, error = %e, "Failed to release jobs");
                0
            }
        };

        reporter.report(WorkerEvent::ShuttingDown {
            worker_id: &self.worker_id,
            jobs_released: released,
        });
        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.worker_id,
        });

        Ok(())
    }

    async fn recover_stalled<R: WorkerReporter + ?Sized>(&self, reporter: &R) {
        let timeout = TimeDelta::from_std(self.stall_timeout).unwrap_or(TimeDelta::minutes(1));
        match self
            .queue
            .recover_stalled(self.queue_name, Utc::now() - timeout)
            .await
        {
            Ok(ids) => {
                for job_id in ids {
                    reporter.report(WorkerEvent::JobStalled {
                        job_id,
                        queue: self.queue_name,
                    });
                }
            }
            Err(e) => {
                tracing::error!(queue = %self.queue_name, error = %e, "Stall recovery failed");
            }
        }
    }

    async fn process_job<R: WorkerReporter + ?Sized>(&self, job: Job, reporter: &R) {
        let started = Instant::now();
        let result = self.run_with_heartbeat(&job).await;

        let recorded = match result {
            Ok(()) => {
                reporter.report(WorkerEvent::JobCompleted {
                    job_id: job.id,
                    queue: job.queue,
                    elapsed: started.elapsed(),
                });
                self.queue.complete_job(job.id, &self.worker_id).await
            }
            Err(err) => match err.throttle_delay() {
                Some(delay) => {
                    let run_at = Utc::now()
                        + TimeDelta::from_std(delay).unwrap_or(TimeDelta::seconds(5));
                    reporter.report(WorkerEvent::JobDeferred {
                        job_id: job.id,
                        queue: job.queue,
                        run_at,
                    });
                    self.queue.defer_job(job.id, &self.worker_id, run_at).await
                }
                None => {
                    let error_msg = err.to_string();
                    let will_retry = job.can_retry() && err.is_retryable();
                    reporter.report(WorkerEvent::JobFailed {
                        job_id: job.id,
                        queue: job.queue,
                        error: &error_msg,
                        attempt: job.attempts,
                        will_retry,
                    });

                    let retry_at = will_retry.then(|| job.next_run_at(Utc::now()));
                    self.queue
                        .fail_job(job.id, &self.worker_id, &error_msg, retry_at)
                        .await
                }
            },
        };

        match recorded {
            Ok(true) => {}
            Ok(false) => reporter.report(WorkerEvent::OutcomeDiscarded {
                job_id: job.id,
                queue: job.queue,
            }),
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record job outcome");
            }
        }
    }

    /// Run the handler while a separate task keeps the job's heartbeat
    /// fresh. The ticker is aborted as soon as the handler returns or
    /// unwinds.
    async fn run_with_heartbeat(&self, job: &Job) -> Result<(), AppError> {
        let every = (self.stall_timeout / 3).max(Duration::from_millis(100));
        let queue = self.queue.clone();
        let worker_id = self.worker_id.clone();
        let job_id = job.id;

        let _ticker = AbortOnDropHandle::new(tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                heartbeat.tick().await;
                if let Err(e) = queue.heartbeat(job_id, &worker_id).await {
                    tracing::warn!(%job_id, error = %e, "Heartbeat failed");
                }
            }
        }));

        self.handler.handle(job).await
    }
}
