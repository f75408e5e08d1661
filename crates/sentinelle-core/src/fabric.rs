use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::job::{EnqueueOptions, Enqueued, FabricConfig, JobPayload, NewJob, QueueName};
use crate::job_queue::JobQueue;
use crate::worker::{JobHandler, QueueWorker, WorkerReporter};

/// Named-queue front end over a [`JobQueue`].
///
/// Producers call [`Fabric::enqueue`]; each stage registers one consumer per
/// queue with [`Fabric::consume`]. Queues share storage but are claimed and
/// throttled independently.
#[derive(Clone)]
pub struct Fabric<Q: JobQueue> {
    queue: Q,
    config: Arc<FabricConfig>,
}

impl<Q: JobQueue + 'static> Fabric<Q> {
    pub fn new(queue: Q, config: FabricConfig) -> Self {
        Self {
            queue,
            config: Arc::new(config),
        }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    /// Add a job to the queue its payload routes to.
    ///
    /// Never waits on stage execution. When a non-terminal job with the same
    /// dedup key exists, that job is returned with `deduplicated = true`.
    pub async fn enqueue(
        &self,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<Enqueued, AppError> {
        let policy = self.config.policy(payload.queue());
        let job = NewJob::resolve(payload, options, policy, Utc::now());
        let queue = job.queue;

        let enqueued = self.queue.enqueue(job).await?;
        if enqueued.deduplicated {
            tracing::debug!(
                job_id = %enqueued.job.id,
                %queue,
                dedup_key = ?enqueued.job.dedup_key,
                "Job already queued"
            );
        } else {
            tracing::debug!(job_id = %enqueued.job.id, %queue, "Job enqueued");
        }
        Ok(enqueued)
    }

    pub fn worker<H: JobHandler>(&self, queue_name: QueueName, handler: H) -> QueueWorker<Q, H> {
        QueueWorker::new(self.queue.clone(), queue_name, handler, &self.config)
    }

    /// Spawn a consumer for `queue_name` with the queue's configured concurrency.
    pub fn consume<H, R>(
        &self,
        queue_name: QueueName,
        handler: H,
        reporter: Arc<R>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<Result<(), AppError>>
    where
        H: JobHandler,
        R: WorkerReporter + 'static,
    {
        let worker = self.worker(queue_name, handler);
        tokio::spawn(worker.run(cancel_token, reporter))
    }
}
