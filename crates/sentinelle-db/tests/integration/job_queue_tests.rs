use chrono::{TimeDelta, Utc};
use sentinelle_core::job::{
    Backoff, EnqueueOptions, JobPayload, JobState, NewJob, QueueName, QueuePolicy,
};
use sentinelle_core::job_queue::JobQueue;
use sentinelle_db::PgJobQueue;
use uuid::Uuid;

use crate::integration::common::setup_test_db;

fn collect_job(source_id: Uuid) -> NewJob {
    NewJob::resolve(
        JobPayload::Collect { source_id },
        EnqueueOptions::default(),
        QueuePolicy::new(5, 3, Backoff::Exponential {
            base: std::time::Duration::from_secs(5),
        }),
        Utc::now(),
    )
}

#[tokio::test]
async fn enqueue_and_verify_fields() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);
    let source_id = Uuid::new_v4();

    let enqueued = queue.enqueue(collect_job(source_id)).await.unwrap();
    let job = enqueued.job;

    assert!(!enqueued.deduplicated);
    assert_eq!(job.queue, QueueName::Collection);
    assert_eq!(job.payload, JobPayload::Collect { source_id });
    assert_eq!(job.state, JobState::Waiting);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_attempts, 3);
    assert_eq!(job.dedup_key, Some(format!("collection:{source_id}")));
    assert!(matches!(job.backoff, Backoff::Exponential { .. }));
    assert!(job.worker_id.is_none());
}

#[tokio::test]
async fn live_dedup_key_returns_existing_job() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);
    let source_id = Uuid::new_v4();

    let first = queue.enqueue(collect_job(source_id)).await.unwrap();
    let second = queue.enqueue(collect_job(source_id)).await.unwrap();

    assert!(second.deduplicated);
    assert_eq!(first.job.id, second.job.id);
    assert_eq!(
        queue
            .count_by_state(QueueName::Collection, JobState::Waiting)
            .await
            .unwrap(),
        1
    );

    // Once the first job is finished the key is free again.
    let claimed = queue
        .claim_job(QueueName::Collection, "worker-1")
        .await
        .unwrap()
        .unwrap();
    assert!(queue.complete_job(claimed.id, "worker-1").await.unwrap());

    let third = queue.enqueue(collect_job(source_id)).await.unwrap();
    assert!(!third.deduplicated);
    assert_ne!(third.job.id, first.job.id);
}

#[tokio::test]
async fn claim_sets_active_and_counts_attempt() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);
    queue.enqueue(collect_job(Uuid::new_v4())).await.unwrap();

    let claimed = queue
        .claim_job(QueueName::Collection, "worker-1")
        .await
        .unwrap()
        .expect("Should claim the job");

    assert_eq!(claimed.state, JobState::Active);
    assert_eq!(claimed.attempts, 1);
    assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
    assert!(claimed.heartbeat_at.is_some());
    assert!(claimed.started_at.is_some());

    // Nothing else runnable, and other queues are untouched.
    assert!(
        queue
            .claim_job(QueueName::Collection, "worker-2")
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        queue
            .claim_job(QueueName::Analysis, "worker-2")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn concurrent_claims_never_share_a_job() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);
    for _ in 0..10 {
        queue.enqueue(collect_job(Uuid::new_v4())).await.unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..5 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            while let Some(job) = queue
                .claim_job(QueueName::Collection, &format!("worker-{i}"))
                .await
                .unwrap()
            {
                ids.push(job.id);
            }
            ids
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(total, 10);
    assert_eq!(all.len(), 10);
}

#[tokio::test]
async fn fail_with_retry_time_delays_next_claim() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);
    let job = queue.enqueue(collect_job(Uuid::new_v4())).await.unwrap().job;
    queue
        .claim_job(QueueName::Collection, "worker-1")
        .await
        .unwrap()
        .unwrap();

    let retry_at = Utc::now() + TimeDelta::hours(1);
    queue
        .fail_job(job.id, "worker-1", "scraper timeout", Some(retry_at))
        .await
        .unwrap();

    let stored = queue.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Waiting);
    assert_eq!(stored.error_message.as_deref(), Some("scraper timeout"));
    assert!(stored.worker_id.is_none());
    assert!(
        queue
            .claim_job(QueueName::Collection, "worker-1")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn permanent_failure_can_be_retried_by_operator() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);
    let job = queue.enqueue(collect_job(Uuid::new_v4())).await.unwrap().job;
    queue
        .claim_job(QueueName::Collection, "worker-1")
        .await
        .unwrap()
        .unwrap();
    queue
        .fail_job(job.id, "worker-1", "forbidden source type: TWITTER", None)
        .await
        .unwrap();

    let failed = queue.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert!(failed.finished_at.is_some());

    assert!(queue.retry_failed(job.id).await.unwrap());
    let retried = queue.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(retried.state, JobState::Waiting);
    assert_eq!(retried.attempts, 0);

    // Only failed jobs can be retried.
    assert!(!queue.retry_failed(job.id).await.unwrap());
}

#[tokio::test]
async fn cancel_only_affects_waiting_jobs() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);
    let waiting = queue.enqueue(collect_job(Uuid::new_v4())).await.unwrap().job;
    assert!(queue.cancel_job(waiting.id).await.unwrap());
    assert_eq!(
        queue.get_job(waiting.id).await.unwrap().unwrap().state,
        JobState::Cancelled
    );

    let active = queue.enqueue(collect_job(Uuid::new_v4())).await.unwrap().job;
    queue
        .claim_job(QueueName::Collection, "worker-1")
        .await
        .unwrap()
        .unwrap();
    assert!(!queue.cancel_job(active.id).await.unwrap());
    assert_eq!(
        queue.get_job(active.id).await.unwrap().unwrap().state,
        JobState::Active
    );
}

#[tokio::test]
async fn stale_heartbeat_is_recovered() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);
    let job = queue.enqueue(collect_job(Uuid::new_v4())).await.unwrap().job;
    queue
        .claim_job(QueueName::Collection, "worker-1")
        .await
        .unwrap()
        .unwrap();

    // Heartbeat is fresh relative to a cutoff in the past.
    let none = queue
        .recover_stalled(QueueName::Collection, Utc::now() - TimeDelta::minutes(1))
        .await
        .unwrap();
    assert!(none.is_empty());

    let recovered = queue
        .recover_stalled(QueueName::Collection, Utc::now() + TimeDelta::seconds(1))
        .await
        .unwrap();
    assert_eq!(recovered, vec![job.id]);

    let stored = queue.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Waiting);
    assert_eq!(stored.stalled_count, 1);
    assert!(stored.worker_id.is_none());
}

#[tokio::test]
async fn stale_worker_cannot_finish_a_reclaimed_job() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);
    let job = queue.enqueue(collect_job(Uuid::new_v4())).await.unwrap().job;
    queue
        .claim_job(QueueName::Collection, "worker-A")
        .await
        .unwrap()
        .unwrap();
    queue
        .recover_stalled(QueueName::Collection, Utc::now() + TimeDelta::seconds(1))
        .await
        .unwrap();
    let reclaimed = queue
        .claim_job(QueueName::Collection, "worker-B")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reclaimed.id, job.id);

    // Worker A comes back late and tries both outcomes.
    assert!(
        !queue
            .fail_job(job.id, "worker-A", "scraper timeout", Some(Utc::now()))
            .await
            .unwrap()
    );
    assert!(!queue.complete_job(job.id, "worker-A").await.unwrap());

    let stored = queue.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Active);
    assert_eq!(stored.worker_id.as_deref(), Some("worker-B"));
    assert!(stored.error_message.is_none());
    assert!(
        queue
            .claim_job(QueueName::Collection, "worker-C")
            .await
            .unwrap()
            .is_none()
    );

    assert!(queue.complete_job(job.id, "worker-B").await.unwrap());
    assert_eq!(
        queue.get_job(job.id).await.unwrap().unwrap().state,
        JobState::Completed
    );
}

#[tokio::test]
async fn release_worker_jobs_returns_them_to_waiting() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);
    for _ in 0..3 {
        queue.enqueue(collect_job(Uuid::new_v4())).await.unwrap();
    }

    queue.claim_job(QueueName::Collection, "worker-A").await.unwrap();
    queue.claim_job(QueueName::Collection, "worker-A").await.unwrap();
    queue.claim_job(QueueName::Collection, "worker-B").await.unwrap();

    let released = queue.release_worker_jobs("worker-A").await.unwrap();
    assert_eq!(released, 2);

    assert_eq!(
        queue
            .count_by_state(QueueName::Collection, JobState::Waiting)
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        queue
            .count_by_state(QueueName::Collection, JobState::Active)
            .await
            .unwrap(),
        1
    );
    let waiting = queue
        .list_jobs(Some(QueueName::Collection), Some(JobState::Waiting), 10)
        .await
        .unwrap();
    assert!(waiting.iter().all(|j| j.attempts == 0));
}

#[tokio::test]
async fn purge_removes_only_old_finished_jobs() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);
    let done = queue.enqueue(collect_job(Uuid::new_v4())).await.unwrap().job;
    queue
        .claim_job(QueueName::Collection, "worker-1")
        .await
        .unwrap()
        .unwrap();
    queue.complete_job(done.id, "worker-1").await.unwrap();
    let waiting = queue.enqueue(collect_job(Uuid::new_v4())).await.unwrap().job;

    assert_eq!(
        queue
            .purge_finished(Utc::now() - TimeDelta::days(1))
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        queue
            .purge_finished(Utc::now() + TimeDelta::seconds(1))
            .await
            .unwrap(),
        1
    );
    assert!(queue.get_job(done.id).await.unwrap().is_none());
    assert!(queue.get_job(waiting.id).await.unwrap().is_some());
}
