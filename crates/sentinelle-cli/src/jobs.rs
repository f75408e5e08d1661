use anyhow::Result;
use uuid::Uuid;

use sentinelle_core::job::{JobState, QueueName};
use sentinelle_core::job_queue::JobQueue;
use sentinelle_db::PgJobQueue;

pub async fn cmd_list(
    queue: &PgJobQueue,
    queue_name: Option<QueueName>,
    state: Option<JobState>,
    limit: usize,
) -> Result<()> {
    let jobs = queue.list_jobs(queue_name, state, limit).await?;

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    for job in &jobs {
        let error = job
            .error_message
            .as_deref()
            .map(|e| format!(" error: {e}"))
            .unwrap_or_default();
        println!(
            "  {} [{}] {:<9} attempts {}/{} run_at {}{}",
            job.id,
            job.queue,
            job.state.as_str(),
            job.attempts,
            job.max_attempts,
            job.run_at.format("%Y-%m-%d %H:%M:%S UTC"),
            error,
        );
    }

    println!("\nTotal: {} jobs", jobs.len());
    Ok(())
}

pub async fn cmd_retry(queue: &PgJobQueue, id: Uuid) -> Result<()> {
    if queue.retry_failed(id).await? {
        println!("Job {id} moved back to waiting");
    } else {
        anyhow::bail!("Job {id} is not failed, or a live job holds the same dedup key");
    }
    Ok(())
}

pub async fn cmd_cancel(queue: &PgJobQueue, id: Uuid) -> Result<()> {
    if queue.cancel_job(id).await? {
        println!("Job {id} cancelled");
    } else {
        anyhow::bail!("Job {id} is not waiting and cannot be cancelled");
    }
    Ok(())
}

pub async fn cmd_stats(queue: &PgJobQueue) -> Result<()> {
    print!("{:<12}", "queue");
    for state in JobState::ALL {
        print!("{:>11}", state.as_str());
    }
    println!();

    for queue_name in QueueName::ALL {
        print!("{:<12}", queue_name.as_str());
        for state in JobState::ALL {
            let count = queue.count_by_state(queue_name, state).await?;
            print!("{count:>11}");
        }
        println!();
    }
    Ok(())
}
