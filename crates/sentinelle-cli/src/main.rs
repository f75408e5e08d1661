mod jobs;
mod worker;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sentinelle_core::job::{EnqueueOptions, FabricConfig, JobPayload, JobState, QueueName};
use sentinelle_core::models::{CleanupTarget, Period};
use sentinelle_core::traits::ReportStore;
use sentinelle_core::{Fabric, PipelineConfig, Scheduler, SchedulerConfig};
use sentinelle_db::{Database, DatabaseConfig, PgJobQueue};

#[derive(Parser)]
#[command(name = "sentinelle", version, about = "Brand reputation monitoring pipeline")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "SENTINELLE_LOG_JSON", default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every queue consumer plus the scheduler until Ctrl-C
    Worker {
        /// Worker id prefix (defaults to a random id)
        #[arg(long, env = "SENTINELLE_WORKER_ID")]
        worker_id: Option<String>,

        /// Do not run the scheduler loops in this process
        #[arg(long, default_value_t = false)]
        no_scheduler: bool,
    },

    /// Run one collection pass and exit
    Schedule,

    /// Inspect and manage jobs
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },

    /// Enqueue a retention cleanup
    Cleanup {
        /// What to clean: mentions, alerts, reports or logs
        target: CleanupTarget,

        /// Retention in days (defaults to the configured retention)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Enqueue statistics aggregation for an organization
    Aggregate {
        #[arg(long)]
        org: Uuid,

        /// Reference date (YYYY-MM-DD), defaults to yesterday
        #[arg(long)]
        date: Option<NaiveDate>,

        /// daily, weekly or monthly
        #[arg(long, default_value = "daily")]
        period: Period,
    },

    /// Enqueue generation of a report
    Report {
        /// Report id
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum JobsCommand {
    /// List jobs, newest first
    List {
        #[arg(short, long)]
        queue: Option<QueueName>,

        #[arg(short, long)]
        state: Option<JobState>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Move a failed job back to waiting
    Retry { id: Uuid },

    /// Cancel a waiting job
    Cancel { id: Uuid },

    /// Job counts per queue and state
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let db = connect_db().await?;

    match cli.command {
        Commands::Worker {
            worker_id,
            no_scheduler,
        } => worker::cmd_worker(db, worker_id, !no_scheduler).await?,
        Commands::Schedule => cmd_schedule(&db).await?,
        Commands::Jobs { command } => match command {
            JobsCommand::List {
                queue,
                state,
                limit,
            } => jobs::cmd_list(&db.job_queue(), queue, state, limit).await?,
            JobsCommand::Retry { id } => jobs::cmd_retry(&db.job_queue(), id).await?,
            JobsCommand::Cancel { id } => jobs::cmd_cancel(&db.job_queue(), id).await?,
            JobsCommand::Stats => jobs::cmd_stats(&db.job_queue()).await?,
        },
        Commands::Cleanup { target, days } => {
            let retention_days = match days {
                Some(days) => days,
                None => PipelineConfig::from_env()?.retention.days_for(target),
            };
            enqueue(
                &db,
                JobPayload::Cleanup {
                    target,
                    retention_days,
                },
            )
            .await?;
        }
        Commands::Aggregate { org, date, period } => {
            let date = match date {
                Some(date) => date,
                None => Utc::now()
                    .date_naive()
                    .pred_opt()
                    .context("No day before today")?,
            };
            enqueue(
                &db,
                JobPayload::Aggregate {
                    organization_id: org,
                    date,
                    period,
                },
            )
            .await?;
        }
        Commands::Report { id } => {
            if db.reports().load_report(id).await?.is_none() {
                anyhow::bail!("Report {id} not found");
            }
            enqueue(&db, JobPayload::GenerateReport { report_id: id }).await?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("sentinelle=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply pending migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;
    Ok(db)
}

fn fabric(db: &Database) -> Fabric<PgJobQueue> {
    Fabric::new(db.job_queue(), FabricConfig::default())
}

async fn enqueue(db: &Database, payload: JobPayload) -> Result<()> {
    let enqueued = fabric(db)
        .enqueue(payload, EnqueueOptions::default())
        .await?;

    if enqueued.deduplicated {
        println!(
            "Job already queued: {} ({})",
            enqueued.job.id, enqueued.job.state
        );
    } else {
        println!("Enqueued {} on {}", enqueued.job.id, enqueued.job.queue);
    }
    Ok(())
}

async fn cmd_schedule(db: &Database) -> Result<()> {
    let pipeline = PipelineConfig::from_env()?;
    let scheduler = Scheduler::new(
        fabric(db),
        db.sources(),
        db.reports(),
        SchedulerConfig {
            due_policy: pipeline.due_policy,
            due_batch_limit: pipeline.due_batch_limit,
            max_jitter: pipeline.collection_jitter,
            max_error_count: pipeline.max_consecutive_errors,
            ..Default::default()
        },
    );

    let report = scheduler.run_collection_pass(Utc::now()).await?;
    println!(
        "Scheduled {} collection(s), skipped {}, held back {}, {} error(s)",
        report.scheduled, report.skipped, report.gated, report.errors
    );
    Ok(())
}
