use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use sentinelle_client::{HttpAnalysisProvider, HttpCollector, Notifier, ServiceConfig};
use sentinelle_core::job::{FabricConfig, QueueName};
use sentinelle_core::stages::{
    AggregationStage, AlertThresholds, AlertingStage, AnalysisStage, CleanupStage,
    CollectionSettings, CollectionStage, ReportingStage,
};
use sentinelle_core::{
    CircuitBreaker, CircuitBreakerConfig, DispatchGuard, Fabric, PipelineConfig, Scheduler,
    SchedulerConfig, TracingWorkerReporter,
};
use sentinelle_db::Database;

/// Start one consumer per queue, plus the scheduler loops when
/// `with_scheduler` is set, and run until Ctrl-C.
pub async fn cmd_worker(
    db: Database,
    worker_id: Option<String>,
    with_scheduler: bool,
) -> Result<()> {
    let pipeline = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let services = ServiceConfig::from_env().context("Invalid service configuration")?;

    let mut fabric_config = FabricConfig::default().with_stall_timeout(pipeline.stall_timeout);
    if let Some(id) = worker_id {
        fabric_config = fabric_config.with_worker_id(id);
    }
    let fabric = Fabric::new(db.job_queue(), fabric_config);

    let collector = HttpCollector::with_timeout(&services.scraper_url, pipeline.collection_timeout)?;
    let provider = HttpAnalysisProvider::with_timeout(&services.ai_url, pipeline.analysis_timeout)?;
    let notifier = Notifier::from_parts(
        services.notify_url.as_deref(),
        services.notify_token.clone(),
    )?;

    let collection = CollectionStage::new(
        fabric.clone(),
        db.sources(),
        db.mentions(),
        collector,
        DispatchGuard::new(),
        CollectionSettings {
            timeout: pipeline.collection_timeout,
            max_consecutive_errors: pipeline.max_consecutive_errors,
        },
    );
    let analysis = AnalysisStage::new(
        fabric.clone(),
        db.mentions(),
        provider,
        CircuitBreaker::new("analysis", CircuitBreakerConfig::default()),
        pipeline.analysis_timeout,
        AlertThresholds {
            virality: pipeline.virality_alert_threshold,
            critical_virality: pipeline.critical_virality_threshold,
        },
    );
    let alerting = AlertingStage::new(db.alerts(), notifier);
    let aggregation = AggregationStage::new(db.mentions(), db.stats());
    let reporting = ReportingStage::new(db.reports(), db.mentions(), db.alerts());
    let cleanup = CleanupStage::new(db.job_queue(), db.mentions(), db.alerts(), db.reports());

    let cancel = CancellationToken::new();
    let reporter = Arc::new(TracingWorkerReporter);

    let mut handles = vec![
        fabric.consume(QueueName::Collection, collection, reporter.clone(), cancel.clone()),
        fabric.consume(QueueName::Analysis, analysis, reporter.clone(), cancel.clone()),
        fabric.consume(QueueName::Alerting, alerting, reporter.clone(), cancel.clone()),
        fabric.consume(QueueName::Aggregation, aggregation, reporter.clone(), cancel.clone()),
        fabric.consume(QueueName::Reporting, reporting, reporter.clone(), cancel.clone()),
        fabric.consume(QueueName::Cleanup, cleanup, reporter, cancel.clone()),
    ];

    if with_scheduler {
        let scheduler = Scheduler::new(
            fabric.clone(),
            db.sources(),
            db.reports(),
            SchedulerConfig {
                interval: pipeline.scheduler_interval,
                due_policy: pipeline.due_policy,
                due_batch_limit: pipeline.due_batch_limit,
                max_jitter: pipeline.collection_jitter,
                max_error_count: pipeline.max_consecutive_errors,
                retention: pipeline.retention,
                ..Default::default()
            },
        );
        let token = cancel.clone();
        handles.push(tokio::spawn(async move { scheduler.run(token).await }));
    }

    tracing::info!(
        worker_id = %fabric.config().worker_id,
        consumers = QueueName::ALL.len(),
        scheduler = with_scheduler,
        "Sentinelle worker running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl-C handler")?;
    tracing::info!("Shutdown signal received");
    cancel.cancel();

    let mut failed = 0;
    for result in futures::future::join_all(handles).await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failed += 1;
                tracing::error!(error = %e, "Consumer exited with an error");
            }
            Err(e) => {
                failed += 1;
                tracing::error!(error = %e, "Consumer task panicked");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} consumer(s) did not shut down cleanly");
    }
    tracing::info!("Sentinelle worker stopped");
    Ok(())
}
