use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use sentinelle_core::error::AppError;
use sentinelle_core::job::{EnqueueOptions, FabricConfig, JobPayload, JobState, QueueName};
use sentinelle_core::job_queue::JobQueue;
use sentinelle_core::models::{
    AlertSeverity, AnalysisResult, CollectedItem, NotificationChannel, Period, Recipient,
    Sentiment, Source, SourceType,
};
use sentinelle_core::stages::{
    AlertThresholds, AlertingStage, AnalysisStage, CollectionSettings, CollectionStage,
};
use sentinelle_core::traits::{
    AlertStore, AnalysisProvider, Collector, MentionStore, NotificationSink, SourceRegistry,
};
use sentinelle_core::{CircuitBreaker, CircuitBreakerConfig, DispatchGuard, Fabric, TracingWorkerReporter};
use sentinelle_db::Database;
use tokio_util::sync::CancellationToken;

use crate::integration::common::{sample_source, setup_test_db};

#[derive(Clone)]
struct FixedCollector;

impl Collector for FixedCollector {
    async fn collect(&self, _source: &Source) -> Result<Vec<CollectedItem>, AppError> {
        let published_at = Some(Utc::now() - TimeDelta::minutes(10));
        Ok(vec![
            CollectedItem {
                external_id: Some("post-1".into()),
                content: "Public outrage over the Acme recall".into(),
                published_at,
                ..Default::default()
            },
            CollectedItem {
                external_id: Some("post-2".into()),
                content: "Acme support sorted my issue quickly".into(),
                published_at,
                ..Default::default()
            },
        ])
    }
}

#[derive(Clone)]
struct KeywordProvider;

impl AnalysisProvider for KeywordProvider {
    async fn analyze(&self, text: &str) -> Result<AnalysisResult, AppError> {
        Ok(if text.contains("outrage") {
            AnalysisResult {
                sentiment: Sentiment::Negative,
                score: -0.9,
                emotions: vec!["anger".into()],
                virality_score: 0.85,
            }
        } else {
            AnalysisResult {
                sentiment: Sentiment::Positive,
                score: 0.7,
                emotions: vec!["joy".into()],
                virality_score: 0.1,
            }
        })
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    sent: Arc<Mutex<Vec<(Recipient, String)>>>,
}

impl NotificationSink for RecordingSink {
    async fn notify(
        &self,
        recipient: &Recipient,
        message: &str,
        _data: &serde_json::Value,
    ) -> Result<(), AppError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.clone(), message.to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn collected_viral_mention_raises_one_critical_alert() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);

    let source = sample_source(SourceType::News);
    db.sources().insert(&source).await.unwrap();
    let recipient = Recipient {
        channel: NotificationChannel::Email,
        target: "crisis@acme.test".into(),
    };
    db.alerts()
        .add_recipient(source.organization_id, &recipient, AlertSeverity::High)
        .await
        .unwrap();

    let config = FabricConfig::default()
        .with_worker_id("pipeline-test")
        .with_poll_interval(Duration::from_millis(50));
    let fabric = Fabric::new(db.job_queue(), config);
    let sink = RecordingSink::default();

    let collection = CollectionStage::new(
        fabric.clone(),
        db.sources(),
        db.mentions(),
        FixedCollector,
        DispatchGuard::new(),
        CollectionSettings::default(),
    );
    let analysis = AnalysisStage::new(
        fabric.clone(),
        db.mentions(),
        KeywordProvider,
        CircuitBreaker::new("analysis", CircuitBreakerConfig::default()),
        Duration::from_secs(5),
        AlertThresholds::default(),
    );
    let alerting = AlertingStage::new(db.alerts(), sink.clone());

    let cancel = CancellationToken::new();
    let reporter = Arc::new(TracingWorkerReporter);
    let handles = vec![
        fabric.consume(QueueName::Collection, collection, reporter.clone(), cancel.clone()),
        fabric.consume(QueueName::Analysis, analysis, reporter.clone(), cancel.clone()),
        fabric.consume(QueueName::Alerting, alerting, reporter.clone(), cancel.clone()),
    ];

    fabric
        .enqueue(
            JobPayload::Collect {
                source_id: source.id,
            },
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let queue = db.job_queue();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let alerting_done = queue
            .count_by_state(QueueName::Alerting, JobState::Completed)
            .await
            .unwrap();
        let analysis_done = queue
            .count_by_state(QueueName::Analysis, JobState::Completed)
            .await
            .unwrap();
        if alerting_done == 1 && analysis_done == 2 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pipeline did not settle: {analysis_done} analyses, {alerting_done} alerts"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    cancel.cancel();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let window = Period::Daily
        .window((Utc::now() - TimeDelta::minutes(10)).date_naive())
        .unwrap();
    let mentions = db
        .mentions()
        .query_by_org_and_window(source.organization_id, None, &window)
        .await
        .unwrap();
    assert_eq!(mentions.len(), 2);
    assert!(mentions.iter().all(|m| m.is_analyzed()));

    let sent = sink.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, recipient);

    let alerts_today = db
        .alerts()
        .count_in_window(
            source.organization_id,
            &Period::Daily.window(Utc::now().date_naive()).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(alerts_today, 1);

    let stored = db.sources().get_source(source.id).await.unwrap().unwrap();
    assert!(stored.last_collected_at.is_some());
    assert_eq!(stored.error_count, 0);

    assert_eq!(
        queue
            .count_by_state(QueueName::Collection, JobState::Completed)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn guarded_source_type_is_deactivated() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);
    let source = sample_source(SourceType::Twitter);
    db.sources().insert(&source).await.unwrap();

    let fabric = Fabric::new(db.job_queue(), FabricConfig::default());
    let collection = CollectionStage::new(
        fabric,
        db.sources(),
        db.mentions(),
        FixedCollector,
        DispatchGuard::new().deny_type(SourceType::Twitter),
        CollectionSettings::default(),
    );

    let err = collection.collect(source.id).await.unwrap_err();
    assert!(matches!(err, AppError::PolicyViolation(_)));
    assert!(!err.is_retryable());

    let stored = db.sources().get_source(source.id).await.unwrap().unwrap();
    assert!(!stored.active);
    assert!(stored.last_error.is_some());
    assert!(stored.last_collected_at.is_none());
}
