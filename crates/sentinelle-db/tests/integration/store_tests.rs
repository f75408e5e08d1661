use chrono::{NaiveDate, TimeDelta, Utc};
use sentinelle_core::models::{
    AggregateStat, AlertKind, AlertSeverity, AnalysisResult, CollectionOutcome, NewAlert,
    NotificationChannel, Period, Recipient, ReportResult, ReportStatus, Sentiment, SourceType,
    StatsSnapshot,
};
use sentinelle_core::selector::DuePolicy;
use sentinelle_core::traits::{AlertStore, MentionStore, ReportStore, SourceRegistry, StatsStore};
use sentinelle_db::Database;
use uuid::Uuid;

use crate::integration::common::{new_mention, sample_source, setup_test_db};

#[tokio::test]
async fn due_sources_respect_interval_and_activity() {
    let (pool, _container) = setup_test_db().await;
    let sources = Database::from_pool(pool).sources();
    let now = Utc::now();

    let never = sample_source(SourceType::News);
    let mut stale = sample_source(SourceType::Rss);
    stale.last_collected_at = Some(now - TimeDelta::hours(7));
    let mut fresh = sample_source(SourceType::Rss);
    fresh.last_collected_at = Some(now - TimeDelta::hours(1));
    let mut fast = sample_source(SourceType::Reddit);
    fast.collection_interval = Some(TimeDelta::minutes(30));
    fast.last_collected_at = Some(now - TimeDelta::hours(1));
    let mut inactive = sample_source(SourceType::Blog);
    inactive.active = false;

    for source in [&never, &stale, &fresh, &fast, &inactive] {
        sources.insert(source).await.unwrap();
    }

    let due = sources
        .list_due_sources(now, &DuePolicy::default(), 100)
        .await
        .unwrap();
    let mut ids: Vec<Uuid> = due.iter().map(|s| s.id).collect();
    ids.sort();
    let mut expected = vec![never.id, stale.id, fast.id];
    expected.sort();
    assert_eq!(ids, expected);

    // Never-collected sources come first.
    assert_eq!(due[0].id, never.id);
}

#[tokio::test]
async fn mark_collected_is_compare_and_set() {
    let (pool, _container) = setup_test_db().await;
    let sources = Database::from_pool(pool).sources();
    let source = sample_source(SourceType::News);
    sources.insert(&source).await.unwrap();

    let at = Utc::now();
    let first = sources
        .mark_collected(source.id, None, &CollectionOutcome::Success, at, 5)
        .await
        .unwrap();
    assert!(first.is_some());

    // A second collector that read the same snapshot loses the race.
    let second = sources
        .mark_collected(
            source.id,
            None,
            &CollectionOutcome::Failure {
                error: "timeout".into(),
            },
            at,
            5,
        )
        .await
        .unwrap();
    assert!(second.is_none());

    let stored = sources.get_source(source.id).await.unwrap().unwrap();
    assert_eq!(stored.error_count, 0);
    assert!(stored.last_collected_at.is_some());
}

#[tokio::test]
async fn repeated_failures_deactivate_source() {
    let (pool, _container) = setup_test_db().await;
    let sources = Database::from_pool(pool).sources();
    let source = sample_source(SourceType::Forum);
    sources.insert(&source).await.unwrap();

    let failure = CollectionOutcome::Failure {
        error: "HTTP 500".into(),
    };
    let mut status = None;
    for _ in 0..3 {
        let expected = sources
            .get_source(source.id)
            .await
            .unwrap()
            .unwrap()
            .last_collected_at;
        status = sources
            .mark_collected(source.id, expected, &failure, Utc::now(), 3)
            .await
            .unwrap();
    }

    let status = status.unwrap();
    assert_eq!(status.error_count, 3);
    assert!(!status.active);
    let stored = sources.get_source(source.id).await.unwrap().unwrap();
    assert_eq!(stored.last_error.as_deref(), Some("HTTP 500"));
    assert!(sources.active_organizations().await.unwrap().is_empty());
}

#[tokio::test]
async fn mention_is_unique_per_source_and_external_id() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);
    let source = sample_source(SourceType::News);
    db.sources().insert(&source).await.unwrap();
    let mentions = db.mentions();

    let item = new_mention(&source, "article-1", Utc::now());
    let first = mentions.upsert_if_absent(&item).await.unwrap();
    let second = mentions.upsert_if_absent(&item).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn analysis_is_written_once() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);
    let source = sample_source(SourceType::News);
    db.sources().insert(&source).await.unwrap();
    let mentions = db.mentions();
    let id = mentions
        .upsert_if_absent(&new_mention(&source, "a", Utc::now()))
        .await
        .unwrap()
        .id;

    let result = AnalysisResult {
        sentiment: Sentiment::Negative,
        score: -0.8,
        emotions: vec!["anger".into()],
        virality_score: 0.85,
    };
    assert!(mentions.update_analysis(id, &result, Utc::now()).await.unwrap());

    let other = AnalysisResult {
        sentiment: Sentiment::Positive,
        ..result.clone()
    };
    assert!(!mentions.update_analysis(id, &other, Utc::now()).await.unwrap());

    let stored = mentions.get_mention(id).await.unwrap().unwrap();
    assert_eq!(stored.sentiment, Some(Sentiment::Negative));
    assert_eq!(stored.emotions, vec!["anger"]);
    assert!(stored.is_analyzed());

    let err = mentions
        .update_analysis(Uuid::new_v4(), &result, Utc::now())
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn window_query_and_retention() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);
    let source = sample_source(SourceType::News);
    db.sources().insert(&source).await.unwrap();
    let mentions = db.mentions();

    let window = Period::Daily
        .window(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap())
        .unwrap();
    for (id, at) in [
        ("before", window.start - TimeDelta::seconds(1)),
        ("start", window.start),
        ("inside", window.start + TimeDelta::hours(12)),
        ("end", window.end),
    ] {
        mentions
            .upsert_if_absent(&new_mention(&source, id, at))
            .await
            .unwrap();
    }

    let found = mentions
        .query_by_org_and_window(source.organization_id, None, &window)
        .await
        .unwrap();
    let ids: Vec<&str> = found.iter().map(|m| m.external_id.as_str()).collect();
    assert_eq!(ids, vec!["start", "inside"]);

    let other_brand = mentions
        .query_by_org_and_window(source.organization_id, Some(Uuid::new_v4()), &window)
        .await
        .unwrap();
    assert!(other_brand.is_empty());

    // Strictly older than the cutoff is deleted; the boundary stays.
    let deleted = mentions.delete_older_than(window.start).await.unwrap();
    assert_eq!(deleted, 1);
}

#[tokio::test]
async fn retention_keeps_mentions_with_open_alerts() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);
    let source = sample_source(SourceType::News);
    db.sources().insert(&source).await.unwrap();
    let mentions = db.mentions();
    let alerts = db.alerts();

    let old = Utc::now() - TimeDelta::days(120);
    let mut ids = Vec::new();
    for external_id in ["open", "resolved", "quiet"] {
        let id = mentions
            .upsert_if_absent(&new_mention(&source, external_id, old))
            .await
            .unwrap()
            .id;
        ids.push(id);
    }
    let (open_id, resolved_id, quiet_id) = (ids[0], ids[1], ids[2]);

    let raise = |mention_id| NewAlert {
        mention_id,
        organization_id: source.organization_id,
        kind: AlertKind::ViralRisk,
        severity: AlertSeverity::Critical,
        message: "Mention is going viral".into(),
    };
    let open_alert = alerts.create_if_absent(&raise(open_id)).await.unwrap();
    let resolved_alert = alerts.create_if_absent(&raise(resolved_id)).await.unwrap();
    alerts.resolve(resolved_alert.id).await.unwrap();

    let deleted = mentions
        .delete_older_than(Utc::now() - TimeDelta::days(90))
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    assert!(mentions.get_mention(open_id).await.unwrap().is_some());
    assert!(mentions.get_mention(resolved_id).await.unwrap().is_none());
    assert!(mentions.get_mention(quiet_id).await.unwrap().is_none());

    // The open alert is still there and still deduplicates.
    let again = alerts.create_if_absent(&raise(open_id)).await.unwrap();
    assert_eq!(again.id, open_alert.id);
    let today = Period::Daily.window(Utc::now().date_naive()).unwrap();
    assert_eq!(
        alerts
            .count_in_window(source.organization_id, &today)
            .await
            .unwrap(),
        1
    );

    // Once resolved, the next pass removes the mention and its alert.
    alerts.resolve(open_alert.id).await.unwrap();
    assert_eq!(
        mentions
            .delete_older_than(Utc::now() - TimeDelta::days(90))
            .await
            .unwrap(),
        1
    );
    assert!(mentions.get_mention(open_id).await.unwrap().is_none());
}

#[tokio::test]
async fn source_with_mentions_cannot_be_deleted() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool.clone());
    let source = sample_source(SourceType::Rss);
    db.sources().insert(&source).await.unwrap();
    let mention_id = db
        .mentions()
        .upsert_if_absent(&new_mention(&source, "kept", Utc::now()))
        .await
        .unwrap()
        .id;

    let result = sqlx::query("DELETE FROM sources WHERE id = $1")
        .bind(source.id)
        .execute(&pool)
        .await;
    assert!(result.is_err());

    assert!(db.sources().get_source(source.id).await.unwrap().is_some());
    assert!(db.mentions().get_mention(mention_id).await.unwrap().is_some());
}

#[tokio::test]
async fn alert_is_unique_per_mention_and_kind() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);
    let source = sample_source(SourceType::News);
    db.sources().insert(&source).await.unwrap();
    let mention_id = db
        .mentions()
        .upsert_if_absent(&new_mention(&source, "a", Utc::now()))
        .await
        .unwrap()
        .id;
    let alerts = db.alerts();

    let new_alert = NewAlert {
        mention_id,
        organization_id: source.organization_id,
        kind: AlertKind::ViralRisk,
        severity: AlertSeverity::Critical,
        message: "Mention is going viral".into(),
    };
    let first = alerts.create_if_absent(&new_alert).await.unwrap();
    let second = alerts.create_if_absent(&new_alert).await.unwrap();
    assert_eq!(first.id, second.id);
    assert!(first.notified_at.is_none());

    alerts.mark_notified(first.id, Utc::now()).await.unwrap();
    let again = alerts.create_if_absent(&new_alert).await.unwrap();
    assert!(again.notified_at.is_some());

    let window = Period::Daily.window(Utc::now().date_naive()).unwrap();
    assert_eq!(
        alerts
            .count_in_window(source.organization_id, &window)
            .await
            .unwrap(),
        1
    );

    // Unresolved alerts survive retention.
    let cutoff = Utc::now() + TimeDelta::seconds(1);
    assert_eq!(alerts.delete_resolved_older_than(cutoff).await.unwrap(), 0);
    alerts.resolve(first.id).await.unwrap();
    assert_eq!(alerts.delete_resolved_older_than(cutoff).await.unwrap(), 1);
}

#[tokio::test]
async fn recipients_filtered_by_minimum_severity() {
    let (pool, _container) = setup_test_db().await;
    let alerts = Database::from_pool(pool).alerts();
    let org = Uuid::new_v4();

    let everyone = Recipient {
        channel: NotificationChannel::Email,
        target: "team@acme.test".into(),
    };
    let on_call = Recipient {
        channel: NotificationChannel::Sms,
        target: "+33600000000".into(),
    };
    alerts
        .add_recipient(org, &everyone, AlertSeverity::Low)
        .await
        .unwrap();
    alerts
        .add_recipient(org, &on_call, AlertSeverity::Critical)
        .await
        .unwrap();

    let medium = alerts.recipients(org, AlertSeverity::Medium).await.unwrap();
    assert_eq!(medium, vec![everyone.clone()]);

    let critical = alerts.recipients(org, AlertSeverity::Critical).await.unwrap();
    assert_eq!(critical.len(), 2);

    assert!(
        alerts
            .recipients(Uuid::new_v4(), AlertSeverity::Critical)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn aggregate_upsert_replaces_previous_snapshot() {
    let (pool, _container) = setup_test_db().await;
    let stats = Database::from_pool(pool).stats();
    let org = Uuid::new_v4();
    let date = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();

    let mut stat = AggregateStat {
        organization_id: org,
        date,
        period: Period::Daily,
        window: Period::Daily.window(date).unwrap(),
        stats: StatsSnapshot {
            total_mentions: 3,
            ..Default::default()
        },
        computed_at: Utc::now(),
    };
    stats.upsert_aggregate(&stat).await.unwrap();
    stat.stats.total_mentions = 5;
    stats.upsert_aggregate(&stat).await.unwrap();

    let stored = stats
        .get_aggregate(org, date, Period::Daily)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.stats.total_mentions, 5);
    assert_eq!(stored.window, stat.window);
    assert!(
        stats
            .get_aggregate(org, date, Period::Weekly)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn report_lifecycle() {
    let (pool, _container) = setup_test_db().await;
    let reports = Database::from_pool(pool).reports();
    let date = NaiveDate::from_ymd_opt(2024, 6, 12).unwrap();
    let report = reports
        .create_report(
            Uuid::new_v4(),
            None,
            Period::Weekly,
            Period::Weekly.window(date).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(report.status, ReportStatus::Pending);
    assert_eq!(reports.pending_reports(10).await.unwrap(), vec![report.id]);

    reports.mark_processing(report.id).await.unwrap();
    assert!(reports.pending_reports(10).await.unwrap().is_empty());

    reports
        .save_report_result(
            report.id,
            &ReportResult {
                status: ReportStatus::Completed,
                stats: Some(StatsSnapshot {
                    total_mentions: 2,
                    alert_count: Some(1),
                    ..Default::default()
                }),
                output_ref: Some("reports/x.json".into()),
                error_message: None,
                generated_at: Utc::now(),
            },
        )
        .await
        .unwrap();

    let stored = reports.load_report(report.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReportStatus::Completed);
    assert_eq!(stored.stats.unwrap().alert_count, Some(1));
    assert!(stored.generated_at.is_some());

    // Completed reports are not moved back to processing.
    reports.mark_processing(report.id).await.unwrap();
    assert_eq!(
        reports.load_report(report.id).await.unwrap().unwrap().status,
        ReportStatus::Completed
    );
}
