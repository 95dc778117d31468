mod support;

use chrono::{NaiveDate, Utc};
use creativity_engine::errors::AppError;
use creativity_engine::models::{DateRange, ExperimentStatus};
use creativity_engine::sync::SyncOutcome;
use std::time::{Duration, Instant};
use support::{harness, insights, Harness, InsightsReply, OWNER};

async fn launch(h: &Harness, prefix: &str) -> (String, String) {
    let ids = h.register_creatives(OWNER, prefix, 2);
    let outcome = h
        .engine
        .create_experiment(OWNER, h.payload(ids))
        .await
        .expect("create experiment");
    let campaign_id = outcome.experiment.external_campaign_id.clone().expect("campaign");
    (outcome.experiment.id, campaign_id)
}

#[tokio::test]
async fn sweep_isolates_a_failing_experiment() {
    let h = harness();
    h.connect(OWNER);
    let (broken_id, broken_campaign) = launch(&h, "broken").await;
    let (healthy_id, healthy_campaign) = launch(&h, "healthy").await;
    h.platform.set_insights(&broken_campaign, InsightsReply::ServerError);
    h.platform
        .set_insights(&healthy_campaign, InsightsReply::Data(insights(1_000, 40, 20.0)));

    let report = h.engine.sweep().await.expect("sweep");

    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 0);
    assert!(!report.deadline_exceeded);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].experiment_id, broken_id);
    assert!(!report.errors[0].error.contains("EAAB1234567890"));

    let healthy = h.engine.get_experiment(OWNER, &healthy_id).expect("healthy").experiment;
    assert_eq!(healthy.status, ExperimentStatus::Active);
    assert!(healthy.last_synced_at.is_some());
    assert!(healthy.last_sync_error.is_none());

    let broken = h.engine.get_experiment(OWNER, &broken_id).expect("broken").experiment;
    assert_eq!(broken.status, ExperimentStatus::Created);
    assert!(broken.last_sync_error.is_some());

    let analytics = h.engine.get_analytics(OWNER, &healthy_id, None).expect("analytics");
    assert_eq!(analytics.campaign.len(), 1);
    assert_eq!(analytics.campaign[0].impressions, 1_000);
    assert!((analytics.campaign[0].ctr - 4.0).abs() < 1e-9);

    let run = h.engine.latest_sync_run().expect("sync run").expect("recorded");
    assert_eq!(run.scope, "all");
    assert_eq!(run.synced, 1);
    assert_eq!(run.errors, report.errors);
}

#[tokio::test]
async fn no_insights_is_not_a_failure() {
    let h = harness();
    h.connect(OWNER);
    let (id, _) = launch(&h, "quiet").await;

    let outcome = h.engine.sync_experiment(OWNER, &id).await.expect("sync");

    assert!(matches!(outcome, SyncOutcome::NoInsights));
    assert_eq!(h.db.count_daily_metrics(&id).expect("count"), 0);
    let experiment = h.engine.get_experiment(OWNER, &id).expect("detail").experiment;
    assert_eq!(experiment.status, ExperimentStatus::Created);
    assert!(experiment.last_synced_at.is_some());
}

#[tokio::test]
async fn same_day_resync_replaces_the_row() {
    let h = harness();
    h.connect(OWNER);
    let (id, campaign_id) = launch(&h, "daily").await;

    h.platform
        .set_insights(&campaign_id, InsightsReply::Data(insights(100, 2, 1.0)));
    let first = h.engine.sync_experiment(OWNER, &id).await.expect("first sync");
    assert!(matches!(first, SyncOutcome::Updated { activated: true, .. }));

    h.platform
        .set_insights(&campaign_id, InsightsReply::Data(insights(250, 10, 5.0)));
    let second = h.engine.sync_experiment(OWNER, &id).await.expect("second sync");
    assert!(matches!(second, SyncOutcome::Updated { activated: false, .. }));

    let analytics = h.engine.get_analytics(OWNER, &id, None).expect("analytics");
    assert_eq!(analytics.campaign.len(), 1);
    assert_eq!(analytics.campaign[0].impressions, 250);
    assert_eq!(analytics.campaign[0].clicks, 10);
    assert!((analytics.campaign[0].cpc - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn variant_rows_follow_each_ad() {
    let h = harness();
    h.connect(OWNER);
    let (id, campaign_id) = launch(&h, "split").await;
    let detail = h.engine.get_experiment(OWNER, &id).expect("detail");
    h.platform
        .set_insights(&campaign_id, InsightsReply::Data(insights(300, 9, 6.0)));
    let first_ad = detail.variants[0].external_ad_id.clone().expect("first ad");
    let second_ad = detail.variants[1].external_ad_id.clone().expect("second ad");
    h.platform
        .set_insights(&first_ad, InsightsReply::Data(insights(200, 8, 4.0)));
    h.platform.set_insights(&second_ad, InsightsReply::ServerError);

    let outcome = h.engine.sync_experiment(OWNER, &id).await.expect("sync");

    match outcome {
        SyncOutcome::Updated { variant_rows, .. } => assert_eq!(variant_rows, 1),
        other => panic!("unexpected outcome: {:?}", other),
    }
    let analytics = h.engine.get_analytics(OWNER, &id, None).expect("analytics");
    let first = analytics
        .variants
        .iter()
        .find(|variant| variant.external_ad_id.as_deref() == Some(first_ad.as_str()))
        .expect("first variant");
    assert_eq!(first.records.len(), 1);
    assert_eq!(first.records[0].impressions, 200);
    let second = analytics
        .variants
        .iter()
        .find(|variant| variant.external_ad_id.as_deref() == Some(second_ad.as_str()))
        .expect("second variant");
    assert!(second.records.is_empty());
    assert!(analytics.last_sync_error.is_none());
}

#[tokio::test]
async fn owners_without_credentials_are_skipped() {
    let h = harness();
    h.connect(OWNER);
    let (_, campaign_id) = launch(&h, "paused").await;
    h.platform
        .set_insights(&campaign_id, InsightsReply::Data(insights(10, 1, 0.5)));
    assert!(h.engine.disconnect_account(OWNER).expect("disconnect"));

    let report = h.engine.sync_owner(OWNER).await.expect("owner sweep");

    assert_eq!(report.synced, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped, 1);
    assert!(h.platform.insight_calls.lock().expect("calls lock").is_empty());
    let run = h.engine.latest_sync_run().expect("sync run").expect("recorded");
    assert_eq!(run.scope, format!("owner:{}", OWNER));
}

#[tokio::test]
async fn manual_sync_requires_a_connection() {
    let h = harness();
    h.connect(OWNER);
    let (id, _) = launch(&h, "manual").await;
    h.engine.disconnect_account(OWNER).expect("disconnect");

    assert!(matches!(
        h.engine.sync_experiment(OWNER, &id).await,
        Err(AppError::NotConnected(_))
    ));
    assert!(matches!(
        h.engine.sync_experiment("intruder", &id).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn kpis_and_csv_cover_synced_days() {
    let h = harness();
    h.connect(OWNER);
    let (id, campaign_id) = launch(&h, "report").await;
    h.platform
        .set_insights(&campaign_id, InsightsReply::Data(insights(400, 20, 8.0)));
    h.engine.sync_experiment(OWNER, &id).await.expect("sync");

    let today = Utc::now().date_naive();
    let range = DateRange::new(today - chrono::Duration::days(6), today).expect("range");
    let report = h.engine.get_kpis(OWNER, &id, range).expect("kpis");
    assert_eq!(report.impressions.current, 400.0);
    assert_eq!(report.impressions.previous, 0.0);
    assert_eq!(report.previous_range.days(), 7);

    let csv = h.engine.export_analytics_csv(OWNER, &id, Some(range)).expect("csv");
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("Date,Impressions,Clicks,CTR,Conversions,Spend,CPC,CPM")
    );
    let row = lines.next().expect("data row");
    assert!(row.starts_with(&today.format("%Y-%m-%d").to_string()));
    assert!(row.contains(",400,20,"));
}

#[tokio::test]
async fn sweep_stops_at_its_deadline() {
    let h = harness();
    h.connect(OWNER);
    for prefix in ["first", "second", "third"] {
        launch(&h, prefix).await;
    }
    h.engine
        .update_settings(serde_json::json!({ "sweepDeadlineSecs": 1, "syncVariantMetrics": false }))
        .expect("settings");
    h.platform.slow_down(600);

    let report = h.engine.sweep().await.expect("sweep");

    assert!(report.deadline_exceeded);
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 1);
    assert!(report.errors[0].error.contains("deadline"));
    let cut_short = h
        .engine
        .get_experiment(OWNER, &report.errors[0].experiment_id)
        .expect("detail")
        .experiment;
    assert!(cut_short.last_sync_error.is_some());
}

#[tokio::test]
async fn sweep_waits_between_experiments() {
    let h = harness();
    h.connect(OWNER);
    for prefix in ["one", "two", "three"] {
        launch(&h, prefix).await;
    }
    h.engine
        .update_settings(serde_json::json!({ "syncDelayMs": 150 }))
        .expect("settings");

    let started = Instant::now();
    let report = h.engine.sweep().await.expect("sweep");

    assert_eq!(report.synced, 3);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn manual_sync_and_sweep_never_overlap_on_one_experiment() {
    let h = harness();
    h.connect(OWNER);
    let (id, _) = launch(&h, "shared").await;
    h.platform.slow_down(300);

    let (report, manual) = tokio::join!(h.engine.sweep(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.engine.sync_experiment(OWNER, &id).await
    });
    assert!(matches!(manual, Err(AppError::Conflict(_))));
    assert_eq!(report.expect("sweep").synced, 1);

    let (manual, report) = tokio::join!(h.engine.sync_experiment(OWNER, &id), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.engine.sweep().await
    });
    assert!(matches!(manual.expect("manual sync"), SyncOutcome::NoInsights));
    let report = report.expect("sweep");
    assert_eq!(report.synced, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped, 1);
}

#[tokio::test]
async fn ranges_without_a_usable_window_are_rejected() {
    let h = harness();
    h.connect(OWNER);
    let (id, _) = launch(&h, "window").await;

    let earliest = DateRange::new(NaiveDate::MIN, NaiveDate::MIN).expect("range");
    assert!(matches!(
        h.engine.get_kpis(OWNER, &id, earliest),
        Err(AppError::Validation(_))
    ));

    let today = Utc::now().date_naive();
    let inverted = DateRange {
        start: today,
        end: today - chrono::Duration::days(3),
    };
    assert!(matches!(
        h.engine.get_kpis(OWNER, &id, inverted),
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        h.engine.get_analytics(OWNER, &id, Some(inverted)),
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        h.engine.export_analytics_csv(OWNER, &id, Some(inverted)),
        Err(AppError::Validation(_))
    ));
}
