//! Threshold alerting properties: cooldown debounce, consolidated OR-policy
//! alerts, and the no-configuration idle branches.

use std::sync::Arc;

use chrono::{Duration, Utc};
use crowdecho_common::Window;
use crowdecho_pipeline::alerting::{AlertOutcome, AlertingEngine, IdleReason};
use crowdecho_pipeline::metrics::MetricsAggregator;
use crowdecho_pipeline::testing::{default_preferences, test_tenant, CapturingSink, MemoryStore};

#[tokio::test]
async fn battery_scenario_fires_exactly_one_consolidated_alert() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(CapturingSink::new());
    let tenant = test_tenant();
    let now = Utc::now();

    // issue_threshold = 5; six Battery items in window, Shipping stays below.
    store.seed_preferences(default_preferences(tenant));
    let mut battery_ids = Vec::new();
    for _ in 0..6 {
        battery_ids.push(store.seed_classified_item(
            tenant,
            "Battery",
            3.0,
            5,
            1,
            now - Duration::hours(2),
        ));
    }
    for _ in 0..2 {
        store.seed_classified_item(tenant, "Shipping", 3.0, 1, 0, now - Duration::hours(2));
    }

    let engine = AlertingEngine::new(store.clone(), sink.clone());
    let outcome = engine.tick(tenant, now).await.unwrap();

    let AlertOutcome::Triggered(report) = outcome else {
        panic!("expected a triggered alert");
    };
    assert_eq!(report.categories.len(), 1);
    assert_eq!(report.categories[0].category, "Battery");
    assert!(report.categories[0].breach.volume);

    // Exactly one record, referencing only triggering categories' items.
    let records = store.notifications();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].categories, vec!["Battery".to_string()]);
    assert!(!records[0].content_item_ids.is_empty());
    assert!(records[0]
        .content_item_ids
        .iter()
        .all(|id| battery_ids.contains(id)));

    // lastNotified advanced to the evaluation time.
    let prefs = store.stored_preferences(tenant).unwrap();
    assert_eq!(prefs.last_notified, Some(now));

    assert_eq!(sink.sent().len(), 1);
}

#[tokio::test]
async fn cooldown_debounces_regardless_of_tick_count() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(CapturingSink::new());
    let tenant = test_tenant();
    let t0 = Utc::now();

    store.seed_preferences(default_preferences(tenant));
    for _ in 0..6 {
        store.seed_classified_item(tenant, "Battery", 1.0, 3, 2, t0 - Duration::hours(1));
    }

    let engine = AlertingEngine::new(store.clone(), sink.clone());
    assert!(matches!(
        engine.tick(tenant, t0).await.unwrap(),
        AlertOutcome::Triggered(_)
    ));

    // Many ticks inside the 24h window: all idle, none queued for later.
    for hours in [1, 6, 12, 23] {
        let outcome = engine.tick(tenant, t0 + Duration::hours(hours)).await.unwrap();
        assert!(
            matches!(outcome, AlertOutcome::Idle(IdleReason::CooldownActive)),
            "tick at +{hours}h must stay idle"
        );
    }
    assert_eq!(store.notifications().len(), 1);

    // Window elapsed and fresh breaching items: the next alert may fire.
    for _ in 0..6 {
        store.seed_classified_item(tenant, "Battery", 1.0, 3, 2, t0 + Duration::hours(25));
    }
    let outcome = engine.tick(tenant, t0 + Duration::hours(26)).await.unwrap();
    assert!(matches!(outcome, AlertOutcome::Triggered(_)));
    assert_eq!(store.notifications().len(), 2);
}

#[tokio::test]
async fn disabled_preferences_stay_idle_without_evaluating() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(CapturingSink::new());
    let tenant = test_tenant();
    let now = Utc::now();

    let mut prefs = default_preferences(tenant);
    prefs.notifications_enabled = false;
    store.seed_preferences(prefs);
    for _ in 0..20 {
        store.seed_classified_item(tenant, "Battery", 0.5, 10, 10, now - Duration::hours(1));
    }

    let engine = AlertingEngine::new(store.clone(), sink.clone());
    let outcome = engine.tick(tenant, now).await.unwrap();
    assert!(matches!(outcome, AlertOutcome::Idle(IdleReason::Disabled)));
    assert!(store.notifications().is_empty());
    assert!(sink.sent().is_empty());
}

#[tokio::test]
async fn empty_recipients_stay_idle() {
    let store = Arc::new(MemoryStore::new());
    let tenant = test_tenant();

    let mut prefs = default_preferences(tenant);
    prefs.recipients = Vec::new();
    store.seed_preferences(prefs);

    let engine = AlertingEngine::new(store.clone(), Arc::new(CapturingSink::new()));
    let outcome = engine.tick(tenant, Utc::now()).await.unwrap();
    assert!(matches!(outcome, AlertOutcome::Idle(IdleReason::NoRecipients)));
}

#[tokio::test]
async fn below_all_thresholds_is_no_trigger() {
    let store = Arc::new(MemoryStore::new());
    let tenant = test_tenant();
    let now = Utc::now();

    store.seed_preferences(default_preferences(tenant));
    // Two items, neutral sentiment, few comments: nothing breaches.
    store.seed_classified_item(tenant, "Battery", 3.0, 1, 1, now - Duration::hours(1));
    store.seed_classified_item(tenant, "Battery", 3.0, 1, 1, now - Duration::hours(2));

    let engine = AlertingEngine::new(store.clone(), Arc::new(CapturingSink::new()));
    let outcome = engine.tick(tenant, now).await.unwrap();
    assert!(matches!(outcome, AlertOutcome::NoTrigger));
    assert!(store.notifications().is_empty());
}

#[tokio::test]
async fn sentiment_breach_alone_triggers() {
    let store = Arc::new(MemoryStore::new());
    let tenant = test_tenant();
    let now = Utc::now();

    // Only two items (below issue_threshold=5), but deeply negative.
    store.seed_preferences(default_preferences(tenant));
    store.seed_classified_item(tenant, "Battery", 0.5, 1, 1, now - Duration::hours(1));
    store.seed_classified_item(tenant, "Battery", 1.0, 1, 1, now - Duration::hours(2));

    let engine = AlertingEngine::new(store.clone(), Arc::new(CapturingSink::new()));
    let AlertOutcome::Triggered(report) = engine.tick(tenant, now).await.unwrap() else {
        panic!("expected sentiment trigger");
    };
    assert!(report.categories[0].breach.sentiment);
    assert!(!report.categories[0].breach.volume);
}

#[tokio::test]
async fn aggregator_appends_a_snapshot_per_run() {
    let store = Arc::new(MemoryStore::new());
    let tenant = test_tenant();
    let now = Utc::now();

    store.seed_classified_item(tenant, "Battery", 2.0, 4, 2, now - Duration::hours(3));
    store.seed_classified_item(tenant, "Noise", 3.0, 0, 0, now - Duration::hours(3));

    let aggregator = MetricsAggregator::new(store.clone());
    let metrics = aggregator
        .aggregate(tenant, Window::Hours(24), now)
        .await
        .unwrap();

    assert_eq!(metrics.total_items, 2);
    assert_eq!(metrics.trends.len(), 1, "Noise never trends");

    let snapshots = store.snapshots();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].window_hours, 24);
    assert_eq!(snapshots[0].total_items, 2);

    // A second run appends rather than overwrites.
    aggregator
        .aggregate(tenant, Window::Hours(24), now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(store.snapshots().len(), 2);
}
