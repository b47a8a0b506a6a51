//! Job lifecycle: per-tenant schedule registration, replacement, stop, and
//! the kill-all sweep. The in-flight termination test drives the real cron
//! scheduler with a deliberately slow mock source.

use std::sync::Arc;
use std::time::Duration;

use crowdecho_pipeline::scheduler::{JobClass, JobKey, JobManager};
use crowdecho_pipeline::testing::{
    default_preferences, fetched_post, test_tenant, CapturingSink, MemoryStore, MockClassifier,
    MockSource,
};
use crowdecho_pipeline::traits::FeedbackStore;

async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) {
    let deadline = std::time::Instant::now() + timeout;
    while !condition() && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn manager_with(
    store: Arc<MemoryStore>,
    source: Arc<MockSource>,
) -> JobManager {
    JobManager::new(
        store,
        source,
        Arc::new(MockClassifier::uniform("Battery", "Widget", 3.0)),
        Arc::new(CapturingSink::new()),
        25,
    )
    .await
    .expect("scheduler construction")
}

#[tokio::test(flavor = "multi_thread")]
async fn start_ingestion_registers_and_replace_is_not_duplicate() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager_with(store.clone(), Arc::new(MockSource::new())).await;
    let tenant = test_tenant();
    let key = JobKey {
        class: JobClass::Fetch,
        tenant,
    };

    manager.start_ingestion(tenant, "0 0 * * * *").await.unwrap();
    assert!(manager.has_schedule(key));
    let prefs = store.stored_preferences(tenant).unwrap();
    assert!(prefs.ingestion_active);
    assert_eq!(prefs.ingestion_cron.as_deref(), Some("0 0 * * * *"));

    // Changing the cron replaces the schedule under the same key.
    manager.start_ingestion(tenant, "0 30 * * * *").await.unwrap();
    assert!(manager.has_schedule(key));
    assert_eq!(
        store.stored_preferences(tenant).unwrap().ingestion_cron.as_deref(),
        Some("0 30 * * * *")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_ingestion_leaves_other_tenants_alone() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager_with(store.clone(), Arc::new(MockSource::new())).await;
    let (a, b) = (test_tenant(), test_tenant());

    manager.start_ingestion(a, "0 0 * * * *").await.unwrap();
    manager.start_ingestion(b, "0 0 * * * *").await.unwrap();

    manager.stop_ingestion(a).await.unwrap();

    let key = |tenant| JobKey {
        class: JobClass::Fetch,
        tenant,
    };
    assert!(!manager.has_schedule(key(a)));
    assert!(!store.stored_preferences(a).unwrap().ingestion_active);

    assert!(manager.has_schedule(key(b)));
    assert!(store.stored_preferences(b).unwrap().ingestion_active);
}

#[tokio::test(flavor = "multi_thread")]
async fn kill_all_sweeps_every_tenant_and_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager_with(store.clone(), Arc::new(MockSource::new())).await;
    let (a, b) = (test_tenant(), test_tenant());

    store.seed_preferences(default_preferences(a));
    store.seed_preferences(default_preferences(b));
    for prefs in store.active_ingestion_tenants().await.unwrap() {
        manager.register_tenant_jobs(&prefs).await.unwrap();
    }
    assert!(manager.has_schedule(JobKey { class: JobClass::Fetch, tenant: a }));
    assert!(manager.has_schedule(JobKey { class: JobClass::Classify, tenant: b }));

    manager.kill_all().await.unwrap();

    for tenant in [a, b] {
        for class in [JobClass::Fetch, JobClass::Classify, JobClass::AggregateAlert] {
            assert!(!manager.has_schedule(JobKey { class, tenant }));
        }
        assert!(!store.stored_preferences(tenant).unwrap().ingestion_active);
    }

    // Running the sweep again over an empty registry is a no-op.
    manager.kill_all().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stopping_interrupts_an_in_flight_run() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(MockSource::new());
    let (a, b) = (test_tenant(), test_tenant());

    store.seed_preferences(default_preferences(a));
    store.seed_preferences(default_preferences(b));

    // Tenant A: two channels and two posts, so the run spends several
    // seconds in rate-limit delays. Tenant B: one quick post.
    store.seed_channel(a, "slow_one", &[]);
    store.seed_channel(a, "slow_two", &[]);
    source.stub_channel("slow_one", vec![fetched_post("t3_slow1", "slow_one")]);
    source.stub_channel("slow_two", vec![fetched_post("t3_slow2", "slow_two")]);
    store.seed_channel(b, "quick", &[]);
    source.stub_channel("quick", vec![fetched_post("t3_quick", "quick")]);

    let mut manager = manager_with(store.clone(), source).await;
    manager.start_ingestion(a, "* * * * * *").await.unwrap();
    manager.start_ingestion(b, "* * * * * *").await.unwrap();
    manager.start().await.unwrap();

    // Wait for A's tick to fire; the run then sits in its rate-limit delays
    // for several seconds.
    let key_a = JobKey {
        class: JobClass::Fetch,
        tenant: a,
    };
    wait_until(|| manager.run_active(key_a), Duration::from_secs(5)).await;
    assert!(manager.run_active(key_a), "tenant A's fetch should still be running");

    manager.stop_ingestion(a).await.unwrap();
    assert!(!manager.run_active(key_a), "the active run is terminated, not drained");
    assert!(!manager.has_schedule(key_a));

    // The cancelled run surfaces through the failure handler.
    wait_until(
        || !store.stored_preferences(a).unwrap().ingestion_active,
        Duration::from_secs(2),
    )
    .await;
    assert!(!store.stored_preferences(a).unwrap().ingestion_active);

    // Tenant B's concurrent job is unaffected and its post landed.
    wait_until(
        || store.item_by_external("t3_quick").is_some(),
        Duration::from_secs(5),
    )
    .await;
    assert!(store.item_by_external("t3_quick").is_some());
    assert!(store.stored_preferences(b).unwrap().ingestion_active);

    manager.shutdown().await.unwrap();
}
