//! Classifier batch runner properties: the Noise short-circuit, batch
//! atomicity under failure, retry deprioritization, and bucket acceptance.

use std::sync::Arc;

use crowdecho_common::NOISE_CATEGORY;
use crowdecho_pipeline::classify::{ClassifyRunner, ItemVerdict};
use crowdecho_pipeline::testing::{
    fetched_post, test_tenant, CapturingSink, MemoryStore, MockClassifier,
};
use crowdecho_pipeline::traits::FeedbackStore;

async fn seed_pending(store: &MemoryStore, tenant: crowdecho_common::TenantRef, n: usize) {
    for i in 0..n {
        store
            .upsert_content_item(tenant, &fetched_post(&format!("t3_{i}"), "widgets"))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn zero_categories_marks_everything_noise() {
    let store = Arc::new(MemoryStore::new());
    let tenant = test_tenant();
    seed_pending(&store, tenant, 4).await;

    let classifier = Arc::new(MockClassifier::uniform("unused", "unused", 3.0));
    let sink = Arc::new(CapturingSink::new());
    let runner = ClassifyRunner::new(store.clone(), classifier.clone(), sink);

    let stats = runner.run(tenant).await.unwrap();
    assert_eq!(stats.noise_marked, 4);
    assert_eq!(*classifier.calls.lock().unwrap(), 0, "classifier is never invoked");

    for i in 0..4 {
        let item = store.item_by_external(&format!("t3_{i}")).unwrap();
        assert_eq!(item.category.as_deref(), Some(NOISE_CATEGORY));
        assert_eq!(item.product.as_deref(), Some(NOISE_CATEGORY));
        assert!(!item.needs_processing);
    }
}

#[tokio::test]
async fn failed_batch_stays_pending_with_higher_priority() {
    let store = Arc::new(MemoryStore::new());
    let tenant = test_tenant();
    store.seed_feedback_category(tenant, "Battery");
    seed_pending(&store, tenant, 2).await;

    let runner = ClassifyRunner::new(
        store.clone(),
        Arc::new(MockClassifier::always_failing()),
        Arc::new(CapturingSink::new()),
    );

    let err = runner.run(tenant).await.unwrap_err();
    assert!(err.to_string().contains("3 consecutive"));

    for i in 0..2 {
        let item = store.item_by_external(&format!("t3_{i}")).unwrap();
        assert!(item.needs_processing, "a failed batch never marks items processed");
        assert_eq!(item.processing_priority, 3, "one bump per failed attempt");
        assert!(item.category.is_none());
    }
}

#[tokio::test]
async fn transient_failure_retries_and_succeeds() {
    let store = Arc::new(MemoryStore::new());
    let tenant = test_tenant();
    store.seed_feedback_category(tenant, "Battery");
    store.seed_product_category(tenant, "Widget");
    seed_pending(&store, tenant, 2).await;

    let classifier = Arc::new(MockClassifier::uniform("Battery", "Widget", 1.5).with_failures(1));
    let runner = ClassifyRunner::new(store.clone(), classifier, Arc::new(CapturingSink::new()));

    let stats = runner.run(tenant).await.unwrap();
    assert_eq!(stats.items_classified, 2);

    for i in 0..2 {
        let item = store.item_by_external(&format!("t3_{i}")).unwrap();
        assert!(!item.needs_processing);
        assert_eq!(item.category.as_deref(), Some("Battery"));
        assert_eq!(item.sentiment.as_deref(), Some("Negative"));
        assert_eq!(item.processing_priority, 1, "the failed attempt left its mark");
    }
}

#[tokio::test]
async fn bucket_suggestions_commit_only_above_threshold() {
    let store = Arc::new(MemoryStore::new());
    let tenant = test_tenant();
    store.seed_feedback_category(tenant, "Battery");
    let weak_bucket = store.seed_bucket(tenant, "Maybe");
    let strong_bucket = store.seed_bucket(tenant, "Battery complaints");
    store.seed_preferences(crowdecho_pipeline::testing::default_preferences(tenant));
    seed_pending(&store, tenant, 1).await;

    let classifier = Arc::new(MockClassifier::auto(move |item| ItemVerdict {
        external_id: item.external_id.clone(),
        category: "Battery".to_string(),
        product: "Widget".to_string(),
        sentiment_score: 2.0,
        issue_count: 1,
        feature_request_count: 0,
        buckets: vec![
            crowdecho_pipeline::classify::BucketVerdict {
                name: "Maybe".to_string(),
                confidence: 0.55,
            },
            crowdecho_pipeline::classify::BucketVerdict {
                name: "Battery complaints".to_string(),
                confidence: 0.75,
            },
        ],
    }));
    let sink = Arc::new(CapturingSink::new());
    let runner = ClassifyRunner::new(store.clone(), classifier, sink.clone());

    let stats = runner.run(tenant).await.unwrap();
    assert_eq!(stats.bucketed, 1);

    let memberships = store.bucket_memberships();
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0].0, strong_bucket);
    assert!(!memberships.iter().any(|(b, _, _)| *b == weak_bucket));

    let item = store.item_by_external("t3_0").unwrap();
    assert!(item.added_to_bucket_by_ai);

    // The tenant hears about the new bucketing.
    let sent = sink.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body_html.contains("Battery complaints"));
}

#[tokio::test]
async fn no_bucket_match_leaves_flag_unset_and_sends_nothing() {
    let store = Arc::new(MemoryStore::new());
    let tenant = test_tenant();
    store.seed_feedback_category(tenant, "Battery");
    store.seed_bucket(tenant, "Battery complaints");
    seed_pending(&store, tenant, 1).await;

    let classifier = Arc::new(MockClassifier::auto(move |item| ItemVerdict {
        external_id: item.external_id.clone(),
        category: "Battery".to_string(),
        product: "Widget".to_string(),
        sentiment_score: 2.0,
        issue_count: 0,
        feature_request_count: 0,
        buckets: vec![crowdecho_pipeline::classify::BucketVerdict {
            name: "Battery complaints".to_string(),
            confidence: 0.55,
        }],
    }));
    let sink = Arc::new(CapturingSink::new());
    let runner = ClassifyRunner::new(store.clone(), classifier, sink.clone());

    runner.run(tenant).await.unwrap();

    assert!(store.bucket_memberships().is_empty());
    assert!(!store.item_by_external("t3_0").unwrap().added_to_bucket_by_ai);
    assert!(sink.sent().is_empty());
}

#[tokio::test]
async fn retries_are_ordered_by_priority_then_age() {
    let store = Arc::new(MemoryStore::new());
    let tenant = test_tenant();
    seed_pending(&store, tenant, 3).await;

    // Bump t3_0 twice and t3_1 once, as if they had failed before.
    let first = store.item_by_external("t3_0").unwrap().id;
    let second = store.item_by_external("t3_1").unwrap().id;
    store.bump_processing_priority(&[first, second]).await.unwrap();
    store.bump_processing_priority(&[first]).await.unwrap();

    let pending = store.pending_items(tenant, 10).await.unwrap();
    let order: Vec<&str> = pending.iter().map(|i| i.external_id.as_str()).collect();
    assert_eq!(order, vec!["t3_2", "t3_1", "t3_0"]);
}
