//! Classifier batch runner: drains the tenant's unclassified backlog in
//! fixed-size batches, applies each batch transactionally, and deprioritizes
//! failed batches instead of retrying them in place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crowdecho_common::{Sentiment, TenantRef};
use crowdecho_store::{BucketSuggestion, CommittedBucketing, ContentItem, ItemClassification};

use crate::notify::render_bucket_summary;
use crate::traits::{Classifier, FeedbackStore, NotifySink};

/// Items per classification batch.
pub const BATCH_SIZE: i64 = 10;

/// Minimum confidence for an AI bucket suggestion to be committed.
pub const BUCKET_ACCEPT_CONFIDENCE: f64 = 0.6;

/// Consecutive batch failures tolerated before the job aborts.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Fixed pause between batches, per the classifier's rate limits.
const BATCH_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
pub struct ClassifyStats {
    pub batches_applied: u32,
    pub items_classified: u32,
    pub noise_marked: u64,
    pub bucketed: u32,
}

pub struct ClassifyRunner {
    store: Arc<dyn FeedbackStore>,
    classifier: Arc<dyn Classifier>,
    sink: Arc<dyn NotifySink>,
}

impl ClassifyRunner {
    pub fn new(
        store: Arc<dyn FeedbackStore>,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn NotifySink>,
    ) -> Self {
        Self {
            store,
            classifier,
            sink,
        }
    }

    pub async fn run(&self, tenant: TenantRef) -> Result<ClassifyStats> {
        let mut stats = ClassifyStats::default();

        let categories = self.store.feedback_categories(tenant).await?;
        if categories.is_empty() {
            // No configuration means no classification is possible. Policy,
            // not an error. Everything pending becomes Noise.
            stats.noise_marked = self.store.mark_all_noise(tenant).await?;
            info!(
                tenant = %tenant,
                marked = stats.noise_marked,
                "No categories configured, marked pending items as Noise"
            );
            return Ok(stats);
        }

        let products = self.store.product_categories(tenant).await?;
        let buckets = self.store.buckets(tenant).await?;
        let bucket_ids: HashMap<&str, Uuid> =
            buckets.iter().map(|b| (b.name.as_str(), b.id)).collect();

        let mut consecutive_failures = 0u32;
        let mut committed_bucketings: Vec<CommittedBucketing> = Vec::new();

        loop {
            let batch = self.store.pending_items(tenant, BATCH_SIZE).await?;
            if batch.is_empty() {
                break;
            }
            if stats.batches_applied > 0 || consecutive_failures > 0 {
                tokio::time::sleep(BATCH_DELAY).await;
            }

            match self.classify_batch(&batch, &categories, &products, &buckets, &bucket_ids).await {
                Ok(classifications) => {
                    let committed = self
                        .store
                        .apply_classification_batch(&classifications, BUCKET_ACCEPT_CONFIDENCE)
                        .await?;

                    let titles: HashMap<Uuid, &str> =
                        batch.iter().map(|i| (i.id, i.title.as_str())).collect();
                    let bucket_names: HashMap<Uuid, &str> =
                        buckets.iter().map(|b| (b.id, b.name.as_str())).collect();
                    for (item_id, bucket_id, confidence) in committed {
                        committed_bucketings.push(CommittedBucketing {
                            item_id,
                            item_title: titles.get(&item_id).unwrap_or(&"").to_string(),
                            bucket_name: bucket_names.get(&bucket_id).unwrap_or(&"").to_string(),
                            confidence,
                        });
                    }

                    stats.batches_applied += 1;
                    stats.items_classified += classifications.len() as u32;
                    consecutive_failures = 0;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        tenant = %tenant,
                        error = %e,
                        consecutive_failures,
                        "Classification batch failed, deprioritizing its items"
                    );
                    let ids: Vec<Uuid> = batch.iter().map(|i| i.id).collect();
                    self.store.bump_processing_priority(&ids).await?;

                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        bail!(
                            "{MAX_CONSECUTIVE_FAILURES} consecutive classification batches failed for {tenant}"
                        );
                    }
                }
            }
        }

        stats.bucketed = committed_bucketings.len() as u32;
        if !committed_bucketings.is_empty() {
            self.notify_bucketed(tenant, &committed_bucketings).await;
        }

        info!(
            tenant = %tenant,
            batches = stats.batches_applied,
            items = stats.items_classified,
            bucketed = stats.bucketed,
            "Classification run complete"
        );
        Ok(stats)
    }

    async fn classify_batch(
        &self,
        batch: &[ContentItem],
        categories: &[crowdecho_store::CategoryDef],
        products: &[crowdecho_store::CategoryDef],
        buckets: &[crowdecho_store::BucketDef],
        bucket_ids: &HashMap<&str, Uuid>,
    ) -> Result<Vec<ItemClassification>> {
        let verdicts = self
            .classifier
            .classify(batch, categories, products, buckets)
            .await?;

        let items_by_external: HashMap<&str, &ContentItem> =
            batch.iter().map(|i| (i.external_id.as_str(), i)).collect();

        let mut classifications = Vec::with_capacity(verdicts.len());
        for verdict in verdicts {
            let Some(item) = items_by_external.get(verdict.external_id.as_str()) else {
                warn!(external_id = %verdict.external_id, "Verdict for unknown item, skipping");
                continue;
            };

            let score = verdict.sentiment_score.clamp(0.0, 5.0);
            let suggestions = verdict
                .buckets
                .iter()
                .filter_map(|b| match bucket_ids.get(b.name.as_str()) {
                    Some(&bucket_id) => Some(BucketSuggestion {
                        bucket_id,
                        confidence: b.confidence.clamp(0.0, 1.0),
                    }),
                    None => {
                        warn!(bucket = %b.name, "Suggestion names an unknown bucket, skipping");
                        None
                    }
                })
                .collect();

            classifications.push(ItemClassification {
                item_id: item.id,
                category: verdict.category,
                product: verdict.product,
                sentiment_score: score,
                sentiment: Sentiment::from_score(score as f32),
                issue_count: verdict.issue_count.max(0),
                feature_request_count: verdict.feature_request_count.max(0),
                bucket_suggestions: suggestions,
            });
        }

        if classifications.is_empty() {
            // A response that matches nothing in the batch would leave every
            // item pending and spin the loop forever.
            return Err(anyhow!("classifier response matched no items in the batch"));
        }
        Ok(classifications)
    }

    /// Tell the tenant which items the AI just filed into buckets. Missing
    /// recipients is a configuration gap, not a failure.
    async fn notify_bucketed(&self, tenant: TenantRef, bucketings: &[CommittedBucketing]) {
        let recipients = match self.store.preferences(tenant).await {
            Ok(Some(prefs)) if !prefs.recipients.is_empty() => prefs.recipients,
            Ok(_) => {
                info!(tenant = %tenant, "No recipients configured, skipping bucket summary");
                return;
            }
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Failed to load preferences for bucket summary");
                return;
            }
        };

        let subject = format!("{} feedback items were added to buckets", bucketings.len());
        let body = render_bucket_summary(bucketings);
        if let Err(e) = self.sink.deliver(&recipients, &subject, &body).await {
            warn!(tenant = %tenant, error = %e, "Failed to deliver bucket summary");
        }
    }
}
