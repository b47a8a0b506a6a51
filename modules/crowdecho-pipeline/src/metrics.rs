//! Window metrics aggregator: current-vs-previous window counts and trends
//! per category. Pure over the fetched item sets; it never mutates content
//! state. Each run appends a snapshot row that becomes the baseline the next
//! run compares against.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crowdecho_common::{Sentiment, TenantRef, Window, WindowBounds, NOISE_CATEGORY};
use crowdecho_store::{ContentFilter, ContentItem, NewSnapshot};

use crate::traits::FeedbackStore;

/// Items surfaced per category in trend output and alert summaries.
pub const TOP_ITEMS_PER_CATEGORY: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopItem {
    pub id: Uuid,
    pub title: String,
    pub permalink: String,
    pub engagement: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryTrend {
    pub category: String,
    pub count: i64,
    pub previous_count: i64,
    pub percentage_change: f64,
    pub percentage_of_total: f64,
    pub total_comments: i64,
    pub top_items: Vec<TopItem>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SentimentDistribution {
    pub positive: i64,
    pub neutral: i64,
    pub negative: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub window_hours: i32,
    pub current_from: DateTime<Utc>,
    pub current_to: DateTime<Utc>,
    /// Raw totals, Noise and unclassified items included.
    pub total_items: i64,
    pub total_comments: i64,
    /// (upvotes * 0.5 + comments) / posts over the current window.
    pub engagement_score: f64,
    pub sentiment_distribution: SentimentDistribution,
    /// Per-category trends. Noise is excluded here by design.
    pub trends: Vec<CategoryTrend>,
}

/// Percentage delta between windows. A category appearing from nothing is
/// defined as +100%; absent in both windows is 0%.
pub fn percentage_change(previous: i64, current: i64) -> f64 {
    if previous == 0 {
        if current > 0 {
            100.0
        } else {
            0.0
        }
    } else {
        (current - previous) as f64 / previous as f64 * 100.0
    }
}

/// Group classified items by category name. Unclassified items are skipped;
/// they have not been through the classifier yet.
pub(crate) fn group_by_category(items: &[ContentItem]) -> HashMap<&str, Vec<&ContentItem>> {
    let mut groups: HashMap<&str, Vec<&ContentItem>> = HashMap::new();
    for item in items {
        if let Some(category) = item.category.as_deref() {
            groups.entry(category).or_default().push(item);
        }
    }
    groups
}

/// Compute metrics from the two windows' item sets. Pure and synchronous, so
/// the arithmetic is testable without a store.
pub fn compute(
    current: &[ContentItem],
    previous: &[ContentItem],
    bounds: WindowBounds,
) -> WindowMetrics {
    let total_items = current.len() as i64;
    let total_comments: i64 = current.iter().map(|i| i.num_comments).sum();
    let total_upvotes: i64 = current.iter().map(|i| i.score).sum();

    let engagement_score = if total_items > 0 {
        (total_upvotes as f64 * 0.5 + total_comments as f64) / total_items as f64
    } else {
        0.0
    };

    let mut sentiment = SentimentDistribution::default();
    for item in current {
        match item.sentiment.as_deref().and_then(Sentiment::parse) {
            Some(Sentiment::Positive) => sentiment.positive += 1,
            Some(Sentiment::Neutral) => sentiment.neutral += 1,
            Some(Sentiment::Negative) => sentiment.negative += 1,
            None => {}
        }
    }

    let current_groups = group_by_category(current);
    let previous_groups = group_by_category(previous);

    let mut trends: Vec<CategoryTrend> = Vec::new();
    for (category, items) in &current_groups {
        if *category == NOISE_CATEGORY {
            continue;
        }

        let count = items.len() as i64;
        let previous_count = previous_groups
            .get(category)
            .map(|v| v.len() as i64)
            .unwrap_or(0);

        let mut ranked: Vec<&&ContentItem> = items.iter().collect();
        ranked.sort_by_key(|i| std::cmp::Reverse(i.engagement()));
        let top_items = ranked
            .into_iter()
            .take(TOP_ITEMS_PER_CATEGORY)
            .map(|i| TopItem {
                id: i.id,
                title: i.title.clone(),
                permalink: i.permalink.clone(),
                engagement: i.engagement(),
            })
            .collect();

        trends.push(CategoryTrend {
            category: category.to_string(),
            count,
            previous_count,
            percentage_change: percentage_change(previous_count, count),
            percentage_of_total: if total_items > 0 {
                count as f64 / total_items as f64 * 100.0
            } else {
                0.0
            },
            total_comments: items.iter().map(|i| i.num_comments).sum(),
            top_items,
        });
    }
    trends.sort_by(|a, b| b.count.cmp(&a.count).then(a.category.cmp(&b.category)));

    WindowMetrics {
        window_hours: (bounds.current_to - bounds.current_from).num_hours().max(1) as i32,
        current_from: bounds.current_from,
        current_to: bounds.current_to,
        total_items,
        total_comments,
        engagement_score,
        sentiment_distribution: sentiment,
        trends,
    }
}

pub struct MetricsAggregator {
    store: Arc<dyn FeedbackStore>,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn FeedbackStore>) -> Self {
        Self { store }
    }

    /// Fetch both windows, compute metrics, and append the snapshot row that
    /// the next run will read as its baseline.
    pub async fn aggregate(
        &self,
        tenant: TenantRef,
        window: Window,
        now: DateTime<Utc>,
    ) -> Result<WindowMetrics> {
        let bounds = window.resolve(now);

        let current = self
            .store
            .query_items(tenant, &window_filter(bounds.current_from, bounds.current_to))
            .await?;
        let previous = self
            .store
            .query_items(tenant, &window_filter(bounds.previous_from, bounds.previous_to))
            .await?;

        let metrics = compute(&current, &previous, bounds);

        self.store
            .insert_snapshot(&NewSnapshot {
                tenant,
                window_hours: metrics.window_hours,
                total_items: metrics.total_items,
                total_comments: metrics.total_comments,
                category_trends: serde_json::to_value(&metrics.trends)
                    .expect("trend structure serializes"),
                captured_at: now,
            })
            .await?;

        info!(
            tenant = %tenant,
            window_hours = metrics.window_hours,
            items = metrics.total_items,
            categories = metrics.trends.len(),
            "Window metrics aggregated"
        );
        Ok(metrics)
    }
}

pub(crate) fn window_filter(from: DateTime<Utc>, to: DateTime<Utc>) -> ContentFilter {
    ContentFilter::builder()
        .posted_after(from)
        .posted_before(to)
        .build()
}
