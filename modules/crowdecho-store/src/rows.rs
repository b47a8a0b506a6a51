use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crowdecho_common::{Sentiment, TenantRef};

/// Per-tenant preferences: ingestion schedule, categorization trigger, and
/// notification thresholds. One row per tenant.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PreferencesRow {
    pub id: Uuid,
    pub tenant_kind: String,
    pub tenant_id: Uuid,

    pub ingestion_cron: Option<String>,
    pub ingestion_active: bool,
    pub trigger_categorization: bool,

    pub notifications_enabled: bool,
    pub recipients: Vec<String>,
    pub issue_threshold: i32,
    pub volume_multiplier: f64,
    pub sentiment_threshold: f64,
    pub comment_growth_threshold: i32,
    pub window_hours: i32,
    pub last_notified: Option<DateTime<Utc>>,
}

impl PreferencesRow {
    pub fn tenant(&self) -> TenantRef {
        TenantRef::from_parts(&self.tenant_kind, self.tenant_id)
            .expect("tenant_kind column is constrained to valid kinds")
    }
}

/// A watched external channel (subreddit), with an optional keyword filter.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WatchedChannel {
    pub id: Uuid,
    pub channel: String,
    pub keywords: Vec<String>,
}

/// A tenant-defined feedback or product category.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryDef {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

/// A tenant-defined bucket: a named grouping of content items.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BucketDef {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

/// A persisted content item (post) with its processing and classification state.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ContentItem {
    pub id: Uuid,
    pub tenant_kind: String,
    pub tenant_id: Uuid,

    pub external_id: String,
    pub channel: String,

    pub author: String,
    pub title: String,
    pub body: String,
    pub permalink: String,
    pub posted_at: DateTime<Utc>,

    pub score: i64,
    pub num_comments: i64,
    pub last_updated: DateTime<Utc>,

    pub needs_processing: bool,
    pub processing_priority: i32,

    pub category: Option<String>,
    pub product: Option<String>,
    pub sentiment_score: Option<f64>,
    pub sentiment: Option<String>,
    pub issue_count: i32,
    pub feature_request_count: i32,
    pub added_to_bucket_by_ai: bool,
}

impl ContentItem {
    pub fn tenant(&self) -> TenantRef {
        TenantRef::from_parts(&self.tenant_kind, self.tenant_id)
            .expect("tenant_kind column is constrained to valid kinds")
    }

    /// Engagement proxy used for top-item ranking.
    pub fn engagement(&self) -> i64 {
        self.score + self.num_comments
    }
}

/// A persisted reply (comment) in a content item's tree.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReplyRow {
    pub id: Uuid,
    pub content_item_id: Uuid,
    pub external_id: String,
    pub parent_reply_id: Option<Uuid>,

    pub author: String,
    pub body: String,
    pub posted_at: DateTime<Utc>,

    pub score: i64,
    pub last_updated: DateTime<Utc>,
}

/// Outcome of a single content upsert: whether the row was created or only
/// its mutable fields refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Created(Uuid),
    Refreshed(Uuid),
}

impl Upserted {
    pub fn id(&self) -> Uuid {
        match self {
            Upserted::Created(id) | Upserted::Refreshed(id) => *id,
        }
    }
}

/// A bucket membership suggested by the classifier, with its confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSuggestion {
    pub bucket_id: Uuid,
    pub confidence: f64,
}

/// The classifier's verdict for one content item, ready to apply.
#[derive(Debug, Clone)]
pub struct ItemClassification {
    pub item_id: Uuid,
    pub category: String,
    pub product: String,
    pub sentiment_score: f64,
    pub sentiment: Sentiment,
    pub issue_count: i32,
    pub feature_request_count: i32,
    pub bucket_suggestions: Vec<BucketSuggestion>,
}

/// A bucket membership that cleared the acceptance threshold and was committed.
#[derive(Debug, Clone)]
pub struct CommittedBucketing {
    pub item_id: Uuid,
    pub item_title: String,
    pub bucket_name: String,
    pub confidence: f64,
}

/// Append-only snapshot of one aggregation run, the baseline for the next
/// run's delta.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    pub id: Uuid,
    pub tenant_kind: String,
    pub tenant_id: Uuid,
    pub window_hours: i32,
    pub total_items: i64,
    pub total_comments: i64,
    pub category_trends: serde_json::Value,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub tenant: TenantRef,
    pub window_hours: i32,
    pub total_items: i64,
    pub total_comments: i64,
    pub category_trends: serde_json::Value,
    pub captured_at: DateTime<Utc>,
}

/// Append-only audit row for one sent alert. Writing it also advances the
/// tenant's `last_notified` cooldown marker in the same transaction.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub tenant: TenantRef,
    pub categories: Vec<String>,
    pub content_item_ids: Vec<Uuid>,
    pub recipients: Vec<String>,
    pub subject: String,
    pub sent_at: DateTime<Utc>,
}
