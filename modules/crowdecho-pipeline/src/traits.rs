// Trait abstractions for pipeline dependencies.
//
// ContentSource: the external content platform (Reddit via Apify in prod).
// Classifier: the external AI categorization function.
// NotifySink: the email transport.
// FeedbackStore: the relational store the pipeline reads and writes.
//
// These enable deterministic testing with the mocks in `testing`:
// no network, no database, no Docker. `cargo test` in seconds.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crowdecho_common::{FetchedPost, FetchedReply, TenantRef};
use crowdecho_store::{
    BucketDef, CategoryDef, ContentFilter, ContentItem, ItemClassification, NewNotification,
    NewSnapshot, PgStore, PreferencesRow, SnapshotRow, Upserted, WatchedChannel,
};

use crate::classify::ItemVerdict;

// ---------------------------------------------------------------------------
// ContentSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch the newest items from a channel.
    async fn fetch_new(&self, channel: &str, limit: u32) -> Result<Vec<FetchedPost>>;

    /// Keyword search within a channel, newest first.
    async fn search(&self, channel: &str, query: &str, limit: u32) -> Result<Vec<FetchedPost>>;

    /// Fetch the full reply tree of one item, as a flat list with parent refs.
    async fn fetch_reply_tree(&self, permalink: &str) -> Result<Vec<FetchedReply>>;
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a batch of items against the tenant's category, product, and
    /// bucket definitions. Returns one verdict per input item.
    async fn classify(
        &self,
        items: &[ContentItem],
        categories: &[CategoryDef],
        products: &[CategoryDef],
        buckets: &[BucketDef],
    ) -> Result<Vec<ItemVerdict>>;
}

// ---------------------------------------------------------------------------
// NotifySink
// ---------------------------------------------------------------------------

#[async_trait]
pub trait NotifySink: Send + Sync {
    /// Deliver one message. Fire-and-forget from the pipeline's perspective,
    /// but implementations must log failures rather than swallow them.
    async fn deliver(&self, recipients: &[String], subject: &str, body_html: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// FeedbackStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    // --- Preferences ---
    async fn preferences(&self, tenant: TenantRef) -> crowdecho_common::Result<Option<PreferencesRow>>;
    async fn active_ingestion_tenants(&self) -> crowdecho_common::Result<Vec<PreferencesRow>>;
    async fn upsert_ingestion_schedule(
        &self,
        tenant: TenantRef,
        cron: &str,
    ) -> crowdecho_common::Result<()>;
    async fn set_ingestion_active(
        &self,
        tenant: TenantRef,
        active: bool,
    ) -> crowdecho_common::Result<()>;
    async fn set_trigger_categorization(
        &self,
        tenant: TenantRef,
        on: bool,
    ) -> crowdecho_common::Result<()>;

    // --- Tenant configuration ---
    async fn watched_channels(&self, tenant: TenantRef) -> crowdecho_common::Result<Vec<WatchedChannel>>;
    async fn feedback_categories(&self, tenant: TenantRef) -> crowdecho_common::Result<Vec<CategoryDef>>;
    async fn product_categories(&self, tenant: TenantRef) -> crowdecho_common::Result<Vec<CategoryDef>>;
    async fn buckets(&self, tenant: TenantRef) -> crowdecho_common::Result<Vec<BucketDef>>;

    // --- Content ---
    async fn upsert_content_item(
        &self,
        tenant: TenantRef,
        post: &FetchedPost,
    ) -> crowdecho_common::Result<Upserted>;
    async fn upsert_reply(
        &self,
        item_id: Uuid,
        reply: &FetchedReply,
    ) -> crowdecho_common::Result<Uuid>;
    async fn pending_items(
        &self,
        tenant: TenantRef,
        limit: i64,
    ) -> crowdecho_common::Result<Vec<ContentItem>>;
    async fn mark_all_noise(&self, tenant: TenantRef) -> crowdecho_common::Result<u64>;
    async fn apply_classification_batch(
        &self,
        batch: &[ItemClassification],
        accept_threshold: f64,
    ) -> crowdecho_common::Result<Vec<(Uuid, Uuid, f64)>>;
    async fn bump_processing_priority(&self, item_ids: &[Uuid]) -> crowdecho_common::Result<()>;
    async fn query_items(
        &self,
        tenant: TenantRef,
        filter: &ContentFilter,
    ) -> crowdecho_common::Result<Vec<ContentItem>>;

    // --- Snapshots and notifications ---
    async fn insert_snapshot(&self, snapshot: &NewSnapshot) -> crowdecho_common::Result<()>;
    async fn latest_snapshot(
        &self,
        tenant: TenantRef,
        window_hours: i32,
    ) -> crowdecho_common::Result<Option<SnapshotRow>>;
    async fn record_notification(&self, n: &NewNotification) -> crowdecho_common::Result<()>;
}

#[async_trait]
impl FeedbackStore for PgStore {
    async fn preferences(&self, tenant: TenantRef) -> crowdecho_common::Result<Option<PreferencesRow>> {
        PgStore::preferences(self, tenant).await
    }

    async fn active_ingestion_tenants(&self) -> crowdecho_common::Result<Vec<PreferencesRow>> {
        PgStore::active_ingestion_tenants(self).await
    }

    async fn upsert_ingestion_schedule(
        &self,
        tenant: TenantRef,
        cron: &str,
    ) -> crowdecho_common::Result<()> {
        PgStore::upsert_ingestion_schedule(self, tenant, cron).await
    }

    async fn set_ingestion_active(
        &self,
        tenant: TenantRef,
        active: bool,
    ) -> crowdecho_common::Result<()> {
        PgStore::set_ingestion_active(self, tenant, active).await
    }

    async fn set_trigger_categorization(
        &self,
        tenant: TenantRef,
        on: bool,
    ) -> crowdecho_common::Result<()> {
        PgStore::set_trigger_categorization(self, tenant, on).await
    }

    async fn watched_channels(&self, tenant: TenantRef) -> crowdecho_common::Result<Vec<WatchedChannel>> {
        PgStore::watched_channels(self, tenant).await
    }

    async fn feedback_categories(&self, tenant: TenantRef) -> crowdecho_common::Result<Vec<CategoryDef>> {
        PgStore::feedback_categories(self, tenant).await
    }

    async fn product_categories(&self, tenant: TenantRef) -> crowdecho_common::Result<Vec<CategoryDef>> {
        PgStore::product_categories(self, tenant).await
    }

    async fn buckets(&self, tenant: TenantRef) -> crowdecho_common::Result<Vec<BucketDef>> {
        PgStore::buckets(self, tenant).await
    }

    async fn upsert_content_item(
        &self,
        tenant: TenantRef,
        post: &FetchedPost,
    ) -> crowdecho_common::Result<Upserted> {
        PgStore::upsert_content_item(self, tenant, post).await
    }

    async fn upsert_reply(
        &self,
        item_id: Uuid,
        reply: &FetchedReply,
    ) -> crowdecho_common::Result<Uuid> {
        PgStore::upsert_reply(self, item_id, reply).await
    }

    async fn pending_items(
        &self,
        tenant: TenantRef,
        limit: i64,
    ) -> crowdecho_common::Result<Vec<ContentItem>> {
        PgStore::pending_items(self, tenant, limit).await
    }

    async fn mark_all_noise(&self, tenant: TenantRef) -> crowdecho_common::Result<u64> {
        PgStore::mark_all_noise(self, tenant).await
    }

    async fn apply_classification_batch(
        &self,
        batch: &[ItemClassification],
        accept_threshold: f64,
    ) -> crowdecho_common::Result<Vec<(Uuid, Uuid, f64)>> {
        PgStore::apply_classification_batch(self, batch, accept_threshold).await
    }

    async fn bump_processing_priority(&self, item_ids: &[Uuid]) -> crowdecho_common::Result<()> {
        PgStore::bump_processing_priority(self, item_ids).await
    }

    async fn query_items(
        &self,
        tenant: TenantRef,
        filter: &ContentFilter,
    ) -> crowdecho_common::Result<Vec<ContentItem>> {
        PgStore::query_items(self, tenant, filter).await
    }

    async fn insert_snapshot(&self, snapshot: &NewSnapshot) -> crowdecho_common::Result<()> {
        PgStore::insert_snapshot(self, snapshot).await
    }

    async fn latest_snapshot(
        &self,
        tenant: TenantRef,
        window_hours: i32,
    ) -> crowdecho_common::Result<Option<SnapshotRow>> {
        PgStore::latest_snapshot(self, tenant, window_hours).await
    }

    async fn record_notification(&self, n: &NewNotification) -> crowdecho_common::Result<()> {
        PgStore::record_notification(self, n).await
    }
}
