//! Deterministic test doubles: an in-memory FeedbackStore with the same
//! upsert/orphan/transaction semantics as the Postgres store, plus mock
//! source, classifier, and sink. Everything runs without network or database.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crowdecho_common::{
    CrowdechoError, FetchedPost, FetchedReply, Sentiment, TenantRef, NOISE_CATEGORY,
};
use crowdecho_store::{
    BucketDef, CategoryDef, ContentFilter, ContentItem, ItemClassification, NewNotification,
    NewSnapshot, PreferencesRow, ReplyRow, SnapshotRow, Upserted, WatchedChannel,
};

use crate::classify::ItemVerdict;
use crate::traits::{Classifier, ContentSource, FeedbackStore, NotifySink};

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn test_tenant() -> TenantRef {
    TenantRef::User(Uuid::new_v4())
}

pub fn fetched_post(external_id: &str, channel: &str) -> FetchedPost {
    FetchedPost {
        external_id: external_id.to_string(),
        channel: channel.to_string(),
        author: "original_author".to_string(),
        title: format!("post {external_id}"),
        body: "body".to_string(),
        permalink: format!("https://example.com/{external_id}"),
        posted_at: Utc::now(),
        score: 1,
        num_comments: 0,
    }
}

pub fn fetched_reply(external_id: &str, parent: Option<&str>) -> FetchedReply {
    FetchedReply {
        external_id: external_id.to_string(),
        parent_external_id: parent.map(|p| p.to_string()),
        author: "commenter".to_string(),
        body: "reply body".to_string(),
        posted_at: Utc::now(),
        score: 0,
    }
}

pub fn default_preferences(tenant: TenantRef) -> PreferencesRow {
    PreferencesRow {
        id: Uuid::new_v4(),
        tenant_kind: tenant.kind().to_string(),
        tenant_id: tenant.id(),
        ingestion_cron: Some("0 0 * * * *".to_string()),
        ingestion_active: true,
        trigger_categorization: true,
        notifications_enabled: true,
        recipients: vec!["team@example.com".to_string()],
        issue_threshold: 5,
        volume_multiplier: 2.0,
        sentiment_threshold: 2.0,
        comment_growth_threshold: 10,
        window_hours: 24,
        last_notified: None,
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    preferences: HashMap<TenantRef, PreferencesRow>,
    channels: HashMap<TenantRef, Vec<WatchedChannel>>,
    feedback_categories: HashMap<TenantRef, Vec<CategoryDef>>,
    product_categories: HashMap<TenantRef, Vec<CategoryDef>>,
    buckets: HashMap<TenantRef, Vec<BucketDef>>,
    items: HashMap<Uuid, ContentItem>,
    items_by_external: HashMap<String, Uuid>,
    replies: HashMap<Uuid, ReplyRow>,
    replies_by_external: HashMap<String, Uuid>,
    bucket_memberships: Vec<(Uuid, Uuid, f64)>,
    snapshots: Vec<SnapshotRow>,
    notifications: Vec<NewNotification>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Seeding ---

    pub fn seed_preferences(&self, prefs: PreferencesRow) {
        let tenant = prefs.tenant();
        self.state.lock().unwrap().preferences.insert(tenant, prefs);
    }

    pub fn seed_channel(&self, tenant: TenantRef, channel: &str, keywords: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .channels
            .entry(tenant)
            .or_default()
            .push(WatchedChannel {
                id: Uuid::new_v4(),
                channel: channel.to_string(),
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
            });
    }

    pub fn seed_feedback_category(&self, tenant: TenantRef, name: &str) {
        self.state
            .lock()
            .unwrap()
            .feedback_categories
            .entry(tenant)
            .or_default()
            .push(CategoryDef {
                id: Uuid::new_v4(),
                name: name.to_string(),
                description: None,
            });
    }

    pub fn seed_product_category(&self, tenant: TenantRef, name: &str) {
        self.state
            .lock()
            .unwrap()
            .product_categories
            .entry(tenant)
            .or_default()
            .push(CategoryDef {
                id: Uuid::new_v4(),
                name: name.to_string(),
                description: None,
            });
    }

    pub fn seed_bucket(&self, tenant: TenantRef, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state
            .lock()
            .unwrap()
            .buckets
            .entry(tenant)
            .or_default()
            .push(BucketDef {
                id,
                name: name.to_string(),
                description: None,
            });
        id
    }

    /// Seed an already-classified item directly, for metrics/alerting tests.
    #[allow(clippy::too_many_arguments)]
    pub fn seed_classified_item(
        &self,
        tenant: TenantRef,
        category: &str,
        sentiment_score: f64,
        score: i64,
        num_comments: i64,
        posted_at: DateTime<Utc>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let external_id = format!("t3_{id}");
        let sentiment = Sentiment::from_score(sentiment_score as f32);
        let item = ContentItem {
            id,
            tenant_kind: tenant.kind().to_string(),
            tenant_id: tenant.id(),
            external_id: external_id.clone(),
            channel: "widgets".to_string(),
            author: "a".to_string(),
            title: format!("item {id}"),
            body: "b".to_string(),
            permalink: String::new(),
            posted_at,
            score,
            num_comments,
            last_updated: posted_at,
            needs_processing: false,
            processing_priority: 0,
            category: Some(category.to_string()),
            product: Some(category.to_string()),
            sentiment_score: Some(sentiment_score),
            sentiment: Some(sentiment.as_str().to_string()),
            issue_count: 0,
            feature_request_count: 0,
            added_to_bucket_by_ai: false,
        };
        let mut state = self.state.lock().unwrap();
        state.items_by_external.insert(external_id, id);
        state.items.insert(id, item);
        id
    }

    // --- Assertion helpers ---

    pub fn item_by_external(&self, external_id: &str) -> Option<ContentItem> {
        let state = self.state.lock().unwrap();
        state
            .items_by_external
            .get(external_id)
            .and_then(|id| state.items.get(id))
            .cloned()
    }

    pub fn item(&self, id: Uuid) -> Option<ContentItem> {
        self.state.lock().unwrap().items.get(&id).cloned()
    }

    pub fn reply_count(&self) -> usize {
        self.state.lock().unwrap().replies.len()
    }

    pub fn reply_by_external(&self, external_id: &str) -> Option<ReplyRow> {
        let state = self.state.lock().unwrap();
        state
            .replies_by_external
            .get(external_id)
            .and_then(|id| state.replies.get(id))
            .cloned()
    }

    pub fn bucket_memberships(&self) -> Vec<(Uuid, Uuid, f64)> {
        self.state.lock().unwrap().bucket_memberships.clone()
    }

    pub fn notifications(&self) -> Vec<NewNotification> {
        self.state.lock().unwrap().notifications.clone()
    }

    pub fn snapshots(&self) -> Vec<SnapshotRow> {
        self.state.lock().unwrap().snapshots.clone()
    }

    pub fn stored_preferences(&self, tenant: TenantRef) -> Option<PreferencesRow> {
        self.state.lock().unwrap().preferences.get(&tenant).cloned()
    }
}

#[async_trait]
impl FeedbackStore for MemoryStore {
    async fn preferences(
        &self,
        tenant: TenantRef,
    ) -> crowdecho_common::Result<Option<PreferencesRow>> {
        Ok(self.state.lock().unwrap().preferences.get(&tenant).cloned())
    }

    async fn active_ingestion_tenants(&self) -> crowdecho_common::Result<Vec<PreferencesRow>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .preferences
            .values()
            .filter(|p| p.ingestion_active)
            .cloned()
            .collect())
    }

    async fn upsert_ingestion_schedule(
        &self,
        tenant: TenantRef,
        cron: &str,
    ) -> crowdecho_common::Result<()> {
        let mut state = self.state.lock().unwrap();
        let prefs = state
            .preferences
            .entry(tenant)
            .or_insert_with(|| default_preferences(tenant));
        prefs.ingestion_cron = Some(cron.to_string());
        prefs.ingestion_active = true;
        Ok(())
    }

    async fn set_ingestion_active(
        &self,
        tenant: TenantRef,
        active: bool,
    ) -> crowdecho_common::Result<()> {
        if let Some(prefs) = self.state.lock().unwrap().preferences.get_mut(&tenant) {
            prefs.ingestion_active = active;
        }
        Ok(())
    }

    async fn set_trigger_categorization(
        &self,
        tenant: TenantRef,
        on: bool,
    ) -> crowdecho_common::Result<()> {
        if let Some(prefs) = self.state.lock().unwrap().preferences.get_mut(&tenant) {
            prefs.trigger_categorization = on;
        }
        Ok(())
    }

    async fn watched_channels(
        &self,
        tenant: TenantRef,
    ) -> crowdecho_common::Result<Vec<WatchedChannel>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .channels
            .get(&tenant)
            .cloned()
            .unwrap_or_default())
    }

    async fn feedback_categories(
        &self,
        tenant: TenantRef,
    ) -> crowdecho_common::Result<Vec<CategoryDef>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .feedback_categories
            .get(&tenant)
            .cloned()
            .unwrap_or_default())
    }

    async fn product_categories(
        &self,
        tenant: TenantRef,
    ) -> crowdecho_common::Result<Vec<CategoryDef>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .product_categories
            .get(&tenant)
            .cloned()
            .unwrap_or_default())
    }

    async fn buckets(&self, tenant: TenantRef) -> crowdecho_common::Result<Vec<BucketDef>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .buckets
            .get(&tenant)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_content_item(
        &self,
        tenant: TenantRef,
        post: &FetchedPost,
    ) -> crowdecho_common::Result<Upserted> {
        let mut state = self.state.lock().unwrap();

        if let Some(&id) = state.items_by_external.get(&post.external_id) {
            let item = state.items.get_mut(&id).expect("index points at a row");
            // Refresh mutable fields only; origin and classification stay.
            item.score = post.score;
            item.num_comments = post.num_comments;
            item.last_updated = Utc::now();
            return Ok(Upserted::Refreshed(id));
        }

        let id = Uuid::new_v4();
        state.items_by_external.insert(post.external_id.clone(), id);
        state.items.insert(
            id,
            ContentItem {
                id,
                tenant_kind: tenant.kind().to_string(),
                tenant_id: tenant.id(),
                external_id: post.external_id.clone(),
                channel: post.channel.clone(),
                author: post.author.clone(),
                title: post.title.clone(),
                body: post.body.clone(),
                permalink: post.permalink.clone(),
                posted_at: post.posted_at,
                score: post.score,
                num_comments: post.num_comments,
                last_updated: Utc::now(),
                needs_processing: true,
                processing_priority: 0,
                category: None,
                product: None,
                sentiment_score: None,
                sentiment: None,
                issue_count: 0,
                feature_request_count: 0,
                added_to_bucket_by_ai: false,
            },
        );
        Ok(Upserted::Created(id))
    }

    async fn upsert_reply(
        &self,
        item_id: Uuid,
        reply: &FetchedReply,
    ) -> crowdecho_common::Result<Uuid> {
        let mut state = self.state.lock().unwrap();

        let parent_id = match &reply.parent_external_id {
            None => None,
            Some(parent_ext) => {
                let parent = state
                    .replies_by_external
                    .get(parent_ext)
                    .and_then(|id| state.replies.get(id));
                match parent {
                    Some(p) if p.content_item_id == item_id => Some(p.id),
                    _ => {
                        return Err(CrowdechoError::OrphanReply {
                            external_id: reply.external_id.clone(),
                            parent: parent_ext.clone(),
                        })
                    }
                }
            }
        };

        if let Some(&id) = state.replies_by_external.get(&reply.external_id) {
            let row = state.replies.get_mut(&id).expect("index points at a row");
            row.score = reply.score;
            row.last_updated = Utc::now();
            return Ok(id);
        }

        let id = Uuid::new_v4();
        state.replies_by_external.insert(reply.external_id.clone(), id);
        state.replies.insert(
            id,
            ReplyRow {
                id,
                content_item_id: item_id,
                external_id: reply.external_id.clone(),
                parent_reply_id: parent_id,
                author: reply.author.clone(),
                body: reply.body.clone(),
                posted_at: reply.posted_at,
                score: reply.score,
                last_updated: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn pending_items(
        &self,
        tenant: TenantRef,
        limit: i64,
    ) -> crowdecho_common::Result<Vec<ContentItem>> {
        let state = self.state.lock().unwrap();
        let mut pending: Vec<ContentItem> = state
            .items
            .values()
            .filter(|i| i.tenant() == tenant && i.needs_processing)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.processing_priority
                .cmp(&b.processing_priority)
                .then(a.posted_at.cmp(&b.posted_at))
        });
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn mark_all_noise(&self, tenant: TenantRef) -> crowdecho_common::Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut marked = 0u64;
        for item in state.items.values_mut() {
            if item.tenant() == tenant && item.needs_processing {
                item.category = Some(NOISE_CATEGORY.to_string());
                item.product = Some(NOISE_CATEGORY.to_string());
                item.needs_processing = false;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn apply_classification_batch(
        &self,
        batch: &[ItemClassification],
        accept_threshold: f64,
    ) -> crowdecho_common::Result<Vec<(Uuid, Uuid, f64)>> {
        let mut state = self.state.lock().unwrap();
        let mut committed = Vec::new();

        for c in batch {
            let Some(item) = state.items.get_mut(&c.item_id) else {
                return Err(CrowdechoError::Database(format!(
                    "unknown item {} in classification batch",
                    c.item_id
                )));
            };
            item.category = Some(c.category.clone());
            item.product = Some(c.product.clone());
            item.sentiment_score = Some(c.sentiment_score);
            item.sentiment = Some(c.sentiment.as_str().to_string());
            item.issue_count = c.issue_count;
            item.feature_request_count = c.feature_request_count;
            item.needs_processing = false;

            let mut any_committed = false;
            for s in &c.bucket_suggestions {
                if s.confidence <= accept_threshold {
                    continue;
                }
                if !state
                    .bucket_memberships
                    .iter()
                    .any(|(b, i, _)| *b == s.bucket_id && *i == c.item_id)
                {
                    state
                        .bucket_memberships
                        .push((s.bucket_id, c.item_id, s.confidence));
                }
                any_committed = true;
                committed.push((c.item_id, s.bucket_id, s.confidence));
            }
            if any_committed {
                let item = state.items.get_mut(&c.item_id).expect("just updated");
                item.added_to_bucket_by_ai = true;
            }
        }

        Ok(committed)
    }

    async fn bump_processing_priority(&self, item_ids: &[Uuid]) -> crowdecho_common::Result<()> {
        let mut state = self.state.lock().unwrap();
        for id in item_ids {
            if let Some(item) = state.items.get_mut(id) {
                item.processing_priority += 1;
            }
        }
        Ok(())
    }

    async fn query_items(
        &self,
        tenant: TenantRef,
        filter: &ContentFilter,
    ) -> crowdecho_common::Result<Vec<ContentItem>> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<ContentItem> = state
            .items
            .values()
            .filter(|i| i.tenant() == tenant && filter.matches(i))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
        if let Some(limit) = filter.limit {
            items.truncate(limit as usize);
        }
        Ok(items)
    }

    async fn insert_snapshot(&self, snapshot: &NewSnapshot) -> crowdecho_common::Result<()> {
        self.state.lock().unwrap().snapshots.push(SnapshotRow {
            id: Uuid::new_v4(),
            tenant_kind: snapshot.tenant.kind().to_string(),
            tenant_id: snapshot.tenant.id(),
            window_hours: snapshot.window_hours,
            total_items: snapshot.total_items,
            total_comments: snapshot.total_comments,
            category_trends: snapshot.category_trends.clone(),
            captured_at: snapshot.captured_at,
        });
        Ok(())
    }

    async fn latest_snapshot(
        &self,
        tenant: TenantRef,
        window_hours: i32,
    ) -> crowdecho_common::Result<Option<SnapshotRow>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .snapshots
            .iter()
            .filter(|s| {
                s.tenant_kind == tenant.kind()
                    && s.tenant_id == tenant.id()
                    && s.window_hours == window_hours
            })
            .max_by_key(|s| s.captured_at)
            .cloned())
    }

    async fn record_notification(&self, n: &NewNotification) -> crowdecho_common::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.notifications.push(n.clone());
        if let Some(prefs) = state.preferences.get_mut(&n.tenant) {
            prefs.last_notified = Some(n.sent_at);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockSource {
    posts: Mutex<HashMap<String, Vec<FetchedPost>>>,
    replies: Mutex<HashMap<String, Vec<FetchedReply>>>,
    failing_channels: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stub_channel(&self, channel: &str, posts: Vec<FetchedPost>) {
        self.posts.lock().unwrap().insert(channel.to_string(), posts);
    }

    pub fn stub_replies(&self, permalink: &str, replies: Vec<FetchedReply>) {
        self.replies
            .lock()
            .unwrap()
            .insert(permalink.to_string(), replies);
    }

    pub fn fail_channel(&self, channel: &str) {
        self.failing_channels.lock().unwrap().push(channel.to_string());
    }
}

#[async_trait]
impl ContentSource for MockSource {
    async fn fetch_new(&self, channel: &str, _limit: u32) -> Result<Vec<FetchedPost>> {
        if self.failing_channels.lock().unwrap().iter().any(|c| c == channel) {
            return Err(anyhow!("channel {channel} is down"));
        }
        Ok(self
            .posts
            .lock()
            .unwrap()
            .get(channel)
            .cloned()
            .unwrap_or_default())
    }

    async fn search(&self, channel: &str, _query: &str, limit: u32) -> Result<Vec<FetchedPost>> {
        self.fetch_new(channel, limit).await
    }

    async fn fetch_reply_tree(&self, permalink: &str) -> Result<Vec<FetchedReply>> {
        Ok(self
            .replies
            .lock()
            .unwrap()
            .get(permalink)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MockClassifier
// ---------------------------------------------------------------------------

type AutoVerdict = Box<dyn Fn(&ContentItem) -> ItemVerdict + Send + Sync>;

/// Classifier double: fails the first `failures` calls, then produces one
/// verdict per item via the `auto` function.
pub struct MockClassifier {
    failures: Mutex<u32>,
    auto: AutoVerdict,
    pub calls: Mutex<u32>,
}

impl MockClassifier {
    pub fn auto<F>(f: F) -> Self
    where
        F: Fn(&ContentItem) -> ItemVerdict + Send + Sync + 'static,
    {
        Self {
            failures: Mutex::new(0),
            auto: Box::new(f),
            calls: Mutex::new(0),
        }
    }

    /// Uniform verdict: everything lands in one category with one sentiment.
    pub fn uniform(category: &str, product: &str, sentiment_score: f64) -> Self {
        let category = category.to_string();
        let product = product.to_string();
        Self::auto(move |item| ItemVerdict {
            external_id: item.external_id.clone(),
            category: category.clone(),
            product: product.clone(),
            sentiment_score,
            issue_count: 1,
            feature_request_count: 0,
            buckets: Vec::new(),
        })
    }

    pub fn with_failures(mut self, failures: u32) -> Self {
        self.failures = Mutex::new(failures);
        self
    }

    /// Always fails. The auto function is never reached.
    pub fn always_failing() -> Self {
        Self::uniform("unused", "unused", 3.0).with_failures(u32::MAX)
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(
        &self,
        items: &[ContentItem],
        _categories: &[CategoryDef],
        _products: &[CategoryDef],
        _buckets: &[BucketDef],
    ) -> Result<Vec<ItemVerdict>> {
        *self.calls.lock().unwrap() += 1;
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures = failures.saturating_sub(1);
                return Err(anyhow!("classifier unavailable"));
            }
        }
        Ok(items.iter().map(|i| (self.auto)(i)).collect())
    }
}

// ---------------------------------------------------------------------------
// CapturingSink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body_html: String,
}

#[derive(Default)]
pub struct CapturingSink {
    sent: Mutex<Vec<SentMessage>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotifySink for CapturingSink {
    async fn deliver(&self, recipients: &[String], subject: &str, body_html: &str) -> Result<()> {
        self.sent.lock().unwrap().push(SentMessage {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body_html: body_html.to_string(),
        });
        Ok(())
    }
}
