// Postgres persistence for the pipeline. All cross-entity writes that must
// be atomic (classification batches, notification records) run in a single
// transaction here.

use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use crowdecho_common::{CrowdechoError, FetchedPost, FetchedReply, Result, TenantRef};

use crate::filter::ContentFilter;
use crate::rows::{
    BucketDef, CategoryDef, ContentItem, ItemClassification, NewNotification, NewSnapshot,
    PreferencesRow, ReplyRow, SnapshotRow, Upserted, WatchedChannel,
};

fn db_err(e: sqlx::Error) -> CrowdechoError {
    CrowdechoError::Database(e.to_string())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CrowdechoError::Database(e.to_string()))?;
        info!("Database migrations applied");
        Ok(())
    }

    // --- Preferences ---

    pub async fn preferences(&self, tenant: TenantRef) -> Result<Option<PreferencesRow>> {
        sqlx::query_as::<_, PreferencesRow>(
            "SELECT * FROM preferences WHERE tenant_kind = $1 AND tenant_id = $2",
        )
        .bind(tenant.kind())
        .bind(tenant.id())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    /// All tenants with ingestion currently switched on, for boot-time job
    /// registration.
    pub async fn active_ingestion_tenants(&self) -> Result<Vec<PreferencesRow>> {
        sqlx::query_as::<_, PreferencesRow>("SELECT * FROM preferences WHERE ingestion_active")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    /// Create-or-update the tenant's ingestion schedule and switch it on.
    pub async fn upsert_ingestion_schedule(&self, tenant: TenantRef, cron: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO preferences (tenant_kind, tenant_id, ingestion_cron, ingestion_active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (tenant_kind, tenant_id)
            DO UPDATE SET ingestion_cron = EXCLUDED.ingestion_cron,
                          ingestion_active = TRUE,
                          updated_at = NOW()
            "#,
        )
        .bind(tenant.kind())
        .bind(tenant.id())
        .bind(cron)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn set_ingestion_active(&self, tenant: TenantRef, active: bool) -> Result<()> {
        sqlx::query(
            "UPDATE preferences SET ingestion_active = $3, updated_at = NOW()
             WHERE tenant_kind = $1 AND tenant_id = $2",
        )
        .bind(tenant.kind())
        .bind(tenant.id())
        .bind(active)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn set_trigger_categorization(&self, tenant: TenantRef, on: bool) -> Result<()> {
        sqlx::query(
            "UPDATE preferences SET trigger_categorization = $3, updated_at = NOW()
             WHERE tenant_kind = $1 AND tenant_id = $2",
        )
        .bind(tenant.kind())
        .bind(tenant.id())
        .bind(on)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Update the notification half of a tenant's preferences. Enforces the
    /// write-side invariant: notifications cannot be enabled with an empty
    /// recipient list.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_notification_settings(
        &self,
        tenant: TenantRef,
        enabled: bool,
        recipients: &[String],
        issue_threshold: i32,
        volume_multiplier: f64,
        sentiment_threshold: f64,
        comment_growth_threshold: i32,
        window_hours: i32,
    ) -> Result<()> {
        if enabled && recipients.is_empty() {
            return Err(CrowdechoError::Validation(
                "notifications cannot be enabled without recipients".to_string(),
            ));
        }
        sqlx::query(
            r#"
            INSERT INTO preferences
                (tenant_kind, tenant_id, notifications_enabled, recipients,
                 issue_threshold, volume_multiplier, sentiment_threshold,
                 comment_growth_threshold, window_hours)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (tenant_kind, tenant_id)
            DO UPDATE SET notifications_enabled = EXCLUDED.notifications_enabled,
                          recipients = EXCLUDED.recipients,
                          issue_threshold = EXCLUDED.issue_threshold,
                          volume_multiplier = EXCLUDED.volume_multiplier,
                          sentiment_threshold = EXCLUDED.sentiment_threshold,
                          comment_growth_threshold = EXCLUDED.comment_growth_threshold,
                          window_hours = EXCLUDED.window_hours,
                          updated_at = NOW()
            "#,
        )
        .bind(tenant.kind())
        .bind(tenant.id())
        .bind(enabled)
        .bind(recipients)
        .bind(issue_threshold)
        .bind(volume_multiplier)
        .bind(sentiment_threshold)
        .bind(comment_growth_threshold)
        .bind(window_hours)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    // --- Tenant configuration ---

    /// Watch a channel, or update the keyword filter of one already watched.
    pub async fn add_watched_channel(
        &self,
        tenant: TenantRef,
        channel: &str,
        keywords: &[String],
    ) -> Result<Uuid> {
        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO watched_channels (tenant_kind, tenant_id, channel, keywords)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_kind, tenant_id, channel)
            DO UPDATE SET keywords = EXCLUDED.keywords
            RETURNING id
            "#,
        )
        .bind(tenant.kind())
        .bind(tenant.id())
        .bind(channel)
        .bind(keywords)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(id.0)
    }

    pub async fn remove_watched_channel(&self, tenant: TenantRef, channel: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM watched_channels
             WHERE tenant_kind = $1 AND tenant_id = $2 AND channel = $3",
        )
        .bind(tenant.kind())
        .bind(tenant.id())
        .bind(channel)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_feedback_category(
        &self,
        tenant: TenantRef,
        name: &str,
        description: Option<&str>,
    ) -> Result<Uuid> {
        self.create_category(tenant, "feedback_categories", name, description)
            .await
    }

    pub async fn create_product_category(
        &self,
        tenant: TenantRef,
        name: &str,
        description: Option<&str>,
    ) -> Result<Uuid> {
        self.create_category(tenant, "product_categories", name, description)
            .await
    }

    async fn create_category(
        &self,
        tenant: TenantRef,
        table: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Uuid> {
        let id: (Uuid,) = sqlx::query_as(&format!(
            r#"
            INSERT INTO {table} (tenant_kind, tenant_id, name, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_kind, tenant_id, name)
            DO UPDATE SET description = EXCLUDED.description
            RETURNING id
            "#
        ))
        .bind(tenant.kind())
        .bind(tenant.id())
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(id.0)
    }

    pub async fn create_bucket(
        &self,
        tenant: TenantRef,
        name: &str,
        description: Option<&str>,
    ) -> Result<Uuid> {
        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO buckets (tenant_kind, tenant_id, name, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_kind, tenant_id, name)
            DO UPDATE SET description = EXCLUDED.description
            RETURNING id
            "#,
        )
        .bind(tenant.kind())
        .bind(tenant.id())
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(id.0)
    }

    /// Manual bucket membership, as opposed to the AI-suggested path in
    /// `apply_classification_batch`.
    pub async fn add_item_to_bucket(&self, bucket_id: Uuid, item_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bucket_items (bucket_id, content_item_id, added_by_ai)
            VALUES ($1, $2, FALSE)
            ON CONFLICT (bucket_id, content_item_id) DO NOTHING
            "#,
        )
        .bind(bucket_id)
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn watched_channels(&self, tenant: TenantRef) -> Result<Vec<WatchedChannel>> {
        sqlx::query_as::<_, WatchedChannel>(
            "SELECT id, channel, keywords FROM watched_channels
             WHERE tenant_kind = $1 AND tenant_id = $2 ORDER BY channel",
        )
        .bind(tenant.kind())
        .bind(tenant.id())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    pub async fn feedback_categories(&self, tenant: TenantRef) -> Result<Vec<CategoryDef>> {
        self.categories(tenant, "feedback_categories").await
    }

    pub async fn product_categories(&self, tenant: TenantRef) -> Result<Vec<CategoryDef>> {
        self.categories(tenant, "product_categories").await
    }

    async fn categories(&self, tenant: TenantRef, table: &str) -> Result<Vec<CategoryDef>> {
        sqlx::query_as::<_, CategoryDef>(&format!(
            "SELECT id, name, description FROM {table}
             WHERE tenant_kind = $1 AND tenant_id = $2 ORDER BY name"
        ))
        .bind(tenant.kind())
        .bind(tenant.id())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    pub async fn buckets(&self, tenant: TenantRef) -> Result<Vec<BucketDef>> {
        sqlx::query_as::<_, BucketDef>(
            "SELECT id, name, description FROM buckets
             WHERE tenant_kind = $1 AND tenant_id = $2 ORDER BY name",
        )
        .bind(tenant.kind())
        .bind(tenant.id())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    // --- Content upserts ---

    /// Upsert a post by external id. Creates with full origin fields and a
    /// fresh processing state; on conflict refreshes only the mutable
    /// engagement fields, so a re-fetch never un-classifies an item.
    pub async fn upsert_content_item(
        &self,
        tenant: TenantRef,
        post: &FetchedPost,
    ) -> Result<Upserted> {
        // xmax = 0 distinguishes a fresh insert from a conflict-update.
        let (id, created): (Uuid, bool) = sqlx::query_as(
            r#"
            INSERT INTO content_items
                (tenant_kind, tenant_id, external_id, channel, author, title,
                 body, permalink, posted_at, score, num_comments)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (external_id)
            DO UPDATE SET score = EXCLUDED.score,
                          num_comments = EXCLUDED.num_comments,
                          last_updated = NOW()
            RETURNING id, (xmax = 0)
            "#,
        )
        .bind(tenant.kind())
        .bind(tenant.id())
        .bind(&post.external_id)
        .bind(&post.channel)
        .bind(&post.author)
        .bind(&post.title)
        .bind(&post.body)
        .bind(&post.permalink)
        .bind(post.posted_at)
        .bind(post.score)
        .bind(post.num_comments)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(if created {
            Upserted::Created(id)
        } else {
            Upserted::Refreshed(id)
        })
    }

    /// Upsert one reply into an item's tree. The parent, when set, must
    /// already be persisted and belong to the same content item; a dangling
    /// child is an error, never a silent orphan.
    pub async fn upsert_reply(&self, item_id: Uuid, reply: &FetchedReply) -> Result<Uuid> {
        let parent_id = match &reply.parent_external_id {
            None => None,
            Some(parent_ext) => {
                let parent: Option<(Uuid, Uuid)> = sqlx::query_as(
                    "SELECT id, content_item_id FROM replies WHERE external_id = $1",
                )
                .bind(parent_ext)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

                match parent {
                    Some((pid, owner)) if owner == item_id => Some(pid),
                    _ => {
                        return Err(CrowdechoError::OrphanReply {
                            external_id: reply.external_id.clone(),
                            parent: parent_ext.clone(),
                        })
                    }
                }
            }
        };

        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO replies
                (content_item_id, external_id, parent_reply_id, author, body,
                 posted_at, score)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (external_id)
            DO UPDATE SET score = EXCLUDED.score,
                          last_updated = NOW()
            RETURNING id
            "#,
        )
        .bind(item_id)
        .bind(&reply.external_id)
        .bind(parent_id)
        .bind(&reply.author)
        .bind(&reply.body)
        .bind(reply.posted_at)
        .bind(reply.score)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(id.0)
    }

    pub async fn replies_for_item(&self, item_id: Uuid) -> Result<Vec<ReplyRow>> {
        sqlx::query_as::<_, ReplyRow>(
            "SELECT * FROM replies WHERE content_item_id = $1 ORDER BY posted_at",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    // --- Classification ---

    /// The next batch of unclassified items: failed items retry first by
    /// priority, ties broken oldest-first so retries never starve fresh items
    /// once priorities settle.
    pub async fn pending_items(&self, tenant: TenantRef, limit: i64) -> Result<Vec<ContentItem>> {
        sqlx::query_as::<_, ContentItem>(
            "SELECT * FROM content_items
             WHERE tenant_kind = $1 AND tenant_id = $2 AND needs_processing
             ORDER BY processing_priority ASC, posted_at ASC
             LIMIT $3",
        )
        .bind(tenant.kind())
        .bind(tenant.id())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    /// No categories configured: everything pending becomes Noise in one sweep.
    pub async fn mark_all_noise(&self, tenant: TenantRef) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE content_items
             SET category = $3, product = $3, needs_processing = FALSE
             WHERE tenant_kind = $1 AND tenant_id = $2 AND needs_processing",
        )
        .bind(tenant.kind())
        .bind(tenant.id())
        .bind(crowdecho_common::NOISE_CATEGORY)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    /// Apply one classification batch atomically. Bucket suggestions commit
    /// only above the acceptance threshold; returns the committed memberships
    /// as (item_id, bucket_id, confidence).
    pub async fn apply_classification_batch(
        &self,
        batch: &[ItemClassification],
        accept_threshold: f64,
    ) -> Result<Vec<(Uuid, Uuid, f64)>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut committed = Vec::new();

        for c in batch {
            sqlx::query(
                r#"
                UPDATE content_items
                SET category = $2,
                    product = $3,
                    sentiment_score = $4,
                    sentiment = $5,
                    issue_count = $6,
                    feature_request_count = $7,
                    needs_processing = FALSE
                WHERE id = $1
                "#,
            )
            .bind(c.item_id)
            .bind(&c.category)
            .bind(&c.product)
            .bind(c.sentiment_score)
            .bind(c.sentiment.as_str())
            .bind(c.issue_count)
            .bind(c.feature_request_count)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            let mut any_committed = false;
            for suggestion in &c.bucket_suggestions {
                if suggestion.confidence <= accept_threshold {
                    continue;
                }
                sqlx::query(
                    r#"
                    INSERT INTO bucket_items (bucket_id, content_item_id, added_by_ai, confidence)
                    VALUES ($1, $2, TRUE, $3)
                    ON CONFLICT (bucket_id, content_item_id) DO NOTHING
                    "#,
                )
                .bind(suggestion.bucket_id)
                .bind(c.item_id)
                .bind(suggestion.confidence)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                any_committed = true;
                committed.push((c.item_id, suggestion.bucket_id, suggestion.confidence));
            }

            if any_committed {
                sqlx::query("UPDATE content_items SET added_to_bucket_by_ai = TRUE WHERE id = $1")
                    .bind(c.item_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(committed)
    }

    /// Deprioritize every item of a failed batch so it is retried later,
    /// behind fresher failures elsewhere.
    pub async fn bump_processing_priority(&self, item_ids: &[Uuid]) -> Result<()> {
        sqlx::query(
            "UPDATE content_items
             SET processing_priority = processing_priority + 1
             WHERE id = ANY($1)",
        )
        .bind(item_ids)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    // --- Reads ---

    pub async fn query_items(
        &self,
        tenant: TenantRef,
        filter: &ContentFilter,
    ) -> Result<Vec<ContentItem>> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT * FROM content_items WHERE tenant_kind = ");
        qb.push_bind(tenant.kind());
        qb.push(" AND tenant_id = ").push_bind(tenant.id());
        filter.push_clauses(&mut qb);
        qb.push(" ORDER BY posted_at DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }

        qb.build_query_as::<ContentItem>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    // --- Snapshots and notifications ---

    pub async fn insert_snapshot(&self, snapshot: &NewSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO window_metrics_snapshots
                (tenant_kind, tenant_id, window_hours, total_items,
                 total_comments, category_trends, captured_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(snapshot.tenant.kind())
        .bind(snapshot.tenant.id())
        .bind(snapshot.window_hours)
        .bind(snapshot.total_items)
        .bind(snapshot.total_comments)
        .bind(&snapshot.category_trends)
        .bind(snapshot.captured_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn latest_snapshot(
        &self,
        tenant: TenantRef,
        window_hours: i32,
    ) -> Result<Option<SnapshotRow>> {
        sqlx::query_as::<_, SnapshotRow>(
            "SELECT * FROM window_metrics_snapshots
             WHERE tenant_kind = $1 AND tenant_id = $2 AND window_hours = $3
             ORDER BY captured_at DESC LIMIT 1",
        )
        .bind(tenant.kind())
        .bind(tenant.id())
        .bind(window_hours)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    /// Write the audit record for a sent alert and advance the cooldown
    /// marker in the same transaction.
    pub async fn record_notification(&self, n: &NewNotification) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO notification_records
                (tenant_kind, tenant_id, categories, content_item_ids,
                 recipients, subject, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(n.tenant.kind())
        .bind(n.tenant.id())
        .bind(&n.categories)
        .bind(&n.content_item_ids)
        .bind(&n.recipients)
        .bind(&n.subject)
        .bind(n.sent_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "UPDATE preferences SET last_notified = $3, updated_at = NOW()
             WHERE tenant_kind = $1 AND tenant_id = $2",
        )
        .bind(n.tenant.kind())
        .bind(n.tenant.id())
        .bind(n.sent_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}
