//! Content upsert engine: persists fetched posts and their reply trees
//! idempotently. Re-fetching refreshes engagement fields only; origin and
//! classification fields are never overwritten. Reply trees are applied
//! strictly parent-before-child so partial failure never creates orphans.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crowdecho_common::{FetchedPost, FetchedReply, TenantRef};
use crowdecho_store::WatchedChannel;

use crate::traits::{ContentSource, FeedbackStore};

/// Fixed pause between reply-tree fetches, per the source's rate limits.
pub const REPLY_TREE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
pub struct IngestStats {
    pub posts_upserted: u32,
    pub replies_upserted: u32,
    pub failures: u32,
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} posts, {} replies, {} failures",
            self.posts_upserted, self.replies_upserted, self.failures
        )
    }
}

pub struct IngestEngine {
    store: Arc<dyn FeedbackStore>,
    source: Arc<dyn ContentSource>,
}

impl IngestEngine {
    pub fn new(store: Arc<dyn FeedbackStore>, source: Arc<dyn ContentSource>) -> Self {
        Self { store, source }
    }

    /// Persist the fetched batches for one tenant. A persistence error on one
    /// post is logged and skipped so its siblings still land, but the run as
    /// a whole reports failure upward: the scheduler's failure handler then
    /// disables ingestion for the tenant instead of looping on a poison item.
    pub async fn ingest(
        &self,
        tenant: TenantRef,
        batches: &[(WatchedChannel, Vec<FetchedPost>)],
    ) -> Result<IngestStats> {
        let mut stats = IngestStats::default();
        let mut first_tree_fetched = false;

        for (channel, posts) in batches {
            for post in posts {
                if first_tree_fetched {
                    tokio::time::sleep(REPLY_TREE_DELAY).await;
                }
                first_tree_fetched = true;

                match self.ingest_post(tenant, post).await {
                    Ok(replies) => {
                        stats.posts_upserted += 1;
                        stats.replies_upserted += replies;
                    }
                    Err(e) => {
                        warn!(
                            channel = %channel.channel,
                            external_id = %post.external_id,
                            error = %e,
                            "Failed to persist post, continuing with remaining posts"
                        );
                        stats.failures += 1;
                    }
                }
            }
        }

        info!(tenant = %tenant, %stats, "Ingest complete");

        if stats.failures > 0 {
            return Err(anyhow!(
                "{} of the fetched posts failed to persist for {tenant}",
                stats.failures
            ));
        }
        Ok(stats)
    }

    async fn ingest_post(&self, tenant: TenantRef, post: &FetchedPost) -> Result<u32> {
        let upserted = self.store.upsert_content_item(tenant, post).await?;
        let item_id = upserted.id();

        let tree = self.source.fetch_reply_tree(&post.permalink).await?;
        let ordered = order_reply_tree(tree);

        let mut count = 0u32;
        for reply in &ordered {
            // Children are only attempted after their parent persisted; an
            // error here aborts the rest of this post's tree.
            self.store.upsert_reply(item_id, reply).await?;
            count += 1;
        }
        Ok(count)
    }
}

/// Order a flat reply list parent-before-child. Uses an arena-style map plus
/// an adjacency index rather than a pointer graph, so ownership stays acyclic.
/// Replies whose parent is absent from the batch are emitted last, with their
/// parent reference intact; persistence will reject them loudly.
pub fn order_reply_tree(replies: Vec<FetchedReply>) -> Vec<FetchedReply> {
    let ids: HashSet<&str> = replies.iter().map(|r| r.external_id.as_str()).collect();

    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut roots: Vec<usize> = Vec::new();
    let mut dangling: Vec<usize> = Vec::new();

    for (i, reply) in replies.iter().enumerate() {
        match reply.parent_external_id.as_deref() {
            None => roots.push(i),
            Some(parent) if ids.contains(parent) => {
                children.entry(parent).or_default().push(i);
            }
            Some(_) => dangling.push(i),
        }
    }

    let mut order: Vec<usize> = Vec::with_capacity(replies.len());
    let mut stack: Vec<usize> = roots;
    stack.reverse();
    while let Some(i) = stack.pop() {
        order.push(i);
        if let Some(kids) = children.get(replies[i].external_id.as_str()) {
            for &k in kids.iter().rev() {
                stack.push(k);
            }
        }
    }
    order.extend(dangling);

    let mut slots: Vec<Option<FetchedReply>> = replies.into_iter().map(Some).collect();
    order
        .into_iter()
        .map(|i| slots[i].take().expect("each index is visited once"))
        .collect()
}
