//! Source fetcher: pulls new items from the content source for a tenant's
//! watched channels. Each channel fetch is isolated: a failure on one
//! channel logs and yields an empty result rather than aborting the run.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use apify_client::{ApifyClient, RedditItem};
use crowdecho_common::{FetchedPost, FetchedReply};
use crowdecho_store::WatchedChannel;

use crate::traits::ContentSource;

/// Fixed pause between channel fetches. The content source rate-limits us;
/// this is compliance, not incidental sleep.
pub const CHANNEL_FETCH_DELAY: Duration = Duration::from_secs(2);

/// Author string substituted when the source omits one.
const UNKNOWN_AUTHOR: &str = "[unknown]";

pub struct SourceFetcher<'a> {
    source: &'a dyn ContentSource,
    page_size: u32,
}

impl<'a> SourceFetcher<'a> {
    pub fn new(source: &'a dyn ContentSource, page_size: u32) -> Self {
        Self { source, page_size }
    }

    /// Fetch every watched channel in order. Keyword channels get a filtered
    /// search; plain channels get the newest items.
    pub async fn fetch_channels(
        &self,
        channels: &[WatchedChannel],
    ) -> Vec<(WatchedChannel, Vec<FetchedPost>)> {
        let mut results = Vec::with_capacity(channels.len());

        for (i, channel) in channels.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(CHANNEL_FETCH_DELAY).await;
            }

            let fetched = if channel.keywords.is_empty() {
                self.source.fetch_new(&channel.channel, self.page_size).await
            } else {
                let query = channel.keywords.join(" OR ");
                self.source.search(&channel.channel, &query, self.page_size).await
            };

            match fetched {
                Ok(posts) => {
                    info!(channel = %channel.channel, count = posts.len(), "Fetched channel");
                    results.push((channel.clone(), posts));
                }
                Err(e) => {
                    warn!(channel = %channel.channel, error = %e, "Channel fetch failed, continuing with empty result");
                    results.push((channel.clone(), Vec::new()));
                }
            }
        }

        results
    }
}

// ---------------------------------------------------------------------------
// Reddit-backed ContentSource
// ---------------------------------------------------------------------------

/// Production content source: Reddit via the Apify scraper actor.
pub struct RedditSource {
    client: ApifyClient,
}

impl RedditSource {
    pub fn new(apify_token: &str) -> Self {
        Self {
            client: ApifyClient::new(apify_token.to_string()),
        }
    }
}

#[async_trait]
impl ContentSource for RedditSource {
    async fn fetch_new(&self, channel: &str, limit: u32) -> Result<Vec<FetchedPost>> {
        let raw = self.client.scrape_subreddit_posts(channel, limit).await?;
        Ok(normalize_posts(raw, channel))
    }

    async fn search(&self, channel: &str, query: &str, limit: u32) -> Result<Vec<FetchedPost>> {
        let raw = self.client.search_reddit_posts(channel, query, limit).await?;
        Ok(normalize_posts(raw, channel))
    }

    async fn fetch_reply_tree(&self, permalink: &str) -> Result<Vec<FetchedReply>> {
        let raw = self.client.scrape_comment_tree(permalink, 500).await?;
        Ok(normalize_replies(raw))
    }
}

/// Convert raw scraper items into normalized posts. One malformed item never
/// aborts the batch: missing fields default, items with no id are dropped
/// with a warning.
fn normalize_posts(items: Vec<RedditItem>, channel: &str) -> Vec<FetchedPost> {
    items
        .into_iter()
        .filter(|i| i.is_post())
        .filter_map(|i| {
            let external_id = match i.id.clone().or_else(|| i.parsed_id.clone()) {
                Some(id) => id,
                None => {
                    warn!(channel, "Dropping post without an external id");
                    return None;
                }
            };
            let posted_at = i.created_at_utc().unwrap_or_else(Utc::now);
            Some(FetchedPost {
                external_id,
                channel: i.community_name.clone().unwrap_or_else(|| channel.to_string()),
                author: i.username.clone().unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
                title: i.title.clone().unwrap_or_default(),
                body: i.body.clone().unwrap_or_default(),
                permalink: i.url.clone().unwrap_or_default(),
                posted_at,
                score: i.up_votes.unwrap_or(0),
                num_comments: i.number_of_comments.unwrap_or(0),
            })
        })
        .collect()
}

fn normalize_replies(items: Vec<RedditItem>) -> Vec<FetchedReply> {
    items
        .into_iter()
        .filter(|i| i.is_comment())
        .filter_map(|i| {
            let external_id = match i.id.clone().or_else(|| i.parsed_id.clone()) {
                Some(id) => id,
                None => {
                    warn!("Dropping comment without an external id");
                    return None;
                }
            };
            // A comment whose parent is the post itself is a top-level reply.
            let parent_external_id = match (&i.parent_id, &i.post_id) {
                (Some(parent), Some(post)) if parent == post => None,
                (Some(parent), _) => Some(parent.clone()),
                (None, _) => None,
            };
            let posted_at = i.created_at_utc().unwrap_or_else(Utc::now);
            Some(FetchedReply {
                external_id,
                parent_external_id,
                author: i.username.clone().unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
                body: i.body.clone().unwrap_or_default(),
                posted_at,
                score: i.up_votes.unwrap_or(0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_post(id: &str) -> RedditItem {
        serde_json::from_str(&format!(
            r#"{{"id":"{id}","dataType":"post","title":"t","url":"https://r/x"}}"#
        ))
        .unwrap()
    }

    #[test]
    fn missing_author_gets_default() {
        let posts = normalize_posts(vec![raw_post("t3_a")], "widgets");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].author, UNKNOWN_AUTHOR);
        assert_eq!(posts[0].channel, "widgets");
    }

    #[test]
    fn post_without_id_is_dropped_not_fatal() {
        let no_id: RedditItem =
            serde_json::from_str(r#"{"dataType":"post","title":"t"}"#).unwrap();
        let posts = normalize_posts(vec![no_id, raw_post("t3_b")], "widgets");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].external_id, "t3_b");
    }

    #[test]
    fn top_level_comment_has_no_parent() {
        let top: RedditItem = serde_json::from_str(
            r#"{"id":"t1_a","dataType":"comment","parentId":"t3_p","postId":"t3_p"}"#,
        )
        .unwrap();
        let nested: RedditItem = serde_json::from_str(
            r#"{"id":"t1_b","dataType":"comment","parentId":"t1_a","postId":"t3_p"}"#,
        )
        .unwrap();
        let replies = normalize_replies(vec![top, nested]);
        assert_eq!(replies[0].parent_external_id, None);
        assert_eq!(replies[1].parent_external_id.as_deref(), Some("t1_a"));
    }
}
