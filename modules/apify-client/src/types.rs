use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A start URL entry as the Apify actor input schema expects it.
#[derive(Debug, Clone, Serialize)]
pub struct StartUrl {
    pub url: String,
}

/// Input for the trudax/reddit-scraper actor when scraping a subreddit
/// or the comment tree of a single post.
#[derive(Debug, Clone, Serialize)]
pub struct RedditScraperInput {
    #[serde(rename = "startUrls")]
    pub start_urls: Vec<StartUrl>,
    #[serde(rename = "maxItems")]
    pub max_items: u32,
    pub sort: String,
    #[serde(rename = "includeComments")]
    pub include_comments: bool,
}

/// Input for the trudax/reddit-scraper actor in keyword-search mode.
#[derive(Debug, Clone, Serialize)]
pub struct RedditSearchInput {
    pub searches: Vec<String>,
    #[serde(rename = "maxItems")]
    pub max_items: u32,
    pub sort: String,
    #[serde(rename = "searchPosts")]
    pub search_posts: bool,
    #[serde(rename = "searchComments")]
    pub search_comments: bool,
}

/// A single Reddit item from the Apify dataset. The actor emits posts and
/// comments in the same stream, discriminated by `dataType`.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditItem {
    pub id: Option<String>,
    #[serde(rename = "parsedId")]
    pub parsed_id: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(rename = "communityName")]
    pub community_name: Option<String>,
    #[serde(rename = "parentId")]
    pub parent_id: Option<String>,
    #[serde(rename = "postId")]
    pub post_id: Option<String>,
    pub username: Option<String>,
    #[serde(rename = "upVotes")]
    pub up_votes: Option<i64>,
    #[serde(rename = "numberOfComments")]
    pub number_of_comments: Option<i64>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
    /// "community", "post", or "comment". Used to split the mixed stream.
    #[serde(rename = "dataType")]
    pub data_type: Option<String>,
}

impl RedditItem {
    pub fn is_post(&self) -> bool {
        self.data_type.as_deref() == Some("post")
    }

    pub fn is_comment(&self) -> bool {
        self.data_type.as_deref() == Some("comment")
    }

    /// Parsed creation time, if the actor supplied one.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Apify actor run metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: String,
    #[serde(rename = "defaultDatasetId")]
    pub default_dataset_id: String,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finishedAt")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Envelope around every Apify API response body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_stream_discrimination() {
        let post: RedditItem = serde_json::from_str(
            r#"{"id":"t3_abc","dataType":"post","title":"hi","upVotes":3}"#,
        )
        .unwrap();
        assert!(post.is_post());
        assert!(!post.is_comment());

        let comment: RedditItem = serde_json::from_str(
            r#"{"id":"t1_def","dataType":"comment","parentId":"t3_abc","body":"reply"}"#,
        )
        .unwrap();
        assert!(comment.is_comment());
        assert_eq!(comment.parent_id.as_deref(), Some("t3_abc"));
    }

    #[test]
    fn created_at_parses_rfc3339() {
        let item: RedditItem = serde_json::from_str(
            r#"{"dataType":"post","createdAt":"2025-06-01T12:00:00+00:00"}"#,
        )
        .unwrap();
        let ts = item.created_at_utc().unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-06-01T12:00:00+00:00");
    }
}
