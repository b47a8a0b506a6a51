pub mod error;
pub mod types;

pub use error::{ApifyError, Result};
pub use types::{RedditItem, RedditScraperInput, RedditSearchInput, RunData, StartUrl};

use serde::de::DeserializeOwned;
use serde::Serialize;
use types::ApiResponse;

const BASE_URL: &str = "https://api.apify.com/v2";

/// Actor ID for trudax/reddit-scraper-lite.
const REDDIT_SCRAPER: &str = "oAuCIx3ItNrs2okjQ";

pub struct ApifyClient {
    client: reqwest::Client,
    token: String,
}

impl ApifyClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
        }
    }

    /// Start an actor run. Returns immediately with run metadata.
    async fn start_run<I: Serialize>(&self, actor_id: &str, input: &I) -> Result<RunData> {
        let url = format!("{}/acts/{}/runs", BASE_URL, actor_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(input)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApifyError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let api_resp: ApiResponse<RunData> = resp.json().await?;
        Ok(api_resp.data)
    }

    /// Poll until a run completes. Uses `waitForFinish=60` for efficient long-polling.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RunData> {
        loop {
            let url = format!("{}/actor-runs/{}?waitForFinish=60", BASE_URL, run_id);
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(ApifyError::Api {
                    status: status.as_u16(),
                    message: body,
                });
            }

            let api_resp: ApiResponse<RunData> = resp.json().await?;
            match api_resp.data.status.as_str() {
                "SUCCEEDED" => return Ok(api_resp.data),
                "FAILED" | "ABORTED" | "TIMED-OUT" => {
                    return Err(ApifyError::RunFailed(api_resp.data.status));
                }
                _ => {
                    tracing::debug!(run_id, status = %api_resp.data.status, "Run still in progress");
                    continue;
                }
            }
        }
    }

    /// Fetch dataset items from a completed run.
    pub async fn get_dataset_items<T: DeserializeOwned>(&self, dataset_id: &str) -> Result<Vec<T>> {
        let url = format!("{}/datasets/{}/items?format=json", BASE_URL, dataset_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApifyError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let items: Vec<T> = resp.json().await?;
        Ok(items)
    }

    /// Run an actor end-to-end: start, poll, fetch results.
    async fn run_actor<I: Serialize, T: DeserializeOwned>(
        &self,
        actor_id: &str,
        input: &I,
    ) -> Result<Vec<T>> {
        let run = self.start_run(actor_id, input).await?;
        tracing::info!(run_id = %run.id, "Apify run started, polling for completion");

        let completed = self.wait_for_run(&run.id).await?;
        tracing::info!(
            run_id = %completed.id,
            dataset_id = %completed.default_dataset_id,
            "Run completed, fetching results"
        );

        self.get_dataset_items(&completed.default_dataset_id).await
    }

    /// Scrape the newest posts of a subreddit.
    pub async fn scrape_subreddit_posts(
        &self,
        subreddit: &str,
        limit: u32,
    ) -> Result<Vec<RedditItem>> {
        tracing::info!(subreddit, limit, "Starting subreddit scrape");

        let input = RedditScraperInput {
            start_urls: vec![StartUrl {
                url: format!("https://www.reddit.com/r/{}/new/", subreddit),
            }],
            max_items: limit,
            sort: "new".to_string(),
            include_comments: false,
        };

        let items: Vec<RedditItem> = self.run_actor(REDDIT_SCRAPER, &input).await?;
        tracing::info!(count = items.len(), "Fetched subreddit posts");
        Ok(items)
    }

    /// Search Reddit for posts matching a keyword query, restricted to a subreddit
    /// by prefixing the query with `subreddit:` syntax.
    pub async fn search_reddit_posts(
        &self,
        subreddit: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<RedditItem>> {
        tracing::info!(subreddit, query, limit, "Starting Reddit keyword search");

        let input = RedditSearchInput {
            searches: vec![format!("subreddit:{} {}", subreddit, query)],
            max_items: limit,
            sort: "new".to_string(),
            search_posts: true,
            search_comments: false,
        };

        let items: Vec<RedditItem> = self.run_actor(REDDIT_SCRAPER, &input).await?;
        tracing::info!(count = items.len(), "Fetched search results");
        Ok(items)
    }

    /// Scrape the full comment tree of a single post.
    pub async fn scrape_comment_tree(
        &self,
        post_url: &str,
        limit: u32,
    ) -> Result<Vec<RedditItem>> {
        tracing::info!(post_url, limit, "Starting comment tree scrape");

        let input = RedditScraperInput {
            start_urls: vec![StartUrl {
                url: post_url.to_string(),
            }],
            max_items: limit,
            sort: "new".to_string(),
            include_comments: true,
        };

        let items: Vec<RedditItem> = self.run_actor(REDDIT_SCRAPER, &input).await?;
        let comments = items.into_iter().filter(|i| i.is_comment()).collect::<Vec<_>>();
        tracing::info!(count = comments.len(), "Fetched comment tree");
        Ok(comments)
    }
}
