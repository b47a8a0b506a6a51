// Anthropic-backed Classifier. Sends one batch per request and asks for a
// JSON body matching the ClassificationResponse schema.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crowdecho_store::{BucketDef, CategoryDef, ContentItem};

use super::types::{ClassificationResponse, ItemVerdict};
use crate::traits::Classifier;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";

/// Truncate item bodies so a batch of long posts stays inside the context.
const MAX_BODY_CHARS: usize = 2000;

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

pub struct ClaudeClassifier {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl ClaudeClassifier {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
            base_url: ANTHROPIC_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn build_prompt(
        items: &[ContentItem],
        categories: &[CategoryDef],
        products: &[CategoryDef],
        buckets: &[BucketDef],
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str("Feedback categories:\n");
        for c in categories {
            prompt.push_str(&format!(
                "- {}{}\n",
                c.name,
                c.description.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
            ));
        }

        prompt.push_str("\nProduct categories:\n");
        for p in products {
            prompt.push_str(&format!(
                "- {}{}\n",
                p.name,
                p.description.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
            ));
        }

        if !buckets.is_empty() {
            prompt.push_str("\nBuckets (suggest membership with a confidence in [0,1]):\n");
            for b in buckets {
                prompt.push_str(&format!(
                    "- {}{}\n",
                    b.name,
                    b.description.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
                ));
            }
        }

        prompt.push_str("\nItems to classify:\n");
        for item in items {
            let body: String = item.body.chars().take(MAX_BODY_CHARS).collect();
            prompt.push_str(&format!(
                "\n[{}]\nTitle: {}\nBody: {}\n",
                item.external_id, item.title, body
            ));
        }

        let schema = schemars::schema_for!(ClassificationResponse);
        prompt.push_str(&format!(
            "\nRespond with JSON only, matching this schema exactly:\n{}\n",
            serde_json::to_string_pretty(&schema).expect("schema serializes")
        ));

        prompt
    }
}

#[async_trait]
impl Classifier for ClaudeClassifier {
    async fn classify(
        &self,
        items: &[ContentItem],
        categories: &[CategoryDef],
        products: &[CategoryDef],
        buckets: &[BucketDef],
    ) -> Result<Vec<ItemVerdict>> {
        let system = "You classify community feedback about a product. For each item, \
                      pick the best-matching feedback category and product category from \
                      the provided lists (use \"Noise\" when nothing fits), score sentiment \
                      from 0 (very negative) to 5 (very positive), count issues and feature \
                      requests mentioned, and suggest bucket memberships with confidence."
            .to_string();

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: 4096,
            system,
            messages: vec![Message {
                role: "user".to_string(),
                content: Self::build_prompt(items, categories, products, buckets),
            }],
        };

        debug!(model = %request.model, items = items.len(), "Classification request");

        let url = format!("{}/messages", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Claude API error ({}): {}", status, error_text));
        }

        let body: MessagesResponse = response.json().await?;
        let text = body
            .content
            .first()
            .map(|b| b.text.as_str())
            .ok_or_else(|| anyhow!("Claude response contained no content"))?;

        let parsed: ClassificationResponse = serde_json::from_str(strip_code_fences(text))
            .map_err(|e| anyhow!("Classifier returned malformed JSON: {e}"))?;
        Ok(parsed.items)
    }
}

/// The model occasionally wraps JSON in a markdown fence despite instructions.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }
}
