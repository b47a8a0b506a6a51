use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::traits::NotifySink;

const RESEND_API_URL: &str = "https://api.resend.com";

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
}

/// Email delivery through the Resend HTTP API.
pub struct ResendMailer {
    api_key: String,
    from: String,
    client: reqwest::Client,
    base_url: String,
}

impl ResendMailer {
    pub fn new(api_key: &str, from: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            from: from.to_string(),
            client: reqwest::Client::new(),
            base_url: RESEND_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }
}

#[async_trait]
impl NotifySink for ResendMailer {
    async fn deliver(&self, recipients: &[String], subject: &str, body_html: &str) -> Result<()> {
        let request = SendRequest {
            from: &self.from,
            to: recipients,
            subject,
            html: body_html,
        };

        let resp = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Resend API error ({status}): {body}"));
        }

        info!(recipients = recipients.len(), subject, "Email delivered");
        Ok(())
    }
}
