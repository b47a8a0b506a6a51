use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::traits::NotifySink;

/// Sink for environments without a mail key: logs instead of delivering.
pub struct NoopSink;

#[async_trait]
impl NotifySink for NoopSink {
    async fn deliver(&self, recipients: &[String], subject: &str, _body_html: &str) -> Result<()> {
        info!(recipients = recipients.len(), subject, "Notification suppressed (noop sink)");
        Ok(())
    }
}
