pub mod email;
pub mod noop;

pub use email::ResendMailer;
pub use noop::NoopSink;

use crowdecho_store::CommittedBucketing;

/// HTML summary of items the classifier just filed into buckets.
pub fn render_bucket_summary(bucketings: &[CommittedBucketing]) -> String {
    let mut html = String::from("<h2>New bucket matches</h2><ul>");
    for b in bucketings {
        html.push_str(&format!(
            "<li><strong>{}</strong> &rarr; {} (confidence {:.0}%)</li>",
            escape(&b.item_title),
            escape(&b.bucket_name),
            b.confidence * 100.0
        ));
    }
    html.push_str("</ul>");
    html
}

pub(crate) fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn bucket_summary_escapes_html() {
        let html = render_bucket_summary(&[CommittedBucketing {
            item_id: Uuid::new_v4(),
            item_title: "<script>alert(1)</script>".to_string(),
            bucket_name: "Launch & Feedback".to_string(),
            confidence: 0.75,
        }]);
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("Launch &amp; Feedback"));
        assert!(html.contains("75%"));
    }
}
