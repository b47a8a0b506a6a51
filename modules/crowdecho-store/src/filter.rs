use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use typed_builder::TypedBuilder;

use crowdecho_common::Sentiment;

use crate::rows::ContentItem;

/// Typed filter for content queries. Every field is optional; the query
/// builder emits only the clauses that are set, so callers never hand-roll
/// conditional WHERE fragments.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct ContentFilter {
    #[builder(default, setter(strip_option, into))]
    pub category: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub product: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub channel: Option<String>,
    /// Case-insensitive substring match over title and body.
    #[builder(default, setter(strip_option, into))]
    pub search: Option<String>,
    #[builder(default, setter(strip_option))]
    pub sentiment: Option<Sentiment>,
    #[builder(default, setter(strip_option))]
    pub posted_after: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub posted_before: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub needs_processing: Option<bool>,
    #[builder(default, setter(strip_option))]
    pub limit: Option<i64>,
}

impl ContentFilter {
    /// Append this filter's WHERE fragments to a query that already has a
    /// `WHERE tenant_kind = .. AND tenant_id = ..` prefix.
    pub(crate) fn push_clauses(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        if let Some(category) = &self.category {
            qb.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(product) = &self.product {
            qb.push(" AND product = ").push_bind(product.clone());
        }
        if let Some(channel) = &self.channel {
            qb.push(" AND channel = ").push_bind(channel.clone());
        }
        if let Some(search) = &self.search {
            let pattern = format!("%{}%", search);
            qb.push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR body ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(sentiment) = self.sentiment {
            qb.push(" AND sentiment = ").push_bind(sentiment.as_str());
        }
        if let Some(after) = self.posted_after {
            qb.push(" AND posted_at >= ").push_bind(after);
        }
        if let Some(before) = self.posted_before {
            qb.push(" AND posted_at < ").push_bind(before);
        }
        if let Some(needs) = self.needs_processing {
            qb.push(" AND needs_processing = ").push_bind(needs);
        }
    }

    /// In-memory equivalent of the SQL clauses, shared with the test store so
    /// both backends agree on filter semantics.
    pub fn matches(&self, item: &ContentItem) -> bool {
        if let Some(category) = &self.category {
            if item.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(product) = &self.product {
            if item.product.as_deref() != Some(product.as_str()) {
                return false;
            }
        }
        if let Some(channel) = &self.channel {
            if &item.channel != channel {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !item.title.to_lowercase().contains(&needle)
                && !item.body.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        if let Some(sentiment) = self.sentiment {
            if item.sentiment.as_deref() != Some(sentiment.as_str()) {
                return false;
            }
        }
        if let Some(after) = self.posted_after {
            if item.posted_at < after {
                return false;
            }
        }
        if let Some(before) = self.posted_before {
            if item.posted_at >= before {
                return false;
            }
        }
        if let Some(needs) = self.needs_processing {
            if item.needs_processing != needs {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn make_item() -> ContentItem {
        ContentItem {
            id: Uuid::new_v4(),
            tenant_kind: "user".into(),
            tenant_id: Uuid::new_v4(),
            external_id: "t3_x".into(),
            channel: "batteries".into(),
            author: "someone".into(),
            title: "Battery drains overnight".into(),
            body: "Since the update my unit loses 40% idle.".into(),
            permalink: "https://example.com/x".into(),
            posted_at: Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap(),
            score: 10,
            num_comments: 4,
            last_updated: Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap(),
            needs_processing: false,
            processing_priority: 0,
            category: Some("Battery".into()),
            product: Some("Widget".into()),
            sentiment_score: Some(1.0),
            sentiment: Some("Negative".into()),
            issue_count: 1,
            feature_request_count: 0,
            added_to_bucket_by_ai: false,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(ContentFilter::default().matches(&make_item()));
    }

    #[test]
    fn category_and_window_filters() {
        let item = make_item();
        let hit = ContentFilter::builder()
            .category("Battery")
            .posted_after(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap())
            .posted_before(Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap())
            .build();
        assert!(hit.matches(&item));

        let miss = ContentFilter::builder().category("Shipping").build();
        assert!(!miss.matches(&item));
    }

    #[test]
    fn search_is_case_insensitive_over_title_and_body() {
        let item = make_item();
        assert!(ContentFilter::builder().search("DRAINS").build().matches(&item));
        assert!(ContentFilter::builder().search("idle").build().matches(&item));
        assert!(!ContentFilter::builder().search("keyboard").build().matches(&item));
    }

    #[test]
    fn window_bound_is_half_open() {
        let item = make_item();
        let filter = ContentFilter::builder()
            .posted_before(item.posted_at)
            .build();
        assert!(!filter.matches(&item), "posted_before is exclusive");
    }
}
