//! Threshold alerting engine. Each tick walks a small state machine:
//! IDLE -> EVALUATING -> (NO_TRIGGER | TRIGGERED) -> IDLE. A breach of any
//! metric in any category fires one consolidated alert, debounced by the
//! tenant's cooldown window. A missed tick is dropped, never queued.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crowdecho_common::{TenantRef, Window, NOISE_CATEGORY};
use crowdecho_store::{ContentItem, NewNotification, PreferencesRow};

use crate::metrics::{group_by_category, window_filter, TopItem, TOP_ITEMS_PER_CATEGORY};
use crate::notify::escape;
use crate::traits::{FeedbackStore, NotifySink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Idle,
    Evaluating,
    NoTrigger,
    Triggered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    Disabled,
    NoRecipients,
    CooldownActive,
}

#[derive(Debug)]
pub enum AlertOutcome {
    Idle(IdleReason),
    NoTrigger,
    Triggered(AlertReport),
}

/// Which of the three independent triggers a category tripped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryBreach {
    pub volume: bool,
    pub sentiment: bool,
    pub comment_growth: bool,
}

impl CategoryBreach {
    pub fn any(&self) -> bool {
        self.volume || self.sentiment || self.comment_growth
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryAlertSummary {
    pub category: String,
    pub count: i64,
    pub previous_count: i64,
    pub total_comments: i64,
    pub breach: CategoryBreach,
    /// Current volume is at least `volume_multiplier` times the previous window's.
    pub trending: bool,
    pub top_items: Vec<TopItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertReport {
    pub tenant: TenantRef,
    pub evaluated_at: DateTime<Utc>,
    pub window_hours: i32,
    pub categories: Vec<CategoryAlertSummary>,
}

impl AlertReport {
    /// Union of items across every triggering category.
    pub fn content_item_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .categories
            .iter()
            .flat_map(|c| c.top_items.iter().map(|t| t.id))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Evaluate the three triggers for one category. Comment growth is ratio-based
/// against the previous window when that window had comments, absolute
/// otherwise (see DESIGN.md).
pub fn evaluate_category(
    count: i64,
    avg_sentiment: Option<f64>,
    current_comments: i64,
    previous_comments: i64,
    prefs: &PreferencesRow,
) -> CategoryBreach {
    let volume = count >= prefs.issue_threshold as i64;

    let sentiment = avg_sentiment
        .map(|avg| avg <= prefs.sentiment_threshold)
        .unwrap_or(false);

    let comment_growth = if previous_comments > 0 {
        current_comments as f64 / previous_comments as f64
            >= prefs.comment_growth_threshold as f64
    } else {
        current_comments >= prefs.comment_growth_threshold as i64
    };

    CategoryBreach {
        volume,
        sentiment,
        comment_growth,
    }
}

pub struct AlertingEngine {
    store: Arc<dyn FeedbackStore>,
    sink: Arc<dyn NotifySink>,
}

impl AlertingEngine {
    pub fn new(store: Arc<dyn FeedbackStore>, sink: Arc<dyn NotifySink>) -> Self {
        Self { store, sink }
    }

    pub async fn tick(&self, tenant: TenantRef, now: DateTime<Utc>) -> Result<AlertOutcome> {
        let Some(prefs) = self.store.preferences(tenant).await? else {
            return Ok(AlertOutcome::Idle(IdleReason::Disabled));
        };

        if !prefs.notifications_enabled {
            debug!(tenant = %tenant, "Notifications disabled, staying idle");
            return Ok(AlertOutcome::Idle(IdleReason::Disabled));
        }
        if prefs.recipients.is_empty() {
            info!(tenant = %tenant, "No recipients configured, staying idle");
            return Ok(AlertOutcome::Idle(IdleReason::NoRecipients));
        }

        if let Some(last) = prefs.last_notified {
            let elapsed = now - last;
            if elapsed < Duration::hours(prefs.window_hours as i64) {
                debug!(
                    tenant = %tenant,
                    elapsed_minutes = elapsed.num_minutes(),
                    "Cooldown not yet elapsed, staying idle"
                );
                return Ok(AlertOutcome::Idle(IdleReason::CooldownActive));
            }
        }

        debug!(tenant = %tenant, state = ?AlertState::Evaluating, "Evaluating thresholds");
        let bounds = Window::Hours(prefs.window_hours as u32).resolve(now);
        let current = self
            .store
            .query_items(tenant, &window_filter(bounds.current_from, bounds.current_to))
            .await?;
        let previous = self
            .store
            .query_items(tenant, &window_filter(bounds.previous_from, bounds.previous_to))
            .await?;

        let report = build_report(tenant, now, &prefs, &current, &previous);
        let Some(report) = report else {
            debug!(tenant = %tenant, state = ?AlertState::NoTrigger, "No threshold breached");
            return Ok(AlertOutcome::NoTrigger);
        };

        info!(
            tenant = %tenant,
            state = ?AlertState::Triggered,
            categories = report.categories.len(),
            "Thresholds breached, sending alert"
        );

        let subject = alert_subject(&report);
        let body = render_alert(&report);

        // Fire-and-forget: a delivery failure is logged, but the cooldown
        // still advances so a broken sink cannot cause an alert storm.
        if let Err(e) = self.sink.deliver(&prefs.recipients, &subject, &body).await {
            warn!(tenant = %tenant, error = %e, "Alert delivery failed");
        }

        self.store
            .record_notification(&NewNotification {
                tenant,
                categories: report.categories.iter().map(|c| c.category.clone()).collect(),
                content_item_ids: report.content_item_ids(),
                recipients: prefs.recipients.clone(),
                subject,
                sent_at: now,
            })
            .await?;

        Ok(AlertOutcome::Triggered(report))
    }
}

/// Group both windows by category and keep every category that breached a
/// threshold. Returns None when nothing breached.
fn build_report(
    tenant: TenantRef,
    now: DateTime<Utc>,
    prefs: &PreferencesRow,
    current: &[ContentItem],
    previous: &[ContentItem],
) -> Option<AlertReport> {
    let current_groups = group_by_category(current);
    let previous_groups = group_by_category(previous);

    let mut summaries = Vec::new();
    for (category, items) in &current_groups {
        if *category == NOISE_CATEGORY {
            continue;
        }

        let count = items.len() as i64;
        let scores: Vec<f64> = items.iter().filter_map(|i| i.sentiment_score).collect();
        let avg_sentiment = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        };
        let current_comments: i64 = items.iter().map(|i| i.num_comments).sum();
        let previous_items = previous_groups.get(category);
        let previous_comments: i64 = previous_items
            .map(|v| v.iter().map(|i| i.num_comments).sum())
            .unwrap_or(0);
        let previous_count = previous_items.map(|v| v.len() as i64).unwrap_or(0);

        let breach = evaluate_category(count, avg_sentiment, current_comments, previous_comments, prefs);
        if !breach.any() {
            continue;
        }

        let mut ranked: Vec<&&ContentItem> = items.iter().collect();
        ranked.sort_by_key(|i| std::cmp::Reverse(i.engagement()));

        summaries.push(CategoryAlertSummary {
            category: category.to_string(),
            count,
            previous_count,
            total_comments: current_comments,
            breach,
            trending: previous_count > 0
                && count as f64 >= previous_count as f64 * prefs.volume_multiplier,
            top_items: ranked
                .into_iter()
                .take(TOP_ITEMS_PER_CATEGORY)
                .map(|i| TopItem {
                    id: i.id,
                    title: i.title.clone(),
                    permalink: i.permalink.clone(),
                    engagement: i.engagement(),
                })
                .collect(),
        });
    }

    if summaries.is_empty() {
        return None;
    }
    summaries.sort_by(|a, b| b.count.cmp(&a.count).then(a.category.cmp(&b.category)));

    Some(AlertReport {
        tenant,
        evaluated_at: now,
        window_hours: prefs.window_hours,
        categories: summaries,
    })
}

fn alert_subject(report: &AlertReport) -> String {
    let names: Vec<&str> = report.categories.iter().map(|c| c.category.as_str()).collect();
    format!("Feedback alert: {} crossed your thresholds", names.join(", "))
}

fn render_alert(report: &AlertReport) -> String {
    let mut html = format!(
        "<h2>Feedback thresholds crossed in the last {} hours</h2>",
        report.window_hours
    );
    for c in &report.categories {
        html.push_str(&format!(
            "<h3>{}{}</h3><p>{} items ({} previously), {} comments</p><ul>",
            escape(&c.category),
            if c.trending { " &#x1F4C8;" } else { "" },
            c.count,
            c.previous_count,
            c.total_comments
        ));
        for item in &c.top_items {
            html.push_str(&format!(
                "<li><a href=\"{}\">{}</a> (engagement {})</li>",
                item.permalink,
                escape(&item.title),
                item.engagement
            ));
        }
        html.push_str("</ul>");
    }
    html
}
