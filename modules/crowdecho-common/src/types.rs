use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel category for content that is not classifiable or not relevant.
pub const NOISE_CATEGORY: &str = "Noise";

/// A tenant is exactly one of a user or an organization. The two identity
/// spaces never mix: a preferences row, channel, or job belongs to one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TenantRef {
    User(Uuid),
    Org(Uuid),
}

impl TenantRef {
    pub fn kind(&self) -> &'static str {
        match self {
            TenantRef::User(_) => "user",
            TenantRef::Org(_) => "org",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            TenantRef::User(id) | TenantRef::Org(id) => *id,
        }
    }

    /// Rebuild a tenant from its persisted (kind, id) pair.
    pub fn from_parts(kind: &str, id: Uuid) -> crate::Result<Self> {
        match kind {
            "user" => Ok(TenantRef::User(id)),
            "org" => Ok(TenantRef::Org(id)),
            other => Err(crate::CrowdechoError::Validation(format!(
                "unknown tenant kind: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for TenantRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Three-way sentiment bucket derived from the 0-5 numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    Negative,
    Neutral,
    Positive,
}

impl Sentiment {
    /// Map a 0-5 classifier score onto the categorical scale.
    /// Below 2 is negative, above 3 is positive, the middle band is neutral.
    pub fn from_score(score: f32) -> Self {
        if score < 2.0 {
            Sentiment::Negative
        } else if score > 3.0 {
            Sentiment::Positive
        } else {
            Sentiment::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Negative => "Negative",
            Sentiment::Neutral => "Neutral",
            Sentiment::Positive => "Positive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Negative" => Some(Sentiment::Negative),
            "Neutral" => Some(Sentiment::Neutral),
            "Positive" => Some(Sentiment::Positive),
            _ => None,
        }
    }
}

/// A metrics/alerting time window: a plain hour count or a named preset
/// resolved against calendar boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Hours(u32),
    Preset(WindowPreset),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPreset {
    LastDay,
    LastWeek,
    LastMonth,
    LastThreeMonths,
}

impl WindowPreset {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "last_day" => Some(WindowPreset::LastDay),
            "last_week" => Some(WindowPreset::LastWeek),
            "last_month" => Some(WindowPreset::LastMonth),
            "last_3_months" => Some(WindowPreset::LastThreeMonths),
            _ => None,
        }
    }
}

/// The resolved [from, to) ranges for the current and previous windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub current_from: DateTime<Utc>,
    pub current_to: DateTime<Utc>,
    pub previous_from: DateTime<Utc>,
    pub previous_to: DateTime<Utc>,
}

impl Window {
    /// Resolve the window to concrete bounds. Hour windows are rolling:
    /// current = [now-W, now], previous = [now-2W, now-W]. Presets snap the
    /// current window to the calendar boundary and use the equal-length
    /// calendar period before it as the previous window.
    pub fn resolve(&self, now: DateTime<Utc>) -> WindowBounds {
        match self {
            Window::Hours(h) => {
                let w = Duration::hours(*h as i64);
                WindowBounds {
                    current_from: now - w,
                    current_to: now,
                    previous_from: now - w - w,
                    previous_to: now - w,
                }
            }
            Window::Preset(preset) => {
                let (boundary, previous_from) = match preset {
                    WindowPreset::LastDay => {
                        let boundary = start_of_day(now);
                        (boundary, boundary - Duration::days(1))
                    }
                    WindowPreset::LastWeek => {
                        let days_from_monday = now.weekday().num_days_from_monday() as i64;
                        let boundary = start_of_day(now) - Duration::days(days_from_monday);
                        (boundary, boundary - Duration::days(7))
                    }
                    WindowPreset::LastMonth => {
                        let boundary = start_of_month(now.year(), now.month());
                        (boundary, months_back(boundary, 1))
                    }
                    WindowPreset::LastThreeMonths => {
                        let this_month = start_of_month(now.year(), now.month());
                        let boundary = months_back(this_month, 2);
                        (boundary, months_back(boundary, 3))
                    }
                };
                WindowBounds {
                    current_from: boundary,
                    current_to: now,
                    previous_from,
                    previous_to: boundary,
                }
            }
        }
    }
}

fn start_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
        .single()
        .unwrap_or(t)
}

fn start_of_month(year: i32, month: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first of month is always a valid timestamp")
}

fn months_back(first_of_month: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let mut year = first_of_month.year();
    let mut month = first_of_month.month() as i32 - months as i32;
    while month < 1 {
        month += 12;
        year -= 1;
    }
    start_of_month(year, month as u32)
}

/// A normalized post fetched from the content source, before persistence.
/// Missing author/metadata is defaulted here so one malformed item never
/// aborts a batch.
#[derive(Debug, Clone)]
pub struct FetchedPost {
    pub external_id: String,
    pub channel: String,
    pub author: String,
    pub title: String,
    pub body: String,
    pub permalink: String,
    pub posted_at: DateTime<Utc>,
    pub score: i64,
    pub num_comments: i64,
}

/// A normalized reply from a post's comment tree.
#[derive(Debug, Clone)]
pub struct FetchedReply {
    pub external_id: String,
    pub parent_external_id: Option<String>,
    pub author: String,
    pub body: String,
    pub posted_at: DateTime<Utc>,
    pub score: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_kinds_are_disjoint() {
        let id = Uuid::new_v4();
        assert_ne!(TenantRef::User(id), TenantRef::Org(id));
        assert_eq!(TenantRef::from_parts("user", id).unwrap(), TenantRef::User(id));
        assert_eq!(TenantRef::from_parts("org", id).unwrap(), TenantRef::Org(id));
        assert!(TenantRef::from_parts("group", id).is_err());
    }

    #[test]
    fn sentiment_score_bands() {
        assert_eq!(Sentiment::from_score(0.0), Sentiment::Negative);
        assert_eq!(Sentiment::from_score(1.9), Sentiment::Negative);
        assert_eq!(Sentiment::from_score(2.0), Sentiment::Neutral);
        assert_eq!(Sentiment::from_score(3.0), Sentiment::Neutral);
        assert_eq!(Sentiment::from_score(3.1), Sentiment::Positive);
        assert_eq!(Sentiment::from_score(5.0), Sentiment::Positive);
    }

    #[test]
    fn rolling_window_bounds() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let b = Window::Hours(24).resolve(now);
        assert_eq!(b.current_to, now);
        assert_eq!(b.current_from, now - Duration::hours(24));
        assert_eq!(b.previous_to, b.current_from);
        assert_eq!(b.previous_from, now - Duration::hours(48));
    }

    #[test]
    fn last_three_months_snaps_to_calendar() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let b = Window::Preset(WindowPreset::LastThreeMonths).resolve(now);
        assert_eq!(b.current_from, Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap());
        assert_eq!(b.previous_from, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(b.previous_to, b.current_from);
    }

    #[test]
    fn preset_previous_period_crosses_year_boundary() {
        let now = Utc.with_ymd_and_hms(2025, 2, 10, 8, 0, 0).unwrap();
        let b = Window::Preset(WindowPreset::LastMonth).resolve(now);
        assert_eq!(b.current_from, Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(b.previous_from, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());

        let now = Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap();
        let b = Window::Preset(WindowPreset::LastThreeMonths).resolve(now);
        assert_eq!(b.current_from, Utc.with_ymd_and_hms(2024, 11, 1, 0, 0, 0).unwrap());
        assert_eq!(b.previous_from, Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap());
    }
}
