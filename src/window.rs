//! Time windows shared by article fan-out and digest generation

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A trailing window ending "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Today,
    Week,
}

impl TimeWindow {
    /// Resolve a window keyword. Unknown keywords fall back to a week.
    pub fn parse(keyword: &str) -> Self {
        match keyword.trim().to_ascii_lowercase().as_str() {
            "today" | "day" => TimeWindow::Today,
            "week" => TimeWindow::Week,
            other => {
                warn!("Unrecognized time range '{}', falling back to week", other);
                TimeWindow::Week
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Today => "today",
            TimeWindow::Week => "week",
        }
    }

    /// Human label used in digest titles
    pub fn label(&self) -> &'static str {
        match self {
            TimeWindow::Today => "Daily",
            TimeWindow::Week => "Weekly",
        }
    }

    pub fn span(&self) -> Duration {
        match self {
            TimeWindow::Today => Duration::hours(24),
            TimeWindow::Week => Duration::days(7),
        }
    }

    /// Inclusive `[start, end]` bounds relative to `now`
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - self.span(), now)
    }

    pub fn contains(&self, now: DateTime<Utc>, at: DateTime<Utc>) -> bool {
        let (start, end) = self.bounds(now);
        at >= start && at <= end
    }
}
