//! Half-life recency decay for the hybrid search path.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

pub const DEFAULT_HALF_LIFE_DAYS: f64 = 180.0;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Parse an EMR timestamp.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` (both
/// read as UTC) and a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Age in fractional days, clamped at 0 for timestamps in the future.
pub fn age_days(occurred_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - occurred_at).num_milliseconds() as f64 / MILLIS_PER_DAY).max(0.0)
}

/// `2^(-age / half_life)`, kept strictly positive.
pub fn half_life_decay(age_days: f64, half_life_days: f64) -> f64 {
    2f64.powf(-age_days / half_life_days).max(f64::MIN_POSITIVE)
}

/// Multiplicative recency boost in (0, 1] that halves every `half_life_days`.
#[derive(Debug, Clone, Copy)]
pub struct RecencyDecay {
    half_life_days: f64,
}

impl Default for RecencyDecay {
    fn default() -> Self {
        Self {
            half_life_days: DEFAULT_HALF_LIFE_DAYS,
        }
    }
}

impl RecencyDecay {
    pub fn new(half_life_days: f64) -> Self {
        if !(half_life_days.is_finite() && half_life_days > 0.0) {
            tracing::warn!(
                half_life_days,
                "Invalid recency half-life, using default of {} days",
                DEFAULT_HALF_LIFE_DAYS
            );
            return Self::default();
        }
        Self { half_life_days }
    }

    pub fn half_life_days(&self) -> f64 {
        self.half_life_days
    }

    pub fn decay(&self, occurred_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        half_life_decay(age_days(occurred_at, now), self.half_life_days)
    }

    /// Boost for a raw timestamp relative to `now`.
    ///
    /// An unparseable timestamp yields the neutral boost 1.0.
    pub fn boost_at(&self, occurred_at: &str, now: DateTime<Utc>) -> f64 {
        match parse_timestamp(occurred_at) {
            Some(ts) => self.decay(ts, now),
            None => {
                tracing::warn!(occurred_at, "Unparseable timestamp, recency boost set to 1.0");
                1.0
            }
        }
    }

    pub fn boost(&self, occurred_at: &str) -> f64 {
        self.boost_at(occurred_at, Utc::now())
    }
}
