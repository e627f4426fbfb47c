//! Monotonic UTC timestamp formatting behind an injectable clock.

use chrono::{DateTime, SecondsFormat, Utc};

/// Source of "now" for everything the engine stamps into durable rows.
/// Injected so tests produce byte-stable tables and evidence archives.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Second-precision ISO-8601 with a `Z` suffix, e.g. `2026-08-01T12:00:00Z`.
    fn now_iso(&self) -> String {
        format_iso(self.now())
    }
}

pub fn format_iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UtcClock;

impl Clock for UtcClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test double pinned to a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    pub fn at(iso: &str) -> Self {
        Self(
            DateTime::parse_from_rfc3339(iso)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
        )
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_second_precision_zulu() {
        let clock = FixedClock::at("2026-08-01T12:34:56.789Z");
        assert_eq!(clock.now_iso(), "2026-08-01T12:34:56Z");
    }
}
