use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Morning,
    Evening,
    Manual,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Morning => "morning",
            BatchKind::Evening => "evening",
            BatchKind::Manual => "manual",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "morning" => Ok(BatchKind::Morning),
            "evening" => Ok(BatchKind::Evening),
            "manual" => Ok(BatchKind::Manual),
            other => Err(format!("unknown batch kind: {other}")),
        }
    }
}

/// Idempotency key of one batch execution.
///
/// Scheduled runs are keyed by kind and local date (`morning:2026-10-18`), so
/// a second trigger on the same day reuses the label. Manual runs carry a
/// timestamp and are always distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchLabel {
    kind: BatchKind,
    key: String,
}

impl BatchLabel {
    pub fn scheduled(kind: BatchKind, date: NaiveDate) -> Self {
        Self {
            kind,
            key: format!("{}:{}", kind, date.format("%Y-%m-%d")),
        }
    }

    pub fn manual<Tz: TimeZone>(now: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self {
            kind: BatchKind::Manual,
            key: format!("manual:{}", now.format("%Y-%m-%dT%H:%M:%S")),
        }
    }

    /// Build a label for `kind` at `now`: dated for scheduled kinds,
    /// timestamped for manual.
    pub fn for_kind<Tz: TimeZone>(kind: BatchKind, now: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        match kind {
            BatchKind::Manual => Self::manual(now),
            _ => Self::scheduled(kind, now.date_naive()),
        }
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for BatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn scheduled_labels_are_stable_per_day() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let a = BatchLabel::scheduled(BatchKind::Morning, date);
        let b = BatchLabel::scheduled(BatchKind::Morning, date);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "morning:2026-10-18");
    }

    #[test]
    fn manual_labels_carry_a_timestamp() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 14, 3, 9).unwrap();
        let label = BatchLabel::for_kind(BatchKind::Manual, &now);
        assert_eq!(label.kind(), BatchKind::Manual);
        assert_eq!(label.as_str(), "manual:2026-10-18T14:03:09");
    }
}
