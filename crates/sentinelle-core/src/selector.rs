use chrono::{DateTime, TimeDelta, Utc};

use crate::models::Source;

/// Interval bounds applied when deciding whether a source is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuePolicy {
    /// Used when a source has no interval of its own.
    pub default_interval: TimeDelta,
    /// Per-source intervals below this are raised to it.
    pub min_interval: TimeDelta,
}

impl Default for DuePolicy {
    fn default() -> Self {
        Self {
            default_interval: TimeDelta::hours(6),
            min_interval: TimeDelta::minutes(5),
        }
    }
}

impl DuePolicy {
    pub fn effective_interval(&self, source: &Source) -> TimeDelta {
        source
            .collection_interval
            .unwrap_or(self.default_interval)
            .max(self.min_interval)
    }

    /// A source is due when it is active and either was never collected or
    /// its interval has fully elapsed. Compared at millisecond precision.
    pub fn is_due(&self, source: &Source, now: DateTime<Utc>) -> bool {
        if !source.active {
            return false;
        }
        match source.last_collected_at {
            None => true,
            Some(last) => {
                let interval = self.effective_interval(source).num_milliseconds();
                now.timestamp_millis() >= last.timestamp_millis().saturating_add(interval)
            }
        }
    }
}

/// Filter `sources` down to the ones due at `now`, preserving order.
pub fn select_due<'a>(
    sources: &'a [Source],
    now: DateTime<Utc>,
    policy: &DuePolicy,
) -> Vec<&'a Source> {
    sources.iter().filter(|s| policy.is_due(s, now)).collect()
}
