use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde::Serialize;

use crate::error::{HuntError, HuntResult};
use crate::types::TimeWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeUnit { Days, Hours, Minutes, Seconds }

impl TimeUnit {
    pub fn parse(s: &str) -> Option<TimeUnit> {
        match s.to_ascii_uppercase().as_str() {
            "DAY" | "DAYS" => Some(TimeUnit::Days),
            "HOUR" | "HOURS" => Some(TimeUnit::Hours),
            "MINUTE" | "MINUTES" => Some(TimeUnit::Minutes),
            "SECOND" | "SECONDS" => Some(TimeUnit::Seconds),
            _ => None,
        }
    }

    fn seconds(&self) -> i64 {
        match self {
            TimeUnit::Days => 86_400,
            TimeUnit::Hours => 3_600,
            TimeUnit::Minutes => 60,
            TimeUnit::Seconds => 1,
        }
    }
}

/// Time range as written in a statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TimeSpec {
    Absolute(TimeWindow),
    /// `LAST n UNIT`, resolved against the execution time.
    Last { amount: i64, unit: TimeUnit },
}

impl TimeSpec {
    /// Resolve to a concrete window. Relative windows end at `now` rounded up to
    /// `granularity_secs` so repeated statements within one granule share a window.
    /// A relative window reaching past the representable time range is a semantic error.
    pub fn resolve(&self, now: DateTime<Utc>, granularity_secs: u64) -> HuntResult<TimeWindow> {
        match self {
            TimeSpec::Absolute(w) => Ok(*w),
            TimeSpec::Last { amount, unit } => {
                let g = i64::try_from(granularity_secs.max(1)).unwrap_or(i64::MAX);
                let ts = now.timestamp();
                let rounded = if ts % g == 0 && now.timestamp_subsec_nanos() == 0 { ts } else { (ts / g + 1) * g };
                let stop = Utc.timestamp_opt(rounded, 0).single().unwrap_or(now);
                let start = amount
                    .checked_mul(unit.seconds())
                    .and_then(TimeDelta::try_seconds)
                    .and_then(|span| stop.checked_sub_signed(span))
                    .ok_or_else(|| HuntError::semantic(format!("time window LAST {} {:?} is out of range", amount, unit)))?;
                Ok(TimeWindow { start, stop })
            }
        }
    }
}
