//! Daily trading-hours window.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveTime, Timelike, Utc};

use super::SessionConfig;

/// Entries are only evaluated while the session is open. Minute resolution,
/// both ends inclusive, may wrap past midnight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingSession {
    start: NaiveTime,
    end: NaiveTime,
    offset: FixedOffset,
}

impl TradingSession {
    pub fn new(start: NaiveTime, end: NaiveTime, offset: FixedOffset) -> Self {
        Self { start, end, offset }
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let start = NaiveTime::parse_from_str(&config.start, "%H:%M")
            .with_context(|| format!("Invalid session start '{}'", config.start))?;
        let end = NaiveTime::parse_from_str(&config.end, "%H:%M")
            .with_context(|| format!("Invalid session end '{}'", config.end))?;
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60)
            .with_context(|| format!("Invalid UTC offset {} minutes", config.utc_offset_minutes))?;
        Ok(Self::new(start, end, offset))
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset).time();
        let t = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0).unwrap_or(local);

        if self.start <= self.end {
            t >= self.start && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }
}
