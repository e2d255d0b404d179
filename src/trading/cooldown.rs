//! Re-entry gating after a position closes.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::info;

/// Wait imposed after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    /// The trade opened and closed inside one candle
    Cooldown(Duration),
    /// The trade spanned candles; only a short settle pause
    Settle(Duration),
}

impl Pause {
    pub fn duration(&self) -> Duration {
        match self {
            Pause::Cooldown(d) | Pause::Settle(d) => *d,
        }
    }
}

/// Start of the candle bucket containing `at`.
pub fn candle_start(at: DateTime<Utc>, interval: ChronoDuration) -> DateTime<Utc> {
    let secs = interval.num_seconds();
    if secs <= 0 {
        return at;
    }
    let ts = at.timestamp();
    DateTime::from_timestamp(ts - ts.rem_euclid(secs), 0).unwrap_or(at)
}

#[derive(Debug, Clone)]
pub struct CooldownScheduler {
    cooldown: Duration,
    settle_pause: Duration,
    candle_interval: ChronoDuration,
    resume_at: Option<DateTime<Utc>>,
}

impl CooldownScheduler {
    pub fn new(cooldown: Duration, settle_pause: Duration, candle_interval: ChronoDuration) -> Self {
        Self {
            cooldown,
            settle_pause,
            candle_interval,
            resume_at: None,
        }
    }

    /// Record a close and return the pause before entries resume.
    pub fn on_close(&mut self, open_candle_time: DateTime<Utc>, closed_at: DateTime<Utc>) -> Pause {
        let open_bucket = candle_start(open_candle_time, self.candle_interval);
        let close_bucket = candle_start(closed_at, self.candle_interval);

        let pause = if open_bucket == close_bucket {
            Pause::Cooldown(self.cooldown)
        } else {
            Pause::Settle(self.settle_pause)
        };

        let wait = ChronoDuration::from_std(pause.duration()).unwrap_or_else(|_| ChronoDuration::zero());
        self.resume_at = Some(closed_at + wait);

        info!(
            pause = ?pause,
            open_candle = %open_bucket,
            close_candle = %close_bucket,
            "Re-entry paused"
        );
        pause
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.resume_at.map_or(true, |t| now >= t)
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        match self.resume_at {
            Some(t) if t > now => (t - now).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_scheduler() -> CooldownScheduler {
        CooldownScheduler::new(
            Duration::from_secs(900),
            Duration::from_secs(2),
            ChronoDuration::minutes(15),
        )
    }

    #[test]
    fn test_candle_start_floors_to_interval() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 22, 41).unwrap();
        let start = candle_start(at, ChronoDuration::minutes(15));
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap());
        assert_eq!(candle_start(start, ChronoDuration::minutes(15)), start);
    }

    #[test]
    fn test_same_candle_round_trip_gets_cooldown() {
        let mut sched = make_scheduler();
        let opened = Utc.with_ymd_and_hms(2024, 5, 1, 10, 16, 0).unwrap();
        let closed = Utc.with_ymd_and_hms(2024, 5, 1, 10, 29, 59).unwrap();

        assert_eq!(sched.on_close(opened, closed), Pause::Cooldown(Duration::from_secs(900)));
        assert!(!sched.is_ready(closed + ChronoDuration::minutes(10)));
        assert_eq!(
            sched.remaining(closed + ChronoDuration::minutes(10)),
            Duration::from_secs(300)
        );
        assert!(sched.is_ready(closed + ChronoDuration::minutes(15)));
    }

    #[test]
    fn test_cross_candle_close_only_settles() {
        let mut sched = make_scheduler();
        let opened = Utc.with_ymd_and_hms(2024, 5, 1, 10, 16, 0).unwrap();
        let closed = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap();

        assert_eq!(sched.on_close(opened, closed), Pause::Settle(Duration::from_secs(2)));
        assert!(sched.is_ready(closed + ChronoDuration::seconds(2)));
    }

    #[test]
    fn test_ready_before_any_close() {
        let sched = make_scheduler();
        assert!(sched.is_ready(Utc::now()));
        assert_eq!(sched.remaining(Utc::now()), Duration::ZERO);
    }
}
