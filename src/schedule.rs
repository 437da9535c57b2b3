use std::time::Duration;

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, FixedOffset, NaiveTime, Offset, Utc, Weekday,
};

/// Weekly wall-clock anchor for refreshes.
///
/// The upstream archive is published weekly; the default (Wednesday 05:00,
/// UTC+8, plus one hour) trails that publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshAnchor {
    pub weekday: Weekday,
    pub hour: u32,
    pub utc_offset: FixedOffset,
    pub grace: Duration,
}

impl Default for RefreshAnchor {
    fn default() -> Self {
        Self {
            weekday: Weekday::Wed,
            hour: 5,
            utc_offset: FixedOffset::east_opt(8 * 3600).unwrap_or(Utc.fix()),
            grace: Duration::from_secs(60 * 60),
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Time from `now` until the next anchor instant strictly after `now`, plus
/// the anchor's grace period.
pub fn next_refresh_delay(now: DateTime<Utc>, anchor: &RefreshAnchor) -> Duration {
    let local = now.with_timezone(&anchor.utc_offset);
    let days_ahead = (anchor.weekday.num_days_from_monday() + 7
        - local.weekday().num_days_from_monday())
        % 7;
    let anchor_time = NaiveTime::from_hms_opt(anchor.hour.min(23), 0, 0).unwrap_or_default();

    let mut target_date = local.date_naive() + ChronoDuration::days(i64::from(days_ahead));
    let mut target = target_date.and_time(anchor_time);
    if target <= local.naive_local() {
        target_date += ChronoDuration::days(7);
        target = target_date.and_time(anchor_time);
    }

    let until_anchor = (target - local.naive_local())
        .to_std()
        .unwrap_or(Duration::ZERO);
    until_anchor + anchor.grace
}
