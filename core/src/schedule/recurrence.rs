//! Recurrence rules
//!
//! All firing times are computed in UTC from an explicit IANA timezone.
//! Local-time rules (daily at 09:00) track wall-clock across DST changes;
//! interval rules are pure UTC arithmetic and ignore DST.

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, LocalResult, NaiveDate, NaiveTime, TimeZone,
    Utc, Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VigilError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RecurrenceRule {
    /// Every day at a local wall-clock time
    Daily { at: NaiveTime },
    /// Every week on a weekday at a local wall-clock time
    Weekly { weekday: Weekday, at: NaiveTime },
    /// Every month on a day-of-month (clamped to month length)
    Monthly { day: u32, at: NaiveTime },
    /// Fixed UTC interval
    Interval { secs: u64 },
}

/// Day-of-month constraint applied on top of a monthly rule,
/// e.g. "first weekend after the 10th"
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "day", rename_all = "snake_case")]
pub enum AnchorDay {
    FirstWeekendAfter(u32),
    FirstWeekdayAfter(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recurrence {
    pub rule: RecurrenceRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<AnchorDay>,
}

impl Recurrence {
    pub fn daily(at: NaiveTime) -> Self {
        Self {
            rule: RecurrenceRule::Daily { at },
            anchor: None,
        }
    }

    pub fn interval_secs(secs: u64) -> Self {
        Self {
            rule: RecurrenceRule::Interval { secs },
            anchor: None,
        }
    }

    /// Next firing strictly after `after`
    pub fn next_fire(&self, after: DateTime<Utc>, tz: Tz) -> Result<DateTime<Utc>> {
        match &self.rule {
            RecurrenceRule::Interval { secs } => {
                if *secs == 0 {
                    return Err(VigilError::InvalidRecurrence {
                        reason: "zero interval".to_string(),
                    });
                }
                Ok(after + ChronoDuration::seconds(*secs as i64))
            }
            RecurrenceRule::Daily { at } => {
                let local_after = after.with_timezone(&tz);
                let mut date = local_after.date_naive();
                // Today's occurrence, or tomorrow if it already passed
                for _ in 0..3 {
                    let candidate = resolve_local(tz, date, *at)?;
                    if candidate > after {
                        return Ok(candidate);
                    }
                    date = next_day(date)?;
                }
                Err(no_occurrence())
            }
            RecurrenceRule::Weekly { weekday, at } => {
                let local_after = after.with_timezone(&tz);
                let mut date = local_after.date_naive();
                for _ in 0..9 {
                    if date.weekday() == *weekday {
                        let candidate = resolve_local(tz, date, *at)?;
                        if candidate > after {
                            return Ok(candidate);
                        }
                    }
                    date = next_day(date)?;
                }
                Err(no_occurrence())
            }
            RecurrenceRule::Monthly { day, at } => {
                if *day == 0 || *day > 31 {
                    return Err(VigilError::InvalidRecurrence {
                        reason: format!("day-of-month {} out of range", day),
                    });
                }
                let local_after = after.with_timezone(&tz);
                let mut year = local_after.year();
                let mut month = local_after.month();
                // This month's occurrence, or walk forward
                for _ in 0..14 {
                    if let Some(date) = self.monthly_date(year, month, *day) {
                        let candidate = resolve_local(tz, date, *at)?;
                        if candidate > after {
                            return Ok(candidate);
                        }
                    }
                    month += 1;
                    if month > 12 {
                        month = 1;
                        year += 1;
                    }
                }
                Err(no_occurrence())
            }
        }
    }

    /// Effective date for a monthly occurrence, honoring the anchor
    fn monthly_date(&self, year: i32, month: u32, day: u32) -> Option<NaiveDate> {
        let clamped = day.min(days_in_month(year, month));
        let base = NaiveDate::from_ymd_opt(year, month, clamped)?;
        match self.anchor {
            None => Some(base),
            Some(AnchorDay::FirstWeekendAfter(anchor)) => {
                first_matching_day(year, month, anchor, |wd| {
                    matches!(wd, Weekday::Sat | Weekday::Sun)
                })
            }
            Some(AnchorDay::FirstWeekdayAfter(anchor)) => {
                first_matching_day(year, month, anchor, |wd| {
                    !matches!(wd, Weekday::Sat | Weekday::Sun)
                })
            }
        }
    }
}

fn no_occurrence() -> VigilError {
    VigilError::InvalidRecurrence {
        reason: "no next occurrence found".to_string(),
    }
}

fn next_day(date: NaiveDate) -> Result<NaiveDate> {
    date.succ_opt().ok_or_else(|| VigilError::InvalidRecurrence {
        reason: "date overflow".to_string(),
    })
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// First day of the month with day >= anchor whose weekday matches
fn first_matching_day(
    year: i32,
    month: u32,
    anchor: u32,
    matches: impl Fn(Weekday) -> bool,
) -> Option<NaiveDate> {
    let last = days_in_month(year, month);
    for day in anchor.max(1)..=last {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        if matches(date.weekday()) {
            return Some(date);
        }
    }
    None
}

/// Resolve a local wall-clock time to UTC, handling DST gaps and folds.
///
/// Ambiguous times (fall back) take the earlier instant; nonexistent times
/// (spring forward) shift one hour later.
fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earlier, _later) => Ok(earlier.with_timezone(&Utc)),
        LocalResult::None => {
            let shifted = naive + ChronoDuration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                    Ok(dt.with_timezone(&Utc))
                }
                LocalResult::None => Err(VigilError::InvalidRecurrence {
                    reason: format!("unresolvable local time {} in {}", naive, tz),
                }),
            }
        }
    }
}
