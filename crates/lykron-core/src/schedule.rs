//! Recurrence evaluation: turn a [`Timeset`] into "the next absolute time
//! this entry fires".
//!
//! The search steps minute by minute from the starting instant, bounded at
//! five years of lookahead. A `None` return means the masks can never
//! match again (empty timeset, or an impossible combination such as
//! Feb 30) and the caller should retire the job.

use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};

use crate::types::{Field, Timeset};

/// Five years of minutes, past this the combination is declared dead.
const MAX_SEARCH_MINUTES: i64 = 60 * 24 * 366 * 5;

/// Does `ts` match the wall-clock minute containing `t`?
///
/// Day matching follows crontab(5): when both day-of-month and day-of-week
/// are restricted the entry fires when *either* matches; when only one is
/// restricted that one must match.
pub fn matches(ts: &Timeset, t: DateTime<Utc>) -> bool {
    if !ts.contains(Field::Minute, t.minute())
        || !ts.contains(Field::Hour, t.hour())
        || !ts.contains(Field::Month, t.month())
    {
        return false;
    }

    let dom_ok = ts.contains(Field::DayOfMonth, t.day());
    let dow_ok = ts.contains(Field::DayOfWeek, t.weekday().num_days_from_sunday());
    match (ts.dom_star, ts.dow_star) {
        (true, true) => true,
        (true, false) => dow_ok,
        (false, true) => dom_ok,
        (false, false) => dom_ok || dow_ok,
    }
}

/// First whole minute at or after `after` that `ts` matches.
pub fn next_occurrence(ts: &Timeset, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut t = after.duration_trunc(Duration::minutes(1)).ok()?;
    if t < after {
        t += Duration::minutes(1);
    }

    for _ in 0..MAX_SEARCH_MINUTES {
        if matches(ts, t) {
            return Some(t);
        }
        t += Duration::minutes(1);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    /// `30 3 * * *`
    fn daily_0330() -> Timeset {
        let mut ts = Timeset::new();
        ts.set(Field::Minute, 30).unwrap();
        ts.set(Field::Hour, 3).unwrap();
        ts.glob(Field::DayOfMonth);
        ts.glob(Field::Month);
        ts.glob(Field::DayOfWeek);
        ts
    }

    #[test]
    fn daily_rule_advances_to_tomorrow() {
        let ts = daily_0330();
        let next = next_occurrence(&ts, at(2026, 3, 10, 4, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 11, 3, 30, 0));
    }

    #[test]
    fn daily_rule_same_day_when_still_ahead() {
        let ts = daily_0330();
        let next = next_occurrence(&ts, at(2026, 3, 10, 1, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 10, 3, 30, 0));
    }

    #[test]
    fn search_start_is_rounded_up_to_whole_minute() {
        let ts = daily_0330();
        // 03:30:01 has already passed the 03:30 minute boundary? No:
        // matching is per-minute, so 03:30:01 still falls inside a
        // matching minute and must NOT fire again today.
        let next = next_occurrence(&ts, at(2026, 3, 10, 3, 30, 1)).unwrap();
        assert_eq!(next, at(2026, 3, 11, 3, 30, 0));
    }

    #[test]
    fn weekday_only_rule_respects_weekday() {
        // `0 12 * * 1`, Mondays at noon. 2026-03-10 is a Tuesday.
        let mut ts = Timeset::new();
        ts.set(Field::Minute, 0).unwrap();
        ts.set(Field::Hour, 12).unwrap();
        ts.glob(Field::DayOfMonth);
        ts.glob(Field::Month);
        ts.set(Field::DayOfWeek, 1).unwrap();

        let next = next_occurrence(&ts, at(2026, 3, 10, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 16, 12, 0, 0));
        assert_eq!(next.weekday(), chrono::Weekday::Mon);
    }

    #[test]
    fn dom_and_dow_both_restricted_fires_on_either() {
        // `0 0 15 * 5`, the 15th, or any Friday.
        let mut ts = Timeset::new();
        ts.set(Field::Minute, 0).unwrap();
        ts.set(Field::Hour, 0).unwrap();
        ts.set(Field::DayOfMonth, 15).unwrap();
        ts.glob(Field::Month);
        ts.set(Field::DayOfWeek, 5).unwrap();

        // 2026-03-10 (Tue) → first hit is Friday the 13th, before the 15th.
        let next = next_occurrence(&ts, at(2026, 3, 10, 12, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 13, 0, 0, 0));

        let after_friday = next_occurrence(&ts, at(2026, 3, 13, 0, 30, 0)).unwrap();
        assert_eq!(after_friday, at(2026, 3, 15, 0, 0, 0));
    }

    #[test]
    fn empty_timeset_is_exhausted() {
        let ts = Timeset::new();
        assert!(next_occurrence(&ts, at(2026, 1, 1, 0, 0, 0)).is_none());
    }
}
