use std::fmt;

use crate::error::{CoreError, Result};

pub const NUM_MINS: usize = 60;
pub const NUM_HOURS: usize = 24;
pub const NUM_DOM: usize = 31;
pub const NUM_MONTHS: usize = 12;
pub const NUM_DOW: usize = 7;

/// Dense index of a job in the registry's job list.
///
/// Stable for the lifetime of one table generation; a reload produces a
/// fresh set of ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u32);

impl JobId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// One of the five crontab time fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Minute => "minute",
            Field::Hour => "hour",
            Field::DayOfMonth => "day-of-month",
            Field::Month => "month",
            Field::DayOfWeek => "day-of-week",
        }
    }

    /// Inclusive value range accepted in crontab syntax.
    pub fn domain(self) -> (u32, u32) {
        match self {
            Field::Minute => (0, 59),
            Field::Hour => (0, 23),
            Field::DayOfMonth => (1, 31),
            Field::Month => (1, 12),
            Field::DayOfWeek => (0, 6), // 0 = Sunday
        }
    }
}

/// The recurrence masks of one crontab entry: which minutes, hours, days
/// of month, months, and weekdays the entry is eligible to fire in.
///
/// `dom_star`/`dow_star` record whether the field was written as a bare
/// `*`, which matters for the day-matching rule (see
/// [`schedule`](crate::schedule)).
#[derive(Debug, Clone, Copy)]
pub struct Timeset {
    pub(crate) mins: [bool; NUM_MINS],
    pub(crate) hours: [bool; NUM_HOURS],
    pub(crate) dom: [bool; NUM_DOM],
    pub(crate) months: [bool; NUM_MONTHS],
    pub(crate) dow: [bool; NUM_DOW],
    pub(crate) dom_star: bool,
    pub(crate) dow_star: bool,
}

impl Default for Timeset {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeset {
    /// An empty timeset, matches nothing until fields are populated.
    pub fn new() -> Self {
        Self {
            mins: [false; NUM_MINS],
            hours: [false; NUM_HOURS],
            dom: [false; NUM_DOM],
            months: [false; NUM_MONTHS],
            dow: [false; NUM_DOW],
            dom_star: false,
            dow_star: false,
        }
    }

    fn mask_mut(&mut self, field: Field) -> &mut [bool] {
        match field {
            Field::Minute => &mut self.mins,
            Field::Hour => &mut self.hours,
            Field::DayOfMonth => &mut self.dom,
            Field::Month => &mut self.months,
            Field::DayOfWeek => &mut self.dow,
        }
    }

    fn mask(&self, field: Field) -> &[bool] {
        match field {
            Field::Minute => &self.mins,
            Field::Hour => &self.hours,
            Field::DayOfMonth => &self.dom,
            Field::Month => &self.months,
            Field::DayOfWeek => &self.dow,
        }
    }

    /// Index into the mask for a crontab-syntax value (1-based fields are
    /// shifted down).
    fn slot(field: Field, value: u32) -> usize {
        let (lo, _) = field.domain();
        (value - lo) as usize
    }

    fn check(field: Field, value: u32) -> Result<()> {
        let (lo, hi) = field.domain();
        if value < lo || value > hi {
            return Err(CoreError::FieldRange {
                field: field.name(),
                value,
            });
        }
        Ok(())
    }

    /// Mark a single value eligible.
    pub fn set(&mut self, field: Field, value: u32) -> Result<()> {
        Self::check(field, value)?;
        self.mask_mut(field)[Self::slot(field, value)] = true;
        Ok(())
    }

    /// Mark an inclusive range eligible.
    pub fn set_range(&mut self, field: Field, from: u32, to: u32) -> Result<()> {
        Self::check(field, from)?;
        Self::check(field, to)?;
        if from > to {
            return Err(CoreError::FieldRange {
                field: field.name(),
                value: from,
            });
        }
        for v in from..=to {
            self.mask_mut(field)[Self::slot(field, v)] = true;
        }
        Ok(())
    }

    /// Mark every `step`-th value from `start` to the top of the domain.
    /// `start = None` means the whole domain (`*/step`).
    pub fn set_step(&mut self, field: Field, start: Option<u32>, step: u32) -> Result<()> {
        if step == 0 {
            return Err(CoreError::FieldRange {
                field: field.name(),
                value: step,
            });
        }
        let (lo, hi) = field.domain();
        let start = start.unwrap_or(lo);
        Self::check(field, start)?;
        let mut v = start;
        while v <= hi {
            self.mask_mut(field)[Self::slot(field, v)] = true;
            v += step;
        }
        Ok(())
    }

    /// Mark the whole field eligible (`*`).
    pub fn glob(&mut self, field: Field) {
        for b in self.mask_mut(field).iter_mut() {
            *b = true;
        }
        match field {
            Field::DayOfMonth => self.dom_star = true,
            Field::DayOfWeek => self.dow_star = true,
            _ => {}
        }
    }

    /// Whether day-of-month was written as a bare `*`.
    pub fn dom_star(&self) -> bool {
        self.dom_star
    }

    /// Whether day-of-week was written as a bare `*`.
    pub fn dow_star(&self) -> bool {
        self.dow_star
    }

    pub fn contains(&self, field: Field, value: u32) -> bool {
        let (lo, hi) = field.domain();
        if value < lo || value > hi {
            return false;
        }
        self.mask(field)[Self::slot(field, value)]
    }
}

/// One parsed crontab entry.
#[derive(Debug, Clone)]
pub struct CronJob {
    pub timeset: Timeset,
    /// Shell command line, passed to `shell -c` verbatim.
    pub command: String,
    /// Account the job runs as. `None` means the daemon's own user.
    pub user: Option<String>,
    /// `@reboot` entry: fires once at daemon start and is never re-held.
    pub reboot: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_contains() {
        let mut ts = Timeset::new();
        ts.set(Field::Minute, 30).unwrap();
        assert!(ts.contains(Field::Minute, 30));
        assert!(!ts.contains(Field::Minute, 31));
    }

    #[test]
    fn one_based_fields_are_shifted() {
        let mut ts = Timeset::new();
        ts.set(Field::DayOfMonth, 1).unwrap();
        ts.set(Field::Month, 12).unwrap();
        assert!(ts.contains(Field::DayOfMonth, 1));
        assert!(ts.contains(Field::Month, 12));
        assert!(!ts.contains(Field::Month, 1));
    }

    #[test]
    fn range_and_step() {
        let mut ts = Timeset::new();
        ts.set_range(Field::Hour, 9, 17).unwrap();
        assert!(ts.contains(Field::Hour, 9));
        assert!(ts.contains(Field::Hour, 17));
        assert!(!ts.contains(Field::Hour, 18));

        let mut ts = Timeset::new();
        ts.set_step(Field::Minute, None, 15).unwrap();
        for m in [0, 15, 30, 45] {
            assert!(ts.contains(Field::Minute, m));
        }
        assert!(!ts.contains(Field::Minute, 20));
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut ts = Timeset::new();
        assert!(ts.set(Field::Minute, 60).is_err());
        assert!(ts.set(Field::DayOfMonth, 0).is_err());
        assert!(ts.set_step(Field::Hour, None, 0).is_err());
        assert!(ts.set_range(Field::Hour, 10, 5).is_err());
    }

    #[test]
    fn glob_marks_star_flags() {
        let mut ts = Timeset::new();
        ts.glob(Field::DayOfMonth);
        ts.glob(Field::Minute);
        assert!(ts.dom_star);
        assert!(!ts.dow_star);
        assert!(ts.contains(Field::DayOfMonth, 31));
    }
}
