//! Crontab text parser.
//!
//! A table is parsed line by line; the first character decides the line
//! kind. Blank lines, lines starting with whitespace, and `#` comments
//! are inert. `@` starts a directive line, a digit or `*` starts a
//! five-field time line, and a letter starts a `NAME=value` environment
//! assignment. Anything else is a syntax error.
//!
//! Field and directive lines in the system table carry a user column
//! between the schedule and the command; per-user tables do not.

use std::collections::HashMap;

use lykron_core::{CronJob, Field, Timeset};

use crate::error::{Result, TabError};

/// Whether a table's entries carry an explicit user column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabKind {
    /// The system-wide table: `fields user command`.
    System,
    /// A per-user table: `fields command`; the user comes from the
    /// file name.
    User,
}

/// The outcome of parsing one table's text.
#[derive(Debug, Default)]
pub struct ParsedTab {
    pub env: HashMap<String, String>,
    pub jobs: Vec<CronJob>,
}

enum LineKind {
    Inert,
    Directive,
    Fields,
    Assign,
}

fn assess_line_kind(line: &str, lineno: usize) -> Result<LineKind> {
    match line.chars().next() {
        None => Ok(LineKind::Inert),
        Some(c) if c.is_whitespace() => Ok(LineKind::Inert),
        Some('#') => Ok(LineKind::Inert),
        Some('@') => Ok(LineKind::Directive),
        Some(c) if c.is_ascii_digit() || c == '*' => Ok(LineKind::Fields),
        Some(c) if c.is_ascii_alphabetic() => Ok(LineKind::Assign),
        Some(c) => Err(TabError::Syntax {
            line: lineno,
            msg: format!("unrecognized line start {c:?}"),
        }),
    }
}

/// Parse a whole table's text into environment assignments and jobs.
pub fn parse_source(src: &str, kind: TabKind) -> Result<ParsedTab> {
    let mut tab = ParsedTab::default();

    for (idx, raw) in src.lines().enumerate() {
        let lineno = idx + 1;
        match assess_line_kind(raw, lineno)? {
            LineKind::Inert => {}
            LineKind::Assign => {
                let (key, value) = parse_assign(raw, lineno)?;
                tab.env.insert(key, value);
            }
            LineKind::Directive => {
                let (name, rest) = split_word(raw);
                let (timeset, reboot) = directive_timeset(name, lineno)?;
                tab.jobs.push(finish_entry(timeset, reboot, rest, kind, lineno)?);
            }
            LineKind::Fields => {
                let (timeset, rest) = parse_fields(raw, lineno)?;
                tab.jobs.push(finish_entry(timeset, false, rest, kind, lineno)?);
            }
        }
    }

    Ok(tab)
}

/// Split the leading whitespace-delimited word off `s`.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(end) => (&s[..end], s[end..].trim_start()),
        None => (s, ""),
    }
}

/// Consume the optional user column and the command, producing the entry.
fn finish_entry(
    timeset: Timeset,
    reboot: bool,
    rest: &str,
    kind: TabKind,
    lineno: usize,
) -> Result<CronJob> {
    let (user, command) = match kind {
        TabKind::System => {
            let (user, command) = split_word(rest);
            if user.is_empty() {
                return Err(TabError::Syntax {
                    line: lineno,
                    msg: "missing user column".to_string(),
                });
            }
            (Some(user.to_string()), command)
        }
        TabKind::User => (None, rest.trim_start()),
    };

    if command.is_empty() {
        return Err(TabError::Syntax {
            line: lineno,
            msg: "missing command".to_string(),
        });
    }

    Ok(CronJob {
        timeset,
        command: command.trim_end().to_string(),
        user,
        reboot,
    })
}

const FIELD_ORDER: [Field; 5] = [
    Field::Minute,
    Field::Hour,
    Field::DayOfMonth,
    Field::Month,
    Field::DayOfWeek,
];

/// Parse the five schedule fields of a time line; returns the timeset
/// and the unparsed remainder (user column and/or command).
fn parse_fields(line: &str, lineno: usize) -> Result<(Timeset, &str)> {
    let mut ts = Timeset::new();
    let mut rest = line;
    for field in FIELD_ORDER {
        let (token, tail) = split_word(rest);
        if token.is_empty() {
            return Err(TabError::Syntax {
                line: lineno,
                msg: format!("missing {} field", field.name()),
            });
        }
        parse_field(&mut ts, field, token, lineno)?;
        rest = tail;
    }
    Ok((ts, rest))
}

/// One schedule field: a comma list of `*`, `*/step`, `N`, `N/step`,
/// `N-M`, or `N-M/step`.
fn parse_field(ts: &mut Timeset, field: Field, token: &str, lineno: usize) -> Result<()> {
    let at = |e: lykron_core::CoreError| TabError::Syntax {
        line: lineno,
        msg: e.to_string(),
    };

    for item in token.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(parse_num(step, field, lineno)?)),
            None => (item, None),
        };

        match (base, step) {
            ("*", None) => ts.glob(field),
            ("*", Some(step)) => ts.set_step(field, None, step).map_err(at)?,
            (base, step) => {
                if let Some((lo, hi)) = base.split_once('-') {
                    let lo = parse_num(lo, field, lineno)?;
                    let hi = parse_num(hi, field, lineno)?;
                    match step {
                        None => ts.set_range(field, lo, hi).map_err(at)?,
                        Some(0) => {
                            return Err(TabError::Syntax {
                                line: lineno,
                                msg: format!("zero step in {} field", field.name()),
                            })
                        }
                        Some(step) => {
                            if lo > hi {
                                return Err(TabError::Syntax {
                                    line: lineno,
                                    msg: format!("inverted range in {} field", field.name()),
                                });
                            }
                            let mut v = lo;
                            while v <= hi {
                                ts.set(field, v).map_err(at)?;
                                v += step;
                            }
                        }
                    }
                } else {
                    let n = parse_num(base, field, lineno)?;
                    match step {
                        None => ts.set(field, n).map_err(at)?,
                        Some(step) => ts.set_step(field, Some(n), step).map_err(at)?,
                    }
                }
            }
        }
    }
    Ok(())
}

fn parse_num(s: &str, field: Field, lineno: usize) -> Result<u32> {
    s.parse::<u32>().map_err(|_| TabError::Syntax {
        line: lineno,
        msg: format!("bad {} value {s:?}", field.name()),
    })
}

/// Expand an `@`-directive into its equivalent five-field timeset.
/// `@reboot` yields an empty timeset with the reboot flag set.
fn directive_timeset(name: &str, lineno: usize) -> Result<(Timeset, bool)> {
    let mut ts = Timeset::new();
    let at = |e: lykron_core::CoreError| TabError::Syntax {
        line: lineno,
        msg: e.to_string(),
    };

    // Globbed fields come first so the star flags are recorded before
    // any pinned value lands in the same mask.
    match name {
        "@reboot" => return Ok((ts, true)),
        "@hourly" => {
            for f in [Field::Hour, Field::DayOfMonth, Field::Month, Field::DayOfWeek] {
                ts.glob(f);
            }
            ts.set(Field::Minute, 0).map_err(at)?;
        }
        "@daily" | "@midnight" => {
            for f in [Field::DayOfMonth, Field::Month, Field::DayOfWeek] {
                ts.glob(f);
            }
            ts.set(Field::Minute, 0).map_err(at)?;
            ts.set(Field::Hour, 0).map_err(at)?;
        }
        "@weekly" => {
            for f in [Field::DayOfMonth, Field::Month] {
                ts.glob(f);
            }
            ts.set(Field::Minute, 0).map_err(at)?;
            ts.set(Field::Hour, 0).map_err(at)?;
            ts.set(Field::DayOfWeek, 0).map_err(at)?;
        }
        "@monthly" => {
            for f in [Field::Month, Field::DayOfWeek] {
                ts.glob(f);
            }
            ts.set(Field::Minute, 0).map_err(at)?;
            ts.set(Field::Hour, 0).map_err(at)?;
            ts.set(Field::DayOfMonth, 1).map_err(at)?;
        }
        "@yearly" | "@annually" => {
            ts.glob(Field::DayOfWeek);
            ts.set(Field::Minute, 0).map_err(at)?;
            ts.set(Field::Hour, 0).map_err(at)?;
            ts.set(Field::DayOfMonth, 1).map_err(at)?;
            ts.set(Field::Month, 1).map_err(at)?;
        }
        other => {
            return Err(TabError::Syntax {
                line: lineno,
                msg: format!("unknown directive {other:?}"),
            })
        }
    }

    Ok((ts, false))
}

/// `NAME=value`; surrounding single or double quotes on the value are
/// stripped, the rest is taken literally.
fn parse_assign(line: &str, lineno: usize) -> Result<(String, String)> {
    let Some((key, value)) = line.split_once('=') else {
        return Err(TabError::Syntax {
            line: lineno,
            msg: "expected NAME=value".to_string(),
        });
    };

    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(TabError::Syntax {
            line: lineno,
            msg: format!("bad assignment name {key:?}"),
        });
    }

    let mut value = value.trim();
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        value = &value[1..value.len() - 1];
    }

    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_job(src: &str, kind: TabKind) -> CronJob {
        let tab = parse_source(src, kind).unwrap();
        assert_eq!(tab.jobs.len(), 1);
        tab.jobs.into_iter().next().unwrap()
    }

    #[test]
    fn user_table_field_line() {
        let job = one_job("*/15 0 1 1 * echo happy new year\n", TabKind::User);
        assert_eq!(job.command, "echo happy new year");
        assert_eq!(job.user, None);
        assert!(!job.reboot);
        for m in [0, 15, 30, 45] {
            assert!(job.timeset.contains(Field::Minute, m));
        }
        assert!(!job.timeset.contains(Field::Minute, 5));
        assert!(job.timeset.contains(Field::Hour, 0));
        assert!(!job.timeset.contains(Field::Hour, 1));
        assert!(job.timeset.contains(Field::DayOfMonth, 1));
        assert!(job.timeset.contains(Field::Month, 1));
    }

    #[test]
    fn system_table_carries_a_user_column() {
        let job = one_job("0 3 * * * backup /usr/local/bin/backup --all\n", TabKind::System);
        assert_eq!(job.user.as_deref(), Some("backup"));
        assert_eq!(job.command, "/usr/local/bin/backup --all");
    }

    #[test]
    fn missing_user_column_is_rejected_in_system_table() {
        let err = parse_source("0 3 * * * run\n", TabKind::System).unwrap_err();
        // "run" is taken as the user and the command is then missing
        assert!(matches!(err, TabError::Syntax { line: 1, .. }));
    }

    #[test]
    fn comma_lists_ranges_and_stepped_ranges() {
        let job = one_job("0-10/2,30,45 9-17 * * 1-5 true\n", TabKind::User);
        for m in [0, 2, 4, 6, 8, 10, 30, 45] {
            assert!(job.timeset.contains(Field::Minute, m), "minute {m}");
        }
        for m in [1, 5, 12, 44, 46] {
            assert!(!job.timeset.contains(Field::Minute, m), "minute {m}");
        }
        assert!(job.timeset.contains(Field::Hour, 9));
        assert!(job.timeset.contains(Field::Hour, 17));
        assert!(!job.timeset.contains(Field::Hour, 18));
        assert!(job.timeset.contains(Field::DayOfWeek, 1));
        assert!(!job.timeset.contains(Field::DayOfWeek, 0));
    }

    #[test]
    fn stepped_value_runs_to_the_top_of_the_domain() {
        let job = one_job("5 10/4 * * * true\n", TabKind::User);
        for h in [10, 14, 18, 22] {
            assert!(job.timeset.contains(Field::Hour, h));
        }
        assert!(!job.timeset.contains(Field::Hour, 12));
        assert!(!job.timeset.contains(Field::Hour, 23));
    }

    #[test]
    fn directives_expand_to_their_field_equivalents() {
        let daily = one_job("@daily rotate-logs\n", TabKind::User);
        assert!(daily.timeset.contains(Field::Minute, 0));
        assert!(!daily.timeset.contains(Field::Minute, 1));
        assert!(daily.timeset.contains(Field::Hour, 0));
        assert!(daily.timeset.contains(Field::DayOfMonth, 15));
        assert!(daily.timeset.contains(Field::DayOfWeek, 3));

        let weekly = one_job("@weekly sync\n", TabKind::User);
        assert!(weekly.timeset.contains(Field::DayOfWeek, 0));
        assert!(!weekly.timeset.contains(Field::DayOfWeek, 1));

        let yearly = one_job("@yearly audit\n", TabKind::User);
        assert!(yearly.timeset.contains(Field::Month, 1));
        assert!(!yearly.timeset.contains(Field::Month, 2));
        assert!(yearly.timeset.contains(Field::DayOfMonth, 1));
    }

    #[test]
    fn reboot_directive_sets_the_flag() {
        let job = one_job("@reboot mount-scratch\n", TabKind::User);
        assert!(job.reboot);
        assert!(!job.timeset.contains(Field::Minute, 0));
    }

    #[test]
    fn unknown_directive_is_an_error() {
        let err = parse_source("@fortnightly true\n", TabKind::User).unwrap_err();
        assert!(matches!(err, TabError::Syntax { line: 1, .. }));
    }

    #[test]
    fn assignments_comments_and_blanks() {
        let src = "\
# mail nobody
MAILTO = \"ops@example.com\"
SHELL=/bin/bash

0 * * * * echo hi
";
        let tab = parse_source(src, TabKind::User).unwrap();
        assert_eq!(tab.env.get("MAILTO").map(String::as_str), Some("ops@example.com"));
        assert_eq!(tab.env.get("SHELL").map(String::as_str), Some("/bin/bash"));
        assert_eq!(tab.jobs.len(), 1);
    }

    #[test]
    fn leading_whitespace_makes_a_line_inert() {
        let tab = parse_source("  0 * * * * echo hi\n", TabKind::User).unwrap();
        assert!(tab.jobs.is_empty());
    }

    #[test]
    fn errors_carry_the_line_number() {
        let src = "0 * * * * ok\n61 * * * * broken\n";
        match parse_source(src, TabKind::User) {
            Err(TabError::Syntax { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn star_flags_follow_the_written_fields() {
        let starred = one_job("0 0 * * * true\n", TabKind::User);
        assert!(starred.timeset.dom_star());
        assert!(starred.timeset.dow_star());

        let pinned = one_job("0 0 13 * 5 true\n", TabKind::User);
        assert!(!pinned.timeset.dom_star());
        assert!(!pinned.timeset.dow_star());
    }
}
