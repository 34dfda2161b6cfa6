//! Cron expressions.
//!
//! Accepts the classic five fields (`minute hour day-of-month month
//! day-of-week`) or six with a leading seconds field. Each field takes `*`,
//! numbers, `a-b` ranges, `/step` and comma lists; months and weekdays also
//! take three-letter names. Weekday 7 is Sunday, like 0.
//!
//! When both day-of-month and day-of-week are restricted a day matches if
//! either does, as in Vixie cron.

use std::fmt;

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike};

use crate::error::{Error, Result};

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

// Give up looking for a match after this many years.
const SEARCH_YEARS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
}

impl Field {
    fn contains(&self, v: u32) -> bool {
        v < 64 && self.bits & (1u64 << v) != 0
    }
}

#[derive(Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    // Offset added to a name's index (jan => 1, sun => 0).
    name_base: u32,
}

const SECONDS: FieldSpec = FieldSpec {
    name: "second",
    min: 0,
    max: 59,
    names: &[],
    name_base: 0,
};
const MINUTES: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    name_base: 0,
};
const HOURS: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    name_base: 0,
};
const DAYS_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    name_base: 0,
};
const MONTHS: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: MONTH_NAMES,
    name_base: 1,
};
const DAYS_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: DAY_NAMES,
    name_base: 0,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    seconds: Field,
    minutes: Field,
    hours: Field,
    days_of_month: Field,
    months: Field,
    days_of_week: Field,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let source = expr.trim();
        if source.is_empty() {
            return Err(Error::config("cron expression is empty"));
        }
        let parts: Vec<&str> = source.split_whitespace().collect();
        let (sec, rest) = match parts.len() {
            5 => ("0", &parts[..]),
            6 => (parts[0], &parts[1..]),
            n => {
                return Err(Error::config(format!(
                    "cron expression '{source}' has {n} fields (expected 5, or 6 with seconds)"
                )));
            }
        };

        let field = |def: FieldSpec, raw: &str| {
            parse_field(def, raw)
                .map_err(|e| e.context(format!("cron expression '{source}'")))
        };

        let mut days_of_week = field(DAYS_OF_WEEK, rest[4])?;
        if days_of_week.contains(7) {
            days_of_week.bits = (days_of_week.bits & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: source.to_string(),
            seconds: field(SECONDS, sec)?,
            minutes: field(MINUTES, rest[0])?,
            hours: field(HOURS, rest[1])?,
            days_of_month: field(DAYS_OF_MONTH, rest[2])?,
            months: field(MONTHS, rest[3])?,
            days_of_week,
            dom_restricted: !rest[2].starts_with('*'),
            dow_restricted: !rest[4].starts_with('*'),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First matching instant strictly after `after`, or `None` if nothing
    /// matches within the search horizon.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let start = after.naive_local().with_nanosecond(0)? + TimeDelta::seconds(1);
        let limit = start + TimeDelta::days(366 * SEARCH_YEARS);

        let mut t = start;
        while t <= limit {
            if !self.months.contains(t.month()) {
                t = first_of_next_month(t)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + TimeDelta::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + TimeDelta::minutes(1);
                continue;
            }
            if !self.seconds.contains(t.second()) {
                t += TimeDelta::seconds(1);
                continue;
            }
            match tz.from_local_datetime(&t) {
                LocalResult::Single(dt) if dt > *after => return Some(dt),
                LocalResult::Ambiguous(early, late) => {
                    if early > *after {
                        return Some(early);
                    }
                    if late > *after {
                        return Some(late);
                    }
                }
                // Skipped by a DST jump, or not after `after`.
                _ => {}
            }
            t += TimeDelta::seconds(1);
        }
        None
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn first_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (y, m) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)?.and_hms_opt(0, 0, 0)
}

fn parse_field(def: FieldSpec, raw: &str) -> Result<Field> {
    let mut bits = 0u64;
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(Error::config(format!("empty item in {} field", def.name)));
        }
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s.parse().map_err(|_| {
                    Error::config(format!("invalid step '{s}' in {} field", def.name))
                })?;
                if step == 0 {
                    return Err(Error::config(format!("zero step in {} field", def.name)));
                }
                (r, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (def.min, def.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(def, a)?, parse_value(def, b)?)
        } else {
            let v = parse_value(def, range)?;
            // `5/15` means "from 5 to the end, every 15".
            (v, if step.is_some() { def.max } else { v })
        };
        if lo > hi {
            return Err(Error::config(format!(
                "range {lo}-{hi} is backwards in {} field",
                def.name
            )));
        }

        let step = step.unwrap_or(1);
        let mut v = lo;
        while v <= hi {
            bits |= 1u64 << v;
            v += step;
        }
    }
    Ok(Field { bits })
}

fn parse_value(def: FieldSpec, raw: &str) -> Result<u32> {
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    let v = if let Some(idx) = def.names.iter().position(|n| *n == lower) {
        idx as u32 + def.name_base
    } else {
        raw.parse::<u32>().map_err(|_| {
            Error::config(format!("invalid value '{raw}' in {} field", def.name))
        })?
    };
    if v < def.min || v > def.max {
        return Err(Error::config(format!(
            "value {v} out of range {}-{} in {} field",
            def.min, def.max, def.name
        )));
    }
    Ok(v)
}
