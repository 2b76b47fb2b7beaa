//! Timestamps: `<2024-01-20 Sat 10:00-11:00 +1w -2d>`, `[2024-01-20]`, and `<a>--<b>` ranges.

use super::PResult;
use crate::core::{
    Interval, Repeater, RepeaterKind, TimeUnit, Timestamp, TimestampEnd, Warning, WarningKind,
};
use chrono::{NaiveDate, NaiveTime};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, one_of, space0, space1},
    combinator::{map, map_res, opt, recognize},
    error::{VerboseError, VerboseErrorKind},
    sequence::{preceded, tuple},
};

/// One bracketed timestamp, optionally followed by `--` and a second one.
pub(crate) fn parse_timestamp(i: &str) -> PResult<'_, Timestamp> {
    let start = i;
    let (i, mut ts) = parse_point(i)?;
    if ts.end.is_none() {
        if let Ok((rest, end)) = preceded(tag("--"), parse_point)(i) {
            if end.active == ts.active {
                ts.end = Some(TimestampEnd {
                    date: Some(end.date),
                    time: end.time,
                });
                let raw = &start[..start.len() - rest.len()];
                ts.raw = Some(raw.to_string());
                return Ok((rest, ts));
            }
        }
    }
    ts.raw = Some(start[..start.len() - i.len()].to_string());
    Ok((i, ts))
}

/// Parse a timestamp that must span all of `s` (surrounding whitespace allowed).
pub fn parse_timestamp_str(s: &str) -> Option<Timestamp> {
    match parse_timestamp(s.trim()) {
        Ok(("", ts)) => Some(ts),
        _ => None,
    }
}

enum Part {
    DayName,
    Time(NaiveTime, Option<NaiveTime>),
    Repeater(Repeater),
    Warning(Warning),
}

fn parse_point(i: &str) -> PResult<'_, Timestamp> {
    let (i, open) = one_of("<[")(i)?;
    let active = open == '<';
    let close = if active { '>' } else { ']' };
    let (mut i, date) = parse_date(i)?;

    let mut ts = Timestamp::new(date);
    ts.active = active;
    loop {
        let (rest, _) = space0(i)?;
        if let Ok((rest, _)) = char::<_, VerboseError<&str>>(close)(rest) {
            return Ok((rest, ts));
        }
        let (rest, _) = space1(i)?;
        let (rest, part) = alt((
            map(parse_time_range, |(a, b)| Part::Time(a, b)),
            map(parse_repeater, Part::Repeater),
            map(parse_warning, Part::Warning),
            map(take_while1(|c: char| c.is_alphabetic() || c == '.'), |_| {
                Part::DayName
            }),
        ))(rest)?;
        match part {
            Part::DayName => {}
            Part::Time(from, to) => {
                ts.time = Some(from);
                if let Some(to) = to {
                    ts.end = Some(TimestampEnd {
                        date: None,
                        time: Some(to),
                    });
                }
            }
            Part::Repeater(r) => ts.repeater = Some(r),
            Part::Warning(w) => ts.warning = Some(w),
        }
        i = rest;
    }
}

pub(crate) fn parse_date(i: &str) -> PResult<'_, NaiveDate> {
    map_res(
        tuple((
            map_res(take_while_m_n(4, 4, char_is_digit), |s: &str| {
                s.parse::<i32>()
            }),
            char('-'),
            map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| {
                s.parse::<u32>()
            }),
            char('-'),
            map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| {
                s.parse::<u32>()
            }),
        )),
        |(y, _, m, _, d)| NaiveDate::from_ymd_opt(y, m, d).ok_or("invalid date"),
    )(i)
}

pub(crate) fn parse_time(i: &str) -> PResult<'_, NaiveTime> {
    map_res(
        tuple((
            map_res(take_while_m_n(1, 2, char_is_digit), |s: &str| {
                s.parse::<u32>()
            }),
            char(':'),
            map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| {
                s.parse::<u32>()
            }),
        )),
        |(h, _, m)| NaiveTime::from_hms_opt(h, m, 0).ok_or("invalid time"),
    )(i)
}

fn parse_time_range(i: &str) -> PResult<'_, (NaiveTime, Option<NaiveTime>)> {
    tuple((parse_time, opt(preceded(char('-'), parse_time))))(i)
}

fn parse_interval(i: &str) -> PResult<'_, Interval> {
    map(
        tuple((
            map_res(digit1, |s: &str| s.parse::<u32>()),
            map(one_of("hdwmy"), |c| {
                TimeUnit::from_symbol(c).unwrap_or(TimeUnit::Day)
            }),
        )),
        |(value, unit)| Interval { value, unit },
    )(i)
}

fn parse_repeater(i: &str) -> PResult<'_, Repeater> {
    map(
        tuple((
            alt((
                map(tag("++"), |_| RepeaterKind::CatchUp),
                map(tag(".+"), |_| RepeaterKind::Restart),
                map(tag("+"), |_| RepeaterKind::Cumulative),
            )),
            parse_interval,
        )),
        |(kind, interval)| Repeater { kind, interval },
    )(i)
}

fn parse_warning(i: &str) -> PResult<'_, Warning> {
    map(
        tuple((
            alt((
                map(tag("--"), |_| WarningKind::First),
                map(tag("-"), |_| WarningKind::All),
            )),
            parse_interval,
        )),
        |(kind, interval)| Warning { kind, interval },
    )(i)
}

/// `H:MM` clock durations such as `=> 1:30`, in minutes.
pub(crate) fn parse_duration(i: &str) -> PResult<'_, i64> {
    map(
        recognize(tuple((digit1, char(':'), digit1))),
        |s: &str| {
            let (h, m) = s.split_once(':').unwrap_or((s, "0"));
            h.parse::<i64>().unwrap_or(0) * 60 + m.parse::<i64>().unwrap_or(0)
        },
    )(i)
}

fn take_while_m_n<F>(m: usize, n: usize, cond: F) -> impl Fn(&str) -> PResult<'_, &str>
where
    F: Fn(char) -> bool + Copy,
{
    move |i: &str| {
        let (rest, out) = take_while(cond)(i)?;
        if out.len() < m || out.len() > n {
            Err(nom::Err::Error(VerboseError {
                errors: vec![(i, VerboseErrorKind::Context("m_n"))],
            }))
        } else {
            Ok((rest, out))
        }
    }
}

fn char_is_digit(c: char) -> bool {
    c.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn plain_active_date() {
        let ts = parse_timestamp_str("<2024-01-20 Sat>").unwrap();
        assert!(ts.active);
        assert_eq!(ts.date, d(2024, 1, 20));
        assert_eq!(ts.time, None);
        assert_eq!(ts.raw.as_deref(), Some("<2024-01-20 Sat>"));
    }

    #[test]
    fn inactive_with_time_range() {
        let ts = parse_timestamp_str("[2024-01-20 Sat 10:00-11:30]").unwrap();
        assert!(!ts.active);
        assert_eq!(ts.time, NaiveTime::from_hms_opt(10, 0, 0));
        let end = ts.end.unwrap();
        assert_eq!(end.date, None);
        assert_eq!(end.time, NaiveTime::from_hms_opt(11, 30, 0));
    }

    #[test]
    fn repeater_and_warning() {
        let ts = parse_timestamp_str("<2024-01-20 Sat 09:00 .+2w -3d>").unwrap();
        let rep = ts.repeater.unwrap();
        assert_eq!(rep.kind, RepeaterKind::Restart);
        assert_eq!(rep.interval.value, 2);
        assert_eq!(rep.interval.unit, TimeUnit::Week);
        let warn = ts.warning.unwrap();
        assert_eq!(warn.kind, WarningKind::All);
        assert_eq!(warn.interval.value, 3);
    }

    #[test]
    fn catch_up_and_first_only_warning() {
        let ts = parse_timestamp_str("<2024-01-20 ++1m --1d>").unwrap();
        assert_eq!(ts.repeater.unwrap().kind, RepeaterKind::CatchUp);
        assert_eq!(ts.warning.unwrap().kind, WarningKind::First);
    }

    #[test]
    fn date_range() {
        let ts = parse_timestamp_str("<2024-01-20 Sat>--<2024-01-22 Mon>").unwrap();
        assert_eq!(ts.end_date(), d(2024, 1, 22));
        assert!(ts.is_range());
    }

    #[test]
    fn mixed_activity_is_not_a_range() {
        let (rest, ts) = parse_timestamp("<2024-01-20>--[2024-01-22]").unwrap();
        assert!(!ts.is_range());
        assert_eq!(rest, "--[2024-01-22]");
    }

    #[test]
    fn rejects_impossible_dates_and_mismatched_brackets() {
        assert!(parse_timestamp_str("<2023-02-30>").is_none());
        assert!(parse_timestamp_str("<2024-01-20]").is_none());
        assert!(parse_timestamp_str("<2024-1-20>").is_none());
    }

    #[test]
    fn clock_duration() {
        assert_eq!(parse_duration("2:05").unwrap().1, 125);
    }
}
