//! Diary sexp evaluation: `(diary-anniversary 1 15 1990)`, `(diary-float 11 4 4)`,
//! `(diary-cyclic 14 1 1 2024)`, `(diary-block ...)`, `(diary-date ...)` and
//! `(org-class ...)`.
//!
//! Arguments are integers or `t`, which leaves the slot unconstrained.

use chrono::{Datelike, NaiveDate, TimeDelta};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1},
    combinator::{all_consuming, map_res, opt, recognize, value},
    error::VerboseError,
    sequence::pair,
    IResult,
};
use serde::{Deserialize, Serialize};

/// Longest window [`dates_in_range`] walks; longer windows are cut at this many days.
pub const MAX_RANGE_DAYS: i64 = 366 * 20;

/// Outcome of evaluating an expression on one date.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiaryMatch {
    pub matches: bool,
    /// Years since the origin date, for anniversaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub years: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DiaryMatch {
    fn no() -> Self {
        Self::default()
    }

    fn yes() -> Self {
        Self {
            matches: true,
            ..Self::default()
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            matches: false,
            years: None,
            description: Some(reason.into()),
        }
    }
}

/// A matching date produced by [`dates_in_range`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiaryOccurrence {
    pub date: NaiveDate,
    pub result: DiaryMatch,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiaryError {
    #[error("empty diary expression")]
    Empty,
    #[error("Unsupported diary function: {0}")]
    Unsupported(String),
    #[error("{function} expects {expected} arguments, got {got}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("invalid argument `{0}`")]
    BadArgument(String),
    #[error("{function} does not accept `t` for its {slot}")]
    Wildcard {
        function: &'static str,
        slot: &'static str,
    },
    #[error("invalid calendar date {year:04}-{month:02}-{day:02}")]
    InvalidDate { year: i64, month: i64, day: i64 },
    #[error("weekday {0} is outside 0-6")]
    Weekday(i64),
    #[error("{0} is out of range")]
    OutOfRange(i64),
    #[error("float occurrence must not be zero")]
    ZeroOccurrence,
    #[error("cycle length must be positive, got {0}")]
    Cycle(i64),
}

/// A parsed diary expression. Weekdays count from Sunday = 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiaryExpr {
    Anniversary {
        month: u32,
        day: u32,
        year: i64,
    },
    Float {
        month: Option<u32>,
        weekday: u32,
        n: i64,
        day: Option<u32>,
    },
    Cyclic {
        interval: i64,
        start: NaiveDate,
    },
    Block {
        start: NaiveDate,
        end: NaiveDate,
    },
    Date {
        month: Option<u32>,
        day: Option<u32>,
        year: Option<i64>,
    },
    Class {
        start: NaiveDate,
        end: NaiveDate,
        weekday: u32,
        skip_weeks: Vec<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arg {
    Int(i64),
    Any,
}

type ArgResult<'a> = IResult<&'a str, Arg, VerboseError<&'a str>>;

fn parse_arg(i: &str) -> ArgResult<'_> {
    alt((
        value(Arg::Any, tag("t")),
        map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
            s.parse::<i64>().map(Arg::Int)
        }),
    ))(i)
}

fn arg(token: &str) -> Result<Arg, DiaryError> {
    all_consuming(parse_arg)(token)
        .map(|(_, a)| a)
        .map_err(|_| DiaryError::BadArgument(token.to_string()))
}

/// Function name with any `diary-` prefix removed; `org-` forms keep a marker
/// because `org-anniversary` takes year first.
fn canonical_name(name: &str) -> (&str, bool) {
    if let Some(rest) = name.strip_prefix("diary-") {
        (rest, false)
    } else if let Some(rest) = name.strip_prefix("org-") {
        (rest, true)
    } else {
        (name, false)
    }
}

impl DiaryExpr {
    /// Parse `%%(name args...)`, `(name args...)` or `name args...`.
    pub fn parse(expression: &str) -> Result<Self, DiaryError> {
        let mut s = expression.trim();
        s = s.strip_prefix("%%").unwrap_or(s).trim();
        if let Some(inner) = s.strip_prefix('(').and_then(|x| x.strip_suffix(')')) {
            s = inner.trim();
        }
        // Quoted skip lists such as `'(3 8)` flatten into plain arguments.
        let flat: String = s
            .chars()
            .map(|c| if matches!(c, '(' | ')' | '\'') { ' ' } else { c })
            .collect();
        let mut tokens = flat.split_whitespace();
        let name = tokens.next().ok_or(DiaryError::Empty)?;
        let args = tokens.map(arg).collect::<Result<Vec<_>, _>>()?;
        let (function, org_order) = canonical_name(name);

        match function {
            "anniversary" => {
                let [a, b, c] = exact::<3>("anniversary", &args)?;
                let (year, month, day) = if org_order { (a, b, c) } else { (c, a, b) };
                let month = month_arg("anniversary", month)?;
                let day = day_arg("anniversary", day)?;
                let year = int("anniversary", "year", year)?;
                Ok(DiaryExpr::Anniversary { month, day, year })
            }
            "float" => {
                if !(3..=4).contains(&args.len()) {
                    return Err(DiaryError::Arity {
                        function: "float",
                        expected: "3 or 4",
                        got: args.len(),
                    });
                }
                let month = match args[0] {
                    Arg::Any => None,
                    m => Some(month_arg("float", m)?),
                };
                let weekday = weekday_arg("float", args[1])?;
                let n = int("float", "occurrence", args[2])?;
                if n == 0 {
                    return Err(DiaryError::ZeroOccurrence);
                }
                let day = match args.get(3) {
                    None | Some(Arg::Any) => None,
                    Some(d) => Some(day_arg("float", *d)?),
                };
                Ok(DiaryExpr::Float {
                    month,
                    weekday,
                    n,
                    day,
                })
            }
            "cyclic" => {
                let [n, m, d, y] = exact::<4>("cyclic", &args)?;
                let interval = int("cyclic", "interval", n)?;
                if interval <= 0 {
                    return Err(DiaryError::Cycle(interval));
                }
                let start = date_from(
                    int("cyclic", "year", y)?,
                    int("cyclic", "month", m)?,
                    int("cyclic", "day", d)?,
                )?;
                Ok(DiaryExpr::Cyclic { interval, start })
            }
            "block" => {
                let [m1, d1, y1, m2, d2, y2] = exact::<6>("block", &args)?;
                let start = date_from(
                    int("block", "year", y1)?,
                    int("block", "month", m1)?,
                    int("block", "day", d1)?,
                )?;
                let end = date_from(
                    int("block", "year", y2)?,
                    int("block", "month", m2)?,
                    int("block", "day", d2)?,
                )?;
                Ok(DiaryExpr::Block { start, end })
            }
            "date" => {
                let [m, d, y] = exact::<3>("date", &args)?;
                let month = match m {
                    Arg::Any => None,
                    m => Some(month_arg("date", m)?),
                };
                let day = match d {
                    Arg::Any => None,
                    d => Some(day_arg("date", d)?),
                };
                let year = match y {
                    Arg::Any => None,
                    Arg::Int(y) => Some(y),
                };
                Ok(DiaryExpr::Date { month, day, year })
            }
            "class" => {
                if args.len() < 7 {
                    return Err(DiaryError::Arity {
                        function: "class",
                        expected: "at least 7",
                        got: args.len(),
                    });
                }
                let start = date_from(
                    int("class", "year", args[0])?,
                    int("class", "month", args[1])?,
                    int("class", "day", args[2])?,
                )?;
                let end = date_from(
                    int("class", "year", args[3])?,
                    int("class", "month", args[4])?,
                    int("class", "day", args[5])?,
                )?;
                let weekday = weekday_arg("class", args[6])?;
                let skip_weeks = args[7..]
                    .iter()
                    .map(|a| int("class", "skipped week", *a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(DiaryExpr::Class {
                    start,
                    end,
                    weekday,
                    skip_weeks,
                })
            }
            other => Err(DiaryError::Unsupported(other.to_string())),
        }
    }

    /// Whether `date` belongs to the series.
    pub fn evaluate(&self, date: NaiveDate) -> DiaryMatch {
        match self {
            DiaryExpr::Anniversary { month, day, year } => {
                let (m, d) = if *month == 2 && *day == 29 && !is_leap(date.year()) {
                    (3, 1)
                } else {
                    (*month, *day)
                };
                if date.month() != m || date.day() != d {
                    return DiaryMatch::no();
                }
                let years = i64::from(date.year()) - year;
                let description = if years == 0 {
                    "Today".to_string()
                } else {
                    format!("{years} years ago")
                };
                DiaryMatch {
                    matches: true,
                    years: Some(years),
                    description: Some(description),
                }
            }
            DiaryExpr::Float {
                month,
                weekday,
                n,
                day,
            } => {
                if month.is_some_and(|m| m != date.month())
                    || date.weekday().num_days_from_sunday() != *weekday
                    || day.is_some_and(|d| d != date.day())
                {
                    return DiaryMatch::no();
                }
                let dom = i64::from(date.day());
                let hit = if *n > 0 {
                    (dom + 6) / 7 == *n
                } else {
                    let dim = i64::from(days_in_month(date.year(), date.month()));
                    (dim - dom) / 7 + 1 == -*n
                };
                if !hit {
                    return DiaryMatch::no();
                }
                DiaryMatch {
                    matches: true,
                    years: None,
                    description: Some(format!("{} {}", ordinal(*n), weekday_name(*weekday))),
                }
            }
            DiaryExpr::Cyclic { interval, start } => {
                let offset = (date - *start).num_days();
                if offset >= 0 && offset % interval == 0 {
                    DiaryMatch::yes()
                } else {
                    DiaryMatch::no()
                }
            }
            DiaryExpr::Block { start, end } => {
                if *start <= date && date <= *end {
                    DiaryMatch::yes()
                } else {
                    DiaryMatch::no()
                }
            }
            DiaryExpr::Date { month, day, year } => {
                let ok = month.is_none_or(|m| m == date.month())
                    && day.is_none_or(|d| d == date.day())
                    && year.is_none_or(|y| y == i64::from(date.year()));
                if ok { DiaryMatch::yes() } else { DiaryMatch::no() }
            }
            DiaryExpr::Class {
                start,
                end,
                weekday,
                skip_weeks,
            } => {
                if date < *start
                    || date > *end
                    || date.weekday().num_days_from_sunday() != *weekday
                {
                    return DiaryMatch::no();
                }
                let week = (date - *start).num_days() / 7 + 1;
                if skip_weeks.contains(&week) {
                    DiaryMatch::no()
                } else {
                    DiaryMatch::yes()
                }
            }
        }
    }
}

/// Evaluate `expression` on `date`. Expressions that do not parse never match;
/// the reason is carried in `description`.
pub fn evaluate(expression: &str, date: NaiveDate) -> DiaryMatch {
    match DiaryExpr::parse(expression) {
        Ok(expr) => expr.evaluate(date),
        Err(err) => {
            tracing::debug!(expression, error = %err, "diary expression rejected");
            DiaryMatch::rejected(err.to_string())
        }
    }
}

/// Every date in `[start, end]` on which `expression` matches.
pub fn dates_in_range(expression: &str, start: NaiveDate, end: NaiveDate) -> Vec<DiaryOccurrence> {
    let expr = match DiaryExpr::parse(expression) {
        Ok(expr) => expr,
        Err(err) => {
            tracing::debug!(expression, error = %err, "diary expression rejected");
            return vec![];
        }
    };
    let mut end = end;
    if (end - start).num_days() >= MAX_RANGE_DAYS {
        let clamped = start
            .checked_add_signed(TimeDelta::days(MAX_RANGE_DAYS - 1))
            .unwrap_or(end);
        tracing::warn!(%start, %end, %clamped, "diary range clamped");
        end = clamped;
    }
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter_map(|date| {
            let result = expr.evaluate(date);
            result.matches.then_some(DiaryOccurrence { date, result })
        })
        .collect()
}

fn exact<const N: usize>(function: &'static str, args: &[Arg]) -> Result<[Arg; N], DiaryError> {
    <[Arg; N]>::try_from(args).map_err(|_| DiaryError::Arity {
        function,
        expected: match N {
            3 => "3",
            4 => "4",
            6 => "6",
            _ => "more",
        },
        got: args.len(),
    })
}

fn int(function: &'static str, slot: &'static str, a: Arg) -> Result<i64, DiaryError> {
    match a {
        Arg::Int(v) => Ok(v),
        Arg::Any => Err(DiaryError::Wildcard { function, slot }),
    }
}

fn month_arg(function: &'static str, a: Arg) -> Result<u32, DiaryError> {
    let m = int(function, "month", a)?;
    u32::try_from(m)
        .ok()
        .filter(|m| (1..=12).contains(m))
        .ok_or(DiaryError::OutOfRange(m))
}

fn day_arg(function: &'static str, a: Arg) -> Result<u32, DiaryError> {
    let d = int(function, "day", a)?;
    u32::try_from(d)
        .ok()
        .filter(|d| (1..=31).contains(d))
        .ok_or(DiaryError::OutOfRange(d))
}

fn weekday_arg(function: &'static str, a: Arg) -> Result<u32, DiaryError> {
    let w = int(function, "weekday", a)?;
    u32::try_from(w)
        .ok()
        .filter(|w| *w <= 6)
        .ok_or(DiaryError::Weekday(w))
}

fn date_from(year: i64, month: i64, day: i64) -> Result<NaiveDate, DiaryError> {
    let invalid = DiaryError::InvalidDate { year, month, day };
    let (Ok(y), Ok(m), Ok(d)) = (i32::try_from(year), u32::try_from(month), u32::try_from(day))
    else {
        return Err(invalid);
    };
    NaiveDate::from_ymd_opt(y, m, d).ok_or(invalid)
}

fn is_leap(year: i32) -> bool {
    NaiveDate::from_ymd_opt(year, 2, 29).is_some()
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (y, m) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|first| first.pred_opt())
        .map_or(31, |last| last.day())
}

fn ordinal(n: i64) -> String {
    const WORDS: [&str; 5] = ["first", "second", "third", "fourth", "fifth"];
    if n > 0 {
        return usize::try_from(n - 1)
            .ok()
            .and_then(|i| WORDS.get(i))
            .map_or_else(|| format!("{n}{}", suffix(n)), |w| w.to_string());
    }
    let k = -n;
    if k == 1 {
        "last".to_string()
    } else {
        format!("{k}{}-to-last", suffix(k))
    }
}

fn suffix(n: i64) -> &'static str {
    match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}

fn weekday_name(w: u32) -> &'static str {
    match w {
        0 => "Sunday",
        1 => "Monday",
        2 => "Tuesday",
        3 => "Wednesday",
        4 => "Thursday",
        5 => "Friday",
        _ => "Saturday",
    }
}
