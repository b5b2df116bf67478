//! Type taxonomy and per-column rank counters.
//!
//! A candidate string is tried against an ordered taxonomy, strictest first;
//! the first parse that succeeds wins the row's contribution. Each column
//! keeps a rank counter (one slot per type, kept sorted by count with an
//! insertion sort) so frequent types are tried first on later rows. All
//! date/time parsing is by hand, never through a locale.

use crate::page::PageType;

/// Trial order: strictest first. `String` always succeeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    None,
    Bool,
    DateTime,
    DateTimeUs,
    Date,
    DateUs,
    Time,
    Int,
    Float,
    String,
}

/// The taxonomy in trial precedence order.
pub const TAXONOMY: [DataType; 10] = [
    DataType::None,
    DataType::Bool,
    DataType::DateTime,
    DataType::DateTimeUs,
    DataType::Date,
    DataType::DateUs,
    DataType::Time,
    DataType::Int,
    DataType::Float,
    DataType::String,
];

/// Strings mapped to the None object in object pages.
pub const NULL_SET: [&str; 7] = ["", "null", "Null", "NULL", "#N/A", "#n/a", "None"];

pub fn is_null(s: &str) -> bool {
    NULL_SET.contains(&s)
}

/// A calendar date (proleptic Gregorian), year 1–9999.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

/// A UTC offset as total microseconds east of UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TzOffset {
    pub total_micros: i64,
}

impl TzOffset {
    /// Normalized `(days, seconds, microseconds)` as the reference
    /// `timedelta` stores them: `0 <= seconds < 86_400`, `0 <= micros < 1e6`.
    pub fn as_timedelta(&self) -> (i32, i32, i32) {
        const DAY_US: i64 = 86_400_000_000;
        let days = self.total_micros.div_euclid(DAY_US);
        let rem = self.total_micros.rem_euclid(DAY_US);
        (days as i32, (rem / 1_000_000) as i32, (rem % 1_000_000) as i32)
    }
}

/// A wall-clock time with optional UTC offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
    pub offset: Option<TzOffset>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DateTime {
    pub date: Date,
    pub time: Time,
}

/// A parsed scalar, borrowed from the candidate string where possible.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value<'a> {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(&'a str),
    Date(Date),
    Time(Time),
    DateTime(DateTime),
}

/// Attempt to parse `s` as `dt`. `DataType::String` always succeeds.
pub fn parse_as(dt: DataType, s: &str) -> Option<Value<'_>> {
    match dt {
        DataType::None => is_null(s).then_some(Value::None),
        DataType::Bool => parse_bool(s).map(Value::Bool),
        DataType::Int => parse_int(s).map(Value::Int),
        DataType::Float => parse_float(s).map(Value::Float),
        DataType::Date => parse_date(s, false).map(Value::Date),
        DataType::DateUs => parse_date(s, true).map(Value::Date),
        DataType::Time => parse_time(s).map(Value::Time),
        DataType::DateTime => parse_datetime(s, false).map(Value::DateTime),
        DataType::DateTimeUs => parse_datetime(s, true).map(Value::DateTime),
        DataType::String => Some(Value::Str(s)),
    }
}

pub fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Signed 64-bit integer: optional sign, ASCII digits, nothing else.
pub fn parse_int(s: &str) -> Option<i64> {
    s.parse::<i64>().ok()
}

/// Decimal or scientific notation. Integer strings also succeed. Rejects
/// `inf`/`nan` spellings, which must stay strings.
pub fn parse_float(s: &str) -> Option<f64> {
    if s.is_empty() || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'+' | b'-' | b'.' | b'e' | b'E')) {
        return None;
    }
    if !s.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<f64>().ok()
}

fn is_leap(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn digits(s: &str, min: usize, max: usize) -> Option<u32> {
    if s.len() < min || s.len() > max || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u32>().ok()
}

fn ymd(y: &str, m: &str, d: &str) -> Option<Date> {
    let year = digits(y, 4, 4)?;
    let month = digits(m, 1, 2)?;
    let day = digits(d, 1, 2)?;
    if year == 0 || !(1..=12).contains(&month) {
        return None;
    }
    if day == 0 || day > u32::from(days_in_month(year as u16, month as u8)) {
        return None;
    }
    Some(Date {
        year: year as u16,
        month: month as u8,
        day: day as u8,
    })
}

fn split3(s: &str, sep: char) -> Option<(&str, &str, &str)> {
    let mut parts = s.split(sep);
    let a = parts.next()?;
    let b = parts.next()?;
    let c = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((a, b, c))
}

fn date_with_sep(s: &str, sep: char, us: bool) -> Option<Date> {
    let (a, b, c) = split3(s, sep)?;
    if us {
        // month-day-year
        ymd(c, a, b)
    } else {
        // year-month-day, then day-month-year
        ymd(a, b, c).or_else(|| ymd(c, b, a))
    }
}

/// Closed format list: `-`, `/` and space separated year-month-day and
/// day-month-year (month-day-year when `us`), plus the dotted variants,
/// which normalize `.` to `-` before matching. First success wins.
pub fn parse_date(s: &str, us: bool) -> Option<Date> {
    for sep in ['-', '/', ' '] {
        if let Some(date) = date_with_sep(s, sep, us) {
            return Some(date);
        }
    }
    if s.contains('.') && !s.contains('-') {
        let dashed = s.replace('.', "-");
        return date_with_sep(&dashed, '-', us);
    }
    None
}

/// `HH:MM[:SS[.ffffff]]`; fractions of 1–6 digits are right-padded to
/// microseconds. Minutes are mandatory so bare integers stay integers.
fn hms(s: &str) -> Option<(u8, u8, u8, u32)> {
    let mut parts = s.split(':');
    let hour = digits(parts.next()?, 1, 2)?;
    let minute = digits(parts.next()?, 1, 2)?;
    let (second, micro) = match parts.next() {
        None => (0, 0),
        Some(sec) => match sec.split_once('.') {
            None => (digits(sec, 1, 2)?, 0),
            Some((whole, frac)) => {
                if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let padded = frac.parse::<u32>().ok()? * 10u32.pow(6 - frac.len() as u32);
                (digits(whole, 1, 2)?, padded)
            }
        },
    };
    if parts.next().is_some() || hour > 23 || minute > 59 || second > 59 {
        return None;
    }
    Some((hour as u8, minute as u8, second as u8, micro))
}

fn parse_offset(s: &str) -> Option<TzOffset> {
    let sign = match s.as_bytes().first()? {
        b'+' => 1i64,
        b'-' => -1i64,
        _ => return None,
    };
    let (hour, minute, second, micro) = hms(&s[1..])?;
    let seconds = i64::from(hour) * 3600 + i64::from(minute) * 60 + i64::from(second);
    Some(TzOffset {
        total_micros: sign * (seconds * 1_000_000 + i64::from(micro)),
    })
}

/// `HH:MM[:SS[.ffffff]][±HH:MM[:SS[.ffffff]]]`, hand-parsed.
pub fn parse_time(s: &str) -> Option<Time> {
    let tz_at = s
        .bytes()
        .enumerate()
        .position(|(i, b)| i > 0 && (b == b'+' || b == b'-'));
    let (main, tz) = match tz_at {
        Some(i) => (&s[..i], Some(&s[i..])),
        None => (s, None),
    };
    let (hour, minute, second, microsecond) = hms(main)?;
    let offset = match tz {
        Some(t) => Some(parse_offset(t)?),
        None => None,
    };
    Some(Time {
        hour,
        minute,
        second,
        microsecond,
        offset,
    })
}

/// DATE + separator + TIME. The separator is `T` or a space; with
/// space-separated date formats every split point is tried.
pub fn parse_datetime(s: &str, us: bool) -> Option<DateTime> {
    if let Some((d, t)) = s.split_once('T') {
        let date = parse_date(d, us)?;
        let time = parse_time(t)?;
        return Some(DateTime { date, time });
    }
    for (i, _) in s.match_indices(' ') {
        if let (Some(date), Some(time)) = (parse_date(&s[..i], us), parse_time(&s[i + 1..])) {
            return Some(DateTime { date, time });
        }
    }
    None
}

/// Per-column rank counter: one slot per taxonomy type, kept sorted by
/// descending count so the likeliest parse is tried first.
#[derive(Clone, Debug)]
pub struct Ranks {
    entries: [(DataType, u32); 10],
}

impl Default for Ranks {
    fn default() -> Self {
        Self::new()
    }
}

impl Ranks {
    pub fn new() -> Self {
        Self {
            entries: TAXONOMY.map(|dt| (dt, 0)),
        }
    }

    /// Ordered view, for pass-2 dispatch and diagnostics.
    pub fn entries(&self) -> &[(DataType, u32); 10] {
        &self.entries
    }

    /// Try `s` against the entries in their current order, count the first
    /// success, and restore the count-descending order by insertion sort.
    pub fn update(&mut self, s: &str) -> DataType {
        let mut hit = self.entries.len() - 1;
        for (i, (dt, _)) in self.entries.iter().enumerate() {
            if parse_as(*dt, s).is_some() {
                hit = i;
                break;
            }
        }
        let dt = self.entries[hit].0;
        self.entries[hit].1 += 1;
        let mut i = hit;
        while i > 0 && self.entries[i].1 > self.entries[i - 1].1 {
            self.entries.swap(i, i - 1);
            i -= 1;
        }
        dt
    }

    /// Stable re-sort demoting `String` below every other entry, counts
    /// descending otherwise. Used for final type selection and as the pass-2
    /// attempt order for object pages, so typed parses run before the
    /// string fallback.
    pub fn sort_strings_last(&mut self) {
        for i in 1..self.entries.len() {
            let mut j = i;
            while j > 0 && Self::orders_before(&self.entries[j], &self.entries[j - 1]) {
                self.entries.swap(j, j - 1);
                j -= 1;
            }
        }
    }

    fn orders_before(a: &(DataType, u32), b: &(DataType, u32)) -> bool {
        let (a_str, b_str) = (a.0 == DataType::String, b.0 == DataType::String);
        if a_str != b_str {
            return b_str;
        }
        a.1 > b.1
    }

    /// Choose the final page type for this slice's column: fold the nonzero
    /// entries (INT absorbs into FLOAT; any other mixture is OBJECT; a lone
    /// STRING is UNICODE; dates, times and nulls always store as objects).
    /// Leaves the entries in strings-last order for pass-2.
    pub fn select_page_type(&mut self, longest: usize) -> PageType {
        self.sort_strings_last();
        let mut selected: Option<DataType> = None;
        for &(dt, count) in &self.entries {
            if count == 0 {
                continue;
            }
            selected = Some(match selected {
                None => dt,
                Some(DataType::Int) if dt == DataType::Float => DataType::Float,
                Some(DataType::Float) if dt == DataType::Int => DataType::Float,
                Some(_) => return PageType::Object,
            });
        }
        match selected {
            Some(DataType::Int) => PageType::Int64,
            Some(DataType::Float) => PageType::Float64,
            Some(DataType::Bool) => PageType::Bool,
            Some(DataType::String) => PageType::Unicode {
                width: longest.max(1),
            },
            _ => PageType::Object,
        }
    }

    /// Pass-2 dispatch for object pages: the first entry whose parse
    /// succeeds decides the row's serialized type.
    pub fn parse_first<'a>(&self, s: &'a str) -> Value<'a> {
        for &(dt, _) in &self.entries {
            if let Some(value) = parse_as(dt, s) {
                return value;
            }
        }
        Value::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_set_is_exact() {
        for s in NULL_SET {
            assert!(is_null(s), "{s:?} should be null");
        }
        assert!(!is_null("NIL"));
        assert!(!is_null("none"));
    }

    #[test]
    fn int_rejects_decorations() {
        assert_eq!(parse_int("-42"), Some(-42));
        assert_eq!(parse_int("+7"), Some(7));
        assert_eq!(parse_int(" 1"), None);
        assert_eq!(parse_int("1_000"), None);
        assert_eq!(parse_int("1,000"), None);
        assert_eq!(parse_int(""), None);
    }

    #[test]
    fn float_accepts_scientific_rejects_inf() {
        assert_eq!(parse_float("2.5"), Some(2.5));
        assert_eq!(parse_float("-1e3"), Some(-1000.0));
        assert_eq!(parse_float("10"), Some(10.0));
        assert_eq!(parse_float("inf"), None);
        assert_eq!(parse_float("nan"), None);
        assert_eq!(parse_float("."), None);
    }

    #[test]
    fn date_formats() {
        let d = Date { year: 2023, month: 1, day: 5 };
        assert_eq!(parse_date("2023-01-05", false), Some(d));
        assert_eq!(parse_date("2023/1/5", false), Some(d));
        assert_eq!(parse_date("2023 01 05", false), Some(d));
        assert_eq!(parse_date("2023.01.05", false), Some(d));
        assert_eq!(parse_date("05-01-2023", false), Some(d));
        // month-day-year only under the US variant
        assert_eq!(parse_date("01-05-2023", true), Some(d));
        assert_eq!(parse_date("2023-13-01", false), None);
        assert_eq!(parse_date("2023-02-30", false), None);
        assert_eq!(parse_date("23-01-05", false), None);
    }

    #[test]
    fn leap_years() {
        assert!(parse_date("2024-02-29", false).is_some());
        assert!(parse_date("2023-02-29", false).is_none());
        assert!(parse_date("2000-02-29", false).is_some());
        assert!(parse_date("1900-02-29", false).is_none());
    }

    #[test]
    fn time_requires_minutes() {
        assert!(parse_time("14").is_none());
        let t = parse_time("14:30").unwrap();
        assert_eq!((t.hour, t.minute, t.second, t.microsecond), (14, 30, 0, 0));
        let t = parse_time("14:30:15.25").unwrap();
        assert_eq!(t.microsecond, 250_000);
        assert!(parse_time("24:00").is_none());
        assert!(parse_time("14:60").is_none());
    }

    #[test]
    fn time_offsets() {
        let t = parse_time("09:00+02:00").unwrap();
        assert_eq!(t.offset.unwrap().total_micros, 2 * 3600 * 1_000_000);
        let t = parse_time("09:00-05:30").unwrap();
        let (days, secs, micros) = t.offset.unwrap().as_timedelta();
        assert_eq!((days, secs, micros), (-1, 86_400 - 19_800, 0));
    }

    #[test]
    fn datetime_separators() {
        let dt = parse_datetime("2023-01-05T14:30:00", false).unwrap();
        assert_eq!(dt.date.day, 5);
        assert_eq!(dt.time.hour, 14);
        let dt = parse_datetime("2023 01 05 14:30", false).unwrap();
        assert_eq!(dt.date.year, 2023);
        assert!(parse_datetime("2023-01-05", false).is_none());
    }

    #[test]
    fn update_counts_first_success_in_taxonomy_order() {
        let mut ranks = Ranks::new();
        assert_eq!(ranks.update(""), DataType::None);
        assert_eq!(ranks.update("true"), DataType::Bool);
        assert_eq!(ranks.update("7"), DataType::Int);
        assert_eq!(ranks.update("2.5"), DataType::Float);
        assert_eq!(ranks.update("2023-01-05"), DataType::Date);
        assert_eq!(ranks.update("x"), DataType::String);
    }

    #[test]
    fn repeated_hits_move_to_front() {
        let mut ranks = Ranks::new();
        ranks.update("1");
        ranks.update("2");
        ranks.update("3");
        assert_eq!(ranks.entries()[0], (DataType::Int, 3));
    }

    #[test]
    fn pure_int_column_selects_int64() {
        let mut ranks = Ranks::new();
        for s in ["1", "2", "3"] {
            ranks.update(s);
        }
        assert_eq!(ranks.select_page_type(0), PageType::Int64);
    }

    #[test]
    fn int_absorbs_into_float() {
        let mut ranks = Ranks::new();
        for s in ["1", "2.5", "3"] {
            ranks.update(s);
        }
        assert_eq!(ranks.select_page_type(0), PageType::Float64);
    }

    #[test]
    fn strings_win_only_when_alone() {
        let mut ranks = Ranks::new();
        for s in ["x", "y", "z"] {
            ranks.update(s);
        }
        assert_eq!(ranks.select_page_type(1), PageType::Unicode { width: 1 });

        let mut mixed = Ranks::new();
        mixed.update("1");
        mixed.update("x");
        assert_eq!(mixed.select_page_type(1), PageType::Object);
    }

    #[test]
    fn leading_string_rank_absorbs_later_values() {
        // Once STRING heads the rank order it wins every later trial; the
        // whole slice is plain text.
        let mut ranks = Ranks::new();
        for s in ["x", "y", "1"] {
            ranks.update(s);
        }
        assert_eq!(ranks.entries()[0], (DataType::String, 3));
        assert_eq!(ranks.select_page_type(1), PageType::Unicode { width: 1 });
    }

    #[test]
    fn nulls_force_object() {
        let mut ranks = Ranks::new();
        for s in ["1", "true", ""] {
            ranks.update(s);
        }
        assert_eq!(ranks.select_page_type(0), PageType::Object);
    }

    #[test]
    fn dates_store_as_objects() {
        let mut ranks = Ranks::new();
        ranks.update("2023-01-05");
        ranks.update("2023-01-06");
        assert_eq!(ranks.select_page_type(0), PageType::Object);
    }

    #[test]
    fn parse_first_prefers_typed_over_string() {
        let mut ranks = Ranks::new();
        for s in ["1", "a", "b", "c"] {
            ranks.update(s);
        }
        assert_eq!(ranks.select_page_type(1), PageType::Object);
        assert_eq!(ranks.parse_first("2"), Value::Int(2));
        assert_eq!(ranks.parse_first("q"), Value::Str("q"));
        assert_eq!(ranks.parse_first("NULL"), Value::None);
    }
}
