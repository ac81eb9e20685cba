//! Cell coercion: identifiers as text, dates from locale strings or
//! spreadsheet serials, amounts as fixed-point decimals.

use std::str::FromStr;

use chrono::{Days, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use crate::Cell;

/// Day zero of the spreadsheet serial calendar. Using Dec 30 rather than
/// Jan 1 absorbs both the 1-based count and the phantom 1900-02-29.
const SERIAL_EPOCH: (i32, u32, u32) = (1899, 12, 30);
/// 9999-12-31
const MAX_SERIAL: f64 = 2_958_465.0;

/// `%Y` also accepts one to three digits, so these are only tried when the
/// text carries a four-digit year.
const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%Y/%m/%d", "%d.%m.%Y"];

/// Day-first dates with a two-digit year (`30/01/26`).
const SHORT_YEAR_FORMATS: &[&str] = &["%d/%m/%y", "%d-%m-%y", "%d.%m.%y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Placeholders spreadsheet exports write for missing values.
const NULL_MARKERS: &[&str] = &["nan", "nat", "none", "null", "-"];

pub fn is_null_marker(text: &str) -> bool {
    NULL_MARKERS.iter().any(|m| text.eq_ignore_ascii_case(m))
}

/// Text form of a cell for identifier columns. Integral numbers render
/// without a fractional part so `123.0` from a float cell reads as `123`.
pub fn cell_text(cell: &Cell) -> Option<String> {
    let text = match cell {
        Cell::Empty => return None,
        Cell::Text(s) => s.trim().to_string(),
        Cell::Number(n) | Cell::Serial(n) => number_text(*n),
        Cell::Bool(b) => b.to_string(),
    };
    if text.is_empty() || is_null_marker(&text) {
        None
    } else {
        Some(text)
    }
}

fn number_text(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 || serial > MAX_SERIAL {
        return None;
    }
    let (y, m, d) = SERIAL_EPOCH;
    NaiveDate::from_ymd_opt(y, m, d)?.checked_add_days(Days::new(serial.floor() as u64))
}

/// `Ok(None)` for blank cells, `Err` with the offending text when a
/// non-blank value is not a recognizable date.
pub fn parse_date(cell: &Cell) -> Result<Option<NaiveDate>, String> {
    match cell {
        Cell::Empty => Ok(None),
        Cell::Number(n) | Cell::Serial(n) => serial_to_date(*n)
            .map(Some)
            .ok_or_else(|| format!("serial {n} outside the supported date range")),
        Cell::Bool(b) => Err(format!("boolean {b} is not a date")),
        Cell::Text(raw) => {
            let text = raw.trim();
            if text.is_empty() || is_null_marker(text) {
                return Ok(None);
            }
            parse_date_text(text).map(Some).ok_or_else(|| format!("unrecognized date '{text}'"))
        }
    }
}

fn date_fields(text: &str) -> Vec<&str> {
    let date_part = text.split([' ', 'T']).next().unwrap_or_default();
    date_part.split(['/', '-', '.']).collect()
}

fn is_digits(field: &str, len: usize) -> bool {
    field.len() == len && field.bytes().all(|b| b.is_ascii_digit())
}

fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let fields = date_fields(text);
    if fields.len() == 3 {
        if fields.iter().any(|f| is_digits(f, 4)) {
            if let Some(date) = DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
            {
                return Some(date);
            }
            return DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date());
        }
        if is_digits(fields[2], 2) {
            return SHORT_YEAR_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok());
        }
        return None;
    }
    // Serial numbers exported as text.
    match text.parse::<f64>() {
        Ok(serial) => serial_to_date(serial),
        Err(_) => None,
    }
}

/// Amount with two decimal places. Accepts `1234.56`, `1.234,56`,
/// `1,234.56` and an optional `R$` prefix. `None` when unparseable.
pub fn parse_amount(cell: &Cell) -> Option<Decimal> {
    let value = match cell {
        Cell::Empty | Cell::Bool(_) => return None,
        Cell::Number(n) | Cell::Serial(n) => Decimal::try_from(*n).ok()?,
        Cell::Text(raw) => parse_amount_text(raw)?,
    };
    Some(value.round_dp(2))
}

fn parse_amount_text(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() || is_null_marker(&cleaned) {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');
    let canonical = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (None, Some(_)) => cleaned.replace(',', "."),
        // `1.000` and `1.234.567` are thousands groups, not decimals.
        (Some(_), None) if is_dot_grouped(&cleaned) => cleaned.replace('.', ""),
        _ => cleaned,
    };
    Decimal::from_str(&canonical).ok()
}

fn is_dot_grouped(value: &str) -> bool {
    let mut groups = value.trim_start_matches('-').split('.');
    let head = groups.next().unwrap_or_default();
    let tail: Vec<&str> = groups.collect();
    (1..=3).contains(&head.len())
        && head.bytes().all(|b| b.is_ascii_digit())
        && !tail.is_empty()
        && tail.iter().all(|g| is_digits(g, 3))
}

/// Whole days late; fractional values truncate. `None` when unparseable.
pub fn parse_days(cell: &Cell) -> Option<i32> {
    match cell {
        Cell::Number(n) | Cell::Serial(n) if n.is_finite() => Some(n.trunc() as i32),
        Cell::Text(raw) => {
            let text = raw.trim();
            text.parse::<i32>()
                .ok()
                .or_else(|| text.replace(',', ".").parse::<f64>().ok().map(|n| n.trunc() as i32))
        }
        _ => None,
    }
}
