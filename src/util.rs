use chrono::NaiveDate;
use serde::{de, Deserialize, Deserializer};
use std::{fs, io, path::Path};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

// Helpers for serde to parse fields with quirks.

/// Whether the extractor meant "no value here".
pub(crate) fn is_null(s: &str) -> bool {
    s.is_empty()
        || s.eq_ignore_ascii_case("null")
        || s.eq_ignore_ascii_case("na")
        || s.eq_ignore_ascii_case("nan")
}

/// Parse a date as written by the cohort extractor.
///
/// Dates are either full ISO dates (`2020-03-16`) or month granularity (`2020-03`), in which case
/// we use the first of the month. A trailing time part (`2020-03-16 00:00:00`) is ignored.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let s = s.split_once(' ').map(|(date, _)| date).unwrap_or(s);
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    let (year, month) = s.split_once('-')?;
    if year.len() != 4 || month.len() != 2 {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)
}

/// Parse a required date field (see [`parse_date`]).
pub fn extract_date<'de, D>(d: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    parse_date(s).ok_or_else(|| de::Error::custom(format!("invalid date \"{}\"", s)))
}

/// Like `extract_date`, but maps the empty string (and 'null') to `None`.
pub fn opt_extract_date<'de, D>(d: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    if is_null(s) {
        return Ok(None);
    }
    parse_date(s)
        .map(Some)
        .ok_or_else(|| de::Error::custom(format!("invalid date \"{}\"", s)))
}

/// Parse a numeric lab value, mapping '', 'null', 'NA' and non-finite values to `None`.
pub fn optional_f64<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    if is_null(s) {
        return Ok(None);
    }
    let v = s
        .parse::<f64>()
        .map_err(|_| de::Error::custom(format!("invalid number \"{}\"", s)))?;
    Ok(if v.is_finite() { Some(v) } else { None })
}

/// Codes are read as text, even when they look like numbers (dm+d ids for example).
pub fn code<'de, D>(d: D) -> Result<crate::ArcStr, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    Ok(s.trim().into())
}

pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}
