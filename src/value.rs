//! Cells of a patient extract.
use crate::{month::Month, util, ArcStr};
use chrono::NaiveDate;
use qu::ick_use::*;
use serde::{Serialize, Serializer};
use std::fmt;

/// A single cell, with its type inferred from the text in the extract.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Missing,
    Int(i64),
    Float(f64),
    Text(ArcStr),
    Date(NaiveDate),
}

impl Value {
    /// Infer the type of a raw CSV field.
    ///
    /// Tried in order: missing (`""`, `null`, `NA`, `NaN`), integer, float, date (`YYYY-MM-DD`),
    /// month (`YYYY-MM`, read as the first of the month), and finally text.
    pub fn parse(raw: &str) -> Value {
        let raw = raw.trim();
        if util::is_null(raw) {
            return Value::Missing;
        }
        if let Ok(v) = raw.parse::<i64>() {
            return Value::Int(v);
        }
        if let Ok(v) = raw.parse::<f64>() {
            return if v.is_nan() {
                Value::Missing
            } else {
                Value::Float(v)
            };
        }
        if let Some(date) = util::parse_date(raw) {
            return Value::Date(date);
        }
        Value::Text(raw.into())
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Value::Missing => true,
            Value::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) if !v.is_nan() => Some(*v),
            _ => None,
        }
    }

    /// Flags are truthy when non-zero (numbers) or present (anything else).
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Missing => false,
            Value::Int(v) => *v != 0,
            Value::Float(v) => !v.is_nan() && *v != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Date(_) => true,
        }
    }

    /// Turn this cell into a group key, optionally truncating dates to their month.
    ///
    /// Missing cells have no key (the row is skipped). Floats must be integral.
    pub fn to_key(&self, by_month: bool) -> Result<Option<Key>> {
        Ok(Some(match self {
            Value::Missing => return Ok(None),
            Value::Float(v) if v.is_nan() => return Ok(None),
            Value::Date(d) if by_month => Key::Month(Month::of(*d)),
            _ if by_month => bail!("cannot truncate {} to a month", self),
            Value::Int(v) => Key::Int(*v),
            Value::Float(v) => {
                ensure!(
                    v.fract() == 0.0 && v.is_finite(),
                    "fractional value {} cannot be used as a group key",
                    v
                );
                Key::Int(*v as i64)
            }
            Value::Text(s) => Key::Text(s.clone()),
            Value::Date(d) => Key::Date(*d),
        }))
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Missing
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        if v.is_nan() {
            Value::Missing
        } else {
            Value::Float(v)
        }
    }
}

impl From<Option<f64>> for Value {
    fn from(v: Option<f64>) -> Self {
        v.map(Value::from).unwrap_or(Value::Missing)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.into())
    }
}

impl From<ArcStr> for Value {
    fn from(v: ArcStr) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<Month> for Value {
    fn from(v: Month) -> Self {
        Value::Date(v.first_day())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Missing => Ok(()),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) if v.is_nan() => Ok(()),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// A resolved group key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Int(i64),
    Text(ArcStr),
    Date(NaiveDate),
    Month(Month),
}

impl Key {
    pub fn as_month(&self) -> Option<Month> {
        match self {
            Key::Month(m) => Some(*m),
            Key::Date(d) => Some(Month::of(*d)),
            _ => None,
        }
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Int(v) => Value::Int(v),
            Key::Text(s) => Value::Text(s),
            Key::Date(d) => Value::Date(d),
            Key::Month(m) => m.into(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{}", v),
            Key::Text(s) => f.write_str(s),
            Key::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Key::Month(m) => fmt::Display::fmt(m, f),
        }
    }
}
