//! Statistical disclosure control.
//!
//! Small counts can identify patients, so every count we publish goes through one of two
//! policies first: small values are blanked, or values are rounded down to a multiple.
use crate::{
    table::{MonthlyTable, SeriesKind},
    value::Value,
};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The disclosure policy applied to a table before it is written or plotted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum Disclosure {
    /// Counts in `low..=high` become missing.
    Suppress { low: i64, high: i64 },
    /// Counts are rounded down to a multiple of `multiple`.
    RoundDown { multiple: i64 },
}

impl Default for Disclosure {
    fn default() -> Self {
        Disclosure::Suppress { low: 1, high: 5 }
    }
}

impl Disclosure {
    pub fn validate(&self) -> Result {
        match *self {
            Disclosure::Suppress { low, high } => ensure!(
                0 <= low && low <= high,
                "suppression range {}..={} is empty or negative",
                low,
                high
            ),
            Disclosure::RoundDown { multiple } => ensure!(
                multiple > 0,
                "rounding multiple must be positive (got {})",
                multiple
            ),
        }
        Ok(())
    }

    /// Apply this policy to every count column of `table`.
    pub fn apply(&self, table: &MonthlyTable) -> MonthlyTable {
        let mut out = table.clone();
        for series in out.series_mut() {
            if series.kind != SeriesKind::Count {
                continue;
            }
            for value in series.values.iter_mut() {
                *value = self.apply_value(value);
            }
        }
        out
    }

    /// Apply this policy to a single count.
    pub fn apply_value(&self, value: &Value) -> Value {
        match *self {
            Disclosure::Suppress { low, high } => suppress_value(value, low, high),
            Disclosure::RoundDown { multiple } => round_down_value(value, multiple),
        }
    }
}

impl fmt::Display for Disclosure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Disclosure::Suppress { low, high } => write!(f, "suppress counts {}-{}", low, high),
            Disclosure::RoundDown { multiple } => {
                write!(f, "round counts down to a multiple of {}", multiple)
            }
        }
    }
}

/// Blank count cells between `low` and `high` inclusive.
pub fn suppress(table: &MonthlyTable, low: i64, high: i64) -> MonthlyTable {
    Disclosure::Suppress { low, high }.apply(table)
}

/// Round count cells down to a multiple of `multiple`.
pub fn round_down(table: &MonthlyTable, multiple: i64) -> MonthlyTable {
    Disclosure::RoundDown { multiple }.apply(table)
}

pub fn suppress_value(value: &Value, low: i64, high: i64) -> Value {
    let small = match value {
        Value::Int(v) => (low..=high).contains(v),
        Value::Float(v) => *v >= low as f64 && *v <= high as f64,
        _ => false,
    };
    if small {
        Value::Missing
    } else {
        value.clone()
    }
}

/// Non-positive multiples leave the value alone.
pub fn round_down_value(value: &Value, multiple: i64) -> Value {
    if multiple <= 0 {
        return value.clone();
    }
    match value {
        Value::Int(v) => Value::Int(v.div_euclid(multiple) * multiple),
        Value::Float(v) if v.is_finite() => {
            let m = multiple as f64;
            Value::Float((v / m).floor() * m)
        }
        other => other.clone(),
    }
}
