//! Calendar months, the unit of time every report is indexed by.
use chrono::{Datelike, NaiveDate};
use qu::ick_use::*;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, iter::FusedIterator, str::FromStr};

/// A calendar month. Dates are truncated to the first of their month.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    /// 1-based
    month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        ensure!((1..=12).contains(&month), "invalid month {}", month);
        ensure!(
            NaiveDate::from_ymd_opt(year, month, 1).is_some(),
            "year {} out of range",
            year
        );
        Ok(Month { year, month })
    }

    /// The month containing `date`.
    pub fn of(date: NaiveDate) -> Self {
        Month {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    pub fn first_day(self) -> NaiveDate {
        // fields are validated on construction
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap()
    }

    /// Number of days in this month.
    pub fn days(self) -> i64 {
        (self.succ().first_day() - self.first_day()).num_days()
    }

    /// Months since 0000-01, used as a continuous x coordinate.
    pub fn index(self) -> i32 {
        self.year * 12 + self.month as i32 - 1
    }

    pub(crate) fn from_index(idx: i32) -> Self {
        Month {
            year: idx.div_euclid(12),
            month: idx.rem_euclid(12) as u32 + 1,
        }
    }

    /// Add (or with a negative argument subtract) a number of months.
    pub fn add(self, months: i32) -> Self {
        Self::from_index(self.index() + months)
    }

    pub fn succ(self) -> Self {
        self.add(1)
    }

    /// Signed number of months from `earlier` to `self`.
    pub fn months_since(self, earlier: Month) -> i32 {
        self.index() - earlier.index()
    }

    /// Short label used on chart axes, e.g. `Jan 19`.
    pub fn label(self) -> String {
        self.first_day().format("%b %y").to_string()
    }

    /// The position of `date` in month coordinates, so that the first of the month lands on a
    /// whole number.
    pub fn position(date: NaiveDate) -> f64 {
        let month = Month::of(date);
        month.index() as f64 + (date.day() - 1) as f64 / month.days() as f64
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04}-{:02}-01", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::util::parse_date(s)
            .map(Month::of)
            .ok_or_else(|| format_err!("\"{}\" is not a month (expected YYYY-MM)", s))
    }
}

impl From<NaiveDate> for Month {
    fn from(date: NaiveDate) -> Self {
        Month::of(date)
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Month {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s: String = Deserialize::deserialize(d)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// An inclusive range of months.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthRange {
    pub start: Month,
    pub end: Month,
}

impl MonthRange {
    pub fn new(start: Month, end: Month) -> Result<Self> {
        ensure!(
            start <= end,
            "month range must go from low to high (got {} to {})",
            start,
            end
        );
        Ok(MonthRange { start, end })
    }

    pub fn contains(&self, month: Month) -> bool {
        self.start <= month && month <= self.end
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.contains(Month::of(date))
    }

    pub fn len(&self) -> usize {
        (self.end.months_since(self.start) + 1).max(0) as usize
    }

    pub fn iter(&self) -> MonthIter {
        MonthIter {
            next: self.start,
            end: self.end,
            done: self.start > self.end,
        }
    }
}

impl IntoIterator for MonthRange {
    type Item = Month;
    type IntoIter = MonthIter;
    fn into_iter(self) -> MonthIter {
        self.iter()
    }
}

pub struct MonthIter {
    next: Month,
    end: Month,
    done: bool,
}

impl Iterator for MonthIter {
    type Item = Month;
    fn next(&mut self) -> Option<Month> {
        if self.done {
            return None;
        }
        let out = self.next;
        if out == self.end {
            self.done = true;
        } else {
            self.next = out.succ();
        }
        Some(out)
    }
}

impl FusedIterator for MonthIter {}

#[cfg(test)]
mod test {
    use super::{Month, MonthRange};
    use chrono::NaiveDate;

    #[test]
    fn arithmetic() {
        let m = Month::new(2020, 3).unwrap();
        assert_eq!(m.add(-3), Month::new(2019, 12).unwrap());
        assert_eq!(m.add(10), Month::new(2021, 1).unwrap());
        assert_eq!(m.add(-15), Month::new(2018, 12).unwrap());
        assert_eq!(m.months_since(Month::new(2019, 1).unwrap()), 14);
        assert_eq!(Month::new(2020, 2).unwrap().days(), 29);
        assert!(Month::new(2020, 13).is_err());
    }

    #[test]
    fn labels_and_parsing() {
        let m: Month = "2019-01".parse().unwrap();
        assert_eq!(m.label(), "Jan 19");
        assert_eq!(m.to_string(), "2019-01-01");
        let m: Month = "2020-03-26".parse().unwrap();
        assert_eq!(m, Month::new(2020, 3).unwrap());
        assert!("March".parse::<Month>().is_err());
    }

    #[test]
    fn position() {
        let d = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        assert_eq!(Month::position(d), Month::of(d).index() as f64);
        let d = NaiveDate::from_ymd_opt(2020, 3, 26).unwrap();
        let pos = Month::position(d) - Month::of(d).index() as f64;
        assert!(pos > 0.8 && pos < 0.81);
    }

    #[test]
    fn range() {
        let range = MonthRange::new(
            Month::new(2019, 11).unwrap(),
            Month::new(2020, 2).unwrap(),
        )
        .unwrap();
        let months: Vec<_> = range.iter().map(|m| m.label()).collect();
        assert_eq!(months, ["Nov 19", "Dec 19", "Jan 20", "Feb 20"]);
        assert_eq!(range.len(), 4);
        assert!(range.contains(Month::new(2020, 1).unwrap()));
        assert!(!range.contains(Month::new(2020, 3).unwrap()));
        assert!(MonthRange::new(range.end, range.start).is_err());
    }
}
