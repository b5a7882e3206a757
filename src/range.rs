use noisy_float::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Range where lower bound is inclusive, upper bound is exclusive or unbounded.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range<T>(T, Option<T>);

impl<T> Range<T>
where
    T: PartialOrd,
{
    pub fn new(from: T, to: Option<T>) -> Self {
        if let Some(ref to) = to {
            if from >= *to {
                panic!("ranges must go from low to high")
            }
        }
        Range(from, to)
    }

    pub fn contains(&self, val: &T) -> bool {
        if let Some(end) = &self.1 {
            val >= &self.0 && val < end
        } else {
            val >= &self.0
        }
    }
}

impl<T> fmt::Display for Range<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(end) = &self.1 {
            write!(f, "{}-<{}", self.0, end)
        } else {
            write!(f, "{}+", self.0)
        }
    }
}

/// An ordered set of ranges, each with the label values falling into it are reported under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeSet<T> {
    ranges: Vec<(Range<T>, String)>,
}

impl<T> RangeSet<T>
where
    T: PartialOrd + fmt::Display,
{
    /// Ranges are labelled with their `Display` form.
    pub fn new(ranges: Vec<Range<T>>) -> Self {
        Self {
            ranges: ranges
                .into_iter()
                .map(|range| {
                    let label = range.to_string();
                    (range, label)
                })
                .collect(),
        }
    }

    /// Add a range with a custom label.
    pub fn push_labelled(&mut self, range: Range<T>, label: impl Into<String>) {
        self.ranges.push((range, label.into()));
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.ranges.iter().map(|(_, label)| label.as_str())
    }

    /// The label of the first range containing `value`.
    pub fn label_for(&self, value: &T) -> Option<&str> {
        self.ranges
            .iter()
            .find(|(range, _)| range.contains(value))
            .map(|(_, label)| label.as_str())
    }
}

impl RangeSet<R64> {
    /// Time in therapeutic range bands, in percent.
    ///
    /// The outer bands are open: anything under 50 (negative values included) is `0-<50`, and
    /// anything from 90 up (values over 100 included) is `90-100`.
    pub fn ttr_bands() -> Self {
        let mut bands = RangeSet::new(vec![]);
        bands.push_labelled(Range::new(r64(f64::MIN), Some(r64(50.))), "0-<50");
        for w in [50., 60., 70., 80., 90.].windows(2) {
            let range = Range::new(r64(w[0]), Some(r64(w[1])));
            let label = range.to_string();
            bands.push_labelled(range, label);
        }
        bands.push_labelled(Range::new(r64(90.), None), "90-100");
        bands
    }
}

#[cfg(test)]
mod test {
    use super::{Range, RangeSet};
    use noisy_float::prelude::*;

    #[test]
    fn range() {
        let r = Range::new(10, Some(20));
        assert!(r.contains(&10));
        assert!(!r.contains(&20));
        assert_eq!(r.to_string(), "10-<20");
        assert_eq!(Range::new(90, None).to_string(), "90+");
    }

    #[test]
    fn ttr_bands() {
        let bands = RangeSet::ttr_bands();
        assert_eq!(
            bands.labels().collect::<Vec<_>>(),
            ["0-<50", "50-<60", "60-<70", "70-<80", "80-<90", "90-100"]
        );
        assert_eq!(bands.label_for(&r64(0.)), Some("0-<50"));
        assert_eq!(bands.label_for(&r64(59.9)), Some("50-<60"));
        assert_eq!(bands.label_for(&r64(60.)), Some("60-<70"));
        assert_eq!(bands.label_for(&r64(100.)), Some("90-100"));
        assert_eq!(bands.label_for(&r64(101.)), Some("90-100"));
        assert_eq!(bands.label_for(&r64(-1.)), Some("0-<50"));
    }
}
