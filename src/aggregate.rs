//! Grouping patient extracts into summary tables.
use crate::{
    extract::Extract,
    month::MonthRange,
    table::{MonthlyTable, Series, SeriesKind},
    value::{Key, Value},
    ArcStr,
};
use qu::ick_use::*;
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// A column to group on, optionally truncating its dates to months.
#[derive(Debug, Clone)]
pub struct GroupKey {
    pub column: ArcStr,
    pub by_month: bool,
}

impl GroupKey {
    pub fn column(column: impl Into<ArcStr>) -> Self {
        GroupKey {
            column: column.into(),
            by_month: false,
        }
    }

    /// Group on the month of a date column.
    pub fn month(column: impl Into<ArcStr>) -> Self {
        GroupKey {
            column: column.into(),
            by_month: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MeasureKind {
    /// Number of distinct non-missing values of the column.
    DistinctCount {
        column: ArcStr,
        /// Only count rows where this column is truthy.
        flag: Option<ArcStr>,
    },
    /// Number of rows, optionally only those where `flag` is truthy.
    CountRows { flag: Option<ArcStr> },
    Sum { column: ArcStr },
    Mean { column: ArcStr },
    /// Sample standard deviation.
    Stdev { column: ArcStr },
}

/// A named statistic computed per group.
#[derive(Debug, Clone)]
pub struct Measure {
    pub name: ArcStr,
    pub kind: MeasureKind,
}

impl Measure {
    pub fn distinct_count(name: impl Into<ArcStr>, column: impl Into<ArcStr>) -> Self {
        Self::new(
            name,
            MeasureKind::DistinctCount {
                column: column.into(),
                flag: None,
            },
        )
    }

    pub fn distinct_count_where(
        name: impl Into<ArcStr>,
        column: impl Into<ArcStr>,
        flag: impl Into<ArcStr>,
    ) -> Self {
        Self::new(
            name,
            MeasureKind::DistinctCount {
                column: column.into(),
                flag: Some(flag.into()),
            },
        )
    }

    pub fn count_rows(name: impl Into<ArcStr>) -> Self {
        Self::new(name, MeasureKind::CountRows { flag: None })
    }

    pub fn count_where(name: impl Into<ArcStr>, flag: impl Into<ArcStr>) -> Self {
        Self::new(
            name,
            MeasureKind::CountRows {
                flag: Some(flag.into()),
            },
        )
    }

    pub fn sum(name: impl Into<ArcStr>, column: impl Into<ArcStr>) -> Self {
        Self::new(
            name,
            MeasureKind::Sum {
                column: column.into(),
            },
        )
    }

    pub fn mean(name: impl Into<ArcStr>, column: impl Into<ArcStr>) -> Self {
        Self::new(
            name,
            MeasureKind::Mean {
                column: column.into(),
            },
        )
    }

    pub fn stdev(name: impl Into<ArcStr>, column: impl Into<ArcStr>) -> Self {
        Self::new(
            name,
            MeasureKind::Stdev {
                column: column.into(),
            },
        )
    }

    fn new(name: impl Into<ArcStr>, kind: MeasureKind) -> Self {
        Measure {
            name: name.into(),
            kind,
        }
    }

    pub fn series_kind(&self) -> SeriesKind {
        match self.kind {
            MeasureKind::Mean { .. } | MeasureKind::Stdev { .. } => SeriesKind::Statistic,
            _ => SeriesKind::Count,
        }
    }
}

/// A measure with its columns resolved against an extract.
enum Resolved {
    Distinct(usize, Option<usize>),
    Count(Option<usize>),
    Sum(usize),
    Mean(usize),
    Stdev(usize),
}

impl Resolved {
    fn new(measure: &Measure, extract: &Extract) -> Result<Self> {
        Ok(match &measure.kind {
            MeasureKind::DistinctCount { column, flag } => Resolved::Distinct(
                extract.column(column)?,
                flag.as_ref().map(|f| extract.column(f)).transpose()?,
            ),
            MeasureKind::CountRows { flag } => {
                Resolved::Count(flag.as_ref().map(|f| extract.column(f)).transpose()?)
            }
            MeasureKind::Sum { column } => Resolved::Sum(extract.column(column)?),
            MeasureKind::Mean { column } => Resolved::Mean(extract.column(column)?),
            MeasureKind::Stdev { column } => Resolved::Stdev(extract.column(column)?),
        })
    }

    fn start(&self) -> Acc {
        match self {
            Resolved::Distinct(..) => Acc::Distinct(HashSet::new()),
            Resolved::Count(_) => Acc::Count(0),
            Resolved::Sum(_) => Acc::Sum {
                total: 0.0,
                all_int: true,
            },
            Resolved::Mean(_) | Resolved::Stdev(_) => Acc::Values(vec![]),
        }
    }
}

/// Running state of one measure in one group.
enum Acc {
    Distinct(HashSet<Key>),
    Count(i64),
    Sum { total: f64, all_int: bool },
    Values(Vec<f64>),
}

impl Acc {
    fn update(&mut self, how: &Resolved, row: &[Value]) -> Result {
        match (self, how) {
            (Acc::Distinct(seen), Resolved::Distinct(col, flag)) => {
                if flag.map_or(true, |f| row[f].is_truthy()) {
                    if let Some(key) = row[*col].to_key(false)? {
                        seen.insert(key);
                    }
                }
            }
            (Acc::Count(n), Resolved::Count(flag)) => {
                if flag.map_or(true, |f| row[f].is_truthy()) {
                    *n += 1;
                }
            }
            (Acc::Sum { total, all_int }, Resolved::Sum(col)) => {
                let cell = &row[*col];
                if let Some(v) = cell.as_f64() {
                    *total += v;
                    *all_int &= matches!(cell, Value::Int(_));
                }
            }
            (Acc::Values(values), Resolved::Mean(col) | Resolved::Stdev(col)) => {
                if let Some(v) = row[*col].as_f64() {
                    values.push(v);
                }
            }
            _ => unreachable!("accumulator created from a different measure"),
        }
        Ok(())
    }

    fn finish(self, how: &Resolved) -> Value {
        match (self, how) {
            (Acc::Distinct(seen), _) => Value::Int(seen.len() as i64),
            (Acc::Count(n), _) => Value::Int(n),
            (Acc::Sum { total, all_int }, _) if all_int => Value::Int(total as i64),
            (Acc::Sum { total, .. }, _) => Value::from(total),
            (Acc::Values(values), Resolved::Mean(_)) if !values.is_empty() => {
                Value::from(values.mean())
            }
            // sample std dev is NaN for fewer than 2 values, which becomes missing
            (Acc::Values(values), Resolved::Stdev(_)) => Value::from(values.std_dev()),
            (Acc::Values(_), _) => Value::Missing,
        }
    }
}

/// Group `extract` by `keys`, computing each measure per group.
///
/// Rows with a missing key are left out. A key that can't be resolved (a fractional number, or
/// a non-date grouped by month) aborts the aggregation.
pub fn aggregate(extract: &Extract, keys: &[GroupKey], measures: &[Measure]) -> Result<Summary> {
    let key_idxs = keys
        .iter()
        .map(|k| extract.column(&k.column))
        .collect::<Result<Vec<_>>>()?;
    let resolved = measures
        .iter()
        .map(|m| Resolved::new(m, extract))
        .collect::<Result<Vec<_>>>()?;

    let mut groups: BTreeMap<Vec<Key>, Vec<Acc>> = BTreeMap::new();
    'rows: for (row_idx, row) in extract.rows().enumerate() {
        let mut group = Vec::with_capacity(keys.len());
        for (key, idx) in keys.iter().zip(key_idxs.iter()) {
            match row[*idx].to_key(key.by_month).with_context(|| {
                format!("in column \"{}\" of row {}", key.column, row_idx + 1)
            })? {
                Some(k) => group.push(k),
                None => continue 'rows,
            }
        }
        let accs = groups
            .entry(group)
            .or_insert_with(|| resolved.iter().map(Resolved::start).collect());
        for (acc, how) in accs.iter_mut().zip(resolved.iter()) {
            acc.update(how, row)
                .with_context(|| format!("in row {}", row_idx + 1))?;
        }
    }

    let rows = groups
        .into_iter()
        .map(|(key, accs)| {
            let values = accs
                .into_iter()
                .zip(resolved.iter())
                .map(|(acc, how)| acc.finish(how))
                .collect();
            (key, values)
        })
        .collect();
    Ok(Summary {
        keys: keys.iter().map(|k| k.column.clone()).collect(),
        measures: measures
            .iter()
            .map(|m| (m.name.clone(), m.series_kind()))
            .collect(),
        rows,
    })
}

/// The long result of `aggregate`: one row per distinct group key.
#[derive(Debug, Clone)]
pub struct Summary {
    keys: Vec<ArcStr>,
    measures: Vec<(ArcStr, SeriesKind)>,
    rows: BTreeMap<Vec<Key>, Vec<Value>>,
}

impl Summary {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &[Key]) -> Option<&[Value]> {
        self.rows.get(key).map(Vec::as_slice)
    }

    /// The value of `measure` for the group `key`.
    pub fn value(&self, key: &[Key], measure: &str) -> Option<&Value> {
        let idx = self.measure_idx(measure).ok()?;
        self.get(key).map(|values| &values[idx])
    }

    fn key_idx(&self, name: &str) -> Result<usize> {
        self.keys
            .iter()
            .position(|k| &**k == name)
            .ok_or_else(|| format_err!("\"{}\" is not a group key", name))
    }

    fn measure_idx(&self, name: &str) -> Result<usize> {
        self.measures
            .iter()
            .position(|(m, _)| &**m == name)
            .ok_or_else(|| format_err!("\"{}\" is not a measure", name))
    }

    /// The value an empty group takes: 0 for counts, missing for statistics.
    fn empty_values(&self) -> Vec<Value> {
        self.measures
            .iter()
            .map(|(_, kind)| match kind {
                SeriesKind::Statistic => Value::Missing,
                _ => Value::Int(0),
            })
            .collect()
    }

    /// Make sure every month in `range` has a row for each combination of the other keys,
    /// and drop rows for months outside it.
    pub fn fill_months(mut self, month_key: &str, range: MonthRange) -> Result<Self> {
        let idx = self.key_idx(month_key)?;
        let mut others: BTreeSet<Vec<Key>> = BTreeSet::new();
        for key in self.rows.keys() {
            ensure!(
                matches!(key[idx], Key::Month(_)),
                "\"{}\" is not grouped by month",
                month_key
            );
            let mut rest = key.clone();
            rest.remove(idx);
            others.insert(rest);
        }
        if self.keys.len() == 1 {
            others.insert(vec![]);
        }
        self.rows
            .retain(|key, _| key[idx].as_month().map_or(false, |m| range.contains(m)));
        let empty = self.empty_values();
        for rest in others {
            for month in range {
                let mut key = rest.clone();
                key.insert(idx, Key::Month(month));
                self.rows.entry(key).or_insert_with(|| empty.clone());
            }
        }
        Ok(self)
    }

    /// Convert a summary grouped only by month into a monthly table.
    pub fn to_monthly(&self) -> Result<MonthlyTable> {
        ensure!(
            self.keys.len() == 1,
            "summary must be grouped by month alone (grouped by {})",
            self.keys.join(", ")
        );
        let months = self
            .rows
            .keys()
            .map(|k| {
                k[0].as_month()
                    .ok_or_else(|| format_err!("group key {} is not a month", k[0]))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut table = MonthlyTable::new(self.keys[0].clone(), months);
        for (idx, (name, kind)) in self.measures.iter().enumerate() {
            let values = self.rows.values().map(|v| v[idx].clone()).collect();
            table.push_series(Series::new(name.clone(), *kind, values))?;
        }
        Ok(table)
    }

    /// Pivot a month × category summary into a monthly table with one column per category.
    ///
    /// Month/category combinations without a row are 0 for counts and missing for statistics.
    pub fn unstack(&self, month_key: &str, category_key: &str, measure: &str) -> Result<MonthlyTable> {
        ensure!(
            self.keys.len() == 2,
            "can only unstack a summary with two group keys"
        );
        let month_idx = self.key_idx(month_key)?;
        let cat_idx = self.key_idx(category_key)?;
        ensure!(month_idx != cat_idx, "month and category keys must differ");
        let measure_idx = self.measure_idx(measure)?;
        let kind = self.measures[measure_idx].1;
        let empty = match kind {
            SeriesKind::Statistic => Value::Missing,
            _ => Value::Int(0),
        };

        let mut cells: BTreeMap<Key, BTreeMap<_, Value>> = BTreeMap::new();
        let mut months = BTreeSet::new();
        for (key, values) in self.rows.iter() {
            let month = key[month_idx]
                .as_month()
                .ok_or_else(|| format_err!("group key {} is not a month", key[month_idx]))?;
            months.insert(month);
            cells
                .entry(key[cat_idx].clone())
                .or_default()
                .insert(month, values[measure_idx].clone());
        }

        let mut table = MonthlyTable::new(month_key, months.iter().copied());
        for (category, by_month) in cells {
            let values = months
                .iter()
                .map(|m| by_month.get(m).cloned().unwrap_or_else(|| empty.clone()))
                .collect();
            table.push_series(Series::new(category.to_string(), kind, values))?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod test {
    use super::{aggregate, GroupKey, Measure};
    use crate::{
        extract::Extract,
        month::{Month, MonthRange},
        table::SeriesKind,
        value::{Key, Value},
    };

    fn extract() -> Extract {
        let data = "\
patient_id,date,drug,flag,ttr
1,2020-03-02,warfarin,1,60
1,2020-03-20,warfarin,0,70
2,2020-03-10,DOAC,1,
3,2020-04-01,warfarin,,80
4,,warfarin,1,90
";
        Extract::from_reader(data.as_bytes()).unwrap()
    }

    fn march() -> Key {
        Key::Month(Month::new(2020, 3).unwrap())
    }

    #[test]
    fn by_month() {
        let summary = aggregate(
            &extract(),
            &[GroupKey::month("date")],
            &[
                Measure::distinct_count("patients", "patient_id"),
                Measure::count_rows("rows"),
                Measure::count_where("flagged", "flag"),
                Measure::sum("flag_sum", "flag"),
                Measure::mean("mean_ttr", "ttr"),
                Measure::stdev("mean_ttr_stdev", "ttr"),
            ],
        )
        .unwrap();
        // patient 4 has no date
        assert_eq!(summary.len(), 2);
        let key = [march()];
        assert_eq!(summary.value(&key, "patients"), Some(&Value::Int(2)));
        assert_eq!(summary.value(&key, "rows"), Some(&Value::Int(3)));
        assert_eq!(summary.value(&key, "flagged"), Some(&Value::Int(2)));
        assert_eq!(summary.value(&key, "flag_sum"), Some(&Value::Int(2)));
        assert_eq!(summary.value(&key, "mean_ttr"), Some(&Value::Float(65.0)));
        let sd = summary.value(&key, "mean_ttr_stdev").unwrap().as_f64().unwrap();
        assert!((sd - 50f64.sqrt()).abs() < 1e-9);

        let april = [Key::Month(Month::new(2020, 4).unwrap())];
        assert_eq!(summary.value(&april, "mean_ttr_stdev"), Some(&Value::Missing));
    }

    #[test]
    fn errors() {
        let ex = extract();
        assert!(aggregate(&ex, &[GroupKey::column("nope")], &[]).is_err());
        assert!(aggregate(&ex, &[GroupKey::month("drug")], &[]).is_err());
        let ex = Extract::from_reader("k,v\n1.5,1\n".as_bytes()).unwrap();
        assert!(aggregate(&ex, &[GroupKey::column("k")], &[Measure::count_rows("n")]).is_err());
    }

    #[test]
    fn fill_and_unstack() {
        let range = MonthRange::new(Month::new(2020, 2).unwrap(), Month::new(2020, 4).unwrap())
            .unwrap();
        let summary = aggregate(
            &extract(),
            &[GroupKey::month("date"), GroupKey::column("drug")],
            &[
                Measure::distinct_count("patients", "patient_id"),
                Measure::mean("mean_ttr", "ttr"),
            ],
        )
        .unwrap()
        .fill_months("date", range)
        .unwrap();
        // 3 months x 2 drugs
        assert_eq!(summary.len(), 6);
        let feb = [Key::Month(Month::new(2020, 2).unwrap()), Key::Text("DOAC".into())];
        assert_eq!(summary.value(&feb, "patients"), Some(&Value::Int(0)));
        assert_eq!(summary.value(&feb, "mean_ttr"), Some(&Value::Missing));

        let wide = summary.unstack("date", "drug", "patients").unwrap();
        assert_eq!(wide.months().len(), 3);
        assert_eq!(
            wide.column("warfarin").unwrap().values,
            [Value::Int(0), Value::Int(1), Value::Int(1)]
        );
        assert_eq!(wide.column("DOAC").unwrap().kind, SeriesKind::Count);
    }

    #[test]
    fn fill_single_key() {
        let range = MonthRange::new(Month::new(2020, 1).unwrap(), Month::new(2020, 3).unwrap())
            .unwrap();
        let table = aggregate(
            &extract(),
            &[GroupKey::month("date")],
            &[Measure::distinct_count("patients", "patient_id")],
        )
        .unwrap()
        .fill_months("date", range)
        .unwrap()
        .to_monthly()
        .unwrap();
        assert_eq!(
            table.column("patients").unwrap().values,
            [Value::Int(0), Value::Int(0), Value::Int(2)]
        );
    }
}
