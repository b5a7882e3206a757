//! Month-indexed wide tables, the shape every report exports and plots.
use crate::{create_output, month::Month, value::Value, ArcStr, MonthRange};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fs, io, path::Path};

/// What a column holds, which decides whether disclosure control applies to it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    /// Person or test counts. Subject to disclosure control.
    Count,
    /// Rates and percentages derived from counts.
    Rate,
    /// Means, standard deviations.
    Statistic,
}

/// One column of a monthly table.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: ArcStr,
    pub kind: SeriesKind,
    pub values: Vec<Value>,
}

impl Series {
    pub fn new(name: impl Into<ArcStr>, kind: SeriesKind, values: Vec<Value>) -> Self {
        Series {
            name: name.into(),
            kind,
            values,
        }
    }

    pub fn numbers(&self) -> impl Iterator<Item = Option<f64>> + '_ {
        self.values.iter().map(Value::as_f64)
    }

    /// The name of the series this one gives the error magnitude for, if it is a `_stdev`
    /// column.
    pub fn stdev_of(&self) -> Option<&str> {
        self.name.strip_suffix("_stdev")
    }
}

/// `1000 * numerator / denominator`. Zero or missing denominators give NaN.
pub fn rate_per_1000(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || denominator.is_nan() {
        f64::NAN
    } else {
        1000.0 * numerator / denominator
    }
}

fn percentage(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || denominator.is_nan() {
        f64::NAN
    } else {
        100.0 * numerator / denominator
    }
}

/// A wide table indexed by month, with one column per measure.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyTable {
    index_name: ArcStr,
    months: Vec<Month>,
    series: Vec<Series>,
}

impl MonthlyTable {
    /// Months are sorted and deduplicated.
    pub fn new(index_name: impl Into<ArcStr>, months: impl IntoIterator<Item = Month>) -> Self {
        let months: BTreeSet<Month> = months.into_iter().collect();
        MonthlyTable {
            index_name: index_name.into(),
            months: months.into_iter().collect(),
            series: vec![],
        }
    }

    pub fn months(&self) -> &[Month] {
        &self.months
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    pub fn series_mut(&mut self) -> impl Iterator<Item = &mut Series> + '_ {
        self.series.iter_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty() || self.series.is_empty()
    }

    pub fn push_series(&mut self, series: Series) -> Result {
        ensure!(
            series.values.len() == self.months.len(),
            "series \"{}\" has {} values but the table has {} months",
            series.name,
            series.values.len(),
            self.months.len()
        );
        ensure!(
            self.get(&series.name).is_none(),
            "duplicate column \"{}\"",
            series.name
        );
        self.series.push(series);
        Ok(())
    }

    /// Builder-style `push_series`.
    pub fn with_series(
        mut self,
        name: impl Into<ArcStr>,
        kind: SeriesKind,
        values: Vec<Value>,
    ) -> Result<Self> {
        self.push_series(Series::new(name, kind, values))?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Series> {
        self.series.iter().find(|s| &*s.name == name)
    }

    /// Like `get`, but errors if the column is missing.
    pub fn column(&self, name: &str) -> Result<&Series> {
        self.get(name).ok_or_else(|| {
            format_err!(
                "no column named \"{}\" (available: {})",
                name,
                self.series.iter().map(|s| &*s.name).collect::<Vec<_>>().join(", ")
            )
        })
    }

    /// The value in column `name` for `month`, if both exist.
    pub fn value(&self, name: &str, month: Month) -> Option<&Value> {
        let idx = self.months.binary_search(&month).ok()?;
        self.get(name).map(|s| &s.values[idx])
    }

    pub fn rename(&mut self, from: &str, to: impl Into<ArcStr>) -> Result {
        let to = to.into();
        ensure!(
            from == &*to || self.get(&to).is_none(),
            "duplicate column \"{}\"",
            to
        );
        let idx = self
            .series
            .iter()
            .position(|s| &*s.name == from)
            .ok_or_else(|| format_err!("no column named \"{}\" to rename", from))?;
        self.series[idx].name = to;
        Ok(())
    }

    /// A table with only the named columns, in the order given.
    pub fn select(&self, names: &[&str]) -> Result<Self> {
        Ok(MonthlyTable {
            index_name: self.index_name.clone(),
            months: self.months.clone(),
            series: names
                .iter()
                .map(|name| self.column(name).cloned())
                .collect::<Result<_>>()?,
        })
    }

    /// Outer join on the month index. Months missing from either side get missing values.
    pub fn join(&self, other: &MonthlyTable) -> Result<Self> {
        let months: BTreeSet<Month> = self.months.iter().chain(other.months.iter()).copied().collect();
        let mut out = MonthlyTable::new(self.index_name.clone(), months);
        for table in [self, other] {
            for series in table.series.iter() {
                let values = out.reindex(&table.months, series);
                out.push_series(Series::new(series.name.clone(), series.kind, values))?;
            }
        }
        Ok(out)
    }

    /// Values of `series` (indexed by `from`) laid out on this table's months.
    fn reindex(&self, from: &[Month], series: &Series) -> Vec<Value> {
        self.months
            .iter()
            .map(|month| match from.binary_search(month) {
                Ok(idx) => series.values[idx].clone(),
                Err(_) => Value::Missing,
            })
            .collect()
    }

    /// Keep only months in `range`.
    pub fn filter_months(&self, range: MonthRange) -> Self {
        let keep: Vec<bool> = self.months.iter().map(|m| range.contains(*m)).collect();
        let pick = |values: &[Value]| {
            values
                .iter()
                .zip(keep.iter())
                .filter(|(_, keep)| **keep)
                .map(|(v, _)| v.clone())
                .collect()
        };
        MonthlyTable {
            index_name: self.index_name.clone(),
            months: self.months.iter().copied().filter(|m| range.contains(*m)).collect(),
            series: self
                .series
                .iter()
                .map(|s| Series::new(s.name.clone(), s.kind, pick(&s.values)))
                .collect(),
        }
    }

    fn combine(
        &mut self,
        name: impl Into<ArcStr>,
        kind: SeriesKind,
        numerator: &str,
        denominator: &str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result {
        let num = self.column(numerator)?;
        let den = self.column(denominator)?;
        let values = num
            .numbers()
            .zip(den.numbers())
            .map(|pair| match pair {
                (Some(n), Some(d)) => Value::from(f(n, d)),
                _ => Value::Missing,
            })
            .collect();
        self.push_series(Series::new(name, kind, values))
    }

    /// Add a column `1000 * numerator / denominator`.
    pub fn with_rate_per_1000(
        mut self,
        name: impl Into<ArcStr>,
        numerator: &str,
        denominator: &str,
    ) -> Result<Self> {
        self.combine(name, SeriesKind::Rate, numerator, denominator, rate_per_1000)?;
        Ok(self)
    }

    /// Add a column `100 * numerator / denominator`.
    pub fn with_percentage(
        mut self,
        name: impl Into<ArcStr>,
        numerator: &str,
        denominator: &str,
    ) -> Result<Self> {
        self.combine(name, SeriesKind::Rate, numerator, denominator, percentage)?;
        Ok(self)
    }

    /// Add a column summing `columns` across each row, skipping missing cells.
    ///
    /// A row where every cell is missing sums to missing. The new column is a count if all the
    /// summed columns are.
    pub fn with_row_sum(mut self, name: impl Into<ArcStr>, columns: &[&str]) -> Result<Self> {
        let cols = columns
            .iter()
            .map(|c| self.column(c))
            .collect::<Result<Vec<_>>>()?;
        let kind = if cols.iter().all(|c| c.kind == SeriesKind::Count) {
            SeriesKind::Count
        } else {
            SeriesKind::Rate
        };
        let values = (0..self.months.len())
            .map(|row| {
                let cells = cols.iter().map(|c| &c.values[row]).filter(|v| !v.is_missing());
                let mut int_sum = Some(0i64);
                let mut sum = 0.0;
                let mut any = false;
                for cell in cells {
                    any = true;
                    int_sum = match (int_sum, cell) {
                        (Some(acc), Value::Int(v)) => Some(acc + v),
                        _ => None,
                    };
                    sum += cell.as_f64().unwrap_or(0.0);
                }
                match (any, int_sum) {
                    (false, _) => Value::Missing,
                    (true, Some(v)) => Value::Int(v),
                    (true, None) => Value::from(sum),
                }
            })
            .collect();
        self.push_series(Series::new(name, kind, values))?;
        Ok(self)
    }

    /// Smallest numeric cell in the table.
    pub fn min_value(&self) -> Option<f64> {
        self.numbers().fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
    }

    /// Largest numeric cell in the table.
    pub fn max_value(&self) -> Option<f64> {
        self.numbers().fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }

    fn numbers(&self) -> impl Iterator<Item = f64> + '_ {
        self.series.iter().flat_map(|s| s.numbers().flatten())
    }

    /// Write as CSV with a header row. Missing cells are written as empty fields.
    pub fn write_csv(&self, writer: impl io::Write) -> Result {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(
            std::iter::once(&*self.index_name).chain(self.series.iter().map(|s| &*s.name)),
        )?;
        for (row, month) in self.months.iter().enumerate() {
            writer.write_record(
                std::iter::once(month.to_string())
                    .chain(self.series.iter().map(|s| s.values[row].to_string())),
            )?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result {
        let path = path.as_ref();
        create_output(path)
            .and_then(|file| self.write_csv(file))
            .with_context(|| format!("writing table to \"{}\"", path.display()))?;
        event!(Level::INFO, "wrote \"{}\"", path.display());
        Ok(())
    }

    /// Read a table written by `write_csv`. The first column is the month index.
    ///
    /// Column kinds are inferred: `_stdev` and `mean` columns are statistics, columns holding
    /// only integers are counts, anything else is a rate.
    pub fn read_csv(reader: impl io::Read) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader.headers()?.clone();
        let index_name = headers.get(0).ok_or_else(|| format_err!("table has no columns"))?;
        let mut months = vec![];
        let mut columns: Vec<Vec<Value>> = vec![vec![]; headers.len() - 1];
        for record in reader.records() {
            let record = record?;
            let mut fields = record.iter();
            let month: Month = fields.next().unwrap_or_default().parse()?;
            months.push(month);
            for (col, field) in columns.iter_mut().zip(fields) {
                col.push(Value::parse(field));
            }
        }
        ensure!(
            months.windows(2).all(|w| w[0] < w[1]),
            "months must be unique and in ascending order"
        );
        let mut table = MonthlyTable::new(index_name, months);
        for (name, values) in headers.iter().skip(1).zip(columns) {
            let kind = if name.ends_with("_stdev") || name.starts_with("mean") {
                SeriesKind::Statistic
            } else if values.iter().all(|v| matches!(v, Value::Int(_) | Value::Missing)) {
                SeriesKind::Count
            } else {
                SeriesKind::Rate
            };
            table.push_series(Series::new(name, kind, values))?;
        }
        Ok(table)
    }

    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<MonthlyTable> {
            MonthlyTable::read_csv(fs::File::open(path)?)
        }

        let path = path.as_ref();
        inner(path).with_context(|| format!("loading table from \"{}\"", path.display()))
    }

    pub fn term_table(&self) -> term_data_table::Table<'_> {
        use term_data_table::{Cell, Row, Table};
        let mut table = Table::new().with_row(self.series.iter().fold(
            Row::new().with_cell(Cell::from(self.index_name.to_string())),
            |row, s| row.with_cell(Cell::from(s.name.to_string())),
        ));
        for (idx, month) in self.months.iter().enumerate() {
            table.add_row(self.series.iter().fold(
                Row::new().with_cell(Cell::from(month.label())),
                |row, s| row.with_cell(Cell::from(display_cell(&s.values[idx]))),
            ));
        }
        table
    }
}

fn display_cell(value: &Value) -> String {
    match value {
        Value::Float(v) => format!("{:.2}", v),
        Value::Missing => "-".into(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::{rate_per_1000, MonthlyTable, SeriesKind};
    use crate::{month::Month, value::Value};

    fn month(m: u32) -> Month {
        Month::new(2020, m).unwrap()
    }

    fn table() -> MonthlyTable {
        MonthlyTable::new("date", [month(1), month(2), month(3)])
            .with_series(
                "tested",
                SeriesKind::Count,
                vec![Value::Int(50), Value::Int(3), Value::Missing],
            )
            .unwrap()
            .with_series(
                "eligible",
                SeriesKind::Count,
                vec![Value::Int(1000), Value::Int(0), Value::Int(10)],
            )
            .unwrap()
    }

    #[test]
    fn rates() {
        assert_eq!(rate_per_1000(50.0, 1000.0), 50.0);
        assert!(rate_per_1000(5.0, 0.0).is_nan());

        let t = table().with_rate_per_1000("per_1000", "tested", "eligible").unwrap();
        let rate = &t.column("per_1000").unwrap().values;
        assert_eq!(rate[0], Value::Float(50.0));
        assert!(rate[1].is_missing());
        assert!(rate[2].is_missing());
        assert_eq!(t.column("per_1000").unwrap().kind, SeriesKind::Rate);
    }

    #[test]
    fn row_sum() {
        let t = table().with_row_sum("total", &["tested", "eligible"]).unwrap();
        assert_eq!(
            t.column("total").unwrap().values,
            [Value::Int(1050), Value::Int(3), Value::Int(10)]
        );
        assert!(table().with_row_sum("total", &["nope"]).is_err());
    }

    #[test]
    fn join_and_select() {
        let other = MonthlyTable::new("date", [month(3), month(4)])
            .with_series("other", SeriesKind::Count, vec![Value::Int(7), Value::Int(8)])
            .unwrap();
        let joined = table().join(&other).unwrap();
        assert_eq!(joined.months().len(), 4);
        assert_eq!(joined.value("other", month(3)), Some(&Value::Int(7)));
        assert_eq!(joined.value("other", month(1)), Some(&Value::Missing));
        assert_eq!(joined.value("tested", month(4)), Some(&Value::Missing));
        assert!(table().join(&table()).is_err());

        let selected = joined.select(&["other", "tested"]).unwrap();
        assert_eq!(selected.series()[0].name.as_ref(), "other");
        assert!(joined.select(&["missing"]).is_err());
    }

    #[test]
    fn csv() {
        let mut t = table().with_rate_per_1000("rate", "tested", "eligible").unwrap();
        t.rename("tested", "patients tested").unwrap();
        let mut out = vec![];
        t.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "date,patients tested,eligible,rate\n\
             2020-01-01,50,1000,50\n\
             2020-02-01,3,0,\n\
             2020-03-01,,10,\n"
        );
        let back = MonthlyTable::read_csv(text.as_bytes()).unwrap();
        assert_eq!(back.months(), t.months());
        assert_eq!(back.column("eligible").unwrap().kind, SeriesKind::Count);
        assert_eq!(back.value("patients tested", month(3)), Some(&Value::Missing));
    }

    #[test]
    fn extremes() {
        let t = table();
        assert_eq!(t.min_value(), Some(0.0));
        assert_eq!(t.max_value(), Some(1000.0));
        assert_eq!(MonthlyTable::new("date", []).min_value(), None);
    }
}
