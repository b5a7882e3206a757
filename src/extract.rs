//! Untyped patient-level extracts.
//!
//! The cohort extractor writes one CSV per study definition, and the columns differ between
//! them. Reports that only need to group and count read them through `Extract`, which infers a
//! `Value` for every cell.
use crate::{value::Value, ArcStr, Result};
use qu::ick_use::*;
use std::{fs, io, ops::Deref, path::Path, sync::Arc};

/// A table of inferred cells with named columns.
#[derive(Debug, Clone)]
pub struct Extract {
    columns: Arc<[ArcStr]>,
    rows: Arc<Vec<Vec<Value>>>,
}

impl Extract {
    pub fn new<S: Into<ArcStr>>(columns: impl IntoIterator<Item = S>) -> Self {
        Extract {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Arc::new(vec![]),
        }
    }

    /// Add a row. Short rows are padded with missing values.
    pub fn push(&mut self, row: impl IntoIterator<Item = Value>) -> Result {
        let mut row: Vec<Value> = row.into_iter().collect();
        ensure!(
            row.len() <= self.columns.len(),
            "row has {} values but extract has {} columns",
            row.len(),
            self.columns.len()
        );
        row.resize(self.columns.len(), Value::Missing);
        Arc::make_mut(&mut self.rows).push(row);
        Ok(())
    }

    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<Extract> {
            let reader = fs::File::open(path)?;
            Extract::from_reader(reader)
        }

        let path = path.as_ref();
        inner(path).with_context(|| format!("loading extract from file \"{}\"", path.display()))
    }

    pub fn from_reader(reader: impl io::Read) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);
        let mut this = Extract::new(reader.headers()?.iter());
        for record in reader.records() {
            let record = record?;
            this.push(record.iter().map(Value::parse))
                .with_context(|| match record.position() {
                    Some(pos) => format!("at line {}", pos.line()),
                    None => "at unknown line".to_string(),
                })?;
        }
        Ok(this)
    }

    pub fn columns(&self) -> &[ArcStr] {
        &self.columns
    }

    /// Find the index of a column, erroring if it isn't there.
    pub fn column(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|col| &**col == name)
            .ok_or_else(|| {
                format_err!(
                    "no column named \"{}\" (available: {})",
                    name,
                    self.columns.join(", ")
                )
            })
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Value]> + '_ {
        self.rows.iter().map(Vec::as_slice)
    }
}

impl Deref for Extract {
    type Target = [Vec<Value>];
    fn deref(&self) -> &Self::Target {
        &self.rows
    }
}
