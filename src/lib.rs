pub mod aggregate;
pub mod chart;
pub mod codelist;
pub mod cohort;
pub mod config;
pub mod disclosure;
pub mod events;
pub mod extract;
pub mod month;
mod range;
pub mod reports;
pub mod table;
pub mod units;
mod util;
pub mod value;

pub use anyhow::{Context, Error};
use qu::ick_use::*;
use serde::de::DeserializeOwned;
use std::{fs, io, path::Path, sync::Arc};

pub use crate::{
    aggregate::{aggregate, GroupKey, Measure, Summary},
    codelist::{Anticoagulant, AnticoagulantClassifier, Codelist},
    config::StudyConfig,
    disclosure::{round_down, suppress, Disclosure},
    events::{CodedEvent, CodedEvents, Issue, Issues, Repeat, Repeats},
    extract::Extract,
    month::{Month, MonthRange},
    range::{Range, RangeSet},
    table::{rate_per_1000, MonthlyTable, Series, SeriesKind},
    units::normalise_units,
    util::header,
    value::{Key, Value},
};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
pub type PatientId = u64;

/// Load typed rows from a CSV extract produced by the cohort extractor.
pub(crate) fn load_rows<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let path = path.as_ref();
    let reader = fs::File::open(path)
        .with_context(|| format!("unable to open extract \"{}\"", path.display()))?;
    read_rows(reader).with_context(|| format!("while loading \"{}\"", path.display()))
}

/// Like `load_rows`, but from any reader.
pub(crate) fn read_rows<T: DeserializeOwned>(reader: impl io::Read) -> Result<Vec<T>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
        .into_deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(Into::into)
}

/// Make sure `path` can be written to, creating parent directories and warning if we are about
/// to clobber something.
pub(crate) fn prepare_output(path: &Path) -> Result {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("could not create parent")?;
    }
    // it's easier to check for existence than to fail on `create_new` and retry.
    if util::path_exists(path)? {
        event!(
            Level::WARN,
            "overwriting existing file at \"{}\"",
            path.display()
        );
    }
    Ok(())
}

/// Create a file for output (see `prepare_output`).
pub(crate) fn create_output(path: &Path) -> Result<io::BufWriter<fs::File>> {
    prepare_output(path)?;
    Ok(io::BufWriter::new(fs::File::create(path)?))
}

pub fn check_extension(path: &Path, ext: &str) -> Result<()> {
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}
