//! Redraw a saved table with rates derived from its columns.
use crate::{
    chart::{self, Panel},
    config::StudyConfig,
    table::MonthlyTable,
    ArcStr,
};
use qu::ick_use::*;
use std::{fmt, path::PathBuf, str::FromStr};

/// A column to add: `name = 1000 * numerator / denominator`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateSpec {
    pub name: ArcStr,
    pub numerator: ArcStr,
    pub denominator: ArcStr,
}

impl RateSpec {
    pub fn new(
        name: impl Into<ArcStr>,
        numerator: impl Into<ArcStr>,
        denominator: impl Into<ArcStr>,
    ) -> Self {
        RateSpec {
            name: name.into(),
            numerator: numerator.into(),
            denominator: denominator.into(),
        }
    }
}

/// Parses `name=numerator/denominator`.
impl FromStr for RateSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, ratio) = s
            .split_once('=')
            .ok_or_else(|| format_err!("expected name=numerator/denominator, found \"{}\"", s))?;
        let (numerator, denominator) = ratio
            .split_once('/')
            .ok_or_else(|| format_err!("expected numerator/denominator, found \"{}\"", ratio))?;
        let (name, numerator, denominator) = (name.trim(), numerator.trim(), denominator.trim());
        ensure!(
            !name.is_empty() && !numerator.is_empty() && !denominator.is_empty(),
            "empty name or column in \"{}\"",
            s
        );
        Ok(RateSpec::new(name, numerator, denominator))
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}={}/{}", self.name, self.numerator, self.denominator)
    }
}

/// Add each rate to `table` and keep only the rates.
pub fn replot(table: &MonthlyTable, rates: &[RateSpec]) -> Result<MonthlyTable> {
    ensure!(!rates.is_empty(), "nothing to plot");
    let mut out = table.clone();
    for rate in rates {
        out = out
            .with_rate_per_1000(rate.name.clone(), &rate.numerator, &rate.denominator)
            .with_context(|| format!("computing \"{}\"", rate))?;
    }
    let names: Vec<&str> = rates.iter().map(|r| &*r.name).collect();
    out.select(&names)
}

/// What to redraw and where.
#[derive(Debug, Clone)]
pub struct Replot {
    pub input: PathBuf,
    pub output: PathBuf,
    pub title: String,
    pub ylabel: String,
    pub rates: Vec<RateSpec>,
}

impl Replot {
    /// The INR testing figure: patients tested and tests per 1000 patients on warfarin.
    pub fn inr_testing(config: &StudyConfig) -> Self {
        Replot {
            input: config.output("inr_testing.csv"),
            output: config.output("fig4a.png"),
            title: "(a) Number of patients with an INR test per month, and number of INRs, \
                    per thousand patients on Warfarin"
                .into(),
            ylabel: "Rate per 1000".into(),
            rates: vec![
                RateSpec::new("No of patients with INR", "patient_count", "denominator"),
                RateSpec::new("No of INRs", "test_count", "denominator"),
            ],
        }
    }
}

pub fn run(config: &StudyConfig, opts: &Replot) -> Result<MonthlyTable> {
    let table = MonthlyTable::load_csv(&opts.input)?;
    let rates = replot(&table, &opts.rates)?;
    let panel = Panel::new(rates.clone(), opts.title.clone()).with_ylabel(opts.ylabel.as_str());
    chart::render(&[panel], &config.chart, &opts.output)?;
    Ok(rates)
}
