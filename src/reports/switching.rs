//! Patients on warfarin before a period, and how many switched to a DOAC during it.
use crate::{
    cohort::{self, SwitchOutcome, SwitchWindow},
    config::StudyConfig,
    reports::{load_events, load_issues, save_rows},
    util, ArcStr,
};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Headline numbers for one period.
///
/// Patient numbers are in thousands, and every number is given to 1 decimal place. Percentages
/// are missing when there is nobody to take them of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchingRow {
    pub period: String,
    pub year: i32,
    #[serde(rename = "baseline warfarin patients (thousands)")]
    pub baseline: f64,
    #[serde(rename = "switched (thousands)")]
    pub switched: f64,
    #[serde(rename = "switch (%)")]
    pub switched_pct: Option<f64>,
    #[serde(rename = "continued_warfarin (%)")]
    pub continued_pct: Option<f64>,
    #[serde(rename = "switched back (thousands)")]
    pub switched_back: f64,
    #[serde(rename = "switched back (% of switchers)")]
    pub switched_back_pct: Option<f64>,
    #[serde(rename = "continued_warfarin_had_inr (thousands)")]
    pub had_inr: f64,
    #[serde(rename = "had_inr (% of continued)")]
    pub had_inr_pct: Option<f64>,
    #[serde(rename = "continued_warfarin_had_ttr (thousands)")]
    pub had_ttr: f64,
    #[serde(rename = "had_ttr (% of continued)")]
    pub had_ttr_pct: Option<f64>,
    #[serde(rename = "continued_warfarin_had_high_inr (thousands)")]
    pub had_high_inr: f64,
    #[serde(rename = "had_high_inr (% of continued)")]
    pub had_high_inr_pct: Option<f64>,
}

impl SwitchingRow {
    pub fn new(period: &str, year: i32, outcomes: &[SwitchOutcome]) -> Self {
        let count = |f: fn(&SwitchOutcome) -> bool| outcomes.iter().filter(|o| f(o)).count();
        let baseline = outcomes.len();
        let switched = count(|o| o.switched);
        let continued = count(|o| o.continued_warfarin);
        let switched_back = count(|o| o.switched_back);
        let had_inr = count(|o| o.continued_warfarin && o.had_inr);
        let had_ttr = count(|o| o.continued_warfarin && o.had_ttr);
        let had_high_inr = count(|o| o.continued_warfarin && o.had_high_inr);
        SwitchingRow {
            period: period.into(),
            year,
            baseline: thousands(baseline),
            switched: thousands(switched),
            switched_pct: percent(switched, baseline),
            continued_pct: percent(continued, baseline),
            switched_back: thousands(switched_back),
            switched_back_pct: percent(switched_back, switched),
            had_inr: thousands(had_inr),
            had_inr_pct: percent(had_inr, continued),
            had_ttr: thousands(had_ttr),
            had_ttr_pct: percent(had_ttr, continued),
            had_high_inr: thousands(had_high_inr),
            had_high_inr_pct: percent(had_high_inr, continued),
        }
    }
}

/// Switchers by the chemical of their first DOAC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoacTypeRow {
    pub period: String,
    pub year: i32,
    pub chemical: ArcStr,
    /// Rounded to the nearest 10.
    pub patient_count: i64,
    /// Of the rounded counts, to 1 decimal place.
    #[serde(rename = "%")]
    pub percent: Option<f64>,
}

/// One row per chemical, most common first. Switchers whose DOAC has no chemical are left out.
pub fn doac_types(period: &str, year: i32, outcomes: &[SwitchOutcome]) -> Vec<DoacTypeRow> {
    let mut counts: BTreeMap<&ArcStr, usize> = BTreeMap::new();
    for chemical in outcomes.iter().filter_map(|o| o.first_doac.as_ref()) {
        *counts.entry(chemical).or_default() += 1;
    }
    let rounded: Vec<(&ArcStr, i64)> = counts
        .into_iter()
        .map(|(chemical, n)| (chemical, round_to_10(n)))
        .collect();
    let total: i64 = rounded.iter().map(|(_, n)| n).sum();
    let mut rows: Vec<DoacTypeRow> = rounded
        .into_iter()
        .map(|(chemical, n)| DoacTypeRow {
            period: period.into(),
            year,
            chemical: chemical.clone(),
            patient_count: n,
            percent: percent(n as usize, total as usize),
        })
        .collect();
    rows.sort_by(|a, b| b.patient_count.cmp(&a.patient_count));
    rows
}

fn thousands(n: usize) -> f64 {
    round1(n as f64 / 1000.0)
}

fn percent(n: usize, of: usize) -> Option<f64> {
    if of == 0 {
        None
    } else {
        Some(round1(100.0 * n as f64 / of as f64))
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round_to_10(n: usize) -> i64 {
    ((n as f64 / 10.0).round() * 10.0) as i64
}

pub fn run(config: &StudyConfig) -> Result<Vec<SwitchingRow>> {
    let classifier = config.classifier()?;
    let inr = config.codelists.inr.load("inr", &config.codelist_dir)?;
    let ttr = config.codelists.ttr.load("ttr", &config.codelist_dir)?;
    let issues = load_issues(config)?;
    let events = load_events(config, &[&inr, &ttr])?;
    let threshold = config.inr.high_inr_threshold;

    let mut runs: Vec<(&str, i32, SwitchWindow)> = vec![];
    for period in config.switching.periods.iter() {
        runs.push((period.name.as_str(), period.year(), period.window()));
        if config.switching.previous_year {
            runs.push((period.name.as_str(), period.year() - 1, period.year_before()?));
        }
    }

    let mut switchers = vec![];
    let mut types = vec![];
    for (name, year, window) in runs {
        let outcomes =
            cohort::switching(&issues, &events, &classifier, &inr, &ttr, window, threshold)?;
        switchers.push(SwitchingRow::new(name, year, &outcomes));
        types.extend(doac_types(name, year, &outcomes));
    }

    util::header("Switching from warfarin to DOACs");
    println!("{}", term_data_table::Table::from_serde(switchers.iter())?);
    save_rows(&switchers, config.output("doac_switchers.csv"))?;
    util::header("First DOAC of switchers");
    println!("{}", term_data_table::Table::from_serde(types.iter())?);
    save_rows(&types, config.output("doac_types.csv"))?;
    Ok(switchers)
}

#[cfg(test)]
mod test {
    use super::{doac_types, DoacTypeRow, SwitchingRow};
    use crate::{cohort::SwitchOutcome, load_rows, reports::save_rows};

    fn outcome(id: u64, switched: bool, continued: bool, first_doac: Option<&str>) -> SwitchOutcome {
        SwitchOutcome {
            patient_id: id,
            continued_warfarin: continued,
            switched,
            switched_back: false,
            had_inr: continued,
            had_high_inr: false,
            had_ttr: false,
            first_doac: first_doac.map(Into::into),
        }
    }

    #[test]
    fn headline_numbers() {
        let mut outcomes = vec![
            outcome(1, true, false, Some("Apixaban")),
            outcome(2, false, true, None),
            outcome(3, false, true, None),
            outcome(4, false, false, None),
        ];
        outcomes[0].switched_back = true;
        outcomes[1].had_ttr = true;
        let row = SwitchingRow::new("March-May", 2020, &outcomes);
        assert_eq!(row.baseline, 0.0);
        assert_eq!(row.switched_pct, Some(25.0));
        assert_eq!(row.continued_pct, Some(50.0));
        assert_eq!(row.switched_back_pct, Some(100.0));
        assert_eq!(row.had_inr_pct, Some(100.0));
        assert_eq!(row.had_ttr_pct, Some(50.0));
        assert_eq!(row.had_high_inr_pct, Some(0.0));

        let outcomes: Vec<_> = (0..1500).map(|id| outcome(id, id % 3 == 0, false, None)).collect();
        let row = SwitchingRow::new("June-Aug", 2019, &outcomes);
        assert_eq!(row.baseline, 1.5);
        assert_eq!(row.switched, 0.5);
        assert_eq!(row.switched_pct, Some(33.3));
        // no one continued on warfarin
        assert_eq!(row.had_inr_pct, None);
    }

    #[test]
    fn first_doacs() {
        let mut outcomes = vec![];
        for id in 0..26 {
            outcomes.push(outcome(id, true, false, Some("Apixaban")));
        }
        for id in 26..40 {
            outcomes.push(outcome(id, true, false, Some("Edoxaban")));
        }
        outcomes.push(outcome(40, true, false, None));
        outcomes.push(outcome(41, false, true, None));
        let rows = doac_types("March-May", 2020, &outcomes);
        assert_eq!(rows.len(), 2);
        assert_eq!(&*rows[0].chemical, "Apixaban");
        assert_eq!(rows[0].patient_count, 30);
        assert_eq!(rows[1].patient_count, 10);
        assert_eq!(rows[0].percent, Some(75.0));
        assert_eq!(rows[1].percent, Some(25.0));
    }

    #[test]
    fn csv_columns() {
        let outcomes = vec![outcome(1, true, false, Some("Apixaban"))];
        let rows = vec![SwitchingRow::new("March-May", 2020, &outcomes)];
        let mut writer = csv::Writer::from_writer(vec![]);
        writer.serialize(&rows[0]).unwrap();
        let out = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let header = out.lines().next().unwrap();
        assert!(header.starts_with("period,year,baseline warfarin patients (thousands),"));
        assert!(header.ends_with(",had_high_inr (% of continued)"));
        // nobody continued on warfarin
        assert!(out.lines().nth(1).unwrap().ends_with(",0.0,"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doac_types.csv");
        let types = doac_types("March-May", 2020, &outcomes);
        save_rows(&types, &path).unwrap();
        let back: Vec<DoacTypeRow> = load_rows(&path).unwrap();
        assert_eq!(back, types);
    }
}
