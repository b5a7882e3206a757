//! The study reports. Each writes its disclosed tables and charts to the output directory.
pub mod costing;
pub mod flow;
pub mod inr;
pub mod issues;
pub mod repeats;
pub mod replot;
pub mod switching;
pub mod ttr;

use crate::{
    chart::{self, Panel},
    codelist::Codelist,
    config::StudyConfig,
    disclosure::Disclosure,
    create_output,
    events::{CodedEvents, Issues, Repeats},
    table::{MonthlyTable, Series, SeriesKind},
    util,
    value::Value,
};
use qu::ick_use::*;
use serde::Serialize;
use std::path::Path;

pub(crate) fn load_issues(config: &StudyConfig) -> Result<Issues> {
    let issues = Issues::load(config.input(&config.inputs.issues))?;
    event!(Level::INFO, "loaded {} medication issues", issues.len());
    Ok(issues)
}

pub(crate) fn load_repeats(config: &StudyConfig) -> Result<Repeats> {
    let repeats = Repeats::load(config.input(&config.inputs.repeats))?;
    event!(Level::INFO, "loaded {} repeat prescriptions", repeats.len());
    Ok(repeats)
}

/// Coded events with a code in any of `codelists`.
pub(crate) fn load_events(config: &StudyConfig, codelists: &[&Codelist]) -> Result<CodedEvents> {
    let events = CodedEvents::load(config.input(&config.inputs.events))?;
    let events = events.filter(|evt| codelists.iter().any(|list| list.contains(&evt.code)));
    event!(Level::INFO, "loaded {} matching coded events", events.len());
    Ok(events)
}

/// Make sure the table has each of `names`, adding empty columns (0 for counts, missing
/// otherwise) for any it doesn't.
pub(crate) fn ensure_columns(table: &mut MonthlyTable, names: &[&str], kind: SeriesKind) -> Result {
    for name in names {
        if table.get(name).is_none() {
            let empty = match kind {
                SeriesKind::Count => Value::Int(0),
                _ => Value::Missing,
            };
            let values = vec![empty; table.months().len()];
            table.push_series(Series::new(*name, kind, values))?;
        }
    }
    Ok(())
}

/// Apply `policy` and print the result.
pub(crate) fn disclose(table: &MonthlyTable, policy: &Disclosure, title: &str) -> MonthlyTable {
    let out = policy.apply(table);
    event!(Level::DEBUG, "applied \"{}\" to {}", policy, title);
    util::header(title);
    println!("{}", out.term_table());
    out
}

/// Write rows to a CSV, with a header taken from their field names.
pub(crate) fn save_rows<T: Serialize>(rows: &[T], path: impl AsRef<Path>) -> Result {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_writer(create_output(path)?);
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .flush()
        .with_context(|| format!("could not write \"{}\"", path.display()))?;
    event!(Level::INFO, "wrote {} rows to \"{}\"", rows.len(), path.display());
    Ok(())
}

/// Render `panels` to `<output_dir>/<name>.png`, unless charts are turned off.
pub(crate) fn save_chart(config: &StudyConfig, panels: &[Panel], name: &str) -> Result {
    if !config.chart.enabled {
        event!(Level::DEBUG, "charts are off, not drawing \"{}\"", name);
        return Ok(());
    }
    chart::render(panels, &config.chart, config.output(format!("{}.png", name)))
}

#[cfg(test)]
mod test {
    use super::{disclose, ensure_columns};
    use crate::{
        chart::{self, ChartOptions, Panel},
        config::{CodelistSource, StudyConfig},
        disclosure::Disclosure,
        load_rows,
        month::Month,
        reports::{self, switching::SwitchingRow},
        table::{MonthlyTable, SeriesKind},
        value::Value,
    };
    use std::{fmt::Write, fs, path::Path};

    #[test]
    fn missing_columns() {
        let mut table = MonthlyTable::new("month", [Month::new(2020, 1).unwrap()])
            .with_series("a", SeriesKind::Count, vec![Value::Int(3)])
            .unwrap();
        ensure_columns(&mut table, &["a", "b"], SeriesKind::Count).unwrap();
        assert_eq!(table.value("a", Month::new(2020, 1).unwrap()), Some(&Value::Int(3)));
        assert_eq!(table.value("b", Month::new(2020, 1).unwrap()), Some(&Value::Int(0)));
    }

    #[test]
    fn disclosed_counts_are_scaled_for_charts() {
        let months = [
            Month::new(2020, 1).unwrap(),
            Month::new(2020, 2).unwrap(),
            Month::new(2020, 3).unwrap(),
        ];
        let table = MonthlyTable::new("month", months)
            .with_series(
                "patients",
                SeriesKind::Count,
                vec![Value::Int(3000), Value::Int(4), Value::Int(5000)],
            )
            .unwrap();
        let out = disclose(&table, &Disclosure::default(), "patients");
        assert_eq!(out.value("patients", months[1]), Some(&Value::Missing));

        // only disclosed values reach the chart, so the suppressed month doesn't stop the
        // rest being shown in thousands
        let plan = chart::plan(&Panel::new(out, "patients"), &ChartOptions::default()).unwrap();
        assert_eq!(plan.ylabel, "Number of patients (thousands)");
        let points: Vec<f64> = plan.lines[0]
            .segments
            .iter()
            .flatten()
            .map(|(_, y)| *y)
            .collect();
        assert_eq!(points, [3.0, 5.0]);
        assert_eq!(plan.lines[0].segments.len(), 2);
    }

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn codes(codes: &[&str]) -> CodelistSource {
        CodelistSource {
            codes: codes.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn run_reports() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut config = StudyConfig {
            data_dir: root.join("data"),
            codelist_dir: root.join("codelists"),
            output_dir: root.join("output"),
            report_start: Month::new(2020, 1).unwrap(),
            report_end: Month::new(2020, 6).unwrap(),
            ..StudyConfig::default()
        };
        config.chart.enabled = false;
        config.codelists.warfarin = codes(&["W1"]);
        config.codelists.doac = CodelistSource {
            file: Some("doac.csv".into()),
            category: Some("chemical".into()),
            ..Default::default()
        };
        config.codelists.inr = codes(&["INR"]);
        config.codelists.high_inr = codes(&["HIGH"]);
        config.validate().unwrap();
        write(&config.codelist_dir.join("doac.csv"), "id,chemical\nD1,Apixaban\n");

        // 7 patients on warfarin since February, 2 of whom switch in April; 1 on a DOAC
        let mut issues = String::from("patient_id,drug_code,issue_date\n");
        let mut events = String::from("patient_id,code,event_date,numeric_value\n");
        let mut repeats = String::from("patient_id,drug_code,start_date,end_date\n");
        for id in 1..=7 {
            writeln!(issues, "{},W1,2020-02-03", id).unwrap();
            writeln!(issues, "{},W1,2020-03-02", id).unwrap();
            writeln!(events, "{},INR,2020-03-10,2.5", id).unwrap();
            writeln!(repeats, "{},W1,2020-01-01,", id).unwrap();
        }
        for id in 1..=2 {
            writeln!(issues, "{},D1,2020-04-06", id).unwrap();
        }
        writeln!(issues, "8,D1,2020-03-05").unwrap();
        write(&config.input(&config.inputs.issues), &issues);
        write(&config.input(&config.inputs.events), &events);
        write(&config.input(&config.inputs.repeats), &repeats);
        let mut flow = String::from(
            "patient_id,age_18_110,warfarin_last_three_months,warfarin_6_months,\
             doac_last_three_months,warfarin_next_three_months,doac_next_three_months\n",
        );
        for id in 1..=12 {
            let doac = if id > 10 { 1 } else { 0 };
            writeln!(flow, "{},1,1,1,{},1,0", id, doac).unwrap();
        }
        write(&config.input(&config.inputs.flow_chart), &flow);

        let march = Month::new(2020, 3).unwrap();
        reports::issues::run(&config).unwrap();
        let issued = MonthlyTable::load_csv(config.output("warf_doac_issues.csv")).unwrap();
        assert_eq!(issued.months().len(), 6);
        assert_eq!(issued.value(reports::issues::WARFARIN, march), Some(&Value::Int(7)));
        assert_eq!(issued.value(reports::issues::TOTAL, march), Some(&Value::Int(8)));
        // a single DOAC patient is suppressed
        assert_eq!(issued.value(reports::issues::DOAC, march), Some(&Value::Missing));

        reports::inr::run(&config).unwrap();
        let testing = MonthlyTable::load_csv(config.output("inr_testing.csv")).unwrap();
        let tested = testing.value("patients tested", march).and_then(Value::as_f64);
        assert_eq!(tested, Some(1000.0));
        assert!(config.output("inr_value_check.csv").exists());

        reports::repeats::run(&config).unwrap();
        let repeats = MonthlyTable::load_csv(config.output("warf_doac_repeats.csv")).unwrap();
        assert_eq!(repeats.value(reports::repeats::WARF_REPEAT, march), Some(&Value::Int(7)));
        for file in ["same_day_issues.csv", "same_day_repeats.csv", "doac_repeats.csv"] {
            assert!(config.output(file).exists(), "{} not written", file);
        }

        let switchers = reports::switching::run(&config).unwrap();
        assert_eq!(switchers.len(), 4);
        let saved: Vec<SwitchingRow> = load_rows(config.output("doac_switchers.csv")).unwrap();
        assert_eq!(saved, switchers);
        assert_eq!(saved[0].period, "March-May");
        assert_eq!(saved[0].year, 2020);
        assert_eq!(saved[0].switched_pct, Some(28.6));
        // nobody on warfarin the year before
        assert_eq!(saved[1].year, 2019);
        assert_eq!(saved[1].switched_pct, None);

        let chart = reports::flow::run(&config).unwrap();
        assert_eq!(chart.rows()[0].1, Value::Int(10));
        let written = fs::read_to_string(config.output("flow_chart_data.csv")).unwrap();
        assert!(written.starts_with("criteria,patient_count\n"));
        // charts are off
        assert!(!config.output("warf_doac_issues.png").exists());
    }
}
