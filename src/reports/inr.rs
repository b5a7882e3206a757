//! INR testing of patients on warfarin, and high INR results.
use crate::{
    aggregate::{aggregate, GroupKey, Measure},
    chart::Panel,
    codelist::{AnticoagulantClassifier, Codelist},
    cohort,
    config::{InrConfig, StudyConfig},
    events::{CodedEvents, Issues},
    extract::Extract,
    month::{Month, MonthRange},
    reports::{disclose, ensure_columns, load_events, load_issues, save_chart},
    table::{MonthlyTable, SeriesKind},
};
use qu::ick_use::*;
use statrs::statistics::Statistics;
use std::fmt;

/// Per-month counts from the INR monitoring cohort.
///
/// Columns: `test_count`, `patient_count` (patients tested), `denominator` (patients on
/// warfarin), `patient_count_over_8`, `patient_count_equal_8`.
pub fn monitoring_table(cohort: &Extract, range: MonthRange) -> Result<MonthlyTable> {
    aggregate(
        cohort,
        &[GroupKey::month("month")],
        &[
            Measure::sum("test_count", "test_count"),
            Measure::distinct_count_where("patient_count", "patient_id", "tested"),
            Measure::distinct_count("denominator", "patient_id"),
            Measure::distinct_count_where("patient_count_over_8", "patient_id", "high_over_8"),
            Measure::distinct_count_where("patient_count_equal_8", "patient_id", "high_equal_8"),
        ],
    )?
    .fill_months("month", range)?
    .to_monthly()
}

/// `monitoring_table` for the patients on warfarin in `issues`.
///
/// Only events with a code in `inr` count as tests; anything else in `events` (such as high INR
/// codes) is ignored.
pub fn monitoring_counts(
    issues: &Issues,
    events: &CodedEvents,
    inr: &Codelist,
    classifier: &AnticoagulantClassifier,
    range: MonthRange,
    config: &InrConfig,
) -> Result<MonthlyTable> {
    let tests = events.filter_by_codelist(inr);
    let cohort = cohort::inr_monitoring(
        issues,
        &tests,
        classifier,
        range,
        config.lookback_months,
        config.high_inr_threshold,
    )?;
    monitoring_table(&cohort, range)
}

/// Testing rates per 1000 patients on warfarin.
pub fn testing_rates(counts: &MonthlyTable) -> Result<MonthlyTable> {
    counts
        .select(&["test_count", "patient_count", "denominator"])?
        .with_rate_per_1000("patients tested", "patient_count", "denominator")?
        .with_rate_per_1000("total tests", "test_count", "denominator")
}

/// High INR rates for one count column, per 1000 warfarin patients, tests, and patients tested.
pub fn high_inr_rates(counts: &MonthlyTable, count: &str) -> Result<MonthlyTable> {
    counts
        .clone()
        .with_rate_per_1000("per 1000 warfarin pts", count, "denominator")?
        .with_rate_per_1000("per 1000 INR tests", count, "test_count")?
        .with_rate_per_1000("per 1000 pts tested", count, "patient_count")?
        .select(&["per 1000 warfarin pts", "per 1000 INR tests", "per 1000 pts tested"])
}

/// Patients and records per month for each class of INR result, and for high INR codes.
///
/// `values` comes from `cohort::inr_values`. Columns are `<class> (patients)` then
/// `<class> (records)`.
pub fn value_check_table(values: &Extract, range: MonthRange, threshold: f64) -> Result<MonthlyTable> {
    let classes = cohort::inr_value_classes(threshold);
    let labels: Vec<&str> = classes.iter().map(String::as_str).collect();
    let summary = aggregate(
        values,
        &[GroupKey::month("month"), GroupKey::column("classification")],
        &[
            Measure::distinct_count("patients", "patient_id"),
            Measure::count_rows("records"),
        ],
    )?
    .fill_months("month", range)?;

    let mut out = MonthlyTable::new("month", range);
    for measure in ["patients", "records"] {
        let mut table = if summary.is_empty() {
            MonthlyTable::new("month", range)
        } else {
            summary.unstack("month", "classification", measure)?
        };
        ensure_columns(&mut table, &labels, SeriesKind::Count)?;
        for label in labels.iter() {
            let values = table.column(label)?.values.clone();
            out = out.with_series(format!("{} ({})", label, measure), SeriesKind::Count, values)?;
        }
    }
    Ok(out)
}

/// Mean monthly testing rate before and after the policy month.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSummary {
    pub pre: f64,
    pub post: f64,
}

impl RateSummary {
    /// Compare the mean of `column` in months up to and including `policy_month` with the mean
    /// after it. `None` if either side has no values.
    pub fn new(table: &MonthlyTable, column: &str, policy_month: Month) -> Result<Option<Self>> {
        let series = table.column(column)?;
        let mut pre = vec![];
        let mut post = vec![];
        for (month, value) in table.months().iter().zip(series.numbers()) {
            if let Some(v) = value {
                if *month <= policy_month {
                    pre.push(v);
                } else {
                    post.push(v);
                }
            }
        }
        if pre.is_empty() || post.is_empty() {
            return Ok(None);
        }
        Ok(Some(RateSummary {
            pre: pre.iter().mean(),
            post: post.iter().mean(),
        }))
    }

    pub fn difference(&self) -> f64 {
        self.pre - self.post
    }

    /// Reduction as a percentage of the earlier rate.
    pub fn percent_reduction(&self) -> f64 {
        100.0 * self.difference() / self.pre
    }
}

impl fmt::Display for RateSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "Mean testing rate before the directive: {:.1} patients tested per 1000 eligible patients per month",
            self.pre
        )?;
        writeln!(
            f,
            "Mean testing rate after the directive: {:.1} patients tested per 1000 eligible patients per month",
            self.post
        )?;
        write!(
            f,
            "Difference in monthly rate: {:.1} patients per 1000 eligible patients ({:.1}% reduction)",
            self.difference(),
            self.percent_reduction()
        )
    }
}

pub fn run(config: &StudyConfig) -> Result<Option<RateSummary>> {
    let range = config.report_range()?;
    let classifier = config.classifier()?;
    let inr = config.codelists.inr.load("inr", &config.codelist_dir)?;
    let high_inr = config.codelists.high_inr.load("high_inr", &config.codelist_dir)?;
    let issues = load_issues(config)?;
    let events = load_events(config, &[&inr, &high_inr])?;

    let counts = monitoring_counts(&issues, &events, &inr, &classifier, range, &config.inr)?;
    let counts = disclose(&counts, &config.inr.disclosure, "INR testing");

    let testing = testing_rates(&counts)?;
    testing.save_csv(config.output("inr_testing.csv"))?;
    counts
        .select(&[
            "patient_count_over_8",
            "patient_count_equal_8",
            "denominator",
        ])?
        .save_csv(config.output("high_inr.csv"))?;

    save_chart(
        config,
        &[Panel::new(
            testing.select(&["total tests", "patients tested"])?,
            "Monthly rate of INR testing per 1000 patients on warfarin",
        )
        .with_ylabel("Rate per 1000")],
        "inr_testing",
    )?;
    let ylabel = "Patients with High INRs per 1000 patients/tests";
    save_chart(
        config,
        &[
            Panel::new(
                high_inr_rates(&counts, "patient_count_over_8")?,
                "Monthly rate of high INRs (over 8) recorded in warfarin patients",
            )
            .with_ylabel(ylabel),
            Panel::new(
                high_inr_rates(&counts, "patient_count_equal_8")?,
                "Monthly rate of high INRs (equal to 8) recorded in warfarin patients",
            )
            .with_ylabel(ylabel),
        ],
        "high_inr",
    )?;

    let check_range = MonthRange::new(config.inr.value_check_from, config.report_end)?;
    let threshold = config.inr.high_inr_threshold;
    let values = cohort::inr_values(&events, &inr, &high_inr, check_range, threshold)?;
    let check = value_check_table(&values, check_range, threshold)?;
    disclose(&check, &config.inr.disclosure, "INR values and high INR codes")
        .save_csv(config.output("inr_value_check.csv"))?;

    let summary = RateSummary::new(
        &testing,
        "patients tested",
        Month::of(config.chart.policy_date),
    )?;
    match &summary {
        Some(summary) => println!("\n{}", summary),
        None => event!(
            Level::WARN,
            "not enough months either side of the directive to compare testing rates"
        ),
    }
    Ok(summary)
}
