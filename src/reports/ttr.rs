//! Time in therapeutic range (TTR) for patients on warfarin.
use crate::{
    aggregate::{aggregate, GroupKey, Measure},
    chart::Panel,
    cohort,
    config::StudyConfig,
    disclosure::Disclosure,
    extract::Extract,
    month::MonthRange,
    range::RangeSet,
    reports::{disclose, ensure_columns, inr, load_events, load_issues, save_chart},
    table::{MonthlyTable, SeriesKind},
    value::Value,
};
use qu::ick_use::*;

const NOT_TESTED: &str = "not tested next month";
const TESTED: &str = "tested next month";

/// Mean TTR, test and patient counts per month.
pub fn overall_table(ttr: &Extract, range: MonthRange) -> Result<MonthlyTable> {
    aggregate(
        ttr,
        &[GroupKey::month("month")],
        &[
            Measure::mean("mean_value", "value"),
            Measure::stdev("mean_value_stdev", "value"),
            Measure::count_rows("test_count"),
            Measure::distinct_count("patient_count", "patient_id"),
        ],
    )?
    .fill_months("month", range)?
    .to_monthly()
}

/// Patient counts and mean TTR, split by whether the patient had another TTR the next month.
///
/// Returns the counts table and the means table (with `_stdev` columns).
pub fn next_month_tables(ttr: &Extract, range: MonthRange) -> Result<(MonthlyTable, MonthlyTable)> {
    let summary = aggregate(
        ttr,
        &[GroupKey::month("month"), GroupKey::column("tested_next_month")],
        &[
            Measure::distinct_count("patient_count", "patient_id"),
            Measure::mean("mean_value", "value"),
            Measure::stdev("mean_value_stdev", "value"),
        ],
    )?
    .fill_months("month", range)?;

    let pivot = |measure: &str, kind: SeriesKind, suffix: &str| -> Result<MonthlyTable> {
        let mut table = if summary.is_empty() {
            MonthlyTable::new("month", range)
        } else {
            summary.unstack("month", "tested_next_month", measure)?
        };
        ensure_columns(&mut table, &["0", "1"], kind)?;
        table.rename("0", format!("{}{}", NOT_TESTED, suffix))?;
        table.rename("1", format!("{}{}", TESTED, suffix))?;
        Ok(table)
    };
    let counts = pivot("patient_count", SeriesKind::Count, "")?;
    let means = pivot("mean_value", SeriesKind::Statistic, "")?
        .join(&pivot("mean_value_stdev", SeriesKind::Statistic, "_stdev")?)?
        .select(&[
            NOT_TESTED,
            &format!("{}_stdev", NOT_TESTED),
            TESTED,
            &format!("{}_stdev", TESTED),
        ])?;
    Ok((counts, means))
}

/// Percent of patients tested again the next month, per TTR band.
///
/// Counts go through `policy` before the percentages are taken.
pub fn band_table(ttr: &Extract, range: MonthRange, policy: &Disclosure) -> Result<MonthlyTable> {
    let bands = RangeSet::ttr_bands();
    let labels: Vec<&str> = bands.labels().collect();
    let summary = aggregate(
        ttr,
        &[GroupKey::month("month"), GroupKey::column("ttr_band")],
        &[
            Measure::distinct_count("total", "patient_id"),
            Measure::distinct_count_where("tested", "patient_id", "tested_next_month"),
        ],
    )?
    .fill_months("month", range)?;
    let pivot = |measure: &str| -> Result<MonthlyTable> {
        let mut table = if summary.is_empty() {
            MonthlyTable::new("month", range)
        } else {
            summary.unstack("month", "ttr_band", measure)?
        };
        ensure_columns(&mut table, &labels, SeriesKind::Count)?;
        Ok(policy.apply(&table))
    };
    let total = pivot("total")?;
    let tested = pivot("tested")?;

    let mut out = MonthlyTable::new("month", range);
    for label in labels.iter() {
        let both = MonthlyTable::new("month", range)
            .with_series("tested", SeriesKind::Count, tested.column(label)?.values.clone())?
            .with_series("total", SeriesKind::Count, total.column(label)?.values.clone())?
            .with_percentage("percent", "tested", "total")?;
        let values = both.column("percent")?.values.clone();
        out = out.with_series(format!("{}% TTR", label), SeriesKind::Rate, values)?;
    }
    Ok(out)
}

/// Blank `columns` in months where `count` was suppressed.
fn blank_suppressed(
    stats: &mut MonthlyTable,
    counts: &MonthlyTable,
    count: &str,
    columns: &[&str],
) -> Result {
    let suppressed: Vec<bool> = counts
        .column(count)?
        .values
        .iter()
        .map(Value::is_missing)
        .collect();
    for series in stats.series_mut() {
        if columns.contains(&&*series.name) {
            for (value, blank) in series.values.iter_mut().zip(suppressed.iter()) {
                if *blank {
                    *value = Value::Missing;
                }
            }
        }
    }
    Ok(())
}

pub fn run(config: &StudyConfig) -> Result {
    let range = MonthRange::new(config.ttr.first_month, config.report_end)?;
    let classifier = config.classifier()?;
    let ttr_codes = config.codelists.ttr.load("ttr", &config.codelist_dir)?;
    let inr_codes = config.codelists.inr.load("inr", &config.codelist_dir)?;
    let issues = load_issues(config)?;
    let events = load_events(config, &[&ttr_codes, &inr_codes])?;
    let ttr_events = events.filter_by_codelist(&ttr_codes);
    let ttr = cohort::ttr_tests(
        &issues,
        &ttr_events,
        &classifier,
        range,
        config.ttr.lookback_months,
    )?;
    let policy = &config.ttr.disclosure;

    // patients on warfarin each month
    let warfarin = inr::monitoring_counts(
        &issues,
        &events,
        &inr_codes,
        &classifier,
        range,
        &config.inr,
    )?;
    let denominator = warfarin.select(&["denominator"])?;

    let overall = overall_table(&ttr, range)?.join(&denominator)?;
    let mut overall = disclose(&overall, policy, "TTR");
    let counts = overall.clone();
    blank_suppressed(
        &mut overall,
        &counts,
        "patient_count",
        &["mean_value", "mean_value_stdev"],
    )?;
    let overall = overall
        .with_rate_per_1000("No of patients with TTR", "patient_count", "denominator")?
        .with_rate_per_1000("No of TTRs", "test_count", "denominator")?;
    overall.save_csv(config.output("ttr.csv"))?;
    save_chart(
        config,
        &[
            Panel::new(
                overall.select(&["No of patients with TTR", "No of TTRs"])?,
                "(a) Number of patients with a TTR recorded per month, and number of TTRs \
                 recorded, per thousand patients on Warfarin",
            )
            .with_ylabel("Rate per 1000"),
            Panel::new(
                overall.select(&["mean_value"])?,
                "(b) Mean INR TTR for warfarin patients",
            )
            .with_ylabel("Mean TTR value")
            .with_ymin(config.ttr.mean_ymin),
        ],
        "ttr",
    )?;

    let (counts, means) = next_month_tables(&ttr, range)?;
    let counts = disclose(&counts, policy, "TTR, by testing the next month");
    let mut means = means;
    for column in [NOT_TESTED, TESTED] {
        let stdev = format!("{}_stdev", column);
        blank_suppressed(&mut means, &counts, column, &[column, stdev.as_str()])?;
    }
    let mut split = counts.clone();
    for series in means.series() {
        let mut series = series.clone();
        series.name = format!("mean TTR, {}", series.name).into();
        split.push_series(series)?;
    }
    split.save_csv(config.output("ttr_tested_next_month.csv"))?;
    save_chart(
        config,
        &[
            Panel::new(
                counts,
                "Count of patients tested each month, split by whether or not they were tested \
                 in following month",
            ),
            Panel::new(
                means,
                "Mean TTR of patients tested each given month, split by whether or not they \
                 were tested in following month",
            )
            .with_ylabel("Mean TTR value"),
        ],
        "ttr_tested_next_month",
    )?;

    let bands = band_table(&ttr, range, policy)?;
    bands.save_csv(config.output("ttr_bands.csv"))?;
    save_chart(
        config,
        &[Panel::new(
            bands,
            "Percent of patients with a TTR recorded each month who had TTR recorded again \
             next month, split by TTR result range",
        )
        .with_ylabel("Percent")],
        "ttr_bands",
    )
}

#[cfg(test)]
mod test {
    use super::{band_table, blank_suppressed, next_month_tables, overall_table};
    use crate::{
        disclosure::Disclosure,
        extract::Extract,
        month::{Month, MonthRange},
        value::Value,
    };

    fn month(m: u32) -> Month {
        Month::new(2020, m).unwrap()
    }

    fn ttr() -> Extract {
        let mut ex = Extract::new(["patient_id", "month", "value", "ttr_band", "tested_next_month"]);
        let rows: [(i64, u32, f64, &str, bool); 5] = [
            (1, 2, 65.0, "60-<70", true),
            (2, 2, 75.0, "70-<80", false),
            (3, 2, 95.0, "90-100", true),
            (4, 2, 92.0, "90-100", false),
            (1, 3, 55.0, "50-<60", false),
        ];
        for (id, m, value, band, next) in rows {
            ex.push([
                Value::Int(id),
                Value::from(month(m)),
                Value::Float(value),
                Value::from(band),
                Value::from(next),
            ])
            .unwrap();
        }
        ex
    }

    fn range() -> MonthRange {
        MonthRange::new(month(1), month(3)).unwrap()
    }

    #[test]
    fn overall() {
        let t = overall_table(&ttr(), range()).unwrap();
        assert_eq!(t.value("mean_value", month(2)), Some(&Value::Float(81.75)));
        assert_eq!(t.value("test_count", month(2)), Some(&Value::Int(4)));
        assert_eq!(t.value("patient_count", month(1)), Some(&Value::Int(0)));
        assert_eq!(t.value("mean_value", month(1)), Some(&Value::Missing));
        // a single result has no standard deviation
        assert_eq!(t.value("mean_value_stdev", month(3)), Some(&Value::Missing));
    }

    #[test]
    fn next_month() {
        let (counts, means) = next_month_tables(&ttr(), range()).unwrap();
        assert_eq!(
            counts.value("tested next month", month(2)),
            Some(&Value::Int(2))
        );
        assert_eq!(
            counts.value("not tested next month", month(3)),
            Some(&Value::Int(1))
        );
        assert_eq!(
            means.value("tested next month", month(2)),
            Some(&Value::Float(80.0))
        );
        assert!(means.get("tested next month_stdev").is_some());
        assert_eq!(means.series().len(), 4);

        let suppressed = Disclosure::default().apply(&counts);
        let mut blanked = means.clone();
        blank_suppressed(
            &mut blanked,
            &suppressed,
            "tested next month",
            &["tested next month", "tested next month_stdev"],
        )
        .unwrap();
        assert_eq!(blanked.value("tested next month", month(2)), Some(&Value::Missing));
        assert_eq!(
            blanked.value("not tested next month", month(2)),
            means.value("not tested next month", month(2))
        );
    }

    #[test]
    fn bands() {
        let policy = Disclosure::Suppress { low: 0, high: 0 };
        let t = band_table(&ttr(), range(), &policy).unwrap();
        assert_eq!(t.series().len(), 6);
        assert_eq!(t.value("90-100% TTR", month(2)), Some(&Value::Float(50.0)));
        assert_eq!(t.value("60-<70% TTR", month(2)), Some(&Value::Float(100.0)));
        // nobody in the band
        assert_eq!(t.value("0-<50% TTR", month(2)), Some(&Value::Missing));
    }
}
