//! Repeat prescriptions of warfarin and DOACs, and issues or repeats of both on the same day.
use crate::{
    aggregate::{aggregate, GroupKey, Measure},
    chart::Panel,
    cohort,
    config::StudyConfig,
    extract::Extract,
    month::MonthRange,
    reports::{disclose, load_issues, load_repeats, save_chart},
    table::MonthlyTable,
};
use qu::ick_use::*;

pub const TOTAL: &str = "total_patients";
pub const DOAC_REPEAT: &str = "doac_repeat";
pub const WARF_REPEAT: &str = "warf_repeat";
pub const STARTED_SAME_DAY: &str = "Repeats started same day";
pub const WARFARIN_ENDED: &str = "Warfarin ended same day";
pub const DOAC_ENDED: &str = "DOAC ended same day";
pub const ISSUED_SAME_DAY: &str = "Issued same day";
pub const ONE_ENDED: &str = "one ended same day";
pub const NOT_AFTER_WARFARIN: &str = "not previously taking warfarin";
pub const AFTER_WARFARIN: &str = "previously taking warfarin";

/// Patients issued an anticoagulant per month, and how many of them had each kind of repeat.
///
/// `extract` is the output of `cohort::repeats_by_issue_month`.
pub fn repeats_table(extract: &Extract, range: MonthRange) -> Result<MonthlyTable> {
    let flag = |name: &str, column: &str| Measure::distinct_count_where(name, "patient_id", column);
    aggregate(
        extract,
        &[GroupKey::month("month")],
        &[
            Measure::distinct_count(TOTAL, "patient_id"),
            flag(DOAC_REPEAT, "doac_repeat"),
            flag(WARF_REPEAT, "warf_repeat"),
            flag(STARTED_SAME_DAY, "started_same_date"),
            flag(WARFARIN_ENDED, "warfarin_cancelled"),
            flag(DOAC_ENDED, "doac_cancelled"),
        ],
    )?
    .fill_months("month", range)?
    .to_monthly()
}

/// Patients issued warfarin and a DOAC on the same day, per month.
///
/// `extract` is the output of `cohort::same_day_issues`. A patient with several such days in a
/// month counts once, and is counted in `one ended same day` if either issue ended on any of
/// them.
pub fn same_day_issues_table(extract: &Extract, range: MonthRange) -> Result<MonthlyTable> {
    aggregate(
        extract,
        &[GroupKey::month("month")],
        &[
            Measure::distinct_count(ISSUED_SAME_DAY, "patient_id"),
            Measure::distinct_count_where(ONE_ENDED, "patient_id", "one_ended_same_day"),
        ],
    )?
    .fill_months("month", range)?
    .to_monthly()
}

/// New DOAC repeats per month, split by whether the patient came off warfarin, with a `total`.
///
/// `extract` is the output of `cohort::new_doac_repeats`.
pub fn new_doac_table(extract: &Extract, range: MonthRange) -> Result<MonthlyTable> {
    aggregate(
        extract,
        &[GroupKey::month("month")],
        &[
            Measure::count_where(NOT_AFTER_WARFARIN, "not_after_warfarin"),
            Measure::count_where(AFTER_WARFARIN, "after_warfarin"),
        ],
    )?
    .fill_months("month", range)?
    .to_monthly()?
    .with_row_sum("total", &[NOT_AFTER_WARFARIN, AFTER_WARFARIN])
}

pub fn run(config: &StudyConfig) -> Result {
    let range = config.report_range()?;
    let classifier = config.classifier()?;
    let policy = &config.repeats.disclosure;
    let issues = load_issues(config)?;
    let repeats = load_repeats(config)?;

    let by_month = cohort::repeats_by_issue_month(&issues, &repeats, &classifier, range)?;
    let counts = disclose(
        &repeats_table(&by_month, range)?,
        policy,
        "Anticoagulant issues with a repeat in place",
    );
    let out = counts
        .select(&[TOTAL, DOAC_REPEAT, WARF_REPEAT])?
        .with_percentage("doac_repeat (%)", DOAC_REPEAT, TOTAL)?
        .with_percentage("warf_repeat (%)", WARF_REPEAT, TOTAL)?;
    out.save_csv(config.output("warf_doac_repeats.csv"))?;
    save_chart(
        config,
        &[Panel::new(
            out.select(&[TOTAL, DOAC_REPEAT, WARF_REPEAT])?,
            "Patients issued anticoagulants with a repeat in place",
        )
        .with_ylabel("Number of patients")],
        "warf_doac_repeats",
    )?;
    counts
        .select(&[STARTED_SAME_DAY, WARFARIN_ENDED, DOAC_ENDED])?
        .save_csv(config.output("same_day_repeats.csv"))?;

    let same_day = cohort::same_day_issues(&issues, &classifier, range)?;
    disclose(
        &same_day_issues_table(&same_day, range)?,
        policy,
        "Warfarin and DOAC issued on the same day",
    )
    .save_csv(config.output("same_day_issues.csv"))?;

    let lookback = config.repeats.lookback_months;
    let new = cohort::new_doac_repeats(&repeats, &classifier, range, lookback)?;
    let new = disclose(&new_doac_table(&new, range)?, policy, "New DOAC repeats")
        .with_percentage("previously taking warfarin (%)", AFTER_WARFARIN, "total")?;
    new.save_csv(config.output("doac_repeats.csv"))?;
    save_chart(
        config,
        &[Panel::new(
            new.select(&[NOT_AFTER_WARFARIN, AFTER_WARFARIN])?,
            "New DOAC repeats",
        )
        .with_ylabel("Number of patients")],
        "doac_repeats",
    )
}
