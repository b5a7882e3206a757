//! Patients with warfarin or a DOAC issued, per month.
use crate::{
    aggregate::{aggregate, GroupKey, Measure},
    chart::Panel,
    cohort,
    config::StudyConfig,
    extract::Extract,
    month::MonthRange,
    reports::{disclose, ensure_columns, load_issues, save_chart},
    table::{MonthlyTable, SeriesKind},
};
use qu::ick_use::*;

pub const WARFARIN: &str = "warf_patients";
pub const DOAC: &str = "doac_patients";
pub const TOTAL: &str = "total_anticoag_patients";

/// Distinct patients per month with warfarin, with a DOAC, and with either.
///
/// `extract` is the output of `cohort::anticoagulant_issues`. If a denominator table is given
/// (with a single column), it is joined as `denominator`.
pub fn issues_table(
    extract: &Extract,
    range: MonthRange,
    denominator: Option<&MonthlyTable>,
) -> Result<MonthlyTable> {
    let by_class = aggregate(
        extract,
        &[GroupKey::month("issue_date"), GroupKey::column("anticoag")],
        &[Measure::distinct_count("patients", "patient_id")],
    )?
    .fill_months("issue_date", range)?;
    let mut by_class = if by_class.is_empty() {
        MonthlyTable::new("issue_date", range)
    } else {
        by_class.unstack("issue_date", "anticoag", "patients")?
    };
    ensure_columns(&mut by_class, &["warfarin", "DOAC"], SeriesKind::Count)?;
    by_class.rename("warfarin", WARFARIN)?;
    by_class.rename("DOAC", DOAC)?;

    let total = aggregate(
        extract,
        &[GroupKey::month("issue_date")],
        &[Measure::distinct_count(TOTAL, "patient_id")],
    )?
    .fill_months("issue_date", range)?
    .to_monthly()?;

    let mut table = by_class.select(&[WARFARIN, DOAC])?.join(&total)?;
    if let Some(denominator) = denominator {
        let column = match denominator.series() {
            [only] => only.name.clone(),
            _ => bail!("the denominator table should have exactly one column"),
        };
        let mut denominator = denominator.select(&[&*column])?;
        denominator.rename(&column, "denominator")?;
        table = table.join(&denominator)?.filter_months(range);
    }
    Ok(table)
}

pub fn run(config: &StudyConfig) -> Result {
    let range = config.report_range()?;
    let classifier = config.classifier()?;
    let issues = load_issues(config)?;
    let extract = cohort::anticoagulant_issues(&issues, &classifier, range)?;
    let denominator = match &config.issues.denominator {
        Some(d) => Some(
            MonthlyTable::load_csv(config.input(&d.file))?.select(&[d.column.as_str()])?,
        ),
        None => None,
    };

    let table = issues_table(&extract, range, denominator.as_ref())?;
    let mut out = disclose(
        &table,
        &config.issues.disclosure,
        "Patients with warfarin or DOAC issued",
    );
    if denominator.is_some() {
        out = out.with_rate_per_1000("anticoag_per_1000", TOTAL, "denominator")?;
    }
    out.save_csv(config.output("warf_doac_issues.csv"))?;

    let panel = Panel::new(
        out.select(&[WARFARIN, DOAC, TOTAL])?,
        "Warfarin and DOAC prescriptions issued",
    );
    save_chart(config, &[panel], "warf_doac_issues")
}
