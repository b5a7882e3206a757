//! Turning event-level extracts into the patient-level rows the reports aggregate.
use crate::{
    codelist::{Anticoagulant, AnticoagulantClassifier, Codelist},
    events::{CodedEvents, Issue, Issues, Repeat, Repeats},
    extract::Extract,
    month::{Month, MonthRange},
    range::RangeSet,
    value::Value,
    ArcStr, PatientId, Result,
};
use chrono::NaiveDate;
use noisy_float::prelude::*;
use qu::ick_use::*;
use std::collections::{BTreeMap, BTreeSet};

fn patient(id: PatientId) -> Value {
    Value::Int(id as i64)
}

/// One row per patient, issue date and class of anticoagulant, for issues within `range`.
///
/// Columns: `patient_id`, `anticoag` (`warfarin` or `DOAC`), `chemical` (where the codelist
/// has one), `issue_date`. Issues of codes in neither codelist are dropped.
pub fn anticoagulant_issues(
    issues: &Issues,
    classifier: &AnticoagulantClassifier,
    range: MonthRange,
) -> Result<Extract> {
    let mut seen = BTreeSet::new();
    let mut out = Extract::new(["patient_id", "anticoag", "chemical", "issue_date"]);
    for issue in issues.iter() {
        if !range.contains_date(issue.issue_date) {
            continue;
        }
        let class = match classifier.classify(&issue.drug_code) {
            Some(class) => class,
            None => continue,
        };
        let chemical = classifier.chemical(&issue.drug_code).cloned();
        if !seen.insert((issue.patient_id, issue.issue_date, class, chemical.clone())) {
            continue;
        }
        out.push([
            patient(issue.patient_id),
            Value::from(class.to_string().as_str()),
            chemical.map(Value::from).unwrap_or_default(),
            Value::from(issue.issue_date),
        ])?;
    }
    event!(
        Level::DEBUG,
        "{} of {} issues were anticoagulants in range",
        out.len(),
        issues.len()
    );
    Ok(out)
}

/// Anticoagulant issue dates for one patient, by class.
#[derive(Default)]
struct PatientIssues {
    warfarin: Vec<NaiveDate>,
    doac: Vec<NaiveDate>,
}

impl PatientIssues {
    fn collect(issues: &Issues, classifier: &AnticoagulantClassifier) -> BTreeMap<PatientId, Self> {
        let mut out: BTreeMap<PatientId, PatientIssues> = BTreeMap::new();
        for issue in issues.iter() {
            let entry = out.entry(issue.patient_id).or_default();
            match classifier.classify(&issue.drug_code) {
                Some(Anticoagulant::Warfarin) => entry.warfarin.push(issue.issue_date),
                Some(Anticoagulant::Doac) => entry.doac.push(issue.issue_date),
                None => (),
            }
        }
        out.retain(|_, p| !p.warfarin.is_empty());
        out
    }

    /// Whether the patient counts as being on warfarin for tests in `month`.
    ///
    /// They need a warfarin issue in `[month - lookback, month + 1)`, and no DOAC issued in that
    /// window after the latest of those warfarin issues (i.e. they haven't switched).
    fn on_warfarin(&self, month: Month, lookback: u32) -> bool {
        let from = month.add(-(lookback as i32)).first_day();
        let to = month.succ().first_day();
        let in_window = |d: &&NaiveDate| from <= **d && **d < to;
        let latest_warfarin = match self.warfarin.iter().filter(in_window).max() {
            Some(d) => *d,
            None => return false,
        };
        !self.doac.iter().filter(in_window).any(|d| *d > latest_warfarin)
    }

    /// Whether there was a warfarin issue between `lookback` months before `month` and the end
    /// of `month`.
    ///
    /// Issues after `month` don't count: a later first prescription doesn't mean the patient
    /// was taking warfarin when the TTR was recorded.
    fn warfarin_recently(&self, month: Month, lookback: u32) -> bool {
        self.warfarin.iter().any(|d| {
            let since = month.months_since(Month::of(*d));
            (0..=lookback as i32).contains(&since)
        })
    }
}

/// INR testing per patient per month, for patients on warfarin.
///
/// `tests` should already be limited to INR codes. Every eligible patient gets a row for every
/// month in `range` where they are eligible, even with no tests, so they are counted in the
/// denominator.
///
/// Columns: `month`, `patient_id`, `test_count`, `tested`, `high_over_8`, `high_equal_8`. A
/// patient's INR is high on a day when the largest value recorded that day is over (or equal
/// to) `threshold`.
pub fn inr_monitoring(
    issues: &Issues,
    tests: &CodedEvents,
    classifier: &AnticoagulantClassifier,
    range: MonthRange,
    lookback: u32,
    threshold: f64,
) -> Result<Extract> {
    let patients = PatientIssues::collect(issues, classifier);
    let mut out = Extract::new([
        "month",
        "patient_id",
        "test_count",
        "tested",
        "high_over_8",
        "high_equal_8",
    ]);
    for (id, issued) in patients.iter() {
        for month in range {
            if !issued.on_warfarin(month, lookback) {
                continue;
            }
            let mut count = 0;
            let mut daily_max: BTreeMap<NaiveDate, f64> = BTreeMap::new();
            for test in tests.for_patient(*id) {
                if Month::of(test.event_date) != month {
                    continue;
                }
                count += 1;
                if let Some(v) = test.numeric_value {
                    let max = daily_max.entry(test.event_date).or_insert(v);
                    *max = max.max(v);
                }
            }
            let over = daily_max.values().any(|v| *v > threshold);
            let equal = daily_max.values().any(|v| *v == threshold);
            out.push([
                Value::from(month),
                patient(*id),
                Value::Int(count),
                Value::from(count > 0),
                Value::from(over),
                Value::from(equal),
            ])?;
        }
    }
    event!(
        Level::DEBUG,
        "{} patient-months on warfarin from {} patients",
        out.len(),
        patients.len()
    );
    Ok(out)
}

/// Label for a high INR code, as opposed to an INR result with a value.
pub const HIGH_INR_CODE: &str = "high INR code";

/// The labels `inr_value_class` can give, in reporting order.
pub fn inr_value_classes(threshold: f64) -> Vec<String> {
    vec![
        format!("under {}", threshold),
        format!("{} exactly", threshold),
        format!("over {}", threshold),
        "no value".into(),
        HIGH_INR_CODE.into(),
    ]
}

/// Where an INR result falls against `threshold`.
///
/// Missing values, and the placeholder values 0 and -1, are `no value`. Values over 100 are not
/// plausible results and give `None`.
pub fn inr_value_class(value: Option<f64>, threshold: f64) -> Option<String> {
    let class = match value {
        Some(v) if v > 100.0 => return None,
        Some(v) if v > threshold => format!("over {}", threshold),
        Some(v) if v == threshold => format!("{} exactly", threshold),
        Some(v) if v == 0.0 || v == -1.0 => "no value".into(),
        Some(_) => format!("under {}", threshold),
        None => "no value".into(),
    };
    Some(class)
}

/// INR records and high INR codes within `range`, classified by `inr_value_class`.
///
/// Columns: `month`, `patient_id`, `classification`. A code in both codelists is an INR.
pub fn inr_values(
    events: &CodedEvents,
    inr: &Codelist,
    high_inr: &Codelist,
    range: MonthRange,
    threshold: f64,
) -> Result<Extract> {
    let mut out = Extract::new(["month", "patient_id", "classification"]);
    for evt in events.iter() {
        let month = Month::of(evt.event_date);
        if !range.contains(month) {
            continue;
        }
        let class = if inr.contains(&evt.code) {
            match inr_value_class(evt.numeric_value, threshold) {
                Some(class) => class,
                None => continue,
            }
        } else if high_inr.contains(&evt.code) {
            HIGH_INR_CODE.into()
        } else {
            continue;
        };
        out.push([
            Value::from(month),
            patient(evt.patient_id),
            Value::from(class.as_str()),
        ])?;
    }
    Ok(out)
}

/// TTR results for patients on warfarin, one row per distinct patient, month and value.
///
/// A result counts if the patient had warfarin issued in the test month or the `lookback`
/// months before it. Results without a value, or outside `range`, are dropped.
///
/// Columns: `patient_id`, `month`, `value`, `ttr_band`, `tested_next_month`. A patient was
/// tested the next month if they have a counting TTR record (with or without a value) in the
/// following month.
pub fn ttr_tests(
    issues: &Issues,
    ttr: &CodedEvents,
    classifier: &AnticoagulantClassifier,
    range: MonthRange,
    lookback: u32,
) -> Result<Extract> {
    let patients = PatientIssues::collect(issues, classifier);
    let bands = RangeSet::ttr_bands();

    let mut tested_months: BTreeSet<(PatientId, Month)> = BTreeSet::new();
    let mut results: BTreeSet<(PatientId, Month, R64)> = BTreeSet::new();
    for evt in ttr.iter() {
        let month = Month::of(evt.event_date);
        let on_warfarin = patients
            .get(&evt.patient_id)
            .map_or(false, |p| p.warfarin_recently(month, lookback));
        if !on_warfarin {
            continue;
        }
        tested_months.insert((evt.patient_id, month));
        match evt.numeric_value {
            Some(v) if v.is_finite() && range.contains(month) => {
                results.insert((evt.patient_id, month, r64(v)));
            }
            _ => (),
        }
    }

    let mut out = Extract::new([
        "patient_id",
        "month",
        "value",
        "ttr_band",
        "tested_next_month",
    ]);
    for (id, month, value) in results {
        let band = bands.label_for(&value).map(Value::from).unwrap_or_default();
        out.push([
            patient(id),
            Value::from(month),
            Value::Float(value.raw()),
            band,
            Value::from(tested_months.contains(&(id, month.succ()))),
        ])?;
    }
    event!(
        Level::DEBUG,
        "{} distinct TTR results from {} records",
        out.len(),
        ttr.len()
    );
    Ok(out)
}

/// Patients issued both warfarin and a DOAC on the same day, one row per patient and day.
///
/// Columns: `month`, `patient_id`, `issue_date`, `one_ended_same_day` (either issue's course
/// ended the day it was issued, usually meaning it was cancelled).
pub fn same_day_issues(
    issues: &Issues,
    classifier: &AnticoagulantClassifier,
    range: MonthRange,
) -> Result<Extract> {
    // latest end date per patient, day and class
    let mut days: BTreeMap<(PatientId, NaiveDate), [Option<Option<NaiveDate>>; 2]> =
        BTreeMap::new();
    for issue in issues.iter() {
        if !range.contains_date(issue.issue_date) {
            continue;
        }
        let idx = match classifier.classify(&issue.drug_code) {
            Some(Anticoagulant::Warfarin) => 0,
            Some(Anticoagulant::Doac) => 1,
            None => continue,
        };
        let slot = &mut days.entry((issue.patient_id, issue.issue_date)).or_default()[idx];
        *slot = Some(slot.flatten().max(issue.end_date));
    }

    let mut out = Extract::new(["month", "patient_id", "issue_date", "one_ended_same_day"]);
    for ((id, date), ends) in days {
        if let [Some(warfarin_end), Some(doac_end)] = ends {
            let ended = warfarin_end == Some(date) || doac_end == Some(date);
            out.push([
                Value::from(Month::of(date)),
                patient(id),
                Value::from(date),
                Value::from(ended),
            ])?;
        }
    }
    Ok(out)
}

/// Repeat prescriptions of patients issued an anticoagulant, per month of issue.
///
/// One row per patient and month in `range` where they had warfarin or a DOAC issued. Columns:
/// `month`, `patient_id`, `doac_repeat` and `warf_repeat` (a repeat of that class covers the
/// month), `started_same_date` (a warfarin and a DOAC repeat covering the month started on the
/// same day), and `warfarin_cancelled`/`doac_cancelled` (one of those same-day pairs where the
/// warfarin, or DOAC, repeat ended the day it started).
pub fn repeats_by_issue_month(
    issues: &Issues,
    repeats: &Repeats,
    classifier: &AnticoagulantClassifier,
    range: MonthRange,
) -> Result<Extract> {
    let issue_months: BTreeSet<(PatientId, Month)> = issues
        .iter()
        .filter(|issue| range.contains_date(issue.issue_date))
        .filter(|issue| classifier.classify(&issue.drug_code).is_some())
        .map(|issue| (issue.patient_id, Month::of(issue.issue_date)))
        .collect();

    let mut out = Extract::new([
        "month",
        "patient_id",
        "doac_repeat",
        "warf_repeat",
        "started_same_date",
        "warfarin_cancelled",
        "doac_cancelled",
    ]);
    for (id, month) in issue_months {
        let active = |class| {
            repeats
                .for_patient(id)
                .filter(move |r| r.active_in(month))
                .filter(move |r| classifier.classify(&r.drug_code) == Some(class))
        };
        let warfarin = active(Anticoagulant::Warfarin);
        let doac = active(Anticoagulant::Doac);
        let pairs: Vec<(&Repeat, &Repeat)> = warfarin
            .clone()
            .flat_map(|w| doac.clone().map(move |d| (w, d)))
            .filter(|(w, d)| w.start_date == d.start_date)
            .collect();
        out.push([
            Value::from(month),
            patient(id),
            Value::from(doac.clone().next().is_some()),
            Value::from(warfarin.clone().next().is_some()),
            Value::from(!pairs.is_empty()),
            Value::from(pairs.iter().any(|(w, _)| w.ended_same_day())),
            Value::from(pairs.iter().any(|(_, d)| d.ended_same_day())),
        ])?;
    }
    Ok(out)
}

/// Patients starting a new DOAC repeat, per month the repeat started.
///
/// A DOAC repeat starting in month `M` is new unless another DOAC repeat (one that started on a
/// different day) ended in `M` or the `lookback` months before it. The patient switched from
/// warfarin if a warfarin repeat ended in that window.
///
/// Columns: `month`, `patient_id`, `new`, `after_warfarin` (new and switched), `not_after_warfarin`
/// (new, with no warfarin repeat ending in the window).
pub fn new_doac_repeats(
    repeats: &Repeats,
    classifier: &AnticoagulantClassifier,
    range: MonthRange,
    lookback: u32,
) -> Result<Extract> {
    let mut out = Extract::new([
        "month",
        "patient_id",
        "new",
        "after_warfarin",
        "not_after_warfarin",
    ]);
    for id in repeats.patient_ids() {
        // latest start per month a DOAC repeat started in
        let mut starts: BTreeMap<Month, NaiveDate> = BTreeMap::new();
        // earliest start per class and month a repeat ended in
        let mut ends: BTreeMap<(Anticoagulant, Month), NaiveDate> = BTreeMap::new();
        for repeat in repeats.for_patient(id) {
            let class = match classifier.classify(&repeat.drug_code) {
                Some(class) => class,
                None => continue,
            };
            if class == Anticoagulant::Doac && range.contains_date(repeat.start_date) {
                let latest = starts.entry(Month::of(repeat.start_date)).or_insert(repeat.start_date);
                *latest = (*latest).max(repeat.start_date);
            }
            if let Some(end) = repeat.end_date {
                let earliest = ends.entry((class, Month::of(end))).or_insert(repeat.start_date);
                *earliest = (*earliest).min(repeat.start_date);
            }
        }

        for (month, latest_start) in starts {
            let ended_recently = |class: Anticoagulant| {
                ends.iter().filter(move |((c, end), _)| {
                    *c == class && (0..=lookback as i32).contains(&month.months_since(*end))
                })
            };
            let previous_doac = ended_recently(Anticoagulant::Doac)
                .any(|(_, earliest)| *earliest != latest_start);
            let warfarin = ended_recently(Anticoagulant::Warfarin).next().is_some();
            let new = !previous_doac;
            out.push([
                Value::from(month),
                patient(id),
                Value::from(new),
                Value::from(new && warfarin),
                Value::from(new && !warfarin),
            ])?;
        }
    }
    Ok(out)
}

/// Dates bounding one run of the switching analysis.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SwitchWindow {
    /// First day of the baseline.
    pub baseline_start: NaiveDate,
    /// Day after the baseline, and first day of the follow-up.
    pub baseline_end: NaiveDate,
    /// Last day of the follow-up.
    pub followup_end: NaiveDate,
}

/// What happened in the follow-up to one patient on warfarin (and not a DOAC) at baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchOutcome {
    pub patient_id: PatientId,
    /// Still issued warfarin, and never a DOAC.
    pub continued_warfarin: bool,
    /// Issued a DOAC.
    pub switched: bool,
    /// Issued warfarin again after their first DOAC.
    pub switched_back: bool,
    pub had_inr: bool,
    /// An INR result at or above the high INR threshold.
    pub had_high_inr: bool,
    pub had_ttr: bool,
    /// The chemical of the first DOAC issued, where the codelist has one.
    pub first_doac: Option<ArcStr>,
}

/// Follow patients who were on warfarin, and not a DOAC, during the baseline of `window`.
///
/// `events` are searched for INR results (codes in `inr`) and TTRs (codes in `ttr`) in the
/// follow-up.
pub fn switching(
    issues: &Issues,
    events: &CodedEvents,
    classifier: &AnticoagulantClassifier,
    inr: &Codelist,
    ttr: &Codelist,
    window: SwitchWindow,
    threshold: f64,
) -> Result<Vec<SwitchOutcome>> {
    ensure!(
        window.baseline_start < window.baseline_end && window.baseline_end <= window.followup_end,
        "switching windows must be in order (got {:?})",
        window
    );
    let followup_to = window
        .followup_end
        .succ_opt()
        .ok_or_else(|| format_err!("follow-up end {} is out of range", window.followup_end))?;
    let baseline = issues.between(window.baseline_start, window.baseline_end);
    let followup = issues.between(window.baseline_end, followup_to);
    let followup_events = events.between(window.baseline_end, followup_to);

    let mut out = vec![];
    for id in baseline.patient_ids() {
        let classes: BTreeSet<_> = baseline
            .for_patient(id)
            .filter_map(|issue| classifier.classify(&issue.drug_code))
            .collect();
        if !classes.contains(&Anticoagulant::Warfarin) || classes.contains(&Anticoagulant::Doac) {
            continue;
        }

        let mut latest_warfarin = None;
        let mut first_doac: Option<&Issue> = None;
        for issue in followup.for_patient(id) {
            match classifier.classify(&issue.drug_code) {
                Some(Anticoagulant::Warfarin) => {
                    latest_warfarin = latest_warfarin.max(Some(issue.issue_date))
                }
                Some(Anticoagulant::Doac) => {
                    if first_doac.map_or(true, |first| issue.issue_date < first.issue_date) {
                        first_doac = Some(issue);
                    }
                }
                None => (),
            }
        }
        let tests = || followup_events.for_patient(id);
        let inr_tests = || tests().filter(|evt| inr.contains(&evt.code));
        let switched = first_doac.is_some();
        out.push(SwitchOutcome {
            patient_id: id,
            continued_warfarin: latest_warfarin.is_some() && !switched,
            switched,
            switched_back: matches!(
                (latest_warfarin, first_doac),
                (Some(warfarin), Some(doac)) if warfarin > doac.issue_date
            ),
            had_inr: inr_tests().next().is_some(),
            had_high_inr: inr_tests().any(|evt| evt.numeric_value.map_or(false, |v| v >= threshold)),
            had_ttr: tests().any(|evt| ttr.contains(&evt.code)),
            first_doac: first_doac.and_then(|issue| classifier.chemical(&issue.drug_code).cloned()),
        });
    }
    event!(
        Level::DEBUG,
        "{} patients on warfarin in the baseline from {} to {}",
        out.len(),
        window.baseline_start,
        window.baseline_end
    );
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::{
        anticoagulant_issues, inr_monitoring, inr_value_class, inr_values, new_doac_repeats,
        repeats_by_issue_month, same_day_issues, switching, ttr_tests, SwitchWindow,
    };
    use crate::{
        codelist::{AnticoagulantClassifier, Codelist},
        events::{CodedEvents, Issues, Repeats},
        month::{Month, MonthRange},
        value::Value,
    };
    use chrono::NaiveDate;

    fn classifier() -> AnticoagulantClassifier {
        AnticoagulantClassifier::new(
            Codelist::from_codes("warfarin", ["W1"]),
            Codelist::from_codes("doac", ["D1"]),
        )
    }

    fn range(from: u32, to: u32) -> MonthRange {
        MonthRange::new(Month::new(2020, from).unwrap(), Month::new(2020, to).unwrap()).unwrap()
    }

    fn col(ex: &crate::Extract, row: usize, name: &str) -> Value {
        ex[row][ex.column(name).unwrap()].clone()
    }

    #[test]
    fn issues() {
        let issues = Issues::from_reader(
            "\
patient_id,drug_code,issue_date
1,W1,2020-03-02
1,W1,2020-03-02
2,D1,2020-03-10
3,X9,2020-03-10
4,W1,2019-01-01
"
            .as_bytes(),
        )
        .unwrap();
        let out = anticoagulant_issues(&issues, &classifier(), range(1, 8)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(col(&out, 0, "anticoag"), Value::from("warfarin"));
        assert_eq!(col(&out, 1, "anticoag"), Value::from("DOAC"));
    }

    #[test]
    fn inr() {
        let issues = Issues::from_reader(
            "\
patient_id,drug_code,issue_date
1,W1,2020-01-15
2,W1,2020-01-15
2,D1,2020-02-01
"
            .as_bytes(),
        )
        .unwrap();
        let tests = CodedEvents::from_reader(
            "\
patient_id,code,event_date,numeric_value
1,INR,2020-03-02,2.5
1,INR,2020-03-20,8
1,INR,2020-03-20,7
1,INR,2020-04-20,9.1
2,INR,2020-03-02,3
"
            .as_bytes(),
        )
        .unwrap();
        let out = inr_monitoring(&issues, &tests, &classifier(), range(1, 5), 3, 8.0).unwrap();
        // patient 1 is eligible Jan-Apr (issue in Jan, 3 month lookback), patient 2 only until
        // they switched in Feb
        assert_eq!(out.len(), 5);
        assert_eq!(col(&out, 4, "patient_id"), Value::Int(2));
        let march = out
            .iter()
            .position(|row| row[0] == Value::from(Month::new(2020, 3).unwrap()))
            .unwrap();
        assert_eq!(col(&out, march, "test_count"), Value::Int(3));
        assert_eq!(col(&out, march, "tested"), Value::Int(1));
        assert_eq!(col(&out, march, "high_over_8"), Value::Int(0));
        assert_eq!(col(&out, march, "high_equal_8"), Value::Int(1));
        assert_eq!(col(&out, march + 1, "high_over_8"), Value::Int(1));
        assert_eq!(col(&out, 0, "tested"), Value::Int(0));
    }

    #[test]
    fn classify_inr_values() {
        assert_eq!(inr_value_class(Some(9.0), 8.0).as_deref(), Some("over 8"));
        assert_eq!(inr_value_class(Some(8.0), 8.0).as_deref(), Some("8 exactly"));
        assert_eq!(inr_value_class(Some(-1.0), 8.0).as_deref(), Some("no value"));
        assert_eq!(inr_value_class(None, 8.0).as_deref(), Some("no value"));
        assert_eq!(inr_value_class(Some(2.5), 8.0).as_deref(), Some("under 8"));
        assert_eq!(inr_value_class(Some(120.0), 8.0), None);

        let events = CodedEvents::from_reader(
            "\
patient_id,code,event_date,numeric_value
1,INR,2020-03-02,8
1,HI,2020-03-02,
2,INR,2020-03-05,250
3,OTHER,2020-03-05,1
4,INR,2019-03-05,1
"
            .as_bytes(),
        )
        .unwrap();
        let out = inr_values(
            &events,
            &Codelist::from_codes("inr", ["INR"]),
            &Codelist::from_codes("high_inr", ["HI"]),
            range(1, 8),
            8.0,
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(col(&out, 0, "classification"), Value::from("8 exactly"));
        assert_eq!(col(&out, 1, "classification"), Value::from("high INR code"));
    }

    #[test]
    fn ttr() {
        let issues = Issues::from_reader(
            "patient_id,drug_code,issue_date\n1,W1,2020-01-15\n".as_bytes(),
        )
        .unwrap();
        let ttr = CodedEvents::from_reader(
            "\
patient_id,code,event_date,numeric_value
1,Xaa68,2020-02-02,65
1,Xaa68,2020-03-02,100
1,Xaa68,2020-06-02,70
2,Xaa68,2020-02-02,50
"
            .as_bytes(),
        )
        .unwrap();
        let out = ttr_tests(&issues, &ttr, &classifier(), range(1, 8), 3).unwrap();
        // June is more than 3 months after the issue; patient 2 is not on warfarin
        assert_eq!(out.len(), 2);
        assert_eq!(col(&out, 0, "ttr_band"), Value::from("60-<70"));
        assert_eq!(col(&out, 0, "tested_next_month"), Value::Int(1));
        assert_eq!(col(&out, 1, "ttr_band"), Value::from("90-100"));
        assert_eq!(col(&out, 1, "tested_next_month"), Value::Int(0));
    }

    #[test]
    fn ttr_distinct_results() {
        let issues = Issues::from_reader(
            "patient_id,drug_code,issue_date\n1,W1,2020-01-15\n2,W1,2020-01-15\n".as_bytes(),
        )
        .unwrap();
        let ttr = CodedEvents::from_reader(
            "\
patient_id,code,event_date,numeric_value
1,Xaa68,2020-02-02,65
1,Xaa68,2020-02-20,65
1,Xaa68,2020-02-21,70
2,Xaa68,2020-02-02,-5
"
            .as_bytes(),
        )
        .unwrap();
        let out = ttr_tests(&issues, &ttr, &classifier(), range(1, 8), 3).unwrap();
        // the same value twice in a month is one result
        assert_eq!(out.len(), 3);
        assert_eq!(col(&out, 0, "value"), Value::Float(65.0));
        assert_eq!(col(&out, 1, "value"), Value::Float(70.0));
        assert_eq!(col(&out, 2, "ttr_band"), Value::from("0-<50"));
    }

    #[test]
    fn ttr_tested_next_month_needs_warfarin() {
        let issues = Issues::from_reader(
            "patient_id,drug_code,issue_date\n1,W1,2020-01-15\n".as_bytes(),
        )
        .unwrap();
        let ttr = CodedEvents::from_reader(
            "\
patient_id,code,event_date,numeric_value
1,Xaa68,2020-03-02,120
1,Xaa68,2020-04-02,
1,Xaa68,2020-04-10,55
1,Xaa68,2020-05-02,60
"
            .as_bytes(),
        )
        .unwrap();
        let out = ttr_tests(&issues, &ttr, &classifier(), range(1, 8), 3).unwrap();
        assert_eq!(out.len(), 2);
        // over 100 still falls in the top band
        assert_eq!(col(&out, 0, "ttr_band"), Value::from("90-100"));
        // April is within 3 months of the January issue, so it counts
        assert_eq!(col(&out, 0, "tested_next_month"), Value::Int(1));
        // the May record is too long after the issue to count as a warfarin test
        assert_eq!(col(&out, 1, "month"), Value::from(Month::new(2020, 4).unwrap()));
        assert_eq!(col(&out, 1, "tested_next_month"), Value::Int(0));
    }

    #[test]
    fn ttr_before_first_warfarin() {
        let issues = Issues::from_reader(
            "patient_id,drug_code,issue_date\n1,W1,2020-03-15\n".as_bytes(),
        )
        .unwrap();
        let ttr = CodedEvents::from_reader(
            "\
patient_id,code,event_date,numeric_value
1,Xaa68,2020-02-10,70
1,Xaa68,2020-03-20,75
"
            .as_bytes(),
        )
        .unwrap();
        let out = ttr_tests(&issues, &ttr, &classifier(), range(1, 8), 3).unwrap();
        // February is before any warfarin was issued
        assert_eq!(out.len(), 1);
        assert_eq!(col(&out, 0, "month"), Value::from(Month::new(2020, 3).unwrap()));
        assert_eq!(col(&out, 0, "value"), Value::Float(75.0));
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn same_day() {
        let issues = Issues::from_reader(
            "\
patient_id,drug_code,issue_date,end_date
1,W1,2020-03-02,2020-04-02
1,D1,2020-03-02,2020-03-02
2,W1,2020-03-05,2020-04-05
2,D1,2020-03-05,2020-04-05
2,D1,2020-03-05,2020-03-05
3,W1,2020-03-05,
3,D1,2020-03-06,
"
            .as_bytes(),
        )
        .unwrap();
        let out = same_day_issues(&issues, &classifier(), range(1, 8)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(col(&out, 0, "one_ended_same_day"), Value::Int(1));
        // the latest end of the day's DOAC issues is used
        assert_eq!(col(&out, 1, "patient_id"), Value::Int(2));
        assert_eq!(col(&out, 1, "one_ended_same_day"), Value::Int(0));
    }

    #[test]
    fn repeats_per_issue_month() {
        let issues = Issues::from_reader(
            "\
patient_id,drug_code,issue_date
1,W1,2020-03-02
1,D1,2020-04-02
2,D1,2020-03-10
3,X9,2020-03-10
"
            .as_bytes(),
        )
        .unwrap();
        let repeats = Repeats::from_reader(
            "\
patient_id,drug_code,start_date,end_date
1,W1,2020-02-01,2020-03-01
1,D1,2020-02-01,2020-02-01
1,D1,2020-04-01,
2,D1,2019-12-01,2020-02-28
3,D1,2020-03-01,
"
            .as_bytes(),
        )
        .unwrap();
        let out = repeats_by_issue_month(&issues, &repeats, &classifier(), range(1, 8)).unwrap();
        // patient 3 was never issued an anticoagulant
        assert_eq!(out.len(), 3);
        let row = |r: usize| -> Vec<Value> { out[r][1..].to_vec() };
        let flags = |v: [i64; 6]| v.into_iter().map(Value::Int).collect::<Vec<_>>();
        // March: the warfarin repeat runs until March, the cancelled DOAC repeat only in Feb
        assert_eq!(row(0), flags([1, 0, 1, 0, 0, 0]));
        // April: the open DOAC repeat
        assert_eq!(row(1), flags([1, 1, 0, 0, 0, 0]));
        assert_eq!(row(2), flags([2, 0, 0, 0, 0, 0]));

        let issues = Issues::from_reader(
            "patient_id,drug_code,issue_date\n1,W1,2020-02-10\n".as_bytes(),
        )
        .unwrap();
        let feb = repeats_by_issue_month(&issues, &repeats, &classifier(), range(1, 8)).unwrap();
        // both repeats started on 1 Feb, and the DOAC one ended that day
        assert_eq!(feb[0][1..].to_vec(), flags([1, 1, 1, 1, 0, 1]));
    }

    #[test]
    fn new_doac() {
        let repeats = Repeats::from_reader(
            "\
patient_id,drug_code,start_date,end_date
1,W1,2019-10-01,2020-01-15
1,D1,2020-03-01,
2,D1,2019-11-01,2020-02-10
2,D1,2020-03-05,
3,D1,2020-03-05,2020-03-20
3,D1,2020-03-05,2020-03-05
4,W1,2019-01-01,2019-06-01
4,D1,2020-05-01,
"
            .as_bytes(),
        )
        .unwrap();
        let out = new_doac_repeats(&repeats, &classifier(), range(1, 8), 3).unwrap();
        assert_eq!(out.len(), 4);
        let flags = |r: usize| -> Vec<Value> { out[r][2..].to_vec() };
        let ints = |v: [i64; 3]| v.into_iter().map(Value::Int).collect::<Vec<_>>();
        // switched from warfarin
        assert_eq!(flags(0), ints([1, 1, 0]));
        // a DOAC repeat ended the month before
        assert_eq!(flags(1), ints([0, 0, 0]));
        // the only DOAC repeat ending nearby started the same day, so it's still new
        assert_eq!(flags(2), ints([1, 0, 1]));
        // warfarin ended too long ago to count as a switch
        assert_eq!(flags(3), ints([1, 0, 1]));
    }

    #[test]
    fn switchers() {
        let classifier = AnticoagulantClassifier::new(
            Codelist::from_codes("warfarin", ["W1"]),
            Codelist::from_reader(
                "doac",
                "id,chemical\nD1,Apixaban\nD2,\n".as_bytes(),
                "id",
                Some("chemical"),
            )
            .unwrap(),
        );
        let issues = Issues::from_reader(
            "\
patient_id,drug_code,issue_date
1,W1,2020-01-10
1,D1,2020-03-10
1,W1,2020-04-10
2,W1,2020-02-01
2,W1,2020-04-01
3,W1,2020-01-10
3,D1,2020-02-10
4,W1,2020-01-10
5,W1,2020-02-28
5,D2,2020-05-31
"
            .as_bytes(),
        )
        .unwrap();
        let events = CodedEvents::from_reader(
            "\
patient_id,code,event_date,numeric_value
2,INR,2020-03-02,8
2,Xaa68,2020-04-02,70
4,INR,2020-02-02,9
"
            .as_bytes(),
        )
        .unwrap();
        let window = SwitchWindow {
            baseline_start: date(2019, 12, 1),
            baseline_end: date(2020, 3, 1),
            followup_end: date(2020, 5, 31),
        };
        let out = switching(
            &issues,
            &events,
            &classifier,
            &Codelist::from_codes("inr", ["INR"]),
            &Codelist::from_codes("ttr", ["Xaa68"]),
            window,
            8.0,
        )
        .unwrap();
        // patient 3 had a DOAC in the baseline
        let ids: Vec<_> = out.iter().map(|o| o.patient_id).collect();
        assert_eq!(ids, [1, 2, 4, 5]);

        assert!(out[0].switched && out[0].switched_back && !out[0].continued_warfarin);
        assert_eq!(out[0].first_doac.as_deref(), Some("Apixaban"));

        assert!(out[1].continued_warfarin && !out[1].switched);
        assert!(out[1].had_inr && out[1].had_high_inr && out[1].had_ttr);

        // nothing in the follow up; the INR was during the baseline
        assert!(!out[2].continued_warfarin && !out[2].switched && !out[2].had_inr);

        // the last day of the follow up counts; D2 has no chemical
        assert!(out[3].switched && !out[3].switched_back);
        assert_eq!(out[3].first_doac, None);

        let backwards = SwitchWindow {
            baseline_start: date(2020, 3, 1),
            ..window
        };
        assert!(switching(
            &issues,
            &events,
            &classifier,
            &Codelist::from_codes("inr", ["INR"]),
            &Codelist::from_codes("ttr", ["Xaa68"]),
            backwards,
            8.0
        )
        .is_err());
    }
}
