//! Event-level extracts: medication issues and coded clinical events.
use crate::{codelist::Codelist, load_rows, month::Month, read_rows, util, ArcStr, PatientId};
use chrono::NaiveDate;
use itertools::Either;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, io, iter, ops::Deref, path::Path, sync::Arc};

/// A single prescription issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub patient_id: PatientId,
    #[serde(deserialize_with = "util::code")]
    pub drug_code: ArcStr,
    #[serde(deserialize_with = "util::extract_date")]
    pub issue_date: NaiveDate,
    /// When the issue's course ends, if the extract has one.
    #[serde(default, deserialize_with = "util::opt_extract_date")]
    pub end_date: Option<NaiveDate>,
}

/// A coded clinical event, with the numeric value recorded against it if there was one (e.g.
/// the INR result).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodedEvent {
    pub patient_id: PatientId,
    #[serde(deserialize_with = "util::code")]
    pub code: ArcStr,
    #[serde(deserialize_with = "util::extract_date")]
    pub event_date: NaiveDate,
    #[serde(default, deserialize_with = "util::optional_f64")]
    pub numeric_value: Option<f64>,
}

/// A repeat prescription: the drug can be issued from `start_date` until `end_date`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repeat {
    pub patient_id: PatientId,
    #[serde(deserialize_with = "util::code")]
    pub drug_code: ArcStr,
    #[serde(deserialize_with = "util::extract_date")]
    pub start_date: NaiveDate,
    /// Missing for repeats with no end. Open repeats are also written with a far-future date.
    #[serde(default, deserialize_with = "util::opt_extract_date")]
    pub end_date: Option<NaiveDate>,
}

impl Repeat {
    /// Whether the repeat covers any of `month`.
    pub fn active_in(&self, month: Month) -> bool {
        Month::of(self.start_date) <= month
            && self.end_date.map_or(true, |end| month <= Month::of(end))
    }

    /// Whether the repeat ended the day it started.
    pub fn ended_same_day(&self) -> bool {
        self.end_date == Some(self.start_date)
    }
}

/// Rows of an event-level extract, with a pre-built index on the patient id.
#[derive(Debug, Clone)]
pub struct PatientIndexed<T> {
    els: Arc<Vec<T>>,
    id_idx: BTreeMap<PatientId, Vec<usize>>,
}

/// Event types that belong to a patient.
pub trait PatientRow: Clone {
    fn patient_id(&self) -> PatientId;
    fn date(&self) -> NaiveDate;
}

impl PatientRow for Issue {
    fn patient_id(&self) -> PatientId {
        self.patient_id
    }
    fn date(&self) -> NaiveDate {
        self.issue_date
    }
}

impl PatientRow for Repeat {
    fn patient_id(&self) -> PatientId {
        self.patient_id
    }
    fn date(&self) -> NaiveDate {
        self.start_date
    }
}

impl PatientRow for CodedEvent {
    fn patient_id(&self) -> PatientId {
        self.patient_id
    }
    fn date(&self) -> NaiveDate {
        self.event_date
    }
}

pub type Issues = PatientIndexed<Issue>;
pub type CodedEvents = PatientIndexed<CodedEvent>;
pub type Repeats = PatientIndexed<Repeat>;

impl<T> PatientIndexed<T>
where
    T: PatientRow + serde::de::DeserializeOwned,
{
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_rows(path)?))
    }

    pub fn from_reader(reader: impl io::Read) -> Result<Self> {
        Ok(Self::new(read_rows(reader)?))
    }
}

impl<T: PatientRow> PatientIndexed<T> {
    pub fn new(els: Vec<T>) -> Self {
        let mut this = PatientIndexed {
            els: Arc::new(els),
            id_idx: BTreeMap::new(),
        };
        this.rebuild_id_map();
        this
    }

    /// Rows for one patient, in file order.
    pub fn for_patient(&self, patient_id: PatientId) -> impl Iterator<Item = &T> + Clone + '_ {
        let idxs = match self.id_idx.get(&patient_id) {
            Some(idxs) => idxs,
            None => return Either::Left(iter::empty()),
        };
        Either::Right(idxs.iter().map(|idx| &self.els[*idx]))
    }

    /// All patient ids with at least one row, ascending.
    pub fn patient_ids(&self) -> impl Iterator<Item = PatientId> + '_ {
        self.id_idx.keys().copied()
    }

    /// Get a copy containing only rows that match the filter.
    pub fn filter(&self, f: impl Fn(&T) -> bool) -> Self {
        Self::new(self.els.iter().filter(|el| f(el)).cloned().collect())
    }

    /// Rows dated between `from` (inclusive) and `to` (exclusive).
    pub fn between(&self, from: NaiveDate, to: NaiveDate) -> Self {
        self.filter(|el| from <= el.date() && el.date() < to)
    }

    fn rebuild_id_map(&mut self) {
        self.id_idx.clear();
        for (idx, el) in self.els.iter().enumerate() {
            self.id_idx
                .entry(el.patient_id())
                .or_insert_with(Vec::new)
                .push(idx);
        }
    }
}

impl PatientIndexed<CodedEvent> {
    /// Creates a new `CodedEvents` object with only those events with codes in the codelist.
    pub fn filter_by_codelist(&self, codelist: &Codelist) -> Self {
        self.filter(|evt| codelist.contains(&evt.code))
    }
}

impl<T> Deref for PatientIndexed<T> {
    type Target = [T];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

impl<'a, T> IntoIterator for &'a PatientIndexed<T> {
    type IntoIter = std::slice::Iter<'a, T>;
    type Item = &'a T;
    fn into_iter(self) -> Self::IntoIter {
        self.els.iter()
    }
}

#[cfg(test)]
mod test {
    use super::{CodedEvents, Issues, Repeats};
    use crate::{codelist::Codelist, month::Month};
    use chrono::NaiveDate;

    #[test]
    fn issues() {
        let data = "\
patient_id,drug_code,issue_date
1,318,2020-03-02
2,0042,2020-03-10
1,318,2020-04-01 00:00:00
";
        let issues = Issues::from_reader(data.as_bytes()).unwrap();
        assert_eq!(issues.len(), 3);
        assert_eq!(issues.for_patient(1).count(), 2);
        assert_eq!(issues.for_patient(3).count(), 0);
        assert_eq!(&*issues[1].drug_code, "0042");
        assert_eq!(issues.patient_ids().collect::<Vec<_>>(), [1, 2]);
        assert_eq!(issues[0].end_date, None);

        let march = issues.between(
            NaiveDate::from_ymd_opt(2020, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 4, 1).unwrap(),
        );
        assert_eq!(march.len(), 2);
        assert_eq!(march.for_patient(1).count(), 1);
    }

    #[test]
    fn issue_end_dates() {
        let data = "\
patient_id,drug_code,issue_date,end_date
1,318,2020-03-02,2020-03-02
2,0042,2020-03-10,
";
        let issues = Issues::from_reader(data.as_bytes()).unwrap();
        assert_eq!(issues[0].end_date, NaiveDate::from_ymd_opt(2020, 3, 2));
        assert_eq!(issues[1].end_date, None);
    }

    #[test]
    fn repeats() {
        let data = "\
patient_id,drug_code,start_date,end_date
1,318,2020-01-20,2020-03-02
1,0042,2020-02-10,2020-02-10
2,318,2020-03-10,
3,318,2020-03-10,9999-12-31
";
        let repeats = Repeats::from_reader(data.as_bytes()).unwrap();
        let month = |m| Month::new(2020, m).unwrap();
        assert!(repeats[0].active_in(month(1)));
        assert!(repeats[0].active_in(month(3)));
        assert!(!repeats[0].active_in(month(4)));
        assert!(repeats[1].ended_same_day());
        assert!(!repeats[0].ended_same_day());
        assert!(repeats[2].active_in(month(12)));
        assert!(!repeats[2].active_in(month(2)));
        assert!(repeats[3].active_in(month(12)));
    }

    #[test]
    fn events() {
        let data = "\
patient_id,code,event_date,numeric_value
1,XaINR,2020-03-02,2.5
1,XaINR,2020-03-09,
2,Xaa68,2020-03-10,NA
";
        let events = CodedEvents::from_reader(data.as_bytes()).unwrap();
        assert_eq!(events[0].numeric_value, Some(2.5));
        assert_eq!(events[1].numeric_value, None);
        assert_eq!(events[2].numeric_value, None);

        let inr = events.filter_by_codelist(&Codelist::from_codes("inr", ["XaINR"]));
        assert_eq!(inr.len(), 2);
        assert_eq!(inr.for_patient(2).count(), 0);
        assert!(CodedEvents::from_reader("patient_id,code\n1,x\n".as_bytes()).is_err());
    }
}
