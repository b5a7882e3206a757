//! Codelists, and classifying medication codes as anticoagulants.
use crate::ArcStr;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, fs, io, path::Path, sync::Arc};

/// A named set of codes, each with an optional category (e.g. the chemical a drug code belongs
/// to).
#[derive(Debug, Default, Clone)]
pub struct Codelist {
    name: ArcStr,
    codes: Arc<BTreeMap<ArcStr, Option<ArcStr>>>,
}

impl Codelist {
    /// Build a codelist from literal codes.
    pub fn from_codes<S: AsRef<str>>(
        name: impl Into<ArcStr>,
        codes: impl IntoIterator<Item = S>,
    ) -> Self {
        Codelist {
            name: name.into(),
            codes: Arc::new(
                codes
                    .into_iter()
                    .map(|code| (code.as_ref().trim().into(), None))
                    .collect(),
            ),
        }
    }

    /// Load a codelist from a CSV file with a header row.
    ///
    /// Codes are taken from `code_column`, and, if given, categories from `category_column`.
    /// Duplicates are removed.
    pub fn load(
        path: impl AsRef<Path>,
        code_column: &str,
        category_column: Option<&str>,
    ) -> Result<Self> {
        fn inner(path: &Path, code_column: &str, category_column: Option<&str>) -> Result<Codelist> {
            let reader = fs::File::open(path)?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy())
                .unwrap_or_default();
            Codelist::from_reader(&*name, reader, code_column, category_column)
        }

        let path = path.as_ref();
        inner(path, code_column, category_column)
            .with_context(|| format!("loading codelist from file \"{}\"", path.display()))
    }

    pub fn from_reader(
        name: impl Into<ArcStr>,
        reader: impl io::Read,
        code_column: &str,
        category_column: Option<&str>,
    ) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader.headers()?.clone();
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| format_err!("codelist has no column \"{}\"", name))
        };
        let code_idx = find(code_column)?;
        let category_idx = category_column.map(find).transpose()?;

        let mut codes = BTreeMap::new();
        for record in reader.records() {
            let record = record?;
            let code = match record.get(code_idx) {
                Some(code) if !code.is_empty() => code,
                _ => continue,
            };
            let category = category_idx
                .and_then(|idx| record.get(idx))
                .filter(|cat| !cat.is_empty())
                .map(ArcStr::from);
            codes.insert(ArcStr::from(code), category);
        }
        Ok(Codelist {
            name: name.into(),
            codes: Arc::new(codes),
        })
    }

    /// Add extra codes (without a category). Codes already present keep their category.
    pub fn with_codes<S: AsRef<str>>(mut self, codes: &[S]) -> Self {
        let map = Arc::make_mut(&mut self.codes);
        for code in codes {
            map.entry(code.as_ref().trim().into()).or_insert(None);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains_key(code)
    }

    /// The category recorded against `code`, if the code is in the list and has one.
    pub fn category(&self, code: &str) -> Option<&ArcStr> {
        self.codes.get(code).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// The two classes of oral anticoagulant the reports distinguish.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anticoagulant {
    Warfarin,
    Doac,
}

impl fmt::Display for Anticoagulant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Anticoagulant::Warfarin => "warfarin",
            Anticoagulant::Doac => "DOAC",
        })
    }
}

/// Maps medication codes to the class of anticoagulant they belong to.
#[derive(Debug, Clone)]
pub struct AnticoagulantClassifier {
    pub warfarin: Codelist,
    pub doac: Codelist,
}

impl AnticoagulantClassifier {
    pub fn new(warfarin: Codelist, doac: Codelist) -> Self {
        Self { warfarin, doac }
    }

    /// `None` for codes in neither list. A code in both lists counts as warfarin.
    pub fn classify(&self, code: &str) -> Option<Anticoagulant> {
        if self.warfarin.contains(code) {
            Some(Anticoagulant::Warfarin)
        } else if self.doac.contains(code) {
            Some(Anticoagulant::Doac)
        } else {
            None
        }
    }

    /// The chemical name for a DOAC code (e.g. apixaban), where the codelist records one.
    pub fn chemical(&self, code: &str) -> Option<&ArcStr> {
        match self.classify(code)? {
            Anticoagulant::Warfarin => self.warfarin.category(code),
            Anticoagulant::Doac => self.doac.category(code),
        }
    }
}
