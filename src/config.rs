//! Study configuration, read from a TOML file.
//!
//! Every field has a default, so an empty (or missing) file gives the settings the study was
//! originally run with.
use crate::{
    chart::ChartOptions,
    codelist::{AnticoagulantClassifier, Codelist},
    cohort::SwitchWindow,
    disclosure::Disclosure,
    month::{Month, MonthRange},
    reports::flow::{default_steps, FlowStep},
    util,
};
use chrono::{Datelike, Months, NaiveDate};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StudyConfig {
    /// Where the cohort extracts are.
    pub data_dir: PathBuf,
    pub codelist_dir: PathBuf,
    /// Where tables and charts are written.
    pub output_dir: PathBuf,
    /// First and last months reported on.
    pub report_start: Month,
    pub report_end: Month,
    pub chart: ChartOptions,
    pub inputs: Inputs,
    pub codelists: Codelists,
    pub issues: IssuesConfig,
    pub inr: InrConfig,
    pub ttr: TtrConfig,
    pub flow_chart: FlowChartConfig,
    pub repeats: RepeatsConfig,
    pub switching: SwitchingConfig,
    pub costing: CostingConfig,
}

impl Default for StudyConfig {
    fn default() -> Self {
        StudyConfig {
            data_dir: "data".into(),
            codelist_dir: "codelists".into(),
            output_dir: "output".into(),
            report_start: month(2019, 1),
            report_end: month(2020, 8),
            chart: ChartOptions::default(),
            inputs: Inputs::default(),
            codelists: Codelists::default(),
            issues: IssuesConfig::default(),
            inr: InrConfig::default(),
            ttr: TtrConfig::default(),
            flow_chart: FlowChartConfig::default(),
            repeats: RepeatsConfig::default(),
            switching: SwitchingConfig::default(),
            costing: CostingConfig::default(),
        }
    }
}

fn month(year: i32, month: u32) -> Month {
    Month::of(date(year, month, 1))
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    // only called with literal, valid dates
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// File names of the extracts, relative to `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Inputs {
    pub issues: PathBuf,
    pub events: PathBuf,
    pub flow_chart: PathBuf,
    /// Repeat prescriptions.
    pub repeats: PathBuf,
    /// Warfarin tablet prescribing costs over the costing baseline, column `actual_cost`.
    pub warfarin_costs: PathBuf,
    /// List sizes, columns `list_size` (all practices) and `tpp_list_size` (practices in the
    /// study).
    pub list_sizes: PathBuf,
}

impl Default for Inputs {
    fn default() -> Self {
        Inputs {
            issues: "medication_issues.csv".into(),
            events: "coded_events.csv".into(),
            flow_chart: "input_flow_chart.csv".into(),
            repeats: "medication_repeats.csv".into(),
            warfarin_costs: "warf_df.csv".into(),
            list_sizes: "tpp_df.csv".into(),
        }
    }
}

/// Where a codelist comes from: a CSV file in `codelist_dir`, literal codes, or both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodelistSource {
    pub file: Option<PathBuf>,
    /// Column holding the codes.
    pub column: String,
    /// Column holding each code's category, if any.
    pub category: Option<String>,
    pub codes: Vec<String>,
}

impl Default for CodelistSource {
    fn default() -> Self {
        CodelistSource {
            file: None,
            column: "id".into(),
            category: None,
            codes: vec![],
        }
    }
}

impl CodelistSource {
    fn file(file: &str, category: Option<&str>) -> Self {
        CodelistSource {
            file: Some(file.into()),
            column: "id".into(),
            category: category.map(Into::into),
            codes: vec![],
        }
    }

    fn codes(codes: &[&str]) -> Self {
        CodelistSource {
            codes: codes.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn load(&self, name: &str, codelist_dir: &Path) -> Result<Codelist> {
        let mut list = match &self.file {
            Some(file) => Codelist::load(
                codelist_dir.join(file),
                &self.column,
                self.category.as_deref(),
            )?,
            None => Codelist::from_codes(name, std::iter::empty::<&str>()),
        };
        if !self.codes.is_empty() {
            list = list.with_codes(&self.codes);
        }
        ensure!(!list.is_empty(), "codelist \"{}\" has no codes", name);
        event!(
            Level::DEBUG,
            "codelist \"{}\" (from \"{}\") has {} codes",
            name,
            list.name(),
            list.len()
        );
        Ok(list)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Codelists {
    pub warfarin: CodelistSource,
    pub doac: CodelistSource,
    pub inr: CodelistSource,
    pub high_inr: CodelistSource,
    pub ttr: CodelistSource,
}

impl Default for Codelists {
    fn default() -> Self {
        Codelists {
            warfarin: CodelistSource::file("opensafely-warfarin.csv", None),
            doac: CodelistSource::file(
                "opensafely-direct-acting-oral-anticoagulants-doac.csv",
                Some("chemical"),
            ),
            inr: CodelistSource::file("opensafely-international-normalised-ratio-inr.csv", None),
            high_inr: CodelistSource::file(
                "opensafely-high-international-normalised-ratio-inr.csv",
                None,
            ),
            ttr: CodelistSource::codes(&["Xaa68"]),
        }
    }
}

/// Denominator for the anticoagulant issue rates: one row per month with a population count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Denominator {
    /// Relative to `data_dir`.
    pub file: PathBuf,
    #[serde(default = "Denominator::default_column")]
    pub column: String,
}

impl Denominator {
    fn default_column() -> String {
        "population".into()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IssuesConfig {
    pub disclosure: Disclosure,
    pub denominator: Option<Denominator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InrConfig {
    pub disclosure: Disclosure,
    /// How many months before the test month a warfarin issue makes a patient eligible.
    pub lookback_months: u32,
    /// INR values above this (and equal to it) are reported as high.
    pub high_inr_threshold: f64,
    /// First month of the INR value and high INR code check.
    pub value_check_from: Month,
}

impl Default for InrConfig {
    fn default() -> Self {
        InrConfig {
            // zero counts are blanked too in the INR outputs
            disclosure: Disclosure::Suppress { low: 0, high: 5 },
            lookback_months: 3,
            high_inr_threshold: 8.0,
            value_check_from: month(2020, 1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TtrConfig {
    pub disclosure: Disclosure,
    /// TTR has only been recorded since this month.
    pub first_month: Month,
    pub lookback_months: u32,
    /// y axis minimum for the mean TTR chart.
    pub mean_ymin: f64,
}

impl Default for TtrConfig {
    fn default() -> Self {
        TtrConfig {
            disclosure: Disclosure::default(),
            first_month: month(2019, 4),
            lookback_months: 3,
            mean_ymin: 55.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowChartConfig {
    pub disclosure: Disclosure,
    pub steps: Vec<FlowStep>,
}

impl Default for FlowChartConfig {
    fn default() -> Self {
        FlowChartConfig {
            disclosure: Disclosure::RoundDown { multiple: 5 },
            steps: default_steps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepeatsConfig {
    pub disclosure: Disclosure,
    /// A DOAC repeat isn't new if another ended this many months before it started, and is a
    /// switch if a warfarin repeat did.
    pub lookback_months: u32,
}

impl Default for RepeatsConfig {
    fn default() -> Self {
        RepeatsConfig {
            disclosure: Disclosure::default(),
            lookback_months: 3,
        }
    }
}

/// One period of the switching analysis: a baseline, and the follow-up straight after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwitchPeriod {
    /// Names the follow-up, e.g. `March-May`.
    pub name: String,
    pub baseline_start: NaiveDate,
    /// First day after the baseline, which is also the first day of the follow-up.
    pub baseline_end: NaiveDate,
    /// Last day of the follow-up.
    pub followup_end: NaiveDate,
}

impl SwitchPeriod {
    fn new(name: &str, baseline_start: NaiveDate, baseline_end: NaiveDate, followup_end: NaiveDate) -> Self {
        SwitchPeriod {
            name: name.into(),
            baseline_start,
            baseline_end,
            followup_end,
        }
    }

    /// The year results for this period are reported under.
    pub fn year(&self) -> i32 {
        self.followup_end.year()
    }

    pub fn window(&self) -> SwitchWindow {
        SwitchWindow {
            baseline_start: self.baseline_start,
            baseline_end: self.baseline_end,
            followup_end: self.followup_end,
        }
    }

    /// The same dates a year earlier.
    pub fn year_before(&self) -> Result<SwitchWindow> {
        let back = |d: NaiveDate| {
            d.checked_sub_months(Months::new(12))
                .ok_or_else(|| format_err!("no date a year before {}", d))
        };
        Ok(SwitchWindow {
            baseline_start: back(self.baseline_start)?,
            baseline_end: back(self.baseline_end)?,
            followup_end: back(self.followup_end)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SwitchingConfig {
    pub periods: Vec<SwitchPeriod>,
    /// Also run each period a year earlier, for comparison.
    pub previous_year: bool,
}

impl Default for SwitchingConfig {
    fn default() -> Self {
        SwitchingConfig {
            periods: vec![
                SwitchPeriod::new("March-May", date(2019, 12, 1), date(2020, 3, 1), date(2020, 5, 31)),
                SwitchPeriod::new("June-Aug", date(2020, 3, 1), date(2020, 6, 1), date(2020, 8, 31)),
            ],
            previous_year: true,
        }
    }
}

/// List price of a DOAC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DoacPrice {
    /// Matched against the chemical names in `doac_types.csv`, ignoring case.
    pub chemical: String,
    pub cost_per_pack: f64,
    pub pack_size: f64,
    pub daily_doses: f64,
}

impl DoacPrice {
    fn new(chemical: &str, cost_per_pack: f64, pack_size: f64, daily_doses: f64) -> Self {
        DoacPrice {
            chemical: chemical.into(),
            cost_per_pack,
            pack_size,
            daily_doses,
        }
    }

    /// Cost of a year's treatment, after scaling the list price by `net_price_ratio`.
    pub fn annual_net_cost(&self, net_price_ratio: f64) -> f64 {
        365.0 * net_price_ratio * self.cost_per_pack / (self.pack_size / self.daily_doses)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CostingConfig {
    /// Which switching period and year the costs are for.
    pub period: String,
    pub year: i32,
    /// Actual cost as a fraction of list price.
    pub net_price_ratio: f64,
    /// How many baselines make a year: the warfarin costs cover one baseline.
    pub baselines_per_year: f64,
    pub prices: Vec<DoacPrice>,
}

impl Default for CostingConfig {
    fn default() -> Self {
        CostingConfig {
            period: "March-May".into(),
            year: 2020,
            net_price_ratio: 0.9289,
            baselines_per_year: 4.0,
            prices: vec![
                DoacPrice::new("Edoxaban", 49.0, 28.0, 1.0),
                DoacPrice::new("Apixaban", 53.2, 56.0, 2.0),
                DoacPrice::new("Rivaroxaban", 50.4, 28.0, 1.0),
                DoacPrice::new("Dabigatran etexilate", 51.0, 60.0, 2.0),
            ],
        }
    }
}

impl StudyConfig {
    /// Load the config from `path`. A missing file gives the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<StudyConfig> {
            if !util::path_exists(path)? {
                event!(
                    Level::INFO,
                    "no config at \"{}\", using defaults",
                    path.display()
                );
                return Ok(StudyConfig::default());
            }
            let text = fs::read_to_string(path)?;
            let config: StudyConfig = toml::from_str(&text)?;
            config.validate()?;
            Ok(config)
        }

        let path = path.as_ref();
        inner(path).with_context(|| format!("loading config from \"{}\"", path.display()))
    }

    pub fn validate(&self) -> Result {
        self.report_range()?;
        self.chart.validate()?;
        for (name, policy) in [
            ("issues", &self.issues.disclosure),
            ("inr", &self.inr.disclosure),
            ("ttr", &self.ttr.disclosure),
            ("flow_chart", &self.flow_chart.disclosure),
            ("repeats", &self.repeats.disclosure),
        ] {
            policy
                .validate()
                .with_context(|| format!("in the disclosure policy for {}", name))?;
        }
        ensure!(
            self.inr.high_inr_threshold > 0.0,
            "high INR threshold must be positive"
        );
        ensure!(
            self.inr.value_check_from <= self.report_end,
            "INR value check starts in {}, after the end of the report",
            self.inr.value_check_from
        );
        ensure!(
            self.ttr.first_month <= self.report_end,
            "TTR first month {} is after the end of the report",
            self.ttr.first_month
        );
        ensure!(!self.flow_chart.steps.is_empty(), "flow chart has no steps");

        let mut names = BTreeSet::new();
        for period in self.switching.periods.iter() {
            ensure!(
                names.insert(period.name.as_str()),
                "switching period \"{}\" is given twice",
                period.name
            );
            ensure!(
                period.baseline_start < period.baseline_end
                    && period.baseline_end <= period.followup_end,
                "switching period \"{}\" must have its dates in order",
                period.name
            );
        }
        let costing = &self.costing;
        ensure!(
            costing.net_price_ratio > 0.0 && costing.baselines_per_year > 0.0,
            "costing ratios must be positive"
        );
        for price in costing.prices.iter() {
            ensure!(
                price.cost_per_pack >= 0.0 && price.pack_size > 0.0 && price.daily_doses > 0.0,
                "invalid price for {}",
                price.chemical
            );
        }
        Ok(())
    }

    pub fn report_range(&self) -> Result<MonthRange> {
        MonthRange::new(self.report_start, self.report_end)
    }

    pub fn input(&self, file: impl AsRef<Path>) -> PathBuf {
        self.data_dir.join(file)
    }

    pub fn output(&self, file: impl AsRef<Path>) -> PathBuf {
        self.output_dir.join(file)
    }

    pub fn classifier(&self) -> Result<AnticoagulantClassifier> {
        Ok(AnticoagulantClassifier::new(
            self.codelists.warfarin.load("warfarin", &self.codelist_dir)?,
            self.codelists.doac.load("doac", &self.codelist_dir)?,
        ))
    }
}
