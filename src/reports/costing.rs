//! What switching patients from warfarin to DOACs costs per year, in the study practices and
//! scaled up to all practices.
//!
//! Reads `doac_switchers.csv` and `doac_types.csv` from the output directory, so the switching
//! report has to run first.
use crate::{
    config::{CostingConfig, StudyConfig},
    load_rows,
    reports::{
        save_rows,
        switching::{DoacTypeRow, SwitchingRow},
    },
};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One row of the warfarin prescribing costs extract.
#[derive(Debug, Clone, Deserialize)]
pub struct WarfarinCost {
    pub actual_cost: f64,
}

/// One row of the list sizes extract.
#[derive(Debug, Clone, Deserialize)]
pub struct ListSize {
    pub list_size: f64,
    pub tpp_list_size: f64,
}

/// Annual costs, in pounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Costing {
    pub period: String,
    pub year: i32,
    /// DOAC cost per patient per year, weighted by which DOACs switchers were given.
    pub doac_cost_per_patient: f64,
    pub warfarin_cost_per_patient: f64,
    pub extra_cost_per_patient: f64,
    pub switched_patients: f64,
    /// Extra cost of everyone who switched in the study practices.
    pub study_cost: f64,
    /// Share of the national list size covered by the study practices.
    pub coverage: f64,
    pub national_cost: f64,
}

impl fmt::Display for Costing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Switching costs, {} {}", self.period, self.year)?;
        writeln!(
            f,
            "  DOAC cost per patient per year:     £{:.2}",
            self.doac_cost_per_patient
        )?;
        writeln!(
            f,
            "  warfarin cost per patient per year: £{:.2}",
            self.warfarin_cost_per_patient
        )?;
        writeln!(
            f,
            "  extra cost per patient per year:    £{:.2}",
            self.extra_cost_per_patient
        )?;
        writeln!(
            f,
            "  {} patients switched, costing £{:.0} a year",
            self.switched_patients, self.study_cost
        )?;
        write!(
            f,
            "  with {:.1}% of patients covered, £{:.0} a year nationally",
            100.0 * self.coverage,
            self.national_cost
        )
    }
}

/// Cost the switches of the period and year named in `config`.
///
/// DOACs without a price in `config` are left out of the DOAC cost, with a warning.
pub fn costing(
    config: &CostingConfig,
    switchers: &[SwitchingRow],
    types: &[DoacTypeRow],
    warfarin_costs: &[WarfarinCost],
    list_sizes: &[ListSize],
) -> Result<Costing> {
    let in_period = |period: &str, year: i32| period == config.period && year == config.year;
    let row = switchers
        .iter()
        .find(|row| in_period(&row.period, row.year))
        .ok_or_else(|| {
            format_err!("no switching results for {} {}", config.period, config.year)
        })?;

    let mut doac_cost = 0.0;
    for ty in types.iter().filter(|ty| in_period(&ty.period, ty.year)) {
        let price = config
            .prices
            .iter()
            .find(|price| price.chemical.eq_ignore_ascii_case(&ty.chemical));
        match (price, ty.percent) {
            (Some(price), Some(percent)) => {
                doac_cost += price.annual_net_cost(config.net_price_ratio) * percent / 100.0
            }
            (None, _) => event!(Level::WARN, "no price for {}, leaving it out", ty.chemical),
            (_, None) => (),
        }
    }

    let baseline_patients = 1000.0 * row.baseline;
    ensure!(
        baseline_patients > 0.0,
        "no patients on warfarin at baseline in {} {}",
        config.period,
        config.year
    );
    let warfarin_spend: f64 = warfarin_costs.iter().map(|c| c.actual_cost).sum();
    let warfarin_cost = config.baselines_per_year * warfarin_spend / baseline_patients;

    let list: f64 = list_sizes.iter().map(|l| l.list_size).sum();
    let tpp_list: f64 = list_sizes.iter().map(|l| l.tpp_list_size).sum();
    ensure!(
        list > 0.0 && tpp_list > 0.0,
        "list sizes must be positive to scale up costs"
    );

    let extra = doac_cost - warfarin_cost;
    let switched_patients = 1000.0 * row.switched;
    let study_cost = switched_patients * extra;
    let coverage = tpp_list / list;
    Ok(Costing {
        period: config.period.clone(),
        year: config.year,
        doac_cost_per_patient: doac_cost,
        warfarin_cost_per_patient: warfarin_cost,
        extra_cost_per_patient: extra,
        switched_patients,
        study_cost,
        coverage,
        national_cost: study_cost / coverage,
    })
}

pub fn run(config: &StudyConfig) -> Result<Costing> {
    let switchers: Vec<SwitchingRow> = load_rows(config.output("doac_switchers.csv"))
        .context("the switching report must be run before costing")?;
    let types: Vec<DoacTypeRow> = load_rows(config.output("doac_types.csv"))
        .context("the switching report must be run before costing")?;
    let warfarin_costs: Vec<WarfarinCost> = load_rows(config.input(&config.inputs.warfarin_costs))?;
    let list_sizes: Vec<ListSize> = load_rows(config.input(&config.inputs.list_sizes))?;

    let costs = costing(&config.costing, &switchers, &types, &warfarin_costs, &list_sizes)?;
    println!("\n{}", costs);
    save_rows(&[costs.clone()], config.output("doac_costing.csv"))?;
    Ok(costs)
}

#[cfg(test)]
mod test {
    use super::{costing, ListSize, WarfarinCost};
    use crate::{
        cohort::SwitchOutcome,
        config::CostingConfig,
        reports::switching::{doac_types, DoacTypeRow, SwitchingRow},
    };

    fn switched(id: u64, chemical: &str) -> SwitchOutcome {
        SwitchOutcome {
            patient_id: id,
            continued_warfarin: false,
            switched: true,
            switched_back: false,
            had_inr: false,
            had_high_inr: false,
            had_ttr: false,
            first_doac: Some(chemical.into()),
        }
    }

    fn results() -> (Vec<SwitchingRow>, Vec<DoacTypeRow>) {
        // 2000 on warfarin at baseline, 400 switched: three quarters to apixaban
        let mut outcomes: Vec<SwitchOutcome> = (0..300).map(|id| switched(id, "apixaban")).collect();
        outcomes.extend((300..400).map(|id| switched(id, "Edoxaban")));
        let types = doac_types("March-May", 2020, &outcomes);
        outcomes.extend((400..2000).map(|id| SwitchOutcome {
            switched: false,
            first_doac: None,
            ..switched(id, "")
        }));
        let switchers = vec![SwitchingRow::new("March-May", 2020, &outcomes)];
        (switchers, types)
    }

    fn list_sizes() -> Vec<ListSize> {
        vec![
            ListSize {
                list_size: 1000.0,
                tpp_list_size: 400.0,
            },
            ListSize {
                list_size: 1000.0,
                tpp_list_size: 100.0,
            },
        ]
    }

    #[test]
    fn costs() {
        let config = CostingConfig::default();
        let (switchers, types) = results();
        assert_eq!(types[0].percent, Some(75.0));
        let warfarin = vec![
            WarfarinCost { actual_cost: 1000.0 },
            WarfarinCost { actual_cost: 3000.0 },
        ];
        let costs = costing(&config, &switchers, &types, &warfarin, &list_sizes()).unwrap();

        let apixaban = 365.0 * 0.9289 * 53.2 / 28.0;
        let edoxaban = 365.0 * 0.9289 * 49.0 / 28.0;
        let doac = 0.75 * apixaban + 0.25 * edoxaban;
        assert!((costs.doac_cost_per_patient - doac).abs() < 1e-9);
        // four baselines a year, 4000 spent on 2000 patients
        assert!((costs.warfarin_cost_per_patient - 8.0).abs() < 1e-9);
        assert!((costs.extra_cost_per_patient - (doac - 8.0)).abs() < 1e-9);
        assert!((costs.switched_patients - 400.0).abs() < 1e-9);
        assert!((costs.study_cost - 400.0 * (doac - 8.0)).abs() < 1e-6);
        assert_eq!(costs.coverage, 0.25);
        assert!((costs.national_cost - 4.0 * costs.study_cost).abs() < 1e-6);
        assert!(costs.to_string().contains("£8.00"));
    }

    #[test]
    fn unknown_period() {
        let config = CostingConfig {
            year: 2019,
            ..CostingConfig::default()
        };
        let (switchers, types) = results();
        assert!(costing(&config, &switchers, &types, &[], &list_sizes()).is_err());
    }

    #[test]
    fn unpriced_doac() {
        let mut config = CostingConfig::default();
        config.prices.retain(|price| price.chemical != "Edoxaban");
        let (switchers, types) = results();
        let costs = costing(&config, &switchers, &types, &[], &list_sizes()).unwrap();
        let apixaban = 365.0 * 0.9289 * 53.2 / 28.0;
        assert!((costs.doac_cost_per_patient - 0.75 * apixaban).abs() < 1e-9);
        assert_eq!(costs.warfarin_cost_per_patient, 0.0);
    }
}
