//! Study population flow chart: how many patients each inclusion criterion removes.
use crate::{
    config::StudyConfig,
    create_output,
    disclosure::Disclosure,
    extract::Extract,
    util,
    value::Value,
    ArcStr,
};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{fmt, io, path::Path};

/// Label of the first row, counting everyone in the extract.
pub const TOTAL: &str = "total registered patients";

/// Which patients a step keeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "keep", rename_all = "snake_case")]
pub enum Rule {
    /// The column equals `value`.
    Equals { column: ArcStr, value: f64 },
    /// The column is set: a non-zero number, a date or some text. `0` and empty are unset.
    Present { column: ArcStr },
    /// The column is unset.
    Absent { column: ArcStr },
    /// At least one of the columns is set.
    AnyPresent { columns: Vec<ArcStr> },
}

impl Rule {
    fn columns(&self) -> Vec<&str> {
        match self {
            Rule::Equals { column, .. } | Rule::Present { column } | Rule::Absent { column } => {
                vec![&**column]
            }
            Rule::AnyPresent { columns } => columns.iter().map(|c| &**c).collect(),
        }
    }

    /// `idxs` are the positions of `self.columns()` in the row.
    fn keeps(&self, row: &[Value], idxs: &[usize]) -> bool {
        match self {
            Rule::Equals { value, .. } => row[idxs[0]].as_f64() == Some(*value),
            Rule::Present { .. } => row[idxs[0]].is_truthy(),
            Rule::Absent { .. } => !row[idxs[0]].is_truthy(),
            Rule::AnyPresent { .. } => idxs.iter().any(|idx| row[*idx].is_truthy()),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rule::Equals { column, value } => write!(f, "{} = {}", column, value),
            Rule::Present { column } => write!(f, "{} present", column),
            Rule::Absent { column } => write!(f, "{} absent", column),
            Rule::AnyPresent { columns } => write!(f, "any of {} present", columns.join(", ")),
        }
    }
}

/// One inclusion criterion. `label` describes the patients it excludes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    pub label: String,
    #[serde(flatten)]
    pub rule: Rule,
}

impl FlowStep {
    pub fn new(label: impl Into<String>, rule: Rule) -> Self {
        FlowStep {
            label: label.into(),
            rule,
        }
    }
}

/// The criteria the warfarin population was defined by, in the order they are applied.
pub fn default_steps() -> Vec<FlowStep> {
    vec![
        FlowStep::new(
            "age >110 or <18",
            Rule::Equals {
                column: "age_18_110".into(),
                value: 1.0,
            },
        ),
        FlowStep::new(
            "No warfarin",
            Rule::Present {
                column: "warfarin_last_three_months".into(),
            },
        ),
        FlowStep::new(
            "no warfarin 6 months ago",
            Rule::Present {
                column: "warfarin_6_months".into(),
            },
        ),
        FlowStep::new(
            "DOAC in last 3 months",
            Rule::Absent {
                column: "doac_last_three_months".into(),
            },
        ),
        FlowStep::new(
            "no warfarin or DOAC in follow up period",
            Rule::AnyPresent {
                columns: vec![
                    "warfarin_next_three_months".into(),
                    "doac_next_three_months".into(),
                ],
            },
        ),
    ]
}

/// Patient counts: the total, then the number excluded by each step.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowChart {
    rows: Vec<(String, Value)>,
}

impl FlowChart {
    pub fn rows(&self) -> &[(String, Value)] {
        &self.rows
    }

    /// How many patients are left after every step. Only meaningful before disclosure control.
    pub fn remaining(&self) -> Option<i64> {
        let mut rows = self.rows.iter().map(|(_, v)| v.as_f64());
        let total = rows.next()??;
        rows.try_fold(total, |left, excluded| Some(left - excluded?))
            .map(|left| left as i64)
    }

    pub fn disclose(&self, policy: &Disclosure) -> Self {
        FlowChart {
            rows: self
                .rows
                .iter()
                .map(|(label, count)| (label.clone(), policy.apply_value(count)))
                .collect(),
        }
    }

    pub fn write_csv(&self, writer: impl io::Write) -> Result {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(["criteria", "patient_count"])?;
        for (label, count) in self.rows.iter() {
            writer.write_record([label.as_str(), count.to_string().as_str()])?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result {
        let path = path.as_ref();
        create_output(path)
            .and_then(|file| self.write_csv(file))
            .with_context(|| format!("writing flow chart to \"{}\"", path.display()))?;
        event!(Level::INFO, "wrote \"{}\"", path.display());
        Ok(())
    }

    pub fn term_table(&self) -> term_data_table::Table<'_> {
        use term_data_table::{Cell, Row, Table};
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(Cell::from("criteria"))
                .with_cell(Cell::from("patient_count")),
        );
        for (label, count) in self.rows.iter() {
            table.add_row(
                Row::new()
                    .with_cell(Cell::from(label.as_str()))
                    .with_cell(Cell::from(count.to_string())),
            );
        }
        table
    }
}

/// Apply `steps` in order to the patients in `extract`, counting how many each one removes.
///
/// Patients without an id are not counted at all.
pub fn flow_chart(extract: &Extract, steps: &[FlowStep]) -> Result<FlowChart> {
    let id = extract.column("patient_id")?;
    let resolved = steps
        .iter()
        .map(|step| {
            step.rule
                .columns()
                .into_iter()
                .map(|c| extract.column(c))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("in flow chart step \"{}\"", step.label))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut remaining: Vec<&[Value]> = extract.rows().filter(|row| !row[id].is_missing()).collect();
    let mut rows = vec![(TOTAL.to_string(), Value::from(remaining.len() as i64))];
    for (step, idxs) in steps.iter().zip(resolved.iter()) {
        let before = remaining.len();
        remaining.retain(|row| step.rule.keeps(row, idxs));
        let excluded = before - remaining.len();
        event!(
            Level::DEBUG,
            "\"{}\" ({}) excluded {} patients",
            step.label,
            step.rule,
            excluded
        );
        rows.push((step.label.clone(), Value::from(excluded as i64)));
    }
    Ok(FlowChart { rows })
}

pub fn run(config: &StudyConfig) -> Result<FlowChart> {
    let extract = Extract::load_csv(config.input(&config.inputs.flow_chart))?;
    let chart = flow_chart(&extract, &config.flow_chart.steps)?;
    if let Some(left) = chart.remaining() {
        event!(Level::INFO, "{} patients in the study population", left);
    }
    let chart = chart.disclose(&config.flow_chart.disclosure);
    util::header("Study population flow chart");
    println!("{}", chart.term_table());
    chart.save_csv(config.output("flow_chart_data.csv"))?;
    Ok(chart)
}
