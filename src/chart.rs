//! Monthly line charts.
//!
//! Drawing happens in two steps. `plan` works out everything that depends on the data (line
//! segments, error bars, axis ranges, ticks, whether a legend is needed), and `render` hands the
//! plans to plotters. Only the first step has logic worth testing.
use crate::{month::Month, prepare_output, table::MonthlyTable, units::normalise_units};
use chrono::{Duration, NaiveDate};
use plotters::{coord::Shift, prelude::*};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings shared by every chart in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartOptions {
    /// Where the vertical reference line goes.
    pub policy_date: NaiveDate,
    pub policy_label: String,
    /// The x axis always extends to here, even if the data stops earlier.
    pub axis_end: NaiveDate,
    pub default_ylabel: String,
    pub xlabel: String,
    pub legend: LegendPosition,
    /// Pixels per inch. Each panel is 10 x 8 inches.
    pub dpi: u32,
    /// Set to false to write the tables without drawing any charts.
    pub enabled: bool,
}

impl Default for ChartOptions {
    fn default() -> Self {
        ChartOptions {
            policy_date: NaiveDate::from_ymd_opt(2020, 3, 26).unwrap(),
            policy_label: "NHSE directive".into(),
            axis_end: NaiveDate::from_ymd_opt(2020, 8, 30).unwrap(),
            default_ylabel: "Number of patients".into(),
            xlabel: "Month".into(),
            legend: LegendPosition::LowerLeft,
            dpi: 300,
            enabled: true,
        }
    }
}

impl ChartOptions {
    pub fn validate(&self) -> Result {
        ensure!(
            (10..=1200).contains(&self.dpi),
            "chart dpi should be between 10 and 1200 (got {})",
            self.dpi
        );
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegendPosition {
    UpperLeft,
    UpperRight,
    LowerLeft,
    LowerRight,
}

impl From<LegendPosition> for SeriesLabelPosition {
    fn from(pos: LegendPosition) -> Self {
        match pos {
            LegendPosition::UpperLeft => SeriesLabelPosition::UpperLeft,
            LegendPosition::UpperRight => SeriesLabelPosition::UpperRight,
            LegendPosition::LowerLeft => SeriesLabelPosition::LowerLeft,
            LegendPosition::LowerRight => SeriesLabelPosition::LowerRight,
        }
    }
}

/// One table to draw, with its per-panel overrides.
#[derive(Debug, Clone)]
pub struct Panel {
    pub table: MonthlyTable,
    pub title: String,
    /// Defaults to `ChartOptions::default_ylabel`.
    pub ylabel: Option<String>,
    /// Defaults to 0.
    pub ymin: Option<f64>,
}

impl Panel {
    pub fn new(table: MonthlyTable, title: impl Into<String>) -> Self {
        Panel {
            table,
            title: title.into(),
            ylabel: None,
            ymin: None,
        }
    }

    pub fn with_ylabel(mut self, ylabel: impl Into<String>) -> Self {
        self.ylabel = Some(ylabel.into());
        self
    }

    pub fn with_ymin(mut self, ymin: f64) -> Self {
        self.ymin = Some(ymin);
        self
    }
}

/// A line, broken into segments wherever a value is missing.
#[derive(Debug, Clone, PartialEq)]
pub struct LinePlan {
    pub name: String,
    pub segments: Vec<Vec<(f64, f64)>>,
    /// `(x, y, error)` for series that have a `_stdev` partner.
    pub errors: Vec<(f64, f64, f64)>,
    pub dashed: bool,
    /// Index into the palette.
    pub color: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelPlan {
    pub title: String,
    pub ylabel: String,
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
    /// Tick positions and their labels.
    pub ticks: Vec<(f64, String)>,
    /// x position of the policy line, if it falls on the axis.
    pub policy_x: Option<f64>,
    pub label_x: f64,
    pub lines: Vec<LinePlan>,
    pub legend: bool,
}

/// Tick marks for the x axis: only the Januaries.
pub fn january_ticks(months: &[Month]) -> Vec<(Month, String)> {
    months
        .iter()
        .map(|m| (*m, m.label()))
        .filter(|(_, label)| label.contains("Jan"))
        .collect()
}

/// Work out what to draw for one panel.
pub fn plan(panel: &Panel, options: &ChartOptions) -> Result<PanelPlan> {
    let ylabel = panel
        .ylabel
        .as_deref()
        .unwrap_or(&options.default_ylabel);
    let (table, ylabel) = normalise_units(&panel.table, ylabel);
    let months = table.months();
    let (first, last) = match (months.first(), months.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => bail!("nothing to plot in \"{}\"", panel.title),
    };

    let xs: Vec<f64> = months.iter().map(|m| m.index() as f64).collect();
    let measures: Vec<_> = table
        .series()
        .iter()
        .filter(|s| s.stdev_of().is_none())
        .collect();
    let with_errors = measures
        .iter()
        .any(|s| table.get(&format!("{}_stdev", s.name)).is_some());

    let mut lines = vec![];
    let mut ymax = table.max_value().unwrap_or(0.0);
    for (idx, series) in measures.iter().enumerate() {
        let stdev = table.get(&format!("{}_stdev", series.name));
        let mut segments = vec![];
        let mut current = vec![];
        let mut errors = vec![];
        for (row, value) in series.numbers().enumerate() {
            match value {
                Some(y) => {
                    current.push((xs[row], y));
                    if let Some(err) = stdev.and_then(|s| s.values[row].as_f64()) {
                        errors.push((xs[row], y, err));
                        ymax = ymax.max(y + err);
                    }
                }
                None if !current.is_empty() => segments.push(std::mem::take(&mut current)),
                None => (),
            }
        }
        if !current.is_empty() {
            segments.push(current);
        }
        // with four plain lines, the second pair are drawn dashed in the colours of the first
        let (color, dashed) = if measures.len() == 4 && !with_errors && idx >= 2 {
            (idx - 2, true)
        } else {
            (idx, false)
        };
        lines.push(LinePlan {
            name: series.name.to_string(),
            segments,
            errors,
            dashed,
            color,
        });
    }

    let ymin = panel.ymin.unwrap_or(0.0);
    let mut ymax = ymax * 1.05;
    if !(ymax > ymin) {
        ymax = ymin + 1.0;
    }
    let x_end = Month::position(options.axis_end).max(last.index() as f64);
    let x_range = (first.index() as f64, x_end);
    let policy = Month::position(options.policy_date);
    let policy_x = Some(policy).filter(|x| *x >= x_range.0 && *x <= x_range.1);

    Ok(PanelPlan {
        title: panel.title.clone(),
        ylabel,
        x_range,
        y_range: (ymin, ymax),
        ticks: january_ticks(months)
            .into_iter()
            .map(|(m, label)| (m.index() as f64, label))
            .collect(),
        policy_x,
        label_x: Month::position(options.policy_date + Duration::days(5)),
        lines,
        legend: measures.len() > 1,
    })
}

/// Draw one panel per table, side by side, and save as PNG.
pub fn render(panels: &[Panel], options: &ChartOptions, path: impl AsRef<Path>) -> Result {
    let path = path.as_ref();
    ensure!(!panels.is_empty(), "no panels to draw");
    crate::check_extension(path, "png")?;
    let plans = panels
        .iter()
        .map(|panel| plan(panel, options))
        .collect::<Result<Vec<_>>>()?;
    prepare_output(path)?;

    let width = 10 * options.dpi * plans.len() as u32;
    let height = 8 * options.dpi;
    let scale = if plans.len() > 1 { 1.25 } else { 1.2 };
    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err)?;
    for (area, plan) in root.split_evenly((1, plans.len())).iter().zip(plans.iter()) {
        draw_panel(area, plan, options, scale).map_err(draw_err)?;
    }
    root.present()
        .map_err(draw_err)
        .with_context(|| format!("writing chart to \"{}\"", path.display()))?;
    event!(Level::INFO, "wrote \"{}\"", path.display());
    Ok(())
}

/// How many x axis key points give one per month. The axis starts on a month.
fn month_key_points(x_range: (f64, f64)) -> usize {
    (x_range.1 - x_range.0).floor() as usize + 1
}

/// The label for the key point at `x`: empty unless it is one of `ticks`.
fn tick_label(ticks: &[(f64, String)], x: f64) -> String {
    ticks
        .iter()
        .find(|(tx, _)| (tx - x).abs() < 1e-6)
        .map(|(_, label)| label.clone())
        .unwrap_or_default()
}

fn draw_err(e: impl std::fmt::Display) -> Error {
    format_err!("drawing chart: {}", e)
}

fn draw_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    plan: &PanelPlan,
    options: &ChartOptions,
    scale: f64,
) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    // font sizes are given in points
    let pt = |size: f64| size * scale * options.dpi as f64 / 72.0;
    let x_labels = month_key_points(plan.x_range);

    let mut chart = ChartBuilder::on(area)
        .caption(&plan.title, ("sans-serif", pt(18.0 * 1.1 / scale)))
        .margin(pt(10.0) as u32)
        .x_label_area_size(pt(40.0) as u32)
        .y_label_area_size(pt(50.0) as u32)
        .build_cartesian_2d(
            plan.x_range.0..plan.x_range.1,
            plan.y_range.0..plan.y_range.1,
        )?;

    let tick_label = |x: &f64| tick_label(&plan.ticks, *x);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(&options.xlabel)
        .y_desc(&plan.ylabel)
        .x_labels(x_labels)
        .x_label_formatter(&tick_label)
        .label_style(("sans-serif", pt(10.0)))
        .axis_desc_style(("sans-serif", pt(14.0)))
        .draw()?;

    for line in plan.lines.iter() {
        let color = Palette99::pick(line.color).mix(1.0);
        let style = color.stroke_width(2);
        let mut segments = line.segments.iter();
        let first = segments.next().cloned().unwrap_or_default();
        let anno = if line.dashed {
            chart.draw_series(DashedLineSeries::new(first, 10, 6, style))?
        } else {
            chart.draw_series(LineSeries::new(first, style))?
        };
        anno.label(&line.name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        for segment in segments {
            if line.dashed {
                chart.draw_series(DashedLineSeries::new(segment.clone(), 10, 6, style))?;
            } else {
                chart.draw_series(LineSeries::new(segment.clone(), style))?;
            }
        }
        chart.draw_series(line.errors.iter().map(|&(x, y, err)| {
            ErrorBar::new_vertical(x, y - err, y, y + err, color.stroke_width(1), 6)
        }))?;
    }

    if let Some(x) = plan.policy_x {
        chart.draw_series(DashedLineSeries::new(
            vec![(x, plan.y_range.0), (x, plan.y_range.1)],
            3,
            4,
            BLACK.mix(0.8).stroke_width(2),
        ))?;
        let font = ("sans-serif", pt(11.0))
            .into_font()
            .transform(FontTransform::Rotate270);
        let label_y = plan.y_range.0 + (plan.y_range.1 - plan.y_range.0) * 0.01;
        chart.draw_series(std::iter::once(Text::new(
            options.policy_label.clone(),
            (plan.label_x, label_y),
            font,
        )))?;
    }

    if plan.legend {
        chart
            .configure_series_labels()
            .position(options.legend.into())
            .label_font(("sans-serif", pt(14.0)))
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    Ok(())
}
