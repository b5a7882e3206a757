use anticoag_reports::{
    reports::{
        self,
        replot::{RateSpec, Replot},
    },
    StudyConfig,
};
use clap::Parser;
use qu::ick_use::*;
use std::path::PathBuf;

/// Redraw a saved monthly table as rates per 1000.
///
/// With no options, redraws the INR testing table as patients tested and tests per 1000
/// patients on warfarin.
#[derive(Parser)]
struct Opt {
    /// Study config file. Defaults are used if it doesn't exist.
    #[clap(short, long, default_value = "study.toml")]
    config: PathBuf,
    /// Table to read, as written by one of the reports.
    #[clap(short, long)]
    input: Option<PathBuf>,
    /// Where to write the chart (must end in .png).
    #[clap(short, long)]
    output: Option<PathBuf>,
    #[clap(long)]
    title: Option<String>,
    #[clap(long)]
    ylabel: Option<String>,
    /// A rate to plot, as `name=numerator/denominator`. Can be given more than once.
    #[clap(short, long)]
    rate: Vec<RateSpec>,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = StudyConfig::load(&opt.config)?;
    let mut replot = Replot::inr_testing(&config);
    if let Some(input) = opt.input {
        replot.input = input;
    }
    if let Some(output) = opt.output {
        replot.output = output;
    }
    if let Some(title) = opt.title {
        replot.title = title;
    }
    if let Some(ylabel) = opt.ylabel {
        replot.ylabel = ylabel;
    }
    if !opt.rate.is_empty() {
        replot.rates = opt.rate;
    }
    let table = reports::replot::run(&config, &replot)?;
    println!("{}", table.term_table());
    Ok(())
}
