use anticoag_reports::{reports, StudyConfig};
use clap::Parser;
use qu::ick_use::*;
use std::path::PathBuf;

/// Counts for the study population flow chart.
#[derive(Parser)]
struct Opt {
    /// Study config file. Defaults are used if it doesn't exist.
    #[clap(short, long, default_value = "study.toml")]
    config: PathBuf,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = StudyConfig::load(&opt.config)?;
    reports::flow::run(&config)?;
    Ok(())
}
