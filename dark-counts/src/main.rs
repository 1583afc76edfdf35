mod classify;
mod detrend;
mod noise;
mod parameters;
mod processing;
mod report;

use anyhow::Result;
use clap::Parser;
use parameters::DarkParameters;
use pmt_common::init_tracer;
use processing::analyse_run;
use rayon::prelude::*;
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info, level_filters::LevelFilter};

#[derive(Debug, Parser)]
#[clap(author, version, about = "Measures the noise floor and dark count rate of cooked runs")]
struct Cli {
    /// Cooked run stores, named by any of their files
    #[clap(required = true)]
    files: Vec<PathBuf>,

    /// Directory of the reports, by default the directory of each run store
    #[clap(long, env = "PMT_RESULTS_DIR")]
    output_dir: Option<PathBuf>,

    #[clap(flatten)]
    parameters: DarkParameters,
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();

    let tracer = init_tracer!(LevelFilter::INFO)?;

    let failures = args
        .files
        .par_iter()
        .map(|path| analyse_run(path, &args.parameters, args.output_dir.as_deref()))
        .filter_map(Result::err)
        .inspect(|e| error!("{e}"))
        .count();

    info!(
        "{}: analysed {} of {} runs",
        tracer.service_name(),
        args.files.len() - failures,
        args.files.len()
    );
    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
