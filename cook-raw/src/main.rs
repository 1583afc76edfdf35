mod daq;
mod features;
mod parameters;
mod processing;
mod timestamp;

use anyhow::Result;
use clap::Parser;
use parameters::{AcquisitionParameters, CookOptions};
use pmt_common::init_tracer;
use processing::cook_run;
use rayon::prelude::*;
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info, level_filters::LevelFilter};

#[derive(Debug, Parser)]
#[clap(author, version, about = "Extracts per-event features from raw run stores")]
struct Cli {
    /// Raw run stores, named by any of their files
    #[clap(required = true)]
    files: Vec<PathBuf>,

    /// Directory of the cooked run stores, by default the directory of each raw store
    #[clap(long, env = "PMT_COOKED_DIR")]
    output_dir: Option<PathBuf>,

    #[clap(flatten)]
    acquisition: AcquisitionParameters,

    /// Keep the baseline subtracted waveform of every event
    #[clap(long)]
    save_waveforms: bool,

    /// Cook only the first events of each run
    #[clap(long)]
    max_events: Option<usize>,
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();

    let tracer = init_tracer!(LevelFilter::INFO)?;

    let options = CookOptions {
        settings: args.acquisition.settings(),
        output_dir: args.output_dir,
        save_waveforms: args.save_waveforms,
        max_events: args.max_events,
    };

    // Timestamps are reconstructed in order within a run, but runs are independent.
    let failures = args
        .files
        .par_iter()
        .map(|path| cook_run(path, &options))
        .filter_map(Result::err)
        .inspect(|e| error!("{e}"))
        .count();

    info!(
        "{}: cooked {} of {} runs",
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
