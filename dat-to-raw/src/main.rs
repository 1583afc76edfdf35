mod loader;

use anyhow::Result;
use clap::Parser;
use loader::{Capture, convert_capture, distinct_stores};
use pmt_common::init_tracer;
use rayon::prelude::*;
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info, level_filters::LevelFilter};

#[derive(Debug, Parser)]
#[clap(author, version, about = "Decodes digitiser binary captures into raw run stores")]
struct Cli {
    /// Binary captures, as written by wavedump
    #[clap(required = true)]
    files: Vec<PathBuf>,

    /// Directory of the raw run stores, by default the directory of each capture
    #[clap(long, env = "PMT_RAW_DIR")]
    output_dir: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();

    let tracer = init_tracer!(LevelFilter::INFO)?;

    let captures = args.files.iter().map(|path| Capture::identify(path)).collect();
    let (captures, clashes) = distinct_stores(captures, args.output_dir.as_deref());
    for capture in &clashes {
        error!(
            "Skipping {}: its run {} is already written by another capture",
            capture.path.display(),
            capture.file_id
        );
    }

    // Each capture is self contained, so they are decoded independently.
    let failures = clashes.len()
        + captures
            .par_iter()
            .map(|capture| convert_capture(capture, args.output_dir.as_deref()))
            .filter_map(Result::err)
            .inspect(|e| error!("{e}"))
            .count();

    info!(
        "{}: decoded {} of {} captures",
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
