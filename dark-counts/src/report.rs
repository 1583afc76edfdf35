//! Text and CSV reports of the dark count analysis of one run.
use crate::processing::DarkResults;
use pmt_common::store::{StoreError, StoreResult};
use std::{
    fmt::Display,
    fs::{self, File},
    io::{BufWriter, Error, Write},
    path::Path,
};
use tracing::info;

pub(crate) trait SavablePoint {
    fn write_to_file(&self, file: &mut dyn Write) -> Result<(), Error>;
}

impl SavablePoint for usize {
    fn write_to_file(&self, file: &mut dyn Write) -> Result<(), Error> {
        writeln!(file, "{self}")
    }
}

impl<E: Display> SavablePoint for (usize, E) {
    fn write_to_file(&self, file: &mut dyn Write) -> Result<(), Error> {
        writeln!(file, "{0},{1}", self.0, self.1)
    }
}

pub(crate) trait SaveToFileFilter<I>
where
    I: Iterator,
    I::Item: SavablePoint,
{
    fn save_to_file(self, path: &Path, header: &str) -> Result<(), Error>;
}

impl<I> SaveToFileFilter<I> for I
where
    I: Iterator,
    I::Item: SavablePoint,
{
    fn save_to_file(self, path: &Path, header: &str) -> Result<(), Error> {
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(file, "{header}")?;
        for item in self {
            item.write_to_file(&mut file)?;
        }
        file.flush()
    }
}

fn write_text(
    path: &Path,
    write: impl FnOnce(&mut dyn Write) -> Result<(), Error>,
) -> Result<(), Error> {
    let mut file = BufWriter::new(File::create(path)?);
    write(&mut file)?;
    file.flush()
}

fn summary(file: &mut dyn Write, results: &DarkResults) -> Result<(), Error> {
    let (dark, with_noise, noise) = (&results.dark, &results.with_noise, &results.noise);
    writeln!(file, "file id = {}", results.file_id)?;
    writeln!(file, "entries = {}", results.num_entries)?;
    writeln!(file, "rejected after de-trending = {}", results.rejected)?;
    writeln!(
        file,
        "dark counts (noise rejected) = {} +/- {}",
        dark.count, dark.count_err
    )?;
    writeln!(
        file,
        "dark rate (noise rejected) = {} +/- {} Hz",
        dark.rate_hz, dark.rate_err_hz
    )?;
    writeln!(
        file,
        "dark counts (noise) = {} +/- {}",
        with_noise.count, with_noise.count_err
    )?;
    writeln!(
        file,
        "dark rate (noise) = {} +/- {} Hz",
        with_noise.rate_hz, with_noise.rate_err_hz
    )?;
    writeln!(file, "mean voltage = {} mV", noise.reference_mv)?;
    writeln!(
        file,
        "noise rate @ {} mV = {} Hz",
        noise.low_threshold_mv, results.noise_rate_low_hz
    )?;
    writeln!(
        file,
        "noise rate @ {} mV = {} Hz",
        noise.threshold_mv, results.noise_rate_hz
    )
}

fn summary_csv(file: &mut dyn Write, results: &DarkResults) -> Result<(), Error> {
    let (dark, with_noise, noise) = (&results.dark, &results.with_noise, &results.noise);
    writeln!(
        file,
        "file_id,entries,rejected,dark_counts,dark_counts_err,dark_rate_hz,dark_rate_err_hz,\
        with_noise_counts,with_noise_counts_err,with_noise_rate_hz,with_noise_rate_err_hz,\
        mean_mv,noise_threshold_mv,noise_floor_rate_hz,noise_low_threshold_mv,noise_floor_low_rate_hz"
    )?;
    writeln!(
        file,
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        results.file_id,
        results.num_entries,
        results.rejected,
        dark.count,
        dark.count_err,
        dark.rate_hz,
        dark.rate_err_hz,
        with_noise.count,
        with_noise.count_err,
        with_noise.rate_hz,
        with_noise.rate_err_hz,
        noise.reference_mv,
        noise.threshold_mv,
        results.noise_rate_hz,
        noise.low_threshold_mv,
        results.noise_rate_low_hz
    )
}

fn rejected_types(file: &mut dyn Write, results: &DarkResults) -> Result<(), Error> {
    let counts = &results.rejections;
    writeln!(file, "peak_low,av_neg_rej,av_pos_rej,peak_high,rise_rej,min_noise")?;
    writeln!(
        file,
        "{},{},{},{},{},{}",
        counts.peak_low,
        counts.av_neg_rej,
        counts.av_pos_rej,
        counts.peak_high,
        counts.rise_rej,
        counts.min_noise
    )
}

/// Writes every report of a run into `dir`, creating it if needed.
pub(crate) fn write_report(dir: &Path, results: &DarkResults) -> StoreResult<()> {
    let io_error = |path: &Path| {
        let path = path.to_owned();
        move |source: Error| StoreError::Io { path, source }
    };
    fs::create_dir_all(dir).map_err(io_error(dir))?;

    let path = dir.join("dark_results.txt");
    write_text(&path, |file| summary(file, results)).map_err(io_error(&path))?;

    let path = dir.join("dark_results.csv");
    write_text(&path, |file| summary_csv(file, results)).map_err(io_error(&path))?;

    let path = dir.join("rejected_types.csv");
    write_text(&path, |file| rejected_types(file, results)).map_err(io_error(&path))?;

    let path = dir.join("dark_hits.csv");
    results
        .hits
        .iter()
        .copied()
        .save_to_file(&path, "entry")
        .map_err(io_error(&path))?;

    let path = dir.join("rejected_waveforms.csv");
    results
        .rejected_entries
        .iter()
        .copied()
        .save_to_file(&path, "entry,category")
        .map_err(io_error(&path))?;

    info!("Reports written to {}", dir.display());
    Ok(())
}
