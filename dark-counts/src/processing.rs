use crate::{
    classify::{Classifier, Outcome},
    noise::{NoiseFloor, noise_floor},
    parameters::DarkParameters,
    report::write_report,
};
use pmt_common::{FileId, Real, RunContext, RunStore, store::StoreResult};
use std::path::Path;
use tracing::{Span, field, info, instrument, warn};

/// A count, its Poisson error, and the rate it implies over some exposure.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub(crate) struct RateEstimate {
    pub(crate) count: usize,
    pub(crate) count_err: Real,
    pub(crate) rate_hz: Real,
    pub(crate) rate_err_hz: Real,
}

impl RateEstimate {
    /// The rate of `count` hits in `exposure` waveforms of `length_ns` each.
    /// A zero count, exposure or length gives a rate and error of zero.
    pub(crate) fn new(count: usize, exposure: usize, length_ns: Real) -> Self {
        let count_err = (count as Real).sqrt();
        let rate_hz = rate_hz(count, exposure, length_ns);
        let rate_err_hz = if count == 0 {
            0.0
        } else {
            count_err / count as Real * rate_hz
        };
        Self {
            count,
            count_err,
            rate_hz,
            rate_err_hz,
        }
    }
}

pub(crate) fn rate_hz(count: usize, exposure: usize, length_ns: Real) -> Real {
    if exposure == 0 || length_ns <= 0.0 {
        0.0
    } else {
        count as Real / exposure as Real / length_ns * 1e9
    }
}

/// Rejections by category, in the order they are reported.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct RejectionCounts {
    pub(crate) peak_low: usize,
    pub(crate) av_neg_rej: usize,
    pub(crate) av_pos_rej: usize,
    pub(crate) peak_high: usize,
    pub(crate) rise_rej: usize,
    pub(crate) min_noise: usize,
}

impl RejectionCounts {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::DarkCount => {}
            Outcome::MinimumLed => self.min_noise += 1,
            Outcome::NegativeRatio => self.av_neg_rej += 1,
            Outcome::PositiveRatio => self.av_pos_rej += 1,
            Outcome::PeakTooLow { .. } => self.peak_low += 1,
            Outcome::PeakTooHigh => self.peak_high += 1,
            Outcome::RiseShape => self.rise_rej += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DarkResults {
    pub(crate) file_id: FileId,
    pub(crate) num_entries: usize,
    /// Rejections made after de-trending, which are removed from the exposure.
    pub(crate) rejected: usize,
    pub(crate) dark: RateEstimate,
    pub(crate) with_noise: RateEstimate,
    pub(crate) rejections: RejectionCounts,
    pub(crate) noise: NoiseFloor,
    pub(crate) noise_rate_hz: Real,
    pub(crate) noise_rate_low_hz: Real,
    pub(crate) hits: Vec<usize>,
    pub(crate) rejected_entries: Vec<(usize, Outcome)>,
}

/// Accumulates the outcome of every entry of a run.
#[derive(Default, Debug)]
pub(crate) struct DarkTally {
    num_entries: usize,
    num_over_threshold: usize,
    rejected: usize,
    rejections: RejectionCounts,
    hits: Vec<usize>,
    rejected_entries: Vec<(usize, Outcome)>,
}

impl DarkTally {
    pub(crate) fn record(&mut self, entry: usize, over_threshold: bool, outcome: Outcome) {
        self.num_entries += 1;
        if over_threshold {
            self.num_over_threshold += 1;
        }
        if outcome.is_dark_count() {
            self.hits.push(entry);
            return;
        }
        if outcome.is_detrended_rejection() {
            self.rejected += 1;
        }
        self.rejections.record(outcome);
        self.rejected_entries.push((entry, outcome));
    }

    pub(crate) fn finish(self, file_id: FileId, length_ns: Real, noise: NoiseFloor) -> DarkResults {
        let exposure = self.num_entries.saturating_sub(self.rejected);
        DarkResults {
            file_id,
            num_entries: self.num_entries,
            rejected: self.rejected,
            dark: RateEstimate::new(self.hits.len(), exposure, length_ns),
            with_noise: RateEstimate::new(self.num_over_threshold, self.num_entries, length_ns),
            rejections: self.rejections,
            noise_rate_hz: rate_hz(noise.counts, self.num_entries, length_ns),
            noise_rate_low_hz: rate_hz(noise.low_counts, self.num_entries, length_ns),
            noise,
            hits: self.hits,
            rejected_entries: self.rejected_entries,
        }
    }
}

/// Runs the noise and dark count analyses over one cooked run, writing the reports
/// to `{output_dir}/{file_id}/`. The store's own directory is used if none is given.
#[instrument(skip_all, fields(path = %path.display(), file_id = field::Empty, num_events = field::Empty))]
pub(crate) fn analyse_run(
    path: &Path,
    parameters: &DarkParameters,
    output_dir: Option<&Path>,
) -> StoreResult<DarkResults> {
    let store = RunStore::locate(path)?;
    Span::current().record("file_id", store.file_id().as_str());

    let metadata = store.read_metadata()?;
    if metadata.is_suspect() {
        warn!(
            "Run {} is flagged as suspect: {:?}, empty baseline window: {}",
            metadata.file_id, metadata.frame_anomalies, metadata.empty_baseline_window
        );
    }
    let events = store.read_cooked()?;
    Span::current().record("num_events", events.len());
    if events.is_empty() {
        warn!("No cooked events in {}", store.cooked_path().display());
    }
    if let Some(event) = events.iter().find(|event| event.adc.len() != metadata.num_samples) {
        warn!(
            "Cooked waveform of {} samples in a run of {} samples",
            event.adc.len(),
            metadata.num_samples
        );
    }

    let context = RunContext::new(metadata);
    let noise = noise_floor(&context, &events);
    info!(
        "Mean voltage {:.2} mV, noise thresholds {:.2} mV and {:.2} mV",
        noise.reference_mv, noise.low_threshold_mv, noise.threshold_mv
    );

    let classifier = Classifier::new(&context, parameters);
    let mut tally = DarkTally::default();
    for (entry, event) in events.iter().enumerate() {
        tally.record(
            entry,
            classifier.is_over_threshold(event),
            classifier.classify(event),
        );
    }
    let metadata = &context.metadata;
    let results = tally.finish(metadata.file_id.clone(), metadata.length_ns, noise);

    info!(
        "{} entries, {} rejected after de-trending",
        results.num_entries, results.rejected
    );
    info!(
        "Dark counts (noise rejected) = {} +/- {:.0}, rate {:.0} +/- {:.0} Hz",
        results.dark.count, results.dark.count_err, results.dark.rate_hz, results.dark.rate_err_hz
    );
    info!(
        "Dark counts (with noise) = {} +/- {:.0}, rate {:.0} +/- {:.0} Hz",
        results.with_noise.count,
        results.with_noise.count_err,
        results.with_noise.rate_hz,
        results.with_noise.rate_err_hz
    );

    let report_dir = output_dir
        .unwrap_or_else(|| store.dir())
        .join(store.file_id().as_str());
    write_report(&report_dir, &results)?;
    Ok(results)
}
