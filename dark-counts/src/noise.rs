//! Noise floor of a run, from histograms of the cooked mean and minimum voltages.
use ndarray::array;
use ndarray_stats::histogram::{Bins, Edges, Grid, Histogram};
use noisy_float::types::N64;
use pmt_common::{CookedEvent, Real, RunContext};
use tracing::warn;

/// Noise thresholds, below the most common mean voltage.
pub(crate) const NOISE_THRESHOLD_MV: Real = 10.0;
pub(crate) const NOISE_LOW_THRESHOLD_MV: Real = 5.0;

/// Edges of `round(range / width) + 1` bins of `width`, centred on the full scale range.
pub(crate) fn make_bins_edges(range_mv: Real, width: Real) -> Edges<N64> {
    let num_bins = (range_mv / width).round() as usize + 1;
    let start = -range_mv / 2.0 - width / 2.0;
    (0..=num_bins)
        .filter_map(|i| N64::try_new(start + i as Real * width))
        .collect::<Vec<_>>()
        .into()
}

/// A one dimensional voltage histogram which also counts the values outside its range.
pub(crate) struct VoltageHistogram {
    histogram: Histogram<N64>,
    lower_edge: Option<N64>,
    underflow: usize,
    overflow: usize,
}

impl VoltageHistogram {
    pub(crate) fn new(edges: Edges<N64>) -> Self {
        let lower_edge = (!edges.is_empty()).then(|| edges[0]);
        Self {
            histogram: Histogram::new(Grid::from(vec![Bins::new(edges)])),
            lower_edge,
            underflow: 0,
            overflow: 0,
        }
    }

    fn bins(&self) -> &Bins<N64> {
        &self.histogram.grid().projections()[0]
    }

    pub(crate) fn record(&mut self, mv: Real) {
        let Some(value) = N64::try_new(mv) else {
            warn!("Ignoring voltage {mv}");
            return;
        };
        if self.histogram.add_observation(&array![value]).is_err() {
            if self.lower_edge.is_some_and(|lower_edge| value < lower_edge) {
                self.underflow += 1;
            } else {
                self.overflow += 1;
            }
        }
    }

    /// Centre of the most populated bin, the first of any ties.
    pub(crate) fn mode(&self) -> Option<Real> {
        let (bin, _) = self.histogram.counts().iter().enumerate().fold(
            None,
            |max: Option<(usize, usize)>, (bin, &count)| match max {
                Some((_, max_count)) if max_count >= count => max,
                _ => Some((bin, count)),
            },
        )?;
        let range = self.bins().index(bin);
        Some((range.start.raw() + range.end.raw()) / 2.0)
    }

    /// Number of values in the bin holding `mv` and every bin below it, underflow included.
    pub(crate) fn count_to_bin_of(&self, mv: Real) -> usize {
        let counts = self.histogram.counts();
        let in_range: usize = match N64::try_new(mv).and_then(|value| self.bins().index_of(&value)) {
            Some(bin) => counts.iter().take(bin + 1).sum(),
            None if self
                .lower_edge
                .is_some_and(|lower_edge| mv < lower_edge.raw()) =>
            {
                0
            }
            None => counts.sum() + self.overflow,
        };
        self.underflow + in_range
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NoiseFloor {
    /// The most common mean voltage.
    pub(crate) reference_mv: Real,
    pub(crate) threshold_mv: Real,
    pub(crate) low_threshold_mv: Real,
    pub(crate) counts: usize,
    pub(crate) low_counts: usize,
}

/// Fills the mean and minimum voltage histograms over the run, and counts the events
/// whose minimum reaches each noise threshold.
pub(crate) fn noise_floor(context: &RunContext, events: &[CookedEvent]) -> NoiseFloor {
    let metadata = &context.metadata;
    let edges = make_bins_edges(
        metadata.range_v.round() * 1000.0,
        context.calibration.scaled_mv_per_bin(),
    );
    let mut mean = VoltageHistogram::new(edges.clone());
    let mut min = VoltageHistogram::new(edges);
    for event in events {
        mean.record(event.mean_mv.into());
        min.record(event.min_mv.into());
    }

    let reference_mv = mean.mode().unwrap_or_default();
    let threshold_mv = reference_mv - NOISE_THRESHOLD_MV;
    let low_threshold_mv = reference_mv - NOISE_LOW_THRESHOLD_MV;
    NoiseFloor {
        reference_mv,
        threshold_mv,
        low_threshold_mv,
        counts: min.count_to_bin_of(threshold_mv),
        low_counts: min.count_to_bin_of(low_threshold_mv),
    }
}
