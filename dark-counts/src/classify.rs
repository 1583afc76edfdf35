//! Sorting of cooked events into dark counts and the reasons for rejecting the rest.
use crate::{
    detrend::{Detrended, detrend},
    parameters::DarkParameters,
};
use pmt_common::{Calibration, CookedEvent, Real, RunContext, SampleIndex};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub(crate) enum Outcome {
    #[strum(to_string = "dark_count")]
    DarkCount,
    /// A deep minimum without a peak above threshold.
    #[strum(to_string = "min_noise")]
    MinimumLed,
    #[strum(to_string = "av_neg_rej")]
    NegativeRatio,
    #[strum(to_string = "av_pos_rej")]
    PositiveRatio,
    /// Below threshold, either as cooked or once de-trended.
    #[strum(to_string = "peak_low")]
    PeakTooLow { detrended: bool },
    #[strum(to_string = "peak_high")]
    PeakTooHigh,
    #[strum(to_string = "rise_rej")]
    RiseShape,
}

impl Outcome {
    pub(crate) fn is_dark_count(&self) -> bool {
        matches!(self, Outcome::DarkCount)
    }

    /// Rejections which are removed from the exposure of the dark rate.
    pub(crate) fn is_detrended_rejection(&self) -> bool {
        matches!(
            self,
            Outcome::PeakTooHigh | Outcome::PeakTooLow { detrended: true }
        )
    }
}

pub(crate) struct Classifier<'a> {
    parameters: &'a DarkParameters,
    calibration: Calibration,
    ns_per_sample: Real,
}

impl<'a> Classifier<'a> {
    pub(crate) fn new(context: &RunContext, parameters: &'a DarkParameters) -> Self {
        Self {
            parameters,
            calibration: context.stored_calibration(),
            ns_per_sample: context.metadata.ns_per_sample,
        }
    }

    /// Whether the cooked peak alone counts as a hit, noise included.
    pub(crate) fn is_over_threshold(&self, event: &CookedEvent) -> bool {
        Real::from(event.peak_mv) > self.parameters.threshold_mv
    }

    /// The noise cuts, which need only the cooked features.
    fn noise_cut(&self, peak_mv: Real, min_mv: Real) -> Option<Outcome> {
        let threshold = self.parameters.threshold_mv;
        if min_mv < self.parameters.min_led_cut_mv && peak_mv < threshold {
            Some(Outcome::MinimumLed)
        } else if peak_mv < -2.0 * min_mv && peak_mv > threshold {
            Some(Outcome::NegativeRatio)
        } else if peak_mv < 2.0 * min_mv && peak_mv > threshold {
            Some(Outcome::PositiveRatio)
        } else if peak_mv < threshold {
            Some(Outcome::PeakTooLow { detrended: false })
        } else {
            None
        }
    }

    pub(crate) fn classify(&self, event: &CookedEvent) -> Outcome {
        let peak_mv = Real::from(event.peak_mv);
        if let Some(outcome) = self.noise_cut(peak_mv, Real::from(event.min_mv)) {
            return outcome;
        }

        let amplitude: Vec<Real> = event
            .adc
            .iter()
            .map(|&adc| self.calibration.adc_to_voltage(adc))
            .collect();
        let detrended = detrend(&amplitude, self.ns_per_sample);
        trace!(
            "{} of {} samples within one deviation, mean {}, baseline {}",
            detrended.num_survivors,
            amplitude.len(),
            detrended.survivor_mean,
            detrended.baseline
        );
        if let Some(outcome) = self.detrended_cut(&detrended) {
            return outcome;
        }

        let rise_threshold = Real::from(event.base_mv) + self.parameters.rise_fraction * peak_mv;
        let rising = rise_samples(
            &amplitude,
            event.peak_sample,
            rise_threshold,
            self.parameters.rise_bins,
        );
        if rising == 0 || rising == self.parameters.rise_bins {
            Outcome::RiseShape
        } else {
            Outcome::DarkCount
        }
    }

    /// Accepts a corrected maximum within `peak_window_mv` above the threshold,
    /// both relative to the residual baseline.
    fn detrended_cut(&self, detrended: &Detrended) -> Option<Outcome> {
        let max_mv = detrended.max();
        let threshold = self.parameters.threshold_mv + detrended.baseline;
        if max_mv > threshold + self.parameters.peak_window_mv {
            Some(Outcome::PeakTooHigh)
        } else if max_mv < threshold {
            Some(Outcome::PeakTooLow { detrended: true })
        } else {
            None
        }
    }
}

/// Counts the consecutive samples above `threshold`, walking back from the peak
/// and stopping after `max_samples` or at the first sample.
pub(crate) fn rise_samples(
    amplitude: &[Real],
    peak_sample: SampleIndex,
    threshold: Real,
    max_samples: usize,
) -> usize {
    amplitude.get(..=peak_sample).map_or(0, |leading| {
        leading
            .iter()
            .rev()
            .take(max_samples)
            .take_while(|&&mv| mv > threshold)
            .count()
    })
}
