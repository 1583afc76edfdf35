//! Per-event feature extraction: baseline, peak, minimum and mean of one waveform.
use pmt_common::{Adc, CookedEvent, Millivolts, Real, RunContext};

/// A cooked event, and whether its baseline window was empty.
pub(crate) struct Extracted {
    pub(crate) event: CookedEvent,
    pub(crate) empty_baseline_window: bool,
}

pub(crate) struct FeatureExtractor<'a> {
    context: &'a RunContext,
    save_waveforms: bool,
}

impl<'a> FeatureExtractor<'a> {
    pub(crate) fn new(context: &'a RunContext, save_waveforms: bool) -> Self {
        Self {
            context,
            save_waveforms,
        }
    }

    /// Mean voltage of the samples inside the baseline window, `None` if there are none.
    pub(crate) fn baseline(&self, wave_mv: &[Real]) -> Option<Real> {
        let metadata = &self.context.metadata;
        let (sum, count) = wave_mv
            .iter()
            .enumerate()
            .filter(|&(index, _)| metadata.in_baseline_window(index))
            .fold((Real::default(), 0usize), |(sum, count), (_, &mv)| {
                (sum + mv, count + 1)
            });
        (count > 0).then(|| sum / count as Real)
    }

    pub(crate) fn cook(&self, samples: &[Adc], start_s: f32) -> Extracted {
        let metadata = &self.context.metadata;
        let calibration = &self.context.calibration;

        let mut wave_mv: Vec<Real> = samples
            .iter()
            .map(|&adc| calibration.adc_to_voltage(adc))
            .collect();
        let baseline = self.baseline(&wave_mv);
        let base_mv = baseline.unwrap_or_default();

        let mut adc = Vec::with_capacity(samples.len());
        let mut min_mv: Real = 1000.0;
        let mut peak_mv: Real = -1000.0;
        let mut peak_sample = 0;
        let mut sum_mv = 0.0;
        for (index, (&raw, mv)) in samples.iter().zip(wave_mv.iter_mut()).enumerate() {
            if metadata.is_masked(index) {
                *mv = 0.0;
                adc.push(calibration.voltage_to_stored_adc(base_mv));
            } else {
                *mv -= base_mv;
                adc.push(calibration.to_stored_adc(raw));
            }
            if *mv < min_mv {
                min_mv = *mv;
            }
            // ties go to the later sample
            if *mv >= peak_mv {
                peak_mv = *mv;
                peak_sample = index;
            }
            sum_mv += *mv;
        }
        let mean_mv = if samples.is_empty() {
            0.0
        } else {
            sum_mv / samples.len() as Real
        };

        Extracted {
            event: CookedEvent {
                adc,
                peak_mv: peak_mv as Millivolts,
                peak_sample,
                min_mv: min_mv as Millivolts,
                mean_mv: mean_mv as Millivolts,
                base_mv: base_mv as Millivolts,
                start_s,
                wave_mv: self
                    .save_waveforms
                    .then(|| wave_mv.iter().map(|&mv| mv as Millivolts).collect()),
            },
            empty_baseline_window: baseline.is_none(),
        }
    }
}
