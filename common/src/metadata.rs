use crate::{
    BASELINE_WINDOW_NS, Real, SampleIndex,
    calibration::{Calibration, Polarity},
    file_name::{FileId, RunIdentity},
    frame::FrameAnomalies,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum Digitiser {
    /// V1730 VME board.
    #[default]
    #[strum(to_string = "V")]
    Vme,
    /// DT5751 desktop board.
    #[strum(to_string = "D")]
    Desktop,
}

impl Digitiser {
    pub fn from_code(code: char) -> Self {
        match code.to_ascii_uppercase() {
            'V' => Digitiser::Vme,
            'D' => Digitiser::Desktop,
            other => {
                warn!("Unknown digitiser code '{other}', assuming VME (V).");
                Digitiser::Vme
            }
        }
    }

    /// The sampling frequency in MHz. Only the desktop board has selectable rates.
    pub fn sample_frequency_mhz(&self, sample_setting: char) -> u32 {
        match self {
            Digitiser::Vme => 500,
            Digitiser::Desktop => match sample_setting {
                '0' => 5000,
                '1' => 2500,
                '2' => 1000,
                '3' => 750,
                other => {
                    warn!("Unknown desktop sampling setting '{other}', assuming 1000 MHz.");
                    1000
                }
            },
        }
    }

    pub fn num_adc_bins(&self) -> u32 {
        match self {
            Digitiser::Vme => 16384,
            Digitiser::Desktop => 4096,
        }
    }

    pub fn range_v(&self) -> Real {
        match self {
            Digitiser::Vme => 2.0,
            Digitiser::Desktop => 1.0,
        }
    }
}

/// Acquisition settings which cannot be read from the data itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSettings {
    pub digitiser: Digitiser,
    pub sample_setting: char,
    pub polarity: Polarity,
    pub amp_gain: Real,
    pub first_mask_bin: Option<SampleIndex>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            digitiser: Digitiser::Vme,
            sample_setting: '2',
            polarity: Polarity::Negative,
            amp_gain: 10.0,
            first_mask_bin: None,
        }
    }
}

/// Trigger statistics gathered while cooking a run.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaqSummary {
    pub missed_events: u64,
    pub counter_regressions: u64,
    pub wrap_count: u32,
    pub elapsed_s: Real,
    pub mean_trigger_frequency_khz: Real,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub file_id: FileId,
    pub identity: RunIdentity,
    pub digitiser: Digitiser,
    pub sample_frequency_mhz: u32,
    pub num_samples: usize,
    pub num_adc_bins: u32,
    pub range_v: Real,
    pub ns_per_sample: Real,
    pub mv_per_bin: Real,
    pub length_ns: Real,
    pub polarity: Polarity,
    pub amp_gain: Real,
    /// Samples from this index onwards are masked, `None` when no mask is applied.
    pub first_mask_bin: Option<SampleIndex>,
    pub frame_anomalies: FrameAnomalies,
    /// Set if any event had no samples inside the baseline window.
    pub empty_baseline_window: bool,
    pub daq: Option<DaqSummary>,
}

impl RunMetadata {
    pub fn new(
        settings: &AcquisitionSettings,
        num_samples: usize,
        identity: RunIdentity,
        file_id: FileId,
    ) -> Self {
        let digitiser = settings.digitiser;
        let sample_frequency_mhz = digitiser.sample_frequency_mhz(settings.sample_setting);
        let num_adc_bins = digitiser.num_adc_bins();
        let range_v = digitiser.range_v();
        let ns_per_sample = 1000.0 / Real::from(sample_frequency_mhz);
        let mv_per_bin = 1000.0 * range_v / Real::from(num_adc_bins);
        let calibration = Calibration::new(
            settings.polarity,
            mv_per_bin,
            range_v * 1000.0,
            num_adc_bins,
            settings.amp_gain,
        );
        if let Some(first_mask_bin) = settings.first_mask_bin.filter(|&bin| bin >= num_samples) {
            warn!("First mask bin {first_mask_bin} is beyond the {num_samples} samples.");
        }
        Self {
            file_id,
            identity,
            digitiser,
            sample_frequency_mhz,
            num_samples,
            num_adc_bins,
            range_v,
            ns_per_sample,
            mv_per_bin,
            length_ns: ns_per_sample * num_samples as Real,
            polarity: settings.polarity,
            amp_gain: calibration.amp_gain(),
            first_mask_bin: settings.first_mask_bin,
            frame_anomalies: Default::default(),
            empty_baseline_window: false,
            daq: None,
        }
    }

    pub fn range_mv(&self) -> Real {
        self.range_v * 1000.0
    }

    pub fn calibration(&self) -> Calibration {
        Calibration::new(
            self.polarity,
            self.mv_per_bin,
            self.range_mv(),
            self.num_adc_bins,
            self.amp_gain,
        )
    }

    pub fn sample_time_ns(&self, index: SampleIndex) -> Real {
        index as Real * self.ns_per_sample
    }

    pub fn in_baseline_window(&self, index: SampleIndex) -> bool {
        self.sample_time_ns(index) <= BASELINE_WINDOW_NS
    }

    pub fn is_masked(&self, index: SampleIndex) -> bool {
        self.first_mask_bin
            .is_some_and(|first_mask_bin| index >= first_mask_bin)
    }

    /// Whether the run carries any warning which may affect its results.
    pub fn is_suspect(&self) -> bool {
        self.frame_anomalies.is_suspect() || self.empty_baseline_window
    }

    pub fn log_constants(&self) {
        info!(
            "{}: digitiser {}, {} MHz, {} samples, {} ADC bins, {} V",
            self.file_id,
            self.digitiser,
            self.sample_frequency_mhz,
            self.num_samples,
            self.num_adc_bins,
            self.range_v
        );
        info!(
            "{}: {:.3} ns per sample, {:.5} mV per bin, {} ns per waveform, gain {}, polarity {}, mask {:?}",
            self.file_id,
            self.ns_per_sample,
            self.mv_per_bin,
            self.length_ns,
            self.amp_gain,
            self.polarity,
            self.first_mask_bin
        );
    }
}

/// Read-only state shared by every stage processing one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub metadata: RunMetadata,
    pub calibration: Calibration,
}

impl RunContext {
    pub fn new(metadata: RunMetadata) -> Self {
        let calibration = metadata.calibration();
        Self {
            metadata,
            calibration,
        }
    }

    /// Calibration of the ADC codes held in cooked records.
    pub fn stored_calibration(&self) -> Calibration {
        self.calibration.for_stored_adc()
    }
}
