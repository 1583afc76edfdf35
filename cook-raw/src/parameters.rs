use clap::Args;
use pmt_common::{AcquisitionSettings, Digitiser, Polarity, Real, SampleIndex};
use std::path::PathBuf;

#[derive(Debug, Clone, Args)]
pub(crate) struct AcquisitionParameters {
    /// Digitiser model: V (VME V1730) or D (desktop DT5751)
    #[clap(long, default_value = "V")]
    pub(crate) digitiser: char,

    /// Desktop sampling setting: 0 (5 GHz), 1 (2.5 GHz), 2 (1 GHz) or 3 (750 MHz)
    #[clap(long, default_value = "2")]
    pub(crate) sample_setting: char,

    /// Pulse polarity: N (negative) or P (positive)
    #[clap(long, default_value = "N")]
    pub(crate) polarity: char,

    /// Pre-amplifier gain, voltages are normalised to a gain of 10
    #[clap(long, default_value = "10")]
    pub(crate) amp_gain: Real,

    /// Samples from this index onwards are masked
    #[clap(long)]
    pub(crate) first_mask_bin: Option<SampleIndex>,
}

impl AcquisitionParameters {
    /// Resolves the single character codes, warning about any which are unknown.
    pub(crate) fn settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            digitiser: Digitiser::from_code(self.digitiser),
            sample_setting: self.sample_setting,
            polarity: Polarity::from_code(self.polarity),
            amp_gain: self.amp_gain,
            first_mask_bin: self.first_mask_bin,
        }
    }
}

pub(crate) struct CookOptions {
    pub(crate) settings: AcquisitionSettings,
    pub(crate) output_dir: Option<PathBuf>,
    pub(crate) save_waveforms: bool,
    pub(crate) max_events: Option<usize>,
}
