use crate::{Adc, Millivolts, SampleIndex};
use serde::{Deserialize, Serialize};

/// Features of one calibrated, baseline subtracted waveform.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookedEvent {
    /// Samples re-encoded as positive polarity ADC codes, masked samples hold the baseline.
    pub adc: Vec<Adc>,
    pub peak_mv: Millivolts,
    /// Index of the last sample equal to the peak.
    pub peak_sample: SampleIndex,
    pub min_mv: Millivolts,
    pub mean_mv: Millivolts,
    pub base_mv: Millivolts,
    /// Trigger time relative to the first event of the run.
    pub start_s: f32,
    /// Calibrated waveform, only kept on request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave_mv: Option<Vec<Millivolts>>,
}
