use clap::Args;
use pmt_common::Real;

#[derive(Debug, Clone, Args)]
pub(crate) struct DarkParameters {
    /// Minimum peak voltage of a dark count, in mV
    #[clap(long, default_value = "10")]
    pub(crate) threshold_mv: Real,

    /// Width of the accepted window of corrected peaks, above the threshold, in mV
    #[clap(long, default_value = "80")]
    pub(crate) peak_window_mv: Real,

    /// Number of samples before the peak inspected by the rise check
    #[clap(long, default_value = "10")]
    pub(crate) rise_bins: usize,

    /// Fraction of the peak which the rising edge must exceed
    #[clap(long, default_value = "0.25")]
    pub(crate) rise_fraction: Real,

    /// Events with a minimum below this and a sub-threshold peak are noise, in mV
    #[clap(long, default_value = "-2.5", allow_negative_numbers = true)]
    pub(crate) min_led_cut_mv: Real,
}

impl Default for DarkParameters {
    fn default() -> Self {
        Self {
            threshold_mv: 10.0,
            peak_window_mv: 80.0,
            rise_bins: 10,
            rise_fraction: 0.25,
            min_led_cut_mv: -2.5,
        }
    }
}
