use crate::{Adc, Real};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Voltages are normalised to this pre-amplifier gain.
pub const REFERENCE_GAIN: Real = 10.0;

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum Polarity {
    #[default]
    #[strum(to_string = "N")]
    Negative,
    #[strum(to_string = "P")]
    Positive,
}

impl Polarity {
    /// Reads the single character polarity code, falling back to negative.
    pub fn from_code(code: char) -> Self {
        match code.to_ascii_uppercase() {
            'N' => Polarity::Negative,
            'P' => Polarity::Positive,
            other => {
                warn!("Unknown pulse polarity code '{other}', assuming negative (N).");
                Polarity::Negative
            }
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Polarity::Negative)
    }
}

/// Converts between ADC codes and gain normalised millivolts for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    polarity: Polarity,
    mv_per_bin: Real,
    range_mv: Real,
    num_adc_bins: u32,
    amp_gain: Real,
}

impl Calibration {
    pub fn new(
        polarity: Polarity,
        mv_per_bin: Real,
        range_mv: Real,
        num_adc_bins: u32,
        amp_gain: Real,
    ) -> Self {
        Self {
            polarity,
            mv_per_bin,
            range_mv,
            num_adc_bins,
            amp_gain: validated_gain(amp_gain),
        }
    }

    pub fn amp_gain(&self) -> Real {
        self.amp_gain
    }

    /// Stored ADC codes have already been inverted for negative pulses,
    /// so they are decoded as positive polarity at the same gain.
    pub fn for_stored_adc(&self) -> Self {
        Self {
            polarity: Polarity::Positive,
            ..*self
        }
    }

    /// Voltage difference spanned by one ADC code once normalised to the reference gain.
    pub fn scaled_mv_per_bin(&self) -> Real {
        self.scale_to_reference_gain(self.mv_per_bin)
    }

    fn scale_to_reference_gain(&self, mv: Real) -> Real {
        mv / self.amp_gain * REFERENCE_GAIN
    }

    fn unscale_from_reference_gain(&self, mv: Real) -> Real {
        mv * self.amp_gain / REFERENCE_GAIN
    }

    pub fn adc_to_voltage(&self, adc: Adc) -> Real {
        let mv = Real::from(adc) * self.mv_per_bin - self.range_mv / 2.0;
        let mv = if self.polarity.is_negative() { -mv } else { mv };
        self.scale_to_reference_gain(mv)
    }

    /// Inverse of [Self::adc_to_voltage], rounded to the nearest code.
    pub fn voltage_to_adc(&self, mv: Real) -> Adc {
        let mv = self.unscale_from_reference_gain(mv);
        let mv = if self.polarity.is_negative() { -mv } else { mv };
        let code = (mv + self.range_mv / 2.0) / self.mv_per_bin;
        // `as` saturates at the bounds of Adc
        code.round() as Adc
    }

    /// Reflects negative pulses about the middle of the ADC range, so that pulses
    /// are stored as positive excursions: `adc' = n/2 - (adc - n/2)`.
    pub fn to_stored_adc(&self, adc: Adc) -> Adc {
        if self.polarity.is_negative() {
            let inverted = i32::try_from(self.num_adc_bins).unwrap_or(i32::MAX) - i32::from(adc);
            inverted.clamp(Adc::MIN.into(), Adc::MAX.into()) as Adc
        } else {
            adc
        }
    }

    /// The stored code of a given voltage, used to fill masked samples.
    pub fn voltage_to_stored_adc(&self, mv: Real) -> Adc {
        self.to_stored_adc(self.voltage_to_adc(mv))
    }
}

fn validated_gain(amp_gain: Real) -> Real {
    if amp_gain.is_finite() && amp_gain > 0.0 {
        amp_gain
    } else {
        warn!("Invalid pre-amp gain {amp_gain}, using {REFERENCE_GAIN}.");
        REFERENCE_GAIN
    }
}
