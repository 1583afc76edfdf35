//! Two pass linear de-trending of a waveform, with a single round of outlier rejection
//! between the passes.
use linregress::{FormulaRegressionBuilder, RegressionDataBuilder};
use ndarray::{Array1, ArrayView1, s};
use pmt_common::Real;

/// A straight line `intercept + slope * x`.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub(crate) struct LinearFit {
    pub(crate) intercept: Real,
    pub(crate) slope: Real,
}

impl LinearFit {
    /// Unweighted least squares fit of `y` against `x`, `None` if `x` does not take at
    /// least two values or the regression fails.
    pub(crate) fn least_squares(x: ArrayView1<Real>, y: ArrayView1<Real>) -> Option<Self> {
        let first = *x.iter().next()?;
        if x.iter().all(|&x| x == first) {
            return None;
        }
        let data = RegressionDataBuilder::new()
            .build_from(vec![("y", y.to_vec()), ("x", x.to_vec())])
            .ok()?;
        let parameters = FormulaRegressionBuilder::new()
            .data(&data)
            .formula("y ~ x")
            .fit_without_statistics()
            .ok()?;
        match parameters[..] {
            [intercept, slope] => Some(Self { intercept, slope }),
            _ => None,
        }
    }

    pub(crate) fn at(&self, x: Real) -> Real {
        self.intercept + self.slope * x
    }

    fn along(&self, x: ArrayView1<Real>) -> Array1<Real> {
        x.mapv(|x| self.at(x))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Detrended {
    /// Residual level of the surviving samples.
    pub(crate) baseline: Real,
    /// Every sample, outliers included, with both fits removed.
    pub(crate) corrected: Vec<Real>,
    pub(crate) num_survivors: usize,
    /// Sum of the surviving samples over the full sample count.
    pub(crate) survivor_mean: Real,
}

impl Detrended {
    pub(crate) fn max(&self) -> Real {
        self.corrected.iter().copied().fold(Real::NEG_INFINITY, Real::max)
    }
}

/// Removes the mean and a linear trend from `amplitude`, then refits the trend using only
/// the samples within one standard deviation, and removes that from every sample.
///
/// Sample `i` is placed at `i * ns_per_sample`. The survivors are refitted as if they
/// were consecutive samples, so the second line is fitted over the first
/// `num_survivors` sample times but subtracted at every sample's own time.
/// A fit with fewer than two distinct sample times is taken to be zero.
pub(crate) fn detrend(amplitude: &[Real], ns_per_sample: Real) -> Detrended {
    let amplitude = ArrayView1::from(amplitude);
    let Some(mean) = amplitude.mean() else {
        return Detrended {
            baseline: 0.0,
            corrected: Vec::new(),
            num_survivors: 0,
            survivor_mean: 0.0,
        };
    };
    let n = amplitude.len() as Real;
    let time = Array1::from_iter((0..amplitude.len()).map(|index| index as Real * ns_per_sample));

    let centred = &amplitude - mean;
    let first = LinearFit::least_squares(time.view(), centred.view()).unwrap_or_default();
    let once = centred - first.along(time.view());

    // deviations are taken about the mean of the uncorrected waveform
    let sd = (&once - mean)
        .mapv(|mv| mv.powi(2))
        .mean()
        .unwrap_or_default()
        .sqrt();
    let survivors: Array1<Real> = once
        .iter()
        .copied()
        .filter(|mv| (mv - mean).abs() < sd)
        .collect();

    // divides by every sample, not just the survivors
    let survivor_mean = survivors.sum() / n;
    let survivors = survivors - survivor_mean;
    let packed = time.slice(s![..survivors.len()]);
    let second = LinearFit::least_squares(packed, survivors.view()).unwrap_or_default();

    let corrected = (once - survivor_mean - second.along(time.view())).to_vec();
    let baseline = (&survivors - &second.along(packed)).sum() / n;

    Detrended {
        baseline,
        corrected,
        num_survivors: survivors.len(),
        survivor_mean,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::array;

    #[test]
    fn fit_exact_line() {
        let x = Array1::from_iter((0..10).map(|i| i as Real * 2.0));
        let y = x.mapv(|x| 3.0 - 0.5 * x);
        let fit = LinearFit::least_squares(x.view(), y.view()).unwrap();
        assert_approx_eq!(fit.intercept, 3.0, 1e-12);
        assert_approx_eq!(fit.slope, -0.5, 1e-12);
        assert_approx_eq!(fit.at(4.0), 1.0, 1e-12);
    }

    #[test]
    fn degenerate_fits() {
        let empty = Array1::<Real>::zeros(0);
        assert_eq!(LinearFit::least_squares(empty.view(), empty.view()), None);
        assert_eq!(
            LinearFit::least_squares(array![1.0].view(), array![2.0].view()),
            None
        );
        assert_eq!(
            LinearFit::least_squares(array![1.0, 1.0].view(), array![2.0, 5.0].view()),
            None
        );
    }

    #[test]
    fn removes_linear_drift() {
        let amplitude: Vec<_> = (0..50).map(|i| 1.0 + 0.01 * i as Real * 2.0).collect();
        let detrended = detrend(&amplitude, 2.0);
        assert!(detrended.corrected.iter().all(|mv| mv.abs() < 1e-9));
        assert_approx_eq!(detrended.baseline, 0.0, 1e-9);
    }

    #[test]
    fn spike_is_excluded_from_second_fit() {
        // the spike sits at the mean sample time, so the first fit is flat
        let amplitude = [0.0, 0.0, 5.0, 0.0, 0.0];
        let detrended = detrend(&amplitude, 2.0);
        assert_eq!(detrended.num_survivors, 4);
        let expected = [0.0, 0.0, 5.0, 0.0, 0.0];
        for (corrected, expected) in detrended.corrected.iter().zip(expected) {
            assert_approx_eq!(corrected, expected, 1e-12);
        }
        assert_approx_eq!(detrended.max(), 5.0, 1e-12);
        assert_approx_eq!(detrended.baseline, 0.0, 1e-12);
    }

    #[test]
    fn clustered_outliers_are_refitted_as_consecutive_samples() {
        // drift of 0.05 mV a sample, with a 30 mV pulse over samples 5 to 11
        let amplitude: Vec<Real> = (0..100)
            .map(|i| 0.05 * i as Real + if (5..=11).contains(&i) { 30.0 } else { 0.0 })
            .collect();
        let detrended = detrend(&amplitude, 2.0);
        assert_eq!(detrended.num_survivors, 66);
        assert_approx_eq!(detrended.survivor_mean, -0.2124950495, 1e-8);
        // refitting the survivors at their own sample times would recover the full 30 mV
        assert_approx_eq!(detrended.max(), 26.4439243924, 1e-6);
        assert_approx_eq!(detrended.corrected[7], detrended.max(), 1e-12);
        assert_approx_eq!(detrended.corrected[0], -3.5560756076, 1e-6);
        assert_approx_eq!(detrended.baseline, 0.0, 1e-9);
    }

    #[test]
    fn survivor_mean_is_under_normalised() {
        // four survivors of -1 mV each, after the first correction
        let detrended = detrend(&[0.0, 0.0, 5.0, 0.0, 0.0], 2.0);
        // their mean is -1, but the sum is divided by all five samples
        assert_approx_eq!(detrended.survivor_mean, -0.8, 1e-12);
        assert!((detrended.survivor_mean - -1.0).abs() > 0.1);
    }

    #[test]
    fn flat_waveform_has_no_survivors() {
        let detrended = detrend(&[3.0; 8], 2.0);
        assert_eq!(detrended.num_survivors, 0);
        assert!(detrended.corrected.iter().all(|mv| mv.abs() < 1e-12));
        assert_approx_eq!(detrended.baseline, 0.0, 1e-12);
    }

    #[test]
    fn empty_waveform() {
        let detrended = detrend(&[], 2.0);
        assert!(detrended.corrected.is_empty());
        assert_eq!(detrended.max(), Real::NEG_INFINITY);
    }
}
