//! Conversions between weights and sigmas.

use strum_macros::Display;

/// `1/sqrt(w)`, or -1 for weights that are not positive.
pub fn wt_to_sigma(weight: f32) -> f32 {
    if weight > f32::MIN_POSITIVE {
        1.0 / weight.sqrt()
    } else {
        -1.0
    }
}

/// `1/s²`, or 0 for sigmas that are not positive.
pub fn sigma_to_weight(sigma: f32) -> f32 {
    if sigma > f32::MIN_POSITIVE {
        1.0 / (sigma * sigma)
    } else {
        0.0
    }
}

/// The median of `values`, averaging the middle two for even lengths. NaNs
/// sort last. Empty input gives 0.
pub fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Where the per-channel weights of a run come from. This is decided once
/// per run from the columns present in the input.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum WeightSpectrumSource {
    /// The WEIGHT_SPECTRUM column.
    #[strum(serialize = "WEIGHT_SPECTRUM")]
    Column,

    /// Derived from the SIGMA_SPECTRUM column.
    #[strum(serialize = "SIGMA_SPECTRUM")]
    SigmaSpectrum,

    /// The WEIGHT column broadcast over channels.
    #[strum(serialize = "WEIGHT")]
    FlatWeight,
}

impl WeightSpectrumSource {
    pub fn choose(has_weight_spectrum: bool, has_sigma_spectrum: bool) -> WeightSpectrumSource {
        if has_weight_spectrum {
            WeightSpectrumSource::Column
        } else if has_sigma_spectrum {
            WeightSpectrumSource::SigmaSpectrum
        } else {
            WeightSpectrumSource::FlatWeight
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_weight_sigma_round_trip() {
        for w in [1e-6, 0.25, 1.0, 3.0, 1234.5] {
            assert_relative_eq!(sigma_to_weight(wt_to_sigma(w)), w, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_bad_weights_give_sentinel_sigma() {
        assert_eq!(wt_to_sigma(0.0), -1.0);
        assert_eq!(wt_to_sigma(-2.0), -1.0);
        assert_eq!(sigma_to_weight(0.0), 0.0);
        assert_eq!(sigma_to_weight(-1.0), 0.0);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median(&mut []), 0.0);
    }

    #[test]
    fn test_weight_spectrum_tiers() {
        assert_eq!(WeightSpectrumSource::choose(true, true), WeightSpectrumSource::Column);
        assert_eq!(
            WeightSpectrumSource::choose(false, true),
            WeightSpectrumSource::SigmaSpectrum
        );
        assert_eq!(
            WeightSpectrumSource::choose(false, false),
            WeightSpectrumSource::FlatWeight
        );
    }
}
