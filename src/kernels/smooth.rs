use super::VisValue;

const HANNING: [f32; 3] = [0.25, 0.5, 0.25];

/// Hanning-smooth a stripe. The output flag of a channel is the OR of the
/// flags of the three channels that fed it; the edge channels are copied
/// through and flagged.
pub fn hanning_smooth<T: VisValue>(data: &[T], flags: &[bool]) -> (Vec<T>, Vec<bool>) {
    let n = data.len();
    let mut out = data.to_vec();
    let mut out_flags = vec![true; n];
    for i in 1..n.saturating_sub(1) {
        out[i] = data[i - 1] * HANNING[0] + data[i] * HANNING[1] + data[i + 1] * HANNING[2];
        out_flags[i] = flags[i - 1] || flags[i] || flags[i + 1];
    }
    (out, out_flags)
}

/// The weights of a Hanning-smoothed stripe, propagating variances:
/// `1/w_out = Σ k²/w`. Any non-positive weight in the window gives 0. Edge
/// channels keep their weights.
pub fn hanning_smooth_weights(weights: &[f32]) -> Vec<f32> {
    let n = weights.len();
    let mut out = weights.to_vec();
    for i in 1..n.saturating_sub(1) {
        let window = &weights[i - 1..=i + 1];
        out[i] = if window.iter().all(|w| *w > 0.0) {
            let variance: f32 = window
                .iter()
                .zip(HANNING.iter())
                .map(|(w, k)| k * k / w)
                .sum();
            1.0 / variance
        } else {
            0.0
        };
    }
    out
}
