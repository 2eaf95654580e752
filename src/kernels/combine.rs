use super::{StripeOut, VisValue};
use crate::channels::ChannelContribution;

/// The stripe of one input spectral window taking part in a combination.
#[derive(Debug, Clone, Copy)]
pub struct SpwStripe<'a, T> {
    pub spw: usize,
    pub data: &'a [T],
    pub flags: &'a [bool],
    pub weights: &'a [f32],
}

/// Combine stripes of several spectral windows onto one output grid. Each
/// output channel is `Σ(d·w·f)/Σ(w·f)` over its live, unflagged, positively
/// weighted contributions, where `f` is the contribution's overlap fraction.
/// An output channel with no such contributions takes the overlap-weighted
/// mean of whatever does contribute and is flagged; one with no
/// contributions at all is zero and flagged.
///
/// Contributions from spectral windows missing from `inputs` are ignored.
pub fn combine_spws<T: VisValue>(
    contributions: &[ChannelContribution],
    num_out: usize,
    inputs: &[SpwStripe<T>],
) -> StripeOut<T> {
    let mut num = vec![T::zero(); num_out];
    let mut den = vec![0.0f32; num_out];
    let mut fallback_num = vec![T::zero(); num_out];
    let mut fallback_den = vec![0.0f32; num_out];
    let mut fallback_weights = vec![0.0f32; num_out];

    for c in contributions.iter().filter(|c| c.out_chan < num_out) {
        let input = match inputs.iter().find(|s| s.spw == c.in_spw) {
            Some(s) if c.in_chan < s.data.len() => s,
            _ => continue,
        };
        let frac = c.weight as f32;
        let d = input.data[c.in_chan];
        let w = input.weights[c.in_chan];

        fallback_num[c.out_chan] += d * frac;
        fallback_den[c.out_chan] += frac;
        fallback_weights[c.out_chan] += w.max(0.0) * frac;

        if c.flag && !input.flags[c.in_chan] && w > 0.0 {
            num[c.out_chan] += d * (w * frac);
            den[c.out_chan] += w * frac;
        }
    }

    let mut out = StripeOut {
        data: vec![T::zero(); num_out],
        flags: vec![true; num_out],
        weights: vec![0.0; num_out],
    };
    for j in 0..num_out {
        if den[j] > 0.0 {
            out.data[j] = num[j] / den[j];
            out.flags[j] = false;
            out.weights[j] = den[j];
        } else if fallback_den[j] > 0.0 {
            out.data[j] = fallback_num[j] / fallback_den[j];
            out.weights[j] = fallback_weights[j];
        }
    }
    out
}
