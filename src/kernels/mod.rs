//! Stripe kernels. A stripe is the spectrum of one correlation of one row;
//! every kernel here turns an input stripe (with its flags and weights) into
//! an output stripe whose length is fixed before the call.

mod combine;
mod error;
mod interp;
mod pipeline;
mod smooth;

pub use combine::{combine_spws, SpwStripe};
pub use error::KernelError;
pub use interp::{fft_shift, interpolate, InterpolationMethod, Regridder};
pub use pipeline::StripePipeline;
pub use smooth::{hanning_smooth, hanning_smooth_weights};

use std::{
    fmt::Debug,
    ops::{AddAssign, Div, Mul, Sub},
};

use marlu::c32;
use num_traits::Zero;
use strum_macros::{Display, EnumIter, EnumString};

/// The sample types that stripes can carry.
pub trait VisValue:
    Copy
    + Send
    + Sync
    + Debug
    + PartialEq
    + Zero
    + Sub<Output = Self>
    + Mul<f32, Output = Self>
    + Div<f32, Output = Self>
    + AddAssign
    + 'static
{
    fn to_c32(self) -> c32;

    fn from_c32(value: c32) -> Self;
}

impl VisValue for f32 {
    fn to_c32(self) -> c32 {
        c32::new(self, 0.0)
    }

    fn from_c32(value: c32) -> Self {
        value.re
    }
}

impl VisValue for c32 {
    fn to_c32(self) -> c32 {
        self
    }

    fn from_c32(value: c32) -> Self {
        value
    }
}

/// A borrowed input stripe. All three slices have the same length.
#[derive(Debug, Clone, Copy)]
pub struct Stripe<'a, T> {
    pub data: &'a [T],
    pub flags: &'a [bool],
    pub weights: &'a [f32],
}

/// An owned output stripe.
#[derive(Debug, Clone, PartialEq)]
pub struct StripeOut<T> {
    pub data: Vec<T>,
    pub flags: Vec<bool>,
    pub weights: Vec<f32>,
}

/// How the samples of one channel bin are combined.
#[derive(Debug, Display, EnumIter, EnumString, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum AverageKernel {
    /// Plain mean; flags and weights are ignored.
    Simple,

    /// Mean of the unflagged samples.
    Flags,

    /// Weighted mean of all samples.
    Weights,

    /// Sum, no denominator.
    CumSum,

    /// Weighted mean of the unflagged samples.
    FlagWeights,

    /// Sum of the unflagged samples.
    FlagCumSum,

    /// Mean of the unflagged, non-zero samples.
    FlagNonZero,

    /// Weighted mean of the unflagged, non-zero samples.
    FlagWeightsNonZero,

    /// Sum of the unflagged, non-zero samples.
    FlagCumSumNonZero,
}

impl AverageKernel {
    /// Does this kernel look at sample flags?
    pub fn is_flag_aware(self) -> bool {
        !matches!(
            self,
            AverageKernel::Simple | AverageKernel::Weights | AverageKernel::CumSum
        )
    }

    /// The kernel that accumulates weights alongside this one.
    pub fn weight_kernel(self) -> AverageKernel {
        if self.is_flag_aware() {
            AverageKernel::FlagCumSum
        } else {
            AverageKernel::CumSum
        }
    }

    /// Average `input` in bins of `width` channels into `out` and
    /// `out_flags`. Output channels whose bin starts past the end of the input
    /// are zero and flagged; a short trailing bin is averaged over what it
    /// has.
    pub fn average<T: VisValue>(
        self,
        input: Stripe<T>,
        width: usize,
        out: &mut [T],
        out_flags: &mut [bool],
    ) {
        let width = width.max(1);
        let n = input.data.len();
        for (j, (o, of)) in out.iter_mut().zip(out_flags.iter_mut()).enumerate() {
            let start = j * width;
            if start >= n {
                *o = T::zero();
                *of = true;
                continue;
            }
            let end = (start + width).min(n);
            let (value, flag) = self.bin(Stripe {
                data: &input.data[start..end],
                flags: &input.flags[start..end],
                weights: &input.weights[start..end],
            });
            *o = value;
            *of = flag;
        }
    }

    /// Combine the samples of one bin. Returns the value and whether it is
    /// flagged.
    fn bin<T: VisValue>(self, bin: Stripe<T>) -> (T, bool) {
        let all_flagged = bin.flags.iter().all(|f| *f);
        let any_unflagged = !all_flagged;
        let unflagged = |i: usize| !bin.flags[i];
        let unflagged_non_zero = |i: usize| !bin.flags[i] && !bin.data[i].is_zero();

        match self {
            AverageKernel::Simple => (mean(bin, |_| true), all_flagged),

            AverageKernel::Flags => match count(bin, unflagged) {
                0 => (mean(bin, |_| true), true),
                _ => (mean(bin, unflagged), false),
            },

            AverageKernel::FlagNonZero => match count(bin, unflagged_non_zero) {
                0 if any_unflagged => (T::zero(), false),
                0 => (mean(bin, |_| true), true),
                _ => (mean(bin, unflagged_non_zero), false),
            },

            AverageKernel::Weights => match weighted_mean(bin, |_| true) {
                Some(v) => (v, false),
                None => (mean(bin, |_| true), true),
            },

            AverageKernel::FlagWeights => match weighted_mean(bin, unflagged) {
                Some(v) => (v, false),
                None => (mean(bin, |_| true), true),
            },

            AverageKernel::FlagWeightsNonZero => match weighted_mean(bin, unflagged_non_zero) {
                Some(v) => (v, false),
                None if any_unflagged && count(bin, unflagged_non_zero) == 0 => {
                    (T::zero(), false)
                }
                None => (mean(bin, |_| true), true),
            },

            AverageKernel::CumSum => (sum(bin, |_| true), all_flagged),

            AverageKernel::FlagCumSum => match count(bin, unflagged) {
                0 => (sum(bin, |_| true), true),
                _ => (sum(bin, unflagged), false),
            },

            AverageKernel::FlagCumSumNonZero => match count(bin, unflagged_non_zero) {
                0 if any_unflagged => (T::zero(), false),
                0 => (sum(bin, |_| true), true),
                _ => (sum(bin, unflagged_non_zero), false),
            },
        }
    }
}

fn count<T>(bin: Stripe<T>, live: impl Fn(usize) -> bool) -> usize {
    (0..bin.data.len()).filter(|&i| live(i)).count()
}

fn sum<T: VisValue>(bin: Stripe<T>, live: impl Fn(usize) -> bool) -> T {
    let mut acc = T::zero();
    for i in (0..bin.data.len()).filter(|&i| live(i)) {
        acc += bin.data[i];
    }
    acc
}

fn mean<T: VisValue>(bin: Stripe<T>, live: impl Fn(usize) -> bool) -> T {
    match count(bin, &live) {
        0 => T::zero(),
        n => sum(bin, live) / n as f32,
    }
}

/// `None` if the live weights do not sum to something positive.
fn weighted_mean<T: VisValue>(bin: Stripe<T>, live: impl Fn(usize) -> bool) -> Option<T> {
    let mut acc = T::zero();
    let mut weight_sum = 0.0;
    for i in (0..bin.data.len()).filter(|&i| live(i)) {
        acc += bin.data[i] * bin.weights[i];
        weight_sum += bin.weights[i];
    }
    if weight_sum > 0.0 {
        Some(acc / weight_sum)
    } else {
        None
    }
}
