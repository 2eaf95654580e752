use super::{
    hanning_smooth, hanning_smooth_weights, AverageKernel, Regridder, Stripe, StripeOut, VisValue,
};

/// The composed per-stripe transform bound to a spectral window at setup.
/// Smoothing runs at the native resolution, then channel binning, then
/// regridding.
#[derive(Debug, Clone, PartialEq)]
pub enum StripePipeline {
    Copy,
    Average { width: usize },
    Smooth,
    Regrid(Regridder),
    AverageSmooth { width: usize },
    AverageRegrid { width: usize, regridder: Regridder },
    SmoothRegrid(Regridder),
    AverageSmoothRegrid { width: usize, regridder: Regridder },
}

impl StripePipeline {
    /// Pick the pipeline for the enabled transforms.
    pub fn select(
        smooth: bool,
        chanbin: Option<usize>,
        regrid: Option<Regridder>,
    ) -> StripePipeline {
        match (chanbin, smooth, regrid) {
            (None, false, None) => StripePipeline::Copy,
            (Some(width), false, None) => StripePipeline::Average { width },
            (None, true, None) => StripePipeline::Smooth,
            (None, false, Some(r)) => StripePipeline::Regrid(r),
            (Some(width), true, None) => StripePipeline::AverageSmooth { width },
            (Some(width), false, Some(regridder)) => {
                StripePipeline::AverageRegrid { width, regridder }
            }
            (None, true, Some(r)) => StripePipeline::SmoothRegrid(r),
            (Some(width), true, Some(regridder)) => {
                StripePipeline::AverageSmoothRegrid { width, regridder }
            }
        }
    }

    fn parts(&self) -> (bool, Option<usize>, Option<&Regridder>) {
        match self {
            StripePipeline::Copy => (false, None, None),
            StripePipeline::Average { width } => (false, Some(*width), None),
            StripePipeline::Smooth => (true, None, None),
            StripePipeline::Regrid(r) => (false, None, Some(r)),
            StripePipeline::AverageSmooth { width } => (true, Some(*width), None),
            StripePipeline::AverageRegrid { width, regridder } => {
                (false, Some(*width), Some(regridder))
            }
            StripePipeline::SmoothRegrid(r) => (true, None, Some(r)),
            StripePipeline::AverageSmoothRegrid { width, regridder } => {
                (true, Some(*width), Some(regridder))
            }
        }
    }

    pub fn regridder(&self) -> Option<&Regridder> {
        self.parts().2
    }

    /// The number of output channels given `num_in` input channels.
    pub fn output_len(&self, num_in: usize) -> usize {
        match self.parts() {
            (_, _, Some(r)) => r.num_out(),
            (_, Some(width), None) => (num_in + width.max(1) - 1) / width.max(1),
            (_, None, None) => num_in,
        }
    }

    /// The same pipeline with its regridding abscissa scaled by a Doppler
    /// factor.
    pub fn doppler_shifted(&self, factor: f64) -> StripePipeline {
        let (smooth, chanbin, regridder) = self.parts();
        StripePipeline::select(smooth, chanbin, regridder.map(|r| r.doppler_shifted(factor)))
    }

    /// Run a stripe through the pipeline, averaging with `kernel`. The
    /// output weights are the stripe's weights carried through the same
    /// steps.
    pub fn run<T: VisValue>(&self, kernel: AverageKernel, input: Stripe<T>) -> StripeOut<T> {
        let (smooth, chanbin, regridder) = self.parts();

        let (mut data, mut flags, mut weights) = if smooth {
            let (d, f) = hanning_smooth(input.data, input.flags);
            (d, f, hanning_smooth_weights(input.weights))
        } else {
            (
                input.data.to_vec(),
                input.flags.to_vec(),
                input.weights.to_vec(),
            )
        };

        if let Some(width) = chanbin {
            let num_out = (data.len() + width.max(1) - 1) / width.max(1);
            let stripe = Stripe {
                data: &data,
                flags: &flags,
                weights: &weights,
            };
            let mut avg = vec![T::zero(); num_out];
            let mut avg_flags = vec![false; num_out];
            kernel.average(stripe, width, &mut avg, &mut avg_flags);
            let mut avg_weights = vec![0.0; num_out];
            let mut weight_flags = vec![false; num_out];
            kernel.weight_kernel().average(
                Stripe {
                    data: &weights,
                    flags: &flags,
                    weights: &weights,
                },
                width,
                &mut avg_weights,
                &mut weight_flags,
            );
            data = avg;
            flags = avg_flags;
            weights = avg_weights;
        }

        if let Some(r) = regridder {
            let (d, f) = r.regrid(&data, &flags);
            weights = r.regrid_weights(&weights);
            data = d;
            flags = f;
        }

        StripeOut {
            data,
            flags,
            weights,
        }
    }

    /// Run only the weight path of the pipeline.
    pub fn run_weights(&self, kernel: AverageKernel, weights: &[f32], flags: &[bool]) -> Vec<f32> {
        self.run(
            kernel,
            Stripe {
                data: weights,
                flags,
                weights,
            },
        )
        .weights
    }
}
