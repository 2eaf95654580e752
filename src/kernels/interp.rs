use rustfft::{num_complex::Complex, FftPlanner};
use strum_macros::{Display, EnumIter, EnumString};

use super::{KernelError, VisValue};
use marlu::c32;

#[derive(Debug, Display, EnumIter, EnumString, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationMethod {
    #[strum(serialize = "nearest")]
    Nearest,

    #[strum(serialize = "linear")]
    Linear,

    #[strum(serialize = "cubic")]
    Cubic,

    #[strum(serialize = "spline")]
    Spline,

    #[strum(serialize = "fftshift")]
    FftShift,
}

/// Resamples stripes from one frequency grid onto another.
#[derive(Debug, Clone, PartialEq)]
pub struct Regridder {
    method: InterpolationMethod,

    /// Input channel centres \[Hz\], ascending.
    x_in: Vec<f64>,

    /// Output channel centres \[Hz\], ascending.
    x_out: Vec<f64>,

    /// For [`InterpolationMethod::FftShift`], the shift of the output grid
    /// relative to the input grid in input channels.
    shift_chans: f64,
}

impl Regridder {
    pub fn new(
        method: InterpolationMethod,
        x_in: Vec<f64>,
        x_out: Vec<f64>,
    ) -> Result<Regridder, KernelError> {
        if x_in.windows(2).any(|w| w[1] <= w[0]) {
            return Err(KernelError::NotAscending);
        }
        let mut regridder = Regridder {
            method,
            x_in,
            x_out,
            shift_chans: 0.0,
        };
        if method == InterpolationMethod::FftShift {
            regridder.shift_chans = regridder.fft_shift_chans()?;
        }
        Ok(regridder)
    }

    pub fn method(&self) -> InterpolationMethod {
        self.method
    }

    pub fn num_out(&self) -> usize {
        self.x_out.len()
    }

    /// The same regridder with the input abscissa scaled by a Doppler
    /// factor.
    pub fn doppler_shifted(&self, factor: f64) -> Regridder {
        let x_in: Vec<f64> = self.x_in.iter().map(|x| x * factor).collect();
        let shift_chans = match (x_in.as_slice(), self.x_out.first()) {
            ([x0, x1, ..], Some(out0)) if self.method == InterpolationMethod::FftShift => {
                (out0 - x0) / (x1 - x0)
            }
            _ => self.shift_chans,
        };
        Regridder {
            method: self.method,
            x_in,
            x_out: self.x_out.clone(),
            shift_chans,
        }
    }

    /// The shift of the output grid relative to the input grid, in input
    /// channels.
    fn fft_shift_chans(&self) -> Result<f64, KernelError> {
        if self.x_in.len() != self.x_out.len() {
            return Err(KernelError::NotAShift(format!(
                "{} input channels but {} output channels",
                self.x_in.len(),
                self.x_out.len()
            )));
        }
        let (x0, x1) = match self.x_in.as_slice() {
            [x0, x1, ..] => (*x0, *x1),
            // A single channel cannot be shifted by a well-defined amount.
            _ => return Err(KernelError::NotAShift("fewer than two channels".to_string())),
        };
        let spacing = x1 - x0;
        let shift = self.x_out[0] - x0;
        let tol = spacing.abs() * 1e-6;
        for (i, (xi, xo)) in self.x_in.iter().zip(self.x_out.iter()).enumerate() {
            if ((xo - xi) - shift).abs() > tol || (xi - (x0 + spacing * i as f64)).abs() > tol {
                return Err(KernelError::NotAShift(format!(
                    "channel {i} does not follow a uniform shifted grid"
                )));
            }
        }
        Ok(shift / spacing)
    }

    pub fn regrid<T: VisValue>(&self, data: &[T], flags: &[bool]) -> (Vec<T>, Vec<bool>) {
        match self.method {
            InterpolationMethod::FftShift => {
                let shift = self.shift_chans;
                let out = fft_shift(data, shift);
                let n = data.len() as isize;
                let mut out_data = out;
                let mut out_flags = vec![true; data.len()];
                for (j, (d, f)) in out_data.iter_mut().zip(out_flags.iter_mut()).enumerate() {
                    let src = (j as f64 + shift).round() as isize;
                    if (0..n).contains(&src) {
                        *f = flags[src as usize];
                    } else {
                        *d = T::zero();
                    }
                }
                (out_data, out_flags)
            }
            method => interpolate(method, &self.x_in, data, flags, &self.x_out),
        }
    }

    /// Resample weights; these are interpolated linearly, or taken from the
    /// nearest channel for the nearest-neighbour and FFT methods.
    pub fn regrid_weights(&self, weights: &[f32]) -> Vec<f32> {
        let flags = vec![false; weights.len()];
        let method = match self.method {
            InterpolationMethod::Nearest | InterpolationMethod::FftShift => {
                InterpolationMethod::Nearest
            }
            _ => InterpolationMethod::Linear,
        };
        let x_out = match self.method {
            InterpolationMethod::FftShift => {
                let shift = self.shift_chans;
                let spacing = match self.x_in.as_slice() {
                    [x0, x1, ..] => x1 - x0,
                    _ => 0.0,
                };
                let n = self.x_in.len() as f64;
                // Clamp onto the input grid so the edges keep a weight.
                self.x_in
                    .iter()
                    .enumerate()
                    .map(|(j, x)| {
                        let target = (j as f64 + shift).clamp(0.0, n - 1.0) - j as f64;
                        x + target * spacing
                    })
                    .collect()
            }
            _ => self.x_out.clone(),
        };
        interpolate(method, &self.x_in, weights, &flags, &x_out).0
    }
}

/// Interpolate `data` sampled at `x_in` (ascending) onto `x_out`. Points
/// outside the input range are zero and flagged. An output point takes the
/// flags of the input points it was computed from.
pub fn interpolate<T: VisValue>(
    method: InterpolationMethod,
    x_in: &[f64],
    data: &[T],
    flags: &[bool],
    x_out: &[f64],
) -> (Vec<T>, Vec<bool>) {
    let n = x_in.len().min(data.len());
    let mut out = vec![T::zero(); x_out.len()];
    let mut out_flags = vec![true; x_out.len()];
    if n == 0 {
        return (out, out_flags);
    }

    let tol = 1e-9 * x_in[0].abs().max(x_in[n - 1].abs()).max(1.0);
    let spline = match method {
        InterpolationMethod::Spline if n >= 3 => Some(spline_second_derivatives(&x_in[..n], data)),
        _ => None,
    };

    for (j, &x) in x_out.iter().enumerate() {
        if x < x_in[0] - tol || x > x_in[n - 1] + tol {
            continue;
        }
        if n == 1 {
            out[j] = data[0];
            out_flags[j] = flags[0];
            continue;
        }

        // x_in[i] <= x <= x_in[i + 1]
        let i = x_in[..n].partition_point(|v| *v <= x).clamp(1, n - 1) - 1;
        let h = x_in[i + 1] - x_in[i];
        let t = ((x - x_in[i]) / h).clamp(0.0, 1.0);
        let bracket_flag = (t < 1.0 && flags[i]) || (t > 0.0 && flags[i + 1]);

        let (value, flag) = match method {
            InterpolationMethod::Nearest | InterpolationMethod::FftShift => {
                let k = if t <= 0.5 { i } else { i + 1 };
                (data[k], flags[k])
            }

            InterpolationMethod::Linear => (lerp(data[i], data[i + 1], t), bracket_flag),

            InterpolationMethod::Cubic if n >= 4 => {
                let k0 = i.saturating_sub(1).min(n - 4);
                let mut value = T::zero();
                let mut flag = false;
                for a in k0..k0 + 4 {
                    let mut l = 1.0;
                    for b in (k0..k0 + 4).filter(|&b| b != a) {
                        l *= (x - x_in[b]) / (x_in[a] - x_in[b]);
                    }
                    if l.abs() > 1e-12 {
                        value += data[a] * l as f32;
                        flag |= flags[a];
                    }
                }
                (value, flag)
            }

            InterpolationMethod::Spline => match spline.as_ref() {
                Some(m) => {
                    let a = 1.0 - t;
                    let b = t;
                    let c = (a * a * a - a) * h * h / 6.0;
                    let d = (b * b * b - b) * h * h / 6.0;
                    let value = data[i] * a as f32
                        + data[i + 1] * b as f32
                        + m[i] * c as f32
                        + m[i + 1] * d as f32;
                    (value, bracket_flag)
                }
                None => (lerp(data[i], data[i + 1], t), bracket_flag),
            },

            // Cubic with too few points.
            InterpolationMethod::Cubic => (lerp(data[i], data[i + 1], t), bracket_flag),
        };
        out[j] = value;
        out_flags[j] = flag;
    }

    (out, out_flags)
}

fn lerp<T: VisValue>(a: T, b: T, t: f64) -> T {
    a * (1.0 - t) as f32 + b * t as f32
}

/// Second derivatives of the natural cubic spline through (x, y), solved
/// with the Thomas algorithm.
fn spline_second_derivatives<T: VisValue>(x: &[f64], y: &[T]) -> Vec<T> {
    let n = x.len();
    let mut m = vec![T::zero(); n];
    if n < 3 {
        return m;
    }

    // Forward sweep over the interior points.
    let mut c_prime = vec![0.0; n];
    let mut d_prime = vec![T::zero(); n];
    for i in 1..n - 1 {
        let h0 = x[i] - x[i - 1];
        let h1 = x[i + 1] - x[i];
        let rhs = ((y[i + 1] - y[i]) / h1 as f32 - (y[i] - y[i - 1]) / h0 as f32) * 6.0;
        let diag = 2.0 * (h0 + h1) - h0 * c_prime[i - 1];
        c_prime[i] = h1 / diag;
        d_prime[i] = (rhs - d_prime[i - 1] * h0 as f32) / diag as f32;
    }
    for i in (1..n - 1).rev() {
        m[i] = d_prime[i] - m[i + 1] * c_prime[i] as f32;
    }
    m
}

/// Shift a uniformly-sampled stripe by `shift` channels with a phase ramp in
/// the Fourier domain; output channel `j` approximates input position
/// `j + shift`.
pub fn fft_shift<T: VisValue>(data: &[T], shift: f64) -> Vec<T> {
    let n = data.len();
    if n == 0 {
        return vec![];
    }

    let mut buffer: Vec<Complex<f32>> = data
        .iter()
        .map(|d| {
            let c = d.to_c32();
            Complex::new(c.re, c.im)
        })
        .collect();
    let mut planner = FftPlanner::<f32>::new();
    planner.plan_fft_forward(n).process(&mut buffer);

    for (k, z) in buffer.iter_mut().enumerate() {
        let freq = if k <= n / 2 {
            k as f64
        } else {
            k as f64 - n as f64
        };
        let phase = 2.0 * std::f64::consts::PI * freq * shift / n as f64;
        *z *= Complex::new(phase.cos() as f32, phase.sin() as f32);
    }

    planner.plan_fft_inverse(n).process(&mut buffer);
    let norm = 1.0 / n as f32;
    buffer
        .into_iter()
        .map(|z| T::from_c32(c32::new(z.re * norm, z.im * norm)))
        .collect()
}
