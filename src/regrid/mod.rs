//! Planning of output channel grids. For every input spectral window, or for
//! the combined group of windows, this works out the output channels, the
//! contribution of each input channel to each output channel, and the stripe
//! pipelines that move data from one to the other.

mod frame;
#[cfg(test)]
mod tests;

pub use frame::{FrameConverter, FreqFrame, IdentityFrames, RadialVelocity};

use std::ops::Range;

use hifitime::Epoch;
use log::{debug, warn};
use marlu::{constants::VEL_C, RADec};
use strum_macros::{Display, EnumString};

use crate::{
    channels::{contributions, sort_by_freq, ChannelContribution, ChannelInfo, SpwInfo},
    config::ConfigError,
    kernels::{InterpolationMethod, Regridder, StripePipeline},
    SpectralWindow,
};

#[derive(Debug, Display, EnumString, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum RegridMode {
    Channel,
    Frequency,
    Velocity,
}

#[derive(Debug, Display, EnumString, Clone, Copy, PartialEq, Eq, Default)]
#[strum(serialize_all = "lowercase")]
pub enum VelocityType {
    #[default]
    Radio,
    Optical,
}

impl VelocityType {
    fn velocity(self, freq: f64, rest_freq: f64) -> f64 {
        match self {
            VelocityType::Radio => VEL_C * (1.0 - freq / rest_freq),
            VelocityType::Optical => VEL_C * (rest_freq / freq - 1.0),
        }
    }

    fn frequency(self, velocity: f64, rest_freq: f64) -> f64 {
        match self {
            VelocityType::Radio => rest_freq * (1.0 - velocity / VEL_C),
            VelocityType::Optical => rest_freq / (1.0 + velocity / VEL_C),
        }
    }
}

/// Where the frame conversion looks.
#[derive(Debug, Clone, Copy)]
pub enum PhaseCentre {
    Field(usize),
    Direction(RADec),
}

/// The output grid requested with `regridms`. `start` and `width` are in
/// the natural unit of the mode: channels, Hz or m/s.
#[derive(Debug, Clone)]
pub struct RegridSpec {
    pub mode: RegridMode,
    pub start: Option<f64>,
    pub width: Option<f64>,
    /// -1 for as many channels as fit.
    pub nchan: i64,
    pub interpolation: InterpolationMethod,
    pub outframe: Option<FreqFrame>,
    pub restfreq: Option<f64>,
    pub veltype: VelocityType,
    pub phasecenter: Option<PhaseCentre>,
}

impl Default for RegridSpec {
    fn default() -> Self {
        RegridSpec {
            mode: RegridMode::Channel,
            start: None,
            width: None,
            nchan: -1,
            interpolation: InterpolationMethod::Linear,
            outframe: None,
            restfreq: None,
            veltype: VelocityType::Radio,
            phasecenter: None,
        }
    }
}

/// Channel-averaging bin widths, either one for all windows or one per
/// selected window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChanBin {
    Uniform(usize),
    PerSpw(Vec<usize>),
}

impl ChanBin {
    fn for_spw(&self, i_selected: usize) -> Option<usize> {
        match self {
            ChanBin::Uniform(b) => Some(*b),
            ChanBin::PerSpw(v) => v.get(i_selected).copied(),
        }
    }
}

/// A spectral window together with the channels selected from it.
#[derive(Debug, Clone)]
pub struct SelectedSpw<'a> {
    pub spw: usize,
    pub window: &'a SpectralWindow,
    pub chans: Range<usize>,
}

pub struct PlanOptions<'a> {
    pub combine_spws: bool,
    pub chanbin: Option<&'a ChanBin>,
    pub hanning: bool,
    pub regrid: Option<&'a RegridSpec>,
    pub nspws: usize,
    pub frames: &'a dyn FrameConverter,
    /// The time at which the frame conversion defines the output grid.
    pub ref_time: Epoch,
    pub direction: RADec,
}

/// How one input spectral window is brought onto its intermediate (or, if
/// not combining, final) grid.
#[derive(Debug, Clone)]
pub struct InputSpwPlan {
    pub spw: usize,

    /// The selected channels of the input window.
    pub chans: Range<usize>,

    /// Indices into the selected channels, in ascending frequency, of the
    /// channels with a usable width. The pipeline runs on these.
    pub keep: Vec<usize>,

    pub pipeline: StripePipeline,

    /// The grid produced by `pipeline`.
    pub grid: SpwInfo,
}

/// The merged grid of several windows.
#[derive(Debug, Clone)]
pub struct Combination {
    pub grid: SpwInfo,

    /// Contributions of every input window's grid to `grid`.
    pub contributions: Vec<ChannelContribution>,
}

/// Everything needed to produce one output spectral window (or `split.len()`
/// of them).
#[derive(Debug, Clone)]
pub struct OutputSpwPlan {
    pub name: String,

    pub inputs: Vec<InputSpwPlan>,

    pub combination: Option<Combination>,

    /// Regridding applied after combination.
    pub post_combination: Option<StripePipeline>,

    /// The final grid.
    pub grid: SpwInfo,

    /// Contributions of the regridding source channels to `grid`.
    pub contributions: Vec<ChannelContribution>,

    pub frame: FreqFrame,

    /// The frame the input frequencies are in.
    pub input_frame: FreqFrame,

    /// The Doppler factor the grid was planned with; 1 without conversion.
    pub ref_doppler: f64,

    /// Channel ranges of `grid` that become separate output windows.
    pub split: Vec<Range<usize>>,
}

impl OutputSpwPlan {
    /// Does the regridding step follow a frame conversion?
    pub fn converts_frame(&self) -> bool {
        self.frame != self.input_frame
    }

    /// The final channels of output window `part`.
    pub fn part_grid(&self, part: usize) -> SpwInfo {
        match self.split.get(part) {
            Some(r) => self.grid.slice(r.clone()),
            None => SpwInfo::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegridPlan {
    pub outputs: Vec<OutputSpwPlan>,
}

impl RegridPlan {
    /// The output plan and input position for an input spectral window.
    pub fn find_input(&self, spw: usize) -> Option<(usize, usize)> {
        self.outputs.iter().enumerate().find_map(|(i_out, out)| {
            out.inputs
                .iter()
                .position(|input| input.spw == spw)
                .map(|i_in| (i_out, i_in))
        })
    }

    pub fn num_output_spws(&self) -> usize {
        self.outputs.iter().map(|o| o.split.len()).sum()
    }
}

/// Plan the output grids of `selected`, which must be in selection order.
pub fn plan(selected: &[SelectedSpw], opts: &PlanOptions) -> Result<RegridPlan, ConfigError> {
    if let Some(ChanBin::PerSpw(v)) = opts.chanbin {
        if v.len() != selected.len() {
            return Err(ConfigError::ChanbinCount {
                expected: selected.len(),
                got: v.len(),
            });
        }
    }

    let mut outputs = vec![];
    if opts.combine_spws {
        outputs.push(plan_combined(selected, opts)?);
    } else {
        for (i_sel, sel) in selected.iter().enumerate() {
            outputs.push(plan_single(i_sel, sel, opts)?);
        }
    }

    let plan = RegridPlan { outputs };
    debug!(
        "Planned {} output spectral window(s) from {} input window(s)",
        plan.num_output_spws(),
        selected.len()
    );
    Ok(plan)
}

fn plan_single(
    i_sel: usize,
    sel: &SelectedSpw,
    opts: &PlanOptions,
) -> Result<OutputSpwPlan, ConfigError> {
    // Without regridding, channels are binned in their input order.
    let (keep, kept) = usable_channels(sel, opts.regrid.is_some());
    let chanbin = bin_width(opts, i_sel);
    let intermediate = bin_channels(&kept, chanbin.unwrap_or(1));

    let input_frame = sel.window.frame;
    let (pipeline, grid, contribs, frame, ref_doppler) = match opts.regrid {
        Some(spec) => {
            let (frame, factor) = doppler(spec, input_frame, opts)?;
            let source = scaled(&intermediate, factor);
            let grid = output_grid(spec, &source)?;
            let regridder = Regridder::new(
                spec.interpolation,
                source.iter().map(|c| c.freq).collect(),
                grid.iter().map(|c| c.freq).collect(),
            )?;
            let contribs = contributions(&source, &grid);
            (
                StripePipeline::select(opts.hanning, chanbin, Some(regridder)),
                grid,
                contribs,
                frame,
                factor,
            )
        }
        None => {
            let contribs = contributions(&kept, &intermediate);
            (
                StripePipeline::select(opts.hanning, chanbin, None),
                intermediate.clone(),
                contribs,
                input_frame,
                1.0,
            )
        }
    };

    let name = sel.window.name.clone();
    if grid.is_empty() {
        return Err(ConfigError::NoOutputChannels { spw: name });
    }
    let mut grid = SpwInfo::from_channels(&grid);
    if opts.regrid.is_none() && is_descending(sel) {
        grid.negate_widths();
    }
    Ok(OutputSpwPlan {
        split: split(grid.num_chans(), opts.nspws),
        name,
        inputs: vec![InputSpwPlan {
            spw: sel.spw,
            chans: sel.chans.clone(),
            keep,
            pipeline,
            grid: SpwInfo::from_channels(&intermediate),
        }],
        combination: None,
        post_combination: None,
        grid,
        contributions: contribs,
        frame,
        input_frame,
        ref_doppler,
    })
}

fn plan_combined(
    selected: &[SelectedSpw],
    opts: &PlanOptions,
) -> Result<OutputSpwPlan, ConfigError> {
    let first = match selected.first() {
        Some(s) => s,
        None => {
            return Err(ConfigError::NoOutputChannels {
                spw: "(combined)".to_string(),
            })
        }
    };

    let mut inputs = vec![];
    let mut intermediates = vec![];
    for (i_sel, sel) in selected.iter().enumerate() {
        let (keep, kept) = usable_channels(sel, true);
        let chanbin = bin_width(opts, i_sel);
        let intermediate = bin_channels(&kept, chanbin.unwrap_or(1));
        inputs.push(InputSpwPlan {
            spw: sel.spw,
            chans: sel.chans.clone(),
            keep,
            pipeline: StripePipeline::select(opts.hanning, chanbin, None),
            grid: SpwInfo::from_channels(&intermediate),
        });
        intermediates.push(intermediate);
    }

    let averaging = inputs.iter().any(|i| {
        !matches!(
            i.pipeline,
            StripePipeline::Copy | StripePipeline::Smooth
        )
    });
    if averaging {
        drop_non_uniform_width_channels(selected, &mut intermediates);
    }

    let mut pooled: Vec<ChannelInfo> = intermediates.into_iter().flatten().collect();
    sort_by_freq(&mut pooled);
    let combined = combined_grid(&pooled);
    if combined.is_empty() {
        return Err(ConfigError::NoOutputChannels {
            spw: "(combined)".to_string(),
        });
    }
    let combination = Combination {
        grid: SpwInfo::from_channels(&combined),
        contributions: contributions(&pooled, &combined),
    };

    let input_frame = first.window.frame;
    let (post_combination, grid, contribs, frame, ref_doppler) = match opts.regrid {
        Some(spec) => {
            let (frame, factor) = doppler(spec, input_frame, opts)?;
            let source = scaled(&combined, factor);
            let grid = output_grid(spec, &source)?;
            if grid.is_empty() {
                return Err(ConfigError::NoOutputChannels {
                    spw: "(combined)".to_string(),
                });
            }
            let regridder = Regridder::new(
                spec.interpolation,
                source.iter().map(|c| c.freq).collect(),
                grid.iter().map(|c| c.freq).collect(),
            )?;
            let contribs = contributions(&source, &grid);
            (
                Some(StripePipeline::select(false, None, Some(regridder))),
                grid,
                contribs,
                frame,
                factor,
            )
        }
        None => (
            None,
            combined.clone(),
            combination.contributions.clone(),
            input_frame,
            1.0,
        ),
    };

    let grid = SpwInfo::from_channels(&grid);
    Ok(OutputSpwPlan {
        name: first.window.name.clone(),
        split: split(grid.num_chans(), opts.nspws),
        inputs,
        combination: Some(combination),
        post_combination,
        grid,
        contributions: contribs,
        frame,
        input_frame,
        ref_doppler,
    })
}

/// Does the window run from high to low frequency? Measurement sets mark this
/// with negative channel widths.
fn is_descending(sel: &SelectedSpw) -> bool {
    match sel.window.widths.get(sel.chans.start) {
        Some(&w) if w != 0.0 => w < 0.0,
        _ => {
            let f = &sel.window.freqs;
            f.len() > 1 && f[f.len() - 1] < f[0]
        }
    }
}

fn bin_width(opts: &PlanOptions, i_sel: usize) -> Option<usize> {
    opts.chanbin
        .and_then(|c| c.for_spw(i_sel))
        .filter(|&b| b > 1)
}

/// The selected channels with positive width and their positions in the
/// selection. If `sorted`, they are put in ascending frequency; otherwise
/// they keep their input order.
fn usable_channels(sel: &SelectedSpw, sorted: bool) -> (Vec<usize>, Vec<ChannelInfo>) {
    let mut chans = vec![];
    for (i, i_chan) in sel.chans.clone().enumerate() {
        let (freq, width) = match (sel.window.freqs.get(i_chan), sel.window.widths.get(i_chan)) {
            (Some(f), Some(w)) => (*f, w.abs()),
            _ => continue,
        };
        if !(width > 0.0) || !freq.is_finite() {
            warn!(
                "Dropping channel {i_chan} of spectral window {} (width {width} Hz)",
                sel.spw
            );
            continue;
        }
        let mut c = ChannelInfo::new(sel.spw, i, freq, width);
        if let Some(ebw) = sel.window.effective_bw.get(i_chan) {
            c.effective_bw = ebw.abs();
        }
        if let Some(res) = sel.window.resolution.get(i_chan) {
            c.resolution = res.abs();
        }
        chans.push(c);
    }
    if sorted {
        sort_by_freq(&mut chans);
    }
    let keep = chans.iter().map(|c| c.in_chan).collect();
    // From here on, `in_chan` counts the kept channels.
    for (i, c) in chans.iter_mut().enumerate() {
        c.in_chan = i;
        c.out_chan = i;
    }
    (keep, chans)
}

/// Average consecutive channels in bins of `width`. The bin frequency is the
/// mean of the channel centres; widths, effective bandwidths and resolutions
/// add. A short trailing bin is kept.
fn bin_channels(channels: &[ChannelInfo], width: usize) -> Vec<ChannelInfo> {
    channels
        .chunks(width.max(1))
        .enumerate()
        .map(|(i, bin)| {
            let n = bin.len() as f64;
            ChannelInfo {
                spw_id: bin[0].spw_id,
                in_chan: i,
                out_chan: i,
                freq: bin.iter().map(|c| c.freq).sum::<f64>() / n,
                width: bin.iter().map(|c| c.width).sum(),
                effective_bw: bin.iter().map(|c| c.effective_bw).sum(),
                resolution: bin.iter().map(|c| c.resolution).sum(),
            }
        })
        .collect()
}

/// When averaged windows with different native widths are combined, the
/// channels of each window that do not have that window's full averaged
/// width (short trailing bins) are dropped.
fn drop_non_uniform_width_channels(
    selected: &[SelectedSpw],
    intermediates: &mut [Vec<ChannelInfo>],
) {
    let native: Vec<f64> = selected
        .iter()
        .map(|s| {
            s.window
                .widths
                .get(s.chans.start)
                .map(|w| w.abs())
                .unwrap_or(0.0)
        })
        .collect();
    let uniform = native
        .windows(2)
        .all(|w| (w[0] - w[1]).abs() <= 1e-6 * w[0].abs().max(w[1].abs()));
    if uniform {
        return;
    }

    for (sel, chans) in selected.iter().zip(intermediates.iter_mut()) {
        let dominant = match chans.first() {
            Some(c) => c.width,
            None => continue,
        };
        let before = chans.len();
        chans.retain(|c| (c.width - dominant).abs() <= 1e-6 * dominant);
        if chans.len() != before {
            warn!(
                "Dropped {} channel(s) of spectral window {} whose width differs from its averaged width of {dominant} Hz",
                before - chans.len(),
                sel.spw
            );
        }
    }
}

/// Merge frequency-sorted channels into a non-overlapping grid. Channels
/// wholly inside the grid are skipped and partial overlaps are trimmed to
/// their uncovered part.
fn combined_grid(sorted: &[ChannelInfo]) -> Vec<ChannelInfo> {
    let mut grid: Vec<ChannelInfo> = vec![];
    for c in sorted {
        let (lower, upper) = match grid.last() {
            None => (c.lower(), c.upper()),
            Some(last) => {
                let tol = 1e-9 * last.width.max(c.width);
                if c.upper() <= last.upper() + tol {
                    continue;
                }
                (c.lower().max(last.upper()), c.upper())
            }
        };
        let width = upper - lower;
        let i = grid.len();
        grid.push(ChannelInfo {
            spw_id: c.spw_id,
            in_chan: i,
            out_chan: i,
            freq: (lower + upper) / 2.0,
            width,
            effective_bw: if width < c.width { width } else { c.effective_bw },
            resolution: if width < c.width { width } else { c.resolution },
        });
    }
    grid
}

/// The output frame and the Doppler factor into it at the reference time.
fn doppler(
    spec: &RegridSpec,
    input_frame: FreqFrame,
    opts: &PlanOptions,
) -> Result<(FreqFrame, f64), ConfigError> {
    let outframe = spec.outframe.unwrap_or(input_frame);
    if outframe == input_frame {
        return Ok((outframe, 1.0));
    }
    match opts
        .frames
        .doppler_factor(input_frame, outframe, opts.ref_time, opts.direction)
    {
        Some(f) if f.is_finite() && f > 0.0 => Ok((outframe, f)),
        _ => Err(ConfigError::UndefinedFrameConversion {
            from: input_frame,
            to: outframe,
        }),
    }
}

fn scaled(channels: &[ChannelInfo], factor: f64) -> Vec<ChannelInfo> {
    channels
        .iter()
        .map(|c| ChannelInfo {
            freq: c.freq * factor,
            width: c.width * factor,
            effective_bw: c.effective_bw * factor,
            resolution: c.resolution * factor,
            ..*c
        })
        .collect()
}

/// Translate the regrid specification into ascending output channels.
fn output_grid(spec: &RegridSpec, source: &[ChannelInfo]) -> Result<Vec<ChannelInfo>, ConfigError> {
    let (first, last) = match (source.first(), source.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return Ok(vec![]),
    };
    let lower_bound = first.lower();
    let upper_bound = last.upper();
    let mut edges: Vec<(f64, f64)> = vec![];

    match spec.mode {
        RegridMode::Channel => {
            let start = spec.start.unwrap_or(0.0).round();
            if start < 0.0 {
                return Err(ConfigError::InvalidValue {
                    key: "start",
                    value: start.to_string(),
                    reason: "channel indices cannot be negative".to_string(),
                });
            }
            let start = start as usize;
            let width = spec.width.unwrap_or(1.0).abs().round().max(1.0) as usize;
            let available = source.len().saturating_sub(start) / width;
            let nchan = match spec.nchan {
                n if n < 0 => available,
                n if n as usize > available => {
                    warn!("Only {available} output channels fit; asked for {n}");
                    available
                }
                n => n as usize,
            };
            for k in 0..nchan {
                let a = start + k * width;
                edges.push((source[a].lower(), source[a + width - 1].upper()));
            }
        }

        RegridMode::Frequency => {
            let width = spec.width.unwrap_or(first.width);
            if width == 0.0 || !width.is_finite() {
                return Err(ConfigError::InvalidValue {
                    key: "width",
                    value: width.to_string(),
                    reason: "the channel width must be non-zero".to_string(),
                });
            }
            let abs = width.abs();
            let start = spec.start.unwrap_or(if width > 0.0 {
                lower_bound + abs / 2.0
            } else {
                upper_bound - abs / 2.0
            });
            let nchan = if spec.nchan < 0 {
                let span = if width > 0.0 {
                    upper_bound - (start - abs / 2.0)
                } else {
                    (start + abs / 2.0) - lower_bound
                };
                (span / abs + 1e-6).floor().max(0.0) as usize
            } else {
                spec.nchan as usize
            };
            for k in 0..nchan {
                let centre = start + width * k as f64;
                edges.push((centre - abs / 2.0, centre + abs / 2.0));
            }
        }

        RegridMode::Velocity => {
            let rest_freq = match spec.restfreq {
                Some(f) if f > 0.0 => f,
                _ => return Err(ConfigError::MissingRestFreq),
            };
            let vt = spec.veltype;
            let width = spec.width.unwrap_or_else(|| {
                vt.velocity(last.lower(), rest_freq) - vt.velocity(last.upper(), rest_freq)
            });
            if width == 0.0 || !width.is_finite() {
                return Err(ConfigError::InvalidValue {
                    key: "width",
                    value: width.to_string(),
                    reason: "the velocity width must be non-zero".to_string(),
                });
            }
            let start = spec.start.unwrap_or_else(|| {
                if width > 0.0 {
                    vt.velocity(upper_bound, rest_freq) + width / 2.0
                } else {
                    vt.velocity(lower_bound, rest_freq) + width / 2.0
                }
            });
            let channel = |k: usize| {
                let v = start + width * k as f64;
                let a = vt.frequency(v - width / 2.0, rest_freq);
                let b = vt.frequency(v + width / 2.0, rest_freq);
                (a.min(b), a.max(b))
            };
            if spec.nchan < 0 {
                let tol = 1e-6 * first.width;
                for k in 0..MAX_FILL_CHANS {
                    let (lo, hi) = channel(k);
                    if lo < lower_bound - tol || hi > upper_bound + tol {
                        break;
                    }
                    edges.push((lo, hi));
                }
            } else {
                edges.extend((0..spec.nchan as usize).map(channel));
            }
        }
    }

    let mut grid: Vec<ChannelInfo> = edges
        .into_iter()
        .filter(|(lo, hi)| hi > lo)
        .map(|(lo, hi)| ChannelInfo::new(first.spw_id, 0, (lo + hi) / 2.0, hi - lo))
        .collect();
    sort_by_freq(&mut grid);
    for (i, c) in grid.iter_mut().enumerate() {
        c.in_chan = i;
        c.out_chan = i;
    }
    Ok(grid)
}

const MAX_FILL_CHANS: usize = 1 << 20;

/// Split `num_chans` channels into `nspws` windows of `ceil(n / nspws)`
/// channels; the last window takes what is left.
pub fn split(num_chans: usize, nspws: usize) -> Vec<Range<usize>> {
    let nspws = nspws.max(1);
    let per = (num_chans + nspws - 1) / nspws;
    if per == 0 {
        return vec![0..0];
    }
    let ranges: Vec<Range<usize>> = (0..nspws)
        .map(|k| k * per..((k + 1) * per).min(num_chans))
        .filter(|r| r.start < r.end)
        .collect();
    if ranges.len() < nspws {
        warn!(
            "Only {} output spectral windows could be made from {num_chans} channels",
            ranges.len()
        );
    }
    ranges
}

impl<'a> SelectedSpw<'a> {
    /// Every channel of `window`.
    pub fn all_channels(spw: usize, window: &'a SpectralWindow) -> SelectedSpw<'a> {
        SelectedSpw {
            spw,
            window,
            chans: 0..window.num_chans(),
        }
    }
}
