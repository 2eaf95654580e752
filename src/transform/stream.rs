//! The per-buffer work of a transformation: channel weights, time
//! averaging, the stripe pipelines, spectral-window combination and
//! reindexing into output blocks.

use std::{borrow::Cow, collections::HashMap, ops::Range};

use indexmap::IndexMap;
use log::trace;
use marlu::{c32, RADec};
use ndarray::{prelude::*, Zip};
use rayon::prelude::*;

use super::DataError;
use crate::{
    averaging::{epoch_from_mjd_seconds, TimeAverager},
    channels::ChannelContribution,
    index_map::IndexMaps,
    kernels::{combine_spws, AverageKernel, SpwStripe, Stripe, StripeOut, StripePipeline, VisValue},
    read::VisBuffer,
    regrid::{FrameConverter, OutputSpwPlan, RegridPlan},
    weights::{median, wt_to_sigma, WeightSpectrumSource},
    write::{OutputBlock, OutputSchema},
    MsColumn, RowMeta,
};

/// Everything fixed at setup that the per-buffer work needs.
#[derive(Debug, Clone)]
pub(super) struct Bound {
    /// Input data column to output data column.
    pub(super) columns: IndexMap<MsColumn, MsColumn>,
    pub(super) weight_source: WeightSpectrumSource,
    pub(super) plan: RegridPlan,
    pub(super) maps: IndexMaps,
    pub(super) averager: Option<TimeAverager>,
    pub(super) schema: OutputSchema,
    /// SIGMA follows WEIGHT because DATA was made from CORRECTED_DATA.
    pub(super) sigma_from_weight: bool,
    /// Where frame conversions look.
    pub(super) direction: RADec,
}

/// The result of transforming one buffer.
pub(super) enum Step {
    Blocks(Vec<OutputBlock>),
    /// On the intermediate grid, waiting for the other windows of its
    /// combination.
    Staged(VisBuffer),
}

impl Bound {
    pub(super) fn transform(
        &self,
        buffer: &VisBuffer,
        kernel: AverageKernel,
        frames: &dyn FrameConverter,
    ) -> Result<Step, DataError> {
        let (i_out, i_in) = self
            .plan
            .find_input(buffer.spw)
            .ok_or(DataError::UnplannedSpw(buffer.spw))?;
        let output = &self.plan.outputs[i_out];
        let input = &output.inputs[i_in];

        let prepared = self.prepare(buffer);
        let combining = output.combination.is_some();
        let pipeline = if combining {
            Cow::Borrowed(&input.pipeline)
        } else {
            self.shifted(&input.pipeline, output, &prepared, frames)
        };
        let transformed = run_channels(&prepared, &pipeline, kernel, Some(&input.keep));
        trace!(
            "ddi {}: {:?} -> {:?}",
            buffer.ddi,
            buffer.shape(),
            transformed.shape()
        );

        Ok(if combining {
            Step::Staged(transformed)
        } else {
            Step::Blocks(self.finish(output, transformed))
        })
    }

    /// Merge staged buffers of the windows of a combination into one and
    /// finish it. Rows are matched by baseline and by how many times the
    /// baseline has already appeared in their buffer.
    pub(super) fn combine(
        &self,
        staged: Vec<VisBuffer>,
        kernel: AverageKernel,
        frames: &dyn FrameConverter,
    ) -> Vec<OutputBlock> {
        let first = match staged.first() {
            Some(b) => b,
            None => return vec![],
        };
        let output = match self.plan.find_input(first.spw) {
            Some((i_out, _)) => &self.plan.outputs[i_out],
            None => return vec![],
        };
        let combination = match &output.combination {
            Some(c) => c,
            None => return vec![],
        };
        let num_out = combination.grid.num_chans();
        let num_corrs = first.shape().2;

        type RowKey = (usize, usize, i32, i32, usize);
        let mut rows: IndexMap<RowKey, Vec<(usize, usize)>> = IndexMap::new();
        for (i_buf, b) in staged.iter().enumerate() {
            let mut seen: HashMap<(usize, usize, i32, i32), usize> = HashMap::new();
            for (r, m) in b.meta.iter().enumerate() {
                let occurrence = seen
                    .entry((m.antenna1, m.antenna2, m.feed1, m.feed2))
                    .or_insert(0);
                rows.entry((m.antenna1, m.antenna2, m.feed1, m.feed2, *occurrence))
                    .or_default()
                    .push((i_buf, r));
                *occurrence += 1;
            }
        }
        let mut members: Vec<Vec<(usize, usize)>> = rows.into_values().collect();
        let meta_of = |m: &[(usize, usize)]| staged[m[0].0].meta[m[0].1];
        members.sort_by(|a, b| {
            let (a, b) = (meta_of(a), meta_of(b));
            a.time
                .total_cmp(&b.time)
                .then(a.antenna1.cmp(&b.antenna1))
                .then(a.antenna2.cmp(&b.antenna2))
        });

        let mut out = VisBuffer::empty(
            members.iter().map(|m| meta_of(m)).collect(),
            first.ddi,
            first.spw,
            first.polarization,
            num_out,
            num_corrs,
        );
        out.flag_row = members
            .iter()
            .map(|m| m.iter().all(|&(b, r)| staged[b].flag_row[r]))
            .collect();

        let weights: Vec<Array3<f32>> = staged
            .iter()
            .map(|b| b.weight_spectrum_from(WeightSpectrumSource::Column))
            .collect();
        let sigma_weights: Vec<Array3<f32>> =
            staged.iter().map(|b| b.sigma_weight_spectrum()).collect();
        let merge = Merge {
            contributions: &combination.contributions,
            num_out,
            num_corrs,
            staged: &staged,
            members: &members,
        };

        let mut flags_and_weights = None;
        for col in first.data.keys() {
            let cubes: Vec<Option<&Array3<c32>>> = staged.iter().map(|b| b.data.get(col)).collect();
            let (data, flags, ws) = merge.cube(&cubes, &weights);
            out.data.insert(*col, data);
            flags_and_weights.get_or_insert((flags, ws));
        }
        if first.float_data.is_some() {
            let cubes: Vec<Option<&Array3<f32>>> =
                staged.iter().map(|b| b.float_data.as_ref()).collect();
            let (data, flags, ws) = merge.cube(&cubes, &weights);
            out.float_data = Some(data);
            flags_and_weights.get_or_insert((flags, ws));
        }
        let (flags, ws) = match flags_and_weights {
            Some(fw) => fw,
            None => {
                let cubes: Vec<Option<&Array3<f32>>> = weights.iter().map(Some).collect();
                let (_, flags, ws) = merge.cube(&cubes, &weights);
                (flags, ws)
            }
        };
        out.flag = flags;
        out.weight_spectrum = Some(ws);
        let cubes: Vec<Option<&Array3<f32>>> = sigma_weights.iter().map(Some).collect();
        let (_, _, summed) = merge.cube(&cubes, &sigma_weights);
        out.sigma_spectrum = Some(summed.mapv(wt_to_sigma));
        trace!(
            "Combined {} buffers into {} rows of {num_out} channels",
            staged.len(),
            out.num_rows()
        );

        let combined = match &output.post_combination {
            Some(pipeline) => {
                let pipeline = self.shifted(pipeline, output, &out, frames);
                run_channels(&out, &pipeline, kernel, None)
            }
            None => out,
        };
        self.finish(output, combined)
    }

    /// The shape `buffer` will have once transformed, before any split into
    /// several output windows.
    pub(super) fn transformed_shape(&self, buffer: &VisBuffer) -> Option<(usize, usize, usize)> {
        let (i_out, _) = self.plan.find_input(buffer.spw)?;
        let num_rows = match &self.averager {
            Some(a) => a.groups(&buffer.meta).len(),
            None => buffer.num_rows(),
        };
        Some((
            num_rows,
            self.plan.outputs[i_out].grid.num_chans(),
            buffer.shape().2,
        ))
    }

    /// Fill in the channel weights and sigmas of a buffer, then average it
    /// in time.
    fn prepare(&self, buffer: &VisBuffer) -> VisBuffer {
        let mut b = buffer.clone();
        b.weight_spectrum = Some(buffer.weight_spectrum_from(self.weight_source));
        if b.sigma_spectrum.is_none() {
            b.sigma_spectrum = Some(buffer.sigma_weight_spectrum().mapv(wt_to_sigma));
        }
        match &self.averager {
            Some(averager) => averager.average(&b),
            None => b,
        }
    }

    /// `pipeline` with its regridding moved to the Doppler factor at the time
    /// of `buffer`, relative to the factor the grid was planned with.
    fn shifted<'a>(
        &self,
        pipeline: &'a StripePipeline,
        output: &OutputSpwPlan,
        buffer: &VisBuffer,
        frames: &dyn FrameConverter,
    ) -> Cow<'a, StripePipeline> {
        if !output.converts_frame() || pipeline.regridder().is_none() {
            return Cow::Borrowed(pipeline);
        }
        let time = match buffer.meta.first() {
            Some(m) => epoch_from_mjd_seconds(m.time),
            None => return Cow::Borrowed(pipeline),
        };
        match frames.doppler_factor(output.input_frame, output.frame, time, self.direction) {
            Some(f) if f.is_finite() && f > 0.0 => {
                Cow::Owned(pipeline.doppler_shifted(f / output.ref_doppler))
            }
            _ => Cow::Borrowed(pipeline),
        }
    }

    /// Reindex the rows of a transformed buffer and cut it into one block
    /// per output window.
    fn finish(&self, output: &OutputSpwPlan, b: VisBuffer) -> Vec<OutputBlock> {
        let base_ddi = match self.maps.ddi.get(b.ddi) {
            Some(d) => d,
            None => return vec![],
        };
        let (kept, meta): (Vec<usize>, Vec<RowMeta>) = b
            .meta
            .iter()
            .enumerate()
            .filter_map(|(r, m)| self.maps.remap_row(m).map(|m| (r, m)))
            .unzip();
        if kept.len() < b.num_rows() {
            trace!("Dropped {} rows with unselected ids", b.num_rows() - kept.len());
        }
        let ws = b.weight_spectrum_from(WeightSpectrumSource::Column);
        let ss = match &b.sigma_spectrum {
            Some(ss) => ss.clone(),
            None => b.sigma_weight_spectrum().mapv(wt_to_sigma),
        };

        output
            .split
            .iter()
            .enumerate()
            .map(|(part, chans)| {
                let ddi = base_ddi + part;
                let flag = cut(&b.flag, &kept, chans);
                let ws = cut(&ws, &kept, chans);
                let ss = if self.sigma_from_weight {
                    ws.mapv(wt_to_sigma)
                } else {
                    cut(&ss, &kept, chans)
                };
                let (num_rows, _, num_corrs) = flag.dim();
                let mut weight = Array2::zeros((num_rows, num_corrs));
                let mut sigma = Array2::zeros((num_rows, num_corrs));
                for r in 0..num_rows {
                    for c in 0..num_corrs {
                        let w = median(&mut ws.slice(s![r, .., c]).to_vec());
                        weight[(r, c)] = w;
                        sigma[(r, c)] = if self.sigma_from_weight {
                            wt_to_sigma(w)
                        } else {
                            median(&mut ss.slice(s![r, .., c]).to_vec())
                        };
                    }
                }
                let flag_row = flag
                    .outer_iter()
                    .map(|row| row.iter().all(|&f| f))
                    .collect();

                OutputBlock {
                    meta: meta.iter().map(|m| RowMeta { ddi, ..*m }).collect(),
                    ddi,
                    data: b
                        .data
                        .iter()
                        .filter_map(|(col, cube)| {
                            self.columns
                                .get(col)
                                .map(|out_col| (*out_col, cut(cube, &kept, chans)))
                        })
                        .collect(),
                    float_data: b.float_data.as_ref().map(|cube| cut(cube, &kept, chans)),
                    flag,
                    flag_row,
                    weight,
                    sigma,
                    weight_spectrum: self.schema.weight_spectrum.then_some(ws),
                    sigma_spectrum: self.schema.sigma_spectrum.then_some(ss),
                }
            })
            .collect()
    }
}

/// The rows `rows` and channels `chans` of a cube.
fn cut<T: Clone>(cube: &Array3<T>, rows: &[usize], chans: &Range<usize>) -> Array3<T> {
    cube.select(Axis(0), rows)
        .slice_move(s![.., chans.clone(), ..])
}

/// Run every stripe of `buffer` through `pipeline`. `keep` picks and orders
/// the channels fed to the pipeline.
fn run_channels(
    buffer: &VisBuffer,
    pipeline: &StripePipeline,
    kernel: AverageKernel,
    keep: Option<&[usize]>,
) -> VisBuffer {
    let reordered;
    let buffer = match keep {
        Some(keep) if !keep.iter().copied().eq(0..buffer.shape().1) => {
            reordered = select_chans(buffer, keep);
            &reordered
        }
        _ => buffer,
    };
    let (_, num_chans, num_corrs) = buffer.shape();
    let num_out = pipeline.output_len(num_chans);
    let weights = buffer.weight_spectrum_from(WeightSpectrumSource::Column);

    let mut out = VisBuffer::empty(
        buffer.meta.clone(),
        buffer.ddi,
        buffer.spw,
        buffer.polarization,
        num_out,
        num_corrs,
    );
    out.rows = buffer.rows.clone();
    out.flag_row = buffer.flag_row.clone();
    out.weight = buffer.weight.clone();
    out.sigma = buffer.sigma.clone();

    let mut flags_and_weights = None;
    for (col, cube) in &buffer.data {
        let (data, flags, ws) = run_cube(pipeline, kernel, cube, &buffer.flag, &weights, num_out);
        out.data.insert(*col, data);
        flags_and_weights.get_or_insert((flags, ws));
    }
    if let Some(cube) = &buffer.float_data {
        let (data, flags, ws) = run_cube(pipeline, kernel, cube, &buffer.flag, &weights, num_out);
        out.float_data = Some(data);
        flags_and_weights.get_or_insert((flags, ws));
    }
    let (flags, ws) = match flags_and_weights {
        Some(fw) => fw,
        None => {
            let (_, flags, ws) =
                run_cube(pipeline, kernel, &weights, &buffer.flag, &weights, num_out);
            (flags, ws)
        }
    };
    out.flag = flags;
    out.weight_spectrum = Some(ws);

    let sigma_weights = buffer.sigma_weight_spectrum();
    let (_, _, summed) = run_cube(
        pipeline,
        kernel,
        &sigma_weights,
        &buffer.flag,
        &sigma_weights,
        num_out,
    );
    out.sigma_spectrum = Some(summed.mapv(wt_to_sigma));
    out
}

fn select_chans(buffer: &VisBuffer, keep: &[usize]) -> VisBuffer {
    VisBuffer {
        rows: buffer.rows.clone(),
        meta: buffer.meta.clone(),
        ddi: buffer.ddi,
        spw: buffer.spw,
        polarization: buffer.polarization,
        data: buffer
            .data
            .iter()
            .map(|(col, cube)| (*col, cube.select(Axis(1), keep)))
            .collect(),
        float_data: buffer.float_data.as_ref().map(|c| c.select(Axis(1), keep)),
        flag: buffer.flag.select(Axis(1), keep),
        flag_row: buffer.flag_row.clone(),
        weight: buffer.weight.clone(),
        sigma: buffer.sigma.clone(),
        weight_spectrum: buffer
            .weight_spectrum
            .as_ref()
            .map(|c| c.select(Axis(1), keep)),
        sigma_spectrum: buffer
            .sigma_spectrum
            .as_ref()
            .map(|c| c.select(Axis(1), keep)),
    }
}

/// Run each (row, correlation) stripe of `cube` through `pipeline`, rows in
/// parallel. Returns the data, flags and weights.
fn run_cube<T: VisValue>(
    pipeline: &StripePipeline,
    kernel: AverageKernel,
    cube: &Array3<T>,
    flags: &Array3<bool>,
    weights: &Array3<f32>,
    num_out: usize,
) -> (Array3<T>, Array3<bool>, Array3<f32>) {
    let (num_rows, _, num_corrs) = cube.dim();
    let dim = (num_rows, num_out, num_corrs);
    let mut out = Array3::from_elem(dim, T::zero());
    let mut out_flags = Array3::from_elem(dim, true);
    let mut out_weights = Array3::zeros(dim);

    Zip::from(out.outer_iter_mut())
        .and(out_flags.outer_iter_mut())
        .and(out_weights.outer_iter_mut())
        .and(cube.outer_iter())
        .and(flags.outer_iter())
        .and(weights.outer_iter())
        .par_for_each(|mut out, mut out_flags, mut out_weights, data, flags, weights| {
            for c in 0..num_corrs {
                let data = data.column(c).to_vec();
                let flags = flags.column(c).to_vec();
                let weights = weights.column(c).to_vec();
                let stripe = pipeline.run(
                    kernel,
                    Stripe {
                        data: &data,
                        flags: &flags,
                        weights: &weights,
                    },
                );
                for (j, ((d, f), w)) in stripe
                    .data
                    .into_iter()
                    .zip(stripe.flags)
                    .zip(stripe.weights)
                    .take(num_out)
                    .enumerate()
                {
                    out[(j, c)] = d;
                    out_flags[(j, c)] = f;
                    out_weights[(j, c)] = w;
                }
            }
        });
    (out, out_flags, out_weights)
}

/// The rows of a combination and the grid they are merged onto.
struct Merge<'a> {
    contributions: &'a [ChannelContribution],
    num_out: usize,
    num_corrs: usize,
    staged: &'a [VisBuffer],
    /// (staged buffer, row) of every output row.
    members: &'a [Vec<(usize, usize)>],
}

impl Merge<'_> {
    /// Merge one cube of every staged buffer. `cubes` and `weights` are
    /// indexed like the staged buffers.
    fn cube<T: VisValue>(
        &self,
        cubes: &[Option<&Array3<T>>],
        weights: &[Array3<f32>],
    ) -> (Array3<T>, Array3<bool>, Array3<f32>) {
        let dim = (self.members.len(), self.num_out, self.num_corrs);
        let mut out = Array3::from_elem(dim, T::zero());
        let mut out_flags = Array3::from_elem(dim, true);
        let mut out_weights = Array3::zeros(dim);

        let merged: Vec<Vec<StripeOut<T>>> = self
            .members
            .par_iter()
            .map(|rows| (0..self.num_corrs).map(|c| self.stripe(rows, c, cubes, weights)).collect())
            .collect();
        for (i, corrs) in merged.into_iter().enumerate() {
            for (c, stripe) in corrs.into_iter().enumerate() {
                for (j, ((d, f), w)) in stripe
                    .data
                    .into_iter()
                    .zip(stripe.flags)
                    .zip(stripe.weights)
                    .enumerate()
                {
                    out[(i, j, c)] = d;
                    out_flags[(i, j, c)] = f;
                    out_weights[(i, j, c)] = w;
                }
            }
        }
        (out, out_flags, out_weights)
    }

    /// Merge correlation `c` of the rows of one output row.
    fn stripe<T: VisValue>(
        &self,
        rows: &[(usize, usize)],
        c: usize,
        cubes: &[Option<&Array3<T>>],
        weights: &[Array3<f32>],
    ) -> StripeOut<T> {
        let stripes: Vec<(usize, Vec<T>, Vec<bool>, Vec<f32>)> = rows
            .iter()
            .filter_map(|&(b, r)| {
                let cube = cubes[b]?;
                if c >= cube.dim().2 {
                    return None;
                }
                Some((
                    self.staged[b].spw,
                    cube.slice(s![r, .., c]).to_vec(),
                    self.staged[b].flag.slice(s![r, .., c]).to_vec(),
                    weights[b].slice(s![r, .., c]).to_vec(),
                ))
            })
            .collect();
        let inputs: Vec<SpwStripe<T>> = stripes
            .iter()
            .map(|(spw, data, flags, weights)| SpwStripe {
                spw: *spw,
                data,
                flags,
                weights,
            })
            .collect();
        combine_spws(self.contributions, self.num_out, &inputs)
    }
}
