//! Time averaging. Timestamps are first grouped into [`TimeBin`]s, which
//! decide the chunks of the visibility iterator; the [`TimeAverager`] then
//! collapses the rows of each baseline inside a buffer.


use std::ops::Range;

use hifitime::{Duration, Epoch, J1900_OFFSET, SECONDS_PER_DAY};
use indexmap::IndexMap;
use log::trace;
use marlu::c32;
use ndarray::prelude::*;
use vec1::Vec1;

use crate::{
    config::TimeAverageSpec,
    kernels::{AverageKernel, Stripe, VisValue},
    read::VisBuffer,
    weights::{sigma_to_weight, wt_to_sigma},
    RowMeta,
};

/// Timestamps carry sub-microsecond noise from their f64 origin; this much
/// slack keeps a timestamp that sits on a bin edge in the later bin.
const EDGE_SLACK_NS: i128 = 500;

/// Convert MJD seconds (UTC), as stored in the TIME column, to an epoch.
pub fn epoch_from_mjd_seconds(mjd_seconds: f64) -> Epoch {
    Epoch::from_utc_seconds(mjd_seconds - J1900_OFFSET * SECONDS_PER_DAY)
}

pub fn epoch_to_mjd_seconds(epoch: Epoch) -> f64 {
    epoch.to_utc_seconds() + J1900_OFFSET * SECONDS_PER_DAY
}

/// A collection of timestamps that are averaged together.
#[derive(Debug, Clone)]
pub struct TimeBin {
    /// The bin index. Empty bins are skipped, so indices are dense.
    pub index: usize,

    /// The indices of this bin's timestamps into the timestamps the bins
    /// were made from. Timestamps of a bin are always contiguous.
    pub range: Range<usize>,

    pub timestamps: Vec1<Epoch>,

    /// The start of the ideal bin, i.e. the first timestamp plus a whole
    /// number of bin widths.
    pub start: Epoch,
}

/// Group ascendingly-sorted `timestamps` into bins of `width`, counted from
/// the first timestamp. e.g. for timestamps 0 to 9 s and a 3 s width:
///
/// [[0, 1, 2], [3, 4, 5], [6, 7, 8], [9]]
///
/// With gaps, bins that would be empty are not made, and the bins that are
/// made keep their ideal starts.
pub fn time_bins(timestamps: &Vec1<Epoch>, width: Duration) -> Vec<TimeBin> {
    let first = *timestamps.first();
    let width_ns = width.total_nanoseconds().max(1);
    let finish = |index: usize, (ideal, start, stamps): (i128, usize, Vec1<Epoch>)| TimeBin {
        index,
        range: start..start + stamps.len(),
        timestamps: stamps,
        start: first + Duration::from_total_nanoseconds(ideal * width_ns),
    };

    let mut bins = vec![];
    let mut current = (0, 0, Vec1::new(first));
    for (i, &t) in timestamps.iter().enumerate().skip(1) {
        let ideal = ((t - first).total_nanoseconds() + EDGE_SLACK_NS).div_euclid(width_ns);
        if ideal == current.0 {
            current.2.push(t);
        } else {
            let done = std::mem::replace(&mut current, (ideal, i, Vec1::new(t)));
            bins.push(finish(bins.len(), done));
        }
    }
    bins.push(finish(bins.len(), current));
    bins
}

/// Averages the rows of a buffer in time, per baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeAverager {
    /// Rows of different scans may be averaged together.
    pub span_scan: bool,

    /// Rows of different states may be averaged together.
    pub span_state: bool,

    /// A row whose UVW is further than this from the first row of its
    /// group starts a new group \[metres\].
    pub max_uvw_distance: Option<f64>,
}

impl TimeAverager {
    pub fn new(spec: &TimeAverageSpec) -> TimeAverager {
        TimeAverager {
            span_scan: spec.span_scan,
            span_state: spec.span_state,
            max_uvw_distance: spec.max_uvw_distance,
        }
    }

    /// The groups of rows of `meta` that are averaged together. Each group is
    /// in time order and groups are ordered by their first row.
    pub fn groups(&self, meta: &[RowMeta]) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..meta.len()).collect();
        order.sort_by(|&a, &b| meta[a].time.total_cmp(&meta[b].time));

        // (antenna1, antenna2, feed1, feed2, field, scan, state)
        type BaselineKey = (usize, usize, i32, i32, usize, i32, i32);
        let mut by_baseline: IndexMap<BaselineKey, Vec<Vec<usize>>> = IndexMap::new();
        for r in order {
            let m = &meta[r];
            let key = (
                m.antenna1,
                m.antenna2,
                m.feed1,
                m.feed2,
                m.field,
                if self.span_scan { i32::MIN } else { m.scan },
                if self.span_state { i32::MIN } else { m.state },
            );
            let groups = by_baseline.entry(key).or_default();
            let split = match (groups.last(), self.max_uvw_distance) {
                (None, _) => true,
                (Some(g), Some(max)) => uvw_distance(&meta[g[0]].uvw, &m.uvw) > max,
                (Some(_), None) => false,
            };
            if split {
                groups.push(vec![r]);
            } else if let Some(g) = groups.last_mut() {
                g.push(r);
            }
        }

        let mut groups: Vec<Vec<usize>> = by_baseline.into_values().flatten().collect();
        groups.sort_by(|a, b| {
            let (a, b) = (&meta[a[0]], &meta[b[0]]);
            a.time
                .total_cmp(&b.time)
                .then(a.antenna1.cmp(&b.antenna1))
                .then(a.antenna2.cmp(&b.antenna2))
        });
        groups
    }

    /// Average `buffer` in time. The per-sample weights are the buffer's
    /// weight spectrum, or WEIGHT broadcast over channels if it has none.
    /// Output rows carry no input row numbers.
    pub fn average(&self, buffer: &VisBuffer) -> VisBuffer {
        let groups = self.groups(&buffer.meta);
        trace!(
            "Averaging {} rows into {} rows",
            buffer.num_rows(),
            groups.len()
        );
        let weights = match &buffer.weight_spectrum {
            Some(ws) => ws.clone(),
            None => broadcast(&buffer.weight, buffer.shape().1),
        };

        let meta = groups
            .iter()
            .map(|g| average_meta(&buffer.meta, &buffer.weight, &buffer.flag_row, g))
            .collect();
        let (_, num_chans, num_corrs) = buffer.shape();
        let mut out = VisBuffer::empty(
            meta,
            buffer.ddi,
            buffer.spw,
            buffer.polarization,
            num_chans,
            num_corrs,
        );

        let mean = |cube: &Array3<c32>| {
            average_cube(cube, &buffer.flag, &weights, &groups, AverageKernel::FlagWeights).0
        };
        for (col, cube) in &buffer.data {
            out.data.insert(*col, mean(cube));
        }
        out.float_data = buffer.float_data.as_ref().map(|cube| {
            average_cube(cube, &buffer.flag, &weights, &groups, AverageKernel::FlagWeights).0
        });
        let (summed, flags) = average_cube(
            &weights,
            &buffer.flag,
            &weights,
            &groups,
            AverageKernel::FlagCumSum,
        );
        out.flag = flags;
        if buffer.weight_spectrum.is_some() {
            out.weight_spectrum = Some(summed);
        }
        if let Some(ss) = &buffer.sigma_spectrum {
            let (summed, _) = average_cube(
                &ss.mapv(sigma_to_weight),
                &buffer.flag,
                &weights,
                &groups,
                AverageKernel::FlagCumSum,
            );
            out.sigma_spectrum = Some(summed.mapv(wt_to_sigma));
        }

        for (i, g) in groups.iter().enumerate() {
            let live: Vec<usize> = match g.iter().filter(|&&r| !buffer.flag_row[r]).count() {
                0 => g.clone(),
                _ => g.iter().copied().filter(|&r| !buffer.flag_row[r]).collect(),
            };
            for c in 0..num_corrs {
                let w: f32 = live.iter().map(|&r| buffer.weight[(r, c)]).sum();
                out.weight[(i, c)] = w;
                out.sigma[(i, c)] = wt_to_sigma(w);
            }
            out.flag_row[i] = g.iter().all(|&r| buffer.flag_row[r]);
        }
        out
    }
}

fn uvw_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt()
}

/// The id and time columns of an averaged row. TIME is the centre of the
/// span covered by the group's integrations; UVW and TIME_CENTROID are
/// means weighted by the rows' summed WEIGHT.
fn average_meta(
    meta: &[RowMeta],
    weight: &Array2<f32>,
    flag_row: &[bool],
    group: &[usize],
) -> RowMeta {
    let first = meta[group[0]];
    let start = group
        .iter()
        .map(|&r| meta[r].time - meta[r].interval / 2.0)
        .fold(f64::INFINITY, f64::min);
    let end = group
        .iter()
        .map(|&r| meta[r].time + meta[r].interval / 2.0)
        .fold(f64::NEG_INFINITY, f64::max);

    let mut row_weights: Vec<f64> = group
        .iter()
        .map(|&r| {
            if flag_row[r] {
                0.0
            } else {
                weight.row(r).iter().map(|&w| f64::from(w.max(0.0))).sum()
            }
        })
        .collect();
    let mut total: f64 = row_weights.iter().sum();
    if total <= 0.0 {
        row_weights.iter_mut().for_each(|w| *w = 1.0);
        total = group.len() as f64;
    }

    let mut uvw = [0.0; 3];
    let mut time_centroid = 0.0;
    for (&r, w) in group.iter().zip(row_weights) {
        for (u, v) in uvw.iter_mut().zip(meta[r].uvw) {
            *u += v * w / total;
        }
        time_centroid += meta[r].time_centroid * w / total;
    }

    RowMeta {
        time: (start + end) / 2.0,
        interval: end - start,
        exposure: group.iter().map(|&r| meta[r].exposure).sum(),
        time_centroid,
        uvw,
        ..first
    }
}

/// Collapse the rows of each group of `cube` with `kernel`. Returns the
/// averaged cube and its flags.
fn average_cube<T: VisValue>(
    cube: &Array3<T>,
    flags: &Array3<bool>,
    weights: &Array3<f32>,
    groups: &[Vec<usize>],
    kernel: AverageKernel,
) -> (Array3<T>, Array3<bool>) {
    let (_, num_chans, num_corrs) = cube.dim();
    let dim = (groups.len(), num_chans, num_corrs);
    let mut out = Array3::from_elem(dim, T::zero());
    let mut out_flags = Array3::from_elem(dim, false);
    let mut data = Vec::new();
    let mut flag = Vec::new();
    let mut weight = Vec::new();
    for (i, g) in groups.iter().enumerate() {
        for chan in 0..num_chans {
            for corr in 0..num_corrs {
                data.clear();
                flag.clear();
                weight.clear();
                for &r in g {
                    data.push(cube[(r, chan, corr)]);
                    flag.push(flags[(r, chan, corr)]);
                    weight.push(weights[(r, chan, corr)]);
                }
                let mut value = [T::zero()];
                let mut value_flag = [false];
                kernel.average(
                    Stripe {
                        data: &data,
                        flags: &flag,
                        weights: &weight,
                    },
                    g.len(),
                    &mut value,
                    &mut value_flag,
                );
                out[(i, chan, corr)] = value[0];
                out_flags[(i, chan, corr)] = value_flag[0];
            }
        }
    }
    (out, out_flags)
}

fn broadcast(values: &Array2<f32>, num_chans: usize) -> Array3<f32> {
    let (num_rows, num_corrs) = values.dim();
    Array3::from_shape_fn((num_rows, num_chans, num_corrs), |(r, _, c)| values[(r, c)])
}
