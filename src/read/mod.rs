//! Reading visibilities. [`InputMs`] abstracts the input table,
//! [`VisIter`] is the pull interface the transformation consumes and
//! [`VisBuffer`] holds the rows of one buffer.

mod error;
mod iter;
mod memory;
mod ms;
#[cfg(test)]
mod tests;

pub use error::MsError;
pub use iter::{ChunkPolicy, VisIter, VisibilityIterator};
pub use memory::{MemoryMs, MemoryRow, SharedMemoryMs};
pub use ms::MsReader;

use std::{collections::BTreeSet, ops::Range};

use indexmap::IndexMap;
use marlu::c32;
use ndarray::prelude::*;

use crate::{
    weights::{sigma_to_weight, WeightSpectrumSource},
    MsColumn, MsMetadata, RowMeta,
};

/// What to read for a set of rows.
#[derive(Debug, Clone, Default)]
pub struct ReadRequest<'a> {
    /// Data columns and, optionally, WEIGHT_SPECTRUM and SIGMA_SPECTRUM.
    pub columns: &'a [MsColumn],

    /// Only these channels; all if `None`.
    pub chans: Option<Range<usize>>,

    /// Only these correlations, in this order; all if `None`.
    pub corrs: Option<&'a [usize]>,
}

/// A measurement set that visibilities can be read from.
pub trait InputMs: Send {
    /// A name for messages, e.g. the path.
    fn name(&self) -> String;

    fn metadata(&self) -> &MsMetadata;

    /// The optional main-table columns that are present.
    fn columns(&self) -> &BTreeSet<MsColumn>;

    fn num_rows(&self) -> usize;

    /// The id and time columns of every row.
    fn read_meta(&mut self) -> Result<Vec<RowMeta>, MsError>;

    /// Read `rows`, which must all share a data description.
    fn read_rows(&mut self, rows: &[usize], request: &ReadRequest) -> Result<VisBuffer, MsError>;

    /// Overwrite the flags of `rows` for the channels and correlations
    /// described by `chans` and `corrs`.
    fn write_flags(
        &mut self,
        rows: &[usize],
        flags: ArrayView3<bool>,
        chans: Option<Range<usize>>,
        corrs: Option<&[usize]>,
    ) -> Result<(), MsError>;

    fn write_flag_row(&mut self, rows: &[usize], flag_row: &[bool]) -> Result<(), MsError>;
}

/// Rows of one data description. Cubes are `[row][chan][corr]`, WEIGHT and
/// SIGMA are `[row][corr]`.
#[derive(Debug, Clone, PartialEq)]
pub struct VisBuffer {
    /// The input row numbers. Empty for rows made by time averaging.
    pub rows: Vec<usize>,
    pub meta: Vec<RowMeta>,
    pub ddi: usize,
    pub spw: usize,
    pub polarization: usize,
    /// The complex data columns that were read.
    pub data: IndexMap<MsColumn, Array3<c32>>,
    pub float_data: Option<Array3<f32>>,
    pub flag: Array3<bool>,
    pub flag_row: Vec<bool>,
    pub weight: Array2<f32>,
    pub sigma: Array2<f32>,
    pub weight_spectrum: Option<Array3<f32>>,
    pub sigma_spectrum: Option<Array3<f32>>,
}

impl VisBuffer {
    /// A buffer of the given shape with no data columns, no flags and unit
    /// weights and sigmas.
    pub fn empty(
        meta: Vec<RowMeta>,
        ddi: usize,
        spw: usize,
        polarization: usize,
        num_chans: usize,
        num_corrs: usize,
    ) -> VisBuffer {
        let num_rows = meta.len();
        VisBuffer {
            rows: vec![],
            meta,
            ddi,
            spw,
            polarization,
            data: IndexMap::new(),
            float_data: None,
            flag: Array3::from_elem((num_rows, num_chans, num_corrs), false),
            flag_row: vec![false; num_rows],
            weight: Array2::ones((num_rows, num_corrs)),
            sigma: Array2::ones((num_rows, num_corrs)),
            weight_spectrum: None,
            sigma_spectrum: None,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.meta.len()
    }

    /// (rows, channels, correlations)
    pub fn shape(&self) -> (usize, usize, usize) {
        self.flag.dim()
    }

    /// The per-sample weights, taken from `source`.
    pub fn weight_spectrum_from(&self, source: WeightSpectrumSource) -> Array3<f32> {
        match (source, &self.weight_spectrum, &self.sigma_spectrum) {
            (WeightSpectrumSource::Column, Some(ws), _) => ws.clone(),
            (WeightSpectrumSource::SigmaSpectrum, _, Some(ss)) => ss.mapv(sigma_to_weight),
            _ => broadcast(&self.weight, self.shape().1),
        }
    }

    /// The per-sample weights implied by the sigmas: SIGMA_SPECTRUM if it was
    /// read, otherwise SIGMA broadcast over channels.
    pub fn sigma_weight_spectrum(&self) -> Array3<f32> {
        match &self.sigma_spectrum {
            Some(ss) => ss.mapv(sigma_to_weight),
            None => broadcast(&self.sigma, self.shape().1).mapv(sigma_to_weight),
        }
    }
}

/// Repeat `[row][corr]` values over `num_chans` channels.
fn broadcast(values: &Array2<f32>, num_chans: usize) -> Array3<f32> {
    let (num_rows, num_corrs) = values.dim();
    Array3::from_shape_fn((num_rows, num_chans, num_corrs), |(r, _, c)| values[(r, c)])
}

/// The geometry of a read: which rows, and what to keep of each cell.
pub(crate) struct ReadShape<'a> {
    pub(crate) table: &'a str,
    /// The full cell shape, `[chan][corr]`.
    pub(crate) cell: (usize, usize),
    pub(crate) chans: Option<Range<usize>>,
    pub(crate) corrs: Option<&'a [usize]>,
}

impl<'a> ReadShape<'a> {
    pub(crate) fn new(
        table: &'a str,
        meta: &MsMetadata,
        ddi: usize,
        request: &ReadRequest<'a>,
    ) -> Result<(ReadShape<'a>, usize, usize), MsError> {
        let dd = meta
            .data_descriptions
            .get(ddi)
            .ok_or(MsError::UnknownDdi(ddi))?;
        let num_chans = meta
            .spectral_windows
            .get(dd.spw)
            .map(|s| s.num_chans())
            .unwrap_or(0);
        let num_corrs = meta
            .polarizations
            .get(dd.polarization)
            .map(|p| p.corr_types.len())
            .unwrap_or(0);
        Ok((
            ReadShape {
                table,
                cell: (num_chans, num_corrs),
                chans: request.chans.clone(),
                corrs: request.corrs,
            },
            dd.spw,
            dd.polarization,
        ))
    }

    /// The shape of a selected cell.
    pub(crate) fn selected(&self) -> (usize, usize) {
        (
            self.chans.as_ref().map(|r| r.len()).unwrap_or(self.cell.0),
            self.corrs.map(|c| c.len()).unwrap_or(self.cell.1),
        )
    }

    /// Check a cell's shape and copy its selected part into row `i` of
    /// `cube`.
    pub(crate) fn fill<T: Clone>(
        &self,
        cube: &mut Array3<T>,
        i: usize,
        row: usize,
        array: &'static str,
        cell: ArrayView2<T>,
    ) -> Result<(), MsError> {
        if cell.dim() != self.cell {
            return Err(MsError::BadArrayShape {
                table: self.table.to_string(),
                row,
                array,
                expected: vec![self.cell.0, self.cell.1],
                got: cell.shape().to_vec(),
            });
        }
        cube.slice_mut(s![i, .., ..])
            .assign(&slice_cell(cell, &self.chans, self.corrs));
        Ok(())
    }

    /// Select the correlations of a WEIGHT or SIGMA cell into row `i` of
    /// `out`.
    pub(crate) fn fill_corrs(
        &self,
        out: &mut Array2<f32>,
        i: usize,
        row: usize,
        array: &'static str,
        values: &[f32],
    ) -> Result<(), MsError> {
        if values.len() != self.cell.1 {
            return Err(MsError::BadArrayShape {
                table: self.table.to_string(),
                row,
                array,
                expected: vec![self.cell.1],
                got: vec![values.len()],
            });
        }
        let mut out_row = out.row_mut(i);
        match self.corrs {
            Some(corrs) => {
                for (o, &c) in out_row.iter_mut().zip(corrs) {
                    *o = values[c];
                }
            }
            None => {
                for (o, v) in out_row.iter_mut().zip(values) {
                    *o = *v;
                }
            }
        }
        Ok(())
    }

    /// An empty buffer with cubes for `columns`.
    pub(crate) fn allocate(
        &self,
        rows: &[usize],
        meta: Vec<RowMeta>,
        ddi: usize,
        spw: usize,
        polarization: usize,
        columns: &[MsColumn],
    ) -> VisBuffer {
        let (num_chans, num_corrs) = self.selected();
        let num_rows = meta.len();
        let mut buffer = VisBuffer::empty(meta, ddi, spw, polarization, num_chans, num_corrs);
        buffer.rows = rows.to_vec();
        let dim = (num_rows, num_chans, num_corrs);
        for &col in columns {
            match col {
                MsColumn::FloatData => buffer.float_data = Some(Array3::zeros(dim)),
                MsColumn::WeightSpectrum => buffer.weight_spectrum = Some(Array3::zeros(dim)),
                MsColumn::SigmaSpectrum => buffer.sigma_spectrum = Some(Array3::zeros(dim)),
                _ => {
                    buffer.data.insert(col, Array3::zeros(dim));
                }
            }
        }
        buffer
    }
}

/// Cut the selected channels and correlations out of a `[chan][corr]` cell.
pub(crate) fn slice_cell<T: Clone>(
    cell: ArrayView2<T>,
    chans: &Option<Range<usize>>,
    corrs: Option<&[usize]>,
) -> Array2<T> {
    let cell = match chans {
        Some(r) => cell.slice_move(s![r.clone(), ..]),
        None => cell,
    };
    match corrs {
        Some(c) => cell.select(Axis(1), c),
        None => cell.to_owned(),
    }
}

/// The inverse of [`slice_cell`]: write `values` into the selected channels
/// and correlations of `cell`.
pub(crate) fn put_cell_slice<T: Clone>(
    cell: &mut Array2<T>,
    values: ArrayView2<T>,
    chans: &Option<Range<usize>>,
    corrs: Option<&[usize]>,
) {
    let offset = chans.as_ref().map(|r| r.start).unwrap_or(0);
    for ((i_chan, i_corr), v) in values.indexed_iter() {
        let corr = corrs.map(|c| c[i_corr]).unwrap_or(i_corr);
        if let Some(dest) = cell.get_mut((offset + i_chan, corr)) {
            *dest = v.clone();
        }
    }
}
